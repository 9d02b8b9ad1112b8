use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

use restock_watcher::fetcher::{FetchRequest, Fetcher, HttpPageClient, RetryPolicy};
use restock_watcher::notifications::{DryRunMailer, Mailer, Notifier, SmtpMailer, SmtpSettings};
use restock_watcher::{classify, FetchOutcome, Monitor, MonitorConfig};

#[derive(Parser, Debug)]
#[command(name = "restock-watcher", version, about = "Emails you when a product is back in stock")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the product page once and notify if it is available (default)
    Check(CheckArgs),
    /// Classify a page without sending anything
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Default)]
struct CheckArgs {
    /// Override PRODUCT_URL
    #[arg(long)]
    url: Option<String>,

    /// Never send mail, whatever SKIP_NOTIFICATION says
    #[arg(long)]
    skip_notification: bool,

    /// Log the email instead of sending it
    #[arg(long)]
    dry_run: bool,

    /// Print the invocation report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Local HTML file to classify
    #[arg(long, conflicts_with = "url", required_unless_present = "url")]
    file: Option<PathBuf>,

    /// Page to fetch and classify
    #[arg(long)]
    url: Option<String>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("restock_watcher=info".parse()?);

    let json = json
        || std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.json_logs) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command.unwrap_or(Command::Check(CheckArgs::default())) {
        Command::Check(args) => check(args).await,
        Command::Inspect(args) => inspect(args).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn check(args: CheckArgs) -> Result<bool> {
    let mut config = MonitorConfig::from_env().context("invalid configuration")?;
    if let Some(url) = args.url {
        config.product_url = url;
        config.validate_all().context("invalid --url")?;
    }
    let skip = args.skip_notification || config.skip_notification();

    match (&config.smtp_host, args.dry_run) {
        (Some(host), false) => {
            let mailer = SmtpMailer::new(&SmtpSettings {
                host: host.clone(),
                port: config.smtp_port,
                username: config.smtp_username.clone(),
                password: config.smtp_password.clone(),
                use_tls: config.smtp_use_tls,
            })?;
            run_check(&config, skip, args.json, mailer).await
        }
        _ => {
            info!("No SMTP relay configured or --dry-run given, emails will only be logged");
            run_check(&config, skip, args.json, DryRunMailer).await
        }
    }
}

async fn run_check<M: Mailer>(config: &MonitorConfig, skip: bool, json: bool, mailer: M) -> Result<bool> {
    let request = config.fetch_request()?;
    let fetcher = Fetcher::new(HttpPageClient::new(config.fetch_user_agent.as_deref())?);
    let notifier = Notifier::new(
        mailer,
        config.sender_email.clone(),
        config.recipient_email.clone(),
        config.mail_timeout(),
    );

    let report = Monitor::new(fetcher, notifier).run(&request, skip).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(report.success)
}

async fn inspect(args: InspectArgs) -> Result<bool> {
    let html = match (args.file, args.url) {
        (Some(path), _) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, Some(url)) => {
            let request = FetchRequest::new(url, RetryPolicy::default(), Duration::from_secs(30));
            match Fetcher::http(None)?.fetch(&request).await {
                FetchOutcome::Success { html, .. } => html,
                FetchOutcome::Failure {
                    last_error,
                    attempts_made,
                } => {
                    error!(attempts_made, error = %last_error, "Could not fetch page");
                    return Ok(false);
                }
            }
        }
        (None, None) => anyhow::bail!("either --file or --url is required"),
    };

    let result = classify(&html);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Status:  {}", result.status);
        println!("Signal:  {}", result.confidence_signal);
        println!("Title:   {}", result.product_title.as_deref().unwrap_or("-"));
        println!("Price:   {}", result.product_price.as_deref().unwrap_or("-"));
    }
    Ok(true)
}
