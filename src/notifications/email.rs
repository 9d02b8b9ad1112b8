use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use lettre::message::{header, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::mailer::{MailBody, MailError, MailReceipt, Mailer};
use crate::classifier::AvailabilityResult;

pub const UNKNOWN_TITLE: &str = "Unknown Product";
pub const UNKNOWN_PRICE: &str = "Price not found";

/// What the back-in-stock email says.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub price: String,
    pub url: String,
    pub checked_at: DateTime<Utc>,
}

impl NotificationPayload {
    pub fn new(result: &AvailabilityResult, url: &str, checked_at: DateTime<Utc>) -> Self {
        Self {
            title: result
                .product_title
                .clone()
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            price: result
                .product_price
                .clone()
                .unwrap_or_else(|| UNKNOWN_PRICE.to_string()),
            url: url.to_string(),
            checked_at,
        }
    }

    pub fn subject(&self) -> String {
        format!("Product Available: {}", self.title)
    }

    fn checked_at_display(&self) -> String {
        self.checked_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn text_body(&self) -> String {
        let mut text = String::new();

        text.push_str("Good news! The product you're tracking is now available!\n\n");
        text.push_str(&format!("Product: {}\n", self.title));
        text.push_str(&format!("Price: {}\n", self.price));
        text.push_str(&format!("URL: {}\n\n", self.url));
        text.push_str(&format!("Checked at: {}\n", self.checked_at_display()));

        text
    }

    pub fn html_body(&self) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        .button {{ display: inline-block; background-color: #4CAF50; color: white; padding: 10px 20px; text-decoration: none; border-radius: 4px; }}
        .footer {{ color: #6c757d; font-size: 12px; margin-top: 20px; }}
    </style>
</head>
<body>
    <h2>Good news! The product you're tracking is now available!</h2>
    <p><strong>Product:</strong> {title}</p>
    <p><strong>Price:</strong> {price}</p>
    <p><strong>URL:</strong> <a href="{url}">{url}</a></p>
    <p><a href="{url}" class="button">View Product</a></p>
    <p class="footer">Checked at {checked_at}</p>
</body>
</html>
"#,
            title = escape_html(&self.title),
            price = escape_html(&self.price),
            url = escape_html(&self.url),
            checked_at = self.checked_at_display(),
        )
    }

    pub fn body(&self) -> MailBody {
        MailBody {
            text: self.text_body(),
            html: Some(self.html_body()),
        }
    }
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
}

/// Sends mail through an SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let builder = if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| MailError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        }
        .port(settings.port);

        let builder = match (&settings.username, &settings.password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };

        debug!(host = %settings.host, port = settings.port, tls = settings.use_tls, "Configured SMTP transport");
        Ok(Self {
            transport: builder.build(),
        })
    }
}

pub fn build_message(
    sender: &str,
    recipient: &str,
    subject: &str,
    body: &MailBody,
) -> Result<Message, MailError> {
    let from: Mailbox = sender
        .parse()
        .map_err(|e| MailError::Address(format!("{}: {}", sender, e)))?;
    let to: Mailbox = recipient
        .parse()
        .map_err(|e| MailError::Address(format!("{}: {}", recipient, e)))?;

    let builder = Message::builder().from(from).to(to).subject(subject);

    let message = match &body.html {
        Some(html) => builder.multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(header::ContentType::TEXT_PLAIN)
                        .body(body.text.clone()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(header::ContentType::TEXT_HTML)
                        .body(html.clone()),
                ),
        ),
        None => builder
            .header(header::ContentType::TEXT_PLAIN)
            .body(body.text.clone()),
    };

    message.map_err(|e| MailError::Build(e.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(
        &self,
        sender: &str,
        recipient: &str,
        subject: &str,
        body: &MailBody,
    ) -> Result<MailReceipt, MailError> {
        let message = build_message(sender, recipient, subject, body)?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let message_id = format!("smtp-{}-{}", response.code(), Utc::now().timestamp());
        info!(recipient, message_id = %message_id, "Email accepted by SMTP relay");
        Ok(MailReceipt { message_id })
    }
}
