// Shared helpers for the integration tests.
// A wiremock server plays the product site and a recording mailer stands in
// for SMTP.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use restock_watcher::fetcher::{FetchRequest, Fetcher, HttpPageClient, RetryPolicy};
use restock_watcher::notifications::{MailBody, MailError, MailReceipt, Mailer, Notifier};
use restock_watcher::Monitor;

pub const SENDER: &str = "alerts@example.com";
pub const RECIPIENT: &str = "me@example.com";
pub const PRODUCT_PATH: &str = "/store/detail/TAG3CSDB";

pub const IN_STOCK_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Yamaha TAG3 C | Sweetwater</title></head>
<body>
    <h1 class="product__name">Yamaha TAG3 C TransAcoustic Dreadnought</h1>
    <div class="product-price--final"><span class="product__price">$1,299.99</span></div>
    <component>Add to Cart</component>
</body>
</html>"#;

pub const OUT_OF_STOCK_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Yamaha TAG3 C | Sweetwater</title></head>
<body>
    <h1 class="product__name">Yamaha TAG3 C TransAcoustic Dreadnought</h1>
    <span class="product__price">$1,299.99</span>
    <button class="notify">Notify me when in stock</button>
</body>
</html>"#;

pub const UNRECOGNISED_PAGE: &str = r#"<!DOCTYPE html>
<html><body><h1>Yamaha TAG3 C</h1><p>Call us for details.</p></body></html>"#;

#[derive(Debug, Clone)]
pub struct SentMail {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: MailBody,
}

/// Records every send; optionally fails them all.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<SentMail>>>,
    fail_with: Option<MailError>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: MailError) -> Self {
        Self {
            sent: Arc::default(),
            fail_with: Some(error),
        }
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(
        &self,
        sender: &str,
        recipient: &str,
        subject: &str,
        body: &MailBody,
    ) -> Result<MailReceipt, MailError> {
        self.sent.lock().unwrap().push(SentMail {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.clone(),
        });

        match &self.fail_with {
            Some(error) => Err(error.clone()),
            None => Ok(MailReceipt {
                message_id: format!("test-{}", self.sent.lock().unwrap().len()),
            }),
        }
    }
}

/// Request against the mock server with no backoff so retries are instant.
pub fn fetch_request(base_uri: &str, max_attempts: u32, timeout: Duration) -> FetchRequest {
    FetchRequest::new(
        format!("{}{}", base_uri, PRODUCT_PATH),
        RetryPolicy::new(max_attempts, Duration::ZERO).expect("attempts >= 1"),
        timeout,
    )
}

pub fn create_monitor(mailer: RecordingMailer) -> Monitor<HttpPageClient, RecordingMailer> {
    let fetcher = Fetcher::new(HttpPageClient::new(Some("RestockWatcher-Test/1.0")).expect("http client"));
    let notifier = Notifier::new(mailer, SENDER, RECIPIENT, Duration::from_secs(5));
    Monitor::new(fetcher, notifier)
}
