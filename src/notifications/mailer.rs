use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("mail transport failed: {0}")]
    Transport(String),

    #[error("mail send timed out after {0}ms")]
    Timeout(u64),
}

/// Plain-text body plus an optional HTML alternative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailBody {
    pub text: String,
    pub html: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailReceipt {
    pub message_id: String,
}

/// Outbound mail transport. Only success or failure matters to callers;
/// delivery confirmation is out of reach.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        sender: &str,
        recipient: &str,
        subject: &str,
        body: &MailBody,
    ) -> Result<MailReceipt, MailError>;
}

/// Logs the message instead of sending it.
#[derive(Debug, Default, Clone)]
pub struct DryRunMailer;

#[async_trait]
impl Mailer for DryRunMailer {
    async fn send(
        &self,
        sender: &str,
        recipient: &str,
        subject: &str,
        body: &MailBody,
    ) -> Result<MailReceipt, MailError> {
        info!(sender, recipient, subject, "Dry run: would send email");
        info!(body = %body.text, "Dry run email body");
        Ok(MailReceipt {
            message_id: format!("dry-run-{}", chrono::Utc::now().timestamp()),
        })
    }
}

pub(crate) fn timeout_error(limit: Duration) -> MailError {
    MailError::Timeout(limit.as_millis() as u64)
}
