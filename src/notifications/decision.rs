use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use super::email::NotificationPayload;
use super::mailer::{timeout_error, MailError, Mailer};
use crate::classifier::{AvailabilityResult, AvailabilityStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationDecision {
    pub should_notify: bool,
    pub reason: String,
}

/// Notify on every `Available` reading unless skipped. There is no memory of
/// earlier runs, so a product that stays in stock is reported on each run.
pub fn decide(result: &AvailabilityResult, skip: bool) -> NotificationDecision {
    let (should_notify, reason) = match (result.status, skip) {
        (AvailabilityStatus::Available, false) => (true, "product is available".to_string()),
        (AvailabilityStatus::Available, true) => (
            false,
            "product is available but notifications are skipped".to_string(),
        ),
        (AvailabilityStatus::Unavailable, _) => (false, "product is not available yet".to_string()),
        (AvailabilityStatus::Unknown, _) => (
            false,
            format!("availability unknown ({})", result.confidence_signal),
        ),
    };

    NotificationDecision {
        should_notify,
        reason,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Sent { message_id: String, subject: String },
    NotSent { reason: String },
    Failed { error: MailError },
}

impl NotificationOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, NotificationOutcome::Failed { .. })
    }

    pub fn was_sent(&self) -> bool {
        matches!(self, NotificationOutcome::Sent { .. })
    }
}

/// Turns a verdict into at most one email.
pub struct Notifier<M> {
    mailer: M,
    sender: String,
    recipient: String,
    send_timeout: Duration,
}

impl<M: Mailer> Notifier<M> {
    pub fn new(mailer: M, sender: impl Into<String>, recipient: impl Into<String>, send_timeout: Duration) -> Self {
        Self {
            mailer,
            sender: sender.into(),
            recipient: recipient.into(),
            send_timeout,
        }
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }

    /// Sends exactly one email when the decision calls for it. A failed send
    /// is reported in the outcome and not retried; the next scheduled run is
    /// the retry.
    pub async fn decide_and_notify(
        &self,
        result: &AvailabilityResult,
        skip: bool,
        product_url: &str,
    ) -> NotificationOutcome {
        let decision = decide(result, skip);
        info!(
            should_notify = decision.should_notify,
            reason = %decision.reason,
            "Notification decision"
        );

        if !decision.should_notify {
            return NotificationOutcome::NotSent {
                reason: decision.reason,
            };
        }

        let payload = NotificationPayload::new(result, product_url, Utc::now());
        let subject = payload.subject();
        let body = payload.body();

        let sent = tokio::time::timeout(
            self.send_timeout,
            self.mailer
                .send(&self.sender, &self.recipient, &subject, &body),
        )
        .await
        .unwrap_or_else(|_| Err(timeout_error(self.send_timeout)));

        match sent {
            Ok(receipt) => {
                info!(
                    recipient = %self.recipient,
                    message_id = %receipt.message_id,
                    "Notification sent"
                );
                NotificationOutcome::Sent {
                    message_id: receipt.message_id,
                    subject,
                }
            }
            Err(e) => {
                error!(recipient = %self.recipient, error = %e, "Failed to send notification");
                NotificationOutcome::Failed { error: e }
            }
        }
    }
}
