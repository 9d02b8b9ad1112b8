use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classifier::{classify, AvailabilityResult};
use crate::fetcher::{FetchErrorKind, FetchOutcome, FetchRequest, Fetcher, PageClient};
use crate::notifications::{Mailer, NotificationOutcome, Notifier};

/// Fetch summary kept in the report; the page body itself is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchSummary {
    Success { status_code: u16, bytes: usize },
    Failure { last_error: FetchErrorKind, attempts_made: u32 },
}

impl From<&FetchOutcome> for FetchSummary {
    fn from(outcome: &FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Success { html, status_code } => FetchSummary::Success {
                status_code: *status_code,
                bytes: html.len(),
            },
            FetchOutcome::Failure {
                last_error,
                attempts_made,
            } => FetchSummary::Failure {
                last_error: last_error.clone(),
                attempts_made: *attempts_made,
            },
        }
    }
}

/// Everything one invocation observed and did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationReport {
    pub url: String,
    pub checked_at: DateTime<Utc>,
    pub fetch: FetchSummary,
    /// `Unknown` with the `fetch_failed` signal when nothing was fetched.
    pub availability: AvailabilityResult,
    pub notification: Option<NotificationOutcome>,
    pub success: bool,
}

impl InvocationReport {
    /// Success unless the fetch terminally failed or a send attempt failed.
    /// An `Unknown` verdict with no send is still a success.
    fn evaluate(fetch: &FetchSummary, notification: Option<&NotificationOutcome>) -> bool {
        let fetch_ok = matches!(fetch, FetchSummary::Success { .. });
        let mail_ok = !notification.map(NotificationOutcome::is_failure).unwrap_or(false);
        fetch_ok && mail_ok
    }

    pub fn notification_sent(&self) -> bool {
        self.notification
            .as_ref()
            .map(NotificationOutcome::was_sent)
            .unwrap_or(false)
    }
}

/// Runs fetch, classify and notify once, in that order.
pub struct Monitor<C, M> {
    fetcher: Fetcher<C>,
    notifier: Notifier<M>,
}

impl<C: PageClient, M: Mailer> Monitor<C, M> {
    pub fn new(fetcher: Fetcher<C>, notifier: Notifier<M>) -> Self {
        Self { fetcher, notifier }
    }

    pub fn fetcher(&self) -> &Fetcher<C> {
        &self.fetcher
    }

    pub fn notifier(&self) -> &Notifier<M> {
        &self.notifier
    }

    pub async fn run(&self, request: &FetchRequest, skip_notification: bool) -> InvocationReport {
        let checked_at = Utc::now();
        info!(url = request.url(), skip_notification, "Checking product availability");

        let outcome = self.fetcher.fetch(request).await;
        let fetch = FetchSummary::from(&outcome);

        let (availability, notification) = match outcome {
            FetchOutcome::Success { html, .. } => {
                let result = classify(&html);
                let notification = self
                    .notifier
                    .decide_and_notify(&result, skip_notification, request.url())
                    .await;
                (result, Some(notification))
            }
            FetchOutcome::Failure { .. } => {
                warn!(url = request.url(), "Nothing to classify, fetch failed");
                (AvailabilityResult::fetch_failed(), None)
            }
        };

        let success = InvocationReport::evaluate(&fetch, notification.as_ref());
        let report = InvocationReport {
            url: request.url().to_string(),
            checked_at,
            fetch,
            availability,
            notification,
            success,
        };

        info!(
            url = %report.url,
            success = report.success,
            notification_sent = report.notification_sent(),
            "Invocation finished"
        );
        report
    }
}
