pub mod classifier;
pub mod config;
pub mod fetcher;
pub mod monitor;
pub mod notifications;
pub mod utils;

// Re-export commonly used types
pub use classifier::{classify, AvailabilityResult, AvailabilityStatus, Signal};
pub use crate::config::MonitorConfig;
pub use fetcher::{FetchErrorKind, FetchOutcome, FetchRequest, Fetcher, HttpPageClient, PageClient, RetryPolicy};
pub use monitor::{InvocationReport, Monitor};
pub use notifications::{Mailer, NotificationOutcome, Notifier};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
