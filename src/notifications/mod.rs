pub mod decision;
pub mod email;
pub mod mailer;

pub use decision::{decide, NotificationDecision, NotificationOutcome, Notifier};
pub use email::{NotificationPayload, SmtpMailer, SmtpSettings};
pub use mailer::{DryRunMailer, MailBody, MailError, MailReceipt, Mailer};
