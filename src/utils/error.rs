use thiserror::Error;

use crate::notifications::MailError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(format!("{}", err))
    }
}

impl AppError {
    /// True for errors raised while reading or checking configuration,
    /// which abort an invocation before anything is fetched.
    pub fn is_configuration(&self) -> bool {
        matches!(self, AppError::Config(_) | AppError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
