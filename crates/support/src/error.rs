//! Support platform errors

use starchat_shared::StarchatError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupportError {
    #[error("Chatwoot configuration error: {0}")]
    Config(String),

    #[error("Chatwoot request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Chatwoot API error [{status}] at {endpoint}: {body}")]
    Api {
        status: u16,
        body: String,
        endpoint: String,
    },

    #[error("Chatwoot resource not found: {0}")]
    NotFound(String),

    #[error("Invalid Chatwoot request: {0}")]
    Validation(String),
}

pub type SupportResult<T> = Result<T, SupportError>;

impl From<SupportError> for StarchatError {
    fn from(err: SupportError) -> Self {
        StarchatError::Upstream(err.to_string())
    }
}
