//! Error types for Starchat

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StarchatError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type StarchatResult<T> = Result<T, StarchatError>;

impl From<sqlx::Error> for StarchatError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // unique_violation / foreign_key_violation
                Some("23505") | Some("23503") => Self::Conflict(db.message().to_string()),
                _ => Self::Storage(err.to_string()),
            },
            _ => Self::Storage(err.to_string()),
        }
    }
}
