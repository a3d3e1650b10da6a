//! Billing error types

use starchat_shared::{SeatKind, StarchatError};
use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    /// The remote object referenced by a stored identifier no longer exists
    #[error("Remote resource missing ({id}): {message}")]
    ResourceMissing { id: String, message: String },

    /// The billing provider refused the request as invalid
    #[error("Request rejected: {message}")]
    Rejected {
        message: String,
        code: Option<String>,
    },

    /// Network failure, timeout, rate limit or provider outage
    #[error("Transient billing failure: {0}")]
    Transient(String),

    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("You already use {used} {kind}. To change the limit to {total}, reduce usage first.")]
    SeatLimit { kind: SeatKind, used: i32, total: i32 },

    #[error("Could not read current {0} usage")]
    UsageUnavailable(SeatKind),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Storage error: {0}")]
    Store(#[from] StarchatError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Identifier named by a "No such product/price" failure
    pub fn missing_resource_id(&self) -> Option<&str> {
        match self {
            Self::ResourceMissing { id, .. } if !id.is_empty() => Some(id),
            _ => None,
        }
    }

    pub fn is_resource_missing(&self) -> bool {
        matches!(self, Self::ResourceMissing { .. })
    }

    /// Message of a rejected request, lowercased for keyword checks
    pub fn rejection_message(&self) -> Option<String> {
        match self {
            Self::Rejected { message, .. } => Some(message.to_lowercase()),
            _ => None,
        }
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        match err {
            stripe::StripeError::Stripe(request_error) => {
                let status = request_error.http_status;
                let message = request_error
                    .message
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string());
                let code = request_error.code.as_ref().map(|c| format!("{c:?}"));
                let missing = status == 404
                    || message.contains("No such")
                    || code.as_deref() == Some("ResourceMissing");

                if missing {
                    BillingError::ResourceMissing {
                        id: extract_missing_id(&message).unwrap_or_default(),
                        message,
                    }
                } else if status == 429 || (500..600).contains(&status) {
                    BillingError::Transient(message)
                } else if status == 400 || status == 402 {
                    BillingError::Rejected { message, code }
                } else {
                    BillingError::StripeApi(format!("{status}: {message}"))
                }
            }
            stripe::StripeError::Timeout => {
                BillingError::Transient("Request timed out".to_string())
            }
            stripe::StripeError::ClientError(msg) => {
                BillingError::Transient(format!("HTTP client error: {msg}"))
            }
            other => BillingError::StripeApi(other.to_string()),
        }
    }
}

/// Find the first `prod_…` or `price_…` identifier in a provider message
pub fn extract_missing_id(message: &str) -> Option<String> {
    let bytes = message.as_bytes();
    for (start, _) in message.char_indices() {
        for prefix in ["prod_", "price_"] {
            if !message[start..].starts_with(prefix) {
                continue;
            }
            // Must not be the tail of a longer word
            if start > 0 && bytes[start - 1].is_ascii_alphanumeric() {
                continue;
            }
            let body_start = start + prefix.len();
            let body_len = message[body_start..]
                .bytes()
                .take_while(|b| b.is_ascii_alphanumeric())
                .count();
            if body_len > 0 {
                return Some(message[start..body_start + body_len].to_string());
            }
        }
    }
    None
}

pub type BillingResult<T> = Result<T, BillingError>;
