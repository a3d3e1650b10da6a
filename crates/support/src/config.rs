//! Chatwoot connection settings

use std::time::Duration;

use crate::error::{SupportError, SupportResult};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ChatwootConfig {
    /// Installation URL without trailing slash
    pub base_url: String,
    /// Platform app token
    pub api_token: String,
    pub timeout: Duration,
}

impl ChatwootConfig {
    pub fn new(base_url: &str, api_token: &str) -> SupportResult<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SupportError::Config("CHATWOOT_URL must not be empty".to_string()));
        }
        if api_token.trim().is_empty() {
            return Err(SupportError::Config(
                "CHATWOOT_API_TOKEN must not be empty".to_string(),
            ));
        }
        Ok(Self {
            base_url,
            api_token: api_token.trim().to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    pub fn from_env() -> SupportResult<Self> {
        let base_url = std::env::var("CHATWOOT_URL")
            .map_err(|_| SupportError::Config("CHATWOOT_URL not set".to_string()))?;
        let api_token = std::env::var("CHATWOOT_API_TOKEN")
            .map_err(|_| SupportError::Config("CHATWOOT_API_TOKEN not set".to_string()))?;

        let mut config = Self::new(&base_url, &api_token)?;
        if let Some(secs) = std::env::var("CHATWOOT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}
