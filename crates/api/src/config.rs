//! Application configuration

use std::env;

/// Shortest admin token accepted
const MIN_ADMIN_TOKEN_LEN: usize = 32;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,
    pub run_migrations: bool,

    // Admin surface
    pub admin_api_token: String,

    // Bootstrap
    pub default_admin_email: Option<String>,
    pub default_company_name: String,
    pub default_company_tax_id: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),

            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(5),
            run_migrations: env::var("RUN_MIGRATIONS")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),

            admin_api_token: {
                let token = env::var("ADMIN_API_TOKEN")
                    .map_err(|_| ConfigError::Missing("ADMIN_API_TOKEN"))?;
                if token.trim().len() < MIN_ADMIN_TOKEN_LEN {
                    return Err(ConfigError::WeakSecret(
                        "ADMIN_API_TOKEN must be at least 32 characters",
                    ));
                }
                token.trim().to_string()
            },

            default_admin_email: non_empty("DEFAULT_ADMIN_EMAIL"),
            default_company_name: non_empty("DEFAULT_COMPANY_NAME")
                .unwrap_or_else(|| "Starchat Master Co".to_string()),
            default_company_tax_id: non_empty("DEFAULT_COMPANY_CNPJ"),
        })
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}
