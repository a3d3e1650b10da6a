//! Stripe client configuration

use stripe::Client;

use crate::checkout::PayMode;
use crate::error::{BillingError, BillingResult};

/// Payment method types offered when nothing narrower is configured
pub const DEFAULT_ALLOWED_PAYMENT_METHOD_TYPES: [&str; 3] = ["card", "boleto", "pix"];

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret
    pub webhook_secret: String,
    /// Currency every plan price is charged in
    pub currency: String,
    /// Billing portal configuration used for plan swaps
    pub portal_configuration_id: Option<String>,
    /// Named payment method configurations per pay mode
    pub payment_method_configurations: PaymentMethodConfigurations,
    /// Method types usable when no configuration applies
    pub allowed_payment_method_types: Vec<String>,
    /// Base URL for success/cancel redirects
    pub app_base_url: String,
}

/// Payment method configuration ids, one per pay mode
#[derive(Debug, Clone, Default)]
pub struct PaymentMethodConfigurations {
    pub card: Option<String>,
    pub boleto: Option<String>,
    pub pix: Option<String>,
    pub pix_boleto: Option<String>,
}

impl PaymentMethodConfigurations {
    pub fn for_mode(&self, mode: PayMode) -> Option<&str> {
        match mode {
            PayMode::Card => self.card.as_deref(),
            PayMode::Boleto => self.boleto.as_deref(),
            PayMode::Pix => self.pix.as_deref(),
            PayMode::PixBoleto => self.pix_boleto.as_deref(),
        }
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let allowed_payment_method_types = optional_env("STRIPE_ALLOWED_PAYMENT_METHOD_TYPES")
            .map(|list| parse_method_list(&list))
            .unwrap_or_else(|| {
                DEFAULT_ALLOWED_PAYMENT_METHOD_TYPES
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            });

        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            currency: optional_env("STRIPE_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|| "brl".to_string()),
            portal_configuration_id: optional_env("STRIPE_PORTAL_CONFIGURATION_ID"),
            payment_method_configurations: PaymentMethodConfigurations {
                card: optional_env("STRIPE_PMC_CARD"),
                boleto: optional_env("STRIPE_PMC_BOLETO"),
                pix: optional_env("STRIPE_PMC_PIX"),
                pix_boleto: optional_env("STRIPE_PMC_PIX_BOLETO"),
            },
            allowed_payment_method_types,
            app_base_url: std::env::var("APP_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
        })
    }

    pub fn allows_method(&self, method: &str) -> bool {
        self.allowed_payment_method_types.iter().any(|m| m == method)
    }
}

/// Split a comma separated method list, dropping blanks and duplicates
pub fn parse_method_list(list: &str) -> Vec<String> {
    let mut methods: Vec<String> = Vec::new();
    for method in list.split(',').map(|m| m.trim().to_lowercase()) {
        if !method.is_empty() && !methods.contains(&method) {
            methods.push(method);
        }
    }
    methods
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Client that sends `key` as the idempotency key on every request
    pub fn idempotent(&self, key: String) -> Client {
        self.client
            .clone()
            .with_strategy(stripe::RequestStrategy::Idempotent(key))
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("currency", &self.config.currency)
            .field("app_base_url", &self.config.app_base_url)
            .finish_non_exhaustive()
    }
}
