//! Stripe Billing Portal

use serde::Serialize;
use starchat_shared::{AccountId, EntityStore};

use crate::client::StripeConfig;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{BillingGateway, PortalSessionParams};

/// Configured portal configuration, else the first one the account has
pub async fn portal_configuration<G: BillingGateway>(
    gateway: &G,
    config: &StripeConfig,
) -> Option<String> {
    if let Some(id) = &config.portal_configuration_id {
        return Some(id.clone());
    }
    match gateway.list_portal_configurations().await {
        Ok(configs) => configs.into_iter().next().map(|c| c.id),
        Err(err) => {
            tracing::debug!(error = %err, "Could not list portal configurations");
            None
        }
    }
}

/// Portal service for self-service billing sessions
#[derive(Debug, Clone)]
pub struct PortalService<G, S> {
    gateway: G,
    store: S,
    config: StripeConfig,
}

impl<G: BillingGateway, S: EntityStore> PortalService<G, S> {
    pub fn new(gateway: G, store: S, config: StripeConfig) -> Self {
        Self {
            gateway,
            store,
            config,
        }
    }

    /// Create a billing portal session for the account's customer
    pub async fn create_portal_session(&self, account_id: AccountId) -> BillingResult<PortalResponse> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| BillingError::AccountNotFound(account_id.to_string()))?;
        let customer = account
            .stripe_customer_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                BillingError::InvalidInput("Stripe customer not found for this account".to_string())
            })?;

        let params = PortalSessionParams {
            customer,
            return_url: format!("{}/", self.config.app_base_url),
            configuration: portal_configuration(&self.gateway, &self.config).await,
            flow_data: None,
        };
        let session = self.gateway.create_portal_session(&params).await?;

        tracing::info!(
            account_id = %account_id,
            customer_id = %params.customer,
            "Created billing portal session"
        );

        let url = session
            .url
            .ok_or_else(|| BillingError::StripeApi("portal session without url".to_string()))?;
        Ok(PortalResponse { url })
    }
}

/// Response for creating a portal session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortalResponse {
    pub url: String,
}
