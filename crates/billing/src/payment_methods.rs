//! Saved card management for an account's Stripe customer

use serde::Serialize;
use starchat_shared::{AccountId, EntityStore};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{BillingGateway, CardDetails};

/// Card as shown to the tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedCard {
    pub id: String,
    pub card: Option<CardDetails>,
    pub is_default: bool,
}

/// Everything the card management form needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentMethodsOverview {
    pub setup_intent_client_secret: Option<String>,
    pub default_payment_method_id: Option<String>,
    pub cards: Vec<SavedCard>,
}

#[derive(Debug, Clone)]
pub struct PaymentMethodService<G, S> {
    gateway: G,
    store: S,
}

impl<G: BillingGateway, S: EntityStore> PaymentMethodService<G, S> {
    pub fn new(gateway: G, store: S) -> Self {
        Self { gateway, store }
    }

    /// Existing customer of the account; never creates one
    async fn customer_of(&self, account_id: AccountId, require_plan: bool) -> BillingResult<String> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| BillingError::AccountNotFound(account_id.to_string()))?;
        if require_plan && account.plan_id.is_none() {
            return Err(BillingError::InvalidInput(
                "The account needs a plan to manage payment methods".to_string(),
            ));
        }
        account
            .stripe_customer_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                BillingError::InvalidInput("Stripe customer not found for this account".to_string())
            })
    }

    /// Fresh setup intent plus the customer's saved cards
    pub async fn overview(&self, account_id: AccountId) -> BillingResult<PaymentMethodsOverview> {
        let customer_id = self.customer_of(account_id, true).await?;

        let intent = self.gateway.create_setup_intent(&customer_id).await?;
        let methods = self.gateway.list_card_payment_methods(&customer_id).await?;
        let default = self
            .gateway
            .customer_default_payment_method(&customer_id)
            .await?;

        let cards = methods
            .into_iter()
            .map(|m| SavedCard {
                is_default: default.as_deref() == Some(m.id.as_str()),
                id: m.id,
                card: m.card,
            })
            .collect();

        Ok(PaymentMethodsOverview {
            setup_intent_client_secret: intent.client_secret,
            default_payment_method_id: default,
            cards,
        })
    }

    /// Attach a collected payment method to the customer, optionally as the default
    pub async fn add(
        &self,
        account_id: AccountId,
        payment_method_id: &str,
        make_default: bool,
    ) -> BillingResult<()> {
        let payment_method_id = require_id(payment_method_id)?;
        let customer_id = self.customer_of(account_id, false).await?;

        let method = self.gateway.retrieve_payment_method(payment_method_id).await?;
        if method.customer_id() != Some(customer_id.as_str()) {
            self.gateway
                .attach_payment_method(payment_method_id, &customer_id)
                .await?;
        }
        if make_default {
            self.gateway
                .set_customer_default_payment_method(&customer_id, payment_method_id)
                .await?;
        }

        tracing::info!(
            account_id = %account_id,
            payment_method_id = %payment_method_id,
            make_default,
            "Added payment method"
        );
        Ok(())
    }

    /// Make one of the customer's own cards the invoice default
    pub async fn make_default(&self, account_id: AccountId, payment_method_id: &str) -> BillingResult<()> {
        let payment_method_id = require_id(payment_method_id)?;
        let customer_id = self.customer_of(account_id, false).await?;
        self.ensure_owned(&customer_id, payment_method_id).await?;

        self.gateway
            .set_customer_default_payment_method(&customer_id, payment_method_id)
            .await?;
        tracing::info!(account_id = %account_id, payment_method_id = %payment_method_id, "Changed default payment method");
        Ok(())
    }

    /// Detach a card, clearing it first when it is the default
    pub async fn remove(&self, account_id: AccountId, payment_method_id: &str) -> BillingResult<()> {
        let payment_method_id = require_id(payment_method_id)?;
        let customer_id = self.customer_of(account_id, false).await?;
        self.ensure_owned(&customer_id, payment_method_id).await?;

        let default = self
            .gateway
            .customer_default_payment_method(&customer_id)
            .await?;
        if default.as_deref() == Some(payment_method_id) {
            self.gateway
                .clear_customer_default_payment_method(&customer_id)
                .await?;
        }
        self.gateway.detach_payment_method(payment_method_id).await?;

        tracing::info!(account_id = %account_id, payment_method_id = %payment_method_id, "Removed payment method");
        Ok(())
    }

    async fn ensure_owned(&self, customer_id: &str, payment_method_id: &str) -> BillingResult<()> {
        let method = self.gateway.retrieve_payment_method(payment_method_id).await?;
        if method.customer_id() == Some(customer_id) {
            Ok(())
        } else {
            tracing::warn!(customer_id = %customer_id, payment_method_id = %payment_method_id, "Payment method belongs to another customer");
            Err(BillingError::InvalidInput(
                "Card does not belong to this customer".to_string(),
            ))
        }
    }
}

fn require_id(id: &str) -> BillingResult<&str> {
    let id = id.trim();
    if id.is_empty() {
        Err(BillingError::InvalidInput("No payment method informed".to_string()))
    } else {
        Ok(id)
    }
}
