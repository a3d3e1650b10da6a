//! Stripe customer mirroring

use starchat_shared::{
    select_billing_address, Account, AccountChanges, Address, AddressKind, EntityStore,
};

use crate::error::BillingResult;
use crate::gateway::{BillingGateway, CustomerPayload, Metadata, Shipping};
use crate::idempotency;

/// Build the full customer payload from the account, its company and its
/// billing address
pub async fn customer_payload<S: EntityStore>(
    store: &S,
    account: &Account,
) -> BillingResult<CustomerPayload> {
    let company = store.get_company(account.id).await?;
    let addresses = store.list_addresses(account.id).await?;

    let name = company
        .map(|c| c.name)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| account.email.clone());
    let phone = account.phone.clone().filter(|p| !p.trim().is_empty());
    let address = select_billing_address(&addresses).map(Address::as_postal_address);
    let shipping = address.clone().map(|address| Shipping {
        name: name.clone(),
        phone: phone.clone(),
        address,
    });

    Ok(CustomerPayload {
        email: account.email.clone(),
        name,
        phone,
        metadata: Metadata::from([("account_id".to_string(), account.id.to_string())]),
        address,
        shipping,
    })
}

/// Keeps one Stripe customer per account in step with local data
#[derive(Debug, Clone)]
pub struct CustomerSync<G, S> {
    gateway: G,
    store: S,
}

impl<G: BillingGateway, S: EntityStore> CustomerSync<G, S> {
    pub fn new(gateway: G, store: S) -> Self {
        Self { gateway, store }
    }

    /// Return the account's customer id, creating and persisting one if missing
    pub async fn ensure_customer(&self, account: &Account) -> BillingResult<String> {
        if let Some(id) = account.stripe_customer_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }

        let payload = customer_payload(&self.store, account).await?;
        let customer_id = self
            .gateway
            .create_customer(&payload, idempotency::customer_create(account.id))
            .await?;
        self.store
            .apply_account_changes(
                account.id,
                &AccountChanges {
                    stripe_customer_id: Some(customer_id.clone()),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(account_id = %account.id, customer_id = %customer_id, "Created Stripe customer");
        Ok(customer_id)
    }

    /// Push the current payload to an existing customer
    pub async fn push_update(&self, account: &Account) -> BillingResult<()> {
        let Some(customer_id) = account.stripe_customer_id.as_deref().filter(|id| !id.is_empty())
        else {
            return Ok(());
        };

        let payload = customer_payload(&self.store, account).await?;
        match self.gateway.update_customer(customer_id, &payload).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_resource_missing() => {
                tracing::warn!(
                    account_id = %account.id,
                    customer_id = %customer_id,
                    "Stripe customer missing; skipping update"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn on_account_saved(&self, account: &Account, created: bool) {
        let has_customer = account
            .stripe_customer_id
            .as_deref()
            .is_some_and(|id| !id.is_empty());

        let result = if created && !has_customer {
            self.ensure_customer(account).await.map(|_| ())
        } else if has_customer {
            self.push_update(account).await
        } else {
            Ok(())
        };

        if let Err(err) = result {
            tracing::warn!(account_id = %account.id, error = %err, "Customer sync failed");
        }
    }

    /// Only the default billing address feeds the customer record
    pub async fn on_address_saved(&self, address: &Address) {
        if address.kind != AddressKind::Billing || !address.is_default {
            return;
        }
        let result = match self.store.get_account(address.account_id).await {
            Ok(Some(account)) => self.push_update(&account).await,
            Ok(None) => Ok(()),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            tracing::warn!(account_id = %address.account_id, error = %err, "Customer address sync failed");
        }
    }

    pub async fn on_account_deleted(&self, account: &Account) {
        let Some(customer_id) = account.stripe_customer_id.as_deref().filter(|id| !id.is_empty())
        else {
            return;
        };
        if let Err(err) = self.gateway.delete_customer(customer_id).await {
            tracing::warn!(customer_id = %customer_id, error = %err, "Could not delete Stripe customer");
        }
    }
}
