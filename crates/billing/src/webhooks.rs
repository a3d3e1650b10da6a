//! Stripe webhook intake: signature verification and event parsing

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use stripe::{Webhook, WebhookError};

use crate::error::{BillingError, BillingResult};
use crate::events::DomainEvent;
use crate::gateway::RemoteSubscription;

type HmacSha256 = Hmac<Sha256>;

/// Build a `Stripe-Signature` header for `payload`, as the provider would
pub fn signature_header(payload: &str, timestamp: i64, secret: &str) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BillingError::Internal(format!("HMAC init failed: {e}")))?;
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    Ok(format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes())))
}

/// Verify `header` against the raw body.
///
/// The SDK checks the HMAC before the timestamp tolerance (five minutes), then
/// deserializes its own event model. A body that passes both checks but does
/// not fit that model is still authentic; [`WebhookEnvelope`] reads it instead.
pub fn verify_signature(payload: &str, header: &str, secret: &str) -> BillingResult<()> {
    match Webhook::construct_event(payload, header, secret) {
        Ok(_) | Err(WebhookError::BadParse(_)) => Ok(()),
        Err(err) => {
            tracing::warn!(error = %err, "Rejected webhook signature");
            Err(BillingError::WebhookSignatureInvalid)
        }
    }
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: Value,
}

/// Webhook event envelope
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    data: EventData,
}

impl WebhookEnvelope {
    pub fn parse(payload: &str) -> BillingResult<Self> {
        serde_json::from_str(payload)
            .map_err(|e| BillingError::InvalidInput(format!("Malformed webhook payload: {e}")))
    }

    /// Domain event carried by this envelope; `None` for types that are only acknowledged
    pub fn into_event(self) -> BillingResult<Option<DomainEvent>> {
        let subscription = || -> BillingResult<RemoteSubscription> {
            serde_json::from_value(self.data.object.clone()).map_err(|e| {
                BillingError::InvalidInput(format!("Malformed subscription object: {e}"))
            })
        };
        match self.event_type.as_str() {
            "customer.subscription.created" | "customer.subscription.updated" => {
                Ok(Some(DomainEvent::SubscriptionObserved(subscription()?)))
            }
            "customer.subscription.deleted" => {
                Ok(Some(DomainEvent::SubscriptionDeleted(subscription()?)))
            }
            _ => Ok(None),
        }
    }
}

/// Verify and parse a webhook delivery in one step
pub fn receive(payload: &str, header: &str, secret: &str) -> BillingResult<Option<DomainEvent>> {
    verify_signature(payload, header, secret)?;
    let envelope = WebhookEnvelope::parse(payload)?;
    tracing::info!(event_id = %envelope.id, event_type = %envelope.event_type, "Stripe webhook verified");
    envelope.into_event()
}
