//! Deterministic idempotency keys for mutating Stripe calls
//!
//! Each key is the first 32 hex characters of the SHA-256 digest of a
//! semantic string, so retrying the same logical operation reuses the key.

use sha2::{Digest, Sha256};
use starchat_shared::{AccountId, BillingInterval, Plan, PriceSlot};

const KEY_LEN: usize = 32;

/// Hash a semantic operation description into an idempotency key
pub fn idempotency_key(semantic: &str) -> String {
    let digest = Sha256::digest(semantic.as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(KEY_LEN);
    key
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

pub fn product_create(plan: &Plan) -> String {
    idempotency_key(&format!(
        "product:create:{}:{}:{}:{}:{}:{}:{}",
        plan.id,
        plan.name,
        plan.description,
        flag(plan.is_active),
        plan.included_agents,
        plan.included_inboxes,
        flag(plan.requires_payment)
    ))
}

pub fn product_modify(plan: &Plan) -> String {
    idempotency_key(&format!(
        "product:modify:{}:{}:{}:{}",
        plan.id,
        plan.name,
        plan.description,
        flag(plan.is_active)
    ))
}

pub fn product_default_price(product_id: &str, price_id: &str) -> String {
    idempotency_key(&format!("product:default_price:{product_id}:{price_id}"))
}

/// Key for a new slot price; `replaces` is the price id it supersedes, if any
pub fn price_create(
    plan: &Plan,
    slot: PriceSlot,
    amount_cents: i64,
    interval: BillingInterval,
    replaces: Option<&str>,
) -> String {
    idempotency_key(&format!(
        "price:create:{}:{}:{}:{}:{}",
        plan.id,
        slot.column(),
        amount_cents,
        interval,
        replaces.unwrap_or("-")
    ))
}

pub fn price_nickname(price_id: &str, nickname: &str) -> String {
    idempotency_key(&format!("price:nickname:{price_id}:{nickname}"))
}

pub fn price_deactivate(price_id: &str) -> String {
    idempotency_key(&format!("price:deactivate:{price_id}"))
}

pub fn price_activate(price_id: &str, replaces: Option<&str>) -> String {
    idempotency_key(&format!(
        "price:activate:{price_id}:{}",
        replaces.unwrap_or("-")
    ))
}

pub fn customer_create(account_id: AccountId) -> String {
    idempotency_key(&format!("customer:create:{account_id}"))
}
