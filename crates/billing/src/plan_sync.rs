//! Plan to Product/Price synchronization
//!
//! Every plan owns one remote product and six recurring prices (base,
//! extra agent and extra inbox, each monthly and yearly). Prices are
//! immutable remotely, so an amount change creates a replacement price and
//! archives the old one.

use starchat_shared::{EntityStore, Plan, PlanId, PriceKind, PriceSlot};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{BillingGateway, Metadata, NewPrice, ProductParams, Recurring};
use crate::idempotency;

/// What one synchronization run did remotely
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSyncReport {
    pub product_id: String,
    pub product_created: bool,
    pub prices_created: usize,
    pub prices_archived: usize,
}

/// Totals of a full resynchronization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Nickname shown for a plan price in the provider dashboard
pub fn price_nickname(plan_name: &str, slot: PriceSlot) -> String {
    let interval = slot.interval();
    match slot.kind() {
        PriceKind::Base => format!("{plan_name} - {}", interval.adjective()),
        PriceKind::ExtraAgent => format!(
            "{plan_name} - Extra agent ({})",
            interval.adjective().to_lowercase()
        ),
        PriceKind::ExtraInbox => format!(
            "{plan_name} - Extra inbox ({})",
            interval.adjective().to_lowercase()
        ),
    }
}

fn product_metadata(plan: &Plan) -> Metadata {
    Metadata::from([
        ("plan_id".to_string(), plan.id.to_string()),
        ("included_agents".to_string(), plan.included_agents.to_string()),
        ("included_inboxes".to_string(), plan.included_inboxes.to_string()),
        ("requires_payment".to_string(), plan.requires_payment.to_string()),
    ])
}

fn product_needs_update(plan: &Plan, previous: Option<&Plan>) -> bool {
    match previous {
        None => true,
        Some(old) => {
            old.name != plan.name
                || old.description != plan.description
                || old.is_active != plan.is_active
        }
    }
}

/// Failures tolerated while tearing down a deleted plan's resources
fn tolerated(err: &BillingError) -> bool {
    matches!(
        err,
        BillingError::Rejected { .. } | BillingError::ResourceMissing { .. }
    )
}

/// Keeps each plan's remote product and prices in step with the local plan
#[derive(Debug, Clone)]
pub struct PlanSynchronizer<G, S> {
    gateway: G,
    store: S,
    currency: String,
}

impl<G: BillingGateway, S: EntityStore> PlanSynchronizer<G, S> {
    pub fn new(gateway: G, store: S, currency: impl Into<String>) -> Self {
        Self {
            gateway,
            store,
            currency: currency.into(),
        }
    }

    /// Synchronize a saved plan, logging and swallowing failures
    pub async fn sync_plan(&self, plan_id: PlanId, previous: Option<&Plan>) {
        match self.try_sync_plan(plan_id, previous).await {
            Ok(Some(report)) => tracing::info!(
                plan_id = %plan_id,
                product_id = %report.product_id,
                prices_created = report.prices_created,
                prices_archived = report.prices_archived,
                "Plan synchronized with Stripe"
            ),
            Ok(None) => tracing::debug!(plan_id = %plan_id, "Plan sync skipped"),
            Err(err) => tracing::warn!(
                plan_id = %plan_id,
                error = %err,
                "Failed to synchronize plan with Stripe"
            ),
        }
    }

    /// Synchronize a plan, retrying once after clearing an identifier the
    /// provider reports as missing
    pub async fn try_sync_plan(
        &self,
        plan_id: PlanId,
        previous: Option<&Plan>,
    ) -> BillingResult<Option<PlanSyncReport>> {
        match self.sync_once(plan_id, previous).await {
            Err(err) if err.is_resource_missing() => {
                if self.clear_stale_id(plan_id, &err).await? {
                    self.sync_once(plan_id, previous).await
                } else {
                    Err(err)
                }
            }
            other => other,
        }
    }

    /// Re-run synchronization for every plan
    pub async fn resync_all(&self) -> BillingResult<ResyncSummary> {
        let mut summary = ResyncSummary::default();
        for plan in self.store.list_plans().await? {
            if plan.is_admin() {
                summary.skipped += 1;
                continue;
            }
            match self.try_sync_plan(plan.id, None).await {
                Ok(Some(_)) => summary.synced += 1,
                Ok(None) => summary.skipped += 1,
                Err(err) => {
                    tracing::error!(plan_id = %plan.id, error = %err, "Plan resync failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn sync_once(
        &self,
        plan_id: PlanId,
        previous: Option<&Plan>,
    ) -> BillingResult<Option<PlanSyncReport>> {
        // Always work from the stored row; targeted id writes land between steps
        let Some(plan) = self.store.get_plan(plan_id).await? else {
            return Ok(None);
        };
        if plan.is_admin() {
            return Ok(None);
        }

        let mut report = PlanSyncReport::default();
        let product_id = self.ensure_product(&plan, previous, &mut report).await?;

        let mut monthly_base = None;
        for slot in PriceSlot::ALL {
            let price_id = self.sync_price(&plan, &product_id, slot, &mut report).await?;
            if slot == PriceSlot::MonthlyBase {
                monthly_base = Some(price_id);
            }
        }

        if let Some(price_id) = monthly_base {
            if self.gateway.retrieve_price(&price_id).await?.is_some() {
                self.gateway
                    .set_default_price(
                        &product_id,
                        &price_id,
                        idempotency::product_default_price(&product_id, &price_id),
                    )
                    .await?;
            }
        }

        report.product_id = product_id;
        Ok(Some(report))
    }

    async fn ensure_product(
        &self,
        plan: &Plan,
        previous: Option<&Plan>,
        report: &mut PlanSyncReport,
    ) -> BillingResult<String> {
        let existing = match plan.stripe_product_id.as_deref() {
            Some(id) => self.gateway.retrieve_product(id).await?,
            None => None,
        };

        match existing {
            Some(product) => {
                if product_needs_update(plan, previous) {
                    let params = ProductParams {
                        name: plan.name.clone(),
                        description: Some(plan.description.clone()),
                        active: plan.is_active,
                        metadata: product_metadata(plan),
                    };
                    self.gateway
                        .update_product(&product.id, &params, idempotency::product_modify(plan))
                        .await?;
                    tracing::info!(plan_id = %plan.id, product_id = %product.id, "Updated Stripe product");
                }
                Ok(product.id)
            }
            None => {
                let params = ProductParams {
                    name: plan.name.clone(),
                    description: Some(plan.description.clone()).filter(|d| !d.is_empty()),
                    active: plan.is_active,
                    metadata: product_metadata(plan),
                };
                let product = self
                    .gateway
                    .create_product(&params, idempotency::product_create(plan))
                    .await?;
                self.store
                    .set_plan_product_id(plan.id, Some(&product.id))
                    .await?;
                report.product_created = true;
                tracing::info!(plan_id = %plan.id, product_id = %product.id, "Created Stripe product");
                Ok(product.id)
            }
        }
    }

    async fn sync_price(
        &self,
        plan: &Plan,
        product_id: &str,
        slot: PriceSlot,
        report: &mut PlanSyncReport,
    ) -> BillingResult<String> {
        let amount = plan.amount_cents(slot);
        let interval = slot.interval();
        let kind = slot.kind();
        let nickname = price_nickname(&plan.name, slot);

        let stored_id = plan.prices.get(slot);
        let existing = match stored_id {
            Some(id) => self.gateway.retrieve_price(id).await?,
            None => None,
        }
        .filter(|price| price.product == product_id);

        let keep_id = match existing {
            Some(price) if price.matches(amount, &self.currency, interval) => {
                if price.nickname.as_deref().unwrap_or_default() != nickname {
                    self.gateway
                        .update_price_nickname(
                            &price.id,
                            &nickname,
                            idempotency::price_nickname(&price.id, &nickname),
                        )
                        .await?;
                }
                price.id
            }
            _ => {
                let params = NewPrice {
                    product: product_id.to_string(),
                    unit_amount: amount,
                    currency: self.currency.clone(),
                    nickname,
                    recurring: Recurring {
                        interval: interval.as_str().to_string(),
                    },
                    metadata: Metadata::from([
                        ("plan_id".to_string(), plan.id.to_string()),
                        ("kind".to_string(), kind.as_str().to_string()),
                        ("interval".to_string(), interval.as_str().to_string()),
                    ]),
                };
                let price = self
                    .gateway
                    .create_price(
                        &params,
                        idempotency::price_create(plan, slot, amount, interval, stored_id),
                    )
                    .await?;
                // A replayed create can hand back a price archived since
                if !price.active {
                    self.gateway
                        .activate_price(&price.id, idempotency::price_activate(&price.id, stored_id))
                        .await?;
                    tracing::info!(plan_id = %plan.id, price_id = %price.id, "Reactivated replayed Stripe price");
                }
                self.store
                    .set_plan_price_id(plan.id, slot, Some(&price.id))
                    .await?;
                report.prices_created += 1;
                tracing::info!(
                    plan_id = %plan.id,
                    price_id = %price.id,
                    slot = slot.column(),
                    amount_cents = amount,
                    "Created Stripe price"
                );
                price.id
            }
        };

        report.prices_archived += self
            .archive_siblings(product_id, &keep_id, plan, kind, interval)
            .await?;
        Ok(keep_id)
    }

    /// Deactivate every other active price tagged with the same plan, kind and interval
    async fn archive_siblings(
        &self,
        product_id: &str,
        keep_id: &str,
        plan: &Plan,
        kind: PriceKind,
        interval: starchat_shared::BillingInterval,
    ) -> BillingResult<usize> {
        let plan_id = plan.id.to_string();
        let mut archived = 0;
        for price in self.gateway.list_prices(product_id).await? {
            if price.id != keep_id && price.active && price.is_tagged(&plan_id, kind, interval) {
                self.gateway
                    .deactivate_price(&price.id, idempotency::price_deactivate(&price.id))
                    .await?;
                archived += 1;
            }
        }
        Ok(archived)
    }

    /// Forget the identifier named by a "No such ..." failure
    async fn clear_stale_id(&self, plan_id: PlanId, err: &BillingError) -> BillingResult<bool> {
        let Some(missing) = err.missing_resource_id() else {
            return Ok(false);
        };
        let Some(plan) = self.store.get_plan(plan_id).await? else {
            return Ok(false);
        };

        if missing.starts_with("prod_") {
            self.store.set_plan_product_id(plan_id, None).await?;
        } else if let Some(slot) = plan.prices.slot_of(missing) {
            self.store.set_plan_price_id(plan_id, slot, None).await?;
        } else {
            return Ok(false);
        }

        tracing::warn!(
            plan_id = %plan_id,
            missing_id = %missing,
            "Cleared stale Stripe identifier; retrying plan sync"
        );
        Ok(true)
    }

    /// Archive a deleted plan's prices and remove its product
    pub async fn delete_plan_resources(&self, plan: &Plan) -> BillingResult<()> {
        if plan.is_admin() {
            return Ok(());
        }

        for price_id in plan.prices.all() {
            if let Some(price) = self.gateway.retrieve_price(price_id).await? {
                if price.active {
                    if let Err(err) = self
                        .gateway
                        .deactivate_price(&price.id, idempotency::price_deactivate(&price.id))
                        .await
                    {
                        if !tolerated(&err) {
                            return Err(err);
                        }
                    }
                }
            }
        }

        let Some(product_id) = plan.stripe_product_id.as_deref() else {
            return Ok(());
        };
        if self.gateway.retrieve_product(product_id).await?.is_none() {
            return Ok(());
        }

        match self.gateway.list_prices(product_id).await {
            Ok(prices) => {
                for price in prices.into_iter().filter(|p| p.active) {
                    if let Err(err) = self
                        .gateway
                        .deactivate_price(&price.id, idempotency::price_deactivate(&price.id))
                        .await
                    {
                        if !tolerated(&err) {
                            return Err(err);
                        }
                    }
                }
            }
            Err(err) if tolerated(&err) => {
                tracing::debug!(product_id = %product_id, error = %err, "Could not list product prices");
            }
            Err(err) => return Err(err),
        }

        if let Err(err) = self.gateway.delete_product(product_id).await {
            if !tolerated(&err) {
                return Err(err);
            }
            // Products with prices cannot be deleted; archive instead
            if let Err(err) = self.gateway.archive_product(product_id).await {
                if !tolerated(&err) {
                    return Err(err);
                }
            }
        }

        tracing::info!(plan_id = %plan.id, product_id = %product_id, "Removed Stripe resources for deleted plan");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{plan_fixture, FakeStripe};
    use starchat_shared::{BillingInterval, MemoryStore};

    async fn setup() -> (FakeStripe, MemoryStore, PlanSynchronizer<FakeStripe, MemoryStore>, Plan) {
        let gateway = FakeStripe::new();
        let store = MemoryStore::new();
        let plan = store
            .create_plan(&plan_fixture("Premium", 4990, 49900))
            .await
            .unwrap();
        let sync = PlanSynchronizer::new(gateway.clone(), store.clone(), "brl");
        (gateway, store, sync, plan)
    }

    #[test]
    fn test_price_nicknames() {
        assert_eq!(price_nickname("Pro", PriceSlot::MonthlyBase), "Pro - Monthly");
        assert_eq!(price_nickname("Pro", PriceSlot::YearlyBase), "Pro - Yearly");
        assert_eq!(
            price_nickname("Pro", PriceSlot::ExtraAgentYearly),
            "Pro - Extra agent (yearly)"
        );
        assert_eq!(
            price_nickname("Pro", PriceSlot::ExtraInboxMonthly),
            "Pro - Extra inbox (monthly)"
        );
    }

    #[tokio::test]
    async fn test_first_sync_creates_product_and_six_prices() {
        let (gateway, store, sync, plan) = setup().await;

        let report = sync.try_sync_plan(plan.id, None).await.unwrap().unwrap();
        assert!(report.product_created);
        assert_eq!(report.prices_created, 6);

        let stored = store.get_plan(plan.id).await.unwrap().unwrap();
        let product_id = stored.stripe_product_id.clone().unwrap();
        let monthly = gateway.price(stored.prices.monthly.as_deref().unwrap()).unwrap();
        assert_eq!(monthly.unit_amount, Some(4990));
        assert_eq!(monthly.currency, "brl");
        assert_eq!(monthly.interval(), Some("month"));
        assert_eq!(monthly.nickname.as_deref(), Some("Premium - Monthly"));

        let yearly_agent = gateway
            .price(stored.prices.extra_agent_yearly.as_deref().unwrap())
            .unwrap();
        assert_eq!(yearly_agent.unit_amount, Some(18000));
        assert_eq!(yearly_agent.metadata.get("kind").map(String::as_str), Some("extra_agent"));

        assert_eq!(
            gateway.default_price(&product_id).as_deref(),
            stored.prices.monthly.as_deref()
        );
    }

    #[tokio::test]
    async fn test_second_sync_without_changes_creates_nothing() {
        let (gateway, store, sync, plan) = setup().await;
        sync.try_sync_plan(plan.id, None).await.unwrap();
        let synced = store.get_plan(plan.id).await.unwrap().unwrap();
        let prices_before = gateway.price_count();

        let report = sync
            .try_sync_plan(plan.id, Some(&synced))
            .await
            .unwrap()
            .unwrap();

        assert!(!report.product_created);
        assert_eq!(report.prices_created, 0);
        assert_eq!(report.prices_archived, 0);
        assert_eq!(gateway.price_count(), prices_before);
        assert_eq!(store.get_plan(plan.id).await.unwrap().unwrap(), synced);
    }

    #[tokio::test]
    async fn test_amount_change_replaces_and_archives_price() {
        let (gateway, store, sync, plan) = setup().await;
        sync.try_sync_plan(plan.id, None).await.unwrap();
        let previous = store.get_plan(plan.id).await.unwrap().unwrap();
        let old_monthly = previous.prices.monthly.clone().unwrap();

        let mut changed = previous.clone();
        changed.monthly_price_cents = 5990;
        store.update_plan(&changed).await.unwrap();

        let report = sync
            .try_sync_plan(plan.id, Some(&previous))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.prices_created, 1);
        assert_eq!(report.prices_archived, 1);

        let stored = store.get_plan(plan.id).await.unwrap().unwrap();
        let new_monthly = stored.prices.monthly.clone().unwrap();
        assert_ne!(new_monthly, old_monthly);
        assert!(!gateway.price(&old_monthly).unwrap().active);
        assert_eq!(gateway.price(&new_monthly).unwrap().unit_amount, Some(5990));
        assert_eq!(
            gateway.default_price(stored.stripe_product_id.as_deref().unwrap()),
            Some(new_monthly)
        );
    }

    async fn resync_monthly(
        store: &MemoryStore,
        sync: &PlanSynchronizer<FakeStripe, MemoryStore>,
        plan_id: PlanId,
        amount: i64,
    ) -> String {
        let previous = store.get_plan(plan_id).await.unwrap().unwrap();
        let mut changed = previous.clone();
        changed.monthly_price_cents = amount;
        store.update_plan(&changed).await.unwrap();
        sync.try_sync_plan(plan_id, Some(&previous)).await.unwrap();
        store
            .get_plan(plan_id)
            .await
            .unwrap()
            .unwrap()
            .prices
            .monthly
            .unwrap()
    }

    #[tokio::test]
    async fn test_reverted_amount_gets_a_fresh_active_price() {
        let (gateway, store, sync, plan) = setup().await;
        sync.try_sync_plan(plan.id, None).await.unwrap();
        let first = store.get_plan(plan.id).await.unwrap().unwrap().prices.monthly.unwrap();

        let second = resync_monthly(&store, &sync, plan.id, 5990).await;
        let third = resync_monthly(&store, &sync, plan.id, 4990).await;

        assert_ne!(third, first);
        assert_ne!(third, second);
        let current = gateway.price(&third).unwrap();
        assert!(current.active);
        assert_eq!(current.unit_amount, Some(4990));
        let product_id = current.product.clone();
        let active_monthly: Vec<_> = gateway
            .prices_of(&product_id)
            .into_iter()
            .filter(|p| p.active && p.is_tagged(&plan.id.to_string(), PriceKind::Base, BillingInterval::Month))
            .collect();
        assert_eq!(active_monthly.len(), 1);
    }

    #[tokio::test]
    async fn test_archived_stored_price_is_not_kept() {
        let (gateway, store, sync, plan) = setup().await;
        sync.try_sync_plan(plan.id, None).await.unwrap();
        let synced = store.get_plan(plan.id).await.unwrap().unwrap();
        let monthly = synced.prices.monthly.clone().unwrap();
        gateway
            .deactivate_price(&monthly, "manual".to_string())
            .await
            .unwrap();

        let report = sync
            .try_sync_plan(plan.id, Some(&synced))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.prices_created, 1);
        let replacement = store.get_plan(plan.id).await.unwrap().unwrap().prices.monthly.unwrap();
        assert_ne!(replacement, monthly);
        assert!(gateway.price(&replacement).unwrap().active);
    }

    #[tokio::test]
    async fn test_replayed_archived_price_is_reactivated() {
        let (gateway, store, sync, plan) = setup().await;
        sync.try_sync_plan(plan.id, None).await.unwrap();
        let first = store.get_plan(plan.id).await.unwrap().unwrap().prices.monthly.unwrap();
        resync_monthly(&store, &sync, plan.id, 5990).await;

        // Stale-id recovery leaves the slot empty, so the original create key comes back
        store
            .set_plan_price_id(plan.id, PriceSlot::MonthlyBase, None)
            .await
            .unwrap();
        let restored = resync_monthly(&store, &sync, plan.id, 4990).await;

        assert_eq!(restored, first);
        assert!(gateway.price(&first).unwrap().active);
        assert!(gateway.calls().iter().any(|c| c == &format!("activate_price:{first}")));
    }

    #[tokio::test]
    async fn test_rename_updates_product_and_nicknames_only() {
        let (gateway, store, sync, plan) = setup().await;
        sync.try_sync_plan(plan.id, None).await.unwrap();
        let previous = store.get_plan(plan.id).await.unwrap().unwrap();
        let prices_before = gateway.price_count();

        let mut renamed = previous.clone();
        renamed.name = "Premium Plus".to_string();
        store.update_plan(&renamed).await.unwrap();

        let report = sync
            .try_sync_plan(plan.id, Some(&previous))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.prices_created, 0);
        assert_eq!(gateway.price_count(), prices_before);

        let product = gateway
            .product(previous.stripe_product_id.as_deref().unwrap())
            .unwrap();
        assert_eq!(product.name, "Premium Plus");
        let monthly = gateway.price(previous.prices.monthly.as_deref().unwrap()).unwrap();
        assert_eq!(monthly.nickname.as_deref(), Some("Premium Plus - Monthly"));
    }

    #[tokio::test]
    async fn test_missing_product_is_recreated() {
        let (gateway, store, sync, plan) = setup().await;
        let mut stale = store.get_plan(plan.id).await.unwrap().unwrap();
        stale.stripe_product_id = Some("prod_gone".to_string());
        store.update_plan(&stale).await.unwrap();

        let report = sync.try_sync_plan(plan.id, None).await.unwrap().unwrap();
        assert!(report.product_created);
        assert_ne!(report.product_id, "prod_gone");
        assert!(gateway.product(&report.product_id).is_some());
    }

    #[tokio::test]
    async fn test_stale_price_cleared_and_retried() {
        let (gateway, store, sync, plan) = setup().await;
        sync.try_sync_plan(plan.id, None).await.unwrap();
        let synced = store.get_plan(plan.id).await.unwrap().unwrap();
        let yearly = synced.prices.yearly.clone().unwrap();

        gateway.fail_next(
            "create_price",
            BillingError::ResourceMissing {
                id: yearly.clone(),
                message: format!("No such price: '{yearly}'"),
            },
        );
        let mut changed = synced.clone();
        changed.yearly_price_cents = 59900;
        store.update_plan(&changed).await.unwrap();

        let report = sync.try_sync_plan(plan.id, Some(&synced)).await.unwrap();
        assert!(report.is_some());
        let stored = store.get_plan(plan.id).await.unwrap().unwrap();
        let new_yearly = stored.prices.yearly.unwrap();
        assert_ne!(new_yearly, yearly);
        assert_eq!(gateway.price(&new_yearly).unwrap().unit_amount, Some(59900));
    }

    #[tokio::test]
    async fn test_admin_plan_is_never_synced() {
        let gateway = FakeStripe::new();
        let store = MemoryStore::new();
        let admin = store
            .create_plan(&plan_fixture("admin", 0, 0))
            .await
            .unwrap();
        let sync = PlanSynchronizer::new(gateway.clone(), store.clone(), "brl");

        assert!(sync.try_sync_plan(admin.id, None).await.unwrap().is_none());
        sync.delete_plan_resources(&admin).await.unwrap();
        assert_eq!(gateway.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_plan_resources_archives_everything() {
        let (gateway, store, sync, plan) = setup().await;
        sync.try_sync_plan(plan.id, None).await.unwrap();
        let synced = store.get_plan(plan.id).await.unwrap().unwrap();
        let product_id = synced.stripe_product_id.clone().unwrap();

        // Products holding prices cannot be deleted
        gateway.fail_next(
            "delete_product",
            BillingError::Rejected {
                message: "This product cannot be deleted because it has one or more prices"
                    .to_string(),
                code: None,
            },
        );
        sync.delete_plan_resources(&synced).await.unwrap();

        assert!(gateway.prices_of(&product_id).iter().all(|p| !p.active));
        assert!(!gateway.product(&product_id).unwrap().active);
    }

    #[tokio::test]
    async fn test_resync_all_counts() {
        let (_gateway, store, sync, _plan) = setup().await;
        store
            .create_plan(&plan_fixture("admin", 0, 0))
            .await
            .unwrap();
        store
            .create_plan(&plan_fixture("Basic", 1990, 19900))
            .await
            .unwrap();

        let summary = sync.resync_all().await.unwrap();
        assert_eq!(
            summary,
            ResyncSummary {
                synced: 2,
                skipped: 1,
                failed: 0
            }
        );
    }
}
