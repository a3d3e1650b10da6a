//! Projection of remote subscription state onto local accounts

use starchat_shared::{
    free_plan, Account, AccountChanges, AccountId, AccountStatus, EntityStore, Plan, PlanId,
    PriceKind,
};

use crate::error::BillingResult;
use crate::gateway::{BillingGateway, Metadata, RemoteSubscription, RemoteSubscriptionItem};

/// Purchased add-on seats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeatExtras {
    pub agents: i32,
    pub inboxes: i32,
}

impl SeatExtras {
    fn is_zero(&self) -> bool {
        self.agents == 0 && self.inboxes == 0
    }
}

/// Selections the orchestrator stores on the subscription
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionMetadata {
    pub extra_agents: Option<i32>,
    pub extra_inboxes: Option<i32>,
    pub selected_plan_id: Option<PlanId>,
}

fn int_field(metadata: &Metadata, key: &str) -> Option<i64> {
    metadata.get(key).and_then(|v| v.trim().parse::<i64>().ok())
}

fn seat_count(value: i64) -> i32 {
    i32::try_from(value.max(0)).unwrap_or(i32::MAX)
}

impl SelectionMetadata {
    pub fn parse(metadata: &Metadata) -> Self {
        Self {
            extra_agents: int_field(metadata, "extra_agents").map(seat_count),
            extra_inboxes: int_field(metadata, "extra_inboxes").map(seat_count),
            selected_plan_id: int_field(metadata, "selected_plan_id").map(PlanId),
        }
    }
}

/// Access is kept while billable, or while a scheduled cancellation has not
/// yet reached a non-billable status
pub fn should_keep_access(sub: &RemoteSubscription) -> bool {
    sub.status.is_billable() || (sub.cancel_at_period_end && !sub.status.is_non_billable())
}

/// Plan whose monthly base price appears in `price_ids`, else yearly
fn match_base_price<'a>(plans: &'a [Plan], price_ids: &[&str]) -> Option<&'a Plan> {
    let listed = |id: Option<&str>| id.is_some_and(|id| price_ids.contains(&id));
    plans
        .iter()
        .find(|p| listed(p.prices.monthly.as_deref()))
        .or_else(|| plans.iter().find(|p| listed(p.prices.yearly.as_deref())))
}

/// Add-on quantities read from subscription items
fn derive_extras(plan: Option<&Plan>, items: &[RemoteSubscriptionItem]) -> SeatExtras {
    let agent_ids = plan.map(Plan::extra_agent_price_ids).unwrap_or_default();
    let inbox_ids = plan.map(Plan::extra_inbox_price_ids).unwrap_or_default();

    let mut extras = SeatExtras::default();
    for item in items {
        let quantity = seat_count(item.quantity.map_or(0, |q| i64::try_from(q).unwrap_or(i64::MAX)));
        let kind = item.price.kind();
        if agent_ids.contains(item.price.id.as_str()) || kind == Some(PriceKind::ExtraAgent) {
            extras.agents = quantity;
        } else if inbox_ids.contains(item.price.id.as_str()) || kind == Some(PriceKind::ExtraInbox)
        {
            extras.inboxes = quantity;
        }
    }
    extras
}

/// Updates accounts from observed subscriptions
#[derive(Debug, Clone)]
pub struct SubscriptionProjector<G, S> {
    gateway: G,
    store: S,
}

impl<G: BillingGateway, S: EntityStore> SubscriptionProjector<G, S> {
    pub fn new(gateway: G, store: S) -> Self {
        Self { gateway, store }
    }

    /// Project a created or updated subscription; returns whether it was applied
    pub async fn process_subscription_update(&self, sub: &RemoteSubscription) -> bool {
        match self.try_process_update(sub).await {
            Ok(applied) => applied,
            Err(err) => {
                tracing::error!(subscription_id = %sub.id, error = %err, "Failed to process subscription update");
                false
            }
        }
    }

    /// Reset the owning account after the subscription was deleted
    pub async fn process_subscription_deletion(&self, sub: &RemoteSubscription) -> bool {
        match self.try_process_deletion(sub).await {
            Ok(applied) => applied,
            Err(err) => {
                tracing::error!(subscription_id = %sub.id, error = %err, "Failed to process subscription deletion");
                false
            }
        }
    }

    pub async fn try_process_update(&self, sub: &RemoteSubscription) -> BillingResult<bool> {
        let Some(account) = self.find_account(sub).await? else {
            tracing::warn!(subscription_id = %sub.id, customer_id = %sub.customer, "Account not found for subscription");
            return Ok(false);
        };

        let live = if sub.status.is_non_billable() {
            None
        } else {
            let live = self.fetch_live(&sub.id).await;
            let really_active = live
                .as_ref()
                .map_or(sub.status.is_billable(), |l| l.status.is_billable());
            if !really_active {
                tracing::info!(
                    subscription_id = %sub.id,
                    status = %sub.status,
                    "Subscription is not really active yet; skipping account update"
                );
                return Ok(false);
            }
            live
        };

        let changes = self.compute_changes(&account, sub, live.as_ref()).await?;
        self.apply(&account, &changes).await?;
        Ok(true)
    }

    pub async fn try_process_deletion(&self, sub: &RemoteSubscription) -> BillingResult<bool> {
        let Some(account) = self.find_account(sub).await? else {
            tracing::warn!(subscription_id = %sub.id, "Account not found for deleted subscription");
            return Ok(false);
        };

        let mut changes = AccountChanges {
            extra_agents: Some(0).filter(|_| account.extra_agents != 0),
            extra_inboxes: Some(0).filter(|_| account.extra_inboxes != 0),
            ..Default::default()
        };
        if let Some(plan) = free_plan(&self.store).await? {
            if account.plan_id != Some(plan.id) {
                changes.plan_id = Some(plan.id);
            }
        }

        self.apply(&account, &changes).await?;
        tracing::info!(account_id = %account.id, subscription_id = %sub.id, "Reset account to free plan after subscription deletion");
        Ok(true)
    }

    /// Account a subscription belongs to: by customer id, then by the
    /// `account_id` metadata tag
    pub async fn find_account(&self, sub: &RemoteSubscription) -> BillingResult<Option<Account>> {
        if !sub.customer.is_empty() {
            if let Some(account) = self.store.find_account_by_customer(&sub.customer).await? {
                return Ok(Some(account));
            }
        }
        match int_field(&sub.metadata, "account_id") {
            Some(id) => Ok(self.store.get_account(AccountId(id)).await?),
            None => Ok(None),
        }
    }

    async fn fetch_live(&self, id: &str) -> Option<RemoteSubscription> {
        match self.gateway.retrieve_subscription(id).await {
            Ok(live) => Some(live),
            Err(err) => {
                tracing::warn!(subscription_id = %id, error = %err, "Live subscription lookup failed; using local status");
                None
            }
        }
    }

    async fn resolve_plan(
        &self,
        sub: &RemoteSubscription,
        selection: &SelectionMetadata,
        live: Option<&RemoteSubscription>,
    ) -> BillingResult<Option<Plan>> {
        if let Some(plan_id) = selection.selected_plan_id {
            match self.store.get_plan(plan_id).await? {
                Some(plan) => return Ok(Some(plan)),
                None => tracing::warn!(plan_id = %plan_id, "Selected plan in subscription metadata not found"),
            }
        }

        let plans = self.store.list_plans().await?;
        if let Some(plan) = match_base_price(&plans, &sub.price_ids()) {
            return Ok(Some(plan.clone()));
        }
        Ok(live.and_then(|l| match_base_price(&plans, &l.price_ids()).cloned()))
    }

    fn resolve_extras(
        sub: &RemoteSubscription,
        plan: Option<&Plan>,
        selection: &SelectionMetadata,
        live: Option<&RemoteSubscription>,
    ) -> SeatExtras {
        if let (Some(agents), Some(inboxes)) = (selection.extra_agents, selection.extra_inboxes) {
            return SeatExtras { agents, inboxes };
        }

        let mut derived = derive_extras(plan, &sub.items.data);
        let no_metadata = selection.extra_agents.is_none() && selection.extra_inboxes.is_none();
        if no_metadata && derived.is_zero() {
            if let Some(live) = live {
                derived = derive_extras(plan, &live.items.data);
            }
        }

        SeatExtras {
            agents: selection.extra_agents.unwrap_or(derived.agents),
            inboxes: selection.extra_inboxes.unwrap_or(derived.inboxes),
        }
    }

    async fn compute_changes(
        &self,
        account: &Account,
        sub: &RemoteSubscription,
        live: Option<&RemoteSubscription>,
    ) -> BillingResult<AccountChanges> {
        let keep_access = should_keep_access(sub);
        let selection = SelectionMetadata::parse(&sub.metadata);

        let (mut plan, extras) = if keep_access {
            let plan = self.resolve_plan(sub, &selection, live).await?;
            let extras = Self::resolve_extras(sub, plan.as_ref(), &selection, live);
            (plan, extras)
        } else {
            (free_plan(&self.store).await?, SeatExtras::default())
        };

        // An active account always has a plan
        if keep_access && plan.is_none() && account.plan_id.is_none() {
            plan = free_plan(&self.store).await?;
        }

        let status = if keep_access {
            AccountStatus::Active
        } else {
            AccountStatus::Suspended
        };
        let subscription_id = keep_access.then(|| sub.id.clone());

        let mut changes = AccountChanges::default();
        if account.status != status {
            changes.status = Some(status);
        }
        if let Some(plan) = &plan {
            if account.plan_id != Some(plan.id) {
                changes.plan_id = Some(plan.id);
            }
        }
        if account.extra_agents != extras.agents {
            changes.extra_agents = Some(extras.agents);
        }
        if account.extra_inboxes != extras.inboxes {
            changes.extra_inboxes = Some(extras.inboxes);
        }
        if account.stripe_customer_id.as_deref().unwrap_or_default().is_empty()
            && !sub.customer.is_empty()
        {
            changes.stripe_customer_id = Some(sub.customer.clone());
        }
        if account.stripe_subscription_id != subscription_id {
            changes.stripe_subscription_id = Some(subscription_id);
        }
        Ok(changes)
    }

    async fn apply(&self, account: &Account, changes: &AccountChanges) -> BillingResult<()> {
        if changes.is_empty() {
            tracing::debug!(account_id = %account.id, "Account already matches subscription");
            return Ok(());
        }
        self.store.apply_account_changes(account.id, changes).await?;
        tracing::info!(
            account_id = %account.id,
            fields = %changes.touched_fields().join(", "),
            "Updated account from subscription"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BillingError;
    use crate::gateway::SubscriptionStatus;
    use crate::testing::{
        account_fixture, free_plan_fixture, item, price, priced_plan, subscription, FakeStripe,
    };
    use starchat_shared::MemoryStore;

    struct Fixture {
        gateway: FakeStripe,
        store: MemoryStore,
        projector: SubscriptionProjector<FakeStripe, MemoryStore>,
        free: Plan,
        premium: Plan,
        account: Account,
    }

    async fn fixture() -> Fixture {
        let gateway = FakeStripe::new();
        let store = MemoryStore::new();
        let free = store.create_plan(&free_plan_fixture()).await.unwrap();
        let premium = priced_plan(&store, "Premium", "prem").await;
        let account = account_fixture(&store, "owner@acme.test", Some(free.id)).await;
        let projector = SubscriptionProjector::new(gateway.clone(), store.clone());
        Fixture {
            gateway,
            store,
            projector,
            free,
            premium,
            account,
        }
    }

    fn premium_sub(f: &Fixture, status: SubscriptionStatus) -> RemoteSubscription {
        subscription(
            "sub_1",
            f.account.stripe_customer_id.as_deref().unwrap(),
            status,
            vec![item(
                "si_base",
                price(f.premium.prices.monthly.as_deref().unwrap(), Some(PriceKind::Base)),
                1,
            )],
        )
    }

    async fn reload(f: &Fixture) -> Account {
        f.store.get_account(f.account.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_past_due_with_metadata_grants_selected_plan() {
        let f = fixture().await;
        let mut sub = premium_sub(&f, SubscriptionStatus::PastDue);
        sub.items.data.clear();
        sub.metadata = Metadata::from([
            ("selected_plan_id".to_string(), f.premium.id.to_string()),
            ("extra_agents".to_string(), "2".to_string()),
            ("extra_inboxes".to_string(), "1".to_string()),
        ]);
        f.gateway.insert_subscription(sub.clone());

        assert!(f.projector.process_subscription_update(&sub).await);

        let account = reload(&f).await;
        assert_eq!(account.status, AccountStatus::Active);
        assert_eq!(account.plan_id, Some(f.premium.id));
        assert_eq!((account.extra_agents, account.extra_inboxes), (2, 1));
        assert_eq!(account.stripe_subscription_id.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn test_reprocessing_writes_nothing() {
        let f = fixture().await;
        let sub = premium_sub(&f, SubscriptionStatus::Active);
        f.gateway.insert_subscription(sub.clone());

        assert!(f.projector.process_subscription_update(&sub).await);
        let first = reload(&f).await;
        assert!(f.projector.process_subscription_update(&sub).await);
        let second = reload(&f).await;

        assert_eq!(first, second);
        assert_eq!(second.plan_id, Some(f.premium.id));
    }

    #[tokio::test]
    async fn test_canceled_suspends_on_free_plan() {
        let f = fixture().await;
        f.store
            .apply_account_changes(
                f.account.id,
                &AccountChanges {
                    plan_id: Some(f.premium.id),
                    extra_agents: Some(3),
                    stripe_subscription_id: Some(Some("sub_1".to_string())),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let sub = premium_sub(&f, SubscriptionStatus::Canceled);

        assert!(f.projector.process_subscription_update(&sub).await);

        let account = reload(&f).await;
        assert_eq!(account.status, AccountStatus::Suspended);
        assert_eq!(account.plan_id, Some(f.free.id));
        assert_eq!(account.extra_agents, 0);
        assert_eq!(account.stripe_subscription_id, None);
    }

    #[tokio::test]
    async fn test_every_non_billable_status_suspends_on_free_plan() {
        for status in [
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Unpaid,
            SubscriptionStatus::Incomplete,
            SubscriptionStatus::IncompleteExpired,
            SubscriptionStatus::Paused,
        ] {
            for cancel_at_period_end in [false, true] {
                let f = fixture().await;
                f.store
                    .apply_account_changes(
                        f.account.id,
                        &AccountChanges {
                            plan_id: Some(f.premium.id),
                            extra_agents: Some(2),
                            extra_inboxes: Some(1),
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap();
                let mut sub = premium_sub(&f, status);
                sub.cancel_at_period_end = cancel_at_period_end;
                assert!(!should_keep_access(&sub), "{status} keeps access");

                assert!(f.projector.process_subscription_update(&sub).await, "{status}");

                let account = reload(&f).await;
                assert_eq!(account.status, AccountStatus::Suspended, "{status}");
                assert_eq!(account.plan_id, Some(f.free.id), "{status}");
                assert_eq!((account.extra_agents, account.extra_inboxes), (0, 0), "{status}");
            }
        }
    }

    #[tokio::test]
    async fn test_deletion_resets_extras_and_plan() {
        let f = fixture().await;
        f.store
            .apply_account_changes(
                f.account.id,
                &AccountChanges {
                    plan_id: Some(f.premium.id),
                    extra_agents: Some(4),
                    extra_inboxes: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let sub = premium_sub(&f, SubscriptionStatus::Canceled);

        assert!(f.projector.process_subscription_deletion(&sub).await);

        let account = reload(&f).await;
        assert_eq!(account.plan_id, Some(f.free.id));
        assert_eq!((account.extra_agents, account.extra_inboxes), (0, 0));
    }

    #[tokio::test]
    async fn test_unknown_account_is_skipped() {
        let f = fixture().await;
        let sub = subscription("sub_9", "cus_nobody", SubscriptionStatus::Active, vec![]);
        assert!(!f.projector.process_subscription_update(&sub).await);
        assert!(!f.projector.process_subscription_deletion(&sub).await);
    }

    #[tokio::test]
    async fn test_account_found_through_metadata() {
        let f = fixture().await;
        let mut sub = premium_sub(&f, SubscriptionStatus::Active);
        sub.customer = "cus_other".to_string();
        sub.metadata
            .insert("account_id".to_string(), f.account.id.to_string());
        f.gateway.insert_subscription(sub.clone());

        assert!(f.projector.process_subscription_update(&sub).await);
        assert_eq!(reload(&f).await.plan_id, Some(f.premium.id));
    }

    #[tokio::test]
    async fn test_not_really_active_is_skipped() {
        let f = fixture().await;
        let sub = premium_sub(&f, SubscriptionStatus::Active);
        let mut live = sub.clone();
        live.status = SubscriptionStatus::Incomplete;
        f.gateway.insert_subscription(live);

        assert!(!f.projector.process_subscription_update(&sub).await);
        assert_eq!(reload(&f).await, f.account);
    }

    #[tokio::test]
    async fn test_failed_live_lookup_uses_local_status() {
        let f = fixture().await;
        let sub = premium_sub(&f, SubscriptionStatus::Trialing);
        f.gateway.fail_next(
            "retrieve_subscription",
            BillingError::Transient("connection reset".to_string()),
        );

        assert!(f.projector.process_subscription_update(&sub).await);
        assert_eq!(reload(&f).await.plan_id, Some(f.premium.id));
    }

    #[tokio::test]
    async fn test_extras_derived_from_items_with_metadata_override() {
        let f = fixture().await;
        let mut sub = premium_sub(&f, SubscriptionStatus::Active);
        sub.items.data.push(item(
            "si_agents",
            price(
                f.premium.prices.extra_agent_monthly.as_deref().unwrap(),
                None,
            ),
            3,
        ));
        sub.items.data.push(item(
            "si_inboxes",
            price("price_unlisted", Some(PriceKind::ExtraInbox)),
            2,
        ));
        sub.metadata
            .insert("extra_inboxes".to_string(), "0".to_string());
        f.gateway.insert_subscription(sub.clone());

        assert!(f.projector.process_subscription_update(&sub).await);

        let account = reload(&f).await;
        assert_eq!((account.extra_agents, account.extra_inboxes), (3, 0));
    }

    #[tokio::test]
    async fn test_plan_matched_from_live_items() {
        let f = fixture().await;
        let mut sub = premium_sub(&f, SubscriptionStatus::Active);
        sub.items.data.clear();
        let mut live = premium_sub(&f, SubscriptionStatus::Active);
        live.items.data = vec![item(
            "si_base",
            price(f.premium.prices.yearly.as_deref().unwrap(), Some(PriceKind::Base)),
            1,
        )];
        f.gateway.insert_subscription(live);

        assert!(f.projector.process_subscription_update(&sub).await);
        assert_eq!(reload(&f).await.plan_id, Some(f.premium.id));
    }

    #[tokio::test]
    async fn test_grace_period_keeps_access() {
        let f = fixture().await;
        let mut sub = premium_sub(&f, SubscriptionStatus::Active);
        sub.cancel_at_period_end = true;
        f.gateway.insert_subscription(sub.clone());
        assert!(should_keep_access(&sub));

        assert!(f.projector.process_subscription_update(&sub).await);
        assert_eq!(reload(&f).await.status, AccountStatus::Active);

        sub.status = SubscriptionStatus::Unpaid;
        assert!(!should_keep_access(&sub));
    }

    #[tokio::test]
    async fn test_active_account_without_plan_gets_free_plan() {
        let f = fixture().await;
        let orphan = account_fixture(&f.store, "orphan@acme.test", None).await;
        let sub = subscription(
            "sub_2",
            orphan.stripe_customer_id.as_deref().unwrap(),
            SubscriptionStatus::Active,
            vec![item("si_1", price("price_unknown", None), 1)],
        );
        f.gateway.insert_subscription(sub.clone());

        assert!(f.projector.process_subscription_update(&sub).await);

        let account = f.store.get_account(orphan.id).await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Active);
        assert_eq!(account.plan_id, Some(f.free.id));
    }

    #[test]
    fn test_selection_metadata_parsing() {
        let metadata = Metadata::from([
            ("extra_agents".to_string(), " 4 ".to_string()),
            ("extra_inboxes".to_string(), "-2".to_string()),
            ("selected_plan_id".to_string(), "abc".to_string()),
        ]);
        assert_eq!(
            SelectionMetadata::parse(&metadata),
            SelectionMetadata {
                extra_agents: Some(4),
                extra_inboxes: Some(0),
                selected_plan_id: None,
            }
        );
    }
}
