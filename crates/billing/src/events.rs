//! Domain events and the after-commit outbox
//!
//! Handlers collect events while they write locally. Only once the local
//! unit of work has committed is the outbox flushed, which hands every event
//! to the [`Reconciler`] in the order it was recorded. Remote failures never
//! reach the caller; they are logged with the entity they concern.

use starchat_shared::{Account, Address, EntityStore, Plan, SupportDirectory};

use crate::customer::CustomerSync;
use crate::gateway::{BillingGateway, RemoteSubscription};
use crate::plan_sync::PlanSynchronizer;
use crate::subscriptions::SubscriptionProjector;

/// Something that changed locally or was observed remotely
#[derive(Debug, Clone)]
pub enum DomainEvent {
    PlanSaved {
        previous: Option<Plan>,
        current: Plan,
    },
    PlanDeleted(Plan),
    AccountSaved {
        account: Account,
        created: bool,
    },
    AccountDeleted(Account),
    AddressSaved(Address),
    SubscriptionObserved(RemoteSubscription),
    SubscriptionDeleted(RemoteSubscription),
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlanSaved { .. } => "plan_saved",
            Self::PlanDeleted(_) => "plan_deleted",
            Self::AccountSaved { .. } => "account_saved",
            Self::AccountDeleted(_) => "account_deleted",
            Self::AddressSaved(_) => "address_saved",
            Self::SubscriptionObserved(_) => "subscription_observed",
            Self::SubscriptionDeleted(_) => "subscription_deleted",
        }
    }
}

/// Events pending until the local write commits. Dropping it discards them.
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<DomainEvent>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Dispatch everything in recording order
    pub async fn flush<G, S, D>(self, reconciler: &Reconciler<G, S, D>)
    where
        G: BillingGateway,
        S: EntityStore + Clone,
        D: SupportDirectory,
    {
        for event in self.events {
            reconciler.dispatch(event).await;
        }
    }
}

/// Routes events to the remote synchronizers
#[derive(Debug, Clone)]
pub struct Reconciler<G, S, D> {
    store: S,
    plans: PlanSynchronizer<G, S>,
    customers: CustomerSync<G, S>,
    projector: SubscriptionProjector<G, S>,
    support: D,
}

impl<G, S, D> Reconciler<G, S, D>
where
    G: BillingGateway,
    S: EntityStore + Clone,
    D: SupportDirectory,
{
    pub fn new(gateway: G, store: S, support: D, currency: impl Into<String>) -> Self {
        Self {
            plans: PlanSynchronizer::new(gateway.clone(), store.clone(), currency),
            customers: CustomerSync::new(gateway.clone(), store.clone()),
            projector: SubscriptionProjector::new(gateway, store.clone()),
            store,
            support,
        }
    }

    pub fn plans(&self) -> &PlanSynchronizer<G, S> {
        &self.plans
    }

    pub async fn dispatch(&self, event: DomainEvent) {
        tracing::debug!(event = event.name(), "Dispatching domain event");
        match event {
            DomainEvent::PlanSaved { previous, current } => {
                if current.is_admin() {
                    return;
                }
                self.plans.sync_plan(current.id, previous.as_ref()).await;
            }
            DomainEvent::PlanDeleted(plan) => {
                if let Err(err) = self.plans.delete_plan_resources(&plan).await {
                    tracing::warn!(plan_id = %plan.id, error = %err, "Failed to clean up Stripe resources of deleted plan");
                }
            }
            DomainEvent::AccountSaved { account, created } => {
                self.customers.on_account_saved(&account, created).await;
                self.sync_support(&account).await;
            }
            DomainEvent::AccountDeleted(account) => {
                self.customers.on_account_deleted(&account).await;
                if let Err(err) = self.support.remove(account.id).await {
                    tracing::warn!(account_id = %account.id, error = %err, "Failed to remove support account");
                }
            }
            DomainEvent::AddressSaved(address) => {
                self.customers.on_address_saved(&address).await;
            }
            DomainEvent::SubscriptionObserved(sub) => {
                if self.projector.process_subscription_update(&sub).await {
                    self.resync_support_for(&sub).await;
                }
            }
            DomainEvent::SubscriptionDeleted(sub) => {
                if self.projector.process_subscription_deletion(&sub).await {
                    self.resync_support_for(&sub).await;
                }
            }
        }
    }

    /// Make sure the support account exists and carries the plan's limits
    async fn sync_support(&self, account: &Account) {
        let plan = match account.plan_id {
            Some(plan_id) => match self.store.get_plan(plan_id).await {
                Ok(plan) => plan,
                Err(err) => {
                    tracing::warn!(account_id = %account.id, error = %err, "Could not load plan for support sync");
                    return;
                }
            },
            None => None,
        };

        if let Err(err) = self.support.provision(account, plan.as_ref()).await {
            tracing::warn!(account_id = %account.id, error = %err, "Failed to provision support account");
            return;
        }
        if let Some(plan) = &plan {
            if let Err(err) = self.support.sync_limits(account, plan).await {
                tracing::warn!(account_id = %account.id, error = %err, "Failed to sync support limits");
            }
        }
    }

    async fn resync_support_for(&self, sub: &RemoteSubscription) {
        match self.projector.find_account(sub).await {
            Ok(Some(account)) => self.sync_support(&account).await,
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(subscription_id = %sub.id, error = %err, "Could not reload account after subscription change")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SubscriptionStatus;
    use crate::testing::{
        account_fixture, free_plan_fixture, plan_fixture, priced_plan, subscription, FakeStripe,
        FakeSupport,
    };
    use starchat_shared::{AddressId, AddressKind, MemoryStore};

    fn setup() -> (
        FakeStripe,
        MemoryStore,
        FakeSupport,
        Reconciler<FakeStripe, MemoryStore, FakeSupport>,
    ) {
        let gateway = FakeStripe::new();
        let store = MemoryStore::new();
        let support = FakeSupport::with_usage(0, 0);
        let reconciler = Reconciler::new(gateway.clone(), store.clone(), support.clone(), "brl");
        (gateway, store, support, reconciler)
    }

    #[tokio::test]
    async fn test_dropped_outbox_dispatches_nothing() {
        let (gateway, store, support, _reconciler) = setup();
        let account = store
            .create_account(&Account::new("a@acme.test", None))
            .await
            .unwrap();

        let mut outbox = Outbox::new();
        outbox.push(DomainEvent::AccountSaved {
            account,
            created: true,
        });
        assert_eq!(outbox.len(), 1);
        drop(outbox);

        assert_eq!(gateway.mutation_count(), 0);
        assert!(support.calls().is_empty());
    }

    #[tokio::test]
    async fn test_flush_dispatches_in_order() {
        let (gateway, store, support, reconciler) = setup();
        let first = store
            .create_account(&Account::new("first@acme.test", None))
            .await
            .unwrap();
        let second = store
            .create_account(&Account::new("second@acme.test", None))
            .await
            .unwrap();

        let mut outbox = Outbox::new();
        outbox.push(DomainEvent::AccountSaved {
            account: first.clone(),
            created: true,
        });
        outbox.push(DomainEvent::AccountSaved {
            account: second.clone(),
            created: true,
        });
        outbox.flush(&reconciler).await;

        let first_customer = store
            .get_account(first.id)
            .await
            .unwrap()
            .unwrap()
            .stripe_customer_id
            .unwrap();
        let second_customer = store
            .get_account(second.id)
            .await
            .unwrap()
            .unwrap()
            .stripe_customer_id
            .unwrap();
        assert_eq!(
            gateway.calls(),
            vec![
                format!("create_customer:{first_customer}"),
                format!("create_customer:{second_customer}"),
            ]
        );
        assert_eq!(
            support.calls(),
            vec![format!("provision:{}", first.id), format!("provision:{}", second.id)]
        );
    }

    #[tokio::test]
    async fn test_plan_saved_syncs_except_admin() {
        let (gateway, store, _support, reconciler) = setup();
        let admin = store
            .create_plan(&plan_fixture("admin", 0, 0))
            .await
            .unwrap();
        reconciler
            .dispatch(DomainEvent::PlanSaved {
                previous: None,
                current: admin,
            })
            .await;
        assert_eq!(gateway.mutation_count(), 0);

        let premium = store
            .create_plan(&plan_fixture("Premium", 4990, 49900))
            .await
            .unwrap();
        reconciler
            .dispatch(DomainEvent::PlanSaved {
                previous: None,
                current: premium.clone(),
            })
            .await;
        let stored = store.get_plan(premium.id).await.unwrap().unwrap();
        assert!(stored.stripe_product_id.is_some());
        assert!(stored.prices.monthly.is_some());
    }

    #[tokio::test]
    async fn test_account_saved_pushes_plan_limits() {
        let (_gateway, store, support, reconciler) = setup();
        let premium = priced_plan(&store, "Premium", "prem").await;
        let account = account_fixture(&store, "owner@acme.test", Some(premium.id)).await;

        reconciler
            .dispatch(DomainEvent::AccountSaved {
                account: account.clone(),
                created: false,
            })
            .await;

        assert_eq!(
            support.calls(),
            vec![
                format!("provision:{}", account.id),
                format!("sync_limits:{}:Premium", account.id),
            ]
        );
    }

    #[tokio::test]
    async fn test_account_deleted_removes_remote_records() {
        let (gateway, store, support, reconciler) = setup();
        let account = account_fixture(&store, "owner@acme.test", None).await;
        gateway.insert_customer(
            "cus_owner",
            crate::customer::customer_payload(&store, &account).await.unwrap(),
        );

        reconciler
            .dispatch(DomainEvent::AccountDeleted(account.clone()))
            .await;

        assert!(gateway.customer("cus_owner").is_none());
        assert_eq!(support.calls(), vec![format!("remove:{}", account.id)]);
    }

    #[tokio::test]
    async fn test_non_default_address_is_ignored() {
        let (gateway, store, _support, reconciler) = setup();
        let account = account_fixture(&store, "owner@acme.test", None).await;
        let address = Address {
            id: AddressId(1),
            account_id: account.id,
            kind: AddressKind::Billing,
            is_default: false,
            line1: "Rua B".to_string(),
            number: None,
            line2: None,
            neighborhood: None,
            city: "Recife".to_string(),
            state: "PE".to_string(),
            postal_code: "50000000".to_string(),
            country: "br".to_string(),
        };

        reconciler.dispatch(DomainEvent::AddressSaved(address)).await;
        assert_eq!(gateway.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_events_update_account_and_support() {
        let (gateway, store, support, reconciler) = setup();
        let free = store.create_plan(&free_plan_fixture()).await.unwrap();
        let premium = priced_plan(&store, "Premium", "prem").await;
        let account = account_fixture(&store, "owner@acme.test", Some(free.id)).await;

        let mut sub = subscription(
            "sub_1",
            "cus_owner",
            SubscriptionStatus::Active,
            vec![crate::testing::item(
                "si_1",
                crate::testing::price(premium.prices.monthly.as_deref().unwrap(), None),
                1,
            )],
        );
        sub.metadata
            .insert("selected_plan_id".to_string(), premium.id.to_string());
        gateway.insert_subscription(sub.clone());

        reconciler
            .dispatch(DomainEvent::SubscriptionObserved(sub.clone()))
            .await;
        let stored = store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.plan_id, Some(premium.id));
        assert!(support
            .calls()
            .contains(&format!("sync_limits:{}:Premium", account.id)));

        reconciler.dispatch(DomainEvent::SubscriptionDeleted(sub)).await;
        let stored = store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.plan_id, Some(free.id));
        assert!(support
            .calls()
            .contains(&format!("sync_limits:{}:free", account.id)));
    }

    #[tokio::test]
    async fn test_metadata_matched_subscription_resyncs_support() {
        let (gateway, store, support, reconciler) = setup();
        let free = store.create_plan(&free_plan_fixture()).await.unwrap();
        let premium = priced_plan(&store, "Premium", "prem").await;
        let account = account_fixture(&store, "owner@acme.test", Some(free.id)).await;

        let mut sub = subscription(
            "sub_2",
            "cus_unlinked",
            SubscriptionStatus::Active,
            vec![crate::testing::item(
                "si_1",
                crate::testing::price(premium.prices.monthly.as_deref().unwrap(), None),
                1,
            )],
        );
        sub.metadata
            .insert("account_id".to_string(), account.id.to_string());
        sub.metadata
            .insert("selected_plan_id".to_string(), premium.id.to_string());
        gateway.insert_subscription(sub.clone());

        reconciler
            .dispatch(DomainEvent::SubscriptionObserved(sub))
            .await;

        let stored = store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.plan_id, Some(premium.id));
        assert!(support
            .calls()
            .contains(&format!("sync_limits:{}:Premium", account.id)));
    }
}
