//! Application state

use std::sync::Arc;

use sqlx::PgPool;
use starchat_billing::{
    CheckoutOrchestrator, Outbox, PaymentMethodService, PortalService, Reconciler, StripeClient,
};
use starchat_shared::PgStore;
use starchat_support::{ChatwootClient, ChatwootService};

use crate::config::Config;

pub type SupportService = ChatwootService<PgStore>;
pub type AppReconciler = Reconciler<StripeClient, PgStore, SupportService>;
pub type AppCheckout = CheckoutOrchestrator<StripeClient, PgStore, SupportService>;
pub type AppPortal = PortalService<StripeClient, PgStore>;
pub type AppPaymentMethods = PaymentMethodService<StripeClient, PgStore>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub store: PgStore,
    pub stripe: StripeClient,
    pub support: SupportService,
    pub reconciler: Arc<AppReconciler>,
    pub checkout: Arc<AppCheckout>,
    pub portal: Arc<AppPortal>,
    pub payment_methods: Arc<AppPaymentMethods>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, stripe: StripeClient, chatwoot: ChatwootClient) -> Self {
        let store = PgStore::new(pool.clone());
        let support = ChatwootService::new(chatwoot, store.clone());
        let stripe_config = stripe.config().clone();

        let reconciler = Reconciler::new(
            stripe.clone(),
            store.clone(),
            support.clone(),
            stripe_config.currency.clone(),
        );
        let checkout = CheckoutOrchestrator::new(
            stripe.clone(),
            store.clone(),
            support.clone(),
            stripe_config.clone(),
        );
        let portal = PortalService::new(stripe.clone(), store.clone(), stripe_config);
        let payment_methods = PaymentMethodService::new(stripe.clone(), store.clone());

        Self {
            pool,
            config,
            store,
            stripe,
            support,
            reconciler: Arc::new(reconciler),
            checkout: Arc::new(checkout),
            portal: Arc::new(portal),
            payment_methods: Arc::new(payment_methods),
        }
    }

    /// Dispatch the events collected by a handler whose writes succeeded
    pub async fn commit(&self, outbox: Outbox) {
        if outbox.is_empty() {
            return;
        }
        outbox.flush(&self.reconciler).await;
    }
}
