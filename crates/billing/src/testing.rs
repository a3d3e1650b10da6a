//! In-memory stand-ins for Stripe and the support platform used by unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use starchat_shared::{
    Account, AccountId, EntityStore, MemoryStore, Plan, PlanId, PlanPriceIds, PriceKind,
    SeatUsage, StarchatError, StarchatResult, SupportDirectory,
};

use crate::client::{PaymentMethodConfigurations, StripeConfig};
use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    BillingGateway, CardDetails, CheckoutSessionParams, CustomerPayload, Expandable, InvoiceState,
    Metadata, NewPrice, PortalSessionParams, ProductParams, Recurring, RemoteInvoice,
    RemotePaymentMethod, RemotePaymentMethodConfiguration, RemotePortalConfiguration, RemotePrice,
    RemoteProduct, RemoteSession, RemoteSetupIntent, RemoteSubscription, RemoteSubscriptionItem,
    SubscriptionItems, SubscriptionStatus, SubscriptionUpdate,
};

// =============================================================================
// Fixtures
// =============================================================================

pub fn stripe_config() -> StripeConfig {
    StripeConfig {
        secret_key: "sk_test_fake".to_string(),
        webhook_secret: "whsec_test".to_string(),
        currency: "brl".to_string(),
        portal_configuration_id: None,
        payment_method_configurations: PaymentMethodConfigurations::default(),
        allowed_payment_method_types: vec![
            "card".to_string(),
            "boleto".to_string(),
            "pix".to_string(),
        ],
        app_base_url: "https://app.starchat.test".to_string(),
    }
}

/// Paid plan with two included agents, one inbox and priced add-ons
pub fn plan_fixture(name: &str, monthly_cents: i64, yearly_cents: i64) -> Plan {
    Plan {
        id: PlanId(0),
        name: name.to_string(),
        description: format!("{name} plan"),
        included_agents: 2,
        included_inboxes: 1,
        monthly_price_cents: monthly_cents,
        yearly_price_cents: yearly_cents,
        extra_agent_price_cents: 1500,
        extra_inbox_price_cents: 1000,
        extra_agent_yearly_price_cents: None,
        extra_inbox_yearly_price_cents: None,
        is_active: true,
        is_plan_staff: false,
        is_favorite: false,
        requires_payment: monthly_cents > 0,
        stripe_product_id: None,
        prices: PlanPriceIds::default(),
    }
}

pub fn free_plan_fixture() -> Plan {
    Plan {
        included_agents: 1,
        included_inboxes: 1,
        requires_payment: false,
        ..plan_fixture("free", 0, 0)
    }
}

/// Store a paid plan whose six price ids are `price_{prefix}_{slot column}`
pub async fn priced_plan(store: &MemoryStore, name: &str, prefix: &str) -> Plan {
    let mut plan = plan_fixture(name, 4990, 49900);
    plan.stripe_product_id = Some(format!("prod_{prefix}"));
    for slot in starchat_shared::PriceSlot::ALL {
        plan.prices
            .set(slot, Some(format!("price_{prefix}_{}", slot.column())));
    }
    store.create_plan(&plan).await.unwrap()
}

pub async fn account_fixture(store: &MemoryStore, email: &str, plan_id: Option<PlanId>) -> Account {
    let mut account = Account::new(email, plan_id);
    account.stripe_customer_id = Some(format!("cus_{}", email.split('@').next().unwrap_or(email)));
    store.create_account(&account).await.unwrap()
}

pub fn price(id: &str, kind: Option<PriceKind>) -> RemotePrice {
    RemotePrice {
        id: id.to_string(),
        active: true,
        currency: "brl".to_string(),
        unit_amount: Some(1000),
        nickname: None,
        product: "prod_test".to_string(),
        recurring: Some(Recurring {
            interval: "month".to_string(),
        }),
        metadata: kind
            .map(|k| Metadata::from([("kind".to_string(), k.as_str().to_string())]))
            .unwrap_or_default(),
    }
}

pub fn item(id: &str, price: RemotePrice, quantity: u64) -> RemoteSubscriptionItem {
    RemoteSubscriptionItem {
        id: id.to_string(),
        price,
        quantity: Some(quantity),
    }
}

pub fn subscription(
    id: &str,
    customer: &str,
    status: SubscriptionStatus,
    items: Vec<RemoteSubscriptionItem>,
) -> RemoteSubscription {
    RemoteSubscription {
        id: id.to_string(),
        customer: customer.to_string(),
        status,
        cancel_at_period_end: false,
        current_period_start: 1_700_000_000,
        metadata: Metadata::new(),
        items: SubscriptionItems { data: items },
        latest_invoice: None,
    }
}

pub fn invoice(id: &str, status: &str) -> RemoteInvoice {
    RemoteInvoice {
        id: id.to_string(),
        status: Some(status.to_string()),
        hosted_invoice_url: Some(format!("https://invoice.test/{id}")),
        paid: status == "paid",
        currency: "brl".to_string(),
        ..Default::default()
    }
}

/// Card payment method, attached to `customer` when given
pub fn card(id: &str, customer: Option<&str>, last4: &str) -> RemotePaymentMethod {
    RemotePaymentMethod {
        id: id.to_string(),
        kind: "card".to_string(),
        customer: customer.map(|c| Expandable::Id(c.to_string())),
        card: Some(CardDetails {
            brand: "visa".to_string(),
            last4: last4.to_string(),
            exp_month: 12,
            exp_year: 2030,
        }),
    }
}

// =============================================================================
// Fake Stripe
// =============================================================================

#[derive(Default)]
struct FakeState {
    next_id: u64,
    products: Vec<RemoteProduct>,
    default_prices: HashMap<String, String>,
    prices: Vec<RemotePrice>,
    replays: HashMap<String, String>,
    customers: HashMap<String, CustomerPayload>,
    default_payment_methods: HashMap<String, String>,
    payment_methods: Vec<RemotePaymentMethod>,
    subscriptions: Vec<RemoteSubscription>,
    invoices: Vec<(String, RemoteInvoice)>,
    failures: HashMap<&'static str, VecDeque<Option<BillingError>>>,
    calls: Vec<String>,
    subscription_updates: Vec<(String, SubscriptionUpdate)>,
    checkout_sessions: Vec<CheckoutSessionParams>,
    portal_sessions: Vec<PortalSessionParams>,
    portal_configurations: Vec<RemotePortalConfiguration>,
    payment_method_configurations: Vec<RemotePaymentMethodConfiguration>,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }

    fn fail(&mut self, op: &'static str) -> BillingResult<()> {
        match self.failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    fn record(&mut self, op: &str, id: &str) {
        self.calls.push(format!("{op}:{id}"));
    }

    fn product_mut(&mut self, id: &str) -> BillingResult<&mut RemoteProduct> {
        self.products
            .iter_mut()
            .find(|p| p.id == id && !p.deleted)
            .ok_or_else(|| missing("product", id))
    }

    fn price_mut(&mut self, id: &str) -> BillingResult<&mut RemotePrice> {
        self.prices
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| missing("price", id))
    }

    fn subscription_mut(&mut self, id: &str) -> BillingResult<&mut RemoteSubscription> {
        self.subscriptions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| missing("subscription", id))
    }

    fn payment_method_mut(&mut self, id: &str) -> BillingResult<&mut RemotePaymentMethod> {
        self.payment_methods
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| missing("payment_method", id))
    }

    fn invoice_mut(&mut self, id: &str) -> BillingResult<&mut RemoteInvoice> {
        self.invoices
            .iter_mut()
            .map(|(_, invoice)| invoice)
            .find(|i| i.id == id)
            .ok_or_else(|| missing("invoice", id))
    }
}

fn missing(object: &str, id: &str) -> BillingError {
    BillingError::ResourceMissing {
        id: id.to_string(),
        message: format!("No such {object}: '{id}'"),
    }
}

/// Stripe double recording every mutating call
#[derive(Clone, Default)]
pub struct FakeStripe {
    state: Arc<Mutex<FakeState>>,
}

impl FakeStripe {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Make the next call of `op` fail with `err`
    pub fn fail_next(&self, op: &'static str, err: BillingError) {
        self.lock().failures.entry(op).or_default().push_back(Some(err));
    }

    /// Let the next call of `op` through before any queued failure
    pub fn succeed_next(&self, op: &'static str) {
        self.lock().failures.entry(op).or_default().push_back(None);
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn product(&self, id: &str) -> Option<RemoteProduct> {
        self.lock().products.iter().find(|p| p.id == id).cloned()
    }

    pub fn default_price(&self, product_id: &str) -> Option<String> {
        self.lock().default_prices.get(product_id).cloned()
    }

    pub fn price(&self, id: &str) -> Option<RemotePrice> {
        self.lock().prices.iter().find(|p| p.id == id).cloned()
    }

    pub fn price_count(&self) -> usize {
        self.lock().prices.len()
    }

    pub fn prices_of(&self, product_id: &str) -> Vec<RemotePrice> {
        self.lock()
            .prices
            .iter()
            .filter(|p| p.product == product_id)
            .cloned()
            .collect()
    }

    pub fn customer(&self, id: &str) -> Option<CustomerPayload> {
        self.lock().customers.get(id).cloned()
    }

    pub fn insert_customer(&self, id: &str, payload: CustomerPayload) {
        self.lock().customers.insert(id.to_string(), payload);
    }

    pub fn insert_payment_method(&self, method: RemotePaymentMethod) {
        self.lock().payment_methods.push(method);
    }

    pub fn payment_method(&self, id: &str) -> Option<RemotePaymentMethod> {
        self.lock().payment_methods.iter().find(|p| p.id == id).cloned()
    }

    pub fn set_default_payment_method(&self, customer: &str, payment_method: &str) {
        self.lock()
            .default_payment_methods
            .insert(customer.to_string(), payment_method.to_string());
    }

    pub fn default_payment_method(&self, customer: &str) -> Option<String> {
        self.lock().default_payment_methods.get(customer).cloned()
    }

    pub fn insert_subscription(&self, sub: RemoteSubscription) {
        let mut state = self.lock();
        state.subscriptions.retain(|s| s.id != sub.id);
        state.subscriptions.push(sub);
    }

    pub fn stored_subscription(&self, id: &str) -> Option<RemoteSubscription> {
        self.lock().subscriptions.iter().find(|s| s.id == id).cloned()
    }

    pub fn insert_invoice(&self, customer: &str, invoice: RemoteInvoice) {
        self.lock().invoices.push((customer.to_string(), invoice));
    }

    pub fn invoice(&self, id: &str) -> Option<RemoteInvoice> {
        self.lock()
            .invoices
            .iter()
            .find(|(_, i)| i.id == id)
            .map(|(_, i)| i.clone())
    }

    pub fn subscription_updates(&self) -> Vec<(String, SubscriptionUpdate)> {
        self.lock().subscription_updates.clone()
    }

    pub fn checkout_sessions(&self) -> Vec<CheckoutSessionParams> {
        self.lock().checkout_sessions.clone()
    }

    pub fn portal_sessions(&self) -> Vec<PortalSessionParams> {
        self.lock().portal_sessions.clone()
    }

    pub fn set_portal_configurations(&self, ids: &[&str]) {
        self.lock().portal_configurations = ids
            .iter()
            .map(|id| RemotePortalConfiguration {
                id: id.to_string(),
                active: true,
            })
            .collect();
    }

    pub fn set_payment_method_configurations(&self, configs: Vec<RemotePaymentMethodConfiguration>) {
        self.lock().payment_method_configurations = configs;
    }

    fn replay<T>(
        &self,
        key: &str,
        find: impl Fn(&FakeState, &str) -> Option<T>,
    ) -> Option<T> {
        let state = self.lock();
        let id = state.replays.get(key)?;
        find(&*state, id.as_str())
    }
}

impl BillingGateway for FakeStripe {
    async fn retrieve_product(&self, id: &str) -> BillingResult<Option<RemoteProduct>> {
        let mut state = self.lock();
        state.fail("retrieve_product")?;
        Ok(state
            .products
            .iter()
            .find(|p| p.id == id && !p.deleted)
            .cloned())
    }

    async fn create_product(
        &self,
        params: &ProductParams,
        idempotency_key: String,
    ) -> BillingResult<RemoteProduct> {
        if let Some(product) = self.replay(&idempotency_key, |s, id| {
            s.products.iter().find(|p| p.id == id).cloned()
        }) {
            return Ok(product);
        }
        let mut state = self.lock();
        state.fail("create_product")?;
        let product = RemoteProduct {
            id: state.next_id("prod"),
            active: params.active,
            name: params.name.clone(),
            description: params.description.clone(),
            metadata: params.metadata.clone(),
            deleted: false,
        };
        state.record("create_product", &product.id);
        state.replays.insert(idempotency_key, product.id.clone());
        state.products.push(product.clone());
        Ok(product)
    }

    async fn update_product(
        &self,
        id: &str,
        params: &ProductParams,
        _idempotency_key: String,
    ) -> BillingResult<RemoteProduct> {
        let mut state = self.lock();
        state.fail("update_product")?;
        state.record("update_product", id);
        let product = state.product_mut(id)?;
        product.name = params.name.clone();
        product.description = params.description.clone();
        product.active = params.active;
        product.metadata = params.metadata.clone();
        Ok(product.clone())
    }

    async fn set_default_price(
        &self,
        product_id: &str,
        price_id: &str,
        _idempotency_key: String,
    ) -> BillingResult<()> {
        let mut state = self.lock();
        state.fail("set_default_price")?;
        if state.default_prices.get(product_id).map(String::as_str) != Some(price_id) {
            state.record("set_default_price", product_id);
        }
        state
            .default_prices
            .insert(product_id.to_string(), price_id.to_string());
        Ok(())
    }

    async fn archive_product(&self, id: &str) -> BillingResult<()> {
        let mut state = self.lock();
        state.fail("archive_product")?;
        state.record("archive_product", id);
        state.product_mut(id)?.active = false;
        Ok(())
    }

    async fn delete_product(&self, id: &str) -> BillingResult<()> {
        let mut state = self.lock();
        state.fail("delete_product")?;
        state.record("delete_product", id);
        state.product_mut(id)?.deleted = true;
        Ok(())
    }

    async fn retrieve_price(&self, id: &str) -> BillingResult<Option<RemotePrice>> {
        let mut state = self.lock();
        state.fail("retrieve_price")?;
        Ok(state.prices.iter().find(|p| p.id == id).cloned())
    }

    async fn create_price(
        &self,
        params: &NewPrice,
        idempotency_key: String,
    ) -> BillingResult<RemotePrice> {
        if let Some(price) = self.replay(&idempotency_key, |s, id| {
            s.prices.iter().find(|p| p.id == id).cloned()
        }) {
            return Ok(price);
        }
        let mut state = self.lock();
        state.fail("create_price")?;
        let price = RemotePrice {
            id: state.next_id("price"),
            active: true,
            currency: params.currency.clone(),
            unit_amount: Some(params.unit_amount),
            nickname: Some(params.nickname.clone()),
            product: params.product.clone(),
            recurring: Some(params.recurring.clone()),
            metadata: params.metadata.clone(),
        };
        state.record("create_price", &price.id);
        state.replays.insert(idempotency_key, price.id.clone());
        state.prices.push(price.clone());
        Ok(price)
    }

    async fn update_price_nickname(
        &self,
        id: &str,
        nickname: &str,
        _idempotency_key: String,
    ) -> BillingResult<()> {
        let mut state = self.lock();
        state.fail("update_price_nickname")?;
        state.record("update_price_nickname", id);
        state.price_mut(id)?.nickname = Some(nickname.to_string());
        Ok(())
    }

    async fn deactivate_price(&self, id: &str, _idempotency_key: String) -> BillingResult<()> {
        let mut state = self.lock();
        state.fail("deactivate_price")?;
        state.record("deactivate_price", id);
        state.price_mut(id)?.active = false;
        Ok(())
    }

    async fn activate_price(&self, id: &str, _idempotency_key: String) -> BillingResult<()> {
        let mut state = self.lock();
        state.fail("activate_price")?;
        state.record("activate_price", id);
        state.price_mut(id)?.active = true;
        Ok(())
    }

    async fn list_prices(&self, product_id: &str) -> BillingResult<Vec<RemotePrice>> {
        let mut state = self.lock();
        state.fail("list_prices")?;
        Ok(state
            .prices
            .iter()
            .filter(|p| p.product == product_id)
            .cloned()
            .collect())
    }

    async fn create_customer(
        &self,
        payload: &CustomerPayload,
        idempotency_key: String,
    ) -> BillingResult<String> {
        let mut state = self.lock();
        if let Some(id) = state.replays.get(&idempotency_key) {
            return Ok(id.clone());
        }
        state.fail("create_customer")?;
        let id = state.next_id("cus");
        state.record("create_customer", &id);
        state.replays.insert(idempotency_key, id.clone());
        state.customers.insert(id.clone(), payload.clone());
        Ok(id)
    }

    async fn update_customer(&self, id: &str, payload: &CustomerPayload) -> BillingResult<()> {
        let mut state = self.lock();
        state.fail("update_customer")?;
        if !state.customers.contains_key(id) {
            return Err(missing("customer", id));
        }
        state.record("update_customer", id);
        state.customers.insert(id.to_string(), payload.clone());
        Ok(())
    }

    async fn delete_customer(&self, id: &str) -> BillingResult<()> {
        let mut state = self.lock();
        state.fail("delete_customer")?;
        state.record("delete_customer", id);
        state
            .customers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| missing("customer", id))
    }

    async fn clear_customer_default_payment_method(&self, id: &str) -> BillingResult<()> {
        let mut state = self.lock();
        state.fail("clear_customer_default_payment_method")?;
        state.record("clear_customer_default_payment_method", id);
        state.default_payment_methods.remove(id);
        Ok(())
    }

    async fn customer_default_payment_method(&self, id: &str) -> BillingResult<Option<String>> {
        let mut state = self.lock();
        state.fail("customer_default_payment_method")?;
        if !state.customers.contains_key(id) {
            return Err(missing("customer", id));
        }
        Ok(state.default_payment_methods.get(id).cloned())
    }

    async fn set_customer_default_payment_method(
        &self,
        id: &str,
        payment_method_id: &str,
    ) -> BillingResult<()> {
        let mut state = self.lock();
        state.fail("set_customer_default_payment_method")?;
        state.record("set_customer_default_payment_method", payment_method_id);
        state
            .default_payment_methods
            .insert(id.to_string(), payment_method_id.to_string());
        Ok(())
    }

    async fn create_setup_intent(&self, customer_id: &str) -> BillingResult<RemoteSetupIntent> {
        let mut state = self.lock();
        state.fail("create_setup_intent")?;
        let id = state.next_id("seti");
        state.record("create_setup_intent", customer_id);
        Ok(RemoteSetupIntent {
            client_secret: Some(format!("{id}_secret")),
            id,
        })
    }

    async fn list_card_payment_methods(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<RemotePaymentMethod>> {
        let mut state = self.lock();
        state.fail("list_card_payment_methods")?;
        Ok(state
            .payment_methods
            .iter()
            .filter(|p| p.kind == "card" && p.customer_id() == Some(customer_id))
            .cloned()
            .collect())
    }

    async fn retrieve_payment_method(&self, id: &str) -> BillingResult<RemotePaymentMethod> {
        let mut state = self.lock();
        state.fail("retrieve_payment_method")?;
        state.payment_method_mut(id).map(|p| p.clone())
    }

    async fn attach_payment_method(
        &self,
        id: &str,
        customer_id: &str,
    ) -> BillingResult<RemotePaymentMethod> {
        let mut state = self.lock();
        state.fail("attach_payment_method")?;
        state.record("attach_payment_method", id);
        let method = state.payment_method_mut(id)?;
        method.customer = Some(Expandable::Id(customer_id.to_string()));
        Ok(method.clone())
    }

    async fn detach_payment_method(&self, id: &str) -> BillingResult<()> {
        let mut state = self.lock();
        state.fail("detach_payment_method")?;
        state.record("detach_payment_method", id);
        state.payment_method_mut(id)?.customer = None;
        Ok(())
    }

    async fn retrieve_subscription(&self, id: &str) -> BillingResult<RemoteSubscription> {
        let mut state = self.lock();
        state.fail("retrieve_subscription")?;
        state.subscription_mut(id).map(|s| s.clone())
    }

    async fn list_subscriptions(&self, customer_id: &str) -> BillingResult<Vec<RemoteSubscription>> {
        let mut state = self.lock();
        state.fail("list_subscriptions")?;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.customer == customer_id)
            .cloned()
            .collect())
    }

    async fn update_subscription(
        &self,
        id: &str,
        params: &SubscriptionUpdate,
    ) -> BillingResult<RemoteSubscription> {
        let mut state = self.lock();
        state.fail("update_subscription")?;
        state.record("update_subscription", id);
        state
            .subscription_updates
            .push((id.to_string(), params.clone()));

        let mut new_items = Vec::new();
        for update in params.items.iter().filter(|u| u.id.is_none()) {
            let item_id = state.next_id("si");
            new_items.push((item_id, update.clone()));
        }
        let invoice_id = params
            .expand
            .iter()
            .any(|e| e == "latest_invoice")
            .then(|| state.next_id("in"));
        let known_prices = state.prices.clone();
        let lookup = |price_id: &str| {
            known_prices
                .iter()
                .find(|p| p.id == price_id)
                .cloned()
                .unwrap_or_else(|| price(price_id, None))
        };

        let sub = state.subscription_mut(id)?;
        for update in params.items.iter().filter(|u| u.id.is_some()) {
            let item_id = update.id.as_deref().unwrap_or_default();
            if update.deleted == Some(true) {
                sub.items.data.retain(|i| i.id != item_id);
            } else if let Some(existing) = sub.items.data.iter_mut().find(|i| i.id == item_id) {
                if let Some(price_id) = &update.price {
                    existing.price = lookup(price_id);
                }
                if update.quantity.is_some() {
                    existing.quantity = update.quantity;
                }
            }
        }
        for (item_id, update) in new_items {
            let price_id = update.price.as_deref().unwrap_or_default();
            sub.items
                .data
                .push(item(&item_id, lookup(price_id), update.quantity.unwrap_or(1)));
        }
        if let Some(metadata) = &params.metadata {
            sub.metadata.extend(metadata.clone());
        }
        if let Some(flag) = params.cancel_at_period_end {
            sub.cancel_at_period_end = flag;
        }
        if let Some(invoice_id) = &invoice_id {
            sub.latest_invoice = Some(Expandable::Object(Box::new(invoice(invoice_id, "draft"))));
        }
        let updated = sub.clone();

        if let Some(invoice_id) = invoice_id {
            let customer = updated.customer.clone();
            state.invoices.push((customer, invoice(&invoice_id, "draft")));
        }
        Ok(updated)
    }

    async fn cancel_subscription(&self, id: &str) -> BillingResult<RemoteSubscription> {
        let mut state = self.lock();
        state.fail("cancel_subscription")?;
        state.record("cancel_subscription", id);
        let sub = state.subscription_mut(id)?;
        sub.status = SubscriptionStatus::Canceled;
        Ok(sub.clone())
    }

    async fn list_invoices(
        &self,
        customer_id: &str,
        invoice_state: Option<InvoiceState>,
    ) -> BillingResult<Vec<RemoteInvoice>> {
        let mut state = self.lock();
        state.fail("list_invoices")?;
        Ok(state
            .invoices
            .iter()
            .filter(|(customer, i)| {
                customer == customer_id
                    && invoice_state.map_or(true, |s| i.status.as_deref() == Some(s.as_str()))
            })
            .map(|(_, i)| i.clone())
            .collect())
    }

    async fn retrieve_invoice(&self, id: &str) -> BillingResult<RemoteInvoice> {
        let mut state = self.lock();
        state.fail("retrieve_invoice")?;
        state.invoice_mut(id).map(|i| i.clone())
    }

    async fn finalize_invoice(&self, id: &str) -> BillingResult<RemoteInvoice> {
        let mut state = self.lock();
        state.fail("finalize_invoice")?;
        state.record("finalize_invoice", id);
        let invoice = state.invoice_mut(id)?;
        invoice.status = Some("open".to_string());
        Ok(invoice.clone())
    }

    async fn void_invoice(&self, id: &str) -> BillingResult<()> {
        let mut state = self.lock();
        state.fail("void_invoice")?;
        state.record("void_invoice", id);
        state.invoice_mut(id)?.status = Some("void".to_string());
        Ok(())
    }

    async fn delete_invoice(&self, id: &str) -> BillingResult<()> {
        let mut state = self.lock();
        state.fail("delete_invoice")?;
        state.record("delete_invoice", id);
        state.invoices.retain(|(_, i)| i.id != id);
        Ok(())
    }

    async fn clear_invoice_default_payment_method(&self, id: &str) -> BillingResult<()> {
        let mut state = self.lock();
        state.fail("clear_invoice_default_payment_method")?;
        state.record("clear_invoice_default_payment_method", id);
        Ok(())
    }

    async fn send_invoice(&self, id: &str) -> BillingResult<RemoteInvoice> {
        let mut state = self.lock();
        state.fail("send_invoice")?;
        state.record("send_invoice", id);
        state.invoice_mut(id).map(|i| i.clone())
    }

    async fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams,
    ) -> BillingResult<RemoteSession> {
        let mut state = self.lock();
        state.fail("create_checkout_session")?;
        let id = state.next_id("cs");
        state.record("create_checkout_session", &id);
        state.checkout_sessions.push(params.clone());
        Ok(RemoteSession {
            url: Some(format!("https://checkout.test/{id}")),
            id,
        })
    }

    async fn list_portal_configurations(&self) -> BillingResult<Vec<RemotePortalConfiguration>> {
        let mut state = self.lock();
        state.fail("list_portal_configurations")?;
        Ok(state.portal_configurations.clone())
    }

    async fn create_portal_session(
        &self,
        params: &PortalSessionParams,
    ) -> BillingResult<RemoteSession> {
        let mut state = self.lock();
        state.fail("create_portal_session")?;
        let id = state.next_id("bps");
        state.record("create_portal_session", &id);
        state.portal_sessions.push(params.clone());
        Ok(RemoteSession {
            url: Some(format!("https://portal.test/{id}")),
            id,
        })
    }

    async fn list_payment_method_configurations(
        &self,
    ) -> BillingResult<Vec<RemotePaymentMethodConfiguration>> {
        let mut state = self.lock();
        state.fail("list_payment_method_configurations")?;
        Ok(state.payment_method_configurations.clone())
    }
}

// =============================================================================
// Fake support directory
// =============================================================================

#[derive(Default)]
struct SupportState {
    usage: Option<SeatUsage>,
    calls: Vec<String>,
}

/// Support platform double; usage is unreadable until set
#[derive(Clone, Default)]
pub struct FakeSupport {
    state: Arc<Mutex<SupportState>>,
}

impl FakeSupport {
    pub fn with_usage(agents: i32, inboxes: i32) -> Self {
        let support = Self::default();
        support.state.lock().unwrap().usage = Some(SeatUsage { agents, inboxes });
        support
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

impl SupportDirectory for FakeSupport {
    async fn provision(&self, account: &Account, _plan: Option<&Plan>) -> StarchatResult<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("provision:{}", account.id));
        Ok(())
    }

    async fn sync_limits(&self, account: &Account, plan: &Plan) -> StarchatResult<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("sync_limits:{}:{}", account.id, plan.name));
        Ok(())
    }

    async fn remove(&self, account_id: AccountId) -> StarchatResult<()> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("remove:{account_id}"));
        Ok(())
    }

    async fn seat_usage(&self, _account_id: AccountId) -> StarchatResult<SeatUsage> {
        self.state
            .lock()
            .unwrap()
            .usage
            .ok_or_else(|| StarchatError::Upstream("usage unavailable".to_string()))
    }
}
