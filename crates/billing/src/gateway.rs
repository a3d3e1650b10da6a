//! Billing provider seam: the remote operations the reconciliation engine
//! performs, with the wire shapes it sends and reads back.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use starchat_shared::{BillingInterval, PostalAddress, PriceKind};

use crate::error::BillingResult;

/// String-to-string metadata attached to remote objects
pub type Metadata = BTreeMap<String, String>;

// =============================================================================
// Remote objects
// =============================================================================

/// Field that is an id unless the request expanded it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

impl<T> Expandable<T> {
    pub fn as_object(&self) -> Option<&T> {
        match self {
            Self::Id(_) => None,
            Self::Object(obj) => Some(obj),
        }
    }
}

impl Expandable<RemoteInvoice> {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Object(invoice) => &invoice.id,
        }
    }
}

impl Expandable<RemoteCustomerRef> {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) => id,
            Self::Object(customer) => &customer.id,
        }
    }
}

/// Paginated list envelope
#[derive(Debug, Clone, Deserialize)]
pub struct List<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProduct {
    pub id: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recurring {
    pub interval: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePrice {
    pub id: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub unit_amount: Option<i64>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub recurring: Option<Recurring>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl RemotePrice {
    /// Add-on kind recorded in the price metadata
    pub fn kind(&self) -> Option<PriceKind> {
        self.metadata.get("kind").and_then(|k| PriceKind::parse(k))
    }

    pub fn interval(&self) -> Option<&str> {
        self.recurring.as_ref().map(|r| r.interval.as_str())
    }

    /// Active, with the same amount, currency and recurring interval
    pub fn matches(&self, amount_cents: i64, currency: &str, interval: BillingInterval) -> bool {
        self.active
            && self.unit_amount == Some(amount_cents)
            && self.currency.eq_ignore_ascii_case(currency)
            && self.interval() == Some(interval.as_str())
    }

    /// Metadata tags it as the plan's price for `kind` and `interval`
    pub fn is_tagged(&self, plan_id: &str, kind: PriceKind, interval: BillingInterval) -> bool {
        self.metadata.get("plan_id").map(String::as_str) == Some(plan_id)
            && self.metadata.get("kind").map(String::as_str) == Some(kind.as_str())
            && self.metadata.get("interval").map(String::as_str) == Some(interval.as_str())
    }
}

/// Remote subscription lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Paused => "paused",
            Self::Unknown => "unknown",
        }
    }

    /// Statuses in which the tenant keeps paid access
    pub fn is_billable(&self) -> bool {
        matches!(self, Self::Trialing | Self::Active | Self::PastDue)
    }

    pub fn is_non_billable(&self) -> bool {
        matches!(
            self,
            Self::Canceled | Self::Unpaid | Self::Incomplete | Self::IncompleteExpired | Self::Paused
        )
    }

    /// Statuses the orchestrator treats as an existing subscription to modify
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Active
                | Self::Trialing
                | Self::PastDue
                | Self::Unpaid
                | Self::Incomplete
                | Self::Paused
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSubscriptionItem {
    pub id: String,
    pub price: RemotePrice,
    #[serde(default)]
    pub quantity: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<RemoteSubscriptionItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSubscription {
    pub id: String,
    #[serde(default)]
    pub customer: String,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub current_period_start: i64,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub items: SubscriptionItems,
    #[serde(default)]
    pub latest_invoice: Option<Expandable<RemoteInvoice>>,
}

impl RemoteSubscription {
    pub fn price_ids(&self) -> Vec<&str> {
        self.items.data.iter().map(|i| i.price.id.as_str()).collect()
    }

    /// Item carrying the base price: the first item not tagged as an add-on,
    /// else the first item
    pub fn base_item(&self) -> Option<&RemoteSubscriptionItem> {
        self.items
            .data
            .iter()
            .find(|item| !item.price.kind().is_some_and(|k| k.is_extra()))
            .or_else(|| self.items.data.first())
    }

    pub fn item_of_kind(&self, kind: PriceKind) -> Option<&RemoteSubscriptionItem> {
        self.items
            .data
            .iter()
            .find(|item| item.price.kind() == Some(kind))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteInvoice {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub hosted_invoice_url: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub amount_due: i64,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub invoice_pdf: Option<String>,
}

impl RemoteInvoice {
    pub fn is_draft(&self) -> bool {
        self.status.as_deref() == Some("draft")
    }
}

/// Invoice status filter for listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
    Draft,
    Open,
    Paid,
    Uncollectible,
    Void,
}

impl InvoiceState {
    pub const ALL: [Self; 5] = [
        Self::Draft,
        Self::Open,
        Self::Paid,
        Self::Uncollectible,
        Self::Void,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::Paid => "paid",
            Self::Uncollectible => "uncollectible",
            Self::Void => "void",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCustomerRef {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub last4: String,
    #[serde(default)]
    pub exp_month: u32,
    #[serde(default)]
    pub exp_year: u32,
}

/// Saved payment method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePaymentMethod {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub customer: Option<Expandable<RemoteCustomerRef>>,
    #[serde(default)]
    pub card: Option<CardDetails>,
}

impl RemotePaymentMethod {
    pub fn customer_id(&self) -> Option<&str> {
        self.customer.as_ref().map(Expandable::<RemoteCustomerRef>::id)
    }
}

/// Off-session setup intent backing the card collection form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSetupIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Hosted checkout or portal session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemotePortalConfiguration {
    pub id: String,
    #[serde(default)]
    pub active: bool,
}

/// Payment method configuration; each method appears as a top-level object
/// such as `"pix": {"available": true, ...}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemotePaymentMethodConfiguration {
    pub id: String,
    #[serde(default)]
    pub active: bool,
    #[serde(flatten)]
    pub methods: HashMap<String, Value>,
}

impl RemotePaymentMethodConfiguration {
    pub fn available_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self
            .methods
            .iter()
            .filter(|(_, value)| value.get("available").and_then(Value::as_bool) == Some(true))
            .map(|(name, _)| name.clone())
            .collect();
        methods.sort();
        methods
    }
}

// =============================================================================
// Request parameters
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductParams {
    pub name: String,
    /// `Some("")` clears the description; creation omits empty descriptions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub active: bool,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPrice {
    pub product: String,
    pub unit_amount: i64,
    pub currency: String,
    pub nickname: String,
    pub recurring: Recurring,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shipping {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub address: PostalAddress,
}

/// Full customer mirror payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerPayload {
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<PostalAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping: Option<Shipping>,
}

/// One entry of an incremental subscription item list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ItemUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
}

impl ItemUpdate {
    /// Set `price` and `quantity` on an existing item, or add a new one
    pub fn upsert(existing: Option<&str>, price: &str, quantity: u64) -> Self {
        Self {
            id: existing.map(str::to_string),
            price: Some(price.to_string()),
            quantity: Some(quantity),
            deleted: None,
        }
    }

    pub fn delete(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            deleted: Some(true),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PaymentSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_default_payment_method: Option<String>,
}

/// Subscription modification; unset fields are left untouched remotely
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubscriptionUpdate {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ItemUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proration_behavior: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_until_due: Option<u32>,
    /// `Some("")` clears the default payment method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_payment_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_settings: Option<PaymentSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_cycle_anchor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_at_period_end: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expand: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItem {
    pub price: String,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSubscriptionData {
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutCustomerUpdate {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toggle {
    pub enabled: bool,
}

/// Hosted checkout session in subscription mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSessionParams {
    pub mode: String,
    pub customer: String,
    pub line_items: Vec<LineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub subscription_data: CheckoutSubscriptionData,
    pub customer_update: CheckoutCustomerUpdate,
    pub billing_address_collection: String,
    pub phone_number_collection: Toggle,
    pub automatic_tax: Toggle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_configuration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionUpdateConfirm {
    pub subscription: String,
    pub items: Vec<ItemUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortalFlow {
    #[serde(rename = "type")]
    pub kind: String,
    pub subscription_update_confirm: SubscriptionUpdateConfirm,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortalSessionParams {
    pub customer: String,
    pub return_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_data: Option<PortalFlow>,
}

// =============================================================================
// Gateway trait
// =============================================================================

/// Remote billing operations.
///
/// Retrieval of products and prices returns `Ok(None)` for objects that are
/// missing or deleted remotely. Every mutating call that can be replayed takes
/// an explicit idempotency key.
pub trait BillingGateway: Clone + Send + Sync + 'static {
    // Products

    fn retrieve_product(
        &self,
        id: &str,
    ) -> impl Future<Output = BillingResult<Option<RemoteProduct>>> + Send;

    fn create_product(
        &self,
        params: &ProductParams,
        idempotency_key: String,
    ) -> impl Future<Output = BillingResult<RemoteProduct>> + Send;

    fn update_product(
        &self,
        id: &str,
        params: &ProductParams,
        idempotency_key: String,
    ) -> impl Future<Output = BillingResult<RemoteProduct>> + Send;

    fn set_default_price(
        &self,
        product_id: &str,
        price_id: &str,
        idempotency_key: String,
    ) -> impl Future<Output = BillingResult<()>> + Send;

    fn archive_product(&self, id: &str) -> impl Future<Output = BillingResult<()>> + Send;

    fn delete_product(&self, id: &str) -> impl Future<Output = BillingResult<()>> + Send;

    // Prices

    fn retrieve_price(
        &self,
        id: &str,
    ) -> impl Future<Output = BillingResult<Option<RemotePrice>>> + Send;

    fn create_price(
        &self,
        params: &NewPrice,
        idempotency_key: String,
    ) -> impl Future<Output = BillingResult<RemotePrice>> + Send;

    fn update_price_nickname(
        &self,
        id: &str,
        nickname: &str,
        idempotency_key: String,
    ) -> impl Future<Output = BillingResult<()>> + Send;

    fn deactivate_price(
        &self,
        id: &str,
        idempotency_key: String,
    ) -> impl Future<Output = BillingResult<()>> + Send;

    fn activate_price(
        &self,
        id: &str,
        idempotency_key: String,
    ) -> impl Future<Output = BillingResult<()>> + Send;

    /// Every price of a product, all pages
    fn list_prices(
        &self,
        product_id: &str,
    ) -> impl Future<Output = BillingResult<Vec<RemotePrice>>> + Send;

    // Customers

    /// Returns the new customer id
    fn create_customer(
        &self,
        payload: &CustomerPayload,
        idempotency_key: String,
    ) -> impl Future<Output = BillingResult<String>> + Send;

    fn update_customer(
        &self,
        id: &str,
        payload: &CustomerPayload,
    ) -> impl Future<Output = BillingResult<()>> + Send;

    fn delete_customer(&self, id: &str) -> impl Future<Output = BillingResult<()>> + Send;

    fn clear_customer_default_payment_method(
        &self,
        id: &str,
    ) -> impl Future<Output = BillingResult<()>> + Send;

    /// `invoice_settings.default_payment_method` of a customer
    fn customer_default_payment_method(
        &self,
        id: &str,
    ) -> impl Future<Output = BillingResult<Option<String>>> + Send;

    fn set_customer_default_payment_method(
        &self,
        id: &str,
        payment_method_id: &str,
    ) -> impl Future<Output = BillingResult<()>> + Send;

    // Payment methods

    /// Setup intent for off-session use with automatic payment methods
    fn create_setup_intent(
        &self,
        customer_id: &str,
    ) -> impl Future<Output = BillingResult<RemoteSetupIntent>> + Send;

    /// Card payment methods of a customer, all pages
    fn list_card_payment_methods(
        &self,
        customer_id: &str,
    ) -> impl Future<Output = BillingResult<Vec<RemotePaymentMethod>>> + Send;

    fn retrieve_payment_method(
        &self,
        id: &str,
    ) -> impl Future<Output = BillingResult<RemotePaymentMethod>> + Send;

    fn attach_payment_method(
        &self,
        id: &str,
        customer_id: &str,
    ) -> impl Future<Output = BillingResult<RemotePaymentMethod>> + Send;

    fn detach_payment_method(&self, id: &str) -> impl Future<Output = BillingResult<()>> + Send;

    // Subscriptions

    fn retrieve_subscription(
        &self,
        id: &str,
    ) -> impl Future<Output = BillingResult<RemoteSubscription>> + Send;

    /// Subscriptions of a customer in any status
    fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> impl Future<Output = BillingResult<Vec<RemoteSubscription>>> + Send;

    fn update_subscription(
        &self,
        id: &str,
        params: &SubscriptionUpdate,
    ) -> impl Future<Output = BillingResult<RemoteSubscription>> + Send;

    /// Cancel immediately
    fn cancel_subscription(
        &self,
        id: &str,
    ) -> impl Future<Output = BillingResult<RemoteSubscription>> + Send;

    // Invoices

    /// Invoices of a customer, newest first, all pages; `None` lists every status
    fn list_invoices(
        &self,
        customer_id: &str,
        state: Option<InvoiceState>,
    ) -> impl Future<Output = BillingResult<Vec<RemoteInvoice>>> + Send;

    fn retrieve_invoice(
        &self,
        id: &str,
    ) -> impl Future<Output = BillingResult<RemoteInvoice>> + Send;

    fn finalize_invoice(
        &self,
        id: &str,
    ) -> impl Future<Output = BillingResult<RemoteInvoice>> + Send;

    fn void_invoice(&self, id: &str) -> impl Future<Output = BillingResult<()>> + Send;

    fn delete_invoice(&self, id: &str) -> impl Future<Output = BillingResult<()>> + Send;

    fn clear_invoice_default_payment_method(
        &self,
        id: &str,
    ) -> impl Future<Output = BillingResult<()>> + Send;

    fn send_invoice(&self, id: &str) -> impl Future<Output = BillingResult<RemoteInvoice>> + Send;

    // Hosted pages

    fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams,
    ) -> impl Future<Output = BillingResult<RemoteSession>> + Send;

    fn list_portal_configurations(
        &self,
    ) -> impl Future<Output = BillingResult<Vec<RemotePortalConfiguration>>> + Send;

    fn create_portal_session(
        &self,
        params: &PortalSessionParams,
    ) -> impl Future<Output = BillingResult<RemoteSession>> + Send;

    fn list_payment_method_configurations(
        &self,
    ) -> impl Future<Output = BillingResult<Vec<RemotePaymentMethodConfiguration>>> + Send;
}
