//! Plan subscription and cancellation orchestration
//!
//! Depending on the tenant's current state a request becomes a hosted
//! checkout, a portal plan-swap confirmation, an in-place card update or an
//! off-session invoice for boleto/pix. Account plan changes themselves are
//! applied later by the subscription projector from webhooks.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use starchat_shared::{
    free_plan, Account, AccountChanges, AccountId, BillingInterval, EntityStore, Plan, PlanId,
    PriceKind, SupportDirectory,
};

use crate::client::StripeConfig;
use crate::customer::CustomerSync;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    BillingGateway, CheckoutCustomerUpdate, CheckoutSessionParams, CheckoutSubscriptionData,
    ItemUpdate, LineItem, Metadata, PaymentSettings, PortalFlow, PortalSessionParams,
    RemoteSubscription, SubscriptionUpdate, SubscriptionUpdateConfirm, Toggle,
};
use crate::invoices;
use crate::portal::portal_configuration;
use crate::seats::{guard_seat_limits, SeatTotals};

/// How the tenant wants to pay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayMode {
    #[default]
    Card,
    Boleto,
    Pix,
    PixBoleto,
}

impl PayMode {
    /// Unknown modes fall back to card
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "boleto" => Self::Boleto,
            "pix" => Self::Pix,
            "pix_boleto" => Self::PixBoleto,
            _ => Self::Card,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Boleto => "boleto",
            Self::Pix => "pix",
            Self::PixBoleto => "pix_boleto",
        }
    }

    pub fn desired_methods(&self) -> &'static [&'static str] {
        match self {
            Self::Card => &["card"],
            Self::Boleto => &["boleto"],
            Self::Pix => &["pix"],
            Self::PixBoleto => &["pix", "boleto"],
        }
    }
}

/// When a cancellation takes effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelWhen {
    #[default]
    PeriodEnd,
    Now,
}

impl CancelWhen {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "now" => Self::Now,
            _ => Self::PeriodEnd,
        }
    }
}

/// Raw subscribe request as submitted by the tenant
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRequest {
    pub account_id: AccountId,
    pub plan_id: PlanId,
    #[serde(default)]
    pub interval: String,
    #[serde(default)]
    pub pay_mode: String,
    #[serde(default)]
    pub extra_agents: i64,
    #[serde(default)]
    pub extra_inboxes: i64,
    /// Saved card to charge for in-place card updates
    #[serde(default)]
    pub payment_method_id: Option<String>,
    /// Path the tenant is sent back to on failure
    #[serde(default)]
    pub return_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Warning,
    Error,
}

/// Message shown to the tenant after the redirect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Where to send the tenant next
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutOutcome {
    pub target: String,
    pub notice: Option<Notice>,
}

impl CheckoutOutcome {
    pub fn redirect(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            notice: None,
        }
    }

    fn with(target: impl Into<String>, level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            notice: Some(Notice {
                level,
                message: message.into(),
            }),
        }
    }

    pub fn success(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with(target, NoticeLevel::Success, message)
    }

    pub fn warning(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with(target, NoticeLevel::Warning, message)
    }

    pub fn error(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with(target, NoticeLevel::Error, message)
    }

    pub fn is_error(&self) -> bool {
        self.notice
            .as_ref()
            .is_some_and(|n| n.level == NoticeLevel::Error)
    }
}

/// Tenant-facing text for a failed request
pub fn user_message(err: &BillingError) -> String {
    match err {
        BillingError::SeatLimit { .. } => err.to_string(),
        BillingError::UsageUnavailable(kind) => {
            format!("Could not verify how many {kind} are in use. Try again later.")
        }
        BillingError::InvalidPlan(message) | BillingError::InvalidInput(message) => message.clone(),
        BillingError::AccountNotFound(_) => "Account not found.".to_string(),
        BillingError::Rejected { message, .. } => format!("Stripe rejected the request: {message}"),
        _ => "The billing provider is unavailable. Try again later.".to_string(),
    }
}

/// Methods usable for an off-session charge in `mode`, given what the account supports
pub fn allowed_methods(mode: PayMode, supported: &BTreeSet<String>) -> Vec<String> {
    let allowed: Vec<String> = mode
        .desired_methods()
        .iter()
        .filter(|m| supported.contains(**m))
        .map(|m| m.to_string())
        .collect();
    if !allowed.is_empty() {
        allowed
    } else if supported.contains("boleto") {
        vec!["boleto".to_string()]
    } else {
        vec!["card".to_string()]
    }
}

/// Validated subscribe request
#[derive(Debug, Clone)]
struct Selection {
    account: Account,
    plan: Plan,
    interval: BillingInterval,
    pay_mode: PayMode,
    extra_agents: i32,
    extra_inboxes: i32,
    base_price_id: String,
    payment_method_id: Option<String>,
}

impl Selection {
    fn has_extras(&self) -> bool {
        self.extra_agents > 0 || self.extra_inboxes > 0
    }

    fn extras(&self, kind: PriceKind) -> i32 {
        match kind {
            PriceKind::ExtraAgent => self.extra_agents,
            PriceKind::ExtraInbox => self.extra_inboxes,
            PriceKind::Base => 1,
        }
    }

    fn metadata(&self) -> Metadata {
        Metadata::from([
            ("account_id".to_string(), self.account.id.to_string()),
            ("selected_plan_id".to_string(), self.plan.id.to_string()),
            ("selected_interval".to_string(), self.interval.as_str().to_string()),
            ("extra_agents".to_string(), self.extra_agents.to_string()),
            ("extra_inboxes".to_string(), self.extra_inboxes.to_string()),
        ])
    }

    fn line_items(&self) -> Vec<LineItem> {
        let mut items = vec![LineItem {
            price: self.base_price_id.clone(),
            quantity: 1,
        }];
        for kind in [PriceKind::ExtraAgent, PriceKind::ExtraInbox] {
            let quantity = self.extras(kind);
            if let Some(price) = self.plan.price_id(kind, self.interval).filter(|_| quantity > 0) {
                items.push(LineItem {
                    price: price.to_string(),
                    quantity: quantity.unsigned_abs().into(),
                });
            }
        }
        items
    }

    /// Item changes turning `sub` into this selection
    fn incremental_items(&self, sub: &RemoteSubscription) -> Vec<ItemUpdate> {
        let base_item = sub.base_item().map(|i| i.id.as_str());
        let mut items = vec![ItemUpdate::upsert(base_item, &self.base_price_id, 1)];

        for kind in [PriceKind::ExtraAgent, PriceKind::ExtraInbox] {
            let existing = sub
                .item_of_kind(kind)
                .filter(|item| Some(item.id.as_str()) != base_item);
            let quantity = self.extras(kind);
            match self.plan.price_id(kind, self.interval) {
                Some(price) if quantity > 0 => items.push(ItemUpdate::upsert(
                    existing.map(|i| i.id.as_str()),
                    price,
                    quantity.unsigned_abs().into(),
                )),
                _ => {
                    if let Some(item) = existing {
                        items.push(ItemUpdate::delete(&item.id));
                    }
                }
            }
        }
        items
    }

    /// Whether the base item currently bills on another interval
    fn interval_changed(&self, sub: &RemoteSubscription) -> bool {
        sub.base_item()
            .and_then(|item| item.price.interval())
            .map_or(true, |current| current != self.interval.as_str())
    }

    fn billing_cycle_anchor(&self, sub: &RemoteSubscription) -> String {
        if self.interval_changed(sub) {
            "now".to_string()
        } else {
            "unchanged".to_string()
        }
    }
}

/// Drives subscribe and cancel requests against Stripe
#[derive(Debug, Clone)]
pub struct CheckoutOrchestrator<G, S, D> {
    gateway: G,
    store: S,
    support: D,
    config: StripeConfig,
}

impl<G, S, D> CheckoutOrchestrator<G, S, D>
where
    G: BillingGateway,
    S: EntityStore + Clone,
    D: SupportDirectory,
{
    pub fn new(gateway: G, store: S, support: D, config: StripeConfig) -> Self {
        Self {
            gateway,
            store,
            support,
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let path = path.trim_start_matches('/');
        format!("{}/{path}", self.config.app_base_url)
    }

    fn success_url(&self) -> String {
        self.url("/")
    }

    /// Handle a subscribe request. Failures become a redirect back to the
    /// request's return path with an error notice.
    pub async fn subscribe(&self, request: SubscribeRequest) -> CheckoutOutcome {
        let back = self.url(&request.return_path);
        match self.try_subscribe(&request, &back).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    account_id = %request.account_id,
                    plan_id = %request.plan_id,
                    error = %err,
                    "Subscription request failed"
                );
                CheckoutOutcome::error(back, user_message(&err))
            }
        }
    }

    async fn validate(&self, request: &SubscribeRequest) -> BillingResult<Selection> {
        let account = self
            .store
            .get_account(request.account_id)
            .await?
            .ok_or_else(|| BillingError::AccountNotFound(request.account_id.to_string()))?;

        let plan = self
            .store
            .get_plan(request.plan_id)
            .await?
            .filter(|p| p.is_active && !p.is_plan_staff)
            .ok_or_else(|| BillingError::InvalidPlan("Plan not found.".to_string()))?;
        if plan.is_free() {
            return Err(BillingError::InvalidPlan(
                "The free plan cannot be subscribed to.".to_string(),
            ));
        }

        let interval = match request.interval.trim() {
            "" | "month" => BillingInterval::Month,
            "year" => BillingInterval::Year,
            _ => return Err(BillingError::InvalidInput("Invalid interval.".to_string())),
        };

        let base_price_id = plan
            .price_id(PriceKind::Base, interval)
            .map(str::to_string)
            .ok_or_else(|| {
                BillingError::InvalidPlan(
                    "Base price unavailable for the chosen billing cycle.".to_string(),
                )
            })?;

        let clamp = |n: i64| i32::try_from(n.max(0)).unwrap_or(i32::MAX);
        Ok(Selection {
            account,
            plan,
            interval,
            pay_mode: PayMode::parse(&request.pay_mode),
            extra_agents: clamp(request.extra_agents),
            extra_inboxes: clamp(request.extra_inboxes),
            base_price_id,
            payment_method_id: request
                .payment_method_id
                .clone()
                .filter(|id| !id.trim().is_empty()),
        })
    }

    async fn try_subscribe(
        &self,
        request: &SubscribeRequest,
        back: &str,
    ) -> BillingResult<CheckoutOutcome> {
        let selection = self.validate(request).await?;

        let totals = SeatTotals {
            agents: selection
                .plan
                .included_agents
                .saturating_add(selection.extra_agents),
            inboxes: selection
                .plan
                .included_inboxes
                .saturating_add(selection.extra_inboxes),
        };
        guard_seat_limits(&self.support, selection.account.id, totals).await?;

        let customer_id = CustomerSync::new(self.gateway.clone(), self.store.clone())
            .ensure_customer(&selection.account)
            .await?;

        let live = self.find_live_subscription(&customer_id).await?;
        let Some(sub) = live else {
            return self.start_checkout(&selection, &customer_id).await;
        };

        if selection.pay_mode == PayMode::Card {
            self.update_with_card(&selection, &customer_id, &sub).await
        } else {
            self.update_with_invoice(&selection, &customer_id, &sub, back)
                .await
        }
    }

    /// Latest live subscription; any other live ones are set to end with their period
    async fn find_live_subscription(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<RemoteSubscription>> {
        let mut live: Vec<RemoteSubscription> = self
            .gateway
            .list_subscriptions(customer_id)
            .await?
            .into_iter()
            .filter(|s| s.status.is_live())
            .collect();
        live.sort_by(|a, b| b.current_period_start.cmp(&a.current_period_start));

        for extra in live.iter().skip(1) {
            let params = SubscriptionUpdate {
                cancel_at_period_end: Some(true),
                proration_behavior: Some("none".to_string()),
                ..Default::default()
            };
            if let Err(err) = self.gateway.update_subscription(&extra.id, &params).await {
                tracing::warn!(subscription_id = %extra.id, error = %err, "Could not schedule duplicate subscription cancellation");
            }
        }
        Ok(live.into_iter().next())
    }

    // -------------------------------------------------------------------------
    // New subscription through hosted checkout
    // -------------------------------------------------------------------------

    async fn start_checkout(
        &self,
        selection: &Selection,
        customer_id: &str,
    ) -> BillingResult<CheckoutOutcome> {
        match self
            .create_checkout(selection, customer_id, selection.pay_mode)
            .await
        {
            Ok(url) => Ok(CheckoutOutcome::redirect(url)),
            Err(err)
                if selection.pay_mode != PayMode::Card
                    && err
                        .rejection_message()
                        .is_some_and(|m| m.contains("payment_method")) =>
            {
                tracing::info!(
                    account_id = %selection.account.id,
                    pay_mode = selection.pay_mode.as_str(),
                    error = %err,
                    "Payment method rejected at checkout; retrying with card"
                );
                let url = self
                    .create_checkout(selection, customer_id, PayMode::Card)
                    .await?;
                Ok(CheckoutOutcome::warning(
                    url,
                    "The chosen payment method is not enabled. Checkout was opened with card.",
                ))
            }
            Err(err) => Err(err),
        }
    }

    async fn create_checkout(
        &self,
        selection: &Selection,
        customer_id: &str,
        mode: PayMode,
    ) -> BillingResult<String> {
        let fallback_types: Vec<String> = mode
            .desired_methods()
            .iter()
            .filter(|m| self.config.allows_method(m))
            .map(|m| m.to_string())
            .collect();
        let card_only = fallback_types == ["card"];
        let configuration = self
            .config
            .payment_method_configurations
            .for_mode(mode)
            .map(str::to_string);

        let params = CheckoutSessionParams {
            mode: "subscription".to_string(),
            customer: customer_id.to_string(),
            line_items: selection.line_items(),
            success_url: self.success_url(),
            cancel_url: self.success_url(),
            subscription_data: CheckoutSubscriptionData {
                metadata: selection.metadata(),
            },
            customer_update: CheckoutCustomerUpdate {
                name: "auto".to_string(),
                address: "auto".to_string(),
            },
            billing_address_collection: if card_only { "auto" } else { "required" }.to_string(),
            phone_number_collection: Toggle { enabled: !card_only },
            automatic_tax: Toggle { enabled: false },
            payment_method_types: if configuration.is_none() && !fallback_types.is_empty() {
                Some(fallback_types)
            } else {
                None
            },
            payment_method_configuration: configuration,
        };

        let session = self.gateway.create_checkout_session(&params).await?;
        tracing::info!(
            account_id = %selection.account.id,
            session_id = %session.id,
            pay_mode = mode.as_str(),
            "Created checkout session"
        );
        session
            .url
            .ok_or_else(|| BillingError::StripeApi("checkout session without url".to_string()))
    }

    // -------------------------------------------------------------------------
    // Existing subscription paid by card
    // -------------------------------------------------------------------------

    async fn update_with_card(
        &self,
        selection: &Selection,
        customer_id: &str,
        sub: &RemoteSubscription,
    ) -> BillingResult<CheckoutOutcome> {
        if sub.items.data.len() == 1 && !selection.has_extras() {
            let metadata_only = SubscriptionUpdate {
                metadata: Some(selection.metadata()),
                ..Default::default()
            };
            if let Err(err) = self.gateway.update_subscription(&sub.id, &metadata_only).await {
                tracing::warn!(subscription_id = %sub.id, error = %err, "Could not write selection metadata");
            }

            if let Some(configuration) = portal_configuration(&self.gateway, &self.config).await {
                let params = PortalSessionParams {
                    customer: customer_id.to_string(),
                    return_url: self.success_url(),
                    configuration: Some(configuration),
                    flow_data: Some(PortalFlow {
                        kind: "subscription_update_confirm".to_string(),
                        subscription_update_confirm: SubscriptionUpdateConfirm {
                            subscription: sub.id.clone(),
                            items: vec![ItemUpdate::upsert(
                                sub.base_item().map(|i| i.id.as_str()),
                                &selection.base_price_id,
                                1,
                            )],
                        },
                    }),
                };
                let session = self.gateway.create_portal_session(&params).await?;
                let url = session.url.ok_or_else(|| {
                    BillingError::StripeApi("portal session without url".to_string())
                })?;
                return Ok(CheckoutOutcome::redirect(url));
            }
        }

        let params = SubscriptionUpdate {
            items: selection.incremental_items(sub),
            proration_behavior: Some("create_prorations".to_string()),
            collection_method: Some("charge_automatically".to_string()),
            payment_settings: Some(PaymentSettings {
                save_default_payment_method: Some("on_subscription".to_string()),
                ..Default::default()
            }),
            default_payment_method: selection.payment_method_id.clone(),
            metadata: Some(selection.metadata()),
            billing_cycle_anchor: Some(selection.billing_cycle_anchor(sub)),
            ..Default::default()
        };
        self.gateway.update_subscription(&sub.id, &params).await?;

        tracing::info!(
            account_id = %selection.account.id,
            subscription_id = %sub.id,
            plan_id = %selection.plan.id,
            "Updated subscription in place"
        );
        Ok(CheckoutOutcome::success(
            self.success_url(),
            "Plan updated. Charges will be made automatically to the card.",
        ))
    }

    // -------------------------------------------------------------------------
    // Existing subscription paid by boleto/pix invoice
    // -------------------------------------------------------------------------

    async fn supported_methods(&self) -> BTreeSet<String> {
        let mut supported = BTreeSet::new();
        match self.gateway.list_payment_method_configurations().await {
            Ok(configs) => {
                for config in configs.iter().filter(|c| c.active) {
                    supported.extend(config.available_methods());
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "Could not list payment method configurations")
            }
        }
        if supported.is_empty() {
            supported.extend(self.config.allowed_payment_method_types.iter().cloned());
        }
        supported
    }

    async fn clear_customer_payment_method(&self, customer_id: &str) {
        if let Err(err) = self
            .gateway
            .clear_customer_default_payment_method(customer_id)
            .await
        {
            tracing::debug!(customer_id = %customer_id, error = %err, "Could not clear customer payment method");
        }
    }

    async fn update_with_invoice(
        &self,
        selection: &Selection,
        customer_id: &str,
        sub: &RemoteSubscription,
        back: &str,
    ) -> BillingResult<CheckoutOutcome> {
        let supported = self.supported_methods().await;
        let allowed = allowed_methods(selection.pay_mode, &supported);
        let due_days = if allowed.iter().any(|m| m == "boleto") { 3 } else { 1 };

        let switch = SubscriptionUpdate {
            collection_method: Some("send_invoice".to_string()),
            days_until_due: Some(due_days),
            default_payment_method: Some(String::new()),
            ..Default::default()
        };
        self.gateway.update_subscription(&sub.id, &switch).await?;
        self.clear_customer_payment_method(customer_id).await;

        let mut params = SubscriptionUpdate {
            items: selection.incremental_items(sub),
            proration_behavior: Some("create_prorations".to_string()),
            collection_method: Some("send_invoice".to_string()),
            days_until_due: Some(due_days),
            default_payment_method: Some(String::new()),
            payment_settings: Some(PaymentSettings {
                payment_method_types: Some(allowed.clone()),
                ..Default::default()
            }),
            metadata: Some(selection.metadata()),
            billing_cycle_anchor: Some(selection.billing_cycle_anchor(sub)),
            expand: vec!["latest_invoice".to_string()],
            ..Default::default()
        };

        let mut notice = None;
        let updated = match self.gateway.update_subscription(&sub.id, &params).await {
            Ok(updated) => updated,
            Err(err) => {
                let message = err.rejection_message().unwrap_or_default();
                if message.contains("payment_method_types") && allowed.iter().any(|m| m == "pix") {
                    params.payment_settings = Some(PaymentSettings {
                        payment_method_types: Some(vec!["boleto".to_string()]),
                        ..Default::default()
                    });
                    params.days_until_due = Some(3);
                    notice = Some(
                        "PIX is not enabled for this account. Boleto was used to complete the update.",
                    );
                    self.gateway.update_subscription(&sub.id, &params).await?
                } else if message.contains("default_payment_method") {
                    let clear = SubscriptionUpdate {
                        default_payment_method: Some(String::new()),
                        ..Default::default()
                    };
                    if let Err(err) = self.gateway.update_subscription(&sub.id, &clear).await {
                        tracing::debug!(subscription_id = %sub.id, error = %err, "Could not clear subscription payment method");
                    }
                    self.clear_customer_payment_method(customer_id).await;
                    self.gateway.update_subscription(&sub.id, &params).await?
                } else {
                    return Err(err);
                }
            }
        };

        let Some(invoice_id) = updated.latest_invoice.as_ref().map(|i| i.id().to_string()) else {
            return Ok(CheckoutOutcome::error(
                back,
                "Could not obtain the invoice for this update.",
            ));
        };

        match invoices::finalize_and_send(&self.gateway, customer_id, &invoice_id).await? {
            Some(url) => Ok(match notice {
                Some(message) => CheckoutOutcome::warning(url, message),
                None => CheckoutOutcome::redirect(url),
            }),
            None => Ok(CheckoutOutcome::error(
                back,
                "Could not generate the invoice payment link.",
            )),
        }
    }

    // -------------------------------------------------------------------------
    // Cancellation
    // -------------------------------------------------------------------------

    /// Cancel the account's live subscription at period end or immediately
    pub async fn cancel(&self, account_id: AccountId, when: CancelWhen) -> CheckoutOutcome {
        match self.try_cancel(account_id, when).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(account_id = %account_id, error = %err, "Cancellation failed");
                CheckoutOutcome::error(self.success_url(), user_message(&err))
            }
        }
    }

    async fn try_cancel(&self, account_id: AccountId, when: CancelWhen) -> BillingResult<CheckoutOutcome> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| BillingError::AccountNotFound(account_id.to_string()))?;

        let current = match account.plan_id {
            Some(plan_id) => self.store.get_plan(plan_id).await?,
            None => None,
        };
        if current.as_ref().map_or(true, |p| p.is_plan_staff || p.is_free()) {
            return Ok(CheckoutOutcome::warning(
                self.success_url(),
                "No active subscription found.",
            ));
        }

        let free = free_plan(&self.store).await?;
        if let Some(free) = &free {
            let totals = SeatTotals {
                agents: free.included_agents,
                inboxes: free.included_inboxes,
            };
            guard_seat_limits(&self.support, account.id, totals).await?;
        }

        let customer_id = account
            .stripe_customer_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                BillingError::InvalidInput("Stripe customer not found for this account.".to_string())
            })?;
        let sub = self
            .subscription_to_cancel(&account, &customer_id)
            .await?
            .ok_or_else(|| {
                BillingError::InvalidInput(
                    "No active subscription found for this customer.".to_string(),
                )
            })?;

        match when {
            CancelWhen::PeriodEnd => {
                let params = SubscriptionUpdate {
                    cancel_at_period_end: Some(true),
                    ..Default::default()
                };
                self.gateway.update_subscription(&sub.id, &params).await?;
                tracing::info!(account_id = %account.id, subscription_id = %sub.id, "Scheduled cancellation at period end");
                Ok(CheckoutOutcome::success(
                    self.success_url(),
                    "Cancellation scheduled for the end of the current period. Access remains until the renewal date.",
                ))
            }
            CancelWhen::Now => {
                self.gateway.cancel_subscription(&sub.id).await?;
                let changes = AccountChanges {
                    plan_id: free.as_ref().map(|p| p.id),
                    extra_agents: Some(0),
                    extra_inboxes: Some(0),
                    stripe_subscription_id: (account.stripe_subscription_id.as_deref()
                        == Some(sub.id.as_str()))
                    .then_some(None),
                    ..Default::default()
                };
                self.store.apply_account_changes(account.id, &changes).await?;
                tracing::info!(account_id = %account.id, subscription_id = %sub.id, "Canceled subscription immediately");
                Ok(CheckoutOutcome::success(
                    self.success_url(),
                    "Subscription canceled immediately.",
                ))
            }
        }
    }

    /// Stored subscription when still live, else the latest live one of the customer
    async fn subscription_to_cancel(
        &self,
        account: &Account,
        customer_id: &str,
    ) -> BillingResult<Option<RemoteSubscription>> {
        if let Some(stored) = account.stripe_subscription_id.as_deref() {
            match self.gateway.retrieve_subscription(stored).await {
                Ok(sub) if sub.status.is_live() && sub.customer == customer_id => {
                    return Ok(Some(sub))
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(subscription_id = %stored, error = %err, "Stored subscription not usable")
                }
            }
        }

        let mut live: Vec<RemoteSubscription> = self
            .gateway
            .list_subscriptions(customer_id)
            .await?
            .into_iter()
            .filter(|s| s.status.is_live())
            .collect();
        live.sort_by(|a, b| b.current_period_start.cmp(&a.current_period_start));
        Ok(live.into_iter().next())
    }
}
