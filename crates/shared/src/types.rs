//! Common types used across Starchat

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Plan ID wrapper
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PlanId(pub i64);

impl From<i64> for PlanId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PlanId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Account ID wrapper
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct AccountId(pub i64);

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// Address ID wrapper
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct AddressId(pub i64);

impl fmt::Display for AddressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Account access status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Suspended,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

/// Recurring billing interval, serialized the way the billing provider spells it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Month,
    Year,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Adjective used in price nicknames
    pub fn adjective(&self) -> &'static str {
        match self {
            Self::Month => "Monthly",
            Self::Year => "Yearly",
        }
    }
}

impl fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "month" | "monthly" => Ok(Self::Month),
            "year" | "yearly" | "annual" => Ok(Self::Year),
            other => Err(format!("invalid billing interval: {other}")),
        }
    }
}

/// What a remote price charges for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceKind {
    Base,
    ExtraAgent,
    ExtraInbox,
}

impl PriceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::ExtraAgent => "extra_agent",
            Self::ExtraInbox => "extra_inbox",
        }
    }

    pub fn is_extra(&self) -> bool {
        !matches!(self, Self::Base)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "base" => Some(Self::Base),
            "extra_agent" => Some(Self::ExtraAgent),
            "extra_inbox" => Some(Self::ExtraInbox),
            _ => None,
        }
    }
}

impl fmt::Display for PriceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billable seat category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatKind {
    Agents,
    Inboxes,
}

impl SeatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agents => "agents",
            Self::Inboxes => "inboxes",
        }
    }
}

impl fmt::Display for SeatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Plan
// =============================================================================

/// One of the six remote price slots a plan owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceSlot {
    MonthlyBase,
    YearlyBase,
    ExtraAgentMonthly,
    ExtraAgentYearly,
    ExtraInboxMonthly,
    ExtraInboxYearly,
}

impl PriceSlot {
    /// Sync order: base prices first so the default price exists early
    pub const ALL: [PriceSlot; 6] = [
        PriceSlot::MonthlyBase,
        PriceSlot::YearlyBase,
        PriceSlot::ExtraAgentMonthly,
        PriceSlot::ExtraAgentYearly,
        PriceSlot::ExtraInboxMonthly,
        PriceSlot::ExtraInboxYearly,
    ];

    pub fn kind(&self) -> PriceKind {
        match self {
            Self::MonthlyBase | Self::YearlyBase => PriceKind::Base,
            Self::ExtraAgentMonthly | Self::ExtraAgentYearly => PriceKind::ExtraAgent,
            Self::ExtraInboxMonthly | Self::ExtraInboxYearly => PriceKind::ExtraInbox,
        }
    }

    pub fn interval(&self) -> BillingInterval {
        match self {
            Self::MonthlyBase | Self::ExtraAgentMonthly | Self::ExtraInboxMonthly => {
                BillingInterval::Month
            }
            Self::YearlyBase | Self::ExtraAgentYearly | Self::ExtraInboxYearly => {
                BillingInterval::Year
            }
        }
    }

    /// Column holding the slot's price id
    pub fn column(&self) -> &'static str {
        match self {
            Self::MonthlyBase => "monthly_price_id",
            Self::YearlyBase => "yearly_price_id",
            Self::ExtraAgentMonthly => "extra_agent_price_id",
            Self::ExtraAgentYearly => "extra_agent_price_id_yearly",
            Self::ExtraInboxMonthly => "extra_inbox_price_id",
            Self::ExtraInboxYearly => "extra_inbox_price_id_yearly",
        }
    }

    pub fn for_kind(kind: PriceKind, interval: BillingInterval) -> Self {
        match (kind, interval) {
            (PriceKind::Base, BillingInterval::Month) => Self::MonthlyBase,
            (PriceKind::Base, BillingInterval::Year) => Self::YearlyBase,
            (PriceKind::ExtraAgent, BillingInterval::Month) => Self::ExtraAgentMonthly,
            (PriceKind::ExtraAgent, BillingInterval::Year) => Self::ExtraAgentYearly,
            (PriceKind::ExtraInbox, BillingInterval::Month) => Self::ExtraInboxMonthly,
            (PriceKind::ExtraInbox, BillingInterval::Year) => Self::ExtraInboxYearly,
        }
    }
}

/// Remote price identifiers cached on a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPriceIds {
    pub monthly: Option<String>,
    pub yearly: Option<String>,
    pub extra_agent_monthly: Option<String>,
    pub extra_agent_yearly: Option<String>,
    pub extra_inbox_monthly: Option<String>,
    pub extra_inbox_yearly: Option<String>,
}

impl PlanPriceIds {
    pub fn get(&self, slot: PriceSlot) -> Option<&str> {
        match slot {
            PriceSlot::MonthlyBase => self.monthly.as_deref(),
            PriceSlot::YearlyBase => self.yearly.as_deref(),
            PriceSlot::ExtraAgentMonthly => self.extra_agent_monthly.as_deref(),
            PriceSlot::ExtraAgentYearly => self.extra_agent_yearly.as_deref(),
            PriceSlot::ExtraInboxMonthly => self.extra_inbox_monthly.as_deref(),
            PriceSlot::ExtraInboxYearly => self.extra_inbox_yearly.as_deref(),
        }
    }

    pub fn set(&mut self, slot: PriceSlot, value: Option<String>) {
        let field = match slot {
            PriceSlot::MonthlyBase => &mut self.monthly,
            PriceSlot::YearlyBase => &mut self.yearly,
            PriceSlot::ExtraAgentMonthly => &mut self.extra_agent_monthly,
            PriceSlot::ExtraAgentYearly => &mut self.extra_agent_yearly,
            PriceSlot::ExtraInboxMonthly => &mut self.extra_inbox_monthly,
            PriceSlot::ExtraInboxYearly => &mut self.extra_inbox_yearly,
        };
        *field = value;
    }

    /// Slot currently holding `price_id`, if any
    pub fn slot_of(&self, price_id: &str) -> Option<PriceSlot> {
        PriceSlot::ALL
            .into_iter()
            .find(|slot| self.get(*slot) == Some(price_id))
    }

    /// Every stored price id
    pub fn all(&self) -> Vec<&str> {
        PriceSlot::ALL
            .iter()
            .filter_map(|slot| self.get(*slot))
            .collect()
    }
}

/// Pricing tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub included_agents: i32,
    pub included_inboxes: i32,
    pub monthly_price_cents: i64,
    pub yearly_price_cents: i64,
    #[serde(default)]
    pub extra_agent_price_cents: i64,
    #[serde(default)]
    pub extra_inbox_price_cents: i64,
    #[serde(default)]
    pub extra_agent_yearly_price_cents: Option<i64>,
    #[serde(default)]
    pub extra_inbox_yearly_price_cents: Option<i64>,
    pub is_active: bool,
    pub is_plan_staff: bool,
    pub is_favorite: bool,
    pub requires_payment: bool,
    pub stripe_product_id: Option<String>,
    #[serde(default)]
    pub prices: PlanPriceIds,
}

/// Name of the internal plan that is never billed
pub const ADMIN_PLAN_NAME: &str = "admin";

/// Name looked up first when resolving the free plan
pub const FREE_PLAN_NAME: &str = "free";

impl Plan {
    /// Internal bootstrap plan, exempt from remote sync
    pub fn is_admin(&self) -> bool {
        self.name == ADMIN_PLAN_NAME
    }

    pub fn is_free(&self) -> bool {
        !self.requires_payment
    }

    /// Target amount in cents for a price slot.
    ///
    /// Yearly extras fall back to twelve monthly units when no override is set.
    pub fn amount_cents(&self, slot: PriceSlot) -> i64 {
        match slot {
            PriceSlot::MonthlyBase => self.monthly_price_cents,
            PriceSlot::YearlyBase => self.yearly_price_cents,
            PriceSlot::ExtraAgentMonthly => self.extra_agent_price_cents,
            PriceSlot::ExtraAgentYearly => self
                .extra_agent_yearly_price_cents
                .unwrap_or(self.extra_agent_price_cents.saturating_mul(12)),
            PriceSlot::ExtraInboxMonthly => self.extra_inbox_price_cents,
            PriceSlot::ExtraInboxYearly => self
                .extra_inbox_yearly_price_cents
                .unwrap_or(self.extra_inbox_price_cents.saturating_mul(12)),
        }
    }

    pub fn price_id(&self, kind: PriceKind, interval: BillingInterval) -> Option<&str> {
        self.prices.get(PriceSlot::for_kind(kind, interval))
    }

    /// Agent add-on price ids across both intervals
    pub fn extra_agent_price_ids(&self) -> BTreeSet<&str> {
        [
            self.prices.extra_agent_monthly.as_deref(),
            self.prices.extra_agent_yearly.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Inbox add-on price ids across both intervals
    pub fn extra_inbox_price_ids(&self) -> BTreeSet<&str> {
        [
            self.prices.extra_inbox_monthly.as_deref(),
            self.prices.extra_inbox_yearly.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn included_seats(&self, kind: SeatKind) -> i32 {
        match kind {
            SeatKind::Agents => self.included_agents,
            SeatKind::Inboxes => self.included_inboxes,
        }
    }
}

/// Pick the plan new and downgraded accounts fall back to.
///
/// A plan literally named "free" (any case) wins, otherwise the first
/// non-staff plan that does not require payment.
pub fn select_free_plan(plans: &[Plan]) -> Option<&Plan> {
    plans
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(FREE_PLAN_NAME))
        .or_else(|| {
            plans
                .iter()
                .find(|p| !p.requires_payment && !p.is_plan_staff)
        })
}

/// Largest amount a single price may carry, in cents
pub const MAX_AMOUNT_CENTS: i64 = 99_999_999;

/// Parse a decimal amount ("49.90") into integer cents.
///
/// Negative amounts, more than two decimal places and anything above
/// [`MAX_AMOUNT_CENTS`] are rejected.
pub fn parse_amount_cents(value: &str) -> Option<i64> {
    let amount = Decimal::from_str(value.trim()).ok()?;
    if amount.is_sign_negative() || amount.scale() > 2 {
        return None;
    }
    amount
        .checked_mul(Decimal::ONE_HUNDRED)?
        .to_i64()
        .filter(|cents| *cents <= MAX_AMOUNT_CENTS)
}

// =============================================================================
// Account
// =============================================================================

/// Tenant record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub phone: Option<String>,
    pub plan_id: Option<PlanId>,
    pub extra_agents: i32,
    pub extra_inboxes: i32,
    pub status: AccountStatus,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Account {
    /// Fresh, unsaved account on the given plan
    pub fn new(email: impl Into<String>, plan_id: Option<PlanId>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: AccountId(0),
            email: email.into(),
            phone: None,
            plan_id,
            extra_agents: 0,
            extra_inboxes: 0,
            status: AccountStatus::Active,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn extra_seats(&self, kind: SeatKind) -> i32 {
        match kind {
            SeatKind::Agents => self.extra_agents,
            SeatKind::Inboxes => self.extra_inboxes,
        }
    }

    /// Total seat limit on `plan` (included plus purchased extras)
    pub fn seat_limit(&self, plan: &Plan, kind: SeatKind) -> i32 {
        plan.included_seats(kind).saturating_add(self.extra_seats(kind))
    }
}

/// Field-level change set applied to an account in one write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountChanges {
    pub status: Option<AccountStatus>,
    pub plan_id: Option<PlanId>,
    pub extra_agents: Option<i32>,
    pub extra_inboxes: Option<i32>,
    pub stripe_customer_id: Option<String>,
    /// `Some(None)` clears the stored subscription
    pub stripe_subscription_id: Option<Option<String>>,
}

impl AccountChanges {
    pub fn is_empty(&self) -> bool {
        self.touched_fields().is_empty()
    }

    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.status.is_some() {
            fields.push("status");
        }
        if self.plan_id.is_some() {
            fields.push("plan");
        }
        if self.extra_agents.is_some() {
            fields.push("extra_agents");
        }
        if self.extra_inboxes.is_some() {
            fields.push("extra_inboxes");
        }
        if self.stripe_customer_id.is_some() {
            fields.push("stripe_customer_id");
        }
        if self.stripe_subscription_id.is_some() {
            fields.push("stripe_subscription_id");
        }
        fields
    }

    pub fn apply_to(&self, account: &mut Account) {
        if let Some(status) = self.status {
            account.status = status;
        }
        if let Some(plan_id) = self.plan_id {
            account.plan_id = Some(plan_id);
        }
        if let Some(extra) = self.extra_agents {
            account.extra_agents = extra;
        }
        if let Some(extra) = self.extra_inboxes {
            account.extra_inboxes = extra;
        }
        if let Some(customer) = &self.stripe_customer_id {
            account.stripe_customer_id = Some(customer.clone());
        }
        if let Some(subscription) = &self.stripe_subscription_id {
            account.stripe_subscription_id = subscription.clone();
        }
    }
}

// =============================================================================
// Company / Address
// =============================================================================

/// Legal identity attached 1:1 to an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub account_id: AccountId,
    pub name: String,
    pub tax_id: Option<String>,
    pub company_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    #[default]
    Billing,
    Shipping,
}

impl AddressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Billing => "billing",
            Self::Shipping => "shipping",
        }
    }
}

impl FromStr for AddressKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "billing" => Ok(Self::Billing),
            "shipping" => Ok(Self::Shipping),
            other => Err(format!("unknown address kind: {other}")),
        }
    }
}

/// Postal address attached to an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub id: AddressId,
    pub account_id: AccountId,
    #[serde(default)]
    pub kind: AddressKind,
    #[serde(default)]
    pub is_default: bool,
    pub line1: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub neighborhood: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

/// Longest street line the billing provider accepts
const MAX_LINE1_LEN: usize = 500;

/// Address in the billing provider's shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    pub line1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl Address {
    /// Postal code formatted for the address country.
    ///
    /// Brazilian CEPs become `00000-000`; other countries only lose whitespace.
    pub fn normalized_postal_code(&self) -> String {
        let compact: String = self
            .postal_code
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        if self.country.eq_ignore_ascii_case("BR") {
            let digits: String = compact.chars().filter(|c| c.is_ascii_digit()).collect();
            if digits.len() == 8 {
                return format!("{}-{}", &digits[..5], &digits[5..]);
            }
        }
        compact
    }

    pub fn as_postal_address(&self) -> PostalAddress {
        let street = match self.number.as_deref().map(str::trim) {
            Some(number) if !number.is_empty() => format!("{} {}", self.line1.trim(), number),
            _ => self.line1.trim().to_string(),
        };
        let line1: String = street.trim().chars().take(MAX_LINE1_LEN).collect();

        let line2_parts: Vec<&str> = [self.neighborhood.as_deref(), self.line2.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        let line2 = if line2_parts.is_empty() {
            None
        } else {
            Some(line2_parts.join(", "))
        };

        PostalAddress {
            line1,
            line2,
            city: self.city.trim().to_string(),
            state: self.state.trim().to_string(),
            postal_code: self.normalized_postal_code(),
            country: self.country.trim().to_uppercase(),
        }
    }
}

/// Pick the address used for the remote customer: the default billing
/// address, else the first billing address on record
pub fn select_billing_address(addresses: &[Address]) -> Option<&Address> {
    addresses
        .iter()
        .find(|a| a.kind == AddressKind::Billing && a.is_default)
        .or_else(|| addresses.iter().find(|a| a.kind == AddressKind::Billing))
}

// =============================================================================
// Support platform link
// =============================================================================

/// Maps an account to its support-platform account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportLink {
    pub account_id: AccountId,
    pub support_account_id: i64,
    /// Owner user whose access token reads agents and inboxes
    pub support_user_id: Option<i64>,
}
