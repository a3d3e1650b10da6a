//! Plan administration

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use starchat_billing::{DomainEvent, Outbox};
use starchat_shared::{parse_amount_cents, EntityStore, MAX_AMOUNT_CENTS, Plan, PlanId, PlanPriceIds};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Plan fields editable by operators. Amounts are decimal strings ("49.90").
#[derive(Debug, Clone, Deserialize)]
pub struct PlanInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub included_agents: i32,
    #[serde(default)]
    pub included_inboxes: i32,
    pub monthly_price: String,
    pub yearly_price: String,
    #[serde(default)]
    pub extra_agent_price: Option<String>,
    #[serde(default)]
    pub extra_inbox_price: Option<String>,
    #[serde(default)]
    pub extra_agent_yearly_price: Option<String>,
    #[serde(default)]
    pub extra_inbox_yearly_price: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_plan_staff: bool,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default = "default_true")]
    pub requires_payment: bool,
}

fn default_true() -> bool {
    true
}

fn cents(field: &str, value: &str) -> ApiResult<i64> {
    parse_amount_cents(value)
        .ok_or_else(|| {
            ApiError::Validation(format!(
                "{field} must be a non-negative amount with at most two decimals, up to {}.{:02}",
                MAX_AMOUNT_CENTS / 100,
                MAX_AMOUNT_CENTS % 100
            ))
        })
}

fn optional_cents(field: &str, value: Option<&str>) -> ApiResult<Option<i64>> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| cents(field, v))
        .transpose()
}

impl PlanInput {
    /// Apply the input over `base`, keeping its id and remote identifiers
    pub fn apply(&self, base: &Plan) -> ApiResult<Plan> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ApiError::Validation("name is required".to_string()));
        }
        if self.included_agents < 0 || self.included_inboxes < 0 {
            return Err(ApiError::Validation(
                "included seats cannot be negative".to_string(),
            ));
        }

        Ok(Plan {
            name: name.to_string(),
            description: self.description.trim().to_string(),
            included_agents: self.included_agents,
            included_inboxes: self.included_inboxes,
            monthly_price_cents: cents("monthly_price", &self.monthly_price)?,
            yearly_price_cents: cents("yearly_price", &self.yearly_price)?,
            extra_agent_price_cents: optional_cents(
                "extra_agent_price",
                self.extra_agent_price.as_deref(),
            )?
            .unwrap_or(0),
            extra_inbox_price_cents: optional_cents(
                "extra_inbox_price",
                self.extra_inbox_price.as_deref(),
            )?
            .unwrap_or(0),
            extra_agent_yearly_price_cents: optional_cents(
                "extra_agent_yearly_price",
                self.extra_agent_yearly_price.as_deref(),
            )?,
            extra_inbox_yearly_price_cents: optional_cents(
                "extra_inbox_yearly_price",
                self.extra_inbox_yearly_price.as_deref(),
            )?,
            is_active: self.is_active,
            is_plan_staff: self.is_plan_staff,
            is_favorite: self.is_favorite,
            requires_payment: self.requires_payment,
            ..base.clone()
        })
    }
}

fn blank_plan() -> Plan {
    Plan {
        id: PlanId(0),
        name: String::new(),
        description: String::new(),
        included_agents: 0,
        included_inboxes: 0,
        monthly_price_cents: 0,
        yearly_price_cents: 0,
        extra_agent_price_cents: 0,
        extra_inbox_price_cents: 0,
        extra_agent_yearly_price_cents: None,
        extra_inbox_yearly_price_cents: None,
        is_active: true,
        is_plan_staff: false,
        is_favorite: false,
        requires_payment: true,
        stripe_product_id: None,
        prices: PlanPriceIds::default(),
    }
}

/// POST /api/v1/plans
pub async fn create_plan(
    State(state): State<AppState>,
    Json(input): Json<PlanInput>,
) -> ApiResult<(StatusCode, Json<Plan>)> {
    let plan = state.store.create_plan(&input.apply(&blank_plan())?).await?;
    tracing::info!(plan_id = %plan.id, name = %plan.name, "Plan created");

    let mut outbox = Outbox::new();
    outbox.push(DomainEvent::PlanSaved {
        previous: None,
        current: plan.clone(),
    });
    state.commit(outbox).await;

    Ok((StatusCode::CREATED, Json(reload(&state, plan).await)))
}

/// PUT /api/v1/plans/:plan_id
pub async fn update_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<i64>,
    Json(input): Json<PlanInput>,
) -> ApiResult<Json<Plan>> {
    let previous = state
        .store
        .get_plan(PlanId(plan_id))
        .await?
        .ok_or(ApiError::NotFound)?;
    let plan = state.store.update_plan(&input.apply(&previous)?).await?;
    tracing::info!(plan_id = %plan.id, name = %plan.name, "Plan updated");

    let mut outbox = Outbox::new();
    outbox.push(DomainEvent::PlanSaved {
        previous: Some(previous),
        current: plan.clone(),
    });
    state.commit(outbox).await;

    Ok(Json(reload(&state, plan).await))
}

/// DELETE /api/v1/plans/:plan_id
pub async fn delete_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let plan = state
        .store
        .delete_plan(PlanId(plan_id))
        .await?
        .ok_or(ApiError::NotFound)?;
    tracing::info!(plan_id = %plan.id, name = %plan.name, "Plan deleted");

    let mut outbox = Outbox::new();
    outbox.push(DomainEvent::PlanDeleted(plan));
    state.commit(outbox).await;

    Ok(StatusCode::NO_CONTENT)
}

/// Plan as stored after synchronization wrote back its remote ids
async fn reload(state: &AppState, plan: Plan) -> Plan {
    match state.store.get_plan(plan.id).await {
        Ok(Some(fresh)) => fresh,
        _ => plan,
    }
}
