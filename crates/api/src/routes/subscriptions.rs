//! Subscribe, cancel and portal endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use starchat_billing::{CancelWhen, CheckoutOutcome, PortalResponse, SubscribeRequest};
use starchat_shared::{AccountId, PlanId};

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Deserialize)]
pub struct SubscribeBody {
    pub plan_id: PlanId,
    #[serde(default)]
    pub interval: String,
    #[serde(default)]
    pub pay_mode: String,
    #[serde(default)]
    pub extra_agents: i64,
    #[serde(default)]
    pub extra_inboxes: i64,
    #[serde(default)]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    pub return_path: String,
}

impl SubscribeBody {
    pub fn into_request(self, account_id: AccountId) -> SubscribeRequest {
        SubscribeRequest {
            account_id,
            plan_id: self.plan_id,
            interval: self.interval,
            pay_mode: self.pay_mode,
            extra_agents: self.extra_agents,
            extra_inboxes: self.extra_inboxes,
            payment_method_id: self.payment_method_id,
            return_path: self.return_path,
        }
    }
}

/// POST /api/v1/accounts/:account_id/subscription
///
/// Always answers 200 with the redirect target; failures carry an error notice.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
    Json(body): Json<SubscribeBody>,
) -> Json<CheckoutOutcome> {
    let request = body.into_request(AccountId(account_id));
    Json(state.checkout.subscribe(request).await)
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    /// `period_end` (default) or `now`
    #[serde(default)]
    pub when: String,
}

/// POST /api/v1/accounts/:account_id/subscription/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
    body: Option<Json<CancelBody>>,
) -> Json<CheckoutOutcome> {
    let when = body.map(|Json(b)| b.when).unwrap_or_default();
    Json(
        state
            .checkout
            .cancel(AccountId(account_id), CancelWhen::parse(&when))
            .await,
    )
}

/// POST /api/v1/accounts/:account_id/portal
pub async fn portal(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
) -> ApiResult<Json<PortalResponse>> {
    let response = state
        .portal
        .create_portal_session(AccountId(account_id))
        .await?;
    Ok(Json(response))
}
