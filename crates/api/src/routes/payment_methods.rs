//! Saved cards and invoice history of an account's Stripe customer

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use starchat_billing::{list_customer_invoices, InvoicePage, InvoiceQuery, InvoiceState, PaymentMethodsOverview};
use starchat_shared::{AccountId, EntityStore};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// GET /api/v1/accounts/:account_id/payment-methods
pub async fn overview(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
) -> ApiResult<Json<PaymentMethodsOverview>> {
    let overview = state.payment_methods.overview(AccountId(account_id)).await?;
    Ok(Json(overview))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct AddPaymentMethodBody {
    pub payment_method_id: String,
    #[serde(default = "default_true")]
    pub make_default: bool,
}

/// POST /api/v1/accounts/:account_id/payment-methods
pub async fn add(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
    Json(body): Json<AddPaymentMethodBody>,
) -> ApiResult<StatusCode> {
    state
        .payment_methods
        .add(AccountId(account_id), &body.payment_method_id, body.make_default)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/accounts/:account_id/payment-methods/:payment_method_id/default
pub async fn make_default(
    State(state): State<AppState>,
    Path((account_id, payment_method_id)): Path<(i64, String)>,
) -> ApiResult<StatusCode> {
    state
        .payment_methods
        .make_default(AccountId(account_id), &payment_method_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/accounts/:account_id/payment-methods/:payment_method_id
pub async fn remove(
    State(state): State<AppState>,
    Path((account_id, payment_method_id)): Path<(i64, String)>,
) -> ApiResult<StatusCode> {
    state
        .payment_methods
        .remove(AccountId(account_id), &payment_method_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Raw query string of the invoice list
#[derive(Debug, Default, Deserialize)]
pub struct InvoiceParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// `1` for paid, `0` for unpaid
    #[serde(default)]
    pub paid: Option<String>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub per_page: Option<usize>,
}

impl InvoiceParams {
    pub fn into_query(self) -> ApiResult<InvoiceQuery> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(InvoiceState::parse(raw).ok_or_else(|| {
                ApiError::Validation(format!("unknown invoice status '{raw}'"))
            })?),
        };
        let paid = match self.paid.as_deref().map(str::trim) {
            None | Some("") => None,
            Some("1") => Some(true),
            Some("0") => Some(false),
            Some(other) => {
                return Err(ApiError::Validation(format!(
                    "paid must be 1 or 0, got '{other}'"
                )))
            }
        };

        Ok(InvoiceQuery {
            search: self.q.filter(|q| !q.trim().is_empty()),
            status,
            paid,
            page: self.page.unwrap_or(1),
            per_page: self.per_page.unwrap_or_default(),
        })
    }
}

/// GET /api/v1/accounts/:account_id/invoices
pub async fn invoices(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
    Query(params): Query<InvoiceParams>,
) -> ApiResult<Json<InvoicePage>> {
    let query = params.into_query()?;
    let account = state
        .store
        .get_account(AccountId(account_id))
        .await?
        .ok_or(ApiError::NotFound)?;

    let page = list_customer_invoices(
        &state.stripe,
        account.stripe_customer_id.as_deref().filter(|id| !id.is_empty()),
        &query,
    )
    .await?;
    Ok(Json(page))
}
