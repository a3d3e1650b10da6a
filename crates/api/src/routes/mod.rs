//! API routes

pub mod accounts;
pub mod health;
pub mod payment_methods;
pub mod plans;
pub mod subscriptions;
pub mod webhook;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, patch, post, put},
    Router,
};
use subtle::ConstantTimeEq;

use crate::{error::ApiError, state::AppState};

/// Header carrying the operator token on admin routes
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Stripe authenticates itself through the payload signature
    let webhook_routes = Router::new().route("/billing/webhook", post(webhook::stripe_webhook));

    let admin_routes = Router::new()
        .route("/plans", post(plans::create_plan))
        .route("/plans/:plan_id", put(plans::update_plan).delete(plans::delete_plan))
        .route("/accounts", post(accounts::create_account))
        .route(
            "/accounts/:account_id",
            patch(accounts::update_account).delete(accounts::delete_account),
        )
        .route("/accounts/:account_id/company", put(accounts::save_company))
        .route("/accounts/:account_id/addresses", post(accounts::add_address))
        .route(
            "/accounts/:account_id/subscription",
            post(subscriptions::subscribe),
        )
        .route(
            "/accounts/:account_id/subscription/cancel",
            post(subscriptions::cancel),
        )
        .route("/accounts/:account_id/portal", post(subscriptions::portal))
        .route(
            "/accounts/:account_id/payment-methods",
            get(payment_methods::overview).post(payment_methods::add),
        )
        .route(
            "/accounts/:account_id/payment-methods/:payment_method_id/default",
            put(payment_methods::make_default),
        )
        .route(
            "/accounts/:account_id/payment-methods/:payment_method_id",
            delete(payment_methods::remove),
        )
        .route("/accounts/:account_id/invoices", get(payment_methods::invoices))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let api_v1_routes = Router::new().merge(webhook_routes).merge(admin_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .with_state(state)
}

/// Reject requests without the configured admin token
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !token_matches(provided, &state.config.admin_api_token) {
        tracing::warn!(path = %request.uri().path(), "Rejected admin request without valid token");
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}

fn token_matches(provided: &str, expected: &str) -> bool {
    if provided.len() != expected.len() {
        let dummy = vec![0u8; provided.len()];
        let _ = provided.as_bytes().ct_eq(&dummy);
        return false;
    }
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}
