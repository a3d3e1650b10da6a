//! Stripe webhook intake

use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;
use starchat_billing::webhooks;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    /// Event routed to the reconciler, if the type is handled
    pub dispatched: Option<&'static str>,
}

/// Verify, parse and dispatch one Stripe event
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::InvalidSignature)?;

    let event = webhooks::receive(&body, signature, &state.stripe.config().webhook_secret)?;

    let dispatched = match event {
        Some(event) => {
            let name = event.name();
            state.reconciler.dispatch(event).await;
            Some(name)
        }
        None => None,
    };

    Ok(Json(WebhookAck {
        received: true,
        dispatched,
    }))
}
