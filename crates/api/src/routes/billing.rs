//! Billing routes: subscription lookup, checkout, and the Stripe webhook

use axum::{
    extract::{Extension, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use courierpress_billing::{BillingService, CheckoutResponse, SubscriptionRecord};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

fn billing_service(state: &AppState) -> ApiResult<&Arc<BillingService>> {
    state.billing.as_ref().ok_or_else(|| {
        ApiError::BadRequest("Billing is not enabled on this server".to_string())
    })
}

/// Get the caller's subscription, creating the free-plan row on first visit.
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionRecord>> {
    let billing = billing_service(&state)?;
    let subscription = billing
        .subscriptions
        .ensure_subscription(auth_user.user_id)
        .await?;
    Ok(Json(subscription))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub price_id: Option<String>,
}

/// Normalize the requested price id; missing or blank means none.
fn requested_price_id(req: &CheckoutRequest) -> Option<&str> {
    req.price_id
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Create a hosted checkout session for a paid plan.
///
/// The price id is validated against configuration before any provider
/// call, so a bad request never leaves the server.
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let billing = billing_service(&state)?;

    let price_id = requested_price_id(&req)
        .ok_or_else(|| ApiError::BadRequest("price_id is required".to_string()))?;

    let response = billing
        .checkout
        .create_session(
            auth_user.user_id,
            &auth_user.email,
            price_id,
            &state.config.public_base_url,
        )
        .await?;

    tracing::info!(user_id = %auth_user.user_id, "Checkout session created");

    Ok(Json(response))
}

/// Stripe webhook endpoint.
///
/// The body arrives as a raw string because the signature covers the exact
/// bytes; parsing before verification would break it. Unrecognized event
/// types are acknowledged with 200 so the provider stops retrying them.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let billing = billing_service(&state)?;

    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe-Signature header".to_string()))?;

    let event = billing.webhooks.verify_event(&body, signature)?;
    billing.webhooks.handle_event(event).await?;

    Ok(Json(json!({ "received": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_price_ids_are_rejected() {
        assert_eq!(requested_price_id(&CheckoutRequest { price_id: None }), None);
        assert_eq!(
            requested_price_id(&CheckoutRequest {
                price_id: Some(String::new())
            }),
            None
        );
        assert_eq!(
            requested_price_id(&CheckoutRequest {
                price_id: Some("   ".to_string())
            }),
            None
        );
    }

    #[test]
    fn price_ids_arrive_trimmed() {
        let req = CheckoutRequest {
            price_id: Some("  price_pro_123 ".to_string()),
        };
        assert_eq!(requested_price_id(&req), Some("price_pro_123"));
    }
}
