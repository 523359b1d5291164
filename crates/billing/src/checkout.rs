//! Hosted checkout session creation
//!
//! Checkout is synchronous: validate the price id locally, ask Stripe for a
//! hosted checkout URL, and hand it back for the browser redirect. The
//! subscription state itself only changes later, via webhook.

use std::collections::HashMap;

use serde::Serialize;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Response returned to the browser for the redirect.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
}

pub struct CheckoutService {
    stripe: StripeClient,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }

    /// Create a hosted checkout session for a subscription price.
    ///
    /// The price id is validated against our configured prices before any
    /// network call; an unknown id is the caller's error, not Stripe's.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        user_email: &str,
        price_id: &str,
        base_url: &str,
    ) -> BillingResult<CheckoutResponse> {
        if !self.stripe.config().is_known_price_id(price_id) {
            return Err(BillingError::InvalidPriceId(price_id.to_string()));
        }

        let success_url = format!("{base_url}/billing?checkout=success");
        let cancel_url = format!("{base_url}/billing?checkout=canceled");
        let reference_id = user_id.to_string();

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), reference_id.clone());

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(CheckoutSessionMode::Subscription);
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&cancel_url);
        params.customer_email = Some(user_email);
        params.client_reference_id = Some(&reference_id);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);
        params.metadata = Some(metadata);

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        let checkout_url = session.url.ok_or_else(|| {
            BillingError::Internal("Stripe returned a checkout session without a URL".to_string())
        })?;

        tracing::info!(
            user_id = %user_id,
            price_id = %price_id,
            "Created hosted checkout session"
        );

        Ok(CheckoutResponse { checkout_url })
    }
}
