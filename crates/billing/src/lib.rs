// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries Stripe error payloads
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! CourierPress Billing Module
//!
//! Handles Stripe integration for paid subscriptions.
//!
//! ## Features
//!
//! - **Checkout**: Hosted checkout sessions for the Pro and Team plans
//! - **Subscriptions**: Per-user plan records with monthly article quotas
//! - **Webhooks**: Signature-verified Stripe events drive all plan changes
//! - **Revenue**: Invoice ledger aggregation for the admin dashboard

pub mod checkout;
pub mod client;
pub mod error;
pub mod revenue;
pub mod subscriptions;
pub mod webhooks;

pub use checkout::{CheckoutResponse, CheckoutService};
pub use client::{StripeClient, StripeConfig};
pub use error::{BillingError, BillingResult};
pub use revenue::{RevenueService, RevenueSummary};
pub use subscriptions::{
    map_stripe_status, Plan, QuotaOutcome, SubscriptionRecord, SubscriptionService,
};
pub use webhooks::{verify_signature, WebhookHandler};

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub subscriptions: SubscriptionService,
    pub webhooks: WebhookHandler,
    pub revenue: RevenueService,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::with_client(stripe, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::with_client(StripeClient::new(config), pool)
    }

    fn with_client(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            checkout: CheckoutService::new(stripe.clone()),
            subscriptions: SubscriptionService::new(stripe.clone(), pool.clone()),
            webhooks: WebhookHandler::new(stripe, pool.clone()),
            revenue: RevenueService::new(pool),
        }
    }
}
