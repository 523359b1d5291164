//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Billing not configured: {0}")]
    NotConfigured(String),

    #[error("Unknown price id: {0}")]
    InvalidPriceId(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook payload invalid: {0}")]
    WebhookPayloadInvalid(String),

    #[error("Webhook event not supported: {0}")]
    WebhookEventNotSupported(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Stripe error: {0}")]
    Stripe(#[from] stripe::StripeError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal billing error: {0}")]
    Internal(String),
}
