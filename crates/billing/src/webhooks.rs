//! Stripe webhook handling
//!
//! Webhooks are the only driver of subscription state transitions. The raw
//! request body must be verified against the `Stripe-Signature` header before
//! any JSON parsing; an invalid signature never touches the database. Delivery
//! is at-least-once, so every event id is claimed atomically in
//! `stripe_webhook_events` before processing.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{Event, EventObject, EventType};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::subscriptions::SubscriptionService;

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed skew between the signature timestamp and our clock.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// How long a claimed event may sit in "processing" before another delivery
/// is allowed to re-claim it.
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Parse Stripe's `t=<unix>,v1=<hex>,...` signature header.
fn parse_signature_header(header: &str) -> Option<(i64, String)> {
    let mut timestamp: Option<i64> = None;
    let mut v1: Option<String> = None;

    for part in header.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0].trim() {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1 = Some(kv[1].to_string()),
                _ => {}
            }
        }
    }

    Some((timestamp?, v1?))
}

/// HMAC-SHA256 of `"{timestamp}.{payload}"` keyed by the webhook secret
/// (minus its `whsec_` prefix), hex-encoded.
fn compute_signature(secret: &str, timestamp: i64, payload: &str) -> BillingResult<String> {
    let key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let signed_payload = format!("{timestamp}.{payload}");

    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signature header against the raw payload at time `now`.
///
/// Split out from [`WebhookHandler`] so the verification rules are testable
/// without a Stripe client or a database.
pub fn verify_signature(
    secret: &str,
    signature_header: &str,
    payload: &str,
    now_unix: i64,
) -> BillingResult<()> {
    let (timestamp, v1) =
        parse_signature_header(signature_header).ok_or(BillingError::WebhookSignatureInvalid)?;

    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp = timestamp,
            now = now_unix,
            "Webhook signature timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let computed = compute_signature(secret, timestamp, payload)?;
    if computed != v1 {
        tracing::warn!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}

/// Webhook handler for Stripe events.
pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    fn subscriptions(&self) -> SubscriptionService {
        SubscriptionService::new(self.stripe.clone(), self.pool.clone())
    }

    /// Verify and parse a webhook payload.
    ///
    /// Signature verification happens on the raw body, before any JSON
    /// parsing; a payload that fails here causes no side effect at all.
    pub fn verify_event(&self, payload: &str, signature_header: &str) -> BillingResult<Event> {
        let secret = &self.stripe.config().webhook_secret;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(secret, signature_header, payload, now)?;

        serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Verified webhook payload did not parse as an event");
            BillingError::WebhookPayloadInvalid(e.to_string())
        })
    }

    /// Handle a verified event.
    ///
    /// Claiming the event id gives exactly one delivery processing rights at
    /// a time. Only a successful attempt is terminal: a failed attempt leaves
    /// the event claimable again, so the provider's redelivery gets a real
    /// retry instead of a duplicate acknowledgement.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let event_type = event.type_.to_string();

        if !self.claim_event(&event_id, &event_type).await? {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type,
                "Webhook event already handled, skipping"
            );
            return Ok(());
        }

        tracing::info!(
            event_id = %event_id,
            event_type = %event_type,
            "Processing webhook event"
        );

        let result = self.process_event(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };

        if let Err(e) = sqlx::query(
            "UPDATE stripe_webhook_events SET processing_result = $1, error_message = $2 WHERE stripe_event_id = $3",
        )
        .bind(processing_result)
        .bind(&error_message)
        .bind(&event_id)
        .execute(&self.pool)
        .await
        {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to record webhook processing result"
            );
        }

        result
    }

    /// Claim an event for processing. Returns false when another delivery
    /// already holds or finished it.
    ///
    /// The existing row is locked so two concurrent deliveries of the same
    /// event serialize on the claim; two concurrent first deliveries race on
    /// the unique event id and exactly one insert wins.
    async fn claim_event(&self, event_id: &str, event_type: &str) -> BillingResult<bool> {
        let mut tx = self.pool.begin().await?;

        let previous: Option<(String, OffsetDateTime)> = sqlx::query_as(
            "SELECT processing_result, processing_started_at FROM stripe_webhook_events WHERE stripe_event_id = $1 FOR UPDATE",
        )
        .bind(event_id)
        .fetch_optional(&mut *tx)
        .await?;

        let claimed = match previous {
            None => {
                let inserted: Option<(Uuid,)> = sqlx::query_as(
                    r#"
                    INSERT INTO stripe_webhook_events (stripe_event_id, event_type, processing_result, processing_started_at)
                    VALUES ($1, $2, 'processing', NOW())
                    ON CONFLICT (stripe_event_id) DO NOTHING
                    RETURNING id
                    "#,
                )
                .bind(event_id)
                .bind(event_type)
                .fetch_optional(&mut *tx)
                .await?;
                inserted.is_some()
            }
            Some((last_result, started_at)) => {
                let minutes_in_processing =
                    (OffsetDateTime::now_utc() - started_at).whole_minutes();
                if attempt_is_reclaimable(&last_result, minutes_in_processing) {
                    sqlx::query(
                        "UPDATE stripe_webhook_events SET processing_result = 'processing', processing_started_at = NOW(), error_message = NULL WHERE stripe_event_id = $1",
                    )
                    .bind(event_id)
                    .execute(&mut *tx)
                    .await?;
                    true
                } else {
                    false
                }
            }
        };

        tx.commit().await?;
        Ok(claimed)
    }

    async fn process_event(&self, event: &Event) -> BillingResult<()> {
        match event.type_ {
            EventType::CheckoutSessionCompleted => self.handle_checkout_completed(event).await,
            EventType::CustomerSubscriptionUpdated => self.handle_subscription_updated(event).await,
            EventType::CustomerSubscriptionDeleted => self.handle_subscription_deleted(event).await,
            EventType::InvoicePaid => self.handle_invoice_paid(event).await,
            _ => {
                // Unknown event types are acknowledged, not errored, so the
                // provider does not retry them forever.
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Unhandled webhook event type, acknowledging"
                );
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(&self, event: &Event) -> BillingResult<()> {
        let session = match &event.data.object {
            EventObject::CheckoutSession(session) => session,
            _ => {
                return Err(BillingError::WebhookEventNotSupported(
                    "Expected a checkout session object".to_string(),
                ))
            }
        };

        let user_id = session
            .metadata
            .as_ref()
            .and_then(|m| m.get("user_id"))
            .or(session.client_reference_id.as_ref())
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| {
                BillingError::Internal("Checkout session carries no user_id".to_string())
            })?;

        let subscription_id = match &session.subscription {
            Some(sub) => sub.id(),
            None => {
                tracing::warn!(
                    session_id = %session.id,
                    "Checkout completed without a subscription, nothing to sync"
                );
                return Ok(());
            }
        };

        let parsed_id = subscription_id
            .as_str()
            .parse()
            .map_err(|_| BillingError::SubscriptionNotFound(subscription_id.to_string()))?;
        let subscription =
            stripe::Subscription::retrieve(self.stripe.inner(), &parsed_id, &[]).await?;

        self.subscriptions()
            .sync_subscription_to_db(user_id, &subscription)
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            "Checkout completed, subscription synced"
        );

        Ok(())
    }

    async fn handle_subscription_updated(&self, event: &Event) -> BillingResult<()> {
        let subscription = extract_subscription(event)?;
        let subs = self.subscriptions();

        // Events are keyed by the provider's ids; resolve the owner from our
        // stored subscription id, falling back to the customer id for updates
        // that race ahead of the checkout sync.
        let user_id = match subs
            .user_for_stripe_subscription(subscription.id.as_str())
            .await
        {
            Ok(id) => id,
            Err(BillingError::SubscriptionNotFound(_)) => {
                let customer_id = match &subscription.customer {
                    stripe::Expandable::Id(id) => id.to_string(),
                    stripe::Expandable::Object(c) => c.id.to_string(),
                };
                subs.user_for_stripe_customer(&customer_id).await?
            }
            Err(e) => return Err(e),
        };

        subs.sync_subscription_to_db(user_id, subscription).await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            status = ?subscription.status,
            "Subscription updated"
        );

        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: &Event) -> BillingResult<()> {
        let subscription = extract_subscription(event)?;

        self.subscriptions()
            .cancel_by_stripe_id(subscription.id.as_str())
            .await
    }

    async fn handle_invoice_paid(&self, event: &Event) -> BillingResult<()> {
        let invoice = match &event.data.object {
            EventObject::Invoice(invoice) => invoice,
            _ => {
                return Err(BillingError::WebhookEventNotSupported(
                    "Expected an invoice object".to_string(),
                ))
            }
        };

        let customer_id = match &invoice.customer {
            Some(stripe::Expandable::Id(id)) => id.to_string(),
            Some(stripe::Expandable::Object(c)) => c.id.to_string(),
            None => {
                tracing::warn!(invoice_id = %invoice.id, "Invoice has no customer, skipping");
                return Ok(());
            }
        };

        // An invoice can precede our first subscription sync; record it
        // without an owner rather than failing the webhook.
        let user_id = self
            .subscriptions()
            .user_for_stripe_customer(&customer_id)
            .await
            .ok();

        let currency = invoice
            .currency
            .map(|c| c.to_string())
            .unwrap_or_else(|| "usd".to_string());

        sqlx::query(
            r#"
            INSERT INTO invoices (user_id, stripe_invoice_id, amount_paid_cents, currency, status, paid_at)
            VALUES ($1, $2, $3, $4, 'paid', NOW())
            ON CONFLICT (stripe_invoice_id) DO UPDATE SET
                status = 'paid',
                amount_paid_cents = EXCLUDED.amount_paid_cents,
                paid_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(invoice.id.as_str())
        .bind(invoice.amount_paid.unwrap_or(0))
        .bind(&currency)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            invoice_id = %invoice.id,
            user_id = ?user_id,
            amount_paid = invoice.amount_paid,
            "Invoice recorded as paid"
        );

        Ok(())
    }
}

/// Whether a previously recorded delivery attempt may be claimed again.
///
/// `success` is the only terminal state. A failed attempt is always worth
/// another try on redelivery; an attempt still marked `processing` is assumed
/// crashed once the timeout has passed.
fn attempt_is_reclaimable(last_result: &str, minutes_in_processing: i64) -> bool {
    match last_result {
        "success" => false,
        "error" => true,
        _ => minutes_in_processing >= i64::from(PROCESSING_TIMEOUT_MINUTES),
    }
}

fn extract_subscription(event: &Event) -> BillingResult<&stripe::Subscription> {
    match &event.data.object {
        EventObject::Subscription(subscription) => Ok(subscription),
        _ => Err(BillingError::WebhookEventNotSupported(
            "Expected a subscription object".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret_key";
    const PAYLOAD: &str = r#"{"id":"evt_1","type":"invoice.paid"}"#;

    fn signed_header(secret: &str, timestamp: i64, payload: &str) -> String {
        let sig = compute_signature(secret, timestamp, payload).unwrap();
        format!("t={timestamp},v1={sig}")
    }

    #[test]
    fn accepts_a_correctly_signed_payload() {
        let now = 1_700_000_000;
        let header = signed_header(SECRET, now, PAYLOAD);
        assert!(verify_signature(SECRET, &header, PAYLOAD, now).is_ok());
    }

    #[test]
    fn accepts_skew_inside_tolerance() {
        let now = 1_700_000_000;
        let header = signed_header(SECRET, now - 299, PAYLOAD);
        assert!(verify_signature(SECRET, &header, PAYLOAD, now).is_ok());
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let now = 1_700_000_000;
        let header = signed_header(SECRET, now, PAYLOAD);
        let tampered = r#"{"id":"evt_1","type":"customer.subscription.deleted"}"#;
        assert!(matches!(
            verify_signature(SECRET, &header, tampered, now),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn rejects_the_wrong_secret() {
        let now = 1_700_000_000;
        let header = signed_header("whsec_other_secret", now, PAYLOAD);
        assert!(verify_signature(SECRET, &header, PAYLOAD, now).is_err());
    }

    #[test]
    fn successful_attempts_are_never_reclaimed() {
        assert!(!attempt_is_reclaimable("success", 0));
        assert!(!attempt_is_reclaimable("success", 10_000));
    }

    #[test]
    fn failed_attempts_are_reclaimed_on_redelivery() {
        assert!(attempt_is_reclaimable("error", 0));
        assert!(attempt_is_reclaimable("error", 45));
    }

    #[test]
    fn stuck_processing_attempts_reclaim_only_after_timeout() {
        assert!(!attempt_is_reclaimable("processing", 0));
        assert!(!attempt_is_reclaimable("processing", 29));
        assert!(attempt_is_reclaimable("processing", 30));
    }

    #[test]
    fn rejects_a_stale_timestamp() {
        let now = 1_700_000_000;
        let header = signed_header(SECRET, now - 301, PAYLOAD);
        assert!(matches!(
            verify_signature(SECRET, &header, PAYLOAD, now),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn rejects_malformed_headers() {
        let now = 1_700_000_000;
        for header in ["", "t=abc,v1=def", "v1=deadbeef", "t=1700000000"] {
            assert!(
                verify_signature(SECRET, header, PAYLOAD, now).is_err(),
                "header {header:?} should be rejected"
            );
        }
    }

    #[test]
    fn parses_headers_with_extra_schemes() {
        let (timestamp, v1) =
            parse_signature_header("t=123,v1=abcdef,v0=ignored").unwrap();
        assert_eq!(timestamp, 123);
        assert_eq!(v1, "abcdef");
    }

    #[test]
    fn signature_is_stable_for_same_inputs() {
        let a = compute_signature(SECRET, 42, PAYLOAD).unwrap();
        let b = compute_signature(SECRET, 42, PAYLOAD).unwrap();
        assert_eq!(a, b);
        // Secret prefix stripping: same key with and without whsec_
        let c = compute_signature("test_secret_key", 42, PAYLOAD).unwrap();
        assert_eq!(a, c);
    }
}
