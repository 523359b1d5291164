//! Subscription management
//!
//! One subscription row per user. The row is created lazily (free/active) the
//! first time billing is consulted, and from then on mutated only by webhook
//! reconciliation and quota consumption. Plan limits are re-derived on every
//! plan change; a limit of `-1` means unlimited.

use courierpress_shared::{PlanLimits, SubscriptionTier};
use serde::Serialize;
use sqlx::PgPool;
use stripe::{Subscription, SubscriptionStatus as StripeSubStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Subscription plan configuration: a tier plus the limits it grants.
#[derive(Debug, Clone)]
pub struct Plan {
    pub tier: SubscriptionTier,
    pub limits: PlanLimits,
}

impl Plan {
    pub fn for_tier(tier: SubscriptionTier) -> Self {
        Self {
            tier,
            limits: PlanLimits::for_tier(tier),
        }
    }
}

/// A user's subscription row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan: String,
    pub status: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub stripe_price_id: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    pub monthly_article_limit: i64,
    pub monthly_email_limit: i64,
    pub articles_used: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub usage_period_start: OffsetDateTime,
}

/// Outcome of trying to consume one unit of the monthly article quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOutcome {
    Consumed,
    LimitReached,
}

pub struct SubscriptionService {
    stripe: StripeClient,
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Fetch the user's subscription, creating the default free/active row on
    /// first visit.
    pub async fn ensure_subscription(&self, user_id: Uuid) -> BillingResult<SubscriptionRecord> {
        let free = Plan::for_tier(SubscriptionTier::Free);

        // Insert-if-missing is atomic; concurrent first visits collapse to one row.
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, plan, status, monthly_article_limit, monthly_email_limit)
            VALUES ($1, 'free', 'active', $2, $3)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(free.limits.monthly_articles)
        .bind(free.limits.monthly_emails)
        .execute(&self.pool)
        .await?;

        let record: SubscriptionRecord = sqlx::query_as(
            r#"
            SELECT id, user_id, plan, status, stripe_customer_id, stripe_subscription_id,
                   stripe_price_id, current_period_start, current_period_end,
                   monthly_article_limit, monthly_email_limit, articles_used,
                   usage_period_start
            FROM subscriptions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Atomically consume one unit of the caller's monthly article quota.
    ///
    /// Usage counts within a rolling one-month window; a lapsed window is
    /// reset before the increment, so the cap renews every month. The guard
    /// lives in the UPDATE's WHERE clause so concurrent creates cannot
    /// overshoot the cap; the `-1` sentinel bypasses it entirely.
    pub async fn consume_article_quota(&self, user_id: Uuid) -> BillingResult<QuotaOutcome> {
        let record = self.ensure_subscription(user_id).await?;

        if quota_window_expired(record.usage_period_start, OffsetDateTime::now_utc()) {
            // Compare-and-set on the window start so concurrent rollovers
            // reset at most once.
            sqlx::query(
                r#"
                UPDATE subscriptions
                SET articles_used = 0, usage_period_start = NOW(), updated_at = NOW()
                WHERE user_id = $1 AND usage_period_start = $2
                "#,
            )
            .bind(user_id)
            .bind(record.usage_period_start)
            .execute(&self.pool)
            .await?;
        }

        let rows = sqlx::query(
            r#"
            UPDATE subscriptions
            SET articles_used = articles_used + 1, updated_at = NOW()
            WHERE user_id = $1
              AND (monthly_article_limit = -1 OR articles_used < monthly_article_limit)
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            Ok(QuotaOutcome::Consumed)
        } else {
            Ok(QuotaOutcome::LimitReached)
        }
    }

    /// Upsert a user's subscription from the provider's view of it.
    ///
    /// Called from webhook handlers; limits are re-derived from the plan the
    /// price id maps to, so a plan change can never leave stale caps behind.
    pub async fn sync_subscription_to_db(
        &self,
        user_id: Uuid,
        subscription: &Subscription,
    ) -> BillingResult<()> {
        let status = map_stripe_status(subscription.status);

        let price_id = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|p| p.id.to_string());

        let tier = price_id
            .as_deref()
            .and_then(|id| self.stripe.config().tier_for_price_id(id))
            .unwrap_or(SubscriptionTier::Free);
        let plan = Plan::for_tier(tier);

        let customer_id = match &subscription.customer {
            stripe::Expandable::Id(id) => id.to_string(),
            stripe::Expandable::Object(c) => c.id.to_string(),
        };

        let current_period_start =
            OffsetDateTime::from_unix_timestamp(subscription.current_period_start)
                .unwrap_or_else(|_| OffsetDateTime::now_utc());
        let current_period_end =
            OffsetDateTime::from_unix_timestamp(subscription.current_period_end)
                .unwrap_or_else(|_| OffsetDateTime::now_utc());

        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                user_id, plan, status, stripe_customer_id, stripe_subscription_id,
                stripe_price_id, current_period_start, current_period_end,
                monthly_article_limit, monthly_email_limit
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (user_id) DO UPDATE SET
                plan = EXCLUDED.plan,
                status = EXCLUDED.status,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                stripe_price_id = EXCLUDED.stripe_price_id,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                monthly_article_limit = EXCLUDED.monthly_article_limit,
                monthly_email_limit = EXCLUDED.monthly_email_limit,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(plan.tier.as_str())
        .bind(status)
        .bind(&customer_id)
        .bind(subscription.id.as_str())
        .bind(&price_id)
        .bind(current_period_start)
        .bind(current_period_end)
        .bind(plan.limits.monthly_articles)
        .bind(plan.limits.monthly_emails)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            plan = %plan.tier,
            status = %status,
            "Synced subscription from Stripe"
        );

        Ok(())
    }

    /// Find the owning user by the provider's subscription id.
    ///
    /// Webhook events are keyed by Stripe's id, not ours; the column is
    /// indexed for this lookup.
    pub async fn user_for_stripe_subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<Uuid> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT user_id FROM subscriptions WHERE stripe_subscription_id = $1")
                .bind(stripe_subscription_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(id,)| id)
            .ok_or_else(|| BillingError::SubscriptionNotFound(stripe_subscription_id.to_string()))
    }

    /// Find the owning user by the provider's customer id (used for invoices).
    pub async fn user_for_stripe_customer(&self, stripe_customer_id: &str) -> BillingResult<Uuid> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT user_id FROM subscriptions WHERE stripe_customer_id = $1")
                .bind(stripe_customer_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(id,)| id)
            .ok_or_else(|| BillingError::CustomerNotFound(stripe_customer_id.to_string()))
    }

    /// Mark a subscription canceled and drop the user back to the free plan.
    pub async fn cancel_by_stripe_id(&self, stripe_subscription_id: &str) -> BillingResult<()> {
        let free = Plan::for_tier(SubscriptionTier::Free);

        let rows = sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan = 'free', status = 'canceled',
                monthly_article_limit = $2, monthly_email_limit = $3,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(stripe_subscription_id)
        .bind(free.limits.monthly_articles)
        .bind(free.limits.monthly_emails)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(BillingError::SubscriptionNotFound(
                stripe_subscription_id.to_string(),
            ));
        }

        tracing::info!(
            subscription_id = %stripe_subscription_id,
            "Subscription canceled, downgraded to free plan"
        );

        Ok(())
    }
}

/// One calendar month after the given window start, with the day clamped to
/// the target month's length (Jan 31 rolls over on Feb 28/29).
fn next_window_start(window_start: OffsetDateTime) -> OffsetDateTime {
    let date = window_start.date();
    let month = date.month().next();
    let year = if month == time::Month::January {
        date.year() + 1
    } else {
        date.year()
    };
    let day = date.day().min(time::util::days_in_year_month(year, month));
    match time::Date::from_calendar_date(year, month, day) {
        Ok(next) => window_start.replace_date(next),
        Err(_) => window_start,
    }
}

/// Whether a usage window that started at `window_start` has lapsed by `now`.
fn quota_window_expired(window_start: OffsetDateTime, now: OffsetDateTime) -> bool {
    now >= next_window_start(window_start)
}

/// Map the provider's subscription status onto ours.
///
/// Statuses we don't model collapse to the nearest equivalent rather than
/// failing the webhook.
pub fn map_stripe_status(status: StripeSubStatus) -> &'static str {
    match status {
        StripeSubStatus::Active => "active",
        StripeSubStatus::Trialing => "trialing",
        StripeSubStatus::PastDue | StripeSubStatus::Unpaid => "past_due",
        StripeSubStatus::Canceled | StripeSubStatus::IncompleteExpired => "canceled",
        StripeSubStatus::Incomplete | StripeSubStatus::Paused => "past_due",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_limits_follow_tier() {
        let free = Plan::for_tier(SubscriptionTier::Free);
        assert!(free.limits.monthly_articles > 0);

        let pro = Plan::for_tier(SubscriptionTier::Pro);
        assert_eq!(pro.limits.monthly_articles, courierpress_shared::UNLIMITED);
    }

    fn at(year: i32, month: time::Month, day: u8) -> OffsetDateTime {
        time::Date::from_calendar_date(year, month, day)
            .unwrap()
            .midnight()
            .assume_utc()
    }

    #[test]
    fn quota_window_lasts_one_calendar_month() {
        let start = at(2024, time::Month::March, 15);
        assert!(!quota_window_expired(start, start));
        assert!(!quota_window_expired(start, at(2024, time::Month::April, 14)));
        assert!(quota_window_expired(start, at(2024, time::Month::April, 15)));
    }

    #[test]
    fn quota_window_clamps_to_short_months() {
        let start = at(2024, time::Month::January, 31);
        assert!(!quota_window_expired(start, at(2024, time::Month::February, 28)));
        assert!(quota_window_expired(start, at(2024, time::Month::February, 29)));
    }

    #[test]
    fn december_window_rolls_into_the_new_year() {
        let start = at(2023, time::Month::December, 10);
        assert!(!quota_window_expired(start, at(2024, time::Month::January, 9)));
        assert!(quota_window_expired(start, at(2024, time::Month::January, 10)));
    }

    #[test]
    fn stripe_statuses_collapse_to_our_vocabulary() {
        assert_eq!(map_stripe_status(StripeSubStatus::Active), "active");
        assert_eq!(map_stripe_status(StripeSubStatus::Trialing), "trialing");
        assert_eq!(map_stripe_status(StripeSubStatus::PastDue), "past_due");
        assert_eq!(map_stripe_status(StripeSubStatus::Unpaid), "past_due");
        assert_eq!(map_stripe_status(StripeSubStatus::Canceled), "canceled");
        assert_eq!(
            map_stripe_status(StripeSubStatus::IncompleteExpired),
            "canceled"
        );
    }
}
