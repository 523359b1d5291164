//! Revenue aggregation over recorded invoices.

use serde::Serialize;
use sqlx::PgPool;

use crate::error::BillingResult;

/// Aggregated revenue figures for the admin dashboard.
///
/// Sourced from the `invoices` ledger populated by `invoice.paid` webhooks,
/// not from live provider API calls.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RevenueSummary {
    pub total_revenue_cents: i64,
    pub revenue_last_30_days_cents: i64,
    pub paid_invoice_count: i64,
    pub paying_subscriber_count: i64,
}

#[derive(Clone)]
pub struct RevenueService {
    pool: PgPool,
}

impl RevenueService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn summary(&self) -> BillingResult<RevenueSummary> {
        let summary = sqlx::query_as::<_, RevenueSummary>(
            r#"
            SELECT
                COALESCE(SUM(amount_paid_cents), 0)::BIGINT AS total_revenue_cents,
                COALESCE(SUM(amount_paid_cents) FILTER (WHERE paid_at >= NOW() - INTERVAL '30 days'), 0)::BIGINT
                    AS revenue_last_30_days_cents,
                COUNT(*)::BIGINT AS paid_invoice_count,
                (SELECT COUNT(*) FROM subscriptions
                  WHERE plan <> 'free' AND status IN ('active', 'trialing'))::BIGINT
                    AS paying_subscriber_count
            FROM invoices
            WHERE status = 'paid'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(summary)
    }
}
