//! Platform admin routes

use axum::{extract::State, Json};
use serde::Serialize;

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Serialize)]
pub struct AdminStatsResponse {
    pub total_users: i64,
    pub total_articles: i64,
    pub published_articles: i64,
    pub active_newsletter_subscribers: i64,
    pub active_paid_subscriptions: i64,
    pub revenue: RevenueStats,
}

/// Revenue figures sourced from the invoice ledger; zeros when billing is
/// disabled.
#[derive(Debug, Serialize)]
pub struct RevenueStats {
    pub total_revenue_cents: i64,
    pub revenue_last_30_days_cents: i64,
    pub paid_invoice_count: i64,
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<AdminStatsResponse>> {
    let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&state.pool)
        .await?;

    let (total_articles, published_articles): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE published = TRUE) FROM articles",
    )
    .fetch_one(&state.pool)
    .await?;

    let active_newsletter_subscribers: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM newsletter_subscribers WHERE status = 'active'")
            .fetch_one(&state.pool)
            .await?;

    let active_paid_subscriptions: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM subscriptions WHERE plan <> 'free' AND status IN ('active', 'trialing')",
    )
    .fetch_one(&state.pool)
    .await?;

    let revenue = match &state.billing {
        Some(billing) => {
            let summary = billing.revenue.summary().await?;
            RevenueStats {
                total_revenue_cents: summary.total_revenue_cents,
                revenue_last_30_days_cents: summary.revenue_last_30_days_cents,
                paid_invoice_count: summary.paid_invoice_count,
            }
        }
        None => RevenueStats {
            total_revenue_cents: 0,
            revenue_last_30_days_cents: 0,
            paid_invoice_count: 0,
        },
    };

    Ok(Json(AdminStatsResponse {
        total_users,
        total_articles,
        published_articles,
        active_newsletter_subscribers,
        active_paid_subscriptions,
        revenue,
    }))
}
