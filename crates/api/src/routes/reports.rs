//! Income report routes

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    routes::{PaginationMeta, PaginationQuery},
    state::AppState,
};

#[derive(Debug, Serialize, FromRow)]
pub struct IncomeReport {
    pub id: Uuid,
    pub title: String,
    pub business_name: String,
    pub monthly_revenue_cents: i64,
    pub description: String,
    pub source_url: Option<String>,
    pub author_id: Uuid,
    pub published: bool,
    pub featured: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct ReportListResponse {
    pub reports: Vec<IncomeReport>,
    pub pagination: PaginationMeta,
}

pub async fn list_reports(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationQuery>,
) -> ApiResult<Json<ReportListResponse>> {
    let (page, limit) = pagination.effective();

    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM income_reports WHERE published = TRUE")
            .fetch_one(&state.pool)
            .await?;

    let reports: Vec<IncomeReport> = sqlx::query_as(
        r#"
        SELECT id, title, business_name, monthly_revenue_cents, description,
               source_url, author_id, published, featured, created_at
        FROM income_reports
        WHERE published = TRUE
        ORDER BY created_at DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit)
    .bind(pagination.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ReportListResponse {
        reports,
        pagination: PaginationMeta::new(page, limit, total),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateReportRequest {
    pub title: String,
    pub business_name: String,
    pub monthly_revenue_cents: Option<i64>,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub featured: Option<bool>,
}

pub async fn create_report(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateReportRequest>,
) -> ApiResult<(StatusCode, Json<IncomeReport>)> {
    let title = req.title.trim();
    let business_name = req.business_name.trim();
    if title.is_empty() || business_name.is_empty() {
        return Err(ApiError::BadRequest(
            "Title and business name are required".to_string(),
        ));
    }
    if req.monthly_revenue_cents.is_some_and(|v| v < 0) {
        return Err(ApiError::BadRequest(
            "Monthly revenue cannot be negative".to_string(),
        ));
    }

    let report: IncomeReport = sqlx::query_as(
        r#"
        INSERT INTO income_reports (
            title, business_name, monthly_revenue_cents, description,
            source_url, author_id, featured
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, title, business_name, monthly_revenue_cents, description,
                  source_url, author_id, published, featured, created_at
        "#,
    )
    .bind(title)
    .bind(business_name)
    .bind(req.monthly_revenue_cents.unwrap_or(0))
    .bind(req.description.unwrap_or_default())
    .bind(&req.source_url)
    .bind(auth_user.user_id)
    .bind(req.featured.unwrap_or(false))
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(report_id = %report.id, author_id = %auth_user.user_id, "Income report created");

    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<IncomeReport>> {
    let report: Option<IncomeReport> = sqlx::query_as(
        r#"
        SELECT id, title, business_name, monthly_revenue_cents, description,
               source_url, author_id, published, featured, created_at
        FROM income_reports
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;

    report
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Income report not found".to_string()))
}

pub async fn delete_report(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted: Option<(Uuid,)> =
        sqlx::query_as("DELETE FROM income_reports WHERE id = $1 RETURNING id")
            .bind(id)
            .fetch_optional(&state.pool)
            .await?;

    if deleted.is_none() {
        return Err(ApiError::NotFound("Income report not found".to_string()));
    }

    tracing::info!(report_id = %id, admin_id = %auth_user.user_id, "Income report deleted");

    Ok(Json(json!({ "deleted": true })))
}
