//! Calculator/tool showcase routes

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
pub struct Tool {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub category: String,
    pub author_id: Uuid,
    pub published: bool,
    pub featured: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct ToolListResponse {
    pub tools: Vec<Tool>,
    pub pagination: PaginationMeta,
}

pub async fn list_tools(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationQuery>,
) -> ApiResult<Json<ToolListResponse>> {
    let (page, limit) = pagination.effective();

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tools WHERE published = TRUE")
        .fetch_one(&state.pool)
        .await?;

    let tools: Vec<Tool> = sqlx::query_as(
        r#"
        SELECT id, name, slug, description, category, author_id,
               published, featured, created_at
        FROM tools
        WHERE published = TRUE
        ORDER BY created_at DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit)
    .bind(pagination.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ToolListResponse {
        tools,
        pagination: PaginationMeta::new(page, limit, total),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateToolRequest {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub featured: Option<bool>,
}

pub async fn create_tool(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateToolRequest>,
) -> ApiResult<(StatusCode, Json<Tool>)> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Name is required".to_string()));
    }

    let slug = super::derive_slug(name, "Name")?;

    let insert_result: Result<Tool, sqlx::Error> = sqlx::query_as(
        r#"
        INSERT INTO tools (name, slug, description, category, author_id, featured)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, name, slug, description, category, author_id,
                  published, featured, created_at
        "#,
    )
    .bind(name)
    .bind(&slug)
    .bind(req.description.unwrap_or_default())
    .bind(req.category.unwrap_or_else(|| "calculator".to_string()))
    .bind(auth_user.user_id)
    .bind(req.featured.unwrap_or(false))
    .fetch_one(&state.pool)
    .await;

    let tool = match insert_result {
        Ok(tool) => tool,
        Err(e)
            if e.as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false) =>
        {
            return Err(ApiError::Conflict(format!(
                "A tool with slug '{slug}' already exists"
            )))
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(tool_id = %tool.id, author_id = %auth_user.user_id, "Tool created");

    Ok((StatusCode::CREATED, Json(tool)))
}

pub async fn get_tool(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Tool>> {
    let tool: Option<Tool> = sqlx::query_as(
        r#"
        SELECT id, name, slug, description, category, author_id,
               published, featured, created_at
        FROM tools
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;

    tool.map(Json)
        .ok_or_else(|| ApiError::NotFound("Tool not found".to_string()))
}

pub async fn delete_tool(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted: Option<(Uuid,)> = sqlx::query_as("DELETE FROM tools WHERE id = $1 RETURNING id")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?;

    if deleted.is_none() {
        return Err(ApiError::NotFound("Tool not found".to_string()));
    }

    tracing::info!(tool_id = %id, admin_id = %auth_user.user_id, "Tool deleted");

    Ok(Json(json!({ "deleted": true })))
}
