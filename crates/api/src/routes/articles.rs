//! Article routes

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

use courierpress_billing::QuotaOutcome;
use courierpress_shared::read_time_minutes;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    routes::PaginationMeta,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ListArticlesQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub category: Option<String>,
    pub featured: Option<bool>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct ArticleWithAuthor {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: String,
    pub category: String,
    pub tags: Vec<String>,
    pub image_url: Option<String>,
    pub author_id: Uuid,
    pub published: bool,
    pub featured: bool,
    pub read_time_minutes: i32,
    pub views: i64,
    pub likes: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub author_name: Option<String>,
    pub author_email: String,
}

#[derive(Debug, Serialize)]
pub struct ArticleListResponse {
    pub articles: Vec<ArticleWithAuthor>,
    pub pagination: PaginationMeta,
}

const ARTICLE_WITH_AUTHOR_COLUMNS: &str = r#"
    a.id, a.title, a.slug, a.content, a.excerpt, a.category, a.tags,
    a.image_url, a.author_id, a.published, a.featured, a.read_time_minutes,
    a.views, a.likes, a.published_at, a.created_at,
    u.name AS author_name, u.email AS author_email
"#;

/// List published articles, newest first.
///
/// Unpublished articles are invisible here regardless of filters; an empty
/// page is a 200 with an empty list.
pub async fn list_articles(
    State(state): State<AppState>,
    Query(query): Query<ListArticlesQuery>,
) -> ApiResult<Json<ArticleListResponse>> {
    let pagination = super::PaginationQuery {
        page: query.page,
        limit: query.limit,
    };
    let (page, limit) = pagination.effective();

    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM articles
        WHERE published = TRUE
          AND ($1::TEXT IS NULL OR category = $1)
          AND ($2::BOOLEAN IS NULL OR featured = $2)
        "#,
    )
    .bind(&query.category)
    .bind(query.featured)
    .fetch_one(&state.pool)
    .await?;

    let articles: Vec<ArticleWithAuthor> = sqlx::query_as(&format!(
        r#"
        SELECT {ARTICLE_WITH_AUTHOR_COLUMNS}
        FROM articles a
        JOIN users u ON u.id = a.author_id
        WHERE a.published = TRUE
          AND ($1::TEXT IS NULL OR a.category = $1)
          AND ($2::BOOLEAN IS NULL OR a.featured = $2)
        ORDER BY a.created_at DESC
        LIMIT $3 OFFSET $4
        "#
    ))
    .bind(&query.category)
    .bind(query.featured)
    .bind(limit)
    .bind(pagination.offset())
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(ArticleListResponse {
        articles,
        pagination: PaginationMeta::new(page, limit, total),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateArticleRequest {
    pub title: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub image_url: Option<String>,
    pub featured: Option<bool>,
}

/// Create an article.
///
/// Articles go live immediately (no draft state yet). Creation consumes one
/// unit of the caller's monthly quota when their plan carries a finite limit.
pub async fn create_article(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateArticleRequest>,
) -> ApiResult<(StatusCode, Json<ArticleWithAuthor>)> {
    let title = req.title.trim();
    let content = req.content.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("Title is required".to_string()));
    }
    if content.is_empty() {
        return Err(ApiError::BadRequest("Content is required".to_string()));
    }
    let slug = super::derive_slug(title, "Title")?;

    let mut quota_consumed = false;
    if let Some(billing) = &state.billing {
        match billing
            .subscriptions
            .consume_article_quota(auth_user.user_id)
            .await?
        {
            QuotaOutcome::Consumed => quota_consumed = true,
            QuotaOutcome::LimitReached => {
                return Err(ApiError::Forbidden(
                    "Monthly article limit reached. Upgrade your plan to keep publishing."
                        .to_string(),
                ));
            }
        }
    }

    let read_time = read_time_minutes(content);

    let insert_result: Result<ArticleWithAuthor, sqlx::Error> = sqlx::query_as(&format!(
        r#"
        WITH inserted AS (
            INSERT INTO articles (
                title, slug, content, excerpt, category, tags, image_url,
                author_id, published, featured, read_time_minutes, published_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $9, $10, NOW())
            RETURNING *
        )
        SELECT {ARTICLE_WITH_AUTHOR_COLUMNS}
        FROM inserted a
        JOIN users u ON u.id = a.author_id
        "#
    ))
    .bind(title)
    .bind(&slug)
    .bind(content)
    .bind(req.excerpt.unwrap_or_default())
    .bind(req.category.unwrap_or_else(|| "general".to_string()))
    .bind(req.tags.unwrap_or_default())
    .bind(&req.image_url)
    .bind(auth_user.user_id)
    .bind(req.featured.unwrap_or(false))
    .bind(read_time)
    .fetch_one(&state.pool)
    .await;

    let article = match insert_result {
        Ok(article) => article,
        Err(e) => {
            if quota_consumed {
                refund_article_quota(&state, auth_user.user_id).await;
            }
            if e.as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false)
            {
                return Err(ApiError::Conflict(format!(
                    "An article with slug '{slug}' already exists"
                )));
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        article_id = %article.id,
        author_id = %auth_user.user_id,
        slug = %slug,
        "Article created"
    );

    Ok((StatusCode::CREATED, Json(article)))
}

/// Give back a quota unit when article creation failed after consuming one.
async fn refund_article_quota(state: &AppState, user_id: Uuid) {
    let result = sqlx::query(
        "UPDATE subscriptions SET articles_used = articles_used - 1 WHERE user_id = $1 AND articles_used > 0",
    )
    .bind(user_id)
    .execute(&state.pool)
    .await;

    if let Err(e) = result {
        tracing::error!(user_id = %user_id, error = %e, "Failed to refund article quota");
    }
}

pub async fn get_article(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ArticleWithAuthor>> {
    let article: Option<ArticleWithAuthor> = sqlx::query_as(&format!(
        r#"
        SELECT {ARTICLE_WITH_AUTHOR_COLUMNS}
        FROM articles a
        JOIN users u ON u.id = a.author_id
        WHERE a.id = $1
        "#
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;

    article
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Article not found".to_string()))
}

pub async fn delete_article(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted: Option<(Uuid,)> = sqlx::query_as("DELETE FROM articles WHERE id = $1 RETURNING id")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?;

    if deleted.is_none() {
        return Err(ApiError::NotFound("Article not found".to_string()));
    }

    tracing::info!(article_id = %id, admin_id = %auth_user.user_id, "Article deleted");

    Ok(Json(json!({ "deleted": true })))
}

/// Record a view. Public and unauthenticated; each call counts once.
pub async fn record_view(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let views: Option<i64> =
        sqlx::query_scalar("UPDATE articles SET views = views + 1 WHERE id = $1 RETURNING views")
            .bind(id)
            .fetch_optional(&state.pool)
            .await?;

    match views {
        Some(views) => Ok(Json(json!({ "views": views }))),
        None => Err(ApiError::NotFound("Article not found".to_string())),
    }
}

/// Record a like. Same fire-and-forget counter semantics as views.
pub async fn like_article(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let likes: Option<i64> =
        sqlx::query_scalar("UPDATE articles SET likes = likes + 1 WHERE id = $1 RETURNING likes")
            .bind(id)
            .fetch_optional(&state.pool)
            .await?;

    match likes {
        Some(likes) => Ok(Json(json!({ "likes": likes }))),
        None => Err(ApiError::NotFound("Article not found".to_string())),
    }
}
