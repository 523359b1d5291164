//! Comment routes
//!
//! Comments support one level of replies: a reply's parent must be a
//! top-level comment on the same article. There is no edit or delete.

use axum::{
    extract::{Extension, Path, State},
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
    state::AppState,
};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CommentRow {
    pub id: Uuid,
    pub article_id: Uuid,
    pub author_id: Uuid,
    pub parent_comment_id: Option<Uuid>,
    pub content: String,
    pub likes: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub author_name: Option<String>,
}

/// A top-level comment with its replies nested underneath
#[derive(Debug, Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: CommentRow,
    pub replies: Vec<CommentRow>,
}

#[derive(Debug, Serialize)]
pub struct CommentListResponse {
    pub comments: Vec<CommentNode>,
    pub total: i64,
}

/// List an article's comments with replies nested under their parents.
pub async fn list_comments(
    State(state): State<AppState>,
    Path(article_id): Path<Uuid>,
) -> ApiResult<Json<CommentListResponse>> {
    let article_exists: Option<(bool,)> =
        sqlx::query_as("SELECT TRUE FROM articles WHERE id = $1")
            .bind(article_id)
            .fetch_optional(&state.pool)
            .await?;
    if article_exists.is_none() {
        return Err(ApiError::NotFound("Article not found".to_string()));
    }

    let rows: Vec<CommentRow> = sqlx::query_as(
        r#"
        SELECT c.id, c.article_id, c.author_id, c.parent_comment_id,
               c.content, c.likes, c.created_at, u.name AS author_name
        FROM comments c
        JOIN users u ON u.id = c.author_id
        WHERE c.article_id = $1
        ORDER BY c.created_at ASC
        "#,
    )
    .bind(article_id)
    .fetch_all(&state.pool)
    .await?;

    let total = rows.len() as i64;
    Ok(Json(CommentListResponse {
        comments: nest_replies(rows),
        total,
    }))
}

/// Group a flat, chronologically ordered comment list into top-level
/// comments with their replies attached.
fn nest_replies(rows: Vec<CommentRow>) -> Vec<CommentNode> {
    let mut top_level: Vec<CommentNode> = Vec::new();
    let mut replies: Vec<CommentRow> = Vec::new();

    for row in rows {
        if row.parent_comment_id.is_some() {
            replies.push(row);
        } else {
            top_level.push(CommentNode {
                comment: row,
                replies: Vec::new(),
            });
        }
    }

    for reply in replies {
        let parent_id = reply.parent_comment_id;
        if let Some(parent) = top_level
            .iter_mut()
            .find(|node| Some(node.comment.id) == parent_id)
        {
            parent.replies.push(reply);
        }
    }

    top_level
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
    pub parent_comment_id: Option<Uuid>,
}

pub async fn create_comment(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(article_id): Path<Uuid>,
    Json(req): Json<CreateCommentRequest>,
) -> ApiResult<(StatusCode, Json<CommentRow>)> {
    let content = req.content.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest(
            "Comment content must not be empty".to_string(),
        ));
    }

    let article_exists: Option<(bool,)> =
        sqlx::query_as("SELECT TRUE FROM articles WHERE id = $1")
            .bind(article_id)
            .fetch_optional(&state.pool)
            .await?;
    if article_exists.is_none() {
        return Err(ApiError::NotFound("Article not found".to_string()));
    }

    if let Some(parent_id) = req.parent_comment_id {
        let parent: Option<(Uuid, Option<Uuid>)> = sqlx::query_as(
            "SELECT article_id, parent_comment_id FROM comments WHERE id = $1",
        )
        .bind(parent_id)
        .fetch_optional(&state.pool)
        .await?;

        match parent {
            None => {
                return Err(ApiError::BadRequest(
                    "Parent comment does not exist".to_string(),
                ))
            }
            Some((parent_article, _)) if parent_article != article_id => {
                return Err(ApiError::BadRequest(
                    "Parent comment belongs to a different article".to_string(),
                ))
            }
            Some((_, Some(_))) => {
                // Replies to replies would create arbitrary depth
                return Err(ApiError::BadRequest(
                    "Replies can only target top-level comments".to_string(),
                ));
            }
            Some(_) => {}
        }
    }

    let comment: CommentRow = sqlx::query_as(
        r#"
        WITH inserted AS (
            INSERT INTO comments (article_id, author_id, parent_comment_id, content)
            VALUES ($1, $2, $3, $4)
            RETURNING *
        )
        SELECT c.id, c.article_id, c.author_id, c.parent_comment_id,
               c.content, c.likes, c.created_at, u.name AS author_name
        FROM inserted c
        JOIN users u ON u.id = c.author_id
        "#,
    )
    .bind(article_id)
    .bind(auth_user.user_id)
    .bind(req.parent_comment_id)
    .bind(content)
    .fetch_one(&state.pool)
    .await?;

    tracing::info!(
        comment_id = %comment.id,
        article_id = %article_id,
        author_id = %auth_user.user_id,
        "Comment created"
    );

    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn like_comment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let likes: Option<i64> =
        sqlx::query_scalar("UPDATE comments SET likes = likes + 1 WHERE id = $1 RETURNING likes")
            .bind(id)
            .fetch_optional(&state.pool)
            .await?;

    match likes {
        Some(likes) => Ok(Json(json!({ "likes": likes }))),
        None => Err(ApiError::NotFound("Comment not found".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: u128, parent: Option<u128>) -> CommentRow {
        CommentRow {
            id: Uuid::from_u128(id),
            article_id: Uuid::from_u128(999),
            author_id: Uuid::from_u128(1000),
            parent_comment_id: parent.map(Uuid::from_u128),
            content: "text".to_string(),
            likes: 0,
            created_at: OffsetDateTime::UNIX_EPOCH,
            author_name: None,
        }
    }

    #[test]
    fn replies_nest_under_their_parents() {
        let nested = nest_replies(vec![row(1, None), row(2, Some(1)), row(3, None), row(4, Some(1))]);
        assert_eq!(nested.len(), 2);
        assert_eq!(nested[0].replies.len(), 2);
        assert!(nested[1].replies.is_empty());
    }

    #[test]
    fn orphaned_replies_are_dropped() {
        let nested = nest_replies(vec![row(1, None), row(2, Some(42))]);
        assert_eq!(nested.len(), 1);
        assert!(nested[0].replies.is_empty());
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(nest_replies(Vec::new()).is_empty());
    }
}
