//! HTTP route handlers
//!
//! Routes are grouped into three routers by capability: public, any
//! authenticated user, and admin. Each route declares its guard exactly once
//! here; handlers never re-check authentication themselves.

pub mod admin;
pub mod articles;
pub mod auth;
pub mod billing;
pub mod comments;
pub mod newsletter;
pub mod reports;
pub mod tools;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use courierpress_shared::slugify;

use crate::{
    auth::{require_admin, require_auth},
    error::ApiError,
    state::AppState,
};

/// Build the full application router under `/api/v1`.
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    let public = Router::new()
        .route("/articles", get(articles::list_articles))
        .route("/articles/{id}", get(articles::get_article))
        .route("/articles/{id}/view", post(articles::record_view))
        .route("/articles/{id}/like", post(articles::like_article))
        .route("/articles/{id}/comments", get(comments::list_comments))
        .route("/comments/{id}/like", post(comments::like_comment))
        .route("/newsletter/subscribe", post(newsletter::subscribe))
        .route("/newsletter/unsubscribe", post(newsletter::unsubscribe))
        .route("/reports", get(reports::list_reports))
        .route("/reports/{id}", get(reports::get_report))
        .route("/tools", get(tools::list_tools))
        .route("/tools/{id}", get(tools::get_tool))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/billing/webhook", post(billing::webhook));

    let authenticated = Router::new()
        .route("/articles", post(articles::create_article))
        .route("/articles/{id}/comments", post(comments::create_comment))
        .route("/reports", post(reports::create_report))
        .route("/tools", post(tools::create_tool))
        .route("/billing/subscription", get(billing::get_subscription))
        .route("/billing/checkout", post(billing::create_checkout))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_auth,
        ));

    let admin_only = Router::new()
        .route("/articles/{id}", delete(articles::delete_article))
        .route("/reports/{id}", delete(reports::delete_report))
        .route("/tools/{id}", delete(tools::delete_tool))
        .route("/admin/stats", get(admin::get_stats))
        .layer(middleware::from_fn_with_state(auth_state, require_admin));

    Router::new()
        .nest("/api/v1", public.merge(authenticated).merge(admin_only))
        .with_state(state)
}

/// Common pagination query parameters
#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Derive a URL slug, rejecting inputs that produce an empty one.
///
/// A punctuation-only title would otherwise mint a row with slug `''`.
fn derive_slug(source: &str, field: &str) -> Result<String, ApiError> {
    let slug = slugify(source);
    if slug.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "{field} must contain at least one letter or digit"
        )));
    }
    Ok(slug)
}

/// Pagination metadata returned alongside every list response
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

impl PaginationQuery {
    /// Clamp raw query values into a usable (page, limit) pair.
    pub fn effective(&self) -> (i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        (page, limit)
    }

    pub fn offset(&self) -> i64 {
        let (page, limit) = self.effective();
        (page - 1) * limit
    }
}

impl PaginationMeta {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        Self {
            page,
            limit,
            total,
            total_pages: total_pages(total, limit),
        }
    }
}

fn total_pages(total: i64, limit: i64) -> i64 {
    if total == 0 {
        0
    } else {
        (total + limit - 1) / limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults() {
        let query = PaginationQuery {
            page: None,
            limit: None,
        };
        assert_eq!(query.effective(), (1, 10));
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn pagination_clamps_out_of_range_values() {
        let query = PaginationQuery {
            page: Some(0),
            limit: Some(1000),
        };
        assert_eq!(query.effective(), (1, 100));

        let query = PaginationQuery {
            page: Some(-5),
            limit: Some(0),
        };
        assert_eq!(query.effective(), (1, 1));
    }

    #[test]
    fn offset_follows_page_and_limit() {
        let query = PaginationQuery {
            page: Some(3),
            limit: Some(20),
        };
        assert_eq!(query.offset(), 40);
    }

    #[test]
    fn punctuation_only_titles_cannot_become_slugs() {
        assert!(matches!(
            derive_slug("!!!", "Title"),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            derive_slug("   ", "Name"),
            Err(ApiError::BadRequest(_))
        ));
        assert_eq!(
            derive_slug("Hello, World! 2024", "Title").unwrap(),
            "hello-world-2024"
        );
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(100, 7), 15);
    }
}
