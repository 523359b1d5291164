//! Newsletter subscription routes
//!
//! Subscriber rows are never deleted. Unsubscribing flips the status; a
//! later subscribe reactivates the same row, so the unique email constraint
//! always holds one record per address.

use axum::{
    extract::{Json, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub email: String,
    pub name: Option<String>,
    pub frequency: Option<String>,
    pub topics: Option<Vec<String>>,
    pub source: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct SubscriberResponse {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub status: String,
    pub frequency: String,
    pub topics: Vec<String>,
}

#[derive(Debug, FromRow)]
struct ExistingSubscriber {
    id: Uuid,
    status: String,
}

/// What a subscribe request should do, given the existing row for the email.
#[derive(Debug, PartialEq, Eq)]
enum SubscribeAction {
    Create,
    AlreadyActive,
    Reactivate(Uuid),
}

fn subscribe_action(existing: Option<&ExistingSubscriber>) -> SubscribeAction {
    match existing {
        None => SubscribeAction::Create,
        Some(sub) if sub.status == "active" => SubscribeAction::AlreadyActive,
        Some(sub) => SubscribeAction::Reactivate(sub.id),
    }
}

/// Minimal shape check; full deliverability is the mail provider's problem.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    if email.contains(char::is_whitespace) || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && tld.len() >= 2,
        None => false,
    }
}

/// Subscribe to the newsletter.
///
/// New address → 201. Already active → 409. Previously unsubscribed or
/// bounced → 200, the row is reactivated with merged preferences.
pub async fn subscribe(
    State(state): State<AppState>,
    Json(req): Json<SubscribeRequest>,
) -> ApiResult<(StatusCode, Json<SubscriberResponse>)> {
    let email = req.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(ApiError::BadRequest("Invalid email address".to_string()));
    }

    let existing: Option<ExistingSubscriber> =
        sqlx::query_as("SELECT id, status FROM newsletter_subscribers WHERE email = $1")
            .bind(&email)
            .fetch_optional(&state.pool)
            .await?;

    match subscribe_action(existing.as_ref()) {
        SubscribeAction::Create => {
            let subscriber: SubscriberResponse = sqlx::query_as(
                r#"
                INSERT INTO newsletter_subscribers (email, name, frequency, topics, source)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, email, name, status, frequency, topics
                "#,
            )
            .bind(&email)
            .bind(&req.name)
            .bind(req.frequency.unwrap_or_else(|| "weekly".to_string()))
            .bind(req.topics.unwrap_or_default())
            .bind(req.source.unwrap_or_else(|| "website".to_string()))
            .fetch_one(&state.pool)
            .await?;

            tracing::info!(subscriber_id = %subscriber.id, "Newsletter subscriber created");

            // Best effort; a mail failure must never fail the subscribe
            let welcome = state.welcome_email.clone();
            let name = subscriber.name.clone();
            let to = subscriber.email.clone();
            tokio::spawn(async move {
                welcome.send_welcome(&to, name.as_deref()).await;
            });

            Ok((StatusCode::CREATED, Json(subscriber)))
        }
        SubscribeAction::AlreadyActive => Err(ApiError::Conflict(
            "This email is already subscribed".to_string(),
        )),
        SubscribeAction::Reactivate(subscriber_id) => {
            let subscriber: SubscriberResponse = sqlx::query_as(
                r#"
                UPDATE newsletter_subscribers
                SET status = 'active',
                    name = COALESCE($2, name),
                    frequency = COALESCE($3, frequency),
                    topics = COALESCE($4, topics),
                    updated_at = NOW()
                WHERE id = $1
                RETURNING id, email, name, status, frequency, topics
                "#,
            )
            .bind(subscriber_id)
            .bind(&req.name)
            .bind(&req.frequency)
            .bind(&req.topics)
            .fetch_one(&state.pool)
            .await?;

            tracing::info!(subscriber_id = %subscriber.id, "Newsletter subscriber reactivated");

            Ok((StatusCode::OK, Json(subscriber)))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub email: String,
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Json(req): Json<UnsubscribeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let email = req.email.trim().to_lowercase();

    let rows_affected = sqlx::query(
        r#"
        UPDATE newsletter_subscribers
        SET status = 'unsubscribed', updated_at = NOW()
        WHERE email = $1
        "#,
    )
    .bind(&email)
    .execute(&state.pool)
    .await?
    .rows_affected();

    if rows_affected == 0 {
        return Err(ApiError::NotFound(
            "No subscription found for this email".to_string(),
        ));
    }

    tracing::info!("Newsletter subscriber unsubscribed");

    Ok(Json(json!({ "unsubscribed": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn existing(status: &str) -> ExistingSubscriber {
        ExistingSubscriber {
            id: Uuid::from_u128(7),
            status: status.to_string(),
        }
    }

    #[test]
    fn first_subscribe_creates_a_row() {
        assert_eq!(subscribe_action(None), SubscribeAction::Create);
    }

    #[test]
    fn active_subscribers_conflict() {
        assert_eq!(
            subscribe_action(Some(&existing("active"))),
            SubscribeAction::AlreadyActive
        );
    }

    #[test]
    fn lapsed_subscribers_are_reactivated() {
        let unsubscribed = existing("unsubscribed");
        assert_eq!(
            subscribe_action(Some(&unsubscribed)),
            SubscribeAction::Reactivate(unsubscribed.id)
        );
        let bounced = existing("bounced");
        assert_eq!(
            subscribe_action(Some(&bounced)),
            SubscribeAction::Reactivate(bounced.id)
        );
    }

    #[test]
    fn accepts_ordinary_addresses() {
        assert!(is_valid_email("reader@example.com"));
        assert!(is_valid_email("first.last+tag@sub.example.co"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign.example.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("reader@"));
        assert!(!is_valid_email("reader@nodot"));
        assert!(!is_valid_email("reader@example.c"));
        assert!(!is_valid_email("rea der@example.com"));
        assert!(!is_valid_email("reader@@example.com"));
    }
}
