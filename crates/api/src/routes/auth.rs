//! Auth routes: register, login, logout, current user

use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{self, sessions, AuthUser},
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize, FromRow)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub provider: String,
    pub role: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

fn client_metadata(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let ip = headers
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            headers
                .get("X-Real-IP")
                .and_then(|h| h.to_str().ok())
                .map(String::from)
        });
    let user_agent = headers
        .get("User-Agent")
        .and_then(|h| h.to_str().ok())
        .map(String::from);
    (ip, user_agent)
}

async fn issue_session(
    state: &AppState,
    headers: &HeaderMap,
    user: &UserProfile,
) -> ApiResult<String> {
    let issued = state
        .jwt_manager
        .issue_token(user.id, &user.email, &user.role)?;

    let (ip, user_agent) = client_metadata(headers);
    sessions::save_session(
        &state.pool,
        user.id,
        &issued.jti,
        issued.expires_at,
        ip.as_deref(),
        user_agent.as_deref(),
    )
    .await?;

    Ok(issued.token)
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest("A valid email is required".to_string()));
    }
    auth::validate_password_strength(&req.password).map_err(ApiError::BadRequest)?;

    let password_hash = auth::hash_password(&req.password)?;

    let insert_result: Result<UserProfile, sqlx::Error> = sqlx::query_as(
        r#"
        INSERT INTO users (email, password_hash, name, provider, role)
        VALUES ($1, $2, $3, 'credentials', 'user')
        RETURNING id, email, name, provider, role, created_at
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(&req.name)
    .fetch_one(&state.pool)
    .await;

    let user = match insert_result {
        Ok(user) => user,
        Err(e)
            if e.as_database_error()
                .map(|db| db.is_unique_violation())
                .unwrap_or(false) =>
        {
            return Err(ApiError::Conflict(
                "An account with this email already exists".to_string(),
            ))
        }
        Err(e) => return Err(e.into()),
    };

    let token = issue_session(&state, &headers, &user).await?;

    tracing::info!(user_id = %user.id, "User registered");

    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, FromRow)]
struct CredentialsRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    password_hash: Option<String>,
    provider: String,
    role: String,
    created_at: OffsetDateTime,
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let email = req.email.trim().to_lowercase();

    let row: Option<CredentialsRow> = sqlx::query_as(
        "SELECT id, email, name, password_hash, provider, role, created_at FROM users WHERE email = $1",
    )
    .bind(&email)
    .fetch_optional(&state.pool)
    .await?;

    // Same error for unknown email and wrong password
    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

    let row = row.ok_or_else(invalid)?;

    let Some(password_hash) = &row.password_hash else {
        // Identity-provider accounts have no local password
        return Err(ApiError::Unauthorized(
            "This account signs in through its identity provider".to_string(),
        ));
    };

    if !auth::verify_password(&req.password, password_hash)? {
        tracing::warn!(user_id = %row.id, "Login failed: wrong password");
        return Err(invalid());
    }

    let user = UserProfile {
        id: row.id,
        email: row.email,
        name: row.name,
        provider: row.provider,
        role: row.role,
        created_at: row.created_at,
    };

    let token = issue_session(&state, &headers, &user).await?;

    tracing::info!(user_id = %user.id, "User logged in");

    Ok(Json(AuthResponse { token, user }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<serde_json::Value>> {
    if let Some(jti) = &auth_user.session_jti {
        let revoked = sessions::revoke_session(&state.pool, jti, "logout").await?;
        if revoked {
            tracing::info!(user_id = %auth_user.user_id, "Session revoked on logout");
        }
    }

    Ok(Json(json!({ "logged_out": true })))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<UserProfile>> {
    let user: Option<UserProfile> = sqlx::query_as(
        "SELECT id, email, name, provider, role, created_at FROM users WHERE id = $1",
    )
    .bind(auth_user.user_id)
    .fetch_optional(&state.pool)
    .await?;

    user.map(Json)
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
}
