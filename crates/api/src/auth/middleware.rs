//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{jwt::JwtManager, sessions};

/// Authenticated user information extracted from a verified token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
    pub auth_method: AuthMethod,
    /// JTI of the session backing this request; None for external tokens
    pub session_jti: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthMethod {
    Jwt,
    IdentityProvider,
}

/// Response from the identity provider's user endpoint
#[derive(Debug, Clone, Deserialize)]
struct IdentityUserResponse {
    id: String,
    email: Option<String>,
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
    pub pool: PgPool,
    pub identity_url: String,
    pub identity_anon_key: String,
    pub http_client: Client,
}

/// Extract a bearer token from an HttpOnly cookie set by the frontend
fn extract_token_from_cookie(request: &Request) -> Option<String> {
    request
        .headers()
        .get(COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookies| {
            for cookie in cookies.split(';') {
                let cookie = cookie.trim();
                if let Some(token) = cookie.strip_prefix("courierpress_token=") {
                    return Some(token.to_string());
                }
            }
            None
        })
}

/// Extract a bearer token from the Authorization header or cookie fallback
fn extract_bearer_token(request: &Request) -> Option<String> {
    if let Some(header) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }

    extract_token_from_cookie(request)
}

/// Middleware that requires authentication
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let auth_result = match extract_bearer_token(&request) {
        Some(token) => authenticate_token(&auth_state, &token).await,
        None => Err(AuthError::MissingAuth),
    };

    match auth_result {
        Ok(auth_user) => {
            tracing::debug!(
                path = %path,
                user_id = %auth_user.user_id,
                role = %auth_user.role,
                "Authentication successful"
            );
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "Authentication failed");
            err.into_response()
        }
    }
}

/// Middleware that requires the admin role.
///
/// An authenticated caller without the role gets 403, never 401; the two
/// failure modes stay distinguishable to clients.
pub async fn require_admin(
    State(auth_state): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    require_role(&["admin"], State(auth_state), request, next).await
}

async fn require_role(
    required_roles: &[&str],
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_result = match extract_bearer_token(&request) {
        Some(token) => authenticate_token(&auth_state, &token).await,
        None => Err(AuthError::MissingAuth),
    };

    match auth_result {
        Ok(auth_user) => {
            if !required_roles.contains(&auth_user.role.as_str()) {
                tracing::warn!(
                    user_id = %auth_user.user_id,
                    role = %auth_user.role,
                    required = ?required_roles,
                    "Insufficient role"
                );
                return AuthError::InsufficientPermissions.into_response();
            }

            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

/// Row for user lookups during token validation
#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    role: String,
}

async fn authenticate_token(auth_state: &AuthState, token: &str) -> Result<AuthUser, AuthError> {
    // First try to validate as one of our own tokens
    if let Ok(claims) = auth_state.jwt_manager.validate_token(token) {
        let session_valid = sessions::is_session_valid(&auth_state.pool, &claims.jti, claims.sub)
            .await
            .map_err(|_| AuthError::DatabaseError)?;

        if !session_valid {
            tracing::warn!(jti = %claims.jti, user_id = %claims.sub, "Session revoked or expired");
            return Err(AuthError::InvalidToken);
        }

        // The user row is authoritative for the role; a stale token cannot
        // keep privileges the database no longer grants.
        let user: Option<UserRow> =
            sqlx::query_as("SELECT id, email, role FROM users WHERE id = $1")
                .bind(claims.sub)
                .fetch_optional(&auth_state.pool)
                .await
                .map_err(|_| AuthError::DatabaseError)?;

        return match user {
            Some(user) => Ok(AuthUser {
                user_id: user.id,
                email: user.email,
                role: user.role,
                auth_method: AuthMethod::Jwt,
                session_jti: Some(claims.jti),
            }),
            None => {
                tracing::warn!(user_id = %claims.sub, "Token user no longer exists");
                Err(AuthError::InvalidToken)
            }
        };
    }

    // Not one of ours; fall back to the identity provider if configured
    if !auth_state.identity_url.is_empty() {
        let identity_user = verify_identity_token(auth_state, token).await?;
        return ensure_identity_user_exists(&auth_state.pool, &identity_user).await;
    }

    Err(AuthError::InvalidToken)
}

/// Verify an external token by calling the identity provider's user endpoint
async fn verify_identity_token(
    auth_state: &AuthState,
    token: &str,
) -> Result<IdentityUserResponse, AuthError> {
    if auth_state.identity_anon_key.is_empty() {
        tracing::warn!("Identity provider anon key not configured, cannot verify token");
        return Err(AuthError::InvalidToken);
    }

    let url = format!("{}/auth/v1/user", auth_state.identity_url);

    let response = auth_state
        .http_client
        .get(&url)
        .header("apikey", &auth_state.identity_anon_key)
        .header("Authorization", format!("Bearer {token}"))
        .send()
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Identity provider verification request failed");
            AuthError::InvalidToken
        })?;

    if !response.status().is_success() {
        tracing::warn!(
            status = %response.status(),
            "Identity provider rejected token"
        );
        return Err(AuthError::InvalidToken);
    }

    response
        .json::<IdentityUserResponse>()
        .await
        .map_err(|_| AuthError::InvalidToken)
}

/// Ensure an identity-provider user has a row in our users table.
///
/// First sight of a provider account creates the user with a NULL password
/// hash; an existing user with the same email is reused instead.
async fn ensure_identity_user_exists(
    pool: &PgPool,
    identity_user: &IdentityUserResponse,
) -> Result<AuthUser, AuthError> {
    let email = identity_user
        .email
        .as_deref()
        .ok_or(AuthError::InvalidToken)?;

    let existing: Option<UserRow> = sqlx::query_as("SELECT id, email, role FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(|_| AuthError::DatabaseError)?;

    if let Some(user) = existing {
        return Ok(AuthUser {
            user_id: user.id,
            email: user.email,
            role: user.role,
            auth_method: AuthMethod::IdentityProvider,
            session_jti: None,
        });
    }

    let provider_id = Uuid::parse_str(&identity_user.id).ok();

    tracing::info!(
        provider_user_id = ?provider_id,
        email = %email,
        "Creating user record for identity-provider account"
    );

    let created: UserRow = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, password_hash, provider, role)
        VALUES (COALESCE($1, gen_random_uuid()), $2, NULL, 'oauth', 'user')
        ON CONFLICT (email) DO UPDATE SET updated_at = NOW()
        RETURNING id, email, role
        "#,
    )
    .bind(provider_id)
    .bind(email)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        tracing::error!(email = %email, error = %e, "Failed to create identity-provider user");
        AuthError::DatabaseError
    })?;

    Ok(AuthUser {
        user_id: created.id,
        email: created.email,
        role: created.role,
        auth_method: AuthMethod::IdentityProvider,
        session_jti: None,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Insufficient permissions")]
    InsufficientPermissions,
    #[error("Database error")]
    DatabaseError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid or expired token"),
            AuthError::InsufficientPermissions => {
                (StatusCode::FORBIDDEN, "Insufficient permissions")
            }
            AuthError::DatabaseError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_headers(headers: &[(&str, &str)]) -> Request {
        let mut builder = axum::http::Request::builder().uri("/api/v1/articles");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn bearer_token_comes_from_authorization_header() {
        let request = request_with_headers(&[("Authorization", "Bearer abc123")]);
        assert_eq!(extract_bearer_token(&request).as_deref(), Some("abc123"));
    }

    #[test]
    fn cookie_fallback_is_used_without_a_header() {
        let request =
            request_with_headers(&[("Cookie", "theme=dark; courierpress_token=xyz789; lang=en")]);
        assert_eq!(extract_bearer_token(&request).as_deref(), Some("xyz789"));
    }

    #[test]
    fn header_wins_over_cookie() {
        let request = request_with_headers(&[
            ("Authorization", "Bearer from-header"),
            ("Cookie", "courierpress_token=from-cookie"),
        ]);
        assert_eq!(
            extract_bearer_token(&request).as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn unrelated_cookies_yield_no_token() {
        let request = request_with_headers(&[("Cookie", "theme=dark; lang=en")]);
        assert!(extract_bearer_token(&request).is_none());
    }

    #[test]
    fn non_bearer_authorization_is_ignored() {
        let request = request_with_headers(&[("Authorization", "Basic dXNlcjpwYXNz")]);
        assert!(extract_bearer_token(&request).is_none());
    }

    #[test]
    fn auth_errors_map_to_expected_status_codes() {
        assert_eq!(
            AuthError::MissingAuth.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::InvalidToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::InsufficientPermissions.into_response().status(),
            StatusCode::FORBIDDEN
        );
    }
}
