//! Server configuration loaded from environment variables

use anyhow::Context;

/// Application configuration
///
/// Required variables fail startup with a clear error; optional ones degrade
/// the feature they back with a warning at initialization time.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    /// Identity provider base URL for external token verification (optional)
    pub identity_url: String,
    pub identity_anon_key: String,
    /// Public site URL used for checkout success/cancel redirects
    pub public_base_url: String,
    pub enable_billing: bool,
    pub allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            jwt_secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_expiry_hours: std::env::var("JWT_EXPIRY_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
            identity_url: std::env::var("IDENTITY_URL").unwrap_or_default(),
            identity_anon_key: std::env::var("IDENTITY_ANON_KEY").unwrap_or_default(),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            enable_billing: std::env::var("ENABLE_BILLING")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string()),
        })
    }
}
