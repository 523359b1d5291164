//! Application state

use reqwest::Client;
use sqlx::PgPool;
use std::sync::Arc;

use courierpress_billing::BillingService;

use crate::{
    auth::{AuthState, JwtManager},
    config::Config,
    email::WelcomeEmailService,
};

/// Shared application state, injected into handlers via axum `State`
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    /// Billing service (None when disabled or Stripe is unconfigured)
    pub billing: Option<Arc<BillingService>>,
    pub http_client: Client,
    pub welcome_email: WelcomeEmailService,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt_manager = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);

        let billing = if config.enable_billing {
            match BillingService::from_env(pool.clone()) {
                Ok(svc) => {
                    tracing::info!("Stripe billing service initialized");
                    Some(Arc::new(svc))
                }
                Err(e) => {
                    tracing::warn!("Stripe billing not configured: {}", e);
                    None
                }
            }
        } else {
            tracing::info!("Billing disabled via config (ENABLE_BILLING=false)");
            None
        };

        let http_client = Client::new();

        if !config.identity_url.is_empty() {
            if config.identity_anon_key.is_empty() {
                tracing::warn!(
                    "Identity provider URL configured but IDENTITY_ANON_KEY is missing - external token verification will fail"
                );
            } else {
                tracing::info!("Identity provider verification enabled via {}", config.identity_url);
            }
        }

        let welcome_email = WelcomeEmailService::from_env();
        if welcome_email.is_enabled() {
            tracing::info!("Welcome email delivery enabled");
        } else {
            tracing::warn!("Welcome email delivery not configured (missing MAIL_API_KEY)");
        }

        Self {
            pool,
            config,
            jwt_manager,
            billing,
            http_client,
            welcome_email,
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
            pool: self.pool.clone(),
            identity_url: self.config.identity_url.clone(),
            identity_anon_key: self.config.identity_anon_key.clone(),
            http_client: self.http_client.clone(),
        }
    }
}
