//! Stripe client and configuration

use courierpress_shared::SubscriptionTier;

use crate::error::{BillingError, BillingResult};

/// Stripe configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub pro_price_id: String,
    pub team_price_id: String,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = require_env("STRIPE_SECRET_KEY")?;
        let webhook_secret = require_env("STRIPE_WEBHOOK_SECRET")?;
        let pro_price_id = require_env("STRIPE_PRO_PRICE_ID")?;
        let team_price_id = require_env("STRIPE_TEAM_PRICE_ID")?;

        Ok(Self {
            secret_key,
            webhook_secret,
            pro_price_id,
            team_price_id,
        })
    }

    /// Map a Stripe price id back to the tier it sells.
    pub fn tier_for_price_id(&self, price_id: &str) -> Option<SubscriptionTier> {
        if price_id == self.pro_price_id {
            Some(SubscriptionTier::Pro)
        } else if price_id == self.team_price_id {
            Some(SubscriptionTier::Team)
        } else {
            None
        }
    }

    /// Whether this price id is one we sell. Checked before any Stripe call.
    pub fn is_known_price_id(&self, price_id: &str) -> bool {
        self.tier_for_price_id(price_id).is_some()
    }
}

fn require_env(name: &str) -> BillingResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BillingError::NotConfigured(format!("{name} not set")))
}

/// Thin wrapper around the async-stripe client that carries our config.
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self { inner, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_x".into(),
            webhook_secret: "whsec_test".into(),
            pro_price_id: "price_pro_123".into(),
            team_price_id: "price_team_456".into(),
        }
    }

    #[test]
    fn maps_price_ids_to_tiers() {
        let config = test_config();
        assert_eq!(
            config.tier_for_price_id("price_pro_123"),
            Some(SubscriptionTier::Pro)
        );
        assert_eq!(
            config.tier_for_price_id("price_team_456"),
            Some(SubscriptionTier::Team)
        );
        assert_eq!(config.tier_for_price_id("price_unknown"), None);
    }

    #[test]
    fn rejects_unknown_price_ids() {
        let config = test_config();
        assert!(config.is_known_price_id("price_pro_123"));
        assert!(!config.is_known_price_id(""));
        assert!(!config.is_known_price_id("price_pro_1234"));
    }
}
