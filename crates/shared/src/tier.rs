//! Subscription tiers and plan limits
//!
//! Limits use `-1` as the "unlimited" sentinel. Every consumer of a limit
//! must go through [`PlanLimits::within_limit`] so the sentinel is handled in
//! exactly one place.

use serde::{Deserialize, Serialize};

/// Sentinel value meaning "no cap" for a plan limit.
pub const UNLIMITED: i64 = -1;

/// Subscription tier for a user's billing plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Pro,
    Team,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Team => "team",
        }
    }

    /// Parse a tier from its stored string form. Unknown values map to Free
    /// so a bad row can never grant elevated limits.
    pub fn from_str_or_free(s: &str) -> Self {
        match s {
            "pro" => SubscriptionTier::Pro,
            "team" => SubscriptionTier::Team,
            _ => SubscriptionTier::Free,
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-month caps attached to a subscription row.
///
/// These must be re-derived whenever the plan changes; stale limits from a
/// previous plan are a billing bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub monthly_articles: i64,
    pub monthly_emails: i64,
}

impl PlanLimits {
    /// Limits for a tier. Pro and Team are uncapped (`-1` sentinel).
    pub fn for_tier(tier: SubscriptionTier) -> Self {
        match tier {
            SubscriptionTier::Free => Self {
                monthly_articles: 10,
                monthly_emails: 1_000,
            },
            SubscriptionTier::Pro | SubscriptionTier::Team => Self {
                monthly_articles: UNLIMITED,
                monthly_emails: UNLIMITED,
            },
        }
    }

    /// Whether `used` units fit under `limit`, honoring the `-1` sentinel.
    pub fn within_limit(used: i64, limit: i64) -> bool {
        limit == UNLIMITED || used < limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tier_string_falls_back_to_free() {
        assert_eq!(
            SubscriptionTier::from_str_or_free("enterprise"),
            SubscriptionTier::Free
        );
        assert_eq!(
            SubscriptionTier::from_str_or_free("pro"),
            SubscriptionTier::Pro
        );
    }

    #[test]
    fn free_tier_has_finite_caps() {
        let limits = PlanLimits::for_tier(SubscriptionTier::Free);
        assert!(limits.monthly_articles > 0);
        assert!(limits.monthly_emails > 0);
    }

    #[test]
    fn paid_tiers_use_unlimited_sentinel() {
        for tier in [SubscriptionTier::Pro, SubscriptionTier::Team] {
            let limits = PlanLimits::for_tier(tier);
            assert_eq!(limits.monthly_articles, UNLIMITED);
            assert_eq!(limits.monthly_emails, UNLIMITED);
        }
    }

    #[test]
    fn within_limit_special_cases_sentinel() {
        assert!(PlanLimits::within_limit(0, 10));
        assert!(PlanLimits::within_limit(9, 10));
        assert!(!PlanLimits::within_limit(10, 10));
        assert!(!PlanLimits::within_limit(11, 10));
        // Sentinel means no cap regardless of usage
        assert!(PlanLimits::within_limit(0, UNLIMITED));
        assert!(PlanLimits::within_limit(i64::MAX, UNLIMITED));
    }
}
