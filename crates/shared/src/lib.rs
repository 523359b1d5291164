// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! CourierPress shared types and helpers
//!
//! Code used by both the API server and the billing crate: database pool
//! construction, subscription tiers and plan limits, and the pure text
//! derivations (slug, read time) that the content endpoints rely on.

pub mod db;
pub mod text;
pub mod tier;

pub use db::{create_pool, run_migrations};
pub use text::{read_time_minutes, slugify};
pub use tier::{PlanLimits, SubscriptionTier, UNLIMITED};
