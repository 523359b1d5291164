// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! CourierPress API Library
//!
//! This crate contains the HTTP server components for CourierPress:
//! configuration, shared state, authentication, and the route handlers.

pub mod auth;
pub mod config;
pub mod email;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
