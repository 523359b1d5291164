//! Authentication module for CourierPress

pub mod jwt;
pub mod middleware;
pub mod password;
pub mod sessions;

pub use jwt::{Claims, IssuedToken, JwtManager};
pub use middleware::{require_admin, require_auth, AuthMethod, AuthState, AuthUser};
pub use password::{hash_password, validate_password_strength, verify_password};
