pub mod auth;

pub use auth::{AdminUser, CurrentUser, IdentityClaims, IdentityVerifier};
