//! Bearer token authorization backed by a provider's published key set.

pub mod config;
pub mod error;
pub mod guard;
pub mod jwks;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{AuthConfig, AuthConfigJson};
pub use error::AuthDenial;
pub use guard::AccessGuard;
pub use jwks::JwksCache;
