//! Token validation primitives shared across messaging services.
//!
//! Services depend on the [`AuthenticationService`] capability rather than on a
//! concrete client, so the HTTP [`UserManagementClient`] can be swapped for the
//! in-memory implementation behind the `mock` feature in tests.

use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "mock")]
mod mock;
mod user_management;

#[cfg(feature = "mock")]
pub use mock::InMemoryAuthenticationService;
pub use user_management::{UserManagementClient, UserManagementSettings};

/// Failure modes of a token validation call.
///
/// An unknown or expired token is not an error: it is reported as `Ok(None)`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// This service is not allowed to query the authentication service.
    #[error("not authorized to query the authentication service")]
    Unauthorized,
    /// The authentication service is unreachable, timed out or degraded.
    #[error("authentication service unavailable: {0}")]
    FailedDependency(String),
    /// Any other failure, such as a malformed reply.
    #[error("token validation failed: {0}")]
    Unexpected(String),
}

/// Resolves an opaque token to the identifier of the user owning it.
#[async_trait]
pub trait AuthenticationService: Send + Sync {
    /// Returns `Ok(Some(user_id))` for a valid token and `Ok(None)` for an
    /// unknown or expired one.
    async fn validate_token(&self, token: &str) -> Result<Option<String>, AuthError>;
}
