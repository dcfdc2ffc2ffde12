use async_trait::async_trait;
use thiserror::Error;

use super::types::{AuthRequest, Identity};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    NotAuthenticated,

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Authentication service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl AuthError {
    /// HTTP status equivalent.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::NotAuthenticated | AuthError::InvalidCredentials(_) => 401,
            AuthError::Forbidden(_) => 403,
            AuthError::ServiceUnavailable(_) => 503,
            AuthError::ConfigurationError(_) => 500,
        }
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate a request and return the identity
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError>;

    /// Name of this authentication method
    fn method_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::NotAuthenticated.status_code(), 401);
        assert_eq!(AuthError::InvalidCredentials("x".into()).status_code(), 401);
        assert_eq!(AuthError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(AuthError::ServiceUnavailable("x".into()).status_code(), 503);
    }
}
