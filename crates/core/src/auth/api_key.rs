//! API key authentication with an optional separate admin key.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Identity, Role};

/// Validates `Authorization: Bearer <key>` or `X-API-Key: <key>`.
///
/// The standard key yields a [`Role::Standard`] identity; the admin key, when
/// configured, yields [`Role::Admin`].
pub struct ApiKeyAuthenticator {
    api_key: String,
    admin_api_key: Option<String>,
}

impl ApiKeyAuthenticator {
    pub fn new(api_key: String, admin_api_key: Option<String>) -> Self {
        Self {
            api_key,
            admin_api_key: admin_api_key.filter(|k| !k.is_empty()),
        }
    }

    fn extract_key(request: &AuthRequest) -> Option<&str> {
        if let Some(header) = request.headers.get("authorization") {
            if let Some(key) = header
                .strip_prefix("Bearer ")
                .or_else(|| header.strip_prefix("bearer "))
            {
                return Some(key.trim());
            }
        }
        request.headers.get("x-api-key").map(|k| k.trim())
    }

    fn identity(user_id: &str, role: Role) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            method: "api_key".to_string(),
            role,
            claims: HashMap::new(),
        }
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        let provided = Self::extract_key(request).ok_or(AuthError::NotAuthenticated)?;

        if let Some(admin_key) = &self.admin_api_key {
            if constant_time_eq(provided.as_bytes(), admin_key.as_bytes()) {
                return Ok(Self::identity("api_key_admin", Role::Admin));
            }
        }
        if constant_time_eq(provided.as_bytes(), self.api_key.as_bytes()) {
            return Ok(Self::identity("api_key_user", Role::Standard));
        }
        Err(AuthError::InvalidCredentials("Invalid API key".to_string()))
    }

    fn method_name(&self) -> &'static str {
        "api_key"
    }
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
