//! Bearer-token authentication.
//!
//! Tokens are issued elsewhere; the relay only validates them and extracts
//! the [`UserId`] they carry.

use crate::error::AuthError;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use murmur_types::UserId;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Validates a bearer credential and returns the identity it carries.
pub trait TokenValidator: Send + Sync {
    /// Validate `token`.
    fn validate(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Claims carried by a Murmur bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Authenticated user.
    pub user_id: i64,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

/// HS256 JSON Web Token validator.
#[derive(Clone)]
pub struct JwtValidator {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl JwtValidator {
    /// Create a validator for tokens signed with `secret`.
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Sign a token for `user` that expires after `ttl`.
    ///
    /// The relay never issues tokens itself; this exists for tooling and tests
    /// that share the secret with the issuer.
    pub fn issue(&self, user: UserId, ttl: Duration) -> Result<String, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let claims = Claims {
            user_id: user.value(),
            exp: now + ttl.as_secs(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<UserId, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| UserId::new(data.claims.user_id))
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

/// Extract the bearer credential from a request.
///
/// The `Authorization: Bearer` header wins; the `token` query parameter is
/// the fallback for clients that cannot set headers on a WebSocket upgrade.
pub fn bearer_credential(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    from_header
        .or_else(|| query_token.filter(|t| !t.is_empty()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn issued_token_validates() {
        let validator = JwtValidator::new("secret");
        let token = validator.issue(UserId::new(42), HOUR).unwrap();
        assert_eq!(validator.validate(&token).unwrap(), UserId::new(42));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let issuer = JwtValidator::new("secret-a");
        let validator = JwtValidator::new("secret-b");
        let token = issuer.issue(UserId::new(1), HOUR).unwrap();
        assert!(matches!(
            validator.validate(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let validator = JwtValidator::new("secret");
        let claims = Claims {
            user_id: 1,
            exp: 1_000_000,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn garbage_and_empty_tokens_are_rejected() {
        let validator = JwtValidator::new("secret");
        assert!(matches!(
            validator.validate("not.a.jwt"),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            validator.validate(""),
            Err(AuthError::MissingCredential)
        ));
    }

    #[test]
    fn debug_redacts_secret() {
        let debug = format!("{:?}", JwtValidator::new("hunter2"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn header_credential_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(
            bearer_credential(&headers, Some("from-query")).as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn query_credential_is_fallback() {
        let headers = HeaderMap::new();
        assert_eq!(
            bearer_credential(&headers, Some("from-query")).as_deref(),
            Some("from-query")
        );
    }

    #[test]
    fn non_bearer_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_credential(&headers, None), None);
        assert_eq!(bearer_credential(&HeaderMap::new(), Some("")), None);
    }
}
