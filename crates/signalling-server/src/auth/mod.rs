//! Access token generation and validation.
//!
//! Peers identify themselves with a signed claim set (HS256 over the
//! configured shared secret) carrying the caller's user id. Validation
//! pins the algorithm: a token whose header names anything other than
//! HS256 is rejected before signature verification.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Metadata key carrying the access token on incoming calls.
pub const TOKEN_METADATA_KEY: &str = "token";

/// Errors produced by token validation.
///
/// The message is intentionally generic; the actual cause is logged at
/// debug level server-side.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
}

/// Claim set carried by access tokens.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Identifier of the authenticated user.
    pub user_id: String,
}

/// The user id is redacted in Debug output.
impl fmt::Debug for AccessClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessClaims")
            .field("user_id", &"[REDACTED]")
            .finish()
    }
}

/// Generate a signed access token for a user.
///
/// # Errors
///
/// Returns an error if HMAC signing fails (malformed secret state).
pub fn generate_token(secret: &str, user_id: &str) -> Result<String, TokenError> {
    let claims = AccessClaims {
        user_id: user_id.to_string(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::debug!(target: "signalling.auth", error = %e, "Token signing failed");
        TokenError::Invalid
    })
}

/// Validate a token and return its claims.
///
/// Tokens do not carry an expiry; liveness is bounded by the presence
/// session, not the token.
///
/// # Errors
///
/// Returns [`TokenError::Invalid`] when the signature does not verify
/// against `secret`, the `alg` header is not HS256, or the claim set does
/// not decode.
pub fn validate_token(secret: &str, token: &str) -> Result<AccessClaims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(target: "signalling.auth", error = %e, "Token validation failed");
        TokenError::Invalid
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn test_token_round_trip() {
        let token = generate_token("access-secret", "u1").unwrap();
        let claims = validate_token("access-secret", &token).unwrap();
        assert_eq!(claims.user_id, "u1");
    }

    #[test]
    fn test_wrong_secret_fails() {
        let token = generate_token("access-secret", "u1").unwrap();
        let result = validate_token("other-secret", &token);
        assert_eq!(result.unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn test_garbage_token_fails() {
        assert!(validate_token("access-secret", "not-a-token").is_err());
        assert!(validate_token("access-secret", "").is_err());
    }

    #[test]
    fn test_non_hmac_algorithm_rejected() {
        // Same claim set signed with HS384: the alg header alone must
        // cause rejection even though the secret matches
        let claims = AccessClaims {
            user_id: "u1".to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(b"access-secret"),
        )
        .unwrap();

        let result = validate_token("access-secret", &token);
        assert_eq!(result.unwrap_err(), TokenError::Invalid);
    }

    #[test]
    fn test_tampered_payload_fails() {
        let token = generate_token("access-secret", "u1").unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let other = generate_token("access-secret", "u2").unwrap();
        let other_parts: Vec<&str> = other.split('.').collect();
        // Splice u2's payload onto u1's signature
        parts[1] = other_parts[1];
        let forged = parts.join(".");

        assert!(validate_token("access-secret", &forged).is_err());
    }

    #[test]
    fn test_claims_debug_redacts_user_id() {
        let claims = AccessClaims {
            user_id: "secret-user".to_string(),
        };
        let debug_output = format!("{claims:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("secret-user"));
    }
}
