//! Client-side inspection of access tokens.
//!
//! The client never verifies signatures (the backend does); it only reads the
//! `exp` claim to decide whether a token needs refreshing before a channel is
//! opened.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::{AuthError, Result};

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    exp: Option<u64>,
}

/// Read the expiry of a JWT without verifying its signature.
///
/// # Errors
///
/// Returns `AuthError::InvalidToken` if the token cannot be decoded and
/// `AuthError::MissingClaim` if it has no `exp` claim.
pub fn expires_at(token: &str) -> Result<DateTime<Utc>> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

    let exp = data
        .claims
        .exp
        .ok_or_else(|| AuthError::MissingClaim("exp".to_string()))?;
    let exp_secs = i64::try_from(exp).unwrap_or(i64::MAX);
    DateTime::from_timestamp(exp_secs, 0)
        .ok_or_else(|| AuthError::InvalidToken("invalid exp timestamp".to_string()))
}

/// Whether `token` stays valid for at least `min_validity` from now.
///
/// Tokens that are not JWTs, or carry no expiry, are treated as fresh: the
/// backend is the authority on opaque tokens.
#[must_use]
pub fn is_fresh(token: &str, min_validity: std::time::Duration) -> bool {
    match expires_at(token) {
        Ok(expiry) => {
            let margin = chrono::Duration::from_std(min_validity).unwrap_or(chrono::Duration::MAX);
            expiry - Utc::now() >= margin
        }
        Err(AuthError::InvalidToken(_) | AuthError::MissingClaim(_)) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
pub(crate) fn make_token(expires_in_secs: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[derive(serde::Serialize)]
    struct Claims {
        sub: String,
        exp: i64,
    }

    let claims = Claims {
        sub: "user-1".to_string(),
        exp: Utc::now().timestamp() + expires_in_secs,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn reads_expiry_without_key() {
        let token = make_token(600);
        let expiry = expires_at(&token).unwrap();
        let remaining = expiry - Utc::now();
        assert!(remaining > chrono::Duration::seconds(590));
        assert!(remaining <= chrono::Duration::seconds(600));
    }

    #[test]
    fn fresh_when_outside_margin() {
        let token = make_token(600);
        assert!(is_fresh(&token, Duration::from_secs(30)));
    }

    #[test]
    fn stale_when_inside_margin() {
        let token = make_token(10);
        assert!(!is_fresh(&token, Duration::from_secs(30)));
    }

    #[test]
    fn expired_token_is_stale() {
        let token = make_token(-60);
        assert!(!is_fresh(&token, Duration::ZERO));
    }

    #[test]
    fn opaque_token_counts_as_fresh() {
        assert!(is_fresh("opaque-api-key", Duration::from_secs(30)));
        assert!(matches!(
            expires_at("opaque-api-key"),
            Err(AuthError::InvalidToken(_))
        ));
    }
}
