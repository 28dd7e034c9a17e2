//! HS256 JWT codec for verification tokens, the `jwt` cookie-cache
//! strategy, and the HS256 id_token fallback.
//!
//! Expiry validation uses zero leeway so `exp < now` rejects exactly, and
//! the decode error is discriminated into `Expired` vs `Invalid` so the
//! verify-email endpoint can answer `token_expired` vs `invalid_token`.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Token encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    Invalid,
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::Invalid,
        }
    }
}

/// Symmetric HS256 encoder/decoder.
#[derive(Clone)]
pub struct JwtCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtCodec {
    pub fn hs256(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| JwtError::EncodingFailed(e.to_string()))
    }

    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<T, JwtError> {
        let data = decode::<T>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }
}

/// Claims of an email-verification token.
///
/// `update_to` carries the new address for change-email verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationClaims {
    pub email: String,
    #[serde(rename = "updateTo", skip_serializing_if = "Option::is_none")]
    pub update_to: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

impl VerificationClaims {
    pub fn new(email: impl Into<String>, update_to: Option<String>, expires_in: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            email: email.into(),
            update_to,
            iat: now,
            exp: now + expires_in,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-at-least-32-characters!!";

    #[test]
    fn test_round_trip() {
        let codec = JwtCodec::hs256(SECRET);
        let claims = VerificationClaims::new("ada@x.io", None, 3600);
        let token = codec.encode(&claims).unwrap();
        let back: VerificationClaims = codec.decode(&token).unwrap();
        assert_eq!(back.email, "ada@x.io");
        assert!(back.update_to.is_none());
    }

    #[test]
    fn test_expired_token_discriminated() {
        let codec = JwtCodec::hs256(SECRET);
        let claims = VerificationClaims::new("ada@x.io", None, -10);
        let token = codec.encode(&claims).unwrap();
        match codec.decode::<VerificationClaims>(&token) {
            Err(JwtError::Expired) => {}
            other => panic!("expected Expired, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let codec = JwtCodec::hs256(SECRET);
        let other = JwtCodec::hs256("another-secret-also-32-characters!!!");
        let token = codec
            .encode(&VerificationClaims::new("a@b.c", None, 3600))
            .unwrap();
        match other.decode::<VerificationClaims>(&token) {
            Err(JwtError::Invalid) => {}
            other => panic!("expected Invalid, got {other:?}"),
        }
    }
}
