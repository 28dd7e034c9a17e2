//! The session-data cookie cache: a server-signed (or encrypted) snapshot
//! of `{ session, user }` that read-only endpoints trust without a
//! database round-trip.
//!
//! Three strategies share one encode/decode contract and dispatch on the
//! configured [`CacheStrategy`]. Any mismatch (bad signature, expired
//! snapshot, version change) reads as a miss, never an error.

use crate::crypto;
use crate::error::{AuthError, AuthResult};
use crate::jwt::JwtCodec;
use crate::options::CacheStrategy;
use crate::types::{Session, User};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// What the cookie cache carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePayload {
    pub session: Session,
    pub user: User,
    /// Unix seconds of the snapshot.
    pub updated_at: i64,
    pub version: String,
}

impl CachePayload {
    pub fn new(session: &Session, user: &User, version: String) -> Self {
        Self {
            session: session.clone(),
            user: user.clone(),
            updated_at: Utc::now().timestamp(),
            version,
        }
    }
}

/// The compact envelope: payload + expiry + HMAC over both.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompactEnvelope {
    payload: CachePayload,
    expires_at: i64,
    signature: String,
}

/// JWT claims wrapper: payload plus registered expiry.
#[derive(Debug, Serialize, Deserialize)]
struct JwtEnvelope {
    #[serde(flatten)]
    payload: CachePayload,
    exp: i64,
}

/// JWE plaintext: payload plus expiry, sealed with AES-GCM.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JweEnvelope {
    payload: CachePayload,
    expires_at: i64,
}

fn compact_signing_input(payload: &CachePayload, expires_at: i64) -> AuthResult<String> {
    Ok(format!("{}.{expires_at}", serde_json::to_string(payload)?))
}

/// Encodes a payload under the given strategy, valid for `max_age` seconds.
pub fn encode(
    strategy: CacheStrategy,
    secret: &str,
    payload: &CachePayload,
    max_age: i64,
) -> AuthResult<String> {
    let expires_at = Utc::now().timestamp() + max_age;
    match strategy {
        CacheStrategy::Compact => {
            let signature = crypto::sign(secret, &compact_signing_input(payload, expires_at)?)?;
            let envelope = CompactEnvelope {
                payload: payload.clone(),
                expires_at,
                signature,
            };
            Ok(URL_SAFE_NO_PAD.encode(serde_json::to_string(&envelope)?))
        }
        CacheStrategy::Jwt => {
            let envelope = JwtEnvelope {
                payload: payload.clone(),
                exp: expires_at,
            };
            JwtCodec::hs256(secret)
                .encode(&envelope)
                .map_err(|e| AuthError::crypto(e.to_string()))
        }
        CacheStrategy::Jwe => {
            let envelope = JweEnvelope {
                payload: payload.clone(),
                expires_at,
            };
            crypto::encrypt_string(secret, &serde_json::to_string(&envelope)?)
        }
    }
}

/// Decodes a cookie-cache value. Returns `None` on any signature,
/// expiry, or version failure; the caller falls back to the database.
pub fn decode(
    strategy: CacheStrategy,
    secret: &str,
    raw: &str,
    expected_version: &str,
) -> Option<CachePayload> {
    let payload = match strategy {
        CacheStrategy::Compact => {
            let json = URL_SAFE_NO_PAD.decode(raw).ok()?;
            let envelope: CompactEnvelope = serde_json::from_slice(&json).ok()?;
            if envelope.expires_at < Utc::now().timestamp() {
                return None;
            }
            let input = compact_signing_input(&envelope.payload, envelope.expires_at).ok()?;
            if !crypto::verify(secret, &input, &envelope.signature) {
                return None;
            }
            envelope.payload
        }
        CacheStrategy::Jwt => {
            let envelope: JwtEnvelope = JwtCodec::hs256(secret).decode(raw).ok()?;
            envelope.payload
        }
        CacheStrategy::Jwe => {
            let json = crypto::decrypt_string(secret, raw).ok()?;
            let envelope: JweEnvelope = serde_json::from_str(&json).ok()?;
            if envelope.expires_at < Utc::now().timestamp() {
                return None;
            }
            envelope.payload
        }
    };
    if payload.version != expected_version {
        return None;
    }
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-at-least-32-characters!!";

    fn payload() -> CachePayload {
        let user = User::new("u1".into(), "ada@x.io".into());
        let now = Utc::now();
        let session = Session {
            id: "s1".into(),
            token: "tok".into(),
            user_id: "u1".into(),
            expires_at: now + chrono::Duration::days(7),
            created_at: now,
            updated_at: now,
            ip_address: None,
            user_agent: None,
        };
        CachePayload::new(&session, &user, "1".into())
    }

    #[test]
    fn test_round_trip_all_strategies() {
        for strategy in [CacheStrategy::Compact, CacheStrategy::Jwt, CacheStrategy::Jwe] {
            let encoded = encode(strategy, SECRET, &payload(), 300).unwrap();
            let decoded = decode(strategy, SECRET, &encoded, "1")
                .unwrap_or_else(|| panic!("{strategy:?} failed to decode"));
            assert_eq!(decoded.session.token, "tok");
            assert_eq!(decoded.user.email, "ada@x.io");
        }
    }

    #[test]
    fn test_any_byte_change_invalidates() {
        for strategy in [CacheStrategy::Compact, CacheStrategy::Jwt, CacheStrategy::Jwe] {
            let encoded = encode(strategy, SECRET, &payload(), 300).unwrap();
            let mid = encoded.len() / 2;
            let flipped: String = encoded
                .char_indices()
                .map(|(i, c)| if i == mid { if c == 'A' { 'B' } else { 'A' } } else { c })
                .collect();
            assert!(
                decode(strategy, SECRET, &flipped, "1").is_none(),
                "{strategy:?} accepted a tampered value"
            );
        }
    }

    #[test]
    fn test_wrong_secret_rejects() {
        let encoded = encode(CacheStrategy::Compact, SECRET, &payload(), 300).unwrap();
        assert!(decode(
            CacheStrategy::Compact,
            "another-secret-also-32-characters!!!",
            &encoded,
            "1"
        )
        .is_none());
    }

    #[test]
    fn test_expired_snapshot_rejects() {
        for strategy in [CacheStrategy::Compact, CacheStrategy::Jwt, CacheStrategy::Jwe] {
            let encoded = encode(strategy, SECRET, &payload(), -10).unwrap();
            assert!(
                decode(strategy, SECRET, &encoded, "1").is_none(),
                "{strategy:?} accepted an expired snapshot"
            );
        }
    }

    #[test]
    fn test_version_mismatch_rejects() {
        let encoded = encode(CacheStrategy::Compact, SECRET, &payload(), 300).unwrap();
        assert!(decode(CacheStrategy::Compact, SECRET, &encoded, "2").is_none());
    }
}
