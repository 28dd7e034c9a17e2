//! EdDSA (Ed25519) JWT signing and the matching JWK.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _};
use rand::rngs::OsRng;
use serde_json::{json, Value};

/// Holds the Ed25519 keypair and signs compact JWS tokens.
pub struct EdDsaSigner {
    signing_key: SigningKey,
    kid: String,
}

impl EdDsaSigner {
    /// Generates a fresh keypair. The key id is derived from the public
    /// key so it is stable for the key's lifetime.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Rebuilds a signer from a stored 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let public = signing_key.verifying_key().to_bytes();
        let kid = URL_SAFE_NO_PAD.encode(&public[..8]);
        Self { signing_key, kid }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The public JWK: OKP / Ed25519.
    pub fn jwk(&self) -> Value {
        json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(self.signing_key.verifying_key().to_bytes()),
            "kid": self.kid,
            "alg": "EdDSA",
            "use": "sig",
        })
    }

    /// Signs claims as a compact JWS: `header.payload.signature`.
    pub fn sign(&self, claims: &Value) -> String {
        let header = json!({ "alg": "EdDSA", "typ": "JWT", "kid": self.kid });
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string()),
        );
        let signature = self.signing_key.sign(signing_input.as_bytes());
        format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
    }

    /// Verifies a token's signature and `exp`; returns the claims.
    pub fn verify(&self, token: &str) -> Option<Value> {
        let (signing_input, signature_b64) = token.rsplit_once('.')?;
        let signature_bytes: [u8; 64] = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .ok()?
            .try_into()
            .ok()?;
        let signature = Signature::from_bytes(&signature_bytes);
        self.signing_key
            .verifying_key()
            .verify(signing_input.as_bytes(), &signature)
            .ok()?;

        let (_, payload_b64) = signing_input.split_once('.')?;
        let claims: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload_b64).ok()?).ok()?;
        if let Some(exp) = claims.get("exp").and_then(Value::as_i64) {
            if exp < Utc::now().timestamp() {
                return None;
            }
        }
        Some(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_round_trip() {
        let signer = EdDsaSigner::generate();
        let claims = json!({ "sub": "u1", "exp": Utc::now().timestamp() + 60 });
        let token = signer.sign(&claims);
        let verified = signer.verify(&token).unwrap();
        assert_eq!(verified["sub"], "u1");
    }

    #[test]
    fn test_tampered_token_rejects() {
        let signer = EdDsaSigner::generate();
        let token = signer.sign(&json!({ "sub": "u1" }));
        let tampered = token.replace('.', ".x");
        assert!(signer.verify(&tampered).is_none());
    }

    #[test]
    fn test_expired_token_rejects() {
        let signer = EdDsaSigner::generate();
        let token = signer.sign(&json!({ "sub": "u1", "exp": Utc::now().timestamp() - 10 }));
        assert!(signer.verify(&token).is_none());
    }

    #[test]
    fn test_other_key_rejects() {
        let a = EdDsaSigner::generate();
        let b = EdDsaSigner::generate();
        let token = a.sign(&json!({ "sub": "u1" }));
        assert!(b.verify(&token).is_none());
    }

    #[test]
    fn test_seed_round_trip() {
        let seed = [7u8; 32];
        let a = EdDsaSigner::from_seed(&seed);
        let b = EdDsaSigner::from_seed(&seed);
        assert_eq!(a.kid(), b.kid());
        let token = a.sign(&json!({ "sub": "u1" }));
        assert!(b.verify(&token).is_some());
    }

    #[test]
    fn test_jwk_shape() {
        let signer = EdDsaSigner::generate();
        let jwk = signer.jwk();
        assert_eq!(jwk["kty"], "OKP");
        assert_eq!(jwk["crv"], "Ed25519");
        assert_eq!(jwk["alg"], "EdDSA");
        assert!(jwk["x"].is_string());
    }
}
