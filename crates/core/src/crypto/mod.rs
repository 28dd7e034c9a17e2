//! Cryptographic primitives: random tokens, HMAC signing, symmetric
//! encryption, and PKCE digests.
//!
//! Signatures are HMAC-SHA-256 over the input with the server secret,
//! encoded base64url without padding. Verification is constant-time.
//! Symmetric encryption is AES-256-GCM with an HKDF-SHA256-derived key,
//! used for cookie payloads and at-rest secrets.

mod password;

pub use password::{Argon2Hasher, PasswordHasher};

use crate::error::{AuthError, AuthResult};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const GCM_NONCE_LEN: usize = 12;

/// Generates `len` random bytes from the thread CSPRNG.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// Generates an opaque token: 32 random bytes, base64url.
pub fn generate_token() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes(32))
}

/// Generates a short random identifier (hex, 16 bytes).
pub fn generate_identifier() -> String {
    random_bytes(16).iter().map(|b| format!("{b:02x}")).collect()
}

/// Generates a numeric one-time code of `digits` digits.
pub fn generate_otp(digits: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..digits).map(|_| rng.gen_range(0..10).to_string()).collect()
}

fn mac(secret: &str) -> AuthResult<HmacSha256> {
    Mac::new_from_slice(secret.as_bytes())
        .map_err(|_| AuthError::crypto("invalid HMAC key"))
}

/// HMAC-SHA-256 over `data`, base64url without padding.
pub fn sign(secret: &str, data: &str) -> AuthResult<String> {
    let mut mac = mac(secret)?;
    mac.update(data.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Constant-time verification of a [`sign`] signature.
pub fn verify(secret: &str, data: &str, signature: &str) -> bool {
    let Ok(raw) = URL_SAFE_NO_PAD.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = mac(secret) else {
        return false;
    };
    mac.update(data.as_bytes());
    mac.verify_slice(&raw).is_ok()
}

/// SHA-256 digest, base64url without padding. This is the PKCE S256
/// transform and the hashed-token storage transform.
pub fn sha256_base64url(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Derives a 32-byte key from the server secret via HKDF-SHA256.
fn derive_key(secret: &str, info: &[u8]) -> AuthResult<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, secret.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .map_err(|_| AuthError::crypto("HKDF expand failed"))?;
    Ok(okm)
}

/// Encrypts `plaintext` with AES-256-GCM under an HKDF-derived key.
/// Output is `base64url(nonce || ciphertext)`.
pub fn encrypt_string(secret: &str, plaintext: &str) -> AuthResult<String> {
    let key = derive_key(secret, b"better-auth-encryption")?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| AuthError::crypto("invalid AES key length"))?;
    let nonce_bytes = random_bytes(GCM_NONCE_LEN);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| AuthError::crypto("encryption failed"))?;
    let mut out = nonce_bytes;
    out.extend_from_slice(&ciphertext);
    Ok(URL_SAFE_NO_PAD.encode(out))
}

/// Reverses [`encrypt_string`]. Any tampering fails authentication.
pub fn decrypt_string(secret: &str, data: &str) -> AuthResult<String> {
    let raw = URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|_| AuthError::crypto("invalid ciphertext encoding"))?;
    if raw.len() <= GCM_NONCE_LEN {
        return Err(AuthError::crypto("ciphertext too short"));
    }
    let key = derive_key(secret, b"better-auth-encryption")?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| AuthError::crypto("invalid AES key length"))?;
    let (nonce_bytes, ciphertext) = raw.split_at(GCM_NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| AuthError::crypto("decryption failed"))?;
    String::from_utf8(plaintext).map_err(|_| AuthError::crypto("decrypted payload is not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-at-least-32-characters!!";

    #[test]
    fn test_sign_verify_round_trip() {
        let sig = sign(SECRET, "cookie.value").unwrap();
        assert!(verify(SECRET, "cookie.value", &sig));
        assert!(!verify(SECRET, "cookie.other", &sig));
        assert!(!verify("other-secret-also-32-characters!!!!!", "cookie.value", &sig));
    }

    #[test]
    fn test_signature_bit_flip_rejects() {
        let sig = sign(SECRET, "data").unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&sig).unwrap();
        raw[0] ^= 0x01;
        let flipped = URL_SAFE_NO_PAD.encode(raw);
        assert!(!verify(SECRET, "data", &flipped));
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let ct = encrypt_string(SECRET, "otp secret material").unwrap();
        assert_ne!(ct, "otp secret material");
        assert_eq!(decrypt_string(SECRET, &ct).unwrap(), "otp secret material");
    }

    #[test]
    fn test_tampered_ciphertext_rejects() {
        let ct = encrypt_string(SECRET, "payload").unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&ct).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(raw);
        assert!(decrypt_string(SECRET, &tampered).is_err());
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(a.len() >= 42);
    }

    #[test]
    fn test_pkce_s256_known_vector() {
        // RFC 7636 appendix B.
        assert_eq!(
            sha256_base64url("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_otp_shape() {
        let code = generate_otp(6);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }
}
