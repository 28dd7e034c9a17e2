//! TOTP generation and verification, backed by `totp-rs`.

use better_auth_core::error::{AuthError, AuthResult};
use totp_rs::{Algorithm, TOTP};

/// Builds and checks TOTPs for one issuer.
#[derive(Debug, Clone)]
pub struct TotpManager {
    issuer: String,
    digits: usize,
    period: u64,
}

impl TotpManager {
    pub fn new(issuer: impl Into<String>, digits: usize, period: u64) -> Self {
        Self {
            issuer: issuer.into(),
            digits,
            period,
        }
    }

    /// Generates a fresh 160-bit secret, base32-encoded.
    pub fn generate_secret(&self) -> String {
        let raw = better_auth_core::crypto::random_bytes(20);
        base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &raw)
    }

    fn totp(&self, secret_b32: &str, account: &str) -> AuthResult<TOTP> {
        let secret = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, secret_b32)
            .ok_or_else(|| AuthError::crypto("invalid base32 TOTP secret"))?;
        TOTP::new(
            Algorithm::SHA1,
            self.digits,
            1,
            self.period,
            secret,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| AuthError::crypto(format!("invalid TOTP parameters: {e:?}")))
    }

    /// The `otpauth://` URI authenticator apps enroll with.
    pub fn generate_uri(&self, secret_b32: &str, account: &str) -> AuthResult<String> {
        Ok(self.totp(secret_b32, account)?.get_url())
    }

    /// Checks a code against the current period, accepting one period of
    /// clock skew either way.
    pub fn verify(&self, secret_b32: &str, account: &str, code: &str) -> AuthResult<bool> {
        self.totp(secret_b32, account)?
            .check_current(code)
            .map_err(|_| AuthError::internal("system clock is before the epoch"))
    }

    /// The currently valid code (test support).
    pub fn current_code(&self, secret_b32: &str, account: &str) -> AuthResult<String> {
        self.totp(secret_b32, account)?
            .generate_current()
            .map_err(|_| AuthError::internal("system clock is before the epoch"))
    }
}

impl Default for TotpManager {
    fn default() -> Self {
        Self::new("Better Auth", 6, 30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_shape() {
        let manager = TotpManager::default();
        let secret = manager.generate_secret();
        // 20 bytes -> 32 base32 chars.
        assert_eq!(secret.len(), 32);
        assert_ne!(secret, manager.generate_secret());
    }

    #[test]
    fn test_uri_shape() {
        let manager = TotpManager::new("MyApp", 6, 30);
        let secret = manager.generate_secret();
        let uri = manager.generate_uri(&secret, "ada@x.io").unwrap();
        assert!(uri.starts_with("otpauth://totp/"));
        assert!(uri.contains("MyApp"));
        assert!(uri.contains(&secret));
    }

    #[test]
    fn test_current_code_verifies() {
        let manager = TotpManager::default();
        let secret = manager.generate_secret();
        let code = manager.current_code(&secret, "ada@x.io").unwrap();
        assert!(manager.verify(&secret, "ada@x.io", &code).unwrap());
        assert!(!manager.verify(&secret, "ada@x.io", "000000").unwrap()
            || code == "000000");
    }

    #[test]
    fn test_bad_secret_is_error() {
        let manager = TotpManager::default();
        assert!(manager.verify("not base32 !!!", "a", "123456").is_err());
    }
}
