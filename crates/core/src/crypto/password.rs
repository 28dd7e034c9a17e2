//! Password hashing behind a pluggable trait.
//!
//! The default is Argon2id with configurable parameters. Implementations
//! must be constant-time on verification; the Argon2 backend inherits that
//! from the `argon2` crate's verifier.

use crate::error::{AuthError, AuthResult};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier as _, Version};
use async_trait::async_trait;

/// A password hashing scheme.
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    /// Hashes a plaintext password into a self-describing string.
    async fn hash(&self, password: &str) -> AuthResult<String>;

    /// Verifies a plaintext password against a stored hash.
    async fn verify(&self, password: &str, hash: &str) -> AuthResult<bool>;
}

/// Argon2id hasher, the default scheme.
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

impl Argon2Hasher {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }

    fn argon2(&self) -> AuthResult<Argon2<'static>> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| AuthError::crypto(format!("invalid argon2 params: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        // OWASP-recommended interactive parameters.
        Self::new(19 * 1024, 2, 1)
    }
}

#[async_trait]
impl PasswordHasher for Argon2Hasher {
    async fn hash(&self, password: &str) -> AuthResult<String> {
        let argon2 = self.argon2()?;
        let password = password.to_string();
        // Memory-hard hashing is CPU-bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| AuthError::crypto(format!("argon2 hash failed: {e}")))
        })
        .await
        .map_err(|e| AuthError::internal(format!("hash task panicked: {e}")))?
    }

    async fn verify(&self, password: &str, hash: &str) -> AuthResult<bool> {
        let argon2 = self.argon2()?;
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&hash)
                .map_err(|e| AuthError::crypto(format!("malformed password hash: {e}")))?;
            Ok(argon2.verify_password(password.as_bytes(), &parsed).is_ok())
        })
        .await
        .map_err(|e| AuthError::internal(format!("verify task panicked: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hasher = Argon2Hasher::default();
        let hash = hasher.hash("pw_longer_than_8").await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("pw_longer_than_8", &hash).await.unwrap());
        assert!(!hasher.verify("wrong-password", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_hashes_are_salted() {
        let hasher = Argon2Hasher::default();
        let a = hasher.hash("same").await.unwrap();
        let b = hasher.hash("same").await.unwrap();
        assert_ne!(a, b);
    }
}
