//! Backup code generation, storage strategies, and one-shot consumption.

use better_auth_core::crypto;
use better_auth_core::error::{AuthError, AuthResult};
use rand::Rng;
use std::sync::Arc;

/// Custom at-rest transform for backup codes.
pub trait BackupCodeCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> AuthResult<String>;
    fn decrypt(&self, stored: &str) -> AuthResult<String>;
}

/// How the backup-code array is stored on the twoFactor row.
#[derive(Clone, Default)]
pub enum BackupCodeStorage {
    /// Plain JSON array.
    Plain,
    /// Whole array sealed with the server secret.
    #[default]
    Encrypted,
    /// Caller-provided transform.
    Custom(Arc<dyn BackupCodeCipher>),
}

/// Generates and verifies backup codes.
#[derive(Debug, Clone)]
pub struct BackupCodeManager {
    amount: usize,
    length: usize,
}

impl BackupCodeManager {
    pub fn new(amount: usize, length: usize) -> Self {
        Self { amount, length }
    }

    /// Unambiguous uppercase alphanumerics, no 0/O/1/I.
    pub fn generate(&self) -> Vec<String> {
        let charset: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
        let mut rng = rand::thread_rng();
        (0..self.amount)
            .map(|_| {
                (0..self.length)
                    .map(|_| charset[rng.gen_range(0..charset.len())] as char)
                    .collect()
            })
            .collect()
    }

    /// Serializes codes for storage under the given strategy.
    pub fn encode(
        &self,
        secret: &str,
        storage: &BackupCodeStorage,
        codes: &[String],
    ) -> AuthResult<String> {
        let json = serde_json::to_string(codes)?;
        match storage {
            BackupCodeStorage::Plain => Ok(json),
            BackupCodeStorage::Encrypted => crypto::encrypt_string(secret, &json),
            BackupCodeStorage::Custom(cipher) => cipher.encrypt(&json),
        }
    }

    /// Reverses [`Self::encode`].
    pub fn decode(
        &self,
        secret: &str,
        storage: &BackupCodeStorage,
        stored: &str,
    ) -> AuthResult<Vec<String>> {
        let json = match storage {
            BackupCodeStorage::Plain => stored.to_string(),
            BackupCodeStorage::Encrypted => crypto::decrypt_string(secret, stored)?,
            BackupCodeStorage::Custom(cipher) => cipher.decrypt(stored)?,
        };
        serde_json::from_str(&json).map_err(AuthError::from)
    }

    /// Finds a code, tolerating dashes, spaces, and case.
    pub fn position(&self, code: &str, codes: &[String]) -> Option<usize> {
        let normalized = code.to_uppercase().replace(['-', ' '], "");
        codes.iter().position(|c| *c == normalized)
    }
}

impl Default for BackupCodeManager {
    fn default() -> Self {
        Self::new(10, 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-at-least-32-characters!!";

    #[test]
    fn test_generation_shape() {
        let manager = BackupCodeManager::new(10, 10);
        let codes = manager.generate();
        assert_eq!(codes.len(), 10);
        for code in &codes {
            assert_eq!(code.len(), 10);
            assert!(!code.contains('0') && !code.contains('O'));
        }
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn test_position_normalizes() {
        let manager = BackupCodeManager::default();
        let codes = vec!["ABCDEFGHJK".to_string()];
        assert_eq!(manager.position("abcd-efgh-jk", &codes), Some(0));
        assert_eq!(manager.position("ABCD EFGH JK", &codes), Some(0));
        assert_eq!(manager.position("WRONGCODE1", &codes), None);
    }

    #[test]
    fn test_encrypted_storage_round_trip() {
        let manager = BackupCodeManager::default();
        let codes = manager.generate();
        let stored = manager
            .encode(SECRET, &BackupCodeStorage::Encrypted, &codes)
            .unwrap();
        // Ciphertext leaks no code.
        for code in &codes {
            assert!(!stored.contains(code.as_str()));
        }
        let decoded = manager
            .decode(SECRET, &BackupCodeStorage::Encrypted, &stored)
            .unwrap();
        assert_eq!(decoded, codes);
    }

    #[test]
    fn test_plain_storage_is_json() {
        let manager = BackupCodeManager::default();
        let codes = vec!["AAAA".to_string()];
        let stored = manager.encode(SECRET, &BackupCodeStorage::Plain, &codes).unwrap();
        assert_eq!(stored, r#"["AAAA"]"#);
    }

    #[test]
    fn test_custom_cipher() {
        struct Reverse;
        impl BackupCodeCipher for Reverse {
            fn encrypt(&self, plaintext: &str) -> AuthResult<String> {
                Ok(plaintext.chars().rev().collect())
            }
            fn decrypt(&self, stored: &str) -> AuthResult<String> {
                Ok(stored.chars().rev().collect())
            }
        }
        let manager = BackupCodeManager::default();
        let storage = BackupCodeStorage::Custom(Arc::new(Reverse));
        let codes = vec!["ABCD".to_string()];
        let stored = manager.encode(SECRET, &storage, &codes).unwrap();
        assert_eq!(manager.decode(SECRET, &storage, &stored).unwrap(), codes);
    }
}
