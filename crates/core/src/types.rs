//! Canonical data types for Better Auth.
//!
//! These structs are the typed view of the records that travel through the
//! generic database adapter. Wire names are camelCase to match the HTTP
//! surface; plugin-contributed user fields live in the flattened `extra` map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An identity principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,

    /// Lower-cased, unique.
    pub email: String,

    #[serde(default)]
    pub email_verified: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Plugin-contributed fields (e.g. `twoFactorEnabled`, `phoneNumber`).
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

impl User {
    /// Creates a new unverified user. Email is lower-cased here so every
    /// construction path satisfies the invariant.
    pub fn new(id: String, email: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            email: email.to_lowercase(),
            email_verified: false,
            name: None,
            image: None,
            created_at: now,
            updated_at: now,
            extra: HashMap::new(),
        }
    }

    /// Reads a plugin field, deserializing to the requested type.
    pub fn get_extra<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.extra
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Writes a plugin field.
    pub fn set_extra<T: Serialize>(&mut self, key: &str, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.extra.insert(key.to_string(), v);
            self.updated_at = Utc::now();
        }
    }
}

/// An authenticated session.
///
/// `token` is the credential placed in cookies; it is cryptographically
/// random and not derivable from `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// A session together with its user, as resolved for a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionWithUser {
    pub session: Session,
    pub user: User,
}

/// A credential binding: either the local password account
/// (`provider_id == "credential"`) or an OAuth provider link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub user_id: String,

    /// `"credential"` for local password accounts, the provider id otherwise.
    pub provider_id: String,

    /// External subject for OAuth, the local user id for credential accounts.
    pub account_id: String,

    /// Password hash; only present on credential accounts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Marker provider id for local password accounts.
pub const CREDENTIAL_PROVIDER_ID: &str = "credential";

/// A single-use or attempt-bounded token row.
///
/// `identifier` is the lookup key (`reset-password-<token>`, a phone number,
/// a 2FA pending-session id, ...); `value` is free-form and may carry JSON
/// or `"code:attempts"` for OTPs. Expired rows are treated as absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub id: String,
    pub identifier: String,
    pub value: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Verification {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}
