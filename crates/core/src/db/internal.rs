//! The typed layer over the generic CRUD contract: entity operations for
//! users, accounts, sessions and verification values, including the
//! secondary-storage session cache and the delete-user cascade.

use super::{DatabaseAdapter, FindManyArgs, FindOneArgs, Where};
use crate::crypto;
use crate::error::{AuthError, AuthResult};
use crate::storage::SecondaryStorage;
use crate::types::{Account, Session, SessionWithUser, User, Verification};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Canonical model names.
pub mod models {
    pub const USER: &str = "user";
    pub const SESSION: &str = "session";
    pub const ACCOUNT: &str = "account";
    pub const VERIFICATION: &str = "verification";
    pub const TWO_FACTOR: &str = "twoFactor";
}

fn to_record<T: Serialize>(entity: &T) -> AuthResult<Value> {
    Ok(serde_json::to_value(entity)?)
}

fn from_record<T: DeserializeOwned>(record: Value) -> AuthResult<T> {
    Ok(serde_json::from_value(record)?)
}

/// Typed entity operations, shared by every endpoint and plugin.
#[derive(Clone)]
pub struct InternalAdapter {
    adapter: Arc<dyn DatabaseAdapter>,
    secondary: Option<Arc<dyn SecondaryStorage>>,
}

impl InternalAdapter {
    pub fn new(
        adapter: Arc<dyn DatabaseAdapter>,
        secondary: Option<Arc<dyn SecondaryStorage>>,
    ) -> Self {
        Self { adapter, secondary }
    }

    /// The underlying generic adapter, for plugin-owned models.
    pub fn adapter(&self) -> &Arc<dyn DatabaseAdapter> {
        &self.adapter
    }

    // ==================== Users ====================

    pub async fn create_user(&self, user: &User) -> AuthResult<User> {
        if self.find_user_by_email(&user.email).await?.is_some() {
            return Err(AuthError::duplicate(models::USER, "email"));
        }
        let created = self.adapter.create(models::USER, to_record(user)?).await?;
        from_record(created)
    }

    pub async fn find_user_by_id(&self, id: &str) -> AuthResult<Option<User>> {
        let found = self
            .adapter
            .find_one(models::USER, FindOneArgs::by(vec![Where::eq("id", json!(id))]))
            .await?;
        found.map(from_record).transpose()
    }

    pub async fn find_user_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        let email = email.to_lowercase();
        let found = self
            .adapter
            .find_one(
                models::USER,
                FindOneArgs::by(vec![Where::eq("email", json!(email))]),
            )
            .await?;
        found.map(from_record).transpose()
    }

    /// Applies a partial update to a user; `updatedAt` is always refreshed.
    pub async fn update_user(&self, id: &str, mut update: Value) -> AuthResult<Option<User>> {
        if let Value::Object(map) = &mut update {
            map.insert("updatedAt".into(), json!(Utc::now()));
        }
        let updated = self
            .adapter
            .update(models::USER, &[Where::eq("id", json!(id))], update)
            .await?;
        updated.map(from_record).transpose()
    }

    /// Deletes a user and cascades sessions, accounts, 2FA material and
    /// user-keyed verification values.
    pub async fn delete_user(&self, id: &str) -> AuthResult<()> {
        self.delete_user_sessions(id).await?;
        self.adapter
            .delete_many(models::ACCOUNT, &[Where::eq("userId", json!(id))])
            .await?;
        self.adapter
            .delete_many(models::TWO_FACTOR, &[Where::eq("userId", json!(id))])
            .await?;
        self.adapter
            .delete_many(models::VERIFICATION, &[Where::eq("value", json!(id))])
            .await?;
        self.adapter
            .delete_many(models::USER, &[Where::eq("id", json!(id))])
            .await?;
        Ok(())
    }

    // ==================== Accounts ====================

    pub async fn create_account(&self, account: &Account) -> AuthResult<Account> {
        let created = self
            .adapter
            .create(models::ACCOUNT, to_record(account)?)
            .await?;
        from_record(created)
    }

    pub async fn find_account(
        &self,
        provider_id: &str,
        account_id: &str,
    ) -> AuthResult<Option<Account>> {
        let found = self
            .adapter
            .find_one(
                models::ACCOUNT,
                FindOneArgs::by(vec![
                    Where::eq("providerId", json!(provider_id)),
                    Where::eq("accountId", json!(account_id)),
                ]),
            )
            .await?;
        found.map(from_record).transpose()
    }

    pub async fn find_accounts_by_user(&self, user_id: &str) -> AuthResult<Vec<Account>> {
        let found = self
            .adapter
            .find_many(
                models::ACCOUNT,
                FindManyArgs {
                    where_clause: vec![Where::eq("userId", json!(user_id))],
                    ..Default::default()
                },
            )
            .await?;
        found.into_iter().map(from_record).collect()
    }

    /// The local password account for a user, if any. At most one exists.
    pub async fn find_credential_account(&self, user_id: &str) -> AuthResult<Option<Account>> {
        let found = self
            .adapter
            .find_one(
                models::ACCOUNT,
                FindOneArgs::by(vec![
                    Where::eq("userId", json!(user_id)),
                    Where::eq("providerId", json!(crate::types::CREDENTIAL_PROVIDER_ID)),
                ]),
            )
            .await?;
        found.map(from_record).transpose()
    }

    pub async fn update_account(&self, id: &str, mut update: Value) -> AuthResult<Option<Account>> {
        if let Value::Object(map) = &mut update {
            map.insert("updatedAt".into(), json!(Utc::now()));
        }
        let updated = self
            .adapter
            .update(models::ACCOUNT, &[Where::eq("id", json!(id))], update)
            .await?;
        updated.map(from_record).transpose()
    }

    // ==================== Sessions ====================

    fn session_key(token: &str) -> String {
        format!("session:{token}")
    }

    /// Creates a session with a fresh random token and writes the
    /// secondary-storage pair when configured.
    pub async fn create_session(
        &self,
        user: &User,
        expires_in: Duration,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> AuthResult<Session> {
        let now = Utc::now();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            token: crypto::generate_token(),
            user_id: user.id.clone(),
            expires_at: now + expires_in,
            created_at: now,
            updated_at: now,
            ip_address,
            user_agent,
        };
        let created = self
            .adapter
            .create(models::SESSION, to_record(&session)?)
            .await?;
        let session: Session = from_record(created)?;
        self.cache_session(&session, user).await?;
        Ok(session)
    }

    async fn cache_session(&self, session: &Session, user: &User) -> AuthResult<()> {
        if let Some(secondary) = &self.secondary {
            let pair = SessionWithUser {
                session: session.clone(),
                user: user.clone(),
            };
            let ttl = (session.expires_at - Utc::now())
                .to_std()
                .unwrap_or_default();
            secondary
                .set(
                    &Self::session_key(&session.token),
                    &serde_json::to_string(&pair)?,
                    Some(ttl),
                )
                .await?;
        }
        Ok(())
    }

    /// Resolves a session (with user) by token: secondary storage first,
    /// then the primary database. Expired sessions read as absent.
    pub async fn find_session(&self, token: &str) -> AuthResult<Option<SessionWithUser>> {
        if let Some(secondary) = &self.secondary {
            if let Some(raw) = secondary.get(&Self::session_key(token)).await? {
                if let Ok(pair) = serde_json::from_str::<SessionWithUser>(&raw) {
                    if !pair.session.is_expired() {
                        return Ok(Some(pair));
                    }
                }
            }
        }
        let found = self
            .adapter
            .find_one(
                models::SESSION,
                FindOneArgs::by(vec![Where::eq("token", json!(token))]),
            )
            .await?;
        let Some(record) = found else { return Ok(None) };
        let session: Session = from_record(record)?;
        if session.is_expired() {
            self.delete_session(token).await?;
            return Ok(None);
        }
        let Some(user) = self.find_user_by_id(&session.user_id).await? else {
            return Ok(None);
        };
        Ok(Some(SessionWithUser { session, user }))
    }

    /// Bumps `createdAt` on sliding-window renewal and refreshes expiry.
    pub async fn renew_session(
        &self,
        token: &str,
        user: &User,
        expires_in: Duration,
    ) -> AuthResult<Option<Session>> {
        let now = Utc::now();
        let updated = self
            .adapter
            .update(
                models::SESSION,
                &[Where::eq("token", json!(token))],
                json!({
                    "createdAt": now,
                    "updatedAt": now,
                    "expiresAt": now + expires_in,
                }),
            )
            .await?;
        let Some(session) = updated.map(from_record::<Session>).transpose()? else {
            return Ok(None);
        };
        self.cache_session(&session, user).await?;
        Ok(Some(session))
    }

    pub async fn delete_session(&self, token: &str) -> AuthResult<()> {
        if let Some(secondary) = &self.secondary {
            secondary.delete(&Self::session_key(token)).await?;
        }
        self.adapter
            .delete_many(models::SESSION, &[Where::eq("token", json!(token))])
            .await?;
        Ok(())
    }

    /// Revokes every session of a user.
    pub async fn delete_user_sessions(&self, user_id: &str) -> AuthResult<()> {
        if let Some(secondary) = &self.secondary {
            let sessions = self
                .adapter
                .find_many(
                    models::SESSION,
                    FindManyArgs {
                        where_clause: vec![Where::eq("userId", json!(user_id))],
                        ..Default::default()
                    },
                )
                .await?;
            for record in sessions {
                if let Some(token) = record.get("token").and_then(Value::as_str) {
                    secondary.delete(&Self::session_key(token)).await?;
                }
            }
        }
        self.adapter
            .delete_many(models::SESSION, &[Where::eq("userId", json!(user_id))])
            .await?;
        Ok(())
    }

    // ==================== Verification values ====================

    /// Creates a verification row, replacing any prior row under the same
    /// identifier (the identifier is a key).
    pub async fn create_verification(
        &self,
        identifier: &str,
        value: &str,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<Verification> {
        self.adapter
            .delete_many(
                models::VERIFICATION,
                &[Where::eq("identifier", json!(identifier))],
            )
            .await?;
        let now = Utc::now();
        let verification = Verification {
            id: uuid::Uuid::new_v4().to_string(),
            identifier: identifier.to_string(),
            value: value.to_string(),
            expires_at,
            created_at: now,
            updated_at: now,
        };
        let created = self
            .adapter
            .create(models::VERIFICATION, to_record(&verification)?)
            .await?;
        from_record(created)
    }

    /// Finds a verification row even when expired. Callers that must
    /// distinguish "expired" from "absent" (OTP flows) use this and handle
    /// expiry themselves.
    pub async fn find_verification_including_expired(
        &self,
        identifier: &str,
    ) -> AuthResult<Option<Verification>> {
        let found = self
            .adapter
            .find_one(
                models::VERIFICATION,
                FindOneArgs::by(vec![Where::eq("identifier", json!(identifier))]),
            )
            .await?;
        found.map(from_record).transpose()
    }

    /// Finds a live verification row; expired rows are lazily removed.
    pub async fn find_verification(&self, identifier: &str) -> AuthResult<Option<Verification>> {
        let found = self
            .adapter
            .find_one(
                models::VERIFICATION,
                FindOneArgs::by(vec![Where::eq("identifier", json!(identifier))]),
            )
            .await?;
        let Some(verification) = found.map(from_record::<Verification>).transpose()? else {
            return Ok(None);
        };
        if verification.is_expired() {
            self.delete_verification(identifier).await?;
            return Ok(None);
        }
        Ok(Some(verification))
    }

    pub async fn update_verification(&self, id: &str, value: &str) -> AuthResult<()> {
        self.adapter
            .update(
                models::VERIFICATION,
                &[Where::eq("id", json!(id))],
                json!({ "value": value, "updatedAt": Utc::now() }),
            )
            .await?;
        Ok(())
    }

    /// Atomically consumes a verification row: the row is returned only if
    /// this caller's delete removed it, so concurrent consumers cannot both
    /// succeed.
    pub async fn consume_verification(&self, identifier: &str) -> AuthResult<Option<Verification>> {
        let Some(verification) = self.find_verification(identifier).await? else {
            return Ok(None);
        };
        let removed = self
            .adapter
            .delete_many(
                models::VERIFICATION,
                &[Where::eq("id", json!(verification.id))],
            )
            .await?;
        if removed == 1 {
            Ok(Some(verification))
        } else {
            Ok(None)
        }
    }

    pub async fn delete_verification(&self, identifier: &str) -> AuthResult<()> {
        self.adapter
            .delete_many(
                models::VERIFICATION,
                &[Where::eq("identifier", json!(identifier))],
            )
            .await?;
        Ok(())
    }
}
