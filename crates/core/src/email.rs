//! Outbound email delivery.
//!
//! The engine never talks SMTP itself; applications provide an
//! [`EmailSender`] and the engine calls it through
//! [`crate::tasks::run_in_background_or_await`], so delivery failures are
//! logged and never fail the surrounding request.

use crate::error::AuthResult;
use crate::types::User;
use async_trait::async_trait;
use std::sync::Mutex;

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_verification_email(&self, user: &User, url: &str, token: &str) -> AuthResult<()>;

    async fn send_reset_password(&self, user: &User, url: &str, token: &str) -> AuthResult<()>;

    async fn send_change_email_verification(
        &self,
        user: &User,
        new_email: &str,
        url: &str,
        token: &str,
    ) -> AuthResult<()>;

    async fn send_delete_account_verification(
        &self,
        user: &User,
        url: &str,
        token: &str,
    ) -> AuthResult<()>;
}

/// Default sender: logs and drops. Configurations that enable email flows
/// are expected to replace it.
pub struct NoopEmailSender;

#[async_trait]
impl EmailSender for NoopEmailSender {
    async fn send_verification_email(&self, user: &User, url: &str, _token: &str) -> AuthResult<()> {
        tracing::warn!(email = %user.email, %url, "no email sender configured; dropping verification email");
        Ok(())
    }

    async fn send_reset_password(&self, user: &User, url: &str, _token: &str) -> AuthResult<()> {
        tracing::warn!(email = %user.email, %url, "no email sender configured; dropping reset email");
        Ok(())
    }

    async fn send_change_email_verification(
        &self,
        user: &User,
        new_email: &str,
        url: &str,
        _token: &str,
    ) -> AuthResult<()> {
        tracing::warn!(email = %user.email, %new_email, %url, "no email sender configured; dropping change-email verification");
        Ok(())
    }

    async fn send_delete_account_verification(
        &self,
        user: &User,
        url: &str,
        _token: &str,
    ) -> AuthResult<()> {
        tracing::warn!(email = %user.email, %url, "no email sender configured; dropping delete-account verification");
        Ok(())
    }
}

/// An email captured by [`MemoryEmailSender`].
#[derive(Debug, Clone)]
pub struct CapturedEmail {
    pub kind: &'static str,
    pub to: String,
    pub url: String,
    pub token: String,
}

/// Test sender that captures outgoing mail in memory.
#[derive(Default)]
pub struct MemoryEmailSender {
    pub sent: Mutex<Vec<CapturedEmail>>,
}

impl MemoryEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    fn capture(&self, kind: &'static str, to: &str, url: &str, token: &str) {
        self.sent.lock().expect("mailbox poisoned").push(CapturedEmail {
            kind,
            to: to.to_string(),
            url: url.to_string(),
            token: token.to_string(),
        });
    }

    /// The most recent email of `kind`, if any.
    pub fn last_of(&self, kind: &str) -> Option<CapturedEmail> {
        self.sent
            .lock()
            .expect("mailbox poisoned")
            .iter()
            .rev()
            .find(|e| e.kind == kind)
            .cloned()
    }
}

#[async_trait]
impl EmailSender for MemoryEmailSender {
    async fn send_verification_email(&self, user: &User, url: &str, token: &str) -> AuthResult<()> {
        self.capture("verification", &user.email, url, token);
        Ok(())
    }

    async fn send_reset_password(&self, user: &User, url: &str, token: &str) -> AuthResult<()> {
        self.capture("reset-password", &user.email, url, token);
        Ok(())
    }

    async fn send_change_email_verification(
        &self,
        user: &User,
        new_email: &str,
        url: &str,
        token: &str,
    ) -> AuthResult<()> {
        self.capture("change-email", new_email, url, token);
        Ok(())
    }

    async fn send_delete_account_verification(
        &self,
        user: &User,
        url: &str,
        token: &str,
    ) -> AuthResult<()> {
        self.capture("delete-account", &user.email, url, token);
        Ok(())
    }
}
