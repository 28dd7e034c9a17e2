//! # Better Auth Two-Factor Plugin
//!
//! TOTP enrollment with encrypted secret storage, emailed/SMS OTPs with
//! attempt counters, one-shot backup codes, trust-device cookies, and the
//! post-sign-in gate that withholds sessions from 2FA-enabled users until
//! a second factor verifies.

mod backup;
mod gate;
mod handlers;
mod totp;

pub use backup::{BackupCodeCipher, BackupCodeManager, BackupCodeStorage};
pub use totp::TotpManager;

use async_trait::async_trait;
use better_auth_core::context::EndpointContext;
use better_auth_core::cookies::CookieDescriptor;
use better_auth_core::crypto;
use better_auth_core::error::{ApiError, ApiResult, AuthResult};
use better_auth_core::plugin::{AfterHook, AuthPlugin};
use better_auth_core::rate_limit::RateLimitRule;
use better_auth_core::router::{Endpoint, PathMatcher};
use better_auth_core::schema::{FieldType, OnDelete, SchemaField, TableDefinition};
use better_auth_core::session;
use better_auth_core::types::{SessionWithUser, User};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// User field flagging 2FA enrollment.
pub const TWO_FACTOR_ENABLED_FIELD: &str = "twoFactorEnabled";

pub(crate) const TWO_FACTOR_MODEL: &str = "twoFactor";
pub(crate) const TWO_FACTOR_COOKIE: &str = "two_factor";
pub(crate) const TRUST_DEVICE_COOKIE: &str = "trust_device";

pub mod error_codes {
    pub const TWO_FACTOR_NOT_ENABLED: (&str, &str) =
        ("TWO_FACTOR_NOT_ENABLED", "Two-factor authentication is not enabled");
    pub const INVALID_TWO_FACTOR_COOKIE: (&str, &str) =
        ("INVALID_TWO_FACTOR_COOKIE", "Invalid two-factor cookie");
    pub const INVALID_CODE: (&str, &str) = ("INVALID_CODE", "Invalid code");
    pub const INVALID_BACKUP_CODE: (&str, &str) = ("INVALID_BACKUP_CODE", "Invalid backup code");
    pub const OTP_EXPIRED: (&str, &str) = ("OTP_EXPIRED", "OTP expired");
    pub const OTP_NOT_SENT: (&str, &str) = ("OTP_NOT_SENT", "No OTP was sent");
    pub const TOO_MANY_ATTEMPTS: (&str, &str) = ("TOO_MANY_ATTEMPTS", "Too many attempts");

    pub(crate) const ALL: &[(&str, &str)] = &[
        TWO_FACTOR_NOT_ENABLED,
        INVALID_TWO_FACTOR_COOKIE,
        INVALID_CODE,
        INVALID_BACKUP_CODE,
        OTP_EXPIRED,
        OTP_NOT_SENT,
        TOO_MANY_ATTEMPTS,
    ];
}

/// Delivery callback for 2FA OTPs.
#[async_trait]
pub trait TwoFactorOtpSender: Send + Sync {
    async fn send_otp(&self, user: &User, code: &str) -> AuthResult<()>;
}

pub struct OtpOptions {
    pub digits: usize,
    /// OTP validity period in seconds.
    pub period: i64,
    pub max_attempts: u32,
    pub sender: Option<Arc<dyn TwoFactorOtpSender>>,
}

impl Default for OtpOptions {
    fn default() -> Self {
        Self {
            digits: 6,
            period: 300,
            max_attempts: 3,
            sender: None,
        }
    }
}

pub struct TotpOptions {
    pub digits: usize,
    pub period: u64,
}

impl Default for TotpOptions {
    fn default() -> Self {
        Self {
            digits: 6,
            period: 30,
        }
    }
}

pub struct BackupCodeOptions {
    pub amount: usize,
    pub length: usize,
    pub storage: BackupCodeStorage,
}

impl Default for BackupCodeOptions {
    fn default() -> Self {
        Self {
            amount: 10,
            length: 10,
            storage: BackupCodeStorage::default(),
        }
    }
}

pub struct TwoFactorConfig {
    pub issuer: String,
    pub otp: OtpOptions,
    pub totp: TotpOptions,
    pub backup: BackupCodeOptions,
    /// Lifetime of the pending-2FA identifier; default 3 × the OTP
    /// period.
    pub pending_max_age: i64,
    /// Trust-device lifetime in seconds; default 60 days.
    pub trust_device_max_age: i64,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        let otp = OtpOptions::default();
        Self {
            issuer: "Better Auth".to_string(),
            pending_max_age: 3 * otp.period,
            trust_device_max_age: 60 * 24 * 60 * 60,
            otp,
            totp: TotpOptions::default(),
            backup: BackupCodeOptions::default(),
        }
    }
}

impl TwoFactorConfig {
    pub fn totp_manager(&self) -> TotpManager {
        TotpManager::new(self.issuer.clone(), self.totp.digits, self.totp.period)
    }

    pub fn backup_manager(&self) -> BackupCodeManager {
        BackupCodeManager::new(self.backup.amount, self.backup.length)
    }
}

/// The per-user 2FA row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TwoFactorRow {
    pub id: String,
    pub user_id: String,
    /// TOTP seed, sealed with the server secret.
    pub secret: String,
    pub backup_codes: String,
}

/// What the signed `two_factor` cookie carries.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct PendingCookie {
    pub id: String,
    pub user_id: String,
    pub exp: i64,
}

pub(crate) fn pending_identifier(id: &str) -> String {
    format!("2fa-{id}")
}

pub(crate) fn otp_identifier(user_id: &str) -> String {
    format!("2fa-otp-{user_id}")
}

pub(crate) fn trust_identifier_row(identifier: &str) -> String {
    format!("2fa-trust-{identifier}")
}

pub(crate) fn two_factor_cookie(ctx: &EndpointContext, max_age: i64) -> CookieDescriptor {
    ctx.auth.cookies.descriptor(TWO_FACTOR_COOKIE, Some(max_age))
}

pub(crate) fn trust_device_cookie(ctx: &EndpointContext, max_age: i64) -> CookieDescriptor {
    ctx.auth.cookies.descriptor(TRUST_DEVICE_COOKIE, Some(max_age))
}

pub(crate) async fn two_factor_row(
    ctx: &EndpointContext,
    user_id: &str,
) -> ApiResult<Option<TwoFactorRow>> {
    use better_auth_core::db::{FindOneArgs, Where};
    let found = ctx
        .auth
        .adapter
        .find_one(
            TWO_FACTOR_MODEL,
            FindOneArgs::by(vec![Where::eq("userId", json!(user_id))]),
        )
        .await?;
    Ok(found.and_then(|record| serde_json::from_value(record).ok()))
}

/// Parks a sign-in behind the 2FA gate: a verification row plus a signed
/// cookie carrying the pending identifier.
pub(crate) async fn create_pending(
    ctx: &EndpointContext,
    config: &TwoFactorConfig,
    user: &User,
) -> ApiResult<()> {
    let id = crypto::generate_identifier();
    let exp = Utc::now() + Duration::seconds(config.pending_max_age);
    ctx.auth
        .internal
        .create_verification(&pending_identifier(&id), &user.id, exp)
        .await?;
    let cookie_value = serde_json::to_string(&PendingCookie {
        id,
        user_id: user.id.clone(),
        exp: exp.timestamp(),
    })
    .map_err(|_| ApiError::internal("failed to serialize pending 2fa cookie"))?;
    ctx.set_signed_cookie(&two_factor_cookie(ctx, config.pending_max_age), &cookie_value)?;
    Ok(())
}

/// Resolves the pending-2FA user from the signed cookie and its
/// verification row.
pub(crate) async fn resolve_pending(
    ctx: &EndpointContext,
    config: &TwoFactorConfig,
) -> ApiResult<(User, String)> {
    let cookie_name = two_factor_cookie(ctx, config.pending_max_age).name;
    let raw = ctx
        .get_signed_cookie(&cookie_name)
        .ok_or_else(|| ApiError::unauthorized(error_codes::INVALID_TWO_FACTOR_COOKIE))?;
    let pending: PendingCookie = serde_json::from_str(&raw)
        .map_err(|_| ApiError::unauthorized(error_codes::INVALID_TWO_FACTOR_COOKIE))?;
    if pending.exp < Utc::now().timestamp() {
        return Err(ApiError::unauthorized(error_codes::INVALID_TWO_FACTOR_COOKIE));
    }
    let verification = ctx
        .auth
        .internal
        .find_verification(&pending_identifier(&pending.id))
        .await?
        .ok_or_else(|| ApiError::unauthorized(error_codes::INVALID_TWO_FACTOR_COOKIE))?;
    if verification.value != pending.user_id {
        return Err(ApiError::unauthorized(error_codes::INVALID_TWO_FACTOR_COOKIE));
    }
    let user = ctx
        .auth
        .internal
        .find_user_by_id(&pending.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized(error_codes::INVALID_TWO_FACTOR_COOKIE))?;
    Ok((user, pending.id))
}

pub(crate) fn trust_signature(secret: &str, user_id: &str, identifier: &str) -> AuthResult<String> {
    crypto::sign(secret, &format!("{user_id}!{identifier}"))
}

/// Accepts the device when the cookie's HMAC binds this user to an
/// identifier whose verification row is still live. Refreshes the cookie
/// on success.
pub(crate) async fn check_trust_device(
    ctx: &EndpointContext,
    config: &TwoFactorConfig,
    user: &User,
) -> ApiResult<bool> {
    let cookie_name = trust_device_cookie(ctx, config.trust_device_max_age).name;
    let Some(raw) = ctx.get_cookie(&cookie_name) else {
        return Ok(false);
    };
    let Some((identifier, signature)) = raw.rsplit_once('.') else {
        return Ok(false);
    };
    if !crypto::verify(
        &ctx.auth.secret,
        &format!("{}!{identifier}", user.id),
        signature,
    ) {
        return Ok(false);
    }
    let row = ctx
        .auth
        .internal
        .find_verification(&trust_identifier_row(identifier))
        .await?;
    match row {
        Some(row) if row.value == user.id => {
            issue_trust_device_with_identifier(ctx, config, user, identifier).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

pub(crate) async fn issue_trust_device(
    ctx: &EndpointContext,
    config: &TwoFactorConfig,
    user: &User,
) -> ApiResult<()> {
    let identifier = crypto::generate_identifier();
    issue_trust_device_with_identifier(ctx, config, user, &identifier).await
}

async fn issue_trust_device_with_identifier(
    ctx: &EndpointContext,
    config: &TwoFactorConfig,
    user: &User,
    identifier: &str,
) -> ApiResult<()> {
    ctx.auth
        .internal
        .create_verification(
            &trust_identifier_row(identifier),
            &user.id,
            Utc::now() + Duration::seconds(config.trust_device_max_age),
        )
        .await?;
    let signature = trust_signature(&ctx.auth.secret, &user.id, identifier)?;
    let descriptor = trust_device_cookie(ctx, config.trust_device_max_age);
    ctx.set_cookie(&descriptor, &format!("{identifier}.{signature}"));
    Ok(())
}

/// Finishes a verified second factor: real session, cleared gate cookie,
/// optional trust-device issuance.
pub(crate) async fn complete_sign_in(
    ctx: &EndpointContext,
    config: &TwoFactorConfig,
    user: &User,
    pending_id: &str,
    trust_device: bool,
) -> ApiResult<SessionWithUser> {
    ctx.auth
        .internal
        .delete_verification(&pending_identifier(pending_id))
        .await?;
    ctx.clear_cookie(&two_factor_cookie(ctx, 0));
    let pair = session::issue_session(ctx, user, false).await?;
    if trust_device {
        issue_trust_device(ctx, config, user).await?;
    }
    tracing::info!(user = %user.id, "two-factor verification completed");
    Ok(pair)
}

pub struct TwoFactorPlugin {
    config: Arc<TwoFactorConfig>,
}

impl TwoFactorPlugin {
    pub fn new(config: TwoFactorConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for TwoFactorPlugin {
    fn default() -> Self {
        Self::new(TwoFactorConfig::default())
    }
}

#[async_trait]
impl AuthPlugin for TwoFactorPlugin {
    fn id(&self) -> &'static str {
        "two-factor"
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        let config = &self.config;
        vec![
            Endpoint::post("/two-factor/enable", handlers::Enable { config: config.clone() })
                .require_session()
                .client_exposed()
                .summary("Enable 2FA: TOTP secret and backup codes"),
            Endpoint::post("/two-factor/disable", handlers::Disable { config: config.clone() })
                .require_session()
                .client_exposed()
                .summary("Disable 2FA"),
            Endpoint::post(
                "/two-factor/verify-totp",
                handlers::VerifyTotp { config: config.clone() },
            )
            .client_exposed()
            .summary("Verify a TOTP code"),
            Endpoint::post("/two-factor/send-otp", handlers::SendOtp { config: config.clone() })
                .client_exposed()
                .summary("Send a one-time code"),
            Endpoint::post(
                "/two-factor/verify-otp",
                handlers::VerifyOtp { config: config.clone() },
            )
            .client_exposed()
            .summary("Verify a one-time code"),
            Endpoint::post(
                "/two-factor/generate-backup-codes",
                handlers::GenerateBackupCodes { config: config.clone() },
            )
            .require_session()
            .client_exposed()
            .summary("Regenerate backup codes"),
            Endpoint::post(
                "/two-factor/verify-backup-code",
                handlers::VerifyBackupCode { config: config.clone() },
            )
            .client_exposed()
            .summary("Verify a backup code"),
        ]
    }

    fn after_hooks(&self) -> Vec<AfterHook> {
        vec![AfterHook::new(
            PathMatcher::Prefix("/sign-in".into()),
            gate::SignInGate {
                config: self.config.clone(),
            },
        )]
    }

    fn schema(&self) -> Vec<TableDefinition> {
        vec![
            TableDefinition::new(TWO_FACTOR_MODEL)
                .field(SchemaField::new("id", FieldType::String).unique().no_input())
                .field(
                    SchemaField::new("userId", FieldType::String)
                        .references("user", "id", OnDelete::Cascade)
                        .no_input(),
                )
                .field(SchemaField::new("secret", FieldType::String).no_input().hidden())
                .field(SchemaField::new("backupCodes", FieldType::String).no_input().hidden()),
            TableDefinition::new("user").field(
                SchemaField::optional(TWO_FACTOR_ENABLED_FIELD, FieldType::Boolean).no_input(),
            ),
        ]
    }

    fn rate_limit_rules(&self) -> Vec<RateLimitRule> {
        vec![RateLimitRule::new(
            PathMatcher::Prefix("/two-factor".into()),
            10,
            3,
        )]
    }

    fn error_codes(&self) -> &'static [(&'static str, &'static str)] {
        error_codes::ALL
    }
}
