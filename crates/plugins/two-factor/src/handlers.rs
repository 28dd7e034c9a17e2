//! Request handlers for the two-factor endpoints.

use crate::{
    complete_sign_in, error_codes, otp_identifier, resolve_pending, two_factor_row, TwoFactorConfig,
    TwoFactorRow, TWO_FACTOR_ENABLED_FIELD, TWO_FACTOR_MODEL,
};
use async_trait::async_trait;
use better_auth_core::context::EndpointContext;
use better_auth_core::crypto;
use better_auth_core::db::Where;
use better_auth_core::error::{codes, ApiError, ApiResult};
use better_auth_core::router::{EndpointHandler, Response};
use better_auth_core::session;
use better_auth_core::tasks;
use better_auth_core::types::SessionWithUser;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Re-verifies the password of the signed-in user; enrollment changes
/// always demand it.
async fn verify_password(ctx: &EndpointContext, user_id: &str, password: &str) -> ApiResult<()> {
    let account = ctx
        .auth
        .internal
        .find_credential_account(user_id)
        .await?
        .ok_or_else(|| ApiError::bad_request(codes::CREDENTIAL_ACCOUNT_NOT_FOUND))?;
    let hash = account
        .password
        .as_deref()
        .ok_or_else(|| ApiError::bad_request(codes::CREDENTIAL_ACCOUNT_NOT_FOUND))?;
    if !ctx.auth.password.verify(password, hash).await? {
        return Err(ApiError::bad_request(codes::INVALID_PASSWORD));
    }
    Ok(())
}

async fn required_session(ctx: &EndpointContext) -> ApiResult<SessionWithUser> {
    session::get_session(ctx)
        .await?
        .ok_or_else(|| ApiError::unauthorized(codes::UNAUTHORIZED))
}

async fn required_row(ctx: &EndpointContext, user_id: &str) -> ApiResult<TwoFactorRow> {
    two_factor_row(ctx, user_id)
        .await?
        .ok_or_else(|| ApiError::bad_request(error_codes::TWO_FACTOR_NOT_ENABLED))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnableBody {
    password: String,
    issuer: Option<String>,
}

pub(crate) struct Enable {
    pub config: Arc<TwoFactorConfig>,
}

#[async_trait]
impl EndpointHandler for Enable {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: EnableBody = ctx.body()?;
        let pair = required_session(ctx).await?;
        verify_password(ctx, &pair.user.id, &body.password).await?;

        let totp = self.config.totp_manager();
        let secret = totp.generate_secret();
        let sealed = crypto::encrypt_string(&ctx.auth.secret, &secret)?;

        let backup = self.config.backup_manager();
        let backup_codes = backup.generate();
        let stored_codes =
            backup.encode(&ctx.auth.secret, &self.config.backup.storage, &backup_codes)?;

        // Replace any previous enrollment wholesale.
        ctx.auth
            .adapter
            .delete_many(TWO_FACTOR_MODEL, &[Where::eq("userId", json!(pair.user.id))])
            .await?;
        ctx.auth
            .adapter
            .create(
                TWO_FACTOR_MODEL,
                json!({
                    "id": uuid::Uuid::new_v4().to_string(),
                    "userId": pair.user.id,
                    "secret": sealed,
                    "backupCodes": stored_codes,
                }),
            )
            .await?;
        let user = ctx
            .auth
            .internal
            .update_user(&pair.user.id, json!({ TWO_FACTOR_ENABLED_FIELD: true }))
            .await?
            .ok_or_else(|| ApiError::not_found(codes::USER_NOT_FOUND))?;
        session::refresh_cookie_cache(
            ctx,
            &SessionWithUser {
                session: pair.session,
                user: user.clone(),
            },
        )?;

        let issuer = body.issuer.unwrap_or_else(|| self.config.issuer.clone());
        let uri = crate::TotpManager::new(issuer, self.config.totp.digits, self.config.totp.period)
            .generate_uri(&secret, &user.email)?;
        tracing::info!(user = %user.id, "two-factor enabled");

        // The plaintext backup codes appear exactly once, here.
        Ok(Response::json(json!({
            "totpURI": uri,
            "backupCodes": backup_codes,
        })))
    }
}

#[derive(Debug, Deserialize)]
struct DisableBody {
    password: String,
}

pub(crate) struct Disable {
    pub config: Arc<TwoFactorConfig>,
}

#[async_trait]
impl EndpointHandler for Disable {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: DisableBody = ctx.body()?;
        let pair = required_session(ctx).await?;
        verify_password(ctx, &pair.user.id, &body.password).await?;

        ctx.auth
            .adapter
            .delete_many(TWO_FACTOR_MODEL, &[Where::eq("userId", json!(pair.user.id))])
            .await?;
        let user = ctx
            .auth
            .internal
            .update_user(&pair.user.id, json!({ TWO_FACTOR_ENABLED_FIELD: false }))
            .await?
            .ok_or_else(|| ApiError::not_found(codes::USER_NOT_FOUND))?;

        // Re-issue the session with the updated user snapshot.
        let pair = session::issue_session(ctx, &user, false).await?;
        tracing::info!(user = %user.id, "two-factor disabled");
        Ok(Response::json(json!({ "status": true, "token": pair.session.token })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyTotpBody {
    code: String,
    trust_device: Option<bool>,
}

pub(crate) struct VerifyTotp {
    pub config: Arc<TwoFactorConfig>,
}

#[async_trait]
impl EndpointHandler for VerifyTotp {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: VerifyTotpBody = ctx.body()?;
        let (user, pending_id) = resolve_pending(ctx, &self.config).await?;
        let row = required_row(ctx, &user.id).await?;

        let secret = crypto::decrypt_string(&ctx.auth.secret, &row.secret)?;
        let valid = self
            .config
            .totp_manager()
            .verify(&secret, &user.email, &body.code)?;
        if !valid {
            return Err(ApiError::unauthorized(error_codes::INVALID_CODE));
        }

        let pair = complete_sign_in(
            ctx,
            &self.config,
            &user,
            &pending_id,
            body.trust_device.unwrap_or(false),
        )
        .await?;
        Ok(Response::json(json!({
            "token": pair.session.token,
            "user": pair.user,
        })))
    }
}

pub(crate) struct SendOtp {
    pub config: Arc<TwoFactorConfig>,
}

#[async_trait]
impl EndpointHandler for SendOtp {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let (user, _pending_id) = resolve_pending(ctx, &self.config).await?;
        let sender = self
            .config
            .otp
            .sender
            .clone()
            .ok_or_else(|| ApiError::bad_request(error_codes::OTP_NOT_SENT))?;

        let code = crypto::generate_otp(self.config.otp.digits);
        // Fresh code, counter reset.
        ctx.auth
            .internal
            .create_verification(
                &otp_identifier(&user.id),
                &format!("{code}:0"),
                Utc::now() + Duration::seconds(self.config.otp.period),
            )
            .await?;

        let user_clone = user.clone();
        tasks::run_in_background_or_await(true, "send-two-factor-otp", async move {
            sender.send_otp(&user_clone, &code).await
        })
        .await;
        Ok(Response::json(json!({ "status": true })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyOtpBody {
    code: String,
    trust_device: Option<bool>,
}

pub(crate) struct VerifyOtp {
    pub config: Arc<TwoFactorConfig>,
}

#[async_trait]
impl EndpointHandler for VerifyOtp {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: VerifyOtpBody = ctx.body()?;
        let (user, pending_id) = resolve_pending(ctx, &self.config).await?;

        let identifier = otp_identifier(&user.id);
        let verification = ctx
            .auth
            .internal
            .find_verification_including_expired(&identifier)
            .await?
            .ok_or_else(|| ApiError::bad_request(error_codes::OTP_NOT_SENT))?;
        if verification.is_expired() {
            ctx.auth.internal.delete_verification(&identifier).await?;
            return Err(ApiError::bad_request(error_codes::OTP_EXPIRED));
        }
        let (code, attempts) = verification
            .value
            .rsplit_once(':')
            .and_then(|(c, a)| Some((c.to_string(), a.parse::<u32>().ok()?)))
            .ok_or_else(|| ApiError::bad_request(error_codes::INVALID_CODE))?;

        // The ceiling gates entry: every attempt up to the configured
        // count is still evaluated, only the count+1-th is refused.
        if attempts >= self.config.otp.max_attempts {
            return Err(ApiError::forbidden(error_codes::TOO_MANY_ATTEMPTS));
        }
        if code != body.code {
            ctx.auth
                .internal
                .update_verification(&verification.id, &format!("{code}:{}", attempts + 1))
                .await?;
            return Err(ApiError::unauthorized(error_codes::INVALID_CODE));
        }

        ctx.auth.internal.delete_verification(&identifier).await?;
        let pair = complete_sign_in(
            ctx,
            &self.config,
            &user,
            &pending_id,
            body.trust_device.unwrap_or(false),
        )
        .await?;
        Ok(Response::json(json!({
            "token": pair.session.token,
            "user": pair.user,
        })))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateBackupCodesBody {
    password: String,
}

pub(crate) struct GenerateBackupCodes {
    pub config: Arc<TwoFactorConfig>,
}

#[async_trait]
impl EndpointHandler for GenerateBackupCodes {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: GenerateBackupCodesBody = ctx.body()?;
        let pair = required_session(ctx).await?;
        verify_password(ctx, &pair.user.id, &body.password).await?;
        let row = required_row(ctx, &pair.user.id).await?;

        let backup = self.config.backup_manager();
        let backup_codes = backup.generate();
        let stored =
            backup.encode(&ctx.auth.secret, &self.config.backup.storage, &backup_codes)?;
        ctx.auth
            .adapter
            .update(
                TWO_FACTOR_MODEL,
                &[Where::eq("id", json!(row.id))],
                json!({ "backupCodes": stored }),
            )
            .await?;
        // Old codes are invalid from here on.
        Ok(Response::json(json!({ "backupCodes": backup_codes })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyBackupCodeBody {
    code: String,
    trust_device: Option<bool>,
}

pub(crate) struct VerifyBackupCode {
    pub config: Arc<TwoFactorConfig>,
}

#[async_trait]
impl EndpointHandler for VerifyBackupCode {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: VerifyBackupCodeBody = ctx.body()?;
        let (user, pending_id) = resolve_pending(ctx, &self.config).await?;
        let row = required_row(ctx, &user.id).await?;

        let backup = self.config.backup_manager();
        let mut stored_codes =
            backup.decode(&ctx.auth.secret, &self.config.backup.storage, &row.backup_codes)?;
        let Some(position) = backup.position(&body.code, &stored_codes) else {
            return Err(ApiError::unauthorized(error_codes::INVALID_BACKUP_CODE));
        };

        // One-shot: the consumed code leaves storage (re-sealed when the
        // strategy encrypts).
        stored_codes.remove(position);
        let restored =
            backup.encode(&ctx.auth.secret, &self.config.backup.storage, &stored_codes)?;
        ctx.auth
            .adapter
            .update(
                TWO_FACTOR_MODEL,
                &[Where::eq("id", json!(row.id))],
                json!({ "backupCodes": restored }),
            )
            .await?;

        let pair = complete_sign_in(
            ctx,
            &self.config,
            &user,
            &pending_id,
            body.trust_device.unwrap_or(false),
        )
        .await?;
        Ok(Response::json(json!({
            "token": pair.session.token,
            "user": pair.user,
        })))
    }
}
