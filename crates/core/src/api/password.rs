//! Password management: forget, reset, change, set.
//!
//! Reset tokens live in the verification table as
//! `reset-password-<token>` rows valued with the user id, consumed
//! atomically on reset.

use crate::context::EndpointContext;
use crate::crypto;
use crate::error::{codes, ApiError, ApiResult};
use crate::router::{EndpointHandler, Response};
use crate::session;
use crate::tasks;
use crate::types::{Account, CREDENTIAL_PROVIDER_ID};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

fn check_bounds(ctx: &EndpointContext, password: &str) -> ApiResult<()> {
    let options = &ctx.auth.options.email_and_password;
    if password.len() < options.min_password_length {
        return Err(ApiError::bad_request(codes::PASSWORD_TOO_SHORT));
    }
    if password.len() > options.max_password_length {
        return Err(ApiError::bad_request(codes::PASSWORD_TOO_LONG));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForgetPasswordBody {
    email: String,
    redirect_to: Option<String>,
}

pub struct ForgetPassword;

#[async_trait]
impl EndpointHandler for ForgetPassword {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: ForgetPasswordBody = ctx.body()?;
        // Quiet success for unknown addresses: the response never reveals
        // whether an account exists.
        let Some(user) = ctx.auth.internal.find_user_by_email(&body.email).await? else {
            tracing::debug!("forget-password for unknown email");
            return Ok(Response::json(json!({ "status": true })));
        };

        let token = crypto::generate_token();
        let expires_at = Utc::now()
            + Duration::seconds(ctx.auth.options.email_and_password.reset_token_expires_in);
        ctx.auth
            .internal
            .create_verification(&format!("reset-password-{token}"), &user.id, expires_at)
            .await?;

        let redirect_to = body.redirect_to.unwrap_or_default();
        let url = format!(
            "{}?token={}&callbackURL={}",
            ctx.auth.endpoint_url("/reset-password"),
            urlencoding::encode(&token),
            urlencoding::encode(&redirect_to)
        );
        let sender = Arc::clone(&ctx.auth.options.email_sender);
        let user_clone = user.clone();
        tasks::run_in_background_or_await(true, "send-reset-password", async move {
            sender.send_reset_password(&user_clone, &url, &token).await
        })
        .await;

        Ok(Response::json(json!({ "status": true })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetPasswordBody {
    new_password: String,
    token: String,
}

pub struct ResetPassword;

#[async_trait]
impl EndpointHandler for ResetPassword {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: ResetPasswordBody = ctx.body()?;
        check_bounds(ctx, &body.new_password)?;

        let verification = ctx
            .auth
            .internal
            .consume_verification(&format!("reset-password-{}", body.token))
            .await?
            .ok_or_else(|| ApiError::unauthorized(codes::INVALID_TOKEN))?;
        let user_id = verification.value;

        let hash = ctx.auth.password.hash(&body.new_password).await?;
        match ctx.auth.internal.find_credential_account(&user_id).await? {
            Some(account) => {
                ctx.auth
                    .internal
                    .update_account(&account.id, json!({ "password": hash }))
                    .await?;
            }
            None => {
                // OAuth-only user resetting into a local password.
                let now = Utc::now();
                let account = Account {
                    id: uuid::Uuid::new_v4().to_string(),
                    user_id: user_id.clone(),
                    provider_id: CREDENTIAL_PROVIDER_ID.to_string(),
                    account_id: user_id.clone(),
                    password: Some(hash),
                    access_token: None,
                    refresh_token: None,
                    id_token: None,
                    access_token_expires_at: None,
                    refresh_token_expires_at: None,
                    scope: None,
                    created_at: now,
                    updated_at: now,
                };
                ctx.auth.internal.create_account(&account).await?;
            }
        }

        // Every standing session is suspect after a reset.
        ctx.auth.internal.delete_user_sessions(&user_id).await?;
        tracing::info!(user = %user_id, "password reset");
        Ok(Response::json(json!({ "status": true })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePasswordBody {
    new_password: String,
    current_password: String,
    revoke_other_sessions: Option<bool>,
}

pub struct ChangePassword;

#[async_trait]
impl EndpointHandler for ChangePassword {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: ChangePasswordBody = ctx.body()?;
        check_bounds(ctx, &body.new_password)?;
        let pair = session::get_session(ctx)
            .await?
            .ok_or_else(|| ApiError::unauthorized(codes::UNAUTHORIZED))?;

        let account = ctx
            .auth
            .internal
            .find_credential_account(&pair.user.id)
            .await?
            .ok_or_else(|| ApiError::bad_request(codes::CREDENTIAL_ACCOUNT_NOT_FOUND))?;
        let hash = account
            .password
            .as_deref()
            .ok_or_else(|| ApiError::bad_request(codes::CREDENTIAL_ACCOUNT_NOT_FOUND))?;
        if !ctx.auth.password.verify(&body.current_password, hash).await? {
            return Err(ApiError::bad_request(codes::INVALID_PASSWORD));
        }

        let new_hash = ctx.auth.password.hash(&body.new_password).await?;
        ctx.auth
            .internal
            .update_account(&account.id, json!({ "password": new_hash }))
            .await?;

        if body.revoke_other_sessions.unwrap_or(false) {
            ctx.auth.internal.delete_user_sessions(&pair.user.id).await?;
            let pair = session::issue_session(ctx, &pair.user, false).await?;
            return Ok(Response::json(json!({
                "token": pair.session.token,
                "user": pair.user,
            })));
        }
        Ok(Response::json(json!({ "token": null, "user": pair.user })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetPasswordBody {
    new_password: String,
}

pub struct SetPassword;

#[async_trait]
impl EndpointHandler for SetPassword {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: SetPasswordBody = ctx.body()?;
        check_bounds(ctx, &body.new_password)?;
        let pair = session::get_session(ctx)
            .await?
            .ok_or_else(|| ApiError::unauthorized(codes::UNAUTHORIZED))?;

        if ctx
            .auth
            .internal
            .find_credential_account(&pair.user.id)
            .await?
            .is_some()
        {
            return Err(ApiError::bad_request(codes::CREDENTIAL_ACCOUNT_ALREADY_EXISTS));
        }

        let hash = ctx.auth.password.hash(&body.new_password).await?;
        let now = Utc::now();
        let account = Account {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: pair.user.id.clone(),
            provider_id: CREDENTIAL_PROVIDER_ID.to_string(),
            account_id: pair.user.id.clone(),
            password: Some(hash),
            access_token: None,
            refresh_token: None,
            id_token: None,
            access_token_expires_at: None,
            refresh_token_expires_at: None,
            scope: None,
            created_at: now,
            updated_at: now,
        };
        ctx.auth.internal.create_account(&account).await?;
        Ok(Response::json(json!({ "status": true })))
    }
}
