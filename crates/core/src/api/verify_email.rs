//! Email verification: token issuance and the verify endpoint.
//!
//! Tokens are HS256 JWTs `{ email, updateTo?, iat, exp }`. The verify
//! endpoint discriminates expiry (`token_expired`) from any other decode
//! failure (`invalid_token`). Like every redirect-style flow, it
//! answers with a redirect carrying `?error=` when the caller supplied a
//! callback URL.

use super::is_valid_email;
use crate::context::EndpointContext;
use crate::error::{codes, ApiError, ApiResult};
use crate::jwt::{JwtError, VerificationClaims};
use crate::router::{EndpointHandler, Response};
use crate::session;
use crate::tasks;
use crate::types::User;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Creates a verification token for `user` and hands it to the mailer in
/// the background. `update_to` makes it a change-email token.
pub async fn issue_and_send(
    ctx: &EndpointContext,
    user: &User,
    update_to: Option<String>,
    callback_url: Option<String>,
) -> ApiResult<String> {
    let claims = VerificationClaims::new(
        &user.email,
        update_to.clone(),
        ctx.auth.options.email_verification.expires_in,
    );
    let token = ctx
        .auth
        .jwt
        .encode(&claims)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let mut url = format!(
        "{}?token={}",
        ctx.auth.endpoint_url("/verify-email"),
        urlencoding::encode(&token)
    );
    if let Some(callback) = &callback_url {
        url.push_str(&format!("&callbackURL={}", urlencoding::encode(callback)));
    }

    let sender = Arc::clone(&ctx.auth.options.email_sender);
    let user = user.clone();
    let token_for_send = token.clone();
    match update_to {
        Some(new_email) => {
            tasks::run_in_background_or_await(true, "send-change-email-verification", async move {
                sender
                    .send_change_email_verification(&user, &new_email, &url, &token_for_send)
                    .await
            })
            .await;
        }
        None => {
            tasks::run_in_background_or_await(true, "send-verification-email", async move {
                sender
                    .send_verification_email(&user, &url, &token_for_send)
                    .await
            })
            .await;
        }
    }
    Ok(token)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendVerificationEmailBody {
    email: String,
    #[serde(rename = "callbackURL")]
    callback_url: Option<String>,
}

pub struct SendVerificationEmail;

#[async_trait]
impl EndpointHandler for SendVerificationEmail {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: SendVerificationEmailBody = ctx.body()?;
        if !is_valid_email(&body.email) {
            return Err(ApiError::bad_request(codes::INVALID_EMAIL));
        }
        let user = ctx
            .auth
            .internal
            .find_user_by_email(&body.email)
            .await?
            .ok_or_else(|| ApiError::not_found(codes::USER_NOT_FOUND))?;
        issue_and_send(ctx, &user, None, body.callback_url).await?;
        Ok(Response::json(json!({ "status": true })))
    }
}

pub struct VerifyEmail;

/// On a redirect-style flow, failures land on the callback with
/// `?error=<code>`; without a callback they surface as JSON errors.
fn fail(ctx: &EndpointContext, code: (&str, &str), kind_error: ApiError) -> ApiResult<Response> {
    if let Some(callback) = ctx.query("callbackURL") {
        let target = ctx.auth.absolute_url(callback);
        let separator = if target.contains('?') { '&' } else { '?' };
        return Ok(Response::redirect(format!(
            "{target}{separator}error={}",
            code.0.to_lowercase()
        )));
    }
    Err(kind_error)
}

fn succeed(ctx: &EndpointContext) -> ApiResult<Response> {
    if let Some(callback) = ctx.query("callbackURL") {
        return Ok(Response::redirect(ctx.auth.absolute_url(callback)));
    }
    Ok(Response::json(json!({ "status": true })))
}

#[async_trait]
impl EndpointHandler for VerifyEmail {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let Some(token) = ctx.query("token") else {
            return fail(ctx, codes::INVALID_TOKEN, ApiError::bad_request(codes::INVALID_TOKEN));
        };

        let claims: VerificationClaims = match ctx.auth.jwt.decode(token) {
            Ok(claims) => claims,
            Err(JwtError::Expired) => {
                return fail(
                    ctx,
                    codes::TOKEN_EXPIRED,
                    ApiError::unauthorized(codes::TOKEN_EXPIRED),
                );
            }
            Err(_) => {
                return fail(
                    ctx,
                    codes::INVALID_TOKEN,
                    ApiError::unauthorized(codes::INVALID_TOKEN),
                );
            }
        };

        // Change-email verification: the session must belong to the
        // claimed address; the new address starts unverified and gets its
        // own token.
        if let Some(update_to) = claims.update_to.clone() {
            let Some(pair) = session::get_session(ctx).await? else {
                return fail(
                    ctx,
                    codes::UNAUTHORIZED,
                    ApiError::unauthorized(codes::UNAUTHORIZED),
                );
            };
            if !pair.user.email.eq_ignore_ascii_case(&claims.email) {
                return fail(
                    ctx,
                    codes::UNAUTHORIZED,
                    ApiError::unauthorized(codes::UNAUTHORIZED),
                );
            }
            let updated = ctx
                .auth
                .internal
                .update_user(
                    &pair.user.id,
                    json!({ "email": update_to.to_lowercase(), "emailVerified": false }),
                )
                .await?
                .ok_or_else(|| ApiError::not_found(codes::USER_NOT_FOUND))?;
            issue_and_send(ctx, &updated, None, ctx.query("callbackURL").map(String::from)).await?;
            session::refresh_cookie_cache(
                ctx,
                &crate::types::SessionWithUser {
                    session: pair.session,
                    user: updated,
                },
            )?;
            return succeed(ctx);
        }

        let Some(user) = ctx.auth.internal.find_user_by_email(&claims.email).await? else {
            return fail(
                ctx,
                codes::USER_NOT_FOUND,
                ApiError::not_found(codes::USER_NOT_FOUND),
            );
        };

        // Idempotent: re-verifying an already verified address succeeds.
        let user = if user.email_verified {
            user
        } else {
            ctx.auth
                .internal
                .update_user(&user.id, json!({ "emailVerified": true }))
                .await?
                .ok_or_else(|| ApiError::not_found(codes::USER_NOT_FOUND))?
        };
        tracing::info!(user = %user.id, "email verified");

        if ctx
            .auth
            .options
            .email_verification
            .auto_sign_in_after_verification
        {
            session::issue_session(ctx, &user, false).await?;
        }
        succeed(ctx)
    }
}
