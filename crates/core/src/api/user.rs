//! User management: update profile, change email, delete user.

use super::{is_valid_email, verify_email};
use crate::context::EndpointContext;
use crate::crypto;
use crate::error::{codes, ApiError, ApiResult};
use crate::router::{EndpointHandler, Response};
use crate::session;
use crate::tasks;
use crate::types::SessionWithUser;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateUserBody {
    name: Option<String>,
    image: Option<String>,
}

pub struct UpdateUser;

#[async_trait]
impl EndpointHandler for UpdateUser {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: UpdateUserBody = ctx.body()?;
        let pair = session::get_session(ctx)
            .await?
            .ok_or_else(|| ApiError::unauthorized(codes::UNAUTHORIZED))?;

        let mut update = serde_json::Map::new();
        if let Some(name) = body.name {
            update.insert("name".into(), json!(name));
        }
        if let Some(image) = body.image {
            update.insert("image".into(), json!(image));
        }
        let user = if update.is_empty() {
            pair.user.clone()
        } else {
            ctx.auth
                .internal
                .update_user(&pair.user.id, json!(update))
                .await?
                .ok_or_else(|| ApiError::not_found(codes::USER_NOT_FOUND))?
        };

        // The snapshot in the cookie cache is stale now.
        session::refresh_cookie_cache(
            ctx,
            &SessionWithUser {
                session: pair.session,
                user: user.clone(),
            },
        )?;
        Ok(Response::json(json!({ "user": user })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeEmailBody {
    new_email: String,
    #[serde(rename = "callbackURL")]
    callback_url: Option<String>,
}

pub struct ChangeEmail;

#[async_trait]
impl EndpointHandler for ChangeEmail {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: ChangeEmailBody = ctx.body()?;
        let pair = session::get_session(ctx)
            .await?
            .ok_or_else(|| ApiError::unauthorized(codes::UNAUTHORIZED))?;

        if !is_valid_email(&body.new_email) {
            return Err(ApiError::bad_request(codes::INVALID_EMAIL));
        }
        let new_email = body.new_email.to_lowercase();
        if new_email == pair.user.email {
            return Err(ApiError::bad_request(codes::EMAIL_CAN_NOT_BE_UPDATED));
        }
        if ctx.auth.internal.find_user_by_email(&new_email).await?.is_some() {
            return Err(ApiError::unprocessable(codes::USER_ALREADY_EXISTS));
        }

        if pair.user.email_verified {
            // Verified addresses change through a token sent to the
            // current address carrying `updateTo`.
            verify_email::issue_and_send(
                ctx,
                &pair.user,
                Some(new_email),
                body.callback_url,
            )
            .await?;
            return Ok(Response::json(json!({ "status": true, "verificationSent": true })));
        }

        let user = ctx
            .auth
            .internal
            .update_user(&pair.user.id, json!({ "email": new_email }))
            .await?
            .ok_or_else(|| ApiError::not_found(codes::USER_NOT_FOUND))?;
        session::refresh_cookie_cache(
            ctx,
            &SessionWithUser {
                session: pair.session,
                user: user.clone(),
            },
        )?;
        Ok(Response::json(json!({ "status": true, "user": user })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteUserBody {
    password: Option<String>,
    token: Option<String>,
    #[serde(rename = "callbackURL")]
    callback_url: Option<String>,
}

pub struct DeleteUser;

#[async_trait]
impl EndpointHandler for DeleteUser {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: DeleteUserBody = ctx.body()?;
        let pair = session::get_session(ctx)
            .await?
            .ok_or_else(|| ApiError::unauthorized(codes::UNAUTHORIZED))?;

        // A previously emailed confirmation token deletes immediately.
        if let Some(token) = &body.token {
            let verification = ctx
                .auth
                .internal
                .consume_verification(&format!("delete-account-{token}"))
                .await?
                .ok_or_else(|| ApiError::unauthorized(codes::INVALID_TOKEN))?;
            if verification.value != pair.user.id {
                return Err(ApiError::unauthorized(codes::INVALID_TOKEN));
            }
            ctx.auth.internal.delete_user(&pair.user.id).await?;
            session::clear_session_cookies(ctx);
            ctx.clear_pending_session();
            tracing::info!(user = %pair.user.id, "user deleted");
            return Ok(Response::json(json!({ "success": true })));
        }

        let Some(password) = &body.password else {
            return Err(ApiError::bad_request(codes::INVALID_BODY));
        };
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
        if !ctx.auth.password.verify(password, hash).await? {
            return Err(ApiError::bad_request(codes::INVALID_PASSWORD));
        }

        if ctx.auth.options.user.delete_user_send_verification {
            let token = crypto::generate_token();
            ctx.auth
                .internal
                .create_verification(
                    &format!("delete-account-{token}"),
                    &pair.user.id,
                    Utc::now() + Duration::hours(24),
                )
                .await?;
            let url = format!(
                "{}?token={}&callbackURL={}",
                ctx.auth.endpoint_url("/delete-user"),
                urlencoding::encode(&token),
                urlencoding::encode(&body.callback_url.unwrap_or_default())
            );
            let sender = Arc::clone(&ctx.auth.options.email_sender);
            let user = pair.user.clone();
            tasks::run_in_background_or_await(true, "send-delete-account-verification", async move {
                sender.send_delete_account_verification(&user, &url, &token).await
            })
            .await;
            return Ok(Response::json(json!({ "success": true, "verificationSent": true })));
        }

        ctx.auth.internal.delete_user(&pair.user.id).await?;
        session::clear_session_cookies(ctx);
        ctx.clear_pending_session();
        tracing::info!(user = %pair.user.id, "user deleted");
        Ok(Response::json(json!({ "success": true })))
    }
}
