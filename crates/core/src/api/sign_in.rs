//! `POST /sign-in/email`.

use crate::context::EndpointContext;
use crate::error::{codes, ApiError, ApiResult};
use crate::router::{EndpointHandler, Response};
use crate::session;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInEmailBody {
    email: String,
    password: String,
    remember_me: Option<bool>,
    #[serde(rename = "callbackURL")]
    #[allow(dead_code)]
    callback_url: Option<String>,
}

pub struct SignInEmail;

#[async_trait]
impl EndpointHandler for SignInEmail {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: SignInEmailBody = ctx.body()?;
        let options = &ctx.auth.options.email_and_password;

        let user = match ctx.auth.internal.find_user_by_email(&body.email).await? {
            Some(user) => user,
            None => {
                // Hash anyway so unknown emails cost the same as wrong
                // passwords.
                let _ = ctx.auth.password.hash(&body.password).await;
                return Err(ApiError::unauthorized(codes::INVALID_EMAIL_OR_PASSWORD));
            }
        };

        let account = ctx
            .auth
            .internal
            .find_credential_account(&user.id)
            .await?
            .ok_or_else(|| ApiError::unauthorized(codes::INVALID_EMAIL_OR_PASSWORD))?;
        let hash = account
            .password
            .as_deref()
            .ok_or_else(|| ApiError::unauthorized(codes::INVALID_EMAIL_OR_PASSWORD))?;
        if !ctx.auth.password.verify(&body.password, hash).await? {
            tracing::debug!(user = %user.id, "password mismatch");
            return Err(ApiError::unauthorized(codes::INVALID_EMAIL_OR_PASSWORD));
        }

        if options.require_email_verification && !user.email_verified {
            return Err(ApiError::forbidden(codes::EMAIL_NOT_VERIFIED));
        }

        let dont_remember = !body.remember_me.unwrap_or(true);
        let pair = session::issue_session(ctx, &user, dont_remember).await?;
        Ok(Response::json(json!({
            "redirect": false,
            "token": pair.session.token,
            "user": user,
        })))
    }
}
