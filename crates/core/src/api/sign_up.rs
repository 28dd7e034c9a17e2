//! `POST /sign-up/email`.

use super::{is_valid_email, verify_email};
use crate::context::EndpointContext;
use crate::error::{codes, ApiError, ApiResult};
use crate::router::{EndpointHandler, Response};
use crate::session;
use crate::types::{Account, User, CREDENTIAL_PROVIDER_ID};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpEmailBody {
    pub name: Option<String>,
    pub email: String,
    pub password: String,
    pub image: Option<String>,
    #[serde(rename = "callbackURL")]
    pub callback_url: Option<String>,
    pub remember_me: Option<bool>,
}

pub struct SignUpEmail;

#[async_trait]
impl EndpointHandler for SignUpEmail {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: SignUpEmailBody = ctx.body()?;
        let options = &ctx.auth.options.email_and_password;

        if options.disable_sign_up {
            return Err(ApiError::forbidden(codes::SIGNUP_DISABLED));
        }
        if !is_valid_email(&body.email) {
            return Err(ApiError::bad_request(codes::INVALID_EMAIL));
        }
        if body.password.len() < options.min_password_length {
            return Err(ApiError::bad_request(codes::PASSWORD_TOO_SHORT));
        }
        if body.password.len() > options.max_password_length {
            return Err(ApiError::bad_request(codes::PASSWORD_TOO_LONG));
        }
        if ctx
            .auth
            .internal
            .find_user_by_email(&body.email)
            .await?
            .is_some()
        {
            return Err(ApiError::unprocessable(codes::USER_ALREADY_EXISTS));
        }

        let hash = ctx.auth.password.hash(&body.password).await?;

        let mut user = User::new(uuid::Uuid::new_v4().to_string(), body.email.clone());
        user.name = body.name.clone();
        user.image = body.image.clone();
        let user = ctx.auth.internal.create_user(&user).await?;

        let now = Utc::now();
        let account = Account {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            provider_id: CREDENTIAL_PROVIDER_ID.to_string(),
            account_id: user.id.clone(),
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
        tracing::info!(user = %user.id, "user signed up");

        let verification = &ctx.auth.options.email_verification;
        if verification.send_on_sign_up || options.require_email_verification {
            verify_email::issue_and_send(ctx, &user, None, body.callback_url.clone()).await?;
        }

        // Without a session there is no token to hand back.
        if options.require_email_verification || !options.auto_sign_in {
            return Ok(Response::json(json!({ "token": null, "user": user })));
        }

        let dont_remember = !body.remember_me.unwrap_or(true);
        let pair = session::issue_session(ctx, &user, dont_remember).await?;
        Ok(Response::json(json!({
            "token": pair.session.token,
            "user": user,
        })))
    }
}
