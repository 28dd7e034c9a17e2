//! Social sign-in: `POST /sign-in/social`, `POST /link-social`, and
//! `GET /callback/:provider`.
//!
//! The callback never answers JSON errors: every failure redirects to the
//! caller's error URL (or the configured fallback) with `?error=<code>`.

use crate::context::EndpointContext;
use crate::error::{codes, ApiError, ApiResult};
use crate::oauth::{self, state as oauth_state, OAuthProviderConfig};
use crate::router::{EndpointHandler, Response};
use crate::session;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

fn provider_config<'a>(ctx: &'a EndpointContext, id: &str) -> Option<&'a OAuthProviderConfig> {
    ctx.auth.options.social_providers.iter().find(|p| p.id == id)
}

fn callback_uri(ctx: &EndpointContext, provider_id: &str) -> String {
    ctx.auth.endpoint_url(&format!("/callback/{provider_id}"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInSocialBody {
    provider: String,
    #[serde(rename = "callbackURL")]
    callback_url: Option<String>,
    #[serde(rename = "errorCallbackURL")]
    error_callback_url: Option<String>,
    #[serde(rename = "newUserCallbackURL")]
    new_user_callback_url: Option<String>,
    request_sign_up: Option<bool>,
    #[serde(default)]
    scopes: Vec<String>,
}

pub struct SignInSocial;

#[async_trait]
impl EndpointHandler for SignInSocial {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: SignInSocialBody = ctx.body()?;
        let config = provider_config(ctx, &body.provider)
            .ok_or_else(|| ApiError::not_found(codes::PROVIDER_NOT_FOUND))?;

        let (state, code_verifier) = oauth_state::generate_state(
            ctx,
            config,
            body.callback_url,
            body.error_callback_url,
            body.new_user_callback_url,
            body.request_sign_up.unwrap_or(false),
            None,
        )?;
        let challenge = code_verifier.as_deref().map(oauth::pkce_challenge);
        let url = oauth::create_authorization_url(
            config,
            &state,
            &callback_uri(ctx, &config.id),
            &body.scopes,
            challenge.as_deref(),
        );
        Ok(Response::json(json!({ "url": url, "redirect": true })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkSocialBody {
    provider: String,
    #[serde(rename = "callbackURL")]
    callback_url: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
}

pub struct LinkSocial;

#[async_trait]
impl EndpointHandler for LinkSocial {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: LinkSocialBody = ctx.body()?;
        let pair = session::get_session(ctx)
            .await?
            .ok_or_else(|| ApiError::unauthorized(codes::UNAUTHORIZED))?;
        let config = provider_config(ctx, &body.provider)
            .ok_or_else(|| ApiError::not_found(codes::PROVIDER_NOT_FOUND))?;

        let link = oauth_state::LinkTarget {
            user_id: pair.user.id.clone(),
            email: pair.user.email.clone(),
        };
        let (state, code_verifier) = oauth_state::generate_state(
            ctx,
            config,
            body.callback_url,
            None,
            None,
            false,
            Some(link),
        )?;
        let challenge = code_verifier.as_deref().map(oauth::pkce_challenge);
        let url = oauth::create_authorization_url(
            config,
            &state,
            &callback_uri(ctx, &config.id),
            &body.scopes,
            challenge.as_deref(),
        );
        Ok(Response::json(json!({ "url": url, "redirect": true })))
    }
}

pub struct Callback;

impl Callback {
    async fn run(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let provider_id = ctx
            .param("provider")
            .ok_or_else(|| ApiError::not_found(codes::PROVIDER_NOT_FOUND))?
            .to_string();
        let config = provider_config(ctx, &provider_id)
            .ok_or_else(|| ApiError::not_found(codes::PROVIDER_NOT_FOUND))?
            .clone();

        // Provider-announced failure (user denied, etc.).
        if let Some(error) = ctx.query("error") {
            return Err(ApiError::new(
                crate::error::ErrorKind::Unauthorized,
                error.to_uppercase(),
                format!("Provider returned error: {error}"),
            ));
        }

        let (state, code_verifier) = oauth_state::parse_state(ctx)?;
        let code = ctx
            .query("code")
            .ok_or_else(|| ApiError::bad_request(codes::INVALID_STATE))?;

        let client = reqwest::Client::new();
        let endpoints = oauth::resolve_endpoints(&client, &config).await?;
        let tokens = oauth::validate_authorization_code(
            &client,
            &config,
            &endpoints.token_url,
            code,
            &callback_uri(ctx, &provider_id),
            code_verifier.as_deref(),
        )
        .await
        .map_err(|err| {
            tracing::warn!(provider = %provider_id, error = %err, "code exchange failed");
            ApiError::unauthorized(codes::INVALID_TOKEN)
        })?;

        let user_info = oauth::get_user_info(
            &client,
            &config,
            endpoints.userinfo_url.as_deref(),
            &tokens,
        )
        .await
        .map_err(|err| {
            tracing::warn!(provider = %provider_id, error = %err, "userinfo failed");
            ApiError::unauthorized(codes::FAILED_TO_GET_USER_INFO)
        })?;

        let (user, is_new) =
            oauth::link::handle_oauth_user_info(ctx, &provider_id, &user_info, &tokens, &state)
                .await?;
        session::issue_session(ctx, &user, false).await?;

        let target = if is_new {
            state
                .new_user_url
                .or(state.callback_url)
                .unwrap_or_else(|| ctx.auth.base_url.clone())
        } else {
            state
                .callback_url
                .unwrap_or_else(|| ctx.auth.base_url.clone())
        };
        Ok(Response::redirect(ctx.auth.absolute_url(&target)))
    }

    /// Where failures land: the state's error URL, the global error URL,
    /// or the deployment origin.
    fn error_target(&self, ctx: &EndpointContext) -> String {
        // The state cookie may be gone or invalid; read it leniently.
        let state_error_url = ctx
            .get_signed_cookie(&ctx.auth.cookies.state().name)
            .and_then(|raw| serde_json::from_str::<oauth_state::StatePayload>(&raw).ok())
            .and_then(|payload| payload.error_url.or(payload.callback_url));
        state_error_url
            .or_else(|| ctx.auth.options.on_api_error.error_url.clone())
            .map(|url| ctx.auth.absolute_url(&url))
            .unwrap_or_else(|| ctx.auth.base_url.clone())
    }
}

#[async_trait]
impl EndpointHandler for Callback {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        match self.run(ctx).await {
            Ok(response) => Ok(response),
            Err(err) => {
                let target = self.error_target(ctx);
                let separator = if target.contains('?') { '&' } else { '?' };
                Ok(Response::redirect(format!(
                    "{target}{separator}error={}",
                    err.code.to_lowercase()
                )))
            }
        }
    }
}
