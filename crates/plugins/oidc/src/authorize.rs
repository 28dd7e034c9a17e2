//! The `/oauth2/authorize` state machine, consent and select-account
//! continuations, and the sign-in resume hook.

use crate::types::{self, code_identifier, find_consent, scopes_covered, CodePayload, OAuthClient};
use crate::{
    error_codes, OidcConfig, CONSENT_COOKIE, LOGIN_PROMPT_COOKIE, PROMPT_COOKIE_MAX_AGE,
    SELECT_ACCOUNT_COOKIE,
};
use async_trait::async_trait;
use better_auth_core::context::EndpointContext;
use better_auth_core::crypto;
use better_auth_core::db::Where;
use better_auth_core::error::{codes, ApiError, ApiResult};
use better_auth_core::plugin::AfterHookHandler;
use better_auth_core::router::{EndpointHandler, Response};
use better_auth_core::session;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// The pending authorization parameters, carried through prompt cookies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    #[serde(default)]
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl AuthorizeRequest {
    fn from_query(ctx: &EndpointContext) -> Option<Self> {
        Some(Self {
            client_id: ctx.query("client_id")?.to_string(),
            redirect_uri: ctx.query("redirect_uri")?.to_string(),
            response_type: ctx.query("response_type")?.to_string(),
            scope: ctx.query("scope").unwrap_or_default().to_string(),
            state: ctx.query("state").map(String::from),
            nonce: ctx.query("nonce").map(String::from),
            code_challenge: ctx.query("code_challenge").map(String::from),
            code_challenge_method: ctx.query("code_challenge_method").map(String::from),
            resource: ctx.query("resource").map(String::from),
            prompt: ctx.query("prompt").map(String::from),
        })
    }

    fn to_query_string(&self) -> String {
        let mut pairs = vec![
            format!("client_id={}", urlencoding::encode(&self.client_id)),
            format!("redirect_uri={}", urlencoding::encode(&self.redirect_uri)),
            format!("response_type={}", urlencoding::encode(&self.response_type)),
        ];
        if !self.scope.is_empty() {
            pairs.push(format!("scope={}", urlencoding::encode(&self.scope)));
        }
        for (name, value) in [
            ("state", &self.state),
            ("nonce", &self.nonce),
            ("code_challenge", &self.code_challenge),
            ("code_challenge_method", &self.code_challenge_method),
            ("resource", &self.resource),
            ("prompt", &self.prompt),
        ] {
            if let Some(value) = value {
                pairs.push(format!("{name}={}", urlencoding::encode(value)));
            }
        }
        pairs.join("&")
    }

    /// The client callback carrying an error, per RFC 6749 §4.1.2.1.
    fn error_redirect_uri(&self, error: &str) -> String {
        let separator = if self.redirect_uri.contains('?') { '&' } else { '?' };
        let mut url = format!("{}{separator}error={error}", self.redirect_uri);
        if let Some(state) = &self.state {
            url.push_str(&format!("&state={}", urlencoding::encode(state)));
        }
        url
    }

    fn error_redirect(&self, error: &str) -> Response {
        Response::redirect(self.error_redirect_uri(error))
    }

    /// The client callback carrying a fresh code.
    fn success_redirect_uri(&self, code: &str) -> String {
        let separator = if self.redirect_uri.contains('?') { '&' } else { '?' };
        let mut url = format!(
            "{}{separator}code={}",
            self.redirect_uri,
            urlencoding::encode(code)
        );
        if let Some(state) = &self.state {
            url.push_str(&format!("&state={}", urlencoding::encode(state)));
        }
        url
    }

    fn success_redirect(&self, code: &str) -> Response {
        Response::redirect(self.success_redirect_uri(code))
    }
}

fn prompt_cookie(
    ctx: &EndpointContext,
    name: &str,
) -> better_auth_core::cookies::CookieDescriptor {
    ctx.auth.cookies.descriptor(name, Some(PROMPT_COOKIE_MAX_AGE))
}

fn store_request(ctx: &EndpointContext, cookie: &str, request: &AuthorizeRequest) -> ApiResult<()> {
    let json = serde_json::to_string(request)
        .map_err(|_| ApiError::internal("failed to serialize authorization request"))?;
    ctx.set_signed_cookie(&prompt_cookie(ctx, cookie), &json)
}

fn take_request(ctx: &EndpointContext, cookie: &str) -> Option<AuthorizeRequest> {
    let descriptor = prompt_cookie(ctx, cookie);
    let raw = ctx.get_signed_cookie(&descriptor.name)?;
    ctx.clear_cookie(&descriptor);
    serde_json::from_str(&raw).ok()
}

/// Mints and persists a single-use authorization code.
pub(crate) async fn issue_code(
    ctx: &EndpointContext,
    config: &OidcConfig,
    request: &AuthorizeRequest,
    user_id: &str,
) -> ApiResult<String> {
    let code = crypto::generate_token();
    let payload = CodePayload {
        client_id: request.client_id.clone(),
        user_id: user_id.to_string(),
        redirect_uri: request.redirect_uri.clone(),
        scope: request.scope.clone(),
        code_challenge: request.code_challenge.clone(),
        nonce: request.nonce.clone(),
        resource: request.resource.clone(),
    };
    ctx.auth
        .internal
        .create_verification(
            &code_identifier(&code),
            &serde_json::to_string(&payload)
                .map_err(|_| ApiError::internal("failed to serialize code payload"))?,
            Utc::now() + Duration::seconds(config.code_expires_in),
        )
        .await?;
    tracing::debug!(client = %request.client_id, user = %user_id, "authorization code issued");
    Ok(code)
}

/// Records (or widens) consent for `(user, client)`.
async fn record_consent(
    ctx: &EndpointContext,
    user_id: &str,
    client_id: &str,
    scope: &str,
) -> ApiResult<()> {
    let now = Utc::now();
    match find_consent(ctx, user_id, client_id).await? {
        Some(existing) => {
            let mut scopes: Vec<String> = existing
                .scopes
                .split_whitespace()
                .map(String::from)
                .collect();
            for requested in scope.split_whitespace() {
                if !scopes.iter().any(|s| s == requested) {
                    scopes.push(requested.to_string());
                }
            }
            ctx.auth
                .adapter
                .update(
                    types::OAUTH_CONSENT_MODEL,
                    &[Where::eq("id", json!(existing.id))],
                    json!({ "scopes": scopes.join(" "), "updatedAt": now }),
                )
                .await?;
        }
        None => {
            ctx.auth
                .adapter
                .create(
                    types::OAUTH_CONSENT_MODEL,
                    json!({
                        "id": uuid::Uuid::new_v4().to_string(),
                        "userId": user_id,
                        "clientId": client_id,
                        "scopes": scope,
                        "createdAt": now,
                        "updatedAt": now,
                    }),
                )
                .await?;
        }
    }
    Ok(())
}

/// Whether the request may bypass the consent screen.
async fn consent_satisfied(
    ctx: &EndpointContext,
    client: &OAuthClient,
    request: &AuthorizeRequest,
    user_id: &str,
) -> ApiResult<bool> {
    if request.prompt.as_deref() == Some("consent") {
        return Ok(false);
    }
    if client.skip_consent {
        return Ok(true);
    }
    match find_consent(ctx, user_id, &client.client_id).await? {
        Some(consent) => Ok(scopes_covered(&consent, &request.scope)),
        None => Ok(false),
    }
}

pub(crate) struct Authorize {
    pub config: Arc<OidcConfig>,
}

#[async_trait]
impl EndpointHandler for Authorize {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        // Until the client and redirect_uri validate, nothing may be
        // redirected to.
        let request = AuthorizeRequest::from_query(ctx)
            .ok_or_else(|| ApiError::bad_request(error_codes::INVALID_AUTHORIZATION_REQUEST))?;
        let client = types::find_client(ctx, &request.client_id)
            .await?
            .filter(|c| !c.disabled)
            .ok_or_else(|| ApiError::bad_request(error_codes::INVALID_CLIENT))?;
        if !client.redirect_urls.iter().any(|u| *u == request.redirect_uri) {
            return Err(ApiError::bad_request(error_codes::INVALID_REDIRECT_URI));
        }

        if request.response_type != "code" {
            return Ok(request.error_redirect("unsupported_response_type"));
        }
        match (&request.code_challenge, &request.code_challenge_method) {
            (None, _) if self.config.require_pkce => {
                return Ok(request.error_redirect("invalid_request"));
            }
            (Some(_), Some(method)) if method != "S256" => {
                return Ok(request.error_redirect("invalid_request"));
            }
            (Some(_), None) => {
                return Ok(request.error_redirect("invalid_request"));
            }
            _ => {}
        }

        let session = session::get_session(ctx).await?;
        let needs_login = session.is_none() || request.prompt.as_deref() == Some("login");
        if needs_login {
            if request.prompt.as_deref() == Some("none") {
                return Ok(request.error_redirect("login_required"));
            }
            store_request(ctx, LOGIN_PROMPT_COOKIE, &request)?;
            let login = ctx.auth.absolute_url(&self.config.login_page);
            let separator = if login.contains('?') { '&' } else { '?' };
            return Ok(Response::redirect(format!(
                "{login}{separator}{}",
                request.to_query_string()
            )));
        }
        let pair = session.expect("checked above");

        if request.prompt.as_deref() == Some("select_account") {
            if let (Some(hook), Some(page)) = (
                &self.config.selected_account,
                &self.config.select_account_page,
            ) {
                if !hook.selected(ctx) {
                    store_request(ctx, SELECT_ACCOUNT_COOKIE, &request)?;
                    return Ok(Response::redirect(ctx.auth.absolute_url(page)));
                }
            }
        }

        if consent_satisfied(ctx, &client, &request, &pair.user.id).await? {
            let code = issue_code(ctx, &self.config, &request, &pair.user.id).await?;
            return Ok(request.success_redirect(&code));
        }
        if request.prompt.as_deref() == Some("none") {
            return Ok(request.error_redirect("consent_required"));
        }
        match &self.config.consent_page {
            Some(page) => {
                store_request(ctx, CONSENT_COOKIE, &request)?;
                Ok(Response::redirect(ctx.auth.absolute_url(page)))
            }
            None => {
                // No consent surface configured: the deployment opted out
                // of a consent screen entirely.
                let code = issue_code(ctx, &self.config, &request, &pair.user.id).await?;
                Ok(request.success_redirect(&code))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConsentBody {
    accept: bool,
}

pub(crate) struct Consent {
    pub config: Arc<OidcConfig>,
}

#[async_trait]
impl EndpointHandler for Consent {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: ConsentBody = ctx.body()?;
        let pair = session::get_session(ctx)
            .await?
            .ok_or_else(|| ApiError::unauthorized(codes::UNAUTHORIZED))?;
        let request = take_request(ctx, CONSENT_COOKIE)
            .ok_or_else(|| ApiError::bad_request(error_codes::INVALID_AUTHORIZATION_REQUEST))?;

        if !body.accept {
            tracing::debug!(client = %request.client_id, "consent denied");
            return Ok(Response::json(json!({
                "redirectURI": request.error_redirect_uri("access_denied"),
            })));
        }

        record_consent(ctx, &pair.user.id, &request.client_id, &request.scope).await?;
        let code = issue_code(ctx, &self.config, &request, &pair.user.id).await?;
        Ok(Response::json(json!({
            "redirectURI": request.success_redirect_uri(&code),
        })))
    }
}

pub(crate) struct SelectedAccount {
    pub config: Arc<OidcConfig>,
}

#[async_trait]
impl EndpointHandler for SelectedAccount {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let pair = session::get_session(ctx)
            .await?
            .ok_or_else(|| ApiError::unauthorized(codes::UNAUTHORIZED))?;
        let request = take_request(ctx, SELECT_ACCOUNT_COOKIE)
            .ok_or_else(|| ApiError::bad_request(error_codes::INVALID_AUTHORIZATION_REQUEST))?;
        let client = types::find_client(ctx, &request.client_id)
            .await?
            .filter(|c| !c.disabled)
            .ok_or_else(|| ApiError::bad_request(error_codes::INVALID_CLIENT))?;

        if consent_satisfied(ctx, &client, &request, &pair.user.id).await? {
            let code = issue_code(ctx, &self.config, &request, &pair.user.id).await?;
            return Ok(Response::json(json!({
                "redirectURI": request.success_redirect_uri(&code),
            })));
        }
        match &self.config.consent_page {
            Some(page) => {
                store_request(ctx, CONSENT_COOKIE, &request)?;
                Ok(Response::json(json!({ "redirect": ctx.auth.absolute_url(page) })))
            }
            None => {
                let code = issue_code(ctx, &self.config, &request, &pair.user.id).await?;
                Ok(Response::json(json!({
                    "redirectURI": request.success_redirect_uri(&code),
                })))
            }
        }
    }
}

/// Resumes a parked authorization once sign-in succeeds: the sign-in
/// response gains the authorize URL to continue with. The `login` prompt
/// is stripped so the resumed request does not loop.
pub(crate) struct LoginResume;

#[async_trait]
impl AfterHookHandler for LoginResume {
    async fn run(&self, ctx: &EndpointContext, response: &mut Response) -> ApiResult<()> {
        if ctx.pending_session().is_none() {
            return Ok(());
        }
        let Some(mut request) = take_request(ctx, LOGIN_PROMPT_COOKIE) else {
            return Ok(());
        };
        request.prompt = None;
        let url = format!(
            "{}?{}",
            ctx.auth.endpoint_url("/oauth2/authorize"),
            request.to_query_string()
        );
        if let Some(Value::Object(body)) = &mut response.body {
            body.insert("redirect".to_string(), Value::Bool(true));
            body.insert("url".to_string(), Value::String(url));
        }
        Ok(())
    }
}
