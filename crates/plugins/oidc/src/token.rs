//! The token endpoint (client authentication, PKCE, refresh rotation),
//! userinfo, and RFC 7662 introspection.
//!
//! Token-endpoint failures answer RFC 6749 error bodies
//! (`{ "error": "invalid_grant", ... }`), not the engine's JSON error
//! shape.

use crate::types::{
    self, code_identifier, AccessTokenRecord, CodePayload, OAuthClient, OAUTH_ACCESS_TOKEN_MODEL,
};
use crate::OidcConfig;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use better_auth_core::context::EndpointContext;
use better_auth_core::crypto;
use better_auth_core::db::{FindOneArgs, Where};
use better_auth_core::error::ApiResult;
use better_auth_core::jwt::JwtCodec;
use better_auth_core::router::{EndpointHandler, Response};
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

fn oauth_error(status: u16, error: &str, description: &str) -> Response {
    let mut response = Response::json(json!({
        "error": error,
        "error_description": description,
    }));
    response.status = status;
    response
}

fn body_str<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Client credentials from the `Authorization: Basic` header or the
/// request body.
fn presented_credentials(ctx: &EndpointContext, body: &Value) -> Option<(String, Option<String>)> {
    if let Some(header) = ctx.request.header("authorization") {
        if let Some(encoded) = header.strip_prefix("Basic ") {
            let decoded = STANDARD.decode(encoded.trim()).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (id, secret) = decoded.split_once(':')?;
            return Some((id.to_string(), Some(secret.to_string())));
        }
    }
    let id = body_str(body, "client_id")?;
    Some((
        id.to_string(),
        body_str(body, "client_secret").map(String::from),
    ))
}

/// Authenticates the caller per the client's registered method. Returns
/// the client and the plaintext secret it presented (for HS256
/// fallback signing).
async fn authenticate_client(
    ctx: &EndpointContext,
    config: &OidcConfig,
    body: &Value,
) -> ApiResult<Result<(OAuthClient, Option<String>), Response>> {
    let Some((client_id, presented_secret)) = presented_credentials(ctx, body) else {
        return Ok(Err(oauth_error(401, "invalid_client", "missing client credentials")));
    };
    let Some(client) = types::find_client(ctx, &client_id).await?.filter(|c| !c.disabled) else {
        return Ok(Err(oauth_error(401, "invalid_client", "unknown client")));
    };

    match client.token_endpoint_auth_method.as_str() {
        "none" => Ok(Ok((client, presented_secret))),
        _ => {
            let Some(presented) = presented_secret.clone() else {
                return Ok(Err(oauth_error(401, "invalid_client", "client secret required")));
            };
            let Some(stored) = client.client_secret.clone() else {
                return Ok(Err(oauth_error(401, "invalid_client", "client has no secret")));
            };
            if !config
                .secret_storage
                .matches(&presented, &stored, &ctx.auth.secret)
            {
                tracing::warn!(client = %client.client_id, "client secret mismatch");
                return Ok(Err(oauth_error(401, "invalid_client", "invalid client secret")));
            }
            Ok(Ok((client, presented_secret)))
        }
    }
}

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
    scope: String,
}

/// Mints the access/refresh (and optionally id) tokens and persists the
/// record that introspection and refresh look up.
async fn issue_tokens(
    ctx: &EndpointContext,
    config: &OidcConfig,
    client: &OAuthClient,
    user_id: &str,
    scope: &str,
    nonce: Option<&str>,
    presented_secret: Option<&str>,
) -> ApiResult<TokenResponse> {
    let now = Utc::now();
    let access_expires_at = now + Duration::seconds(config.access_token_expires_in);

    let access_token = match &config.signer {
        Some(signer) => {
            let claims = json!({
                "iss": ctx.auth.base_url,
                "sub": user_id,
                "aud": client.client_id,
                "iat": now.timestamp(),
                "exp": access_expires_at.timestamp(),
                "scope": scope,
                "jti": crypto::generate_identifier(),
            });
            signer.sign(&claims)
        }
        None => crypto::generate_token(),
    };
    let refresh_token = crypto::generate_token();

    let record = AccessTokenRecord {
        id: uuid::Uuid::new_v4().to_string(),
        access_token: access_token.clone(),
        refresh_token: Some(refresh_token.clone()),
        client_id: client.client_id.clone(),
        user_id: user_id.to_string(),
        scopes: scope.to_string(),
        access_token_expires_at: access_expires_at,
        refresh_token_expires_at: Some(now + Duration::seconds(config.refresh_token_expires_in)),
        created_at: now,
        updated_at: now,
    };
    ctx.auth
        .adapter
        .create(
            OAUTH_ACCESS_TOKEN_MODEL,
            serde_json::to_value(&record).map_err(better_auth_core::AuthError::from)?,
        )
        .await?;

    let id_token = if scope.split_whitespace().any(|s| s == "openid") {
        let claims = json!({
            "iss": ctx.auth.base_url,
            "sub": user_id,
            "aud": client.client_id,
            "iat": now.timestamp(),
            "exp": access_expires_at.timestamp(),
            "nonce": nonce,
        });
        match (&config.signer, presented_secret) {
            (Some(signer), _) => Some(signer.sign(&claims)),
            // HS256 with the secret the client just authenticated with.
            (None, Some(secret)) => JwtCodec::hs256(secret).encode(&claims).ok(),
            (None, None) => None,
        }
    } else {
        None
    };

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in: config.access_token_expires_in,
        refresh_token: Some(refresh_token),
        id_token,
        scope: scope.to_string(),
    })
}

pub(crate) struct Token {
    pub config: Arc<OidcConfig>,
}

impl Token {
    async fn authorization_code_grant(
        &self,
        ctx: &EndpointContext,
        client: &OAuthClient,
        presented_secret: Option<&str>,
        body: &Value,
    ) -> ApiResult<Response> {
        let Some(code) = body_str(body, "code") else {
            return Ok(oauth_error(400, "invalid_request", "code is required"));
        };

        // Single use: whoever wins the delete owns the code.
        let Some(verification) = ctx
            .auth
            .internal
            .consume_verification(&code_identifier(code))
            .await?
        else {
            tracing::warn!(client = %client.client_id, "unknown or replayed authorization code");
            return Ok(oauth_error(400, "invalid_grant", "invalid authorization code"));
        };
        let Ok(payload) = serde_json::from_str::<CodePayload>(&verification.value) else {
            return Ok(oauth_error(400, "invalid_grant", "malformed authorization code"));
        };

        if payload.client_id != client.client_id {
            return Ok(oauth_error(400, "invalid_grant", "code was issued to another client"));
        }
        // Exact match, byte for byte.
        if body_str(body, "redirect_uri") != Some(payload.redirect_uri.as_str()) {
            return Ok(oauth_error(400, "invalid_grant", "redirect_uri mismatch"));
        }
        if let Some(challenge) = &payload.code_challenge {
            let Some(verifier) = body_str(body, "code_verifier") else {
                return Ok(oauth_error(400, "invalid_grant", "code_verifier is required"));
            };
            if crypto::sha256_base64url(verifier) != *challenge {
                return Ok(oauth_error(400, "invalid_grant", "PKCE verification failed"));
            }
        }

        let tokens = issue_tokens(
            ctx,
            &self.config,
            client,
            &payload.user_id,
            &payload.scope,
            payload.nonce.as_deref(),
            presented_secret,
        )
        .await?;
        Ok(Response::json(tokens).with_header("cache-control", "no-store"))
    }

    async fn refresh_token_grant(
        &self,
        ctx: &EndpointContext,
        client: &OAuthClient,
        presented_secret: Option<&str>,
        body: &Value,
    ) -> ApiResult<Response> {
        let Some(refresh_token) = body_str(body, "refresh_token") else {
            return Ok(oauth_error(400, "invalid_request", "refresh_token is required"));
        };
        let found = ctx
            .auth
            .adapter
            .find_one(
                OAUTH_ACCESS_TOKEN_MODEL,
                FindOneArgs::by(vec![Where::eq("refreshToken", json!(refresh_token))]),
            )
            .await?;
        let Some(record) = found.and_then(|r| serde_json::from_value::<AccessTokenRecord>(r).ok())
        else {
            return Ok(oauth_error(400, "invalid_grant", "unknown refresh token"));
        };
        if record.client_id != client.client_id {
            return Ok(oauth_error(400, "invalid_grant", "token was issued to another client"));
        }
        if record
            .refresh_token_expires_at
            .map(|exp| exp < Utc::now())
            .unwrap_or(true)
        {
            return Ok(oauth_error(400, "invalid_grant", "refresh token expired"));
        }

        // Rotation: the old pair dies with this exchange.
        ctx.auth
            .adapter
            .delete_many(OAUTH_ACCESS_TOKEN_MODEL, &[Where::eq("id", json!(record.id))])
            .await?;
        let tokens = issue_tokens(
            ctx,
            &self.config,
            client,
            &record.user_id,
            &record.scopes,
            None,
            presented_secret,
        )
        .await?;
        Ok(Response::json(tokens).with_header("cache-control", "no-store"))
    }
}

#[async_trait]
impl EndpointHandler for Token {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body = ctx.request.body.clone().unwrap_or_else(|| json!({}));
        let (client, presented_secret) =
            match authenticate_client(ctx, &self.config, &body).await? {
                Ok(authenticated) => authenticated,
                Err(response) => return Ok(response),
            };

        match body_str(&body, "grant_type") {
            Some("authorization_code") => {
                self.authorization_code_grant(ctx, &client, presented_secret.as_deref(), &body)
                    .await
            }
            Some("refresh_token") => {
                self.refresh_token_grant(ctx, &client, presented_secret.as_deref(), &body)
                    .await
            }
            _ => Ok(oauth_error(400, "unsupported_grant_type", "unsupported grant_type")),
        }
    }
}

async fn record_for_access_token(
    ctx: &EndpointContext,
    access_token: &str,
) -> ApiResult<Option<AccessTokenRecord>> {
    let found = ctx
        .auth
        .adapter
        .find_one(
            OAUTH_ACCESS_TOKEN_MODEL,
            FindOneArgs::by(vec![Where::eq("accessToken", json!(access_token))]),
        )
        .await?;
    Ok(found.and_then(|r| serde_json::from_value(r).ok()))
}

pub(crate) struct UserInfo;

#[async_trait]
impl EndpointHandler for UserInfo {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let token = ctx
            .request
            .header("authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let Some(token) = token else {
            return Ok(oauth_error(401, "invalid_token", "missing bearer token"));
        };
        let Some(record) = record_for_access_token(ctx, token).await? else {
            return Ok(oauth_error(401, "invalid_token", "unknown access token"));
        };
        if record.access_token_expires_at < Utc::now() {
            return Ok(oauth_error(401, "invalid_token", "access token expired"));
        }
        let Some(user) = ctx.auth.internal.find_user_by_id(&record.user_id).await? else {
            return Ok(oauth_error(401, "invalid_token", "user no longer exists"));
        };

        let scopes: Vec<&str> = record.scopes.split_whitespace().collect();
        let mut claims = serde_json::Map::new();
        claims.insert("sub".into(), json!(user.id));
        if scopes.contains(&"email") {
            claims.insert("email".into(), json!(user.email));
            claims.insert("email_verified".into(), json!(user.email_verified));
        }
        if scopes.contains(&"profile") {
            claims.insert("name".into(), json!(user.name));
            claims.insert("picture".into(), json!(user.image));
        }
        Ok(Response::json(Value::Object(claims)))
    }
}

pub(crate) struct Introspect {
    pub config: Arc<OidcConfig>,
}

#[async_trait]
impl EndpointHandler for Introspect {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body = ctx.request.body.clone().unwrap_or_else(|| json!({}));
        let (_client, _secret) = match authenticate_client(ctx, &self.config, &body).await? {
            Ok(authenticated) => authenticated,
            Err(response) => return Ok(response),
        };
        let Some(token) = body_str(&body, "token") else {
            return Ok(oauth_error(400, "invalid_request", "token is required"));
        };

        let record = record_for_access_token(ctx, token).await?;
        match record {
            Some(record) if record.access_token_expires_at > Utc::now() => {
                Ok(Response::json(json!({
                    "active": true,
                    "sub": record.user_id,
                    "scope": record.scopes,
                    "client_id": record.client_id,
                    "iat": record.created_at.timestamp(),
                    "exp": record.access_token_expires_at.timestamp(),
                    "token_type": "Bearer",
                })))
            }
            // Unknown and expired alike: inactive, never an error.
            _ => Ok(Response::json(json!({ "active": false }))),
        }
    }
}
