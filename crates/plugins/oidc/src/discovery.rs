//! Dynamic client registration and the discovery documents.

use crate::types::{self, OAUTH_APPLICATION_MODEL};
use crate::{error_codes, OidcConfig};
use async_trait::async_trait;
use better_auth_core::context::EndpointContext;
use better_auth_core::crypto;
use better_auth_core::error::{ApiError, ApiResult};
use better_auth_core::router::{EndpointHandler, Response};
use better_auth_core::session;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct RegisterBody {
    redirect_uris: Vec<String>,
    #[serde(default)]
    token_endpoint_auth_method: Option<String>,
    #[serde(default)]
    client_name: Option<String>,
    #[serde(default)]
    logo_uri: Option<String>,
    #[serde(default)]
    skip_consent: bool,
    #[serde(default)]
    metadata: Option<Value>,
}

pub(crate) struct Register {
    pub config: Arc<OidcConfig>,
}

#[async_trait]
impl EndpointHandler for Register {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        if !self.config.allow_dynamic_registration {
            return Err(ApiError::forbidden(error_codes::CLIENT_REGISTRATION_DISABLED));
        }
        let body: RegisterBody = ctx.body()?;
        if body.redirect_uris.is_empty() {
            return Err(ApiError::bad_request(error_codes::INVALID_AUTHORIZATION_REQUEST));
        }
        let auth_method = body
            .token_endpoint_auth_method
            .unwrap_or_else(|| "client_secret_basic".to_string());
        if !matches!(
            auth_method.as_str(),
            "client_secret_basic" | "client_secret_post" | "none"
        ) {
            return Err(ApiError::bad_request(error_codes::INVALID_AUTHORIZATION_REQUEST));
        }

        // Registration may happen signed-in (the registrant is recorded)
        // or anonymously.
        let registrant = session::get_session(ctx).await?.map(|pair| pair.user.id);

        let client_id = crypto::generate_identifier();
        // Public clients get no secret at all.
        let plain_secret = if auth_method == "none" {
            None
        } else {
            Some(crypto::generate_token())
        };
        let stored_secret = plain_secret
            .as_deref()
            .map(|secret| self.config.secret_storage.store(secret, &ctx.auth.secret))
            .transpose()?;

        let now = Utc::now();
        ctx.auth
            .adapter
            .create(
                OAUTH_APPLICATION_MODEL,
                json!({
                    "id": uuid::Uuid::new_v4().to_string(),
                    "clientId": client_id,
                    "clientSecret": stored_secret,
                    "name": body.client_name,
                    "redirectUrls": body.redirect_uris,
                    "tokenEndpointAuthMethod": auth_method,
                    "skipConsent": body.skip_consent,
                    "disabled": false,
                    "userId": registrant,
                    "logoUri": body.logo_uri,
                    "metadata": body.metadata.unwrap_or(Value::Null),
                    "createdAt": now,
                    "updatedAt": now,
                }),
            )
            .await?;
        tracing::info!(client = %client_id, "oauth client registered");

        // The plaintext secret appears exactly once, in this response.
        let mut response = json!({
            "client_id": client_id,
            "redirect_uris": body.redirect_uris,
            "token_endpoint_auth_method": auth_method,
            "client_name": body.client_name,
            "logo_uri": body.logo_uri,
        });
        if let Some(secret) = plain_secret {
            response["client_secret"] = json!(secret);
        }
        let mut response = Response::json(response);
        response.status = 201;
        Ok(response)
    }
}

pub(crate) struct WellKnown {
    pub config: Arc<OidcConfig>,
}

#[async_trait]
impl EndpointHandler for WellKnown {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let issuer = ctx.auth.base_url.clone();
        let endpoint = |path: &str| ctx.auth.endpoint_url(path);
        Ok(Response::json(json!({
            "issuer": issuer,
            "authorization_endpoint": endpoint("/oauth2/authorize"),
            "token_endpoint": endpoint("/oauth2/token"),
            "userinfo_endpoint": endpoint("/oauth2/userinfo"),
            "introspection_endpoint": endpoint("/oauth2/introspect"),
            "registration_endpoint": endpoint("/oauth2/register"),
            "jwks_uri": endpoint("/jwks"),
            "response_types_supported": ["code"],
            "grant_types_supported": ["authorization_code", "refresh_token"],
            "code_challenge_methods_supported": ["S256"],
            "token_endpoint_auth_methods_supported": [
                "client_secret_basic",
                "client_secret_post",
                "none",
            ],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": if self.config.signer.is_some() {
                json!(["EdDSA"])
            } else {
                json!(["HS256"])
            },
            "scopes_supported": ["openid", "profile", "email", "offline_access"],
            "claims_supported": ["sub", "email", "email_verified", "name", "picture"],
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_identifier_format() {
        assert_eq!(types::code_identifier("abc"), "oidc-code-abc");
    }
}
