//! # Better Auth JWT Plugin
//!
//! Serves a JWKS endpoint backed by an Ed25519 keypair and exposes the
//! signer so other plugins (the OIDC provider in particular) can issue
//! EdDSA-signed access and id tokens against it.

mod signer;

pub use signer::EdDsaSigner;

use async_trait::async_trait;
use better_auth_core::context::EndpointContext;
use better_auth_core::error::ApiResult;
use better_auth_core::plugin::AuthPlugin;
use better_auth_core::router::{Endpoint, EndpointHandler, Response};
use serde_json::json;
use std::sync::Arc;

pub struct JwtPlugin {
    signer: Arc<EdDsaSigner>,
}

impl JwtPlugin {
    /// Creates the plugin with a fresh keypair.
    pub fn new() -> Self {
        Self {
            signer: Arc::new(EdDsaSigner::generate()),
        }
    }

    /// Creates the plugin from a persisted seed so tokens survive
    /// restarts.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signer: Arc::new(EdDsaSigner::from_seed(seed)),
        }
    }

    /// The signer handle, for wiring into the OIDC provider.
    pub fn signer(&self) -> Arc<EdDsaSigner> {
        self.signer.clone()
    }
}

impl Default for JwtPlugin {
    fn default() -> Self {
        Self::new()
    }
}

struct Jwks {
    signer: Arc<EdDsaSigner>,
}

#[async_trait]
impl EndpointHandler for Jwks {
    async fn call(&self, _ctx: &EndpointContext) -> ApiResult<Response> {
        Ok(Response::json(json!({ "keys": [self.signer.jwk()] })))
    }
}

#[async_trait]
impl AuthPlugin for JwtPlugin {
    fn id(&self) -> &'static str {
        "jwt"
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        vec![Endpoint::get(
            "/jwks",
            Jwks {
                signer: self.signer.clone(),
            },
        )
        .client_exposed()
        .summary("The JSON Web Key Set")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use better_auth_core::auth::test_support::test_auth;
    use better_auth_core::router::Request;

    #[tokio::test]
    async fn test_jwks_endpoint() {
        let plugin = Arc::new(JwtPlugin::new());
        let kid = plugin.signer().kid().to_string();
        let auth = test_auth(move |options| {
            options.plugins.push(plugin);
        })
        .await;

        let response = auth.handle(Request::get("/jwks")).await;
        assert_eq!(response.status, 200);
        let body = response.body.unwrap();
        assert_eq!(body["keys"][0]["kid"], kid.as_str());
        assert_eq!(body["keys"][0]["crv"], "Ed25519");
    }
}
