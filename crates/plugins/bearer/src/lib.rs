//! # Better Auth Bearer Plugin
//!
//! Lets non-browser clients authenticate with `Authorization: Bearer
//! <token>` instead of cookies. A before hook feeds the header token into
//! session resolution; an after hook surfaces freshly issued session
//! tokens in a `set-auth-token` response header so clients can store
//! them.

use async_trait::async_trait;
use better_auth_core::context::EndpointContext;
use better_auth_core::error::ApiResult;
use better_auth_core::plugin::{AfterHook, AfterHookHandler, AuthPlugin, BeforeHook, BeforeHookHandler};
use better_auth_core::router::{PathMatcher, Response};
use better_auth_core::session::SESSION_TOKEN_DATA_KEY;

/// Response header carrying a freshly issued session token.
pub const SET_AUTH_TOKEN_HEADER: &str = "set-auth-token";

pub struct BearerPlugin;

impl BearerPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BearerPlugin {
    fn default() -> Self {
        Self::new()
    }
}

struct ReadBearerToken;

#[async_trait]
impl BeforeHookHandler for ReadBearerToken {
    async fn run(&self, ctx: &EndpointContext) -> ApiResult<()> {
        if let Some(header) = ctx.request.header("authorization") {
            if let Some(token) = header.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    ctx.set_data(SESSION_TOKEN_DATA_KEY, token);
                }
            }
        }
        Ok(())
    }
}

struct EmitAuthToken;

#[async_trait]
impl AfterHookHandler for EmitAuthToken {
    async fn run(&self, ctx: &EndpointContext, response: &mut Response) -> ApiResult<()> {
        if let Some(pair) = ctx.pending_session() {
            response
                .headers
                .push((SET_AUTH_TOKEN_HEADER.to_string(), pair.session.token));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthPlugin for BearerPlugin {
    fn id(&self) -> &'static str {
        "bearer"
    }

    fn before_hooks(&self) -> Vec<BeforeHook> {
        vec![BeforeHook::new(PathMatcher::Any, ReadBearerToken)]
    }

    fn after_hooks(&self) -> Vec<AfterHook> {
        vec![AfterHook::new(PathMatcher::Any, EmitAuthToken)]
    }
}
