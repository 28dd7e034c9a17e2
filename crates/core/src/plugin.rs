//! The plugin system.
//!
//! A plugin contributes through enumerated extension points only:
//! endpoints, before/after hooks, schema tables, rate-limit rules, and
//! error codes. [`crate::auth::Auth::new`] composes every registered
//! plugin once at init into flat registries; nothing mutates afterwards.

use crate::context::{AuthContext, EndpointContext};
use crate::error::{ApiResult, AuthResult};
use crate::rate_limit::RateLimitRule;
use crate::router::{Endpoint, PathMatcher, Response};
use crate::schema::TableDefinition;
use async_trait::async_trait;
use std::sync::Arc;

/// A hook that runs before matched endpoints. It may reject the request
/// or attach context data for the handler.
#[async_trait]
pub trait BeforeHookHandler: Send + Sync {
    async fn run(&self, ctx: &EndpointContext) -> ApiResult<()>;
}

/// A hook that runs after matched endpoints. It observes and may rewrite
/// the response, including appending `Set-Cookie` headers.
#[async_trait]
pub trait AfterHookHandler: Send + Sync {
    async fn run(&self, ctx: &EndpointContext, response: &mut Response) -> ApiResult<()>;
}

#[derive(Clone)]
pub struct BeforeHook {
    pub matcher: PathMatcher,
    pub handler: Arc<dyn BeforeHookHandler>,
}

impl BeforeHook {
    pub fn new(matcher: PathMatcher, handler: impl BeforeHookHandler + 'static) -> Self {
        Self {
            matcher,
            handler: Arc::new(handler),
        }
    }
}

#[derive(Clone)]
pub struct AfterHook {
    pub matcher: PathMatcher,
    pub handler: Arc<dyn AfterHookHandler>,
}

impl AfterHook {
    pub fn new(matcher: PathMatcher, handler: impl AfterHookHandler + 'static) -> Self {
        Self {
            matcher,
            handler: Arc::new(handler),
        }
    }
}

/// An authentication plugin.
#[async_trait]
pub trait AuthPlugin: Send + Sync {
    /// Unique identifier (e.g. `"two-factor"`).
    fn id(&self) -> &'static str;

    /// Endpoints this plugin contributes, relative to the base path.
    fn endpoints(&self) -> Vec<Endpoint> {
        Vec::new()
    }

    /// Hooks that run before matched endpoints, in registration order.
    fn before_hooks(&self) -> Vec<BeforeHook> {
        Vec::new()
    }

    /// Hooks that run after matched endpoints, in registration order.
    fn after_hooks(&self) -> Vec<AfterHook> {
        Vec::new()
    }

    /// Tables (or fields on existing tables) this plugin needs.
    fn schema(&self) -> Vec<TableDefinition> {
        Vec::new()
    }

    /// Extra rate-limit rules for this plugin's endpoints.
    fn rate_limit_rules(&self) -> Vec<RateLimitRule> {
        Vec::new()
    }

    /// `(code, message)` pairs merged into the error registry.
    fn error_codes(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Called once after the runtime context is assembled.
    async fn init(&self, _ctx: &AuthContext) -> AuthResult<()> {
        Ok(())
    }
}
