//! The entry point: composes options and plugins into the immutable
//! runtime, owns the route table and hook registries, and dispatches
//! requests.
//!
//! Dispatch order: route match → origin check → rate limit → plugin
//! before hooks (registration order) → endpoint middlewares → handler →
//! plugin after hooks → cookie-jar flush. Cookie serialization happens
//! exactly once, at the end.

use crate::api;
use crate::context::{AuthContext, EndpointContext};
use crate::cookies::AuthCookies;
use crate::crypto::Argon2Hasher;
use crate::db::{AdapterFactory, AdapterFactoryConfig, DatabaseAdapter, InternalAdapter};
use crate::error::{codes, ApiError, ApiResult, AuthError, AuthResult, ErrorKind};
use crate::jwt::JwtCodec;
use crate::options::AuthOptions;
use crate::plugin::{AfterHook, BeforeHook};
use crate::rate_limit::{RateLimitStorageKind, RateLimiter, RATE_LIMIT_MODEL};
use crate::router::{Method, Request, Response, Router};
use crate::schema::{self, FieldType, SchemaDefinition, SchemaField, TableDefinition};
use crate::session;
use crate::types::SessionWithUser;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// The authentication engine.
pub struct Auth {
    ctx: Arc<AuthContext>,
    router: Router,
    before_hooks: Vec<BeforeHook>,
    after_hooks: Vec<AfterHook>,
}

impl Auth {
    /// Builds the engine from a configuration record. This is the only
    /// stage at which registries mutate.
    pub async fn new(options: AuthOptions) -> AuthResult<Self> {
        let secret = options.resolve_secret()?;
        if secret.len() < 32 {
            tracing::warn!("secret is shorter than 32 characters; use a longer one");
        }
        let base_url = options.resolve_base_url();
        let base_path = options.base_path.trim_end_matches('/').to_string();
        let secure = options.resolve_secure_cookies();

        // Merged schema: core tables, application fields, plugin tables.
        let mut merged = schema::core_schema();
        for field in &options.user.additional_fields {
            merged.add_table(TableDefinition::new("user").field(field.clone()));
        }
        for field in &options.session.additional_fields {
            merged.add_table(TableDefinition::new("session").field(field.clone()));
        }
        for plugin in &options.plugins {
            for table in plugin.schema() {
                merged.add_table(table);
            }
        }
        if options.rate_limit.storage == RateLimitStorageKind::Database {
            merged.add_table(
                TableDefinition::new(RATE_LIMIT_MODEL)
                    .field(SchemaField::new("id", FieldType::String).unique().no_input())
                    .field(SchemaField::new("key", FieldType::String).unique().no_input())
                    .field(SchemaField::new("count", FieldType::Number).no_input())
                    .field(SchemaField::new("resetAt", FieldType::Date).no_input()),
            );
        }
        let schema = Arc::new(merged);

        let raw_adapter = options
            .database
            .clone()
            .ok_or_else(|| AuthError::config("a database adapter is required"))?;
        let adapter: Arc<dyn DatabaseAdapter> = Arc::new(AdapterFactory::new(
            raw_adapter,
            AdapterFactoryConfig {
                id_strategy: options.advanced.database.generate_id,
                booleans_as_integers: options.advanced.database.booleans_as_integers,
                field_map: HashMap::new(),
            },
            schema.clone(),
        ));
        let internal = InternalAdapter::new(adapter.clone(), options.secondary_storage.clone());

        // First matching rule wins: application rules override plugin
        // rules; anything unmatched falls to the configured default.
        let mut rules = options.rate_limit.custom_rules.clone();
        for plugin in &options.plugins {
            rules.extend(plugin.rate_limit_rules());
        }
        let rate_limiter = RateLimiter::new(
            options.resolve_rate_limit_enabled(),
            options.rate_limit.window,
            options.rate_limit.max,
            rules,
            options.rate_limit.storage,
        );

        let mut error_codes: HashMap<String, String> = codes::ALL
            .iter()
            .map(|(code, message)| (code.to_string(), message.to_string()))
            .collect();
        for plugin in &options.plugins {
            for (code, message) in plugin.error_codes() {
                error_codes.insert(code.to_string(), message.to_string());
            }
        }

        let domain = if options.advanced.cross_subdomain_cookies.enabled {
            options
                .advanced
                .cross_subdomain_cookies
                .domain
                .clone()
                .or_else(|| {
                    url::Url::parse(&base_url)
                        .ok()
                        .and_then(|u| u.host_str().map(str::to_string))
                })
        } else {
            None
        };
        let cookies = AuthCookies::new(options.advanced.cookie_prefix.clone(), secure, domain);

        let password = options
            .password_hasher
            .clone()
            .unwrap_or_else(|| Arc::new(Argon2Hasher::default()));

        let mut router = Router::new();
        router.extend(api::core_endpoints(&options));
        let mut before_hooks = Vec::new();
        let mut after_hooks = Vec::new();
        for plugin in &options.plugins {
            router.extend(plugin.endpoints());
            before_hooks.extend(plugin.before_hooks());
            after_hooks.extend(plugin.after_hooks());
        }

        let plugins = options.plugins.clone();
        let jwt = JwtCodec::hs256(&secret);
        let ctx = Arc::new(AuthContext {
            options: Arc::new(options),
            secret,
            base_url,
            base_path,
            adapter,
            internal,
            cookies,
            password,
            jwt,
            rate_limiter,
            error_codes,
            schema,
        });

        for plugin in &plugins {
            plugin.init(&ctx).await?;
            tracing::debug!(plugin = plugin.id(), "plugin initialized");
        }

        Ok(Self {
            ctx,
            router,
            before_hooks,
            after_hooks,
        })
    }

    /// The immutable runtime context.
    pub fn context(&self) -> &Arc<AuthContext> {
        &self.ctx
    }

    /// The merged schema descriptor, for migrations.
    pub fn schema(&self) -> &SchemaDefinition {
        &self.ctx.schema
    }

    /// Typed endpoint invocation without HTTP.
    pub fn api(&self) -> ServerApi<'_> {
        ServerApi { auth: self }
    }

    fn relative_path(&self, path: &str) -> String {
        let stripped = path
            .strip_prefix(self.ctx.base_path.as_str())
            .unwrap_or(path);
        if stripped.is_empty() {
            "/".to_string()
        } else {
            stripped.to_string()
        }
    }

    /// Origin check: non-GET requests carrying cookies must present a
    /// trusted `Origin`.
    fn check_origin(&self, ctx: &EndpointContext) -> ApiResult<()> {
        if self.ctx.options.advanced.disable_csrf_check {
            return Ok(());
        }
        if ctx.request.method == Method::GET {
            return Ok(());
        }
        // CSRF needs ambient cookie auth to exploit; requests without
        // cookies (bearer clients, OAuth token exchanges) pass.
        if ctx.request.header("cookie").is_none() {
            return Ok(());
        }
        let Some(origin) = ctx.request.header("origin") else {
            return Ok(());
        };
        let origin = origin.trim_end_matches('/');
        if origin == self.ctx.base_url {
            return Ok(());
        }
        if self
            .ctx
            .options
            .trusted_origins
            .iter()
            .any(|t| t.trim_end_matches('/') == origin)
        {
            return Ok(());
        }
        tracing::warn!(%origin, "rejected untrusted origin");
        Err(ApiError::forbidden(codes::INVALID_ORIGIN))
    }

    /// Dispatches one request.
    pub async fn handle(&self, request: Request) -> Response {
        let path = self.relative_path(&request.path);
        let method = request.method;

        let Some((endpoint, params)) = self.router.find(method, &path) else {
            return error_response(&ApiError::new(
                ErrorKind::NotFound,
                "NOT_FOUND",
                "Not Found",
            ));
        };

        let ctx = EndpointContext::new(self.ctx.clone(), request, params);

        let mut response = match self.run_pipeline(endpoint, &ctx, &path).await {
            Ok(response) => response,
            Err(err) => {
                if err.kind == ErrorKind::InternalServerError {
                    tracing::error!(code = %err.code, %path, "request failed");
                }
                error_response(&err)
            }
        };

        for serialized in ctx.take_set_cookies() {
            response
                .headers
                .push(("set-cookie".to_string(), serialized));
        }
        response
    }

    async fn run_pipeline(
        &self,
        endpoint: &crate::router::Endpoint,
        ctx: &EndpointContext,
        path: &str,
    ) -> ApiResult<Response> {
        self.check_origin(ctx)?;

        let ip = ctx.client_ip().unwrap_or_else(|| "unknown".to_string());
        self.ctx
            .rate_limiter
            .check(
                &self.ctx.adapter,
                self.ctx.options.secondary_storage.as_ref(),
                &ip,
                path,
            )
            .await?;

        for hook in &self.before_hooks {
            if hook.matcher.matches(path) {
                hook.handler.run(ctx).await?;
            }
        }

        if endpoint.options.require_session && session::get_session(ctx).await?.is_none() {
            return Err(ApiError::unauthorized(codes::UNAUTHORIZED));
        }

        for middleware in &endpoint.options.middlewares {
            middleware.handle(ctx).await?;
        }

        let mut response = endpoint.handler.call(ctx).await?;

        for hook in &self.after_hooks {
            if hook.matcher.matches(path) {
                hook.handler.run(ctx, &mut response).await?;
            }
        }
        Ok(response)
    }
}

fn error_response(err: &ApiError) -> Response {
    let mut response = Response::new(err.kind.status());
    response.body = Some(err.body());
    response
        .headers
        .push(("content-type".to_string(), "application/json".to_string()));
    for (name, value) in &err.headers {
        response.headers.push((name.clone(), value.clone()));
    }
    response
}

/// Typed endpoint invocation without HTTP: builds requests against the
/// dispatcher and surfaces error bodies as [`ApiError`].
pub struct ServerApi<'a> {
    auth: &'a Auth,
}

impl ServerApi<'_> {
    /// Raw invocation; `headers` carries cookies/authorization.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> ApiResult<Response> {
        let mut request = Request::new(method, path);
        request.body = body;
        for (name, value) in headers {
            request = request.with_header(*name, *value);
        }
        let response = self.auth.handle(request).await;
        if response.status >= 400 {
            let body = response.body.clone().unwrap_or(Value::Null);
            let kind = match response.status {
                400 => ErrorKind::BadRequest,
                401 => ErrorKind::Unauthorized,
                403 => ErrorKind::Forbidden,
                404 => ErrorKind::NotFound,
                422 => ErrorKind::UnprocessableEntity,
                429 => ErrorKind::TooManyRequests,
                _ => ErrorKind::InternalServerError,
            };
            return Err(ApiError::new(
                kind,
                body["code"].as_str().unwrap_or("INTERNAL_SERVER_ERROR"),
                body["message"].as_str().unwrap_or("request failed"),
            ));
        }
        Ok(response)
    }

    pub async fn sign_up_email(&self, body: Value) -> ApiResult<Response> {
        self.call(Method::POST, "/sign-up/email", Some(body), &[]).await
    }

    pub async fn sign_in_email(&self, body: Value) -> ApiResult<Response> {
        self.call(Method::POST, "/sign-in/email", Some(body), &[]).await
    }

    pub async fn get_session(&self, headers: &[(&str, &str)]) -> ApiResult<Option<SessionWithUser>> {
        let response = self.call(Method::GET, "/session", None, headers).await?;
        match response.body {
            Some(Value::Null) | None => Ok(None),
            Some(body) => Ok(Some(
                serde_json::from_value(body).map_err(|_| {
                    ApiError::internal("session response did not deserialize")
                })?,
            )),
        }
    }

    pub async fn sign_out(&self, headers: &[(&str, &str)]) -> ApiResult<Response> {
        self.call(Method::POST, "/sign-out", None, headers).await
    }
}

/// Internal test helpers: a minimal adapter and pre-built contexts.
///
/// The real in-memory backend lives in the memory-adapter crate; this one
/// exists so core unit tests don't need a dependency cycle.
#[doc(hidden)]
pub mod test_support {
    use super::*;
    use crate::db::{matches_where, FindManyArgs, FindOneArgs, TxCallback, Where};
    use async_trait::async_trait;
    use tokio::sync::RwLock;

    /// Minimal in-memory backend for unit tests.
    #[derive(Default)]
    pub struct StubAdapter {
        records: RwLock<HashMap<String, Vec<Value>>>,
    }

    impl StubAdapter {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl DatabaseAdapter for StubAdapter {
        async fn create(&self, model: &str, mut data: Value) -> AuthResult<Value> {
            if data.get("id").map(Value::is_null).unwrap_or(true) {
                if let Value::Object(map) = &mut data {
                    map.insert("id".into(), Value::String(crate::crypto::generate_token()));
                }
            }
            let mut records = self.records.write().await;
            records.entry(model.to_string()).or_default().push(data.clone());
            Ok(data)
        }

        async fn find_one(&self, model: &str, args: FindOneArgs) -> AuthResult<Option<Value>> {
            let records = self.records.read().await;
            Ok(records
                .get(model)
                .and_then(|rows| rows.iter().find(|r| matches_where(r, &args.where_clause)))
                .cloned())
        }

        async fn find_many(&self, model: &str, args: FindManyArgs) -> AuthResult<Vec<Value>> {
            let records = self.records.read().await;
            Ok(records
                .get(model)
                .map(|rows| {
                    rows.iter()
                        .filter(|r| matches_where(r, &args.where_clause))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn count(&self, model: &str, where_clause: &[Where]) -> AuthResult<u64> {
            Ok(self
                .find_many(
                    model,
                    FindManyArgs {
                        where_clause: where_clause.to_vec(),
                        ..Default::default()
                    },
                )
                .await?
                .len() as u64)
        }

        async fn update(
            &self,
            model: &str,
            where_clause: &[Where],
            update: Value,
        ) -> AuthResult<Option<Value>> {
            let mut records = self.records.write().await;
            let rows = records.entry(model.to_string()).or_default();
            for row in rows.iter_mut() {
                if matches_where(row, where_clause) {
                    if let (Value::Object(target), Value::Object(patch)) = (&mut *row, &update) {
                        for (k, v) in patch {
                            target.insert(k.clone(), v.clone());
                        }
                    }
                    return Ok(Some(row.clone()));
                }
            }
            Ok(None)
        }

        async fn update_many(
            &self,
            model: &str,
            where_clause: &[Where],
            update: Value,
        ) -> AuthResult<u64> {
            let mut records = self.records.write().await;
            let rows = records.entry(model.to_string()).or_default();
            let mut affected = 0;
            for row in rows.iter_mut() {
                if matches_where(row, where_clause) {
                    if let (Value::Object(target), Value::Object(patch)) = (&mut *row, &update) {
                        for (k, v) in patch {
                            target.insert(k.clone(), v.clone());
                        }
                    }
                    affected += 1;
                }
            }
            Ok(affected)
        }

        async fn delete(&self, model: &str, where_clause: &[Where]) -> AuthResult<()> {
            let mut records = self.records.write().await;
            if let Some(rows) = records.get_mut(model) {
                if let Some(position) = rows.iter().position(|r| matches_where(r, where_clause)) {
                    rows.remove(position);
                }
            }
            Ok(())
        }

        async fn delete_many(&self, model: &str, where_clause: &[Where]) -> AuthResult<u64> {
            let mut records = self.records.write().await;
            let Some(rows) = records.get_mut(model) else {
                return Ok(0);
            };
            let before = rows.len();
            rows.retain(|r| !matches_where(r, where_clause));
            Ok((before - rows.len()) as u64)
        }

        async fn transaction(&self, callback: TxCallback) -> AuthResult<Value> {
            callback(self).await
        }
    }

    pub const TEST_SECRET: &str = "better-auth-test-secret-0123456789abcdef";

    /// Default options wired to a fresh stub adapter, email+password on.
    pub fn test_options() -> AuthOptions {
        let mut options = AuthOptions::new()
            .database(Arc::new(StubAdapter::new()))
            .secret(TEST_SECRET)
            .base_url("http://localhost:3000");
        options.email_and_password.enabled = true;
        options.rate_limit.enabled = Some(false);
        options
    }

    /// A bare runtime context (no router), for unit tests of context and
    /// cookie plumbing.
    pub fn test_context() -> Arc<AuthContext> {
        let options = test_options();
        let secret = options.resolve_secret().expect("secret");
        let schema = Arc::new(schema::core_schema());
        let adapter = options.database.clone().expect("adapter");
        let internal = InternalAdapter::new(adapter.clone(), None);
        let jwt = JwtCodec::hs256(&secret);
        Arc::new(AuthContext {
            base_url: options.resolve_base_url(),
            base_path: options.base_path.clone(),
            cookies: AuthCookies::new(options.advanced.cookie_prefix.clone(), false, None),
            password: Arc::new(Argon2Hasher::default()),
            rate_limiter: RateLimiter::disabled(),
            error_codes: HashMap::new(),
            options: Arc::new(options),
            secret,
            adapter,
            internal,
            jwt,
            schema,
        })
    }

    /// A full engine over the stub adapter.
    pub async fn test_auth(mutate: impl FnOnce(&mut AuthOptions)) -> Auth {
        let mut options = test_options();
        mutate(&mut options);
        Auth::new(options).await.expect("test auth")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{test_auth, test_options};
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let auth = test_auth(|_| {}).await;
        let response = auth.handle(Request::get("/nope")).await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_base_path_stripping() {
        let auth = test_auth(|_| {}).await;
        let response = auth
            .handle(Request::get("/api/auth/session"))
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_origin_check_rejects_untrusted() {
        let auth = test_auth(|_| {}).await;
        let request = Request::post("/sign-in/email", json!({}))
            .with_header("origin", "https://evil.example")
            .with_header("cookie", "better-auth.session_token=x.y");
        let response = auth.handle(request).await;
        assert_eq!(response.status, 403);
        assert_eq!(response.body.unwrap()["code"], "INVALID_ORIGIN");

        // Without cookies there is nothing to forge; the request passes.
        let request = Request::post("/sign-in/email", json!({}))
            .with_header("origin", "https://evil.example");
        let response = auth.handle(request).await;
        assert_ne!(response.status, 403);
    }

    #[tokio::test]
    async fn test_origin_check_accepts_base_and_trusted() {
        let auth = test_auth(|options| {
            options.trusted_origins = vec!["https://app.example".to_string()];
        })
        .await;
        for origin in ["http://localhost:3000", "https://app.example"] {
            let request = Request::post("/sign-up/email", json!({}))
                .with_header("origin", origin)
                .with_header("cookie", "a=1");
            let response = auth.handle(request).await;
            // Gets past the origin check into body validation.
            assert_ne!(response.status, 403, "origin {origin} was rejected");
        }
    }

    #[tokio::test]
    async fn test_error_shape() {
        let auth = test_auth(|_| {}).await;
        let response = auth
            .handle(Request::post("/sign-in/email", json!({ "bogus": true })))
            .await;
        assert_eq!(response.status, 400);
        let body = response.body.unwrap();
        assert_eq!(body["code"], "INVALID_BODY");
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_missing_database_is_config_error() {
        let mut options = test_options();
        options.database = None;
        assert!(Auth::new(options).await.is_err());
    }
}
