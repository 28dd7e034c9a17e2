//! Framework-agnostic HTTP plumbing: the request/response representation,
//! the endpoint contract, and the route table.
//!
//! Host frameworks adapt their native request type into [`Request`], call
//! [`crate::auth::Auth::handle`], and translate the returned [`Response`]
//! back. `Set-Cookie` is multi-valued, so response headers are a list, not
//! a map.

use crate::context::EndpointContext;
use crate::error::ApiResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// HTTP methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    OPTIONS,
    HEAD,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::PATCH => "PATCH",
            Method::DELETE => "DELETE",
            Method::OPTIONS => "OPTIONS",
            Method::HEAD => "HEAD",
        };
        write!(f, "{s}")
    }
}

/// A generic HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Path relative to the base path (e.g. `/sign-in/email`).
    pub path: String,
    pub query: HashMap<String, String>,
    /// Headers with lowercase names.
    pub headers: HashMap<String, String>,
    /// JSON body, if any.
    pub body: Option<Value>,
    /// Socket-level client address, if the host knows it.
    pub ip: Option<String>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: None,
            ip: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        let mut req = Self::new(Method::POST, path);
        req.body = Some(body);
        req
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Parses the `Cookie` header into name → value.
    pub fn cookies(&self) -> HashMap<String, String> {
        let Some(header) = self.header("cookie") else {
            return HashMap::new();
        };
        cookie::Cookie::split_parse(header.to_string())
            .flatten()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect()
    }
}

/// A generic HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    /// Ordered header list; names lowercase. Repeated names are allowed
    /// (`set-cookie`).
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn json<T: Serialize>(body: T) -> Self {
        let mut res = Self::ok();
        res.body = serde_json::to_value(body).ok();
        res.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        res
    }

    /// A 302 redirect.
    pub fn redirect(location: impl Into<String>) -> Self {
        let mut res = Self::new(302);
        res.headers.push(("location".to_string(), location.into()));
        res
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into().to_lowercase(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// All values of a repeated header (`set-cookie`).
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn is_redirect(&self) -> bool {
        self.status == 302 || self.status == 301 || self.status == 303
    }
}

/// Matches request paths for hooks and rate-limit rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatcher {
    Exact(String),
    Prefix(String),
    Any,
}

impl PathMatcher {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(p) => p == path,
            Self::Prefix(p) => path.starts_with(p.as_str()),
            Self::Any => true,
        }
    }
}

/// An endpoint handler. Receives the request-scoped context; returns a
/// response or raises an [`crate::error::ApiError`].
#[async_trait]
pub trait EndpointHandler: Send + Sync {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response>;
}

/// Middleware running before an endpoint's handler. May reject or attach
/// context data.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, ctx: &EndpointContext) -> ApiResult<()>;
}

/// OpenAPI-ish metadata, purely informational.
#[derive(Debug, Clone, Default)]
pub struct EndpointMetadata {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// Declarative endpoint options.
#[derive(Clone, Default)]
pub struct EndpointOptions {
    /// Reject with 401 unless a session resolves.
    pub require_session: bool,
    /// The handler needs the raw inbound headers (cookie-reading flows).
    pub require_headers: bool,
    /// Whether client SDKs should expose this endpoint.
    pub client_exposed: bool,
    pub metadata: EndpointMetadata,
    /// Ordered middlewares that run before the handler.
    pub middlewares: Vec<Arc<dyn Middleware>>,
}

/// A declared (method, path) with its handler and options.
#[derive(Clone)]
pub struct Endpoint {
    pub method: Method,
    /// May contain `:param` segments (`/callback/:provider`).
    pub path: String,
    pub options: EndpointOptions,
    pub handler: Arc<dyn EndpointHandler>,
}

impl Endpoint {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        handler: impl EndpointHandler + 'static,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            options: EndpointOptions::default(),
            handler: Arc::new(handler),
        }
    }

    pub fn get(path: impl Into<String>, handler: impl EndpointHandler + 'static) -> Self {
        Self::new(Method::GET, path, handler)
    }

    pub fn post(path: impl Into<String>, handler: impl EndpointHandler + 'static) -> Self {
        Self::new(Method::POST, path, handler)
    }

    pub fn require_session(mut self) -> Self {
        self.options.require_session = true;
        self
    }

    pub fn require_headers(mut self) -> Self {
        self.options.require_headers = true;
        self
    }

    pub fn client_exposed(mut self) -> Self {
        self.options.client_exposed = true;
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.options.metadata.summary = Some(summary.into());
        self
    }

    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.options.middlewares.push(Arc::new(middleware));
        self
    }
}

/// The route table, keyed by `(method, path)` with `:param` support.
#[derive(Default)]
pub struct Router {
    endpoints: Vec<Endpoint>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, endpoint: Endpoint) {
        self.endpoints.push(endpoint);
    }

    pub fn extend(&mut self, endpoints: Vec<Endpoint>) {
        self.endpoints.extend(endpoints);
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    /// Resolves a request path, returning the endpoint and extracted path
    /// parameters. Exact matches win over `:param` patterns.
    pub fn find(&self, method: Method, path: &str) -> Option<(&Endpoint, HashMap<String, String>)> {
        if let Some(endpoint) = self
            .endpoints
            .iter()
            .find(|e| e.method == method && e.path == path)
        {
            return Some((endpoint, HashMap::new()));
        }
        self.endpoints
            .iter()
            .filter(|e| e.method == method && e.path.contains(':'))
            .find_map(|e| match_pattern(&e.path, path).map(|params| (e, params)))
    }
}

fn match_pattern(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if pattern_segments.len() != path_segments.len() {
        return None;
    }
    let mut params = HashMap::new();
    for (p, s) in pattern_segments.iter().zip(path_segments.iter()) {
        if let Some(name) = p.strip_prefix(':') {
            params.insert(name.to_string(), s.to_string());
        } else if p != s {
            return None;
        }
    }
    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    #[async_trait]
    impl EndpointHandler for Dummy {
        async fn call(&self, _ctx: &EndpointContext) -> ApiResult<Response> {
            Ok(Response::ok())
        }
    }

    #[test]
    fn test_exact_match() {
        let mut router = Router::new();
        router.add(Endpoint::post("/sign-in/email", Dummy));
        assert!(router.find(Method::POST, "/sign-in/email").is_some());
        assert!(router.find(Method::GET, "/sign-in/email").is_none());
        assert!(router.find(Method::POST, "/sign-in/email/x").is_none());
    }

    #[test]
    fn test_param_match() {
        let mut router = Router::new();
        router.add(Endpoint::get("/callback/:provider", Dummy));
        let (_, params) = router.find(Method::GET, "/callback/github").unwrap();
        assert_eq!(params.get("provider").map(String::as_str), Some("github"));
        assert!(router.find(Method::GET, "/callback").is_none());
        assert!(router.find(Method::GET, "/callback/a/b").is_none());
    }

    #[test]
    fn test_exact_wins_over_param() {
        let mut router = Router::new();
        router.add(Endpoint::get("/callback/:provider", Dummy));
        router.add(Endpoint::get("/callback/special", Dummy));
        let (endpoint, params) = router.find(Method::GET, "/callback/special").unwrap();
        assert_eq!(endpoint.path, "/callback/special");
        assert!(params.is_empty());
    }

    #[test]
    fn test_cookie_parsing() {
        let req = Request::get("/session")
            .with_header("Cookie", "a=1; better-auth.session_token=tok.sig");
        let cookies = req.cookies();
        assert_eq!(cookies.get("a").map(String::as_str), Some("1"));
        assert_eq!(
            cookies.get("better-auth.session_token").map(String::as_str),
            Some("tok.sig")
        );
    }

    #[test]
    fn test_response_multi_header() {
        let res = Response::ok()
            .with_header("Set-Cookie", "a=1")
            .with_header("set-cookie", "b=2");
        assert_eq!(res.header_values("set-cookie"), vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_path_matcher() {
        assert!(PathMatcher::Exact("/sign-in/email".into()).matches("/sign-in/email"));
        assert!(PathMatcher::Prefix("/sign-in".into()).matches("/sign-in/social"));
        assert!(!PathMatcher::Prefix("/sign-in".into()).matches("/sign-up/email"));
        assert!(PathMatcher::Any.matches("/whatever"));
    }
}
