//! Request-time contexts.
//!
//! [`AuthContext`] is the immutable runtime built once at init: secret,
//! URLs, adapter, cookie descriptors, registries. [`EndpointContext`] is
//! constructed per request by the dispatcher and carries the parsed
//! request, cookie helpers, and the pending-session slot that cookie
//! serialization reads at response time.

use crate::cookies::{self, AuthCookies, CookieDescriptor};
use crate::crypto::PasswordHasher;
use crate::db::{DatabaseAdapter, InternalAdapter};
use crate::error::{codes, ApiError, ApiResult};
use crate::jwt::JwtCodec;
use crate::options::AuthOptions;
use crate::rate_limit::RateLimiter;
use crate::router::Request;
use crate::schema::SchemaDefinition;
use crate::types::SessionWithUser;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The immutable runtime context derived from [`AuthOptions`] at init.
pub struct AuthContext {
    pub options: Arc<AuthOptions>,
    pub secret: String,
    /// Origin of the deployment, no trailing slash.
    pub base_url: String,
    /// Mount path of the auth endpoints (default `/api/auth`).
    pub base_path: String,
    pub adapter: Arc<dyn DatabaseAdapter>,
    pub internal: InternalAdapter,
    pub cookies: AuthCookies,
    pub password: Arc<dyn PasswordHasher>,
    pub jwt: JwtCodec,
    pub rate_limiter: RateLimiter,
    /// Merged `(code -> message)` registry: core plus plugin contributions.
    pub error_codes: HashMap<String, String>,
    pub schema: Arc<SchemaDefinition>,
}

impl AuthContext {
    /// Absolute URL of an auth endpoint (`/verify-email` →
    /// `https://host/api/auth/verify-email`).
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, self.base_path, path)
    }

    /// Resolves a possibly-relative callback URL against the base origin.
    pub fn absolute_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url, url)
        }
    }
}

/// The request-scoped context endpoints and hooks receive.
pub struct EndpointContext {
    pub auth: Arc<AuthContext>,
    pub request: Request,
    /// Path parameters extracted by the router (`:provider`).
    pub params: HashMap<String, String>,
    request_cookies: HashMap<String, String>,
    /// Pending `Set-Cookie` values, keyed by cookie name (last write per
    /// name wins).
    jar: Mutex<Vec<(String, String)>>,
    /// Session issued by this request, if any; read at response time for
    /// cookie-cache re-issue and by after hooks.
    pending_session: Mutex<Option<SessionWithUser>>,
    /// Memoized result of session resolution.
    session_memo: Mutex<Option<Option<SessionWithUser>>>,
    /// Free-form slots for hook ↔ endpoint communication.
    data: Mutex<HashMap<String, Value>>,
}

impl EndpointContext {
    pub fn new(auth: Arc<AuthContext>, request: Request, params: HashMap<String, String>) -> Self {
        let request_cookies = request.cookies();
        Self {
            auth,
            request,
            params,
            request_cookies,
            jar: Mutex::new(Vec::new()),
            pending_session: Mutex::new(None),
            session_memo: Mutex::new(None),
            data: Mutex::new(HashMap::new()),
        }
    }

    // ==================== Request access ====================

    /// Deserializes the JSON body, or raises `INVALID_BODY`.
    pub fn body<T: DeserializeOwned>(&self) -> ApiResult<T> {
        let body = self
            .request
            .body
            .clone()
            .ok_or_else(|| ApiError::bad_request(codes::INVALID_BODY))?;
        serde_json::from_value(body).map_err(|_| ApiError::bad_request(codes::INVALID_BODY))
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.request.query.get(name).map(String::as_str)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Client IP: configured forwarding headers first, socket address last.
    pub fn client_ip(&self) -> Option<String> {
        for header in &self.auth.options.advanced.ip_address_headers {
            if let Some(value) = self.request.header(header) {
                if let Some(first) = value.split(',').next() {
                    let trimmed = first.trim();
                    if !trimmed.is_empty() {
                        return Some(trimmed.to_string());
                    }
                }
            }
        }
        self.request.ip.clone()
    }

    pub fn user_agent(&self) -> Option<String> {
        self.request.header("user-agent").map(str::to_string)
    }

    // ==================== Cookies ====================

    pub fn request_cookies(&self) -> &HashMap<String, String> {
        &self.request_cookies
    }

    pub fn get_cookie(&self, name: &str) -> Option<String> {
        self.request_cookies.get(name).cloned().filter(|v| !v.is_empty())
    }

    /// Reads and verifies a signed cookie; `None` on absence or bad
    /// signature.
    pub fn get_signed_cookie(&self, name: &str) -> Option<String> {
        let raw = self.get_cookie(name)?;
        cookies::verify_cookie_value(&self.auth.secret, name, &raw)
    }

    fn push_set_cookie(&self, name: String, serialized: String) {
        let mut jar = self.jar.lock().expect("cookie jar poisoned");
        if let Some(slot) = jar.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = serialized;
        } else {
            jar.push((name, serialized));
        }
    }

    pub fn set_cookie(&self, descriptor: &CookieDescriptor, value: &str) {
        self.push_set_cookie(descriptor.name.clone(), cookies::make_cookie(descriptor, value));
    }

    pub fn set_signed_cookie(&self, descriptor: &CookieDescriptor, value: &str) -> ApiResult<()> {
        let signed = cookies::sign_cookie_value(&self.auth.secret, &descriptor.name, value)
            .map_err(ApiError::from)?;
        self.set_cookie(descriptor, &signed);
        Ok(())
    }

    /// Writes a possibly chunked cookie (session-data cache).
    pub fn set_chunked_cookie(&self, descriptor: &CookieDescriptor, value: &str) {
        for serialized in cookies::write_chunked(descriptor, value, &self.request_cookies) {
            // Chunk names differ per cookie; key the jar by serialized name.
            let name = serialized.split('=').next().unwrap_or_default().to_string();
            self.push_set_cookie(name, serialized);
        }
    }

    /// Reads a possibly chunked cookie value from the request.
    pub fn get_chunked_cookie(&self, name: &str) -> Option<String> {
        cookies::read_chunked(name, &self.request_cookies)
    }

    pub fn clear_cookie(&self, descriptor: &CookieDescriptor) {
        self.push_set_cookie(
            descriptor.name.clone(),
            cookies::clear_cookie(descriptor, &descriptor.name),
        );
    }

    /// Drains the pending `Set-Cookie` values (dispatcher-only).
    pub fn take_set_cookies(&self) -> Vec<String> {
        self.jar
            .lock()
            .expect("cookie jar poisoned")
            .drain(..)
            .map(|(_, serialized)| serialized)
            .collect()
    }

    // ==================== Session slots ====================

    pub fn set_pending_session(&self, session: SessionWithUser) {
        *self.pending_session.lock().expect("session slot poisoned") = Some(session.clone());
        // A fresh session is also the resolved session for the rest of
        // this request.
        *self.session_memo.lock().expect("session memo poisoned") = Some(Some(session));
    }

    pub fn pending_session(&self) -> Option<SessionWithUser> {
        self.pending_session.lock().expect("session slot poisoned").clone()
    }

    pub fn clear_pending_session(&self) {
        *self.pending_session.lock().expect("session slot poisoned") = None;
    }

    pub(crate) fn session_memo(&self) -> Option<Option<SessionWithUser>> {
        self.session_memo.lock().expect("session memo poisoned").clone()
    }

    pub(crate) fn memoize_session(&self, resolved: Option<SessionWithUser>) {
        *self.session_memo.lock().expect("session memo poisoned") = Some(resolved);
    }

    // ==================== Hook data ====================

    pub fn set_data<T: serde::Serialize>(&self, key: &str, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.data.lock().expect("data poisoned").insert(key.to_string(), v);
        }
    }

    pub fn get_data<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .lock()
            .expect("data poisoned")
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Method;

    fn context() -> EndpointContext {
        let auth = crate::auth::test_support::test_context();
        let request = Request::new(Method::GET, "/session")
            .with_header("cookie", "a=1")
            .with_header("x-forwarded-for", "10.0.0.1, 10.0.0.2")
            .with_header("user-agent", "test-agent");
        EndpointContext::new(auth, request, HashMap::new())
    }

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let ctx = context();
        assert_eq!(ctx.client_ip(), Some("10.0.0.1".to_string()));
    }

    #[test]
    fn test_jar_last_write_wins_per_name() {
        let ctx = context();
        let descriptor = ctx.auth.cookies.session_token(Some(60));
        ctx.set_cookie(&descriptor, "first");
        ctx.set_cookie(&descriptor, "second");
        let set = ctx.take_set_cookies();
        assert_eq!(set.len(), 1);
        assert!(set[0].contains("second"));
    }

    #[test]
    fn test_signed_cookie_round_trip_via_request() {
        let ctx = context();
        let descriptor = ctx.auth.cookies.descriptor("two_factor", Some(600));
        ctx.set_signed_cookie(&descriptor, "pending-id").unwrap();
        let serialized = ctx.take_set_cookies().pop().unwrap();

        // Feed the Set-Cookie back in as a request cookie.
        let cookie = cookie::Cookie::parse(serialized).unwrap();
        let request = Request::new(Method::GET, "/x").with_header(
            "cookie",
            format!("{}={}", cookie.name(), cookie.value()),
        );
        let ctx2 = EndpointContext::new(ctx.auth.clone(), request, HashMap::new());
        assert_eq!(
            ctx2.get_signed_cookie(&descriptor.name),
            Some("pending-id".to_string())
        );
    }
}
