//! Cookie handling: canonical names, attribute defaults, HMAC-signed
//! values, and chunking for oversized payloads.
//!
//! Names follow `<__Secure-><prefix>.<name>`. Signed values are
//! `value.sig` where `sig = HMAC-SHA256(secret, "name.value")` in
//! base64url without padding; verification is constant-time.

pub mod cache;

use crate::crypto;
use cookie::{Cookie, SameSite};
use std::collections::HashMap;

/// A cookie's serialized value must stay under this; longer values are
/// split into `<name>.0`, `<name>.1`, ... chunks.
pub const MAX_COOKIE_SIZE: usize = 4093;

/// Attributes applied when serializing a cookie.
#[derive(Debug, Clone)]
pub struct CookieAttributes {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
    pub domain: Option<String>,
    /// Seconds; `None` makes a browser-session cookie.
    pub max_age: Option<i64>,
}

impl Default for CookieAttributes {
    fn default() -> Self {
        Self {
            http_only: true,
            secure: false,
            same_site: SameSite::Lax,
            path: "/".to_string(),
            domain: None,
            max_age: None,
        }
    }
}

/// A named cookie with its attributes, as derived from the options.
#[derive(Debug, Clone)]
pub struct CookieDescriptor {
    pub name: String,
    pub attributes: CookieAttributes,
}

/// The canonical auth cookies, with naming and attribute defaults
/// resolved once at init.
#[derive(Debug, Clone)]
pub struct AuthCookies {
    prefix: String,
    secure: bool,
    domain: Option<String>,
}

impl AuthCookies {
    /// `domain` is only set when cross-subdomain cookies are enabled.
    pub fn new(prefix: impl Into<String>, secure: bool, domain: Option<String>) -> Self {
        Self {
            prefix: prefix.into(),
            secure,
            domain,
        }
    }

    /// Builds the full cookie name: `<__Secure-><prefix>.<name>`.
    pub fn name(&self, name: &str) -> String {
        let secure_prefix = if self.secure { "__Secure-" } else { "" };
        format!("{secure_prefix}{}.{name}", self.prefix)
    }

    /// A descriptor with the default attributes and the given Max-Age.
    pub fn descriptor(&self, name: &str, max_age: Option<i64>) -> CookieDescriptor {
        CookieDescriptor {
            name: self.name(name),
            attributes: CookieAttributes {
                secure: self.secure,
                domain: self.domain.clone(),
                max_age,
                ..Default::default()
            },
        }
    }

    pub fn session_token(&self, max_age: Option<i64>) -> CookieDescriptor {
        self.descriptor("session_token", max_age)
    }

    pub fn session_data(&self, max_age: i64) -> CookieDescriptor {
        self.descriptor("session_data", Some(max_age))
    }

    pub fn dont_remember(&self) -> CookieDescriptor {
        self.descriptor("dont_remember", None)
    }

    pub fn state(&self) -> CookieDescriptor {
        // OAuth round-trips through the provider; ten minutes is plenty.
        self.descriptor("state", Some(600))
    }

    pub fn pk_code_verifier(&self) -> CookieDescriptor {
        self.descriptor("pk_code_verifier", Some(600))
    }
}

/// Serializes a cookie with its attributes.
pub fn make_cookie(descriptor: &CookieDescriptor, value: &str) -> String {
    let mut cookie = Cookie::new(descriptor.name.clone(), value.to_string());
    let attrs = &descriptor.attributes;
    cookie.set_http_only(attrs.http_only);
    cookie.set_secure(attrs.secure);
    cookie.set_same_site(attrs.same_site);
    cookie.set_path(attrs.path.clone());
    if let Some(domain) = &attrs.domain {
        cookie.set_domain(domain.clone());
    }
    if let Some(max_age) = attrs.max_age {
        cookie.set_max_age(cookie::time::Duration::seconds(max_age));
    }
    cookie.to_string()
}

/// An expired empty cookie that clears `name` on the client.
pub fn clear_cookie(descriptor: &CookieDescriptor, name: &str) -> String {
    let mut descriptor = descriptor.clone();
    descriptor.name = name.to_string();
    descriptor.attributes.max_age = Some(0);
    make_cookie(&descriptor, "")
}

/// Signs `value` for the cookie `name`: `value.sig`.
pub fn sign_cookie_value(secret: &str, name: &str, value: &str) -> crate::error::AuthResult<String> {
    let signature = crypto::sign(secret, &format!("{name}.{value}"))?;
    Ok(format!("{value}.{signature}"))
}

/// Verifies and unwraps a signed cookie value. The value itself may
/// contain dots (JWTs); the signature is everything after the last one.
pub fn verify_cookie_value(secret: &str, name: &str, raw: &str) -> Option<String> {
    let (value, signature) = raw.rsplit_once('.')?;
    if crypto::verify(secret, &format!("{name}.{value}"), signature) {
        Some(value.to_string())
    } else {
        None
    }
}

/// Splits an oversized value into `<name>.N` chunk cookies and clears any
/// stale chunks left over from a previous, larger write.
///
/// Returns the serialized `Set-Cookie` values to emit.
pub fn write_chunked(
    descriptor: &CookieDescriptor,
    value: &str,
    request_cookies: &HashMap<String, String>,
) -> Vec<String> {
    let mut out = Vec::new();
    let chunk_names_present: Vec<String> = request_cookies
        .keys()
        .filter(|k| is_chunk_of(&descriptor.name, k))
        .cloned()
        .collect();

    if value.len() < MAX_COOKIE_SIZE {
        out.push(make_cookie(descriptor, value));
        // A prior chunked write must be cleared or stale chunks would
        // reassemble with the new value.
        for stale in chunk_names_present {
            out.push(clear_cookie(descriptor, &stale));
        }
        return out;
    }

    let bytes = value.as_bytes();
    let chunk_count = bytes.len().div_ceil(MAX_COOKIE_SIZE);
    for i in 0..chunk_count {
        let start = i * MAX_COOKIE_SIZE;
        let end = usize::min(start + MAX_COOKIE_SIZE, bytes.len());
        // Values are base64/base64url, so byte slicing is char-safe.
        let chunk = std::str::from_utf8(&bytes[start..end]).unwrap_or_default();
        let mut chunk_descriptor = descriptor.clone();
        chunk_descriptor.name = format!("{}.{i}", descriptor.name);
        out.push(make_cookie(&chunk_descriptor, chunk));
    }
    // The un-chunked cookie and higher-numbered stale chunks go away.
    if request_cookies.contains_key(&descriptor.name) {
        out.push(clear_cookie(descriptor, &descriptor.name));
    }
    for stale in chunk_names_present {
        if chunk_index(&descriptor.name, &stale).map(|i| i >= chunk_count).unwrap_or(false) {
            out.push(clear_cookie(descriptor, &stale));
        }
    }
    out
}

/// Reassembles a possibly chunked cookie from the request.
pub fn read_chunked(name: &str, request_cookies: &HashMap<String, String>) -> Option<String> {
    if let Some(value) = request_cookies.get(name) {
        if !value.is_empty() {
            return Some(value.clone());
        }
    }
    let mut chunks: Vec<(usize, &String)> = request_cookies
        .iter()
        .filter_map(|(k, v)| chunk_index(name, k).map(|i| (i, v)))
        .collect();
    if chunks.is_empty() {
        return None;
    }
    chunks.sort_by_key(|(i, _)| *i);
    Some(chunks.into_iter().map(|(_, v)| v.as_str()).collect())
}

fn is_chunk_of(name: &str, candidate: &str) -> bool {
    chunk_index(name, candidate).is_some()
}

fn chunk_index(name: &str, candidate: &str) -> Option<usize> {
    candidate
        .strip_prefix(name)?
        .strip_prefix('.')?
        .parse()
        .ok()
}
