//! Shared plumbing for the end-to-end suites.
#![allow(dead_code)]

use better_auth::prelude::*;
use better_auth::AuthOptions;
use std::collections::HashMap;
use std::sync::Arc;

pub const TEST_SECRET: &str = "better-auth-test-secret-0123456789abcdef";

/// Builds an engine over a fresh in-memory adapter, email+password on,
/// rate limiting off unless a test turns it on.
pub async fn setup(mutate: impl FnOnce(&mut AuthOptions)) -> Auth {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut options = AuthOptions::new()
        .database(Arc::new(MemoryAdapter::new()))
        .secret(TEST_SECRET)
        .base_url("http://localhost:3000");
    options.email_and_password.enabled = true;
    options.rate_limit.enabled = Some(false);
    mutate(&mut options);
    Auth::new(options).await.expect("engine init")
}

/// Folds a response's `Set-Cookie` headers into a cookie jar.
pub fn absorb_cookies(jar: &mut HashMap<String, String>, response: &Response) {
    for raw in response.header_values("set-cookie") {
        if let Ok(cookie) = cookie::Cookie::parse(raw.to_string()) {
            if cookie.value().is_empty() {
                jar.remove(cookie.name());
            } else {
                jar.insert(cookie.name().to_string(), cookie.value().to_string());
            }
        }
    }
}

pub fn cookie_header(jar: &HashMap<String, String>) -> String {
    jar.iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Signs a user up and returns (response body, cookie jar).
pub async fn sign_up(auth: &Auth, email: &str) -> (serde_json::Value, HashMap<String, String>) {
    let response = auth
        .handle(Request::post(
            "/sign-up/email",
            serde_json::json!({
                "name": "Ada",
                "email": email,
                "password": "pw_longer_than_8",
            }),
        ))
        .await;
    assert_eq!(response.status, 200, "sign-up failed: {:?}", response.body);
    let mut jar = HashMap::new();
    absorb_cookies(&mut jar, &response);
    (response.body.unwrap(), jar)
}
