//! End-to-end tests of the two-factor gate and verification flows.

use better_auth_core::auth::test_support::test_auth;
use better_auth_core::router::{Request, Response};
use better_auth_core::Auth;
use better_auth_plugin_two_factor::{TotpManager, TwoFactorConfig, TwoFactorPlugin};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Collects `Set-Cookie` values into a cookie jar.
fn absorb_cookies(jar: &mut HashMap<String, String>, response: &Response) {
    for raw in response.header_values("set-cookie") {
        if let Ok(cookie) = cookie::Cookie::parse(raw.to_string()) {
            if cookie.value().is_empty() || cookie.max_age() == Some(cookie::time::Duration::ZERO) {
                jar.remove(cookie.name());
            } else {
                jar.insert(cookie.name().to_string(), cookie.value().to_string());
            }
        }
    }
}

fn cookie_header(jar: &HashMap<String, String>) -> String {
    jar.iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

async fn setup() -> Auth {
    test_auth(|options| {
        options
            .plugins
            .push(Arc::new(TwoFactorPlugin::new(TwoFactorConfig::default())));
    })
    .await
}

/// Signs Ada up and returns her cookie jar.
async fn sign_up(auth: &Auth, jar: &mut HashMap<String, String>) {
    let response = auth
        .handle(Request::post(
            "/sign-up/email",
            json!({ "name": "Ada", "email": "ada@x.io", "password": "pw_longer_than_8" }),
        ))
        .await;
    assert_eq!(response.status, 200);
    absorb_cookies(jar, &response);
}

/// Enables 2FA and returns (totp secret, backup codes).
async fn enable(auth: &Auth, jar: &mut HashMap<String, String>) -> (String, Vec<String>) {
    let response = auth
        .handle(
            Request::post("/two-factor/enable", json!({ "password": "pw_longer_than_8" }))
                .with_header("cookie", cookie_header(jar)),
        )
        .await;
    assert_eq!(response.status, 200, "enable failed: {:?}", response.body);
    absorb_cookies(jar, &response);
    let body = response.body.unwrap();
    let uri = body["totpURI"].as_str().unwrap().to_string();
    let secret = uri
        .split("secret=")
        .nth(1)
        .unwrap()
        .split('&')
        .next()
        .unwrap()
        .to_string();
    let codes = body["backupCodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_str().unwrap().to_string())
        .collect();
    (secret, codes)
}

/// Signs in; with 2FA enabled this must come back gated.
async fn gated_sign_in(auth: &Auth) -> HashMap<String, String> {
    let response = auth
        .handle(Request::post(
            "/sign-in/email",
            json!({ "email": "ada@x.io", "password": "pw_longer_than_8" }),
        ))
        .await;
    assert_eq!(response.status, 200);
    let body = response.body.clone().unwrap();
    assert_eq!(body["twoFactorRedirect"], true);
    assert!(body.get("token").is_none());

    let mut jar = HashMap::new();
    absorb_cookies(&mut jar, &response);
    // No usable session cookie, but the pending two_factor cookie is set.
    assert!(!jar.contains_key("better-auth.session_token"));
    assert!(jar.contains_key("better-auth.two_factor"));
    jar
}

#[tokio::test]
async fn test_sign_in_gated_until_totp_verifies() {
    let auth = setup().await;
    let mut jar = HashMap::new();
    sign_up(&auth, &mut jar).await;
    let (secret, _codes) = enable(&auth, &mut jar).await;

    let mut gate_jar = gated_sign_in(&auth).await;

    let code = TotpManager::default()
        .current_code(&secret, "ada@x.io")
        .unwrap();
    let response = auth
        .handle(
            Request::post("/two-factor/verify-totp", json!({ "code": code }))
                .with_header("cookie", cookie_header(&gate_jar)),
        )
        .await;
    assert_eq!(response.status, 200, "verify failed: {:?}", response.body);
    absorb_cookies(&mut gate_jar, &response);

    // Real session present, gate cookie cleared.
    assert!(gate_jar.contains_key("better-auth.session_token"));
    assert!(!gate_jar.contains_key("better-auth.two_factor"));

    let session = auth
        .handle(Request::get("/session").with_header("cookie", cookie_header(&gate_jar)))
        .await;
    assert_eq!(session.body.unwrap()["user"]["email"], "ada@x.io");
}

#[tokio::test]
async fn test_wrong_totp_rejected() {
    let auth = setup().await;
    let mut jar = HashMap::new();
    sign_up(&auth, &mut jar).await;
    enable(&auth, &mut jar).await;
    let gate_jar = gated_sign_in(&auth).await;

    let response = auth
        .handle(
            Request::post("/two-factor/verify-totp", json!({ "code": "000000" }))
                .with_header("cookie", cookie_header(&gate_jar)),
        )
        .await;
    // One in a million flake if 000000 happens to be the code.
    assert_eq!(response.status, 401);
}

#[tokio::test]
async fn test_backup_code_is_one_shot() {
    let auth = setup().await;
    let mut jar = HashMap::new();
    sign_up(&auth, &mut jar).await;
    let (_secret, codes) = enable(&auth, &mut jar).await;

    let gate_jar = gated_sign_in(&auth).await;
    let response = auth
        .handle(
            Request::post("/two-factor/verify-backup-code", json!({ "code": codes[0] }))
                .with_header("cookie", cookie_header(&gate_jar)),
        )
        .await;
    assert_eq!(response.status, 200, "backup verify failed: {:?}", response.body);

    // The same code fails on the next gated sign-in.
    let gate_jar = gated_sign_in(&auth).await;
    let response = auth
        .handle(
            Request::post("/two-factor/verify-backup-code", json!({ "code": codes[0] }))
                .with_header("cookie", cookie_header(&gate_jar)),
        )
        .await;
    assert_eq!(response.status, 401);
    assert_eq!(response.body.unwrap()["code"], "INVALID_BACKUP_CODE");

    // A different code still works.
    let response = auth
        .handle(
            Request::post("/two-factor/verify-backup-code", json!({ "code": codes[1] }))
                .with_header("cookie", cookie_header(&gate_jar)),
        )
        .await;
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_trust_device_skips_gate() {
    let auth = setup().await;
    let mut jar = HashMap::new();
    sign_up(&auth, &mut jar).await;
    let (secret, _codes) = enable(&auth, &mut jar).await;

    let mut gate_jar = gated_sign_in(&auth).await;
    let code = TotpManager::default()
        .current_code(&secret, "ada@x.io")
        .unwrap();
    let response = auth
        .handle(
            Request::post(
                "/two-factor/verify-totp",
                json!({ "code": code, "trustDevice": true }),
            )
            .with_header("cookie", cookie_header(&gate_jar)),
        )
        .await;
    assert_eq!(response.status, 200);
    absorb_cookies(&mut gate_jar, &response);
    assert!(gate_jar.contains_key("better-auth.trust_device"));

    // Next sign-in from this device passes straight through.
    let response = auth
        .handle(
            Request::post(
                "/sign-in/email",
                json!({ "email": "ada@x.io", "password": "pw_longer_than_8" }),
            )
            .with_header("cookie", cookie_header(&gate_jar)),
        )
        .await;
    assert_eq!(response.status, 200);
    let body = response.body.unwrap();
    assert!(body.get("twoFactorRedirect").is_none());
    assert!(body["token"].is_string());
}

#[tokio::test]
async fn test_forged_trust_device_cookie_rejected() {
    let auth = setup().await;
    let mut jar = HashMap::new();
    sign_up(&auth, &mut jar).await;
    enable(&auth, &mut jar).await;

    let mut forged = HashMap::new();
    forged.insert(
        "better-auth.trust_device".to_string(),
        "someidentifier.Zm9yZ2Vkc2lnbmF0dXJl".to_string(),
    );
    let response = auth
        .handle(
            Request::post(
                "/sign-in/email",
                json!({ "email": "ada@x.io", "password": "pw_longer_than_8" }),
            )
            .with_header("cookie", cookie_header(&forged)),
        )
        .await;
    // Forged HMAC: still gated.
    assert_eq!(response.body.unwrap()["twoFactorRedirect"], true);
}

#[tokio::test]
async fn test_disable_restores_plain_sign_in() {
    let auth = setup().await;
    let mut jar = HashMap::new();
    sign_up(&auth, &mut jar).await;
    let (secret, _codes) = enable(&auth, &mut jar).await;

    // Complete one gated sign-in to get a live session for disable.
    let mut gate_jar = gated_sign_in(&auth).await;
    let code = TotpManager::default()
        .current_code(&secret, "ada@x.io")
        .unwrap();
    let response = auth
        .handle(
            Request::post("/two-factor/verify-totp", json!({ "code": code }))
                .with_header("cookie", cookie_header(&gate_jar)),
        )
        .await;
    absorb_cookies(&mut gate_jar, &response);

    let response = auth
        .handle(
            Request::post("/two-factor/disable", json!({ "password": "pw_longer_than_8" }))
                .with_header("cookie", cookie_header(&gate_jar)),
        )
        .await;
    assert_eq!(response.status, 200, "disable failed: {:?}", response.body);

    let response = auth
        .handle(Request::post(
            "/sign-in/email",
            json!({ "email": "ada@x.io", "password": "pw_longer_than_8" }),
        ))
        .await;
    let body = response.body.unwrap();
    assert!(body.get("twoFactorRedirect").is_none());
    assert!(body["token"].is_string());
}
