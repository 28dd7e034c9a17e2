//! End-to-end tests of the authorization server: registration, the
//! code flow with PKCE, single-use enforcement, refresh rotation,
//! introspection, and userinfo.

use better_auth_core::auth::test_support::test_auth;
use better_auth_core::crypto;
use better_auth_core::router::{Request, Response};
use better_auth_core::Auth;
use better_auth_plugin_jwt::JwtPlugin;
use better_auth_plugin_oidc::{OidcConfig, OidcPlugin};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn absorb_cookies(jar: &mut HashMap<String, String>, response: &Response) {
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

fn cookie_header(jar: &HashMap<String, String>) -> String {
    jar.iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

async fn setup(with_signer: bool) -> Auth {
    test_auth(move |options| {
        let jwt = Arc::new(JwtPlugin::new());
        let mut config = OidcConfig::default();
        if with_signer {
            config = config.with_signer(jwt.signer());
            options.plugins.push(jwt);
        }
        options.plugins.push(Arc::new(OidcPlugin::new(config)));
    })
    .await
}

/// Signs Ada up and returns her cookie jar.
async fn signed_in_jar(auth: &Auth) -> HashMap<String, String> {
    let response = auth
        .handle(Request::post(
            "/sign-up/email",
            json!({ "name": "Ada", "email": "ada@x.io", "password": "pw_longer_than_8" }),
        ))
        .await;
    assert_eq!(response.status, 200);
    let mut jar = HashMap::new();
    absorb_cookies(&mut jar, &response);
    jar
}

/// Registers a relying party; returns (client_id, client_secret).
async fn register_client(auth: &Auth, skip_consent: bool) -> (String, String) {
    let response = auth
        .handle(Request::post(
            "/oauth2/register",
            json!({
                "redirect_uris": ["http://rp/cb"],
                "client_name": "Test RP",
                "skip_consent": skip_consent,
            }),
        ))
        .await;
    assert_eq!(response.status, 201, "register failed: {:?}", response.body);
    let body = response.body.unwrap();
    (
        body["client_id"].as_str().unwrap().to_string(),
        body["client_secret"].as_str().unwrap().to_string(),
    )
}

fn authorize_request(client_id: &str, challenge: &str) -> Request {
    Request::get("/oauth2/authorize")
        .with_query("client_id", client_id)
        .with_query("redirect_uri", "http://rp/cb")
        .with_query("response_type", "code")
        .with_query("scope", "openid profile")
        .with_query("state", "S")
        .with_query("code_challenge", challenge)
        .with_query("code_challenge_method", "S256")
}

/// Runs authorize with an active session and extracts the code.
async fn obtain_code(auth: &Auth, jar: &HashMap<String, String>, client_id: &str, verifier: &str) -> String {
    let challenge = crypto::sha256_base64url(verifier);
    let response = auth
        .handle(authorize_request(client_id, &challenge).with_header("cookie", cookie_header(jar)))
        .await;
    assert_eq!(response.status, 302, "authorize failed: {:?}", response.body);
    let location = response.header("location").unwrap();
    assert!(location.starts_with("http://rp/cb?code="), "unexpected location {location}");
    assert!(location.ends_with("&state=S"));
    location
        .split("code=")
        .nth(1)
        .unwrap()
        .split('&')
        .next()
        .unwrap()
        .to_string()
}

async fn exchange(
    auth: &Auth,
    client_id: &str,
    client_secret: &str,
    code: &str,
    verifier: &str,
) -> Response {
    auth.handle(Request::post(
        "/oauth2/token",
        json!({
            "grant_type": "authorization_code",
            "code": code,
            "redirect_uri": "http://rp/cb",
            "client_id": client_id,
            "client_secret": client_secret,
            "code_verifier": verifier,
        }),
    ))
    .await
}

#[tokio::test]
async fn test_code_round_trip_with_pkce() {
    let auth = setup(true).await;
    let jar = signed_in_jar(&auth).await;
    let (client_id, client_secret) = register_client(&auth, true).await;

    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let code = obtain_code(&auth, &jar, &client_id, verifier).await;

    let response = exchange(&auth, &client_id, &client_secret, &code, verifier).await;
    assert_eq!(response.status, 200, "exchange failed: {:?}", response.body);
    let body = response.body.unwrap();
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());
    assert!(body["id_token"].is_string());
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 3600);

    // EdDSA JWT access token: three segments.
    let access_token = body["access_token"].as_str().unwrap();
    assert_eq!(access_token.split('.').count(), 3);
}

#[tokio::test]
async fn test_code_is_single_use() {
    let auth = setup(false).await;
    let jar = signed_in_jar(&auth).await;
    let (client_id, client_secret) = register_client(&auth, true).await;

    let verifier = "averysecretverifierwithplentyofentropy42";
    let code = obtain_code(&auth, &jar, &client_id, verifier).await;

    let first = exchange(&auth, &client_id, &client_secret, &code, verifier).await;
    assert_eq!(first.status, 200);
    let second = exchange(&auth, &client_id, &client_secret, &code, verifier).await;
    assert_eq!(second.status, 400);
    assert_eq!(second.body.unwrap()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_pkce_mismatch_rejects() {
    let auth = setup(false).await;
    let jar = signed_in_jar(&auth).await;
    let (client_id, client_secret) = register_client(&auth, true).await;

    let code = obtain_code(&auth, &jar, &client_id, "the-real-verifier-0123456789abcdef").await;
    let response = exchange(
        &auth,
        &client_id,
        &client_secret,
        &code,
        "a-different-verifier-0123456789abcdef",
    )
    .await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body.unwrap()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_redirect_uri_must_match_exactly() {
    let auth = setup(false).await;
    let jar = signed_in_jar(&auth).await;
    let (client_id, client_secret) = register_client(&auth, true).await;

    // Trailing slash rejected at /authorize.
    let response = auth
        .handle(
            Request::get("/oauth2/authorize")
                .with_query("client_id", &client_id)
                .with_query("redirect_uri", "http://rp/cb/")
                .with_query("response_type", "code")
                .with_header("cookie", cookie_header(&jar)),
        )
        .await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body.unwrap()["code"], "INVALID_REDIRECT_URI");

    // And at /token: the code was bound to the registered value.
    let verifier = "yet-another-pkce-verifier-0123456789ab";
    let code = obtain_code(&auth, &jar, &client_id, verifier).await;
    let response = auth
        .handle(Request::post(
            "/oauth2/token",
            json!({
                "grant_type": "authorization_code",
                "code": code,
                "redirect_uri": "http://rp/CB",
                "client_id": client_id,
                "client_secret": client_secret,
                "code_verifier": verifier,
            }),
        ))
        .await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body.unwrap()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_wrong_client_secret_rejected() {
    let auth = setup(false).await;
    let jar = signed_in_jar(&auth).await;
    let (client_id, _secret) = register_client(&auth, true).await;
    let verifier = "pkce-verifier-for-secret-test-0123456789";
    let code = obtain_code(&auth, &jar, &client_id, verifier).await;

    let response = exchange(&auth, &client_id, "wrong-secret", &code, verifier).await;
    assert_eq!(response.status, 401);
    assert_eq!(response.body.unwrap()["error"], "invalid_client");
}

#[tokio::test]
async fn test_unauthenticated_authorize_redirects_to_login() {
    let auth = setup(false).await;
    let (client_id, _secret) = register_client(&auth, true).await;
    let challenge = crypto::sha256_base64url("v");
    let response = auth.handle(authorize_request(&client_id, &challenge)).await;
    assert_eq!(response.status, 302);
    let location = response.header("location").unwrap();
    assert!(location.starts_with("http://localhost:3000/sign-in?"));
    assert!(location.contains("client_id="));
    // The pending request rides in a signed cookie.
    assert!(response
        .header_values("set-cookie")
        .iter()
        .any(|c| c.contains("oidc_login_prompt")));
}

#[tokio::test]
async fn test_refresh_token_rotation() {
    let auth = setup(false).await;
    let jar = signed_in_jar(&auth).await;
    let (client_id, client_secret) = register_client(&auth, true).await;
    let verifier = "refresh-rotation-verifier-0123456789abcd";
    let code = obtain_code(&auth, &jar, &client_id, verifier).await;
    let body = exchange(&auth, &client_id, &client_secret, &code, verifier)
        .await
        .body
        .unwrap();
    let refresh_token = body["refresh_token"].as_str().unwrap().to_string();

    let refresh = |token: String| {
        let client_id = client_id.clone();
        let client_secret = client_secret.clone();
        let auth = &auth;
        async move {
            auth.handle(Request::post(
                "/oauth2/token",
                json!({
                    "grant_type": "refresh_token",
                    "refresh_token": token,
                    "client_id": client_id,
                    "client_secret": client_secret,
                }),
            ))
            .await
        }
    };

    let response = refresh(refresh_token.clone()).await;
    assert_eq!(response.status, 200);
    let new_refresh = response.body.unwrap()["refresh_token"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(new_refresh, refresh_token);

    // The rotated-out token is dead.
    let response = refresh(refresh_token).await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body.unwrap()["error"], "invalid_grant");
}

#[tokio::test]
async fn test_introspection_and_userinfo() {
    let auth = setup(false).await;
    let jar = signed_in_jar(&auth).await;
    let (client_id, client_secret) = register_client(&auth, true).await;
    let verifier = "introspection-verifier-0123456789abcdef";
    let code = obtain_code(&auth, &jar, &client_id, verifier).await;
    let body = exchange(&auth, &client_id, &client_secret, &code, verifier)
        .await
        .body
        .unwrap();
    let access_token = body["access_token"].as_str().unwrap().to_string();

    let response = auth
        .handle(Request::post(
            "/oauth2/introspect",
            json!({
                "token": access_token,
                "client_id": client_id,
                "client_secret": client_secret,
            }),
        ))
        .await;
    let body = response.body.unwrap();
    assert_eq!(body["active"], true);
    assert_eq!(body["client_id"], client_id.as_str());
    assert_eq!(body["scope"], "openid profile");

    let response = auth
        .handle(
            Request::get("/oauth2/userinfo")
                .with_header("authorization", format!("Bearer {access_token}")),
        )
        .await;
    let body = response.body.unwrap();
    assert_eq!(body["name"], "Ada");
    assert!(body["sub"].is_string());
    // No email scope requested, no email claim.
    assert!(body.get("email").is_none());

    // Garbage token introspects inactive, not an error.
    let response = auth
        .handle(Request::post(
            "/oauth2/introspect",
            json!({
                "token": "garbage",
                "client_id": client_id,
                "client_secret": client_secret,
            }),
        ))
        .await;
    assert_eq!(response.body.unwrap(), json!({ "active": false }));
}

#[tokio::test]
async fn test_discovery_document() {
    let auth = setup(true).await;
    let response = auth
        .handle(Request::get("/.well-known/openid-configuration"))
        .await;
    assert_eq!(response.status, 200);
    let body = response.body.unwrap();
    assert_eq!(body["issuer"], "http://localhost:3000");
    assert_eq!(
        body["token_endpoint"],
        "http://localhost:3000/api/auth/oauth2/token"
    );
    assert_eq!(body["code_challenge_methods_supported"], json!(["S256"]));
    assert_eq!(body["id_token_signing_alg_values_supported"], json!(["EdDSA"]));

    // The JWKS the document points at is served by the jwt plugin.
    let response = auth.handle(Request::get("/jwks")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body.unwrap()["keys"][0]["kty"], "OKP");
}

#[tokio::test]
async fn test_consent_flow_records_and_short_circuits() {
    let auth = test_auth(|options| {
        let mut config = OidcConfig::default();
        config.consent_page = Some("/consent".to_string());
        options.plugins.push(Arc::new(OidcPlugin::new(config)));
    })
    .await;
    let mut jar = signed_in_jar(&auth).await;
    // skip_consent = false: first authorize detours through consent.
    let (client_id, client_secret) = register_client(&auth, false).await;

    let challenge = crypto::sha256_base64url("consent-flow-verifier-0123456789abcd");
    let response = auth
        .handle(authorize_request(&client_id, &challenge).with_header("cookie", cookie_header(&jar)))
        .await;
    assert_eq!(response.status, 302);
    assert_eq!(
        response.header("location").unwrap(),
        "http://localhost:3000/consent"
    );
    absorb_cookies(&mut jar, &response);

    // Accepting issues the code and records the consent.
    let response = auth
        .handle(
            Request::post("/oauth2/consent", json!({ "accept": true }))
                .with_header("cookie", cookie_header(&jar)),
        )
        .await;
    assert_eq!(response.status, 200, "consent failed: {:?}", response.body);
    absorb_cookies(&mut jar, &response);
    let redirect_uri = response.body.unwrap()["redirectURI"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(redirect_uri.starts_with("http://rp/cb?code="));

    let code = redirect_uri
        .split("code=")
        .nth(1)
        .unwrap()
        .split('&')
        .next()
        .unwrap()
        .to_string();
    let response = exchange(
        &auth,
        &client_id,
        &client_secret,
        &code,
        "consent-flow-verifier-0123456789abcd",
    )
    .await;
    assert_eq!(response.status, 200);

    // Second authorize for the same scopes: consent is on file, straight
    // to the callback.
    let response = auth
        .handle(authorize_request(&client_id, &challenge).with_header("cookie", cookie_header(&jar)))
        .await;
    assert_eq!(response.status, 302);
    assert!(response
        .header("location")
        .unwrap()
        .starts_with("http://rp/cb?code="));
}

#[tokio::test]
async fn test_login_resume_after_sign_in() {
    let auth = setup(false).await;
    let (client_id, _secret) = register_client(&auth, true).await;

    // Anonymous authorize parks the request and bounces to login.
    let challenge = crypto::sha256_base64url("resume-verifier-0123456789abcdefgh");
    let response = auth.handle(authorize_request(&client_id, &challenge)).await;
    let mut jar = HashMap::new();
    absorb_cookies(&mut jar, &response);

    // Sign up (any sign-in path resumes); the response gains the
    // authorize URL to continue with.
    let response = auth
        .handle(
            Request::post(
                "/sign-up/email",
                json!({ "name": "Ada", "email": "ada@x.io", "password": "pw_longer_than_8" }),
            )
            .with_header("cookie", cookie_header(&jar)),
        )
        .await;
    assert_eq!(response.status, 200);
    let body = response.body.clone().unwrap();
    // Sign-up is not a /sign-in path; the resume hook fires on sign-in.
    assert!(body.get("url").is_none());

    absorb_cookies(&mut jar, &response);
    let response = auth
        .handle(
            Request::post(
                "/sign-in/email",
                json!({ "email": "ada@x.io", "password": "pw_longer_than_8" }),
            )
            .with_header("cookie", cookie_header(&jar)),
        )
        .await;
    assert_eq!(response.status, 200);
    let body = response.body.unwrap();
    assert_eq!(body["redirect"], true);
    let url = body["url"].as_str().unwrap();
    assert!(url.starts_with("http://localhost:3000/api/auth/oauth2/authorize?"));
    assert!(url.contains(&format!("client_id={client_id}")));
}
