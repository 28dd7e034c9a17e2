//! Social sign-in end to end against a mock provider: authorization URL,
//! state cookies, code exchange, account creation, and state forgery.

mod common;

use better_auth::db::{FindManyArgs, Where};
use better_auth::oauth::{OAuthProviderConfig, TokenEndpointAuth};
use better_auth::prelude::*;
use common::{absorb_cookies, cookie_header, setup};
use serde_json::json;
use std::collections::HashMap;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn provider_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "provider-access-token",
            "refresh_token": "provider-refresh-token",
            "token_type": "Bearer",
            "expires_in": 3600,
            "scope": "email profile"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "acme-subject-1",
            "email": "ada@x.io",
            "email_verified": true,
            "name": "Ada",
            "picture": "https://img.test/ada.png"
        })))
        .mount(&server)
        .await;
    server
}

fn provider_config(server: &MockServer) -> OAuthProviderConfig {
    OAuthProviderConfig::new("acme", "acme-client", "acme-secret")
        .authorization_url(format!("{}/authorize", server.uri()))
        .token_url(format!("{}/token", server.uri()))
        .userinfo_url(format!("{}/userinfo", server.uri()))
        .scopes(vec!["email", "profile"])
        .with_pkce()
        .token_endpoint_auth(TokenEndpointAuth::Post)
}

fn query_param(url: &str, name: &str) -> Option<String> {
    url.split('?')
        .nth(1)?
        .split('&')
        .find_map(|pair| pair.strip_prefix(&format!("{name}=")))
        .map(|v| urlencoding::decode(v).unwrap().into_owned())
}

/// Starts a social sign-in; returns (state, cookie jar).
async fn start_social(auth: &Auth) -> (String, HashMap<String, String>) {
    let response = auth
        .handle(Request::post(
            "/sign-in/social",
            json!({ "provider": "acme", "callbackURL": "/dashboard" }),
        ))
        .await;
    assert_eq!(response.status, 200, "social start failed: {:?}", response.body);
    let body = response.body.clone().unwrap();
    assert_eq!(body["redirect"], true);
    let url = body["url"].as_str().unwrap();
    assert!(url.contains("response_type=code"));
    assert!(url.contains("code_challenge_method=S256"));
    let state = query_param(url, "state").expect("state in authorization url");

    let mut jar = HashMap::new();
    absorb_cookies(&mut jar, &response);
    assert!(jar.contains_key("better-auth.state"));
    assert!(jar.contains_key("better-auth.pk_code_verifier"));
    (state, jar)
}

#[tokio::test]
async fn test_social_sign_in_full_round_trip() {
    let server = provider_server().await;
    let config = provider_config(&server);
    let auth = setup(move |options| {
        options.social_providers.push(config);
    })
    .await;

    let (state, jar) = start_social(&auth).await;

    let response = auth
        .handle(
            Request::get("/callback/acme")
                .with_query("code", "provider-code-1")
                .with_query("state", state)
                .with_header("cookie", cookie_header(&jar)),
        )
        .await;
    assert_eq!(response.status, 302, "callback failed: {:?}", response.body);
    assert_eq!(
        response.header("location").unwrap(),
        "http://localhost:3000/dashboard"
    );

    let mut session_jar = HashMap::new();
    absorb_cookies(&mut session_jar, &response);
    assert!(session_jar.contains_key("better-auth.session_token"));
    // The single-use state cookies are gone.
    assert!(!session_jar.contains_key("better-auth.state"));

    let response = auth
        .handle(Request::get("/session").with_header("cookie", cookie_header(&session_jar)))
        .await;
    let body = response.body.unwrap();
    assert_eq!(body["user"]["email"], "ada@x.io");
    assert_eq!(body["user"]["emailVerified"], true);

    // The provider account row was created with its tokens.
    let accounts = auth
        .context()
        .adapter
        .find_many(
            "account",
            FindManyArgs {
                where_clause: vec![Where::eq("providerId", json!("acme"))],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["accountId"], "acme-subject-1");
    assert_eq!(accounts[0]["accessToken"], "provider-access-token");
}

#[tokio::test]
async fn test_second_sign_in_reuses_user() {
    let server = provider_server().await;
    let config = provider_config(&server);
    let auth = setup(move |options| {
        options.social_providers.push(config);
    })
    .await;

    for _ in 0..2 {
        let (state, jar) = start_social(&auth).await;
        let response = auth
            .handle(
                Request::get("/callback/acme")
                    .with_query("code", "provider-code-2")
                    .with_query("state", state)
                    .with_header("cookie", cookie_header(&jar)),
            )
            .await;
        assert_eq!(response.status, 302);
    }

    let users = auth
        .context()
        .adapter
        .find_many("user", FindManyArgs::default())
        .await
        .unwrap();
    assert_eq!(users.len(), 1);
}

#[tokio::test]
async fn test_forged_state_redirects_with_error() {
    let server = provider_server().await;
    let config = provider_config(&server);
    let auth = setup(move |options| {
        options.social_providers.push(config);
    })
    .await;

    let (_state, jar) = start_social(&auth).await;
    let response = auth
        .handle(
            Request::get("/callback/acme")
                .with_query("code", "provider-code-3")
                .with_query("state", "forged-state-value")
                .with_header("cookie", cookie_header(&jar)),
        )
        .await;
    assert_eq!(response.status, 302);
    assert_eq!(
        response.header("location").unwrap(),
        "http://localhost:3000/dashboard?error=invalid_state"
    );

    // No session was created.
    let sessions = auth
        .context()
        .adapter
        .find_many("session", FindManyArgs::default())
        .await
        .unwrap();
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_unknown_provider_rejected() {
    let auth = setup(|options| {
        options
            .social_providers
            .push(OAuthProviderConfig::new("acme", "id", "secret"));
    })
    .await;
    let response = auth
        .handle(Request::post(
            "/sign-in/social",
            json!({ "provider": "nope", "callbackURL": "/x" }),
        ))
        .await;
    assert_eq!(response.status, 404);
    assert_eq!(response.body.unwrap()["code"], "PROVIDER_NOT_FOUND");
}

#[tokio::test]
async fn test_provider_error_redirects_to_error_target() {
    let server = provider_server().await;
    let config = provider_config(&server);
    let auth = setup(move |options| {
        options.social_providers.push(config);
    })
    .await;

    let (state, jar) = start_social(&auth).await;
    let response = auth
        .handle(
            Request::get("/callback/acme")
                .with_query("error", "access_denied")
                .with_query("state", state)
                .with_header("cookie", cookie_header(&jar)),
        )
        .await;
    assert_eq!(response.status, 302);
    assert_eq!(
        response.header("location").unwrap(),
        "http://localhost:3000/dashboard?error=access_denied"
    );
}
