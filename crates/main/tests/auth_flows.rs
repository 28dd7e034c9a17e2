//! End-to-end flows through the dispatcher: credentials, sessions,
//! verification tokens, password reset, rate limiting, and the
//! delete-user cascade.

mod common;

use better_auth::db::{FindManyArgs, Where};
use better_auth::email::MemoryEmailSender;
use better_auth::jwt::{JwtCodec, VerificationClaims};
use better_auth::options::CookieCacheOptions;
use better_auth::prelude::*;
use common::{absorb_cookies, cookie_header, setup, sign_up, TEST_SECRET};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::test]
async fn test_sign_up_issues_session_with_cookie_attributes() {
    let auth = setup(|_| {}).await;
    let response = auth
        .handle(Request::post(
            "/sign-up/email",
            json!({ "name": "Ada", "email": "ada@x.io", "password": "pw_longer_than_8" }),
        ))
        .await;
    assert_eq!(response.status, 200);
    let body = response.body.clone().unwrap();
    assert_eq!(body["user"]["email"], "ada@x.io");
    assert_eq!(body["user"]["emailVerified"], false);
    assert!(body["token"].is_string());

    let session_cookie = response
        .header_values("set-cookie")
        .into_iter()
        .find(|c| c.starts_with("better-auth.session_token="))
        .expect("session cookie missing")
        .to_string();
    assert!(session_cookie.contains("HttpOnly"));
    assert!(session_cookie.contains("SameSite=Lax"));
    assert!(session_cookie.contains("Path=/"));
    assert!(session_cookie.contains("Max-Age="));
}

#[tokio::test]
async fn test_duplicate_email_rejected() {
    let auth = setup(|_| {}).await;
    sign_up(&auth, "ada@x.io").await;
    let response = auth
        .handle(Request::post(
            "/sign-up/email",
            json!({ "name": "Eve", "email": "Ada@X.io", "password": "pw_longer_than_8" }),
        ))
        .await;
    assert_eq!(response.status, 422);
    assert_eq!(
        response.body.unwrap()["code"],
        "USER_ALREADY_EXISTS_USE_ANOTHER_EMAIL"
    );
}

#[tokio::test]
async fn test_password_bounds_enforced() {
    let auth = setup(|_| {}).await;
    let response = auth
        .handle(Request::post(
            "/sign-up/email",
            json!({ "name": "A", "email": "a@x.io", "password": "short" }),
        ))
        .await;
    assert_eq!(response.status, 400);
    assert_eq!(response.body.unwrap()["code"], "PASSWORD_TOO_SHORT");

    let response = auth
        .handle(Request::post(
            "/sign-up/email",
            json!({ "name": "A", "email": "a@x.io", "password": "x".repeat(200) }),
        ))
        .await;
    assert_eq!(response.body.unwrap()["code"], "PASSWORD_TOO_LONG");
}

#[tokio::test]
async fn test_sign_in_rejects_bad_credentials_uniformly() {
    let auth = setup(|_| {}).await;
    sign_up(&auth, "ada@x.io").await;

    for body in [
        json!({ "email": "ada@x.io", "password": "wrong-password" }),
        json!({ "email": "nobody@x.io", "password": "pw_longer_than_8" }),
    ] {
        let response = auth.handle(Request::post("/sign-in/email", body)).await;
        assert_eq!(response.status, 401);
        assert_eq!(response.body.unwrap()["code"], "INVALID_EMAIL_OR_PASSWORD");
    }
}

#[tokio::test]
async fn test_session_round_trip_and_sign_out() {
    let auth = setup(|_| {}).await;
    let (_, jar) = sign_up(&auth, "ada@x.io").await;

    let response = auth
        .handle(Request::get("/session").with_header("cookie", cookie_header(&jar)))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body.unwrap()["user"]["email"], "ada@x.io");

    let response = auth
        .handle(
            Request::new(Method::POST, "/sign-out").with_header("cookie", cookie_header(&jar)),
        )
        .await;
    assert_eq!(response.status, 200);

    // The revoked token no longer resolves even if replayed.
    let response = auth
        .handle(Request::get("/session").with_header("cookie", cookie_header(&jar)))
        .await;
    assert_eq!(response.body, Some(serde_json::Value::Null));
}

#[tokio::test]
async fn test_forged_session_cookie_is_anonymous() {
    let auth = setup(|_| {}).await;
    sign_up(&auth, "ada@x.io").await;

    // A token the server never issued, with a bogus signature.
    let response = auth
        .handle(Request::get("/session").with_header(
            "cookie",
            "better-auth.session_token=forged-token.Zm9yZ2Vk",
        ))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, Some(serde_json::Value::Null));
}

#[tokio::test]
async fn test_remember_me_false_yields_browser_session_cookie() {
    let auth = setup(|_| {}).await;
    let response = auth
        .handle(Request::post(
            "/sign-up/email",
            json!({
                "name": "Ada",
                "email": "ada@x.io",
                "password": "pw_longer_than_8",
                "rememberMe": false,
            }),
        ))
        .await;
    let session_cookie = response
        .header_values("set-cookie")
        .into_iter()
        .find(|c| c.starts_with("better-auth.session_token="))
        .unwrap()
        .to_string();
    assert!(!session_cookie.contains("Max-Age"));
    assert!(response
        .header_values("set-cookie")
        .iter()
        .any(|c| c.starts_with("better-auth.dont_remember=")));
}

#[tokio::test]
async fn test_email_verification_round_trip() {
    let mailer = Arc::new(MemoryEmailSender::new());
    let mailer_for_options = mailer.clone();
    let auth = setup(move |options| {
        options.email_sender = mailer_for_options;
        options.email_verification.send_on_sign_up = true;
    })
    .await;
    sign_up(&auth, "ada@x.io").await;
    tokio::task::yield_now().await;
    let email = mailer.last_of("verification").expect("verification email");
    assert_eq!(email.to, "ada@x.io");

    let response = auth
        .handle(Request::get("/verify-email").with_query("token", email.token.clone()))
        .await;
    assert_eq!(response.status, 200, "verify failed: {:?}", response.body);

    let (_, jar) = {
        let response = auth
            .handle(Request::post(
                "/sign-in/email",
                json!({ "email": "ada@x.io", "password": "pw_longer_than_8" }),
            ))
            .await;
        let mut jar = HashMap::new();
        absorb_cookies(&mut jar, &response);
        (response, jar)
    };
    let response = auth
        .handle(Request::get("/session").with_header("cookie", cookie_header(&jar)))
        .await;
    assert_eq!(response.body.unwrap()["user"]["emailVerified"], true);

    // Idempotent: the same token verifies again.
    let response = auth
        .handle(Request::get("/verify-email").with_query("token", email.token.clone()))
        .await;
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_expired_verification_token_redirects_with_error() {
    let auth = setup(|_| {}).await;
    sign_up(&auth, "ada@x.io").await;

    let codec = JwtCodec::hs256(TEST_SECRET);
    let expired = codec
        .encode(&VerificationClaims::new("ada@x.io", None, -10))
        .unwrap();

    let response = auth
        .handle(
            Request::get("/verify-email")
                .with_query("token", expired)
                .with_query("callbackURL", "/welcome"),
        )
        .await;
    assert_eq!(response.status, 302);
    assert_eq!(
        response.header("location").unwrap(),
        "http://localhost:3000/welcome?error=token_expired"
    );

    // Garbage tokens are invalid, not expired.
    let response = auth
        .handle(
            Request::get("/verify-email")
                .with_query("token", "not-a-jwt")
                .with_query("callbackURL", "/welcome"),
        )
        .await;
    assert_eq!(
        response.header("location").unwrap(),
        "http://localhost:3000/welcome?error=invalid_token"
    );
}

#[tokio::test]
async fn test_password_reset_is_single_use_and_revokes_sessions() {
    let mailer = Arc::new(MemoryEmailSender::new());
    let mailer_for_options = mailer.clone();
    let auth = setup(move |options| {
        options.email_sender = mailer_for_options;
    })
    .await;
    let (_, jar) = sign_up(&auth, "ada@x.io").await;

    let response = auth
        .handle(Request::post("/forget-password", json!({ "email": "ada@x.io" })))
        .await;
    assert_eq!(response.status, 200);
    tokio::task::yield_now().await;
    let email = mailer.last_of("reset-password").expect("reset email");

    // Unknown emails get the same quiet success.
    let response = auth
        .handle(Request::post("/forget-password", json!({ "email": "ghost@x.io" })))
        .await;
    assert_eq!(response.status, 200);

    let response = auth
        .handle(Request::post(
            "/reset-password",
            json!({ "token": email.token, "newPassword": "a_new_password_1" }),
        ))
        .await;
    assert_eq!(response.status, 200, "reset failed: {:?}", response.body);

    // Reset revoked the standing session.
    let response = auth
        .handle(Request::get("/session").with_header("cookie", cookie_header(&jar)))
        .await;
    assert_eq!(response.body, Some(serde_json::Value::Null));

    // New password works, old one does not.
    let response = auth
        .handle(Request::post(
            "/sign-in/email",
            json!({ "email": "ada@x.io", "password": "a_new_password_1" }),
        ))
        .await;
    assert_eq!(response.status, 200);
    let response = auth
        .handle(Request::post(
            "/sign-in/email",
            json!({ "email": "ada@x.io", "password": "pw_longer_than_8" }),
        ))
        .await;
    assert_eq!(response.status, 401);

    // The token was consumed atomically.
    let response = auth
        .handle(Request::post(
            "/reset-password",
            json!({ "token": email.token, "newPassword": "another_password_2" }),
        ))
        .await;
    assert_eq!(response.status, 401);
    assert_eq!(response.body.unwrap()["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_rate_limit_answers_429_with_retry_after() {
    let auth = setup(|options| {
        options.rate_limit.enabled = Some(true);
        options.rate_limit.window = 10;
        options.rate_limit.max = 5;
    })
    .await;

    let request = || {
        Request::post(
            "/sign-in/email",
            json!({ "email": "ada@x.io", "password": "pw_longer_than_8" }),
        )
        .with_header("x-forwarded-for", "203.0.113.7")
    };
    for _ in 0..5 {
        let response = auth.handle(request()).await;
        assert!(response.status <= 401, "unexpected status {}", response.status);
    }
    let response = auth.handle(request()).await;
    assert_eq!(response.status, 429);
    let retry_after: i64 = response.header("retry-after").unwrap().parse().unwrap();
    assert_eq!(response.body.unwrap()["code"], "TOO_MANY_REQUESTS");
    assert!(retry_after >= 1);

    // A different client is unaffected.
    let response = auth
        .handle(
            Request::post(
                "/sign-in/email",
                json!({ "email": "ada@x.io", "password": "pw_longer_than_8" }),
            )
            .with_header("x-forwarded-for", "203.0.113.8"),
        )
        .await;
    assert_ne!(response.status, 429);
}

#[tokio::test]
async fn test_delete_user_cascades() {
    let auth = setup(|options| {
        options.user.delete_user_enabled = true;
    })
    .await;
    let (body, jar) = sign_up(&auth, "ada@x.io").await;
    let user_id = body["user"]["id"].as_str().unwrap().to_string();

    let response = auth
        .handle(
            Request::post("/delete-user", json!({ "password": "pw_longer_than_8" }))
                .with_header("cookie", cookie_header(&jar)),
        )
        .await;
    assert_eq!(response.status, 200, "delete failed: {:?}", response.body);

    let adapter = &auth.context().adapter;
    for model in ["user", "session", "account"] {
        let clause = if model == "user" {
            Where::eq("id", json!(user_id))
        } else {
            Where::eq("userId", json!(user_id))
        };
        let rows = adapter
            .find_many(
                model,
                FindManyArgs {
                    where_clause: vec![clause],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(rows.is_empty(), "{model} rows survived the cascade");
    }
}

#[tokio::test]
async fn test_cookie_cache_serves_reads_without_database() {
    let auth = setup(|options| {
        options.session.cookie_cache = CookieCacheOptions::enabled(300);
    })
    .await;
    let (_, mut jar) = sign_up(&auth, "ada@x.io").await;
    assert!(jar.contains_key("better-auth.session_data"));

    // Remove the session row out from under the cache.
    auth.context()
        .adapter
        .delete_many("session", &[])
        .await
        .unwrap();

    let response = auth
        .handle(Request::get("/session").with_header("cookie", cookie_header(&jar)))
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body.unwrap()["user"]["email"], "ada@x.io");

    // A tampered snapshot falls back to the database, which is empty now.
    let tampered = jar.get("better-auth.session_data").unwrap().clone();
    let mid = tampered.len() / 2;
    let tampered: String = tampered
        .char_indices()
        .map(|(i, c)| if i == mid { if c == 'A' { 'B' } else { 'A' } } else { c })
        .collect();
    jar.insert("better-auth.session_data".to_string(), tampered);
    let response = auth
        .handle(Request::get("/session").with_header("cookie", cookie_header(&jar)))
        .await;
    assert_eq!(response.body, Some(serde_json::Value::Null));
}

#[tokio::test]
async fn test_sliding_renewal_rewrites_cookie() {
    let auth = setup(|_| {}).await;
    let (body, jar) = sign_up(&auth, "ada@x.io").await;
    let token = body["token"].as_str().unwrap();

    // Age the session past update_age (1 day by default).
    let aged = chrono::Utc::now() - chrono::Duration::days(2);
    auth.context()
        .adapter
        .update(
            "session",
            &[Where::eq("token", json!(token))],
            json!({ "createdAt": aged }),
        )
        .await
        .unwrap();

    let response = auth
        .handle(Request::get("/session").with_header("cookie", cookie_header(&jar)))
        .await;
    assert_eq!(response.status, 200);
    // Renewal re-issued the token cookie on a read-only endpoint.
    assert!(response
        .header_values("set-cookie")
        .iter()
        .any(|c| c.starts_with("better-auth.session_token=")));

    // The window was refreshed in storage.
    let row = auth
        .context()
        .adapter
        .find_many(
            "session",
            FindManyArgs {
                where_clause: vec![Where::eq("token", json!(token))],
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .pop()
        .unwrap();
    let created_at: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(row["createdAt"].clone()).unwrap();
    assert!(created_at > aged + chrono::Duration::days(1));
}

#[tokio::test]
async fn test_update_user_reflects_in_session() {
    let auth = setup(|_| {}).await;
    let (_, jar) = sign_up(&auth, "ada@x.io").await;

    let response = auth
        .handle(
            Request::post("/update-user", json!({ "name": "Ada Lovelace" }))
                .with_header("cookie", cookie_header(&jar)),
        )
        .await;
    assert_eq!(response.status, 200);

    let response = auth
        .handle(Request::get("/session").with_header("cookie", cookie_header(&jar)))
        .await;
    assert_eq!(response.body.unwrap()["user"]["name"], "Ada Lovelace");
}

#[tokio::test]
async fn test_server_api_invocation_without_http() {
    let auth = setup(|_| {}).await;
    let api = auth.api();
    let response = api
        .sign_up_email(json!({
            "name": "Ada",
            "email": "ada@x.io",
            "password": "pw_longer_than_8",
        }))
        .await
        .unwrap();
    assert_eq!(response.status, 200);

    let err = api
        .sign_in_email(json!({ "email": "ada@x.io", "password": "wrong-password" }))
        .await
        .unwrap_err();
    assert_eq!(err.code, "INVALID_EMAIL_OR_PASSWORD");

    assert!(api.get_session(&[]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_schema_descriptor_and_migrations() {
    use better_auth::schema::{generate_migrations, SchemaDefinition, SqlDialect};
    let auth = setup(|_| {}).await;
    let schema = auth.schema();
    for table in ["user", "session", "account", "verification"] {
        assert!(schema.get_table(table).is_some());
    }
    let statements = generate_migrations(schema, &SchemaDefinition::new(), SqlDialect::Postgres);
    assert_eq!(statements.len(), schema.tables.len());
}
