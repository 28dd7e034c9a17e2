//! # Better Auth Magic Link Plugin
//!
//! Passwordless sign-in: a single-use token is emailed as a link; the
//! verify endpoint consumes it, provisions or signs in the user, and sets
//! the session. Tokens can be stored plain or SHA-256-hashed so a
//! database leak does not yield working links.

use async_trait::async_trait;
use better_auth_core::context::EndpointContext;
use better_auth_core::crypto;
use better_auth_core::error::{codes, ApiError, ApiResult, AuthResult};
use better_auth_core::plugin::AuthPlugin;
use better_auth_core::router::{Endpoint, EndpointHandler, PathMatcher, Response};
use better_auth_core::rate_limit::RateLimitRule;
use better_auth_core::session;
use better_auth_core::types::User;
use better_auth_core::tasks;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Plugin-specific error codes.
pub mod error_codes {
    pub const INVALID_MAGIC_LINK: (&str, &str) = ("INVALID_MAGIC_LINK", "Invalid magic link");
    pub const MAGIC_LINK_SIGNUP_DISABLED: (&str, &str) = (
        "MAGIC_LINK_SIGNUP_DISABLED",
        "Sign up with magic link is disabled",
    );

    pub(crate) const ALL: &[(&str, &str)] = &[INVALID_MAGIC_LINK, MAGIC_LINK_SIGNUP_DISABLED];
}

/// Delivery callback for the link.
#[async_trait]
pub trait MagicLinkSender: Send + Sync {
    async fn send_magic_link(&self, email: &str, url: &str, token: &str) -> AuthResult<()>;
}

/// How the token is stored in the verification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenStorage {
    #[default]
    Plain,
    /// SHA-256, base64url: a leaked row cannot be replayed as a link.
    Hashed,
}

pub struct MagicLinkConfig {
    pub sender: Arc<dyn MagicLinkSender>,
    /// Link lifetime in seconds.
    pub expires_in: i64,
    pub disable_sign_up: bool,
    pub storage: TokenStorage,
}

impl MagicLinkConfig {
    pub fn new(sender: Arc<dyn MagicLinkSender>) -> Self {
        Self {
            sender,
            expires_in: 300,
            disable_sign_up: false,
            storage: TokenStorage::default(),
        }
    }
}

pub struct MagicLinkPlugin {
    config: Arc<MagicLinkConfig>,
}

impl MagicLinkPlugin {
    pub fn new(config: MagicLinkConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

fn storage_key(config: &MagicLinkConfig, token: &str) -> String {
    let stored = match config.storage {
        TokenStorage::Plain => token.to_string(),
        TokenStorage::Hashed => crypto::sha256_base64url(token),
    };
    format!("magic-link-{stored}")
}

#[derive(Debug, Serialize, Deserialize)]
struct MagicLinkValue {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInMagicLinkBody {
    email: String,
    name: Option<String>,
    #[serde(rename = "callbackURL")]
    callback_url: Option<String>,
}

struct SignInMagicLink {
    config: Arc<MagicLinkConfig>,
}

#[async_trait]
impl EndpointHandler for SignInMagicLink {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: SignInMagicLinkBody = ctx.body()?;
        let email = body.email.to_lowercase();
        if !email.contains('@') {
            return Err(ApiError::bad_request(codes::INVALID_EMAIL));
        }

        let token = crypto::generate_token();
        let value = serde_json::to_string(&MagicLinkValue {
            email: email.clone(),
            name: body.name,
        })
        .map_err(|_| ApiError::internal("failed to serialize magic link payload"))?;
        ctx.auth
            .internal
            .create_verification(
                &storage_key(&self.config, &token),
                &value,
                Utc::now() + Duration::seconds(self.config.expires_in),
            )
            .await?;

        let mut url = format!(
            "{}?token={}",
            ctx.auth.endpoint_url("/magic-link/verify"),
            urlencoding::encode(&token)
        );
        if let Some(callback) = &body.callback_url {
            url.push_str(&format!("&callbackURL={}", urlencoding::encode(callback)));
        }

        let sender = Arc::clone(&self.config.sender);
        tasks::run_in_background_or_await(true, "send-magic-link", async move {
            sender.send_magic_link(&email, &url, &token).await
        })
        .await;
        Ok(Response::json(json!({ "status": true })))
    }
}

struct VerifyMagicLink {
    config: Arc<MagicLinkConfig>,
}

impl VerifyMagicLink {
    async fn run(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let token = ctx
            .query("token")
            .ok_or_else(|| ApiError::bad_request(error_codes::INVALID_MAGIC_LINK))?;

        let verification = ctx
            .auth
            .internal
            .consume_verification(&storage_key(&self.config, token))
            .await?
            .ok_or_else(|| ApiError::unauthorized(error_codes::INVALID_MAGIC_LINK))?;
        let value: MagicLinkValue = serde_json::from_str(&verification.value)
            .map_err(|_| ApiError::unauthorized(error_codes::INVALID_MAGIC_LINK))?;

        let user = match ctx.auth.internal.find_user_by_email(&value.email).await? {
            Some(user) => {
                // Following the emailed link proves address ownership.
                if user.email_verified {
                    user
                } else {
                    ctx.auth
                        .internal
                        .update_user(&user.id, json!({ "emailVerified": true }))
                        .await?
                        .ok_or_else(|| ApiError::not_found(codes::USER_NOT_FOUND))?
                }
            }
            None => {
                if self.config.disable_sign_up {
                    return Err(ApiError::forbidden(error_codes::MAGIC_LINK_SIGNUP_DISABLED));
                }
                let mut user = User::new(uuid::Uuid::new_v4().to_string(), value.email.clone());
                user.email_verified = true;
                user.name = value.name.clone();
                ctx.auth.internal.create_user(&user).await?
            }
        };

        let pair = session::issue_session(ctx, &user, false).await?;
        if let Some(callback) = ctx.query("callbackURL") {
            return Ok(Response::redirect(ctx.auth.absolute_url(callback)));
        }
        Ok(Response::json(json!({
            "token": pair.session.token,
            "user": user,
        })))
    }
}

#[async_trait]
impl EndpointHandler for VerifyMagicLink {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        match self.run(ctx).await {
            Ok(response) => Ok(response),
            // Redirect-style failure when the flow came from a link.
            Err(err) => match ctx.query("callbackURL") {
                Some(callback) => {
                    let target = ctx.auth.absolute_url(callback);
                    let separator = if target.contains('?') { '&' } else { '?' };
                    Ok(Response::redirect(format!(
                        "{target}{separator}error={}",
                        err.code.to_lowercase()
                    )))
                }
                None => Err(err),
            },
        }
    }
}

#[async_trait]
impl AuthPlugin for MagicLinkPlugin {
    fn id(&self) -> &'static str {
        "magic-link"
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        vec![
            Endpoint::post(
                "/sign-in/magic-link",
                SignInMagicLink {
                    config: self.config.clone(),
                },
            )
            .client_exposed()
            .summary("Send a magic sign-in link"),
            Endpoint::get(
                "/magic-link/verify",
                VerifyMagicLink {
                    config: self.config.clone(),
                },
            )
            .client_exposed()
            .summary("Consume a magic link and sign in"),
        ]
    }

    fn rate_limit_rules(&self) -> Vec<RateLimitRule> {
        vec![RateLimitRule::new(
            PathMatcher::Prefix("/magic-link".into()),
            60,
            5,
        )]
    }

    fn error_codes(&self) -> &'static [(&'static str, &'static str)] {
        error_codes::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use better_auth_core::auth::test_support::test_auth;
    use better_auth_core::router::Request;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingSender {
        tokens: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MagicLinkSender for CapturingSender {
        async fn send_magic_link(&self, _email: &str, _url: &str, token: &str) -> AuthResult<()> {
            self.tokens.lock().unwrap().push(token.to_string());
            Ok(())
        }
    }

    async fn setup(storage: TokenStorage) -> (better_auth_core::Auth, Arc<CapturingSender>) {
        let sender = Arc::new(CapturingSender::default());
        let sender_for_plugin = sender.clone();
        let auth = test_auth(move |options| {
            let mut config = MagicLinkConfig::new(sender_for_plugin);
            config.storage = storage;
            options.plugins.push(Arc::new(MagicLinkPlugin::new(config)));
        })
        .await;
        (auth, sender)
    }

    async fn request_link(auth: &better_auth_core::Auth, sender: &CapturingSender) -> String {
        let response = auth
            .handle(Request::post(
                "/sign-in/magic-link",
                json!({ "email": "ada@x.io", "name": "Ada" }),
            ))
            .await;
        assert_eq!(response.status, 200);
        // Delivery is fire-and-forget; let the task land.
        tokio::task::yield_now().await;
        sender.tokens.lock().unwrap().last().unwrap().clone()
    }

    #[tokio::test]
    async fn test_magic_link_signs_up_and_in() {
        let (auth, sender) = setup(TokenStorage::Plain).await;
        let token = request_link(&auth, &sender).await;

        let response = auth
            .handle(Request::get("/magic-link/verify").with_query("token", token))
            .await;
        assert_eq!(response.status, 200);
        assert!(response
            .header_values("set-cookie")
            .iter()
            .any(|c| c.contains("session_token")));
        let body = response.body.unwrap();
        assert_eq!(body["user"]["email"], "ada@x.io");
        assert_eq!(body["user"]["emailVerified"], true);
    }

    #[tokio::test]
    async fn test_magic_link_single_use() {
        let (auth, sender) = setup(TokenStorage::Hashed).await;
        let token = request_link(&auth, &sender).await;

        let first = auth
            .handle(Request::get("/magic-link/verify").with_query("token", token.clone()))
            .await;
        assert_eq!(first.status, 200);

        let second = auth
            .handle(Request::get("/magic-link/verify").with_query("token", token))
            .await;
        assert_eq!(second.status, 401);
        assert_eq!(second.body.unwrap()["code"], "INVALID_MAGIC_LINK");
    }

    #[tokio::test]
    async fn test_hashed_storage_does_not_store_plaintext() {
        let (auth, sender) = setup(TokenStorage::Hashed).await;
        let token = request_link(&auth, &sender).await;

        use better_auth_core::db::FindManyArgs;
        let rows = auth
            .context()
            .adapter
            .find_many("verification", FindManyArgs::default())
            .await
            .unwrap();
        assert!(!rows.is_empty());
        for row in rows {
            let identifier = row["identifier"].as_str().unwrap();
            assert!(!identifier.contains(&token), "plaintext token stored");
        }
    }

    #[tokio::test]
    async fn test_disable_sign_up_rejects_unknown_email() {
        let sender = Arc::new(CapturingSender::default());
        let sender_for_plugin = sender.clone();
        let auth = test_auth(move |options| {
            let mut config = MagicLinkConfig::new(sender_for_plugin);
            config.disable_sign_up = true;
            options.plugins.push(Arc::new(MagicLinkPlugin::new(config)));
        })
        .await;
        let token = request_link(&auth, &sender).await;
        let response = auth
            .handle(Request::get("/magic-link/verify").with_query("token", token))
            .await;
        assert_eq!(response.status, 403);
        assert_eq!(response.body.unwrap()["code"], "MAGIC_LINK_SIGNUP_DISABLED");
    }
}
