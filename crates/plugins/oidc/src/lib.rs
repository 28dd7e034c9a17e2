//! # Better Auth OIDC Provider Plugin
//!
//! A server-side OAuth 2.0 / OpenID Connect authorization server:
//! authorization-code flow with PKCE, consent and select-account
//! prompts, client authentication in three modes, refresh-token
//! rotation, token introspection, userinfo, dynamic client registration,
//! and the discovery documents.
//!
//! EdDSA token signing is delegated to an explicitly wired
//! [`better_auth_plugin_jwt::EdDsaSigner`]; without one, access tokens
//! are opaque (introspectable) and id_tokens fall back to HS256 with the
//! authenticating client's secret.

mod authorize;
mod discovery;
mod token;
mod types;

pub use types::{AccessTokenRecord, CodePayload, ConsentRecord, OAuthClient, SecretStorage};

use async_trait::async_trait;
use better_auth_core::context::EndpointContext;
use better_auth_core::plugin::{AfterHook, AuthPlugin};
use better_auth_core::rate_limit::RateLimitRule;
use better_auth_core::router::{Endpoint, PathMatcher};
use better_auth_core::schema::{FieldType, OnDelete, SchemaField, TableDefinition};
use better_auth_plugin_jwt::EdDsaSigner;
use std::sync::Arc;

pub mod error_codes {
    pub const INVALID_CLIENT: (&str, &str) = ("INVALID_CLIENT", "Unknown or disabled client");
    pub const INVALID_REDIRECT_URI: (&str, &str) =
        ("INVALID_REDIRECT_URI", "redirect_uri is not registered for this client");
    pub const INVALID_AUTHORIZATION_REQUEST: (&str, &str) =
        ("INVALID_AUTHORIZATION_REQUEST", "Invalid authorization request");
    pub const CLIENT_REGISTRATION_DISABLED: (&str, &str) =
        ("CLIENT_REGISTRATION_DISABLED", "Dynamic client registration is disabled");

    pub(crate) const ALL: &[(&str, &str)] = &[
        INVALID_CLIENT,
        INVALID_REDIRECT_URI,
        INVALID_AUTHORIZATION_REQUEST,
        CLIENT_REGISTRATION_DISABLED,
    ];
}

pub(crate) const CONSENT_COOKIE: &str = "oauth_consent";
pub(crate) const SELECT_ACCOUNT_COOKIE: &str = "oauth_select_account";
pub(crate) const LOGIN_PROMPT_COOKIE: &str = "oidc_login_prompt";
/// Pending-authorization cookies live this long.
pub(crate) const PROMPT_COOKIE_MAX_AGE: i64 = 600;

/// Decides whether the signed-in account is the one the end-user means
/// to continue with (`prompt=select_account`).
pub trait SelectedAccountHook: Send + Sync {
    fn selected(&self, ctx: &EndpointContext) -> bool;
}

pub struct OidcConfig {
    /// Application page that authenticates the end-user; the pending
    /// authorize query is forwarded to it.
    pub login_page: String,
    pub consent_page: Option<String>,
    pub select_account_page: Option<String>,
    /// Reject authorization requests without PKCE.
    pub require_pkce: bool,
    /// Authorization-code lifetime in seconds.
    pub code_expires_in: i64,
    pub access_token_expires_in: i64,
    pub refresh_token_expires_in: i64,
    pub allow_dynamic_registration: bool,
    pub secret_storage: SecretStorage,
    /// EdDSA signer from the jwt plugin; `None` means opaque access
    /// tokens and HS256 id_tokens.
    pub signer: Option<Arc<EdDsaSigner>>,
    pub selected_account: Option<Arc<dyn SelectedAccountHook>>,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            login_page: "/sign-in".to_string(),
            consent_page: None,
            select_account_page: None,
            require_pkce: false,
            code_expires_in: 60,
            access_token_expires_in: 3600,
            refresh_token_expires_in: 30 * 24 * 60 * 60,
            allow_dynamic_registration: true,
            secret_storage: SecretStorage::default(),
            signer: None,
            selected_account: None,
        }
    }
}

impl OidcConfig {
    pub fn with_signer(mut self, signer: Arc<EdDsaSigner>) -> Self {
        self.signer = Some(signer);
        self
    }
}

pub struct OidcPlugin {
    config: Arc<OidcConfig>,
}

impl OidcPlugin {
    pub fn new(config: OidcConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for OidcPlugin {
    fn default() -> Self {
        Self::new(OidcConfig::default())
    }
}

#[async_trait]
impl AuthPlugin for OidcPlugin {
    fn id(&self) -> &'static str {
        "oidc-provider"
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        let config = &self.config;
        vec![
            Endpoint::get("/oauth2/authorize", authorize::Authorize { config: config.clone() })
                .require_headers()
                .summary("OAuth 2.0 authorization endpoint"),
            Endpoint::post("/oauth2/consent", authorize::Consent { config: config.clone() })
                .require_session()
                .client_exposed()
                .summary("Record the end-user's consent decision"),
            Endpoint::post(
                "/oauth2/selected-account",
                authorize::SelectedAccount { config: config.clone() },
            )
            .require_session()
            .client_exposed()
            .summary("Continue after account selection"),
            Endpoint::post("/oauth2/token", token::Token { config: config.clone() })
                .summary("OAuth 2.0 token endpoint"),
            Endpoint::get("/oauth2/userinfo", token::UserInfo)
                .require_headers()
                .summary("OIDC userinfo endpoint"),
            Endpoint::post("/oauth2/introspect", token::Introspect { config: config.clone() })
                .summary("RFC 7662 token introspection"),
            Endpoint::post("/oauth2/register", discovery::Register { config: config.clone() })
                .summary("Dynamic client registration"),
            Endpoint::get(
                "/.well-known/openid-configuration",
                discovery::WellKnown { config: config.clone() },
            )
            .summary("OIDC discovery document"),
            Endpoint::get(
                "/.well-known/oauth-authorization-server",
                discovery::WellKnown { config: config.clone() },
            )
            .summary("OAuth 2.0 authorization-server metadata"),
        ]
    }

    fn after_hooks(&self) -> Vec<AfterHook> {
        vec![AfterHook::new(
            PathMatcher::Prefix("/sign-in".into()),
            authorize::LoginResume,
        )]
    }

    fn schema(&self) -> Vec<TableDefinition> {
        vec![
            TableDefinition::new(types::OAUTH_APPLICATION_MODEL)
                .field(SchemaField::new("id", FieldType::String).unique().no_input())
                .field(SchemaField::new("clientId", FieldType::String).unique().no_input())
                .field(SchemaField::optional("clientSecret", FieldType::String).no_input().hidden())
                .field(SchemaField::optional("name", FieldType::String))
                .field(SchemaField::new("redirectUrls", FieldType::Json))
                .field(SchemaField::new("tokenEndpointAuthMethod", FieldType::String))
                .field(
                    SchemaField::new("skipConsent", FieldType::Boolean)
                        .default_value(serde_json::Value::Bool(false)),
                )
                .field(
                    SchemaField::new("disabled", FieldType::Boolean)
                        .default_value(serde_json::Value::Bool(false))
                        .no_input(),
                )
                .field(
                    SchemaField::optional("userId", FieldType::String)
                        .references("user", "id", OnDelete::SetNull)
                        .no_input(),
                )
                .field(SchemaField::optional("logoUri", FieldType::String))
                .field(SchemaField::optional("metadata", FieldType::Json))
                .field(SchemaField::new("createdAt", FieldType::Date).no_input())
                .field(SchemaField::new("updatedAt", FieldType::Date).no_input()),
            TableDefinition::new(types::OAUTH_ACCESS_TOKEN_MODEL)
                .field(SchemaField::new("id", FieldType::String).unique().no_input())
                .field(SchemaField::new("accessToken", FieldType::String).unique().no_input().hidden())
                .field(
                    SchemaField::optional("refreshToken", FieldType::String)
                        .unique()
                        .no_input()
                        .hidden(),
                )
                .field(SchemaField::new("clientId", FieldType::String).no_input())
                .field(
                    SchemaField::new("userId", FieldType::String)
                        .references("user", "id", OnDelete::Cascade)
                        .no_input(),
                )
                .field(SchemaField::new("scopes", FieldType::String).no_input())
                .field(SchemaField::new("accessTokenExpiresAt", FieldType::Date).no_input())
                .field(SchemaField::optional("refreshTokenExpiresAt", FieldType::Date).no_input())
                .field(SchemaField::new("createdAt", FieldType::Date).no_input())
                .field(SchemaField::new("updatedAt", FieldType::Date).no_input()),
            TableDefinition::new(types::OAUTH_CONSENT_MODEL)
                .field(SchemaField::new("id", FieldType::String).unique().no_input())
                .field(
                    SchemaField::new("userId", FieldType::String)
                        .references("user", "id", OnDelete::Cascade)
                        .no_input(),
                )
                .field(SchemaField::new("clientId", FieldType::String).no_input())
                .field(SchemaField::new("scopes", FieldType::String).no_input())
                .field(SchemaField::new("createdAt", FieldType::Date).no_input())
                .field(SchemaField::new("updatedAt", FieldType::Date).no_input()),
        ]
    }

    fn rate_limit_rules(&self) -> Vec<RateLimitRule> {
        vec![RateLimitRule::new(PathMatcher::Prefix("/oauth2".into()), 10, 20)]
    }

    fn error_codes(&self) -> &'static [(&'static str, &'static str)] {
        error_codes::ALL
    }
}
