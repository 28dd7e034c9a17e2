//! Configuration for the engine.
//!
//! `AuthOptions` is consumed once by [`crate::auth::Auth::new`]; after init
//! everything derived from it is immutable. Environment fallbacks:
//! `BETTER_AUTH_SECRET`, `BETTER_AUTH_URL`, and `NODE_ENV` (which drives
//! the secure-cookie default).

use crate::crypto::PasswordHasher;
use crate::db::{DatabaseAdapter, IdStrategy};
use crate::email::{EmailSender, NoopEmailSender};
use crate::error::{AuthError, AuthResult};
use crate::oauth::OAuthProviderConfig;
use crate::plugin::AuthPlugin;
use crate::rate_limit::{RateLimitRule, RateLimitStorageKind};
use crate::schema::SchemaField;
use crate::storage::SecondaryStorage;
use std::sync::Arc;

/// Default session lifetime: 7 days.
pub const DEFAULT_SESSION_EXPIRES_IN: i64 = 60 * 60 * 24 * 7;
/// Default sliding-renewal threshold: 1 day.
pub const DEFAULT_SESSION_UPDATE_AGE: i64 = 60 * 60 * 24;

/// Session-data cookie strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    /// `base64url(json { payload, expiresAt, signature })` with an HMAC
    /// signature. The default.
    #[default]
    Compact,
    /// HS256-signed JWT.
    Jwt,
    /// Symmetric authenticated encryption (AES-256-GCM, HKDF keys).
    Jwe,
}

impl CacheStrategy {
    /// Parses a configured strategy name. `"base64-hmac"` is a legacy alias
    /// of `"compact"`, accepted on read.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "compact" | "base64-hmac" => Some(Self::Compact),
            "jwt" => Some(Self::Jwt),
            "jwe" => Some(Self::Jwe),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Jwt => "jwt",
            Self::Jwe => "jwe",
        }
    }
}

/// Cookie-cache version: a static tag or a derivation function. A mismatch
/// between a cached payload's version and the current value invalidates
/// the cache.
#[derive(Clone)]
pub enum CacheVersion {
    Static(String),
    Derived(Arc<dyn Fn() -> String + Send + Sync>),
}

impl CacheVersion {
    pub fn resolve(&self) -> String {
        match self {
            Self::Static(v) => v.clone(),
            Self::Derived(f) => f(),
        }
    }
}

impl Default for CacheVersion {
    fn default() -> Self {
        Self::Static("1".to_string())
    }
}

/// Optional cookie-cached session snapshot.
#[derive(Clone, Default)]
pub struct CookieCacheOptions {
    pub enabled: bool,
    /// Seconds the snapshot may be trusted without touching the database.
    pub max_age: i64,
    pub strategy: CacheStrategy,
    pub version: CacheVersion,
}

impl CookieCacheOptions {
    pub fn enabled(max_age: i64) -> Self {
        Self {
            enabled: true,
            max_age,
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct SessionOptions {
    /// Session lifetime in seconds.
    pub expires_in: i64,
    /// Sliding-renewal threshold in seconds: when `now - createdAt`
    /// exceeds this, the session's window is refreshed.
    pub update_age: i64,
    pub cookie_cache: CookieCacheOptions,
    /// Extra session fields contributed by the application.
    pub additional_fields: Vec<SchemaField>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            expires_in: DEFAULT_SESSION_EXPIRES_IN,
            update_age: DEFAULT_SESSION_UPDATE_AGE,
            cookie_cache: CookieCacheOptions {
                max_age: 300,
                ..Default::default()
            },
            additional_fields: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct EmailPasswordOptions {
    pub enabled: bool,
    pub min_password_length: usize,
    pub max_password_length: usize,
    pub require_email_verification: bool,
    /// Create a session right after sign-up (when verification is not
    /// required).
    pub auto_sign_in: bool,
    pub disable_sign_up: bool,
    /// Reset-password token lifetime in seconds.
    pub reset_token_expires_in: i64,
}

impl Default for EmailPasswordOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            min_password_length: 8,
            max_password_length: 128,
            require_email_verification: false,
            auto_sign_in: true,
            disable_sign_up: false,
            reset_token_expires_in: 3600,
        }
    }
}

#[derive(Clone)]
pub struct EmailVerificationOptions {
    pub send_on_sign_up: bool,
    pub auto_sign_in_after_verification: bool,
    /// Verification-token lifetime in seconds.
    pub expires_in: i64,
}

impl Default for EmailVerificationOptions {
    fn default() -> Self {
        Self {
            send_on_sign_up: false,
            auto_sign_in_after_verification: false,
            expires_in: 3600,
        }
    }
}

#[derive(Clone, Default)]
pub struct UserOptions {
    /// Application-defined user fields, merged into the schema.
    pub additional_fields: Vec<SchemaField>,
    pub change_email_enabled: bool,
    pub delete_user_enabled: bool,
    /// Require an emailed confirmation token before deletion instead of
    /// deleting on password verification alone.
    pub delete_user_send_verification: bool,
}

#[derive(Clone)]
pub struct AccountLinkingOptions {
    pub enabled: bool,
    /// Providers whose verified emails may auto-link to an existing user.
    pub trusted_providers: Vec<String>,
    pub allow_different_emails: bool,
}

impl Default for AccountLinkingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            trusted_providers: Vec::new(),
            allow_different_emails: false,
        }
    }
}

#[derive(Clone, Default)]
pub struct AccountOptions {
    pub linking: AccountLinkingOptions,
}

#[derive(Clone)]
pub struct RateLimitOptions {
    /// `None` means "enabled in production".
    pub enabled: Option<bool>,
    /// Window in seconds.
    pub window: i64,
    /// Requests allowed per window.
    pub max: u32,
    pub storage: RateLimitStorageKind,
    pub custom_rules: Vec<RateLimitRule>,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            enabled: None,
            window: 10,
            max: 100,
            storage: RateLimitStorageKind::Memory,
            custom_rules: Vec::new(),
        }
    }
}

#[derive(Clone, Default)]
pub struct CrossSubdomainCookies {
    pub enabled: bool,
    /// Overrides the base URL's hostname as the cookie domain.
    pub domain: Option<String>,
}

#[derive(Clone)]
pub struct DatabaseAdvancedOptions {
    pub generate_id: IdStrategy,
    /// Store booleans as 0/1 (SQLite-class backends).
    pub booleans_as_integers: bool,
}

impl Default for DatabaseAdvancedOptions {
    fn default() -> Self {
        Self {
            generate_id: IdStrategy::Random,
            booleans_as_integers: false,
        }
    }
}

#[derive(Clone)]
pub struct AdvancedOptions {
    /// `None` derives from the base URL scheme / `NODE_ENV`.
    pub use_secure_cookies: Option<bool>,
    pub cookie_prefix: String,
    pub cross_subdomain_cookies: CrossSubdomainCookies,
    pub disable_csrf_check: bool,
    pub database: DatabaseAdvancedOptions,
    /// Headers consulted (in order) for the client IP.
    pub ip_address_headers: Vec<String>,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self {
            use_secure_cookies: None,
            cookie_prefix: "better-auth".to_string(),
            cross_subdomain_cookies: CrossSubdomainCookies::default(),
            disable_csrf_check: false,
            database: DatabaseAdvancedOptions::default(),
            ip_address_headers: vec!["x-forwarded-for".to_string()],
        }
    }
}

#[derive(Clone, Default)]
pub struct OnApiErrorOptions {
    /// Where redirect-style flows land on failure when the caller gave no
    /// `errorCallbackURL`.
    pub error_url: Option<String>,
}

/// The configuration record handed to [`crate::auth::Auth::new`].
pub struct AuthOptions {
    pub app_name: String,
    pub base_url: Option<String>,
    pub base_path: String,
    pub secret: Option<String>,
    pub trusted_origins: Vec<String>,
    pub session: SessionOptions,
    pub email_and_password: EmailPasswordOptions,
    pub email_verification: EmailVerificationOptions,
    pub user: UserOptions,
    pub account: AccountOptions,
    pub rate_limit: RateLimitOptions,
    pub advanced: AdvancedOptions,
    pub on_api_error: OnApiErrorOptions,
    pub social_providers: Vec<OAuthProviderConfig>,
    pub database: Option<Arc<dyn DatabaseAdapter>>,
    pub secondary_storage: Option<Arc<dyn SecondaryStorage>>,
    pub plugins: Vec<Arc<dyn AuthPlugin>>,
    pub email_sender: Arc<dyn EmailSender>,
    pub password_hasher: Option<Arc<dyn PasswordHasher>>,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            app_name: "Better Auth".to_string(),
            base_url: None,
            base_path: "/api/auth".to_string(),
            secret: None,
            trusted_origins: Vec::new(),
            session: SessionOptions::default(),
            email_and_password: EmailPasswordOptions::default(),
            email_verification: EmailVerificationOptions::default(),
            user: UserOptions::default(),
            account: AccountOptions::default(),
            rate_limit: RateLimitOptions::default(),
            advanced: AdvancedOptions::default(),
            on_api_error: OnApiErrorOptions::default(),
            social_providers: Vec::new(),
            database: None,
            secondary_storage: None,
            plugins: Vec::new(),
            email_sender: Arc::new(NoopEmailSender),
            password_hasher: None,
        }
    }
}

impl AuthOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(mut self, adapter: Arc<dyn DatabaseAdapter>) -> Self {
        self.database = Some(adapter);
        self
    }

    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn plugin(mut self, plugin: Arc<dyn AuthPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn social_provider(mut self, provider: OAuthProviderConfig) -> Self {
        self.social_providers.push(provider);
        self
    }

    pub fn email_sender(mut self, sender: Arc<dyn EmailSender>) -> Self {
        self.email_sender = sender;
        self
    }

    /// Resolves the secret, falling back to `BETTER_AUTH_SECRET`.
    pub fn resolve_secret(&self) -> AuthResult<String> {
        if let Some(secret) = &self.secret {
            return Ok(secret.clone());
        }
        std::env::var("BETTER_AUTH_SECRET").map_err(|_| AuthError::MissingConfiguration {
            key: "BETTER_AUTH_SECRET".to_string(),
        })
    }

    /// Resolves the base URL, falling back to `BETTER_AUTH_URL`, then to
    /// localhost.
    pub fn resolve_base_url(&self) -> String {
        self.base_url
            .clone()
            .or_else(|| std::env::var("BETTER_AUTH_URL").ok())
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Whether cookies get the `Secure` attribute and `__Secure-` prefix:
    /// explicit option, else https base URL, else production environment.
    pub fn resolve_secure_cookies(&self) -> bool {
        if let Some(secure) = self.advanced.use_secure_cookies {
            return secure;
        }
        if self.resolve_base_url().starts_with("https://") {
            return true;
        }
        std::env::var("NODE_ENV").map(|v| v == "production").unwrap_or(false)
    }

    /// Whether the rate limiter runs: explicit option, else production only.
    pub fn resolve_rate_limit_enabled(&self) -> bool {
        self.rate_limit.enabled.unwrap_or_else(|| {
            std::env::var("NODE_ENV").map(|v| v == "production").unwrap_or(false)
        })
    }
}
