//! Records and storage helpers for the authorization server.

use better_auth_core::context::EndpointContext;
use better_auth_core::crypto;
use better_auth_core::db::{FindOneArgs, Where};
use better_auth_core::error::{ApiResult, AuthResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub(crate) const OAUTH_APPLICATION_MODEL: &str = "oauthApplication";
pub(crate) const OAUTH_ACCESS_TOKEN_MODEL: &str = "oauthAccessToken";
pub(crate) const OAUTH_CONSENT_MODEL: &str = "oauthConsent";

/// How client secrets are stored at rest. Matching at the token endpoint
/// uses the same strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecretStorage {
    #[default]
    Plain,
    /// SHA-256, base64url.
    Hashed,
    /// Sealed with the server secret (recoverable).
    Encrypted,
}

impl SecretStorage {
    pub(crate) fn store(&self, secret: &str, server_secret: &str) -> AuthResult<String> {
        match self {
            Self::Plain => Ok(secret.to_string()),
            Self::Hashed => Ok(crypto::sha256_base64url(secret)),
            Self::Encrypted => crypto::encrypt_string(server_secret, secret),
        }
    }

    pub(crate) fn matches(&self, presented: &str, stored: &str, server_secret: &str) -> bool {
        match self {
            Self::Plain => presented == stored,
            Self::Hashed => crypto::sha256_base64url(presented) == stored,
            Self::Encrypted => crypto::decrypt_string(server_secret, stored)
                .map(|plain| plain == presented)
                .unwrap_or(false),
        }
    }
}

/// A registered relying party.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthClient {
    pub id: String,
    pub client_id: String,
    /// Stored per [`SecretStorage`]; absent for public clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub name: Option<String>,
    /// Exact-match callback URLs.
    pub redirect_urls: Vec<String>,
    /// `client_secret_basic`, `client_secret_post`, or `none`.
    pub token_endpoint_auth_method: String,
    #[serde(default)]
    pub skip_consent: bool,
    #[serde(default)]
    pub disabled: bool,
    /// The registrant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One issued access/refresh token pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenRecord {
    pub id: String,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub client_id: String,
    pub user_id: String,
    /// Space-joined scopes.
    pub scopes: String,
    pub access_token_expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Scopes a user has accepted for a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub id: String,
    pub user_id: String,
    pub client_id: String,
    pub scopes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What an authorization code binds together, stored in the verification
/// table under `oidc-code-<code>` with a ~60 s TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodePayload {
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

pub(crate) fn code_identifier(code: &str) -> String {
    format!("oidc-code-{code}")
}

pub(crate) async fn find_client(
    ctx: &EndpointContext,
    client_id: &str,
) -> ApiResult<Option<OAuthClient>> {
    let found = ctx
        .auth
        .adapter
        .find_one(
            OAUTH_APPLICATION_MODEL,
            FindOneArgs::by(vec![Where::eq("clientId", json!(client_id))]),
        )
        .await?;
    Ok(found.and_then(|record| serde_json::from_value(record).ok()))
}

pub(crate) async fn find_consent(
    ctx: &EndpointContext,
    user_id: &str,
    client_id: &str,
) -> ApiResult<Option<ConsentRecord>> {
    let found = ctx
        .auth
        .adapter
        .find_one(
            OAUTH_CONSENT_MODEL,
            FindOneArgs::by(vec![
                Where::eq("userId", json!(user_id)),
                Where::eq("clientId", json!(client_id)),
            ]),
        )
        .await?;
    Ok(found.and_then(|record| serde_json::from_value(record).ok()))
}

/// Whether every requested scope is already covered by a consent record.
pub(crate) fn scopes_covered(consent: &ConsentRecord, requested: &str) -> bool {
    let granted: Vec<&str> = consent.scopes.split_whitespace().collect();
    requested
        .split_whitespace()
        .all(|scope| granted.contains(&scope))
}
