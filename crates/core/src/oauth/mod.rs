//! OAuth 2.0 / OIDC client machinery shared by the social sign-in
//! endpoints and generic providers.
//!
//! Each configured provider supports: authorization-URL construction
//! (PKCE S256, prompt, access type, extra params), code exchange with
//! `basic` or `post` token-endpoint authentication, token refresh,
//! userinfo (id_token claims preferred, userinfo endpoint filling the
//! missing keys), and optional OIDC discovery.

pub mod link;
pub mod state;

use crate::crypto;
use crate::error::{AuthError, AuthResult};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// How the client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenEndpointAuth {
    /// `Authorization: Basic base64(client_id:client_secret)`.
    #[default]
    Basic,
    /// Credentials in the form body.
    Post,
}

/// Profile mapping callback: provider JSON → normalized user info.
pub type ProfileMapper = Arc<dyn Fn(&Value) -> OAuthUserInfo + Send + Sync>;

/// A registered OAuth provider.
#[derive(Clone)]
pub struct OAuthProviderConfig {
    pub id: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorization_url: String,
    pub token_url: String,
    pub userinfo_url: Option<String>,
    /// `.well-known/openid-configuration`; endpoints found there override
    /// the statically configured ones.
    pub discovery_url: Option<String>,
    /// Default scopes; caller-supplied scopes are unioned in.
    pub scopes: Vec<String>,
    pub pkce: bool,
    pub prompt: Option<String>,
    pub access_type: Option<String>,
    pub authorization_params: HashMap<String, String>,
    pub token_params: HashMap<String, String>,
    pub token_endpoint_auth: TokenEndpointAuth,
    pub map_profile: Option<ProfileMapper>,
}

impl OAuthProviderConfig {
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorization_url: String::new(),
            token_url: String::new(),
            userinfo_url: None,
            discovery_url: None,
            scopes: Vec::new(),
            pkce: false,
            prompt: None,
            access_type: None,
            authorization_params: HashMap::new(),
            token_params: HashMap::new(),
            token_endpoint_auth: TokenEndpointAuth::default(),
            map_profile: None,
        }
    }

    pub fn authorization_url(mut self, url: impl Into<String>) -> Self {
        self.authorization_url = url.into();
        self
    }

    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn userinfo_url(mut self, url: impl Into<String>) -> Self {
        self.userinfo_url = Some(url.into());
        self
    }

    pub fn discovery_url(mut self, url: impl Into<String>) -> Self {
        self.discovery_url = Some(url.into());
        self
    }

    pub fn scopes(mut self, scopes: Vec<impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pkce(mut self) -> Self {
        self.pkce = true;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn access_type(mut self, access_type: impl Into<String>) -> Self {
        self.access_type = Some(access_type.into());
        self
    }

    pub fn authorization_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.authorization_params.insert(key.into(), value.into());
        self
    }

    pub fn token_endpoint_auth(mut self, auth: TokenEndpointAuth) -> Self {
        self.token_endpoint_auth = auth;
        self
    }

    pub fn map_profile(
        mut self,
        mapper: impl Fn(&Value) -> OAuthUserInfo + Send + Sync + 'static,
    ) -> Self {
        self.map_profile = Some(Arc::new(mapper));
        self
    }
}

/// Token set from a code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Normalized provider profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthUserInfo {
    /// Provider subject.
    pub id: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub name: Option<String>,
    pub image: Option<String>,
    /// Merged raw claims.
    #[serde(default)]
    pub raw: Value,
}

/// The subset of an OIDC discovery document the client consumes. Fetched
/// once per callback and cached for that request.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

pub async fn discover(
    client: &reqwest::Client,
    discovery_url: &str,
) -> AuthResult<DiscoveryDocument> {
    let response = client.get(discovery_url).send().await?;
    if !response.status().is_success() {
        return Err(AuthError::Http {
            message: format!("discovery failed with status {}", response.status()),
        });
    }
    Ok(response.json().await?)
}

/// Resolved endpoints for one callback invocation: static config,
/// overridden by discovery when configured.
pub struct ResolvedEndpoints {
    pub token_url: String,
    pub userinfo_url: Option<String>,
}

pub async fn resolve_endpoints(
    client: &reqwest::Client,
    config: &OAuthProviderConfig,
) -> AuthResult<ResolvedEndpoints> {
    if let Some(discovery_url) = &config.discovery_url {
        let document = discover(client, discovery_url).await?;
        return Ok(ResolvedEndpoints {
            token_url: document.token_endpoint,
            userinfo_url: document.userinfo_endpoint.or_else(|| config.userinfo_url.clone()),
        });
    }
    Ok(ResolvedEndpoints {
        token_url: config.token_url.clone(),
        userinfo_url: config.userinfo_url.clone(),
    })
}

/// Builds the authorization URL. `extra_scopes` are unioned with the
/// provider defaults; `code_challenge` is the S256 digest when PKCE is on.
pub fn create_authorization_url(
    config: &OAuthProviderConfig,
    state: &str,
    redirect_uri: &str,
    extra_scopes: &[String],
    code_challenge: Option<&str>,
) -> String {
    let mut scopes = config.scopes.clone();
    for scope in extra_scopes {
        if !scopes.contains(scope) {
            scopes.push(scope.clone());
        }
    }
    let mut url = format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
        config.authorization_url,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&scopes.join(" ")),
        urlencoding::encode(state),
    );
    if let Some(challenge) = code_challenge {
        url.push_str(&format!(
            "&code_challenge={}&code_challenge_method=S256",
            urlencoding::encode(challenge)
        ));
    }
    if let Some(prompt) = &config.prompt {
        url.push_str(&format!("&prompt={}", urlencoding::encode(prompt)));
    }
    if let Some(access_type) = &config.access_type {
        url.push_str(&format!("&access_type={}", urlencoding::encode(access_type)));
    }
    for (key, value) in &config.authorization_params {
        url.push_str(&format!(
            "&{}={}",
            urlencoding::encode(key),
            urlencoding::encode(value)
        ));
    }
    url
}

/// The PKCE S256 challenge for a verifier.
pub fn pkce_challenge(verifier: &str) -> String {
    crypto::sha256_base64url(verifier)
}

async fn token_request(
    client: &reqwest::Client,
    config: &OAuthProviderConfig,
    token_url: &str,
    mut form: HashMap<String, String>,
) -> AuthResult<OAuthTokens> {
    for (key, value) in &config.token_params {
        form.insert(key.clone(), value.clone());
    }
    let mut request = client.post(token_url).header("accept", "application/json");
    match config.token_endpoint_auth {
        TokenEndpointAuth::Basic => {
            let credentials = STANDARD.encode(format!(
                "{}:{}",
                config.client_id, config.client_secret
            ));
            request = request.header("authorization", format!("Basic {credentials}"));
        }
        TokenEndpointAuth::Post => {
            form.insert("client_id".to_string(), config.client_id.clone());
            form.insert("client_secret".to_string(), config.client_secret.clone());
        }
    }
    let response = request.form(&form).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(provider = %config.id, %status, "token endpoint rejected the request");
        return Err(AuthError::Http {
            message: format!("token exchange failed ({status}): {body}"),
        });
    }
    Ok(response.json().await?)
}

/// Exchanges an authorization code for tokens.
pub async fn validate_authorization_code(
    client: &reqwest::Client,
    config: &OAuthProviderConfig,
    token_url: &str,
    code: &str,
    redirect_uri: &str,
    code_verifier: Option<&str>,
) -> AuthResult<OAuthTokens> {
    let mut form = HashMap::from([
        ("grant_type".to_string(), "authorization_code".to_string()),
        ("code".to_string(), code.to_string()),
        ("redirect_uri".to_string(), redirect_uri.to_string()),
    ]);
    if let Some(verifier) = code_verifier {
        form.insert("code_verifier".to_string(), verifier.to_string());
    }
    token_request(client, config, token_url, form).await
}

/// Refreshes an access token.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    config: &OAuthProviderConfig,
    refresh_token: &str,
) -> AuthResult<OAuthTokens> {
    let form = HashMap::from([
        ("grant_type".to_string(), "refresh_token".to_string()),
        ("refresh_token".to_string(), refresh_token.to_string()),
    ]);
    token_request(client, config, &config.token_url, form).await
}

/// Decodes a JWT's claims without verifying the signature. Only used for
/// id_tokens received directly from the provider's token endpoint over
/// TLS.
pub fn decode_id_token_claims(id_token: &str) -> Option<Value> {
    let mut parts = id_token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn profile_from_claims(claims: &Value) -> Option<OAuthUserInfo> {
    let id = claims
        .get("sub")
        .or_else(|| claims.get("id"))
        .and_then(Value::as_str)?
        .to_string();
    Some(OAuthUserInfo {
        id,
        email: claims.get("email").and_then(Value::as_str).map(String::from),
        email_verified: claims.get("email_verified").and_then(Value::as_bool),
        name: claims
            .get("name")
            .or_else(|| claims.get("preferred_username"))
            .and_then(Value::as_str)
            .map(String::from),
        image: claims
            .get("picture")
            .or_else(|| claims.get("avatar_url"))
            .and_then(Value::as_str)
            .map(String::from),
        raw: claims.clone(),
    })
}

/// Merges id_token claims with the userinfo response: id_token wins,
/// userinfo fills only the missing keys.
fn merge_claims(id_claims: Option<Value>, userinfo: Option<Value>) -> Value {
    match (id_claims, userinfo) {
        (Some(Value::Object(mut id_map)), Some(Value::Object(info_map))) => {
            for (key, value) in info_map {
                id_map.entry(key).or_insert(value);
            }
            Value::Object(id_map)
        }
        (Some(claims), _) => claims,
        (None, Some(info)) => info,
        (None, None) => Value::Null,
    }
}

/// Fetches and normalizes the provider profile.
///
/// Prefers id_token claims, falls back to the userinfo endpoint for
/// anything the id_token did not carry, and applies the provider's
/// `map_profile` when configured.
pub async fn get_user_info(
    client: &reqwest::Client,
    config: &OAuthProviderConfig,
    userinfo_url: Option<&str>,
    tokens: &OAuthTokens,
) -> AuthResult<OAuthUserInfo> {
    let id_claims = tokens.id_token.as_deref().and_then(decode_id_token_claims);

    let userinfo = match userinfo_url {
        // Skip the network round-trip when the id_token already has a
        // subject and the provider mapped nothing custom.
        Some(url) if id_claims.is_none() || config.map_profile.is_some() || needs_fill(&id_claims) => {
            let response = client
                .get(url)
                .bearer_auth(&tokens.access_token)
                .header("user-agent", "better-auth")
                .send()
                .await?;
            if response.status().is_success() {
                response.json::<Value>().await.ok()
            } else {
                tracing::warn!(provider = %config.id, status = %response.status(), "userinfo request failed");
                None
            }
        }
        _ => None,
    };

    let merged = merge_claims(id_claims, userinfo);
    if let Some(mapper) = &config.map_profile {
        return Ok(mapper(&merged));
    }
    profile_from_claims(&merged).ok_or_else(|| AuthError::Http {
        message: "provider profile has no subject".to_string(),
    })
}

fn needs_fill(id_claims: &Option<Value>) -> bool {
    match id_claims {
        None => true,
        Some(claims) => {
            claims.get("email").and_then(Value::as_str).is_none()
                || claims.get("name").and_then(Value::as_str).is_none()
        }
    }
}
