//! Provider profile → local user resolution for OAuth callbacks: account
//! lookup, email-based linking with trusted providers, and first-login
//! provisioning.

use super::state::StatePayload;
use super::{OAuthTokens, OAuthUserInfo};
use crate::context::EndpointContext;
use crate::error::{codes, ApiError, ApiResult};
use crate::types::{Account, User};
use chrono::{Duration, Utc};
use serde_json::json;

/// Token material persisted on the account row.
fn account_tokens(account: &mut Account, tokens: &OAuthTokens) {
    account.access_token = Some(tokens.access_token.clone());
    account.refresh_token = tokens.refresh_token.clone();
    account.id_token = tokens.id_token.clone();
    account.scope = tokens.scope.clone();
    account.access_token_expires_at = tokens
        .expires_in
        .map(|s| Utc::now() + Duration::seconds(s as i64));
}

fn new_account(user_id: &str, provider_id: &str, subject: &str, tokens: &OAuthTokens) -> Account {
    let now = Utc::now();
    let mut account = Account {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        provider_id: provider_id.to_string(),
        account_id: subject.to_string(),
        password: None,
        access_token: None,
        refresh_token: None,
        id_token: None,
        access_token_expires_at: None,
        refresh_token_expires_at: None,
        scope: None,
        created_at: now,
        updated_at: now,
    };
    account_tokens(&mut account, tokens);
    account
}

/// Resolves the callback's provider profile to a local user.
///
/// Returns the user and whether this was a first login (new user).
pub async fn handle_oauth_user_info(
    ctx: &EndpointContext,
    provider_id: &str,
    user_info: &OAuthUserInfo,
    tokens: &OAuthTokens,
    state: &StatePayload,
) -> ApiResult<(User, bool)> {
    let internal = &ctx.auth.internal;
    let linking = &ctx.auth.options.account.linking;

    // Explicit link of a provider to the already signed-in user.
    if let Some(link) = &state.link {
        if !linking.allow_different_emails {
            let provider_email = user_info.email.as_deref().unwrap_or_default().to_lowercase();
            if provider_email != link.email.to_lowercase() {
                return Err(ApiError::forbidden(codes::EMAIL_DOESNT_MATCH));
            }
        }
        if let Some(existing) = internal.find_account(provider_id, &user_info.id).await? {
            if existing.user_id != link.user_id {
                return Err(ApiError::forbidden(codes::ACCOUNT_ALREADY_LINKED));
            }
            internal
                .update_account(
                    &existing.id,
                    json!({
                        "accessToken": tokens.access_token,
                        "refreshToken": tokens.refresh_token,
                        "idToken": tokens.id_token,
                        "scope": tokens.scope,
                    }),
                )
                .await?;
        } else {
            let account = new_account(&link.user_id, provider_id, &user_info.id, tokens);
            internal.create_account(&account).await?;
        }
        let user = internal
            .find_user_by_id(&link.user_id)
            .await?
            .ok_or_else(|| ApiError::not_found(codes::USER_NOT_FOUND))?;
        return Ok((user, false));
    }

    // Returning user: the (provider, subject) pair is already bound.
    if let Some(account) = internal.find_account(provider_id, &user_info.id).await? {
        internal
            .update_account(
                &account.id,
                json!({
                    "accessToken": tokens.access_token,
                    "refreshToken": tokens.refresh_token,
                    "idToken": tokens.id_token,
                    "scope": tokens.scope,
                }),
            )
            .await?;
        let user = internal
            .find_user_by_id(&account.user_id)
            .await?
            .ok_or_else(|| ApiError::not_found(codes::USER_NOT_FOUND))?;
        return Ok((user, false));
    }

    // The subject is new; try linking by email.
    if let Some(email) = &user_info.email {
        if let Some(user) = internal.find_user_by_email(email).await? {
            // The email belongs to an existing user of another provider.
            // Only trusted providers (with a verified email) may auto-link.
            let trusted = linking.enabled
                && linking.trusted_providers.iter().any(|p| p == provider_id)
                && user_info.email_verified.unwrap_or(false);
            if !trusted {
                return Err(ApiError::forbidden(codes::ACCOUNT_ALREADY_LINKED));
            }
            let account = new_account(&user.id, provider_id, &user_info.id, tokens);
            internal.create_account(&account).await?;
            return Ok((user, false));
        }
    }

    // First login: provision a user unless sign-up is disabled.
    if ctx.auth.options.email_and_password.disable_sign_up && !state.request_sign_up {
        return Err(ApiError::forbidden(codes::SIGNUP_DISABLED));
    }
    let email = user_info
        .email
        .clone()
        .ok_or_else(|| ApiError::bad_request(codes::FAILED_TO_GET_USER_INFO))?;
    let mut user = User::new(uuid::Uuid::new_v4().to_string(), email);
    user.email_verified = user_info.email_verified.unwrap_or(false);
    user.name = user_info.name.clone();
    user.image = user_info.image.clone();
    let user = internal.create_user(&user).await?;

    let account = new_account(&user.id, provider_id, &user_info.id, tokens);
    internal.create_account(&account).await?;
    tracing::info!(provider = provider_id, user = %user.id, "provisioned user from oauth profile");
    Ok((user, true))
}
