//! OAuth state management: the signed, single-use `state` cookie and the
//! PKCE verifier cookie.

use super::OAuthProviderConfig;
use crate::context::EndpointContext;
use crate::crypto;
use crate::error::{codes, ApiError, ApiResult};
use serde::{Deserialize, Serialize};

/// An account-link request carried through the flow when an already
/// signed-in user connects a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkTarget {
    pub user_id: String,
    pub email: String,
}

/// What the state cookie carries across the provider round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    pub state: String,
    pub callback_url: Option<String>,
    pub error_url: Option<String>,
    pub new_user_url: Option<String>,
    #[serde(default)]
    pub request_sign_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkTarget>,
}

/// Creates the random `state` (and PKCE verifier when the provider uses
/// PKCE), storing the payload in signed cookies.
pub fn generate_state(
    ctx: &EndpointContext,
    config: &OAuthProviderConfig,
    callback_url: Option<String>,
    error_url: Option<String>,
    new_user_url: Option<String>,
    request_sign_up: bool,
    link: Option<LinkTarget>,
) -> ApiResult<(String, Option<String>)> {
    let state = crypto::generate_token();
    let payload = StatePayload {
        state: state.clone(),
        callback_url,
        error_url,
        new_user_url,
        request_sign_up,
        link,
    };
    let json = serde_json::to_string(&payload).map_err(|_| {
        ApiError::internal("failed to serialize oauth state")
    })?;
    ctx.set_signed_cookie(&ctx.auth.cookies.state(), &json)?;

    let code_verifier = if config.pkce {
        let verifier = crypto::generate_token();
        ctx.set_signed_cookie(&ctx.auth.cookies.pk_code_verifier(), &verifier)?;
        Some(verifier)
    } else {
        None
    };
    Ok((state, code_verifier))
}

/// Verifies the callback's `state` query against the signed cookie and
/// returns the stored payload plus the PKCE verifier. Both cookies are
/// cleared: state is single-use.
pub fn parse_state(ctx: &EndpointContext) -> ApiResult<(StatePayload, Option<String>)> {
    let state_cookie = ctx.auth.cookies.state();
    let raw = ctx
        .get_signed_cookie(&state_cookie.name)
        .ok_or_else(|| ApiError::bad_request(codes::INVALID_STATE))?;
    let payload: StatePayload =
        serde_json::from_str(&raw).map_err(|_| ApiError::bad_request(codes::INVALID_STATE))?;

    let query_state = ctx
        .query("state")
        .ok_or_else(|| ApiError::bad_request(codes::INVALID_STATE))?;
    if payload.state != query_state {
        return Err(ApiError::bad_request(codes::INVALID_STATE));
    }

    let verifier_cookie = ctx.auth.cookies.pk_code_verifier();
    let code_verifier = ctx.get_signed_cookie(&verifier_cookie.name);

    ctx.clear_cookie(&state_cookie);
    ctx.clear_cookie(&verifier_cookie);
    Ok((payload, code_verifier))
}
