//! The session subsystem: issuance, request-time resolution, sliding
//! renewal, and revocation.
//!
//! Resolution order: a bearer token fed in by the bearer plugin, then the
//! signed session-token cookie. With the cookie cache enabled, a valid
//! session-data snapshot short-circuits the database for up to its own
//! max-age. Every path that issues or renews a session re-issues the
//! cookie cache at response time.

use crate::context::EndpointContext;
use crate::cookies::cache::{self, CachePayload};
use crate::error::{ApiError, ApiResult};
use crate::types::{SessionWithUser, User};
use chrono::{Duration, Utc};

/// Context-data key the bearer plugin writes the inbound token under.
pub const SESSION_TOKEN_DATA_KEY: &str = "session-token";

/// Creates a session for `user` and sets the response cookies.
pub async fn issue_session(
    ctx: &EndpointContext,
    user: &User,
    dont_remember: bool,
) -> ApiResult<SessionWithUser> {
    let expires_in = Duration::seconds(ctx.auth.options.session.expires_in);
    let session = ctx
        .auth
        .internal
        .create_session(user, expires_in, ctx.client_ip(), ctx.user_agent())
        .await?;
    let pair = SessionWithUser {
        session,
        user: user.clone(),
    };
    set_session_cookies(ctx, &pair, dont_remember)?;
    tracing::debug!(user = %user.id, "session issued");
    Ok(pair)
}

/// Writes the session-token cookie (and the cache snapshot when enabled)
/// and parks the pair on the context for after hooks.
pub fn set_session_cookies(
    ctx: &EndpointContext,
    pair: &SessionWithUser,
    dont_remember: bool,
) -> ApiResult<()> {
    let options = &ctx.auth.options;
    // A don't-remember session becomes a browser-session cookie: no
    // Max-Age, plus a signed marker so later renewals keep the behavior.
    let max_age = if dont_remember {
        None
    } else {
        Some(options.session.expires_in)
    };
    let descriptor = ctx.auth.cookies.session_token(max_age);
    ctx.set_signed_cookie(&descriptor, &pair.session.token)?;

    if dont_remember {
        let marker = ctx.auth.cookies.dont_remember();
        ctx.set_signed_cookie(&marker, "true")?;
    }

    refresh_cookie_cache(ctx, pair)?;
    ctx.set_pending_session(pair.clone());
    Ok(())
}

/// Re-issues the session-data snapshot when the cache is enabled.
pub fn refresh_cookie_cache(ctx: &EndpointContext, pair: &SessionWithUser) -> ApiResult<()> {
    let cache_options = &ctx.auth.options.session.cookie_cache;
    if !cache_options.enabled {
        return Ok(());
    }
    let payload = CachePayload::new(&pair.session, &pair.user, cache_options.version.resolve());
    let encoded = cache::encode(
        cache_options.strategy,
        &ctx.auth.secret,
        &payload,
        cache_options.max_age,
    )
    .map_err(ApiError::from)?;
    let descriptor = ctx.auth.cookies.session_data(cache_options.max_age);
    ctx.set_chunked_cookie(&descriptor, &encoded);
    Ok(())
}

/// Clears every session-bearing cookie.
pub fn clear_session_cookies(ctx: &EndpointContext) {
    ctx.clear_cookie(&ctx.auth.cookies.session_token(None));
    ctx.clear_cookie(&ctx.auth.cookies.dont_remember());
    let data = ctx.auth.cookies.session_data(0);
    ctx.clear_cookie(&data);
    // Stale chunks from an oversized snapshot go too.
    for name in ctx.request_cookies().keys() {
        if name.starts_with(&format!("{}.", data.name)) {
            let mut chunk = data.clone();
            chunk.name = name.clone();
            ctx.clear_cookie(&chunk);
        }
    }
}

/// The inbound session token, if any: bearer-plugin data first, signed
/// cookie second.
pub fn request_session_token(ctx: &EndpointContext) -> Option<String> {
    if let Some(token) = ctx.get_data::<String>(SESSION_TOKEN_DATA_KEY) {
        return Some(token);
    }
    let name = ctx.auth.cookies.session_token(None).name;
    ctx.get_signed_cookie(&name)
}

/// Resolves the request's session, renewing it when the sliding window
/// has aged past `update_age`. Memoized per request.
pub async fn get_session(ctx: &EndpointContext) -> ApiResult<Option<SessionWithUser>> {
    if let Some(memo) = ctx.session_memo() {
        return Ok(memo);
    }

    let Some(token) = request_session_token(ctx) else {
        ctx.memoize_session(None);
        return Ok(None);
    };

    // Cookie cache: trust a valid snapshot without touching the database.
    let cache_options = &ctx.auth.options.session.cookie_cache;
    if cache_options.enabled {
        let data_name = ctx.auth.cookies.session_data(0).name;
        if let Some(raw) = ctx.get_chunked_cookie(&data_name) {
            if let Some(payload) = cache::decode(
                cache_options.strategy,
                &ctx.auth.secret,
                &raw,
                &cache_options.version.resolve(),
            ) {
                if payload.session.token == token && !payload.session.is_expired() {
                    let pair = SessionWithUser {
                        session: payload.session,
                        user: payload.user,
                    };
                    ctx.memoize_session(Some(pair.clone()));
                    return Ok(Some(pair));
                }
            }
        }
    }

    let Some(mut pair) = ctx.auth.internal.find_session(&token).await? else {
        clear_session_cookies(ctx);
        ctx.memoize_session(None);
        return Ok(None);
    };

    // Sliding renewal: bump the window once the session has aged enough.
    let age = Utc::now() - pair.session.created_at;
    if age.num_seconds() > ctx.auth.options.session.update_age {
        let expires_in = Duration::seconds(ctx.auth.options.session.expires_in);
        if let Some(renewed) = ctx
            .auth
            .internal
            .renew_session(&token, &pair.user, expires_in)
            .await?
        {
            pair.session = renewed;
            let dont_remember = ctx
                .get_signed_cookie(&ctx.auth.cookies.dont_remember().name)
                .is_some();
            set_session_cookies(ctx, &pair, dont_remember)?;
        }
    } else if cache_options.enabled {
        // The snapshot was missing or stale; refresh it for the next read.
        refresh_cookie_cache(ctx, &pair)?;
    }

    ctx.memoize_session(Some(pair.clone()));
    Ok(Some(pair))
}

/// Revokes the current session and clears its cookies.
pub async fn revoke_session(ctx: &EndpointContext, token: &str) -> ApiResult<()> {
    ctx.auth.internal.delete_session(token).await?;
    clear_session_cookies(ctx);
    ctx.clear_pending_session();
    Ok(())
}
