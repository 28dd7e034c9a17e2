//! The post-sign-in gate: a 2FA-enabled user never receives a usable
//! session from a sign-in endpoint; the fresh session is revoked on the
//! spot and replaced with a pending-2FA identifier until a second factor
//! verifies (or a trusted device is recognized).

use crate::{check_trust_device, create_pending, TwoFactorConfig, TWO_FACTOR_ENABLED_FIELD};
use async_trait::async_trait;
use better_auth_core::context::EndpointContext;
use better_auth_core::error::ApiResult;
use better_auth_core::plugin::AfterHookHandler;
use better_auth_core::router::Response;
use better_auth_core::session;
use serde_json::json;
use std::sync::Arc;

pub(crate) struct SignInGate {
    pub config: Arc<TwoFactorConfig>,
}

#[async_trait]
impl AfterHookHandler for SignInGate {
    async fn run(&self, ctx: &EndpointContext, response: &mut Response) -> ApiResult<()> {
        let Some(pair) = ctx.pending_session() else {
            return Ok(());
        };
        if !pair
            .user
            .get_extra::<bool>(TWO_FACTOR_ENABLED_FIELD)
            .unwrap_or(false)
        {
            return Ok(());
        }

        // A recognized device skips the gate; the cookie was refreshed.
        if check_trust_device(ctx, &self.config, &pair.user).await? {
            return Ok(());
        }

        ctx.auth.internal.delete_session(&pair.session.token).await?;
        session::clear_session_cookies(ctx);
        ctx.clear_pending_session();
        create_pending(ctx, &self.config, &pair.user).await?;
        tracing::debug!(user = %pair.user.id, "sign-in gated behind two-factor");

        response.status = 200;
        response.body = Some(json!({ "twoFactorRedirect": true }));
        Ok(())
    }
}
