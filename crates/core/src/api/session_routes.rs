//! `GET /session` and `POST /sign-out`.

use crate::context::EndpointContext;
use crate::error::ApiResult;
use crate::router::{EndpointHandler, Response};
use crate::session;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct GetSession;

#[async_trait]
impl EndpointHandler for GetSession {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        match session::get_session(ctx).await? {
            Some(pair) => Ok(Response::json(json!({
                "session": pair.session,
                "user": pair.user,
            }))),
            None => Ok(Response::json(Value::Null)),
        }
    }
}

pub struct SignOut;

#[async_trait]
impl EndpointHandler for SignOut {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        if let Some(token) = session::request_session_token(ctx) {
            session::revoke_session(ctx, &token).await?;
        } else {
            session::clear_session_cookies(ctx);
        }
        Ok(Response::json(json!({ "success": true })))
    }
}
