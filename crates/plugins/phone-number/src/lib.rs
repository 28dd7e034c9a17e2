//! # Better Auth Phone Number Plugin
//!
//! Phone OTP verification. Codes are stored as `"code:attempts"` in the
//! verification table, keyed by the phone number; wrong guesses bump the
//! counter until the ceiling, expiry answers `OTP_EXPIRED`, and a fresh
//! send resets everything. Verification can mark an existing user's
//! phone as verified or provision a new user with a synthetic email.

use async_trait::async_trait;
use better_auth_core::context::EndpointContext;
use better_auth_core::crypto;
use better_auth_core::error::{ApiError, ApiResult, AuthResult};
use better_auth_core::plugin::AuthPlugin;
use better_auth_core::rate_limit::RateLimitRule;
use better_auth_core::router::{Endpoint, EndpointHandler, PathMatcher, Response};
use better_auth_core::schema::{FieldType, SchemaField, TableDefinition};
use better_auth_core::session;
use better_auth_core::tasks;
use better_auth_core::types::User;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub mod error_codes {
    pub const INVALID_OTP: (&str, &str) = ("INVALID_OTP", "Invalid OTP");
    pub const OTP_EXPIRED: (&str, &str) = ("OTP_EXPIRED", "OTP expired");
    pub const OTP_NOT_FOUND: (&str, &str) = ("OTP_NOT_FOUND", "OTP not found");
    pub const TOO_MANY_ATTEMPTS: (&str, &str) = ("TOO_MANY_ATTEMPTS", "Too many attempts");
    pub const INVALID_PHONE_NUMBER: (&str, &str) = ("INVALID_PHONE_NUMBER", "Invalid phone number");
    pub const PHONE_NUMBER_EXISTS: (&str, &str) = (
        "PHONE_NUMBER_EXISTS",
        "Phone number is already linked to a user",
    );

    pub(crate) const ALL: &[(&str, &str)] = &[
        INVALID_OTP,
        OTP_EXPIRED,
        OTP_NOT_FOUND,
        TOO_MANY_ATTEMPTS,
        INVALID_PHONE_NUMBER,
        PHONE_NUMBER_EXISTS,
    ];
}

/// User fields this plugin contributes.
pub const PHONE_NUMBER_FIELD: &str = "phoneNumber";
pub const PHONE_NUMBER_VERIFIED_FIELD: &str = "phoneNumberVerified";

/// SMS delivery callback.
#[async_trait]
pub trait PhoneOtpSender: Send + Sync {
    async fn send_otp(&self, phone_number: &str, code: &str) -> AuthResult<()>;
}

pub struct PhoneNumberConfig {
    pub sender: Arc<dyn PhoneOtpSender>,
    pub otp_length: usize,
    /// Code lifetime in seconds.
    pub expires_in: i64,
    /// Wrong guesses allowed before `TOO_MANY_ATTEMPTS`.
    pub max_attempts: u32,
    /// Provision a user on successful verification, with a synthetic
    /// email `<phone>@<domain>`.
    pub sign_up_on_verification: Option<SignUpOnVerification>,
}

pub struct SignUpOnVerification {
    pub email_domain: String,
}

impl PhoneNumberConfig {
    pub fn new(sender: Arc<dyn PhoneOtpSender>) -> Self {
        Self {
            sender,
            otp_length: 6,
            expires_in: 300,
            max_attempts: 3,
            sign_up_on_verification: None,
        }
    }
}

pub struct PhoneNumberPlugin {
    config: Arc<PhoneNumberConfig>,
}

impl PhoneNumberPlugin {
    pub fn new(config: PhoneNumberConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

fn parse_value(value: &str) -> Option<(String, u32)> {
    let (code, attempts) = value.rsplit_once(':')?;
    Some((code.to_string(), attempts.parse().ok()?))
}

/// Minimal E.164-ish sanity check.
fn is_plausible_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    digits.len() >= 6 && digits.chars().all(|c| c.is_ascii_digit())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendOtpBody {
    phone_number: String,
}

struct SendOtp {
    config: Arc<PhoneNumberConfig>,
}

#[async_trait]
impl EndpointHandler for SendOtp {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: SendOtpBody = ctx.body()?;
        if !is_plausible_phone(&body.phone_number) {
            return Err(ApiError::bad_request(error_codes::INVALID_PHONE_NUMBER));
        }

        let code = crypto::generate_otp(self.config.otp_length);
        // Fresh row, counter at zero; any prior code is replaced.
        ctx.auth
            .internal
            .create_verification(
                &body.phone_number,
                &format!("{code}:0"),
                Utc::now() + Duration::seconds(self.config.expires_in),
            )
            .await?;

        let sender = Arc::clone(&self.config.sender);
        let phone = body.phone_number.clone();
        tasks::run_in_background_or_await(true, "send-phone-otp", async move {
            sender.send_otp(&phone, &code).await
        })
        .await;
        Ok(Response::json(json!({ "status": true })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyOtpBody {
    phone_number: String,
    code: String,
}

struct VerifyOtp {
    config: Arc<PhoneNumberConfig>,
}

#[async_trait]
impl EndpointHandler for VerifyOtp {
    async fn call(&self, ctx: &EndpointContext) -> ApiResult<Response> {
        let body: VerifyOtpBody = ctx.body()?;
        let internal = &ctx.auth.internal;

        let verification = internal
            .find_verification_including_expired(&body.phone_number)
            .await?
            .ok_or_else(|| ApiError::bad_request(error_codes::OTP_NOT_FOUND))?;
        if verification.is_expired() {
            internal.delete_verification(&body.phone_number).await?;
            return Err(ApiError::bad_request(error_codes::OTP_EXPIRED));
        }
        let (code, attempts) = parse_value(&verification.value)
            .ok_or_else(|| ApiError::bad_request(error_codes::INVALID_OTP))?;

        // The ceiling gates entry: every attempt up to the configured
        // count is still evaluated, only the count+1-th is refused.
        if attempts >= self.config.max_attempts {
            return Err(ApiError::forbidden(error_codes::TOO_MANY_ATTEMPTS));
        }
        if code != body.code {
            internal
                .update_verification(&verification.id, &format!("{code}:{}", attempts + 1))
                .await?;
            return Err(ApiError::bad_request(error_codes::INVALID_OTP));
        }

        internal.delete_verification(&body.phone_number).await?;

        // A signed-in user is marking their phone as verified.
        if let Some(pair) = session::get_session(ctx).await? {
            let user = internal
                .update_user(
                    &pair.user.id,
                    json!({
                        PHONE_NUMBER_FIELD: body.phone_number,
                        PHONE_NUMBER_VERIFIED_FIELD: true,
                    }),
                )
                .await?
                .ok_or_else(|| ApiError::internal("user vanished during verification"))?;
            session::refresh_cookie_cache(
                ctx,
                &better_auth_core::types::SessionWithUser {
                    session: pair.session,
                    user: user.clone(),
                },
            )?;
            return Ok(Response::json(json!({ "status": true, "user": user })));
        }

        let Some(signup) = &self.config.sign_up_on_verification else {
            return Ok(Response::json(json!({ "status": true })));
        };

        // Provision (or sign in) by phone number with a synthetic email.
        let email = format!("{}@{}", body.phone_number, signup.email_domain);
        let user = match internal.find_user_by_email(&email).await? {
            Some(user) => user,
            None => {
                let mut user = User::new(uuid::Uuid::new_v4().to_string(), email);
                user.set_extra(PHONE_NUMBER_FIELD, body.phone_number.clone());
                user.set_extra(PHONE_NUMBER_VERIFIED_FIELD, true);
                internal.create_user(&user).await?
            }
        };
        let pair = session::issue_session(ctx, &user, false).await?;
        Ok(Response::json(json!({
            "status": true,
            "token": pair.session.token,
            "user": user,
        })))
    }
}

#[async_trait]
impl AuthPlugin for PhoneNumberPlugin {
    fn id(&self) -> &'static str {
        "phone-number"
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        vec![
            Endpoint::post(
                "/phone-number/send-otp",
                SendOtp {
                    config: self.config.clone(),
                },
            )
            .client_exposed()
            .summary("Send a phone OTP"),
            Endpoint::post(
                "/phone-number/verify",
                VerifyOtp {
                    config: self.config.clone(),
                },
            )
            .client_exposed()
            .summary("Verify a phone OTP"),
        ]
    }

    fn schema(&self) -> Vec<TableDefinition> {
        vec![TableDefinition::new("user")
            .field(SchemaField::optional(PHONE_NUMBER_FIELD, FieldType::String).unique())
            .field(
                SchemaField::optional(PHONE_NUMBER_VERIFIED_FIELD, FieldType::Boolean).no_input(),
            )]
    }

    fn rate_limit_rules(&self) -> Vec<RateLimitRule> {
        vec![RateLimitRule::new(
            PathMatcher::Prefix("/phone-number".into()),
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
        codes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PhoneOtpSender for CapturingSender {
        async fn send_otp(&self, _phone: &str, code: &str) -> AuthResult<()> {
            self.codes.lock().unwrap().push(code.to_string());
            Ok(())
        }
    }

    async fn setup(signup: bool) -> (better_auth_core::Auth, Arc<CapturingSender>) {
        let sender = Arc::new(CapturingSender::default());
        let sender_for_plugin = sender.clone();
        let auth = test_auth(move |options| {
            let mut config = PhoneNumberConfig::new(sender_for_plugin);
            if signup {
                config.sign_up_on_verification = Some(SignUpOnVerification {
                    email_domain: "phone.local".to_string(),
                });
            }
            options
                .plugins
                .push(Arc::new(PhoneNumberPlugin::new(config)));
        })
        .await;
        (auth, sender)
    }

    async fn send(auth: &better_auth_core::Auth, sender: &CapturingSender) -> String {
        let response = auth
            .handle(Request::post(
                "/phone-number/send-otp",
                json!({ "phoneNumber": "+15551230000" }),
            ))
            .await;
        assert_eq!(response.status, 200);
        tokio::task::yield_now().await;
        sender.codes.lock().unwrap().last().unwrap().clone()
    }

    #[tokio::test]
    async fn test_verify_creates_user_with_synthetic_email() {
        let (auth, sender) = setup(true).await;
        let code = send(&auth, &sender).await;
        let response = auth
            .handle(Request::post(
                "/phone-number/verify",
                json!({ "phoneNumber": "+15551230000", "code": code }),
            ))
            .await;
        assert_eq!(response.status, 200);
        let body = response.body.unwrap();
        assert_eq!(body["user"]["email"], "+15551230000@phone.local");
        assert_eq!(body["user"]["phoneNumberVerified"], true);
    }

    #[tokio::test]
    async fn test_attempt_ceiling() {
        let (auth, sender) = setup(false).await;
        let code = send(&auth, &sender).await;
        let wrong = json!({ "phoneNumber": "+15551230000", "code": "000000" });

        // Every wrong guess up to the ceiling is a plain mismatch.
        for _ in 0..3 {
            let response = auth
                .handle(Request::post("/phone-number/verify", wrong.clone()))
                .await;
            assert_eq!(response.body.unwrap()["code"], "INVALID_OTP");
        }

        // The fourth attempt is refused outright, correct code or not.
        let response = auth
            .handle(Request::post(
                "/phone-number/verify",
                json!({ "phoneNumber": "+15551230000", "code": code }),
            ))
            .await;
        assert_eq!(response.status, 403);
        assert_eq!(response.body.unwrap()["code"], "TOO_MANY_ATTEMPTS");

        // A fresh send resets the counter.
        let code = send(&auth, &sender).await;
        let response = auth
            .handle(Request::post(
                "/phone-number/verify",
                json!({ "phoneNumber": "+15551230000", "code": code }),
            ))
            .await;
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_unknown_phone_and_bad_shape() {
        let (auth, _sender) = setup(false).await;
        let response = auth
            .handle(Request::post(
                "/phone-number/verify",
                json!({ "phoneNumber": "+15550000000", "code": "123456" }),
            ))
            .await;
        assert_eq!(response.body.unwrap()["code"], "OTP_NOT_FOUND");

        let response = auth
            .handle(Request::post(
                "/phone-number/send-otp",
                json!({ "phoneNumber": "not-a-phone" }),
            ))
            .await;
        assert_eq!(response.body.unwrap()["code"], "INVALID_PHONE_NUMBER");
    }

    #[tokio::test]
    async fn test_value_parsing() {
        assert_eq!(parse_value("123456:2"), Some(("123456".to_string(), 2)));
        assert_eq!(parse_value("nocolon"), None);
    }
}
