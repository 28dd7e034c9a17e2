//! Error types for Better Auth.
//!
//! Two layers of failure live here. [`AuthError`] covers internal faults:
//! storage, crypto, configuration. [`ApiError`] is what endpoints raise and
//! what the dispatcher serializes to the wire as `{ message, code, ... }`
//! with a stable machine-readable code and a mapped HTTP status.

use serde_json::Value;
use thiserror::Error;

/// Internal error type for engine operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A database operation failed.
    #[error("Database error: {message}")]
    Database { message: String },

    /// A unique constraint was violated.
    #[error("Duplicate entry: {model} with {field} already exists")]
    Duplicate { model: String, field: String },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A required configuration value is missing.
    #[error("Missing configuration: {key}")]
    MissingConfiguration { key: String },

    /// A cryptographic operation failed.
    #[error("Crypto error: {message}")]
    Crypto { message: String },

    /// Serialization/deserialization failed.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// An outbound HTTP request failed.
    #[error("HTTP error: {message}")]
    Http { message: String },

    /// An internal error occurred.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AuthError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn duplicate(model: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Duplicate {
            model: model.into(),
            field: field.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// A Result alias using [`AuthError`].
pub type AuthResult<T> = Result<T, AuthError>;

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http {
            message: err.to_string(),
        }
    }
}

/// The failure kinds an endpoint can surface, each mapped to one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    UnprocessableEntity,
    TooManyRequests,
    InternalServerError,
}

impl ErrorKind {
    /// The HTTP status this kind serializes with.
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::UnprocessableEntity => 422,
            Self::TooManyRequests => 429,
            Self::InternalServerError => 500,
        }
    }
}

/// The error an endpoint raises: a kind, a stable code, and a human message.
///
/// The dispatcher serializes this as `{ "message": .., "code": .., ...extra }`
/// with [`ErrorKind::status`] as the HTTP status. Extra fields (e.g.
/// `Retry-After` context) ride along in `extra`.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub extra: Option<Value>,
    /// Headers to attach to the error response (e.g. `Retry-After`).
    pub headers: Vec<(String, String)>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            extra: None,
            headers: Vec::new(),
        }
    }

    /// Builds an error from a `(code, message)` registry pair.
    pub fn from_code(kind: ErrorKind, pair: (&str, &str)) -> Self {
        Self::new(kind, pair.0, pair.1)
    }

    pub fn bad_request(pair: (&str, &str)) -> Self {
        Self::from_code(ErrorKind::BadRequest, pair)
    }

    pub fn unauthorized(pair: (&str, &str)) -> Self {
        Self::from_code(ErrorKind::Unauthorized, pair)
    }

    pub fn forbidden(pair: (&str, &str)) -> Self {
        Self::from_code(ErrorKind::Forbidden, pair)
    }

    pub fn not_found(pair: (&str, &str)) -> Self {
        Self::from_code(ErrorKind::NotFound, pair)
    }

    pub fn unprocessable(pair: (&str, &str)) -> Self {
        Self::from_code(ErrorKind::UnprocessableEntity, pair)
    }

    pub fn too_many_requests(pair: (&str, &str)) -> Self {
        Self::from_code(ErrorKind::TooManyRequests, pair)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::InternalServerError,
            codes::INTERNAL_SERVER_ERROR.0,
            message,
        )
    }

    /// Attaches extra JSON context merged into the serialized body.
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Attaches a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Serializes the wire body `{ message, code, ...extra }`.
    pub fn body(&self) -> Value {
        let mut body = serde_json::json!({
            "message": self.message,
            "code": self.code,
        });
        if let Some(Value::Object(extra)) = &self.extra {
            if let Value::Object(map) = &mut body {
                for (k, v) in extra {
                    map.insert(k.clone(), v.clone());
                }
            }
        }
        body
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        // Internal failures surface as sanitized 500s; the original error is
        // logged at the dispatch layer.
        tracing::error!(error = %err, "internal error");
        Self::internal("An internal error occurred")
    }
}

/// A Result alias using [`ApiError`].
pub type ApiResult<T> = Result<T, ApiError>;

/// Stable `(code, message)` pairs raised by the core endpoints.
///
/// Plugins contribute their own codes through [`crate::plugin::AuthPlugin::error_codes`];
/// everything is merged into one registry at init.
pub mod codes {
    pub type ErrorCode = (&'static str, &'static str);

    pub const USER_NOT_FOUND: ErrorCode = ("USER_NOT_FOUND", "User not found");
    pub const FAILED_TO_CREATE_USER: ErrorCode = ("FAILED_TO_CREATE_USER", "Failed to create user");
    pub const USER_ALREADY_EXISTS: ErrorCode = (
        "USER_ALREADY_EXISTS_USE_ANOTHER_EMAIL",
        "User already exists. Use another email.",
    );
    pub const INVALID_EMAIL: ErrorCode = ("INVALID_EMAIL", "Invalid email");
    pub const INVALID_EMAIL_OR_PASSWORD: ErrorCode =
        ("INVALID_EMAIL_OR_PASSWORD", "Invalid email or password");
    pub const INVALID_PASSWORD: ErrorCode = ("INVALID_PASSWORD", "Invalid password");
    pub const PASSWORD_TOO_SHORT: ErrorCode = ("PASSWORD_TOO_SHORT", "Password too short");
    pub const PASSWORD_TOO_LONG: ErrorCode = ("PASSWORD_TOO_LONG", "Password too long");
    pub const EMAIL_NOT_VERIFIED: ErrorCode = ("EMAIL_NOT_VERIFIED", "Email not verified");
    pub const EMAIL_CAN_NOT_BE_UPDATED: ErrorCode =
        ("EMAIL_CAN_NOT_BE_UPDATED", "Email can not be updated");
    pub const CREDENTIAL_ACCOUNT_NOT_FOUND: ErrorCode =
        ("CREDENTIAL_ACCOUNT_NOT_FOUND", "Credential account not found");
    pub const CREDENTIAL_ACCOUNT_ALREADY_EXISTS: ErrorCode = (
        "CREDENTIAL_ACCOUNT_ALREADY_EXISTS",
        "A password is already set for this account",
    );
    pub const SESSION_EXPIRED: ErrorCode = (
        "SESSION_EXPIRED",
        "Session expired. Re-authenticate to perform this action.",
    );
    pub const UNAUTHORIZED: ErrorCode = ("UNAUTHORIZED", "Unauthorized");
    pub const INVALID_TOKEN: ErrorCode = ("INVALID_TOKEN", "Invalid token");
    pub const TOKEN_EXPIRED: ErrorCode = ("TOKEN_EXPIRED", "Token expired");
    pub const PROVIDER_NOT_FOUND: ErrorCode = ("PROVIDER_NOT_FOUND", "Provider not found");
    pub const INVALID_STATE: ErrorCode = ("INVALID_STATE", "Invalid state");
    pub const ACCOUNT_ALREADY_LINKED: ErrorCode = (
        "ACCOUNT_ALREADY_LINKED_TO_DIFFERENT_USER",
        "Account is already linked to a different user",
    );
    pub const EMAIL_DOESNT_MATCH: ErrorCode = (
        "EMAIL_DOESNT_MATCH",
        "The email of the account does not match the email of the user",
    );
    pub const SIGNUP_DISABLED: ErrorCode = ("SIGNUP_DISABLED", "Sign up is disabled");
    pub const FAILED_TO_GET_USER_INFO: ErrorCode = (
        "FAILED_TO_GET_USER_INFO",
        "Failed to get user info from the provider",
    );
    pub const INVALID_ORIGIN: ErrorCode = ("INVALID_ORIGIN", "Invalid origin");
    pub const TOO_MANY_REQUESTS: ErrorCode = ("TOO_MANY_REQUESTS", "Too many requests");
    pub const INVALID_BODY: ErrorCode = ("INVALID_BODY", "Invalid request body");
    pub const INTERNAL_SERVER_ERROR: ErrorCode =
        ("INTERNAL_SERVER_ERROR", "An internal error occurred");

    /// All core codes, in registry form.
    pub const ALL: &[ErrorCode] = &[
        USER_NOT_FOUND,
        FAILED_TO_CREATE_USER,
        USER_ALREADY_EXISTS,
        INVALID_EMAIL,
        INVALID_EMAIL_OR_PASSWORD,
        INVALID_PASSWORD,
        PASSWORD_TOO_SHORT,
        PASSWORD_TOO_LONG,
        EMAIL_NOT_VERIFIED,
        EMAIL_CAN_NOT_BE_UPDATED,
        CREDENTIAL_ACCOUNT_NOT_FOUND,
        CREDENTIAL_ACCOUNT_ALREADY_EXISTS,
        SESSION_EXPIRED,
        UNAUTHORIZED,
        INVALID_TOKEN,
        TOKEN_EXPIRED,
        PROVIDER_NOT_FOUND,
        INVALID_STATE,
        ACCOUNT_ALREADY_LINKED,
        EMAIL_DOESNT_MATCH,
        SIGNUP_DISABLED,
        FAILED_TO_GET_USER_INFO,
        INVALID_ORIGIN,
        TOO_MANY_REQUESTS,
        INVALID_BODY,
        INTERNAL_SERVER_ERROR,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_status_mapping() {
        assert_eq!(ErrorKind::BadRequest.status(), 400);
        assert_eq!(ErrorKind::Unauthorized.status(), 401);
        assert_eq!(ErrorKind::UnprocessableEntity.status(), 422);
        assert_eq!(ErrorKind::TooManyRequests.status(), 429);
    }

    #[test]
    fn test_api_error_body_shape() {
        let err = ApiError::unauthorized(codes::INVALID_EMAIL_OR_PASSWORD)
            .with_extra(serde_json::json!({ "attempt": 2 }));
        let body = err.body();
        assert_eq!(body["code"], "INVALID_EMAIL_OR_PASSWORD");
        assert_eq!(body["message"], "Invalid email or password");
        assert_eq!(body["attempt"], 2);
    }

    #[test]
    fn test_internal_error_is_sanitized() {
        let api: ApiError = AuthError::database("connection refused").into();
        assert_eq!(api.kind, ErrorKind::InternalServerError);
        assert_eq!(api.body()["message"], "An internal error occurred");
    }
}
