//! # Better Auth Core
//!
//! The framework-agnostic authentication engine: request dispatcher,
//! cookie/signing subsystem, sessions, credentials, OAuth client, the
//! generic database contract, schema descriptor, rate limiter, and the
//! plugin system everything else composes through.
//!
//! The single entry point is [`auth::Auth::new`], which takes an
//! [`options::AuthOptions`] record and returns a request handler
//! ([`auth::Auth::handle`]), a typed server API ([`auth::Auth::api`]),
//! and a schema descriptor ([`auth::Auth::schema`]).

pub mod api;
pub mod auth;
pub mod context;
pub mod cookies;
pub mod crypto;
pub mod db;
pub mod email;
pub mod error;
pub mod jwt;
pub mod oauth;
pub mod options;
pub mod plugin;
pub mod rate_limit;
pub mod router;
pub mod schema;
pub mod session;
pub mod storage;
pub mod tasks;
pub mod types;

pub use auth::{Auth, ServerApi};
pub use context::{AuthContext, EndpointContext};
pub use error::{codes, ApiError, ApiResult, AuthError, AuthResult, ErrorKind};
pub use options::AuthOptions;
pub use plugin::{AfterHook, AuthPlugin, BeforeHook};
pub use router::{Endpoint, Method, PathMatcher, Request, Response};
pub use types::{Account, Session, SessionWithUser, User, Verification};
