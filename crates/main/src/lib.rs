//! # Better Auth
//!
//! A comprehensive, framework-agnostic authentication library for Rust:
//! email/password and social sign-in, sessions with cookie caching,
//! two-factor authentication, magic links, phone OTPs, and a full
//! OAuth 2.0 / OIDC authorization server, composed from plugins over a
//! narrow database contract.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use better_auth::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> AuthResult<()> {
//!     let mut options = AuthOptions::new()
//!         .database(Arc::new(MemoryAdapter::new()))
//!         .secret("your-32-byte-minimum-signing-secret")
//!         .base_url("http://localhost:3000");
//!     options.email_and_password.enabled = true;
//!
//!     let auth = Auth::new(options).await?;
//!     // Hand `auth.handle(request)` to your HTTP framework of choice.
//!     Ok(())
//! }
//! ```

pub use better_auth_core::*;

pub use better_auth_adapter_memory as memory_adapter;
pub use better_auth_plugin_bearer as bearer;
pub use better_auth_plugin_jwt as jwt_plugin;
pub use better_auth_plugin_magic_link as magic_link;
pub use better_auth_plugin_oidc as oidc;
pub use better_auth_plugin_phone_number as phone_number;
pub use better_auth_plugin_two_factor as two_factor;

/// Convenient imports for applications.
pub mod prelude {
    pub use better_auth_adapter_memory::MemoryAdapter;
    pub use better_auth_core::error::{ApiError, ApiResult, AuthError, AuthResult};
    pub use better_auth_core::options::AuthOptions;
    pub use better_auth_core::plugin::AuthPlugin;
    pub use better_auth_core::router::{Method, Request, Response};
    pub use better_auth_core::types::{Account, Session, SessionWithUser, User};
    pub use better_auth_core::Auth;
}
