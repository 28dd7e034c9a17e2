//! The core HTTP surface: credential sign-up/sign-in, session routes,
//! email verification, password management, user management, and social
//! sign-in.
//!
//! Handlers are unit structs; everything they need arrives through the
//! request-scoped [`crate::context::EndpointContext`].

mod password;
mod session_routes;
mod sign_in;
mod sign_up;
mod social;
mod user;
mod verify_email;

pub use sign_up::SignUpEmailBody;

use crate::options::AuthOptions;
use crate::router::Endpoint;

/// The endpoints the core contributes, shaped by the options (credential
/// endpoints only exist when email+password is enabled, etc.).
pub fn core_endpoints(options: &AuthOptions) -> Vec<Endpoint> {
    let mut endpoints = vec![
        Endpoint::get("/session", session_routes::GetSession)
            .require_headers()
            .client_exposed()
            .summary("Resolve the current session"),
        Endpoint::post("/sign-out", session_routes::SignOut)
            .require_headers()
            .client_exposed()
            .summary("Revoke the current session"),
        Endpoint::post("/update-user", user::UpdateUser)
            .require_session()
            .client_exposed()
            .summary("Update profile fields"),
    ];

    if options.email_and_password.enabled {
        endpoints.extend([
            Endpoint::post("/sign-up/email", sign_up::SignUpEmail)
                .client_exposed()
                .summary("Create a user with email and password"),
            Endpoint::post("/sign-in/email", sign_in::SignInEmail)
                .client_exposed()
                .summary("Sign in with email and password"),
            Endpoint::post("/forget-password", password::ForgetPassword)
                .client_exposed()
                .summary("Issue a password-reset token"),
            Endpoint::post("/reset-password", password::ResetPassword)
                .client_exposed()
                .summary("Reset the password with a token"),
            Endpoint::post("/change-password", password::ChangePassword)
                .require_session()
                .client_exposed()
                .summary("Change the password"),
            Endpoint::post("/set-password", password::SetPassword)
                .require_session()
                .summary("Set a password on a passwordless account"),
            Endpoint::post("/send-verification-email", verify_email::SendVerificationEmail)
                .client_exposed()
                .summary("Send an email-verification token"),
            Endpoint::get("/verify-email", verify_email::VerifyEmail)
                .client_exposed()
                .summary("Verify an email-verification token"),
        ]);
    }

    if options.user.change_email_enabled {
        endpoints.push(
            Endpoint::post("/change-email", user::ChangeEmail)
                .require_session()
                .client_exposed()
                .summary("Change the account email"),
        );
    }

    if options.user.delete_user_enabled {
        endpoints.push(
            Endpoint::post("/delete-user", user::DeleteUser)
                .require_session()
                .client_exposed()
                .summary("Delete the user and everything it owns"),
        );
    }

    if !options.social_providers.is_empty() {
        endpoints.extend([
            Endpoint::post("/sign-in/social", social::SignInSocial)
                .client_exposed()
                .summary("Start a social sign-in"),
            Endpoint::post("/link-social", social::LinkSocial)
                .require_session()
                .client_exposed()
                .summary("Link a provider to the signed-in user"),
            Endpoint::get("/callback/:provider", social::Callback)
                .require_headers()
                .summary("OAuth callback"),
        ]);
    }

    endpoints
}

/// Minimal structural email validation; full verification is what the
/// verification email is for.
pub(crate) fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("ada@x.io"));
        assert!(is_valid_email("a.b+c@sub.domain.org"));
        assert!(!is_valid_email("ada"));
        assert!(!is_valid_email("ada@"));
        assert!(!is_valid_email("@x.io"));
        assert!(!is_valid_email("ada@nodot"));
        assert!(!is_valid_email("ada@.io"));
    }

    #[test]
    fn test_credential_endpoints_gated() {
        let options = AuthOptions::default();
        let paths: Vec<String> = core_endpoints(&options)
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert!(!paths.contains(&"/sign-up/email".to_string()));

        let mut options = AuthOptions::default();
        options.email_and_password.enabled = true;
        let paths: Vec<String> = core_endpoints(&options)
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert!(paths.contains(&"/sign-up/email".to_string()));
        assert!(paths.contains(&"/sign-in/email".to_string()));
    }
}
