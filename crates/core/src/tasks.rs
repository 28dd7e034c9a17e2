//! Fire-and-forget execution for side effects that must not fail the
//! surrounding request (email, SMS, webhooks).

use crate::error::AuthResult;
use std::future::Future;

/// Runs `fut` either awaited inline or detached on the runtime.
///
/// Detached failures are logged and swallowed; awaited failures are logged
/// and swallowed too. Callers that need the error should not come through
/// here.
pub async fn run_in_background_or_await<F>(background: bool, label: &'static str, fut: F)
where
    F: Future<Output = AuthResult<()>> + Send + 'static,
{
    if background {
        tokio::spawn(async move {
            if let Err(err) = fut.await {
                tracing::error!(task = label, error = %err, "background task failed");
            }
        });
    } else if let Err(err) = fut.await {
        tracing::error!(task = label, error = %err, "side-effect task failed");
    }
}
