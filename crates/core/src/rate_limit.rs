//! Fixed-window rate limiting.
//!
//! Keys are `ip:path`. Rules come from the options plus plugin
//! contributions, matched by path (first match wins, defaults last).
//! State lives in memory behind a mutex, in a dedicated database table,
//! or in secondary storage; a breach answers 429 with `Retry-After`.

use crate::db::{DatabaseAdapter, FindOneArgs, Where};
use crate::error::{codes, ApiError, ApiResult};
use crate::router::PathMatcher;
use crate::storage::SecondaryStorage;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Model name of the database-backed window table.
pub const RATE_LIMIT_MODEL: &str = "rateLimit";

/// A path-scoped window rule.
#[derive(Clone, Debug)]
pub struct RateLimitRule {
    pub matcher: PathMatcher,
    /// Window in seconds.
    pub window: i64,
    pub max: u32,
}

impl RateLimitRule {
    pub fn new(matcher: PathMatcher, window: i64, max: u32) -> Self {
        Self { matcher, window, max }
    }
}

/// Where window state is kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RateLimitStorageKind {
    #[default]
    Memory,
    Database,
    Secondary,
}

/// One key's window.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowState {
    count: u32,
    reset_at: DateTime<Utc>,
}

enum Decision {
    Allowed,
    Limited { retry_after: i64 },
}

/// Advances a window for one more request. Pure so each backend shares the
/// same semantics.
fn advance(state: Option<WindowState>, now: DateTime<Utc>, window: i64, max: u32) -> (WindowState, Decision) {
    match state {
        Some(state) if state.reset_at > now => {
            if state.count >= max {
                let retry_after = (state.reset_at - now).num_seconds().max(1);
                (state, Decision::Limited { retry_after })
            } else {
                (
                    WindowState {
                        count: state.count + 1,
                        reset_at: state.reset_at,
                    },
                    Decision::Allowed,
                )
            }
        }
        _ => (
            WindowState {
                count: 1,
                reset_at: now + Duration::seconds(window),
            },
            Decision::Allowed,
        ),
    }
}

/// The limiter composed at init.
pub struct RateLimiter {
    enabled: bool,
    default_window: i64,
    default_max: u32,
    rules: Vec<RateLimitRule>,
    storage: RateLimitStorageKind,
    memory: Mutex<HashMap<String, WindowState>>,
}

impl RateLimiter {
    pub fn new(
        enabled: bool,
        default_window: i64,
        default_max: u32,
        rules: Vec<RateLimitRule>,
        storage: RateLimitStorageKind,
    ) -> Self {
        Self {
            enabled,
            default_window,
            default_max,
            rules,
            storage,
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 10, 100, Vec::new(), RateLimitStorageKind::Memory)
    }

    /// The (window, max) in force for a path.
    fn rule_for(&self, path: &str) -> (i64, u32) {
        for rule in &self.rules {
            if rule.matcher.matches(path) {
                return (rule.window, rule.max);
            }
        }
        (self.default_window, self.default_max)
    }

    /// Checks and records one request. Raises `TOO_MANY_REQUESTS` with a
    /// `Retry-After` header on breach.
    pub async fn check(
        &self,
        adapter: &Arc<dyn DatabaseAdapter>,
        secondary: Option<&Arc<dyn SecondaryStorage>>,
        ip: &str,
        path: &str,
    ) -> ApiResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let (window, max) = self.rule_for(path);
        let key = format!("{ip}:{path}");
        let now = Utc::now();

        let decision = match self.storage {
            RateLimitStorageKind::Memory => {
                let mut map = self.memory.lock().expect("rate limit map poisoned");
                let (next, decision) = advance(map.get(&key).cloned(), now, window, max);
                map.insert(key, next);
                decision
            }
            RateLimitStorageKind::Secondary => {
                let Some(secondary) = secondary else {
                    tracing::warn!("secondary rate-limit storage configured without secondary storage; allowing");
                    return Ok(());
                };
                let storage_key = format!("rate-limit:{key}");
                let state = secondary
                    .get(&storage_key)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|raw| serde_json::from_str(&raw).ok());
                let (next, decision) = advance(state, now, window, max);
                let ttl = (next.reset_at - now).to_std().unwrap_or_default();
                if let Ok(raw) = serde_json::to_string(&next) {
                    let _ = secondary.set(&storage_key, &raw, Some(ttl)).await;
                }
                decision
            }
            RateLimitStorageKind::Database => {
                let found = adapter
                    .find_one(
                        RATE_LIMIT_MODEL,
                        FindOneArgs::by(vec![Where::eq("key", json!(key))]),
                    )
                    .await
                    .map_err(ApiError::from)?;
                let state = found
                    .as_ref()
                    .and_then(|record| {
                        Some(WindowState {
                            count: record.get("count")?.as_u64()? as u32,
                            reset_at: record
                                .get("resetAt")
                                .and_then(|v| v.as_str())
                                .and_then(|s| s.parse().ok())?,
                        })
                    });
                let (next, decision) = advance(state, now, window, max);
                let data = json!({
                    "key": key,
                    "count": next.count,
                    "resetAt": next.reset_at,
                });
                if found.is_some() {
                    adapter
                        .update(RATE_LIMIT_MODEL, &[Where::eq("key", json!(key))], data)
                        .await
                        .map_err(ApiError::from)?;
                } else {
                    adapter
                        .create(RATE_LIMIT_MODEL, data)
                        .await
                        .map_err(ApiError::from)?;
                }
                decision
            }
        };

        match decision {
            Decision::Allowed => Ok(()),
            Decision::Limited { retry_after } => {
                tracing::debug!(%ip, %path, retry_after, "rate limit breached");
                Err(ApiError::too_many_requests(codes::TOO_MANY_REQUESTS)
                    .with_header("retry-after", retry_after.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::StubAdapter;

    fn limiter(max: u32) -> RateLimiter {
        RateLimiter::new(true, 10, max, Vec::new(), RateLimitStorageKind::Memory)
    }

    #[tokio::test]
    async fn test_allows_up_to_max() {
        let limiter = limiter(3);
        let adapter: Arc<dyn DatabaseAdapter> = Arc::new(StubAdapter::new());
        for _ in 0..3 {
            limiter.check(&adapter, None, "1.2.3.4", "/x").await.unwrap();
        }
        let err = limiter.check(&adapter, None, "1.2.3.4", "/x").await.unwrap_err();
        assert_eq!(err.code, "TOO_MANY_REQUESTS");
        assert!(err.headers.iter().any(|(n, _)| n == "retry-after"));
    }

    #[tokio::test]
    async fn test_keys_are_per_ip_and_path() {
        let limiter = limiter(1);
        let adapter: Arc<dyn DatabaseAdapter> = Arc::new(StubAdapter::new());
        limiter.check(&adapter, None, "1.2.3.4", "/x").await.unwrap();
        limiter.check(&adapter, None, "1.2.3.5", "/x").await.unwrap();
        limiter.check(&adapter, None, "1.2.3.4", "/y").await.unwrap();
        assert!(limiter.check(&adapter, None, "1.2.3.4", "/x").await.is_err());
    }

    #[tokio::test]
    async fn test_window_resets() {
        let adapter: Arc<dyn DatabaseAdapter> = Arc::new(StubAdapter::new());
        let limiter = RateLimiter::new(true, 0, 1, Vec::new(), RateLimitStorageKind::Memory);
        limiter.check(&adapter, None, "ip", "/x").await.unwrap();
        // Zero-second window: the next request opens a fresh one.
        limiter.check(&adapter, None, "ip", "/x").await.unwrap();
    }

    #[tokio::test]
    async fn test_rule_selection() {
        let limiter = RateLimiter::new(
            true,
            10,
            100,
            vec![RateLimitRule::new(PathMatcher::Prefix("/sign-in".into()), 10, 1)],
            RateLimitStorageKind::Memory,
        );
        let adapter: Arc<dyn DatabaseAdapter> = Arc::new(StubAdapter::new());
        limiter.check(&adapter, None, "ip", "/sign-in/email").await.unwrap();
        assert!(limiter.check(&adapter, None, "ip", "/sign-in/email").await.is_err());
        // Default rule still generous elsewhere.
        limiter.check(&adapter, None, "ip", "/session").await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_never_limits() {
        let limiter = RateLimiter::disabled();
        let adapter: Arc<dyn DatabaseAdapter> = Arc::new(StubAdapter::new());
        for _ in 0..500 {
            limiter.check(&adapter, None, "ip", "/x").await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_database_storage_windows() {
        let adapter: Arc<dyn DatabaseAdapter> = Arc::new(StubAdapter::new());
        let limiter = RateLimiter::new(true, 10, 2, Vec::new(), RateLimitStorageKind::Database);
        limiter.check(&adapter, None, "ip", "/x").await.unwrap();
        limiter.check(&adapter, None, "ip", "/x").await.unwrap();
        assert!(limiter.check(&adapter, None, "ip", "/x").await.is_err());
    }
}
