//! Fixed-window rate limiting on the shared key-value store.
//!
//! Counters live in the cache rather than in process so every instance sees
//! the same count, and each hit is one atomic increment.

use std::sync::Arc;

use crate::config::RateLimitRule;
use crate::context::RequestContext;
use crate::services::error::ServiceError;
use crate::services::redis::KeyValueStore;

pub struct RateLimiter {
    cache: Arc<dyn KeyValueStore>,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn KeyValueStore>) -> Self {
        Self { cache }
    }

    /// Count one attempt for `subject` under `scope`. Fails with
    /// `RateLimited` once the window's budget is spent; the hint is the
    /// window's remaining lifetime.
    pub async fn check(
        &self,
        ctx: &RequestContext,
        scope: &str,
        subject: &str,
        rule: RateLimitRule,
    ) -> Result<(), ServiceError> {
        let key = format!("ratelimit:{}:{}", scope, subject);
        let counter = ctx
            .run(self.cache.incr_with_expiry(&key, rule.window_seconds))
            .await?;

        if counter.count > u64::from(rule.attempts) {
            tracing::warn!(
                scope = %scope,
                count = counter.count,
                retry_after = counter.ttl_seconds,
                correlation_id = %ctx.correlation_id,
                "Rate limit exceeded"
            );
            return Err(ServiceError::RateLimited {
                retry_after: counter.ttl_seconds.max(1),
            });
        }
        Ok(())
    }
}
