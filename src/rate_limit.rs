//! Fixed-window rate limiting over minute, hour and day windows.
//!
//! Every request spends one unit in all three windows before any verdict is
//! computed, so a rejected request still counts against the caller. Bucket
//! keys embed the wall clock truncated to the window, making the counters
//! self-partitioning; the counter store's TTL reclaims old buckets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::{FailurePolicy, RateLimitTiers};
use crate::error::RateLimitError;
use crate::store::CounterStore;

/// One rate window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    /// All windows in evaluation order, tightest first.
    pub const ALL: [Window; 3] = [Window::Minute, Window::Hour, Window::Day];

    /// Window length in seconds.
    #[must_use]
    pub const fn seconds(self) -> u64 {
        match self {
            Window::Minute => 60,
            Window::Hour => 3600,
            Window::Day => 86_400,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Extra lifetime on counter rows beyond the window itself, so a bucket
/// still readable at the window edge is never reclaimed mid-read.
const BUCKET_GRACE: Duration = Duration::from_secs(60);

fn bucket_key(identifier: &str, resource: &str, window: Window, now: DateTime<Utc>) -> String {
    let bucket = now.timestamp().div_euclid(window.seconds() as i64);
    format!("rl:{identifier}:{resource}:{}:{bucket}", window.label())
}

/// Multi-window rate limiter over a [`CounterStore`].
pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
    outage: FailurePolicy,
}

impl RateLimiter {
    #[must_use]
    pub fn new(counters: Arc<dyn CounterStore>, outage: FailurePolicy) -> Self {
        Self { counters, outage }
    }

    /// Spends one unit in every window, then reports the first exceeded
    /// window (minute before hour before day).
    ///
    /// # Errors
    ///
    /// `WindowExceeded` with `retry_after_seconds` equal to the window
    /// length. An unreachable counter store allows the request under the
    /// default fail-open policy.
    pub async fn check_and_consume_at(
        &self,
        identifier: &str,
        resource: &str,
        tiers: &RateLimitTiers,
        now: DateTime<Utc>,
    ) -> Result<(), RateLimitError> {
        let mut verdict = Ok(());
        for window in Window::ALL {
            let key = bucket_key(identifier, resource, window, now);
            let ttl = Duration::from_secs(window.seconds()) + BUCKET_GRACE;
            let count = match self.counters.increment(&key, ttl).await {
                Ok(count) => count,
                Err(err) => {
                    match self.outage {
                        FailurePolicy::FailOpen => {
                            warn!(window = %window, "rate counter unreachable, failing open: {err}");
                            continue;
                        }
                        FailurePolicy::FailClosed => {
                            warn!(window = %window, "rate counter unreachable, failing closed: {err}");
                            if verdict.is_ok() {
                                verdict = Err(RateLimitError::WindowExceeded {
                                    window,
                                    retry_after_seconds: window.seconds(),
                                });
                            }
                            continue;
                        }
                    }
                }
            };
            // Keep incrementing the remaining windows even after a verdict:
            // spend-then-check, never rolled back.
            if verdict.is_ok() && count > tiers.limit_for(window) {
                verdict = Err(RateLimitError::WindowExceeded {
                    window,
                    retry_after_seconds: window.seconds(),
                });
            }
        }
        verdict
    }

    pub async fn check_and_consume(
        &self,
        identifier: &str,
        resource: &str,
        tiers: &RateLimitTiers,
    ) -> Result<(), RateLimitError> {
        self.check_and_consume_at(identifier, resource, tiers, Utc::now())
            .await
    }

    /// Current count in one window's bucket, for introspection endpoints.
    ///
    /// # Errors
    ///
    /// Propagates the store failure.
    pub async fn current_count_at(
        &self,
        identifier: &str,
        resource: &str,
        window: Window,
        now: DateTime<Utc>,
    ) -> Result<i64, crate::error::StoreError> {
        let key = bucket_key(identifier, resource, window, now);
        Ok(self.counters.get(&key).await?.unwrap_or(0))
    }
}
