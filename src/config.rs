//! Typed per-component configuration.
//!
//! Every component receives an explicit configuration struct at construction;
//! nothing reads ad hoc maps or process-wide state. Defaults follow the
//! documented policy values and can be overridden with the `with_*` builders.

use std::time::Duration;

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_REMEMBER_ME_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

const DEFAULT_LOCKOUT_THRESHOLD: i64 = 5;
const DEFAULT_LOCK_SECONDS: i64 = 30 * 60;

const DEFAULT_VOLUME_THRESHOLD: i64 = 200;
const DEFAULT_VOLUME_WINDOW_SECONDS: u64 = 60;
const DEFAULT_SCORE_THRESHOLD: i64 = 10;
const DEFAULT_SCORE_WINDOW_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_BLOCK_SECONDS: u64 = 60 * 60;

/// Default bound on any single external store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(200);

/// Token issuance lifetimes.
#[derive(Clone, Debug)]
pub struct TokenConfig {
    issuer: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    remember_me_ttl_seconds: i64,
}

impl TokenConfig {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            remember_me_ttl_seconds: DEFAULT_REMEMBER_ME_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_me_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_me_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn remember_me_ttl_seconds(&self) -> i64 {
        self.remember_me_ttl_seconds
    }

    /// Refresh lifetime for a login, honoring the remember-me choice.
    #[must_use]
    pub fn refresh_ttl_for(&self, remember_me: bool) -> i64 {
        if remember_me {
            self.remember_me_ttl_seconds
        } else {
            self.refresh_ttl_seconds
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::new("warden")
    }
}

/// Failed-attempt threshold and lock duration for the login guard.
#[derive(Clone, Copy, Debug)]
pub struct LockoutPolicy {
    threshold: i64,
    lock_seconds: i64,
}

impl LockoutPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_LOCKOUT_THRESHOLD,
            lock_seconds: DEFAULT_LOCK_SECONDS,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: i64) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_lock_seconds(mut self, seconds: i64) -> Self {
        self.lock_seconds = seconds;
        self
    }

    #[must_use]
    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    #[must_use]
    pub fn lock_seconds(&self) -> i64 {
        self.lock_seconds
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-window ceilings supplied by the caller.
///
/// The limiter itself has no notion of tiers; callers pass the ceilings for
/// the principal's tier so one limiter serves every tier without branching
/// on identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitTiers {
    per_minute: i64,
    per_hour: i64,
    per_day: i64,
}

impl RateLimitTiers {
    #[must_use]
    pub fn new(per_minute: i64, per_hour: i64, per_day: i64) -> Self {
        Self {
            per_minute,
            per_hour,
            per_day,
        }
    }

    #[must_use]
    pub fn per_minute(&self) -> i64 {
        self.per_minute
    }

    #[must_use]
    pub fn per_hour(&self) -> i64 {
        self.per_hour
    }

    #[must_use]
    pub fn per_day(&self) -> i64 {
        self.per_day
    }

    /// Ceiling for one window.
    #[must_use]
    pub fn limit_for(&self, window: crate::rate_limit::Window) -> i64 {
        match window {
            crate::rate_limit::Window::Minute => self.per_minute,
            crate::rate_limit::Window::Hour => self.per_hour,
            crate::rate_limit::Window::Day => self.per_day,
        }
    }
}

/// Detection thresholds and block lifetime for the threat monitor.
#[derive(Clone, Copy, Debug)]
pub struct ThreatConfig {
    volume_threshold: i64,
    volume_window: Duration,
    score_threshold: i64,
    score_window: Duration,
    block_duration: Duration,
}

impl ThreatConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            volume_threshold: DEFAULT_VOLUME_THRESHOLD,
            volume_window: Duration::from_secs(DEFAULT_VOLUME_WINDOW_SECONDS),
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            score_window: Duration::from_secs(DEFAULT_SCORE_WINDOW_SECONDS),
            block_duration: Duration::from_secs(DEFAULT_BLOCK_SECONDS),
        }
    }

    #[must_use]
    pub fn with_volume_threshold(mut self, threshold: i64) -> Self {
        self.volume_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_score_threshold(mut self, threshold: i64) -> Self {
        self.score_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_block_duration(mut self, duration: Duration) -> Self {
        self.block_duration = duration;
        self
    }

    #[must_use]
    pub fn volume_threshold(&self) -> i64 {
        self.volume_threshold
    }

    #[must_use]
    pub fn volume_window(&self) -> Duration {
        self.volume_window
    }

    #[must_use]
    pub fn score_threshold(&self) -> i64 {
        self.score_threshold
    }

    #[must_use]
    pub fn score_window(&self) -> Duration {
        self.score_window
    }

    #[must_use]
    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What a component does when its backing store is unreachable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Allow the request and log the degradation.
    FailOpen,
    /// Deny the request with a generic rejection.
    FailClosed,
}

/// Named outage policy per component.
///
/// The asymmetry is deliberate: unlimited password guessing is a worse
/// failure mode than refusing logins, while dropping legitimate traffic is
/// worse than briefly under-counting it. Accepting a possibly-revoked token
/// is likewise the worse failure mode for revocation lookups.
#[derive(Clone, Copy, Debug)]
pub struct OutagePolicy {
    rate_limiter: FailurePolicy,
    threat_monitor: FailurePolicy,
    login_guard: FailurePolicy,
    token_revocation: FailurePolicy,
}

impl OutagePolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rate_limiter: FailurePolicy::FailOpen,
            threat_monitor: FailurePolicy::FailOpen,
            login_guard: FailurePolicy::FailClosed,
            token_revocation: FailurePolicy::FailClosed,
        }
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, policy: FailurePolicy) -> Self {
        self.rate_limiter = policy;
        self
    }

    #[must_use]
    pub fn with_threat_monitor(mut self, policy: FailurePolicy) -> Self {
        self.threat_monitor = policy;
        self
    }

    #[must_use]
    pub fn with_login_guard(mut self, policy: FailurePolicy) -> Self {
        self.login_guard = policy;
        self
    }

    #[must_use]
    pub fn with_token_revocation(mut self, policy: FailurePolicy) -> Self {
        self.token_revocation = policy;
        self
    }

    #[must_use]
    pub fn rate_limiter(&self) -> FailurePolicy {
        self.rate_limiter
    }

    #[must_use]
    pub fn threat_monitor(&self) -> FailurePolicy {
        self.threat_monitor
    }

    #[must_use]
    pub fn login_guard(&self) -> FailurePolicy {
        self.login_guard
    }

    #[must_use]
    pub fn token_revocation(&self) -> FailurePolicy {
        self.token_revocation
    }
}

impl Default for OutagePolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_config_defaults_and_overrides() {
        let config = TokenConfig::new("warden");
        assert_eq!(config.access_ttl_seconds(), 30 * 60);
        assert_eq!(config.refresh_ttl_seconds(), 7 * 24 * 60 * 60);
        assert_eq!(config.remember_me_ttl_seconds(), 30 * 24 * 60 * 60);
        assert_eq!(config.refresh_ttl_for(false), 7 * 24 * 60 * 60);
        assert_eq!(config.refresh_ttl_for(true), 30 * 24 * 60 * 60);

        let config = config
            .with_access_ttl_seconds(60)
            .with_refresh_ttl_seconds(120)
            .with_remember_me_ttl_seconds(240);
        assert_eq!(config.access_ttl_seconds(), 60);
        assert_eq!(config.refresh_ttl_for(true), 240);
    }

    #[test]
    fn lockout_policy_defaults() {
        let policy = LockoutPolicy::new();
        assert_eq!(policy.threshold(), 5);
        assert_eq!(policy.lock_seconds(), 1800);
    }

    #[test]
    fn outage_policy_default_asymmetry() {
        let policy = OutagePolicy::new();
        assert_eq!(policy.rate_limiter(), FailurePolicy::FailOpen);
        assert_eq!(policy.threat_monitor(), FailurePolicy::FailOpen);
        assert_eq!(policy.login_guard(), FailurePolicy::FailClosed);
        assert_eq!(policy.token_revocation(), FailurePolicy::FailClosed);
    }
}
