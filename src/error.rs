//! Typed rejection and failure kinds for every component boundary.
//!
//! Each component returns its own error enum; the surrounding API layer maps
//! them to status codes. Store-connectivity failures are represented by
//! [`StoreError`] and handled per each component's fail-open/fail-closed
//! policy rather than surfaced to callers directly.

use serde::Serialize;
use thiserror::Error;

use crate::rate_limit::Window;
use crate::threat::{AlertStatus, ThreatCategory};

/// Failures of the backing stores (relational or counter).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("store call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt store record: {0}")]
    Corrupt(String),
}

/// Token verification and revocation failures, ordered cheapest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token expired")]
    Expired,
    #[error("wrong token type")]
    WrongType,
    #[error("token revoked")]
    Revoked,
}

/// Refresh-session lookup failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Authentication failures returned to login callers.
///
/// Wrong password and unknown account are deliberately indistinguishable:
/// both map to `InvalidCredentials`. Lockout rejections carry a retry hint
/// because that is operationally necessary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account locked, retry in {retry_after_seconds}s")]
    AccountLocked { retry_after_seconds: u64 },
    #[error("account not verified")]
    AccountNotVerified,
    #[error("account suspended")]
    AccountSuspended,
}

/// Rate-limit rejections, one per exceeded window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("{window} window exceeded, retry in {retry_after_seconds}s")]
    WindowExceeded {
        window: Window,
        retry_after_seconds: u64,
    },
}

/// Threat-detection rejections produced before any other processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ThreatError {
    #[error("request matched {0} pattern")]
    PatternMatched(ThreatCategory),
    #[error("request volume exceeded")]
    VolumeExceeded,
    #[error("source is blocked")]
    SourceBlocked,
}

/// Alert lifecycle failures.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert not found")]
    NotFound,
    #[error("invalid transition from {from}")]
    InvalidTransition { from: AlertStatus },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Aggregate rejection type returned by the composition root.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    Threat(#[from] ThreatError),
    #[error(transparent)]
    Alert(#[from] AlertError),
}

/// Wire contract for rate-limit rejections.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimitRejection {
    pub limited: bool,
    pub window: Window,
    pub retry_after_seconds: u64,
}

impl From<&RateLimitError> for RateLimitRejection {
    fn from(err: &RateLimitError) -> Self {
        let RateLimitError::WindowExceeded {
            window,
            retry_after_seconds,
        } = *err;
        Self {
            limited: true,
            window,
            retry_after_seconds,
        }
    }
}

/// Wire contract for lockout rejections.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LockoutRejection {
    pub locked: bool,
    pub retry_after_seconds: u64,
}

impl LockoutRejection {
    /// Builds the contract from an [`AuthError`], if it is a lockout.
    #[must_use]
    pub fn from_auth(err: &AuthError) -> Option<Self> {
        match err {
            AuthError::AccountLocked {
                retry_after_seconds,
            } => Some(Self {
                locked: true,
                retry_after_seconds: *retry_after_seconds,
            }),
            _ => None,
        }
    }
}
