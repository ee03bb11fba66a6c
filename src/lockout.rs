//! Failed-login tracking and account lockout.
//!
//! Per principal the guard keeps a failed counter and an optional lock. Five
//! failures lock the account for thirty minutes; the lock expires lazily on
//! the next access check, so no background job exists. An unreadable store
//! denies access rather than granting an unbounded guessing window.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{FailurePolicy, LockoutPolicy};
use crate::error::AuthError;
use crate::store::AttemptStore;

/// Stored lockout state for one principal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginAttemptState {
    pub principal_id: Uuid,
    pub failed_count: i64,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LoginAttemptState {
    /// State for a principal with no recorded failures.
    #[must_use]
    pub fn fresh(principal_id: Uuid) -> Self {
        Self {
            principal_id,
            failed_count: 0,
            locked_until: None,
        }
    }
}

/// Lockout state machine over an [`AttemptStore`].
pub struct LoginGuard {
    attempts: Arc<dyn AttemptStore>,
    policy: LockoutPolicy,
    outage: FailurePolicy,
}

impl LoginGuard {
    #[must_use]
    pub fn new(
        attempts: Arc<dyn AttemptStore>,
        policy: LockoutPolicy,
        outage: FailurePolicy,
    ) -> Self {
        Self {
            attempts,
            policy,
            outage,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Whether the principal may attempt a login right now.
    ///
    /// An expired lock is cleared on this read and the counter restarts
    /// at zero.
    ///
    /// # Errors
    ///
    /// `AccountLocked` with the remaining wait while a lock holds. A store
    /// outage denies with `InvalidCredentials` under the default fail-closed
    /// policy so the caller cannot distinguish it from a bad password.
    pub async fn check_access_at(
        &self,
        principal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let state = match self.attempts.get(principal_id).await {
            Ok(state) => state,
            Err(err) => return self.on_outage("lockout lookup", err),
        };
        let Some(state) = state else {
            return Ok(());
        };
        match state.locked_until {
            Some(until) if now < until => {
                let retry_after_seconds = (until - now).num_seconds().unsigned_abs();
                Err(AuthError::AccountLocked {
                    retry_after_seconds,
                })
            }
            Some(_) => {
                // Lock has run out; clear it so the next failure starts a
                // fresh count.
                if let Err(err) = self.attempts.reset(principal_id).await {
                    return self.on_outage("lockout reset", err);
                }
                info!(principal_id = %principal_id, "lockout expired, counter reset");
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub async fn check_access(&self, principal_id: Uuid) -> Result<(), AuthError> {
        self.check_access_at(principal_id, Utc::now()).await
    }

    /// Records one failed attempt; locks the account when the threshold is
    /// reached. Returns the state after the increment.
    ///
    /// The lock write is conditional on no lock being present, so two racing
    /// threshold-crossers produce exactly one lock window.
    ///
    /// # Errors
    ///
    /// Store outage maps to `InvalidCredentials` under fail-closed.
    pub async fn record_failure_at(
        &self,
        principal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LoginAttemptState, AuthError> {
        let state = match self.attempts.record_failure(principal_id).await {
            Ok(state) => state,
            Err(err) => return self.on_outage("failure record", err),
        };
        if state.failed_count >= self.policy.threshold() && state.locked_until.is_none() {
            let until = now + Duration::seconds(self.policy.lock_seconds());
            if let Err(err) = self.attempts.lock(principal_id, until).await {
                return self.on_outage("lock write", err);
            }
            // The lock write is conditional; re-read so a writer that lost
            // the race reports the winner's deadline, not its own.
            let effective = match self.attempts.get(principal_id).await {
                Ok(stored) => stored.and_then(|stored| stored.locked_until).unwrap_or(until),
                Err(err) => return self.on_outage("lockout lookup", err),
            };
            warn!(
                principal_id = %principal_id,
                failed_count = state.failed_count,
                locked_until = %effective,
                "account locked after repeated failures"
            );
            return Ok(LoginAttemptState {
                locked_until: Some(effective),
                ..state
            });
        }
        Ok(state)
    }

    pub async fn record_failure(
        &self,
        principal_id: Uuid,
    ) -> Result<LoginAttemptState, AuthError> {
        self.record_failure_at(principal_id, Utc::now()).await
    }

    /// Clears the failure counter after a successful login.
    ///
    /// A success while locked does not unlock: only the timer ends a lock.
    ///
    /// # Errors
    ///
    /// Store outage maps to `InvalidCredentials` under fail-closed.
    pub async fn record_success_at(
        &self,
        principal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let state = match self.attempts.get(principal_id).await {
            Ok(state) => state,
            Err(err) => return self.on_outage("lockout lookup", err),
        };
        let locked = state
            .and_then(|state| state.locked_until)
            .is_some_and(|until| now < until);
        if locked {
            return Ok(());
        }
        if let Err(err) = self.attempts.reset(principal_id).await {
            return self.on_outage("counter reset", err);
        }
        Ok(())
    }

    pub async fn record_success(&self, principal_id: Uuid) -> Result<(), AuthError> {
        self.record_success_at(principal_id, Utc::now()).await
    }

    fn on_outage<T>(&self, operation: &str, err: crate::error::StoreError) -> Result<T, AuthError> {
        match self.outage {
            FailurePolicy::FailClosed => {
                warn!("{operation} failed, failing closed: {err}");
                Err(AuthError::InvalidCredentials)
            }
            FailurePolicy::FailOpen => {
                // Fail-open has no state to return; deny anyway. The guard
                // is constructed fail-closed in practice.
                warn!("{operation} failed under fail-open policy, denying: {err}");
                Err(AuthError::InvalidCredentials)
            }
        }
    }
}
