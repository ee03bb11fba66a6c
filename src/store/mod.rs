//! Store contracts required by the core.
//!
//! The core does not own storage engine internals; it specifies two
//! contracts. A counter store with atomic increment-and-read and per-key
//! TTLs backs rate windows, threat scores and the revocation/block lists.
//! A relational store backs sessions, lockout state and alerts. Every
//! component receives its store(s) at construction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::error::StoreError;
use crate::lockout::LoginAttemptState;
use crate::session::Session;
use crate::threat::{AlertStatus, SecurityAlert};

pub mod memory;
pub mod postgres;

pub use memory::{
    MemoryAlertStore, MemoryAttemptStore, MemoryCounterStore, MemorySessionRepo,
    UnavailableCounterStore,
};
pub use postgres::{PgAlertStore, PgAttemptStore, PgCounterStore, PgSessionRepo};

/// Atomic counters with per-key expiry.
///
/// Keys are free-form strings; a key's lifetime is bounded by the TTL given
/// at creation so storage is self-cleaning. Flags are presence-only entries
/// used for the revocation and block lists.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increments `key` and returns the post-increment count.
    ///
    /// The TTL applies when the entry is created; later increments within
    /// the entry's lifetime do not extend it.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Current count for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Sets a presence flag that self-expires after `ttl` at the earliest.
    async fn set_flag(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Whether an unexpired flag exists for `key`.
    async fn flag_exists(&self, key: &str) -> Result<bool, StoreError>;
}

/// Durable record of refresh-token sessions.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<(), StoreError>;

    /// Finds a session by refresh-token hash, preferring the active one.
    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, StoreError>;

    /// Deactivates one session. Idempotent: a second call changes nothing.
    async fn deactivate(&self, id: Uuid, ended_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Deactivates every active session for a principal; returns the count.
    async fn deactivate_all(
        &self,
        principal_id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;
}

/// Per-principal failed-attempt state.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Single atomic increment-and-read of the failed counter.
    ///
    /// Two concurrent failures must observe distinct post-increment counts.
    async fn record_failure(&self, principal_id: Uuid) -> Result<LoginAttemptState, StoreError>;

    /// Sets `locked_until` only if no lock is currently set
    /// (single-writer-wins for the lock transition).
    async fn lock(&self, principal_id: Uuid, until: DateTime<Utc>) -> Result<(), StoreError>;

    async fn get(&self, principal_id: Uuid) -> Result<Option<LoginAttemptState>, StoreError>;

    /// Clears the counter and any lock.
    async fn reset(&self, principal_id: Uuid) -> Result<(), StoreError>;
}

/// Security alert persistence with compare-and-set status updates.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert(&self, alert: &SecurityAlert) -> Result<(), StoreError>;

    async fn fetch(&self, id: Uuid) -> Result<Option<SecurityAlert>, StoreError>;

    /// Replaces the stored alert only if its status still equals `expected`.
    /// Returns whether the update applied, so racing operators cannot
    /// double-transition an alert.
    async fn update_if_status(
        &self,
        alert: &SecurityAlert,
        expected: AlertStatus,
    ) -> Result<bool, StoreError>;
}
