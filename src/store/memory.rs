//! In-process store implementations.
//!
//! Suitable for single-instance deployments and tests. Expiry is evaluated
//! lazily on access, so no background sweeper is required.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::lockout::LoginAttemptState;
use crate::session::Session;
use crate::store::{AlertStore, AttemptStore, CounterStore, SessionRepo};
use crate::threat::{AlertStatus, SecurityAlert};

struct CounterEntry {
    count: i64,
    expires_at: Instant,
}

/// Counter store backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, CounterEntry>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.expires_at > now);
        let entry = entries.entry(key.to_string()).or_insert(CounterEntry {
            count: 0,
            expires_at: now + ttl,
        });
        entry.count += 1;
        Ok(entry.count)
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.count))
    }

    async fn set_flag(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let expires_at = now + ttl;
        entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.expires_at < expires_at {
                    entry.expires_at = expires_at;
                }
            })
            .or_insert(CounterEntry {
                count: 1,
                expires_at,
            });
        Ok(())
    }

    async fn flag_exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Counter store that always reports an outage.
///
/// Used to exercise the fail-open/fail-closed policies without a real
/// backend failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableCounterStore;

impl UnavailableCounterStore {
    fn outage() -> StoreError {
        StoreError::Unavailable("counter store offline".to_string())
    }
}

#[async_trait]
impl CounterStore for UnavailableCounterStore {
    async fn increment(&self, _key: &str, _ttl: Duration) -> Result<i64, StoreError> {
        Err(Self::outage())
    }

    async fn get(&self, _key: &str) -> Result<Option<i64>, StoreError> {
        Err(Self::outage())
    }

    async fn set_flag(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
        Err(Self::outage())
    }

    async fn flag_exists(&self, _key: &str) -> Result<bool, StoreError> {
        Err(Self::outage())
    }
}

/// Session repository backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemorySessionRepo {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl MemorySessionRepo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active sessions for a principal.
    pub async fn active_count(&self, principal_id: Uuid) -> usize {
        let sessions = self.sessions.lock().await;
        sessions
            .values()
            .filter(|session| session.principal_id == principal_id && session.is_active)
            .count()
    }
}

#[async_trait]
impl SessionRepo for MemorySessionRepo {
    async fn insert(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.lock().await;
        let mut inactive = None;
        for session in sessions.values() {
            if session.refresh_token_hash == token_hash {
                if session.is_active {
                    return Ok(Some(session.clone()));
                }
                inactive = Some(session.clone());
            }
        }
        Ok(inactive)
    }

    async fn deactivate(&self, id: Uuid, ended_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&id) {
            if session.is_active {
                session.is_active = false;
                session.ended_at = Some(ended_at);
            }
        }
        Ok(())
    }

    async fn deactivate_all(
        &self,
        principal_id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.lock().await;
        let mut count = 0;
        for session in sessions.values_mut() {
            if session.principal_id == principal_id && session.is_active {
                session.is_active = false;
                session.ended_at = Some(ended_at);
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Attempt store backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemoryAttemptStore {
    states: Mutex<HashMap<Uuid, LoginAttemptState>>,
}

impl MemoryAttemptStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn record_failure(&self, principal_id: Uuid) -> Result<LoginAttemptState, StoreError> {
        let mut states = self.states.lock().await;
        let state = states
            .entry(principal_id)
            .or_insert_with(|| LoginAttemptState::fresh(principal_id));
        state.failed_count += 1;
        Ok(state.clone())
    }

    async fn lock(&self, principal_id: Uuid, until: DateTime<Utc>) -> Result<(), StoreError> {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(&principal_id) {
            if state.locked_until.is_none() {
                state.locked_until = Some(until);
            }
        }
        Ok(())
    }

    async fn get(&self, principal_id: Uuid) -> Result<Option<LoginAttemptState>, StoreError> {
        let states = self.states.lock().await;
        Ok(states.get(&principal_id).cloned())
    }

    async fn reset(&self, principal_id: Uuid) -> Result<(), StoreError> {
        let mut states = self.states.lock().await;
        states.remove(&principal_id);
        Ok(())
    }
}

/// Alert store backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: Mutex<HashMap<Uuid, SecurityAlert>>,
}

impl MemoryAlertStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored alerts, newest first.
    pub async fn all(&self) -> Vec<SecurityAlert> {
        let alerts = self.alerts.lock().await;
        let mut all: Vec<SecurityAlert> = alerts.values().cloned().collect();
        all.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        all
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn insert(&self, alert: &SecurityAlert) -> Result<(), StoreError> {
        let mut alerts = self.alerts.lock().await;
        alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<SecurityAlert>, StoreError> {
        let alerts = self.alerts.lock().await;
        Ok(alerts.get(&id).cloned())
    }

    async fn update_if_status(
        &self,
        alert: &SecurityAlert,
        expected: AlertStatus,
    ) -> Result<bool, StoreError> {
        let mut alerts = self.alerts.lock().await;
        match alerts.get_mut(&alert.id) {
            Some(stored) if stored.status == expected => {
                *stored = alert.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counter_increment_and_read() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(store.increment("k", ttl).await.unwrap(), 1);
        assert_eq!(store.increment("k", ttl).await.unwrap(), 2);
        assert_eq!(store.get("k").await.unwrap(), Some(2));
        assert_eq!(store.get("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn counter_entries_expire() {
        let store = MemoryCounterStore::new();
        store
            .increment("short", Duration::from_millis(0))
            .await
            .unwrap();
        assert_eq!(store.get("short").await.unwrap(), None);
        // An expired entry restarts from one on the next increment.
        assert_eq!(
            store
                .increment("short", Duration::from_secs(60))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn flags_set_and_expire() {
        let store = MemoryCounterStore::new();
        store.set_flag("blocked", Duration::from_secs(60)).await.unwrap();
        assert!(store.flag_exists("blocked").await.unwrap());
        store.set_flag("gone", Duration::from_millis(0)).await.unwrap();
        assert!(!store.flag_exists("gone").await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_store_always_errors() {
        let store = UnavailableCounterStore;
        assert!(store.increment("k", Duration::from_secs(1)).await.is_err());
        assert!(store.flag_exists("k").await.is_err());
    }

    #[tokio::test]
    async fn attempt_store_is_single_writer_wins_on_lock() {
        let store = MemoryAttemptStore::new();
        let principal = Uuid::new_v4();
        store.record_failure(principal).await.unwrap();

        let first = Utc::now() + chrono::Duration::seconds(100);
        let second = Utc::now() + chrono::Duration::seconds(900);
        store.lock(principal, first).await.unwrap();
        store.lock(principal, second).await.unwrap();

        let state = store.get(principal).await.unwrap().unwrap();
        assert_eq!(state.locked_until, Some(first));
    }

    #[tokio::test]
    async fn deactivate_is_idempotent_and_keeps_ended_at() {
        let repo = MemorySessionRepo::new();
        let now = Utc::now();
        let session = Session::new_at(
            Uuid::new_v4(),
            "hash".to_string(),
            None,
            None,
            now,
            now + chrono::Duration::days(7),
        );
        let id = session.id;
        repo.insert(&session).await.unwrap();

        repo.deactivate(id, now).await.unwrap();
        let later = now + chrono::Duration::hours(1);
        repo.deactivate(id, later).await.unwrap();

        let found = repo.find_by_token_hash("hash").await.unwrap().unwrap();
        assert!(!found.is_active);
        assert_eq!(found.ended_at, Some(now));
    }
}
