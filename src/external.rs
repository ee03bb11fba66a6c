//! Boundaries to external collaborators.
//!
//! The core reads principals, appends audit entries and dispatches
//! notifications, but owns none of that data. Each boundary is a trait so
//! the composition root can inject real clients; the `Noop*` implementations
//! serve wiring that does not care.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::StoreError;
use crate::threat::Severity;

/// What kind of identity a principal is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    ApiKey,
}

/// Account status as owned by the external principal store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrincipalStatus {
    Active,
    PendingVerification,
    Suspended,
}

/// The slice of a principal the core reads. Never owned here.
#[derive(Clone, Debug)]
pub struct PrincipalRecord {
    pub id: Uuid,
    pub kind: PrincipalKind,
    pub role: String,
    pub status: PrincipalStatus,
    /// PHC-format password hash; absent for API keys.
    pub password_hash: Option<String>,
}

/// Read-only principal lookup.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<PrincipalRecord>, StoreError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<PrincipalRecord>, StoreError>;
}

/// One audit-trail record. Fire-and-forget from the core's perspective.
#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub outcome: String,
}

/// Append-only audit sink. Implementations log their own failures; the
/// request path never waits on delivery guarantees.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditEntry);
}

/// Notification dispatcher used by severity handlers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, severity: Severity, message: &str);
}

/// Audit sink that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn append(&self, _entry: AuditEntry) {}
}

/// Notifier that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _channel: &str, _severity: Severity, _message: &str) {}
}

/// Fixed in-memory principal directory.
///
/// Built once before wiring, then shared read-only; useful for embedding
/// and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticPrincipalStore {
    by_email: HashMap<String, PrincipalRecord>,
}

impl StaticPrincipalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, email: impl Into<String>, record: PrincipalRecord) {
        self.by_email.insert(email.into(), record);
    }
}

#[async_trait]
impl PrincipalStore for StaticPrincipalStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<PrincipalRecord>, StoreError> {
        Ok(self
            .by_email
            .values()
            .find(|record| record.id == id)
            .cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<PrincipalRecord>, StoreError> {
        Ok(self.by_email.get(email).cloned())
    }
}
