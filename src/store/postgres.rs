//! `PostgreSQL` store implementations.
//!
//! Counters use single upsert statements so increment-and-read is one atomic
//! round trip, which keeps limits synchronized across service instances.
//! Every call is bounded by a timeout; on expiry the caller's
//! fail-open/fail-closed policy applies. Schema lives in `db/sql/warden.sql`.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::DEFAULT_STORE_TIMEOUT;
use crate::error::StoreError;
use crate::lockout::LoginAttemptState;
use crate::session::Session;
use crate::store::{AlertStore, AttemptStore, CounterStore, SessionRepo};
use crate::threat::{AlertStatus, SecurityAlert, Severity, ThreatCategory};

async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(StoreError::Query(err)),
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

fn db_span(operation: &'static str) -> tracing::Span {
    tracing::info_span!("db.query", db.system = "postgresql", db.operation = operation)
}

/// Counter store on the `security_counters` table.
#[derive(Clone, Debug)]
pub struct PgCounterStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgCounterStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deletes expired counters and flags; returns the number removed.
    /// Intended for a periodic maintenance task, not the request path.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let query = "DELETE FROM security_counters WHERE expires_at <= NOW()";
        let result = bounded(
            self.timeout,
            sqlx::query(query)
                .execute(&self.pool)
                .instrument(db_span("DELETE")),
        )
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl CounterStore for PgCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        // An expired row restarts at one with a fresh expiry; a live row
        // keeps its original expiry so the TTL never slides.
        let query = r"
            INSERT INTO security_counters (bucket, count, expires_at)
            VALUES ($1, 1, NOW() + ($2 * INTERVAL '1 second'))
            ON CONFLICT (bucket) DO UPDATE SET
                count = CASE
                    WHEN security_counters.expires_at <= NOW() THEN 1
                    ELSE security_counters.count + 1
                END,
                expires_at = CASE
                    WHEN security_counters.expires_at <= NOW() THEN EXCLUDED.expires_at
                    ELSE security_counters.expires_at
                END
            RETURNING count
        ";
        let row = bounded(
            self.timeout,
            sqlx::query(query)
                .bind(key)
                .bind(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
                .fetch_one(&self.pool)
                .instrument(db_span("INSERT")),
        )
        .await?;
        Ok(row.get("count"))
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let query = "SELECT count FROM security_counters WHERE bucket = $1 AND expires_at > NOW()";
        let row = bounded(
            self.timeout,
            sqlx::query(query)
                .bind(key)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT")),
        )
        .await?;
        Ok(row.map(|row| row.get("count")))
    }

    async fn set_flag(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        // Re-setting a flag extends its expiry but never shortens it.
        let query = r"
            INSERT INTO security_counters (bucket, count, expires_at)
            VALUES ($1, 1, NOW() + ($2 * INTERVAL '1 second'))
            ON CONFLICT (bucket) DO UPDATE SET
                expires_at = GREATEST(security_counters.expires_at, EXCLUDED.expires_at)
        ";
        bounded(
            self.timeout,
            sqlx::query(query)
                .bind(key)
                .bind(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
                .execute(&self.pool)
                .instrument(db_span("INSERT")),
        )
        .await?;
        Ok(())
    }

    async fn flag_exists(&self, key: &str) -> Result<bool, StoreError> {
        let query = "SELECT 1 FROM security_counters WHERE bucket = $1 AND expires_at > NOW()";
        let row = bounded(
            self.timeout,
            sqlx::query(query)
                .bind(key)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT")),
        )
        .await?;
        Ok(row.is_some())
    }
}

/// Session repository on the `auth_sessions` table.
#[derive(Clone, Debug)]
pub struct PgSessionRepo {
    pool: PgPool,
    timeout: Duration,
}

impl PgSessionRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn session_from_row(row: &sqlx::postgres::PgRow) -> Session {
    Session {
        id: row.get("id"),
        principal_id: row.get("principal_id"),
        refresh_token_hash: row.get("refresh_token_hash"),
        device_info: row.get("device_info"),
        ip_address: row.get("ip_address"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        is_active: row.get("is_active"),
        ended_at: row.get("ended_at"),
    }
}

#[async_trait::async_trait]
impl SessionRepo for PgSessionRepo {
    async fn insert(&self, session: &Session) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO auth_sessions
                (id, principal_id, refresh_token_hash, device_info, ip_address,
                 created_at, expires_at, is_active, ended_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ";
        bounded(
            self.timeout,
            sqlx::query(query)
                .bind(session.id)
                .bind(session.principal_id)
                .bind(&session.refresh_token_hash)
                .bind(&session.device_info)
                .bind(&session.ip_address)
                .bind(session.created_at)
                .bind(session.expires_at)
                .bind(session.is_active)
                .bind(session.ended_at)
                .execute(&self.pool)
                .instrument(db_span("INSERT")),
        )
        .await?;
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, StoreError> {
        let query = r"
            SELECT id, principal_id, refresh_token_hash, device_info, ip_address,
                   created_at, expires_at, is_active, ended_at
            FROM auth_sessions
            WHERE refresh_token_hash = $1
            ORDER BY is_active DESC, created_at DESC
            LIMIT 1
        ";
        let row = bounded(
            self.timeout,
            sqlx::query(query)
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT")),
        )
        .await?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn deactivate(&self, id: Uuid, ended_at: DateTime<Utc>) -> Result<(), StoreError> {
        // The is_active predicate keeps the first ended_at on repeat calls.
        let query = r"
            UPDATE auth_sessions
            SET is_active = FALSE, ended_at = $2
            WHERE id = $1 AND is_active
        ";
        bounded(
            self.timeout,
            sqlx::query(query)
                .bind(id)
                .bind(ended_at)
                .execute(&self.pool)
                .instrument(db_span("UPDATE")),
        )
        .await?;
        Ok(())
    }

    async fn deactivate_all(
        &self,
        principal_id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let query = r"
            UPDATE auth_sessions
            SET is_active = FALSE, ended_at = $2
            WHERE principal_id = $1 AND is_active
        ";
        let result = bounded(
            self.timeout,
            sqlx::query(query)
                .bind(principal_id)
                .bind(ended_at)
                .execute(&self.pool)
                .instrument(db_span("UPDATE")),
        )
        .await?;
        Ok(result.rows_affected())
    }
}

/// Attempt store on the `login_attempts` table.
#[derive(Clone, Debug)]
pub struct PgAttemptStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgAttemptStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl AttemptStore for PgAttemptStore {
    async fn record_failure(&self, principal_id: Uuid) -> Result<LoginAttemptState, StoreError> {
        let query = r"
            INSERT INTO login_attempts (principal_id, failed_count, updated_at)
            VALUES ($1, 1, NOW())
            ON CONFLICT (principal_id) DO UPDATE SET
                failed_count = login_attempts.failed_count + 1,
                updated_at = NOW()
            RETURNING failed_count, locked_until
        ";
        let row = bounded(
            self.timeout,
            sqlx::query(query)
                .bind(principal_id)
                .fetch_one(&self.pool)
                .instrument(db_span("INSERT")),
        )
        .await?;
        Ok(LoginAttemptState {
            principal_id,
            failed_count: row.get("failed_count"),
            locked_until: row.get("locked_until"),
        })
    }

    async fn lock(&self, principal_id: Uuid, until: DateTime<Utc>) -> Result<(), StoreError> {
        let query = r"
            UPDATE login_attempts
            SET locked_until = $2, updated_at = NOW()
            WHERE principal_id = $1 AND locked_until IS NULL
        ";
        bounded(
            self.timeout,
            sqlx::query(query)
                .bind(principal_id)
                .bind(until)
                .execute(&self.pool)
                .instrument(db_span("UPDATE")),
        )
        .await?;
        Ok(())
    }

    async fn get(&self, principal_id: Uuid) -> Result<Option<LoginAttemptState>, StoreError> {
        let query =
            "SELECT failed_count, locked_until FROM login_attempts WHERE principal_id = $1";
        let row = bounded(
            self.timeout,
            sqlx::query(query)
                .bind(principal_id)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT")),
        )
        .await?;
        Ok(row.map(|row| LoginAttemptState {
            principal_id,
            failed_count: row.get("failed_count"),
            locked_until: row.get("locked_until"),
        }))
    }

    async fn reset(&self, principal_id: Uuid) -> Result<(), StoreError> {
        let query = "DELETE FROM login_attempts WHERE principal_id = $1";
        bounded(
            self.timeout,
            sqlx::query(query)
                .bind(principal_id)
                .execute(&self.pool)
                .instrument(db_span("DELETE")),
        )
        .await?;
        Ok(())
    }
}

/// Alert store on the `security_alerts` table.
#[derive(Clone, Debug)]
pub struct PgAlertStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgAlertStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn alert_from_row(row: &sqlx::postgres::PgRow) -> Result<SecurityAlert, StoreError> {
    let severity: String = row.get("severity");
    let category: String = row.get("category");
    let status: String = row.get("status");
    Ok(SecurityAlert {
        id: row.get("id"),
        severity: Severity::parse(&severity)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown severity {severity}")))?,
        category: ThreatCategory::parse(&category)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown category {category}")))?,
        status: AlertStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status {status}")))?,
        source: row.get("source"),
        risk_score: row.get("risk_score"),
        detected_at: row.get("detected_at"),
        acknowledged_at: row.get("acknowledged_at"),
        resolved_at: row.get("resolved_at"),
        assignee: row.get("assignee"),
        notes: row.get("notes"),
    })
}

#[async_trait::async_trait]
impl AlertStore for PgAlertStore {
    async fn insert(&self, alert: &SecurityAlert) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO security_alerts
                (id, severity, category, status, source, risk_score,
                 detected_at, acknowledged_at, resolved_at, assignee, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ";
        bounded(
            self.timeout,
            sqlx::query(query)
                .bind(alert.id)
                .bind(alert.severity.as_str())
                .bind(alert.category.as_str())
                .bind(alert.status.as_str())
                .bind(&alert.source)
                .bind(alert.risk_score)
                .bind(alert.detected_at)
                .bind(alert.acknowledged_at)
                .bind(alert.resolved_at)
                .bind(&alert.assignee)
                .bind(&alert.notes)
                .execute(&self.pool)
                .instrument(db_span("INSERT")),
        )
        .await?;
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<SecurityAlert>, StoreError> {
        let query = r"
            SELECT id, severity, category, status, source, risk_score,
                   detected_at, acknowledged_at, resolved_at, assignee, notes
            FROM security_alerts
            WHERE id = $1
        ";
        let row = bounded(
            self.timeout,
            sqlx::query(query)
                .bind(id)
                .fetch_optional(&self.pool)
                .instrument(db_span("SELECT")),
        )
        .await?;
        row.as_ref().map(alert_from_row).transpose()
    }

    async fn update_if_status(
        &self,
        alert: &SecurityAlert,
        expected: AlertStatus,
    ) -> Result<bool, StoreError> {
        // Compare-and-set on the status column; the row lock serializes
        // racing transitions and the predicate fails the loser.
        let query = r"
            UPDATE security_alerts
            SET status = $2, acknowledged_at = $3, resolved_at = $4,
                assignee = $5, notes = $6
            WHERE id = $1 AND status = $7
        ";
        let result = bounded(
            self.timeout,
            sqlx::query(query)
                .bind(alert.id)
                .bind(alert.status.as_str())
                .bind(alert.acknowledged_at)
                .bind(alert.resolved_at)
                .bind(&alert.assignee)
                .bind(&alert.notes)
                .bind(expected.as_str())
                .execute(&self.pool)
                .instrument(db_span("UPDATE")),
        )
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
