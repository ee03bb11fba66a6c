//! Detection pipeline and automated response.
//!
//! Inspection runs pattern scanning first, then volume accounting. Every
//! hit raises an alert, dispatches notifications by severity and bumps the
//! source's rolling threat score; a score past the threshold writes a
//! self-expiring block flag that `check_source` consults on later requests.
//! Detection bookkeeping fails open: an unreachable counter store must not
//! take the service down with it.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{FailurePolicy, ThreatConfig};
use crate::error::{AlertError, ThreatError};
use crate::external::Notifier;
use crate::store::{AlertStore, CounterStore};
use crate::threat::{patterns, AlertStatus, SecurityAlert, Severity, ThreatCategory};

/// The request surface the monitor inspects.
#[derive(Clone, Debug)]
pub struct RequestMeta {
    pub source_ip: String,
    pub path: String,
    pub query: Option<String>,
    /// Header name/value pairs; only values are scanned.
    pub headers: Vec<(String, String)>,
}

impl RequestMeta {
    #[must_use]
    pub fn new(source_ip: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            source_ip: source_ip.into(),
            path: path.into(),
            query: None,
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn fragments(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.path.as_str())
            .chain(self.query.as_deref())
            .chain(self.headers.iter().map(|(_, value)| value.as_str()))
    }
}

fn block_key(source_ip: &str) -> String {
    format!("threat:block:{source_ip}")
}

fn volume_key(source_ip: &str) -> String {
    format!("threat:volume:{source_ip}")
}

fn score_key(source_ip: &str) -> String {
    format!("threat:score:{source_ip}")
}

/// Pattern and volume detection with per-source automated blocking.
pub struct ThreatMonitor {
    counters: Arc<dyn CounterStore>,
    alerts: Arc<dyn AlertStore>,
    notifier: Arc<dyn Notifier>,
    config: ThreatConfig,
    outage: FailurePolicy,
}

impl ThreatMonitor {
    #[must_use]
    pub fn new(
        counters: Arc<dyn CounterStore>,
        alerts: Arc<dyn AlertStore>,
        notifier: Arc<dyn Notifier>,
        config: ThreatConfig,
        outage: FailurePolicy,
    ) -> Self {
        Self {
            counters,
            alerts,
            notifier,
            config,
            outage,
        }
    }

    /// Whether the source is currently on the automated block list.
    ///
    /// First check of the request pipeline.
    ///
    /// # Errors
    ///
    /// `SourceBlocked` while an unexpired block flag exists.
    pub async fn check_source(&self, source_ip: &str) -> Result<(), ThreatError> {
        match self.counters.flag_exists(&block_key(source_ip)).await {
            Ok(true) => Err(ThreatError::SourceBlocked),
            Ok(false) => Ok(()),
            Err(err) => match self.outage {
                FailurePolicy::FailOpen => {
                    warn!("block list unreachable, failing open: {err}");
                    Ok(())
                }
                FailurePolicy::FailClosed => {
                    warn!("block list unreachable, failing closed: {err}");
                    Err(ThreatError::SourceBlocked)
                }
            },
        }
    }

    /// Inspects one request: attack patterns first, then volume accounting.
    ///
    /// # Errors
    ///
    /// `PatternMatched` or `VolumeExceeded` on detection; the alert has
    /// already been raised and the source's threat score bumped when the
    /// rejection is returned.
    pub async fn inspect_at(
        &self,
        meta: &RequestMeta,
        now: DateTime<Utc>,
    ) -> Result<(), ThreatError> {
        if let Some(category) = meta.fragments().find_map(patterns::scan) {
            self.on_detection(category, &meta.source_ip, now).await;
            return Err(ThreatError::PatternMatched(category));
        }

        match self
            .counters
            .increment(&volume_key(&meta.source_ip), self.config.volume_window())
            .await
        {
            Ok(count) if count > self.config.volume_threshold() => {
                self.on_detection(ThreatCategory::VolumeFlood, &meta.source_ip, now)
                    .await;
                Err(ThreatError::VolumeExceeded)
            }
            Ok(_) => Ok(()),
            Err(err) => {
                // Volume accounting is bookkeeping; an unreachable counter
                // store never rejects the request on its own.
                warn!("volume counter unreachable, failing open: {err}");
                Ok(())
            }
        }
    }

    pub async fn inspect(&self, meta: &RequestMeta) -> Result<(), ThreatError> {
        self.inspect_at(meta, Utc::now()).await
    }

    /// An operator takes an open alert.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id; `InvalidTransition` when the alert is
    /// not open anymore, including when a racing operator took it first.
    pub async fn acknowledge_at(
        &self,
        alert_id: Uuid,
        assignee: &str,
        now: DateTime<Utc>,
    ) -> Result<SecurityAlert, AlertError> {
        let alert = self
            .alerts
            .fetch(alert_id)
            .await?
            .ok_or(AlertError::NotFound)?;
        if alert.status != AlertStatus::Open {
            return Err(AlertError::InvalidTransition { from: alert.status });
        }
        let updated = alert.acknowledged(assignee, now);
        if self
            .alerts
            .update_if_status(&updated, AlertStatus::Open)
            .await?
        {
            info!(alert_id = %alert_id, assignee, "alert acknowledged");
            Ok(updated)
        } else {
            let current = self
                .alerts
                .fetch(alert_id)
                .await?
                .ok_or(AlertError::NotFound)?;
            Err(AlertError::InvalidTransition {
                from: current.status,
            })
        }
    }

    pub async fn acknowledge(
        &self,
        alert_id: Uuid,
        assignee: &str,
    ) -> Result<SecurityAlert, AlertError> {
        self.acknowledge_at(alert_id, assignee, Utc::now()).await
    }

    /// Closes an investigating alert as resolved or false positive.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id; `InvalidTransition` unless the alert is
    /// currently investigating.
    pub async fn resolve_at(
        &self,
        alert_id: Uuid,
        notes: &str,
        is_false_positive: bool,
        now: DateTime<Utc>,
    ) -> Result<SecurityAlert, AlertError> {
        let alert = self
            .alerts
            .fetch(alert_id)
            .await?
            .ok_or(AlertError::NotFound)?;
        if alert.status != AlertStatus::Investigating {
            return Err(AlertError::InvalidTransition { from: alert.status });
        }
        let updated = alert.resolved(notes, is_false_positive, now);
        if self
            .alerts
            .update_if_status(&updated, AlertStatus::Investigating)
            .await?
        {
            info!(
                alert_id = %alert_id,
                status = %updated.status,
                "alert closed"
            );
            Ok(updated)
        } else {
            let current = self
                .alerts
                .fetch(alert_id)
                .await?
                .ok_or(AlertError::NotFound)?;
            Err(AlertError::InvalidTransition {
                from: current.status,
            })
        }
    }

    pub async fn resolve(
        &self,
        alert_id: Uuid,
        notes: &str,
        is_false_positive: bool,
    ) -> Result<SecurityAlert, AlertError> {
        self.resolve_at(alert_id, notes, is_false_positive, Utc::now())
            .await
    }

    /// Raises the alert, dispatches by severity, bumps the threat score.
    /// Detection already happened; nothing here can un-reject the request,
    /// so failures are logged and swallowed.
    async fn on_detection(&self, category: ThreatCategory, source_ip: &str, now: DateTime<Utc>) {
        let alert = SecurityAlert::new_at(category, source_ip, now);
        if let Err(err) = self.alerts.insert(&alert).await {
            error!(alert_id = %alert.id, "failed to persist alert: {err}");
        }
        self.dispatch(&alert).await;
        self.bump_threat_score(source_ip).await;
    }

    async fn dispatch(&self, alert: &SecurityAlert) {
        let message = format!(
            "{} from {} (alert {}, risk {})",
            alert.category, alert.source, alert.id, alert.risk_score
        );
        match alert.severity {
            Severity::Critical => {
                error!(alert_id = %alert.id, source = %alert.source, "critical threat: {}", alert.category);
                self.notifier
                    .notify("security-urgent", alert.severity, &message)
                    .await;
            }
            Severity::High => {
                warn!(alert_id = %alert.id, source = %alert.source, "high threat: {}", alert.category);
                self.notifier
                    .notify("security", alert.severity, &message)
                    .await;
            }
            Severity::Medium => {
                warn!(alert_id = %alert.id, source = %alert.source, "threat queued for review: {}", alert.category);
                self.notifier
                    .notify("security-review", alert.severity, &message)
                    .await;
            }
            Severity::Low => {
                info!(alert_id = %alert.id, source = %alert.source, "low threat: {}", alert.category);
            }
        }
    }

    /// Rolling per-source score; crossing the threshold blocks the source
    /// for the configured duration.
    async fn bump_threat_score(&self, source_ip: &str) {
        let score = match self
            .counters
            .increment(&score_key(source_ip), self.config.score_window())
            .await
        {
            Ok(score) => score,
            Err(err) => {
                warn!("threat score unreachable, skipping: {err}");
                return;
            }
        };
        if score >= self.config.score_threshold() {
            match self
                .counters
                .set_flag(&block_key(source_ip), self.config.block_duration())
                .await
            {
                Ok(()) => {
                    warn!(source = source_ip, score, "source auto-blocked");
                }
                Err(err) => {
                    warn!(source = source_ip, "failed to write block flag: {err}");
                }
            }
        }
    }
}
