//! Security alerts and their lifecycle.
//!
//! An alert is born `Open`, moves to `Investigating` once an operator takes
//! it, and ends in `Resolved` or `FalsePositive`. Transitions are forward
//! only; the store applies them compare-and-set so two operators cannot
//! both claim the same transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::threat::ThreatCategory;

/// Alert severity, driving the notification dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// Severity assigned to alerts of a category.
    #[must_use]
    pub const fn for_category(category: ThreatCategory) -> Self {
        match category {
            ThreatCategory::CodeInjection => Severity::Critical,
            ThreatCategory::SqlInjection
            | ThreatCategory::PathTraversal
            | ThreatCategory::VolumeFlood => Severity::High,
            ThreatCategory::ScriptInjection => Severity::Medium,
        }
    }

    /// Baseline risk contribution of an alert at this severity.
    #[must_use]
    pub const fn risk_score(self) -> i32 {
        match self {
            Severity::Critical => 90,
            Severity::High => 70,
            Severity::Medium => 50,
            Severity::Low => 20,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle position of an alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Investigating,
    Resolved,
    FalsePositive,
}

impl AlertStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Investigating => "investigating",
            AlertStatus::Resolved => "resolved",
            AlertStatus::FalsePositive => "false_positive",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(AlertStatus::Open),
            "investigating" => Some(AlertStatus::Investigating),
            "resolved" => Some(AlertStatus::Resolved),
            "false_positive" => Some(AlertStatus::FalsePositive),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::FalsePositive)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected threat, persisted for operator review.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityAlert {
    pub id: Uuid,
    pub severity: Severity,
    pub category: ThreatCategory,
    pub status: AlertStatus,
    /// Source IP the detection attributed the request to.
    pub source: String,
    pub risk_score: i32,
    pub detected_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub assignee: Option<String>,
    pub notes: Option<String>,
}

impl SecurityAlert {
    /// A fresh open alert; severity and risk score derive from the category.
    #[must_use]
    pub fn new_at(category: ThreatCategory, source: impl Into<String>, now: DateTime<Utc>) -> Self {
        let severity = Severity::for_category(category);
        Self {
            id: Uuid::new_v4(),
            severity,
            category,
            status: AlertStatus::Open,
            source: source.into(),
            risk_score: severity.risk_score(),
            detected_at: now,
            acknowledged_at: None,
            resolved_at: None,
            assignee: None,
            notes: None,
        }
    }

    /// The alert as it looks once an operator takes it.
    #[must_use]
    pub fn acknowledged(mut self, assignee: impl Into<String>, now: DateTime<Utc>) -> Self {
        self.status = AlertStatus::Investigating;
        self.acknowledged_at = Some(now);
        self.assignee = Some(assignee.into());
        self
    }

    /// The alert in its terminal state.
    #[must_use]
    pub fn resolved(
        mut self,
        notes: impl Into<String>,
        is_false_positive: bool,
        now: DateTime<Utc>,
    ) -> Self {
        self.status = if is_false_positive {
            AlertStatus::FalsePositive
        } else {
            AlertStatus::Resolved
        };
        self.resolved_at = Some(now);
        self.notes = Some(notes.into());
        self
    }
}
