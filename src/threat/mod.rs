//! Threat detection, alerting and automated response.
//!
//! `patterns` holds the fixed attack-signature table, `alerts` the alert
//! model and its forward-only lifecycle, `monitor` the detection pipeline
//! and the per-source scoring that feeds the automated block list.

pub mod alerts;
pub mod monitor;
pub mod patterns;

pub use alerts::{AlertStatus, SecurityAlert, Severity};
pub use monitor::{RequestMeta, ThreatMonitor};
pub use patterns::ThreatCategory;
