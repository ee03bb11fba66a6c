//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use warden::external::{
    AuditEntry, AuditSink, Notifier, PrincipalKind, PrincipalRecord, PrincipalStatus,
    PrincipalStore, StaticPrincipalStore,
};
use warden::store::{MemoryAlertStore, MemoryAttemptStore, MemoryCounterStore, MemorySessionRepo};
use warden::threat::Severity;
use warden::{LockoutPolicy, OutagePolicy, SecurityCore, SigningKey, ThreatConfig, TokenConfig};

pub const USER_EMAIL: &str = "user@example.com";
pub const USER_PASSWORD: &str = "correct horse battery";

/// Installs a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Notifier that records every dispatch.
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(String, Severity, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, channel: &str, severity: Severity, message: &str) {
        let mut events = self.events.lock().await;
        events.push((channel.to_string(), severity, message.to_string()));
    }
}

/// Audit sink that records every entry.
#[derive(Default)]
pub struct RecordingAudit {
    pub entries: Mutex<Vec<AuditEntry>>,
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn append(&self, entry: AuditEntry) {
        let mut entries = self.entries.lock().await;
        entries.push(entry);
    }
}

/// A wired core over in-memory stores, with handles kept for assertions.
pub struct CoreFixture {
    pub core: SecurityCore,
    pub principal_id: Uuid,
    pub alerts: Arc<MemoryAlertStore>,
    pub attempts: Arc<MemoryAttemptStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub audit: Arc<RecordingAudit>,
}

pub fn password_hash(password: &str) -> String {
    use argon2::password_hash::{rand_core::OsRng, SaltString};
    use argon2::{Argon2, PasswordHasher};

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .expect("argon2 hash")
        .to_string()
}

pub fn principal(status: PrincipalStatus, password: &str) -> PrincipalRecord {
    PrincipalRecord {
        id: Uuid::new_v4(),
        kind: PrincipalKind::User,
        role: "member".to_string(),
        status,
        password_hash: Some(password_hash(password)),
    }
}

/// Core with one active user and recording collaborators.
pub fn fixture() -> CoreFixture {
    let mut principals = StaticPrincipalStore::new();
    let record = principal(PrincipalStatus::Active, USER_PASSWORD);
    let principal_id = record.id;
    principals.insert(USER_EMAIL, record);
    fixture_with(principals, principal_id)
}

pub fn fixture_with(principals: StaticPrincipalStore, principal_id: Uuid) -> CoreFixture {
    init_tracing();
    let alerts = Arc::new(MemoryAlertStore::new());
    let attempts = Arc::new(MemoryAttemptStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let audit = Arc::new(RecordingAudit::default());

    let core = SecurityCore::new(
        SigningKey::new([42u8; 32]).expect("signing key"),
        TokenConfig::new("warden-tests"),
        LockoutPolicy::default(),
        ThreatConfig::default(),
        OutagePolicy::default(),
        Arc::new(MemoryCounterStore::new()),
        Arc::new(MemorySessionRepo::new()),
        attempts.clone(),
        alerts.clone(),
        Arc::new(principals) as Arc<dyn PrincipalStore>,
        audit.clone(),
        notifier.clone(),
    );

    CoreFixture {
        core,
        principal_id,
        alerts,
        attempts,
        notifier,
        audit,
    }
}
