//! Request screening pipeline: block list, pattern and volume detection,
//! rate limits, and the alert lifecycle behind them.

mod common;

use chrono::Utc;
use common::fixture;
use std::sync::Arc;

use warden::error::RateLimitRejection;
use warden::external::{PrincipalStore, StaticPrincipalStore};
use warden::store::{
    MemoryAlertStore, MemoryAttemptStore, MemoryCounterStore, MemorySessionRepo,
    UnavailableCounterStore,
};
use warden::threat::{AlertStatus, RequestMeta, Severity, ThreatCategory};
use warden::{
    CoreError, FailurePolicy, LockoutPolicy, OutagePolicy, RateLimitError, RateLimitTiers,
    RateLimiter, SecurityCore, SigningKey, ThreatConfig, ThreatError, TokenConfig, Window,
};

#[tokio::test]
async fn sixty_first_request_in_a_minute_is_limited() {
    let fx = fixture();
    let tiers = RateLimitTiers::new(60, 10_000, 100_000);
    let meta = RequestMeta::new("203.0.113.10", "/api/items");
    let now = Utc::now();

    for _ in 0..60 {
        fx.core
            .screen_request_at(&meta, "k1", "/api/items", &tiers, now)
            .await
            .expect("within limit");
    }
    let err = fx
        .core
        .screen_request_at(&meta, "k1", "/api/items", &tiers, now)
        .await
        .expect_err("over limit");
    let CoreError::RateLimit(limit_err) = err else {
        panic!("expected rate limit, got {err:?}");
    };
    let rejection = RateLimitRejection::from(&limit_err);
    assert_eq!(
        serde_json::to_value(rejection).expect("serialize"),
        serde_json::json!({
            "limited": true,
            "window": "minute",
            "retry_after_seconds": 60,
        })
    );
}

#[tokio::test]
async fn injection_attempt_is_rejected_and_alerted() {
    let fx = fixture();
    let tiers = RateLimitTiers::new(100, 1000, 10_000);
    let meta = RequestMeta::new("203.0.113.11", "/api/search")
        .with_query("q=1 UNION SELECT password FROM users");
    let now = Utc::now();

    let err = fx
        .core
        .screen_request_at(&meta, "k1", "/api/search", &tiers, now)
        .await
        .expect_err("pattern match");
    assert!(matches!(
        err,
        CoreError::Threat(ThreatError::PatternMatched(ThreatCategory::SqlInjection))
    ));

    let alerts = fx.alerts.all().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::High);
    assert_eq!(alerts[0].status, AlertStatus::Open);
    assert_eq!(alerts[0].risk_score, 70);

    let events = fx.notifier.events.lock().await;
    assert_eq!(events.len(), 1);
    let (channel, severity, message) = &events[0];
    assert_eq!(channel, "security");
    assert_eq!(*severity, Severity::High);
    assert!(message.contains("sql_injection"));
    assert!(message.contains("203.0.113.11"));
}

#[tokio::test]
async fn repeat_offender_is_blocked_before_anything_else() {
    let fx = fixture();
    let tiers = RateLimitTiers::new(1000, 10_000, 100_000);
    let now = Utc::now();

    // Each probe scores severity-independent +1; the default threshold is 10.
    for i in 0..10 {
        let meta = RequestMeta::new("192.0.2.44", format!("/api/item/{i}"))
            .with_query("name=' OR '1'='1");
        let _ = fx
            .core
            .screen_request_at(&meta, "k2", "/api/item", &tiers, now)
            .await;
    }

    // A perfectly clean request from the same source is now refused.
    let clean = RequestMeta::new("192.0.2.44", "/healthz");
    let err = fx
        .core
        .screen_request_at(&clean, "k2", "/healthz", &tiers, now)
        .await
        .expect_err("blocked source");
    assert!(matches!(
        err,
        CoreError::Threat(ThreatError::SourceBlocked)
    ));

    // Other sources are unaffected.
    let other = RequestMeta::new("192.0.2.45", "/healthz");
    fx.core
        .screen_request_at(&other, "k3", "/healthz", &tiers, now)
        .await
        .expect("clean source passes");
}

#[tokio::test]
async fn alert_lifecycle_is_forward_only() {
    let fx = fixture();
    let tiers = RateLimitTiers::new(100, 1000, 10_000);
    let meta = RequestMeta::new("198.51.100.20", "/files").with_query("path=../../etc/passwd");
    let now = Utc::now();
    let _ = fx
        .core
        .screen_request_at(&meta, "k1", "/files", &tiers, now)
        .await;

    let alert_id = fx.alerts.all().await[0].id;
    let monitor = fx.core.monitor();

    let taken = monitor
        .acknowledge_at(alert_id, "alex", now)
        .await
        .expect("acknowledge");
    assert_eq!(taken.status, AlertStatus::Investigating);
    assert_eq!(taken.assignee.as_deref(), Some("alex"));

    let closed = monitor
        .resolve_at(alert_id, "pen test traffic", true, now)
        .await
        .expect("resolve");
    assert_eq!(closed.status, AlertStatus::FalsePositive);
    assert_eq!(closed.notes.as_deref(), Some("pen test traffic"));

    // Terminal means terminal.
    let stored = fx.alerts.all().await;
    assert_eq!(stored[0].status, AlertStatus::FalsePositive);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_requests_never_exceed_the_window_limit() {
    const LIMIT: i64 = 50;

    let limiter = Arc::new(RateLimiter::new(
        Arc::new(MemoryCounterStore::new()),
        FailurePolicy::FailOpen,
    ));
    let tiers = RateLimitTiers::new(LIMIT, 100_000, 1_000_000);
    // One shared instant keeps every request in the same minute bucket.
    let now = chrono::TimeZone::timestamp_opt(&Utc, 1_700_000_000, 0).unwrap();

    // Twice the limit, all in flight at once. Increment-then-check means no
    // pair of requests can both read a sub-limit count and both pass.
    let mut handles = Vec::new();
    for _ in 0..(2 * LIMIT) {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter
                .check_and_consume_at("k1", "/api/items", &tiers, now)
                .await
                .is_ok()
        }));
    }
    let mut accepted = 0;
    for handle in handles {
        if handle.await.expect("task") {
            accepted += 1;
        }
    }
    assert_eq!(accepted, LIMIT);

    // The full 2L spend is on the books in the wider windows.
    let hour_count = limiter
        .current_count_at("k1", "/api/items", Window::Hour, now)
        .await
        .expect("count");
    assert_eq!(hour_count, 2 * LIMIT);
}

#[tokio::test]
async fn counter_outage_fails_open_for_screening() {
    let core = SecurityCore::new(
        SigningKey::new([42u8; 32]).expect("signing key"),
        TokenConfig::new("warden-tests"),
        LockoutPolicy::default(),
        ThreatConfig::default(),
        OutagePolicy::default(),
        Arc::new(UnavailableCounterStore),
        Arc::new(MemorySessionRepo::new()),
        Arc::new(MemoryAttemptStore::new()),
        Arc::new(MemoryAlertStore::new()),
        Arc::new(StaticPrincipalStore::new()) as Arc<dyn PrincipalStore>,
        Arc::new(warden::external::NoopAuditSink),
        Arc::new(warden::external::NoopNotifier),
    );

    let tiers = RateLimitTiers::new(1, 1, 1);
    let meta = RequestMeta::new("203.0.113.30", "/api/items");
    // Block list, volume and rate limits are all unreadable; traffic shaping
    // fails open and the request goes through.
    core.screen_request_at(&meta, "k1", "/api/items", &tiers, Utc::now())
        .await
        .expect("fail open");
}

#[tokio::test]
async fn rejected_requests_still_consume_budget() {
    let fx = fixture();
    let tiers = RateLimitTiers::new(2, 3, 10_000);
    let meta = RequestMeta::new("203.0.113.12", "/api/items");
    // Fixed instant so the minute rollover below stays inside one hour.
    let now = chrono::TimeZone::timestamp_opt(&Utc, 1_700_000_000, 0).unwrap();

    fx.core
        .screen_request_at(&meta, "k1", "/api/items", &tiers, now)
        .await
        .expect("first");
    fx.core
        .screen_request_at(&meta, "k1", "/api/items", &tiers, now)
        .await
        .expect("second");

    // Third and fourth blow the minute window but still count toward the
    // hour window, which rejects on the fifth even in a new minute.
    for _ in 0..2 {
        let err = fx
            .core
            .screen_request_at(&meta, "k1", "/api/items", &tiers, now)
            .await
            .expect_err("minute window");
        assert!(matches!(
            err,
            CoreError::RateLimit(RateLimitError::WindowExceeded {
                window: Window::Minute,
                ..
            })
        ));
    }

    let next_minute = now + chrono::Duration::seconds(60);
    let err = fx
        .core
        .screen_request_at(&meta, "k1", "/api/items", &tiers, next_minute)
        .await
        .expect_err("hour window");
    assert!(matches!(
        err,
        CoreError::RateLimit(RateLimitError::WindowExceeded {
            window: Window::Hour,
            retry_after_seconds: 3600,
        })
    ));
}
