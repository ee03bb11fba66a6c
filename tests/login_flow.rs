//! End-to-end login, refresh, logout and lockout flows over in-memory stores.

mod common;

use chrono::{Duration, Utc};
use common::{fixture, USER_EMAIL, USER_PASSWORD};
use uuid::Uuid;

use warden::error::LockoutRejection;
use warden::external::{PrincipalStatus, StaticPrincipalStore};
use warden::store::AttemptStore;
use warden::{AuthError, CoreError, SessionError, TokenError};

#[tokio::test]
async fn successful_login_yields_working_tokens() {
    let fx = fixture();
    let now = Utc::now();

    let outcome = fx
        .core
        .login_at(
            USER_EMAIL,
            USER_PASSWORD,
            Some("integration test".to_string()),
            Some("203.0.113.5".to_string()),
            false,
            now,
        )
        .await
        .expect("login");
    assert_eq!(outcome.principal_id, fx.principal_id);
    assert_eq!(outcome.session.expires_at, now + Duration::days(7));

    let claims = fx
        .core
        .verify_access_at(&outcome.tokens.access_token, now)
        .await
        .expect("access token verifies");
    assert_eq!(claims.sub, fx.principal_id);
    assert_eq!(claims.role, "member");

    let new_access = fx
        .core
        .refresh_at(&outcome.tokens.refresh_token, now + Duration::hours(1))
        .await
        .expect("refresh");
    fx.core
        .verify_access_at(&new_access, now + Duration::hours(1))
        .await
        .expect("refreshed token verifies");

    let entries = fx.audit.entries.lock().await;
    assert!(entries
        .iter()
        .any(|entry| entry.action == "login" && entry.outcome == "success"));
}

#[tokio::test]
async fn fifth_failure_locks_and_correct_password_is_rejected() {
    let fx = fixture();
    let now = Utc::now();

    for _ in 0..5 {
        let err = fx
            .core
            .login_at(USER_EMAIL, "wrong", None, None, false, now)
            .await
            .expect_err("wrong password");
        assert!(matches!(err, CoreError::Auth(AuthError::InvalidCredentials)));
    }

    // Sixth attempt carries the right password and is still rejected.
    let err = fx
        .core
        .login_at(USER_EMAIL, USER_PASSWORD, None, None, false, now)
        .await
        .expect_err("locked");
    let CoreError::Auth(auth) = err else {
        panic!("expected auth error, got {err:?}");
    };
    let rejection = LockoutRejection::from_auth(&auth).expect("lockout rejection");
    assert!(rejection.locked);
    assert!(rejection.retry_after_seconds <= 1800);
    assert!(rejection.retry_after_seconds >= 1790);

    // After the lock expires the same credentials work again.
    let after = now + Duration::minutes(31);
    fx.core
        .login_at(USER_EMAIL, USER_PASSWORD, None, None, false, after)
        .await
        .expect("login after lock expiry");
}

#[tokio::test]
async fn unknown_account_matches_wrong_password_exactly() {
    let fx = fixture();
    let now = Utc::now();

    let unknown = fx
        .core
        .login_at("nobody@example.com", "whatever", None, None, false, now)
        .await
        .expect_err("unknown account");
    let wrong = fx
        .core
        .login_at(USER_EMAIL, "wrong", None, None, false, now)
        .await
        .expect_err("wrong password");

    assert_eq!(unknown.to_string(), wrong.to_string());
}

#[tokio::test]
async fn account_status_is_checked_only_after_the_password() {
    let mut principals = StaticPrincipalStore::new();
    let pending = common::principal(PrincipalStatus::PendingVerification, USER_PASSWORD);
    let suspended = common::principal(PrincipalStatus::Suspended, USER_PASSWORD);
    let pending_id = pending.id;
    principals.insert("pending@example.com", pending);
    principals.insert("suspended@example.com", suspended);
    let fx = common::fixture_with(principals, pending_id);
    let now = Utc::now();

    // Wrong password wins over status: no status leak to a guesser.
    let err = fx
        .core
        .login_at("pending@example.com", "wrong", None, None, false, now)
        .await
        .expect_err("wrong password");
    assert!(matches!(err, CoreError::Auth(AuthError::InvalidCredentials)));

    let err = fx
        .core
        .login_at("pending@example.com", USER_PASSWORD, None, None, false, now)
        .await
        .expect_err("pending");
    assert!(matches!(err, CoreError::Auth(AuthError::AccountNotVerified)));

    let err = fx
        .core
        .login_at("suspended@example.com", USER_PASSWORD, None, None, false, now)
        .await
        .expect_err("suspended");
    assert!(matches!(err, CoreError::Auth(AuthError::AccountSuspended)));
}

#[tokio::test]
async fn revoked_access_token_fails_verification() {
    let fx = fixture();
    let now = Utc::now();
    let outcome = fx
        .core
        .login_at(USER_EMAIL, USER_PASSWORD, None, None, false, now)
        .await
        .expect("login");

    fx.core
        .tokens()
        .revoke_at(&outcome.tokens.access_token, now.timestamp())
        .await
        .expect("revoke");

    let err = fx
        .core
        .verify_access_at(&outcome.tokens.access_token, now + Duration::seconds(1))
        .await
        .expect_err("revoked");
    assert!(matches!(err, CoreError::Token(TokenError::Revoked)));
}

#[tokio::test]
async fn logout_invalidates_the_refresh_token() {
    let fx = fixture();
    let now = Utc::now();
    let outcome = fx
        .core
        .login_at(USER_EMAIL, USER_PASSWORD, None, None, false, now)
        .await
        .expect("login");

    fx.core
        .logout_at(&outcome.tokens.refresh_token, now)
        .await
        .expect("logout");
    // Logging out twice is fine.
    fx.core
        .logout_at(&outcome.tokens.refresh_token, now)
        .await
        .expect("repeat logout");

    let err = fx
        .core
        .refresh_at(&outcome.tokens.refresh_token, now + Duration::seconds(1))
        .await
        .expect_err("refresh after logout");
    assert!(matches!(
        err,
        CoreError::Session(SessionError::NotFound)
    ));
}

#[tokio::test]
async fn force_reauth_ends_every_session() {
    let fx = fixture();
    let now = Utc::now();
    let first = fx
        .core
        .login_at(USER_EMAIL, USER_PASSWORD, None, None, false, now)
        .await
        .expect("first login");
    let second = fx
        .core
        .login_at(USER_EMAIL, USER_PASSWORD, None, None, true, now)
        .await
        .expect("second login");

    let ended = fx
        .core
        .force_reauth_at(fx.principal_id, now)
        .await
        .expect("force reauth");
    assert_eq!(ended, 2);

    for token in [&first.tokens.refresh_token, &second.tokens.refresh_token] {
        let err = fx
            .core
            .refresh_at(token, now + Duration::seconds(1))
            .await
            .expect_err("refresh after force reauth");
        assert!(matches!(err, CoreError::Session(SessionError::NotFound)));
    }
}

#[tokio::test]
async fn remember_me_extends_the_refresh_session() {
    let fx = fixture();
    let now = Utc::now();
    let outcome = fx
        .core
        .login_at(USER_EMAIL, USER_PASSWORD, None, None, true, now)
        .await
        .expect("login");
    assert_eq!(outcome.session.expires_at, now + Duration::days(30));

    // The refresh token remains usable late in the extended window.
    fx.core
        .refresh_at(&outcome.tokens.refresh_token, now + Duration::days(29))
        .await
        .expect("late refresh");
}

#[tokio::test]
async fn failed_logins_leave_an_audit_trail() {
    let fx = fixture();
    let now = Utc::now();
    let _ = fx
        .core
        .login_at(USER_EMAIL, "wrong", None, Some("198.51.100.9".to_string()), false, now)
        .await;

    let entries = fx.audit.entries.lock().await;
    let failure = entries
        .iter()
        .find(|entry| entry.action == "login" && entry.outcome == "failure")
        .expect("failure entry");
    assert_eq!(failure.actor_id, Some(fx.principal_id));
    assert_eq!(failure.metadata["ip"], "198.51.100.9");
}

#[tokio::test]
async fn lockout_state_is_invisible_for_unknown_principals() {
    let fx = fixture();
    assert!(fx.attempts.get(Uuid::new_v4()).await.unwrap().is_none());
}
