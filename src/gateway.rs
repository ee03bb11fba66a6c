//! Composition root.
//!
//! [`SecurityCore`] owns the five components and is the only place wiring
//! happens: every component receives its stores and policies here, at
//! construction. It also carries the cross-component flows (request
//! screening, login, refresh, logout, forced re-authentication) so the
//! ordering rules live in one file.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{
    LockoutPolicy, OutagePolicy, RateLimitTiers, ThreatConfig, TokenConfig,
};
use crate::error::{AuthError, CoreError, SessionError};
use crate::external::{
    AuditEntry, AuditSink, Notifier, PrincipalRecord, PrincipalStatus, PrincipalStore,
};
use crate::lockout::LoginGuard;
use crate::rate_limit::RateLimiter;
use crate::session::{Session, SessionStore};
use crate::store::{AlertStore, AttemptStore, CounterStore, SessionRepo};
use crate::threat::{RequestMeta, ThreatMonitor};
use crate::token::{Claims, SigningKey, TokenAuthority, TokenType};

/// Argon2 hash of a throwaway password, verified for unknown accounts so a
/// lookup miss takes as long as a wrong password.
const DUMMY_PASSWORD_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$VE0e3g7DalWHgDwou3nuRA$uC6TER156UQpk0lNQ5+jHM0l5poVjPA1he8TZebqgl4";

/// Access and refresh token as returned from a successful login.
#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Everything a successful login produces.
#[derive(Clone, Debug)]
pub struct LoginOutcome {
    pub principal_id: Uuid,
    pub tokens: TokenPair,
    pub session: Session,
}

/// The wired security core.
pub struct SecurityCore {
    tokens: TokenAuthority,
    sessions: SessionStore,
    guard: LoginGuard,
    limiter: RateLimiter,
    monitor: ThreatMonitor,
    principals: Arc<dyn PrincipalStore>,
    audit: Arc<dyn AuditSink>,
}

impl SecurityCore {
    /// Wires every component. Stores and collaborators are injected; the
    /// outage policy decides each component's behavior when its store is
    /// unreachable.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        signing_key: SigningKey,
        token_config: TokenConfig,
        lockout_policy: LockoutPolicy,
        threat_config: ThreatConfig,
        outage_policy: OutagePolicy,
        counters: Arc<dyn CounterStore>,
        session_repo: Arc<dyn SessionRepo>,
        attempts: Arc<dyn AttemptStore>,
        alerts: Arc<dyn AlertStore>,
        principals: Arc<dyn PrincipalStore>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            tokens: TokenAuthority::new(
                signing_key,
                token_config.clone(),
                counters.clone(),
                outage_policy.token_revocation(),
            ),
            sessions: SessionStore::new(session_repo, token_config),
            guard: LoginGuard::new(attempts, lockout_policy, outage_policy.login_guard()),
            limiter: RateLimiter::new(counters.clone(), outage_policy.rate_limiter()),
            monitor: ThreatMonitor::new(
                counters,
                alerts,
                notifier,
                threat_config,
                outage_policy.threat_monitor(),
            ),
            principals,
            audit,
        }
    }

    #[must_use]
    pub fn monitor(&self) -> &ThreatMonitor {
        &self.monitor
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenAuthority {
        &self.tokens
    }

    /// Screens one inbound request: block list, then attack patterns and
    /// volume, then rate limits. Strictly sequential; the first rejection
    /// short-circuits the rest.
    ///
    /// # Errors
    ///
    /// The first component's rejection, unchanged.
    pub async fn screen_request_at(
        &self,
        meta: &RequestMeta,
        identifier: &str,
        resource: &str,
        tiers: &RateLimitTiers,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.monitor.check_source(&meta.source_ip).await?;
        self.monitor.inspect_at(meta, now).await?;
        self.limiter
            .check_and_consume_at(identifier, resource, tiers, now)
            .await?;
        Ok(())
    }

    pub async fn screen_request(
        &self,
        meta: &RequestMeta,
        identifier: &str,
        resource: &str,
        tiers: &RateLimitTiers,
    ) -> Result<(), CoreError> {
        self.screen_request_at(meta, identifier, resource, tiers, Utc::now())
            .await
    }

    /// Password login: lockout gate, credential check, account status,
    /// token issuance, session creation, audit trail.
    ///
    /// Unknown account and wrong password both return `InvalidCredentials`;
    /// a dummy hash verification runs for unknown accounts so the two cases
    /// do not differ in timing. Account status is only examined after the
    /// password is proven correct, so status never leaks to a guesser.
    ///
    /// # Errors
    ///
    /// `AuthError` variants for credential, lockout and status rejections;
    /// token or store failures from the issuance path.
    pub async fn login_at(
        &self,
        email: &str,
        password: &str,
        device_info: Option<String>,
        ip_address: Option<String>,
        remember_me: bool,
        now: DateTime<Utc>,
    ) -> Result<LoginOutcome, CoreError> {
        let principal = match self.principals.get_by_email(email).await {
            Ok(principal) => principal,
            Err(err) => {
                warn!("principal lookup failed, failing closed: {err}");
                return Err(AuthError::InvalidCredentials.into());
            }
        };
        let Some(principal) = principal else {
            // Unknown account burns the same argon2 work as a real one.
            let _ = verify_password(DUMMY_PASSWORD_HASH, password);
            debug!("login for unknown account");
            return Err(AuthError::InvalidCredentials.into());
        };

        self.guard.check_access_at(principal.id, now).await?;

        let password_ok = principal
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(hash, password));
        if !password_ok {
            let state = self.guard.record_failure_at(principal.id, now).await?;
            self.audit_login(&principal, ip_address.as_deref(), "failure", now)
                .await;
            debug!(
                principal_id = %principal.id,
                failed_count = state.failed_count,
                "password rejected"
            );
            return Err(AuthError::InvalidCredentials.into());
        }

        self.guard.record_success_at(principal.id, now).await?;

        match principal.status {
            PrincipalStatus::Active => {}
            PrincipalStatus::PendingVerification => {
                return Err(AuthError::AccountNotVerified.into());
            }
            PrincipalStatus::Suspended => {
                return Err(AuthError::AccountSuspended.into());
            }
        }

        let now_seconds = now.timestamp();
        let access_token = self.tokens.issue_at(
            principal.id,
            principal.kind,
            &principal.role,
            TokenType::Access,
            now_seconds,
        )?;
        let refresh_token = self.tokens.issue_with_ttl_at(
            principal.id,
            principal.kind,
            &principal.role,
            TokenType::Refresh,
            self.tokens.config().refresh_ttl_for(remember_me),
            now_seconds,
        )?;
        let session = self
            .sessions
            .create_at(
                principal.id,
                &refresh_token,
                device_info,
                ip_address.clone(),
                remember_me,
                now,
            )
            .await
            .map_err(SessionError::Store)?;

        self.audit_login(&principal, ip_address.as_deref(), "success", now)
            .await;
        info!(principal_id = %principal.id, session_id = %session.id, "login succeeded");

        Ok(LoginOutcome {
            principal_id: principal.id,
            tokens: TokenPair {
                access_token,
                refresh_token,
            },
            session,
        })
    }

    /// Mints a new access token from a valid refresh token with a live
    /// session behind it.
    ///
    /// # Errors
    ///
    /// Token errors from verification, session errors from the lookup.
    pub async fn refresh_at(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<String, CoreError> {
        let claims = self
            .tokens
            .verify_at(refresh_token, TokenType::Refresh, now.timestamp())
            .await?;
        let session = self.sessions.validate_at(refresh_token, now).await?;
        debug!(principal_id = %claims.sub, session_id = %session.id, "access token refreshed");
        let access_token = self.tokens.issue_at(
            claims.sub,
            claims.kind,
            &claims.role,
            TokenType::Access,
            now.timestamp(),
        )?;
        Ok(access_token)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<String, CoreError> {
        self.refresh_at(refresh_token, Utc::now()).await
    }

    /// Ends the session behind a refresh token. The token itself needs no
    /// denylist entry: refreshing requires an active session, and the
    /// session is gone. Idempotent; logging out twice is not an error.
    ///
    /// # Errors
    ///
    /// Store failures from the session write.
    pub async fn logout_at(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.sessions
            .revoke_at(refresh_token, now)
            .await
            .map_err(SessionError::Store)?;
        self.audit
            .append(AuditEntry {
                actor_id: None,
                action: "logout".to_string(),
                resource_type: "session".to_string(),
                resource_id: None,
                metadata: serde_json::Value::Null,
                timestamp: now,
                outcome: "success".to_string(),
            })
            .await;
        Ok(())
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<(), CoreError> {
        self.logout_at(refresh_token, Utc::now()).await
    }

    /// Ends every active session of a principal. Hook for password changes
    /// and resets; returns how many sessions were ended.
    ///
    /// # Errors
    ///
    /// Store failures from the bulk write.
    pub async fn force_reauth_at(
        &self,
        principal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let ended = self
            .sessions
            .revoke_all_at(principal_id, now)
            .await
            .map_err(SessionError::Store)?;
        self.audit
            .append(AuditEntry {
                actor_id: Some(principal_id),
                action: "force_reauth".to_string(),
                resource_type: "session".to_string(),
                resource_id: None,
                metadata: serde_json::json!({ "sessions_ended": ended }),
                timestamp: now,
                outcome: "success".to_string(),
            })
            .await;
        info!(principal_id = %principal_id, sessions_ended = ended, "forced re-authentication");
        Ok(ended)
    }

    pub async fn force_reauth(&self, principal_id: Uuid) -> Result<u64, CoreError> {
        self.force_reauth_at(principal_id, Utc::now()).await
    }

    /// Access-token verification for the request path.
    ///
    /// # Errors
    ///
    /// Token errors, cheapest check first.
    pub async fn verify_access_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Claims, CoreError> {
        Ok(self
            .tokens
            .verify_at(token, TokenType::Access, now.timestamp())
            .await?)
    }

    pub async fn verify_access(&self, token: &str) -> Result<Claims, CoreError> {
        self.verify_access_at(token, Utc::now()).await
    }

    async fn audit_login(
        &self,
        principal: &PrincipalRecord,
        ip_address: Option<&str>,
        outcome: &str,
        now: DateTime<Utc>,
    ) {
        self.audit
            .append(AuditEntry {
                actor_id: Some(principal.id),
                action: "login".to_string(),
                resource_type: "principal".to_string(),
                resource_id: Some(principal.id.to_string()),
                metadata: serde_json::json!({ "ip": ip_address }),
                timestamp: now,
                outcome: outcome.to_string(),
            })
            .await;
    }
}

fn verify_password(hash: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        warn!("stored password hash is not valid PHC format");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
