//! Refresh sessions.
//!
//! A session is the durable record behind a refresh token. The raw token is
//! never stored; each row keeps only the SHA-256 of the token, so a store
//! dump cannot be replayed against the API.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::error::{SessionError, StoreError};
use crate::store::SessionRepo;

/// One refresh session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub principal_id: Uuid,
    /// base64url(SHA-256(refresh token)).
    pub refresh_token_hash: String,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    /// A new active session. `ended_at` stays empty until deactivation.
    #[must_use]
    pub fn new_at(
        principal_id: Uuid,
        refresh_token_hash: String,
        device_info: Option<String>,
        ip_address: Option<String>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal_id,
            refresh_token_hash,
            device_info,
            ip_address,
            created_at,
            expires_at,
            is_active: true,
            ended_at: None,
        }
    }
}

/// Hash used to key sessions by their refresh token.
#[must_use]
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    Base64UrlUnpadded::encode_string(&hasher.finalize())
}

/// Creates, validates and revokes refresh sessions.
pub struct SessionStore {
    repo: Arc<dyn SessionRepo>,
    config: TokenConfig,
}

impl SessionStore {
    #[must_use]
    pub fn new(repo: Arc<dyn SessionRepo>, config: TokenConfig) -> Self {
        Self { repo, config }
    }

    /// Persists a new session for a freshly issued refresh token.
    ///
    /// # Errors
    ///
    /// Propagates the repository write failure.
    pub async fn create_at(
        &self,
        principal_id: Uuid,
        refresh_token: &str,
        device_info: Option<String>,
        ip_address: Option<String>,
        remember_me: bool,
        now: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        let ttl = Duration::seconds(self.config.refresh_ttl_for(remember_me));
        let session = Session::new_at(
            principal_id,
            hash_refresh_token(refresh_token),
            device_info,
            ip_address,
            now,
            now + ttl,
        );
        self.repo.insert(&session).await?;
        Ok(session)
    }

    pub async fn create(
        &self,
        principal_id: Uuid,
        refresh_token: &str,
        device_info: Option<String>,
        ip_address: Option<String>,
        remember_me: bool,
    ) -> Result<Session, StoreError> {
        self.create_at(
            principal_id,
            refresh_token,
            device_info,
            ip_address,
            remember_me,
            Utc::now(),
        )
        .await
    }

    /// Resolves a raw refresh token to its active, unexpired session.
    ///
    /// # Errors
    ///
    /// `NotFound` when no session matches the hash or the match is no longer
    /// active; `Expired` when the session exists but its lifetime has passed.
    pub async fn validate_at(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        let hash = hash_refresh_token(refresh_token);
        let session = self
            .repo
            .find_by_token_hash(&hash)
            .await?
            .ok_or(SessionError::NotFound)?;
        if !session.is_active {
            return Err(SessionError::NotFound);
        }
        if session.expires_at <= now {
            return Err(SessionError::Expired);
        }
        Ok(session)
    }

    pub async fn validate(&self, refresh_token: &str) -> Result<Session, SessionError> {
        self.validate_at(refresh_token, Utc::now()).await
    }

    /// Deactivates the session behind a refresh token. Idempotent; a token
    /// with no session is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates repository failures only.
    pub async fn revoke_at(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let hash = hash_refresh_token(refresh_token);
        if let Some(session) = self.repo.find_by_token_hash(&hash).await? {
            self.repo.deactivate(session.id, now).await?;
        }
        Ok(())
    }

    pub async fn revoke(&self, refresh_token: &str) -> Result<(), StoreError> {
        self.revoke_at(refresh_token, Utc::now()).await
    }

    /// Deactivates a session by id. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates repository failures only.
    pub async fn revoke_session_at(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.repo.deactivate(session_id, now).await
    }

    pub async fn revoke_session(&self, session_id: Uuid) -> Result<(), StoreError> {
        self.revoke_session_at(session_id, Utc::now()).await
    }

    /// Deactivates every active session of a principal; returns the count.
    /// Used after password changes and resets.
    ///
    /// # Errors
    ///
    /// Propagates repository failures only.
    pub async fn revoke_all_at(
        &self,
        principal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.repo.deactivate_all(principal_id, now).await
    }

    pub async fn revoke_all(&self, principal_id: Uuid) -> Result<u64, StoreError> {
        self.revoke_all_at(principal_id, Utc::now()).await
    }
}
