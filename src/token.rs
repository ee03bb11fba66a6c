//! Bearer token issuance, verification and revocation.
//!
//! Tokens are JWT-shaped (`header.claims.signature`, base64url) and signed
//! with HMAC-SHA256. The signature proves integrity but not revocability;
//! revocation is a separate denylist of token hashes whose entries expire
//! exactly when the token would have expired anyway, so verification stays
//! O(1) and the list is self-bounding.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{FailurePolicy, TokenConfig};
use crate::error::{StoreError, TokenError};
use crate::external::PrincipalKind;
use crate::store::CounterStore;

/// Short-lived credential for request authorization, or the long-lived
/// credential used only to mint new access tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Signed claim set carried by every token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject principal id.
    pub sub: Uuid,
    pub kind: PrincipalKind,
    pub role: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub typ: TokenType,
    /// Unique token id; keeps two same-second issues distinct.
    pub jti: Uuid,
}

/// Symmetric signing key, length-validated at construction.
#[derive(Clone)]
pub struct SigningKey {
    key_bytes: Arc<[u8]>,
}

#[derive(Debug, Clone, Copy, Error)]
pub enum SigningKeyError {
    #[error("signing key too short: got {actual} bytes, need at least {minimum}")]
    KeyTooShort { actual: usize, minimum: usize },
}

impl SigningKey {
    /// Minimum allowed key length in bytes (256 bits).
    pub const MIN_KEY_LENGTH: usize = 32;

    /// # Errors
    ///
    /// Returns an error if the key is shorter than 32 bytes.
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, SigningKeyError> {
        let key_bytes = key.as_ref();
        if key_bytes.len() < Self::MIN_KEY_LENGTH {
            return Err(SigningKeyError::KeyTooShort {
                actual: key_bytes.len(),
                minimum: Self::MIN_KEY_LENGTH,
            });
        }
        Ok(Self {
            key_bytes: Arc::from(key_bytes),
        })
    }

    fn mac(&self) -> Hmac<Sha256> {
        // Cannot fail: key length was validated in new().
        Hmac::<Sha256>::new_from_slice(&self.key_bytes)
            .expect("HMAC key length already validated")
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_length", &self.key_bytes.len())
            .finish_non_exhaustive()
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|err| {
        debug!("failed to encode token segment: {err}");
        TokenError::Malformed
    })?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(segment).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

/// Denylist key: the hash keeps raw tokens out of the store.
fn revocation_key(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();
    format!("revoked:{}", Base64UrlUnpadded::encode_string(&digest))
}

/// Issues, verifies and revokes signed bearer tokens.
pub struct TokenAuthority {
    key: SigningKey,
    config: TokenConfig,
    revocations: Arc<dyn CounterStore>,
    outage: FailurePolicy,
}

impl TokenAuthority {
    #[must_use]
    pub fn new(
        key: SigningKey,
        config: TokenConfig,
        revocations: Arc<dyn CounterStore>,
        outage: FailurePolicy,
    ) -> Self {
        Self {
            key,
            config,
            revocations,
            outage,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issues a token with the configured TTL for its type.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the claims cannot be encoded.
    pub fn issue_at(
        &self,
        subject: Uuid,
        kind: PrincipalKind,
        role: &str,
        token_type: TokenType,
        now_unix_seconds: i64,
    ) -> Result<String, TokenError> {
        let ttl = match token_type {
            TokenType::Access => self.config.access_ttl_seconds(),
            TokenType::Refresh => self.config.refresh_ttl_seconds(),
        };
        self.issue_with_ttl_at(subject, kind, role, token_type, ttl, now_unix_seconds)
    }

    /// Issues a token with an explicit TTL (remember-me refresh tokens).
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the claims cannot be encoded.
    pub fn issue_with_ttl_at(
        &self,
        subject: Uuid,
        kind: PrincipalKind,
        role: &str,
        token_type: TokenType,
        ttl_seconds: i64,
        now_unix_seconds: i64,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub: subject,
            kind,
            role: role.to_string(),
            iss: self.config.issuer().to_string(),
            iat: now_unix_seconds,
            exp: now_unix_seconds + ttl_seconds,
            typ: token_type,
            jti: Uuid::new_v4(),
        };
        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let claims_b64 = b64e_json(&claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.key.mac();
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    pub fn issue(
        &self,
        subject: Uuid,
        kind: PrincipalKind,
        role: &str,
        token_type: TokenType,
    ) -> Result<String, TokenError> {
        self.issue_at(subject, kind, role, token_type, Utc::now().timestamp())
    }

    /// Verifies a token string: shape and signature, then expiry, then type,
    /// then revocation status, cheapest checks first.
    ///
    /// # Errors
    ///
    /// `Malformed`, `Expired`, `WrongType` or `Revoked` per the failing
    /// check. A revocation-store outage applies the configured policy.
    pub async fn verify_at(
        &self,
        token: &str,
        expected_type: TokenType,
        now_unix_seconds: i64,
    ) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let claims_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let signature_b64 = parts.next().ok_or(TokenError::Malformed)?;
        if parts.next().is_some() {
            return Err(TokenError::Malformed);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != "HS256" {
            return Err(TokenError::Malformed);
        }

        let signature =
            Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| TokenError::Malformed)?;
        let mut mac = self.key.mac();
        mac.update(format!("{header_b64}.{claims_b64}").as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::Malformed)?;

        let claims: Claims = b64d_json(claims_b64)?;
        if claims.exp <= now_unix_seconds {
            return Err(TokenError::Expired);
        }
        if claims.typ != expected_type {
            return Err(TokenError::WrongType);
        }

        match self.revocations.flag_exists(&revocation_key(token)).await {
            Ok(true) => Err(TokenError::Revoked),
            Ok(false) => Ok(claims),
            Err(err) => match self.outage {
                FailurePolicy::FailClosed => {
                    warn!("revocation list unreachable, failing closed: {err}");
                    Err(TokenError::Revoked)
                }
                FailurePolicy::FailOpen => {
                    warn!("revocation list unreachable, failing open: {err}");
                    Ok(claims)
                }
            },
        }
    }

    pub async fn verify(
        &self,
        token: &str,
        expected_type: TokenType,
    ) -> Result<Claims, TokenError> {
        self.verify_at(token, expected_type, Utc::now().timestamp())
            .await
    }

    /// Adds the token to the denylist for its remaining lifetime.
    ///
    /// Unparseable or already-expired tokens are a no-op: they can never
    /// verify, so there is nothing to deny.
    ///
    /// # Errors
    ///
    /// Propagates a denylist write failure so the caller can decide whether
    /// the surrounding operation still counts as done.
    pub async fn revoke_at(&self, token: &str, now_unix_seconds: i64) -> Result<(), StoreError> {
        let Some(claims_b64) = token.split('.').nth(1) else {
            debug!("revoke called with malformed token; ignoring");
            return Ok(());
        };
        let Ok(claims) = b64d_json::<Claims>(claims_b64) else {
            debug!("revoke called with undecodable claims; ignoring");
            return Ok(());
        };
        let remaining = claims.exp - now_unix_seconds;
        if remaining <= 0 {
            return Ok(());
        }
        self.revocations
            .set_flag(
                &revocation_key(token),
                Duration::from_secs(remaining.unsigned_abs()),
            )
            .await
    }

    pub async fn revoke(&self, token: &str) -> Result<(), StoreError> {
        self.revoke_at(token, Utc::now().timestamp()).await
    }
}
