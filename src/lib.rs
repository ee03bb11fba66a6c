//! warden: multi-tenant security core.
//!
//! Five cooperating components behind one composition root:
//!
//! - [`token::TokenAuthority`] issues, verifies and revokes signed bearer
//!   tokens (short-lived access, long-lived refresh).
//! - [`session::SessionStore`] keeps the durable record behind each refresh
//!   token, storing only the token's hash.
//! - [`lockout::LoginGuard`] locks an account for thirty minutes after five
//!   failed logins, with lazy unlock.
//! - [`rate_limit::RateLimiter`] enforces minute/hour/day ceilings with
//!   spend-then-check accounting.
//! - [`threat::ThreatMonitor`] scans requests for attack signatures, tracks
//!   per-source volume, raises alerts and auto-blocks repeat offenders.
//!
//! [`gateway::SecurityCore`] wires them together and owns the request
//! pipeline ordering. Storage is pluggable: in-process maps for single
//! instances and tests, `PostgreSQL` for shared deployments; every component
//! names what it does when its store is unreachable (fail open for traffic
//! shaping, fail closed for credentials).
//!
//! Principal accounts, the audit trail and notification delivery live
//! outside the core; [`external`] defines those boundaries as traits.

pub mod config;
pub mod error;
pub mod external;
pub mod gateway;
pub mod lockout;
pub mod rate_limit;
pub mod session;
pub mod store;
pub mod threat;
pub mod token;

pub use config::{
    FailurePolicy, LockoutPolicy, OutagePolicy, RateLimitTiers, ThreatConfig, TokenConfig,
};
pub use error::{
    AlertError, AuthError, CoreError, RateLimitError, SessionError, StoreError, ThreatError,
    TokenError,
};
pub use gateway::{LoginOutcome, SecurityCore, TokenPair};
pub use lockout::LoginGuard;
pub use rate_limit::{RateLimiter, Window};
pub use session::{Session, SessionStore};
pub use threat::{
    AlertStatus, RequestMeta, SecurityAlert, Severity, ThreatCategory, ThreatMonitor,
};
pub use token::{Claims, SigningKey, SigningKeyError, TokenAuthority, TokenType};
