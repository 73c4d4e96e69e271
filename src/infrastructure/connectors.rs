//! Capability contracts toward external collaborators.
//!
//! The core consumes an entitlement source, a user resolver, a notifier,
//! a provisioner, a clock, and an audit sink. Implementations may be
//! mocked (see [`super::mock`]), database-backed, or proxied to a remote
//! system; the engines only ever see these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::domain::events::GovernanceEvent;
use crate::domain::models::Entitlement;
use crate::domain::request::RequestedAccess;
use crate::infrastructure::config::RetryConfig;

/// Failure classification for external calls.
///
/// Transient failures are eligible for bounded retry; permanent failures
/// surface immediately.
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    #[error("transient connector failure: {0}")]
    Transient(String),
    #[error("permanent connector failure: {0}")]
    Permanent(String),
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Filter for enumerating users in scope of an evaluation or campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserScopeFilter {
    pub systems: Vec<String>,
    pub departments: Vec<String>,
}

/// A role assignment as reported by the entitlement source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantedRole {
    pub role_id: String,
    pub role_name: String,
    pub system: String,
    pub granted_at: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub usage_count: u64,
}

/// Availability of a pre-provisioned emergency-access identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirefighterAvailability {
    pub firefighter_id: String,
    pub available: bool,
    pub locked: bool,
    pub valid_to: Option<DateTime<Utc>>,
    pub owner: Option<String>,
}

/// Query interface over the connected identity/ERP landscape.
#[async_trait]
pub trait EntitlementSource: Send + Sync {
    async fn users_in_scope(&self, filter: &UserScopeFilter) -> ConnectorResult<Vec<String>>;

    async fn entitlements_of(&self, user_id: &str) -> ConnectorResult<Vec<Entitlement>>;

    async fn roles_of(&self, user_id: &str) -> ConnectorResult<Vec<GrantedRole>>;

    async fn check_firefighter_availability(
        &self,
        firefighter_id: &str,
    ) -> ConnectorResult<FirefighterAvailability>;
}

/// Resolves organizational relationships around a user.
///
/// A lookup that finds nothing yields `Ok(None)`; the workflow engine then
/// applies its skip/fail policy for the affected step.
#[async_trait]
pub trait UserResolver: Send + Sync {
    async fn manager_of(&self, user_id: &str) -> ConnectorResult<Option<String>>;

    async fn email_of(&self, user_id: &str) -> ConnectorResult<Option<String>>;

    async fn name_of(&self, user_id: &str) -> ConnectorResult<Option<String>>;

    async fn role_owner_of(&self, role_id: &str) -> ConnectorResult<Option<String>>;

    async fn data_owner_of(&self, system: &str) -> ConnectorResult<Option<String>>;

    async fn cost_center_owner_of(&self, cost_center: &str) -> ConnectorResult<Option<String>>;
}

/// Fire-and-log notification transport. The core never blocks a state
/// transition on notification success.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> ConnectorResult<()>;
}

/// Provisioning commands toward the target system. Expected idempotent on
/// the request id.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(
        &self,
        request_id: Uuid,
        items: &[RequestedAccess],
    ) -> ConnectorResult<()>;

    async fn revoke(&self, request_id: Uuid) -> ConnectorResult<()>;
}

/// Time source. All time-based predicates in the core go through this.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used outside of tests.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Receives governance events for external persistence. Recording must be
/// cheap and must never fail the calling transition.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: GovernanceEvent);
}

/// Discards every event. Default sink when no persistence is wired.
#[derive(Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: GovernanceEvent) {}
}

/// Buffers events in memory for inspection.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: RwLock<Vec<GovernanceEvent>>,
}

impl MemoryAuditSink {
    pub fn events(&self) -> Vec<GovernanceEvent> {
        self.events.read().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: GovernanceEvent) {
        self.events.write().push(event);
    }
}

/// Runs an external call with bounded exponential backoff plus jitter on
/// transient failures. Permanent failures surface immediately.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    operation: &str,
    mut call: F,
) -> ConnectorResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ConnectorResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(ConnectorError::Transient(message)) => {
                attempt += 1;
                if attempt >= policy.max_attempts.max(1) {
                    return Err(ConnectorError::Transient(message));
                }
                let exponential = policy
                    .base_delay_ms
                    .saturating_mul(1u64 << (attempt - 1).min(16));
                let capped = exponential.min(policy.max_delay_ms).max(1);
                let jitter = rand::thread_rng().gen_range(0..=capped / 2);
                let delay = capped / 2 + jitter;
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay,
                    error = %message,
                    "transient connector failure, retrying"
                );
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            Err(permanent) => return Err(permanent),
        }
    }
}
