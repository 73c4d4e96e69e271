//! Governance events emitted by the engines.
//!
//! Events are handed to the external persistence collaborator through the
//! [`crate::infrastructure::connectors::AuditSink`] trait; the core never
//! blocks on them.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Actor recorded when a sweep or the engine itself performs an action.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// What happened.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum EventKind {
    RequestCreated,
    RequestSubmitted,
    StepActioned,
    RequestApproved,
    RequestRejected,
    RequestProvisioned,
    RequestExpired,
    ViolationDetected,
    CampaignStarted,
    ItemDecided,
    CampaignCompleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RequestCreated => "request_created",
            EventKind::RequestSubmitted => "request_submitted",
            EventKind::StepActioned => "step_actioned",
            EventKind::RequestApproved => "request_approved",
            EventKind::RequestRejected => "request_rejected",
            EventKind::RequestProvisioned => "request_provisioned",
            EventKind::RequestExpired => "request_expired",
            EventKind::ViolationDetected => "violation_detected",
            EventKind::CampaignStarted => "campaign_started",
            EventKind::ItemDecided => "item_decided",
            EventKind::CampaignCompleted => "campaign_completed",
        }
    }
}

/// One emitted event: entity id, UTC timestamp, actor, and a compact delta.
#[derive(Debug, Clone, Serialize)]
pub struct GovernanceEvent {
    pub kind: EventKind,
    pub entity_id: String,
    pub actor: String,
    pub at: DateTime<Utc>,
    pub delta: serde_json::Value,
}

impl GovernanceEvent {
    pub fn new(
        kind: EventKind,
        entity_id: impl Into<String>,
        actor: impl Into<String>,
        at: DateTime<Utc>,
        delta: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
            actor: actor.into(),
            at,
            delta,
        }
    }

    pub fn system(
        kind: EventKind,
        entity_id: impl Into<String>,
        at: DateTime<Utc>,
        delta: serde_json::Value,
    ) -> Self {
        Self::new(kind, entity_id, SYSTEM_ACTOR, at, delta)
    }
}
