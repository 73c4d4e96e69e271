//! Access request and approval plan models.
//!
//! An [`AccessRequest`] moves through an ordered list of [`ApprovalStep`]
//! stages; each stage carries one or more parallel [`ApprovalPath`]s with
//! their own approver sets. The workflow engine owns every transition; the
//! types here only expose state and derived queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::str::FromStr;
use uuid::Uuid;

use super::models::{RiskLevel, RiskSeverity};

/// Lifecycle status of an access request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestStatus {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    Provisioning,
    Provisioned,
    Failed,
    Expired,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Draft => "draft",
            RequestStatus::PendingApproval => "pending_approval",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Provisioning => "provisioning",
            RequestStatus::Provisioned => "provisioned",
            RequestStatus::Failed => "failed",
            RequestStatus::Expired => "expired",
        }
    }

    /// Statuses out of which no further workflow action is legal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Rejected
                | RequestStatus::Provisioned
                | RequestStatus::Failed
                | RequestStatus::Expired
        )
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(RequestStatus::Draft),
            "pending_approval" => Ok(RequestStatus::PendingApproval),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            "provisioning" => Ok(RequestStatus::Provisioning),
            "provisioned" => Ok(RequestStatus::Provisioned),
            "failed" => Ok(RequestStatus::Failed),
            "expired" => Ok(RequestStatus::Expired),
            other => Err(format!("unknown request status {other}")),
        }
    }
}

/// What kind of change the request asks for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestType {
    NewAccess,
    ModifyAccess,
    RemoveAccess,
    RoleExtension,
    EmergencyAccess,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::NewAccess => "new_access",
            RequestType::ModifyAccess => "modify_access",
            RequestType::RemoveAccess => "remove_access",
            RequestType::RoleExtension => "role_extension",
            RequestType::EmergencyAccess => "emergency_access",
        }
    }
}

impl Default for RequestType {
    fn default() -> Self {
        RequestType::NewAccess
    }
}

impl FromStr for RequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new_access" => Ok(RequestType::NewAccess),
            "modify_access" => Ok(RequestType::ModifyAccess),
            "remove_access" => Ok(RequestType::RemoveAccess),
            "role_extension" => Ok(RequestType::RoleExtension),
            "emergency_access" => Ok(RequestType::EmergencyAccess),
            other => Err(format!("unknown request type {other}")),
        }
    }
}

/// Reference to a rule that fired during request risk analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViolationRef {
    pub rule_id: String,
    pub rule_name: String,
    pub severity: RiskSeverity,
    pub conflict_signature: String,
}

/// One requested role or entitlement.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestedAccess {
    pub access_type: String,
    pub access_name: String,
    #[serde(default)]
    pub access_description: String,
    pub system: String,
    pub is_temporary: bool,
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub risk_score: u32,
    #[serde(default)]
    pub violations: Vec<ViolationRef>,
}

/// How approvers for a step are resolved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApproverKind {
    DirectManager,
    DataOwner,
    RoleOwner,
    SecurityTeam,
    RiskTeam,
    ComplianceTeam,
    ItAdmin,
    SpecificUsers,
    CostCenterOwner,
}

impl ApproverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApproverKind::DirectManager => "direct_manager",
            ApproverKind::DataOwner => "data_owner",
            ApproverKind::RoleOwner => "role_owner",
            ApproverKind::SecurityTeam => "security_team",
            ApproverKind::RiskTeam => "risk_team",
            ApproverKind::ComplianceTeam => "compliance_team",
            ApproverKind::ItAdmin => "it_admin",
            ApproverKind::SpecificUsers => "specific_user",
            ApproverKind::CostCenterOwner => "cost_center_owner",
        }
    }
}

/// Actions an approver (or the SLA sweep) can take on a step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ApprovalAction {
    Approve,
    Reject,
    Delegate,
    Escalate,
    RequestInfo,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Approve => "approve",
            ApprovalAction::Reject => "reject",
            ApprovalAction::Delegate => "delegate",
            ApprovalAction::Escalate => "escalate",
            ApprovalAction::RequestInfo => "request_info",
        }
    }
}

/// Status of a step or path.
///
/// `Delegated` and `Escalated` are transient wire statuses kept for
/// compatibility; delegation leaves a path `Pending` with a rewritten
/// approver set, and escalation appends approvers without changing status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
    Delegated,
    Escalated,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Approved => "approved",
            StepStatus::Rejected => "rejected",
            StepStatus::Delegated => "delegated",
            StepStatus::Escalated => "escalated",
        }
    }

    /// A step or path is terminal iff it is Approved or Rejected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Approved | StepStatus::Rejected)
    }
}

/// A recorded action on a path: who did what, when, with which comments.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAction {
    pub actor_id: String,
    pub action: ApprovalAction,
    #[serde(default)]
    pub comments: Option<String>,
    pub at: DateTime<Utc>,
}

/// One parallel path within a stage: its own approver set, its own
/// `require_all` quorum, and its own `required` weight for stage
/// advancement.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPath {
    pub path_id: Uuid,
    pub name: String,
    pub approver_kind: ApproverKind,
    pub approver_ids: Vec<String>,
    /// All approvers must approve (vs. any one).
    pub require_all: bool,
    /// The stage cannot advance until this path approves; rejection on a
    /// required path is terminal for the request.
    pub required: bool,
    pub status: StepStatus,
    #[serde(default)]
    pub actions: Vec<StepAction>,
    #[serde(default)]
    pub delegated_to: Option<String>,
    #[serde(default)]
    pub delegated_by: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
}

impl ApprovalPath {
    pub fn new(name: impl Into<String>, approver_kind: ApproverKind, approvers: Vec<String>) -> Self {
        Self {
            path_id: Uuid::new_v4(),
            name: name.into(),
            approver_kind,
            approver_ids: approvers,
            require_all: false,
            required: true,
            status: StepStatus::Pending,
            actions: Vec::new(),
            delegated_to: None,
            delegated_by: None,
            comments: None,
        }
    }

    /// Whether the actor may act on this path (resolved approver or the
    /// delegation target).
    pub fn is_approver(&self, actor_id: &str) -> bool {
        self.approver_ids.iter().any(|a| a == actor_id)
            || self.delegated_to.as_deref() == Some(actor_id)
    }

    /// Approvers that have already approved (partial quorum under
    /// `require_all`).
    pub fn approved_by(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|a| a.action == ApprovalAction::Approve)
            .map(|a| a.actor_id.as_str())
            .collect()
    }
}

/// A stage in the approval plan, made of one or more parallel paths.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub step_id: Uuid,
    pub step_number: u32,
    pub name: String,
    pub paths: Vec<ApprovalPath>,
    pub status: StepStatus,
    pub sla_hours: u32,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub escalation_triggered: bool,
}

impl ApprovalStep {
    pub fn new(step_number: u32, name: impl Into<String>, sla_hours: u32) -> Self {
        Self {
            step_id: Uuid::new_v4(),
            step_number,
            name: name.into(),
            paths: Vec::new(),
            status: StepStatus::Pending,
            sla_hours,
            due_at: None,
            escalation_triggered: false,
        }
    }

    /// Overdue iff still pending past its due time.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == StepStatus::Pending
            && self.due_at.map(|due| now > due).unwrap_or(false)
    }

    /// All approvers across pending paths, plus delegation targets.
    pub fn pending_approvers(&self) -> Vec<String> {
        let mut approvers = Vec::new();
        for path in &self.paths {
            if path.status != StepStatus::Pending {
                continue;
            }
            for approver in &path.approver_ids {
                if !approvers.contains(approver) {
                    approvers.push(approver.clone());
                }
            }
            if let Some(delegate) = &path.delegated_to {
                if !approvers.contains(delegate) {
                    approvers.push(delegate.clone());
                }
            }
        }
        approvers
    }

    /// Recompute the stage status from its paths: approved once every
    /// required path approved, rejected once any required path rejected.
    /// A stage without required paths is vacuously approved, so an
    /// all-optional stage advances on its first path action instead of
    /// pending forever.
    pub fn derive_status(&self) -> StepStatus {
        if self
            .paths
            .iter()
            .any(|p| p.required && p.status == StepStatus::Rejected)
        {
            return StepStatus::Rejected;
        }
        let required_done = self
            .paths
            .iter()
            .filter(|p| p.required)
            .all(|p| p.status == StepStatus::Approved);
        if required_done {
            StepStatus::Approved
        } else {
            StepStatus::Pending
        }
    }
}

/// The workflow entity: one request to change a user's access.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub request_id: Uuid,
    pub request_type: RequestType,
    pub status: RequestStatus,

    pub requester_user_id: String,
    pub requester_name: String,
    pub requester_email: String,
    pub target_user_id: String,
    pub target_user_name: String,
    #[serde(default)]
    pub target_user_email: Option<String>,
    #[serde(default)]
    pub target_user_department: Option<String>,

    pub requested_items: Vec<RequestedAccess>,
    pub business_justification: String,
    #[serde(default)]
    pub ticket_reference: Option<String>,

    pub is_temporary: bool,
    #[serde(default)]
    pub requested_end_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub overall_risk_score: u32,
    #[serde(default = "low_level")]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub sod_violations: Vec<ViolationRef>,
    #[serde(default)]
    pub sensitive_access_flags: Vec<ViolationRef>,

    #[serde(default)]
    pub approval_steps: Vec<ApprovalStep>,
    /// Index of the stage currently awaiting action; equals
    /// `approval_steps.len()` once every stage approved.
    #[serde(default)]
    pub current_step: usize,

    #[serde(default)]
    pub final_decision: Option<String>,
    #[serde(default)]
    pub final_decision_by: Option<String>,
    #[serde(default)]
    pub final_decision_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rejection_reason: Option<String>,

    #[serde(default)]
    pub provisioning_errors: Vec<String>,
    #[serde(default)]
    pub access_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiry_notification_sent: bool,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub provisioned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
}

fn low_level() -> RiskLevel {
    RiskLevel::Low
}

impl AccessRequest {
    /// The stage currently awaiting action, if any.
    pub fn current_stage(&self) -> Option<&ApprovalStep> {
        self.approval_steps.get(self.current_step)
    }

    /// True once the cursor has moved past the final stage and every stage
    /// approved.
    pub fn is_fully_approved(&self) -> bool {
        !self.approval_steps.is_empty()
            && self.current_step >= self.approval_steps.len()
            && self
                .approval_steps
                .iter()
                .all(|s| s.status == StepStatus::Approved)
    }

    /// Approvers who can act right now.
    pub fn current_approvers(&self) -> Vec<String> {
        self.current_stage()
            .map(|s| s.pending_approvers())
            .unwrap_or_default()
    }

    pub fn find_step(&self, step_id: Uuid) -> Option<(usize, &ApprovalStep)> {
        self.approval_steps
            .iter()
            .enumerate()
            .find(|(_, s)| s.step_id == step_id)
    }
}
