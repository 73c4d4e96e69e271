//! Approval workflow engine.
//!
//! Three concerns live here: generating an approval plan from typed
//! approval rules, driving the multi-stage multi-path state machine, and
//! SLA tracking with escalation. Plan generation consults the injected
//! [`UserResolver`] and therefore suspends; every state transition is
//! synchronous over in-memory state and returns the notifications to send
//! after the transition has committed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use regex::Regex;
use tracing::warn;
use uuid::Uuid;

use crate::domain::models::RiskLevel;
use crate::domain::request::{
    AccessRequest, ApprovalAction, ApprovalPath, ApprovalStep, ApproverKind, RequestStatus,
    RequestType, StepAction, StepStatus,
};
use crate::infrastructure::config::WorkflowConfig;
use crate::infrastructure::connectors::{Clock, UserResolver};

use super::errors::{ServiceError, ServiceResult};

/// A notification queued by a transition; the coordinator dispatches it
/// once the transition has committed.
#[derive(Debug, Clone)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// A role pattern compiled at load time. Globs use `*` and `?`; a pattern
/// that does not compile fails rule construction.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub pattern: String,
    regex: Regex,
}

impl CompiledPattern {
    pub fn compile(pattern: &str) -> ServiceResult<Self> {
        let mut translated = String::with_capacity(pattern.len() + 8);
        translated.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => translated.push_str(".*"),
                '?' => translated.push('.'),
                other => translated.push_str(&regex::escape(&other.to_string())),
            }
        }
        translated.push('$');
        let regex = Regex::new(&translated).map_err(|err| {
            ServiceError::Fatal(format!("invalid role pattern {pattern}: {err}"))
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }
}

/// One predicate over a request. An approval rule holds iff every one of
/// its conditions holds.
#[derive(Debug, Clone)]
pub enum ApprovalCondition {
    RiskLevelIn(Vec<RiskLevel>),
    HasSodViolations(bool),
    RequestTypeIn(Vec<RequestType>),
    MinRiskScore(u32),
    MaxRiskScore(u32),
    TargetSystemIn(Vec<String>),
    RolePatternMatch(Vec<CompiledPattern>),
    IsTemporary(bool),
    DepartmentIn(Vec<String>),
}

impl ApprovalCondition {
    /// Convenience constructor compiling glob patterns.
    pub fn role_patterns(patterns: &[&str]) -> ServiceResult<Self> {
        let compiled: ServiceResult<Vec<CompiledPattern>> =
            patterns.iter().map(|p| CompiledPattern::compile(p)).collect();
        Ok(ApprovalCondition::RolePatternMatch(compiled?))
    }

    fn holds(&self, request: &AccessRequest) -> bool {
        match self {
            ApprovalCondition::RiskLevelIn(levels) => levels.contains(&request.risk_level),
            ApprovalCondition::HasSodViolations(expected) => {
                (!request.sod_violations.is_empty()) == *expected
            }
            ApprovalCondition::RequestTypeIn(types) => types.contains(&request.request_type),
            ApprovalCondition::MinRiskScore(min) => request.overall_risk_score >= *min,
            ApprovalCondition::MaxRiskScore(max) => request.overall_risk_score <= *max,
            ApprovalCondition::TargetSystemIn(systems) => request
                .requested_items
                .iter()
                .any(|item| systems.contains(&item.system)),
            ApprovalCondition::RolePatternMatch(patterns) => {
                request.requested_items.iter().any(|item| {
                    patterns.iter().any(|p| p.matches(&item.access_name))
                })
            }
            ApprovalCondition::IsTemporary(expected) => request.is_temporary == *expected,
            ApprovalCondition::DepartmentIn(departments) => request
                .target_user_department
                .as_deref()
                .map(|d| departments.iter().any(|x| x == d))
                .unwrap_or(false),
        }
    }
}

/// Binds a predicate over the request to an approval step template.
#[derive(Debug, Clone)]
pub struct ApprovalRule {
    pub rule_id: String,
    pub name: String,
    pub description: String,
    pub conditions: Vec<ApprovalCondition>,
    pub approver_kind: ApproverKind,
    /// Pinned approvers; bypasses the resolver when non-empty.
    pub specific_approvers: Vec<String>,
    pub step_name: String,
    pub sla_hours: u32,
    /// All resolved approvers must approve (vs. any one).
    pub require_all: bool,
    /// Path weight inside its stage: required paths gate advancement.
    pub required: bool,
    /// Skip the step entirely when the requester is among the approvers.
    pub can_skip_if_self: bool,
    /// An empty approver resolution fails plan generation instead of
    /// skipping the step.
    pub required_step: bool,
    /// Lower priorities are evaluated first.
    pub priority: i32,
    /// Rules sharing a stage group merge into one stage as parallel paths.
    pub stage_group: Option<String>,
    pub enabled: bool,
}

impl Default for ApprovalRule {
    fn default() -> Self {
        Self {
            rule_id: String::new(),
            name: String::new(),
            description: String::new(),
            conditions: Vec::new(),
            approver_kind: ApproverKind::DirectManager,
            specific_approvers: Vec::new(),
            step_name: String::new(),
            sla_hours: 48,
            require_all: false,
            required: true,
            can_skip_if_self: false,
            required_step: false,
            priority: 100,
            stage_group: None,
            enabled: true,
        }
    }
}

impl ApprovalRule {
    pub fn matches(&self, request: &AccessRequest) -> bool {
        self.enabled && self.conditions.iter().all(|c| c.holds(request))
    }
}

/// Named approver groups supplied by external catalogs.
#[derive(Debug, Clone, Default)]
pub struct ApproverDirectory {
    pub security_team: Vec<String>,
    pub risk_team: Vec<String>,
    pub compliance_team: Vec<String>,
    pub it_admin: Vec<String>,
}

/// Outcome of one committed step action.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub status: RequestStatus,
    pub notifications: Vec<Notification>,
    /// True when the action was an idempotent duplicate and nothing
    /// changed.
    pub idempotent: bool,
}

impl ActionOutcome {
    fn noop(status: RequestStatus) -> Self {
        Self {
            status,
            notifications: Vec::new(),
            idempotent: true,
        }
    }
}

/// A pending approval from one approver's point of view.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub request_id: Uuid,
    pub step_id: Uuid,
    pub step_name: String,
    pub requester_name: String,
    pub target_user_id: String,
    pub risk_level: RiskLevel,
    pub is_overdue: bool,
    pub due_at: Option<DateTime<Utc>>,
    pub days_pending: i64,
}

/// Drives approval plans through the multi-stage multi-path state machine.
pub struct WorkflowEngine {
    rules: RwLock<Vec<ApprovalRule>>,
    config: WorkflowConfig,
    resolver: Arc<dyn UserResolver>,
    directory: ApproverDirectory,
    clock: Arc<dyn Clock>,
}

impl WorkflowEngine {
    pub fn new(
        config: WorkflowConfig,
        resolver: Arc<dyn UserResolver>,
        clock: Arc<dyn Clock>,
        directory: ApproverDirectory,
    ) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            config,
            resolver,
            directory,
            clock,
        }
    }

    /// Engine pre-loaded with the default risk-driven approval rules.
    pub fn with_default_rules(
        config: WorkflowConfig,
        resolver: Arc<dyn UserResolver>,
        clock: Arc<dyn Clock>,
        directory: ApproverDirectory,
    ) -> ServiceResult<Self> {
        let engine = Self::new(config, resolver, clock, directory);
        for rule in default_approval_rules()? {
            engine.add_rule(rule);
        }
        Ok(engine)
    }

    pub fn add_rule(&self, rule: ApprovalRule) {
        let mut rules = self.rules.write();
        rules.retain(|r| r.rule_id != rule.rule_id);
        rules.push(rule);
        rules.sort_by_key(|r| r.priority);
    }

    pub fn remove_rule(&self, rule_id: &str) {
        self.rules.write().retain(|r| r.rule_id != rule_id);
    }

    pub fn rules(&self) -> Vec<ApprovalRule> {
        self.rules.read().clone()
    }

    // -----------------------------------------------------------------
    // Plan generation
    // -----------------------------------------------------------------

    /// Generates the approval plan for a fully risk-scored request.
    ///
    /// Pure given (rules, request, resolver responses) modulo freshly
    /// minted step ids and due timestamps. Optional steps that resolve no
    /// approvers are skipped with a warning; required steps that resolve
    /// empty fail the plan.
    pub async fn generate_plan(&self, request: &AccessRequest) -> ServiceResult<Vec<ApprovalStep>> {
        let now = self.clock.now();
        let rules = self.rules.read().clone();
        let mut steps: Vec<ApprovalStep> = Vec::new();
        let mut group_index: HashMap<String, usize> = HashMap::new();

        for rule in rules.iter().filter(|r| r.matches(request)) {
            let approvers = self.resolve_approvers(request, rule).await?;
            if approvers.is_empty() {
                if rule.required_step {
                    return Err(ServiceError::Fatal(format!(
                        "required approval step '{}' resolved no approvers for request {}",
                        rule.step_name, request.request_id
                    )));
                }
                warn!(
                    rule_id = %rule.rule_id,
                    request_id = %request.request_id,
                    "no approvers resolved, skipping approval step"
                );
                continue;
            }
            if rule.can_skip_if_self && approvers.contains(&request.requester_user_id) {
                continue;
            }

            let mut path =
                ApprovalPath::new(rule.step_name.clone(), rule.approver_kind, approvers);
            path.require_all = rule.require_all;
            path.required = rule.required;

            if let Some(group) = &rule.stage_group {
                if let Some(&index) = group_index.get(group) {
                    steps[index].paths.push(path);
                    continue;
                }
            }

            if steps.len() >= self.config.max_approval_levels {
                warn!(
                    request_id = %request.request_id,
                    max = self.config.max_approval_levels,
                    "maximum approval levels reached, truncating plan"
                );
                break;
            }

            let mut step =
                ApprovalStep::new(steps.len() as u32 + 1, rule.step_name.clone(), rule.sla_hours);
            if let Some(group) = &rule.stage_group {
                group_index.insert(group.clone(), steps.len());
                step.name = group.clone();
            }
            step.paths.push(path);
            steps.push(step);
        }

        if steps.is_empty() && self.config.require_manager_approval {
            let manager = self
                .resolver
                .manager_of(&request.target_user_id)
                .await
                .map_err(ServiceError::from)?;
            let Some(manager) = manager else {
                return Err(ServiceError::Fatal(format!(
                    "no manager resolvable for target user {}",
                    request.target_user_id
                )));
            };
            let mut step = ApprovalStep::new(1, "Manager Approval", self.config.default_sla_hours);
            step.paths.push(ApprovalPath::new(
                "Manager Approval",
                ApproverKind::DirectManager,
                vec![manager],
            ));
            steps.push(step);
        }

        for step in &mut steps {
            step.due_at = Some(now + Duration::hours(i64::from(step.sla_hours)));
        }

        Ok(steps)
    }

    async fn resolve_approvers(
        &self,
        request: &AccessRequest,
        rule: &ApprovalRule,
    ) -> ServiceResult<Vec<String>> {
        if !rule.specific_approvers.is_empty() {
            return Ok(rule.specific_approvers.clone());
        }

        let mut approvers: Vec<String> = Vec::new();
        let mut push = |approver: Option<String>, list: &mut Vec<String>| {
            if let Some(approver) = approver {
                if !list.contains(&approver) {
                    list.push(approver);
                }
            }
        };

        match rule.approver_kind {
            ApproverKind::DirectManager => {
                let manager = self.resolver.manager_of(&request.target_user_id).await?;
                push(manager, &mut approvers);
            }
            ApproverKind::RoleOwner => {
                for item in &request.requested_items {
                    let owner = self.resolver.role_owner_of(&item.access_name).await?;
                    push(owner, &mut approvers);
                }
            }
            ApproverKind::DataOwner => {
                for item in &request.requested_items {
                    let owner = self.resolver.data_owner_of(&item.system).await?;
                    push(owner, &mut approvers);
                }
            }
            ApproverKind::CostCenterOwner => {
                let key = request.target_user_department.clone().unwrap_or_default();
                let owner = self.resolver.cost_center_owner_of(&key).await?;
                push(owner, &mut approvers);
            }
            ApproverKind::SecurityTeam => approvers = self.directory.security_team.clone(),
            ApproverKind::RiskTeam => approvers = self.directory.risk_team.clone(),
            ApproverKind::ComplianceTeam => approvers = self.directory.compliance_team.clone(),
            ApproverKind::ItAdmin => approvers = self.directory.it_admin.clone(),
            ApproverKind::SpecificUsers => {}
        }

        Ok(approvers)
    }

    // -----------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------

    /// Submits a draft request with a generated plan. Returns the
    /// notifications for the first stage.
    pub fn submit(
        &self,
        request: &mut AccessRequest,
        plan: Vec<ApprovalStep>,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<Notification>> {
        if request.status != RequestStatus::Draft {
            return Err(ServiceError::State(format!(
                "request {} is not in draft (status: {})",
                request.request_id,
                request.status.as_str()
            )));
        }
        if plan.is_empty() {
            return Err(ServiceError::State(format!(
                "request {} has an empty approval plan",
                request.request_id
            )));
        }
        request.approval_steps = plan;
        request.current_step = 0;
        request.status = RequestStatus::PendingApproval;
        request.submitted_at = Some(now);
        request.last_updated_at = now;
        Ok(self.stage_notifications(request, 0))
    }

    /// Applies one approver action against the latest state. Validation
    /// failures never mutate the request; a committed action returns the
    /// notifications to dispatch afterwards.
    pub fn apply_action(
        &self,
        request: &mut AccessRequest,
        step_id: Uuid,
        action: ApprovalAction,
        actor_id: &str,
        comments: Option<&str>,
        delegate_to: Option<&str>,
        now: DateTime<Utc>,
    ) -> ServiceResult<ActionOutcome> {
        if request.status != RequestStatus::PendingApproval {
            return Err(ServiceError::State(format!(
                "request {} is not pending approval (status: {})",
                request.request_id,
                request.status.as_str()
            )));
        }
        let Some((step_index, _)) = request.find_step(step_id) else {
            return Err(ServiceError::not_found("approval step", step_id.to_string()));
        };
        if step_index != request.current_step {
            return Err(ServiceError::State(format!(
                "step '{}' is not the current stage of request {}",
                request.approval_steps[step_index].name, request.request_id
            )));
        }
        if action == ApprovalAction::Escalate {
            return Err(ServiceError::State(
                "escalation is driven by the SLA sweep, not by step actions".to_string(),
            ));
        }

        let step = &request.approval_steps[step_index];
        let path_index = step
            .paths
            .iter()
            .position(|p| p.status == StepStatus::Pending && p.is_approver(actor_id));
        let Some(path_index) = path_index else {
            if step.paths.iter().any(|p| p.is_approver(actor_id)) {
                return Err(ServiceError::State(format!(
                    "approval path for {actor_id} on step '{}' is already terminal",
                    step.name
                )));
            }
            return Err(ServiceError::PermissionDenied(format!(
                "user {actor_id} is not an approver for step '{}'",
                step.name
            )));
        };

        match action {
            ApprovalAction::Approve => {
                self.apply_approve(request, step_index, path_index, actor_id, comments, now)
            }
            ApprovalAction::Reject => {
                self.apply_reject(request, step_index, path_index, actor_id, comments, now)
            }
            ApprovalAction::Delegate => self.apply_delegate(
                request,
                step_index,
                path_index,
                actor_id,
                comments,
                delegate_to,
                now,
            ),
            ApprovalAction::RequestInfo => {
                self.apply_request_info(request, step_index, path_index, actor_id, comments, now)
            }
            ApprovalAction::Escalate => unreachable!("rejected above"),
        }
    }

    fn apply_approve(
        &self,
        request: &mut AccessRequest,
        step_index: usize,
        path_index: usize,
        actor_id: &str,
        comments: Option<&str>,
        now: DateTime<Utc>,
    ) -> ServiceResult<ActionOutcome> {
        let stage_approved = {
            let step = &mut request.approval_steps[step_index];
            let path = &mut step.paths[path_index];

            if path.require_all && path.approved_by().contains(&actor_id) {
                return Ok(ActionOutcome::noop(request.status));
            }

            path.actions.push(StepAction {
                actor_id: actor_id.to_string(),
                action: ApprovalAction::Approve,
                comments: comments.map(str::to_string),
                at: now,
            });

            let quorum_met = if path.require_all {
                let approved = path.approved_by();
                path.approver_ids
                    .iter()
                    .all(|approver| approved.contains(&approver.as_str()))
            } else {
                true
            };
            if quorum_met {
                path.status = StepStatus::Approved;
            }
            step.status = step.derive_status();
            step.status == StepStatus::Approved
        };

        let mut notifications = Vec::new();
        if stage_approved {
            notifications = self.advance_stage(request, step_index, actor_id, now);
        }
        request.last_updated_at = now;

        Ok(ActionOutcome {
            status: request.status,
            notifications,
            idempotent: false,
        })
    }

    /// Moves the cursor past an approved stage: either the next stage is
    /// notified or the request becomes Approved.
    fn advance_stage(
        &self,
        request: &mut AccessRequest,
        step_index: usize,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<Notification> {
        request.current_step = step_index + 1;
        if request.current_step >= request.approval_steps.len() {
            request.status = RequestStatus::Approved;
            request.final_decision = Some("approved".to_string());
            request.final_decision_by = Some(actor_id.to_string());
            request.final_decision_at = Some(now);
            vec![Notification {
                recipient: request.requester_email.clone(),
                subject: format!("Access request {} fully approved", request.request_id),
                body: format!(
                    "Access request for {} has been fully approved and will be provisioned.",
                    request.target_user_name
                ),
            }]
        } else {
            self.stage_notifications(request, request.current_step)
        }
    }

    fn apply_reject(
        &self,
        request: &mut AccessRequest,
        step_index: usize,
        path_index: usize,
        actor_id: &str,
        comments: Option<&str>,
        now: DateTime<Utc>,
    ) -> ServiceResult<ActionOutcome> {
        let (path_required, stage_status) = {
            let step = &mut request.approval_steps[step_index];
            let path = &mut step.paths[path_index];
            path.actions.push(StepAction {
                actor_id: actor_id.to_string(),
                action: ApprovalAction::Reject,
                comments: comments.map(str::to_string),
                at: now,
            });
            path.status = StepStatus::Rejected;
            path.comments = comments.map(str::to_string);
            let required = path.required;
            step.status = step.derive_status();
            (required, step.status)
        };

        let mut notifications = Vec::new();
        if path_required {
            request.status = RequestStatus::Rejected;
            request.final_decision = Some("rejected".to_string());
            request.final_decision_by = Some(actor_id.to_string());
            request.final_decision_at = Some(now);
            request.rejection_reason = comments.map(str::to_string);
            notifications.push(Notification {
                recipient: request.requester_email.clone(),
                subject: format!("Access request {} rejected", request.request_id),
                body: format!(
                    "Your request was rejected. Reason: {}",
                    comments.unwrap_or("not stated")
                ),
            });
        } else if stage_status == StepStatus::Approved {
            // A non-required path closed while every required path had
            // already approved.
            notifications = self.advance_stage(request, step_index, actor_id, now);
        }
        request.last_updated_at = now;

        Ok(ActionOutcome {
            status: request.status,
            notifications,
            idempotent: false,
        })
    }

    fn apply_delegate(
        &self,
        request: &mut AccessRequest,
        step_index: usize,
        path_index: usize,
        actor_id: &str,
        comments: Option<&str>,
        delegate_to: Option<&str>,
        now: DateTime<Utc>,
    ) -> ServiceResult<ActionOutcome> {
        let Some(delegate) = delegate_to.filter(|d| !d.is_empty()) else {
            return Err(ServiceError::Validation(
                "delegation requires a delegate target".to_string(),
            ));
        };

        let step_name = {
            let step = &mut request.approval_steps[step_index];
            let path = &mut step.paths[path_index];
            path.actions.push(StepAction {
                actor_id: actor_id.to_string(),
                action: ApprovalAction::Delegate,
                comments: comments.map(str::to_string),
                at: now,
            });
            // Single reassignment: the path stays pending for the new
            // approver.
            path.approver_ids = vec![delegate.to_string()];
            path.delegated_to = Some(delegate.to_string());
            path.delegated_by = Some(actor_id.to_string());
            path.status = StepStatus::Pending;
            step.name.clone()
        };
        request.last_updated_at = now;

        Ok(ActionOutcome {
            status: request.status,
            notifications: vec![Notification {
                recipient: delegate.to_string(),
                subject: format!(
                    "Approval delegated to you: access request {}",
                    request.request_id
                ),
                body: format!(
                    "{actor_id} delegated the step '{step_name}' to you. Please review and take action."
                ),
            }],
            idempotent: false,
        })
    }

    fn apply_request_info(
        &self,
        request: &mut AccessRequest,
        step_index: usize,
        path_index: usize,
        actor_id: &str,
        comments: Option<&str>,
        now: DateTime<Utc>,
    ) -> ServiceResult<ActionOutcome> {
        {
            let step = &mut request.approval_steps[step_index];
            let path = &mut step.paths[path_index];
            path.actions.push(StepAction {
                actor_id: actor_id.to_string(),
                action: ApprovalAction::RequestInfo,
                comments: comments.map(str::to_string),
                at: now,
            });
            path.comments = Some(format!("[INFO REQUESTED] {}", comments.unwrap_or("")));
        }
        request.last_updated_at = now;

        Ok(ActionOutcome {
            status: request.status,
            notifications: vec![Notification {
                recipient: request.requester_email.clone(),
                subject: format!(
                    "Information requested on access request {}",
                    request.request_id
                ),
                body: format!(
                    "{actor_id} requested additional information: {}",
                    comments.unwrap_or("")
                ),
            }],
            idempotent: false,
        })
    }

    // -----------------------------------------------------------------
    // SLA and escalation
    // -----------------------------------------------------------------

    /// Overdue, not-yet-escalated stages of a pending request, paired with
    /// the first approver of the first pending path (whose manager is the
    /// escalation target).
    pub fn overdue_steps(
        &self,
        request: &AccessRequest,
        now: DateTime<Utc>,
    ) -> Vec<(Uuid, Option<String>)> {
        if request.status != RequestStatus::PendingApproval {
            return Vec::new();
        }
        request
            .approval_steps
            .iter()
            .filter(|step| step.is_overdue(now) && !step.escalation_triggered)
            .map(|step| {
                let first_approver = step
                    .paths
                    .iter()
                    .find(|p| p.status == StepStatus::Pending)
                    .and_then(|p| p.approver_ids.first().cloned());
                (step.step_id, first_approver)
            })
            .collect()
    }

    /// Escalates one overdue stage: appends the escalation target to every
    /// pending path and flags the stage. Idempotent via the
    /// `escalation_triggered` flag; stale calls are no-ops.
    pub fn apply_escalation(
        &self,
        request: &mut AccessRequest,
        step_id: Uuid,
        escalation_target: Option<String>,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<Notification>> {
        if request.status != RequestStatus::PendingApproval {
            return Ok(Vec::new());
        }
        let Some((step_index, _)) = request.find_step(step_id) else {
            return Err(ServiceError::not_found("approval step", step_id.to_string()));
        };

        let recipients = {
            let step = &mut request.approval_steps[step_index];
            if !step.is_overdue(now) || step.escalation_triggered {
                return Ok(Vec::new());
            }
            step.escalation_triggered = true;
            if let Some(target) = &escalation_target {
                for path in step
                    .paths
                    .iter_mut()
                    .filter(|p| p.status == StepStatus::Pending)
                {
                    if !path.approver_ids.contains(target) {
                        path.approver_ids.push(target.clone());
                    }
                }
            }
            step.pending_approvers()
        };
        request.last_updated_at = now;

        let request_id = request.request_id;
        Ok(recipients
            .into_iter()
            .map(|recipient| Notification {
                recipient,
                subject: format!("[ESCALATION] Access request {request_id} overdue"),
                body: "An approval step is overdue. Please take action immediately.".to_string(),
            })
            .collect())
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// All currently actionable approvals for one user across the given
    /// requests.
    pub fn pending_approvals_for(
        &self,
        user_id: &str,
        requests: &[AccessRequest],
        now: DateTime<Utc>,
    ) -> Vec<PendingApproval> {
        let mut pending = Vec::new();
        for request in requests {
            if request.status != RequestStatus::PendingApproval {
                continue;
            }
            let Some(step) = request.current_stage() else {
                continue;
            };
            let actionable = step
                .paths
                .iter()
                .any(|p| p.status == StepStatus::Pending && p.is_approver(user_id));
            if !actionable {
                continue;
            }
            pending.push(PendingApproval {
                request_id: request.request_id,
                step_id: step.step_id,
                step_name: step.name.clone(),
                requester_name: request.requester_name.clone(),
                target_user_id: request.target_user_id.clone(),
                risk_level: request.risk_level,
                is_overdue: step.is_overdue(now),
                due_at: step.due_at,
                days_pending: request
                    .submitted_at
                    .map(|at| (now - at).num_days())
                    .unwrap_or(0),
            });
        }
        pending
    }

    fn stage_notifications(&self, request: &AccessRequest, step_index: usize) -> Vec<Notification> {
        let Some(step) = request.approval_steps.get(step_index) else {
            return Vec::new();
        };
        step.pending_approvers()
            .into_iter()
            .map(|approver| Notification {
                recipient: approver,
                subject: format!("Access request pending approval: {}", request.request_id),
                body: format!(
                    "{} has requested access for {}.\nRisk level: {}\nStep: {}\nPlease review and take action.",
                    request.requester_name,
                    request.target_user_name,
                    request.risk_level.as_str().to_uppercase(),
                    step.name
                ),
            })
            .collect()
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Default risk-driven approval rules: manager always, security review for
/// high/critical, compliance for SoD, role owner for sensitive patterns,
/// IT admin for production systems.
pub fn default_approval_rules() -> ServiceResult<Vec<ApprovalRule>> {
    Ok(vec![
        ApprovalRule {
            rule_id: "RULE_MGR_001".to_string(),
            name: "Manager Approval".to_string(),
            description: "Direct manager must approve all access requests".to_string(),
            approver_kind: ApproverKind::DirectManager,
            step_name: "Manager Approval".to_string(),
            sla_hours: 48,
            priority: 10,
            required_step: true,
            ..ApprovalRule::default()
        },
        ApprovalRule {
            rule_id: "RULE_SEC_001".to_string(),
            name: "Security Review - High Risk".to_string(),
            description: "Security team review for high/critical risk requests".to_string(),
            conditions: vec![ApprovalCondition::RiskLevelIn(vec![
                RiskLevel::High,
                RiskLevel::Critical,
            ])],
            approver_kind: ApproverKind::SecurityTeam,
            step_name: "Security Review".to_string(),
            sla_hours: 24,
            priority: 20,
            ..ApprovalRule::default()
        },
        ApprovalRule {
            rule_id: "RULE_COMP_001".to_string(),
            name: "Compliance Review - SoD".to_string(),
            description: "Compliance team must review requests with SoD violations".to_string(),
            conditions: vec![ApprovalCondition::HasSodViolations(true)],
            approver_kind: ApproverKind::ComplianceTeam,
            step_name: "Compliance Review".to_string(),
            sla_hours: 72,
            priority: 25,
            ..ApprovalRule::default()
        },
        ApprovalRule {
            rule_id: "RULE_OWNER_001".to_string(),
            name: "Role Owner Approval".to_string(),
            description: "Role owner must approve sensitive role assignments".to_string(),
            conditions: vec![ApprovalCondition::role_patterns(&[
                "*_ADMIN",
                "Z_SENSITIVE_*",
                "SAP_*",
            ])?],
            approver_kind: ApproverKind::RoleOwner,
            step_name: "Role Owner Approval".to_string(),
            sla_hours: 48,
            priority: 30,
            ..ApprovalRule::default()
        },
        ApprovalRule {
            rule_id: "RULE_IT_001".to_string(),
            name: "IT Admin - Production".to_string(),
            description: "IT admin approval for production system access".to_string(),
            conditions: vec![ApprovalCondition::TargetSystemIn(vec![
                "SAP_PROD".to_string(),
                "PROD".to_string(),
                "PRD".to_string(),
            ])],
            approver_kind: ApproverKind::ItAdmin,
            step_name: "IT Admin Approval".to_string(),
            sla_hours: 24,
            priority: 40,
            ..ApprovalRule::default()
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RiskLevel;
    use crate::infrastructure::config::WorkflowConfig;
    use crate::infrastructure::mock::{ManualClock, TableUserResolver};
    use chrono::TimeZone;

    fn engine() -> (WorkflowEngine, DateTime<Utc>) {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        let engine = WorkflowEngine::new(
            WorkflowConfig::default(),
            Arc::new(TableUserResolver::new()),
            Arc::new(ManualClock::new(now)),
            ApproverDirectory::default(),
        );
        (engine, now)
    }

    fn pending_request(steps: Vec<ApprovalStep>) -> AccessRequest {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        AccessRequest {
            request_id: Uuid::new_v4(),
            request_type: RequestType::NewAccess,
            status: RequestStatus::PendingApproval,
            requester_user_id: "JSMITH".to_string(),
            requester_name: "John Smith".to_string(),
            requester_email: "john.smith@company.com".to_string(),
            target_user_id: "MBROWN".to_string(),
            target_user_name: "Mary Brown".to_string(),
            target_user_email: None,
            target_user_department: None,
            requested_items: Vec::new(),
            business_justification: "Coverage for quarter-end close".to_string(),
            ticket_reference: None,
            is_temporary: false,
            requested_end_date: None,
            overall_risk_score: 0,
            risk_level: RiskLevel::Low,
            sod_violations: Vec::new(),
            sensitive_access_flags: Vec::new(),
            approval_steps: steps,
            current_step: 0,
            final_decision: None,
            final_decision_by: None,
            final_decision_at: None,
            rejection_reason: None,
            provisioning_errors: Vec::new(),
            access_expires_at: None,
            expiry_notification_sent: false,
            created_at: now,
            submitted_at: Some(now),
            provisioned_at: None,
            completed_at: None,
            last_updated_at: now,
        }
    }

    fn two_path_stage() -> ApprovalStep {
        let mut stage = ApprovalStep::new(1, "Combined Review", 48);
        let required = ApprovalPath::new(
            "Manager Approval",
            ApproverKind::DirectManager,
            vec!["alice".to_string()],
        );
        let mut optional =
            ApprovalPath::new("Risk Review", ApproverKind::RiskTeam, vec!["bob".to_string()]);
        optional.required = false;
        stage.paths = vec![required, optional];
        stage
    }

    #[test]
    fn rejecting_a_non_required_path_only_closes_that_path() {
        let (engine, now) = engine();
        let mut request = pending_request(vec![two_path_stage()]);
        let step_id = request.approval_steps[0].step_id;

        let outcome = engine
            .apply_action(
                &mut request,
                step_id,
                ApprovalAction::Reject,
                "bob",
                Some("not my area"),
                None,
                now,
            )
            .unwrap();
        assert_eq!(outcome.status, RequestStatus::PendingApproval);
        assert_eq!(request.approval_steps[0].paths[1].status, StepStatus::Rejected);
        assert_eq!(request.approval_steps[0].status, StepStatus::Pending);

        // The required path still gates the stage; approving it approves
        // the request.
        let outcome = engine
            .apply_action(
                &mut request,
                step_id,
                ApprovalAction::Approve,
                "alice",
                None,
                None,
                now,
            )
            .unwrap();
        assert_eq!(outcome.status, RequestStatus::Approved);
    }

    #[test]
    fn rejecting_a_required_path_is_terminal() {
        let (engine, now) = engine();
        let mut request = pending_request(vec![two_path_stage()]);
        let step_id = request.approval_steps[0].step_id;

        let outcome = engine
            .apply_action(
                &mut request,
                step_id,
                ApprovalAction::Reject,
                "alice",
                Some("denied"),
                None,
                now,
            )
            .unwrap();
        assert_eq!(outcome.status, RequestStatus::Rejected);
        assert_eq!(request.rejection_reason.as_deref(), Some("denied"));
    }

    #[test]
    fn require_all_quorum_is_idempotent_per_actor() {
        let (engine, now) = engine();
        let mut stage = ApprovalStep::new(1, "Dual Control", 48);
        let mut path = ApprovalPath::new(
            "Dual Control",
            ApproverKind::SecurityTeam,
            vec!["sec.one".to_string(), "sec.two".to_string()],
        );
        path.require_all = true;
        stage.paths = vec![path];
        let mut request = pending_request(vec![stage]);
        let step_id = request.approval_steps[0].step_id;

        let outcome = engine
            .apply_action(
                &mut request,
                step_id,
                ApprovalAction::Approve,
                "sec.one",
                None,
                None,
                now,
            )
            .unwrap();
        assert_eq!(outcome.status, RequestStatus::PendingApproval);
        assert_eq!(request.approval_steps[0].paths[0].status, StepStatus::Pending);

        // Duplicate approval by the same actor is a no-op.
        let duplicate = engine
            .apply_action(
                &mut request,
                step_id,
                ApprovalAction::Approve,
                "sec.one",
                None,
                None,
                now,
            )
            .unwrap();
        assert!(duplicate.idempotent);
        assert_eq!(request.approval_steps[0].paths[0].actions.len(), 1);

        let outcome = engine
            .apply_action(
                &mut request,
                step_id,
                ApprovalAction::Approve,
                "sec.two",
                None,
                None,
                now,
            )
            .unwrap();
        assert_eq!(outcome.status, RequestStatus::Approved);
    }

    #[test]
    fn info_requests_annotate_without_advancing() {
        let (engine, now) = engine();
        let mut request = pending_request(vec![two_path_stage()]);
        let step_id = request.approval_steps[0].step_id;

        let outcome = engine
            .apply_action(
                &mut request,
                step_id,
                ApprovalAction::RequestInfo,
                "alice",
                Some("which cost center?"),
                None,
                now,
            )
            .unwrap();
        assert_eq!(outcome.status, RequestStatus::PendingApproval);
        assert_eq!(request.current_step, 0);
        assert!(request.approval_steps[0].paths[0]
            .comments
            .as_deref()
            .unwrap()
            .starts_with("[INFO REQUESTED]"));
    }

    #[test]
    fn glob_patterns_anchor_and_escape() {
        let admin = CompiledPattern::compile("*_ADMIN").unwrap();
        assert!(admin.matches("Z_BASIS_ADMIN"));
        assert!(!admin.matches("Z_BASIS_ADMIN_X"));

        let z = CompiledPattern::compile("Z_*").unwrap();
        assert!(z.matches("Z_SENSITIVE_PAY"));
        assert!(!z.matches("X_Z_ROLE"));

        let dotted = CompiledPattern::compile("A.B*").unwrap();
        assert!(dotted.matches("A.B_ROLE"));
        assert!(!dotted.matches("AxB_ROLE"));
    }

    #[test]
    fn single_char_glob_matches_exactly_one() {
        let pattern = CompiledPattern::compile("ROLE_?").unwrap();
        assert!(pattern.matches("ROLE_1"));
        assert!(!pattern.matches("ROLE_12"));
        assert!(!pattern.matches("ROLE_"));
    }
}
