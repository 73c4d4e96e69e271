//! Request coordinator: owns the access-request lifecycle.
//!
//! The coordinator is the only component that mutates an
//! [`AccessRequest`]. It holds the request registry, serializes state
//! changes per request id, and keeps external I/O (entitlement reads,
//! notifications, provisioning) outside the per-request critical section:
//! a transition commits under the lock first, then its side-effects run.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::events::{EventKind, GovernanceEvent, SYSTEM_ACTOR};
use crate::domain::models::{Entitlement, RiskLevel, RiskViolation, RuleKind, UserAccess};
use crate::domain::request::{
    AccessRequest, ApprovalAction, RequestStatus, RequestType, RequestedAccess, ViolationRef,
};
use crate::infrastructure::config::Config;
use crate::infrastructure::connectors::{
    with_retry, AuditSink, Clock, EntitlementSource, NoopAuditSink, Notifier, Provisioner,
    SystemClock, UserResolver,
};
use crate::validation;

use super::errors::{ServiceError, ServiceResult};
use super::org_filter::{footprint_from_entitlements, OrgRuleEngine};
use super::rules::RuleEngine;
use super::workflow::{ApproverDirectory, Notification, PendingApproval, WorkflowEngine};

/// Input for creating a request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRequestInput {
    #[validate(length(min = 1))]
    pub requester_user_id: String,
    #[serde(default)]
    pub requester_name: String,
    #[validate(email)]
    pub requester_email: String,
    #[validate(length(min = 1))]
    pub target_user_id: String,
    #[serde(default)]
    pub target_user_name: String,
    #[serde(default)]
    pub target_user_email: Option<String>,
    #[serde(default)]
    pub target_user_department: Option<String>,
    #[validate(length(min = 1))]
    pub requested_roles: Vec<String>,
    pub business_justification: String,
    #[serde(default)]
    pub request_type: RequestType,
    #[serde(default)]
    pub is_temporary: bool,
    #[serde(default)]
    pub requested_end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ticket_reference: Option<String>,
}

/// A requestable role with its business metadata and the entitlements it
/// grants. Supplied by an external role catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleCatalogEntry {
    pub role_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system: String,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub business_process: String,
    #[serde(default)]
    pub entitlements: Vec<Entitlement>,
}

/// Risk score and violation count of one state in a preview.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RiskStateSummary {
    pub risk_score: u32,
    pub violation_count: usize,
}

/// What the preview recommends.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum RecommendationAction {
    Proceed,
    ProceedWithCaution,
    ReviewRequired,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub action: RecommendationAction,
    pub message: String,
    pub requires_mitigation: bool,
}

/// Dry-run risk delta between the target user's current entitlements and
/// the proposed assignment.
#[derive(Debug, Clone, Serialize)]
pub struct RiskPreview {
    pub current: RiskStateSummary,
    pub future: RiskStateSummary,
    pub new_violations: Vec<ViolationRef>,
    pub resolved_violations: Vec<ViolationRef>,
    pub risk_increase: i64,
    pub overall_risk_level: RiskLevel,
    pub recommendation: Recommendation,
}

/// Aggregate request statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RequestStatistics {
    pub total_requests: usize,
    pub by_status: BTreeMap<String, usize>,
    pub pending_approval: usize,
    pub overdue: usize,
    pub average_risk_score: u32,
}

/// Wires the coordinator with its collaborators. The entitlement source,
/// user resolver, notifier, and provisioner are mandatory; the rule
/// engine, workflow engine, org filter, clock, and audit sink fall back to
/// defaults.
#[derive(Default)]
pub struct RequestCoordinatorBuilder {
    config: Config,
    rule_engine: Option<Arc<RuleEngine>>,
    workflow: Option<Arc<WorkflowEngine>>,
    org_filter: Option<Arc<OrgRuleEngine>>,
    source: Option<Arc<dyn EntitlementSource>>,
    resolver: Option<Arc<dyn UserResolver>>,
    notifier: Option<Arc<dyn Notifier>>,
    provisioner: Option<Arc<dyn Provisioner>>,
    clock: Option<Arc<dyn Clock>>,
    audit: Option<Arc<dyn AuditSink>>,
    directory: ApproverDirectory,
    role_catalog: Vec<RoleCatalogEntry>,
}

impl RequestCoordinatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn rule_engine(mut self, engine: Arc<RuleEngine>) -> Self {
        self.rule_engine = Some(engine);
        self
    }

    pub fn workflow_engine(mut self, engine: Arc<WorkflowEngine>) -> Self {
        self.workflow = Some(engine);
        self
    }

    pub fn org_filter(mut self, filter: Arc<OrgRuleEngine>) -> Self {
        self.org_filter = Some(filter);
        self
    }

    pub fn entitlement_source(mut self, source: Arc<dyn EntitlementSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn user_resolver(mut self, resolver: Arc<dyn UserResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn approver_directory(mut self, directory: ApproverDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn role_catalog(mut self, roles: Vec<RoleCatalogEntry>) -> Self {
        self.role_catalog = roles;
        self
    }

    pub fn build(self) -> ServiceResult<RequestCoordinator> {
        let source = self
            .source
            .ok_or_else(|| ServiceError::Validation("entitlement source is required".to_string()))?;
        let resolver = self
            .resolver
            .ok_or_else(|| ServiceError::Validation("user resolver is required".to_string()))?;
        let notifier = self
            .notifier
            .ok_or_else(|| ServiceError::Validation("notifier is required".to_string()))?;
        let provisioner = self
            .provisioner
            .ok_or_else(|| ServiceError::Validation("provisioner is required".to_string()))?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let audit: Arc<dyn AuditSink> = self.audit.unwrap_or_else(|| Arc::new(NoopAuditSink));

        let rule_engine = match self.rule_engine {
            Some(engine) => engine,
            None => Arc::new(RuleEngine::with_builtin_pack(
                clock.clone(),
                self.config.evaluation.clone(),
            )?),
        };
        let workflow = match self.workflow {
            Some(engine) => engine,
            None => Arc::new(WorkflowEngine::with_default_rules(
                self.config.workflow.clone(),
                resolver.clone(),
                clock.clone(),
                self.directory,
            )?),
        };
        let org_filter = self
            .org_filter
            .unwrap_or_else(|| Arc::new(OrgRuleEngine::with_default_pack()));

        let role_catalog = self
            .role_catalog
            .into_iter()
            .map(|entry| (entry.role_id.clone(), entry))
            .collect();

        Ok(RequestCoordinator {
            config: self.config,
            rule_engine,
            workflow,
            org_filter,
            source,
            resolver,
            notifier,
            provisioner,
            clock,
            audit,
            registry: RwLock::new(HashMap::new()),
            role_catalog: RwLock::new(role_catalog),
            sla_sweep_running: AtomicBool::new(false),
            last_sla_sweep: Mutex::new(None),
        })
    }
}

/// Coordinates the request lifecycle from risk preview through
/// provisioning and expiry.
pub struct RequestCoordinator {
    config: Config,
    rule_engine: Arc<RuleEngine>,
    workflow: Arc<WorkflowEngine>,
    org_filter: Arc<OrgRuleEngine>,
    source: Arc<dyn EntitlementSource>,
    resolver: Arc<dyn UserResolver>,
    notifier: Arc<dyn Notifier>,
    provisioner: Arc<dyn Provisioner>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,

    registry: RwLock<HashMap<Uuid, Arc<Mutex<AccessRequest>>>>,
    role_catalog: RwLock<HashMap<String, RoleCatalogEntry>>,

    sla_sweep_running: AtomicBool,
    last_sla_sweep: Mutex<Option<DateTime<Utc>>>,
}

impl RequestCoordinator {
    pub fn builder() -> RequestCoordinatorBuilder {
        RequestCoordinatorBuilder::new()
    }

    pub fn rule_engine(&self) -> &Arc<RuleEngine> {
        &self.rule_engine
    }

    pub fn upsert_role(&self, entry: RoleCatalogEntry) {
        self.role_catalog
            .write()
            .insert(entry.role_id.clone(), entry);
    }

    /// Requestable roles, optionally filtered by a search term or business
    /// process.
    pub fn role_catalog(
        &self,
        search: Option<&str>,
        business_process: Option<&str>,
    ) -> Vec<RoleCatalogEntry> {
        let catalog = self.role_catalog.read();
        let mut roles: Vec<RoleCatalogEntry> = catalog
            .values()
            .filter(|entry| {
                search
                    .map(|s| {
                        let s = s.to_lowercase();
                        entry.role_id.to_lowercase().contains(&s)
                            || entry.description.to_lowercase().contains(&s)
                    })
                    .unwrap_or(true)
            })
            .filter(|entry| {
                business_process
                    .map(|p| entry.business_process == p)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.role_id.cmp(&b.role_id));
        roles
    }

    // -----------------------------------------------------------------
    // Request creation
    // -----------------------------------------------------------------

    /// Creates a request in Draft. Validates the input against the request
    /// policy and builds the requested items from the role catalog;
    /// unknown role ids are a validation error.
    pub fn create_request(&self, input: CreateRequestInput) -> ServiceResult<AccessRequest> {
        let now = self.clock.now();
        validation::rules::validate_new_request(&input, &self.config.requests, now)?;

        let requested_items = {
            let catalog = self.role_catalog.read();
            let mut items = Vec::with_capacity(input.requested_roles.len());
            for role_id in &input.requested_roles {
                let entry = catalog.get(role_id).ok_or_else(|| {
                    ServiceError::Validation(format!("unknown role id {role_id}"))
                })?;
                items.push(RequestedAccess {
                    access_type: "role".to_string(),
                    access_name: role_id.clone(),
                    access_description: entry.description.clone(),
                    system: entry.system.clone(),
                    is_temporary: input.is_temporary,
                    valid_to: input.requested_end_date,
                    risk_score: 0,
                    violations: Vec::new(),
                });
            }
            items
        };

        let request = AccessRequest {
            request_id: Uuid::new_v4(),
            request_type: input.request_type,
            status: RequestStatus::Draft,
            requester_user_id: input.requester_user_id,
            requester_name: input.requester_name,
            requester_email: input.requester_email,
            target_user_id: input.target_user_id,
            target_user_name: input.target_user_name,
            target_user_email: input.target_user_email,
            target_user_department: input.target_user_department,
            requested_items,
            business_justification: input.business_justification,
            ticket_reference: input.ticket_reference,
            is_temporary: input.is_temporary,
            requested_end_date: input.requested_end_date,
            overall_risk_score: 0,
            risk_level: RiskLevel::Low,
            sod_violations: Vec::new(),
            sensitive_access_flags: Vec::new(),
            approval_steps: Vec::new(),
            current_step: 0,
            final_decision: None,
            final_decision_by: None,
            final_decision_at: None,
            rejection_reason: None,
            provisioning_errors: Vec::new(),
            access_expires_at: None,
            expiry_notification_sent: false,
            created_at: now,
            submitted_at: None,
            provisioned_at: None,
            completed_at: None,
            last_updated_at: now,
        };

        self.registry
            .write()
            .insert(request.request_id, Arc::new(Mutex::new(request.clone())));

        self.audit.record(GovernanceEvent::new(
            EventKind::RequestCreated,
            request.request_id.to_string(),
            request.requester_user_id.clone(),
            now,
            serde_json::json!({
                "target_user_id": request.target_user_id,
                "roles": request.requested_items.iter().map(|i| i.access_name.clone()).collect::<Vec<_>>(),
                "request_type": request.request_type.as_str(),
            }),
        ));
        info!(request_id = %request.request_id, "created access request");

        Ok(request)
    }

    // -----------------------------------------------------------------
    // Risk preview
    // -----------------------------------------------------------------

    /// Dry-run evaluation: current violations of the target user versus
    /// the violations including the requested items, with the delta keyed
    /// on `(rule_id, conflict_signature)`.
    pub async fn preview_risk(&self, request_id: Uuid) -> ServiceResult<RiskPreview> {
        let snapshot = self
            .request(request_id)
            .ok_or_else(|| ServiceError::not_found("request", request_id.to_string()))?;

        let current_entitlements = self.fetch_entitlements(&snapshot.target_user_id).await?;
        let added_entitlements = self.role_entitlements(&snapshot.requested_items);

        let department = snapshot.target_user_department.clone().unwrap_or_default();
        let current_user = UserAccess::new(snapshot.target_user_id.clone())
            .with_department(department.clone())
            .with_entitlements(current_entitlements.clone());
        let mut future_entitlements = current_entitlements;
        future_entitlements.extend(added_entitlements);
        let future_user = UserAccess::new(snapshot.target_user_id.clone())
            .with_department(department)
            .with_entitlements(future_entitlements);

        let current_violations = self.filtered_violations(&current_user);
        let future_violations = self.filtered_violations(&future_user);

        let current_summary = self.rule_engine.summarize(&current_violations);
        let future_summary = self.rule_engine.summarize(&future_violations);

        let current_keys: HashSet<(String, String)> = current_violations
            .iter()
            .map(|v| (v.rule_id.clone(), v.conflict_signature.clone()))
            .collect();
        let future_keys: HashSet<(String, String)> = future_violations
            .iter()
            .map(|v| (v.rule_id.clone(), v.conflict_signature.clone()))
            .collect();

        let new_violations: Vec<ViolationRef> = future_violations
            .iter()
            .filter(|v| !current_keys.contains(&(v.rule_id.clone(), v.conflict_signature.clone())))
            .map(violation_ref)
            .collect();
        let resolved_violations: Vec<ViolationRef> = current_violations
            .iter()
            .filter(|v| !future_keys.contains(&(v.rule_id.clone(), v.conflict_signature.clone())))
            .map(violation_ref)
            .collect();

        let overall_risk_level = RiskLevel::from_score(future_summary.aggregate_risk_score);
        let recommendation = recommend(&new_violations, overall_risk_level);

        Ok(RiskPreview {
            current: RiskStateSummary {
                risk_score: current_summary.aggregate_risk_score,
                violation_count: current_summary.total_violations,
            },
            future: RiskStateSummary {
                risk_score: future_summary.aggregate_risk_score,
                violation_count: future_summary.total_violations,
            },
            new_violations,
            resolved_violations,
            risk_increase: i64::from(future_summary.aggregate_risk_score)
                - i64::from(current_summary.aggregate_risk_score),
            overall_risk_level,
            recommendation,
        })
    }

    // -----------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------

    /// Submits a draft request: full risk analysis (org-filtered),
    /// approval plan generation, transition to PendingApproval (or
    /// auto-approval when configured and risk-free), and notification of
    /// the first stage.
    pub async fn submit(&self, request_id: Uuid) -> ServiceResult<AccessRequest> {
        let handle = self.handle(request_id)?;
        let snapshot = {
            let request = handle.lock();
            if request.status != RequestStatus::Draft {
                return Err(ServiceError::State(format!(
                    "request {request_id} is not in draft (status: {})",
                    request.status.as_str()
                )));
            }
            request.clone()
        };

        if snapshot.request_type == RequestType::EmergencyAccess {
            self.check_firefighters(&snapshot).await?;
        }

        // Risk analysis over current + requested entitlements.
        let current_entitlements = self.fetch_entitlements(&snapshot.target_user_id).await?;
        let added_entitlements = self.role_entitlements(&snapshot.requested_items);
        let mut combined = current_entitlements;
        combined.extend(added_entitlements);
        let future_user = UserAccess::new(snapshot.target_user_id.clone())
            .with_department(snapshot.target_user_department.clone().unwrap_or_default())
            .with_entitlements(combined);

        let violations = self.filtered_violations(&future_user);
        let summary = self.rule_engine.summarize(&violations);

        let mut scored = snapshot.clone();
        scored.overall_risk_score = summary.aggregate_risk_score;
        scored.risk_level = RiskLevel::from_score(summary.aggregate_risk_score);
        scored.sod_violations = violations
            .iter()
            .filter(|v| v.kind == RuleKind::Sod)
            .map(violation_ref)
            .collect();
        scored.sensitive_access_flags = violations
            .iter()
            .filter(|v| v.kind == RuleKind::Sensitive)
            .map(violation_ref)
            .collect();
        self.score_items(&mut scored.requested_items, &violations);

        let plan = self.workflow.generate_plan(&scored).await?;
        let now = self.clock.now();

        // Commit: re-validate against the latest state under the lock.
        let (committed, notifications) = {
            let mut request = handle.lock();
            if request.status != RequestStatus::Draft {
                return Err(ServiceError::State(format!(
                    "request {request_id} left draft during submission"
                )));
            }
            request.overall_risk_score = scored.overall_risk_score;
            request.risk_level = scored.risk_level;
            request.sod_violations = scored.sod_violations.clone();
            request.sensitive_access_flags = scored.sensitive_access_flags.clone();
            request.requested_items = scored.requested_items.clone();

            let mut notifications = self.workflow.submit(&mut request, plan, now)?;

            if self.config.requests.auto_approve_low_risk
                && request.overall_risk_score <= self.config.requests.low_risk_threshold
                && request.sod_violations.is_empty()
            {
                request.status = RequestStatus::Approved;
                request.final_decision = Some("auto_approved".to_string());
                request.final_decision_at = Some(now);
                notifications.clear();
                info!(request_id = %request_id, "request auto-approved (low risk)");
            }

            (request.clone(), notifications)
        };

        self.audit.record(GovernanceEvent::new(
            EventKind::RequestSubmitted,
            request_id.to_string(),
            committed.requester_user_id.clone(),
            now,
            serde_json::json!({
                "risk_score": committed.overall_risk_score,
                "risk_level": committed.risk_level.as_str(),
                "sod_violations": committed.sod_violations.len(),
                "steps": committed.approval_steps.len(),
            }),
        ));
        for violation in &violations {
            self.audit.record(GovernanceEvent::new(
                EventKind::ViolationDetected,
                request_id.to_string(),
                SYSTEM_ACTOR,
                now,
                serde_json::json!({
                    "rule_id": violation.rule_id,
                    "conflict_signature": violation.conflict_signature,
                    "severity": violation.severity.as_str(),
                    "user_id": violation.user_id,
                }),
            ));
        }
        self.dispatch(notifications).await;
        info!(request_id = %request_id, status = committed.status.as_str(), "request submitted");

        if committed.status == RequestStatus::Approved {
            return self.provision(request_id).await;
        }
        Ok(committed)
    }

    async fn check_firefighters(&self, request: &AccessRequest) -> ServiceResult<()> {
        for item in &request.requested_items {
            let availability = with_retry(&self.config.retry, "firefighter availability", || {
                self.source.check_firefighter_availability(&item.access_name)
            })
            .await?;
            if !availability.available || availability.locked {
                return Err(ServiceError::Validation(format!(
                    "firefighter id {} is not available",
                    item.access_name
                )));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Approval processing
    // -----------------------------------------------------------------

    /// Applies one approver action via the workflow engine. Terminal
    /// approval triggers provisioning; escalation resolves its target
    /// before taking the lock.
    pub async fn process_approval(
        &self,
        request_id: Uuid,
        step_id: Uuid,
        action: ApprovalAction,
        actor_id: &str,
        comments: Option<&str>,
        delegate_to: Option<&str>,
    ) -> ServiceResult<AccessRequest> {
        let handle = self.handle(request_id)?;
        let now = self.clock.now();

        if action == ApprovalAction::Escalate {
            let first_approver = {
                let request = handle.lock();
                self.workflow
                    .overdue_steps(&request, now)
                    .into_iter()
                    .find(|(id, _)| *id == step_id)
                    .map(|(_, approver)| approver)
                    .ok_or_else(|| {
                        ServiceError::State(format!(
                            "step {step_id} is not overdue or already escalated"
                        ))
                    })?
            };
            let target = match first_approver {
                Some(approver) => self.resolver.manager_of(&approver).await.unwrap_or(None),
                None => None,
            };
            let (snapshot, notifications) = {
                let mut request = handle.lock();
                let notifications =
                    self.workflow
                        .apply_escalation(&mut request, step_id, target, now)?;
                (request.clone(), notifications)
            };
            self.audit.record(GovernanceEvent::new(
                EventKind::StepActioned,
                request_id.to_string(),
                actor_id,
                now,
                serde_json::json!({ "step_id": step_id.to_string(), "action": "escalate" }),
            ));
            self.dispatch(notifications).await;
            return Ok(snapshot);
        }

        let (outcome, snapshot) = {
            let mut request = handle.lock();
            let outcome = self.workflow.apply_action(
                &mut request,
                step_id,
                action,
                actor_id,
                comments,
                delegate_to,
                now,
            )?;
            (outcome, request.clone())
        };

        if !outcome.idempotent {
            self.audit.record(GovernanceEvent::new(
                EventKind::StepActioned,
                request_id.to_string(),
                actor_id,
                now,
                serde_json::json!({
                    "step_id": step_id.to_string(),
                    "action": action.as_str(),
                }),
            ));
            match outcome.status {
                RequestStatus::Approved => self.audit.record(GovernanceEvent::new(
                    EventKind::RequestApproved,
                    request_id.to_string(),
                    actor_id,
                    now,
                    serde_json::json!({}),
                )),
                RequestStatus::Rejected => self.audit.record(GovernanceEvent::new(
                    EventKind::RequestRejected,
                    request_id.to_string(),
                    actor_id,
                    now,
                    serde_json::json!({ "reason": snapshot.rejection_reason }),
                )),
                _ => {}
            }
        }
        self.dispatch(outcome.notifications).await;

        if outcome.status == RequestStatus::Approved {
            return self.provision(request_id).await;
        }
        Ok(snapshot)
    }

    // -----------------------------------------------------------------
    // Provisioning
    // -----------------------------------------------------------------

    /// Drives an approved request through the provisioner with bounded
    /// retry. Transient exhaustion and permanent failures transition to
    /// Failed with the error recorded; the provisioner is expected
    /// idempotent on the request id.
    async fn provision(&self, request_id: Uuid) -> ServiceResult<AccessRequest> {
        let handle = self.handle(request_id)?;
        let items = {
            let mut request = handle.lock();
            if !matches!(
                request.status,
                RequestStatus::Approved | RequestStatus::Provisioning
            ) {
                return Err(ServiceError::State(format!(
                    "request {request_id} is not ready for provisioning (status: {})",
                    request.status.as_str()
                )));
            }
            request.status = RequestStatus::Provisioning;
            request.last_updated_at = self.clock.now();
            request.requested_items.clone()
        };

        let result = with_retry(&self.config.retry, "provision", || {
            self.provisioner.provision(request_id, &items)
        })
        .await;

        let now = self.clock.now();
        let snapshot = {
            let mut request = handle.lock();
            match &result {
                Ok(()) => {
                    request.status = RequestStatus::Provisioned;
                    request.provisioned_at = Some(now);
                    request.completed_at = Some(now);
                    if request.is_temporary {
                        request.access_expires_at = request.requested_end_date;
                    }
                }
                Err(err) => {
                    request.status = RequestStatus::Failed;
                    request.provisioning_errors.push(err.to_string());
                }
            }
            request.last_updated_at = now;
            request.clone()
        };

        match result {
            Ok(()) => {
                self.audit.record(GovernanceEvent::system(
                    EventKind::RequestProvisioned,
                    request_id.to_string(),
                    now,
                    serde_json::json!({ "items": snapshot.requested_items.len() }),
                ));
                self.dispatch(vec![Notification {
                    recipient: snapshot.requester_email.clone(),
                    subject: format!("Access provisioned: {request_id}"),
                    body: format!(
                        "Access has been granted for {}.",
                        snapshot.target_user_name
                    ),
                }])
                .await;
            }
            Err(err) => {
                warn!(request_id = %request_id, error = %err, "provisioning failed");
            }
        }

        Ok(snapshot)
    }

    /// Re-asks the idempotent provisioner for every request stuck in
    /// Provisioning (e.g. after an abandoned call).
    pub async fn reconcile_provisioning(&self) -> ServiceResult<usize> {
        let stuck: Vec<Uuid> = self
            .registry
            .read()
            .iter()
            .filter(|(_, handle)| handle.lock().status == RequestStatus::Provisioning)
            .map(|(id, _)| *id)
            .collect();
        for request_id in &stuck {
            if let Err(err) = self.provision(*request_id).await {
                warn!(request_id = %request_id, error = %err, "provisioning reconciliation failed");
            }
        }
        Ok(stuck.len())
    }

    // -----------------------------------------------------------------
    // Periodic sweeps
    // -----------------------------------------------------------------

    /// Escalates overdue pending steps. Safe to call periodically:
    /// escalation is idempotent per step, overlapping sweeps
    /// short-circuit, and a minimum interval is enforced.
    pub async fn sla_sweep(&self) -> ServiceResult<usize> {
        let now = self.clock.now();
        {
            let mut last = self.last_sla_sweep.lock();
            if let Some(previous) = *last {
                let min_interval =
                    i64::try_from(self.config.workflow.sla_sweep_min_interval_secs).unwrap_or(0);
                if (now - previous).num_seconds() < min_interval {
                    return Ok(0);
                }
            }
            *last = Some(now);
        }
        if self.sla_sweep_running.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }
        let result = self.run_sla_sweep(now).await;
        self.sla_sweep_running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_sla_sweep(&self, now: DateTime<Utc>) -> ServiceResult<usize> {
        let handles: Vec<(Uuid, Arc<Mutex<AccessRequest>>)> = self
            .registry
            .read()
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();

        let mut escalated = 0;
        for (request_id, handle) in handles {
            let overdue = {
                let request = handle.lock();
                self.workflow.overdue_steps(&request, now)
            };
            for (step_id, first_approver) in overdue {
                let target = match first_approver {
                    Some(approver) => self.resolver.manager_of(&approver).await.unwrap_or(None),
                    None => None,
                };
                let notifications = {
                    let mut request = handle.lock();
                    self.workflow
                        .apply_escalation(&mut request, step_id, target, now)?
                };
                if !notifications.is_empty() {
                    escalated += 1;
                    self.audit.record(GovernanceEvent::system(
                        EventKind::StepActioned,
                        request_id.to_string(),
                        now,
                        serde_json::json!({
                            "step_id": step_id.to_string(),
                            "action": "escalate",
                        }),
                    ));
                    warn!(request_id = %request_id, step_id = %step_id, "escalated overdue approval step");
                }
                self.dispatch(notifications).await;
            }
        }
        Ok(escalated)
    }

    /// Revokes and expires provisioned temporary access whose end date has
    /// passed.
    pub async fn expiry_sweep(&self) -> ServiceResult<usize> {
        let now = self.clock.now();
        let handles: Vec<(Uuid, Arc<Mutex<AccessRequest>>)> = self
            .registry
            .read()
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();

        let mut expired = 0;
        for (request_id, handle) in handles {
            let due = {
                let request = handle.lock();
                request.status == RequestStatus::Provisioned
                    && request
                        .access_expires_at
                        .map(|at| at <= now)
                        .unwrap_or(false)
            };
            if !due {
                continue;
            }

            let result = with_retry(&self.config.retry, "revoke", || {
                self.provisioner.revoke(request_id)
            })
            .await;
            match result {
                Ok(()) => {
                    let snapshot = {
                        let mut request = handle.lock();
                        if request.status == RequestStatus::Provisioned {
                            request.status = RequestStatus::Expired;
                            request.last_updated_at = now;
                        }
                        request.clone()
                    };
                    expired += 1;
                    self.audit.record(GovernanceEvent::system(
                        EventKind::RequestExpired,
                        request_id.to_string(),
                        now,
                        serde_json::json!({}),
                    ));
                    let recipient = snapshot
                        .target_user_email
                        .clone()
                        .unwrap_or_else(|| snapshot.requester_email.clone());
                    self.dispatch(vec![Notification {
                        recipient,
                        subject: format!("Access expired: {request_id}"),
                        body: "Your temporary access has expired and been revoked.".to_string(),
                    }])
                    .await;
                }
                Err(err) => {
                    warn!(request_id = %request_id, error = %err, "expiry revocation failed");
                }
            }
        }
        Ok(expired)
    }

    /// Warns holders of access expiring within `days_ahead` days, once per
    /// request.
    pub async fn expiry_notifications(&self, days_ahead: i64) -> ServiceResult<usize> {
        let now = self.clock.now();
        let threshold = now + chrono::Duration::days(days_ahead);
        let handles: Vec<(Uuid, Arc<Mutex<AccessRequest>>)> = self
            .registry
            .read()
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();

        let mut notified = 0;
        for (request_id, handle) in handles {
            let recipient = {
                let mut request = handle.lock();
                let due = request.status == RequestStatus::Provisioned
                    && !request.expiry_notification_sent
                    && request
                        .access_expires_at
                        .map(|at| at <= threshold)
                        .unwrap_or(false);
                if !due {
                    continue;
                }
                request.expiry_notification_sent = true;
                request
                    .target_user_email
                    .clone()
                    .unwrap_or_else(|| request.requester_email.clone())
            };
            notified += 1;
            self.dispatch(vec![Notification {
                recipient,
                subject: format!("Access expiring soon: {request_id}"),
                body: format!(
                    "Access granted in request {request_id} will expire within {days_ahead} days. Submit an extension request if it is still needed."
                ),
            }])
            .await;
        }
        Ok(notified)
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    pub fn request(&self, request_id: Uuid) -> Option<AccessRequest> {
        self.registry
            .read()
            .get(&request_id)
            .map(|handle| handle.lock().clone())
    }

    pub fn requests_by_requester(&self, requester_id: &str) -> Vec<AccessRequest> {
        self.snapshot_all()
            .into_iter()
            .filter(|r| r.requester_user_id == requester_id)
            .collect()
    }

    pub fn requests_for_target(&self, target_user_id: &str) -> Vec<AccessRequest> {
        self.snapshot_all()
            .into_iter()
            .filter(|r| r.target_user_id == target_user_id)
            .collect()
    }

    /// Actionable approvals for one approver across all pending requests.
    pub fn pending_approvals_for(&self, approver_id: &str) -> Vec<PendingApproval> {
        let snapshots = self.snapshot_all();
        self.workflow
            .pending_approvals_for(approver_id, &snapshots, self.clock.now())
    }

    pub fn statistics(&self) -> RequestStatistics {
        let snapshots = self.snapshot_all();
        let now = self.clock.now();
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        let mut pending = 0;
        let mut overdue = 0;
        let mut risk_total: u64 = 0;
        for request in &snapshots {
            *by_status
                .entry(request.status.as_str().to_string())
                .or_default() += 1;
            risk_total += u64::from(request.overall_risk_score);
            if request.status == RequestStatus::PendingApproval {
                pending += 1;
                if request
                    .approval_steps
                    .iter()
                    .any(|step| step.is_overdue(now))
                {
                    overdue += 1;
                }
            }
        }
        RequestStatistics {
            total_requests: snapshots.len(),
            by_status,
            pending_approval: pending,
            overdue,
            average_risk_score: if snapshots.is_empty() {
                0
            } else {
                (risk_total / snapshots.len() as u64) as u32
            },
        }
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn handle(&self, request_id: Uuid) -> ServiceResult<Arc<Mutex<AccessRequest>>> {
        self.registry
            .read()
            .get(&request_id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found("request", request_id.to_string()))
    }

    fn snapshot_all(&self) -> Vec<AccessRequest> {
        self.registry
            .read()
            .values()
            .map(|handle| handle.lock().clone())
            .collect()
    }

    async fn fetch_entitlements(&self, user_id: &str) -> ServiceResult<Vec<Entitlement>> {
        Ok(with_retry(&self.config.retry, "entitlements", || {
            self.source.entitlements_of(user_id)
        })
        .await?)
    }

    fn role_entitlements(&self, items: &[RequestedAccess]) -> Vec<Entitlement> {
        let catalog = self.role_catalog.read();
        items
            .iter()
            .flat_map(|item| {
                catalog
                    .get(&item.access_name)
                    .map(|entry| entry.entitlements.clone())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Evaluates a snapshot and post-filters the violations through the
    /// organizational rules, using footprints derived from the matched
    /// entitlements of each conflict side.
    fn filtered_violations(&self, user: &UserAccess) -> Vec<RiskViolation> {
        self.rule_engine
            .evaluate(user, None)
            .into_iter()
            .filter(|violation| {
                let (side_a, side_b) = violation.evidence.matched_sides();
                let footprint_a = footprint_from_entitlements(side_a);
                let footprint_b = footprint_from_entitlements(side_b);
                let outcome = self.org_filter.filter_risk(
                    &violation.rule_id,
                    violation.category.as_str(),
                    &footprint_a,
                    &footprint_b,
                    None,
                );
                if outcome.filtered {
                    info!(
                        rule_id = %violation.rule_id,
                        user_id = %violation.user_id,
                        reason = %outcome.reason,
                        "violation filtered by organizational rules"
                    );
                }
                !outcome.filtered
            })
            .collect()
    }

    /// Per-item risk: severities of the violations whose matched
    /// entitlements intersect the item's role entitlements.
    fn score_items(&self, items: &mut [RequestedAccess], violations: &[RiskViolation]) {
        let catalog = self.role_catalog.read();
        for item in items.iter_mut() {
            let role_keys: HashSet<String> = catalog
                .get(&item.access_name)
                .map(|entry| {
                    entry
                        .entitlements
                        .iter()
                        .map(Entitlement::canonical_key)
                        .collect()
                })
                .unwrap_or_default();
            if role_keys.is_empty() {
                continue;
            }
            let mut score: u32 = 0;
            let mut refs = Vec::new();
            for violation in violations {
                let (side_a, side_b) = violation.evidence.matched_sides();
                let touches = side_a
                    .iter()
                    .chain(side_b.iter())
                    .any(|e| role_keys.contains(&e.canonical_key()));
                if touches {
                    score += violation.severity.weight();
                    refs.push(violation_ref(violation));
                }
            }
            item.risk_score = score.min(100);
            item.violations = refs;
        }
    }

    async fn dispatch(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            let recipient = match self.resolver.email_of(&notification.recipient).await {
                Ok(Some(email)) => email,
                _ => notification.recipient.clone(),
            };
            if let Err(err) = self
                .notifier
                .notify(&recipient, &notification.subject, &notification.body)
                .await
            {
                warn!(recipient = %recipient, error = %err, "notification dispatch failed");
            }
        }
    }
}

fn violation_ref(violation: &RiskViolation) -> ViolationRef {
    ViolationRef {
        rule_id: violation.rule_id.clone(),
        rule_name: violation.rule_name.clone(),
        severity: violation.severity,
        conflict_signature: violation.conflict_signature.clone(),
    }
}

fn recommend(new_violations: &[ViolationRef], level: RiskLevel) -> Recommendation {
    if new_violations.is_empty() {
        return Recommendation {
            action: RecommendationAction::Proceed,
            message: "No new violations detected. Request can proceed.".to_string(),
            requires_mitigation: false,
        };
    }
    match level {
        RiskLevel::Critical => Recommendation {
            action: RecommendationAction::ReviewRequired,
            message: "Critical risk detected. Security review required before approval."
                .to_string(),
            requires_mitigation: true,
        },
        RiskLevel::High => Recommendation {
            action: RecommendationAction::ReviewRequired,
            message: "High risk detected. Additional approval required.".to_string(),
            requires_mitigation: true,
        },
        _ => Recommendation {
            action: RecommendationAction::ProceedWithCaution,
            message: "Some risks detected. Review violations before proceeding.".to_string(),
            requires_mitigation: false,
        },
    }
}
