use std::sync::Arc;

use anyhow::Result;

use chrono::{Duration, TimeZone, Utc};

use access_governor::domain::events::EventKind;
use access_governor::domain::models::{
    ConflictSet, Entitlement, RiskCategory, RiskLevel, RiskRule, RiskSeverity, RuleExceptions,
    RuleKind, RuleScope,
};
use access_governor::domain::request::{
    ApprovalAction, ApproverKind, RequestStatus, RequestType, StepStatus,
};
use access_governor::infrastructure::config::Config;
use access_governor::infrastructure::connectors::{Clock, FirefighterAvailability, MemoryAuditSink};
use access_governor::infrastructure::mock::{
    ManualClock, MemoryNotifier, MemoryProvisioner, MockEntitlementSource, TableUserResolver,
};
use access_governor::services::requests::{
    CreateRequestInput, RecommendationAction, RequestCoordinator, RoleCatalogEntry,
};
use access_governor::services::workflow::{ApprovalRule, ApproverDirectory, WorkflowEngine};

fn tcode(value: &str) -> Entitlement {
    Entitlement::new("S_TCODE", "TCD", value)
}

fn catalog() -> Vec<RoleCatalogEntry> {
    vec![
        RoleCatalogEntry {
            role_id: "Z_RISKY_VIEWER".to_string(),
            name: "Risky Viewer".to_string(),
            description: "Grants elevated administrative display access".to_string(),
            system: "SAP".to_string(),
            risk_level: RiskLevel::High,
            owner: None,
            business_process: "IT".to_string(),
            entitlements: vec![Entitlement::new("S_ADMIN_X", "FLD", "ALL")],
        },
        RoleCatalogEntry {
            role_id: "Z_CLEAN".to_string(),
            name: "AP Display".to_string(),
            description: "Invoice display only".to_string(),
            system: "SAP".to_string(),
            risk_level: RiskLevel::Low,
            owner: None,
            business_process: "Purchase to Pay".to_string(),
            entitlements: vec![tcode("FB60")],
        },
        RoleCatalogEntry {
            role_id: "Z_PAY_RUN".to_string(),
            name: "Payment Run".to_string(),
            description: "Execute vendor payment runs".to_string(),
            system: "SAP".to_string(),
            risk_level: RiskLevel::High,
            owner: None,
            business_process: "Purchase to Pay".to_string(),
            entitlements: vec![tcode("F110")],
        },
        RoleCatalogEntry {
            role_id: "FF_FIN_01".to_string(),
            name: "Finance Firefighter".to_string(),
            description: "Emergency access identity for finance".to_string(),
            system: "SAP".to_string(),
            risk_level: RiskLevel::Critical,
            owner: None,
            business_process: "Emergency".to_string(),
            entitlements: Vec::new(),
        },
    ]
}

fn sensitive_admin_rule() -> RiskRule {
    RiskRule {
        rule_id: "TEST_SENS_001".to_string(),
        name: "Sensitive - Elevated Admin Display".to_string(),
        description: String::new(),
        kind: RuleKind::Sensitive,
        severity: RiskSeverity::High,
        category: RiskCategory::from(RiskCategory::IT_SECURITY),
        conflicts: Vec::new(),
        sensitive_entitlements: vec![Entitlement::new("S_ADMIN_X", "FLD", "ALL")],
        business_impact: "Broad administrative visibility".to_string(),
        mitigation_controls: Vec::new(),
        recommended_actions: Vec::new(),
        scope: RuleScope::default(),
        exceptions: RuleExceptions::default(),
        effective_from: None,
        expiry_date: None,
        enabled: true,
        version: "1.0".to_string(),
    }
}

fn vendor_payment_rule() -> RiskRule {
    RiskRule {
        rule_id: "TEST_SOD_001".to_string(),
        name: "Vendor Creation vs Payment Execution".to_string(),
        description: String::new(),
        kind: RuleKind::Sod,
        severity: RiskSeverity::Critical,
        category: RiskCategory::from(RiskCategory::FINANCIAL),
        conflicts: vec![ConflictSet {
            name: "Vendor Creation vs Payment Execution".to_string(),
            description: String::new(),
            function_a_name: "Vendor Creation".to_string(),
            function_a_entitlements: vec![tcode("XK01")],
            function_b_name: "Payment Execution".to_string(),
            function_b_entitlements: vec![tcode("F110")],
        }],
        sensitive_entitlements: Vec::new(),
        business_impact: "Ghost vendor fraud".to_string(),
        mitigation_controls: Vec::new(),
        recommended_actions: Vec::new(),
        scope: RuleScope::default(),
        exceptions: RuleExceptions::default(),
        effective_from: None,
        expiry_date: None,
        enabled: true,
        version: "1.0".to_string(),
    }
}

struct Harness {
    coordinator: RequestCoordinator,
    clock: Arc<ManualClock>,
    source: Arc<MockEntitlementSource>,
    resolver: Arc<TableUserResolver>,
    notifier: Arc<MemoryNotifier>,
    provisioner: Arc<MemoryProvisioner>,
    audit: Arc<MemoryAuditSink>,
}

fn harness_with(config: Config) -> Harness {
    access_governor::telemetry::init(&config.telemetry);
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap(),
    ));
    let source = Arc::new(MockEntitlementSource::new());
    let resolver = Arc::new(TableUserResolver::new());
    let notifier = Arc::new(MemoryNotifier::new());
    let provisioner = Arc::new(MemoryProvisioner::new());
    let audit = Arc::new(MemoryAuditSink::default());

    resolver.set_manager("MBROWN", "MGR1");
    resolver.set_manager("MGR1", "MGR1_BOSS");

    let directory = ApproverDirectory {
        security_team: vec!["sec.one".to_string()],
        risk_team: Vec::new(),
        compliance_team: vec!["comp.one".to_string()],
        it_admin: vec!["it.one".to_string()],
    };

    let coordinator = RequestCoordinator::builder()
        .config(config)
        .entitlement_source(source.clone())
        .user_resolver(resolver.clone())
        .notifier(notifier.clone())
        .provisioner(provisioner.clone())
        .clock(clock.clone())
        .audit_sink(audit.clone())
        .approver_directory(directory)
        .role_catalog(catalog())
        .build()
        .expect("coordinator should build");

    coordinator
        .rule_engine()
        .add_rule(sensitive_admin_rule())
        .unwrap();
    coordinator
        .rule_engine()
        .add_rule(vendor_payment_rule())
        .unwrap();

    Harness {
        coordinator,
        clock,
        source,
        resolver,
        notifier,
        provisioner,
        audit,
    }
}

fn harness() -> Harness {
    harness_with(Config::default())
}

fn request_input(roles: Vec<&str>) -> CreateRequestInput {
    CreateRequestInput {
        requester_user_id: "JSMITH".to_string(),
        requester_name: "John Smith".to_string(),
        requester_email: "john.smith@company.com".to_string(),
        target_user_id: "MBROWN".to_string(),
        target_user_name: "Mary Brown".to_string(),
        target_user_email: Some("mary.brown@company.com".to_string()),
        target_user_department: Some("Finance".to_string()),
        requested_roles: roles.into_iter().map(str::to_string).collect(),
        business_justification: "Backfill coverage for quarter-end close activities".to_string(),
        request_type: RequestType::NewAccess,
        is_temporary: false,
        requested_end_date: None,
        ticket_reference: None,
    }
}

#[tokio::test]
async fn risk_preview_reports_the_violation_delta() -> Result<()> {
    let h = harness();
    h.source.put_entitlements("MBROWN", vec![tcode("XK01")]);

    let request = h.coordinator.create_request(request_input(vec!["Z_PAY_RUN"]))?;
    let preview = h.coordinator.preview_risk(request.request_id).await?;

    assert_eq!(preview.current.violation_count, 0);
    assert_eq!(preview.future.violation_count, 1);
    assert_eq!(preview.new_violations.len(), 1);
    assert_eq!(preview.new_violations[0].rule_id, "TEST_SOD_001");
    assert!(preview.resolved_violations.is_empty());
    assert_eq!(preview.overall_risk_level, RiskLevel::Critical);
    assert_eq!(
        preview.recommendation.action,
        RecommendationAction::ReviewRequired
    );
    assert!(preview.recommendation.requires_mitigation);
    Ok(())
}

#[tokio::test]
async fn high_risk_request_walks_manager_then_security_to_provisioned() -> Result<()> {
    let h = harness();
    let request = h
        .coordinator
        .create_request(request_input(vec!["Z_RISKY_VIEWER"]))?;

    let submitted = h.coordinator.submit(request.request_id).await?;
    assert_eq!(submitted.status, RequestStatus::PendingApproval);
    assert_eq!(submitted.overall_risk_score, 60);
    assert_eq!(submitted.risk_level, RiskLevel::High);
    assert!(submitted.sod_violations.is_empty());
    assert_eq!(submitted.sensitive_access_flags.len(), 1);

    assert_eq!(submitted.approval_steps.len(), 2);
    assert_eq!(submitted.approval_steps[0].name, "Manager Approval");
    assert_eq!(submitted.approval_steps[0].sla_hours, 48);
    assert_eq!(submitted.approval_steps[1].name, "Security Review");
    assert_eq!(submitted.approval_steps[1].sla_hours, 24);
    assert!(!h.notifier.sent_to("MGR1").is_empty());

    let step0 = submitted.approval_steps[0].step_id;
    let after_manager = h
        .coordinator
        .process_approval(request.request_id, step0, ApprovalAction::Approve, "MGR1", None, None)
        .await?;
    assert_eq!(after_manager.status, RequestStatus::PendingApproval);
    assert_eq!(after_manager.current_step, 1);
    assert!(!h.notifier.sent_to("sec.one").is_empty());

    let step1 = after_manager.approval_steps[1].step_id;
    let done = h
        .coordinator
        .process_approval(
            request.request_id,
            step1,
            ApprovalAction::Approve,
            "sec.one",
            None,
            None,
        )
        .await?;
    assert_eq!(done.status, RequestStatus::Provisioned);
    assert!(h.provisioner.provisioned().contains(&request.request_id));

    let kinds: Vec<EventKind> = h.audit.events().iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::RequestSubmitted));
    assert!(kinds.contains(&EventKind::RequestApproved));
    assert!(kinds.contains(&EventKind::RequestProvisioned));

    // A terminal request accepts no further workflow actions.
    let err = h
        .coordinator
        .process_approval(
            request.request_id,
            step1,
            ApprovalAction::Approve,
            "sec.one",
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "STATE_ERROR");
    Ok(())
}

#[tokio::test]
async fn sla_sweep_escalates_each_step_at_most_once() -> Result<()> {
    let h = harness();
    let request = h
        .coordinator
        .create_request(request_input(vec!["Z_RISKY_VIEWER"]))?;
    h.coordinator.submit(request.request_id).await?;

    // Both stages carry due times from plan generation; at +49h the
    // manager stage (48h SLA) and the security stage (24h SLA) are
    // overdue.
    h.clock.advance(Duration::hours(49));
    let escalated = h.coordinator.sla_sweep().await?;
    assert_eq!(escalated, 2);

    let snapshot = h.coordinator.request(request.request_id).unwrap();
    let step = &snapshot.approval_steps[0];
    assert!(step.escalation_triggered);
    assert_eq!(
        step.paths[0].approver_ids,
        vec!["MGR1".to_string(), "MGR1_BOSS".to_string()]
    );

    // The security approver has no resolvable manager, so its stage is
    // flagged without growing its approver set.
    let security = &snapshot.approval_steps[1];
    assert!(security.escalation_triggered);
    assert_eq!(security.paths[0].approver_ids, vec!["sec.one".to_string()]);

    h.clock.advance(Duration::hours(1));
    let escalated_again = h.coordinator.sla_sweep().await?;
    assert_eq!(escalated_again, 0);

    let snapshot = h.coordinator.request(request.request_id).unwrap();
    assert_eq!(
        snapshot.approval_steps[0].paths[0].approver_ids,
        vec!["MGR1".to_string(), "MGR1_BOSS".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn rejection_is_terminal() -> Result<()> {
    let h = harness();
    let request = h
        .coordinator
        .create_request(request_input(vec!["Z_RISKY_VIEWER"]))?;
    let submitted = h.coordinator.submit(request.request_id).await?;
    let step0 = submitted.approval_steps[0].step_id;

    let rejected = h
        .coordinator
        .process_approval(
            request.request_id,
            step0,
            ApprovalAction::Reject,
            "MGR1",
            Some("no business need"),
            None,
        )
        .await?;
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("no business need"));

    let err = h
        .coordinator
        .process_approval(request.request_id, step0, ApprovalAction::Approve, "MGR1", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "STATE_ERROR");

    let kinds: Vec<EventKind> = h.audit.events().iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::RequestRejected));
    Ok(())
}

#[tokio::test]
async fn unauthorized_actors_fail_fast_without_mutation() -> Result<()> {
    let h = harness();
    let request = h
        .coordinator
        .create_request(request_input(vec!["Z_RISKY_VIEWER"]))?;
    let submitted = h.coordinator.submit(request.request_id).await?;
    let step0 = submitted.approval_steps[0].step_id;

    let err = h
        .coordinator
        .process_approval(
            request.request_id,
            step0,
            ApprovalAction::Approve,
            "INTRUDER",
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "PERMISSION_DENIED");

    let snapshot = h.coordinator.request(request.request_id).unwrap();
    assert_eq!(snapshot.status, RequestStatus::PendingApproval);
    assert_eq!(snapshot.current_step, 0);
    assert_eq!(snapshot.approval_steps[0].status, StepStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn delegation_reassigns_the_pending_path() -> Result<()> {
    let h = harness();
    let request = h
        .coordinator
        .create_request(request_input(vec!["Z_RISKY_VIEWER"]))?;
    let submitted = h.coordinator.submit(request.request_id).await?;
    let step0 = submitted.approval_steps[0].step_id;

    let delegated = h
        .coordinator
        .process_approval(
            request.request_id,
            step0,
            ApprovalAction::Delegate,
            "MGR1",
            Some("out of office"),
            Some("DEPUTY"),
        )
        .await?;
    assert_eq!(delegated.status, RequestStatus::PendingApproval);
    assert_eq!(delegated.approval_steps[0].status, StepStatus::Pending);
    assert_eq!(
        delegated.approval_steps[0].paths[0].approver_ids,
        vec!["DEPUTY".to_string()]
    );

    // The original approver no longer holds the path.
    let err = h
        .coordinator
        .process_approval(request.request_id, step0, ApprovalAction::Approve, "MGR1", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "PERMISSION_DENIED");

    let advanced = h
        .coordinator
        .process_approval(
            request.request_id,
            step0,
            ApprovalAction::Approve,
            "DEPUTY",
            None,
            None,
        )
        .await?;
    assert_eq!(advanced.current_step, 1);
    Ok(())
}

#[tokio::test]
async fn plan_generation_is_pure_given_fixed_inputs() -> Result<()> {
    let h = harness();
    let engine = WorkflowEngine::with_default_rules(
        Config::default().workflow,
        h.resolver.clone(),
        h.clock.clone(),
        ApproverDirectory {
            security_team: vec!["sec.one".to_string()],
            risk_team: Vec::new(),
            compliance_team: vec!["comp.one".to_string()],
            it_admin: vec!["it.one".to_string()],
        },
    )
    .unwrap();

    let mut request = h
        .coordinator
        .create_request(request_input(vec!["Z_RISKY_VIEWER"]))?;
    request.overall_risk_score = 75;
    request.risk_level = RiskLevel::High;

    let first = engine.generate_plan(&request).await?;
    let second = engine.generate_plan(&request).await?;

    let shape = |steps: &[access_governor::domain::request::ApprovalStep]| {
        steps
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    s.sla_hours,
                    s.paths
                        .iter()
                        .map(|p| (p.approver_ids.clone(), p.require_all, p.required))
                        .collect::<Vec<_>>(),
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&first), shape(&second));
    assert_eq!(first.len(), 2);
    Ok(())
}

#[tokio::test]
async fn all_optional_stage_advances_on_first_path_action() -> Result<()> {
    let h = harness();
    let engine = WorkflowEngine::new(
        Config::default().workflow,
        h.resolver.clone(),
        h.clock.clone(),
        ApproverDirectory::default(),
    );
    engine.add_rule(ApprovalRule {
        rule_id: "RULE_ADV_RISK".to_string(),
        name: "Risk Advisory".to_string(),
        approver_kind: ApproverKind::SpecificUsers,
        specific_approvers: vec!["risk.adv".to_string()],
        step_name: "Advisory Review".to_string(),
        required: false,
        stage_group: Some("Advisory Review".to_string()),
        priority: 10,
        ..ApprovalRule::default()
    });
    engine.add_rule(ApprovalRule {
        rule_id: "RULE_ADV_AUDIT".to_string(),
        name: "Audit Advisory".to_string(),
        approver_kind: ApproverKind::SpecificUsers,
        specific_approvers: vec!["audit.adv".to_string()],
        step_name: "Advisory Review".to_string(),
        required: false,
        stage_group: Some("Advisory Review".to_string()),
        priority: 20,
        ..ApprovalRule::default()
    });

    let mut request = h.coordinator.create_request(request_input(vec!["Z_CLEAN"]))?;
    let plan = engine.generate_plan(&request).await?;
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].paths.len(), 2);
    assert!(plan[0].paths.iter().all(|p| !p.required));

    let now = h.clock.now();
    engine.submit(&mut request, plan, now)?;
    let step_id = request.approval_steps[0].step_id;

    // With no required paths the stage's required set is vacuously
    // satisfied; the first path action moves the request forward instead
    // of leaving it pending forever.
    let outcome = engine.apply_action(
        &mut request,
        step_id,
        ApprovalAction::Approve,
        "risk.adv",
        None,
        None,
        now,
    )?;
    assert_eq!(outcome.status, RequestStatus::Approved);
    assert_eq!(request.status, RequestStatus::Approved);
    Ok(())
}

#[tokio::test]
async fn low_risk_requests_auto_approve_when_configured() -> Result<()> {
    let mut config = Config::default();
    config.requests.auto_approve_low_risk = true;
    let h = harness_with(config);

    let request = h
        .coordinator
        .create_request(request_input(vec!["Z_CLEAN"]))?;
    let done = h.coordinator.submit(request.request_id).await?;

    assert_eq!(done.status, RequestStatus::Provisioned);
    assert_eq!(done.final_decision.as_deref(), Some("auto_approved"));
    assert!(h.provisioner.provisioned().contains(&request.request_id));
    Ok(())
}

#[tokio::test]
async fn emergency_access_requires_an_available_firefighter() -> Result<()> {
    let h = harness();
    h.source.put_firefighter(FirefighterAvailability {
        firefighter_id: "FF_FIN_01".to_string(),
        available: false,
        locked: true,
        valid_to: None,
        owner: Some("security".to_string()),
    });

    let mut input = request_input(vec!["FF_FIN_01"]);
    input.request_type = RequestType::EmergencyAccess;
    let request = h.coordinator.create_request(input)?;

    let err = h.coordinator.submit(request.request_id).await.unwrap_err();
    assert_eq!(err.kind(), "VALIDATION_ERROR");

    h.source.put_firefighter(FirefighterAvailability {
        firefighter_id: "FF_FIN_01".to_string(),
        available: true,
        locked: false,
        valid_to: None,
        owner: Some("security".to_string()),
    });
    let submitted = h.coordinator.submit(request.request_id).await?;
    assert_eq!(submitted.status, RequestStatus::PendingApproval);
    Ok(())
}

#[tokio::test]
async fn temporary_access_expires_and_is_revoked() -> Result<()> {
    let h = harness();
    let mut input = request_input(vec!["Z_CLEAN"]);
    input.is_temporary = true;
    input.requested_end_date = Some(h.clock.now() + Duration::days(10));
    let request = h.coordinator.create_request(input)?;

    let submitted = h.coordinator.submit(request.request_id).await?;
    let step0 = submitted.approval_steps[0].step_id;
    let provisioned = h
        .coordinator
        .process_approval(request.request_id, step0, ApprovalAction::Approve, "MGR1", None, None)
        .await?;
    assert_eq!(provisioned.status, RequestStatus::Provisioned);
    assert!(provisioned.access_expires_at.is_some());

    h.clock.advance(Duration::days(8));
    let warned = h.coordinator.expiry_notifications(7).await?;
    assert_eq!(warned, 1);
    let warned_again = h.coordinator.expiry_notifications(7).await?;
    assert_eq!(warned_again, 0);

    h.clock.advance(Duration::days(3));
    let expired = h.coordinator.expiry_sweep().await?;
    assert_eq!(expired, 1);

    let snapshot = h.coordinator.request(request.request_id).unwrap();
    assert_eq!(snapshot.status, RequestStatus::Expired);
    assert!(h.provisioner.revoked().contains(&request.request_id));

    let kinds: Vec<EventKind> = h.audit.events().iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::RequestExpired));
    Ok(())
}

#[tokio::test]
async fn provisioning_retries_transient_failures_and_records_permanent_ones() -> Result<()> {
    let h = harness();
    h.provisioner.fail_transiently(2);

    let request = h
        .coordinator
        .create_request(request_input(vec!["Z_CLEAN"]))?;
    let submitted = h.coordinator.submit(request.request_id).await?;
    let step0 = submitted.approval_steps[0].step_id;
    let done = h
        .coordinator
        .process_approval(request.request_id, step0, ApprovalAction::Approve, "MGR1", None, None)
        .await?;
    assert_eq!(done.status, RequestStatus::Provisioned);

    // Permanent failure leaves the request Failed with the error recorded.
    let h2 = harness();
    h2.provisioner.fail_permanently(true);
    let request = h2
        .coordinator
        .create_request(request_input(vec!["Z_CLEAN"]))?;
    let submitted = h2.coordinator.submit(request.request_id).await?;
    let step0 = submitted.approval_steps[0].step_id;
    let failed = h2
        .coordinator
        .process_approval(request.request_id, step0, ApprovalAction::Approve, "MGR1", None, None)
        .await?;
    assert_eq!(failed.status, RequestStatus::Failed);
    assert!(!failed.provisioning_errors.is_empty());
    Ok(())
}

#[tokio::test]
async fn pending_approvals_inbox_lists_actionable_steps() -> Result<()> {
    let h = harness();
    let request = h
        .coordinator
        .create_request(request_input(vec!["Z_RISKY_VIEWER"]))?;
    h.coordinator.submit(request.request_id).await?;

    let inbox = h.coordinator.pending_approvals_for("MGR1");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].request_id, request.request_id);
    assert_eq!(inbox[0].step_name, "Manager Approval");

    // The security reviewer has nothing actionable until stage two opens.
    assert!(h.coordinator.pending_approvals_for("sec.one").is_empty());
    Ok(())
}
