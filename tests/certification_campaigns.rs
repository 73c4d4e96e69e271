use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use access_governor::domain::certification::{
    CampaignConfig, CampaignKind, CampaignScope, CampaignStatus, CertificationAction,
    ReviewerAssignment,
};
use access_governor::domain::events::{EventKind, SYSTEM_ACTOR};
use access_governor::infrastructure::config::{
    CertificationConfig, EvaluationConfig, TelemetryConfig,
};
use access_governor::infrastructure::connectors::{GrantedRole, MemoryAuditSink};
use access_governor::infrastructure::mock::{
    ManualClock, MemoryNotifier, MockEntitlementSource, MockUser, TableUserResolver,
};
use access_governor::services::certification::{CampaignSpec, CertificationEngine};
use access_governor::services::rules::RuleEngine;

fn granted(role_id: &str, granted_days_ago: i64, now: chrono::DateTime<Utc>) -> GrantedRole {
    GrantedRole {
        role_id: role_id.to_string(),
        role_name: role_id.replace('_', " "),
        system: "SAP".to_string(),
        granted_at: Some(now - Duration::days(granted_days_ago)),
        last_used: Some(now - Duration::days(14)),
        usage_count: 40,
    }
}

struct Harness {
    engine: CertificationEngine,
    clock: Arc<ManualClock>,
    notifier: Arc<MemoryNotifier>,
    audit: Arc<MemoryAuditSink>,
}

fn harness() -> Harness {
    access_governor::telemetry::init(&TelemetryConfig::default());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap(),
    ));
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
    let source = Arc::new(MockEntitlementSource::new());
    let resolver = Arc::new(TableUserResolver::new());
    let notifier = Arc::new(MemoryNotifier::new());
    let audit = Arc::new(MemoryAuditSink::default());

    source.put_user(
        "JSMITH",
        MockUser {
            department: "Finance".to_string(),
            entitlements: Vec::new(),
            roles: vec![
                granted("Z_AP_MANAGER", 900, now),
                granted("Z_VENDOR_MAINT", 400, now),
                granted("Z_PAYMENT_RUN", 100, now),
            ],
        },
    );
    source.put_user(
        "MBROWN",
        MockUser {
            department: "Procurement".to_string(),
            entitlements: Vec::new(),
            roles: vec![granted("Z_PURCHASER", 50, now)],
        },
    );

    resolver.set_manager("JSMITH", "mgr.finance");
    resolver.set_manager("MBROWN", "mgr.procurement");
    resolver.set_name("JSMITH", "John Smith");
    resolver.set_name("MBROWN", "Mary Brown");

    let rule_engine = Arc::new(
        RuleEngine::with_builtin_pack(clock.clone(), EvaluationConfig::default()).unwrap(),
    );
    let engine = CertificationEngine::new(
        rule_engine,
        source,
        resolver,
        notifier.clone(),
        audit.clone(),
        clock.clone(),
        CertificationConfig::default(),
    );
    engine.set_role_base_score("Z_PAYMENT_RUN", 40);
    engine.set_sod_role_pairs(vec![(
        vec!["Z_VENDOR_MAINT".to_string()],
        vec!["Z_PAYMENT_RUN".to_string()],
    )]);

    Harness {
        engine,
        clock,
        notifier,
        audit,
    }
}

fn finance_campaign_spec(config: Option<CampaignConfig>) -> CampaignSpec {
    CampaignSpec {
        name: "Q2 Finance Access Review".to_string(),
        description: "Quarterly review of finance access".to_string(),
        kind: CampaignKind::UserAccess,
        owner_id: "OWNER".to_string(),
        owner_name: "Campaign Owner".to_string(),
        start_date: None,
        end_date: None,
        scope: CampaignScope {
            systems: Vec::new(),
            departments: vec!["Finance".to_string()],
            risk_threshold: None,
            sod_only: false,
        },
        config,
    }
}

#[tokio::test]
async fn item_generation_scores_and_assigns_reviewers() {
    let h = harness();
    let campaign = h.engine.create_campaign(finance_campaign_spec(None));
    let generated = h.engine.generate_items(campaign.campaign_id).await.unwrap();

    // Only JSMITH is in Finance; one item per granted role.
    assert_eq!(generated.items.len(), 3);
    assert!(generated.items.iter().all(|i| i.user_id == "JSMITH"));
    assert!(generated.items.iter().all(|i| i.reviewer_id == "mgr.finance"));

    // Holding both sides of a known SoD pair flags every item of the user
    // and adds 30; Z_PAYMENT_RUN adds its base 40; the 900-day-old grant
    // adds 20 in tenure bonuses.
    let payment = generated
        .items
        .iter()
        .find(|i| i.access_id == "Z_PAYMENT_RUN")
        .unwrap();
    assert!(payment.has_sod_violation);
    assert_eq!(payment.risk_score, 70);

    let old_grant = generated
        .items
        .iter()
        .find(|i| i.access_id == "Z_AP_MANAGER")
        .unwrap();
    assert_eq!(old_grant.risk_score, 50);
}

#[tokio::test]
async fn campaign_completes_only_when_every_item_is_decided() {
    let h = harness();
    let campaign = h.engine.create_campaign(finance_campaign_spec(None));
    h.engine.generate_items(campaign.campaign_id).await.unwrap();
    let started = h.engine.start_campaign(campaign.campaign_id).await.unwrap();
    assert_eq!(started.status, CampaignStatus::Active);
    assert!(!h.notifier.sent_to("mgr.finance").is_empty());

    let items: Vec<_> = started.items.iter().map(|i| i.item_id).collect();
    for &item_id in &items[..items.len() - 1] {
        h.engine
            .process_decision(
                campaign.campaign_id,
                item_id,
                CertificationAction::Certify,
                "mgr.finance",
                Some("still required"),
                None,
            )
            .await
            .unwrap();
        let snapshot = h.engine.campaign(campaign.campaign_id).unwrap();
        assert_eq!(snapshot.status, CampaignStatus::Active);
    }

    h.engine
        .process_decision(
            campaign.campaign_id,
            *items.last().unwrap(),
            CertificationAction::Revoke,
            "mgr.finance",
            Some("no longer needed"),
            None,
        )
        .await
        .unwrap();

    let snapshot = h.engine.campaign(campaign.campaign_id).unwrap();
    assert_eq!(snapshot.status, CampaignStatus::Completed);
    assert_eq!(snapshot.completed_items, 3);
    assert_eq!(snapshot.certified_count, 2);
    assert_eq!(snapshot.revoked_count, 1);

    let kinds: Vec<EventKind> = h.audit.events().iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::CampaignStarted));
    assert!(kinds.contains(&EventKind::ItemDecided));
    assert!(kinds.contains(&EventKind::CampaignCompleted));
}

#[tokio::test]
async fn decision_guards_hold() {
    let h = harness();
    let campaign = h.engine.create_campaign(finance_campaign_spec(None));
    let generated = h.engine.generate_items(campaign.campaign_id).await.unwrap();
    h.engine.start_campaign(campaign.campaign_id).await.unwrap();
    let item_id = generated.items[0].item_id;

    // Only the assigned reviewer may decide.
    let err = h
        .engine
        .process_decision(
            campaign.campaign_id,
            item_id,
            CertificationAction::Certify,
            "SOMEONE_ELSE",
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "PERMISSION_DENIED");

    // Revocation requires comments when the campaign demands them.
    let err = h
        .engine
        .process_decision(
            campaign.campaign_id,
            item_id,
            CertificationAction::Revoke,
            "mgr.finance",
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION_ERROR");

    // Delegation reassigns without completing the item.
    h.engine
        .process_decision(
            campaign.campaign_id,
            item_id,
            CertificationAction::Delegate,
            "mgr.finance",
            Some("handing over"),
            Some("deputy.finance"),
        )
        .await
        .unwrap();
    let snapshot = h.engine.campaign(campaign.campaign_id).unwrap();
    let item = snapshot
        .items
        .iter()
        .find(|i| i.item_id == item_id)
        .unwrap();
    assert!(!item.is_completed);
    assert_eq!(item.delegated_to.as_deref(), Some("deputy.finance"));

    // The delegate can decide; a second decision is rejected.
    h.engine
        .process_decision(
            campaign.campaign_id,
            item_id,
            CertificationAction::Certify,
            "deputy.finance",
            None,
            None,
        )
        .await
        .unwrap();
    let err = h
        .engine
        .process_decision(
            campaign.campaign_id,
            item_id,
            CertificationAction::Certify,
            "deputy.finance",
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "STATE_ERROR");
}

#[tokio::test]
async fn expired_campaign_auto_revokes_remaining_items_as_system() {
    let h = harness();
    let config = CampaignConfig {
        allow_delegation: true,
        require_comments_for_revoke: true,
        auto_revoke_on_timeout: true,
        reminder_days: vec![7, 3, 1],
        reviewer_assignment: ReviewerAssignment::Manager,
    };
    let campaign = h.engine.create_campaign(finance_campaign_spec(Some(config)));
    h.engine.generate_items(campaign.campaign_id).await.unwrap();
    h.engine.start_campaign(campaign.campaign_id).await.unwrap();

    h.clock.advance(Duration::days(15));
    let expired = h.engine.expire_sweep().await.unwrap();
    assert_eq!(expired, 1);

    let snapshot = h.engine.campaign(campaign.campaign_id).unwrap();
    assert_eq!(snapshot.status, CampaignStatus::Completed);
    assert_eq!(snapshot.items.len(), 3);
    assert!(snapshot
        .items
        .iter()
        .all(|i| i.decision == Some(CertificationAction::Revoke) && i.is_completed));

    let decisions = h.engine.decisions();
    assert_eq!(decisions.len(), 3);
    assert!(decisions.iter().all(|d| d.reviewer_id == SYSTEM_ACTOR));

    let kinds: Vec<EventKind> = h.audit.events().iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::CampaignCompleted));
}

#[tokio::test]
async fn expired_campaign_without_auto_revoke_moves_to_in_review() {
    let h = harness();
    let campaign = h.engine.create_campaign(finance_campaign_spec(None));
    h.engine.generate_items(campaign.campaign_id).await.unwrap();
    h.engine.start_campaign(campaign.campaign_id).await.unwrap();

    h.clock.advance(Duration::days(15));
    h.engine.expire_sweep().await.unwrap();

    let snapshot = h.engine.campaign(campaign.campaign_id).unwrap();
    assert_eq!(snapshot.status, CampaignStatus::InReview);
    assert!(snapshot.items.iter().all(|i| i.is_overdue && !i.is_completed));
}

#[tokio::test]
async fn reminders_fire_on_configured_day_offsets() {
    let h = harness();
    let campaign = h.engine.create_campaign(finance_campaign_spec(None));
    h.engine.generate_items(campaign.campaign_id).await.unwrap();
    h.engine.start_campaign(campaign.campaign_id).await.unwrap();
    let start_notifications = h.notifier.sent_to("mgr.finance").len();

    // Default campaign length is 14 days; move to 3 days before due.
    h.clock.advance(Duration::days(11));
    let sent = h.engine.send_reminders().await.unwrap();
    assert_eq!(sent, 1);
    let reminders = h.notifier.sent_to("mgr.finance");
    assert_eq!(reminders.len(), start_notifications + 1);
    assert!(reminders.last().unwrap().subject.contains("reminder"));

    // Days not configured stay quiet.
    h.clock.advance(Duration::days(1));
    let sent = h.engine.send_reminders().await.unwrap();
    assert_eq!(sent, 0);
}

#[tokio::test]
async fn sod_violation_campaign_keeps_only_flagged_items() {
    let h = harness();
    let mut spec = finance_campaign_spec(None);
    spec.kind = CampaignKind::SodViolations;
    spec.scope.departments = Vec::new();
    let campaign = h.engine.create_campaign(spec);
    let generated = h.engine.generate_items(campaign.campaign_id).await.unwrap();

    // MBROWN has no conflicting pair, so only JSMITH's items survive.
    assert!(!generated.items.is_empty());
    assert!(generated.items.iter().all(|i| i.user_id == "JSMITH"));
    assert!(generated.items.iter().all(|i| i.has_sod_violation));
}

#[tokio::test]
async fn named_certifiers_are_assigned_round_robin() {
    let h = harness();
    let config = CampaignConfig {
        allow_delegation: true,
        require_comments_for_revoke: true,
        auto_revoke_on_timeout: false,
        reminder_days: vec![7, 3, 1],
        reviewer_assignment: ReviewerAssignment::Certifiers(vec![
            "cert.one".to_string(),
            "cert.two".to_string(),
        ]),
    };
    let campaign = h.engine.create_campaign(finance_campaign_spec(Some(config)));
    let generated = h.engine.generate_items(campaign.campaign_id).await.unwrap();

    let reviewers: Vec<&str> = generated
        .items
        .iter()
        .map(|i| i.reviewer_id.as_str())
        .collect();
    assert!(reviewers.contains(&"cert.one"));
    assert!(reviewers.contains(&"cert.two"));
}
