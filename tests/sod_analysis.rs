use std::sync::Arc;

use chrono::{TimeZone, Utc};

use access_governor::domain::models::{
    ConflictSet, Entitlement, RiskCategory, RiskRule, RiskSeverity, RuleExceptions, RuleKind,
    RuleScope, UserAccess,
};
use access_governor::infrastructure::config::EvaluationConfig;
use access_governor::infrastructure::mock::ManualClock;
use access_governor::services::org_filter::{
    OrgField, OrgFieldKind, OrgFootprint, OrgRuleEngine, OrgRuleKind, OrganizationalRule,
};
use access_governor::services::rules::{BatchOptions, RuleEngine};

fn tcode(value: &str) -> Entitlement {
    Entitlement::new("S_TCODE", "TCD", value)
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
    ))
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

fn engine_with_test_rule() -> RuleEngine {
    let engine = RuleEngine::new(clock(), EvaluationConfig::default());
    engine.add_rule(vendor_payment_rule()).unwrap();
    engine
}

#[test]
fn sod_hit_yields_critical_violation_and_full_score() {
    let engine = engine_with_test_rule();
    let user =
        UserAccess::new("JSMITH").with_entitlements(vec![tcode("XK01"), tcode("F110")]);

    let violations = engine.evaluate(&user, None);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule_id, "TEST_SOD_001");
    assert_eq!(violations[0].severity, RiskSeverity::Critical);

    let summary = engine.summarize(&violations);
    assert_eq!(summary.by_severity.get("critical"), Some(&1));
    assert_eq!(summary.aggregate_risk_score, 100);
}

#[test]
fn one_sided_access_is_not_a_conflict() {
    let engine = engine_with_test_rule();
    let user = UserAccess::new("JSMITH").with_entitlements(vec![tcode("XK01")]);
    assert!(engine.evaluate(&user, None).is_empty());
}

#[test]
fn evaluation_is_deterministic_across_invocations() {
    let engine = RuleEngine::with_builtin_pack(clock(), EvaluationConfig::default()).unwrap();
    engine.add_rule(vendor_payment_rule()).unwrap();
    let user = UserAccess::new("JSMITH").with_entitlements(vec![
        tcode("XK01"),
        tcode("FK01"),
        tcode("F110"),
        tcode("F-53"),
        tcode("SE16N"),
        Entitlement::new("S_TABU_DIS", "ACTVT", "02"),
    ]);

    let keys = |violations: Vec<access_governor::domain::models::RiskViolation>| {
        violations
            .into_iter()
            .map(|v| (v.rule_id, v.conflict_signature))
            .collect::<Vec<_>>()
    };

    let first = keys(engine.evaluate(&user, None));
    let second = keys(engine.evaluate(&user, None));
    assert_eq!(first, second);
    assert!(!first.is_empty());
}

#[test]
fn disabling_a_rule_removes_exactly_that_rule() {
    let engine = RuleEngine::with_builtin_pack(clock(), EvaluationConfig::default()).unwrap();
    engine.add_rule(vendor_payment_rule()).unwrap();
    let user = UserAccess::new("JSMITH").with_entitlements(vec![
        tcode("XK01"),
        tcode("FK01"),
        tcode("F110"),
        tcode("F-53"),
    ]);

    let before = engine.evaluate(&user, None);
    assert!(before.iter().any(|v| v.rule_id == "TEST_SOD_001"));

    engine.set_rule_enabled("TEST_SOD_001", false).unwrap();
    let after = engine.evaluate(&user, None);

    let expected: Vec<&str> = before
        .iter()
        .filter(|v| v.rule_id != "TEST_SOD_001")
        .map(|v| v.rule_id.as_str())
        .collect();
    let actual: Vec<&str> = after.iter().map(|v| v.rule_id.as_str()).collect();
    assert_eq!(expected, actual);
}

#[test]
fn adding_entitlements_never_resolves_violations() {
    let engine = RuleEngine::with_builtin_pack(clock(), EvaluationConfig::default()).unwrap();
    engine.add_rule(vendor_payment_rule()).unwrap();

    let base_entitlements = vec![tcode("XK01"), tcode("F110"), tcode("SE16N")];
    let extra_entitlements = vec![
        tcode("FK01"),
        tcode("F-53"),
        Entitlement::new("S_TABU_DIS", "ACTVT", "02"),
        tcode("ME21N"),
        tcode("ME22N"),
        tcode("MIGO"),
    ];

    let base_user = UserAccess::new("U1").with_entitlements(base_entitlements.clone());
    let mut widened = base_entitlements;
    widened.extend(extra_entitlements);
    let widened_user = UserAccess::new("U1").with_entitlements(widened);

    let base_keys: Vec<(String, String)> = engine
        .evaluate(&base_user, None)
        .into_iter()
        .map(|v| (v.rule_id, v.conflict_signature))
        .collect();
    let widened_keys: Vec<(String, String)> = engine
        .evaluate(&widened_user, None)
        .into_iter()
        .map(|v| (v.rule_id, v.conflict_signature))
        .collect();

    for key in &base_keys {
        assert!(
            widened_keys.contains(key),
            "violation {key:?} disappeared after adding access"
        );
    }
    assert!(widened_keys.len() > base_keys.len());
}

#[test]
fn wildcard_rule_value_matches_any_user_value() {
    let engine = RuleEngine::new(clock(), EvaluationConfig::default());
    let mut rule = vendor_payment_rule();
    rule.rule_id = "TEST_SOD_WILD".to_string();
    rule.conflicts[0].function_a_entitlements =
        vec![Entitlement::new("F_BKPF_BUK", "BUKRS", "*")];
    engine.add_rule(rule).unwrap();

    let user = UserAccess::new("U1").with_entitlements(vec![
        Entitlement::new("F_BKPF_BUK", "BUKRS", "4711"),
        tcode("F110"),
    ]);
    assert_eq!(engine.evaluate(&user, None).len(), 1);
}

#[tokio::test]
async fn batch_evaluation_is_independent_per_user() {
    let engine = engine_with_test_rule();
    let risky =
        UserAccess::new("RISKY").with_entitlements(vec![tcode("XK01"), tcode("F110")]);
    let clean = UserAccess::new("CLEAN").with_entitlements(vec![tcode("FB60")]);

    let results = engine
        .evaluate_batch(vec![risky, clean], None, BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results.get("RISKY").map(Vec::len), Some(1));
}

#[test]
fn org_exclusion_filters_conflict_across_company_codes() {
    let mut org = OrgRuleEngine::new();
    org.upsert_org_rule(OrganizationalRule {
        rule_id: "ORG-CC-SEP".to_string(),
        name: "Company Code Separation".to_string(),
        description: String::new(),
        kind: OrgRuleKind::Exclusion,
        risk_ids: vec!["TEST_SOD_001".to_string()],
        risk_categories: Vec::new(),
        org_fields: vec![OrgField::new(OrgFieldKind::CompanyCode)],
        require_all_fields: true,
        is_active: true,
        priority: 10,
    });

    let mut side_a = OrgFootprint::new();
    side_a.insert("company_code".to_string(), vec!["1000".to_string()]);
    let mut side_b = OrgFootprint::new();
    side_b.insert("company_code".to_string(), vec!["2000".to_string()]);

    let outcome = org.filter_risk("TEST_SOD_001", "Financial", &side_a, &side_b, None);
    assert!(outcome.filtered);
    assert!(outcome.applied_rules.contains(&"ORG-CC-SEP".to_string()));
    assert!(outcome.reason.contains("Company Code Separation"));

    // Same company code on both sides keeps the violation.
    let outcome = org.filter_risk("TEST_SOD_001", "Financial", &side_a, &side_a, None);
    assert!(!outcome.filtered);
}

#[test]
fn org_exclusion_is_symmetric_in_its_sides() {
    let mut org = OrgRuleEngine::new();
    org.upsert_org_rule(OrganizationalRule {
        rule_id: "ORG-CC-SEP".to_string(),
        name: "Company Code Separation".to_string(),
        description: String::new(),
        kind: OrgRuleKind::Exclusion,
        risk_ids: Vec::new(),
        risk_categories: Vec::new(),
        org_fields: vec![OrgField::new(OrgFieldKind::CompanyCode)],
        require_all_fields: true,
        is_active: true,
        priority: 10,
    });

    let footprints = [
        (vec!["1000"], vec!["2000"]),
        (vec!["1000"], vec!["1000"]),
        (vec!["1000", "2000"], vec!["2000"]),
        (vec![], vec!["2000"]),
    ];

    for (a_values, b_values) in footprints {
        let mut side_a = OrgFootprint::new();
        if !a_values.is_empty() {
            side_a.insert(
                "company_code".to_string(),
                a_values.iter().map(|v| v.to_string()).collect(),
            );
        }
        let mut side_b = OrgFootprint::new();
        if !b_values.is_empty() {
            side_b.insert(
                "company_code".to_string(),
                b_values.iter().map(|v| v.to_string()).collect(),
            );
        }

        let forward = org.filter_risk("R", "Financial", &side_a, &side_b, None);
        let backward = org.filter_risk("R", "Financial", &side_b, &side_a, None);
        assert_eq!(forward.filtered, backward.filtered);
    }
}
