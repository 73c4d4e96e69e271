//! Risk analysis rule engine.
//!
//! Evaluates [`UserAccess`] snapshots against SoD and sensitive-access
//! rules, producing [`RiskViolation`]s. The rule set is read-heavy and
//! copy-on-write: mutations build a fresh indexed set off-line and publish
//! it atomically, so concurrent evaluations always see a consistent
//! snapshot.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::info;
use uuid::Uuid;

use crate::domain::models::{
    holds_all, ConflictEvidence, ConflictSet, Entitlement, RiskCategory, RiskRule, RiskSeverity,
    RiskViolation, RuleExceptions, RuleKind, RuleScope, UserAccess, ViolationStatus,
};
use crate::infrastructure::config::EvaluationConfig;
use crate::infrastructure::connectors::Clock;

use super::errors::{ServiceError, ServiceResult};

/// Summary statistics over a set of violations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSummary {
    pub total_violations: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    /// `round(100 * Σ severity / (n * 100))`, 0 when empty.
    pub aggregate_risk_score: u32,
    pub highest_severity: Option<RiskSeverity>,
    pub unique_rules_triggered: usize,
}

/// Options for batch evaluation.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Override of the configured concurrency ceiling.
    pub concurrency: Option<usize>,
    /// Deadline for the whole batch; on expiry the partial result is
    /// discarded and a transient error is returned.
    pub timeout: Option<std::time::Duration>,
}

/// Engine counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EngineStats {
    pub rules_loaded: u64,
    pub evaluations_performed: u64,
    pub violations_found: u64,
}

#[derive(Default)]
struct RuleSet {
    rules: BTreeMap<String, Arc<RiskRule>>,
    by_category: BTreeMap<String, Vec<String>>,
    by_kind: BTreeMap<RuleKind, Vec<String>>,
}

impl RuleSet {
    fn rebuild(rules: BTreeMap<String, Arc<RiskRule>>) -> Self {
        let mut by_category: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut by_kind: BTreeMap<RuleKind, Vec<String>> = BTreeMap::new();
        for (id, rule) in &rules {
            by_category
                .entry(rule.category.as_str().to_string())
                .or_default()
                .push(id.clone());
            by_kind.entry(rule.kind).or_default().push(id.clone());
        }
        Self {
            rules,
            by_category,
            by_kind,
        }
    }
}

/// Main rule engine for risk analysis.
pub struct RuleEngine {
    rule_set: RwLock<Arc<RuleSet>>,
    clock: Arc<dyn Clock>,
    batch_concurrency: usize,
    stats: Mutex<EngineStats>,
}

impl RuleEngine {
    /// Engine with an empty rule set.
    pub fn new(clock: Arc<dyn Clock>, evaluation: EvaluationConfig) -> Self {
        Self {
            rule_set: RwLock::new(Arc::new(RuleSet::default())),
            clock,
            batch_concurrency: evaluation.batch_concurrency.max(1),
            stats: Mutex::new(EngineStats::default()),
        }
    }

    /// Engine pre-loaded with the builtin SAP GRC rule pack.
    pub fn with_builtin_pack(
        clock: Arc<dyn Clock>,
        evaluation: EvaluationConfig,
    ) -> ServiceResult<Self> {
        let engine = Self::new(clock, evaluation);
        for rule in builtin_rule_pack() {
            engine.add_rule(rule)?;
        }
        Ok(engine)
    }

    /// Adds a rule, replacing any rule with the same id. Indices by
    /// category and kind are kept in sync.
    pub fn add_rule(&self, rule: RiskRule) -> ServiceResult<()> {
        validate_rule(&rule)?;
        let mut guard = self.rule_set.write();
        let mut rules = guard.rules.clone();
        rules.insert(rule.rule_id.clone(), Arc::new(rule));
        *guard = Arc::new(RuleSet::rebuild(rules));
        self.stats.lock().rules_loaded += 1;
        Ok(())
    }

    pub fn remove_rule(&self, rule_id: &str) -> ServiceResult<()> {
        let mut guard = self.rule_set.write();
        let mut rules = guard.rules.clone();
        if rules.remove(rule_id).is_none() {
            return Err(ServiceError::not_found("rule", rule_id));
        }
        *guard = Arc::new(RuleSet::rebuild(rules));
        Ok(())
    }

    /// Flips a rule's enabled flag in place.
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> ServiceResult<()> {
        let mut guard = self.rule_set.write();
        let mut rules = guard.rules.clone();
        let rule = rules
            .get(rule_id)
            .ok_or_else(|| ServiceError::not_found("rule", rule_id))?;
        let mut updated = (**rule).clone();
        updated.enabled = enabled;
        rules.insert(rule_id.to_string(), Arc::new(updated));
        *guard = Arc::new(RuleSet::rebuild(rules));
        Ok(())
    }

    pub fn rule(&self, rule_id: &str) -> Option<Arc<RiskRule>> {
        self.rule_set.read().rules.get(rule_id).cloned()
    }

    pub fn rules(&self) -> Vec<Arc<RiskRule>> {
        self.rule_set.read().rules.values().cloned().collect()
    }

    pub fn rule_ids_by_category(&self, category: &str) -> Vec<String> {
        self.rule_set
            .read()
            .by_category
            .get(category)
            .cloned()
            .unwrap_or_default()
    }

    pub fn rule_ids_by_kind(&self, kind: RuleKind) -> Vec<String> {
        self.rule_set
            .read()
            .by_kind
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Evaluates a user against all applicable rules (or the given subset).
    ///
    /// Deterministic: re-evaluating the same `(rules, user)` yields
    /// violations equal on `(rule_id, conflict_signature)`, returned in
    /// `(severity DESC, rule_id ASC, signature ASC)` order. Once a rule set
    /// loads, evaluation never fails; unknown user attributes simply do not
    /// match.
    pub fn evaluate(&self, user: &UserAccess, rule_ids: Option<&[String]>) -> Vec<RiskViolation> {
        let snapshot = self.rule_set.read().clone();
        let now = self.clock.now();
        let violations = evaluate_against(&snapshot, user, rule_ids, now);

        let mut stats = self.stats.lock();
        stats.evaluations_performed += 1;
        stats.violations_found += violations.len() as u64;

        violations
    }

    /// Evaluates many independent users in parallel, bounded by the
    /// configured concurrency ceiling. Users without violations are
    /// omitted from the result.
    pub async fn evaluate_batch(
        &self,
        users: Vec<UserAccess>,
        rule_ids: Option<Vec<String>>,
        options: BatchOptions,
    ) -> ServiceResult<HashMap<String, Vec<RiskViolation>>> {
        let concurrency = options
            .concurrency
            .unwrap_or(self.batch_concurrency)
            .max(1);
        let ids: Option<Arc<Vec<String>>> = rule_ids.map(Arc::new);

        let run = async {
            stream::iter(users.into_iter())
                .map(|user| {
                    let ids = ids.clone();
                    async move {
                        let violations =
                            self.evaluate(&user, ids.as_ref().map(|v| v.as_slice()));
                        (user.user_id, violations)
                    }
                })
                .buffer_unordered(concurrency)
                .collect::<Vec<(String, Vec<RiskViolation>)>>()
                .await
        };

        let results = match options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, run).await.map_err(|_| {
                ServiceError::TransientExternal("batch evaluation deadline exceeded".to_string())
            })?,
            None => run.await,
        };

        Ok(results
            .into_iter()
            .filter(|(_, violations)| !violations.is_empty())
            .collect())
    }

    /// Counts by severity and category plus the aggregate risk score.
    pub fn summarize(&self, violations: &[RiskViolation]) -> RiskSummary {
        let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
        let mut unique_rules: Vec<&str> = Vec::new();

        for violation in violations {
            *by_severity
                .entry(violation.severity.as_str().to_string())
                .or_default() += 1;
            *by_category
                .entry(violation.category.as_str().to_string())
                .or_default() += 1;
            if !unique_rules.contains(&violation.rule_id.as_str()) {
                unique_rules.push(&violation.rule_id);
            }
        }

        let total_weight: u32 = violations.iter().map(|v| v.severity.weight()).sum();
        let aggregate = if violations.is_empty() {
            0
        } else {
            (f64::from(total_weight) / violations.len() as f64).round() as u32
        };

        RiskSummary {
            total_violations: violations.len(),
            by_severity,
            by_category,
            aggregate_risk_score: aggregate,
            highest_severity: violations.iter().map(|v| v.severity).max(),
            unique_rules_triggered: unique_rules.len(),
        }
    }

    /// Loads rules from a declarative pack; duplicate ids replace.
    /// Malformed rules fail the whole load.
    pub fn load_spec(&self, spec: RulePackSpec) -> ServiceResult<usize> {
        let mut parsed = Vec::with_capacity(spec.rules.len());
        for rule_spec in spec.rules {
            parsed.push(parse_rule_spec(rule_spec)?);
        }
        let count = parsed.len();
        for rule in parsed {
            self.add_rule(rule)?;
        }
        info!(count, "loaded rule pack");
        Ok(count)
    }

    /// Loads a JSON rule pack from disk.
    pub fn load_spec_from_path(&self, path: &Path) -> ServiceResult<usize> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            ServiceError::Fatal(format!("cannot read rule pack {}: {err}", path.display()))
        })?;
        let spec: RulePackSpec = serde_json::from_str(&raw).map_err(|err| {
            ServiceError::Fatal(format!("malformed rule pack {}: {err}", path.display()))
        })?;
        self.load_spec(spec)
    }

    /// Exports the current rule set as a declarative pack.
    pub fn export_spec(&self) -> RulePackSpec {
        let snapshot = self.rule_set.read().clone();
        RulePackSpec {
            rules: snapshot
                .rules
                .values()
                .map(|rule| rule_to_spec(rule))
                .collect(),
        }
    }

    pub fn statistics(&self) -> EngineStats {
        *self.stats.lock()
    }
}

fn validate_rule(rule: &RiskRule) -> ServiceResult<()> {
    match rule.kind {
        RuleKind::Sod => {
            if rule.conflicts.is_empty() {
                return Err(ServiceError::Fatal(format!(
                    "SoD rule {} has no conflict sets",
                    rule.rule_id
                )));
            }
            for conflict in &rule.conflicts {
                if conflict.function_a_entitlements.is_empty()
                    || conflict.function_b_entitlements.is_empty()
                {
                    return Err(ServiceError::Fatal(format!(
                        "SoD rule {} conflict '{}' has an empty function bundle",
                        rule.rule_id, conflict.name
                    )));
                }
            }
        }
        RuleKind::Sensitive => {
            if rule.sensitive_entitlements.is_empty() {
                return Err(ServiceError::Fatal(format!(
                    "sensitive rule {} has no required entitlements",
                    rule.rule_id
                )));
            }
        }
        // Tag-only kinds carry no evaluation payload to validate.
        _ => {}
    }
    Ok(())
}

fn evaluate_against(
    rule_set: &RuleSet,
    user: &UserAccess,
    rule_ids: Option<&[String]>,
    now: DateTime<Utc>,
) -> Vec<RiskViolation> {
    let mut violations = Vec::new();

    let selected: Vec<&Arc<RiskRule>> = match rule_ids {
        Some(ids) => ids.iter().filter_map(|id| rule_set.rules.get(id)).collect(),
        None => rule_set.rules.values().collect(),
    };

    for rule in selected {
        if !rule.is_applicable(user, now) {
            continue;
        }
        match rule.kind {
            RuleKind::Sod => {
                for conflict in &rule.conflicts {
                    if let Some(hit) = conflict.check(&user.entitlements) {
                        violations.push(build_violation(
                            rule,
                            user,
                            conflict.signature(),
                            ConflictEvidence::Sod {
                                conflict_name: conflict.name.clone(),
                                function_a: hit.function_a,
                                function_b: hit.function_b,
                            },
                            now,
                        ));
                    }
                }
            }
            RuleKind::Sensitive => {
                if holds_all(&rule.sensitive_entitlements, &user.entitlements) {
                    let mut keys: Vec<String> = rule
                        .sensitive_entitlements
                        .iter()
                        .map(Entitlement::canonical_key)
                        .collect();
                    keys.sort();
                    let matched: Vec<Entitlement> = user
                        .entitlements
                        .iter()
                        .filter(|have| {
                            rule.sensitive_entitlements
                                .iter()
                                .any(|req| req.matches(have))
                        })
                        .cloned()
                        .collect();
                    let signature = keys.join("|");
                    violations.push(build_violation(
                        rule,
                        user,
                        signature,
                        ConflictEvidence::Sensitive {
                            entitlements: keys,
                            matched,
                        },
                        now,
                    ));
                }
            }
            // Pluggable evaluator kinds without semantics yet.
            _ => {}
        }
    }

    violations.sort_by(|a, b| {
        b.severity
            .weight()
            .cmp(&a.severity.weight())
            .then_with(|| a.rule_id.cmp(&b.rule_id))
            .then_with(|| a.conflict_signature.cmp(&b.conflict_signature))
    });

    violations
}

fn build_violation(
    rule: &RiskRule,
    user: &UserAccess,
    signature: String,
    evidence: ConflictEvidence,
    now: DateTime<Utc>,
) -> RiskViolation {
    RiskViolation {
        violation_id: Uuid::new_v4(),
        rule_id: rule.rule_id.clone(),
        rule_name: rule.name.clone(),
        kind: rule.kind,
        severity: rule.severity,
        user_id: user.user_id.clone(),
        evidence,
        conflict_signature: signature,
        category: rule.category.clone(),
        business_impact: rule.business_impact.clone(),
        recommended_actions: rule.recommended_actions.clone(),
        mitigation_controls: rule.mitigation_controls.clone(),
        status: ViolationStatus::Open,
        detected_at: now,
    }
}

/// Declarative rule pack: the serialization format for loading and
/// exporting rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulePackSpec {
    pub rules: Vec<RuleSpec>,
}

/// One rule in a pack. `kind` and `severity` use the wire names
/// (`segregation_of_duties`, `sensitive_access`, `low`..`critical`);
/// unknown values fail the load.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: String,
    pub severity: String,
    #[serde(default = "custom_category")]
    pub category: String,
    #[serde(default)]
    pub conflicts: Vec<ConflictSet>,
    #[serde(default)]
    pub sensitive_entitlements: Vec<Entitlement>,
    #[serde(default)]
    pub applies_to: Option<RuleScope>,
    #[serde(default)]
    pub exceptions: Option<RuleExceptions>,
    #[serde(default)]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default = "spec_enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub business_impact: String,
    #[serde(default)]
    pub mitigation_controls: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
}

fn custom_category() -> String {
    "Custom".to_string()
}

fn spec_enabled_default() -> bool {
    true
}

fn parse_rule_spec(spec: RuleSpec) -> ServiceResult<RiskRule> {
    let kind: RuleKind = spec
        .kind
        .parse()
        .map_err(|err: String| ServiceError::Fatal(format!("rule {}: {err}", spec.id)))?;
    let severity: RiskSeverity = spec
        .severity
        .parse()
        .map_err(|err: String| ServiceError::Fatal(format!("rule {}: {err}", spec.id)))?;

    Ok(RiskRule {
        rule_id: spec.id,
        name: spec.name,
        description: spec.description,
        kind,
        severity,
        category: RiskCategory::new(spec.category),
        conflicts: spec.conflicts,
        sensitive_entitlements: spec.sensitive_entitlements,
        business_impact: spec.business_impact,
        mitigation_controls: spec.mitigation_controls,
        recommended_actions: spec.recommended_actions,
        scope: spec.applies_to.unwrap_or_default(),
        exceptions: spec.exceptions.unwrap_or_default(),
        effective_from: spec.effective_from,
        expiry_date: spec.expiry_date,
        enabled: spec.enabled,
        version: spec.version.unwrap_or_else(|| "1.0".to_string()),
    })
}

fn rule_to_spec(rule: &RiskRule) -> RuleSpec {
    RuleSpec {
        id: rule.rule_id.clone(),
        name: rule.name.clone(),
        description: rule.description.clone(),
        kind: rule.kind.as_str().to_string(),
        severity: rule.severity.as_str().to_string(),
        category: rule.category.as_str().to_string(),
        conflicts: rule.conflicts.clone(),
        sensitive_entitlements: rule.sensitive_entitlements.clone(),
        applies_to: Some(rule.scope.clone()),
        exceptions: Some(rule.exceptions.clone()),
        effective_from: rule.effective_from,
        expiry_date: rule.expiry_date,
        enabled: rule.enabled,
        version: Some(rule.version.clone()),
        business_impact: rule.business_impact.clone(),
        mitigation_controls: rule.mitigation_controls.clone(),
        recommended_actions: rule.recommended_actions.clone(),
    }
}

fn tcode(value: &str) -> Entitlement {
    Entitlement::new("S_TCODE", "TCD", value)
}

fn sod_rule(
    rule_id: &str,
    name: &str,
    description: &str,
    severity: RiskSeverity,
    category: &str,
    conflicts: Vec<ConflictSet>,
    business_impact: &str,
) -> RiskRule {
    RiskRule {
        rule_id: rule_id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        kind: RuleKind::Sod,
        severity,
        category: RiskCategory::new(category),
        conflicts,
        sensitive_entitlements: Vec::new(),
        business_impact: business_impact.to_string(),
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

fn sensitive_rule(
    rule_id: &str,
    name: &str,
    description: &str,
    severity: RiskSeverity,
    category: &str,
    entitlements: Vec<Entitlement>,
    business_impact: &str,
) -> RiskRule {
    RiskRule {
        rule_id: rule_id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        kind: RuleKind::Sensitive,
        severity,
        category: RiskCategory::new(category),
        conflicts: Vec::new(),
        sensitive_entitlements: entitlements,
        business_impact: business_impact.to_string(),
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

/// Standard SAP GRC-style starter rules covering the major business
/// processes.
pub fn builtin_rule_pack() -> Vec<RiskRule> {
    let mut pack = Vec::new();

    pack.push({
        let mut rule = sod_rule(
            "FI_P2P_001",
            "Purchase to Pay - Vendor Creation & Payment",
            "User can create vendors AND execute payments, creating fraud risk",
            RiskSeverity::Critical,
            RiskCategory::FINANCIAL,
            vec![ConflictSet {
                name: "Vendor Creation vs Payment Execution".to_string(),
                description: "Segregation between vendor master maintenance and payment processing"
                    .to_string(),
                function_a_name: "Vendor Creation".to_string(),
                function_a_entitlements: vec![tcode("XK01"), tcode("FK01")],
                function_b_name: "Payment Execution".to_string(),
                function_b_entitlements: vec![tcode("F110"), tcode("F-53")],
            }],
            "Prevents ghost vendor fraud where the same person creates fictitious vendors and pays them",
        );
        rule.mitigation_controls = vec![
            "Dual approval for payments > $10,000".to_string(),
            "Monthly vendor audit review".to_string(),
            "Automated duplicate vendor detection".to_string(),
        ];
        rule.recommended_actions = vec![
            "Remove payment execution from user".to_string(),
            "Implement payment approval workflow".to_string(),
            "Assign to different cost centers".to_string(),
        ];
        rule
    });

    pack.push(sod_rule(
        "FI_P2P_002",
        "Purchase to Pay - PO Creation & Goods Receipt",
        "User can create purchase orders AND post goods receipts",
        RiskSeverity::High,
        RiskCategory::PROCUREMENT,
        vec![ConflictSet {
            name: "PO Creation vs Goods Receipt".to_string(),
            description: "Segregation between purchasing and warehouse receipt".to_string(),
            function_a_name: "Purchase Order Creation".to_string(),
            function_a_entitlements: vec![tcode("ME21N"), tcode("ME22N")],
            function_b_name: "Goods Receipt Posting".to_string(),
            function_b_entitlements: vec![tcode("MIGO"), tcode("MB01")],
        }],
        "Prevents fraudulent goods receipt against fictitious or inflated POs",
    ));

    pack.push(sod_rule(
        "FI_GL_001",
        "General Ledger - Post & Park Journal Entries",
        "User can both post and park journal entries",
        RiskSeverity::High,
        RiskCategory::FINANCIAL,
        vec![ConflictSet {
            name: "Journal Entry Posting vs Parking".to_string(),
            description: "Segregation between parking and final posting of journals".to_string(),
            function_a_name: "Park Journal Entry".to_string(),
            function_a_entitlements: vec![tcode("FBV1"), tcode("F-65")],
            function_b_name: "Post Journal Entry".to_string(),
            function_b_entitlements: vec![tcode("F-02"), tcode("FB01"), tcode("FBV2")],
        }],
        "Dual control over journal entries prevents unauthorized postings",
    ));

    pack.push(sod_rule(
        "HR_PAY_001",
        "Payroll - Change Employee Bank & Run Payroll",
        "User can modify employee bank details AND execute payroll runs",
        RiskSeverity::Critical,
        RiskCategory::HR_PAYROLL,
        vec![ConflictSet {
            name: "Bank Maintenance vs Payroll Execution".to_string(),
            description: "Segregation between HR master data and payroll processing".to_string(),
            function_a_name: "Employee Bank Details Maintenance".to_string(),
            function_a_entitlements: vec![
                tcode("PA30"),
                Entitlement::new("P_ORGIN", "INFTY", "0009"),
            ],
            function_b_name: "Payroll Execution".to_string(),
            function_b_entitlements: vec![tcode("PC00_M99_CALC"), tcode("PC00_M99_CIPE")],
        }],
        "Prevents payroll fraud through unauthorized bank detail changes",
    ));

    pack.push(sod_rule(
        "IT_SEC_001",
        "Security - User Administration & Role Assignment",
        "User can create users AND assign roles",
        RiskSeverity::Critical,
        RiskCategory::IT_SECURITY,
        vec![ConflictSet {
            name: "User Creation vs Role Assignment".to_string(),
            description: "Segregation between user provisioning and authorization".to_string(),
            function_a_name: "User Creation/Maintenance".to_string(),
            function_a_entitlements: vec![
                tcode("SU01"),
                Entitlement::new("S_USER_GRP", "ACTVT", "01"),
            ],
            function_b_name: "Role Assignment".to_string(),
            function_b_entitlements: vec![
                tcode("SU01"),
                Entitlement::new("S_USER_AGR", "ACTVT", "22"),
            ],
        }],
        "Prevents unauthorized elevation of privileges through user/role manipulation",
    ));

    pack.push(sensitive_rule(
        "IT_SENS_001",
        "Sensitive - Debug/Replace in Production",
        "User has debug and replace capability in production",
        RiskSeverity::Critical,
        RiskCategory::IT_SECURITY,
        vec![
            Entitlement::new("S_DEVELOP", "ACTVT", "02"),
            Entitlement::new("S_DEVELOP", "OBJTYPE", "DEBUG"),
        ],
        "Debug with replace allows runtime code modification, bypassing all controls",
    ));

    pack.push(sensitive_rule(
        "IT_SENS_002",
        "Sensitive - Direct Table Modification",
        "User can directly modify database tables",
        RiskSeverity::Critical,
        RiskCategory::IT_SECURITY,
        vec![
            tcode("SE16N"),
            Entitlement::new("S_TABU_DIS", "ACTVT", "02"),
        ],
        "Direct table access bypasses all application-level controls and audit trails",
    ));

    pack
}
