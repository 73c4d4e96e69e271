//! Canonical entitlement and risk models.
//!
//! Everything the rule engine reasons about lives here: the atomic
//! [`Entitlement`] tuple, business-level [`Permission`] bundles, SoD
//! [`ConflictSet`]s, [`RiskRule`] definitions with applicability predicates,
//! immutable [`UserAccess`] snapshots, and the [`RiskViolation`]s the engine
//! produces.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Risk severity on the numeric scale used throughout the platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskSeverity {
    /// Numeric weight: Low=10, Medium=30, High=60, Critical=100.
    pub fn weight(&self) -> u32 {
        match self {
            RiskSeverity::Low => 10,
            RiskSeverity::Medium => 30,
            RiskSeverity::High => 60,
            RiskSeverity::Critical => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskSeverity::Low => "low",
            RiskSeverity::Medium => "medium",
            RiskSeverity::High => "high",
            RiskSeverity::Critical => "critical",
        }
    }
}

impl FromStr for RiskSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(RiskSeverity::Low),
            "medium" => Ok(RiskSeverity::Medium),
            "high" => Ok(RiskSeverity::High),
            "critical" => Ok(RiskSeverity::Critical),
            other => Err(format!("unknown risk severity {other}")),
        }
    }
}

/// Kinds of access-control rules.
///
/// Only `Sod` and `Sensitive` carry evaluation semantics today; the
/// remaining kinds are tags reserved for pluggable evaluators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleKind {
    Sod,
    Sensitive,
    CriticalAction,
    Behavioral,
    Contextual,
    Attribute,
    Composite,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Sod => "segregation_of_duties",
            RuleKind::Sensitive => "sensitive_access",
            RuleKind::CriticalAction => "critical_action",
            RuleKind::Behavioral => "behavioral_anomaly",
            RuleKind::Contextual => "contextual_risk",
            RuleKind::Attribute => "attribute_based",
            RuleKind::Composite => "composite_rule",
        }
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "segregation_of_duties" | "sod" => Ok(RuleKind::Sod),
            "sensitive_access" | "sensitive" => Ok(RuleKind::Sensitive),
            "critical_action" => Ok(RuleKind::CriticalAction),
            "behavioral_anomaly" => Ok(RuleKind::Behavioral),
            "contextual_risk" => Ok(RuleKind::Contextual),
            "attribute_based" => Ok(RuleKind::Attribute),
            "composite_rule" => Ok(RuleKind::Composite),
            other => Err(format!("unknown rule kind {other}")),
        }
    }
}

/// Free-form business risk taxonomy tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RiskCategory(String);

impl RiskCategory {
    pub const FINANCIAL: &'static str = "Financial";
    pub const PROCUREMENT: &'static str = "Procurement";
    pub const HR_PAYROLL: &'static str = "HR & Payroll";
    pub const IT_SECURITY: &'static str = "IT Security";
    pub const MASTER_DATA: &'static str = "Master Data";
    pub const BASIS: &'static str = "Basis Administration";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RiskCategory {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Overall risk level derived from an aggregate score in `[0, 100]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Single threshold table used by every subsystem: critical >= 80,
    /// high >= 60, medium >= 30, else low.
    pub fn from_score(score: u32) -> Self {
        if score >= 80 {
            RiskLevel::Critical
        } else if score >= 60 {
            RiskLevel::High
        } else if score >= 30 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level {other}")),
        }
    }
}

fn default_system() -> String {
    "SAP".to_string()
}

/// The atomic authorization unit: `(auth_object, field, value, activity?, system)`.
///
/// Two entitlements are equal iff all five attributes match. `*` in `value`
/// is a wildcard on either side.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Entitlement {
    pub auth_object: String,
    pub field: String,
    pub value: String,
    #[serde(default)]
    pub activity: Option<String>,
    #[serde(default = "default_system")]
    pub system: String,
}

impl Entitlement {
    pub fn new(
        auth_object: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            auth_object: auth_object.into(),
            field: field.into(),
            value: value.into(),
            activity: None,
            system: default_system(),
        }
    }

    pub fn with_activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = Some(activity.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    /// Deterministic canonical key for set operations and conflict
    /// signatures.
    pub fn canonical_key(&self) -> String {
        let mut key = format!(
            "{}:{}:{}:{}",
            self.system, self.auth_object, self.field, self.value
        );
        if let Some(activity) = &self.activity {
            key.push(':');
            key.push_str(activity);
        }
        key
    }

    /// Wildcard-aware match. A `*` value on either side matches any value
    /// for the same `(auth_object, field)`; activity must match exactly
    /// unless either side leaves it unset.
    pub fn matches(&self, other: &Entitlement) -> bool {
        if self.auth_object != other.auth_object || self.field != other.field {
            return false;
        }
        let value_ok = self.value == "*" || other.value == "*" || self.value == other.value;
        if !value_ok {
            return false;
        }
        match (&self.activity, &other.activity) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// True iff every entitlement in `required` is matched by at least one
/// entitlement in `held`, honoring wildcards.
pub fn holds_all(required: &[Entitlement], held: &[Entitlement]) -> bool {
    !required.is_empty()
        && required
            .iter()
            .all(|req| held.iter().any(|have| req.matches(have)))
}

/// Named bundle of entitlements representing a business-level action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub permission_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub entitlements: Vec<Entitlement>,
    #[serde(default)]
    pub business_process: String,
    #[serde(default = "default_permission_risk")]
    pub risk_level: RiskSeverity,
    #[serde(default = "default_system")]
    pub system: String,
}

fn default_permission_risk() -> RiskSeverity {
    RiskSeverity::Medium
}

impl Permission {
    /// A user has the permission iff every entitlement in the bundle is
    /// present in the user's entitlement set.
    pub fn user_holds(&self, user_entitlements: &[Entitlement]) -> bool {
        holds_all(&self.entitlements, user_entitlements)
    }
}

/// Two disjoint functions that must not be held together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictSet {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub function_a_name: String,
    pub function_a_entitlements: Vec<Entitlement>,
    pub function_b_name: String,
    pub function_b_entitlements: Vec<Entitlement>,
}

impl ConflictSet {
    /// Conflict exists iff the user holds every entitlement of A and every
    /// entitlement of B.
    pub fn check(&self, user_entitlements: &[Entitlement]) -> Option<ConflictMatch> {
        let has_a = holds_all(&self.function_a_entitlements, user_entitlements);
        let has_b = holds_all(&self.function_b_entitlements, user_entitlements);
        if !(has_a && has_b) {
            return None;
        }
        Some(ConflictMatch {
            function_a: FunctionSignature::resolve(
                &self.function_a_name,
                &self.function_a_entitlements,
                user_entitlements,
            ),
            function_b: FunctionSignature::resolve(
                &self.function_b_name,
                &self.function_b_entitlements,
                user_entitlements,
            ),
        })
    }

    /// Sorted canonical keys of both functions, the dedup axis for SoD
    /// violations of this conflict set.
    pub fn signature(&self) -> String {
        let mut keys: Vec<String> = self
            .function_a_entitlements
            .iter()
            .chain(self.function_b_entitlements.iter())
            .map(Entitlement::canonical_key)
            .collect();
        keys.sort();
        keys.dedup();
        keys.join("|")
    }
}

/// One satisfied conflict set with the user-side entitlements that matched
/// each function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictMatch {
    pub function_a: FunctionSignature,
    pub function_b: FunctionSignature,
}

/// One side of a resolved conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    /// Canonical keys of the rule-side bundle.
    pub entitlements: Vec<String>,
    /// User-side entitlements that satisfied the bundle; carries the
    /// organizational footprint of this side of the conflict.
    pub matched: Vec<Entitlement>,
}

impl FunctionSignature {
    fn resolve(name: &str, required: &[Entitlement], held: &[Entitlement]) -> Self {
        let mut keys: Vec<String> = required.iter().map(Entitlement::canonical_key).collect();
        keys.sort();
        let matched = held
            .iter()
            .filter(|have| required.iter().any(|req| req.matches(have)))
            .cloned()
            .collect();
        Self {
            name: name.to_string(),
            entitlements: keys,
            matched,
        }
    }
}

/// Applicability scope of a rule: allowed systems, departments, and user
/// types, each supporting the `*` wildcard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleScope {
    #[serde(default = "wildcard_list")]
    pub systems: Vec<String>,
    #[serde(default = "wildcard_list")]
    pub departments: Vec<String>,
    #[serde(default = "wildcard_list")]
    pub user_types: Vec<String>,
}

fn wildcard_list() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for RuleScope {
    fn default() -> Self {
        Self {
            systems: wildcard_list(),
            departments: wildcard_list(),
            user_types: wildcard_list(),
        }
    }
}

/// Users and roles exempt from a rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleExceptions {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// A complete risk rule definition, keyed by a stable rule id.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskRule {
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: RuleKind,
    pub severity: RiskSeverity,
    pub category: RiskCategory,

    #[serde(default)]
    pub conflicts: Vec<ConflictSet>,
    #[serde(default)]
    pub sensitive_entitlements: Vec<Entitlement>,

    #[serde(default)]
    pub business_impact: String,
    #[serde(default)]
    pub mitigation_controls: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,

    #[serde(default)]
    pub scope: RuleScope,
    #[serde(default)]
    pub exceptions: RuleExceptions,

    #[serde(default)]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default = "version_default")]
    pub version: String,
}

fn enabled_default() -> bool {
    true
}

fn version_default() -> String {
    "1.0".to_string()
}

impl RiskRule {
    /// Whether the rule applies to the given user snapshot at `now`.
    ///
    /// The effective date is inclusive; the expiry date is inclusive up to
    /// 23:59:59.999 UTC of its calendar day.
    pub fn is_applicable(&self, user: &UserAccess, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(effective) = self.effective_from {
            if now < effective {
                return false;
            }
        }
        if let Some(expiry) = self.expiry_date {
            if now > end_of_day(expiry) {
                return false;
            }
        }
        if !self.scope.departments.iter().any(|d| d == "*")
            && !self.scope.departments.contains(&user.department)
        {
            return false;
        }
        if !self.scope.user_types.iter().any(|t| t == "*")
            && !self.scope.user_types.contains(&user.employment_type)
        {
            return false;
        }
        if !self.scope.systems.iter().any(|s| s == "*") {
            let touches_scope = user
                .entitlements
                .iter()
                .any(|e| self.scope.systems.contains(&e.system));
            if !touches_scope {
                return false;
            }
        }
        if self.exceptions.users.contains(&user.user_id) {
            return false;
        }
        if user
            .roles
            .iter()
            .any(|role| self.exceptions.roles.contains(role))
        {
            return false;
        }
        true
    }
}

fn end_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), at.day(), 23, 59, 59)
        .single()
        .map(|t| t + chrono::Duration::milliseconds(999))
        .unwrap_or(at)
}

fn full_time_default() -> String {
    "FULL_TIME".to_string()
}

/// A user's complete access snapshot, immutable for the lifetime of one
/// evaluation. Mutation happens by taking a new snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccess {
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub cost_center: String,
    #[serde(default)]
    pub company_code: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub entitlements: Vec<Entitlement>,
    #[serde(default = "full_time_default")]
    pub employment_type: String,
}

impl UserAccess {
    pub fn new(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            username: user_id.clone(),
            user_id,
            full_name: String::new(),
            department: String::new(),
            cost_center: String::new(),
            company_code: String::new(),
            roles: Vec::new(),
            profiles: Vec::new(),
            entitlements: Vec::new(),
            employment_type: full_time_default(),
        }
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = department.into();
        self
    }

    pub fn with_entitlements(mut self, entitlements: Vec<Entitlement>) -> Self {
        self.entitlements = entitlements;
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}

/// Lifecycle status of a detected violation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ViolationStatus {
    Open,
    Mitigated,
    Remediated,
    Accepted,
    FalsePositive,
}

impl ViolationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationStatus::Open => "open",
            ViolationStatus::Mitigated => "mitigated",
            ViolationStatus::Remediated => "remediated",
            ViolationStatus::Accepted => "accepted",
            ViolationStatus::FalsePositive => "false_positive",
        }
    }
}

/// What the violation is evidence of.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConflictEvidence {
    Sod {
        conflict_name: String,
        function_a: FunctionSignature,
        function_b: FunctionSignature,
    },
    Sensitive {
        /// Canonical keys of the required sensitive set.
        entitlements: Vec<String>,
        matched: Vec<Entitlement>,
    },
}

impl ConflictEvidence {
    /// User-side entitlements on each side of the conflict. For sensitive
    /// access both sides are the same matched set.
    pub fn matched_sides(&self) -> (&[Entitlement], &[Entitlement]) {
        match self {
            ConflictEvidence::Sod {
                function_a,
                function_b,
                ..
            } => (&function_a.matched, &function_b.matched),
            ConflictEvidence::Sensitive { matched, .. } => (matched, matched),
        }
    }
}

/// A detected risk violation.
///
/// The `violation_id` is fresh per evaluation; `(rule_id,
/// conflict_signature)` is stable and is the axis callers de-duplicate on
/// when reconciling with historical violations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskViolation {
    pub violation_id: Uuid,
    pub rule_id: String,
    pub rule_name: String,
    pub kind: RuleKind,
    pub severity: RiskSeverity,
    pub user_id: String,
    pub evidence: ConflictEvidence,
    pub conflict_signature: String,
    pub category: RiskCategory,
    pub business_impact: String,
    pub recommended_actions: Vec<String>,
    pub mitigation_controls: Vec<String>,
    pub status: ViolationStatus,
    pub detected_at: DateTime<Utc>,
}

impl RiskViolation {
    /// Stable identity of the violation across evaluations.
    pub fn dedup_key(&self) -> (&str, &str) {
        (&self.rule_id, &self.conflict_signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcode(value: &str) -> Entitlement {
        Entitlement::new("S_TCODE", "TCD", value)
    }

    #[test]
    fn canonical_key_includes_activity_when_set() {
        let plain = tcode("XK01");
        assert_eq!(plain.canonical_key(), "SAP:S_TCODE:TCD:XK01");

        let with_activity = tcode("XK01").with_activity("01");
        assert_eq!(with_activity.canonical_key(), "SAP:S_TCODE:TCD:XK01:01");
    }

    #[test]
    fn wildcard_value_matches_either_side() {
        let rule_side = Entitlement::new("S_TCODE", "TCD", "*");
        let user_side = tcode("F110");
        assert!(rule_side.matches(&user_side));
        assert!(user_side.matches(&rule_side));

        let other_field = Entitlement::new("S_TCODE", "ACTVT", "F110");
        assert!(!rule_side.matches(&other_field));
    }

    #[test]
    fn unset_activity_matches_any_activity() {
        let rule_side = tcode("XK01");
        let user_side = tcode("XK01").with_activity("02");
        assert!(rule_side.matches(&user_side));

        let rule_with_activity = tcode("XK01").with_activity("01");
        assert!(!rule_with_activity.matches(&user_side));
    }

    #[test]
    fn conflict_set_requires_both_sides() {
        let conflict = ConflictSet {
            name: "Vendor Creation vs Payment Execution".to_string(),
            description: String::new(),
            function_a_name: "Vendor Creation".to_string(),
            function_a_entitlements: vec![tcode("XK01")],
            function_b_name: "Payment Execution".to_string(),
            function_b_entitlements: vec![tcode("F110")],
        };

        assert!(conflict.check(&[tcode("XK01")]).is_none());
        let hit = conflict.check(&[tcode("XK01"), tcode("F110")]).unwrap();
        assert_eq!(hit.function_a.matched, vec![tcode("XK01")]);
        assert_eq!(hit.function_b.matched, vec![tcode("F110")]);
    }

    #[test]
    fn conflict_signature_is_sorted_and_stable() {
        let conflict = ConflictSet {
            name: "c".to_string(),
            description: String::new(),
            function_a_name: "a".to_string(),
            function_a_entitlements: vec![tcode("XK01")],
            function_b_name: "b".to_string(),
            function_b_entitlements: vec![tcode("F110")],
        };
        assert_eq!(
            conflict.signature(),
            "SAP:S_TCODE:TCD:F110|SAP:S_TCODE:TCD:XK01"
        );
    }

    #[test]
    fn rule_not_applicable_when_disabled_or_excepted() {
        let mut rule = RiskRule {
            rule_id: "R1".to_string(),
            name: "r".to_string(),
            description: String::new(),
            kind: RuleKind::Sensitive,
            severity: RiskSeverity::High,
            category: RiskCategory::from(RiskCategory::IT_SECURITY),
            conflicts: Vec::new(),
            sensitive_entitlements: vec![tcode("SE16N")],
            business_impact: String::new(),
            mitigation_controls: Vec::new(),
            recommended_actions: Vec::new(),
            scope: RuleScope::default(),
            exceptions: RuleExceptions::default(),
            effective_from: None,
            expiry_date: None,
            enabled: true,
            version: "1.0".to_string(),
        };
        let now = Utc::now();
        let user = UserAccess::new("JSMITH").with_entitlements(vec![tcode("SE16N")]);
        assert!(rule.is_applicable(&user, now));

        rule.enabled = false;
        assert!(!rule.is_applicable(&user, now));

        rule.enabled = true;
        rule.exceptions.users.push("JSMITH".to_string());
        assert!(!rule.is_applicable(&user, now));
    }

    #[test]
    fn expiry_date_is_inclusive_until_end_of_day() {
        let rule = RiskRule {
            rule_id: "R1".to_string(),
            name: "r".to_string(),
            description: String::new(),
            kind: RuleKind::Sensitive,
            severity: RiskSeverity::Low,
            category: RiskCategory::from("Custom"),
            conflicts: Vec::new(),
            sensitive_entitlements: vec![tcode("SE16N")],
            business_impact: String::new(),
            mitigation_controls: Vec::new(),
            recommended_actions: Vec::new(),
            scope: RuleScope::default(),
            exceptions: RuleExceptions::default(),
            effective_from: None,
            expiry_date: Some(Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap()),
            enabled: true,
            version: "1.0".to_string(),
        };
        let user = UserAccess::new("U1");

        let same_day_evening = Utc.with_ymd_and_hms(2026, 3, 10, 23, 59, 59).unwrap();
        assert!(rule.is_applicable(&user, same_day_evening));

        let next_day = Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap();
        assert!(!rule.is_applicable(&user, next_day));
    }
}
