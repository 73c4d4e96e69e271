//! Organizational rules for risk analysis.
//!
//! Filters false positives out of SoD analysis by considering
//! organizational context: a user posting invoices in company code 1000
//! and maintaining vendors in company code 2000 holds both functions, but
//! the access is separated by organization. Supplementary rules add typed
//! conditions on top of base risks and can exclude a violation or adjust
//! its level.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::domain::models::{Entitlement, RiskLevel};

use super::errors::{ServiceError, ServiceResult};

/// Organizational dimension a rule can compare.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrgFieldKind {
    CompanyCode,
    Plant,
    SalesOrg,
    PurchasingOrg,
    CostCenter,
    ProfitCenter,
    BusinessArea,
    ControllingArea,
    Country,
    Region,
    Department,
    Custom,
}

impl OrgFieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgFieldKind::CompanyCode => "company_code",
            OrgFieldKind::Plant => "plant",
            OrgFieldKind::SalesOrg => "sales_org",
            OrgFieldKind::PurchasingOrg => "purchasing_org",
            OrgFieldKind::CostCenter => "cost_center",
            OrgFieldKind::ProfitCenter => "profit_center",
            OrgFieldKind::BusinessArea => "business_area",
            OrgFieldKind::ControllingArea => "controlling_area",
            OrgFieldKind::Country => "country",
            OrgFieldKind::Region => "region",
            OrgFieldKind::Department => "department",
            OrgFieldKind::Custom => "custom",
        }
    }
}

/// Organizational footprint of one side of a conflict: field key to the
/// values that side touches.
pub type OrgFootprint = BTreeMap<String, Vec<String>>;

/// Derives an organizational footprint from an entitlement set via the SAP
/// org field names (BUKRS, WERKS, VKORG, EKORG, KOSTL, PRCTR, GSBER,
/// KOKRS).
pub fn footprint_from_entitlements(entitlements: &[Entitlement]) -> OrgFootprint {
    let mut footprint = OrgFootprint::new();
    for entitlement in entitlements {
        let kind = match entitlement.field.as_str() {
            "BUKRS" => OrgFieldKind::CompanyCode,
            "WERKS" => OrgFieldKind::Plant,
            "VKORG" => OrgFieldKind::SalesOrg,
            "EKORG" => OrgFieldKind::PurchasingOrg,
            "KOSTL" => OrgFieldKind::CostCenter,
            "PRCTR" => OrgFieldKind::ProfitCenter,
            "GSBER" => OrgFieldKind::BusinessArea,
            "KOKRS" => OrgFieldKind::ControllingArea,
            _ => continue,
        };
        let values = footprint.entry(kind.as_str().to_string()).or_default();
        if !values.contains(&entitlement.value) {
            values.push(entitlement.value.clone());
        }
    }
    footprint
}

/// One organizational field an org rule compares across the two sides.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgField {
    pub kind: OrgFieldKind,
    /// Key for `Custom` fields; ignored otherwise.
    #[serde(default)]
    pub field_name: Option<String>,
}

impl OrgField {
    pub fn new(kind: OrgFieldKind) -> Self {
        Self {
            kind,
            field_name: None,
        }
    }

    pub fn custom(field_name: impl Into<String>) -> Self {
        Self {
            kind: OrgFieldKind::Custom,
            field_name: Some(field_name.into()),
        }
    }

    fn key(&self) -> &str {
        match (&self.kind, &self.field_name) {
            (OrgFieldKind::Custom, Some(name)) => name.as_str(),
            _ => self.kind.as_str(),
        }
    }
}

/// How an org rule treats a matching violation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrgRuleKind {
    /// Filter the violation out when the two sides do not overlap on the
    /// configured org fields.
    Exclusion,
    /// Keep the violation only when the two sides overlap. Logical inverse
    /// of `Exclusion`.
    Inclusion,
}

/// Organizational rule: applicability plus the fields it compares.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationalRule {
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: OrgRuleKind,

    /// Risk rule ids this applies to; empty = all.
    #[serde(default)]
    pub risk_ids: Vec<String>,
    /// Risk categories this applies to; empty = all.
    #[serde(default)]
    pub risk_categories: Vec<String>,

    pub org_fields: Vec<OrgField>,
    /// `true` = AND over fields, `false` = OR.
    #[serde(default = "default_true")]
    pub require_all_fields: bool,

    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Lower numbers are applied first.
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    100
}

impl OrganizationalRule {
    pub fn applies_to(&self, risk_id: &str, risk_category: &str) -> bool {
        if !self.risk_ids.is_empty() && !self.risk_ids.iter().any(|id| id == risk_id) {
            return false;
        }
        if !self.risk_categories.is_empty()
            && !self.risk_categories.iter().any(|c| c == risk_category)
        {
            return false;
        }
        true
    }

    /// Whether this rule filters the violation out, given the footprints of
    /// the two conflict sides. Symmetric in its two arguments.
    pub fn filters(&self, side_a: &OrgFootprint, side_b: &OrgFootprint) -> bool {
        match self.kind {
            OrgRuleKind::Exclusion => self.evaluate_exclusion(side_a, side_b),
            OrgRuleKind::Inclusion => !self.evaluate_inclusion(side_a, side_b),
        }
    }

    /// Exclusion needs positive evidence of separation: a field separates
    /// the sides only when both sides carry values for it and the values do
    /// not intersect. Sides without footprint data never filter.
    fn evaluate_exclusion(&self, side_a: &OrgFootprint, side_b: &OrgFootprint) -> bool {
        let mut evaluated_any = false;
        for field in &self.org_fields {
            let empty = Vec::new();
            let a_values = side_a.get(field.key()).unwrap_or(&empty);
            let b_values = side_b.get(field.key()).unwrap_or(&empty);
            if a_values.is_empty() || b_values.is_empty() {
                continue;
            }
            evaluated_any = true;
            let separated = !a_values.iter().any(|v| b_values.contains(v));
            if self.require_all_fields {
                if !separated {
                    return false;
                }
            } else if separated {
                return true;
            }
        }
        if self.require_all_fields {
            evaluated_any
        } else {
            false
        }
    }

    /// Inclusion keeps the violation only on overlap; sides without data do
    /// not overlap.
    fn evaluate_inclusion(&self, side_a: &OrgFootprint, side_b: &OrgFootprint) -> bool {
        for field in &self.org_fields {
            let empty = Vec::new();
            let a_values = side_a.get(field.key()).unwrap_or(&empty);
            let b_values = side_b.get(field.key()).unwrap_or(&empty);
            let overlap = a_values.iter().any(|v| b_values.contains(v));
            if self.require_all_fields {
                if !overlap {
                    return false;
                }
            } else if overlap {
                return true;
            }
        }
        self.require_all_fields
    }
}

/// Comparison operator for supplementary conditions. Unknown operator names
/// fail at load time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    StartsWith,
}

impl FromStr for CmpOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(CmpOp::Eq),
            "ne" => Ok(CmpOp::Ne),
            "gt" => Ok(CmpOp::Gt),
            "gte" => Ok(CmpOp::Gte),
            "lt" => Ok(CmpOp::Lt),
            "lte" => Ok(CmpOp::Lte),
            "in" => Ok(CmpOp::In),
            "not_in" => Ok(CmpOp::NotIn),
            "contains" => Ok(CmpOp::Contains),
            "starts_with" => Ok(CmpOp::StartsWith),
            other => Err(format!("unknown condition operator {other}")),
        }
    }
}

/// One typed condition evaluated against the free-form context map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    pub op: CmpOp,
    pub value: serde_json::Value,
}

impl FieldCondition {
    /// Parses `(field, operator, value)` where the operator uses wire
    /// names; unknown operators are a load-time error.
    pub fn parse(
        field: impl Into<String>,
        op: &str,
        value: serde_json::Value,
    ) -> ServiceResult<Self> {
        let op = op
            .parse()
            .map_err(|err: String| ServiceError::Fatal(err))?;
        Ok(Self {
            field: field.into(),
            op,
            value,
        })
    }

    fn holds(&self, context: &BTreeMap<String, serde_json::Value>) -> bool {
        let Some(actual) = context.get(&self.field) else {
            return false;
        };
        compare(actual, self.op, &self.value)
    }
}

fn as_f64(value: &serde_json::Value) -> Option<f64> {
    value.as_f64()
}

fn compare(actual: &serde_json::Value, op: CmpOp, expected: &serde_json::Value) -> bool {
    match op {
        CmpOp::Eq => actual == expected,
        CmpOp::Ne => actual != expected,
        CmpOp::Gt | CmpOp::Gte | CmpOp::Lt | CmpOp::Lte => {
            let (Some(a), Some(e)) = (as_f64(actual), as_f64(expected)) else {
                return false;
            };
            match op {
                CmpOp::Gt => a > e,
                CmpOp::Gte => a >= e,
                CmpOp::Lt => a < e,
                CmpOp::Lte => a <= e,
                _ => unreachable!(),
            }
        }
        CmpOp::In => expected
            .as_array()
            .map(|list| list.contains(actual))
            .unwrap_or(false),
        CmpOp::NotIn => expected
            .as_array()
            .map(|list| !list.contains(actual))
            .unwrap_or(false),
        CmpOp::Contains => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(e)) => a.contains(e),
            _ => false,
        },
        CmpOp::StartsWith => match (actual.as_str(), expected.as_str()) {
            (Some(a), Some(e)) => a.starts_with(e),
            _ => false,
        },
    }
}

/// Effect of a matching supplementary rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SupplementaryAction {
    /// The violation is excluded entirely.
    Exclude,
    /// The violation's level is adjusted to the given value.
    AdjustLevel(RiskLevel),
}

/// Supplementary rule: typed conditions on top of a base risk.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplementaryRule {
    pub rule_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Base risk id this supplements; empty = all.
    #[serde(default)]
    pub base_risk_id: Option<String>,
    pub conditions: Vec<FieldCondition>,
    pub action: SupplementaryAction,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

impl SupplementaryRule {
    fn matches(&self, context: &BTreeMap<String, serde_json::Value>) -> bool {
        self.conditions.iter().all(|c| c.holds(context))
    }
}

/// Decision of the filter pipeline for one candidate violation.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterOutcome {
    pub filtered: bool,
    pub reason: String,
    pub applied_rules: Vec<String>,
    #[serde(default)]
    pub adjusted_level: Option<RiskLevel>,
}

impl FilterOutcome {
    fn pass() -> Self {
        Self {
            filtered: false,
            reason: String::new(),
            applied_rules: Vec::new(),
            adjusted_level: None,
        }
    }
}

/// Engine applying organizational and supplementary rules to candidate
/// violations.
#[derive(Default)]
pub struct OrgRuleEngine {
    org_rules: BTreeMap<String, OrganizationalRule>,
    supplementary_rules: BTreeMap<String, SupplementaryRule>,
}

impl OrgRuleEngine {
    /// Engine with no rules; every violation passes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine pre-loaded with the default separation rules for common
    /// scenarios. Only company-code separation is active out of the box.
    pub fn with_default_pack() -> Self {
        let mut engine = Self::new();
        for rule in default_org_pack() {
            engine.upsert_org_rule(rule);
        }
        for rule in default_supplementary_pack() {
            engine.upsert_supplementary_rule(rule);
        }
        engine
    }

    pub fn upsert_org_rule(&mut self, rule: OrganizationalRule) {
        self.org_rules.insert(rule.rule_id.clone(), rule);
    }

    pub fn upsert_supplementary_rule(&mut self, rule: SupplementaryRule) {
        self.supplementary_rules.insert(rule.rule_id.clone(), rule);
    }

    pub fn remove_org_rule(&mut self, rule_id: &str) -> bool {
        self.org_rules.remove(rule_id).is_some()
    }

    pub fn org_rules(&self) -> Vec<&OrganizationalRule> {
        let mut rules: Vec<&OrganizationalRule> = self.org_rules.values().collect();
        rules.sort_by_key(|r| (r.priority, r.rule_id.clone()));
        rules
    }

    pub fn set_org_rule_active(&mut self, rule_id: &str, active: bool) -> bool {
        match self.org_rules.get_mut(rule_id) {
            Some(rule) => {
                rule.is_active = active;
                true
            }
            None => false,
        }
    }

    /// Applies org rules in priority order (first filter short-circuits),
    /// then composes supplementary adjustments (later overrides earlier).
    pub fn filter_risk(
        &self,
        risk_id: &str,
        risk_category: &str,
        side_a: &OrgFootprint,
        side_b: &OrgFootprint,
        context: Option<&BTreeMap<String, serde_json::Value>>,
    ) -> FilterOutcome {
        let mut outcome = FilterOutcome::pass();

        for rule in self.org_rules() {
            if !rule.is_active || !rule.applies_to(risk_id, risk_category) {
                continue;
            }
            if rule.filters(side_a, side_b) {
                outcome.filtered = true;
                outcome.applied_rules.push(rule.rule_id.clone());
                outcome.reason =
                    format!("Filtered by {}: organizational separation detected", rule.name);
                return outcome;
            }
        }

        let Some(context) = context else {
            return outcome;
        };

        let mut supplementary: Vec<&SupplementaryRule> =
            self.supplementary_rules.values().collect();
        supplementary.sort_by_key(|r| (r.priority, r.rule_id.clone()));

        for rule in supplementary {
            if !rule.is_active {
                continue;
            }
            if let Some(base) = &rule.base_risk_id {
                if base != risk_id {
                    continue;
                }
            }
            if !rule.matches(context) {
                continue;
            }
            outcome.applied_rules.push(rule.rule_id.clone());
            match &rule.action {
                SupplementaryAction::Exclude => {
                    outcome.filtered = true;
                    outcome.reason = format!("Excluded by {}", rule.name);
                    return outcome;
                }
                SupplementaryAction::AdjustLevel(level) => {
                    outcome.adjusted_level = Some(*level);
                    outcome.reason = format!("Risk level adjusted by {}", rule.name);
                }
            }
        }

        outcome
    }

    pub fn statistics(&self) -> OrgRuleStats {
        OrgRuleStats {
            total_org_rules: self.org_rules.len(),
            active_org_rules: self.org_rules.values().filter(|r| r.is_active).count(),
            total_supplementary_rules: self.supplementary_rules.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrgRuleStats {
    pub total_org_rules: usize,
    pub active_org_rules: usize,
    pub total_supplementary_rules: usize,
}

/// Default organizational rules mirroring common SAP separation setups.
pub fn default_org_pack() -> Vec<OrganizationalRule> {
    vec![
        OrganizationalRule {
            rule_id: "ORG-CC-SEP".to_string(),
            name: "Company Code Separation".to_string(),
            description: "Filter SoD if functions are in different company codes".to_string(),
            kind: OrgRuleKind::Exclusion,
            risk_ids: Vec::new(),
            risk_categories: Vec::new(),
            org_fields: vec![OrgField::new(OrgFieldKind::CompanyCode)],
            require_all_fields: true,
            is_active: true,
            priority: 10,
        },
        OrganizationalRule {
            rule_id: "ORG-PLANT-SEP".to_string(),
            name: "Plant Separation".to_string(),
            description: "Filter SoD if functions are in different plants".to_string(),
            kind: OrgRuleKind::Exclusion,
            risk_ids: Vec::new(),
            risk_categories: Vec::new(),
            org_fields: vec![OrgField::new(OrgFieldKind::Plant)],
            require_all_fields: true,
            is_active: false,
            priority: 20,
        },
        OrganizationalRule {
            rule_id: "ORG-EKORG-SEP".to_string(),
            name: "Purchasing Organization Separation".to_string(),
            description: "Filter procurement SoD if in different purchasing orgs".to_string(),
            kind: OrgRuleKind::Exclusion,
            risk_ids: Vec::new(),
            risk_categories: vec!["Procurement".to_string()],
            org_fields: vec![OrgField::new(OrgFieldKind::PurchasingOrg)],
            require_all_fields: true,
            is_active: true,
            priority: 30,
        },
        OrganizationalRule {
            rule_id: "ORG-VKORG-SEP".to_string(),
            name: "Sales Organization Separation".to_string(),
            description: "Filter sales SoD if in different sales orgs".to_string(),
            kind: OrgRuleKind::Exclusion,
            risk_ids: Vec::new(),
            risk_categories: vec!["Sales & Distribution".to_string()],
            org_fields: vec![OrgField::new(OrgFieldKind::SalesOrg)],
            require_all_fields: true,
            is_active: true,
            priority: 40,
        },
        OrganizationalRule {
            rule_id: "ORG-CC-CRITICAL".to_string(),
            name: "Critical Company Code Focus".to_string(),
            description: "Only flag risks in critical company codes".to_string(),
            kind: OrgRuleKind::Inclusion,
            risk_ids: Vec::new(),
            risk_categories: Vec::new(),
            org_fields: vec![OrgField::new(OrgFieldKind::CompanyCode)],
            require_all_fields: true,
            is_active: false,
            priority: 50,
        },
    ]
}

/// Default supplementary rules.
pub fn default_supplementary_pack() -> Vec<SupplementaryRule> {
    vec![
        SupplementaryRule {
            rule_id: "SUP-HIGH-AMOUNT".to_string(),
            name: "High Amount Transactions".to_string(),
            description: "Elevate risk for high-value transaction limits".to_string(),
            base_risk_id: None,
            conditions: vec![FieldCondition {
                field: "transaction_limit".to_string(),
                op: CmpOp::Gt,
                value: serde_json::json!(100_000),
            }],
            action: SupplementaryAction::AdjustLevel(RiskLevel::Critical),
            is_active: true,
            priority: 10,
        },
        SupplementaryRule {
            rule_id: "SUP-TEST-USER".to_string(),
            name: "Test User Exclusion".to_string(),
            description: "Exclude test users from risk analysis".to_string(),
            base_risk_id: None,
            conditions: vec![FieldCondition {
                field: "user_id".to_string(),
                op: CmpOp::StartsWith,
                value: serde_json::json!("TEST"),
            }],
            action: SupplementaryAction::Exclude,
            is_active: true,
            priority: 20,
        },
    ]
}
