//! Certification campaign models.
//!
//! A [`CertificationCampaign`] is a time-boxed batch of access reviews over
//! a defined scope; each [`CertificationItem`] is one user/access pair to
//! certify, revoke, or otherwise decide.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Active,
    InReview,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Active => "active",
            CampaignStatus::InReview => "in_review",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "active" => Ok(CampaignStatus::Active),
            "in_review" => Ok(CampaignStatus::InReview),
            "completed" => Ok(CampaignStatus::Completed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            other => Err(format!("unknown campaign status {other}")),
        }
    }
}

/// What a campaign reviews.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CampaignKind {
    UserAccess,
    RoleMembership,
    SensitiveAccess,
    SodViolations,
    ManagerCertification,
}

impl CampaignKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignKind::UserAccess => "user_access",
            CampaignKind::RoleMembership => "role_membership",
            CampaignKind::SensitiveAccess => "sensitive_access",
            CampaignKind::SodViolations => "sod_violations",
            CampaignKind::ManagerCertification => "manager_certification",
        }
    }
}

/// Decisions a reviewer can record on an item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CertificationAction {
    Certify,
    Revoke,
    Modify,
    Delegate,
    Skip,
}

impl CertificationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificationAction::Certify => "certify",
            CertificationAction::Revoke => "revoke",
            CertificationAction::Modify => "modify",
            CertificationAction::Delegate => "delegate",
            CertificationAction::Skip => "skip",
        }
    }
}

/// How reviewers are assigned to generated items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReviewerAssignment {
    /// The target user's manager (primary default).
    Manager,
    /// The owner of the reviewed role.
    RoleOwner,
    /// A fixed set of named certifiers, assigned round-robin.
    Certifiers(Vec<String>),
}

impl Default for ReviewerAssignment {
    fn default() -> Self {
        ReviewerAssignment::Manager
    }
}

/// Scope filters applied while generating items.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignScope {
    #[serde(default)]
    pub systems: Vec<String>,
    #[serde(default)]
    pub departments: Vec<String>,
    #[serde(default)]
    pub risk_threshold: Option<u32>,
    #[serde(default)]
    pub sod_only: bool,
}

/// Per-campaign review configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    #[serde(default = "yes")]
    pub allow_delegation: bool,
    #[serde(default = "yes")]
    pub require_comments_for_revoke: bool,
    #[serde(default)]
    pub auto_revoke_on_timeout: bool,
    #[serde(default = "default_reminder_days")]
    pub reminder_days: Vec<i64>,
    #[serde(default)]
    pub reviewer_assignment: ReviewerAssignment,
}

fn yes() -> bool {
    true
}

fn default_reminder_days() -> Vec<i64> {
    vec![7, 3, 1]
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            allow_delegation: true,
            require_comments_for_revoke: true,
            auto_revoke_on_timeout: false,
            reminder_days: default_reminder_days(),
            reviewer_assignment: ReviewerAssignment::Manager,
        }
    }
}

/// One user/access pair to review.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificationItem {
    pub item_id: Uuid,

    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_department: String,

    pub access_type: String,
    pub access_id: String,
    #[serde(default)]
    pub access_name: String,
    pub system: String,

    #[serde(default)]
    pub granted_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage_count: u64,

    #[serde(default)]
    pub risk_score: u32,
    #[serde(default)]
    pub risk_flags: Vec<String>,
    #[serde(default)]
    pub has_sod_violation: bool,

    pub reviewer_id: String,
    #[serde(default)]
    pub delegated_to: Option<String>,

    #[serde(default)]
    pub decision: Option<CertificationAction>,
    #[serde(default)]
    pub decision_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decision_comments: String,

    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub is_overdue: bool,
    #[serde(default)]
    pub reminder_sent: bool,
}

impl CertificationItem {
    pub fn new(
        user_id: impl Into<String>,
        access_id: impl Into<String>,
        system: impl Into<String>,
        reviewer_id: impl Into<String>,
    ) -> Self {
        Self {
            item_id: Uuid::new_v4(),
            user_id: user_id.into(),
            user_name: String::new(),
            user_department: String::new(),
            access_type: "role".to_string(),
            access_id: access_id.into(),
            access_name: String::new(),
            system: system.into(),
            granted_date: None,
            last_used: None,
            usage_count: 0,
            risk_score: 0,
            risk_flags: Vec::new(),
            has_sod_violation: false,
            reviewer_id: reviewer_id.into(),
            delegated_to: None,
            decision: None,
            decision_at: None,
            decision_comments: String::new(),
            is_completed: false,
            is_overdue: false,
            reminder_sent: false,
        }
    }

    /// Whether the actor is allowed to decide this item.
    pub fn is_reviewer(&self, actor_id: &str) -> bool {
        self.reviewer_id == actor_id || self.delegated_to.as_deref() == Some(actor_id)
    }
}

/// Immutable record of a certification decision, kept for evidence.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificationDecision {
    pub decision_id: Uuid,
    pub item_id: Uuid,
    pub campaign_id: Uuid,
    pub action: CertificationAction,
    pub reviewer_id: String,
    pub decided_at: DateTime<Utc>,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub delegated_from: Option<String>,
}

/// Progress counters derived from a campaign's items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub total_items: usize,
    pub completed_items: usize,
    pub pending_items: usize,
    pub certified_count: usize,
    pub revoked_count: usize,
    pub overdue_items: usize,
    pub progress_percent: u32,
}

/// A certification campaign: scope, configuration, and items.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificationCampaign {
    pub campaign_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: CampaignKind,
    pub status: CampaignStatus,

    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub scope: CampaignScope,
    #[serde(default)]
    pub config: CampaignConfig,

    #[serde(default)]
    pub items: Vec<CertificationItem>,

    pub owner_id: String,
    #[serde(default)]
    pub owner_name: String,

    #[serde(default)]
    pub completed_items: usize,
    #[serde(default)]
    pub certified_count: usize,
    #[serde(default)]
    pub revoked_count: usize,
}

impl CertificationCampaign {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.end_date
    }

    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.end_date - now).num_days().max(0)
    }

    pub fn progress(&self, now: DateTime<Utc>) -> CampaignProgress {
        let total = self.items.len();
        let completed = self.items.iter().filter(|i| i.is_completed).count();
        let certified = self
            .items
            .iter()
            .filter(|i| i.decision == Some(CertificationAction::Certify))
            .count();
        let revoked = self
            .items
            .iter()
            .filter(|i| i.decision == Some(CertificationAction::Revoke))
            .count();
        let overdue = if now > self.end_date {
            total - completed
        } else {
            0
        };
        CampaignProgress {
            total_items: total,
            completed_items: completed,
            pending_items: total - completed,
            certified_count: certified,
            revoked_count: revoked,
            overdue_items: overdue,
            progress_percent: if total == 0 {
                0
            } else {
                (completed * 100 / total) as u32
            },
        }
    }

    /// Per-reviewer totals for workload views.
    pub fn reviewer_summary(&self) -> BTreeMap<String, ReviewerLoad> {
        let mut summary: BTreeMap<String, ReviewerLoad> = BTreeMap::new();
        for item in &self.items {
            let reviewer = item
                .delegated_to
                .clone()
                .unwrap_or_else(|| item.reviewer_id.clone());
            let entry = summary.entry(reviewer).or_default();
            entry.total += 1;
            if item.is_completed {
                entry.completed += 1;
            } else {
                entry.pending += 1;
            }
        }
        summary
    }
}

/// Reviewer workload counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewerLoad {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn campaign_with_items(items: Vec<CertificationItem>, now: DateTime<Utc>) -> CertificationCampaign {
        CertificationCampaign {
            campaign_id: Uuid::new_v4(),
            name: "Q3 review".to_string(),
            description: String::new(),
            kind: CampaignKind::UserAccess,
            status: CampaignStatus::Active,
            start_date: now - Duration::days(1),
            end_date: now + Duration::days(13),
            created_at: now - Duration::days(1),
            scope: CampaignScope::default(),
            config: CampaignConfig::default(),
            items,
            owner_id: "OWNER".to_string(),
            owner_name: String::new(),
            completed_items: 0,
            certified_count: 0,
            revoked_count: 0,
        }
    }

    #[test]
    fn progress_counts_decisions() {
        let now = Utc::now();
        let mut certified = CertificationItem::new("U1", "ROLE_A", "SAP", "MGR");
        certified.decision = Some(CertificationAction::Certify);
        certified.is_completed = true;
        let pending = CertificationItem::new("U2", "ROLE_B", "SAP", "MGR");

        let campaign = campaign_with_items(vec![certified, pending], now);
        let progress = campaign.progress(now);
        assert_eq!(progress.total_items, 2);
        assert_eq!(progress.completed_items, 1);
        assert_eq!(progress.certified_count, 1);
        assert_eq!(progress.pending_items, 1);
        assert_eq!(progress.progress_percent, 50);
    }

    #[test]
    fn delegate_target_counts_as_reviewer() {
        let mut item = CertificationItem::new("U1", "ROLE_A", "SAP", "MGR");
        assert!(item.is_reviewer("MGR"));
        assert!(!item.is_reviewer("OTHER"));

        item.delegated_to = Some("OTHER".to_string());
        assert!(item.is_reviewer("OTHER"));
    }
}
