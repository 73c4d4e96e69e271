//! Certification campaign engine.
//!
//! Builds evidence-backed review items from the entitlement source, scores
//! them, records reviewer decisions, reminds, and auto-revokes uncertified
//! access when a campaign times out. Campaigns are exclusively owned by
//! this engine; every decision runs under the campaign's lock and emits
//! its events only after the mutation committed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::certification::{
    CampaignConfig, CampaignKind, CampaignScope, CampaignStatus, CertificationAction,
    CertificationCampaign, CertificationDecision, CertificationItem, ReviewerAssignment,
    ReviewerLoad,
};
use crate::domain::events::{EventKind, GovernanceEvent, SYSTEM_ACTOR};
use crate::domain::models::{RuleKind, UserAccess};
use crate::infrastructure::config::CertificationConfig;
use crate::infrastructure::connectors::{
    AuditSink, Clock, EntitlementSource, Notifier, UserResolver, UserScopeFilter,
};

use super::errors::{ServiceError, ServiceResult};
use super::rules::RuleEngine;

/// Input for creating a campaign.
#[derive(Debug, Clone)]
pub struct CampaignSpec {
    pub name: String,
    pub description: String,
    pub kind: CampaignKind,
    pub owner_id: String,
    pub owner_name: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub scope: CampaignScope,
    pub config: Option<CampaignConfig>,
}

/// Result of a bulk certification.
#[derive(Debug, Clone)]
pub struct BulkResult {
    pub processed: usize,
    pub errors: Vec<(Uuid, String)>,
}

/// Overall certification statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CertificationStats {
    pub total_campaigns: usize,
    pub active_campaigns: usize,
    pub completed_campaigns: usize,
    pub total_items: usize,
    pub total_certified: usize,
    pub total_revoked: usize,
}

/// Central engine for access certification campaigns.
pub struct CertificationEngine {
    rule_engine: Arc<RuleEngine>,
    source: Arc<dyn EntitlementSource>,
    resolver: Arc<dyn UserResolver>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: CertificationConfig,

    campaigns: RwLock<HashMap<Uuid, Arc<Mutex<CertificationCampaign>>>>,
    decisions: RwLock<Vec<CertificationDecision>>,

    /// Role-level base risk scores used in per-item scoring.
    role_base_scores: RwLock<HashMap<String, u32>>,
    /// Known conflicting role pairs; holding roles from both sides adds to
    /// item risk and flags the item.
    sod_role_pairs: RwLock<Vec<(Vec<String>, Vec<String>)>>,
}

impl CertificationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rule_engine: Arc<RuleEngine>,
        source: Arc<dyn EntitlementSource>,
        resolver: Arc<dyn UserResolver>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        config: CertificationConfig,
    ) -> Self {
        Self {
            rule_engine,
            source,
            resolver,
            notifier,
            audit,
            clock,
            config,
            campaigns: RwLock::new(HashMap::new()),
            decisions: RwLock::new(Vec::new()),
            role_base_scores: RwLock::new(HashMap::new()),
            sod_role_pairs: RwLock::new(Vec::new()),
        }
    }

    pub fn set_role_base_score(&self, role_id: impl Into<String>, score: u32) {
        self.role_base_scores
            .write()
            .insert(role_id.into(), score.min(100));
    }

    pub fn set_sod_role_pairs(&self, pairs: Vec<(Vec<String>, Vec<String>)>) {
        *self.sod_role_pairs.write() = pairs;
    }

    // -----------------------------------------------------------------
    // Campaign creation and generation
    // -----------------------------------------------------------------

    pub fn create_campaign(&self, spec: CampaignSpec) -> CertificationCampaign {
        let now = self.clock.now();
        let start = spec.start_date.unwrap_or(now);
        let end = spec
            .end_date
            .unwrap_or(start + chrono::Duration::days(self.config.default_campaign_days));

        let mut config = spec.config.unwrap_or_else(|| CampaignConfig {
            allow_delegation: true,
            require_comments_for_revoke: self.config.require_comments_for_revoke,
            auto_revoke_on_timeout: self.config.auto_revoke_on_timeout,
            reminder_days: self.config.reminder_days.clone(),
            reviewer_assignment: ReviewerAssignment::Manager,
        });
        if config.reminder_days.is_empty() {
            config.reminder_days = self.config.reminder_days.clone();
        }

        let campaign = CertificationCampaign {
            campaign_id: Uuid::new_v4(),
            name: spec.name,
            description: spec.description,
            kind: spec.kind,
            status: CampaignStatus::Draft,
            start_date: start,
            end_date: end,
            created_at: now,
            scope: spec.scope,
            config,
            items: Vec::new(),
            owner_id: spec.owner_id,
            owner_name: spec.owner_name,
            completed_items: 0,
            certified_count: 0,
            revoked_count: 0,
        };

        info!(campaign_id = %campaign.campaign_id, name = %campaign.name, "created certification campaign");
        self.campaigns
            .write()
            .insert(campaign.campaign_id, Arc::new(Mutex::new(campaign.clone())));
        campaign
    }

    /// Enumerates review items for a draft campaign from the entitlement
    /// source, scores them, assigns reviewers, and applies scope filters.
    pub async fn generate_items(&self, campaign_id: Uuid) -> ServiceResult<CertificationCampaign> {
        let handle = self.campaign_handle(campaign_id)?;

        let (kind, scope, owner_id, assignment) = {
            let campaign = handle.lock();
            if campaign.status != CampaignStatus::Draft {
                return Err(ServiceError::State(format!(
                    "items can only be generated for draft campaigns (campaign {campaign_id} is {})",
                    campaign.status.as_str()
                )));
            }
            (
                campaign.kind,
                campaign.scope.clone(),
                campaign.owner_id.clone(),
                campaign.config.reviewer_assignment.clone(),
            )
        };

        let mut items = self.enumerate_items(kind, &scope, &owner_id, &assignment).await?;

        if let Some(threshold) = scope.risk_threshold {
            items.retain(|i| i.risk_score >= threshold);
        }
        if scope.sod_only {
            items.retain(|i| i.has_sod_violation);
        }
        if kind == CampaignKind::SensitiveAccess {
            items.retain(|i| i.risk_score >= 60);
        }
        if kind == CampaignKind::SodViolations {
            items.retain(|i| i.has_sod_violation);
        }

        self.cap_reviewer_workload(&mut items, &owner_id);

        let updated = {
            let mut campaign = handle.lock();
            if campaign.status != CampaignStatus::Draft {
                return Err(ServiceError::State(format!(
                    "campaign {campaign_id} left draft during item generation"
                )));
            }
            campaign.items = items;
            campaign.completed_items = 0;
            campaign.certified_count = 0;
            campaign.revoked_count = 0;
            campaign.clone()
        };

        info!(
            campaign_id = %campaign_id,
            items = updated.items.len(),
            "generated certification items"
        );
        Ok(updated)
    }

    async fn enumerate_items(
        &self,
        kind: CampaignKind,
        scope: &CampaignScope,
        owner_id: &str,
        assignment: &ReviewerAssignment,
    ) -> ServiceResult<Vec<CertificationItem>> {
        let filter = UserScopeFilter {
            systems: scope.systems.clone(),
            departments: scope.departments.clone(),
        };
        let user_ids = self.source.users_in_scope(&filter).await?;
        let now = self.clock.now();

        let mut items = Vec::new();
        let mut certifier_cursor = 0usize;

        for user_id in user_ids {
            let roles = self.source.roles_of(&user_id).await?;
            let role_ids: Vec<String> = roles.iter().map(|r| r.role_id.clone()).collect();
            let user_name = self
                .resolver
                .name_of(&user_id)
                .await?
                .unwrap_or_else(|| user_id.clone());

            // Engine-derived SoD flag for violation-scoped campaigns.
            let engine_sod = if kind == CampaignKind::SodViolations {
                let entitlements = self.source.entitlements_of(&user_id).await?;
                let snapshot = UserAccess::new(user_id.clone())
                    .with_roles(role_ids.clone())
                    .with_entitlements(entitlements);
                self.rule_engine
                    .evaluate(&snapshot, None)
                    .into_iter()
                    .filter(|v| v.kind == RuleKind::Sod)
                    .map(|v| v.rule_name)
                    .collect::<Vec<String>>()
            } else {
                Vec::new()
            };

            for role in &roles {
                if !scope.systems.is_empty() && !scope.systems.contains(&role.system) {
                    continue;
                }
                let reviewer = self
                    .assign_reviewer(assignment, &user_id, &role.role_id, owner_id, &mut certifier_cursor)
                    .await?;

                let mut item = CertificationItem::new(
                    user_id.clone(),
                    role.role_id.clone(),
                    role.system.clone(),
                    reviewer,
                );
                item.user_name = user_name.clone();
                item.access_name = role.role_name.clone();
                item.granted_date = role.granted_at;
                item.last_used = role.last_used;
                item.usage_count = role.usage_count;

                self.score_item(&mut item, &role_ids, now);
                for rule_name in &engine_sod {
                    item.has_sod_violation = true;
                    let flag = format!("SoD: {rule_name}");
                    if !item.risk_flags.contains(&flag) {
                        item.risk_flags.push(flag);
                    }
                }
                item.risk_score = item.risk_score.min(100);

                items.push(item);
            }
        }

        if kind == CampaignKind::RoleMembership {
            // Pivot to (role, user): reviewers work role by role.
            items.sort_by(|a, b| {
                a.access_id
                    .cmp(&b.access_id)
                    .then_with(|| a.user_id.cmp(&b.user_id))
            });
        }

        Ok(items)
    }

    async fn assign_reviewer(
        &self,
        assignment: &ReviewerAssignment,
        user_id: &str,
        role_id: &str,
        owner_id: &str,
        certifier_cursor: &mut usize,
    ) -> ServiceResult<String> {
        let reviewer = match assignment {
            ReviewerAssignment::Manager => self.resolver.manager_of(user_id).await?,
            ReviewerAssignment::RoleOwner => self.resolver.role_owner_of(role_id).await?,
            ReviewerAssignment::Certifiers(certifiers) => {
                if certifiers.is_empty() {
                    None
                } else {
                    let chosen = certifiers[*certifier_cursor % certifiers.len()].clone();
                    *certifier_cursor += 1;
                    Some(chosen)
                }
            }
        };
        Ok(reviewer.unwrap_or_else(|| {
            warn!(user_id, role_id, "no reviewer resolvable, assigning campaign owner");
            owner_id.to_string()
        }))
    }

    /// Role base score, SoD pair bonus, and tenure bonus, capped at 100.
    fn score_item(&self, item: &mut CertificationItem, user_roles: &[String], now: DateTime<Utc>) {
        let mut score = self
            .role_base_scores
            .read()
            .get(&item.access_id)
            .copied()
            .unwrap_or(0);

        for (side_a, side_b) in self.sod_role_pairs.read().iter() {
            let has_a = user_roles.iter().any(|r| side_a.contains(r));
            let has_b = user_roles.iter().any(|r| side_b.contains(r));
            if has_a && has_b {
                score += 30;
                item.has_sod_violation = true;
                let flag = "Potential SoD conflict".to_string();
                if !item.risk_flags.contains(&flag) {
                    item.risk_flags.push(flag);
                }
            }
        }

        if let Some(granted) = item.granted_date {
            let days = (now - granted).num_days();
            if days > 365 {
                score += 10;
            }
            if days > 730 {
                score += 10;
            }
        }

        item.risk_score = score.min(100);
    }

    fn cap_reviewer_workload(&self, items: &mut [CertificationItem], owner_id: &str) {
        let cap = self.config.max_items_per_reviewer.max(1);
        let mut load: HashMap<String, usize> = HashMap::new();
        for item in items.iter_mut() {
            let count = load.entry(item.reviewer_id.clone()).or_insert(0);
            *count += 1;
            if *count > cap && item.reviewer_id != owner_id {
                warn!(
                    reviewer = %item.reviewer_id,
                    cap,
                    "reviewer workload cap exceeded, falling back to campaign owner"
                );
                item.reviewer_id = owner_id.to_string();
                *load.entry(owner_id.to_string()).or_insert(0) += 1;
            }
        }
    }

    // -----------------------------------------------------------------
    // Campaign lifecycle
    // -----------------------------------------------------------------

    /// Activates a campaign and notifies every reviewer of their queue.
    pub async fn start_campaign(&self, campaign_id: Uuid) -> ServiceResult<CertificationCampaign> {
        let handle = self.campaign_handle(campaign_id)?;
        let now = self.clock.now();

        let snapshot = {
            let mut campaign = handle.lock();
            if !matches!(
                campaign.status,
                CampaignStatus::Draft | CampaignStatus::Scheduled
            ) {
                return Err(ServiceError::State(format!(
                    "campaign {campaign_id} cannot start from {}",
                    campaign.status.as_str()
                )));
            }
            if campaign.items.is_empty() {
                return Err(ServiceError::State(format!(
                    "campaign {campaign_id} has no items; generate items first"
                )));
            }
            campaign.status = CampaignStatus::Active;
            campaign.clone()
        };

        self.audit.record(GovernanceEvent::new(
            EventKind::CampaignStarted,
            campaign_id.to_string(),
            snapshot.owner_id.clone(),
            now,
            serde_json::json!({
                "name": snapshot.name,
                "kind": snapshot.kind.as_str(),
                "items": snapshot.items.len(),
            }),
        ));

        let mut per_reviewer: BTreeMap<String, usize> = BTreeMap::new();
        for item in &snapshot.items {
            *per_reviewer.entry(item.reviewer_id.clone()).or_default() += 1;
        }
        for (reviewer, count) in per_reviewer {
            let result = self
                .notifier
                .notify(
                    &reviewer,
                    &format!("Access certification required: {}", snapshot.name),
                    &format!(
                        "You have {count} access items to review.\nPlease complete your review by {}.",
                        snapshot.end_date.format("%Y-%m-%d")
                    ),
                )
                .await;
            if let Err(err) = result {
                warn!(reviewer = %reviewer, error = %err, "campaign start notification failed");
            }
        }

        info!(campaign_id = %campaign_id, "started certification campaign");
        Ok(snapshot)
    }

    /// Records a reviewer decision on one item.
    ///
    /// Guards: the actor must be the assigned reviewer or its delegate,
    /// revoke requires comments when the campaign demands them, and
    /// completed items reject further actions. `Delegate` reassigns the
    /// item without completing it.
    pub async fn process_decision(
        &self,
        campaign_id: Uuid,
        item_id: Uuid,
        action: CertificationAction,
        actor_id: &str,
        comments: Option<&str>,
        delegate_to: Option<&str>,
    ) -> ServiceResult<CertificationItem> {
        let handle = self.campaign_handle(campaign_id)?;
        let now = self.clock.now();

        let (item_snapshot, campaign_completed, decision) = {
            let mut campaign = handle.lock();
            if !matches!(
                campaign.status,
                CampaignStatus::Active | CampaignStatus::InReview
            ) {
                return Err(ServiceError::State(format!(
                    "campaign {campaign_id} is not open for review (status: {})",
                    campaign.status.as_str()
                )));
            }

            let config = campaign.config.clone();
            let item = campaign
                .items
                .iter_mut()
                .find(|i| i.item_id == item_id)
                .ok_or_else(|| ServiceError::not_found("certification item", item_id.to_string()))?;

            if item.is_completed {
                return Err(ServiceError::State(format!(
                    "certification item {item_id} is already decided"
                )));
            }
            if !item.is_reviewer(actor_id) && actor_id != SYSTEM_ACTOR {
                return Err(ServiceError::PermissionDenied(format!(
                    "user {actor_id} is not the reviewer of item {item_id}"
                )));
            }

            let mut decision = None;
            match action {
                CertificationAction::Delegate => {
                    if !config.allow_delegation {
                        return Err(ServiceError::Validation(format!(
                            "campaign {campaign_id} does not allow delegation"
                        )));
                    }
                    let Some(delegate) = delegate_to.filter(|d| !d.is_empty()) else {
                        return Err(ServiceError::Validation(
                            "delegation requires a delegate target".to_string(),
                        ));
                    };
                    item.delegated_to = Some(delegate.to_string());
                    item.decision_comments =
                        format!("Delegated by {actor_id}: {}", comments.unwrap_or(""));
                    // The item stays open for the new reviewer.
                }
                _ => {
                    if action == CertificationAction::Revoke
                        && config.require_comments_for_revoke
                        && comments.map(str::trim).unwrap_or("").is_empty()
                    {
                        return Err(ServiceError::Validation(
                            "comments are required for revocation".to_string(),
                        ));
                    }
                    item.decision = Some(action);
                    item.decision_at = Some(now);
                    item.decision_comments = comments.unwrap_or("").to_string();
                    item.is_completed = true;
                    decision = Some(CertificationDecision {
                        decision_id: Uuid::new_v4(),
                        item_id,
                        campaign_id,
                        action,
                        reviewer_id: actor_id.to_string(),
                        decided_at: now,
                        comments: comments.unwrap_or("").to_string(),
                        delegated_from: item.delegated_to.clone(),
                    });
                }
            }

            let item_snapshot = item.clone();
            campaign.completed_items = campaign.items.iter().filter(|i| i.is_completed).count();
            campaign.certified_count = campaign
                .items
                .iter()
                .filter(|i| i.decision == Some(CertificationAction::Certify))
                .count();
            campaign.revoked_count = campaign
                .items
                .iter()
                .filter(|i| i.decision == Some(CertificationAction::Revoke))
                .count();

            let all_decided = campaign.items.iter().all(|i| i.is_completed);
            if all_decided {
                campaign.status = CampaignStatus::Completed;
            }

            (item_snapshot, all_decided, decision)
        };

        if let Some(decision) = decision {
            self.audit.record(GovernanceEvent::new(
                EventKind::ItemDecided,
                item_id.to_string(),
                actor_id,
                now,
                serde_json::json!({
                    "campaign_id": campaign_id.to_string(),
                    "action": action.as_str(),
                    "user_id": item_snapshot.user_id,
                    "access_id": item_snapshot.access_id,
                }),
            ));
            self.decisions.write().push(decision);
        }
        if campaign_completed {
            self.audit.record(GovernanceEvent::system(
                EventKind::CampaignCompleted,
                campaign_id.to_string(),
                now,
                serde_json::json!({}),
            ));
            info!(campaign_id = %campaign_id, "certification campaign completed");
        }

        Ok(item_snapshot)
    }

    /// Certifies a batch of items, collecting per-item errors instead of
    /// failing the batch.
    pub async fn bulk_certify(
        &self,
        campaign_id: Uuid,
        item_ids: &[Uuid],
        actor_id: &str,
        comments: &str,
    ) -> ServiceResult<BulkResult> {
        let mut processed = 0;
        let mut errors = Vec::new();
        for &item_id in item_ids {
            match self
                .process_decision(
                    campaign_id,
                    item_id,
                    CertificationAction::Certify,
                    actor_id,
                    Some(comments),
                    None,
                )
                .await
            {
                Ok(_) => processed += 1,
                Err(err) => errors.push((item_id, err.to_string())),
            }
        }
        Ok(BulkResult { processed, errors })
    }

    // -----------------------------------------------------------------
    // Reminders and expiry
    // -----------------------------------------------------------------

    /// Visits active campaigns and emits reminders on the configured
    /// day-offsets before due.
    pub async fn send_reminders(&self) -> ServiceResult<usize> {
        let now = self.clock.now();
        let handles: Vec<Arc<Mutex<CertificationCampaign>>> =
            self.campaigns.read().values().cloned().collect();

        let mut sent = 0;
        for handle in handles {
            let (name, days_remaining, pending_by_reviewer) = {
                let mut campaign = handle.lock();
                if campaign.status != CampaignStatus::Active {
                    continue;
                }
                let days_remaining = campaign.days_remaining(now);
                if !campaign.config.reminder_days.contains(&days_remaining) {
                    continue;
                }
                let mut pending: BTreeMap<String, usize> = BTreeMap::new();
                for item in campaign.items.iter_mut() {
                    if item.is_completed {
                        continue;
                    }
                    item.reminder_sent = true;
                    let reviewer = item
                        .delegated_to
                        .clone()
                        .unwrap_or_else(|| item.reviewer_id.clone());
                    *pending.entry(reviewer).or_default() += 1;
                }
                (campaign.name.clone(), days_remaining, pending)
            };

            for (reviewer, count) in pending_by_reviewer {
                let urgency = if days_remaining <= 1 { "URGENT: " } else { "" };
                let result = self
                    .notifier
                    .notify(
                        &reviewer,
                        &format!("{urgency}Access certification reminder: {name}"),
                        &format!(
                            "You have {count} items pending review.\nCampaign ends in {days_remaining} day(s)."
                        ),
                    )
                    .await;
                match result {
                    Ok(()) => sent += 1,
                    Err(err) => {
                        warn!(reviewer = %reviewer, error = %err, "reminder notification failed")
                    }
                }
            }
        }
        Ok(sent)
    }

    /// Visits past-due active campaigns. With auto-revoke the remaining
    /// items are decided `Revoke` by `SYSTEM` and the campaign completes;
    /// otherwise the campaign moves to in-review with its open items
    /// flagged overdue.
    pub async fn expire_sweep(&self) -> ServiceResult<usize> {
        let now = self.clock.now();
        let handles: Vec<(Uuid, Arc<Mutex<CertificationCampaign>>)> = self
            .campaigns
            .read()
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();

        let mut expired = 0;
        for (campaign_id, handle) in handles {
            let auto_revoked: Vec<CertificationDecision> = {
                let mut campaign = handle.lock();
                if campaign.status != CampaignStatus::Active || !campaign.is_overdue(now) {
                    continue;
                }
                expired += 1;

                if campaign.config.auto_revoke_on_timeout {
                    let mut decisions = Vec::new();
                    for item in campaign.items.iter_mut().filter(|i| !i.is_completed) {
                        item.decision = Some(CertificationAction::Revoke);
                        item.decision_at = Some(now);
                        item.decision_comments =
                            "Auto-revoked due to certification timeout".to_string();
                        item.is_completed = true;
                        decisions.push(CertificationDecision {
                            decision_id: Uuid::new_v4(),
                            item_id: item.item_id,
                            campaign_id,
                            action: CertificationAction::Revoke,
                            reviewer_id: SYSTEM_ACTOR.to_string(),
                            decided_at: now,
                            comments: "Auto-revoked due to certification timeout".to_string(),
                            delegated_from: None,
                        });
                    }
                    campaign.completed_items = campaign.items.len();
                    campaign.revoked_count = campaign
                        .items
                        .iter()
                        .filter(|i| i.decision == Some(CertificationAction::Revoke))
                        .count();
                    campaign.status = CampaignStatus::Completed;
                    decisions
                } else {
                    campaign.status = CampaignStatus::InReview;
                    for item in campaign.items.iter_mut().filter(|i| !i.is_completed) {
                        item.is_overdue = true;
                    }
                    Vec::new()
                }
            };

            if !auto_revoked.is_empty() {
                for decision in &auto_revoked {
                    self.audit.record(GovernanceEvent::system(
                        EventKind::ItemDecided,
                        decision.item_id.to_string(),
                        now,
                        serde_json::json!({
                            "campaign_id": campaign_id.to_string(),
                            "action": decision.action.as_str(),
                            "reason": "certification timeout",
                        }),
                    ));
                }
                self.audit.record(GovernanceEvent::system(
                    EventKind::CampaignCompleted,
                    campaign_id.to_string(),
                    now,
                    serde_json::json!({ "auto_revoked": auto_revoked.len() }),
                ));
                self.decisions.write().extend(auto_revoked);
                info!(campaign_id = %campaign_id, "expired campaign auto-revoked and completed");
            }
        }
        Ok(expired)
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    fn campaign_handle(
        &self,
        campaign_id: Uuid,
    ) -> ServiceResult<Arc<Mutex<CertificationCampaign>>> {
        self.campaigns
            .read()
            .get(&campaign_id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found("campaign", campaign_id.to_string()))
    }

    pub fn campaign(&self, campaign_id: Uuid) -> Option<CertificationCampaign> {
        self.campaigns
            .read()
            .get(&campaign_id)
            .map(|handle| handle.lock().clone())
    }

    pub fn campaigns(
        &self,
        status: Option<CampaignStatus>,
        owner_id: Option<&str>,
    ) -> Vec<CertificationCampaign> {
        let mut campaigns: Vec<CertificationCampaign> = self
            .campaigns
            .read()
            .values()
            .map(|handle| handle.lock().clone())
            .filter(|c| status.map(|s| c.status == s).unwrap_or(true))
            .filter(|c| owner_id.map(|o| c.owner_id == o).unwrap_or(true))
            .collect();
        campaigns.sort_by_key(|c| c.created_at);
        campaigns
    }

    /// Items assigned to (or delegated to) a reviewer across open
    /// campaigns.
    pub fn reviewer_items(
        &self,
        reviewer_id: &str,
        campaign_id: Option<Uuid>,
        pending_only: bool,
    ) -> Vec<CertificationItem> {
        let mut items = Vec::new();
        for (id, handle) in self.campaigns.read().iter() {
            if let Some(filter_id) = campaign_id {
                if *id != filter_id {
                    continue;
                }
            }
            let campaign = handle.lock();
            if !matches!(
                campaign.status,
                CampaignStatus::Active | CampaignStatus::InReview
            ) {
                continue;
            }
            for item in &campaign.items {
                if !item.is_reviewer(reviewer_id) {
                    continue;
                }
                if pending_only && item.is_completed {
                    continue;
                }
                items.push(item.clone());
            }
        }
        items
    }

    pub fn reviewer_workload(&self) -> BTreeMap<String, ReviewerLoad> {
        let mut workload: BTreeMap<String, ReviewerLoad> = BTreeMap::new();
        for handle in self.campaigns.read().values() {
            let campaign = handle.lock();
            if campaign.status != CampaignStatus::Active {
                continue;
            }
            for (reviewer, load) in campaign.reviewer_summary() {
                let entry = workload.entry(reviewer).or_default();
                entry.total += load.total;
                entry.completed += load.completed;
                entry.pending += load.pending;
            }
        }
        workload
    }

    pub fn decisions(&self) -> Vec<CertificationDecision> {
        self.decisions.read().clone()
    }

    pub fn statistics(&self) -> CertificationStats {
        let campaigns = self.campaigns.read();
        let mut stats = CertificationStats {
            total_campaigns: campaigns.len(),
            active_campaigns: 0,
            completed_campaigns: 0,
            total_items: 0,
            total_certified: 0,
            total_revoked: 0,
        };
        for handle in campaigns.values() {
            let campaign = handle.lock();
            match campaign.status {
                CampaignStatus::Active => stats.active_campaigns += 1,
                CampaignStatus::Completed => stats.completed_campaigns += 1,
                _ => {}
            }
            stats.total_items += campaign.items.len();
            stats.total_certified += campaign.certified_count;
            stats.total_revoked += campaign.revoked_count;
        }
        stats
    }
}
