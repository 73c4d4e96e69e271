//! Access governance core: risk analysis, approval workflow, and
//! certification for enterprise application landscapes.
//!
//! The crate answers one operational question continuously: given every
//! user's current entitlements, which combinations violate
//! segregation-of-duties or sensitive-access policy, and how should
//! requested changes be approved, mitigated, provisioned, and later
//! re-certified?
//!
//! The public surface is a set of explicitly constructed services:
//!
//! * [`services::rules::RuleEngine`] — evaluates users against SoD and
//!   sensitive-access rules, producing violations.
//! * [`services::org_filter::OrgRuleEngine`] — post-filters violations whose
//!   conflicting entitlements are scoped to different organizational units.
//! * [`services::workflow::WorkflowEngine`] — generates risk-driven approval
//!   plans and drives them through a multi-stage, multi-path state machine
//!   with SLA tracking, escalation, and delegation.
//! * [`services::certification::CertificationEngine`] — builds review
//!   campaigns, records decisions, and auto-revokes on timeout.
//! * [`services::requests::RequestCoordinator`] — owns the access-request
//!   lifecycle from risk preview through provisioning.
//!
//! External collaborators (entitlement source, user resolver, notifier,
//! provisioner, clock, audit sink) are traits in [`infrastructure`] and are
//! injected through [`services::requests::RequestCoordinatorBuilder`]. The
//! crate does not own HTTP, connectors to real systems, or persistence.

pub mod domain;
pub mod infrastructure;
pub mod jobs;
pub mod services;
pub mod telemetry;
pub mod validation;
