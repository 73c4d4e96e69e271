//! Background sweepers.
//!
//! Periodic loops over the coordinator and certification engine: SLA
//! escalation, access expiry, and certification reminders/timeouts. Each
//! sweep is idempotent, so the loops are safe to restart; the SLA sweep
//! additionally enforces its own minimum interval and overlap guard.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::services::certification::CertificationEngine;
use crate::services::requests::RequestCoordinator;

/// Escalates overdue approval steps on a fixed cadence. The interval is
/// floored by the configured sweep minimum.
pub fn spawn_sla_sweeper(
    coordinator: Arc<RequestCoordinator>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match coordinator.sla_sweep().await {
                Ok(escalated) if escalated > 0 => {
                    info!(escalated, "SLA sweep escalated overdue steps")
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "SLA sweep failed"),
            }
            tokio::time::sleep(interval).await;
        }
    })
}

/// Expires provisioned temporary access and warns holders ahead of time.
pub fn spawn_expiry_sweeper(
    coordinator: Arc<RequestCoordinator>,
    interval: Duration,
    notify_days_ahead: i64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(err) = coordinator.expiry_notifications(notify_days_ahead).await {
                warn!(error = %err, "expiry notification sweep failed");
            }
            match coordinator.expiry_sweep().await {
                Ok(expired) if expired > 0 => info!(expired, "expired temporary access"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "expiry sweep failed"),
            }
            if let Err(err) = coordinator.reconcile_provisioning().await {
                warn!(error = %err, "provisioning reconciliation failed");
            }
            tokio::time::sleep(interval).await;
        }
    })
}

/// Sends certification reminders and handles campaign timeouts.
pub fn spawn_certification_sweeper(
    engine: Arc<CertificationEngine>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(err) = engine.send_reminders().await {
                warn!(error = %err, "certification reminder sweep failed");
            }
            match engine.expire_sweep().await {
                Ok(expired) if expired > 0 => info!(expired, "processed expired campaigns"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "certification expiry sweep failed"),
            }
            tokio::time::sleep(interval).await;
        }
    })
}
