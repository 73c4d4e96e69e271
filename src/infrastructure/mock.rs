//! In-memory collaborator implementations.
//!
//! Programmable doubles for every external trait, used by the integration
//! tests and handy for local experiments without a connected landscape.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::models::Entitlement;
use crate::domain::request::RequestedAccess;

use super::connectors::{
    Clock, ConnectorError, ConnectorResult, EntitlementSource, FirefighterAvailability,
    GrantedRole, Notifier, Provisioner, UserResolver, UserScopeFilter,
};

#[derive(Debug, Clone, Default)]
pub struct MockUser {
    pub department: String,
    pub entitlements: Vec<Entitlement>,
    pub roles: Vec<GrantedRole>,
}

/// Programmable entitlement source backed by in-memory tables.
#[derive(Default)]
pub struct MockEntitlementSource {
    users: RwLock<HashMap<String, MockUser>>,
    firefighters: RwLock<HashMap<String, FirefighterAvailability>>,
    transient_failures: Mutex<u32>,
}

impl MockEntitlementSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_user(&self, user_id: impl Into<String>, user: MockUser) {
        self.users.write().insert(user_id.into(), user);
    }

    pub fn put_entitlements(&self, user_id: impl Into<String>, entitlements: Vec<Entitlement>) {
        let mut users = self.users.write();
        users.entry(user_id.into()).or_default().entitlements = entitlements;
    }

    pub fn put_roles(&self, user_id: impl Into<String>, roles: Vec<GrantedRole>) {
        let mut users = self.users.write();
        users.entry(user_id.into()).or_default().roles = roles;
    }

    pub fn put_firefighter(&self, availability: FirefighterAvailability) {
        self.firefighters
            .write()
            .insert(availability.firefighter_id.clone(), availability);
    }

    /// Make the next `count` calls fail with a transient error.
    pub fn fail_transiently(&self, count: u32) {
        *self.transient_failures.lock() = count;
    }

    fn check_failure(&self) -> ConnectorResult<()> {
        let mut remaining = self.transient_failures.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(ConnectorError::Transient(
                "mock entitlement source unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EntitlementSource for MockEntitlementSource {
    async fn users_in_scope(&self, filter: &UserScopeFilter) -> ConnectorResult<Vec<String>> {
        self.check_failure()?;
        let users = self.users.read();
        let mut ids: Vec<String> = users
            .iter()
            .filter(|(_, user)| {
                filter.departments.is_empty() || filter.departments.contains(&user.department)
            })
            .filter(|(_, user)| {
                filter.systems.is_empty()
                    || user.roles.iter().any(|r| filter.systems.contains(&r.system))
                    || user
                        .entitlements
                        .iter()
                        .any(|e| filter.systems.contains(&e.system))
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn entitlements_of(&self, user_id: &str) -> ConnectorResult<Vec<Entitlement>> {
        self.check_failure()?;
        Ok(self
            .users
            .read()
            .get(user_id)
            .map(|u| u.entitlements.clone())
            .unwrap_or_default())
    }

    async fn roles_of(&self, user_id: &str) -> ConnectorResult<Vec<GrantedRole>> {
        self.check_failure()?;
        Ok(self
            .users
            .read()
            .get(user_id)
            .map(|u| u.roles.clone())
            .unwrap_or_default())
    }

    async fn check_firefighter_availability(
        &self,
        firefighter_id: &str,
    ) -> ConnectorResult<FirefighterAvailability> {
        self.check_failure()?;
        self.firefighters
            .read()
            .get(firefighter_id)
            .cloned()
            .ok_or_else(|| {
                ConnectorError::Permanent(format!("unknown firefighter id {firefighter_id}"))
            })
    }
}

/// User resolver backed by lookup tables.
#[derive(Default)]
pub struct TableUserResolver {
    managers: RwLock<HashMap<String, String>>,
    emails: RwLock<HashMap<String, String>>,
    names: RwLock<HashMap<String, String>>,
    role_owners: RwLock<HashMap<String, String>>,
    data_owners: RwLock<HashMap<String, String>>,
    cost_center_owners: RwLock<HashMap<String, String>>,
}

impl TableUserResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_manager(&self, user_id: impl Into<String>, manager: impl Into<String>) {
        self.managers.write().insert(user_id.into(), manager.into());
    }

    pub fn set_email(&self, user_id: impl Into<String>, email: impl Into<String>) {
        self.emails.write().insert(user_id.into(), email.into());
    }

    pub fn set_name(&self, user_id: impl Into<String>, name: impl Into<String>) {
        self.names.write().insert(user_id.into(), name.into());
    }

    pub fn set_role_owner(&self, role_id: impl Into<String>, owner: impl Into<String>) {
        self.role_owners.write().insert(role_id.into(), owner.into());
    }

    pub fn set_data_owner(&self, system: impl Into<String>, owner: impl Into<String>) {
        self.data_owners.write().insert(system.into(), owner.into());
    }

    pub fn set_cost_center_owner(&self, cost_center: impl Into<String>, owner: impl Into<String>) {
        self.cost_center_owners
            .write()
            .insert(cost_center.into(), owner.into());
    }
}

#[async_trait]
impl UserResolver for TableUserResolver {
    async fn manager_of(&self, user_id: &str) -> ConnectorResult<Option<String>> {
        Ok(self.managers.read().get(user_id).cloned())
    }

    async fn email_of(&self, user_id: &str) -> ConnectorResult<Option<String>> {
        Ok(self.emails.read().get(user_id).cloned())
    }

    async fn name_of(&self, user_id: &str) -> ConnectorResult<Option<String>> {
        Ok(self.names.read().get(user_id).cloned())
    }

    async fn role_owner_of(&self, role_id: &str) -> ConnectorResult<Option<String>> {
        Ok(self.role_owners.read().get(role_id).cloned())
    }

    async fn data_owner_of(&self, system: &str) -> ConnectorResult<Option<String>> {
        Ok(self.data_owners.read().get(system).cloned())
    }

    async fn cost_center_owner_of(&self, cost_center: &str) -> ConnectorResult<Option<String>> {
        Ok(self.cost_center_owners.read().get(cost_center).cloned())
    }
}

/// A notification captured by [`MemoryNotifier`].
#[derive(Debug, Clone)]
pub struct SentNotification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Records notifications instead of sending them.
#[derive(Default)]
pub struct MemoryNotifier {
    sent: RwLock<Vec<SentNotification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.read().clone()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<SentNotification> {
        self.sent
            .read()
            .iter()
            .filter(|n| n.recipient == recipient)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> ConnectorResult<()> {
        self.sent.write().push(SentNotification {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Records provisioning commands; programmable failures.
#[derive(Default)]
pub struct MemoryProvisioner {
    provisioned: RwLock<Vec<Uuid>>,
    revoked: RwLock<Vec<Uuid>>,
    transient_failures: Mutex<u32>,
    permanent_failure: Mutex<bool>,
}

impl MemoryProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provisioned(&self) -> Vec<Uuid> {
        self.provisioned.read().clone()
    }

    pub fn revoked(&self) -> Vec<Uuid> {
        self.revoked.read().clone()
    }

    pub fn fail_transiently(&self, count: u32) {
        *self.transient_failures.lock() = count;
    }

    pub fn fail_permanently(&self, fail: bool) {
        *self.permanent_failure.lock() = fail;
    }

    fn check_failure(&self) -> ConnectorResult<()> {
        if *self.permanent_failure.lock() {
            return Err(ConnectorError::Permanent(
                "mock provisioner rejected the request".to_string(),
            ));
        }
        let mut remaining = self.transient_failures.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(ConnectorError::Transient(
                "mock provisioner unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Provisioner for MemoryProvisioner {
    async fn provision(
        &self,
        request_id: Uuid,
        _items: &[RequestedAccess],
    ) -> ConnectorResult<()> {
        self.check_failure()?;
        let mut provisioned = self.provisioned.write();
        if !provisioned.contains(&request_id) {
            provisioned.push(request_id);
        }
        Ok(())
    }

    async fn revoke(&self, request_id: Uuid) -> ConnectorResult<()> {
        self.check_failure()?;
        let mut revoked = self.revoked.write();
        if !revoked.contains(&request_id) {
            revoked.push(request_id);
        }
        Ok(())
    }
}

/// Clock whose time is set by the test.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
