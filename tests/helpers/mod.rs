#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flywheel::config::{FlywheelSettings, SettingsHandle};
use flywheel::flywheel::ports::{
    Credential, CredentialIssuer, NeededAction, NeededActionGate, RefreshExecutor, RefreshOrigin,
    TenantId, User, UserId, UserSite, UserSiteStore, UserStatus,
};
use flywheel::flywheel::{
    IdRange, MinuteOfDay, PoolSizes, RefreshDispatcher, ScheduleTrigger, UuidRangePartitioner,
};
use uuid::Uuid;

/// In-memory users and user-sites with switchable failures.
#[derive(Default)]
pub struct FakeStore {
    users: Mutex<HashMap<UserId, User>>,
    user_sites: Mutex<HashMap<UserId, Vec<UserSite>>>,
    fail_tenant_discovery: AtomicBool,
    failing_tenants: Mutex<HashSet<TenantId>>,
}

impl FakeStore {
    pub fn add_user(&self, user: User, user_sites: Vec<UserSite>) {
        self.user_sites.lock().unwrap().insert(user.id, user_sites);
        self.users.lock().unwrap().insert(user.id, user);
    }

    pub fn fail_tenant_discovery(&self) {
        self.fail_tenant_discovery.store(true, Ordering::SeqCst);
    }

    pub fn fail_tenant(&self, tenant_id: TenantId) {
        self.failing_tenants.lock().unwrap().insert(tenant_id);
    }
}

#[async_trait]
impl UserSiteStore for FakeStore {
    async fn tenants_with_user_sites(&self) -> Result<HashSet<TenantId>> {
        if self.fail_tenant_discovery.load(Ordering::SeqCst) {
            bail!("tenant discovery unavailable");
        }
        let user_sites = self.user_sites.lock().unwrap();
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .filter(|user| user_sites.get(&user.id).is_some_and(|sites| !sites.is_empty()))
            .map(|user| user.tenant_id)
            .collect())
    }

    async fn user_ids_in_range(&self, tenant_id: TenantId, range: IdRange) -> Result<Vec<UserId>> {
        if self.failing_tenants.lock().unwrap().contains(&tenant_id) {
            bail!("range query failed for tenant {tenant_id}");
        }
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .filter(|user| user.tenant_id == tenant_id && range.contains(user.id))
            .map(|user| user.id)
            .collect())
    }

    async fn non_deleted_user_sites(&self, user_id: UserId) -> Result<Vec<UserSite>> {
        Ok(self
            .user_sites
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }
}

/// Issues a token per user, failing for selected users.
#[derive(Default)]
pub struct FakeCredentials {
    failing_users: Mutex<HashSet<UserId>>,
}

impl FakeCredentials {
    pub fn fail_for(&self, user_id: UserId) {
        self.failing_users.lock().unwrap().insert(user_id);
    }
}

#[async_trait]
impl CredentialIssuer for FakeCredentials {
    async fn issue(&self, _tenant_id: TenantId, user_id: UserId) -> Result<Credential> {
        if self.failing_users.lock().unwrap().contains(&user_id) {
            bail!("credential service refused user {user_id}");
        }
        Ok(Credential {
            access_token: format!("token-{user_id}"),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshCall {
    pub user_id: UserId,
    pub user_site_ids: Vec<Uuid>,
    pub one_off: bool,
    pub origin: RefreshOrigin,
}

/// Records every bulk refresh it receives. Refreshes for users marked failing
/// are recorded and then fail; users marked panicking panic instead.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<RefreshCall>>,
    failing_users: Mutex<HashSet<UserId>>,
    panicking_users: Mutex<HashSet<UserId>>,
}

impl RecordingExecutor {
    pub fn fail_for(&self, user_id: UserId) {
        self.failing_users.lock().unwrap().insert(user_id);
    }

    pub fn panic_for(&self, user_id: UserId) {
        self.panicking_users.lock().unwrap().insert(user_id);
    }

    pub fn calls(&self) -> Vec<RefreshCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn refreshed_users(&self) -> HashSet<UserId> {
        self.calls().into_iter().map(|call| call.user_id).collect()
    }
}

#[async_trait]
impl RefreshExecutor for RecordingExecutor {
    async fn refresh_user_sites(
        &self,
        user_id: UserId,
        user_sites: &[UserSite],
        one_off: bool,
        _credential: &Credential,
        origin: RefreshOrigin,
    ) -> Result<()> {
        if self.panicking_users.lock().unwrap().contains(&user_id) {
            panic!("executor blew up for {user_id}");
        }
        self.calls.lock().unwrap().push(RefreshCall {
            user_id,
            user_site_ids: user_sites.iter().map(|site| site.id).collect(),
            one_off,
            origin,
        });
        if self.failing_users.lock().unwrap().contains(&user_id) {
            bail!("bulk refresh failed for {user_id}");
        }
        Ok(())
    }
}

/// A trigger wired to in-memory collaborators.
pub struct Harness {
    pub store: Arc<FakeStore>,
    pub credentials: Arc<FakeCredentials>,
    pub executor: Arc<RecordingExecutor>,
    pub settings: SettingsHandle,
    pub trigger: ScheduleTrigger,
}

impl Harness {
    pub fn new(settings: FlywheelSettings) -> Self {
        Self::with_pool_sizes(settings, small_pools())
    }

    pub fn with_pool_sizes(settings: FlywheelSettings, sizes: PoolSizes) -> Self {
        let store = Arc::new(FakeStore::default());
        let credentials = Arc::new(FakeCredentials::default());
        let executor = Arc::new(RecordingExecutor::default());
        let settings = SettingsHandle::new(settings);

        let dispatcher = RefreshDispatcher::new(
            store.clone(),
            Arc::new(NeededActionGate),
            credentials.clone(),
            executor.clone(),
        );
        let trigger = ScheduleTrigger::new(store.clone(), dispatcher, settings.clone(), sizes);

        Self {
            store,
            credentials,
            executor,
            settings,
            trigger,
        }
    }

    /// Wait for every queued pass and refresh to finish.
    pub async fn drain(&self) {
        self.trigger.shutdown().await;
    }
}

pub fn small_pools() -> PoolSizes {
    PoolSizes {
        pass_workers: 1,
        dispatch_workers: 4,
        dispatch_queue_capacity: 100,
        forced_workers: 1,
        forced_queue_capacity: 10,
    }
}

pub fn minute(m: u32) -> MinuteOfDay {
    MinuteOfDay::new(m).unwrap()
}

/// Range scheduled at `minute` for `frequency` refreshes per day.
pub fn range_at(frequency: u32, minute: MinuteOfDay) -> IdRange {
    UuidRangePartitioner::new()
        .get_range(frequency, minute)
        .unwrap()
}

/// An id strictly inside `range`, offset so several ids can be drawn from it.
pub fn id_inside(range: IdRange, offset: u128) -> Uuid {
    Uuid::from_u128(range.left.as_u128() + 1 + offset)
}

/// An id just past the end of `range`.
pub fn id_after(range: IdRange) -> Uuid {
    Uuid::from_u128(range.right.as_u128() + 1)
}

pub fn user(id: UserId, tenant_id: TenantId) -> User {
    User {
        id,
        tenant_id,
        status: UserStatus::Active,
        one_off: false,
    }
}

pub fn user_site(user_id: UserId, provider: &str) -> UserSite {
    UserSite {
        id: Uuid::new_v4(),
        user_id,
        provider: provider.to_string(),
        last_data_fetch: None,
        migrating: false,
        needed_action: NeededAction::Proceed,
    }
}

pub fn fetched_at(mut site: UserSite, at: DateTime<Utc>) -> UserSite {
    site.last_data_fetch = Some(at);
    site
}

pub fn settings() -> FlywheelSettings {
    FlywheelSettings {
        min_seconds_since_last_refresh: 3600,
        blacklisted_providers: HashSet::from(["YODLEE".to_string()]),
        ..Default::default()
    }
}
