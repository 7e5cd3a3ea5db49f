//! Records and collaborator interfaces consumed by the flywheel.
//!
//! Persistence, credential issuance and the actual provider refresh live in
//! other systems. The flywheel only sees them through these traits, which keeps
//! the scheduling logic testable against in-memory fakes.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flywheel::partition::IdRange;

pub type TenantId = Uuid;
pub type UserId = Uuid;

/// Two-state view of the user-site status machine: may a refresh run without
/// the user being present?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NeededAction {
    Proceed,
    Blocked,
}

/// A bank connection belonging to a user.
#[derive(Debug, Clone, PartialEq)]
pub struct UserSite {
    pub id: Uuid,
    pub user_id: UserId,
    pub provider: String,
    pub last_data_fetch: Option<DateTime<Utc>>,
    pub migrating: bool,
    pub needed_action: NeededAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Blocked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub status: UserStatus,
    /// Data for this user may be fetched at most once, ever.
    pub one_off: bool,
}

impl User {
    pub fn is_blocked(&self) -> bool {
        self.status == UserStatus::Blocked
    }
}

/// A user selected by the current minute's id range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub tenant_id: TenantId,
    pub user_id: UserId,
}

/// Short-lived service token used to call the refresh collaborator on behalf
/// of a user.
#[derive(Clone, custom_debug_derive::Debug)]
pub struct Credential {
    #[debug(skip)]
    pub access_token: String,
}

/// Distinguishes schedule-driven refreshes from operator-forced ones downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshOrigin {
    Flywheel,
    FlywheelForced,
}

impl RefreshOrigin {
    pub fn from_force(force: bool) -> Self {
        if force {
            Self::FlywheelForced
        } else {
            Self::Flywheel
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flywheel => "FLYWHEEL",
            Self::FlywheelForced => "FLYWHEEL_FORCED",
        }
    }
}

/// Read access to users and their user-sites.
#[async_trait]
pub trait UserSiteStore: Send + Sync {
    /// Tenants that currently own at least one user-site.
    async fn tenants_with_user_sites(&self) -> Result<HashSet<TenantId>>;

    /// Users of `tenant_id` whose id falls inside `range` (inclusive, wrapping
    /// ranges cover both segments).
    async fn user_ids_in_range(&self, tenant_id: TenantId, range: IdRange) -> Result<Vec<UserId>>;

    async fn non_deleted_user_sites(&self, user_id: UserId) -> Result<Vec<UserSite>>;

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>>;
}

/// Decides whether a user-site may be refreshed without user interaction.
pub trait RefreshGate: Send + Sync {
    fn is_refresh_permitted(&self, user_site: &UserSite) -> bool;
}

/// Gate reading the needed-action state carried on the user-site record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeededActionGate;

impl RefreshGate for NeededActionGate {
    fn is_refresh_permitted(&self, user_site: &UserSite) -> bool {
        user_site.needed_action == NeededAction::Proceed
    }
}

#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, tenant_id: TenantId, user_id: UserId) -> Result<Credential>;
}

/// Performs the provider refresh for a batch of user-sites and returns once it
/// has completed.
#[async_trait]
pub trait RefreshExecutor: Send + Sync {
    async fn refresh_user_sites(
        &self,
        user_id: UserId,
        user_sites: &[UserSite],
        one_off: bool,
        credential: &Credential,
        origin: RefreshOrigin,
    ) -> Result<()>;
}
