//! [`UserSiteStore`] backed by the `users` and `user_site` tables.
//!
//! Postgres orders `uuid` values bytewise, which matches the unsigned 128-bit
//! ordering the partitioner uses, so range lookups are plain `BETWEEN` scans.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::flywheel::partition::IdRange;
use crate::flywheel::ports::{
    NeededAction, TenantId, User, UserId, UserSite, UserSiteStore, UserStatus,
};

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    client_id: Uuid,
    status: String,
    one_off_ais: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.client_id,
            status: parse_user_status(&row.status),
            one_off: row.one_off_ais,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserSiteRow {
    id: Uuid,
    user_id: Uuid,
    provider: String,
    last_data_fetch: Option<DateTime<Utc>>,
    is_migrating: bool,
    needed_action: Option<String>,
}

impl From<UserSiteRow> for UserSite {
    fn from(row: UserSiteRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            provider: row.provider,
            last_data_fetch: row.last_data_fetch,
            migrating: row.is_migrating,
            needed_action: parse_needed_action(row.needed_action.as_deref()),
        }
    }
}

fn parse_user_status(status: &str) -> UserStatus {
    if status.eq_ignore_ascii_case("BLOCKED") {
        UserStatus::Blocked
    } else {
        UserStatus::Active
    }
}

/// Anything other than an explicit "proceed" (or no pending action at all)
/// requires the user before an unattended refresh.
fn parse_needed_action(value: Option<&str>) -> NeededAction {
    match value {
        None => NeededAction::Proceed,
        Some(v) if v.eq_ignore_ascii_case("PROCEED") => NeededAction::Proceed,
        Some(_) => NeededAction::Blocked,
    }
}

#[derive(Debug, Clone)]
pub struct PgUserSiteStore {
    pool: PgPool,
}

impl PgUserSiteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserSiteStore for PgUserSiteStore {
    async fn tenants_with_user_sites(&self) -> Result<HashSet<TenantId>> {
        let tenants = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT u.client_id
            FROM users u
            WHERE EXISTS (
                SELECT 1 FROM user_site us
                WHERE us.user_id = u.id AND NOT us.deleted
            )
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("tenants_with_user_sites query failed")?;
        Ok(tenants.into_iter().collect())
    }

    async fn user_ids_in_range(&self, tenant_id: TenantId, range: IdRange) -> Result<Vec<UserId>> {
        let mut user_ids = Vec::new();
        for (left, right) in range.segments() {
            let segment = sqlx::query_scalar::<_, Uuid>(
                "SELECT id FROM users WHERE client_id = $1 AND id BETWEEN $2 AND $3",
            )
            .bind(tenant_id)
            .bind(left)
            .bind(right)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("user_ids_in_range query failed for [{left}, {right}]"))?;
            user_ids.extend(segment);
        }
        Ok(user_ids)
    }

    async fn non_deleted_user_sites(&self, user_id: UserId) -> Result<Vec<UserSite>> {
        let rows = sqlx::query_as::<_, UserSiteRow>(
            r#"
            SELECT id, user_id, provider, last_data_fetch, is_migrating, needed_action
            FROM user_site
            WHERE user_id = $1 AND NOT deleted
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("non_deleted_user_sites query failed")?;
        Ok(rows.into_iter().map(UserSite::from).collect())
    }

    async fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, client_id, status, one_off_ais FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("get_user query failed")?;
        Ok(row.map(User::from))
    }
}
