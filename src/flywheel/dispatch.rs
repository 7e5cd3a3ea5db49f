//! Per-user eligibility filtering and refresh dispatch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, trace};

use crate::config::FlywheelSettings;
use crate::flywheel::eligibility::{Eligibility, EligibilityFilter};
use crate::flywheel::errors::DispatchError;
use crate::flywheel::ports::{
    CredentialIssuer, RefreshExecutor, RefreshGate, RefreshOrigin, User, UserSiteStore,
};
use crate::utils::{fmt_duration, log_if_slow};

const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(500);

/// What happened to a single user's refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The user has no non-deleted user-sites.
    NoUserSites,
    /// Every user-site was excluded; nothing was sent downstream.
    NothingEligible { excluded: usize },
    Dispatched { refreshed: usize, excluded: usize },
}

/// Loads a user's user-sites, drops the ineligible ones and hands the rest to
/// the refresh collaborator in one bulk call.
pub struct RefreshDispatcher {
    store: Arc<dyn UserSiteStore>,
    gate: Arc<dyn RefreshGate>,
    credentials: Arc<dyn CredentialIssuer>,
    executor: Arc<dyn RefreshExecutor>,
}

impl RefreshDispatcher {
    pub fn new(
        store: Arc<dyn UserSiteStore>,
        gate: Arc<dyn RefreshGate>,
        credentials: Arc<dyn CredentialIssuer>,
        executor: Arc<dyn RefreshExecutor>,
    ) -> Self {
        Self {
            store,
            gate,
            credentials,
            executor,
        }
    }

    /// Refresh every eligible user-site of `user`.
    ///
    /// Errors are returned, not logged; the caller owns failure isolation.
    #[tracing::instrument(skip_all, fields(user_id = %user.id, force = force))]
    pub async fn refresh_user(
        &self,
        user: &User,
        force: bool,
        settings: &FlywheelSettings,
    ) -> Result<DispatchOutcome, DispatchError> {
        let start = Instant::now();
        let user_sites = self
            .store
            .non_deleted_user_sites(user.id)
            .await
            .map_err(|source| DispatchError::LoadUserSites {
                user_id: user.id,
                source,
            })?;
        log_if_slow(start, SLOW_QUERY_THRESHOLD, "non_deleted_user_sites");

        if user_sites.is_empty() {
            trace!("User has no user-sites");
            return Ok(DispatchOutcome::NoUserSites);
        }

        let filter = EligibilityFilter::new(
            settings,
            self.gate.as_ref(),
            user.one_off,
            force,
            Utc::now(),
        );
        let total = user_sites.len();
        let eligible: Vec<_> = user_sites
            .into_iter()
            .filter(|site| match filter.evaluate(site) {
                Eligibility::Eligible => true,
                Eligibility::Excluded(reason) => {
                    debug!(
                        user_site_id = %site.id,
                        provider = %site.provider,
                        %reason,
                        "User-site excluded from refresh"
                    );
                    false
                }
            })
            .collect();
        let excluded = total - eligible.len();

        if eligible.is_empty() {
            debug!(excluded, "No eligible user-sites");
            return Ok(DispatchOutcome::NothingEligible { excluded });
        }

        let credential = self
            .credentials
            .issue(user.tenant_id, user.id)
            .await
            .map_err(|source| DispatchError::IssueCredential {
                user_id: user.id,
                source,
            })?;

        let origin = RefreshOrigin::from_force(force);
        let start = Instant::now();
        self.executor
            .refresh_user_sites(user.id, &eligible, user.one_off, &credential, origin)
            .await
            .map_err(|source| DispatchError::Refresh {
                user_id: user.id,
                count: eligible.len(),
                source,
            })?;

        debug!(
            refreshed = eligible.len(),
            excluded,
            origin = origin.as_str(),
            duration = fmt_duration(start.elapsed()),
            "User-sites refreshed"
        );

        Ok(DispatchOutcome::Dispatched {
            refreshed: eligible.len(),
            excluded,
        })
    }
}
