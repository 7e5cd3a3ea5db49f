//! Minute pass and forced single-user refresh entry points.
//!
//! Both entry points are fire-and-forget: [`ScheduleTrigger::trigger_minute_pass`]
//! queues the pass on the small pass pool, the pass then queues one job per
//! candidate on the dispatch pool. Forced refreshes run on their own small pool
//! that scheduled candidates never touch, so a full dispatch queue cannot
//! delay or reject an operator-triggered refresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::config::{FlywheelSettings, SettingsHandle};
use crate::flywheel::dispatch::RefreshDispatcher;
use crate::flywheel::errors::PoolError;
use crate::flywheel::partition::{MinuteOfDay, UuidRangePartitioner};
use crate::flywheel::pool::WorkerPool;
use crate::flywheel::ports::{Candidate, UserId, UserSiteStore};
use crate::utils::{fmt_duration, log_if_slow};

const SLOW_QUERY_THRESHOLD: Duration = Duration::from_millis(500);

/// Worker pool dimensions.
#[derive(Debug, Clone, Copy)]
pub struct PoolSizes {
    pub pass_workers: usize,
    pub dispatch_workers: usize,
    pub dispatch_queue_capacity: usize,
    pub forced_workers: usize,
    pub forced_queue_capacity: usize,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            pass_workers: 2,
            dispatch_workers: 20,
            dispatch_queue_capacity: 50_000,
            forced_workers: 2,
            forced_queue_capacity: 100,
        }
    }
}

/// Occupancy of one pool, for the status endpoint.
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub name: &'static str,
    pub in_flight: usize,
    pub capacity: usize,
}

impl PoolStats {
    fn of(pool: &WorkerPool) -> Self {
        Self {
            name: pool.name(),
            in_flight: pool.in_flight(),
            capacity: pool.capacity(),
        }
    }
}

/// Result of one minute pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Disabled,
    /// Tenant discovery failed; nothing was queued.
    Failed,
    Completed(PassSummary),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub tenants: usize,
    pub opted_out: usize,
    pub failed_tenants: usize,
    pub candidates: usize,
    pub queued: usize,
    pub rejected: usize,
}

struct Inner {
    partitioner: UuidRangePartitioner,
    store: Arc<dyn UserSiteStore>,
    dispatcher: RefreshDispatcher,
    settings: SettingsHandle,
    pass_pool: WorkerPool,
    dispatch_pool: WorkerPool,
    forced_pool: WorkerPool,
}

#[derive(Clone)]
pub struct ScheduleTrigger {
    inner: Arc<Inner>,
}

impl ScheduleTrigger {
    pub fn new(
        store: Arc<dyn UserSiteStore>,
        dispatcher: RefreshDispatcher,
        settings: SettingsHandle,
        sizes: PoolSizes,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitioner: UuidRangePartitioner::new(),
                store,
                dispatcher,
                settings,
                pass_pool: WorkerPool::new("minute-pass", sizes.pass_workers, 0),
                dispatch_pool: WorkerPool::new(
                    "dispatch",
                    sizes.dispatch_workers,
                    sizes.dispatch_queue_capacity,
                ),
                forced_pool: WorkerPool::new(
                    "forced",
                    sizes.forced_workers,
                    sizes.forced_queue_capacity,
                ),
            }),
        }
    }

    /// Queue a minute pass and return immediately. Rejected when every pass
    /// worker is still busy with an earlier minute.
    pub fn trigger_minute_pass(&self, minute: MinuteOfDay) -> Result<(), PoolError> {
        let trigger = self.clone();
        self.inner.pass_pool.submit(async move {
            trigger.run_minute_pass(minute).await;
        })
    }

    /// Queue a forced refresh of one user and return immediately.
    pub fn trigger_forced_user(&self, user_id: UserId) -> Result<(), PoolError> {
        let trigger = self.clone();
        self.inner.forced_pool.submit(async move {
            trigger.run_forced_user(user_id).await;
        })
    }

    /// Select this minute's candidates across all tenants and queue a refresh
    /// for each. Never fails: errors are logged and end the pass early.
    pub async fn run_minute_pass(&self, minute: MinuteOfDay) -> PassOutcome {
        let span = info_span!("minute_pass", %minute);
        async move {
            let settings = self.inner.settings.snapshot().await;
            if !settings.enabled {
                info!("Flywheel disabled, skipping minute pass");
                return PassOutcome::Disabled;
            }

            let start = Instant::now();
            let mut summary = PassSummary::default();
            let candidates = match self.collect_candidates(minute, &settings, &mut summary).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    error!(error = ?e, "Minute pass failed");
                    return PassOutcome::Failed;
                }
            };
            summary.candidates = candidates.len();

            for candidate in candidates {
                let trigger = self.clone();
                let settings = settings.clone();
                let job = async move {
                    trigger.refresh_candidate(candidate, &settings).await;
                };
                match self.inner.dispatch_pool.submit(job) {
                    Ok(()) => summary.queued += 1,
                    Err(e) => {
                        summary.rejected += 1;
                        warn!(
                            user_id = %candidate.user_id,
                            tenant_id = %candidate.tenant_id,
                            error = %e,
                            "Failed to queue user refresh"
                        );
                    }
                }
            }

            info!(
                tenants = summary.tenants,
                opted_out = summary.opted_out,
                failed_tenants = summary.failed_tenants,
                candidates = summary.candidates,
                queued = summary.queued,
                rejected = summary.rejected,
                duration = fmt_duration(start.elapsed()),
                "Minute pass complete"
            );
            PassOutcome::Completed(summary)
        }
        .instrument(span)
        .await
    }

    /// Resolve the candidate users for `minute`. A failing tenant is logged and
    /// skipped; only a failed tenant discovery aborts the pass.
    async fn collect_candidates(
        &self,
        minute: MinuteOfDay,
        settings: &FlywheelSettings,
        summary: &mut PassSummary,
    ) -> anyhow::Result<Vec<Candidate>> {
        let start = Instant::now();
        let tenants = self
            .inner
            .store
            .tenants_with_user_sites()
            .await
            .context("failed to list tenants with user-sites")?;
        log_if_slow(start, SLOW_QUERY_THRESHOLD, "tenants_with_user_sites");
        summary.tenants = tenants.len();

        let mut candidates = Vec::new();
        for tenant_id in tenants {
            let frequency = settings.refreshes_per_day(tenant_id);
            if frequency == 0 {
                trace!(%tenant_id, "Tenant opted out of scheduled refreshes");
                summary.opted_out += 1;
                continue;
            }

            let range = self.inner.partitioner.get_range(frequency, minute)?;
            let start = Instant::now();
            match self.inner.store.user_ids_in_range(tenant_id, range).await {
                Ok(user_ids) => {
                    log_if_slow(start, SLOW_QUERY_THRESHOLD, "user_ids_in_range");
                    trace!(%tenant_id, frequency, %range, users = user_ids.len(), "Tenant candidates");
                    candidates.extend(
                        user_ids
                            .into_iter()
                            .map(|user_id| Candidate { tenant_id, user_id }),
                    );
                }
                Err(e) => {
                    summary.failed_tenants += 1;
                    error!(%tenant_id, error = ?e, "Failed to list candidate users for tenant");
                }
            }
        }

        Ok(candidates)
    }

    /// Scheduled refresh of one candidate. Every failure stops here.
    async fn refresh_candidate(&self, candidate: Candidate, settings: &FlywheelSettings) {
        if let Err(e) = self.try_refresh_candidate(candidate, settings).await {
            warn!(
                user_id = %candidate.user_id,
                tenant_id = %candidate.tenant_id,
                error = ?e,
                "Scheduled refresh failed"
            );
        }
    }

    async fn try_refresh_candidate(
        &self,
        candidate: Candidate,
        settings: &FlywheelSettings,
    ) -> anyhow::Result<()> {
        let Some(user) = self
            .inner
            .store
            .get_user(candidate.user_id)
            .await
            .context("failed to load user")?
        else {
            debug!(user_id = %candidate.user_id, "Candidate user no longer exists");
            return Ok(());
        };
        if user.is_blocked() {
            debug!(user_id = %user.id, "Candidate user is blocked, skipping");
            return Ok(());
        }

        let outcome = self
            .inner
            .dispatcher
            .refresh_user(&user, false, settings)
            .await?;
        trace!(user_id = %user.id, ?outcome, "Scheduled refresh finished");
        Ok(())
    }

    /// Refresh one user now, bypassing the id range and the waivable rules.
    pub async fn run_forced_user(&self, user_id: UserId) {
        let span = info_span!("forced_refresh", %user_id);
        async move {
            let settings = self.inner.settings.snapshot().await;
            let user = match self.inner.store.get_user(user_id).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    info!("Forced refresh requested for unknown user");
                    return;
                }
                Err(e) => {
                    error!(error = ?e, "Failed to load user for forced refresh");
                    return;
                }
            };
            if user.is_blocked() {
                info!("User is blocked, ignoring forced refresh");
                return;
            }

            match self.inner.dispatcher.refresh_user(&user, true, &settings).await {
                Ok(outcome) => info!(?outcome, "Forced refresh complete"),
                Err(e) => warn!(error = ?e, "Forced refresh failed"),
            }
        }
        .instrument(span)
        .await
    }

    pub fn pool_stats(&self) -> [PoolStats; 3] {
        [
            PoolStats::of(&self.inner.pass_pool),
            PoolStats::of(&self.inner.dispatch_pool),
            PoolStats::of(&self.inner.forced_pool),
        ]
    }

    /// Stop accepting work and wait for queued passes, then queued refreshes.
    pub async fn shutdown(&self) {
        self.inner.pass_pool.shutdown().await;
        tokio::join!(
            self.inner.dispatch_pool.shutdown(),
            self.inner.forced_pool.shutdown(),
        );
    }
}
