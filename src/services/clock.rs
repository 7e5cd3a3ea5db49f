//! In-process minute ticker, for deployments without an external scheduler.

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, warn};

use crate::flywheel::{MinuteOfDay, PoolError, ScheduleTrigger};
use crate::services::Service;
use crate::state::{ServiceStatus, ServiceStatusRegistry};

pub struct ClockService {
    trigger: ScheduleTrigger,
    service_statuses: ServiceStatusRegistry,
}

impl ClockService {
    pub fn new(trigger: ScheduleTrigger, service_statuses: ServiceStatusRegistry) -> Self {
        Self {
            trigger,
            service_statuses,
        }
    }
}

/// Time left until the next whole UTC minute.
fn until_next_minute(now: DateTime<Utc>) -> Duration {
    let into_minute = Duration::new(u64::from(now.second()), now.nanosecond() % 1_000_000_000);
    Duration::from_secs(60).saturating_sub(into_minute)
}

#[async_trait::async_trait]
impl Service for ClockService {
    fn name(&self) -> &'static str {
        "clock"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        self.service_statuses
            .set(self.name(), ServiceStatus::Active);
        loop {
            tokio::time::sleep(until_next_minute(Utc::now())).await;

            let minute = MinuteOfDay::now();
            match self.trigger.trigger_minute_pass(minute) {
                Ok(()) => debug!(%minute, "Minute pass queued"),
                Err(e @ PoolError::Saturated { .. }) => {
                    warn!(%minute, error = %e, "Previous minute passes still running, skipping");
                }
                Err(e @ PoolError::Closed { .. }) => {
                    warn!(%minute, error = %e, "Minute pass pool closed, stopping clock");
                    return Ok(());
                }
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.service_statuses
            .set(self.name(), ServiceStatus::Disabled);
        Ok(())
    }
}
