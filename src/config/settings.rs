//! Hot-reloadable flywheel settings.
//!
//! Settings come from an optional TOML file merged with `FLYWHEEL_`-prefixed
//! environment variables. A background task re-reads the sources and swaps in
//! a new snapshot; each minute pass reads exactly one snapshot, so a reload
//! never changes the rules halfway through a pass.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::flywheel::partition::MAX_REFRESHES_PER_DAY;
use crate::flywheel::ports::TenantId;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to load flywheel settings")]
    Load(#[from] figment::Error),
    #[error("default_refreshes_per_day is {0}, above the ceiling of 4")]
    DefaultAboveCeiling(u32),
    #[error("refreshes per day for tenant {tenant_id} is {value}, above the ceiling of 4")]
    TenantAboveCeiling { tenant_id: TenantId, value: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlywheelSettings {
    pub enabled: bool,
    pub min_seconds_since_last_refresh: u64,
    pub blacklisted_providers: HashSet<String>,
    /// Per-tenant refreshes per day. `0` opts a tenant out entirely.
    pub per_tenant_refreshes_per_day: HashMap<TenantId, u32>,
    pub default_refreshes_per_day: u32,
}

impl Default for FlywheelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_seconds_since_last_refresh: 3600,
            blacklisted_providers: HashSet::new(),
            per_tenant_refreshes_per_day: HashMap::new(),
            default_refreshes_per_day: MAX_REFRESHES_PER_DAY,
        }
    }
}

impl FlywheelSettings {
    /// Configured refreshes per day for a tenant, falling back to the default.
    pub fn refreshes_per_day(&self, tenant_id: TenantId) -> u32 {
        self.per_tenant_refreshes_per_day
            .get(&tenant_id)
            .copied()
            .unwrap_or(self.default_refreshes_per_day)
    }

    pub fn is_blacklisted(&self, provider: &str) -> bool {
        self.blacklisted_providers.contains(provider)
    }

    pub fn min_interval(&self) -> TimeDelta {
        i64::try_from(self.min_seconds_since_last_refresh)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    /// Rejects frequencies above the regulatory ceiling instead of silently
    /// clamping them later.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.default_refreshes_per_day > MAX_REFRESHES_PER_DAY {
            return Err(SettingsError::DefaultAboveCeiling(
                self.default_refreshes_per_day,
            ));
        }
        if let Some((&tenant_id, &value)) = self
            .per_tenant_refreshes_per_day
            .iter()
            .find(|(_, v)| **v > MAX_REFRESHES_PER_DAY)
        {
            return Err(SettingsError::TenantAboveCeiling { tenant_id, value });
        }
        Ok(())
    }
}

/// Where settings are read from.
#[derive(Debug, Clone, Default)]
pub struct SettingsSource {
    path: Option<PathBuf>,
}

impl SettingsSource {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<FlywheelSettings, SettingsError> {
        let mut figment = Figment::from(Serialized::defaults(FlywheelSettings::default()));
        if let Some(path) = &self.path {
            figment = figment.merge(Toml::file(path));
        }
        let settings: FlywheelSettings = figment
            .merge(Env::prefixed("FLYWHEEL_"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Shared, swappable settings snapshot.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    current: Arc<RwLock<Arc<FlywheelSettings>>>,
}

impl SettingsHandle {
    pub fn new(settings: FlywheelSettings) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    /// The settings in effect right now. Hold on to the returned snapshot for
    /// the duration of a pass.
    pub async fn snapshot(&self) -> Arc<FlywheelSettings> {
        self.current.read().await.clone()
    }

    /// Swap in new settings, returning whether anything changed.
    pub async fn replace(&self, settings: FlywheelSettings) -> bool {
        let mut current = self.current.write().await;
        if **current == settings {
            return false;
        }
        *current = Arc::new(settings);
        true
    }

    /// Spawn a background task that re-reads `source` every `interval`.
    /// Invalid settings are logged and the previous snapshot stays in effect.
    /// The task runs until the process exits.
    pub fn spawn_reload(&self, source: SettingsSource, interval: Duration) {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip the immediate first tick
            loop {
                ticker.tick().await;
                match source.load() {
                    Ok(settings) => {
                        let enabled = settings.enabled;
                        let tenants = settings.per_tenant_refreshes_per_day.len();
                        if handle.replace(settings).await {
                            info!(
                                enabled,
                                tenant_overrides = tenants,
                                "Flywheel settings reloaded"
                            );
                        } else {
                            debug!("Flywheel settings unchanged");
                        }
                    }
                    Err(e) => {
                        warn!(error = ?e, "Failed to reload flywheel settings, keeping previous");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn tenant_override_wins_over_default() {
        let tenant = Uuid::new_v4();
        let opted_out = Uuid::new_v4();
        let settings = FlywheelSettings {
            default_refreshes_per_day: 2,
            per_tenant_refreshes_per_day: HashMap::from([(tenant, 4), (opted_out, 0)]),
            ..Default::default()
        };
        assert_eq!(settings.refreshes_per_day(tenant), 4);
        assert_eq!(settings.refreshes_per_day(opted_out), 0);
        assert_eq!(settings.refreshes_per_day(Uuid::new_v4()), 2);
    }

    #[test]
    fn validate_rejects_frequency_above_ceiling() {
        let settings = FlywheelSettings {
            default_refreshes_per_day: 5,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::DefaultAboveCeiling(5))
        ));

        let tenant = Uuid::new_v4();
        let settings = FlywheelSettings {
            per_tenant_refreshes_per_day: HashMap::from([(tenant, 7)]),
            ..Default::default()
        };
        match settings.validate() {
            Err(SettingsError::TenantAboveCeiling { tenant_id, value }) => {
                assert_eq!(tenant_id, tenant);
                assert_eq!(value, 7);
            }
            other => panic!("expected TenantAboveCeiling, got {other:?}"),
        }

        assert!(FlywheelSettings::default().validate().is_ok());
    }

    #[test]
    fn min_interval_saturates() {
        let settings = FlywheelSettings {
            min_seconds_since_last_refresh: u64::MAX,
            ..Default::default()
        };
        assert_eq!(settings.min_interval(), TimeDelta::MAX);

        let settings = FlywheelSettings {
            min_seconds_since_last_refresh: 90,
            ..Default::default()
        };
        assert_eq!(settings.min_interval(), TimeDelta::seconds(90));
    }

    #[test]
    fn load_from_toml_file() {
        figment::Jail::expect_with(|jail| {
            let tenant = "6f1c2a9e-0000-4000-8000-000000000001";
            jail.create_file(
                "flywheel.toml",
                &format!(
                    r#"
                    enabled = false
                    min_seconds_since_last_refresh = 120
                    blacklisted_providers = ["YODLEE"]
                    default_refreshes_per_day = 1

                    [per_tenant_refreshes_per_day]
                    "{tenant}" = 3
                    "#
                ),
            )?;

            let settings = SettingsSource::new(Some("flywheel.toml".into()))
                .load()
                .map_err(|e| e.to_string())?;
            assert!(!settings.enabled);
            assert_eq!(settings.min_seconds_since_last_refresh, 120);
            assert!(settings.is_blacklisted("YODLEE"));
            assert_eq!(settings.default_refreshes_per_day, 1);
            assert_eq!(settings.refreshes_per_day(Uuid::parse_str(tenant).unwrap()), 3);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("flywheel.toml", "min_seconds_since_last_refresh = 120")?;
            jail.set_env("FLYWHEEL_MIN_SECONDS_SINCE_LAST_REFRESH", "600");
            jail.set_env("FLYWHEEL_ENABLED", "false");

            let settings = SettingsSource::new(Some("flywheel.toml".into()))
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(settings.min_seconds_since_last_refresh, 600);
            assert!(!settings.enabled);
            Ok(())
        });
    }

    #[test]
    fn load_rejects_invalid_frequency() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("FLYWHEEL_DEFAULT_REFRESHES_PER_DAY", "6");
            let result = SettingsSource::default().load();
            assert!(matches!(result, Err(SettingsError::DefaultAboveCeiling(6))));
            Ok(())
        });
    }

    #[tokio::test]
    async fn replace_reports_changes() {
        let handle = SettingsHandle::new(FlywheelSettings::default());
        assert!(!handle.replace(FlywheelSettings::default()).await);

        let before = handle.snapshot().await;
        let changed = FlywheelSettings {
            enabled: false,
            ..Default::default()
        };
        assert!(handle.replace(changed).await);
        assert!(before.enabled);
        assert!(!handle.snapshot().await.enabled);
    }
}
