use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::{info, warn};

use crate::clients::{CredentialClient, SiteManagementClient, build_http_client};
use crate::config::{Config, SettingsHandle, SettingsSource};
use crate::data::PgUserSiteStore;
use crate::flywheel::ports::NeededActionGate;
use crate::flywheel::{RefreshDispatcher, ScheduleTrigger};
use crate::services::clock::ClockService;
use crate::services::manager::ServiceManager;
use crate::services::signals::handle_shutdown_signals;
use crate::services::web::WebService;
use crate::state::{AppState, ServiceStatus};
use crate::utils::fmt_duration;

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    app_state: AppState,
    service_manager: ServiceManager,
}

impl App {
    /// Create a new App instance with all necessary components initialized
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let slow_threshold = Duration::from_millis(500);
        let connect_options = PgConnectOptions::from_str(&config.database_url)
            .context("Failed to parse database URL")?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        // Sized for the workers, each holding at most one connection.
        let workers = config.dispatch_workers + config.forced_workers + config.pass_workers;
        let max_connections = u32::try_from(workers).unwrap_or(u32::MAX).clamp(2, 32);
        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(max_connections)
            .acquire_slow_threshold(slow_threshold)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect_with(connect_options)
            .await
            .context("Failed to create database pool")?;

        info!(
            min_connections = 0,
            max_connections,
            acquire_timeout = "4s",
            idle_timeout = "2m",
            max_lifetime = "30m",
            acquire_slow_threshold = fmt_duration(slow_threshold),
            "database pool established"
        );

        let settings_source = SettingsSource::new(config.flywheel_settings_path.clone());
        let initial_settings = settings_source
            .load()
            .context("Failed to load flywheel settings")?;
        info!(
            enabled = initial_settings.enabled,
            default_refreshes_per_day = initial_settings.default_refreshes_per_day,
            tenant_overrides = initial_settings.per_tenant_refreshes_per_day.len(),
            blacklisted_providers = initial_settings.blacklisted_providers.len(),
            "flywheel settings loaded"
        );
        let settings = SettingsHandle::new(initial_settings);
        settings.spawn_reload(settings_source, config.settings_reload_interval);

        let http = build_http_client()?;
        let store = Arc::new(PgUserSiteStore::new(db_pool.clone()));
        let dispatcher = RefreshDispatcher::new(
            store.clone(),
            Arc::new(NeededActionGate),
            Arc::new(CredentialClient::new(
                http.clone(),
                config.credentials_url.clone(),
            )),
            Arc::new(SiteManagementClient::new(
                http,
                config.site_management_url.clone(),
            )),
        );
        let trigger = ScheduleTrigger::new(store, dispatcher, settings.clone(), config.pool_sizes());

        let app_state = AppState::new(trigger, settings, db_pool);

        Ok(App {
            config,
            app_state,
            service_manager: ServiceManager::new(),
        })
    }

    /// Register the web service, plus the minute clock when it runs in-process.
    pub fn setup_services(&mut self) {
        let web_service = Box::new(WebService::new(self.config.port, self.app_state.clone()));
        self.app_state
            .service_statuses
            .set("web", ServiceStatus::Starting);
        self.service_manager.register_service("web", web_service);

        if self.config.internal_clock {
            let clock_service = Box::new(ClockService::new(
                self.app_state.trigger.clone(),
                self.app_state.service_statuses.clone(),
            ));
            self.app_state
                .service_statuses
                .set("clock", ServiceStatus::Starting);
            self.service_manager
                .register_service("clock", clock_service);
        } else {
            info!("internal clock disabled, waiting for external minute triggers");
        }
    }

    /// Start all registered services
    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    /// Run until a shutdown signal, then let queued passes and refreshes finish.
    pub async fn run(self) -> ExitCode {
        let trigger = self.app_state.trigger.clone();
        let shutdown_timeout = self.config.shutdown_timeout;
        let mut exit_code = handle_shutdown_signals(self.service_manager, shutdown_timeout).await;

        info!(pools = ?trigger.pool_stats(), "draining worker pools");
        match tokio::time::timeout(shutdown_timeout, trigger.shutdown()).await {
            Ok(()) => info!("worker pools drained"),
            Err(_) => {
                warn!(
                    pools = ?trigger.pool_stats(),
                    "worker pools did not drain before shutdown timeout"
                );
                exit_code = ExitCode::FAILURE;
            }
        }
        exit_code
    }
}
