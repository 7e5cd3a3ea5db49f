use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::future::select_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::services::{Service, ServiceResult, run_service};
use crate::utils::fmt_duration;

/// Manages multiple services and their lifecycle
pub struct ServiceManager {
    registered_services: HashMap<String, Box<dyn Service>>,
    running_services: HashMap<String, JoinHandle<ServiceResult>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registered_services: HashMap::new(),
            running_services: HashMap::new(),
            shutdown_tx,
        }
    }

    /// Register a service to be managed (not yet spawned)
    pub fn register_service(&mut self, name: &str, service: Box<dyn Service>) {
        self.registered_services.insert(name.to_string(), service);
    }

    /// Spawn all registered services
    pub fn spawn_all(&mut self) {
        let service_count = self.registered_services.len();
        let service_names: Vec<_> = self.registered_services.keys().cloned().collect();

        for (name, service) in self.registered_services.drain() {
            let shutdown_rx = self.shutdown_tx.subscribe();
            let handle = tokio::spawn(run_service(service, shutdown_rx));
            trace!(service = name, id = ?handle.id(), "service spawned");
            self.running_services.insert(name, handle);
        }

        info!(
            service_count,
            services = ?service_names,
            "spawned {} services",
            service_count
        );
    }

    /// Run all services until one completes or fails.
    /// Returns the first service that completes and its result.
    pub async fn run(&mut self) -> (String, ServiceResult) {
        if self.running_services.is_empty() {
            return (
                "none".to_string(),
                ServiceResult::Error(anyhow::anyhow!("No services to run")),
            );
        }

        info!(
            "servicemanager running {} services",
            self.running_services.len()
        );

        // Poll by reference so a cancelled `run` leaves every handle in place
        // for `shutdown`.
        let (result, completed) = {
            let (names, handles): (Vec<_>, Vec<_>) = self
                .running_services
                .iter_mut()
                .map(|(name, handle)| (name.clone(), handle))
                .unzip();
            let (result, index, _) = select_all(handles).await;
            (result, names[index].clone())
        };
        self.running_services.remove(&completed);

        match result {
            Ok(result) => (completed, result),
            Err(e) => {
                warn!(service = completed, error = ?e, "service task panicked");
                (
                    completed,
                    ServiceResult::Error(anyhow::anyhow!("Task panic: {e}")),
                )
            }
        }
    }

    /// Shutdown all services gracefully with a timeout.
    ///
    /// Returns the elapsed time on success, or the names of the services that
    /// did not finish in time.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<Duration, Vec<String>> {
        let service_count = self.running_services.len();
        info!(
            service_count,
            timeout = fmt_duration(timeout),
            "shutting down {} services",
            service_count
        );

        // A send error only means every receiver is already gone.
        let _ = self.shutdown_tx.send(());

        let start = Instant::now();
        let mut pending = Vec::new();
        for (name, handle) in self.running_services.drain() {
            let remaining = timeout.saturating_sub(start.elapsed());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(_)) => debug!(service = name, "service finished"),
                Ok(Err(e)) => warn!(service = name, error = ?e, "service task panicked during shutdown"),
                Err(_) => {
                    warn!(service = name, "service did not finish before shutdown timeout");
                    pending.push(name);
                }
            }
        }

        if pending.is_empty() {
            Ok(start.elapsed())
        } else {
            Err(pending)
        }
    }
}
