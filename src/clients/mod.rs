//! HTTP adapters for the credential and site-management collaborators.

use std::time::Duration;

use anyhow::Context;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};

pub mod credentials;
pub mod middleware;
pub mod site_management;

pub use credentials::CredentialClient;
pub use site_management::SiteManagementClient;

use middleware::TracingMiddleware;

/// Shared client for collaborator calls. No overall request timeout is set:
/// a bulk refresh returns only once the provider calls have finished.
pub fn build_http_client() -> anyhow::Result<ClientWithMiddleware> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(concat!("flywheel/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to create HTTP client")?;

    Ok(ClientBuilder::new(client).with(TracingMiddleware).build())
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
