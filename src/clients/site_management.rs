use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use uuid::Uuid;

use crate::clients::join_url;
use crate::flywheel::ports::{Credential, RefreshExecutor, RefreshOrigin, UserId, UserSite};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkRefreshRequest {
    user_site_ids: Vec<Uuid>,
    one_off: bool,
    origin: RefreshOrigin,
}

/// Runs bulk user-site refreshes through the site-management service. The call
/// returns once the refresh has finished downstream.
#[derive(Clone)]
pub struct SiteManagementClient {
    http: ClientWithMiddleware,
    base_url: String,
}

impl SiteManagementClient {
    pub fn new(http: ClientWithMiddleware, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl RefreshExecutor for SiteManagementClient {
    async fn refresh_user_sites(
        &self,
        user_id: UserId,
        user_sites: &[UserSite],
        one_off: bool,
        credential: &Credential,
        origin: RefreshOrigin,
    ) -> Result<()> {
        let url = join_url(
            &self.base_url,
            &format!("internal/users/{user_id}/user-sites/refresh"),
        );
        let request = BulkRefreshRequest {
            user_site_ids: user_sites.iter().map(|site| site.id).collect(),
            one_off,
            origin,
        };

        self.http
            .post(&url)
            .bearer_auth(&credential.access_token)
            .json(&request)
            .send()
            .await
            .context("bulk refresh request failed")?
            .error_for_status()
            .context("bulk refresh rejected")?;
        Ok(())
    }
}
