use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};

use crate::clients::join_url;
use crate::flywheel::ports::{Credential, CredentialIssuer, TenantId, UserId};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceTokenRequest {
    tenant_id: TenantId,
    user_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceTokenResponse {
    access_token: String,
}

/// Issues short-lived per-user service tokens.
#[derive(Clone)]
pub struct CredentialClient {
    http: ClientWithMiddleware,
    base_url: String,
}

impl CredentialClient {
    pub fn new(http: ClientWithMiddleware, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CredentialIssuer for CredentialClient {
    async fn issue(&self, tenant_id: TenantId, user_id: UserId) -> Result<Credential> {
        let url = join_url(&self.base_url, "internal/service-tokens");
        let response = self
            .http
            .post(&url)
            .json(&ServiceTokenRequest { tenant_id, user_id })
            .send()
            .await
            .context("service token request failed")?
            .error_for_status()
            .context("service token request rejected")?;

        let body: ServiceTokenResponse = response
            .json()
            .await
            .context("failed to parse service token response")?;
        Ok(Credential {
            access_token: body.access_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::build_http_client;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn issues_token_for_user() {
        let server = MockServer::start().await;
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path("/internal/service-tokens"))
            .and(body_json(json!({ "tenantId": tenant_id, "userId": user_id })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "secret-token" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = CredentialClient::new(build_http_client().unwrap(), server.uri());
        let credential = client.issue(tenant_id, user_id).await.unwrap();
        assert_eq!(credential.access_token, "secret-token");
        assert!(!format!("{credential:?}").contains("secret-token"));
    }

    #[tokio::test]
    async fn rejected_request_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = CredentialClient::new(build_http_client().unwrap(), server.uri());
        assert!(client.issue(Uuid::new_v4(), Uuid::new_v4()).await.is_err());
    }
}
