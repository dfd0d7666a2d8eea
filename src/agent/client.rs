//! Asynchronous coordinator client.
//!
//! Thin typed wrapper over the dispatcher API. Credential state lives
//! here: the access token is replaced in place after a renewal, and a 401
//! from any call surfaces as `AgentClientError::Unauthorized` so the poll
//! loop can decide to renew.

use crate::proto::{
    BatchReceipt, CheckInRequest, CheckInResponse, DiscoveryItem, ErrorBody, RegisterRequest,
    RegisterResponse, RenewRequest, RenewResponse, ReportDependenciesRequest, ReportLogRequest,
    ReportUpdatesRequest, SystemInfoRequest,
};
use anyhow::{Context, Result};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

#[cfg(test)]
mod mock_tests;

/// Default timeout for HTTP request completion.
const DEFAULT_HTTP_COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

/// API path prefix (v1).
static API_PREFIX: &str = "api/v1/";

/// Error related to the coordinator service.
#[derive(Debug, Error)]
pub(crate) enum AgentClientError {
    /// Credential rejected; renewal may recover.
    #[error("unauthorized")]
    Unauthorized,
    /// Remote endpoint error with decoded detail.
    #[error("server-side error, code {0}: {}", .1.message)]
    Remote(StatusCode, ErrorBody),
    /// Generic HTTP error.
    #[error("server-side error, code {0}")]
    Http(StatusCode),
    /// Client failed to send or decode.
    #[error("client-side error: {0}")]
    FailedRequest(String),
}

impl AgentClientError {
    /// Machine-friendly brief error kind.
    pub(crate) fn error_kind(&self) -> &'static str {
        match self {
            AgentClientError::Unauthorized => "unauthorized",
            AgentClientError::Remote(..) => "remote",
            AgentClientError::Http(_) => "generic_http",
            AgentClientError::FailedRequest(_) => "client_failed_request",
        }
    }

    /// Whether the normal poll cadence should retry this.
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            AgentClientError::Unauthorized => false,
            AgentClientError::Remote(status, _) | AgentClientError::Http(status) => {
                status.is_server_error()
            }
            AgentClientError::FailedRequest(_) => true,
        }
    }
}

/// Client to make outgoing API requests.
#[derive(Debug)]
pub(crate) struct Client {
    /// Base URL for API endpoints.
    api_base: Url,
    /// Asynchronous reqwest client.
    hclient: reqwest::Client,
    /// This host's identifier.
    host_id: Uuid,
    /// Current access credential; replaced on renewal.
    access_token: RwLock<String>,
}

impl Client {
    /// Check in: report light metrics, receive pending commands.
    pub(crate) async fn check_in(
        &self,
        metrics: &CheckInRequest,
    ) -> Result<CheckInResponse, AgentClientError> {
        let path = format!("agents/{}/commands", self.host_id);
        self.call(Method::POST, &path, Some(metrics)).await
    }

    /// Exchange the refresh secret for a fresh access credential.
    pub(crate) async fn renew(&self, refresh_token: &str) -> Result<(), AgentClientError> {
        let path = format!("agents/{}/renew", self.host_id);
        let body = RenewRequest {
            refresh_token: refresh_token.to_string(),
        };
        let resp: RenewResponse = self.call_unauthenticated(Method::POST, &path, &body).await?;
        *self.access_token.write().expect("token lock poisoned") = resp.access_token;
        Ok(())
    }

    /// Report a discovery batch.
    pub(crate) async fn report_updates(
        &self,
        command_id: Option<Uuid>,
        updates: Vec<DiscoveryItem>,
    ) -> Result<BatchReceipt, AgentClientError> {
        let path = format!("agents/{}/updates", self.host_id);
        let body = ReportUpdatesRequest {
            command_id,
            updates,
        };
        self.call(Method::POST, &path, Some(&body)).await
    }

    /// Report a command execution outcome.
    pub(crate) async fn report_log(
        &self,
        report: &ReportLogRequest,
    ) -> Result<serde_json::Value, AgentClientError> {
        let path = format!("agents/{}/logs", self.host_id);
        self.call(Method::POST, &path, Some(report)).await
    }

    /// Report dry-run dependencies.
    pub(crate) async fn report_dependencies(
        &self,
        report: &ReportDependenciesRequest,
    ) -> Result<serde_json::Value, AgentClientError> {
        let path = format!("agents/{}/dependencies", self.host_id);
        self.call(Method::POST, &path, Some(report)).await
    }

    /// Push the full system inventory.
    pub(crate) async fn report_system_info(
        &self,
        info: &SystemInfoRequest,
    ) -> Result<serde_json::Value, AgentClientError> {
        let path = format!("agents/{}/system-info", self.host_id);
        self.call(Method::POST, &path, Some(info)).await
    }

    /// Acknowledge execution start for a command.
    pub(crate) async fn command_running(
        &self,
        command_id: Uuid,
    ) -> Result<serde_json::Value, AgentClientError> {
        let path = format!("agents/{}/commands/{}/running", self.host_id, command_id);
        self.call::<(), _>(Method::POST, &path, None).await
    }

    /// Authenticated call with JSON body and response.
    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, AgentClientError> {
        let url = self
            .endpoint(path)
            .map_err(|e| AgentClientError::FailedRequest(e.to_string()))?;
        let token = self
            .access_token
            .read()
            .expect("token lock poisoned")
            .clone();

        let mut req = self.hclient.request(method, url).bearer_auth(token);
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| AgentClientError::FailedRequest(e.to_string()))?;
        Self::map_response(resp).await
    }

    /// Unauthenticated call (registration, renewal).
    async fn call_unauthenticated<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, AgentClientError> {
        let url = self
            .endpoint(path)
            .map_err(|e| AgentClientError::FailedRequest(e.to_string()))?;
        let resp = self
            .hclient
            .request(method, url)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentClientError::FailedRequest(e.to_string()))?;
        Self::map_response(resp).await
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let url = self
            .api_base
            .join(API_PREFIX)?
            .join(path)
            .context("invalid endpoint path")?;
        Ok(url)
    }

    /// Map an HTTP response to a typed service result.
    async fn map_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AgentClientError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AgentClientError::Unauthorized);
        }
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| AgentClientError::FailedRequest(e.to_string()));
        }
        match response.json::<ErrorBody>().await {
            Ok(body) => Err(AgentClientError::Remote(status, body)),
            _ => Err(AgentClientError::Http(status)),
        }
    }
}

/// One-shot enrollment call, before any client exists.
pub(crate) async fn register(
    server_url: &Url,
    req: &RegisterRequest,
) -> Result<RegisterResponse, AgentClientError> {
    let url = server_url
        .join(API_PREFIX)
        .and_then(|u| u.join("agents/register"))
        .map_err(|e| AgentClientError::FailedRequest(e.to_string()))?;
    let hclient = reqwest::ClientBuilder::new()
        .timeout(DEFAULT_HTTP_COMPLETION_TIMEOUT)
        .build()
        .map_err(|e| AgentClientError::FailedRequest(e.to_string()))?;

    let resp = hclient
        .post(url)
        .json(req)
        .send()
        .await
        .map_err(|e| AgentClientError::FailedRequest(e.to_string()))?;
    Client::map_response(resp).await
}

/// Client builder.
#[derive(Clone, Debug)]
pub(crate) struct ClientBuilder {
    /// Base URL for API endpoint (mandatory).
    api_base: Url,
    /// This host's identifier.
    host_id: Uuid,
    /// Initial access credential.
    access_token: String,
    /// Asynchronous reqwest client (custom).
    hclient: Option<reqwest::Client>,
}

impl ClientBuilder {
    /// Return a new builder for the given coordinator base URL.
    pub(crate) fn new(api_base: Url, host_id: Uuid, access_token: String) -> Self {
        Self {
            api_base,
            host_id,
            access_token,
            hclient: None,
        }
    }

    /// Set (or reset) the HTTP client to use.
    #[allow(dead_code)]
    pub(crate) fn http_client(mut self, hclient: Option<reqwest::Client>) -> Self {
        self.hclient = hclient;
        self
    }

    /// Build a client with specified parameters.
    pub(crate) fn build(self) -> Result<Client> {
        let hclient = match self.hclient {
            Some(client) => client,
            None => reqwest::ClientBuilder::new()
                .timeout(DEFAULT_HTTP_COMPLETION_TIMEOUT)
                .build()?,
        };
        Ok(Client {
            api_base: self.api_base,
            hclient,
            host_id: self.host_id,
            access_token: RwLock::new(self.access_token),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::response::Response;

    #[test]
    fn test_map_response_unauthorized() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let response = Response::builder().status(401).body("").unwrap();
        let rejection = runtime
            .block_on(Client::map_response::<serde_json::Value>(response.into()))
            .unwrap_err();
        assert!(matches!(rejection, AgentClientError::Unauthorized));
        assert_eq!(rejection.error_kind(), "unauthorized");
    }

    #[test]
    fn test_map_response_remote_error() {
        let err_body = r#"
{
  "code": "conflict",
  "message": "command is 'completed'"
}
"#;
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let response = Response::builder().status(409).body(err_body).unwrap();
        let rejection = runtime
            .block_on(Client::map_response::<serde_json::Value>(response.into()))
            .unwrap_err();

        let msg = rejection.to_string();
        assert_eq!(
            msg,
            "server-side error, code 409 Conflict: command is 'completed'"
        );
    }

    #[test]
    fn test_map_response_opaque_error() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let response = Response::builder().status(503).body("").unwrap();
        let rejection = runtime
            .block_on(Client::map_response::<serde_json::Value>(response.into()))
            .unwrap_err();
        assert!(matches!(rejection, AgentClientError::Http(_)));
        assert!(rejection.is_transient());
    }
}
