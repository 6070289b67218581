//! Ops Manager REST API client.
//!
//! The transport is a trait seam: [`DigestTransport`] is the production
//! implementation (reqwest with HTTP digest authentication and a
//! caller-supplied trusted CA), and tests script their own. The client layers
//! the contention-retry protocol on top: `GET` never retries, `PUT`/`POST`
//! retry a conflict status with jittered backoff up to the policy bound.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use diqwest::WithDigestAuth;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{OmError, OmResult};
use crate::retry::RetryPolicy;

/// Path prefix of the public API below the Ops Manager base address.
pub const API_BASE_PATH: &str = "/api/public/v1.0";

/// Per-request timeout matching the reference behavior.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Endpoint paths consumed by this tool, relative to [`API_BASE_PATH`].
pub mod endpoints {
    /// The shared automation-config document.
    pub fn automation_config(group_id: &str) -> String {
        format!("/groups/{group_id}/automationConfig")
    }

    /// Plan/goal-version rollout status.
    pub fn automation_status(group_id: &str) -> String {
        format!("/groups/{group_id}/automationStatus")
    }

    /// Alert configuration collection.
    pub fn alert_configs(group_id: &str) -> String {
        format!("/groups/{group_id}/alertConfigs")
    }

    /// A single alert configuration.
    pub fn alert_config(group_id: &str, alert_id: &str) -> String {
        format!("/groups/{group_id}/alertConfigs/{alert_id}")
    }
}

/// HTTP methods used against the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
        }
    }
}

/// Status and body of an API response, before interpretation.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    /// The API answers 200 for reads/replacements and 201 for creations.
    pub fn is_success(&self) -> bool {
        matches!(self.status, 200 | 201)
    }

    /// 409 signals optimistic-concurrency contention: another writer updated
    /// the document between our read and write.
    pub fn is_contention(&self) -> bool {
        self.status == 409
    }
}

/// Raw request execution, separated from retry and interpretation.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Sends one request and returns the raw status and body. Connection
    /// failures surface as [`OmError::Transport`].
    async fn send(&self, method: Method, url: &str, body: Option<&Value>)
        -> OmResult<ApiResponse>;
}

/// Production transport: TLS with a trusted-CA file, optional client
/// identity for mutual TLS, and HTTP digest authentication with the
/// public/private API key pair.
pub struct DigestTransport {
    client: reqwest::Client,
    public_key: String,
    private_key: String,
}

impl DigestTransport {
    /// Builds the transport. `ca_cert_path` is required; `client_identity`
    /// is an optional combined key + certificate PEM.
    pub fn new(
        public_key: impl Into<String>,
        private_key: impl Into<String>,
        ca_cert_path: &Path,
        client_identity: Option<&Path>,
    ) -> OmResult<Self> {
        let ca = std::fs::read(ca_cert_path)
            .map_err(|e| OmError::io(ca_cert_path.display().to_string(), e))?;
        let ca = reqwest::Certificate::from_pem(&ca)
            .map_err(|e| OmError::configuration("ca_cert_path", e.to_string()))?;

        let mut builder = reqwest::Client::builder()
            .add_root_certificate(ca)
            .timeout(REQUEST_TIMEOUT);

        if let Some(identity_path) = client_identity {
            let pem = std::fs::read(identity_path)
                .map_err(|e| OmError::io(identity_path.display().to_string(), e))?;
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| OmError::configuration("client_identity", e.to_string()))?;
            builder = builder.identity(identity);
        }

        Ok(Self {
            client: builder
                .build()
                .map_err(|e| OmError::configuration("http_client", e.to_string()))?,
            public_key: public_key.into(),
            private_key: private_key.into(),
        })
    }
}

#[async_trait]
impl ApiTransport for DigestTransport {
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> OmResult<ApiResponse> {
        let mut request = match method {
            Method::Get => self.client.get(url),
            Method::Put => self.client.put(url),
            Method::Post => self.client.post(url),
        };
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send_with_digest_auth(&self.public_key, &self.private_key)
            .await
            .map_err(|e| OmError::transport(url, e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| OmError::transport(url, e.to_string()))?;

        Ok(ApiResponse { status, body })
    }
}

/// API client for one Ops Manager project.
pub struct OpsManagerClient<T> {
    /// The underlying transport. Public so scripted transports stay
    /// inspectable after the client takes ownership.
    pub transport: T,
    base_url: String,
    retry: RetryPolicy,
}

impl<T: ApiTransport> OpsManagerClient<T> {
    /// Creates a client for `base_url` (scheme, host, and port — without the
    /// API path) with the default contention policy.
    pub fn new(transport: T, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            retry: RetryPolicy::contention(),
        }
    }

    /// Replaces the contention-retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}{}{}",
            self.base_url.trim_end_matches('/'),
            API_BASE_PATH,
            endpoint
        )
    }

    /// Fetches and deserializes a document. Any non-success status is fatal;
    /// reads are never retried.
    pub async fn get<D: DeserializeOwned>(&self, endpoint: &str) -> OmResult<D> {
        let response = self
            .transport
            .send(Method::Get, &self.url(endpoint), None)
            .await?;
        if response.status != 200 {
            return Err(OmError::remote(
                "GET",
                endpoint,
                response.status,
                response.body,
            ));
        }
        Ok(serde_json::from_str(&response.body)?)
    }

    /// Replaces a document, retrying through contention.
    pub async fn put<B: Serialize>(&self, endpoint: &str, body: &B) -> OmResult<ApiResponse> {
        self.write(Method::Put, endpoint, body).await
    }

    /// Creates a document, retrying through contention.
    pub async fn post<B: Serialize>(&self, endpoint: &str, body: &B) -> OmResult<ApiResponse> {
        self.write(Method::Post, endpoint, body).await
    }

    async fn write<B: Serialize>(
        &self,
        method: Method,
        endpoint: &str,
        body: &B,
    ) -> OmResult<ApiResponse> {
        let body = serde_json::to_value(body)?;
        let url = self.url(endpoint);

        let mut attempts_made = 0;
        loop {
            let response = self.transport.send(method, &url, Some(&body)).await?;
            attempts_made += 1;

            if response.is_success() {
                debug!(%endpoint, status = response.status, "write accepted");
                return Ok(response);
            }

            if response.is_contention() {
                let error = OmError::contention(endpoint, response.body.clone());
                if !self.retry.should_retry(&error, attempts_made) {
                    return Err(OmError::remote(
                        method.as_str(),
                        endpoint,
                        response.status,
                        response.body,
                    ));
                }
                warn!(
                    %endpoint,
                    attempt = attempts_made,
                    "configuration write contention, retrying"
                );
                tokio::time::sleep(self.retry.delay()).await;
                continue;
            }

            return Err(OmError::remote(
                method.as_str(),
                endpoint,
                response.status,
                response.body,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Transport returning a scripted sequence of responses.
    struct ScriptedTransport {
        responses: Mutex<Vec<ApiResponse>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(statuses: &[u16]) -> Self {
            Self {
                responses: Mutex::new(
                    statuses
                        .iter()
                        .rev()
                        .map(|&status| ApiResponse {
                            status,
                            body: format!("status {status}"),
                        })
                        .collect(),
                ),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ApiTransport for ScriptedTransport {
        async fn send(
            &self,
            _method: Method,
            _url: &str,
            _body: Option<&Value>,
        ) -> OmResult<ApiResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop()
                .expect("transport called more times than scripted"))
        }
    }

    fn client(statuses: &[u16]) -> OpsManagerClient<ScriptedTransport> {
        OpsManagerClient::new(
            ScriptedTransport::new(statuses),
            "https://ops-manager.example.com:8443",
        )
        .with_retry_policy(RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn test_put_succeeds_after_two_conflicts() {
        let client = client(&[409, 409, 200]);

        let response = client
            .put("/groups/g/automationConfig", &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(client.transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_put_gives_up_after_bounded_conflicts() {
        let client = client(&[409, 409, 409, 409, 409]);

        let err = client
            .put("/groups/g/automationConfig", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, OmError::Remote { status: 409, .. }));
        assert_eq!(client.transport.calls(), 3, "must not exceed the bound");
    }

    #[tokio::test]
    async fn test_put_other_failure_is_immediately_fatal() {
        let client = client(&[500]);

        let err = client
            .put("/groups/g/automationConfig", &serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, OmError::Remote { status: 500, .. }));
        assert_eq!(client.transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_post_accepts_created() {
        let client = client(&[201]);

        let response = client
            .post("/groups/g/alertConfigs", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn test_get_never_retries() {
        let client = client(&[409]);

        let err = client
            .get::<Value>("/groups/g/automationConfig")
            .await
            .unwrap_err();

        assert!(matches!(err, OmError::Remote { status: 409, .. }));
        assert_eq!(client.transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_get_parses_body() {
        let transport = ScriptedTransport {
            responses: Mutex::new(vec![ApiResponse {
                status: 200,
                body: r#"{"goalVersion": 4, "processes": []}"#.to_string(),
            }]),
            calls: AtomicU32::new(0),
        };
        let client = OpsManagerClient::new(transport, "https://om.example.com");

        let value: Value = client.get("/groups/g/automationStatus").await.unwrap();
        assert_eq!(value["goalVersion"], 4);
    }

    #[test]
    fn test_url_joins_base_path() {
        let client = client(&[]);
        assert_eq!(
            client.url("/groups/g/automationConfig"),
            "https://ops-manager.example.com:8443/api/public/v1.0/groups/g/automationConfig"
        );
    }
}
