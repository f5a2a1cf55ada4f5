//! reqwest-backed implementation of [`BackendApi`].

use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{BackendApi, CheckStatus};
use crate::domain::{AgentRecord, AssessmentRequest, CheckReport, NewAgentRequest, RecordId, UserInfo};
use crate::error::{BackendError, BackendResult};

/// Cookie the backend reads the API key from.
pub const API_KEY_COOKIE: &str = "ab_api_key";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated client for the evaluation backend.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    cookie: String,
    client: Client,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    /// Create a client for `base_url`, authenticating every request with
    /// the `ab_api_key` cookie. A trailing slash on the URL is dropped.
    pub fn new(base_url: &str, api_key: &str) -> BackendResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("tau-proxy/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Client(e.to_string()))?;

        Ok(HttpBackend {
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie: format!("{}={}", API_KEY_COOKIE, api_key),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(COOKIE, &self.cookie)
    }

    /// Turn anything but `200 OK` into a `Status` error carrying the body.
    async fn expect_ok(operation: &'static str, resp: Response) -> BackendResult<Response> {
        let status = resp.status();
        if status == StatusCode::OK {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(BackendError::Status {
            operation,
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(operation: &'static str, resp: Response) -> BackendResult<T> {
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode {
            operation,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl BackendApi for HttpBackend {
    #[instrument(skip(self))]
    async fn current_user(&self) -> BackendResult<UserInfo> {
        let resp = self.authed(self.client.get(self.url("/user"))).send().await?;
        let resp = Self::expect_ok("fetch user info", resp).await?;
        Self::decode("fetch user info", resp).await
    }

    #[instrument(skip(self, request), fields(name = %request.name, is_green = request.is_green))]
    async fn create_agent(&self, request: &NewAgentRequest) -> BackendResult<AgentRecord> {
        let resp = self
            .authed(self.client.post(self.url("/agents/")))
            .json(request)
            .send()
            .await?;
        let resp = Self::expect_ok("create agent", resp).await?;
        Self::decode("create agent", resp).await
    }

    #[instrument(skip(self))]
    async fn trigger_check(&self, agent_id: &RecordId) -> BackendResult<()> {
        let path = format!("/agents/{}/check_again", agent_id);
        let resp = self.authed(self.client.get(self.url(&path))).send().await?;
        debug!(status = resp.status().as_u16(), "check triggered");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn most_recent_check(&self, agent_id: &RecordId) -> BackendResult<CheckStatus> {
        let path = format!("/agents/{}/most_recent_check", agent_id);
        let resp = self.authed(self.client.get(self.url(&path))).send().await?;
        match resp.status() {
            StatusCode::OK => {
                let report: CheckReport = Self::decode("fetch most recent check", resp).await?;
                Ok(CheckStatus::Report(report))
            }
            StatusCode::NOT_FOUND => Ok(CheckStatus::NoChecksYet),
            other => Ok(CheckStatus::Unexpected {
                status: other.as_u16(),
            }),
        }
    }

    #[instrument(skip(self, request), fields(repeat_n = request.repeat_n))]
    async fn create_assessment(
        &self,
        request: &AssessmentRequest,
    ) -> BackendResult<Vec<RecordId>> {
        let resp = self
            .authed(self.client.post(self.url("/assessments/")))
            .json(request)
            .send()
            .await?;
        let resp = Self::expect_ok("create assessment", resp).await?;
        Self::decode("create assessment", resp).await
    }

    #[instrument(skip(self))]
    async fn delete_agent(&self, agent_id: &RecordId) -> BackendResult<()> {
        let path = format!("/agents/{}", agent_id);
        let resp = self.authed(self.client.delete(self.url(&path))).send().await?;
        Self::expect_ok("delete agent", resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// Answer exactly one request with `status` and `body`; the handle
    /// yields the raw request as received, lowercased.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        (base_url, handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_lowercase()
    }

    #[tokio::test]
    async fn test_missing_check_is_not_ready_and_sends_cookie() {
        let (base_url, server) = serve_once("404 Not Found", "{\"detail\":\"none\"}").await;
        let backend = HttpBackend::new(&base_url, "sekret").unwrap();

        let status = backend.most_recent_check(&RecordId::Int(7)).await.unwrap();

        assert_eq!(status, CheckStatus::NoChecksYet);
        let request = server.await.unwrap();
        assert!(request.starts_with("get /agents/7/most_recent_check "));
        assert!(request.contains("cookie: ab_api_key=sekret"));
    }

    #[tokio::test]
    async fn test_check_report_is_decoded() {
        let (base_url, server) =
            serve_once("200 OK", "{\"is_ctrl_reachable\":true,\"agent_count\":2}").await;
        let backend = HttpBackend::new(&base_url, "k").unwrap();

        let status = backend.most_recent_check(&RecordId::Int(7)).await.unwrap();

        assert_eq!(
            status,
            CheckStatus::Report(CheckReport {
                is_ctrl_reachable: Some(true),
                agent_count: Some(2),
            })
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_other_check_status_is_unexpected() {
        let (base_url, server) = serve_once("503 Service Unavailable", "").await;
        let backend = HttpBackend::new(&base_url, "k").unwrap();

        let status = backend.most_recent_check(&RecordId::Int(7)).await.unwrap();

        assert_eq!(status, CheckStatus::Unexpected { status: 503 });
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_user_lookup_error_carries_status_and_body() {
        let (base_url, server) = serve_once("500 Internal Server Error", "boom").await;
        let backend = HttpBackend::new(&base_url, "sekret").unwrap();

        let err = backend.current_user().await.unwrap_err();

        assert!(matches!(
            err,
            BackendError::Status { status: 500, ref body, .. } if body == "boom"
        ));
        assert_eq!(err.to_string(), "fetch user info failed: 500 boom");
        let request = server.await.unwrap();
        assert!(request.starts_with("get /user "));
        assert!(request.contains("cookie: ab_api_key=sekret"));
    }

    #[tokio::test]
    async fn test_create_agent_requires_exactly_200() {
        let (base_url, server) = serve_once("201 Created", "{\"id\":1}").await;
        let backend = HttpBackend::new(&base_url, "k").unwrap();
        let request = NewAgentRequest::proxied(
            "tau-green-x",
            crate::domain::AgentRole::Green,
            RecordId::Int(42),
        );

        let err = backend.create_agent(&request).await.unwrap_err();

        assert!(matches!(err, BackendError::Status { status: 201, .. }));
        let raw = server.await.unwrap();
        assert!(raw.starts_with("post /agents/ "));
        assert!(raw.contains("\"deploy_type\":\"proxied\""));
        assert!(raw.contains("\"user_id\":42"));
    }

    #[tokio::test]
    async fn test_assessment_ids_are_decoded() {
        let (base_url, server) = serve_once("200 OK", "[99,100]").await;
        let backend = HttpBackend::new(&base_url, "k").unwrap();
        let request = AssessmentRequest::tau_bench(RecordId::Int(1), RecordId::Int(2), 2);

        let ids = backend.create_assessment(&request).await.unwrap();

        assert_eq!(ids, vec![RecordId::Int(99), RecordId::Int(100)]);
        let raw = server.await.unwrap();
        assert!(raw.starts_with("post /assessments/ "));
        assert!(raw.contains("\"config\":\"tau-bench\""));
    }

    #[tokio::test]
    async fn test_delete_failure_is_a_status_error() {
        let (base_url, server) = serve_once("403 Forbidden", "not yours").await;
        let backend = HttpBackend::new(&base_url, "k").unwrap();

        let err = backend.delete_agent(&RecordId::Int(3)).await.unwrap_err();

        assert!(matches!(err, BackendError::Status { status: 403, .. }));
        assert!(server.await.unwrap().starts_with("delete /agents/3 "));
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let backend = HttpBackend::new("https://backend.example.org/", "k").unwrap();
        assert_eq!(backend.base_url(), "https://backend.example.org");
        assert_eq!(
            backend.url("/agents/7/most_recent_check"),
            "https://backend.example.org/agents/7/most_recent_check"
        );
    }

    #[test]
    fn test_cookie_uses_api_key_name() {
        let backend = HttpBackend::new("http://localhost:9000", "secret-key").unwrap();
        assert_eq!(backend.cookie, "ab_api_key=secret-key");
    }

    #[test]
    fn test_debug_does_not_leak_api_key() {
        let backend = HttpBackend::new("http://localhost:9000", "secret-key").unwrap();
        let rendered = format!("{:?}", backend);
        assert!(!rendered.contains("secret-key"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let backend = HttpBackend::new("http://127.0.0.1:9", "k").unwrap();
        let err = backend
            .most_recent_check(&RecordId::Int(1))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
