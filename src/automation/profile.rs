//! HTTP client for the profile lease service.

use super::http::{build_client, endpoint, parse_base_url, post_json};
use super::{AutomationError, ProfileService, SessionInfo};
use crate::task::ProxyConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Serialize)]
struct StartRequest<'a> {
    proxy: Option<&'a ProxyConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    profile_id: Option<String>,
    #[serde(default)]
    ws_endpoint: Option<String>,
}

/// Profile service reached over its local HTTP API.
#[derive(Debug, Clone)]
pub struct HttpProfileService {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpProfileService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AutomationError> {
        Ok(Self {
            client: build_client(timeout),
            base_url: parse_base_url(base_url)?,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl ProfileService for HttpProfileService {
    async fn is_running(&self) -> bool {
        let Ok(url) = endpoint(&self.base_url, &["status"]) else {
            return false;
        };

        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Profile service status check failed: {e}");
                false
            }
        }
    }

    async fn start_session(
        &self,
        proxy: Option<&ProxyConfig>,
    ) -> Result<SessionInfo, AutomationError> {
        let url = endpoint(&self.base_url, &["profiles", "start"])?;
        let response: StartResponse = post_json(&self.client, url, &StartRequest { proxy }).await?;

        Ok(SessionInfo {
            ok: response.success,
            session_id: response.profile_id.unwrap_or_default(),
            endpoint: response.ws_endpoint.unwrap_or_default(),
        })
    }

    async fn stop_session(&self, session_id: Option<&str>) -> Result<(), AutomationError> {
        let Some(id) = session_id.filter(|id| !id.is_empty()) else {
            return Ok(());
        };

        let url = endpoint(&self.base_url, &["profiles", id, "stop"])?;
        let response = self.client.post(url).send().await?;
        let status = response.status();

        // Already stopped or never existed.
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }

        Err(AutomationError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ProxyProtocol;
    use crate::testing::MockServer;

    fn service(server: &MockServer) -> HttpProfileService {
        HttpProfileService::new(&server.url(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_is_running_reflects_status_endpoint() {
        let up = MockServer::start(|_| (200, r#"{"status":"ok"}"#.into()));
        assert!(service(&up).is_running().await);

        let broken = MockServer::start(|_| (503, String::new()));
        assert!(!service(&broken).is_running().await);
    }

    #[tokio::test]
    async fn test_is_running_false_when_unreachable() {
        // Nothing listens on port 9 locally.
        let svc = HttpProfileService::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        assert!(!svc.is_running().await);
    }

    #[tokio::test]
    async fn test_start_session_sends_proxy_and_parses_reply() {
        let server = MockServer::start(|_| {
            (
                200,
                r#"{"success":true,"profileId":"p-42","wsEndpoint":"ws://127.0.0.1:9222/x"}"#.into(),
            )
        });
        let proxy = ProxyConfig {
            host: "10.0.0.1".into(),
            port: 1080,
            username: None,
            password: None,
            protocol: ProxyProtocol::Socks5,
        };

        let info = service(&server).start_session(Some(&proxy)).await.unwrap();
        assert!(info.is_usable());
        assert_eq!(info.session_id, "p-42");
        assert_eq!(info.endpoint, "ws://127.0.0.1:9222/x");

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].path, "/profiles/start");
        let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(body["proxy"]["host"], "10.0.0.1");
        assert_eq!(body["proxy"]["protocol"], "socks5");
    }

    #[tokio::test]
    async fn test_start_session_unsuccessful_reply_is_not_usable() {
        let server = MockServer::start(|_| (200, r#"{"success":false}"#.into()));
        let info = service(&server).start_session(None).await.unwrap();
        assert!(!info.is_usable());

        let body: serde_json::Value =
            serde_json::from_str(&server.requests()[0].body).unwrap();
        assert!(body["proxy"].is_null());
    }

    #[tokio::test]
    async fn test_stop_session_tolerates_unknown_and_absent_ids() {
        let server = MockServer::start(|_| (404, r#"{"error":"no such profile"}"#.into()));
        let svc = service(&server);

        svc.stop_session(Some("gone")).await.unwrap();
        svc.stop_session(None).await.unwrap();
        svc.stop_session(Some("")).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/profiles/gone/stop");
    }

    #[tokio::test]
    async fn test_stop_session_reports_server_errors() {
        let server = MockServer::start(|_| (500, "boom".into()));
        let err = service(&server).stop_session(Some("p-1")).await.unwrap_err();
        assert!(matches!(err, AutomationError::Status { status: 500, .. }));
    }
}
