//! HTTP client for the remote automation driver.

use super::http::{build_client, endpoint, parse_base_url, post_json};
use super::{AutomationConnection, AutomationDriver, AutomationError, StepOutcome};
use crate::task::{AccountCredentials, LoginHints};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Serialize)]
struct ConnectRequest<'a> {
    endpoint: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectResponse {
    #[serde(default)]
    session_id: String,
}

#[derive(Deserialize)]
struct StepResponse {
    #[serde(default)]
    result: Option<bool>,
}

/// Driver service that owns the browser connections.
#[derive(Debug, Clone)]
pub struct HttpAutomationDriver {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAutomationDriver {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AutomationError> {
        Ok(Self {
            client: build_client(timeout),
            base_url: parse_base_url(base_url)?,
        })
    }
}

#[async_trait]
impl AutomationDriver for HttpAutomationDriver {
    async fn connect(
        &self,
        endpoint_url: &str,
        account: &AccountCredentials,
    ) -> Result<Box<dyn AutomationConnection>, AutomationError> {
        let url = endpoint(&self.base_url, &["sessions"])?;
        let request = ConnectRequest {
            endpoint: endpoint_url,
            email: &account.email,
            password: &account.password,
        };
        let response: ConnectResponse = post_json(&self.client, url, &request).await?;

        if response.session_id.is_empty() {
            return Err(AutomationError::InvalidResponse(
                "driver returned no session id".to_string(),
            ));
        }

        Ok(Box::new(HttpConnection {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            session_id: response.session_id,
        }))
    }
}

struct HttpConnection {
    client: reqwest::Client,
    base_url: Url,
    session_id: String,
}

impl HttpConnection {
    async fn step<T: Serialize + Sync>(
        &self,
        name: &str,
        body: &T,
    ) -> Result<StepOutcome, AutomationError> {
        let url = endpoint(&self.base_url, &["sessions", &self.session_id, name])?;
        let response: StepResponse = post_json(&self.client, url, body).await?;
        Ok(StepOutcome::from(response.result))
    }
}

#[async_trait]
impl AutomationConnection for HttpConnection {
    async fn login(&self, hints: &LoginHints) -> Result<StepOutcome, AutomationError> {
        self.step("login", hints).await
    }

    async fn consent(&self) -> Result<StepOutcome, AutomationError> {
        self.step("consent", &serde_json::json!({})).await
    }

    async fn close(&self) -> Result<(), AutomationError> {
        let url = endpoint(&self.base_url, &["sessions", &self.session_id])?;
        let response = self.client.delete(url).send().await?;
        let status = response.status();

        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }

        Err(AutomationError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        })
    }
}
