//! Shared HTTP plumbing for the automation adapters.

use super::AutomationError;
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use url::Url;

/// Connection timeout for all automation requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

pub(crate) fn parse_base_url(raw: &str) -> Result<Url, AutomationError> {
    let url = Url::parse(raw)?;
    if url.cannot_be_a_base() {
        return Err(AutomationError::NotABase(raw.to_string()));
    }
    Ok(url)
}

/// Append path segments to `base`, escaping each one.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, AutomationError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| AutomationError::NotABase(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// POST a JSON body and decode a JSON reply, failing on non-2xx statuses.
pub(crate) async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
    client: &reqwest::Client,
    url: Url,
    body: &T,
) -> Result<R, AutomationError> {
    let response = client.post(url).json(body).send().await?;

    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(AutomationError::Status {
            status: status.as_u16(),
            body: text,
        });
    }

    serde_json::from_str(&text)
        .map_err(|e| AutomationError::InvalidResponse(format!("{e}; body: {text}")))
}
