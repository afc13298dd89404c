//! Best-effort completion callbacks.

use crate::task::Task;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Header carrying a unique id per delivery attempt.
pub const DELIVERY_HEADER: &str = "x-authflow-delivery";

/// Which terminal states trigger the callback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackPolicy {
    /// Only successful tasks are reported.
    #[default]
    SuccessOnly,
    /// Every terminal task is reported.
    Always,
}

impl CallbackPolicy {
    #[must_use]
    pub fn should_notify(self, task: &Task) -> bool {
        task.is_completed() && (self == Self::Always || task.is_success())
    }
}

/// Delivers a terminal task to a caller-supplied URL.
///
/// Implementations must not fail: delivery problems are logged and dropped.
///
/// `task` is the snapshot taken before delivery, so its `callbackUrlCalled`
/// is always `false` in the delivered body. Pollers see the flag flip once
/// `notify` returns.
#[async_trait]
pub trait CallbackNotifier: Send + Sync {
    async fn notify(&self, url: &str, task: &Task);
}

/// POSTs the task as JSON.
#[derive(Debug, Clone)]
pub struct HttpCallbackNotifier {
    client: reqwest::Client,
}

impl HttpCallbackNotifier {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

#[async_trait]
impl CallbackNotifier for HttpCallbackNotifier {
    async fn notify(&self, url: &str, task: &Task) {
        let url = url.trim();
        if url.is_empty() {
            return;
        }

        let delivery_id = uuid::Uuid::new_v4().to_string();
        let result = self
            .client
            .post(url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(DELIVERY_HEADER, &delivery_id)
            .json(task)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(task_id = task.id(), %delivery_id, "Callback delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    task_id = task.id(),
                    %delivery_id,
                    status = %response.status(),
                    "Callback rejected by receiver"
                );
            }
            Err(e) => {
                tracing::warn!(task_id = task.id(), %delivery_id, "Callback delivery failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskRegistry;
    use crate::testing::MockServer;

    fn completed_task(success: bool) -> Task {
        let registry = TaskRegistry::new(1000);
        let id = registry.insert_new("queued");
        registry
            .complete(id, success, if success { "authorization successful" } else { "authorization step failed" })
            .unwrap()
    }

    #[test]
    fn test_policy() {
        let ok = completed_task(true);
        let failed = completed_task(false);
        assert!(CallbackPolicy::SuccessOnly.should_notify(&ok));
        assert!(!CallbackPolicy::SuccessOnly.should_notify(&failed));
        assert!(CallbackPolicy::Always.should_notify(&failed));

        let registry = TaskRegistry::new(1000);
        let id = registry.insert_new("queued");
        let pending = registry.get(id).unwrap();
        assert!(!CallbackPolicy::Always.should_notify(&pending));
    }

    #[test]
    fn test_policy_deserializes_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: CallbackPolicy,
        }
        let w: Wrapper = toml::from_str(r#"policy = "always""#).unwrap();
        assert_eq!(w.policy, CallbackPolicy::Always);
        let w: Wrapper = toml::from_str(r#"policy = "success_only""#).unwrap();
        assert_eq!(w.policy, CallbackPolicy::SuccessOnly);
    }

    #[tokio::test]
    async fn test_posts_task_json() {
        let server = MockServer::start(|_| (204, String::new()));
        let notifier = HttpCallbackNotifier::new(Duration::from_secs(5));
        let task = completed_task(true);

        notifier.notify(&format!("{}/hooks/oauth", server.url()), &task).await;

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/hooks/oauth");
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert!(req.header(DELIVERY_HEADER).is_some());
        assert!(req.body.contains(r#""id":1001"#));

        let body: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["status"], "Success");
        assert_eq!(body["message"], "authorization successful");
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let notifier = HttpCallbackNotifier::new(Duration::from_secs(2));
        let task = completed_task(true);

        // Unreachable, malformed and blank URLs all return quietly.
        notifier.notify("http://127.0.0.1:9/hook", &task).await;
        notifier.notify("not a url", &task).await;
        notifier.notify("   ", &task).await;

        let server = MockServer::start(|_| (500, "nope".into()));
        notifier.notify(&server.url(), &task).await;
        assert_eq!(server.requests().len(), 1);
    }
}
