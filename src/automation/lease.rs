//! Scoped ownership of a leased automation profile.

use super::{AutomationError, ProfileService};
use crate::task::ProxyConfig;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("profile service did not return a usable session")]
    Rejected,

    #[error(transparent)]
    Automation(#[from] AutomationError),
}

/// Addressable session handed to code running inside a lease scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedSession {
    pub session_id: String,
    pub endpoint: String,
}

/// A started profile that must be stopped exactly once.
///
/// Prefer [`ProfileLease::scope`], which awaits the release after the body
/// finishes, including when it panics. If a lease is dropped unreleased (its
/// owning future was cancelled) the release is spawned onto the runtime.
pub struct ProfileLease {
    service: Arc<dyn ProfileService>,
    session_id: Option<String>,
    endpoint: String,
}

impl ProfileLease {
    /// Start a session and take ownership of it.
    pub async fn acquire(
        service: Arc<dyn ProfileService>,
        proxy: Option<&ProxyConfig>,
    ) -> Result<Self, LeaseError> {
        let info = service.start_session(proxy).await?;
        if !info.is_usable() {
            // A half-started profile may still exist on the service side.
            if !info.session_id.is_empty() {
                stop(service.as_ref(), &info.session_id).await;
            }
            return Err(LeaseError::Rejected);
        }

        tracing::debug!(session_id = %info.session_id, "Leased automation profile");
        Ok(Self {
            service,
            session_id: Some(info.session_id),
            endpoint: info.endpoint,
        })
    }

    #[must_use]
    pub fn session(&self) -> LeasedSession {
        LeasedSession {
            session_id: self.session_id.clone().unwrap_or_default(),
            endpoint: self.endpoint.clone(),
        }
    }

    /// Stop the leased session. Failures are logged, not returned.
    pub async fn release(mut self) {
        if let Some(id) = self.session_id.take() {
            stop(self.service.as_ref(), &id).await;
        }
    }

    /// Run `body` against the session, then release the lease.
    ///
    /// Returns `Err` with the panic payload if `body` panicked; the lease is
    /// released in either case.
    pub async fn scope<F, Fut, T>(self, body: F) -> std::thread::Result<T>
    where
        F: FnOnce(LeasedSession) -> Fut,
        Fut: Future<Output = T>,
    {
        let outcome = AssertUnwindSafe(body(self.session())).catch_unwind().await;
        self.release().await;
        outcome
    }
}

async fn stop(service: &dyn ProfileService, session_id: &str) {
    match service.stop_session(Some(session_id)).await {
        Ok(()) => tracing::debug!(session_id, "Released automation profile"),
        Err(e) => tracing::warn!(session_id, "Failed to release automation profile: {e}"),
    }
}

impl Drop for ProfileLease {
    fn drop(&mut self) {
        let Some(id) = self.session_id.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(session_id = %id, "Lease dropped unreleased; releasing in background");
                let service = Arc::clone(&self.service);
                handle.spawn(async move { stop(service.as_ref(), &id).await });
            }
            Err(_) => {
                tracing::error!(session_id = %id, "Lease dropped outside a runtime; profile left running");
            }
        }
    }
}

impl std::fmt::Debug for ProfileLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileLease")
            .field("session_id", &self.session_id)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::SessionInfo;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingService {
        reply: Mutex<SessionInfo>,
        stopped: Mutex<Vec<Option<String>>>,
    }

    impl RecordingService {
        fn granting(id: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(SessionInfo {
                    ok: true,
                    session_id: id.into(),
                    endpoint: format!("ws://profiles/{id}"),
                }),
                ..Self::default()
            })
        }

        fn stopped(&self) -> Vec<Option<String>> {
            self.stopped.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProfileService for RecordingService {
        async fn is_running(&self) -> bool {
            true
        }

        async fn start_session(
            &self,
            _proxy: Option<&ProxyConfig>,
        ) -> Result<SessionInfo, AutomationError> {
            Ok(self.reply.lock().unwrap().clone())
        }

        async fn stop_session(&self, session_id: Option<&str>) -> Result<(), AutomationError> {
            self.stopped.lock().unwrap().push(session_id.map(str::to_string));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_scope_releases_once_after_body() {
        let service = RecordingService::granting("p-1");
        let lease = ProfileLease::acquire(service.clone(), None).await.unwrap();

        let endpoint = lease.scope(|s| async move { s.endpoint }).await.unwrap();
        assert_eq!(endpoint, "ws://profiles/p-1");
        assert_eq!(service.stopped(), vec![Some("p-1".to_string())]);
    }

    #[tokio::test]
    async fn test_scope_releases_when_body_panics() {
        let service = RecordingService::granting("p-2");
        let lease = ProfileLease::acquire(service.clone(), None).await.unwrap();

        let result = lease
            .scope(|_| async {
                panic!("driver blew up");
            })
            .await;
        assert!(result.is_err());
        assert_eq!(service.stopped(), vec![Some("p-2".to_string())]);
    }

    #[tokio::test]
    async fn test_rejected_lease_is_not_stopped_without_id() {
        let service = Arc::new(RecordingService::default());
        let err = ProfileLease::acquire(service.clone(), None).await.unwrap_err();
        assert!(matches!(err, LeaseError::Rejected));
        assert!(service.stopped().is_empty());
    }

    #[tokio::test]
    async fn test_half_started_lease_is_cleaned_up() {
        let service = Arc::new(RecordingService {
            reply: Mutex::new(SessionInfo {
                ok: true,
                session_id: "p-3".into(),
                endpoint: String::new(),
            }),
            ..RecordingService::default()
        });
        let err = ProfileLease::acquire(service.clone(), None).await.unwrap_err();
        assert!(matches!(err, LeaseError::Rejected));
        assert_eq!(service.stopped(), vec![Some("p-3".to_string())]);
    }

    #[tokio::test]
    async fn test_dropped_lease_releases_in_background() {
        let service = RecordingService::granting("p-4");
        let lease = ProfileLease::acquire(service.clone(), None).await.unwrap();
        drop(lease);

        for _ in 0..50 {
            if !service.stopped().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.stopped(), vec![Some("p-4".to_string())]);
    }
}
