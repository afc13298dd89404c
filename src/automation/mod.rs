//! Remote browser-automation collaborators.
//!
//! The orchestrator talks to two services: a profile service that leases
//! ephemeral, addressable browser profiles, and a driver that attaches to a
//! leased profile and performs the login and consent steps.

mod driver;
mod http;
mod lease;
mod profile;

pub use driver::HttpAutomationDriver;
pub use lease::{LeaseError, LeasedSession, ProfileLease};
pub use profile::HttpProfileService;

use crate::task::{AccountCredentials, LoginHints, ProxyConfig};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("URL cannot be used as a base: {0}")]
    NotABase(String),
}

/// Result of a login or consent step.
///
/// `NotAttempted` means the backend skipped the step because an earlier one
/// failed; it is kept apart from an attempted step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    NotAttempted,
    Failed,
    Succeeded,
}

impl StepOutcome {
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }
}

impl From<Option<bool>> for StepOutcome {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => Self::NotAttempted,
            Some(false) => Self::Failed,
            Some(true) => Self::Succeeded,
        }
    }
}

/// Reply to a session start request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub ok: bool,
    pub session_id: String,
    pub endpoint: String,
}

impl SessionInfo {
    /// The service reported success and returned an addressable session.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.ok && !self.session_id.is_empty() && !self.endpoint.is_empty()
    }
}

/// Leases ephemeral automation profiles.
#[async_trait]
pub trait ProfileService: Send + Sync {
    /// Whether the automation backend is reachable.
    async fn is_running(&self) -> bool;

    /// Start an ephemeral profile, optionally routed through `proxy`.
    async fn start_session(
        &self,
        proxy: Option<&ProxyConfig>,
    ) -> Result<SessionInfo, AutomationError>;

    /// Stop a profile. Absent or unknown ids are a no-op.
    async fn stop_session(&self, session_id: Option<&str>) -> Result<(), AutomationError>;
}

/// Attaches to a leased profile on behalf of one account.
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        account: &AccountCredentials,
    ) -> Result<Box<dyn AutomationConnection>, AutomationError>;
}

/// A live driver connection to one leased profile.
#[async_trait]
pub trait AutomationConnection: Send + Sync {
    async fn login(&self, hints: &LoginHints) -> Result<StepOutcome, AutomationError>;

    /// Provider-specific OAuth consent.
    async fn consent(&self) -> Result<StepOutcome, AutomationError>;

    /// End the driver session. Closing one the driver already dropped is a no-op.
    async fn close(&self) -> Result<(), AutomationError>;
}
