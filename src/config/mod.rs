use crate::notify::CallbackPolicy;
use crate::orchestrator::OrchestratorSettings;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const ENV_PROFILE_SERVICE_URL: &str = "AUTHFLOW_PROFILE_SERVICE_URL";
pub const ENV_DRIVER_URL: &str = "AUTHFLOW_DRIVER_URL";
pub const ENV_LISTEN: &str = "AUTHFLOW_LISTEN";
pub const ENV_MAX_CONCURRENT: &str = "AUTHFLOW_MAX_CONCURRENT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default tracing filter when `RUST_LOG` is not set.
    pub log_level: String,
    pub orchestrator: OrchestratorConfig,
    pub profile_service: ProfileServiceConfig,
    pub driver: DriverConfig,
    pub notifier: NotifierConfig,
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "authflow=info".to_string(),
            orchestrator: OrchestratorConfig::default(),
            profile_service: ProfileServiceConfig::default(),
            driver: DriverConfig::default(),
            notifier: NotifierConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Ids are allocated from `first_task_id + 1`.
    pub first_task_id: u64,
    pub max_concurrent_workflows: usize,
    pub workflow_timeout_secs: u64,
    pub callback_policy: CallbackPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            first_task_id: 1000,
            max_concurrent_workflows: 8,
            workflow_timeout_secs: 300,
            callback_policy: CallbackPolicy::SuccessOnly,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileServiceConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ProfileServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:36912".to_string(),
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Threads serving HTTP requests.
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            workers: 4,
        }
    }
}

impl Config {
    /// `<config dir>/authflow/config.toml`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("authflow").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".authflow/config.toml"))
    }

    /// Load from the default path, apply environment overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path())
    }

    /// Load from `path` (defaults if it does not exist), apply environment
    /// overrides and validate.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up by environment variable name.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup(ENV_PROFILE_SERVICE_URL) {
            self.profile_service.base_url = url;
        }
        if let Some(url) = lookup(ENV_DRIVER_URL) {
            self.driver.base_url = url;
        }
        if let Some(listen) = lookup(ENV_LISTEN) {
            self.server.listen = listen;
        }
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT) {
            self.orchestrator.max_concurrent_workflows = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_MAX_CONCURRENT} must be a number, got {raw:?}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.orchestrator.max_concurrent_workflows == 0 {
            return invalid("orchestrator.max_concurrent_workflows must be at least 1");
        }
        if self.orchestrator.workflow_timeout_secs == 0 {
            return invalid("orchestrator.workflow_timeout_secs must be positive");
        }
        if self.profile_service.request_timeout_secs == 0 {
            return invalid("profile_service.request_timeout_secs must be positive");
        }
        if self.driver.request_timeout_secs == 0 {
            return invalid("driver.request_timeout_secs must be positive");
        }
        if self.notifier.timeout_secs == 0 {
            return invalid("notifier.timeout_secs must be positive");
        }
        if self.server.workers == 0 {
            return invalid("server.workers must be at least 1");
        }

        for (name, raw) in [
            ("profile_service.base_url", &self.profile_service.base_url),
            ("driver.base_url", &self.driver.base_url),
        ] {
            Url::parse(raw)
                .map_err(|e| ConfigError::Invalid(format!("{name} {raw:?}: {e}")))?;
        }

        self.server
            .listen
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid(format!("server.listen {:?}: {e}", self.server.listen)))?;

        Ok(())
    }

    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            id_floor: self.orchestrator.first_task_id,
            max_concurrent_workflows: self.orchestrator.max_concurrent_workflows,
            workflow_timeout: Duration::from_secs(self.orchestrator.workflow_timeout_secs),
            callback_policy: self.orchestrator.callback_policy,
        }
    }
}
