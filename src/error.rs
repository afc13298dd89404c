use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Automation error: {0}")]
    Automation(#[from] crate::automation::AutomationError),

    #[error("Server error: {0}")]
    Server(#[from] crate::server::ServerError),
}

pub type Result<T> = std::result::Result<T, Error>;
