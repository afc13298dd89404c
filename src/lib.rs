#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod automation;
pub mod cli;
pub mod config;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod server;
pub mod task;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use orchestrator::{OrchestratorSettings, TaskOrchestrator};
pub use task::{CreateTaskRequest, Task, TaskId, TaskStatus};
