//! Tasks: the unit of orchestrated work and its in-memory registry.

mod registry;
mod request;

pub use registry::TaskRegistry;
pub use request::{AccountCredentials, CreateTaskRequest, LoginHints, ProxyConfig, ProxyProtocol};

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Task identifier. Allocated strictly increasing per process.
pub type TaskId = u64;

/// Externally visible task state, derived from the completion flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    InProgress,
    Failed,
    Success,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "InProgress",
            Self::Failed => "Failed",
            Self::Success => "Success",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one task.
///
/// Values handed out by the registry are copies; mutating a task goes through
/// [`TaskRegistry`] so every write happens under its lock.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    id: TaskId,
    is_completed: bool,
    is_success: bool,
    message: String,
    callback_url_called: bool,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub(crate) fn new(id: TaskId, message: impl Into<String>) -> Self {
        Self {
            id,
            is_completed: false,
            is_success: false,
            message: message.into(),
            callback_url_called: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn status(&self) -> TaskStatus {
        match (self.is_completed, self.is_success) {
            (false, _) => TaskStatus::InProgress,
            (true, true) => TaskStatus::Success,
            (true, false) => TaskStatus::Failed,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    /// Only meaningful once [`Task::is_completed`] is true.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.is_success
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn callback_url_called(&self) -> bool {
        self.callback_url_called
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}

impl Serialize for Task {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Task", 6)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("status", &self.status())?;
        state.serialize_field("callbackUrlCalled", &self.callback_url_called)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("createdAt", &self.created_at)?;
        state.serialize_field("completedAt", &self.completed_at)?;
        state.end()
    }
}
