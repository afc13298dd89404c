//! Submit-and-poll orchestration of OAuth-automation tasks.
//!
//! [`TaskOrchestrator::create`] registers a task and returns its id at once;
//! the workflow runs on a detached tokio task. Callers observe progress with
//! [`TaskOrchestrator::get_task_by_id`] or [`TaskOrchestrator::wait_for_completion`].

mod workflow;


pub use workflow::{QUEUED_MESSAGE, SUCCESS_MESSAGE, WorkflowFailure, WorkflowStep};

use crate::automation::{AutomationDriver, HttpAutomationDriver, HttpProfileService, ProfileService};
use crate::config::Config;
use crate::notify::{CallbackNotifier, CallbackPolicy, HttpCallbackNotifier};
use crate::task::{CreateTaskRequest, Task, TaskId, TaskRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use workflow::WorkflowContext;

/// Tunables for a [`TaskOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Ids are allocated starting at `id_floor + 1`.
    pub id_floor: TaskId,
    /// Cap on workflows holding an automation profile at the same time.
    pub max_concurrent_workflows: usize,
    /// Upper bound on one workflow, from backend check to consent.
    pub workflow_timeout: Duration,
    pub callback_policy: CallbackPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            id_floor: 1000,
            max_concurrent_workflows: 8,
            workflow_timeout: Duration::from_secs(300),
            callback_policy: CallbackPolicy::SuccessOnly,
        }
    }
}

pub struct TaskOrchestrator {
    registry: Arc<TaskRegistry>,
    context: Arc<WorkflowContext>,
    limiter: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    runtime: Handle,
}

impl TaskOrchestrator {
    /// Build an orchestrator bound to the current tokio runtime.
    ///
    /// Must be called from within a runtime; [`TaskOrchestrator::create`] may
    /// then be called from any thread.
    pub fn new(
        profiles: Arc<dyn ProfileService>,
        driver: Arc<dyn AutomationDriver>,
        notifier: Arc<dyn CallbackNotifier>,
        settings: OrchestratorSettings,
    ) -> Self {
        let registry = Arc::new(TaskRegistry::new(settings.id_floor));
        let shutdown = CancellationToken::new();
        let context = Arc::new(WorkflowContext {
            registry: Arc::clone(&registry),
            profiles,
            driver,
            notifier,
            callback_policy: settings.callback_policy,
            workflow_timeout: settings.workflow_timeout,
            shutdown: shutdown.clone(),
        });

        Self {
            registry,
            context,
            limiter: Arc::new(Semaphore::new(settings.max_concurrent_workflows.max(1))),
            tracker: TaskTracker::new(),
            shutdown,
            runtime: Handle::current(),
        }
    }

    /// Build an orchestrator wired to the HTTP collaborators named in `config`.
    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        let profiles = HttpProfileService::new(
            &config.profile_service.base_url,
            Duration::from_secs(config.profile_service.request_timeout_secs),
        )?;
        let driver = HttpAutomationDriver::new(
            &config.driver.base_url,
            Duration::from_secs(config.driver.request_timeout_secs),
        )?;
        let notifier = HttpCallbackNotifier::new(Duration::from_secs(config.notifier.timeout_secs));

        Ok(Self::new(
            Arc::new(profiles),
            Arc::new(driver),
            Arc::new(notifier),
            config.orchestrator_settings(),
        ))
    }

    /// Register a task and start its workflow. Never waits on the workflow.
    pub fn create(&self, request: CreateTaskRequest) -> TaskId {
        let id = self.registry.insert_new(QUEUED_MESSAGE);
        tracing::info!(
            task_id = id,
            email = %request.account.email,
            proxy = request.proxy.is_some(),
            callback = request.callback_url().is_some(),
            "Task created"
        );

        let context = Arc::clone(&self.context);
        let limiter = Arc::clone(&self.limiter);
        self.runtime.spawn(
            self.tracker
                .track_future(workflow::run(context, limiter, id, request)),
        );

        id
    }

    /// Current snapshot of a task, or `None` for an unknown id.
    #[must_use]
    pub fn get_task_by_id(&self, id: TaskId) -> Option<Task> {
        self.registry.get(id)
    }

    /// Wait until the task is terminal or `timeout` elapses, then return its
    /// latest snapshot. Returns `None` for an unknown id.
    pub async fn wait_for_completion(&self, id: TaskId, timeout: Duration) -> Option<Task> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before reading so a completion in between is not missed.
            let completed = self.registry.completed();
            tokio::pin!(completed);
            completed.as_mut().enable();

            let task = self.registry.get(id)?;
            if task.is_completed() {
                return Some(task);
            }

            if tokio::time::timeout_at(deadline, completed).await.is_err() {
                return self.registry.get(id);
            }
        }
    }

    /// Number of tasks created so far.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of workflows that have not finished yet.
    #[must_use]
    pub fn active_workflows(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting progress: in-flight workflows abandon their current
    /// step, release their lease and fail. Resolves once all have finished.
    pub async fn shutdown(&self) {
        tracing::info!(active = self.tracker.len(), "Shutting down orchestrator");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl std::fmt::Debug for TaskOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskOrchestrator")
            .field("tasks", &self.registry.len())
            .field("active", &self.tracker.len())
            .field("available_slots", &self.limiter.available_permits())
            .finish_non_exhaustive()
    }
}
