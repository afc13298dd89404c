//! Per-task automation state machine.
//!
//! `Init → ProfileCheck → ProfileLease → Connect → Login → Consent → Cleanup → Terminal`.
//! Steps run strictly in order. Once a profile is leased, every exit path goes
//! through Cleanup (lease release) before the terminal state is written.

use crate::automation::{
    AutomationConnection, AutomationDriver, AutomationError, LeasedSession, ProfileLease,
    ProfileService,
};
use crate::notify::{CallbackNotifier, CallbackPolicy};
use crate::task::{CreateTaskRequest, TaskId, TaskRegistry};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const QUEUED_MESSAGE: &str = "task queued";
pub const SUCCESS_MESSAGE: &str = "authorization successful";

/// Why a workflow ended in `Failed`. The display text is the task message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WorkflowFailure {
    #[error("missing target account credentials")]
    MissingCredentials,

    #[error("automation backend unreachable")]
    BackendUnreachable,

    #[error("failed to lease automation profile")]
    LeaseFailed,

    #[error("failed to authenticate target account")]
    AuthenticationFailed,

    #[error("authorization step failed")]
    AuthorizationFailed,

    #[error("automation timed out")]
    TimedOut,

    #[error("unexpected automation fault")]
    Fault,

    #[error("orchestrator shutting down")]
    ShuttingDown,
}

/// Observable non-terminal steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStep {
    ProfileCheck,
    ProfileLease,
    Connect,
    Login,
    Consent,
}

impl WorkflowStep {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProfileCheck => "profile_check",
            Self::ProfileLease => "profile_lease",
            Self::Connect => "connect",
            Self::Login => "login",
            Self::Consent => "consent",
        }
    }

    /// Message shown to pollers while the step runs.
    #[must_use]
    pub fn progress_message(&self) -> &'static str {
        match self {
            Self::ProfileCheck => "checking automation backend",
            Self::ProfileLease => "leasing automation profile",
            Self::Connect => "connecting to automation profile",
            Self::Login => "authenticating target account",
            Self::Consent => "requesting authorization",
        }
    }
}

/// Shared collaborators and policy for every workflow of one orchestrator.
pub(crate) struct WorkflowContext {
    pub registry: Arc<TaskRegistry>,
    pub profiles: Arc<dyn ProfileService>,
    pub driver: Arc<dyn AutomationDriver>,
    pub notifier: Arc<dyn CallbackNotifier>,
    pub callback_policy: CallbackPolicy,
    pub workflow_timeout: Duration,
    pub shutdown: CancellationToken,
}

impl WorkflowContext {
    fn enter(&self, id: TaskId, step: WorkflowStep) {
        tracing::debug!(task_id = id, step = step.as_str(), "Workflow step");
        self.registry.set_progress(id, step.progress_message());
    }

    /// Shutdown or deadline that has already passed, if any.
    fn interrupted(&self, deadline: Instant) -> Option<WorkflowFailure> {
        if self.shutdown.is_cancelled() {
            Some(WorkflowFailure::ShuttingDown)
        } else if Instant::now() >= deadline {
            Some(WorkflowFailure::TimedOut)
        } else {
            None
        }
    }

    /// Await `fut` unless shutdown or the workflow deadline comes first.
    async fn guarded<F: Future>(
        &self,
        deadline: Instant,
        fut: F,
    ) -> Result<F::Output, WorkflowFailure> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(WorkflowFailure::ShuttingDown),
            () = tokio::time::sleep_until(deadline) => Err(WorkflowFailure::TimedOut),
            output = fut => Ok(output),
        }
    }
}

/// Run one task to its terminal state.
pub(crate) async fn run(
    ctx: Arc<WorkflowContext>,
    limiter: Arc<Semaphore>,
    id: TaskId,
    request: CreateTaskRequest,
) {
    let permit = tokio::select! {
        biased;
        () = ctx.shutdown.cancelled() => None,
        permit = Arc::clone(&limiter).acquire_owned() => permit.ok(),
    };

    let outcome = match permit {
        Some(permit) => {
            let outcome = AssertUnwindSafe(execute(&ctx, id, &request))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    tracing::error!(task_id = id, "Workflow panicked: {}", panic_message(&*panic));
                    Err(WorkflowFailure::Fault)
                });
            drop(permit);
            outcome
        }
        None => Err(WorkflowFailure::ShuttingDown),
    };

    finish(&ctx, id, outcome, request.callback_url()).await;
}

async fn execute(
    ctx: &WorkflowContext,
    id: TaskId,
    request: &CreateTaskRequest,
) -> Result<(), WorkflowFailure> {
    if !request.account.is_complete() {
        return Err(WorkflowFailure::MissingCredentials);
    }

    let deadline = Instant::now() + ctx.workflow_timeout;

    ctx.enter(id, WorkflowStep::ProfileCheck);
    if !ctx.guarded(deadline, ctx.profiles.is_running()).await? {
        return Err(WorkflowFailure::BackendUnreachable);
    }

    ctx.enter(id, WorkflowStep::ProfileLease);
    // Not raced against the deadline: an abandoned start would leave its
    // profile running with no owner. The request timeout bounds this call.
    let lease = ProfileLease::acquire(Arc::clone(&ctx.profiles), request.proxy.as_ref())
        .await
        .map_err(|e| {
            tracing::warn!(task_id = id, "Profile lease failed: {e}");
            WorkflowFailure::LeaseFailed
        })?;
    if let Some(failure) = ctx.interrupted(deadline) {
        lease.release().await;
        return Err(failure);
    }

    // Cleanup: the scope releases the lease on every exit from `authorize`.
    lease
        .scope(|session| authorize(ctx, id, request, session, deadline))
        .await
        .unwrap_or_else(|panic| {
            tracing::error!(task_id = id, "Automation step panicked: {}", panic_message(&*panic));
            Err(WorkflowFailure::Fault)
        })
}

async fn authorize(
    ctx: &WorkflowContext,
    id: TaskId,
    request: &CreateTaskRequest,
    session: LeasedSession,
    deadline: Instant,
) -> Result<(), WorkflowFailure> {
    ctx.enter(id, WorkflowStep::Connect);
    let connection = ctx
        .guarded(deadline, ctx.driver.connect(&session.endpoint, &request.account))
        .await?
        .map_err(step_error(id, WorkflowStep::Connect, WorkflowFailure::AuthenticationFailed))?;

    // Closed on every exit; a skipped close (panic) is covered by the profile stop.
    let outcome = run_steps(ctx, id, request, connection.as_ref(), deadline).await;
    if let Err(e) = connection.close().await {
        tracing::warn!(task_id = id, "Failed to close driver session: {e}");
    }
    outcome
}

async fn run_steps(
    ctx: &WorkflowContext,
    id: TaskId,
    request: &CreateTaskRequest,
    connection: &dyn AutomationConnection,
    deadline: Instant,
) -> Result<(), WorkflowFailure> {
    ctx.enter(id, WorkflowStep::Login);
    let login = ctx
        .guarded(deadline, connection.login(&request.login_hints))
        .await?
        .map_err(step_error(id, WorkflowStep::Login, WorkflowFailure::AuthenticationFailed))?;
    if !login.is_success() {
        tracing::debug!(task_id = id, outcome = ?login, "Login did not succeed");
        return Err(WorkflowFailure::AuthenticationFailed);
    }

    ctx.enter(id, WorkflowStep::Consent);
    let consent = ctx
        .guarded(deadline, connection.consent())
        .await?
        .map_err(step_error(id, WorkflowStep::Consent, WorkflowFailure::AuthorizationFailed))?;
    if !consent.is_success() {
        tracing::debug!(task_id = id, outcome = ?consent, "Consent did not succeed");
        return Err(WorkflowFailure::AuthorizationFailed);
    }

    Ok(())
}

fn step_error(
    id: TaskId,
    step: WorkflowStep,
    failure: WorkflowFailure,
) -> impl FnOnce(AutomationError) -> WorkflowFailure {
    move |e| {
        tracing::warn!(task_id = id, step = step.as_str(), "Automation step error: {e}");
        failure
    }
}

/// Write the terminal state, then fire the callback if the policy allows.
async fn finish(
    ctx: &WorkflowContext,
    id: TaskId,
    outcome: Result<(), WorkflowFailure>,
    callback_url: Option<&str>,
) {
    let (success, message) = match outcome {
        Ok(()) => (true, SUCCESS_MESSAGE.to_string()),
        Err(failure) => (false, failure.to_string()),
    };

    let Some(task) = ctx.registry.complete(id, success, &message) else {
        return;
    };
    tracing::info!(task_id = id, status = %task.status(), message = task.message(), "Task finished");

    if let Some(url) = callback_url
        && ctx.callback_policy.should_notify(&task)
    {
        ctx.notifier.notify(url, &task).await;
        ctx.registry.mark_callback_called(id);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_messages() {
        assert_eq!(
            WorkflowFailure::BackendUnreachable.to_string(),
            "automation backend unreachable"
        );
        assert_eq!(
            WorkflowFailure::LeaseFailed.to_string(),
            "failed to lease automation profile"
        );
        assert_eq!(
            WorkflowFailure::AuthenticationFailed.to_string(),
            "failed to authenticate target account"
        );
        assert_eq!(
            WorkflowFailure::AuthorizationFailed.to_string(),
            "authorization step failed"
        );
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(&*boxed), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*boxed), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(&*boxed), "non-string panic payload");
    }
}
