//! Awaitable handle to a submitted execution.

use crate::models::JobOutcome;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

enum HandleState {
    Ready(Option<JobOutcome>),
    Spawned(JoinHandle<JobOutcome>),
}

/// Resolves to the execution's [`JobOutcome`]. Dropping the handle does not
/// cancel the execution; use the engine's `cancel_execution` for that.
pub struct ExecutionHandle {
    execution_id: Option<String>,
    state: HandleState,
}

impl ExecutionHandle {
    /// Handle for a request rejected before any execution existed
    pub(crate) fn ready(outcome: JobOutcome) -> Self {
        Self {
            execution_id: None,
            state: HandleState::Ready(Some(outcome)),
        }
    }

    pub(crate) fn spawned(execution_id: String, handle: JoinHandle<JobOutcome>) -> Self {
        Self {
            execution_id: Some(execution_id),
            state: HandleState::Spawned(handle),
        }
    }

    /// `None` when the request was rejected up front (unknown job, shutdown, full queue)
    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Ready(_) => true,
            HandleState::Spawned(handle) => handle.is_finished(),
        }
    }
}

impl Future for ExecutionHandle {
    type Output = JobOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            HandleState::Ready(outcome) => Poll::Ready(
                outcome
                    .take()
                    .unwrap_or_else(|| JobOutcome::failure("execution handle polled after completion")),
            ),
            HandleState::Spawned(handle) => match Pin::new(handle).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                Poll::Ready(Err(error)) => Poll::Ready(JobOutcome::failure(format!(
                    "execution task aborted: {error}"
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("execution_id", &self.execution_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}
