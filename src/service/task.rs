//! Handle to a dispatched service.

use crate::error::{DbError, DbResult};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Progress of a single dispatch.
///
/// ```text
/// Pending -> Rejected
/// Pending -> Running -> Completed | Failed | TimedOut
/// ```
///
/// `Running` may be entered several times in RETRY mode. Terminal states never
/// change once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Pending,
    Rejected,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchState::Rejected
                | DispatchState::Completed
                | DispatchState::Failed
                | DispatchState::TimedOut
        )
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchState::Pending => "pending",
            DispatchState::Rejected => "rejected",
            DispatchState::Running => "running",
            DispatchState::Completed => "completed",
            DispatchState::Failed => "failed",
            DispatchState::TimedOut => "timed_out",
        };
        write!(f, "{}", s)
    }
}

/// State shared between a [`ServiceTask`] and the worker running it.
#[derive(Debug)]
pub(crate) struct DispatchProgress {
    state: Mutex<DispatchState>,
    attempts: AtomicU32,
}

impl DispatchProgress {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DispatchState::Pending),
            attempts: AtomicU32::new(0),
        })
    }

    pub(crate) fn state(&self) -> DispatchState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Move to `next` unless a terminal state was already reached.
    pub(crate) fn transition(&self, next: DispatchState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_terminal() {
            return false;
        }
        *state = next;
        true
    }

    /// Record the start of an attempt and return its 1-based number.
    pub(crate) fn begin_attempt(&self) -> u32 {
        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        self.transition(DispatchState::Running);
        attempt
    }

    pub(crate) fn finish(&self, result: &DbResult<()>) -> bool {
        self.transition(match result {
            Ok(()) => DispatchState::Completed,
            Err(_) => DispatchState::Failed,
        })
    }
}

/// Future resolving to the outcome of a dispatched service.
///
/// Dropping the task does not cancel the work; its result is discarded.
pub struct ServiceTask {
    id: Uuid,
    service: String,
    progress: Arc<DispatchProgress>,
    receiver: oneshot::Receiver<DbResult<()>>,
}

impl ServiceTask {
    pub(crate) fn new(
        id: Uuid,
        service: impl Into<String>,
        progress: Arc<DispatchProgress>,
        receiver: oneshot::Receiver<DbResult<()>>,
    ) -> Self {
        Self {
            id,
            service: service.into(),
            progress,
            receiver,
        }
    }

    /// A task whose outcome is already known.
    pub(crate) fn ready(
        id: Uuid,
        service: impl Into<String>,
        progress: Arc<DispatchProgress>,
        result: DbResult<()>,
    ) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self::new(id, service, progress, receiver)
    }

    /// Identifier carried by every log line of this dispatch.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn state(&self) -> DispatchState {
        self.progress.state()
    }

    /// Number of times `run` has been invoked so far.
    pub fn attempts(&self) -> u32 {
        self.progress.attempts()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }
}

impl fmt::Debug for ServiceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceTask")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .finish()
    }
}

impl Future for ServiceTask {
    type Output = DbResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(DbError::internal("Worker stopped before reporting a result"))
            })
        })
    }
}
