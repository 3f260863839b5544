//! Service dispatch in SYNC, ASYNC, TIMEOUT and RETRY modes.
//!
//! Every mode first asks the service whether it can run against the handle.
//! A refusal resolves the dispatch to [`DbError::NotServable`] without ever
//! invoking `run`, and no timeout or retry policy applies to it.
//!
//! The asynchronous modes execute on the executor's [`WorkerPool`]. A TIMEOUT
//! dispatch whose timer fires first resolves to [`DbError::TimedOut`] while the
//! worker keeps running; its eventual result is dropped. A RETRY dispatch keeps
//! its worker slot for every attempt and backoff sleep.

use crate::db::{ConnectionProvider, DatabaseHandle};
use crate::error::{DbError, DbResult};
use crate::service::Service;
use crate::service::task::{DispatchProgress, DispatchState, ServiceTask};
use crate::service::worker::WorkerPool;
use futures_util::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

/// Retry policy: at most `max_attempts` runs, sleeping `delay * k` after the
/// k-th failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.max_attempts == 0 {
            return Err(DbError::invalid_argument(
                "Retry policy needs at least one attempt",
            ));
        }
        Ok(())
    }

    /// Sleep after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Run inline on the caller's task.
    Sync,
    /// Run on a worker.
    Async,
    /// Run on a worker, giving up waiting after the duration.
    Timeout(Duration),
    /// Run on a worker, retrying failures.
    Retry(RetryPolicy),
}

impl DispatchMode {
    pub fn validate(&self) -> DbResult<()> {
        match self {
            DispatchMode::Timeout(timeout) if timeout.is_zero() => {
                Err(DbError::invalid_argument("Timeout must be greater than 0"))
            }
            DispatchMode::Retry(policy) => policy.validate(),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::Sync => write!(f, "sync"),
            DispatchMode::Async => write!(f, "async"),
            DispatchMode::Timeout(timeout) => write!(f, "timeout({}ms)", timeout.as_millis()),
            DispatchMode::Retry(policy) => write!(
                f,
                "retry({}x{}ms)",
                policy.max_attempts,
                policy.delay.as_millis()
            ),
        }
    }
}

/// Dispatches services against database handles.
///
/// Clones share the same worker pool.
#[derive(Debug, Clone)]
pub struct ServiceExecutor {
    workers: WorkerPool,
}

impl ServiceExecutor {
    pub fn new(workers: WorkerPool) -> Self {
        Self { workers }
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Run a service inline and return its result.
    pub async fn run<P: ConnectionProvider>(
        &self,
        handle: &DatabaseHandle<P>,
        service: &dyn Service<P>,
    ) -> DbResult<()> {
        self.admit(handle, service, &DispatchProgress::new())?;
        service.run(handle).await
    }

    /// Dispatch in the given mode.
    ///
    /// Always returns a task: argument and capability failures are reported
    /// through it.
    pub async fn dispatch<P: ConnectionProvider>(
        &self,
        handle: Arc<DatabaseHandle<P>>,
        service: Arc<dyn Service<P>>,
        mode: DispatchMode,
    ) -> ServiceTask {
        match mode {
            DispatchMode::Sync => {
                let id = Uuid::new_v4();
                let progress = DispatchProgress::new();
                let span = info_span!("dispatch", dispatch_id = %id, mode = %mode);
                if let Err(e) = self.admit(&handle, service.as_ref(), &progress) {
                    return ServiceTask::ready(id, service.name(), progress, Err(e));
                }
                let result = async {
                    progress.begin_attempt();
                    let result = service.run(&handle).await;
                    progress.finish(&result);
                    result
                }
                .instrument(span)
                .await;
                ServiceTask::ready(id, service.name(), progress, result)
            }
            DispatchMode::Async => self.submit(handle, service),
            DispatchMode::Timeout(timeout) => self.submit_with_timeout(handle, service, timeout),
            DispatchMode::Retry(policy) => self.submit_with_retry(handle, service, policy),
        }
    }

    /// Run a service on a worker.
    pub fn submit<P: ConnectionProvider>(
        &self,
        handle: Arc<DatabaseHandle<P>>,
        service: Arc<dyn Service<P>>,
    ) -> ServiceTask {
        self.spawn(handle, service, DispatchMode::Async)
    }

    /// Run a service on a worker, resolving to `TimedOut` if it takes longer
    /// than `timeout`.
    pub fn submit_with_timeout<P: ConnectionProvider>(
        &self,
        handle: Arc<DatabaseHandle<P>>,
        service: Arc<dyn Service<P>>,
        timeout: Duration,
    ) -> ServiceTask {
        self.spawn(handle, service, DispatchMode::Timeout(timeout))
    }

    /// Run a service on a worker, retrying failed attempts.
    pub fn submit_with_retry<P: ConnectionProvider>(
        &self,
        handle: Arc<DatabaseHandle<P>>,
        service: Arc<dyn Service<P>>,
        policy: RetryPolicy,
    ) -> ServiceTask {
        self.spawn(handle, service, DispatchMode::Retry(policy))
    }

    /// Stop accepting work and wait for running services.
    pub async fn shutdown(&self) {
        self.workers.shutdown().await;
    }

    /// Capability check; a refusal marks the dispatch rejected.
    fn admit<P: ConnectionProvider>(
        &self,
        handle: &DatabaseHandle<P>,
        service: &dyn Service<P>,
        progress: &DispatchProgress,
    ) -> DbResult<()> {
        if service.can_run(handle) {
            return Ok(());
        }
        debug!(service = %service.name(), database = %handle.name(), "Service rejected");
        progress.transition(DispatchState::Rejected);
        Err(DbError::not_servable(service.name(), handle.name()))
    }

    fn spawn<P: ConnectionProvider>(
        &self,
        handle: Arc<DatabaseHandle<P>>,
        service: Arc<dyn Service<P>>,
        mode: DispatchMode,
    ) -> ServiceTask {
        let id = Uuid::new_v4();
        let progress = DispatchProgress::new();
        let name = service.name().to_string();

        if let Err(e) = mode.validate() {
            progress.transition(DispatchState::Rejected);
            return ServiceTask::ready(id, name, progress, Err(e));
        }
        if self.workers.is_shutdown() {
            progress.transition(DispatchState::Rejected);
            return ServiceTask::ready(id, name, progress, Err(DbError::ExecutorShutdown));
        }
        if let Err(e) = self.admit(&handle, service.as_ref(), &progress) {
            return ServiceTask::ready(id, name, progress, Err(e));
        }

        let span = info_span!("dispatch", dispatch_id = %id, service = %name, mode = %mode);
        let retry = match mode {
            DispatchMode::Retry(policy) => Some(policy),
            _ => None,
        };

        let (sender, receiver) = oneshot::channel();
        let job = {
            let workers = self.workers.clone();
            let progress = Arc::clone(&progress);
            async move {
                let result = match workers.acquire().await {
                    Ok(permit) => {
                        let result = execute(&handle, service.as_ref(), &progress, retry).await;
                        drop(permit);
                        result
                    }
                    Err(e) => Err(e),
                };
                if !progress.finish(&result) {
                    debug!("Dropping result of a dispatch that already finished");
                }
                if sender.send(result).is_err() {
                    debug!("Dispatch result has no receiver");
                }
            }
        };

        match mode {
            DispatchMode::Timeout(timeout) => {
                let (outer_sender, outer_receiver) = oneshot::channel();
                self.workers.spawn(job.instrument(span.clone()));
                self.workers.spawn(
                    supervise(receiver, outer_sender, Arc::clone(&progress), timeout)
                        .instrument(span),
                );
                ServiceTask::new(id, name, progress, outer_receiver)
            }
            _ => {
                self.workers.spawn(job.instrument(span));
                ServiceTask::new(id, name, progress, receiver)
            }
        }
    }
}

/// Run one dispatch on a worker, applying the retry policy if any.
async fn execute<P: ConnectionProvider>(
    handle: &DatabaseHandle<P>,
    service: &dyn Service<P>,
    progress: &DispatchProgress,
    retry: Option<RetryPolicy>,
) -> DbResult<()> {
    let Some(policy) = retry else {
        progress.begin_attempt();
        return attempt(handle, service).await;
    };

    loop {
        let attempt_no = progress.begin_attempt();
        match attempt(handle, service).await {
            Ok(()) => {
                if attempt_no > 1 {
                    debug!(attempt = attempt_no, "Service succeeded after retrying");
                }
                return Ok(());
            }
            Err(e) if attempt_no >= policy.max_attempts => {
                warn!(attempt = attempt_no, error = %e, "Service failed, no attempts left");
                return Err(DbError::retry_exhausted(attempt_no, e));
            }
            Err(e) => {
                let backoff = policy.backoff(attempt_no);
                warn!(
                    attempt = attempt_no,
                    max_attempts = policy.max_attempts,
                    backoff_ms = millis(backoff),
                    error = %e,
                    "Service failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// One invocation of `run`. A panic counts as a failed attempt.
async fn attempt<P: ConnectionProvider>(
    handle: &DatabaseHandle<P>,
    service: &dyn Service<P>,
) -> DbResult<()> {
    AssertUnwindSafe(async { service.run(handle).await })
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(DbError::service(service.name(), "Service panicked")))
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Forward the worker's result, or `TimedOut` if the timer fires first.
///
/// The timer starts when the dispatch is submitted, so time spent waiting for
/// a free worker counts against it.
async fn supervise(
    mut receiver: oneshot::Receiver<DbResult<()>>,
    sender: oneshot::Sender<DbResult<()>>,
    progress: Arc<DispatchProgress>,
    timeout: Duration,
) {
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, &mut receiver).await {
        Ok(received) => flatten(received),
        Err(_) if progress.transition(DispatchState::TimedOut) => {
            let elapsed_ms = millis(started.elapsed());
            warn!(timeout_ms = millis(timeout), "Service timed out");
            Err(DbError::timed_out("service dispatch", elapsed_ms))
        }
        // the worker finished just as the timer fired
        Err(_) => flatten(receiver.await),
    };
    let _ = sender.send(result);
}

fn flatten(received: Result<DbResult<()>, oneshot::error::RecvError>) -> DbResult<()> {
    received.unwrap_or_else(|_| Err(DbError::internal("Worker stopped before reporting a result")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(30));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::new(3, Duration::MAX);
        assert_eq!(policy.backoff(2), Duration::MAX);
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(250)), 250);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_mode_validation() {
        assert!(DispatchMode::Sync.validate().is_ok());
        assert!(DispatchMode::Async.validate().is_ok());
        assert!(matches!(
            DispatchMode::Timeout(Duration::ZERO).validate(),
            Err(DbError::InvalidArgument { .. })
        ));
        assert!(matches!(
            DispatchMode::Retry(RetryPolicy::new(0, Duration::from_millis(5))).validate(),
            Err(DbError::InvalidArgument { .. })
        ));
        assert!(
            DispatchMode::Retry(RetryPolicy::new(1, Duration::ZERO))
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(DispatchMode::Sync.to_string(), "sync");
        assert_eq!(
            DispatchMode::Timeout(Duration::from_millis(50)).to_string(),
            "timeout(50ms)"
        );
        assert_eq!(
            DispatchMode::Retry(RetryPolicy::new(3, Duration::from_millis(10))).to_string(),
            "retry(3x10ms)"
        );
    }
}
