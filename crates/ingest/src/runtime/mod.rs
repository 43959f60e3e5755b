use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::IngestError;

pub mod flow_control;

pub use flow_control::FlowControlConfig;
use flow_control::FlowController;

/// Counters for one drain cycle of a [`WorkerPool`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub completed: usize,
    pub failed: usize,
    pub peak_in_flight: usize,
}

/// Result slot of a submitted job.
pub struct JobHandle<T> {
    rx: oneshot::Receiver<Result<T, IngestError>>,
}

impl<T> JobHandle<T> {
    pub async fn wait(self) -> Result<T, IngestError> {
        self.rx
            .await
            .map_err(|_| IngestError::Join("job dropped before completion".to_string()))?
    }

    /// Blocking variant for callers outside the async runtime.
    pub fn blocking_wait(self) -> Result<T, IngestError> {
        self.rx
            .blocking_recv()
            .map_err(|_| IngestError::Join("job dropped before completion".to_string()))?
    }
}

#[derive(Default)]
struct Counters {
    completed: AtomicUsize,
    failed: AtomicUsize,
}

/// Bounded pool of blocking jobs.
///
/// `submit` never blocks the caller; each job waits for a flow-control permit
/// before running on the blocking thread pool. `wait` drains every job
/// submitted so far and reports the first failure of the cycle.
#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
    tracker: TaskTracker,
    flow: FlowController,
    cancel_token: CancellationToken,
    first_error: Arc<Mutex<Option<IngestError>>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Must be called from within a tokio runtime.
    pub fn new(config: FlowControlConfig) -> Result<Self, IngestError> {
        let handle = Handle::try_current()
            .map_err(|e| IngestError::Closed(format!("no tokio runtime: {e}")))?;
        Ok(Self::with_handle(config, handle))
    }

    pub fn with_handle(config: FlowControlConfig, handle: Handle) -> Self {
        Self {
            handle,
            tracker: TaskTracker::new(),
            flow: FlowController::new(&config),
            cancel_token: CancellationToken::new(),
            first_error: Arc::new(Mutex::new(None)),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn limit(&self) -> usize {
        self.flow.limit()
    }

    pub fn in_flight(&self) -> usize {
        self.flow.running()
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Schedule a blocking job. Safe to call from blocking threads.
    ///
    /// A cancelled pool refuses the job up front with [`IngestError::Cancelled`].
    pub fn submit<F, T, E>(&self, job: F) -> Result<JobHandle<T>, IngestError>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        if self.cancel_token.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let (tx, rx) = oneshot::channel();

        let flow = self.flow.clone();
        let cancel_token = self.cancel_token.clone();
        let first_error = Arc::clone(&self.first_error);
        let counters = Arc::clone(&self.counters);

        self.tracker.spawn_on(
            async move {
                let permit = tokio::select! {
                    _ = cancel_token.cancelled() => Err(IngestError::Cancelled),
                    permit = flow.acquire_in_flight() => permit,
                };

                let result = match permit {
                    Ok(permit) => {
                        let joined = tokio::task::spawn_blocking(move || {
                            let _permit = permit;
                            job()
                        })
                        .await;
                        match joined {
                            Ok(Ok(value)) => Ok(value),
                            Ok(Err(e)) => Err(IngestError::Job(e.to_string())),
                            Err(e) => Err(IngestError::Join(e.to_string())),
                        }
                    }
                    Err(e) => Err(e),
                };

                match &result {
                    Ok(_) => {
                        counters.completed.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(IngestError::Cancelled) => {}
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::SeqCst);
                        tracing::warn!("worker job failed: {}", e);
                        if let Ok(mut slot) = first_error.lock() {
                            slot.get_or_insert_with(|| e.clone());
                        }
                    }
                }

                let _ = tx.send(result);
            },
            &self.handle,
        );

        Ok(JobHandle { rx })
    }

    /// Wait for every outstanding job, then reopen the pool for the next cycle.
    pub async fn wait(&self) -> Result<PoolStats, IngestError> {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();

        let stats = PoolStats {
            completed: self.counters.completed.swap(0, Ordering::SeqCst),
            failed: self.counters.failed.swap(0, Ordering::SeqCst),
            peak_in_flight: self.flow.take_peak(),
        };
        tracing::debug!(
            "worker pool drained: completed={}, failed={}, peak={}",
            stats.completed,
            stats.failed,
            stats.peak_in_flight
        );

        let first = self
            .first_error
            .lock()
            .map_err(|_| IngestError::Closed("error slot poisoned".to_string()))?
            .take();
        match first {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}
