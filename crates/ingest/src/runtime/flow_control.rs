use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::IngestError;

#[derive(Debug, Clone)]
pub struct FlowControlConfig {
    pub max_in_flight: usize,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self { max_in_flight: 10 }
    }
}

impl FlowControlConfig {
    pub fn with_max_in_flight(max_in_flight: usize) -> Self {
        Self { max_in_flight }
    }
}

/// Caps the number of jobs executing at once and tracks the high-water mark.
#[derive(Clone)]
pub struct FlowController {
    in_flight: Arc<Semaphore>,
    limit: usize,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FlowController {
    pub fn new(config: &FlowControlConfig) -> Self {
        let limit = config.max_in_flight.max(1);
        Self {
            in_flight: Arc::new(Semaphore::new(limit)),
            limit,
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn acquire_in_flight(&self) -> Result<InFlightPermit, IngestError> {
        let permit = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IngestError::Closed("in-flight flow controller closed".to_string()))?;

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        Ok(InFlightPermit {
            _permit: permit,
            running: Arc::clone(&self.running),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest concurrency observed since the last reset.
    pub fn take_peak(&self) -> usize {
        self.peak.swap(self.running(), Ordering::SeqCst)
    }
}

pub struct InFlightPermit {
    _permit: OwnedSemaphorePermit,
    running: Arc<AtomicUsize>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peak_tracks_concurrent_permits() {
        let flow = FlowController::new(&FlowControlConfig::with_max_in_flight(2));
        let a = flow.acquire_in_flight().await.unwrap();
        let b = flow.acquire_in_flight().await.unwrap();
        assert_eq!(flow.running(), 2);
        drop(a);
        drop(b);
        assert_eq!(flow.running(), 0);
        assert_eq!(flow.take_peak(), 2);
        assert_eq!(flow.take_peak(), 0);
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let flow = FlowController::new(&FlowControlConfig::with_max_in_flight(0));
        assert_eq!(flow.limit(), 1);
    }
}
