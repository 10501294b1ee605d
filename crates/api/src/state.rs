//! Application state for the API server.

use std::sync::Arc;
use std::time::Instant;

use mnemo_coordinator::Coordinator;

/// Shared application state for the API server.
pub struct AppState {
    pub coordinator: Arc<Coordinator>,

    /// Server start time (for health checks)
    pub start_time: Instant,
}

impl AppState {
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
