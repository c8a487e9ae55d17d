// src/timer.rs
use std::time::{Duration, Instant};

/// Software block timer: armed with a duration, checked by polling.
#[derive(Debug, Default)]
pub struct BlockTimer {
    started_at: Option<Instant>,
    until: Option<Instant>,
}

impl BlockTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, dur: Duration) {
        let now = Instant::now();
        self.started_at = Some(now);
        self.until = Some(now + dur);
    }

    /// Disarms and reports elapsed time since start.
    pub fn stop(&mut self) -> Duration {
        let elapsed = self.elapsed();
        self.started_at = None;
        self.until = None;
        elapsed
    }

    /// Elapsed since start; zero when not armed.
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    pub fn expired(&self) -> bool {
        self.until.is_some_and(|u| Instant::now() >= u)
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }
}
