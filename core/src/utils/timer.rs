//! Timing utilities
//!
//! This module provides a scoped timer for measuring execution time of
//! chain operations such as sealing and compaction.

use std::time::{Duration, Instant};
use log::{debug, warn};

/// Timer for measuring execution time
#[derive(Debug, Clone)]
pub struct Timer {
    /// Name of the timer
    name: String,

    /// Start time
    start: Instant,

    /// Optional warning threshold
    warning_threshold: Option<Duration>,

    /// Whether to log automatically on drop
    log_on_drop: bool,
}

impl Timer {
    /// Create a new timer with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Timer {
            name: name.into(),
            start: Instant::now(),
            warning_threshold: None,
            log_on_drop: true,
        }
    }

    /// Set a warning threshold for the timer
    pub fn with_warning_threshold(mut self, threshold: Duration) -> Self {
        self.warning_threshold = Some(threshold);
        self
    }

    /// Disable automatic logging on drop
    pub fn without_auto_log(mut self) -> Self {
        self.log_on_drop = false;
        self
    }

    /// Get the elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Check if the timer has exceeded the warning threshold
    pub fn has_warning(&self) -> bool {
        match self.warning_threshold {
            Some(threshold) => self.elapsed() >= threshold,
            None => false,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if !self.log_on_drop {
            return;
        }

        if self.has_warning() {
            warn!("{} took {}ms", self.name, self.elapsed_ms());
        } else {
            debug!("{} took {}ms", self.name, self.elapsed_ms());
        }
    }
}
