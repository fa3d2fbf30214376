// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler configuration.

use std::thread;

/// Initial capacity of the reaction queue and each worker's ready queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Tuning knobs for [`crate::Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedConfig {
    /// Number of worker threads the scheduler manages. Fixed for the
    /// lifetime of the scheduler; must be at least one.
    pub workers: usize,
    /// Initial capacity hint for the reaction queues.
    pub queue_capacity: usize,
}

impl SchedConfig {
    /// A configuration with an explicit worker count.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_workers() {
        assert!(SchedConfig::default().workers >= 1);
    }

    #[test]
    fn with_workers_overrides_count() {
        let config = SchedConfig::with_workers(3);
        assert_eq!(config.workers, 3);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }
}
