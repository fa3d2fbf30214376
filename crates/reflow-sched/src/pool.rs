// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Worker-thread harness.
//!
//! The scheduler itself only hands out work; something still has to run
//! the worker threads. `WorkerPool` spawns one named thread per worker
//! slot, each pulling reactions until the scheduler reports the stop tag,
//! executing them through a caller-supplied executor. The executor is
//! where the embedding runtime runs reaction bodies and feeds downstream
//! triggers back in via [`Scheduler::trigger_reaction`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::trace;

use reflow_core::Reaction;

use crate::error::SchedError;
use crate::sched::Scheduler;

/// Handle over the spawned worker threads.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn one worker thread per scheduler slot. Each runs until
    /// [`Scheduler::get_ready_reaction`] returns None.
    pub fn launch<F>(scheduler: Arc<Scheduler>, executor: F) -> Result<Self, SchedError>
    where
        F: Fn(usize, &Arc<Reaction>) + Send + Sync + 'static,
    {
        let executor = Arc::new(executor);
        let mut handles = Vec::with_capacity(scheduler.worker_count());
        for id in 0..scheduler.worker_count() {
            let scheduler = Arc::clone(&scheduler);
            let executor = Arc::clone(&executor);
            let handle = thread::Builder::new()
                .name(format!("reflow-worker-{}", id))
                .spawn(move || worker_loop(id, &scheduler, executor.as_ref()))
                .map_err(SchedError::Spawn)?;
            handles.push(handle);
        }
        Ok(Self { handles })
    }

    /// Wait for every worker thread to exit.
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop<F>(id: usize, scheduler: &Scheduler, executor: &F)
where
    F: Fn(usize, &Arc<Reaction>),
{
    while let Some(reaction) = scheduler.get_ready_reaction(id) {
        trace!("worker {}: executing {}", id, reaction.name());
        executor(id, &reaction);
        scheduler.done_with_reaction(id, &reaction);
    }
    trace!("worker {}: stopping", id);
}
