// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-worker slot state and the handoff protocol.
//!
//! Each worker owns a ready queue (filled by the scheduler), an output
//! buffer (reactions it triggered), and a done buffer (reactions it
//! completed). While `is_idle` reads 1 the worker is parked and only the
//! scheduler touches those queues, so their mutexes stay uncontended; the
//! per-slot mutex proper only guards `should_stop` and the condvar.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::sync::Arc;

use reflow_core::Reaction;

use crate::queue::ReadyQueue;

const BUSY: usize = 0;
const IDLE: usize = 1;

/// State guarded by the slot mutex.
struct SlotState {
    should_stop: bool,
}

/// Everything the scheduler tracks about one worker thread.
pub(crate) struct WorkerSlot {
    /// Reactions assigned to this worker and not yet taken. Also read by
    /// the neighboring worker when it steals.
    pub ready: Mutex<ReadyQueue>,
    /// Reactions this worker triggered while executing. Drained into the
    /// global reaction queue once the worker is idle.
    pub output: Mutex<Vec<Arc<Reaction>>>,
    /// Reactions this worker finished. Drained out of the executing set
    /// once the worker is idle.
    pub done: Mutex<Vec<Arc<Reaction>>>,
    is_idle: AtomicUsize,
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl WorkerSlot {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            ready: Mutex::new(ReadyQueue::with_capacity(queue_capacity)),
            output: Mutex::new(Vec::with_capacity(queue_capacity)),
            done: Mutex::new(Vec::with_capacity(queue_capacity)),
            is_idle: AtomicUsize::new(BUSY),
            state: Mutex::new(SlotState { should_stop: false }),
            cond: Condvar::new(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.is_idle.load(Ordering::Acquire) == IDLE
    }

    /// CAS busy -> idle. Returns false if the slot was already idle.
    pub fn try_set_idle(&self) -> bool {
        self.is_idle
            .compare_exchange(BUSY, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// CAS idle -> busy. Returns false if the slot was already busy.
    pub fn try_set_busy(&self) -> bool {
        self.is_idle
            .compare_exchange(IDLE, BUSY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn should_stop(&self) -> bool {
        self.state.lock().unwrap().should_stop
    }

    /// Mark the worker for termination and wake it if it is parked.
    pub fn signal_stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.should_stop = true;
        self.cond.notify_one();
    }

    /// Wake the worker after assigning it work.
    pub fn notify(&self) {
        let _state = self.state.lock().unwrap();
        self.cond.notify_one();
    }

    /// Block until the scheduler signals this slot. Returns immediately if
    /// the worker should stop or if work is already waiting — a notify that
    /// fires between the caller's idle CAS and this wait would otherwise be
    /// lost, leaving an assigned-but-parked worker. The caller re-checks
    /// both conditions after return.
    pub fn park(&self) {
        let state = self.state.lock().unwrap();
        if state.should_stop {
            return;
        }
        if !self.ready.lock().unwrap().is_empty() {
            // The notify already happened; claim its idle->busy flip too.
            let _ = self.try_set_busy();
            return;
        }
        let _state = self.cond.wait(state).unwrap();
    }
}
