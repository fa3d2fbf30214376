// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Reaction records and the per-tag state machine.
//!
//! A reaction cycles through inactive -> queued -> running -> inactive
//! within a tag. Every transition is a compare-and-swap so triggering can
//! stay off the global lock while keeping at-most-once-per-tag semantics.

use std::fmt;
use std::sync::atomic::{AtomicIsize, AtomicU8, Ordering};
use std::sync::Arc;

use crate::chain::ChainMask;
use crate::key::ReactionKey;

/// Per-tag lifecycle states of a reaction.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionState {
    /// Not triggered at the current tag.
    Inactive = 0,
    /// Triggered and waiting on the reaction queue or a worker's ready queue.
    Queued = 1,
    /// Handed to a worker and not yet reported done.
    Running = 2,
}

impl ReactionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Inactive,
            1 => Self::Queued,
            _ => Self::Running,
        }
    }
}

/// Sentinel affinity for triggers that did not come from a worker thread.
const ANONYMOUS: isize = -1;

/// A schedulable unit of computation at a tag.
///
/// The scheduler holds `Arc` clones of reactions and treats them as opaque
/// beyond the fields here; bodies live with the embedding runtime. Identity
/// is pointer identity (`Arc::ptr_eq`).
pub struct Reaction {
    key: ReactionKey,
    chain: ChainMask,
    /// Diagnostic name, used only in log output and panics.
    name: String,
    status: AtomicU8,
    /// Preferred worker, set at trigger time. -1 when anonymous.
    worker_affinity: AtomicIsize,
}

impl Reaction {
    pub fn new(name: impl Into<String>, key: ReactionKey, chain: ChainMask) -> Arc<Self> {
        Arc::new(Self {
            key,
            chain,
            name: name.into(),
            status: AtomicU8::new(ReactionState::Inactive as u8),
            worker_affinity: AtomicIsize::new(ANONYMOUS),
        })
    }

    pub fn key(&self) -> ReactionKey {
        self.key
    }

    pub fn chain(&self) -> ChainMask {
        self.chain
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ReactionState {
        ReactionState::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Attempt the `from -> to` state transition. Returns false if the
    /// current state was not `from`; the state is then left untouched.
    pub fn try_transition(&self, from: ReactionState, to: ReactionState) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record the worker that triggered this reaction.
    pub fn set_affinity(&self, worker: usize) {
        self.worker_affinity.store(worker as isize, Ordering::Release);
    }

    /// The preferred worker, or None for an anonymous trigger.
    pub fn affinity(&self) -> Option<usize> {
        match self.worker_affinity.load(Ordering::Acquire) {
            ANONYMOUS => None,
            worker => Some(worker as usize),
        }
    }

    /// True if `self` must observably complete before `other` may start:
    /// a strictly lower level on an overlapping chain.
    pub fn has_precedence_over(&self, other: &Reaction) -> bool {
        self.key.level() < other.key.level() && self.chain.overlaps(other.chain)
    }
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("chain", &self.chain)
            .field("state", &self.state())
            .finish()
    }
}
