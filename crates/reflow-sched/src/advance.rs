// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The tag-advance collaborator.
//!
//! Moving logical time forward belongs to the embedding runtime: it knows
//! the event queue and the stop tag. The scheduler calls `advance_tag`
//! while holding its global lock, only once the current tag is exhausted
//! (no queued, executing, or in-flight reactions anywhere).

use std::sync::Arc;

use reflow_core::{Reaction, Tag};

/// Outcome of one attempt to move logical time forward.
pub enum TagAdvance {
    /// Logical time moved to `tag`; `reactions` are the reactions
    /// triggered at it. The scheduler enqueues them with the same
    /// at-most-once CAS as any other trigger.
    Advanced {
        tag: Tag,
        reactions: Vec<Arc<Reaction>>,
    },
    /// The stop tag has been reached; workers should wind down.
    Stop,
}

/// Embedding-runtime hook that owns the logical timeline.
pub trait TagAdvancer: Send + Sync {
    /// Advance to the next tag, or report that the stop tag was reached.
    ///
    /// Called with the scheduler's global lock held; implementations must
    /// not call back into the scheduler.
    fn advance_tag(&self) -> TagAdvance;
}
