// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Partitioned EDF non-preemptive reaction scheduler.
//!
//! At each tag the scheduler hands eligible reactions to worker threads,
//! honoring precedence (lower level on an overlapping chain runs first),
//! advances logical time when the tag is exhausted, and stops once the
//! tag-advance collaborator reports the stop tag.
//!
//! Components:
//! - `sched`   — dispatch, queue synchronization, worker pull API
//! - `advance` — the tag-advance collaborator trait
//! - `pool`    — worker-thread harness for embedding
//! - `config`  — worker count and queue sizing
//! - `error`   — construction and launch errors

pub mod advance;
pub mod config;
pub mod error;
pub mod pool;
pub mod sched;

mod queue;
mod worker;

pub use advance::{TagAdvance, TagAdvancer};
pub use config::SchedConfig;
pub use error::SchedError;
pub use pool::WorkerPool;
pub use sched::Scheduler;
