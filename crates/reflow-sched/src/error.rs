// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler construction and launch errors.
//!
//! Only setup is recoverable. A reaction observed in an impossible state
//! at a CAS point is an invariant violation and panics with a diagnostic;
//! the process is the unit of failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedError {
    /// The configuration asked for zero worker threads.
    #[error("scheduler needs at least one worker thread")]
    NoWorkers,

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread")]
    Spawn(#[source] std::io::Error),
}
