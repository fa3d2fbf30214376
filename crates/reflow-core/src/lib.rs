// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Shared vocabulary for the reflow reactor runtime.
//!
//! This crate defines the types the scheduler and the embedding runtime
//! agree on: composite priority keys, dependency-chain masks, the reaction
//! record with its per-tag state machine, and logical-time tags.

pub mod chain;
pub mod key;
pub mod reaction;
pub mod tag;

pub use chain::ChainMask;
pub use key::ReactionKey;
pub use reaction::{Reaction, ReactionState};
pub use tag::Tag;
