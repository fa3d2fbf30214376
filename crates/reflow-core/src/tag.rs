// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Logical-time tags.
//!
//! A tag is a point on the logical timeline: a time value plus a
//! microstep for superdense ordering at the same time. The scheduler only
//! reports tags; moving between them belongs to the embedding runtime.

/// A discrete point in logical time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    /// Logical time in nanoseconds since the runtime's origin.
    pub time: i64,
    /// Superdense index within the same logical time.
    pub microstep: u32,
}

impl Tag {
    /// Start of the logical timeline.
    pub const ORIGIN: Tag = Tag { time: 0, microstep: 0 };

    /// A tag after every reachable tag.
    pub const FOREVER: Tag = Tag {
        time: i64::MAX,
        microstep: u32::MAX,
    };

    /// The tag at `time` with microstep zero.
    pub fn at(time: i64) -> Self {
        Self { time, microstep: 0 }
    }

    /// The next microstep at the same logical time.
    pub fn next_microstep(self) -> Self {
        Self {
            time: self.time,
            microstep: self.microstep + 1,
        }
    }
}
