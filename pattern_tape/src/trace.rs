// Copyright 2026 the Pattern Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing hooks for the matcher.
//!
//! Tracing is optional and `no_std` friendly. The matcher only emits events
//! requested by a [`TraceMask`]; with [`TraceMask::NONE`] the hooks cost a
//! branch per dispatch.

use crate::program::Pattern;
use crate::vm::MatchError;

/// A set of trace events requested by a [`TraceSink`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TraceMask(u32);

impl core::ops::BitOr for TraceMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for TraceMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl TraceMask {
    /// No tracing.
    pub const NONE: Self = Self(0);
    /// Emit [`TraceEvent::RunStart`] and [`TraceEvent::RunEnd`].
    pub const RUN: Self = Self(1 << 0);
    /// Emit [`TraceEvent::Instr`] for each dispatched instruction.
    pub const INSTR: Self = Self(1 << 1);
    /// Emit [`TraceEvent::Backtrack`] each time a failure resumes at a
    /// choice point.
    pub const FAIL: Self = Self(1 << 2);
    /// Emit [`TraceEvent::MatchTime`] for each match-time host call.
    pub const HOST: Self = Self(1 << 3);

    /// Returns `true` if this mask includes all bits in `other`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

/// A trace event emitted by the matcher.
#[derive(Clone, Debug)]
pub enum TraceEvent<'a> {
    /// Start of a match run.
    RunStart {
        /// Starting subject offset.
        at: usize,
        /// Subject length in bytes.
        subject_len: usize,
    },
    /// A single dispatched instruction.
    Instr {
        /// Instruction word index.
        pc: usize,
        /// Current subject offset.
        pos: usize,
        /// Opcode byte.
        opcode: u8,
    },
    /// A failure resumed at a choice point.
    Backtrack {
        /// Instruction word index execution resumes at.
        pc: usize,
        /// Subject offset restored by the choice point.
        pos: usize,
    },
    /// A match-time host call.
    MatchTime {
        /// Group capture identity handed to the host.
        idx: u16,
        /// Subject offset at the call.
        pos: usize,
    },
    /// End of a match run.
    RunEnd {
        /// Run outcome.
        outcome: TraceOutcome<'a>,
    },
}

/// Run outcome for tracing.
#[derive(Clone, Debug)]
pub enum TraceOutcome<'a> {
    /// Matched, ending at the given subject offset.
    Matched(usize),
    /// The pattern did not match.
    NoMatch,
    /// The run aborted with a fatal error.
    Error(&'a MatchError),
}

/// A trace sink that can receive matcher events.
pub trait TraceSink {
    /// Returns the set of events the sink wants.
    fn mask(&self) -> TraceMask {
        TraceMask::NONE
    }

    /// Receives a trace event.
    fn event(&mut self, pattern: &Pattern, event: TraceEvent<'_>);
}

#[cfg(test)]
mod tests {
    use super::TraceMask;

    #[test]
    fn mask_contains() {
        let m = TraceMask::RUN | TraceMask::FAIL;
        assert!(m.contains(TraceMask::RUN));
        assert!(m.contains(TraceMask::FAIL));
        assert!(m.contains(TraceMask::NONE));
        assert!(!m.contains(TraceMask::INSTR));
        assert!(!TraceMask::NONE.contains(m));
    }
}
