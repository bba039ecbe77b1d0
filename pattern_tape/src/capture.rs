// Copyright 2026 the Pattern Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Capture records.
//!
//! The matcher appends [`Capture`]s as it advances; the resulting list is a
//! flat pre-order encoding of the capture tree, materialized into user values
//! by a post-processing step outside this crate. The matcher itself only
//! branches on [`CapKind::Close`], [`CapKind::Group`], and
//! [`CapKind::Runtime`]; every other kind is payload for the post-processor.

/// What a capture record means to the post-processor.
///
/// Nibble values are part of the instruction encoding and are stable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CapKind {
    /// Closes the nearest open capture.
    Close = 0,
    /// A bare subject position.
    Position = 1,
    /// A constant from the host environment.
    Const = 2,
    /// A back-reference to a named group.
    Backref = 3,
    /// A match-call argument.
    Arg = 4,
    /// The matched substring.
    Simple = 5,
    /// A list of nested values.
    Table = 6,
    /// Nested values passed through a host function.
    Function = 7,
    /// A lookup of the match in a host table.
    Query = 8,
    /// A string built from the match.
    String = 9,
    /// A numbered selection of nested values.
    Num = 10,
    /// A substitution capture.
    Subst = 11,
    /// A fold over nested values.
    Fold = 12,
    /// A value produced at match time by the host.
    Runtime = 13,
    /// A named (or anonymous) group of nested captures.
    Group = 14,
}

impl CapKind {
    /// Parses a kind from the low nibble of an instruction `aux` byte.
    #[must_use]
    pub const fn from_nibble(n: u8) -> Option<Self> {
        Some(match n {
            0 => Self::Close,
            1 => Self::Position,
            2 => Self::Const,
            3 => Self::Backref,
            4 => Self::Arg,
            5 => Self::Simple,
            6 => Self::Table,
            7 => Self::Function,
            8 => Self::Query,
            9 => Self::String,
            10 => Self::Num,
            11 => Self::Subst,
            12 => Self::Fold,
            13 => Self::Runtime,
            14 => Self::Group,
            _ => return None,
        })
    }
}

/// One capture record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capture {
    /// Subject byte offset where the capture opens (or, for the final
    /// success marker, [`Capture::NO_POS`]).
    pub pos: usize,
    /// Capture identity; for [`CapKind::Runtime`] records, the index of the
    /// produced value in the match's dynamic-value list.
    pub idx: u16,
    /// Record kind.
    pub kind: CapKind,
    /// `0` while the capture is open; otherwise one more than the number of
    /// subject bytes a closed/full capture spans.
    pub siz: u8,
}

impl Capture {
    /// Position marker for the trailing close record of a successful match.
    pub const NO_POS: usize = usize::MAX;

    /// Returns `true` while this capture is still open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.siz == 0
    }
}

/// Finds the innermost open capture in `caps`, skipping over balanced
/// closed children, and returns its index.
#[must_use]
pub fn find_open(caps: &[Capture]) -> Option<usize> {
    let mut closed = 0usize;
    for (i, c) in caps.iter().enumerate().rev() {
        if c.kind == CapKind::Close {
            closed += 1;
        } else if c.is_open() {
            if closed == 0 {
                return Some(i);
            }
            closed -= 1;
        }
    }
    None
}

/// Returns the dynamic-value index of the first [`CapKind::Runtime`] record
/// in `caps`, if any.
#[must_use]
pub fn first_dynamic(caps: &[Capture]) -> Option<usize> {
    caps.iter()
        .find(|c| c.kind == CapKind::Runtime)
        .map(|c| c.idx as usize)
}
