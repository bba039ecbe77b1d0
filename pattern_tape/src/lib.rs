// Copyright 2026 the Pattern Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `pattern_tape`: a backtracking virtual machine for parsing expression
//! grammars (PEGs).
//!
//! The engine executes a precompiled instruction stream ([`program::Pattern`])
//! against a byte subject, producing either no match or the end position of
//! the matched prefix together with an ordered capture list and any values
//! produced by match-time captures. It supports ordered choice with
//! backtracking, rule calls, bounded left recursion (seed-and-grow), UTF-8
//! codepoint ranges, character-class sets, and match-time captures that
//! delegate to an embedder-provided [`host::Host`].
//!
//! Compiling PEG syntax down to instruction streams and folding the capture
//! list into user values are left to embedders; [`asm::Asm`] is the supported
//! way to hand the engine finished streams.
//!
//! ## Example
//!
//! ```no_run
//! use pattern_tape::asm::Asm;
//! use pattern_tape::bytecode::Charset;
//! use pattern_tape::host::RejectAll;
//! use pattern_tape::trace::TraceMask;
//! use pattern_tape::vm::{Limits, Matcher};
//!
//! // [0-9]+
//! let digits = Charset::from_bytes(b"0123456789");
//! let mut a = Asm::new();
//! a.set(&digits);
//! a.span(&digits);
//! a.end();
//! let pattern = a.finish()?;
//!
//! let mut m = Matcher::new(RejectAll, Limits::default());
//! let hit = m.run(&pattern, b"42x", 0, TraceMask::NONE, None)?;
//! assert_eq!(hit.map(|m| m.end), Some(2));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![no_std]

extern crate alloc;

pub mod asm;
pub mod bytecode;
pub mod capture;
pub mod host;
pub mod opcode;
pub mod program;
pub mod trace;
pub mod vm;
