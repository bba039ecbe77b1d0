// Copyright 2026 the Pattern Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Instruction-stream builder ("assembler").
//!
//! This is a small, public helper for constructing [`Pattern`]s without
//! manually computing word offsets. Control-flow operands are expressed as
//! [`Label`]s, placed with [`Asm::place`] and resolved by [`Asm::finish`],
//! which also runs stream validation.
//!
//! The PEG-to-bytecode compiler itself lives outside this crate; the
//! assembler is how embedders and tests hand it finished streams.

use alloc::vec::Vec;
use core::fmt;

use crate::bytecode::{Charset, Word};
use crate::capture::CapKind;
use crate::opcode::Opcode;
use crate::program::{Pattern, PatternError};

/// A label for control-flow targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// An assembler error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AsmError {
    /// A label was referenced but never placed.
    UnresolvedLabel,
    /// The assembled stream failed validation.
    Invalid(PatternError),
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedLabel => write!(f, "label was referenced but never placed"),
            Self::Invalid(e) => write!(f, "invalid instruction stream: {e}"),
        }
    }
}

impl core::error::Error for AsmError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Invalid(e) => Some(e),
            Self::UnresolvedLabel => None,
        }
    }
}

impl From<PatternError> for AsmError {
    fn from(e: PatternError) -> Self {
        Self::Invalid(e)
    }
}

#[derive(Copy, Clone, Debug)]
struct Fixup {
    /// Word index of the offset slot to patch.
    slot: usize,
    /// Word index of the instruction the offset is relative to.
    from: usize,
    label: Label,
}

/// Instruction-stream builder.
#[derive(Clone, Debug, Default)]
pub struct Asm {
    code: Vec<Word>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl Asm {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stream position in words.
    #[must_use]
    pub fn pc(&self) -> usize {
        self.code.len()
    }

    /// Creates a fresh, unplaced label.
    pub fn label(&mut self) -> Label {
        let l = Label(u32::try_from(self.labels.len()).unwrap_or(u32::MAX));
        self.labels.push(None);
        l
    }

    /// Places `label` at the current stream position.
    pub fn place(&mut self, label: Label) {
        self.labels[label.0 as usize] = Some(self.code.len());
    }

    fn emit(&mut self, op: Opcode, aux: u8, key: u16) {
        self.code.push(Word::inst(op, aux, key));
    }

    fn emit_jump(&mut self, op: Opcode, aux: u8, key: u16, target: Label) {
        let from = self.code.len();
        self.emit(op, aux, key);
        self.fixups.push(Fixup {
            slot: self.code.len(),
            from,
            label: target,
        });
        self.code.push(Word::offset(0));
    }

    /// `Any`: consume one byte.
    pub fn any(&mut self) {
        self.emit(Opcode::Any, 0, 0);
    }

    /// `Char`: consume the byte `c`.
    pub fn char(&mut self, c: u8) {
        self.emit(Opcode::Char, c, 0);
    }

    /// `Set`: consume one byte in `cs`.
    pub fn set(&mut self, cs: &Charset) {
        self.emit(Opcode::Set, 0, 0);
        self.code.extend(cs.words());
    }

    /// `Span`: consume the longest run of bytes in `cs`.
    pub fn span(&mut self, cs: &Charset) {
        self.emit(Opcode::Span, 0, 0);
        self.code.extend(cs.words());
    }

    /// `TestAny`: jump to `on_fail` at end of subject, without a choice point.
    pub fn test_any(&mut self, on_fail: Label) {
        self.emit_jump(Opcode::TestAny, 0, 0, on_fail);
    }

    /// `TestChar`: jump to `on_fail` unless the next byte is `c`.
    pub fn test_char(&mut self, c: u8, on_fail: Label) {
        self.emit_jump(Opcode::TestChar, c, 0, on_fail);
    }

    /// `TestSet`: jump to `on_fail` unless the next byte is in `cs`.
    pub fn test_set(&mut self, cs: &Charset, on_fail: Label) {
        self.emit_jump(Opcode::TestSet, 0, 0, on_fail);
        self.code.extend(cs.words());
    }

    /// `UtfRange`: consume one UTF-8 sequence with codepoint in `[from, to]`.
    pub fn utf_range(&mut self, from: u32, to: u32) {
        let aux = (to & 0xFF) as u8;
        let key = ((to >> 8) & 0xFFFF) as u16;
        self.emit(Opcode::UtfRange, aux, key);
        self.code.push(Word::offset(from as i32));
    }

    /// `Behind`: move the cursor back `n` bytes.
    pub fn behind(&mut self, n: u8) {
        self.emit(Opcode::Behind, n, 0);
    }

    /// `Ret`: return from a rule.
    pub fn ret(&mut self) {
        self.emit(Opcode::Ret, 0, 0);
    }

    /// `End`: successful match.
    pub fn end(&mut self) {
        self.emit(Opcode::End, 0, 0);
    }

    /// `Choice`: push a choice point resuming at `on_fail`.
    pub fn choice(&mut self, on_fail: Label) {
        self.emit_jump(Opcode::Choice, 0, 0, on_fail);
    }

    /// `Jmp`: unconditional jump.
    pub fn jmp(&mut self, target: Label) {
        self.emit_jump(Opcode::Jmp, 0, 0, target);
    }

    /// `Call`: ordinary rule call.
    pub fn call(&mut self, rule: Label) {
        self.emit_jump(Opcode::Call, 0, 0, rule);
    }

    /// `Call` at precedence `k > 0`: a left-recursive call.
    pub fn call_prec(&mut self, rule: Label, k: u8) {
        self.emit_jump(Opcode::Call, k, 0, rule);
    }

    /// `Commit`: pop the top choice point and jump.
    pub fn commit(&mut self, target: Label) {
        self.emit_jump(Opcode::Commit, 0, 0, target);
    }

    /// `PartialCommit`: refresh the top choice point and jump.
    pub fn partial_commit(&mut self, target: Label) {
        self.emit_jump(Opcode::PartialCommit, 0, 0, target);
    }

    /// `BackCommit`: pop the top choice point, restore its state, and jump.
    pub fn back_commit(&mut self, target: Label) {
        self.emit_jump(Opcode::BackCommit, 0, 0, target);
    }

    /// `FailTwice`: pop one choice point, then fail.
    pub fn fail_twice(&mut self) {
        self.emit(Opcode::FailTwice, 0, 0);
    }

    /// `Fail`: backtrack.
    pub fn fail(&mut self) {
        self.emit(Opcode::Fail, 0, 0);
    }

    /// `GiveUp`: overall failure sentinel.
    pub fn give_up(&mut self) {
        self.emit(Opcode::GiveUp, 0, 0);
    }

    /// `OpenCapture`: open a capture of `kind` with identity `key`.
    pub fn open_capture(&mut self, kind: CapKind, key: u16) {
        self.emit(Opcode::OpenCapture, kind as u8, key);
    }

    /// `CloseCapture`: close the most recent open capture.
    pub fn close_capture(&mut self, kind: CapKind, key: u16) {
        self.emit(Opcode::CloseCapture, kind as u8, key);
    }

    /// `FullCapture`: capture the last `off` bytes (`off < 16`).
    pub fn full_capture(&mut self, kind: CapKind, off: u8, key: u16) {
        self.emit(Opcode::FullCapture, (off << 4) | kind as u8, key);
    }

    /// `CloseRunTime`: close a group by calling the match-time host.
    pub fn close_run_time(&mut self) {
        self.emit(Opcode::CloseRunTime, CapKind::Close as u8, 0);
    }

    /// `Empty`: one-word padding.
    pub fn empty(&mut self) {
        self.emit(Opcode::Empty, 0, 0);
    }

    /// Resolves labels and validates the stream into a [`Pattern`].
    pub fn finish(mut self) -> Result<Pattern, AsmError> {
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0 as usize].ok_or(AsmError::UnresolvedLabel)?;
            let off = target as i64 - fixup.from as i64;
            self.code[fixup.slot] = Word::offset(off as i32);
        }
        Ok(Pattern::from_words(self.code)?)
    }
}
