// Copyright 2026 the Pattern Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Validated instruction streams.
//!
//! A [`Pattern`] is an instruction stream that passed structural validation:
//! every word decodes, every operand slot is present, every control-flow
//! target lands on an instruction boundary inside the stream, and the stream
//! ends in `End` or `GiveUp`. The matcher executes [`Pattern`]s only; it
//! still guards its own fetches at runtime, but validation makes those guards
//! unreachable for streams built through this constructor.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::bytecode::Word;
use crate::opcode::Opcode;

/// A structural defect found while validating an instruction stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PatternError {
    /// The stream is empty.
    Empty,
    /// The word at `pc` does not decode to an opcode.
    BadOpcode {
        /// Offending word index.
        pc: usize,
    },
    /// The instruction at `pc` runs past the end of the stream.
    Truncated {
        /// Offending word index.
        pc: usize,
    },
    /// The instruction at `pc` jumps outside the stream.
    TargetOutOfRange {
        /// Offending word index.
        pc: usize,
    },
    /// The instruction at `pc` jumps into the middle of another instruction.
    TargetNotAligned {
        /// Offending word index.
        pc: usize,
    },
    /// The capture instruction at `pc` carries an undecodable kind nibble.
    BadCaptureKind {
        /// Offending word index.
        pc: usize,
    },
    /// The stream does not end in `End` or `GiveUp`.
    MissingEnd,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty instruction stream"),
            Self::BadOpcode { pc } => write!(f, "invalid opcode at word {pc}"),
            Self::Truncated { pc } => write!(f, "truncated instruction at word {pc}"),
            Self::TargetOutOfRange { pc } => {
                write!(f, "jump target out of range at word {pc}")
            }
            Self::TargetNotAligned { pc } => {
                write!(f, "jump target inside an instruction at word {pc}")
            }
            Self::BadCaptureKind { pc } => {
                write!(f, "invalid capture kind at word {pc}")
            }
            Self::MissingEnd => write!(f, "stream does not end in End or GiveUp"),
        }
    }
}

impl core::error::Error for PatternError {}

/// A validated instruction stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    code: Vec<Word>,
}

impl Pattern {
    /// Validates `code` and wraps it as a [`Pattern`].
    pub fn from_words(code: Vec<Word>) -> Result<Self, PatternError> {
        if code.is_empty() {
            return Err(PatternError::Empty);
        }
        let len = code.len();

        // First pass: decode, check operand slots, record boundaries.
        let mut boundary = vec![false; len];
        let mut pc = 0;
        let mut last = Opcode::Empty;
        while pc < len {
            let op = code[pc].opcode().ok_or(PatternError::BadOpcode { pc })?;
            boundary[pc] = true;
            let size = op.words();
            if pc + size > len {
                return Err(PatternError::Truncated { pc });
            }
            if op.is_capture() && code[pc].cap_kind().is_none() {
                return Err(PatternError::BadCaptureKind { pc });
            }
            last = op;
            pc += size;
        }
        if !matches!(last, Opcode::End | Opcode::GiveUp) {
            return Err(PatternError::MissingEnd);
        }

        // Second pass: control-flow targets must land on boundaries.
        let mut pc = 0;
        while pc < len {
            let op = match code[pc].opcode() {
                Some(op) => op,
                None => break,
            };
            if op.offset_is_target() {
                let target = pc as i64 + i64::from(code[pc + 1].as_offset());
                if target < 0 || target >= len as i64 {
                    return Err(PatternError::TargetOutOfRange { pc });
                }
                if !boundary[target as usize] {
                    return Err(PatternError::TargetNotAligned { pc });
                }
            }
            pc += op.words();
        }

        Ok(Self { code })
    }

    /// The underlying instruction words.
    #[must_use]
    pub fn code(&self) -> &[Word] {
        &self.code
    }

    /// Stream length in words.
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Returns `true` for an empty stream (never constructible via
    /// [`Pattern::from_words`]).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Charset;

    fn inst(op: Opcode) -> Word {
        Word::inst(op, 0, 0)
    }

    #[test]
    fn accepts_minimal_stream() {
        let p = Pattern::from_words(vec![inst(Opcode::End)]).unwrap();
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(Pattern::from_words(vec![]), Err(PatternError::Empty));
    }

    #[test]
    fn rejects_bad_opcode() {
        let code = vec![Word::raw(0xFF), inst(Opcode::End)];
        assert_eq!(
            Pattern::from_words(code),
            Err(PatternError::BadOpcode { pc: 0 })
        );
    }

    #[test]
    fn rejects_truncated_charset() {
        let code = vec![inst(Opcode::Set), Word::raw(0)];
        assert_eq!(
            Pattern::from_words(code),
            Err(PatternError::Truncated { pc: 0 })
        );
    }

    #[test]
    fn rejects_jump_out_of_range() {
        let code = vec![inst(Opcode::Jmp), Word::offset(7), inst(Opcode::End)];
        assert_eq!(
            Pattern::from_words(code),
            Err(PatternError::TargetOutOfRange { pc: 0 })
        );
    }

    #[test]
    fn rejects_jump_into_operand_slot() {
        // Choice's offset operand sits at word 1; jumping there is malformed.
        let code = vec![
            inst(Opcode::Jmp),
            Word::offset(3),
            inst(Opcode::Choice),
            Word::offset(2),
            inst(Opcode::End),
        ];
        assert_eq!(
            Pattern::from_words(code),
            Err(PatternError::TargetNotAligned { pc: 0 })
        );
    }

    #[test]
    fn rejects_missing_end() {
        let code = vec![inst(Opcode::Any)];
        assert_eq!(Pattern::from_words(code), Err(PatternError::MissingEnd));
    }

    #[test]
    fn utf_range_offset_is_not_a_target() {
        // The low bound of a codepoint range may be any value.
        let code = vec![
            Word::inst(Opcode::UtfRange, 0xFF, 0x10),
            Word::offset(0x80),
            inst(Opcode::End),
        ];
        assert!(Pattern::from_words(code).is_ok());
    }

    #[test]
    fn accepts_charset_instruction() {
        let cs = Charset::from_bytes(b"0123456789");
        let mut code = vec![inst(Opcode::Span)];
        code.extend(cs.words());
        code.push(inst(Opcode::End));
        assert!(Pattern::from_words(code).is_ok());
    }
}
