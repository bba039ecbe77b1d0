// Copyright 2026 the Pattern Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The matching engine.
//!
//! [`Matcher`] executes a [`Pattern`] against a byte subject, producing
//! either no match, a fatal [`MatchError`], or the end position together
//! with the capture list and any match-time values.
//!
//! The engine is a backtracking VM: `Choice` pushes a resume point,
//! failures unwind to the most recent one, and rule calls push return
//! frames on the same stack. Left-recursive calls (a `Call` with a nonzero
//! precedence) are handled with seed-and-grow: the first invocation at a
//! subject position runs with a failed seed memoized, and each completed
//! iteration that advances further than the last becomes the new seed until
//! no progress is made.

use alloc::vec::Vec;
use core::fmt;
use core::mem;

use hashbrown::HashMap;

use crate::bytecode::{charset_contains, Word, CHARSET_INST_SIZE};
use crate::capture::{find_open, first_dynamic, CapKind, Capture};
use crate::host::{Host, MatchTimeView, Reply, Value};
use crate::opcode::Opcode;
use crate::program::Pattern;
use crate::trace::{TraceEvent, TraceMask, TraceOutcome, TraceSink};

/// Initial backtrack-stack capacity, in frames.
pub const INIT_BACK: usize = 64;
/// Default backtrack-stack limit, in frames.
pub const MAX_BACK: usize = 400;
/// Initial capture-buffer capacity, in records.
pub const INIT_CAP_SIZE: usize = 32;
/// Initial capture-snapshot stack capacity, in levels.
pub const INIT_CAP_STACK_SIZE: usize = 8;

/// Execution limits for a match run.
#[derive(Clone, Debug)]
pub struct Limits {
    /// Maximum backtrack-stack depth (choice points, pending calls, and
    /// active left recursions combined).
    pub max_backtrack: usize,
    /// Maximum capture records.
    pub max_captures: usize,
    /// Maximum saved capture levels (left-recursion nesting).
    pub max_capture_lists: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_backtrack: MAX_BACK,
            max_captures: u32::MAX as usize,
            max_capture_lists: u32::MAX as usize,
        }
    }
}

/// A fatal matching error.
///
/// Ordinary match failure is not an error; it is the `Ok(None)` return of
/// [`Matcher::run`]. Everything here aborts the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchError {
    /// The starting offset lies past the subject end.
    StartOutOfRange {
        /// Requested starting offset.
        at: usize,
        /// Subject length.
        len: usize,
    },
    /// Execution escaped the instruction stream, or the matcher state became
    /// inconsistent with it (malformed pattern).
    InvalidPc,
    /// `FailTwice` popped a frame that was not a plain choice point.
    FailTwice,
    /// `CloseRunTime` executed with no open group capture.
    MissingOpenGroup,
    /// The backtrack stack exceeded its configured limit.
    BacktrackOverflow {
        /// The configured limit.
        limit: usize,
    },
    /// The capture buffer exceeded its configured limit.
    TooManyCaptures,
    /// The capture-snapshot stack exceeded its configured limit.
    TooManyCaptureLists,
    /// A match-time capture produced more values than the capture index
    /// space can address.
    TooManyResults,
    /// A match-time capture relocated the cursor outside
    /// `[current position, subject end]`.
    BadPosition {
        /// The offending offset.
        pos: usize,
        /// The cursor position at the call.
        curr: usize,
        /// The subject end.
        limit: usize,
    },
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartOutOfRange { at, len } => {
                write!(f, "start offset {at} past subject end {len}")
            }
            Self::InvalidPc => write!(f, "invalid pc"),
            Self::FailTwice => write!(f, "fail-twice popped a non-choice frame"),
            Self::MissingOpenGroup => write!(f, "no open group capture"),
            Self::BacktrackOverflow { limit } => {
                write!(f, "backtrack stack overflow (current limit is {limit})")
            }
            Self::TooManyCaptures => write!(f, "too many captures"),
            Self::TooManyCaptureLists => write!(f, "too many captures lists"),
            Self::TooManyResults => write!(f, "too many results in match-time capture"),
            Self::BadPosition { .. } => {
                write!(f, "invalid position returned by match-time capture")
            }
        }
    }
}

impl core::error::Error for MatchError {}

/// A successful match.
#[derive(Clone, Debug, PartialEq)]
pub struct Match {
    /// Subject offset one past the matched prefix.
    pub end: usize,
    /// Capture records in match order, terminated by a
    /// [`CapKind::Close`] marker at [`Capture::NO_POS`].
    pub captures: Vec<Capture>,
    /// Values produced by match-time captures, in production order;
    /// [`CapKind::Runtime`] records index this list.
    pub values: Vec<Value>,
}

/// One backtrack-stack frame.
#[derive(Clone, Debug)]
enum Frame {
    /// A pending ordinary rule call.
    Ret { p: usize },
    /// A choice point.
    Choice { s: usize, p: usize, caplevel: usize },
    /// An active left-recursive invocation. `x` is the best seed position so
    /// far (`None` while the seed invocation itself is still running).
    LeftRec {
        s: usize,
        p: usize,
        pa: usize,
        x: Option<usize>,
    },
}

/// Per-(rule, position) left-recursion memo.
#[derive(Clone, Debug, Default)]
struct LambdaEntry {
    /// Best seed position, or `None` for a failed seed.
    x: Option<usize>,
    /// Precedence at which the recursion was entered.
    k: u8,
    /// Captures produced by the best iteration.
    caps: Vec<Capture>,
    /// Match-time values produced by the best iteration.
    values: Vec<Value>,
}

/// A saved capture level, pushed when a left-recursive seed invocation
/// starts with a fresh buffer.
#[derive(Clone, Debug, Default)]
struct CapLevel {
    caps: Vec<Capture>,
    values: Vec<Value>,
}

enum FailOutcome {
    Resume { p: usize, s: usize },
    GiveUp,
}

/// Per-run matcher state.
///
/// Holding this separately from [`Matcher`] lets embedders reuse
/// allocations across runs via [`Matcher::run_with_ctx`].
#[derive(Debug, Default)]
pub struct MatchContext {
    stack: Vec<Frame>,
    caps: Vec<Capture>,
    values: Vec<Value>,
    capstack: Vec<CapLevel>,
    lambda: HashMap<(usize, usize), LambdaEntry>,
}

impl MatchContext {
    /// Creates an empty per-run context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.caps.clear();
        self.values.clear();
        self.capstack.clear();
        self.lambda.clear();
        self.stack.reserve(INIT_BACK);
        self.caps.reserve(INIT_CAP_SIZE);
        self.capstack.reserve(INIT_CAP_STACK_SIZE);
    }
}

/// The matching engine.
pub struct Matcher<H: Host> {
    host: H,
    limits: Limits,
}

impl<H: Host> fmt::Debug for Matcher<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Reads the jump-offset operand of the instruction at `p` and resolves it
/// to an absolute word index.
fn jump_target(code: &[Word], p: usize) -> Result<usize, MatchError> {
    let off = code.get(p + 1).ok_or(MatchError::InvalidPc)?.as_offset();
    let target = p as i64 + i64::from(off);
    if target < 0 || target >= code.len() as i64 {
        return Err(MatchError::InvalidPc);
    }
    Ok(target as usize)
}

/// Decodes one UTF-8 sequence starting at `s`, returning the codepoint and
/// the offset past the sequence. Rejects malformed continuation bytes,
/// overlong encodings, codepoints above `0x10FFFF`, and sequences truncated
/// by the subject end.
fn utf8_decode(subject: &[u8], s: usize) -> Option<(u32, usize)> {
    // Per-length minimums, exclusive: a sequence of `count` continuation
    // bytes must decode above LIMITS[count].
    const LIMITS: [u32; 4] = [0xFF, 0x7F, 0x7FF, 0xFFFF];
    let first = *subject.get(s)?;
    if first < 0x80 {
        return Some((u32::from(first), s + 1));
    }
    let mut c = u32::from(first);
    let mut res: u32 = 0;
    let mut count = 0usize;
    while c & 0x40 != 0 {
        count += 1;
        let cc = *subject.get(s + count)?;
        if cc & 0xC0 != 0x80 {
            return None;
        }
        res = (res << 6) | (u32::from(cc) & 0x3F);
        c <<= 1;
    }
    if count > 3 {
        return None;
    }
    res |= (c & 0x7F) << (count * 5);
    if res > 0x10FFFF || res <= LIMITS[count] {
        return None;
    }
    Some((res, s + count + 1))
}

/// Ensures `caps` can take `extra` more records and still keep a free slot,
/// growing by doubling while small and by 9/8 near the limit.
fn reserve_caps(caps: &mut Vec<Capture>, extra: usize, max: usize) -> Result<(), MatchError> {
    if caps.capacity() - caps.len() > extra {
        return Ok(());
    }
    let needed = caps.len() + extra + 1;
    let newsize = if needed < max / 2 {
        needed * 2
    } else if needed < (max / 9) * 8 {
        needed + needed / 8
    } else {
        return Err(MatchError::TooManyCaptures);
    };
    caps.reserve_exact(newsize - caps.len());
    Ok(())
}

impl<H: Host> Matcher<H> {
    /// Creates a matcher with `host` and `limits`.
    #[must_use]
    pub fn new(host: H, limits: Limits) -> Self {
        Self { host, limits }
    }

    /// Matches `pattern` against `subject` starting at byte offset `at`.
    ///
    /// Returns `Ok(None)` when the pattern does not match (this is normal
    /// control flow, not an error); `Ok(Some(_))` with the end position,
    /// capture list, and match-time values on success; `Err(_)` only for
    /// the fatal conditions in [`MatchError`].
    ///
    /// Tracing is controlled by `trace_mask`; pass `None` for `trace` to
    /// disable tracing.
    pub fn run(
        &mut self,
        pattern: &Pattern,
        subject: &[u8],
        at: usize,
        trace_mask: TraceMask,
        trace: Option<&mut dyn TraceSink>,
    ) -> Result<Option<Match>, MatchError> {
        let mut ctx = MatchContext::new();
        self.run_with_ctx(&mut ctx, pattern, subject, at, trace_mask, trace)
    }

    /// Like [`Matcher::run`], with an explicit per-run [`MatchContext`] so
    /// embedders can reuse allocations across runs.
    pub fn run_with_ctx(
        &mut self,
        ctx: &mut MatchContext,
        pattern: &Pattern,
        subject: &[u8],
        at: usize,
        trace_mask: TraceMask,
        mut trace: Option<&mut dyn TraceSink>,
    ) -> Result<Option<Match>, MatchError> {
        if trace_mask.contains(TraceMask::RUN)
            && let Some(t) = trace.as_mut()
        {
            let t: &mut dyn TraceSink = &mut **t;
            t.event(
                pattern,
                TraceEvent::RunStart {
                    at,
                    subject_len: subject.len(),
                },
            );
        }

        let result = self.run_body(ctx, pattern, subject, at, trace_mask, &mut trace);

        if trace_mask.contains(TraceMask::RUN)
            && let Some(t) = trace.as_mut()
        {
            let outcome = match &result {
                Ok(Some(m)) => TraceOutcome::Matched(m.end),
                Ok(None) => TraceOutcome::NoMatch,
                Err(e) => TraceOutcome::Error(e),
            };
            let t: &mut dyn TraceSink = &mut **t;
            t.event(pattern, TraceEvent::RunEnd { outcome });
        }

        result
    }

    fn run_body(
        &mut self,
        ctx: &mut MatchContext,
        pattern: &Pattern,
        subject: &[u8],
        at: usize,
        trace_mask: TraceMask,
        trace: &mut Option<&mut dyn TraceSink>,
    ) -> Result<Option<Match>, MatchError> {
        let code = pattern.code();
        let end = subject.len();
        if at > end {
            return Err(MatchError::StartOutOfRange { at, len: end });
        }
        ctx.reset();

        let mut p: usize = 0;
        let mut s: usize = at;

        macro_rules! fail {
            () => {
                match self.fail(ctx)? {
                    FailOutcome::Resume { p: np, s: ns } => {
                        if trace_mask.contains(TraceMask::FAIL)
                            && let Some(t) = trace.as_mut()
                        {
                            let t: &mut dyn TraceSink = &mut **t;
                            t.event(pattern, TraceEvent::Backtrack { pc: np, pos: ns });
                        }
                        p = np;
                        s = ns;
                        continue;
                    }
                    FailOutcome::GiveUp => return Ok(None),
                }
            };
        }

        loop {
            debug_assert!(ctx.values.len() <= ctx.caps.len());
            let w = *code.get(p).ok_or(MatchError::InvalidPc)?;
            let op = w.opcode().ok_or(MatchError::InvalidPc)?;

            if trace_mask.contains(TraceMask::INSTR)
                && let Some(t) = trace.as_mut()
            {
                let t: &mut dyn TraceSink = &mut **t;
                t.event(
                    pattern,
                    TraceEvent::Instr {
                        pc: p,
                        pos: s,
                        opcode: op.byte(),
                    },
                );
            }

            match op {
                Opcode::End => {
                    debug_assert!(ctx.stack.is_empty());
                    self.push_cap(
                        ctx,
                        Capture {
                            pos: Capture::NO_POS,
                            idx: 0,
                            kind: CapKind::Close,
                            siz: 1,
                        },
                    )?;
                    return Ok(Some(Match {
                        end: s,
                        captures: mem::take(&mut ctx.caps),
                        values: mem::take(&mut ctx.values),
                    }));
                }

                Opcode::GiveUp => {
                    debug_assert!(ctx.stack.is_empty());
                    ctx.values.clear();
                    return Ok(None);
                }

                Opcode::Any => {
                    if s < end {
                        p += 1;
                        s += 1;
                    } else {
                        fail!();
                    }
                }

                Opcode::Char => {
                    if subject.get(s).copied() == Some(w.aux()) {
                        p += 1;
                        s += 1;
                    } else {
                        fail!();
                    }
                }

                Opcode::Set => match subject.get(s) {
                    Some(&b) if charset_contains(code, p + 1, b) => {
                        p += CHARSET_INST_SIZE;
                        s += 1;
                    }
                    _ => fail!(),
                },

                Opcode::Span => {
                    while s < end && charset_contains(code, p + 1, subject[s]) {
                        s += 1;
                    }
                    p += CHARSET_INST_SIZE;
                }

                Opcode::TestAny => {
                    if s < end {
                        p += 2;
                    } else {
                        p = jump_target(code, p)?;
                    }
                }

                Opcode::TestChar => {
                    if subject.get(s).copied() == Some(w.aux()) {
                        p += 2;
                    } else {
                        p = jump_target(code, p)?;
                    }
                }

                Opcode::TestSet => match subject.get(s) {
                    Some(&b) if charset_contains(code, p + 2, b) => {
                        p += 1 + CHARSET_INST_SIZE;
                    }
                    _ => p = jump_target(code, p)?,
                },

                Opcode::UtfRange => {
                    let from = code.get(p + 1).ok_or(MatchError::InvalidPc)?.as_offset() as u32;
                    let to = w.utf_to();
                    match utf8_decode(subject, s) {
                        Some((cp, next)) if from <= cp && cp <= to => {
                            p += 2;
                            s = next;
                        }
                        _ => fail!(),
                    }
                }

                Opcode::Behind => {
                    let n = w.aux() as usize;
                    if n > s {
                        fail!();
                    }
                    s -= n;
                    p += 1;
                }

                Opcode::Jmp => {
                    p = jump_target(code, p)?;
                }

                Opcode::Choice => {
                    let target = jump_target(code, p)?;
                    self.push_frame(
                        ctx,
                        Frame::Choice {
                            s,
                            p: target,
                            caplevel: ctx.caps.len(),
                        },
                    )?;
                    p += 2;
                }

                Opcode::Call => {
                    let target = jump_target(code, p)?;
                    let k = w.aux();
                    if k == 0 {
                        self.push_frame(ctx, Frame::Ret { p: p + 2 })?;
                        p = target;
                    } else {
                        enum Path {
                            Seed,
                            Reuse {
                                seed: usize,
                                caps: Vec<Capture>,
                                values: Vec<Value>,
                            },
                            Fail,
                        }
                        let path = match ctx.lambda.get(&(target, s)) {
                            None => Path::Seed,
                            Some(e) => match e.x {
                                Some(seed) if k >= e.k => Path::Reuse {
                                    seed,
                                    caps: e.caps.clone(),
                                    values: e.values.clone(),
                                },
                                _ => Path::Fail,
                            },
                        };
                        match path {
                            Path::Seed => {
                                ctx.lambda.insert(
                                    (target, s),
                                    LambdaEntry {
                                        x: None,
                                        k,
                                        caps: Vec::new(),
                                        values: Vec::new(),
                                    },
                                );
                                if ctx.capstack.len() >= self.limits.max_capture_lists {
                                    return Err(MatchError::TooManyCaptureLists);
                                }
                                ctx.capstack.push(CapLevel {
                                    caps: mem::replace(
                                        &mut ctx.caps,
                                        Vec::with_capacity(INIT_CAP_SIZE),
                                    ),
                                    values: mem::take(&mut ctx.values),
                                });
                                self.push_frame(
                                    ctx,
                                    Frame::LeftRec {
                                        s,
                                        p: p + 2,
                                        pa: target,
                                        x: None,
                                    },
                                )?;
                                p = target;
                            }
                            Path::Reuse { seed, caps, values } => {
                                self.splice(ctx, &caps, &values)?;
                                s = seed;
                                p += 2;
                            }
                            Path::Fail => fail!(),
                        }
                    }
                }

                Opcode::Ret => {
                    let frame = ctx.stack.pop().ok_or(MatchError::InvalidPc)?;
                    match frame {
                        Frame::Ret { p: ret_p } => {
                            p = ret_p;
                        }
                        Frame::Choice { .. } => return Err(MatchError::InvalidPc),
                        Frame::LeftRec {
                            s: call_s,
                            p: ret_p,
                            pa,
                            x,
                        } => {
                            if x.is_none_or(|prev| s > prev) {
                                // This iteration advanced: it becomes the new
                                // seed, and the rule body restarts.
                                ctx.stack.push(Frame::LeftRec {
                                    s: call_s,
                                    p: ret_p,
                                    pa,
                                    x: Some(s),
                                });
                                let caps = mem::replace(
                                    &mut ctx.caps,
                                    Vec::with_capacity(INIT_CAP_SIZE),
                                );
                                let values = mem::take(&mut ctx.values);
                                let entry = ctx
                                    .lambda
                                    .get_mut(&(pa, call_s))
                                    .ok_or(MatchError::InvalidPc)?;
                                entry.x = Some(s);
                                entry.caps = caps;
                                entry.values = values;
                                p = pa;
                                s = call_s;
                            } else {
                                // No progress: the recursion converged on the
                                // stored seed.
                                let seed = x.ok_or(MatchError::InvalidPc)?;
                                let level = ctx.capstack.pop().ok_or(MatchError::InvalidPc)?;
                                ctx.caps = level.caps;
                                ctx.values = level.values;
                                let entry = ctx
                                    .lambda
                                    .remove(&(pa, call_s))
                                    .ok_or(MatchError::InvalidPc)?;
                                self.splice(ctx, &entry.caps, &entry.values)?;
                                p = ret_p;
                                s = seed;
                            }
                        }
                    }
                }

                Opcode::Commit => {
                    match ctx.stack.pop() {
                        Some(Frame::Choice { .. }) => {}
                        _ => return Err(MatchError::InvalidPc),
                    }
                    p = jump_target(code, p)?;
                }

                Opcode::PartialCommit => {
                    match ctx.stack.last_mut() {
                        Some(Frame::Choice {
                            s: save_s,
                            caplevel,
                            ..
                        }) => {
                            *save_s = s;
                            *caplevel = ctx.caps.len();
                        }
                        _ => return Err(MatchError::InvalidPc),
                    }
                    p = jump_target(code, p)?;
                }

                Opcode::BackCommit => {
                    match ctx.stack.pop() {
                        Some(Frame::Choice {
                            s: save_s,
                            caplevel,
                            ..
                        }) => {
                            s = save_s;
                            ctx.caps.truncate(caplevel);
                        }
                        _ => return Err(MatchError::InvalidPc),
                    }
                    p = jump_target(code, p)?;
                }

                Opcode::FailTwice => match ctx.stack.pop() {
                    Some(Frame::Choice { .. }) => fail!(),
                    _ => return Err(MatchError::FailTwice),
                },

                Opcode::Fail => fail!(),

                Opcode::OpenCapture => {
                    let kind = w.cap_kind().ok_or(MatchError::InvalidPc)?;
                    self.push_cap(
                        ctx,
                        Capture {
                            pos: s,
                            idx: w.key(),
                            kind,
                            siz: 0,
                        },
                    )?;
                    p += 1;
                }

                Opcode::FullCapture => {
                    let kind = w.cap_kind().ok_or(MatchError::InvalidPc)?;
                    let off = w.cap_off();
                    let pos = s.checked_sub(off).ok_or(MatchError::InvalidPc)?;
                    self.push_cap(
                        ctx,
                        Capture {
                            pos,
                            idx: w.key(),
                            kind,
                            siz: off as u8 + 1,
                        },
                    )?;
                    p += 1;
                }

                Opcode::CloseCapture => {
                    let kind = w.cap_kind().ok_or(MatchError::InvalidPc)?;
                    let coalesced = match ctx.caps.last_mut() {
                        Some(last) if last.is_open() => match s.checked_sub(last.pos) {
                            Some(span) if span < u8::MAX as usize => {
                                last.siz = span as u8 + 1;
                                true
                            }
                            _ => false,
                        },
                        Some(_) => false,
                        None => return Err(MatchError::InvalidPc),
                    };
                    if !coalesced {
                        self.push_cap(
                            ctx,
                            Capture {
                                pos: s,
                                idx: w.key(),
                                kind,
                                siz: 1,
                            },
                        )?;
                    }
                    p += 1;
                }

                Opcode::CloseRunTime => {
                    let open = find_open(&ctx.caps).ok_or(MatchError::MissingOpenGroup)?;
                    if ctx.caps[open].kind != CapKind::Group {
                        return Err(MatchError::MissingOpenGroup);
                    }
                    let idx = ctx.caps[open].idx;
                    let first_dyn = first_dynamic(&ctx.caps[open + 1..]);

                    if trace_mask.contains(TraceMask::HOST)
                        && let Some(t) = trace.as_mut()
                    {
                        let t: &mut dyn TraceSink = &mut **t;
                        t.event(pattern, TraceEvent::MatchTime { idx, pos: s });
                    }

                    let reply = self.host.match_time(
                        idx,
                        MatchTimeView {
                            subject,
                            pos: s,
                            group_start: ctx.caps[open].pos,
                            caps: &ctx.caps[open + 1..],
                            values: &ctx.values,
                        },
                    );

                    // The nested records and the values they consumed are
                    // spent regardless of the verdict.
                    ctx.caps.truncate(open + 1);
                    if let Some(fd) = first_dyn {
                        ctx.values.truncate(fd);
                    }

                    match reply {
                        Reply::Fail => fail!(),
                        Reply::Accept(vals) => {
                            self.close_runtime_group(ctx, s, vals)?;
                            p += 1;
                        }
                        Reply::AcceptAt(pos, vals) => {
                            if pos < s || pos > end {
                                return Err(MatchError::BadPosition {
                                    pos,
                                    curr: s,
                                    limit: end,
                                });
                            }
                            s = pos;
                            self.close_runtime_group(ctx, s, vals)?;
                            p += 1;
                        }
                    }
                }

                Opcode::Empty => {
                    p += 1;
                }
            }
        }
    }

    /// The failure protocol: unwinds the backtrack stack to the nearest
    /// choice point, abandoning pending calls, unwinding failed
    /// left-recursion seeds, and committing a left recursion whose latest
    /// iteration failed after a successful seed.
    fn fail(&self, ctx: &mut MatchContext) -> Result<FailOutcome, MatchError> {
        loop {
            let Some(frame) = ctx.stack.pop() else {
                // The bottom of the stack is the overall-failure sentinel;
                // leave no match-time values behind.
                ctx.values.clear();
                return Ok(FailOutcome::GiveUp);
            };
            match frame {
                Frame::Ret { .. } => {}
                Frame::LeftRec {
                    s: call_s,
                    pa,
                    x: None,
                    ..
                } => {
                    // The seed invocation itself failed: drop its capture
                    // level and forget the memo.
                    let level = ctx.capstack.pop().ok_or(MatchError::InvalidPc)?;
                    ctx.caps = level.caps;
                    ctx.values = level.values;
                    ctx.lambda.remove(&(pa, call_s));
                }
                Frame::LeftRec {
                    s: call_s,
                    p: ret_p,
                    pa,
                    x: Some(seed),
                } => {
                    // An iteration past the seed failed: the last committed
                    // seed is the rule's result.
                    let level = ctx.capstack.pop().ok_or(MatchError::InvalidPc)?;
                    ctx.caps = level.caps;
                    ctx.values = level.values;
                    let entry = ctx
                        .lambda
                        .remove(&(pa, call_s))
                        .ok_or(MatchError::InvalidPc)?;
                    self.splice(ctx, &entry.caps, &entry.values)?;
                    return Ok(FailOutcome::Resume { p: ret_p, s: seed });
                }
                Frame::Choice {
                    s: save_s,
                    p: fail_p,
                    caplevel,
                } => {
                    if !ctx.values.is_empty() {
                        let tail = ctx.caps.get(caplevel..).unwrap_or(&[]);
                        if let Some(fd) = first_dynamic(tail) {
                            ctx.values.truncate(fd);
                        }
                    }
                    ctx.caps.truncate(caplevel);
                    return Ok(FailOutcome::Resume {
                        p: fail_p,
                        s: save_s,
                    });
                }
            }
        }
    }

    /// Appends a memoized iteration's captures and values to the current
    /// level, rebasing runtime-capture value indices onto the current
    /// dynamic-value list.
    fn splice(
        &self,
        ctx: &mut MatchContext,
        caps: &[Capture],
        values: &[Value],
    ) -> Result<(), MatchError> {
        let base = ctx.values.len();
        reserve_caps(&mut ctx.caps, caps.len(), self.limits.max_captures)?;
        for cap in caps {
            let mut cap = *cap;
            if cap.kind == CapKind::Runtime {
                cap.idx = u16::try_from(base + cap.idx as usize)
                    .map_err(|_| MatchError::TooManyResults)?;
            }
            ctx.caps.push(cap);
        }
        ctx.values.extend_from_slice(values);
        Ok(())
    }

    /// Finishes a successful match-time capture: with no produced values the
    /// open group disappears; otherwise the group becomes anonymous and each
    /// value gets a closed `Runtime` record, followed by the group's close.
    fn close_runtime_group(
        &self,
        ctx: &mut MatchContext,
        s: usize,
        vals: Vec<Value>,
    ) -> Result<(), MatchError> {
        if vals.is_empty() {
            ctx.caps.pop();
            return Ok(());
        }
        let base = ctx.values.len();
        if base + vals.len() >= u16::MAX as usize {
            return Err(MatchError::TooManyResults);
        }
        reserve_caps(&mut ctx.caps, vals.len() + 1, self.limits.max_captures)?;
        if let Some(group) = ctx.caps.last_mut() {
            group.idx = 0;
        }
        for i in 0..vals.len() {
            ctx.caps.push(Capture {
                pos: s,
                idx: (base + i) as u16,
                kind: CapKind::Runtime,
                siz: 1,
            });
        }
        ctx.caps.push(Capture {
            pos: s,
            idx: 0,
            kind: CapKind::Close,
            siz: 1,
        });
        ctx.values.extend(vals);
        Ok(())
    }

    fn push_frame(&self, ctx: &mut MatchContext, frame: Frame) -> Result<(), MatchError> {
        if ctx.stack.len() >= self.limits.max_backtrack {
            return Err(MatchError::BacktrackOverflow {
                limit: self.limits.max_backtrack,
            });
        }
        ctx.stack.push(frame);
        Ok(())
    }

    fn push_cap(&self, ctx: &mut MatchContext, cap: Capture) -> Result<(), MatchError> {
        reserve_caps(&mut ctx.caps, 1, self.limits.max_captures)?;
        ctx.caps.push(cap);
        Ok(())
    }
}
