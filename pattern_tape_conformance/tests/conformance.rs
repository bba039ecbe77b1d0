// Copyright 2026 the Pattern Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![allow(missing_docs, reason = "integration test crate")]

use pattern_tape::asm::Asm;
use pattern_tape::bytecode::Charset;
use pattern_tape::capture::{CapKind, Capture};
use pattern_tape::host::{Host, MatchTimeView, RejectAll, Reply, Value};
use pattern_tape::program::Pattern;
use pattern_tape::trace::{TraceEvent, TraceMask, TraceSink};
use pattern_tape::vm::{Limits, Match, MatchContext, MatchError, Matcher};

/// A host driven by a closure, for per-test match-time behavior.
struct FnHost<F>(F);

impl<F: FnMut(u16, MatchTimeView<'_>) -> Reply> Host for FnHost<F> {
    fn match_time(&mut self, idx: u16, view: MatchTimeView<'_>) -> Reply {
        (self.0)(idx, view)
    }
}

fn run(pattern: &Pattern, subject: &[u8]) -> Result<Option<Match>, MatchError> {
    Matcher::new(RejectAll, Limits::default()).run(pattern, subject, 0, TraceMask::NONE, None)
}

fn run_host<H: Host>(
    host: H,
    pattern: &Pattern,
    subject: &[u8],
) -> Result<Option<Match>, MatchError> {
    Matcher::new(host, Limits::default()).run(pattern, subject, 0, TraceMask::NONE, None)
}

/// `'a'+`
fn one_or_more_a() -> Pattern {
    let mut a = Asm::new();
    a.char(b'a');
    let out = a.label();
    a.choice(out);
    let body = a.label();
    a.place(body);
    a.char(b'a');
    a.partial_commit(body);
    a.place(out);
    a.end();
    a.finish().unwrap()
}

/// `[0-9]+`
fn digits() -> Pattern {
    let set = Charset::from_bytes(b"0123456789");
    let mut a = Asm::new();
    a.set(&set);
    a.span(&set);
    a.end();
    a.finish().unwrap()
}

/// `E <- E '+' 'n' / 'n'`, with a table capture around the recursive
/// alternative and a simple capture on each `'n'`.
fn left_recursive_sum() -> Pattern {
    let mut a = Asm::new();
    let e_rule = a.label();
    let after = a.label();
    a.call_prec(e_rule, 1);
    a.jmp(after);
    a.place(e_rule);
    let alt = a.label();
    let rule_end = a.label();
    a.choice(alt);
    a.open_capture(CapKind::Table, 0);
    a.call_prec(e_rule, 1);
    a.char(b'+');
    a.char(b'n');
    a.full_capture(CapKind::Simple, 1, 0);
    a.close_capture(CapKind::Close, 0);
    a.commit(rule_end);
    a.place(alt);
    a.char(b'n');
    a.full_capture(CapKind::Simple, 1, 0);
    a.place(rule_end);
    a.ret();
    a.place(after);
    a.end();
    a.finish().unwrap()
}

/// `{ '(' <match-time> }` followed by `')'`; the group's identity is 7.
fn runtime_paren() -> Pattern {
    let mut a = Asm::new();
    a.open_capture(CapKind::Group, 7);
    a.char(b'(');
    a.close_run_time();
    a.char(b')');
    a.end();
    a.finish().unwrap()
}

// ---------------------------------------------------------------------------
// End-to-end scenarios
// ---------------------------------------------------------------------------

#[test]
fn one_or_more_matches_prefix() {
    let p = one_or_more_a();
    let m = run(&p, b"aaa").unwrap().unwrap();
    assert_eq!(m.end, 3);
    // Nothing but the trailing close marker.
    assert_eq!(m.captures.len(), 1);
    assert_eq!(m.captures[0].kind, CapKind::Close);
    assert_eq!(m.captures[0].pos, Capture::NO_POS);
    assert!(m.values.is_empty());

    let m = run(&p, b"ab").unwrap().unwrap();
    assert_eq!(m.end, 1);
    assert_eq!(run(&p, b"b").unwrap(), None);
}

#[test]
fn digit_run_stops_at_nondigit() {
    let p = digits();
    assert_eq!(run(&p, b"42x").unwrap().unwrap().end, 2);
    assert_eq!(run(&p, b"7").unwrap().unwrap().end, 1);
    assert_eq!(run(&p, b"x").unwrap(), None);
    assert_eq!(run(&p, b"").unwrap(), None);
}

#[test]
fn left_recursion_builds_left_associative_tree() {
    let p = left_recursive_sum();
    let m = run(&p, b"n+n+n").unwrap().unwrap();
    assert_eq!(m.end, 5);

    let kinds: Vec<(CapKind, usize, u8)> = m
        .captures
        .iter()
        .map(|c| (c.kind, c.pos, c.siz))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (CapKind::Table, 0, 0),  // outer (n+n)+n
            (CapKind::Table, 0, 0),  // inner n+n
            (CapKind::Simple, 0, 2), // first n
            (CapKind::Simple, 2, 2), // second n
            (CapKind::Close, 3, 1),  // closes inner table
            (CapKind::Simple, 4, 2), // third n
            (CapKind::Close, 5, 1),  // closes outer table
            (CapKind::Close, Capture::NO_POS, 1),
        ]
    );
}

#[test]
fn left_recursion_single_seed() {
    let p = left_recursive_sum();
    let m = run(&p, b"n").unwrap().unwrap();
    assert_eq!(m.end, 1);
    let m = run(&p, b"n+x").unwrap().unwrap();
    assert_eq!(m.end, 1);
    assert_eq!(run(&p, b"+n").unwrap(), None);
}

#[test]
fn lower_precedence_call_cannot_reenter() {
    // Identical grammars except for the precedence of the inner call:
    // at equal precedence the recursion grows, at lower it may not.
    let build = |inner_k: u8| {
        let mut a = Asm::new();
        let e_rule = a.label();
        let after = a.label();
        a.call_prec(e_rule, 2);
        a.jmp(after);
        a.place(e_rule);
        let alt = a.label();
        let rule_end = a.label();
        a.choice(alt);
        a.call_prec(e_rule, inner_k);
        a.char(b'x');
        a.char(b'n');
        a.commit(rule_end);
        a.place(alt);
        a.char(b'n');
        a.place(rule_end);
        a.ret();
        a.place(after);
        a.end();
        a.finish().unwrap()
    };

    let grows = build(2);
    assert_eq!(run(&grows, b"nxn").unwrap().unwrap().end, 3);

    let capped = build(1);
    assert_eq!(run(&capped, b"nxn").unwrap().unwrap().end, 1);
}

#[test]
fn match_time_fail_rejects_the_match() {
    let p = runtime_paren();
    let got = run_host(FnHost(|_, _: MatchTimeView<'_>| Reply::Fail), &p, b"()").unwrap();
    assert_eq!(got, None);
}

#[test]
fn match_time_value_becomes_runtime_capture() {
    let p = runtime_paren();
    let m = run_host(
        FnHost(|idx, view: MatchTimeView<'_>| {
            assert_eq!(idx, 7);
            assert_eq!(view.pos, 1);
            assert_eq!(view.group_start, 0);
            assert!(view.caps.is_empty());
            Reply::Accept(vec![Value::Int(42)])
        }),
        &p,
        b"()",
    )
    .unwrap()
    .unwrap();

    assert_eq!(m.end, 2);
    assert_eq!(m.values, vec![Value::Int(42)]);

    let kinds: Vec<(CapKind, u16, u8)> = m
        .captures
        .iter()
        .map(|c| (c.kind, c.idx, c.siz))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (CapKind::Group, 0, 0), // anonymized group
            (CapKind::Runtime, 0, 1),
            (CapKind::Close, 0, 1),
            (CapKind::Close, 0, 1), // trailing marker
        ]
    );
}

#[test]
fn match_time_accept_without_values_drops_the_group() {
    let p = runtime_paren();
    let m = run_host(FnHost(|_, _: MatchTimeView<'_>| Reply::accept()), &p, b"()")
        .unwrap()
        .unwrap();
    assert_eq!(m.end, 2);
    assert_eq!(m.captures.len(), 1); // only the trailing marker
    assert!(m.values.is_empty());
}

#[test]
fn utf8_range_matches_copyright_sign() {
    // [U+0080, U+07FF]
    let mut a = Asm::new();
    a.utf_range(0x80, 0x7FF);
    a.end();
    let p = a.finish().unwrap();

    let m = run(&p, b"\xC2\xA9").unwrap().unwrap();
    assert_eq!(m.end, 2);
    // Overlong encoding of the same codepoint must not match.
    assert_eq!(run(&p, b"\xC0\xA9").unwrap(), None);
    // Truncated sequence must fail without reading past the end.
    assert_eq!(run(&p, b"\xC2").unwrap(), None);
    // In-range ASCII is below the range.
    assert_eq!(run(&p, b"a").unwrap(), None);
}

#[test]
fn runaway_recursion_overflows_the_backtrack_stack() {
    // R <- R, without consuming input.
    let mut a = Asm::new();
    let r = a.label();
    let after = a.label();
    a.call(r);
    a.jmp(after);
    a.place(r);
    a.call(r);
    a.ret();
    a.place(after);
    a.end();
    let p = a.finish().unwrap();

    let limits = Limits {
        max_backtrack: 50,
        ..Limits::default()
    };
    let got = Matcher::new(RejectAll, limits).run(&p, b"", 0, TraceMask::NONE, None);
    assert_eq!(got, Err(MatchError::BacktrackOverflow { limit: 50 }));
}

// ---------------------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------------------

#[test]
fn consuming_opcodes_fail_at_subject_end() {
    let mut a = Asm::new();
    a.any();
    a.end();
    assert_eq!(run(&a.finish().unwrap(), b"").unwrap(), None);

    let mut a = Asm::new();
    a.char(b'a');
    a.end();
    assert_eq!(run(&a.finish().unwrap(), b"").unwrap(), None);

    let mut a = Asm::new();
    a.set(&Charset::from_bytes(b"a"));
    a.end();
    assert_eq!(run(&a.finish().unwrap(), b"").unwrap(), None);
}

#[test]
fn lookahead_tests_do_not_backtrack_through_the_stack() {
    // test_char 'a' -> L; 'a' 'b'; jmp out; L: 'z'; out: end
    let mut a = Asm::new();
    let l = a.label();
    let out = a.label();
    a.test_char(b'a', l);
    a.char(b'a');
    a.char(b'b');
    a.jmp(out);
    a.place(l);
    a.char(b'z');
    a.place(out);
    a.end();
    let p = a.finish().unwrap();

    assert_eq!(run(&p, b"ab").unwrap().unwrap().end, 2);
    assert_eq!(run(&p, b"z").unwrap().unwrap().end, 1);
    // 'a' not followed by 'b': the test consumed nothing, but there is no
    // choice point, so the whole match fails.
    assert_eq!(run(&p, b"ac").unwrap(), None);
}

#[test]
fn and_predicate_consumes_nothing() {
    // &'a' . : choice L1; 'a'; back_commit L2; L1: fail; L2: any
    let mut a = Asm::new();
    let l1 = a.label();
    let l2 = a.label();
    a.choice(l1);
    a.char(b'a');
    a.back_commit(l2);
    a.place(l1);
    a.fail();
    a.place(l2);
    a.any();
    a.end();
    let p = a.finish().unwrap();

    assert_eq!(run(&p, b"ab").unwrap().unwrap().end, 1);
    assert_eq!(run(&p, b"b").unwrap(), None);
}

#[test]
fn not_predicate_fails_twice() {
    // !'a' . : choice L; 'a'; fail_twice; L: any
    let mut a = Asm::new();
    let l = a.label();
    a.choice(l);
    a.char(b'a');
    a.fail_twice();
    a.place(l);
    a.any();
    a.end();
    let p = a.finish().unwrap();

    assert_eq!(run(&p, b"b").unwrap().unwrap().end, 1);
    assert_eq!(run(&p, b"a").unwrap(), None);
    assert_eq!(run(&p, b"").unwrap(), None);
}

#[test]
fn lookahead_set_selects_the_digit_arm() {
    // test_set [0-9] -> L; [0-9]+; jmp out; L: 'x'; out: end
    let set = Charset::from_bytes(b"0123456789");
    let mut a = Asm::new();
    let l = a.label();
    let out = a.label();
    a.test_set(&set, l);
    a.set(&set);
    a.span(&set);
    a.jmp(out);
    a.place(l);
    a.char(b'x');
    a.place(out);
    a.end();
    let p = a.finish().unwrap();

    assert_eq!(run(&p, b"129z").unwrap().unwrap().end, 3);
    assert_eq!(run(&p, b"x").unwrap().unwrap().end, 1);
    assert_eq!(run(&p, b"y").unwrap(), None);
    assert_eq!(run(&p, b"").unwrap(), None);
}

#[test]
fn lookahead_any_detects_end_of_subject() {
    // test_any -> L; any; L: end
    let mut a = Asm::new();
    let l = a.label();
    a.test_any(l);
    a.any();
    a.place(l);
    a.end();
    let p = a.finish().unwrap();

    assert_eq!(run(&p, b"a").unwrap().unwrap().end, 1);
    assert_eq!(run(&p, b"").unwrap().unwrap().end, 0);
}

#[test]
fn padding_is_a_no_op_and_give_up_is_no_match() {
    let mut a = Asm::new();
    a.empty();
    a.char(b'a');
    a.empty();
    a.end();
    assert_eq!(run(&a.finish().unwrap(), b"a").unwrap().unwrap().end, 1);

    let mut a = Asm::new();
    a.give_up();
    assert_eq!(run(&a.finish().unwrap(), b"anything").unwrap(), None);
}

#[test]
fn match_time_position_bounds() {
    let mut a = Asm::new();
    a.open_capture(CapKind::Group, 0);
    a.char(b'(');
    a.close_run_time();
    a.end();
    let p = a.finish().unwrap();

    // Relocating to the subject end is allowed...
    let m = run_host(
        FnHost(|_, view: MatchTimeView<'_>| Reply::AcceptAt(view.subject.len(), vec![])),
        &p,
        b"(..",
    )
    .unwrap()
    .unwrap();
    assert_eq!(m.end, 3);

    // ...one past it is a fatal contract violation.
    let got = run_host(
        FnHost(|_, view: MatchTimeView<'_>| Reply::AcceptAt(view.subject.len() + 1, vec![])),
        &p,
        b"(..",
    );
    assert_eq!(
        got,
        Err(MatchError::BadPosition {
            pos: 4,
            curr: 1,
            limit: 3
        })
    );

    // Moving backwards is also rejected.
    let got = run_host(FnHost(|_, _: MatchTimeView<'_>| Reply::AcceptAt(0, vec![])), &p, b"(..");
    assert!(matches!(got, Err(MatchError::BadPosition { pos: 0, .. })));
}

#[test]
fn failed_arm_drops_its_match_time_values() {
    // ( {'('<fn>} 'x' / '(' ')' ) ; the first arm's value must not survive
    // the backtrack.
    let mut a = Asm::new();
    let alt = a.label();
    let done = a.label();
    a.choice(alt);
    a.open_capture(CapKind::Group, 0);
    a.char(b'(');
    a.close_run_time();
    a.char(b'x');
    a.commit(done);
    a.place(alt);
    a.char(b'(');
    a.char(b')');
    a.place(done);
    a.end();
    let p = a.finish().unwrap();

    let m = run_host(
        FnHost(|_, _: MatchTimeView<'_>| Reply::Accept(vec![Value::Bool(true)])),
        &p,
        b"()",
    )
    .unwrap()
    .unwrap();
    assert_eq!(m.end, 2);
    assert!(m.values.is_empty());
    assert_eq!(m.captures.len(), 1); // only the trailing marker
}

// ---------------------------------------------------------------------------
// Invariants and round trips
// ---------------------------------------------------------------------------

#[test]
fn capture_substrings_reassemble_the_matched_prefix() {
    // ({.})* : one simple capture per consumed byte.
    let mut a = Asm::new();
    let out = a.label();
    a.choice(out);
    let body = a.label();
    a.place(body);
    a.open_capture(CapKind::Simple, 0);
    a.any();
    a.close_capture(CapKind::Close, 0);
    a.partial_commit(body);
    a.place(out);
    a.end();
    let p = a.finish().unwrap();

    let subject = b"abc";
    let m = run(&p, subject).unwrap().unwrap();
    assert_eq!(m.end, 3);

    let mut reassembled = Vec::new();
    for c in &m.captures {
        if c.pos == Capture::NO_POS {
            continue;
        }
        assert_eq!(c.kind, CapKind::Simple);
        assert!(c.siz > 0);
        reassembled.extend_from_slice(&subject[c.pos..c.pos + (c.siz as usize - 1)]);
    }
    assert_eq!(&reassembled, &subject[..m.end]);
}

#[test]
fn replay_is_deterministic_and_contexts_are_reusable() {
    let p = left_recursive_sum();
    let mut matcher = Matcher::new(RejectAll, Limits::default());
    let mut ctx = MatchContext::new();

    let first = matcher
        .run_with_ctx(&mut ctx, &p, b"n+n+n", 0, TraceMask::NONE, None)
        .unwrap();
    let second = matcher
        .run_with_ctx(&mut ctx, &p, b"n+n+n", 0, TraceMask::NONE, None)
        .unwrap();
    assert_eq!(first, second);

    // A failing run in between must not poison later runs.
    let none = matcher
        .run_with_ctx(&mut ctx, &p, b"+", 0, TraceMask::NONE, None)
        .unwrap();
    assert_eq!(none, None);
    let third = matcher
        .run_with_ctx(&mut ctx, &p, b"n+n+n", 0, TraceMask::NONE, None)
        .unwrap();
    assert_eq!(first, third);
}

#[test]
fn left_recursion_carries_match_time_values_across_iterations() {
    // E <- E '+' g / g  where  g = { 'n' <fn> }  and the host returns the
    // position of each 'n'.
    let mut a = Asm::new();
    let e_rule = a.label();
    let after = a.label();
    a.call_prec(e_rule, 1);
    a.jmp(after);
    a.place(e_rule);
    let alt = a.label();
    let rule_end = a.label();
    a.choice(alt);
    a.call_prec(e_rule, 1);
    a.char(b'+');
    a.open_capture(CapKind::Group, 0);
    a.char(b'n');
    a.close_run_time();
    a.commit(rule_end);
    a.place(alt);
    a.open_capture(CapKind::Group, 0);
    a.char(b'n');
    a.close_run_time();
    a.place(rule_end);
    a.ret();
    a.place(after);
    a.end();
    let p = a.finish().unwrap();

    let m = run_host(
        FnHost(|_, view: MatchTimeView<'_>| Reply::Accept(vec![Value::Int(view.pos as i64)])),
        &p,
        b"n+n+n",
    )
    .unwrap()
    .unwrap();

    assert_eq!(m.end, 5);
    assert_eq!(
        m.values,
        vec![Value::Int(1), Value::Int(3), Value::Int(5)]
    );

    // Every runtime record must address its value, in order.
    let runtime_idxs: Vec<u16> = m
        .captures
        .iter()
        .filter(|c| c.kind == CapKind::Runtime)
        .map(|c| c.idx)
        .collect();
    assert_eq!(runtime_idxs, vec![0, 1, 2]);
}

#[test]
fn tracing_reports_run_and_backtrack_events() {
    #[derive(Default)]
    struct Sink {
        runs: usize,
        instrs: usize,
        backtracks: usize,
    }

    impl TraceSink for Sink {
        fn mask(&self) -> TraceMask {
            TraceMask::RUN | TraceMask::INSTR | TraceMask::FAIL
        }

        fn event(&mut self, _pattern: &Pattern, event: TraceEvent<'_>) {
            match event {
                TraceEvent::RunStart { .. } | TraceEvent::RunEnd { .. } => self.runs += 1,
                TraceEvent::Instr { .. } => self.instrs += 1,
                TraceEvent::Backtrack { .. } => self.backtracks += 1,
                TraceEvent::MatchTime { .. } => {}
            }
        }
    }

    let p = one_or_more_a();
    let mut sink = Sink::default();
    let mask = sink.mask();
    let m = Matcher::new(RejectAll, Limits::default())
        .run(&p, b"aab", 0, mask, Some(&mut sink))
        .unwrap()
        .unwrap();
    assert_eq!(m.end, 2);
    assert_eq!(sink.runs, 2);
    assert!(sink.instrs > 0);
    // The loop exits by failing back to its choice point once.
    assert_eq!(sink.backtracks, 1);
}
