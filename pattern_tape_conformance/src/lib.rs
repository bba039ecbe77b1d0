// Copyright 2026 the Pattern Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Conformance tests for `pattern_tape`; see `tests/conformance.rs`.
