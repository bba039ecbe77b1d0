// Copyright 2026 the Pattern Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Criterion benchmarks for `pattern_tape`; see `benches/vm.rs`.
