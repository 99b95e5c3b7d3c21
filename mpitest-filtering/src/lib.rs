// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Tag selection expressions for mpitest.
//!
//! Every test carrying a `parallel` marker is tagged with `parallel` and `parallel[<nprocs>]`.
//! Operators select subsets of tests with boolean expressions over those tags, for example:
//!
//! * `parallel[3]`: tests that run with exactly three worker processes.
//! * `not parallel or parallel[1]`: serial tests, plus single-worker parallel tests.
//! * `parallel and not (parallel[4] or parallel[8])`.
//!
//! The grammar is:
//!
//! ```text
//! expr     := and_expr ("or" and_expr)*
//! and_expr := not_expr ("and" not_expr)*
//! not_expr := "not" not_expr | "(" expr ")" | tag
//! tag      := [A-Za-z0-9_:+.\-\[\]\\/]+
//! ```

pub mod errors;
mod expression;
mod parsing;

pub use expression::{TagExpr, TagSet};
