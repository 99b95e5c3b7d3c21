// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Run tests across a group of distributed worker processes.
//!
//! A test is marked with `parallel`, optionally listing the worker counts it should be run with:
//!
//! * `parallel`: run with the default of 3 workers.
//! * `parallel(4)` or `parallel(nprocs=4)`: run with 4 workers.
//! * `parallel(nprocs=[1, 2, 4])`: one variant per count, named `test[nprocs=1]` and so on.
//!
//! Every variant is tagged `parallel` and `parallel[<nprocs>]`, and can be selected with a
//! [tag expression](mpitest_filtering::TagExpr) passed through `--tags`.
//!
//! When the harness runs as a plain process, each variant is run by launching `mpiexec` (or the
//! configured launcher) on the test binary, restricted to that variant. When the harness is
//! itself one of the workers, variants run in place after checking the group size.
//!
//! See [`harness`] for the entry point.

pub mod config;
pub mod errors;
pub mod exit_codes;
pub mod harness;
pub mod launcher;
pub mod list;
pub mod marker;
pub mod output;
pub mod probe;
pub mod runner;

pub use libtest_mimic::Failed;
pub use list::{MpiTest, WorkerContext};
pub use marker::{MarkerSpec, MarkerValue};
