// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exit codes returned by mpitest test binaries.

/// Documented exit codes for mpitest test binaries.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum MpitestExitCode {}

impl MpitestExitCode {
    /// No errors occurred and every selected test passed.
    pub const OK: i32 = 0;

    /// A command-line argument was invalid, or conflicts with the execution mode.
    pub const USAGE_ERROR: i32 = 2;

    /// One or more tests failed or errored. Matches libtest.
    pub const TEST_RUN_FAILED: i32 = 101;

    /// A user issue happened while setting up the test binary, for example invalid configuration.
    pub const SETUP_ERROR: i32 = 96;

    /// A tag expression failed to parse.
    pub const INVALID_TAG_EXPRESSION: i32 = 94;
}
