// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running test list entries.
//!
//! The main structure in this module is [`Dispatcher`], which routes each parallel variant to the
//! forking or the non-forking strategy depending on the [`ExecutionMode`].

mod fork;
mod in_place;

use crate::{
    config::LauncherConfig,
    errors::ExecutionError,
    list::{TestBody, TestListEntry, TestVariant, WorkerContext},
    probe::{ExecutionMode, WorkerGroupProbe},
};
use camino::Utf8PathBuf;
use libtest_mimic::Failed;
use std::{fmt, num::NonZeroUsize, process::ExitStatus, sync::Arc};

/// The result of running one test list entry.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The test passed.
    Passed,

    /// The test ran and failed.
    Failed(FailureDetail),

    /// The test could not be run because of a configuration or environment problem.
    Errored(ExecutionError),
}

impl ExecutionOutcome {
    /// Returns true if the test passed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Converts the outcome into the result reported to libtest-mimic.
    ///
    /// Errors are prefixed with `error:` to distinguish them from test failures.
    pub fn into_result(self) -> Result<(), Failed> {
        match self {
            Self::Passed => Ok(()),
            Self::Failed(FailureDetail::Body { message }) => Err(match message {
                Some(message) => Failed::from(message),
                None => Failed::without_message(),
            }),
            Self::Failed(detail) => Err(Failed::from(detail.to_string())),
            Self::Errored(error) => Err(Failed::from(format!("error: {error}"))),
        }
    }
}

/// Why a test failed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FailureDetail {
    /// The test body returned an error in this process.
    Body {
        /// The failure message, if any.
        message: Option<String>,
    },

    /// The launched worker group exited unsuccessfully.
    ChildExit {
        /// How the launcher exited.
        status: ChildExitStatus,
        /// Captured standard output. Empty if output wasn't captured.
        stdout: Vec<u8>,
        /// Captured standard error. Empty if output wasn't captured.
        stderr: Vec<u8>,
    },
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Body { message: Some(message) } => f.write_str(message),
            Self::Body { message: None } => f.write_str("test failed"),
            Self::ChildExit {
                status,
                stdout,
                stderr,
            } => {
                write!(f, "worker group failed with {status}")?;
                for (name, output) in [("stdout", stdout), ("stderr", stderr)] {
                    if !output.is_empty() {
                        write!(
                            f,
                            "\n\n--- {name} ---\n{}",
                            String::from_utf8_lossy(output).trim_end()
                        )?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// The exit status of a launcher process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChildExitStatus {
    /// The process exited with this code.
    Code(i32),

    /// The process was terminated by this signal.
    Signal(i32),

    /// The status could not be determined.
    Unknown,
}

impl ChildExitStatus {
    /// Converts a process exit status.
    pub fn from_exit_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signal(signal);
            }
        }
        Self::Unknown
    }
}

impl fmt::Display for ChildExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
            Self::Unknown => write!(f, "an unknown exit status"),
        }
    }
}

/// Maps the output of a finished launcher process to an outcome.
///
/// Exit code 0 passes; any other exit code or a signal fails with the captured output.
pub fn outcome_from_output(output: std::process::Output) -> ExecutionOutcome {
    if output.status.success() {
        ExecutionOutcome::Passed
    } else {
        ExecutionOutcome::Failed(FailureDetail::ChildExit {
            status: ChildExitStatus::from_exit_status(output.status),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// What the forking strategy needs to launch a worker group.
#[derive(Clone, Debug)]
pub struct LaunchContext {
    launcher: LauncherConfig,
    test_binary: Utf8PathBuf,
    capture: bool,
}

impl LaunchContext {
    /// Creates a new launch context.
    ///
    /// `test_binary` is rerun by the launcher; `capture` controls whether the worker group's
    /// output is captured and attached to failures, or passed through.
    pub fn new(
        launcher: LauncherConfig,
        test_binary: impl Into<Utf8PathBuf>,
        capture: bool,
    ) -> Self {
        Self {
            launcher,
            test_binary: test_binary.into(),
            capture,
        }
    }
}

/// Routes test list entries to an execution strategy.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    mode: ExecutionMode,
    probe: Arc<dyn WorkerGroupProbe>,
    launch: LaunchContext,
}

impl Dispatcher {
    /// Creates a dispatcher, detecting the execution mode from `probe`.
    pub fn new(probe: Arc<dyn WorkerGroupProbe>, launch: LaunchContext) -> Self {
        let mode = ExecutionMode::detect(&*probe);
        Self {
            mode,
            probe,
            launch,
        }
    }

    /// The execution mode.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Runs an entry of the test list.
    ///
    /// Serial tests run in place, invalid entries are reported as errors without running, and
    /// parallel variants are passed to [`Self::run_variant`].
    pub fn run_entry(&self, entry: &TestListEntry) -> ExecutionOutcome {
        match entry {
            TestListEntry::Serial(test) => {
                run_body(test.body(), WorkerContext::new(NonZeroUsize::MIN, self.probe.rank()))
            }
            TestListEntry::Parallel(variant) => self.run_variant(variant),
            TestListEntry::Invalid(invalid) => {
                ExecutionOutcome::Errored(invalid.error().clone().into())
            }
        }
    }

    /// Runs a parallel variant with the strategy for the current mode.
    pub fn run_variant(&self, variant: &TestVariant) -> ExecutionOutcome {
        match self.mode {
            ExecutionMode::Forking => fork::run(variant, &self.launch),
            ExecutionMode::NonForking => in_place::run(variant, &*self.probe),
        }
    }
}

fn run_body(body: &TestBody, context: WorkerContext) -> ExecutionOutcome {
    match body(&context) {
        Ok(()) => ExecutionOutcome::Passed,
        Err(failed) => ExecutionOutcome::Failed(FailureDetail::Body {
            message: failed.message().map(str::to_owned),
        }),
    }
}
