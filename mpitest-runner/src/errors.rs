// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by mpitest.

use crate::{config::MpiTestConfig, exit_codes::MpitestExitCode, output::NO_HEADING_TARGET};
use camino::Utf8PathBuf;
use config::ConfigError;
use miette::{Diagnostic, SourceSpan};
use mpitest_filtering::errors::TagExprParseError;
use std::{error::Error as StdError, io, num::NonZeroUsize};
use thiserror::Error;
use tracing::error;

/// An error that occurred while parsing the text of a `parallel` marker.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
#[error("failed to parse marker `{input}`")]
pub struct MarkerSyntaxError {
    /// The marker text.
    #[source_code]
    pub input: String,

    /// The location of the failure within `input`.
    #[label("{}", message)]
    pub span: SourceSpan,

    /// A description of what was expected at `span`.
    pub message: String,
}

impl MarkerSyntaxError {
    pub(crate) fn new(
        input: impl Into<String>,
        span: (usize, usize),
        message: impl Into<String>,
    ) -> Self {
        Self {
            input: input.into(),
            span: span.into(),
            message: message.into(),
        }
    }

    /// Returns the byte offset where parsing failed.
    pub fn offset(&self) -> usize {
        self.span.offset()
    }
}

/// A `parallel` marker whose arguments could not be resolved to a set of worker counts.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid `parallel` marker on test `{test_name}`: {kind}")]
pub struct MarkerConfigError {
    test_name: String,
    kind: MarkerConfigErrorKind,
}

impl MarkerConfigError {
    pub(crate) fn new(test_name: impl Into<String>, kind: MarkerConfigErrorKind) -> Self {
        Self {
            test_name: test_name.into(),
            kind,
        }
    }

    /// The name of the test carrying the marker.
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// What was wrong with the marker.
    pub fn kind(&self) -> &MarkerConfigErrorKind {
        &self.kind
    }
}

/// The ways in which a `parallel` marker can be malformed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MarkerConfigErrorKind {
    /// The marker text did not parse.
    #[error("{}: {}", .0, .0.message)]
    Syntax(MarkerSyntaxError),

    /// Both a positional argument and the `nprocs` keyword were supplied.
    #[error("worker counts given both positionally and as `nprocs`")]
    PositionalAndKeyword,

    /// More than one positional argument was supplied.
    #[error("expected at most one positional argument, found {count}")]
    TooManyArguments {
        /// The number of positional arguments.
        count: usize,
    },

    /// A keyword other than `nprocs` was supplied.
    #[error("unknown keyword argument `{keyword}` (expected `nprocs`)")]
    UnknownKeyword {
        /// The keyword.
        keyword: String,
    },

    /// The worker count sequence was empty.
    #[error("worker count sequence is empty")]
    EmptySequence,

    /// A value that isn't an integer was supplied where a worker count was expected.
    #[error("expected an integer worker count, found `{value}`")]
    NonIntegerValue {
        /// The offending value, as written.
        value: String,
    },

    /// A worker count of zero or less was supplied.
    #[error("worker count must be at least 1, found {value}")]
    NonPositiveCount {
        /// The offending value.
        value: i64,
    },
}

/// A test variant requests more worker processes than the configured maximum.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(
    "test `{test_name}` requests {nprocs} worker processes, above the maximum of {max} \
     (set by {} or `max-nprocs`)",
    MpiTestConfig::MAX_NPROCS_ENV
)]
pub struct ProcessLimitExceeded {
    test_name: String,
    nprocs: NonZeroUsize,
    max: NonZeroUsize,
}

impl ProcessLimitExceeded {
    pub(crate) fn new(
        test_name: impl Into<String>,
        nprocs: NonZeroUsize,
        max: NonZeroUsize,
    ) -> Self {
        Self {
            test_name: test_name.into(),
            nprocs,
            max,
        }
    }

    /// The name of the offending test variant.
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// The requested worker count.
    pub fn nprocs(&self) -> NonZeroUsize {
        self.nprocs
    }

    /// The configured maximum.
    pub fn max(&self) -> NonZeroUsize {
        self.max
    }
}

/// An error detected while building the test list. The affected test is reported as an error
/// when run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollectionError {
    /// The marker was malformed.
    #[error(transparent)]
    Marker(#[from] MarkerConfigError),

    /// The requested worker count exceeds the limit.
    #[error(transparent)]
    ProcessLimit(#[from] ProcessLimitExceeded),
}

/// The ambient worker group has a different size than the test requests.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(
    "test `{test_name}` requires {expected} worker processes, \
     but the ambient worker group has {ambient}"
)]
pub struct WorkerCountMismatch {
    /// The name of the test variant.
    pub test_name: String,
    /// The worker count the variant requests.
    pub expected: NonZeroUsize,
    /// The size of the ambient worker group.
    pub ambient: usize,
}

/// Running as a launched worker, but the worker group size could not be determined.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(
    "test `{test_name}` runs inside a launched worker group, but the group size is unavailable \
     (none of OMPI_COMM_WORLD_SIZE, PMI_SIZE or MV2_COMM_WORLD_SIZE is set)"
)]
pub struct GroupSizeUnavailable {
    /// The name of the test variant.
    pub test_name: String,
}

/// The distributed launcher could not be spawned.
#[derive(Debug, Error)]
#[error("failed to launch `{command}`: {error}")]
pub struct LaunchFailure {
    command: String,
    error: io::Error,
}

impl LaunchFailure {
    pub(crate) fn new(command: impl Into<String>, error: io::Error) -> Self {
        Self {
            command: command.into(),
            error,
        }
    }

    /// The command line that failed to spawn, quoted for display.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The underlying I/O error.
    pub fn io_error(&self) -> &io::Error {
        &self.error
    }
}

/// A configuration or environment problem that prevented a test variant from running.
///
/// These are reported as errors, as opposed to test failures.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The test was invalid at collection time.
    #[error(transparent)]
    Collection(#[from] CollectionError),

    /// Non-forking mode: the ambient group size doesn't match.
    #[error(transparent)]
    WorkerCountMismatch(#[from] WorkerCountMismatch),

    /// Non-forking mode: the ambient group size is unknown.
    #[error(transparent)]
    GroupSizeUnavailable(#[from] GroupSizeUnavailable),

    /// Forking mode: the launcher could not be spawned.
    #[error(transparent)]
    Launch(#[from] LaunchFailure),
}

/// An error that occurred while reading mpitest configuration.
#[derive(Debug, Error)]
#[error("failed to parse mpitest config at `{config_file}`")]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// The config file that failed to parse.
    pub fn config_file(&self) -> &camino::Utf8Path {
        &self.config_file
    }

    /// The kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of a [`ConfigParseError`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// The configuration sources could not be merged.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// The merged configuration could not be deserialized.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// The maximum worker count environment variable could not be parsed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(
    "invalid value for {}: `{value}` (expected a positive integer)",
    MpiTestConfig::MAX_NPROCS_ENV
)]
pub struct MaxNprocsEnvError {
    value: String,
}

impl MaxNprocsEnvError {
    pub(crate) fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

/// An error that aborts the harness before any test runs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HarnessError {
    /// A command-line argument was invalid.
    #[error("{message}")]
    Usage {
        /// A description of the problem.
        message: String,
    },

    /// The tag expression passed to `--tags` did not parse.
    #[error("invalid tag expression")]
    TagExpr(#[source] TagExprParseError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigParseError),

    /// The maximum worker count environment variable is invalid.
    #[error(transparent)]
    MaxNprocsEnv(#[from] MaxNprocsEnvError),

    /// The path to the running test binary could not be determined.
    #[error("failed to determine the path to the test binary")]
    CurrentExe(#[source] io::Error),

    /// Worker processes were requested to run tests in parallel with each other.
    #[error(
        "running inside a worker group requires a single test thread, \
         but --test-threads {requested} was passed"
    )]
    MultipleTestThreads {
        /// The requested thread count.
        requested: usize,
    },

    /// A launched worker process was not asked to run any parallel test.
    #[error("launched worker process selected no parallel test (filter: {filter})")]
    NoParallelTestSelected {
        /// The name filter the worker received, or `<none>`.
        filter: String,
    },
}

impl HarnessError {
    /// Returns the exit code the harness uses for this error.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::Usage { .. } | Self::MultipleTestThreads { .. } => MpitestExitCode::USAGE_ERROR,
            Self::TagExpr(_) => MpitestExitCode::INVALID_TAG_EXPRESSION,
            Self::Config(_)
            | Self::MaxNprocsEnv(_)
            | Self::CurrentExe(_)
            | Self::NoParallelTestSelected { .. } => MpitestExitCode::SETUP_ERROR,
        }
    }

    /// Logs this error and its causes through tracing.
    pub fn display_to_stderr(&self) {
        let mut next_error = match self {
            Self::TagExpr(err) => {
                // The miette report already includes the message and the failing location.
                error!(target: NO_HEADING_TARGET, "{:?}", miette::Report::new(err.clone()));
                None
            }
            Self::Config(err) => {
                error!("{err}");
                err.source()
            }
            Self::CurrentExe(_) => {
                error!("{self}");
                self.source()
            }
            Self::Usage { .. }
            | Self::MaxNprocsEnv(_)
            | Self::MultipleTestThreads { .. }
            | Self::NoParallelTestSelected { .. } => {
                error!("{self}");
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
