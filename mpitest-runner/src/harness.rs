// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The libtest-mimic entry point.
//!
//! A test binary with `harness = false` declares its tests and hands them to [`main`]:
//!
//! ```no_run
//! use mpitest_runner::{MpiTest, harness};
//!
//! fn main() -> std::process::ExitCode {
//!     harness::main([
//!         MpiTest::new("test_serial", |_| Ok(())),
//!         MpiTest::new("test_sum", |context| {
//!             assert!(context.nprocs().get() <= 3);
//!             Ok(())
//!         })
//!         .with_marker_text("parallel(nprocs=[1, 2, 3])"),
//!     ])
//! }
//! ```

use crate::{
    config::{MpiTestConfig, package_root},
    errors::HarnessError,
    list::{MpiTest, TestList, TestListEntry},
    output::Color,
    probe::{EnvProbe, ExecutionMode, WorkerGroupProbe},
    runner::{Dispatcher, LaunchContext},
};
use camino::Utf8PathBuf;
use libtest_mimic::{Arguments, Conclusion, Trial};
use mpitest_filtering::TagExpr;
use std::{ffi::OsString, process::ExitCode, sync::Arc};
use tracing::debug;

/// Command-line arguments: libtest's, plus a tag expression.
#[derive(Clone, Debug)]
pub struct HarnessArgs {
    tags: Option<String>,
    libtest: Arguments,
}

impl HarnessArgs {
    /// Parses the arguments of the current process.
    pub fn from_args() -> Result<Self, HarnessError> {
        Self::from_iter(std::env::args_os())
    }

    /// Parses arguments, the first being the program name.
    ///
    /// `--tags <EXPR>`, `--tags=<EXPR>` and `-m <EXPR>` are extracted; everything else is parsed
    /// as libtest arguments. If the libtest arguments are invalid, this prints usage and exits
    /// the process, as libtest does.
    pub fn from_iter<I>(iter: I) -> Result<Self, HarnessError>
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        let mut tags = None;
        let mut rest = Vec::new();
        let mut iter = iter.into_iter().map(Into::into);
        while let Some(arg) = iter.next() {
            match arg.to_str() {
                Some("--") => {
                    rest.push(arg);
                    rest.extend(iter.by_ref());
                }
                Some(flag @ ("--tags" | "-m")) => {
                    let value = iter.next().ok_or_else(|| HarnessError::Usage {
                        message: format!("`{flag}` requires a tag expression"),
                    })?;
                    tags = Some(os_to_string(flag, value)?);
                }
                Some(arg) if arg.starts_with("--tags=") => {
                    tags = Some(arg["--tags=".len()..].to_owned());
                }
                _ => rest.push(arg),
            }
        }

        Ok(Self {
            tags,
            libtest: Arguments::from_iter(rest),
        })
    }

    /// The tag expression, if one was passed.
    pub fn tags(&self) -> Option<&str> {
        self.tags.as_deref()
    }

    /// The libtest arguments.
    pub fn libtest(&self) -> &Arguments {
        &self.libtest
    }
}

fn os_to_string(flag: &str, value: OsString) -> Result<String, HarnessError> {
    value.into_string().map_err(|value| HarnessError::Usage {
        message: format!("`{flag}` value is not valid UTF-8: {}", value.to_string_lossy()),
    })
}

/// Turns declared tests into libtest-mimic trials and runs them.
#[derive(Clone, Debug)]
pub struct Harness {
    config: MpiTestConfig,
    probe: Arc<dyn WorkerGroupProbe>,
    test_binary: Utf8PathBuf,
}

impl Harness {
    /// Creates a harness for the current process: configuration from the package root and the
    /// environment, the worker group from the environment, and the running test binary.
    pub fn from_env() -> Result<Self, HarnessError> {
        let config = match package_root() {
            Some(root) => MpiTestConfig::from_sources(&root, None)?,
            None => MpiTestConfig::default_config(),
        };
        let config = config.apply_env()?;

        let test_binary = std::env::current_exe()
            .and_then(|exe| Utf8PathBuf::try_from(exe).map_err(|error| error.into_io_error()))
            .map_err(HarnessError::CurrentExe)?;

        Ok(Self::new(config, Arc::new(EnvProbe::from_env()), test_binary))
    }

    /// Creates a harness from its parts.
    pub fn new(
        config: MpiTestConfig,
        probe: Arc<dyn WorkerGroupProbe>,
        test_binary: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            config,
            probe,
            test_binary: test_binary.into(),
        }
    }

    /// Builds the test list and converts it to trials, adjusting the libtest arguments for the
    /// execution mode.
    pub fn prepare(
        &self,
        args: HarnessArgs,
        tests: impl IntoIterator<Item = MpiTest>,
    ) -> Result<(Arguments, Vec<Trial>), HarnessError> {
        let HarnessArgs { tags, mut libtest } = args;

        let tag_expr = tags
            .as_deref()
            .map(TagExpr::parse)
            .transpose()
            .map_err(HarnessError::TagExpr)?;

        let mut list = TestList::new(tests, self.config.process_limit());
        if let Some(expr) = &tag_expr {
            list.retain_matching(expr);
        }

        let dispatcher = Dispatcher::new(
            self.probe.clone(),
            LaunchContext::new(
                self.config.launcher().clone(),
                self.test_binary.clone(),
                !libtest.nocapture,
            ),
        );

        match dispatcher.mode() {
            ExecutionMode::NonForking => {
                // Every worker must run the same tests in the same order.
                match libtest.test_threads {
                    Some(requested) if requested > 1 => {
                        return Err(HarnessError::MultipleTestThreads { requested });
                    }
                    _ => libtest.test_threads = Some(1),
                }
                if self.probe.is_launched_child() {
                    check_child_selection(&libtest, &list)?;
                }
            }
            ExecutionMode::Forking => {
                if list.has_parallel() && libtest.test_threads.is_none() {
                    debug!("parallel tests present: defaulting to a single test thread");
                    libtest.test_threads = Some(1);
                }
            }
        }

        let dispatcher = Arc::new(dispatcher);
        let trials = list
            .into_entries()
            .into_iter()
            .map(|entry| {
                let name = entry.name().to_owned();
                let ignored = entry.is_ignored();
                let dispatcher = dispatcher.clone();
                Trial::test(name, move || dispatcher.run_entry(&entry).into_result())
                    .with_ignored_flag(ignored)
            })
            .collect();

        Ok((libtest, trials))
    }

    /// Runs the tests.
    pub fn run(
        &self,
        args: HarnessArgs,
        tests: impl IntoIterator<Item = MpiTest>,
    ) -> Result<Conclusion, HarnessError> {
        let (libtest, trials) = self.prepare(args, tests)?;
        Ok(libtest_mimic::run(&libtest, trials))
    }
}

/// A launched worker must be asked to run at least one parallel variant, otherwise the launch
/// would pass without testing anything.
fn check_child_selection(libtest: &Arguments, list: &TestList) -> Result<(), HarnessError> {
    let selected = list
        .entries()
        .iter()
        .filter(|entry| matches!(entry, TestListEntry::Parallel(_)))
        .any(|entry| !is_filtered_out(libtest, entry.name()));
    if selected {
        Ok(())
    } else {
        Err(HarnessError::NoParallelTestSelected {
            filter: libtest
                .filter
                .clone()
                .unwrap_or_else(|| "<none>".to_owned()),
        })
    }
}

// Matches libtest's name filtering.
fn is_filtered_out(libtest: &Arguments, name: &str) -> bool {
    let matches = |pattern: &str| {
        if libtest.exact {
            name == pattern
        } else {
            name.contains(pattern)
        }
    };
    if let Some(filter) = &libtest.filter {
        if !matches(filter) {
            return true;
        }
    }
    libtest.skip.iter().any(|skip| matches(skip))
}

/// Runs the declared tests with the arguments of the current process and returns the exit code.
pub fn main(tests: impl IntoIterator<Item = MpiTest>) -> ExitCode {
    match try_main(tests) {
        Ok(conclusion) => conclusion.exit_code(),
        Err(error) => {
            Color::Auto.init();
            error.display_to_stderr();
            ExitCode::from(u8::try_from(error.process_exit_code()).unwrap_or(1))
        }
    }
}

fn try_main(tests: impl IntoIterator<Item = MpiTest>) -> Result<Conclusion, HarnessError> {
    let args = HarnessArgs::from_args()?;
    args.libtest.color.map_or(Color::Auto, Color::from).init();
    Harness::from_env()?.run(args, tests)
}
