// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Building distributed launcher command lines.

use crate::{config::LauncherConfig, probe::CHILD_PROCESS_ENV};
use camino::Utf8Path;
use std::{borrow::Cow, num::NonZeroUsize};

/// A distributed launcher invocation that reruns a single test variant under a worker group.
///
/// With `quiet-other-ranks` enabled and more than one worker, the launcher's MPMD syntax is used
/// so that rank 0 reports normally while the remaining ranks pass `--quiet`:
///
/// ```text
/// mpiexec -n 1 <test-binary> --exact <name> ... : -n 3 <test-binary> --exact <name> ... --quiet
/// ```
#[derive(Clone, Debug)]
pub struct LauncherCli<'a> {
    program: &'a str,
    args: Vec<Cow<'a, str>>,
}

impl<'a> LauncherCli<'a> {
    /// Creates a launcher invocation running `test_name` from `test_binary` with `nprocs` workers.
    pub fn for_variant(
        config: &'a LauncherConfig,
        test_binary: &'a Utf8Path,
        test_name: &'a str,
        nprocs: NonZeroUsize,
    ) -> Self {
        let mut cli = Self {
            program: &config.program,
            args: config.args.iter().map(|arg| arg.as_str().into()).collect(),
        };

        let nprocs = nprocs.get();
        if config.quiet_other_ranks && nprocs > 1 {
            cli.add_group(config, 1, test_binary, test_name, false);
            cli.add_arg(":");
            cli.add_group(config, nprocs - 1, test_binary, test_name, true);
        } else {
            cli.add_group(config, nprocs, test_binary, test_name, false);
        }
        cli
    }

    fn add_group(
        &mut self,
        config: &'a LauncherConfig,
        nprocs: usize,
        test_binary: &'a Utf8Path,
        test_name: &'a str,
        quiet: bool,
    ) {
        self.add_arg(config.nprocs_flag.as_str())
            .add_arg(nprocs.to_string())
            .add_arg(test_binary.as_str())
            .add_arg("--exact")
            .add_arg(test_name)
            .add_arg("--include-ignored")
            .add_arg("--test-threads")
            .add_arg("1")
            .add_arg("--nocapture");
        if quiet {
            self.add_arg("--quiet").add_arg("--color").add_arg("never");
        }
    }

    fn add_arg(&mut self, arg: impl Into<Cow<'a, str>>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// The launcher program.
    pub fn program(&self) -> &str {
        self.program
    }

    /// The arguments passed to the launcher.
    pub fn args(&self) -> impl Iterator<Item = &str> + '_ {
        self.args.iter().map(|arg| &**arg)
    }

    /// The full command line, quoted for display.
    pub fn display_command(&self) -> String {
        shell_words::join(std::iter::once(self.program).chain(self.args()))
    }

    /// Converts the command to a [`duct::Expression`].
    ///
    /// The launcher runs in its own process group, with [`CHILD_PROCESS_ENV`] set so that the
    /// workers run the test in place.
    pub fn to_expression(&self) -> duct::Expression {
        // Pass the program as a str so that duct doesn't treat it as a path relative to the
        // current directory.
        duct::cmd(self.program, self.args())
            .env(CHILD_PROCESS_ENV, "1")
            .before_spawn(|command| {
                os::set_process_group(command);
                Ok(())
            })
    }
}

#[cfg(unix)]
mod os {
    use std::os::unix::process::CommandExt;

    pub(super) fn set_process_group(command: &mut std::process::Command) {
        command.process_group(0);
    }
}

#[cfg(not(unix))]
mod os {
    pub(super) fn set_process_group(_command: &mut std::process::Command) {}
}
