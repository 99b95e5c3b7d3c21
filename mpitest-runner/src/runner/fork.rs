// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The forking strategy: launch a new worker group that reruns exactly one variant.

use super::{ExecutionOutcome, LaunchContext, outcome_from_output, run_body};
use crate::{
    errors::LaunchFailure,
    launcher::LauncherCli,
    list::{TestVariant, WorkerContext},
};
use tracing::debug;

pub(super) fn run(variant: &TestVariant, launch: &LaunchContext) -> ExecutionOutcome {
    // A single worker is a degenerate group: run it here.
    if variant.nprocs().get() == 1 {
        debug!("running `{}` in place with a single worker", variant.name());
        return run_body(variant.body(), WorkerContext::new(variant.nprocs(), Some(0)));
    }

    let cli = LauncherCli::for_variant(
        &launch.launcher,
        &launch.test_binary,
        variant.name(),
        variant.nprocs(),
    );
    let command = cli.display_command();
    debug!("launching worker group: {command}");

    let mut expression = cli.to_expression().unchecked();
    if launch.capture {
        expression = expression.stdout_capture().stderr_capture();
    }

    match expression.run() {
        Ok(output) => {
            debug!("`{}` finished with {}", variant.name(), output.status);
            outcome_from_output(output)
        }
        Err(error) => {
            debug!("failed to spawn the launcher: {error}");
            ExecutionOutcome::Errored(LaunchFailure::new(command, error).into())
        }
    }
}
