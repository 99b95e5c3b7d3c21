// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The non-forking strategy: this process is already one of the workers.

use super::{ExecutionOutcome, run_body};
use crate::{
    errors::{GroupSizeUnavailable, WorkerCountMismatch},
    list::{TestVariant, WorkerContext},
    probe::WorkerGroupProbe,
};
use tracing::debug;

pub(super) fn run(variant: &TestVariant, probe: &dyn WorkerGroupProbe) -> ExecutionOutcome {
    let Some(ambient) = probe.group_size() else {
        return ExecutionOutcome::Errored(
            GroupSizeUnavailable {
                test_name: variant.name().to_owned(),
            }
            .into(),
        );
    };

    // The body must not run when the group is the wrong size: collective operations would hang.
    if ambient != variant.nprocs().get() {
        return ExecutionOutcome::Errored(
            WorkerCountMismatch {
                test_name: variant.name().to_owned(),
                expected: variant.nprocs(),
                ambient,
            }
            .into(),
        );
    }

    debug!(
        "running `{}` in place as rank {:?} of {ambient}",
        variant.name(),
        probe.rank(),
    );
    run_body(variant.body(), WorkerContext::new(variant.nprocs(), probe.rank()))
}
