// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs parallel tests through the full launcher round trip.
//!
//! This binary plays three roles:
//!
//! * Invoked with `--fake-mpiexec` first, it stands in for `mpiexec`: it accepts
//!   `-n N <binary> <args...> [: -n M <binary> <args...>]` and runs each rank in turn with
//!   `PMI_SIZE` and `PMI_RANK` set.
//! * Invoked as a launched worker (`MPITEST_CHILD_PROCESS` set), it is an mpitest harness over
//!   [`worker_tests`].
//! * Otherwise, it runs the checks below with libtest-mimic, launching itself as the launcher.

use camino::Utf8PathBuf;
use libtest_mimic::{Arguments, Failed, Trial};
use mpitest_runner::{
    MpiTest,
    config::{LauncherConfig, ProcessLimit},
    exit_codes::MpitestExitCode,
    harness,
    list::{TestList, TestListEntry},
    probe::{CHILD_PROCESS_ENV, EnvProbe, WorkerGroupProbe},
    runner::{ChildExitStatus, Dispatcher, ExecutionOutcome, FailureDetail, LaunchContext},
};
use std::{process::ExitCode, sync::Arc};

const FAKE_MPIEXEC: &str = "--fake-mpiexec";
const SIZE_OFFSET: &str = "--size-offset";

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1).peekable();
    if args.peek().map(String::as_str) == Some(FAKE_MPIEXEC) {
        return fake_mpiexec(args.skip(1).collect());
    }
    if EnvProbe::from_env().is_launched_child() {
        return harness::main(worker_tests());
    }

    let args = Arguments::from_args();
    let trials = vec![
        Trial::test("launch::test_passing_body_passes", test_passing_body_passes),
        Trial::test("launch::test_failing_body_fails", test_failing_body_fails),
        Trial::test(
            "launch::test_size_mismatch_fails_workers",
            test_size_mismatch_fails_workers,
        ),
        Trial::test(
            "launch::test_worker_without_selection",
            test_worker_without_selection,
        ),
    ];
    libtest_mimic::run(&args, trials).exit_code()
}

/// The tests seen by launched workers.
fn worker_tests() -> Vec<MpiTest> {
    vec![
        MpiTest::new("test_serial", |_| Ok(())),
        MpiTest::new("test_ranks", |context| {
            let nprocs = context.nprocs().get();
            match context.rank() {
                Some(rank) if rank < nprocs => Ok(()),
                other => Err(format!("rank {other:?} out of range for {nprocs} workers").into()),
            }
        })
        .with_marker_text("parallel(nprocs=[2, 3])"),
        MpiTest::new("test_boom", |context| {
            Err(format!("boom from rank {:?}", context.rank()).into())
        })
        .with_marker_text("parallel(2)"),
    ]
}

fn current_exe() -> Utf8PathBuf {
    Utf8PathBuf::try_from(std::env::current_exe().expect("current exe is available"))
        .expect("current exe is valid UTF-8")
}

fn launch(variant_name: &str, launcher_args: &[&str]) -> ExecutionOutcome {
    let exe = current_exe();
    let launcher = LauncherConfig {
        program: exe.to_string(),
        args: launcher_args.iter().map(|arg| (*arg).to_owned()).collect(),
        nprocs_flag: "-n".to_owned(),
        quiet_other_ranks: true,
    };
    let list = TestList::new(worker_tests(), ProcessLimit::UNBOUNDED);
    let variant = list
        .entries()
        .iter()
        .find_map(|entry| match entry {
            TestListEntry::Parallel(variant) if variant.name() == variant_name => Some(variant),
            _ => None,
        })
        .unwrap_or_else(|| panic!("variant `{variant_name}` is in the list"));

    let dispatcher = Dispatcher::new(
        Arc::new(EnvProbe::default()),
        LaunchContext::new(launcher, exe, true),
    );
    dispatcher.run_variant(variant)
}

fn test_passing_body_passes() -> Result<(), Failed> {
    for name in ["test_ranks[nprocs=2]", "test_ranks[nprocs=3]"] {
        let outcome = launch(name, &[FAKE_MPIEXEC]);
        assert!(outcome.is_success(), "`{name}` passes: {outcome:?}");
    }
    Ok(())
}

fn test_failing_body_fails() -> Result<(), Failed> {
    match launch("test_boom", &[FAKE_MPIEXEC]) {
        ExecutionOutcome::Failed(FailureDetail::ChildExit { status, stdout, .. }) => {
            assert_eq!(status, ChildExitStatus::Code(MpitestExitCode::TEST_RUN_FAILED));
            let stdout = String::from_utf8_lossy(&stdout);
            assert!(stdout.contains("boom from rank Some(0)"), "stdout: {stdout}");
        }
        other => panic!("expected a child exit failure, found {other:?}"),
    }
    Ok(())
}

fn test_size_mismatch_fails_workers() -> Result<(), Failed> {
    // Each worker sees a group of 3 for a variant requesting 2, so none of them runs the body.
    match launch("test_ranks[nprocs=2]", &[FAKE_MPIEXEC, SIZE_OFFSET, "1"]) {
        ExecutionOutcome::Failed(FailureDetail::ChildExit { status, stdout, .. }) => {
            assert_eq!(status, ChildExitStatus::Code(MpitestExitCode::TEST_RUN_FAILED));
            let stdout = String::from_utf8_lossy(&stdout);
            assert!(
                stdout.contains(
                    "error: test `test_ranks[nprocs=2]` requires 2 worker processes, \
                     but the ambient worker group has 3"
                ),
                "stdout: {stdout}"
            );
        }
        other => panic!("expected a child exit failure, found {other:?}"),
    }
    Ok(())
}

fn test_worker_without_selection() -> Result<(), Failed> {
    let output = duct::cmd(current_exe().as_str(), ["--exact", "test_serial"])
        .env(CHILD_PROCESS_ENV, "1")
        .env("PMI_SIZE", "2")
        .env("PMI_RANK", "0")
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .expect("worker ran");
    assert_eq!(output.status.code(), Some(MpitestExitCode::SETUP_ERROR));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("selected no parallel test"), "stderr: {stderr}");
    Ok(())
}

/// Runs every rank of every group in turn, exiting with the first failing rank's exit code.
fn fake_mpiexec(args: Vec<String>) -> ExitCode {
    let (size_offset, args) = match args.split_first() {
        Some((flag, rest)) if flag == SIZE_OFFSET => {
            let (offset, rest) = rest.split_first().expect("size offset has a value");
            (offset.parse::<usize>().expect("size offset is an integer"), rest)
        }
        _ => (0, args.as_slice()),
    };

    let groups: Vec<(usize, &[String])> = args
        .split(|arg| arg == ":")
        .map(|group| match group {
            [flag, nprocs, command @ ..] if flag == "-n" && !command.is_empty() => {
                (nprocs.parse().expect("process count is an integer"), command)
            }
            other => panic!("malformed launcher group: {other:?}"),
        })
        .collect();
    let size = groups.iter().map(|(nprocs, _)| nprocs).sum::<usize>() + size_offset;

    let mut rank = 0;
    let mut failure = None;
    for (nprocs, command) in groups {
        let (program, args) = command.split_first().expect("command is non-empty");
        for _ in 0..nprocs {
            let output = duct::cmd(program.as_str(), args)
                .env("PMI_SIZE", size.to_string())
                .env("PMI_RANK", rank.to_string())
                .unchecked()
                .run()
                .expect("worker ran");
            if !output.status.success() && failure.is_none() {
                failure = Some(output.status.code().unwrap_or(1));
            }
            rank += 1;
        }
    }

    match failure {
        None => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
    }
}
