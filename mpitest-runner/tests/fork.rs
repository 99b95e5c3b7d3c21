// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tests for the forking strategy, with `sh` standing in for the distributed launcher.

#![cfg(unix)]

use camino::Utf8Path;
use camino_tempfile::tempdir;
use camino_tempfile_ext::prelude::*;
use indoc::formatdoc;
use mpitest_runner::{
    MarkerSpec, MarkerValue, MpiTest,
    config::MpiTestConfig,
    errors::ExecutionError,
    harness::{Harness, HarnessArgs},
    list::{TestList, TestListEntry},
    probe::EnvProbe,
    runner::{ChildExitStatus, Dispatcher, ExecutionOutcome, FailureDetail, LaunchContext},
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

/// Reads a config whose launcher runs `script` with `sh -c`, ignoring the generated arguments.
fn config_with_script(program: &str, script: &str) -> MpiTestConfig {
    let temp_dir = tempdir().unwrap();
    temp_dir
        .child(MpiTestConfig::CONFIG_PATH)
        .write_str(&formatdoc! {r#"
            [launcher]
            program = "{program}"
            args = ["-c", {script:?}, "sh"]
            quiet-other-ranks = false
        "#})
        .unwrap();
    MpiTestConfig::from_sources(temp_dir.path(), None).unwrap()
}

fn run_variant(config: &MpiTestConfig, nprocs: i64) -> ExecutionOutcome {
    let test = MpiTest::new("test_group", |_| panic!("the body only runs in the workers"))
        .with_marker(MarkerSpec::keyword("nprocs", MarkerValue::Int(nprocs)));
    let list = TestList::new([test], config.process_limit());
    let [TestListEntry::Parallel(variant)] = list.entries() else {
        panic!("expected a single parallel variant, found {:?}", list.entries());
    };

    let dispatcher = Dispatcher::new(
        Arc::new(EnvProbe::default()),
        LaunchContext::new(
            config.launcher().clone(),
            Utf8Path::new("/nonexistent/test-binary"),
            true,
        ),
    );
    dispatcher.run_variant(variant)
}

#[test]
fn test_successful_launch_passes() {
    let config = config_with_script("sh", "exit 0");
    let outcome = run_variant(&config, 2);
    assert!(outcome.is_success(), "unexpected outcome: {outcome:?}");
}

#[test]
fn test_workers_see_child_marker() {
    let config = config_with_script("sh", r#"test "$MPITEST_CHILD_PROCESS" = 1"#);
    let outcome = run_variant(&config, 4);
    assert!(outcome.is_success(), "unexpected outcome: {outcome:?}");
}

#[test]
fn test_failed_launch_captures_output() {
    let config = config_with_script("sh", "echo starting; echo boom >&2; exit 3");
    match run_variant(&config, 2) {
        ExecutionOutcome::Failed(FailureDetail::ChildExit {
            status,
            stdout,
            stderr,
        }) => {
            assert_eq!(status, ChildExitStatus::Code(3));
            assert_eq!(String::from_utf8_lossy(&stdout), "starting\n");
            assert_eq!(String::from_utf8_lossy(&stderr), "boom\n");
        }
        other => panic!("expected a child exit failure, found {other:?}"),
    }
}

#[test]
fn test_failure_message_includes_output() {
    let config = config_with_script("sh", "echo boom >&2; exit 1");
    let message = run_variant(&config, 3)
        .into_result()
        .expect_err("the launch fails");
    assert_eq!(
        message.message(),
        Some("worker group failed with exit code 1\n\n--- stderr ---\nboom")
    );
}

#[test]
fn test_missing_launcher_is_an_error() {
    let config = config_with_script("/nonexistent/mpiexec", "exit 0");
    match run_variant(&config, 2) {
        ExecutionOutcome::Errored(ExecutionError::Launch(failure)) => {
            assert!(
                failure.command().starts_with("/nonexistent/mpiexec -c"),
                "unexpected command: {}",
                failure.command()
            );
            assert_eq!(failure.io_error().kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("expected a launch error, found {other:?}"),
    }
}

#[test]
fn test_single_worker_runs_in_place() {
    // A launcher that always fails shows that nothing was launched.
    let config = config_with_script("sh", "exit 1");
    let test = MpiTest::new("test_one", |context| {
        assert_eq!(context.nprocs().get(), 1);
        assert_eq!(context.rank(), Some(0));
        Ok(())
    })
    .with_marker(MarkerSpec::positional(MarkerValue::Int(1)));

    let harness = Harness::new(
        config,
        Arc::new(EnvProbe::default()),
        "/nonexistent/test-binary",
    );
    let args = HarnessArgs::from_iter(["fork-test", "--quiet"]).unwrap();
    let conclusion = harness.run(args, [test]).unwrap();
    assert_eq!(conclusion.num_passed, 1);
    assert_eq!(conclusion.num_failed, 0);
}

#[test]
fn test_harness_runs_each_variant() {
    let config = config_with_script("sh", "exit 0");
    let tests = [
        MpiTest::new("test_serial", |context| {
            assert_eq!(context.nprocs().get(), 1);
            Ok(())
        }),
        MpiTest::new("test_sum", |_| panic!("the body only runs in the workers"))
            .with_marker_text("parallel(nprocs=[2, 4])"),
        MpiTest::new("test_bad", |_| Ok(())).with_marker_text("parallel(nprocs=0)"),
    ];

    let harness = Harness::new(
        config,
        Arc::new(EnvProbe::default()),
        "/nonexistent/test-binary",
    );
    let args = HarnessArgs::from_iter(["fork-test", "--quiet"]).unwrap();
    let conclusion = harness.run(args, tests).unwrap();
    assert_eq!(conclusion.num_passed, 3);
    assert_eq!(conclusion.num_failed, 1);
}
