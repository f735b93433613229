// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests
//!
//! These drive a [`RunCoordinator`] end-to-end against a shell script standing in for the build
//! tool (see `fake_tool.rs`), so they only run on Unix.

#![cfg(unix)]

mod fake_tool;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::Result;
use dotnet_explorer_runner::{
    debug::{AttachConfig, DebugAttacher},
    directories::TestDirectories,
    discovery::{DotnetDiscoverer, TestDiscoverer},
    errors::{AttachError, DiscoveryError, RunCommandError},
    events::{EventSender, ExplorerEvent, event_channel},
    report::TestOutcome,
    runner::{DiscoveryOutcome, RunCoordinator, RunOutcome, RunSettings},
    test_command::ProcessExecutor,
    test_filter::{ExtraArguments, RunRequest},
};
use fake_tool::{FakeWorkspace, trx};
use futures::{FutureExt, future::BoxFuture};
use pretty_assertions::assert_eq;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

struct StaticDiscoverer {
    tests: HashMap<Utf8PathBuf, Vec<String>>,
}

impl TestDiscoverer for StaticDiscoverer {
    fn discover<'a>(
        &'a self,
        directory: &'a Utf8Path,
    ) -> BoxFuture<'a, Result<Vec<String>, DiscoveryError>> {
        let names = self.tests.get(directory).cloned().unwrap_or_default();
        async move { Ok(names) }.boxed()
    }
}

fn settings(workspace: &FakeWorkspace, run_in_parallel: bool) -> RunSettings {
    RunSettings {
        program: workspace.tool().to_owned(),
        extra_arguments: ExtraArguments::parse("--verbosity quiet"),
        run_in_parallel,
        results_parent: workspace.root().join("results"),
    }
}

fn coordinator(
    workspace: &FakeWorkspace,
    projects: &[&Utf8PathBuf],
    run_in_parallel: bool,
    executor: ProcessExecutor,
    events: EventSender,
) -> Result<RunCoordinator> {
    let settings = settings(workspace, run_in_parallel);
    let discoverer = StaticDiscoverer {
        tests: HashMap::new(),
    };
    let coordinator = RunCoordinator::new(
        settings,
        TestDirectories::new(projects.iter().map(|project| (*project).clone())),
        executor,
        Arc::new(discoverer),
        events,
    )?;
    Ok(coordinator)
}

fn last_args(project: &Utf8Path) -> Result<Vec<String>> {
    let args = std::fs::read_to_string(project.join("last-args.txt"))?;
    Ok(args.lines().map(str::to_owned).collect())
}

fn drain(receiver: &mut tokio::sync::mpsc::UnboundedReceiver<ExplorerEvent>) -> Vec<ExplorerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn all_tests_across_directories() -> Result<()> {
    let workspace = FakeWorkspace::new()?;
    let alpha = workspace.add_project(
        "Alpha",
        Some(&trx(&[("N.Alpha", "Works", "Passed"), ("N.Alpha", "Breaks", "Failed")])),
    )?;
    let beta = workspace.add_project("Beta", Some(&trx(&[("N.Beta", "Skips", "NotExecuted")])))?;

    let (sender, mut receiver) = event_channel();
    let coordinator = coordinator(
        &workspace,
        &[&alpha, &beta],
        true,
        ProcessExecutor::new(),
        sender,
    )?;

    let outcome = coordinator.run_test_command(RunRequest::all()).await?;
    let RunOutcome::Completed { results } = outcome else {
        panic!("expected a completed run, found {outcome:?}");
    };
    assert!(results.replace, "an all-tests run replaces earlier results");
    let mut outcomes: Vec<_> = results
        .records
        .iter()
        .map(|record| (record.qualified_name.as_str(), record.outcome))
        .collect();
    outcomes.sort_by_key(|(name, _)| *name);
    assert_eq!(
        outcomes,
        vec![
            ("N.Alpha.Breaks", TestOutcome::Failed),
            ("N.Alpha.Works", TestOutcome::Passed),
            ("N.Beta.Skips", TestOutcome::NotExecuted),
        ]
    );

    let results_dir = coordinator.results_dir();
    assert_eq!(
        last_args(&alpha)?,
        vec![
            "--verbosity".to_owned(),
            "quiet".to_owned(),
            "--no-build".to_owned(),
            "--logger".to_owned(),
            format!("trx;LogFileName={}", results_dir.join("0.trx")),
        ]
    );
    assert_eq!(
        last_args(&beta)?.last(),
        Some(&format!("trx;LogFileName={}", results_dir.join("1.trx")))
    );
    assert_eq!(
        std::fs::read_dir(results_dir)?.count(),
        0,
        "reports are deleted after parsing"
    );

    let events = drain(&mut receiver);
    assert_eq!(
        events[0],
        ExplorerEvent::RunStarted {
            pattern: String::new(),
            is_single_test: false,
        }
    );
    assert!(matches!(events[1], ExplorerEvent::NewResults(_)));
    assert_eq!(events.len(), 2);
    assert!(!coordinator.is_running());

    Ok(())
}

#[tokio::test]
async fn pattern_runs_only_matching_directories() -> Result<()> {
    let workspace = FakeWorkspace::new()?;
    let alpha = workspace.add_project("Alpha", Some(&trx(&[("N.Alpha", "Works", "Passed")])))?;
    let beta = workspace.add_project("Beta", Some(&trx(&[("N.Beta", "Works", "Passed")])))?;

    let settings = RunSettings {
        program: workspace.tool().to_owned(),
        extra_arguments: ExtraArguments::parse("--filter Category=Fast"),
        run_in_parallel: false,
        results_parent: workspace.root().join("results"),
    };
    let discoverer = StaticDiscoverer {
        tests: HashMap::from([
            (alpha.clone(), vec!["N.Alpha.Works".to_owned()]),
            (beta.clone(), vec!["N.Beta.Works".to_owned()]),
        ]),
    };
    let coordinator = RunCoordinator::new(
        settings,
        TestDirectories::new([alpha.clone(), beta.clone()]),
        ProcessExecutor::new(),
        Arc::new(discoverer),
        EventSender::noop(),
    )?;
    assert_eq!(coordinator.discover_tests().await.discovered().len(), 2);

    let request = RunRequest::new("N.Alpha.Works", true);
    let outcome = coordinator.run_test_command(request.clone()).await?;
    let results = outcome.results().expect("run completed");
    assert!(!results.replace, "a pattern run accumulates");
    assert_eq!(results.records.len(), 1);
    assert_eq!(results.records[0].qualified_name, "N.Alpha.Works");

    let args = last_args(&alpha)?;
    assert_eq!(
        &args[args.len() - 2..],
        &[
            "--filter".to_owned(),
            "FullyQualifiedName=N.Alpha.Works&Category=Fast".to_owned()
        ]
    );
    assert!(!beta.join("last-args.txt").exists(), "Beta was not run");
    assert_eq!(coordinator.last_request(), Some(request));

    Ok(())
}

#[tokio::test]
async fn build_failure_in_parallel() -> Result<()> {
    let workspace = FakeWorkspace::new()?;
    let alpha = workspace.add_project("Alpha", Some(&trx(&[("N.Alpha", "Works", "Passed")])))?;
    let beta = workspace.add_project("Beta", Some(&trx(&[("N.Beta", "Works", "Passed")])))?;
    workspace.mark(&alpha, "broken")?;

    let (sender, mut receiver) = event_channel();
    let coordinator = coordinator(
        &workspace,
        &[&alpha, &beta],
        true,
        ProcessExecutor::new(),
        sender,
    )?;

    let outcome = tokio::time::timeout(
        Duration::from_secs(60),
        coordinator.run_test_command(RunRequest::all()),
    )
    .await??;
    let RunOutcome::BuildFailed {
        failed,
        skipped,
        results,
    } = outcome
    else {
        panic!("expected a build failure, found {outcome:?}");
    };
    assert_eq!(failed, vec![alpha.clone()]);
    assert!(skipped.is_empty(), "parallel runs attempt every directory");
    assert!(!results.replace);
    assert_eq!(results.records.len(), 1);
    assert_eq!(results.records[0].qualified_name, "N.Beta.Works");
    assert!(!alpha.join("last-args.txt").exists());

    let events = drain(&mut receiver);
    assert_eq!(
        events[1],
        ExplorerEvent::BuildFailed {
            pattern: String::new(),
            is_single_test: false,
        }
    );
    assert!(matches!(&events[2], ExplorerEvent::NewResults(r) if !r.replace));

    // The failed request can be retried once the build is fixed.
    std::fs::remove_file(alpha.join("broken"))?;
    let retried = coordinator
        .rerun_last_command()
        .await
        .expect("a request was recorded")?;
    assert!(matches!(retried, RunOutcome::Completed { .. }));

    Ok(())
}

#[tokio::test]
async fn build_failure_stops_sequential_run() -> Result<()> {
    let workspace = FakeWorkspace::new()?;
    let alpha = workspace.add_project("Alpha", None)?;
    let beta = workspace.add_project("Beta", Some(&trx(&[("N.Beta", "Works", "Passed")])))?;
    workspace.mark(&alpha, "broken")?;

    let coordinator = coordinator(
        &workspace,
        &[&alpha, &beta],
        false,
        ProcessExecutor::new(),
        EventSender::noop(),
    )?;

    let outcome = coordinator.run_test_command(RunRequest::all()).await?;
    assert_eq!(
        outcome,
        RunOutcome::BuildFailed {
            failed: vec![alpha],
            skipped: vec![beta.clone()],
            results: Default::default(),
        }
    );
    assert!(!beta.join("last-args.txt").exists());

    Ok(())
}

#[tokio::test]
async fn stop_aborts_the_run() -> Result<()> {
    let workspace = FakeWorkspace::new()?;
    let alpha = workspace.add_project("Alpha", Some(&trx(&[("N.Alpha", "Works", "Passed")])))?;
    workspace.mark(&alpha, "slow")?;

    let coordinator = coordinator(
        &workspace,
        &[&alpha],
        false,
        ProcessExecutor::new(),
        EventSender::noop(),
    )?;

    let run = coordinator.run_test_command(RunRequest::new("", false));
    let stop = async {
        while !alpha.join("started").exists() || coordinator.executor().live_processes().is_empty()
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let rejected = coordinator
            .run_test_command(RunRequest::new("N.Other", true))
            .await;
        assert!(matches!(
            rejected,
            Err(RunCommandError::AlreadyRunning { .. })
        ));
        assert_eq!(coordinator.last_request(), Some(RunRequest::all()));

        coordinator.stop_all().await
    };

    let (outcome, stopped) =
        tokio::time::timeout(Duration::from_secs(20), async { tokio::join!(run, stop) }).await?;
    assert_eq!(outcome?, RunOutcome::UserAborted);
    assert_eq!(stopped, 1);
    assert!(coordinator.executor().live_processes().is_empty());
    assert!(!coordinator.is_running());
    assert_eq!(coordinator.stop_all().await, 0, "stopping again is a no-op");

    Ok(())
}

#[tokio::test]
async fn stop_during_discovery_aborts_it() -> Result<()> {
    let workspace = FakeWorkspace::new()?;
    let alpha = workspace.add_project("Alpha", Some(&trx(&[("N.Alpha", "Works", "Passed")])))?;
    let beta = workspace.add_project("Beta", Some(&trx(&[("N.Beta", "Works", "Passed")])))?;
    workspace.mark(&alpha, "slow-discovery")?;

    let executor = ProcessExecutor::new();
    let discoverer = DotnetDiscoverer::new(executor.clone(), workspace.tool(), "");
    let coordinator = RunCoordinator::new(
        settings(&workspace, false),
        TestDirectories::new([alpha.clone(), beta.clone()]),
        executor,
        Arc::new(discoverer),
        EventSender::noop(),
    )?;

    let discover = coordinator.discover_tests();
    let stop = async {
        while !alpha.join("discovering").exists()
            || coordinator.executor().live_processes().is_empty()
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        coordinator.stop_all().await
    };

    let (outcome, stopped) =
        tokio::time::timeout(Duration::from_secs(20), async { tokio::join!(discover, stop) })
            .await?;
    assert_eq!(stopped, 1);
    assert_eq!(
        outcome,
        DiscoveryOutcome::UserAborted {
            discovered: Vec::new()
        },
        "a sequential pass stops at the stopped directory"
    );
    assert!(!beta.join("discovering").exists());
    assert!(coordinator.executor().live_processes().is_empty());
    assert!(!alpha.join("last-args.txt").exists(), "nothing was built or tested");

    // Without the marker the next pass completes.
    std::fs::remove_file(alpha.join("slow-discovery"))?;
    let outcome = coordinator.discover_tests().await;
    assert!(!outcome.is_aborted());
    let names: Vec<_> = outcome
        .discovered()
        .iter()
        .flat_map(|tests| tests.names.iter().map(String::as_str))
        .collect();
    assert_eq!(names, ["N.Alpha.Works", "N.Beta.Works"]);

    Ok(())
}

struct ContinueFileAttacher {
    project: Utf8PathBuf,
    calls: Mutex<Vec<String>>,
}

impl DebugAttacher for ContinueFileAttacher {
    fn start_debugging<'a>(
        &'a self,
        config: &'a AttachConfig,
    ) -> BoxFuture<'a, Result<(), AttachError>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("attach {}", config.process_id));
        async { Ok(()) }.boxed()
    }

    fn continue_execution(&self) -> BoxFuture<'_, Result<(), AttachError>> {
        self.calls.lock().unwrap().push("continue".to_owned());
        let result = std::fs::write(self.project.join("continued"), "")
            .map_err(|error| AttachError::new(error.to_string()));
        async move { result }.boxed()
    }
}

#[tokio::test]
async fn debug_run_attaches_and_continues() -> Result<()> {
    let workspace = FakeWorkspace::new()?;
    let alpha = workspace.add_project("Alpha", Some(&trx(&[("N.Alpha", "Works", "Passed")])))?;

    let attacher = Arc::new(ContinueFileAttacher {
        project: alpha.clone(),
        calls: Mutex::new(Vec::new()),
    });
    let executor = ProcessExecutor::with_debug_attacher(attacher.clone(), Duration::ZERO);
    let coordinator = coordinator(&workspace, &[&alpha], true, executor, EventSender::noop())?;

    let outcome = tokio::time::timeout(
        Duration::from_secs(20),
        coordinator.run_test_command(RunRequest::all().with_debug(true)),
    )
    .await??;

    assert_eq!(
        *attacher.calls.lock().unwrap(),
        vec!["attach 4242".to_owned(), "continue".to_owned()]
    );
    assert_eq!(outcome.results().map(|r| r.records.len()), Some(1));
    assert_eq!(
        coordinator.executor().debug_state(),
        Default::default(),
        "debug state is cleared once the host exits"
    );

    Ok(())
}
