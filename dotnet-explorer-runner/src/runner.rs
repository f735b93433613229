// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run coordinator.
//!
//! A [`RunCoordinator`] owns everything that used to be process-wide: the live-process registry
//! and debug state (through its [`ProcessExecutor`]), the directory ↔ test index, the shared
//! results folder and the last accepted request. At most one run is in flight at a time.
//!
//! A run goes `Idle → Running → {Completed, BuildFailed, UserAborted} → Idle`. Each target
//! directory is built and then tested with its own result file; results are only collected once
//! every directory has finished.

use crate::{
    config::ExplorerConfig,
    directories::TestDirectories,
    discovery::TestDiscoverer,
    errors::{DiscoveryError, DisplayErrorChain, ExecuteError, ResultsDirError, RunCommandError},
    events::{DiscoveredTests, EventSender, ExplorerEvent},
    report::{ResultRecord, TestResults, parse_report_file},
    test_command::{ProcessExecutor, ToolCommand, lock},
    test_filter::{ExtraArguments, RunRequest, TestFilter},
};
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use debug_ignore::DebugIgnore;
use futures::future::join_all;
use itertools::Itertools;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const RESULTS_DIR_PREFIX: &str = "test-explorer-";
const REPORT_EXTENSION: &str = "trx";

/// Settings for a [`RunCoordinator`].
#[derive(Clone, Debug)]
pub struct RunSettings {
    /// The build tool.
    pub program: String,

    /// The user's extra test arguments.
    pub extra_arguments: ExtraArguments,

    /// Whether directories are built and tested in parallel.
    pub run_in_parallel: bool,

    /// The directory the shared results folder is created in.
    pub results_parent: Utf8PathBuf,
}

impl RunSettings {
    /// Derives run settings from the user configuration.
    pub fn from_config(config: &ExplorerConfig) -> Self {
        Self {
            program: config.build_tool.clone(),
            extra_arguments: config.extra_arguments(),
            run_in_parallel: config.run_in_parallel,
            results_parent: config.path_for_result_file.clone(),
        }
    }
}

/// How a run request ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    /// Every directory was built and tested.
    Completed {
        /// The merged results.
        results: TestResults,
    },

    /// At least one build failed. Tests in scope of the request are not run, and the request
    /// can be retried with [`RunCoordinator::rerun_last_command`].
    BuildFailed {
        /// The directories whose build failed.
        failed: Vec<Utf8PathBuf>,

        /// The directories that were not attempted because of the failure.
        skipped: Vec<Utf8PathBuf>,

        /// Results from directories that did build and test.
        results: TestResults,
    },

    /// A process was killed by [`RunCoordinator::stop_all`].
    UserAborted,

    /// No known directory contains a test matching the pattern.
    NoMatchingDirectory,
}

impl RunOutcome {
    /// Returns the results of the run, if any were collected.
    pub fn results(&self) -> Option<&TestResults> {
        match self {
            Self::Completed { results } | Self::BuildFailed { results, .. } => Some(results),
            Self::UserAborted | Self::NoMatchingDirectory => None,
        }
    }
}

/// How a discovery pass ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DiscoveryOutcome {
    /// Every directory was asked for its tests.
    Completed {
        /// The directories that reported at least one test.
        discovered: Vec<DiscoveredTests>,
    },

    /// A discovery process was killed by [`RunCoordinator::stop_all`].
    ///
    /// Directories that finished before the stop are still indexed.
    UserAborted {
        /// The directories that reported at least one test before the stop.
        discovered: Vec<DiscoveredTests>,
    },
}

impl DiscoveryOutcome {
    /// Returns the directories that reported tests.
    pub fn discovered(&self) -> &[DiscoveredTests] {
        match self {
            Self::Completed { discovered } | Self::UserAborted { discovered } => discovered,
        }
    }

    /// Returns true if the pass was stopped.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::UserAborted { .. })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RunState {
    Idle,
    Running,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DirectoryStatus {
    Tested,
    TestsNotRun,
    BuildFailed,
    Aborted,
    Skipped,
}

/// Coordinates discovery and test runs across project directories.
#[derive(Debug)]
pub struct RunCoordinator {
    settings: RunSettings,
    executor: ProcessExecutor,
    discoverer: DebugIgnore<Arc<dyn TestDiscoverer>>,
    directories: Mutex<TestDirectories>,
    results_dir: Utf8TempDir,
    state: Mutex<RunState>,
    last_request: Mutex<Option<RunRequest>>,
    events: EventSender,
}

impl RunCoordinator {
    /// Creates a coordinator, creating the shared results folder under
    /// [`RunSettings::results_parent`].
    pub fn new(
        settings: RunSettings,
        directories: TestDirectories,
        executor: ProcessExecutor,
        discoverer: Arc<dyn TestDiscoverer>,
        events: EventSender,
    ) -> Result<Self, ResultsDirError> {
        let parent = &settings.results_parent;
        std::fs::create_dir_all(parent).map_err(|error| ResultsDirError::new(parent, error))?;
        let results_dir = camino_tempfile::Builder::new()
            .prefix(RESULTS_DIR_PREFIX)
            .tempdir_in(parent)
            .map_err(|error| ResultsDirError::new(parent, error))?;
        debug!("storing result reports in {}", results_dir.path());

        Ok(Self {
            settings,
            executor,
            discoverer: DebugIgnore(discoverer),
            directories: Mutex::new(directories),
            results_dir,
            state: Mutex::new(RunState::Idle),
            last_request: Mutex::new(None),
            events,
        })
    }

    /// Returns the executor, for stopping processes from elsewhere.
    pub fn executor(&self) -> &ProcessExecutor {
        &self.executor
    }

    /// Returns the shared results folder.
    pub fn results_dir(&self) -> &Utf8Path {
        self.results_dir.path()
    }

    /// Returns true while a run is in flight.
    pub fn is_running(&self) -> bool {
        *lock(&self.state) == RunState::Running
    }

    /// Returns the last accepted run request.
    pub fn last_request(&self) -> Option<RunRequest> {
        lock(&self.last_request).clone()
    }

    /// Returns a snapshot of the directory ↔ test index.
    pub fn directories(&self) -> TestDirectories {
        lock(&self.directories).clone()
    }

    /// Discovers the tests in every known directory, replacing the index.
    ///
    /// A directory whose discovery fails contributes no names. Directories without tests are
    /// left out of the result. If a discovery process is stopped, a sequential pass does not
    /// visit the remaining directories and the pass ends as [`DiscoveryOutcome::UserAborted`].
    pub async fn discover_tests(&self) -> DiscoveryOutcome {
        self.events.send(ExplorerEvent::DiscoveryStarted);
        let directories = {
            let mut index = lock(&self.directories);
            index.clear_tests();
            index.directories().to_vec()
        };

        // `None` means the directory's discovery was stopped.
        let discover_one = |directory: Utf8PathBuf| async move {
            match self.discoverer.discover(&directory).await {
                Ok(names) => {
                    debug!("discovered {} tests in {directory}", names.len());
                    lock(&self.directories).add_tests(&directory, names.iter().cloned());
                    Some(DiscoveredTests { directory, names })
                }
                Err(DiscoveryError::Aborted { .. }) => {
                    info!("test discovery in {directory} was stopped");
                    None
                }
                Err(error) => {
                    warn!("{}", DisplayErrorChain::new(error));
                    Some(DiscoveredTests {
                        directory,
                        names: Vec::new(),
                    })
                }
            }
        };

        let all = if self.settings.run_in_parallel {
            join_all(directories.into_iter().map(discover_one)).await
        } else {
            let mut all = Vec::with_capacity(directories.len());
            for directory in directories {
                let discovered = discover_one(directory).await;
                let aborted = discovered.is_none();
                all.push(discovered);
                if aborted {
                    break;
                }
            }
            all
        };

        let aborted = all.iter().any(Option::is_none);
        let discovered: Vec<_> = all
            .into_iter()
            .flatten()
            .filter(|discovered| !discovered.names.is_empty())
            .collect();
        self.events
            .send(ExplorerEvent::DiscoveryFinished(discovered.clone()));
        if aborted {
            DiscoveryOutcome::UserAborted { discovered }
        } else {
            DiscoveryOutcome::Completed { discovered }
        }
    }

    /// Builds and runs the tests for `request`.
    ///
    /// Returns [`RunCommandError::AlreadyRunning`] without touching the in-flight run if one is
    /// in progress.
    pub async fn run_test_command(
        &self,
        request: RunRequest,
    ) -> Result<RunOutcome, RunCommandError> {
        let _guard = self.begin_run(&request.pattern)?;

        if request.debug && self.executor.debug_state().is_setting_up {
            info!("debugger already running");
            return Err(RunCommandError::DebugAlreadyActive);
        }

        let directories = lock(&self.directories).directories_for(&request.pattern);
        if directories.is_empty() {
            warn!(
                "could not find a matching test directory for `{}`",
                request.pattern
            );
            return Ok(RunOutcome::NoMatchingDirectory);
        }

        *lock(&self.last_request) = Some(request.clone());
        self.events.send(ExplorerEvent::RunStarted {
            pattern: request.pattern.clone(),
            is_single_test: request.is_single_test,
        });

        let filter = TestFilter::compile(&request, &self.settings.extra_arguments);
        let statuses = self.run_directories(&directories, &request, &filter).await;

        if statuses.contains(&DirectoryStatus::Aborted) {
            info!("run was stopped");
            self.discard_reports();
            return Ok(RunOutcome::UserAborted);
        }

        let records = self.collect_results()?;
        let failed = directories_with(&directories, &statuses, DirectoryStatus::BuildFailed);
        if !failed.is_empty() {
            let skipped = directories_with(&directories, &statuses, DirectoryStatus::Skipped);
            let results = TestResults {
                replace: false,
                records,
            };
            self.events.send(ExplorerEvent::BuildFailed {
                pattern: request.pattern.clone(),
                is_single_test: request.is_single_test,
            });
            if !results.records.is_empty() {
                self.events.send(ExplorerEvent::NewResults(results.clone()));
            }
            return Ok(RunOutcome::BuildFailed {
                failed,
                skipped,
                results,
            });
        }

        let results = TestResults {
            replace: request.is_all_tests() && request.exclusions.is_empty(),
            records,
        };
        self.events.send(ExplorerEvent::NewResults(results.clone()));
        Ok(RunOutcome::Completed { results })
    }

    /// Replays the last accepted request unchanged. Returns `None` if nothing has run yet.
    pub async fn rerun_last_command(&self) -> Option<Result<RunOutcome, RunCommandError>> {
        let request = self.last_request()?;
        info!("retrying `{}`", request.pattern);
        Some(self.run_test_command(request).await)
    }

    /// Kills every tracked process. An in-flight run ends as [`RunOutcome::UserAborted`].
    pub async fn stop_all(&self) -> usize {
        self.executor.stop_all().await
    }

    fn begin_run(&self, pattern: &str) -> Result<RunGuard<'_>, RunCommandError> {
        let mut state = lock(&self.state);
        if *state == RunState::Running {
            info!("tests already running, ignoring request for `{pattern}`");
            return Err(RunCommandError::AlreadyRunning {
                pattern: pattern.to_owned(),
            });
        }
        *state = RunState::Running;
        Ok(RunGuard { state: &self.state })
    }

    async fn run_directories(
        &self,
        directories: &[Utf8PathBuf],
        request: &RunRequest,
        filter: &TestFilter,
    ) -> Vec<DirectoryStatus> {
        let jobs = directories
            .iter()
            .enumerate()
            .map(|(index, directory)| self.run_directory(index, directory, request, filter));

        // Only one debug session can be set up at a time.
        if self.settings.run_in_parallel && !request.debug {
            return join_all(jobs).await;
        }

        let mut statuses = Vec::with_capacity(directories.len());
        for job in jobs {
            let status = match statuses.last() {
                Some(
                    DirectoryStatus::BuildFailed
                    | DirectoryStatus::Aborted
                    | DirectoryStatus::Skipped,
                ) => DirectoryStatus::Skipped,
                _ => job.await,
            };
            statuses.push(status);
        }
        statuses
    }

    async fn run_directory(
        &self,
        index: usize,
        directory: &Utf8Path,
        request: &RunRequest,
        filter: &TestFilter,
    ) -> DirectoryStatus {
        let program = &self.settings.program;
        let extra = &self.settings.extra_arguments;

        if extra.no_build() {
            info!("user has passed --no-build, skipping build");
        } else {
            match self.executor.run_build(program, directory).await {
                Ok(output) if output.killed => return DirectoryStatus::Aborted,
                Ok(output) if !output.success() => {
                    warn!("build failed in {directory} with {}", output.status);
                    if !output.stderr.is_empty() {
                        debug!("build stderr:\n{}", output.stderr);
                    }
                    return DirectoryStatus::BuildFailed;
                }
                Ok(_) => {}
                Err(error) => {
                    warn!("{}", DisplayErrorChain::new(error));
                    return DirectoryStatus::BuildFailed;
                }
            }
        }

        let result_file = self
            .results_dir
            .path()
            .join(format!("{index}.{REPORT_EXTENSION}"));
        let command = ToolCommand::test(program, extra, &result_file, filter);
        debug!("executing `{command}` in {directory}");

        let output = if request.debug {
            self.executor
                .run_test_with_debug_attach(&command, directory, true)
                .await
        } else {
            self.executor.run_test(&command, directory, true).await
        };

        match output {
            Ok(output) if output.killed => DirectoryStatus::Aborted,
            Ok(output) => {
                // Failing tests make the test command exit unsuccessfully; that's reported
                // through the results.
                debug!("tests in {directory} finished with {}", output.status);
                DirectoryStatus::Tested
            }
            Err(ExecuteError::DebugAlreadyActive) => {
                info!("debugger already running, not running tests in {directory}");
                DirectoryStatus::TestsNotRun
            }
            Err(error) => {
                warn!("{}", DisplayErrorChain::new(error));
                DirectoryStatus::TestsNotRun
            }
        }
    }

    fn report_files(&self) -> Result<Vec<Utf8PathBuf>, ResultsDirError> {
        let dir = self.results_dir.path();
        let files = dir
            .read_dir_utf8()
            .map_err(|error| ResultsDirError::new(dir, error))?
            .filter_map(|entry| {
                let path = entry.ok()?.into_path();
                (path.extension() == Some(REPORT_EXTENSION)).then_some(path)
            })
            .sorted()
            .collect();
        Ok(files)
    }

    /// Parses and deletes every pending report. A report that fails to parse counts as empty.
    fn collect_results(&self) -> Result<Vec<ResultRecord>, ResultsDirError> {
        let mut records = Vec::new();
        for path in self.report_files()? {
            match parse_report_file(&path) {
                Ok(parsed) => {
                    debug!("read {} results from {path}", parsed.len());
                    records.extend(parsed);
                }
                Err(error) => warn!("{}", DisplayErrorChain::new(error)),
            }
        }
        Ok(records)
    }

    fn discard_reports(&self) {
        let files = match self.report_files() {
            Ok(files) => files,
            Err(error) => {
                warn!("{}", DisplayErrorChain::new(error));
                return;
            }
        };
        for path in files {
            if let Err(error) = std::fs::remove_file(&path) {
                debug!("failed to remove result report {path}: {error}");
            }
        }
    }
}

struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *lock(self.state) = RunState::Idle;
    }
}

fn directories_with(
    directories: &[Utf8PathBuf],
    statuses: &[DirectoryStatus],
    wanted: DirectoryStatus,
) -> Vec<Utf8PathBuf> {
    directories
        .iter()
        .zip(statuses)
        .filter(|(_, status)| **status == wanted)
        .map(|(directory, _)| directory.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{errors::DiscoveryError, events::event_channel, report::TestOutcome};
    use futures::{FutureExt, future::BoxFuture};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeDiscoverer {
        tests: HashMap<Utf8PathBuf, Vec<String>>,
        stopped: Vec<Utf8PathBuf>,
    }

    impl TestDiscoverer for FakeDiscoverer {
        fn discover<'a>(
            &'a self,
            directory: &'a Utf8Path,
        ) -> BoxFuture<'a, Result<Vec<String>, DiscoveryError>> {
            let result = if self.stopped.iter().any(|stopped| stopped == directory) {
                Err(DiscoveryError::Aborted {
                    directory: directory.to_owned(),
                })
            } else {
                Ok(self.tests.get(directory).cloned().unwrap_or_default())
            };
            async move { result }.boxed()
        }
    }

    fn coordinator(
        parent: &Utf8Path,
        discoverer: FakeDiscoverer,
        events: EventSender,
    ) -> RunCoordinator {
        let settings = RunSettings {
            program: "dotnet".to_owned(),
            extra_arguments: ExtraArguments::parse(""),
            run_in_parallel: true,
            results_parent: parent.to_owned(),
        };
        let directories = TestDirectories::new(discoverer.tests.keys().cloned().collect::<Vec<_>>());
        RunCoordinator::new(
            settings,
            directories,
            ProcessExecutor::new(),
            Arc::new(discoverer),
            events,
        )
        .expect("coordinator created")
    }

    #[tokio::test]
    async fn discovery_fills_the_index() {
        let temp = Utf8TempDir::new().expect("created temp dir");
        let discoverer = FakeDiscoverer {
            tests: HashMap::from([
                ("/w/A".into(), vec!["N.A.One".to_owned(), "N.A.Two".to_owned()]),
                ("/w/Empty".into(), Vec::new()),
            ]),
            ..Default::default()
        };
        let (sender, mut receiver) = event_channel();
        let coordinator = coordinator(temp.path(), discoverer, sender);

        let outcome = coordinator.discover_tests().await;
        assert!(!outcome.is_aborted());
        let discovered = outcome.discovered().to_vec();
        assert_eq!(
            discovered,
            vec![DiscoveredTests {
                directory: "/w/A".into(),
                names: vec!["N.A.One".to_owned(), "N.A.Two".to_owned()],
            }]
        );
        assert_eq!(receiver.try_recv(), Ok(ExplorerEvent::DiscoveryStarted));
        assert_eq!(
            receiver.try_recv(),
            Ok(ExplorerEvent::DiscoveryFinished(discovered))
        );
        assert_eq!(
            coordinator.directories().directories_for("N.A"),
            vec![Utf8PathBuf::from("/w/A")]
        );
        assert!(coordinator.results_dir().starts_with(temp.path()));
    }

    #[tokio::test]
    async fn stopped_discovery_is_reported() {
        let temp = Utf8TempDir::new().expect("created temp dir");
        let discoverer = FakeDiscoverer {
            tests: HashMap::from([
                ("/w/A".into(), vec!["N.A.One".to_owned()]),
                ("/w/B".into(), vec!["N.B.One".to_owned()]),
            ]),
            stopped: vec!["/w/B".into()],
        };
        let (sender, mut receiver) = event_channel();
        let coordinator = coordinator(temp.path(), discoverer, sender);

        let discovered = vec![DiscoveredTests {
            directory: "/w/A".into(),
            names: vec!["N.A.One".to_owned()],
        }];
        assert_eq!(
            coordinator.discover_tests().await,
            DiscoveryOutcome::UserAborted {
                discovered: discovered.clone()
            }
        );
        assert_eq!(receiver.try_recv(), Ok(ExplorerEvent::DiscoveryStarted));
        assert_eq!(
            receiver.try_recv(),
            Ok(ExplorerEvent::DiscoveryFinished(discovered))
        );
        assert!(coordinator.directories().directories_for("N.B").is_empty());
        assert!(!coordinator.is_running(), "discovery does not start a run");
    }

    #[tokio::test]
    async fn no_matching_directory() {
        let temp = Utf8TempDir::new().expect("created temp dir");
        let (sender, mut receiver) = event_channel();
        let coordinator = coordinator(temp.path(), FakeDiscoverer::default(), sender);

        let outcome = coordinator
            .run_test_command(RunRequest::new("N.Missing", false))
            .await
            .expect("not an error");
        assert_eq!(outcome, RunOutcome::NoMatchingDirectory);
        assert_eq!(coordinator.last_request(), None);
        assert!(!coordinator.is_running());
        assert!(receiver.try_recv().is_err(), "no events for a no-op run");
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let temp = Utf8TempDir::new().expect("created temp dir");
        let coordinator = coordinator(temp.path(), FakeDiscoverer::default(), EventSender::noop());
        *lock(&coordinator.last_request) = Some(RunRequest::new("N.InFlight", true));

        let guard = coordinator.begin_run("N.InFlight").expect("first run starts");
        let error = coordinator
            .run_test_command(RunRequest::new("N.Other", false))
            .await
            .expect_err("second run rejected");
        assert!(matches!(
            error,
            RunCommandError::AlreadyRunning { ref pattern } if pattern == "N.Other"
        ));
        assert_eq!(
            coordinator.last_request(),
            Some(RunRequest::new("N.InFlight", true))
        );
        assert!(coordinator.is_running());

        drop(guard);
        assert!(!coordinator.is_running());
    }

    #[tokio::test]
    async fn rerun_without_history() {
        let temp = Utf8TempDir::new().expect("created temp dir");
        let coordinator = coordinator(temp.path(), FakeDiscoverer::default(), EventSender::noop());
        assert!(coordinator.rerun_last_command().await.is_none());
    }

    #[test]
    fn collects_and_deletes_reports() {
        let temp = Utf8TempDir::new().expect("created temp dir");
        let coordinator = coordinator(temp.path(), FakeDiscoverer::default(), EventSender::noop());
        let dir = coordinator.results_dir().to_owned();
        std::fs::write(
            dir.join("0.trx"),
            include_str!("../../fixtures/trx/sample.trx"),
        )
        .expect("wrote report");
        std::fs::write(dir.join("1.trx"), "<TestRun><Results>").expect("wrote broken report");
        std::fs::write(dir.join("notes.txt"), "ignored").expect("wrote other file");

        let records = coordinator.collect_results().expect("results dir is readable");
        let outcomes: Vec<_> = records.iter().map(|record| record.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                TestOutcome::Passed,
                TestOutcome::Failed,
                TestOutcome::NotExecuted
            ]
        );
        assert_eq!(
            coordinator.report_files().expect("results dir is readable"),
            Vec::<Utf8PathBuf>::new(),
            "reports are deleted, even broken ones"
        );
        assert!(dir.join("notes.txt").exists());
    }
}
