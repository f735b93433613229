// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    errors::{ExplorerExitCode, Result},
    output::{OutputContext, OutputOpts, OutputWriter},
    reporter::TreeReporter,
};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use dotnet_explorer_runner::{
    config::ExplorerConfig,
    directories::TestDirectories,
    discovery::DotnetDiscoverer,
    events::{DiscoveredTests, ExplorerEvent, event_channel},
    problems::problems_from_results,
    report::TestResults,
    runner::{RunCoordinator, RunOutcome, RunSettings},
    signal::SignalHandlerKind,
    test_command::ProcessExecutor,
    test_filter::{Exclusion, RunRequest},
    tree::{TestTree, TreeMode},
};
use std::{io::Write, sync::Arc};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

/// Discover, run and reconcile .NET tests.
#[derive(Debug, Parser)]
#[command(version, name = "dotnet-explorer")]
pub struct DotnetExplorerApp {
    /// Workspace root [default: current directory]
    #[arg(long, global = true, value_name = "DIR")]
    workspace_root: Option<Utf8PathBuf>,

    /// Config file [default: workspace-root/.config/dotnet-explorer.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// How to shape the test tree: full, merged or flat [default: from config]
    #[arg(long, global = true, value_name = "MODE")]
    tree_mode: Option<TreeMode>,

    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Discover the tests in every project directory
    Discover,

    /// Discover tests and print them as a tree
    List,

    /// Build and run tests
    Run(RunOpts),
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Qualified-name pattern to run [default: every test]
    #[arg(value_name = "PATTERN", default_value = "")]
    pattern: String,

    /// Treat PATTERN as the name of a single test rather than a subtree
    #[arg(long)]
    single: bool,

    /// Pause the test host until a debugger attaches
    #[arg(long)]
    debug: bool,

    /// Leave out a single test
    #[arg(long, value_name = "NAME")]
    exclude: Vec<String>,

    /// Leave out every test under a namespace or class
    #[arg(long, value_name = "PATTERN")]
    exclude_subtree: Vec<String>,
}

impl RunOpts {
    fn to_request(&self) -> RunRequest {
        let exclusions = self
            .exclude
            .iter()
            .map(Exclusion::test)
            .chain(self.exclude_subtree.iter().map(Exclusion::subtree));
        RunRequest::new(self.pattern.clone(), self.single)
            .with_debug(self.debug)
            .with_exclusions(exclusions)
    }
}

impl DotnetExplorerApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let workspace_root = match self.workspace_root {
            Some(root) => root,
            None => current_dir()?,
        };
        let config = ExplorerConfig::from_workspace(&workspace_root, self.config_file.as_deref())
            .map_err(|err| ExpectedError::ConfigError { err })?;
        let tree_mode = self.tree_mode.unwrap_or(config.tree_mode);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| ExpectedError::RuntimeSetupError { err })?;

        let app = App {
            config,
            tree_mode,
            output,
        };
        runtime.block_on(app.exec(self.command, output_writer))
    }
}

struct App {
    config: ExplorerConfig,
    tree_mode: TreeMode,
    output: OutputContext,
}

impl App {
    async fn exec(self, command: Command, output_writer: &mut OutputWriter) -> Result<i32> {
        let directories = TestDirectories::evaluate(self.config.test_project_paths.clone());
        if directories.directories().is_empty() {
            return Err(ExpectedError::NoTestDirectories {
                candidates: self.config.test_project_paths.clone(),
            });
        }

        let executor = ProcessExecutor::new();
        let discoverer = DotnetDiscoverer::new(
            executor.clone(),
            &self.config.build_tool,
            &self.config.discovery_arguments,
        );
        let (sender, mut receiver) = event_channel();
        let coordinator = RunCoordinator::new(
            RunSettings::from_config(&self.config),
            directories,
            executor.clone(),
            Arc::new(discoverer),
            sender,
        )
        .map_err(|err| ExpectedError::ResultsDirError { err })?;

        let signal_handler = SignalHandlerKind::Standard
            .build()
            .map_err(|err| ExpectedError::SignalHandlerSetupError { err })?;
        let signal_task = tokio::spawn(signal_handler.stop_on_shutdown(executor));

        let mut tree = TestTree::new(self.tree_mode);
        let result = match command {
            Command::Discover => {
                let outcome = coordinator.discover_tests().await;
                apply_events(&mut tree, &mut receiver);
                if outcome.is_aborted() {
                    Ok(discovery_aborted())
                } else {
                    write_discovered(outcome.discovered(), output_writer)
                        .map(|()| ExplorerExitCode::OK)
                }
            }
            Command::List => {
                let outcome = coordinator.discover_tests().await;
                apply_events(&mut tree, &mut receiver);
                if outcome.is_aborted() {
                    Ok(discovery_aborted())
                } else {
                    self.write_tree(&tree, None, output_writer)
                        .map(|()| ExplorerExitCode::OK)
                }
            }
            Command::Run(opts) => {
                if coordinator.discover_tests().await.is_aborted() {
                    Ok(discovery_aborted())
                } else {
                    let outcome = coordinator
                        .run_test_command(opts.to_request())
                        .await
                        .map_err(|err| ExpectedError::RunRejected { err });
                    apply_events(&mut tree, &mut receiver);
                    outcome.and_then(|outcome| self.report_outcome(&tree, &outcome, output_writer))
                }
            }
        };

        signal_task.abort();
        result
    }

    fn report_outcome(
        &self,
        tree: &TestTree,
        outcome: &RunOutcome,
        output_writer: &mut OutputWriter,
    ) -> Result<i32> {
        match outcome {
            RunOutcome::Completed { results } => {
                self.write_tree(tree, Some(results), output_writer)?;
                if results.summary().failed > 0 {
                    Ok(ExplorerExitCode::TEST_RUN_FAILED)
                } else {
                    Ok(ExplorerExitCode::OK)
                }
            }
            RunOutcome::BuildFailed {
                failed,
                skipped,
                results,
            } => {
                self.write_tree(tree, Some(results), output_writer)?;
                for directory in failed {
                    warn!("build failed in {directory}");
                }
                if !skipped.is_empty() {
                    info!("{} directories were not attempted", skipped.len());
                }
                Ok(ExplorerExitCode::BUILD_FAILED)
            }
            RunOutcome::UserAborted => {
                info!("run aborted");
                Ok(ExplorerExitCode::USER_ABORTED)
            }
            RunOutcome::NoMatchingDirectory => Ok(ExplorerExitCode::NO_TESTS_RUN),
        }
    }

    fn write_tree(
        &self,
        tree: &TestTree,
        results: Option<&TestResults>,
        output_writer: &mut OutputWriter,
    ) -> Result<()> {
        let styles = self.output.stdout_styles();
        let reporter = TreeReporter::new(&styles, self.output.verbose);
        let mut writer = output_writer.stdout_writer();

        let write = |writer: &mut dyn Write| -> std::io::Result<()> {
            reporter.write_tree(tree, writer)?;
            if let Some(results) = results {
                if self.config.add_problems {
                    reporter.write_problems(&problems_from_results(&results.records), writer)?;
                }
                reporter.write_summary(&results.summary(), writer)?;
            }
            writer.flush()
        };
        write(&mut writer).map_err(|err| ExpectedError::WriteError { err })
    }
}

fn write_discovered(discovered: &[DiscoveredTests], output_writer: &mut OutputWriter) -> Result<()> {
    let mut writer = output_writer.stdout_writer();
    let write = |writer: &mut dyn Write| -> std::io::Result<()> {
        for tests in discovered {
            writeln!(writer, "{}: {} tests", tests.directory, tests.names.len())?;
        }
        writer.flush()
    };
    write(&mut writer).map_err(|err| ExpectedError::WriteError { err })
}

fn discovery_aborted() -> i32 {
    info!("test discovery was stopped");
    ExplorerExitCode::USER_ABORTED
}

fn apply_events(tree: &mut TestTree, receiver: &mut UnboundedReceiver<ExplorerEvent>) {
    while let Ok(event) = receiver.try_recv() {
        tree.apply_event(&event);
    }
}

fn current_dir() -> Result<Utf8PathBuf> {
    let dir = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirInvalid { err })?;
    Utf8PathBuf::try_from(dir).map_err(|err| ExpectedError::CurrentDirInvalidUtf8 {
        path: err.into_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn verify_app() {
        DotnetExplorerApp::command().debug_assert();
    }

    #[test]
    fn parse_run_request() {
        let app = DotnetExplorerApp::try_parse_from([
            "dotnet-explorer",
            "run",
            "N.Calc",
            "--exclude",
            "N.Calc.Slow",
            "--exclude-subtree",
            "N.Calc.Integration",
            "--tree-mode",
            "merged",
        ])
        .expect("arguments parse");
        assert_eq!(app.tree_mode, Some(TreeMode::Merged));

        let Command::Run(opts) = app.command else {
            panic!("expected the run command");
        };
        assert_eq!(
            opts.to_request(),
            RunRequest::new("N.Calc", false).with_exclusions([
                Exclusion::test("N.Calc.Slow"),
                Exclusion::subtree("N.Calc.Integration"),
            ])
        );
    }

    #[test]
    fn run_everything_by_default() {
        let app = DotnetExplorerApp::try_parse_from(["dotnet-explorer", "run", "--debug"])
            .expect("arguments parse");
        let Command::Run(opts) = app.command else {
            panic!("expected the run command");
        };
        assert_eq!(opts.to_request(), RunRequest::all().with_debug(true));
    }

    #[test]
    fn discovery_output() {
        let mut output_writer = OutputWriter::Test { stdout: Vec::new() };
        write_discovered(
            &[DiscoveredTests {
                directory: "/w/Unit".into(),
                names: vec!["N.C.A".to_owned(), "N.C.B".to_owned()],
            }],
            &mut output_writer,
        )
        .expect("writing to a Vec succeeds");
        let OutputWriter::Test { stdout } = output_writer else {
            panic!("expected the test writer");
        };
        assert_eq!(String::from_utf8(stdout).expect("UTF-8"), "/w/Unit: 2 tests\n");
        assert_eq!(discovery_aborted(), ExplorerExitCode::USER_ABORTED);
    }

    #[test]
    fn invalid_tree_mode() {
        assert!(
            DotnetExplorerApp::try_parse_from(["dotnet-explorer", "--tree-mode", "bushy", "list"])
                .is_err()
        );
    }
}
