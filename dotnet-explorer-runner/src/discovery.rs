// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test discovery.
//!
//! The default discoverer lists tests with `<tool> test --list-tests`, whose output looks like:
//!
//! ```text
//! The following Tests are available:
//!     Namespace.Class.First
//!     Namespace.Class.Second(value: 1)
//! ```

use crate::{
    errors::DiscoveryError,
    test_command::{ProcessExecutor, ToolCommand},
};
use camino::Utf8Path;
use futures::{FutureExt, future::BoxFuture};
use tracing::debug;

const TESTS_AVAILABLE_MARKER: &str = "The following Tests are available:";

/// Supplies the qualified names of the tests in a project directory.
pub trait TestDiscoverer: Send + Sync {
    /// Lists the tests in `directory`.
    fn discover<'a>(
        &'a self,
        directory: &'a Utf8Path,
    ) -> BoxFuture<'a, Result<Vec<String>, DiscoveryError>>;
}

/// Discovers tests by running the build tool's list command.
#[derive(Clone, Debug)]
pub struct DotnetDiscoverer {
    executor: ProcessExecutor,
    program: String,
    discovery_arguments: String,
}

impl DotnetDiscoverer {
    /// Creates a discoverer that runs `program` through `executor`, forwarding
    /// `discovery_arguments` verbatim.
    pub fn new(
        executor: ProcessExecutor,
        program: impl Into<String>,
        discovery_arguments: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            program: program.into(),
            discovery_arguments: discovery_arguments.into(),
        }
    }
}

impl TestDiscoverer for DotnetDiscoverer {
    fn discover<'a>(
        &'a self,
        directory: &'a Utf8Path,
    ) -> BoxFuture<'a, Result<Vec<String>, DiscoveryError>> {
        async move {
            let command = ToolCommand::list_tests(&self.program, &self.discovery_arguments);
            debug!("discovering tests with `{command}` in {directory}");
            let output = self
                .executor
                .run_test(&command, directory, true)
                .await
                .map_err(|error| DiscoveryError::Execute {
                    directory: directory.to_owned(),
                    error,
                })?;
            if output.killed {
                return Err(DiscoveryError::Aborted {
                    directory: directory.to_owned(),
                });
            }
            if !output.success() {
                return Err(DiscoveryError::Failed {
                    directory: directory.to_owned(),
                    status: output.status,
                });
            }
            Ok(parse_test_list(&output.stdout))
        }
        .boxed()
    }
}

/// Extracts test names from list-tests output: every indented, non-empty line after the
/// marker line.
pub fn parse_test_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.trim_end().ends_with(TESTS_AVAILABLE_MARKER))
        .skip(1)
        .filter(|line| line.starts_with([' ', '\t']))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}
