// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use dotnet_explorer_runner::errors::{
    ConfigError, ResultsDirError, RunCommandError, SignalHandlerSetupError,
};
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// Process exit codes.
#[doc(hidden)]
pub struct ExplorerExitCode;

impl ExplorerExitCode {
    /// The run completed and no test failed.
    pub const OK: i32 = 0;

    /// No directory contained a test matching the pattern.
    pub const NO_TESTS_RUN: i32 = 4;

    /// An error occurred before anything was run.
    pub const SETUP_ERROR: i32 = 96;

    /// At least one test failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// A build failed.
    pub const BUILD_FAILED: i32 = 101;

    /// The run was stopped by a signal.
    pub const USER_ABORTED: i32 = 102;

    /// Another run or debug session was already in progress.
    pub const ALREADY_RUNNING: i32 = 103;

    /// Writing output failed.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}

// The #[error()] strings are placeholders: errors are printed with display_to_stderr.

/// An error that stops the program.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("current directory is invalid")]
    CurrentDirInvalid {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 { path: std::path::PathBuf },
    #[error("config error")]
    ConfigError {
        #[source]
        err: ConfigError,
    },
    #[error("no test project directories found")]
    NoTestDirectories { candidates: Vec<Utf8PathBuf> },
    #[error("results directory error")]
    ResultsDirError {
        #[source]
        err: ResultsDirError,
    },
    #[error("runtime setup error")]
    RuntimeSetupError {
        #[source]
        err: std::io::Error,
    },
    #[error("signal handler setup error")]
    SignalHandlerSetupError {
        #[source]
        err: SignalHandlerSetupError,
    },
    #[error("run rejected")]
    RunRejected {
        #[source]
        err: RunCommandError,
    },
    #[error("error writing output")]
    WriteError {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirInvalid { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::ConfigError { .. }
            | Self::NoTestDirectories { .. }
            | Self::ResultsDirError { .. }
            | Self::RuntimeSetupError { .. }
            | Self::SignalHandlerSetupError { .. } => ExplorerExitCode::SETUP_ERROR,
            Self::RunRejected {
                err: RunCommandError::ResultsDir(_),
            } => ExplorerExitCode::SETUP_ERROR,
            Self::RunRejected { .. } => ExplorerExitCode::ALREADY_RUNNING,
            Self::WriteError { .. } => ExplorerExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::CurrentDirInvalid { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { path } => {
                error!(
                    "current directory `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::ConfigError { err } => {
                error!("failed to load configuration");
                Some(err as &dyn Error)
            }
            Self::NoTestDirectories { candidates } => {
                let candidates: Vec<_> = candidates.iter().map(|c| c.as_str()).collect();
                error!(
                    "none of the configured paths contain a project or solution file: {}",
                    candidates.join(", ").style(styles.bold)
                );
                None
            }
            Self::ResultsDirError { err } => {
                error!("failed to set up the results directory");
                Some(err as &dyn Error)
            }
            Self::RuntimeSetupError { err } => {
                error!("failed to start the async runtime");
                Some(err as &dyn Error)
            }
            Self::SignalHandlerSetupError { err } => {
                error!("error setting up signal handler");
                Some(err as &dyn Error)
            }
            Self::RunRejected { err } => {
                error!("{err}");
                err.source()
            }
            Self::WriteError { err } => {
                error!("failed to write output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let rejected = ExpectedError::RunRejected {
            err: RunCommandError::AlreadyRunning {
                pattern: "N.C".to_owned(),
            },
        };
        assert_eq!(
            rejected.process_exit_code(),
            ExplorerExitCode::ALREADY_RUNNING
        );

        let no_dirs = ExpectedError::NoTestDirectories {
            candidates: vec!["tests".into()],
        };
        assert_eq!(no_dirs.process_exit_code(), ExplorerExitCode::SETUP_ERROR);
    }
}
