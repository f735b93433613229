// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the test explorer runner.

use crate::tree::TreeMode;
use camino::Utf8PathBuf;
use std::{error::Error as StdError, fmt, process::ExitStatus, time::Duration};
use thiserror::Error;

/// Displays an error followed by each of its sources, separated by `: `.
#[derive(Debug)]
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: StdError> DisplayErrorChain<E> {
    /// Wraps `error` for display.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: StdError> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        let mut source = self.error.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }
        Ok(())
    }
}

/// Error returned while parsing a [`TreeMode`] value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for tree-mode: {input}\n(known values: {})",
    TreeMode::variants().join(", "),
)]
pub struct TreeModeParseError {
    input: String,
}

impl TreeModeParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurred while reading the contents of a TRX report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrxParseError {
    /// The report is not well-formed XML.
    #[error("malformed XML")]
    Xml(#[from] quick_xml::Error),

    /// The report has no root element.
    #[error("report has no root element")]
    MissingRoot,

    /// The report ended before an element was closed.
    #[error("report ended inside element `{name}`")]
    UnclosedElement {
        /// The innermost element that was still open.
        name: String,
    },
}

/// An error that occurred while reading a result report from disk.
///
/// This is distinct from a report that was read successfully but contained no results.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportParseError {
    /// The report could not be read.
    #[error("failed to read result report `{path}`")]
    Read {
        /// The path to the report.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The report could not be parsed.
    #[error("failed to parse result report `{path}`")]
    Parse {
        /// The path to the report.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: TrxParseError,
    },
}

/// An error that occurred while spawning the build tool.
#[derive(Debug, Error)]
#[error("failed to start `{program}` in `{directory}`")]
pub struct ChildStartError {
    program: String,
    directory: Utf8PathBuf,
    #[source]
    error: std::io::Error,
}

impl ChildStartError {
    pub(crate) fn new(
        program: impl Into<String>,
        directory: impl Into<Utf8PathBuf>,
        error: std::io::Error,
    ) -> Self {
        Self {
            program: program.into(),
            directory: directory.into(),
            error,
        }
    }
}

/// An error that occurred while running a build or test process.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecuteError {
    /// The process could not be started.
    #[error(transparent)]
    Start(#[from] ChildStartError),

    /// Waiting for the process or reading its output failed.
    #[error("failed to wait for `{program}`")]
    Wait {
        /// The program that was running.
        program: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A debug run was requested while another debug session was being set up.
    #[error("a debug session is already being set up")]
    DebugAlreadyActive,
}

/// An error that occurred while delivering a kill to a tracked process.
///
/// These are logged and never abort the stop request.
#[derive(Debug, Error)]
#[error("failed to stop process {pid}")]
pub struct StopError {
    pid: u32,
    #[source]
    error: std::io::Error,
}

impl StopError {
    pub(crate) fn new(pid: u32, error: std::io::Error) -> Self {
        Self { pid, error }
    }

    /// Returns the process id that could not be stopped.
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// An error that occurred while setting up or reading the shared results directory.
#[derive(Debug, Error)]
#[error("error accessing results directory `{path}`")]
pub struct ResultsDirError {
    path: Utf8PathBuf,
    #[source]
    error: std::io::Error,
}

impl ResultsDirError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, error: std::io::Error) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}

/// An error returned when a run request is rejected or cannot proceed.
///
/// Build failures and user aborts are not errors; see
/// [`RunOutcome`](crate::runner::RunOutcome).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunCommandError {
    /// A run is already in progress.
    #[error("tests are already running, ignoring request for `{pattern}`")]
    AlreadyRunning {
        /// The pattern of the rejected request.
        pattern: String,
    },

    /// A debug session is already being set up.
    #[error("a debug session is already being set up")]
    DebugAlreadyActive,

    /// The results directory could not be read.
    #[error(transparent)]
    ResultsDir(#[from] ResultsDirError),
}

/// An error that occurred while discovering tests in a directory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// The discovery command could not be run.
    #[error("failed to run test discovery in `{directory}`")]
    Execute {
        /// The directory discovery was run in.
        directory: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: ExecuteError,
    },

    /// The discovery command exited unsuccessfully.
    #[error("test discovery in `{directory}` exited with {status}")]
    Failed {
        /// The directory discovery was run in.
        directory: Utf8PathBuf,

        /// The exit status of the command.
        status: ExitStatus,
    },

    /// The discovery command was killed by a stop request.
    #[error("test discovery in `{directory}` was stopped")]
    Aborted {
        /// The directory discovery was run in.
        directory: Utf8PathBuf,
    },
}

/// An error that occurred while locating the source of a test.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GotoTestError {
    /// The symbol locator returned no symbols at all.
    #[error("no symbols found for `{name}`")]
    NoSymbols {
        /// The fully-qualified name that was looked up.
        name: String,
    },

    /// No symbol matched the test.
    #[error("could not find a symbol matching `{name}`")]
    NoMatchingSymbol {
        /// The fully-qualified name that was looked up.
        name: String,
    },

    /// More than one symbol matched the test.
    #[error("found {count} symbols matching `{name}`")]
    MultipleSymbols {
        /// The fully-qualified name that was looked up.
        name: String,

        /// The number of matching symbols.
        count: usize,
    },

    /// The symbol locator kept returning nothing until the timeout elapsed.
    #[error(
        "timed out after {} waiting for symbols for `{name}`",
        humantime::format_duration(*.timeout)
    )]
    Timeout {
        /// The fully-qualified name that was looked up.
        name: String,

        /// How long the lookup was retried for.
        timeout: Duration,
    },
}

/// An error that occurred while reading the user configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file `{path}`")]
    Read {
        /// The path to the config file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The config file is not valid TOML or has the wrong shape.
    #[error("failed to parse config file `{path}`")]
    Parse {
        /// The path to the config file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: toml::de::Error,
    },

    /// A key has a value that cannot be used.
    #[error("invalid value for `{key}` in `{path}`: {message}")]
    InvalidValue {
        /// The path to the config file.
        path: Utf8PathBuf,

        /// The key with the invalid value.
        key: &'static str,

        /// What is wrong with the value.
        message: String,
    },
}

/// An error that occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] std::io::Error);

/// An error reported by a [`DebugAttacher`](crate::debug::DebugAttacher).
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct AttachError {
    message: String,
}

impl AttachError {
    /// Creates a new `AttachError` with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
