// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attaching a debugger to a paused test host.
//!
//! With `VSTEST_HOST_DEBUG=1` the test host prints its process id and waits for a debugger
//! instead of running tests:
//!
//! ```text
//! Host debugging is enabled. Please attach debugger to testhost process to continue.
//! Process Id: 12345, Name: testhost
//! ```
//!
//! [`DebugHandshake`] scans the output for that marker. Once a debugger has attached, the host
//! stops at an internal breakpoint before any user code, so after a short settle delay the
//! debugger is told to continue once.

use crate::errors::AttachError;
use futures::future::BoxFuture;
use regex::Regex;
use std::{sync::LazyLock, time::Duration};
use tracing::{debug, info, warn};

/// How long to wait after attaching before continuing past the host's initial breakpoint.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);

// The trailing non-digit guards against matching a pid that was cut off mid-chunk.
static ATTACH_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Process Id:\s*(\d+)\D").expect("attach marker regex is valid"));

// Enough to hold a marker split across two chunks.
const MAX_PENDING: usize = 128;

/// Configuration for attaching a debugger to a test host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachConfig {
    /// A human-readable name for the debug session.
    pub name: String,

    /// The debugger type.
    pub kind: String,

    /// The debug request; always `attach`.
    pub request: String,

    /// The process to attach to.
    pub process_id: u32,
}

impl AttachConfig {
    /// Returns the configuration for attaching the .NET debugger to `process_id`.
    pub fn for_process(process_id: u32) -> Self {
        Self {
            name: ".NET Core Attach".to_owned(),
            kind: "coreclr".to_owned(),
            request: "attach".to_owned(),
            process_id,
        }
    }
}

/// Starts debug sessions on behalf of the executor.
pub trait DebugAttacher: Send + Sync {
    /// Starts a debug session attached to the process described by `config`.
    fn start_debugging<'a>(
        &'a self,
        config: &'a AttachConfig,
    ) -> BoxFuture<'a, Result<(), AttachError>>;

    /// Resumes execution in the active debug session.
    fn continue_execution(&self) -> BoxFuture<'_, Result<(), AttachError>>;
}

/// Where a debug handshake is.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HandshakeState {
    /// No attach marker has been seen yet.
    AwaitingMarker,

    /// The marker was seen and a debug session is being started.
    Attaching(AttachConfig),

    /// The debugger is attached.
    Attached(AttachConfig),
}

/// Scans test host output for the attach marker.
///
/// This is independent of any process API: feed it output chunks as they arrive.
#[derive(Debug)]
pub struct DebugHandshake {
    state: HandshakeState,
    pending: String,
}

impl Default for DebugHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugHandshake {
    /// Creates a handshake waiting for the attach marker.
    pub fn new() -> Self {
        Self {
            state: HandshakeState::AwaitingMarker,
            pending: String::new(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Feeds a chunk of output.
    ///
    /// Returns the attach configuration the first time the marker is seen, and `None` otherwise.
    /// A marker split across chunks is still found.
    pub fn feed(&mut self, chunk: &str) -> Option<AttachConfig> {
        if self.state != HandshakeState::AwaitingMarker {
            return None;
        }
        debug!("waiting for debugger to attach");

        self.pending.push_str(chunk);
        let process_id = ATTACH_MARKER
            .captures(&self.pending)
            .and_then(|captures| captures[1].parse::<u32>().ok());

        match process_id {
            Some(process_id) => {
                info!("test host process {process_id} found, attaching debugger");
                let config = AttachConfig::for_process(process_id);
                self.pending.clear();
                self.state = HandshakeState::Attaching(config.clone());
                Some(config)
            }
            None => {
                self.trim_pending();
                None
            }
        }
    }

    /// Records that the debugger has attached.
    pub fn mark_attached(&mut self) {
        if let HandshakeState::Attaching(config) = &self.state {
            self.state = HandshakeState::Attached(config.clone());
        }
    }

    fn trim_pending(&mut self) {
        if self.pending.len() <= MAX_PENDING {
            return;
        }
        let mut cut = self.pending.len() - MAX_PENDING;
        while !self.pending.is_char_boundary(cut) {
            cut += 1;
        }
        self.pending.drain(..cut);
    }
}

/// The debug session state shared by every debug run of one executor.
///
/// At most one debug session is set up at a time. The state is cleared when the debugged
/// process exits or is stopped.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DebugState {
    /// A debug run has started and the process has not exited yet.
    pub is_setting_up: bool,

    /// The attach marker was found and a debug session was started.
    pub is_running: bool,

    /// The configuration the debugger was attached with.
    pub config: Option<AttachConfig>,
}

impl DebugState {
    /// Resets to the empty state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Starts a debug session and then, after `settle_delay`, continues past the host's initial
/// breakpoint.
///
/// Errors are logged. Returns true if the session started.
pub(crate) async fn attach_and_continue(
    attacher: &dyn DebugAttacher,
    config: &AttachConfig,
    settle_delay: Duration,
) -> bool {
    if let Err(error) = attacher.start_debugging(config).await {
        warn!(
            "failed to attach debugger to process {}: {error}",
            config.process_id
        );
        return false;
    }

    tokio::time::sleep(settle_delay).await;
    if let Err(error) = attacher.continue_execution().await {
        warn!("failed to continue debug session: {error}");
    }
    true
}
