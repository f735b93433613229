// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events published to the presentation layer.
//!
//! The runner never depends on a concrete presentation type. Events are sent over an unbounded
//! channel and are fire-and-forget: a presentation layer that has gone away is not an error.

use crate::report::TestResults;
use camino::Utf8PathBuf;
use tokio::sync::mpsc;

/// The names discovered in one directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiscoveredTests {
    /// The project directory.
    pub directory: Utf8PathBuf,

    /// The qualified names of the tests in the directory.
    pub names: Vec<String>,
}

/// An event published by the runner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExplorerEvent {
    /// A discovery pass started.
    DiscoveryStarted,

    /// A discovery pass finished. Directories without tests are omitted.
    DiscoveryFinished(Vec<DiscoveredTests>),

    /// A run was accepted and is about to start. Nodes in scope of `pattern` should be shown
    /// as running.
    RunStarted {
        /// The pattern being run. Empty means every test.
        pattern: String,

        /// Whether `pattern` names a single test.
        is_single_test: bool,
    },

    /// A run produced results.
    NewResults(TestResults),

    /// A build failed. Nodes in scope of `pattern` should be shown as not run, and the request
    /// can be retried.
    BuildFailed {
        /// The pattern of the failed run.
        pattern: String,

        /// Whether `pattern` names a single test.
        is_single_test: bool,
    },
}

/// Creates a connected event sender and receiver.
pub fn event_channel() -> (EventSender, mpsc::UnboundedReceiver<ExplorerEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventSender(Some(sender)), receiver)
}

/// The sending half of the presentation channel.
#[derive(Clone, Debug, Default)]
pub struct EventSender(Option<mpsc::UnboundedSender<ExplorerEvent>>);

impl EventSender {
    /// A sender that drops every event.
    pub fn noop() -> Self {
        Self(None)
    }

    /// Publishes an event.
    pub fn send(&self, event: ExplorerEvent) {
        if let Some(sender) = &self.0 {
            // The receiver hanging up only means nobody is listening anymore.
            let _ = sender.send(event);
        }
    }
}
