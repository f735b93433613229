// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turning Ctrl-C and termination signals into stop requests.

use crate::{errors::SignalHandlerSetupError, test_command::ProcessExecutor};
use std::fmt;
use tracing::info;

/// The kind of signal handling to set up.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SignalHandlerKind {
    /// Handle interrupt and termination signals, depending on the platform.
    Standard,

    /// Handle nothing. Useful for tests.
    Noop,
}

impl SignalHandlerKind {
    /// Sets up the signal handler.
    pub fn build(self) -> Result<SignalHandler, SignalHandlerSetupError> {
        match self {
            Self::Standard => SignalHandler::new(),
            Self::Noop => Ok(SignalHandler::noop()),
        }
    }
}

/// Receives shutdown signals.
#[derive(Debug)]
pub struct SignalHandler {
    signals: Option<imp::Signals>,
}

impl SignalHandler {
    fn new() -> Result<Self, SignalHandlerSetupError> {
        let signals = imp::Signals::new()?;
        Ok(Self {
            signals: Some(signals),
        })
    }

    fn noop() -> Self {
        Self { signals: None }
    }

    /// Waits for the next shutdown signal. Returns `None` once no more signals can arrive.
    pub async fn recv(&mut self) -> Option<ShutdownEvent> {
        match &mut self.signals {
            Some(signals) => signals.recv().await,
            None => None,
        }
    }

    /// Stops every process tracked by `executor` each time a shutdown signal arrives, so that an
    /// interrupted run ends as user-aborted.
    ///
    /// Runs until the handler yields no more signals; spawn it alongside the work it guards.
    pub async fn stop_on_shutdown(mut self, executor: ProcessExecutor) {
        while let Some(event) = self.recv().await {
            let stopped = executor.stop_all().await;
            info!("received {event}, stopped {stopped} processes");
        }
    }
}

/// A signal asking the program to shut down.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShutdownEvent {
    /// SIGINT on Unix, Ctrl-C on Windows.
    Interrupt,

    /// SIGHUP.
    #[cfg(unix)]
    Hangup,

    /// SIGTERM.
    #[cfg(unix)]
    Term,
}

impl fmt::Display for ShutdownEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "interrupt"),
            #[cfg(unix)]
            Self::Hangup => write!(f, "hangup"),
            #[cfg(unix)]
            Self::Term => write!(f, "termination signal"),
        }
    }
}

#[cfg(unix)]
mod imp {
    use super::ShutdownEvent;
    use tokio::signal::unix::{Signal, SignalKind, signal};

    #[derive(Debug)]
    pub(super) struct Signals {
        sigint: SignalWithDone,
        sighup: SignalWithDone,
        sigterm: SignalWithDone,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            Ok(Self {
                sigint: SignalWithDone::new(SignalKind::interrupt())?,
                sighup: SignalWithDone::new(SignalKind::hangup())?,
                sigterm: SignalWithDone::new(SignalKind::terminate())?,
            })
        }

        pub(super) async fn recv(&mut self) -> Option<ShutdownEvent> {
            loop {
                tokio::select! {
                    recv = self.sigint.signal.recv(), if !self.sigint.done => {
                        match recv {
                            Some(()) => break Some(ShutdownEvent::Interrupt),
                            None => self.sigint.done = true,
                        }
                    }
                    recv = self.sighup.signal.recv(), if !self.sighup.done => {
                        match recv {
                            Some(()) => break Some(ShutdownEvent::Hangup),
                            None => self.sighup.done = true,
                        }
                    }
                    recv = self.sigterm.signal.recv(), if !self.sigterm.done => {
                        match recv {
                            Some(()) => break Some(ShutdownEvent::Term),
                            None => self.sigterm.done = true,
                        }
                    }
                    else => break None,
                }
            }
        }
    }

    #[derive(Debug)]
    struct SignalWithDone {
        signal: Signal,
        done: bool,
    }

    impl SignalWithDone {
        fn new(kind: SignalKind) -> std::io::Result<Self> {
            Ok(Self {
                signal: signal(kind)?,
                done: false,
            })
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::ShutdownEvent;
    use tokio::signal::windows::{CtrlC, ctrl_c};

    #[derive(Debug)]
    pub(super) struct Signals {
        ctrl_c: CtrlC,
        done: bool,
    }

    impl Signals {
        pub(super) fn new() -> std::io::Result<Self> {
            Ok(Self {
                ctrl_c: ctrl_c()?,
                done: false,
            })
        }

        pub(super) async fn recv(&mut self) -> Option<ShutdownEvent> {
            if self.done {
                return None;
            }
            match self.ctrl_c.recv().await {
                Some(()) => Some(ShutdownEvent::Interrupt),
                None => {
                    self.done = true;
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_handler_yields_nothing() {
        let mut handler = SignalHandlerKind::Noop.build().expect("noop handler builds");
        assert_eq!(handler.recv().await, None);

        // Returns immediately since no signals can arrive.
        handler.stop_on_shutdown(ProcessExecutor::new()).await;
    }
}
