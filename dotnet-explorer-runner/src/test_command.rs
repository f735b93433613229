// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running the build tool and tracking live processes.
//!
//! Every tracked process is recorded in the executor's registry for as long as it runs. The
//! registry is the only way to cancel work: [`ProcessExecutor::stop_all`] drains it and kills
//! each process along with its children. A tracked process that is no longer in the registry by
//! the time it exits was killed by a stop request, and its output is marked
//! [`killed`](ProcessOutput::killed).

use crate::{
    debug::{
        AttachConfig, DEFAULT_SETTLE_DELAY, DebugAttacher, DebugHandshake, DebugState,
        attach_and_continue,
    },
    errors::{ChildStartError, DisplayErrorChain, ExecuteError},
    test_filter::{ExtraArguments, TestFilter, split_arguments},
};
use bytes::BytesMut;
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use futures::{FutureExt, future::BoxFuture};
use indexmap::IndexMap;
use std::{
    fmt, io,
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use unix as os;
    } else if #[cfg(windows)] {
        mod windows;
        use windows as os;
    } else {
        compile_error!("unsupported target platform");
    }
}

/// Forces the build tool's messages to English, so that output can be scanned reliably.
pub const UI_LANGUAGE_ENV: &str = "DOTNET_CLI_UI_LANGUAGE";

/// Makes the test host pause and print its process id until a debugger attaches.
pub const HOST_DEBUG_ENV: &str = "VSTEST_HOST_DEBUG";

/// The target that test host output is logged under.
pub const TEST_OUTPUT_TARGET: &str = "dotnet_explorer_runner::test_output";

/// A command line for the build tool.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    /// Creates a command from a program and its arguments.
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `<program> build`.
    pub fn build(program: impl Into<String>) -> Self {
        Self::new(program, ["build"])
    }

    /// `<program> test <extra> --no-build --logger trx;LogFileName=<result_file> [--filter <expr>]`.
    pub fn test(
        program: impl Into<String>,
        extra: &ExtraArguments,
        result_file: &Utf8Path,
        filter: &TestFilter,
    ) -> Self {
        let mut args = vec!["test".to_owned()];
        args.extend(extra.residual().iter().cloned());
        args.push("--no-build".to_owned());
        args.push("--logger".to_owned());
        args.push(format!("trx;LogFileName={result_file}"));
        args.extend(filter.to_args());
        Self::new(program, args)
    }

    /// `<program> test --list-tests --verbosity=quiet <discovery_args>`.
    pub fn list_tests(program: impl Into<String>, discovery_args: &str) -> Self {
        let mut args = vec![
            "test".to_owned(),
            "--list-tests".to_owned(),
            "--verbosity=quiet".to_owned(),
        ];
        args.extend(split_arguments(discovery_args));
        Self::new(program, args)
    }

    /// Returns the program.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(&self.program).chain(&self.args);
        f.write_str(&shell_words::join(words))
    }
}

/// A live process in the registry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessHandle {
    /// The process id.
    pub pid: u32,

    /// The directory the process runs in.
    pub working_directory: Utf8PathBuf,

    /// Whether the process was started for a debug run.
    pub is_debug: bool,
}

/// The result of running a process to completion.
#[derive(Clone, Debug)]
pub struct ProcessOutput {
    /// The exit status.
    pub status: ExitStatus,

    /// Everything the process wrote to stdout.
    pub stdout: String,

    /// Everything the process wrote to stderr.
    pub stderr: String,

    /// Whether the process was killed by [`ProcessExecutor::stop_all`].
    pub killed: bool,
}

impl ProcessOutput {
    /// Returns true if the process exited successfully and was not killed.
    pub fn success(&self) -> bool {
        self.status.success() && !self.killed
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ExecMode {
    Normal,
    Debug,
}

/// Spawns build and test processes.
///
/// Clones share the same registry and debug state.
#[derive(Clone, Debug)]
pub struct ProcessExecutor {
    inner: Arc<ExecutorInner>,
}

#[derive(Debug)]
struct ExecutorInner {
    registry: Mutex<IndexMap<u32, ProcessHandle>>,
    debug_state: Mutex<DebugState>,
    attacher: Option<DebugIgnore<Arc<dyn DebugAttacher>>>,
    settle_delay: Duration,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessExecutor {
    /// Creates an executor without a debugger. Debug runs still wait for the attach marker, and
    /// log the process id to attach to.
    pub fn new() -> Self {
        Self::build(None, DEFAULT_SETTLE_DELAY)
    }

    /// Creates an executor that attaches `attacher` to debug runs, continuing past the host's
    /// initial breakpoint after `settle_delay`.
    pub fn with_debug_attacher(attacher: Arc<dyn DebugAttacher>, settle_delay: Duration) -> Self {
        Self::build(Some(attacher), settle_delay)
    }

    fn build(attacher: Option<Arc<dyn DebugAttacher>>, settle_delay: Duration) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                registry: Mutex::new(IndexMap::new()),
                debug_state: Mutex::new(DebugState::default()),
                attacher: attacher.map(DebugIgnore),
                settle_delay,
            }),
        }
    }

    /// Runs `<program> build` in `directory`. The build is tracked so that it can be stopped.
    pub async fn run_build(
        &self,
        program: &str,
        directory: &Utf8Path,
    ) -> Result<ProcessOutput, ExecuteError> {
        let command = ToolCommand::build(program);
        info!("executing `{command}` in {directory}");
        self.execute(&command, directory, ExecMode::Normal, true)
            .await
    }

    /// Runs a test command, registering it for cancellation if `track` is set.
    pub async fn run_test(
        &self,
        command: &ToolCommand,
        directory: &Utf8Path,
        track: bool,
    ) -> Result<ProcessOutput, ExecuteError> {
        self.execute(command, directory, ExecMode::Normal, track)
            .await
    }

    /// Runs a test command with the test host paused for a debugger.
    ///
    /// Fails immediately with [`ExecuteError::DebugAlreadyActive`] if another debug session is
    /// being set up. The debug state is cleared when the process exits, however it exits.
    pub async fn run_test_with_debug_attach(
        &self,
        command: &ToolCommand,
        directory: &Utf8Path,
        track: bool,
    ) -> Result<ProcessOutput, ExecuteError> {
        {
            let mut state = lock(&self.inner.debug_state);
            if state.is_setting_up {
                info!("debugger already running");
                return Err(ExecuteError::DebugAlreadyActive);
            }
            state.is_setting_up = true;
        }
        let _guard = DebugSessionGuard {
            state: &self.inner.debug_state,
        };

        self.execute(command, directory, ExecMode::Debug, track)
            .await
    }

    /// Kills every tracked process and its children, and clears any debug session state.
    ///
    /// Returns the number of processes that were stopped. Calling this with nothing running is a
    /// no-op.
    pub async fn stop_all(&self) -> usize {
        let handles: Vec<ProcessHandle> = lock(&self.inner.registry)
            .drain(..)
            .map(|(_, handle)| handle)
            .collect();
        lock(&self.inner.debug_state).clear();

        let kills = handles.iter().map(|handle| {
            info!("stop requested, killing process {}", handle.pid);
            os::kill_process_tree(handle.pid)
        });
        for result in futures::future::join_all(kills).await {
            if let Err(error) = result {
                warn!("{}", DisplayErrorChain::new(error));
            }
        }

        handles.len()
    }

    /// Returns the currently tracked processes, oldest first.
    pub fn live_processes(&self) -> Vec<ProcessHandle> {
        lock(&self.inner.registry).values().cloned().collect()
    }

    /// Returns a snapshot of the debug session state.
    pub fn debug_state(&self) -> DebugState {
        lock(&self.inner.debug_state).clone()
    }

    async fn execute(
        &self,
        command: &ToolCommand,
        directory: &Utf8Path,
        mode: ExecMode,
        track: bool,
    ) -> Result<ProcessOutput, ExecuteError> {
        let is_debug = mode == ExecMode::Debug;

        let mut cmd = std::process::Command::new(command.program());
        cmd.args(command.args())
            .current_dir(directory)
            .env(UI_LANGUAGE_ENV, "en")
            .env(HOST_DEBUG_ENV, if is_debug { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        os::set_process_group(&mut cmd);

        let mut cmd = tokio::process::Command::from(cmd);
        cmd.kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .map_err(|error| ChildStartError::new(command.program(), directory, error))?;

        let registration = match (track, child.id()) {
            (true, Some(pid)) => Some(self.register(ProcessHandle {
                pid,
                working_directory: directory.to_owned(),
                is_debug,
            })),
            _ => None,
        };

        let mut stdout_reader = child.stdout.take().map(FusedBufReader::new);
        let mut stderr_reader = child.stderr.take().map(FusedBufReader::new);
        let mut stdout = BytesMut::with_capacity(CHUNK_SIZE);
        let mut stderr = BytesMut::with_capacity(CHUNK_SIZE);

        let mut handshake = is_debug.then(DebugHandshake::new);
        let mut attach: Option<BoxFuture<'static, bool>> = None;

        let wait_result = loop {
            tokio::select! {
                res = fill_buf_opt(stdout_reader.as_mut(), &mut stdout), if !is_done_opt(&stdout_reader) => {
                    match res {
                        Ok(read) => {
                            if let Some(handshake) = &mut handshake {
                                let chunk = String::from_utf8_lossy(&stdout[stdout.len() - read..]);
                                if let Some(config) = handshake.feed(&chunk) {
                                    {
                                        let mut state = lock(&self.inner.debug_state);
                                        state.is_running = true;
                                        state.config = Some(config.clone());
                                    }
                                    attach = self.start_attach(config);
                                }
                            }
                        }
                        Err(error) => warn!("error reading stdout of `{}`: {error}", command.program()),
                    }
                }
                res = fill_buf_opt(stderr_reader.as_mut(), &mut stderr), if !is_done_opt(&stderr_reader) => {
                    if let Err(error) = res {
                        warn!("error reading stderr of `{}`: {error}", command.program());
                    }
                }
                started = poll_opt(&mut attach), if attach.is_some() => {
                    attach = None;
                    if started && let Some(handshake) = &mut handshake {
                        handshake.mark_attached();
                    }
                }
                res = child.wait() => break res,
            }
        };

        // Collect whatever output is still buffered.
        while !is_done_opt(&stdout_reader) || !is_done_opt(&stderr_reader) {
            tokio::select! {
                res = fill_buf_opt(stdout_reader.as_mut(), &mut stdout), if !is_done_opt(&stdout_reader) => {
                    if res.is_err() { break; }
                }
                res = fill_buf_opt(stderr_reader.as_mut(), &mut stderr), if !is_done_opt(&stderr_reader) => {
                    if res.is_err() { break; }
                }
            }
        }

        let killed = registration.is_some_and(Registration::finish);
        if is_debug {
            info!("debugger finished");
        }

        let status = wait_result.map_err(|error| ExecuteError::Wait {
            program: command.program().to_owned(),
            error,
        })?;
        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        debug!(target: TEST_OUTPUT_TARGET, "{stdout}");

        Ok(ProcessOutput {
            status,
            stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            killed,
        })
    }

    fn register(&self, handle: ProcessHandle) -> Registration<'_> {
        let pid = handle.pid;
        info!("process {pid} started");
        lock(&self.inner.registry).insert(pid, handle);
        Registration {
            registry: &self.inner.registry,
            pid,
            finished: false,
        }
    }

    fn start_attach(&self, config: AttachConfig) -> Option<BoxFuture<'static, bool>> {
        match &self.inner.attacher {
            Some(attacher) => {
                let attacher = Arc::clone(attacher);
                let settle_delay = self.inner.settle_delay;
                Some(
                    async move { attach_and_continue(&*attacher, &config, settle_delay).await }
                        .boxed(),
                )
            }
            None => {
                warn!(
                    "no debugger configured: attach to process {} to continue",
                    config.process_id
                );
                None
            }
        }
    }
}

/// Removes a process from the registry when it exits.
struct Registration<'a> {
    registry: &'a Mutex<IndexMap<u32, ProcessHandle>>,
    pid: u32,
    finished: bool,
}

impl Registration<'_> {
    /// Deregisters the process, returning true if it had already been removed by a stop request.
    fn finish(mut self) -> bool {
        self.finished = true;
        let removed = lock(self.registry).shift_remove(&self.pid).is_some();
        if removed {
            info!("process {} finished", self.pid);
        } else {
            info!("process {} was stopped", self.pid);
        }
        !removed
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.finished {
            lock(self.registry).shift_remove(&self.pid);
        }
    }
}

struct DebugSessionGuard<'a> {
    state: &'a Mutex<DebugState>,
}

impl Drop for DebugSessionGuard<'_> {
    fn drop(&mut self) {
        lock(self.state).clear();
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn poll_opt(future: &mut Option<BoxFuture<'static, bool>>) -> bool {
    match future {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

/// The size of each buffered reader's buffer.
const CHUNK_SIZE: usize = 4 * 1024;

/// A `BufReader` that remembers when it has reached EOF or failed.
struct FusedBufReader<R> {
    reader: BufReader<R>,
    done: bool,
}

impl<R: AsyncRead + Unpin> FusedBufReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(CHUNK_SIZE, reader),
            done: false,
        }
    }

    /// Appends available data to `acc`, returning the number of bytes appended.
    ///
    /// Cancel-safe, since [`AsyncBufReadExt::fill_buf`] is.
    async fn fill_buf(&mut self, acc: &mut BytesMut) -> io::Result<usize> {
        if self.done {
            return Ok(0);
        }

        match self.reader.fill_buf().await {
            Ok(buf) => {
                acc.extend_from_slice(buf);
                let len = buf.len();
                if len == 0 {
                    self.done = true;
                }
                self.reader.consume(len);
                Ok(len)
            }
            Err(error) => {
                self.done = true;
                Err(error)
            }
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

async fn fill_buf_opt<R: AsyncRead + Unpin>(
    reader: Option<&mut FusedBufReader<R>>,
    acc: &mut BytesMut,
) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.fill_buf(acc).await,
        None => Ok(0),
    }
}

fn is_done_opt<R: AsyncRead + Unpin>(reader: &Option<FusedBufReader<R>>) -> bool {
    reader.as_ref().is_none_or(|reader| reader.is_done())
}
