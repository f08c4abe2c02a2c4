// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A handle to one persistent worker process.
//!
//! Each worker runs the external engine in server mode: paramux writes one
//! shell-quoted command line per assignment to its stdin (the engine must
//! word-split it with quote removal, not whitespace alone), the engine emits
//! free-form chatter plus the completion sentinel to its stdout, and the
//! termination token makes it exit. Stdout is surrendered to the scheduler
//! as a line stream so the whole pool can be multiplexed in one place;
//! the worker itself only interprets lines handed back to it.

use crate::{
    config::RunnerOpts,
    errors::{AssignmentError, RunError, SpawnError},
    work_list::WorkItem,
};
use camino::{Utf8Path, Utf8PathBuf};
use rand::RngExt as _;
use std::{
    process::Stdio,
    sync::{Arc, Mutex},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
};
use tokio_stream::wrappers::LinesStream;
use tracing::debug;

/// The fixed line a worker emits when its current assignment finished.
pub const COMPLETION_SENTINEL: &str = "FINISHED";
/// The fixed line written to a worker to make it exit.
pub const EXIT_COMMAND: &str = "EXIT";
/// The fixed line a worker echoes right before exiting.
pub const EXIT_ACK: &str = "EXITED";

/// The per-worker output stream handed to the scheduler's multiplexed wait.
pub type WorkerOutput = LinesStream<BufReader<ChildStdout>>;

/// Lifecycle state of a worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerState {
    /// Started and ready for an assignment.
    Free,
    /// Executing an assignment.
    Busy,
    /// Told to exit, not yet acknowledged.
    Stopping,
    /// Exited (acknowledged, hit end of stream, or reaped).
    Stopped,
}

impl WorkerState {
    fn name(self) -> &'static str {
        match self {
            WorkerState::Free => "free",
            WorkerState::Busy => "busy",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        }
    }
}

/// What a line from a worker's output meant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerEvent {
    /// Free-form engine chatter; discarded.
    Chatter,
    /// The completion sentinel: the current assignment is collectible.
    Finished,
    /// The exit acknowledgement.
    Exited,
}

/// One dispatched work item together with its per-invocation artifact
/// paths.
#[derive(Clone, Debug)]
pub struct Assignment {
    /// The work item being executed.
    pub item: WorkItem,
    /// Where the engine writes the structured result artifact.
    pub result_artifact: Utf8PathBuf,
    /// Where the engine writes the coverage snapshot, if coverage is on.
    pub coverage_artifact: Option<Utf8PathBuf>,
}

/// A handle to one worker process and its duplex pipe.
#[derive(Debug)]
pub struct WrapperWorker {
    slot: usize,
    child: Child,
    stdin: ChildStdin,
    state: WorkerState,
    assignment: Option<Assignment>,
    finished: Option<Assignment>,
    invocations: u64,
    unique_token: Option<String>,
    artifact_dir: Utf8PathBuf,
    stderr_buf: Arc<Mutex<String>>,
}

impl WrapperWorker {
    /// Spawns the engine program for pool slot `slot` in server mode.
    ///
    /// Returns the handle plus the stdout line stream the scheduler feeds
    /// into its readiness multiplex. Must be called within a tokio runtime.
    pub fn start(
        slot: usize,
        opts: &RunnerOpts,
        artifact_dir: &Utf8Path,
    ) -> Result<(Self, WorkerOutput), SpawnError> {
        let unique_token =
            (!opts.no_test_tokens).then(|| format!("{:08x}", rand::rng().random::<u32>()));

        let mut command = Command::new(opts.engine.program.as_str());
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !opts.no_test_tokens {
            // Slot tokens are 1-based, matching what engines historically
            // expect from parallel harnesses.
            command.env("TEST_TOKEN", (slot + 1).to_string());
        }
        if let Some(unique) = &unique_token {
            command.env("UNIQUE_TEST_TOKEN", unique);
        }

        let mut child = command
            .spawn()
            .map_err(|error| SpawnError::new(opts.engine.program.clone(), error))?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let buf = stderr_buf.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut buf = buf.lock().expect("stderr buffer lock");
                buf.push_str(&line);
                buf.push('\n');
            }
        });

        let output = LinesStream::new(BufReader::new(stdout).lines());
        let worker = Self {
            slot,
            child,
            stdin,
            state: WorkerState::Free,
            assignment: None,
            finished: None,
            invocations: 0,
            unique_token,
            artifact_dir: artifact_dir.to_owned(),
            stderr_buf,
        };
        Ok((worker, output))
    }

    /// The worker's pool slot.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The worker's current state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// True if the worker can accept an assignment.
    pub fn is_free(&self) -> bool {
        self.state == WorkerState::Free
    }

    /// True if the worker process has not yet exited (as far as the
    /// protocol has shown).
    pub fn is_running(&self) -> bool {
        self.state != WorkerState::Stopped
    }

    /// Dispatches one work item to this worker.
    ///
    /// Builds the engine command line with unique per-invocation artifact
    /// paths, writes it as one line, and marks the worker busy. The worker
    /// must be free; anything else is a programming fault in the caller and
    /// is reported as a fatal [`AssignmentError`].
    pub async fn assign(&mut self, item: WorkItem, opts: &RunnerOpts) -> Result<(), RunError> {
        if !self.is_free() {
            return Err(AssignmentError {
                slot: self.slot,
                state: self.state.name(),
            }
            .into());
        }

        self.invocations += 1;
        let result_artifact = self.artifact_path("result", "xml");
        let coverage_artifact = opts
            .has_coverage()
            .then(|| self.artifact_path("coverage", "json"));

        let argv = build_command(opts, &item, &result_artifact, coverage_artifact.as_deref());
        let line = shell_words::join(&argv);
        debug!(worker = self.slot, command = %line, "assigning work item");
        self.write_line(&line).await?;

        self.assignment = Some(Assignment {
            item,
            result_artifact,
            coverage_artifact,
        });
        self.state = WorkerState::Busy;
        Ok(())
    }

    /// Writes the termination token. Does not wait for the worker to exit,
    /// and tolerates an already-gone worker.
    pub async fn stop(&mut self) {
        if self.state == WorkerState::Stopped {
            return;
        }
        if let Err(error) = self.write_line(EXIT_COMMAND).await {
            debug!(worker = self.slot, %error, "stop write failed, worker likely gone");
        }
        if self.state != WorkerState::Stopped {
            self.state = WorkerState::Stopping;
        }
    }

    /// Interprets one line read from this worker's output stream.
    pub fn note_line(&mut self, line: &str) -> WorkerEvent {
        match line.trim_end() {
            COMPLETION_SENTINEL => {
                if let Some(done) = self.assignment.take() {
                    self.finished = Some(done);
                }
                if matches!(self.state, WorkerState::Free | WorkerState::Busy) {
                    self.state = WorkerState::Free;
                }
                WorkerEvent::Finished
            }
            EXIT_ACK => {
                self.state = WorkerState::Stopped;
                WorkerEvent::Exited
            }
            chatter => {
                debug!(worker = self.slot, line = chatter, "worker chatter");
                WorkerEvent::Chatter
            }
        }
    }

    /// Marks the worker stopped after its output stream ended.
    ///
    /// If the stream ended with an assignment still in flight (a crashed
    /// worker), the assignment becomes collectible so whatever artifact the
    /// worker managed to write is still consumed — typically an absent or
    /// partial file that degrades to a zero-count contribution.
    pub fn note_eof(&mut self) {
        if let Some(lost) = self.assignment.take() {
            self.finished = Some(lost);
        }
        self.state = WorkerState::Stopped;
    }

    /// Takes the completed assignment, returning the worker to a clean
    /// free/stopped state.
    ///
    /// The artifacts are not deleted here: the caller must consume them
    /// first and is responsible for removing them afterwards.
    pub fn reset(&mut self) -> Option<Assignment> {
        self.finished.take()
    }

    /// Waits for the child process to exit and marks the worker stopped.
    pub async fn reap(&mut self) -> std::io::Result<std::process::ExitStatus> {
        let status = self.child.wait().await;
        self.state = WorkerState::Stopped;
        status
    }

    /// Returns the error-stream content captured so far, for diagnostics
    /// when a worker exits unexpectedly.
    pub fn crash_report(&self) -> String {
        self.stderr_buf.lock().expect("stderr buffer lock").clone()
    }

    fn artifact_path(&self, kind: &str, ext: &str) -> Utf8PathBuf {
        // Slot + unique token + invocation counter: never collides across
        // concurrent workers or across reuse of this worker.
        let unique = self.unique_token.as_deref().unwrap_or("local");
        self.artifact_dir.join(format!(
            "pm_s{}_u{}_i{}_{kind}.{ext}",
            self.slot, unique, self.invocations
        ))
    }

    async fn write_line(&mut self, line: &str) -> Result<(), RunError> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        let write = async {
            self.stdin.write_all(&buf).await?;
            self.stdin.flush().await
        };
        write.await.map_err(|error| RunError::WorkerPipe {
            slot: self.slot,
            crash_report: self.crash_report(),
            error,
        })
    }
}

fn build_command(
    opts: &RunnerOpts,
    item: &WorkItem,
    result_artifact: &Utf8Path,
    coverage_artifact: Option<&Utf8Path>,
) -> Vec<String> {
    // The engine receives its own name as argv[0], then passthrough args,
    // filters, artifact targets, and finally the suite path.
    let mut argv = Vec::new();
    argv.push(opts.engine.program.to_string());
    argv.extend(opts.engine.args.iter().cloned());
    for group in &opts.groups {
        argv.push(format!("--group={group}"));
    }
    for group in &opts.excluded_groups {
        argv.push(format!("--exclude-group={group}"));
    }
    argv.push(format!("--log-junit={result_artifact}"));
    if let Some(coverage) = coverage_artifact {
        argv.push(format!("--coverage={coverage}"));
    }
    if let Some(filter) = item.filter() {
        argv.push(format!("--filter={filter}"));
    }
    argv.push(item.suite_path().to_string());
    argv
}
