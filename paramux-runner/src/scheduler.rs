// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The wrapper scheduler: a fixed pool of persistent worker processes fed
//! from a FIFO queue of work items.
//!
//! Orchestration is single-threaded and cooperative. All worker stdout
//! streams are folded into one [`StreamMap`] and polled under a one-second
//! timeout; parallelism comes from the worker processes themselves, never
//! from orchestration threads. A worker that completes an item has its
//! artifacts flushed into the shared interpreter and coverage merger before
//! the next item is dispatched to it.

use crate::{
    config::RunnerOpts,
    coverage::CoverageMerger,
    errors::{RunError, SchedulerBuildError, WaitError},
    results::{write_junit_log, ArtifactReader, LogInterpreter, RiskyMarkers},
    summary::{RunSummary, RunVerdict},
    work_list::WorkItem,
    worker::{WorkerEvent, WorkerOutput, WorkerState, WrapperWorker},
};
use camino_tempfile::Utf8TempDir;
use std::{collections::VecDeque, fs, io, pin::Pin, time::Duration};
use tokio::{runtime::Runtime, time::timeout};
use tokio_stream::{Stream, StreamExt, StreamMap};
use tracing::{debug, error, info, warn};

/// A worker output stream with its end-of-stream made observable: `None` is
/// emitted once when the underlying pipe closes. [`StreamMap`] silently
/// drops exhausted streams, and a crashed worker's EOF must not go
/// unnoticed.
type TaggedOutput = Pin<Box<dyn Stream<Item = Option<io::Result<String>>> + Send>>;

fn tag_eof(output: WorkerOutput) -> TaggedOutput {
    Box::pin(output.map(Some).chain(tokio_stream::once(None)))
}

/// How long one readiness wait blocks before the free-worker sweep runs
/// again regardless of output activity.
const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// The outcome of a completed run.
#[derive(Clone, Debug)]
pub struct RunResults {
    /// Final totals.
    pub summary: RunSummary,
    /// The overall verdict implied by the totals.
    pub verdict: RunVerdict,
    /// How many work items were dispatched.
    pub items_run: usize,
    /// How many workers ended the run stopped. Always equals the configured
    /// process count after a clean run.
    pub stopped_workers: usize,
}

/// Executes work items across a pool of persistent engine processes.
pub struct WrapperScheduler {
    opts: RunnerOpts,
    runtime: Runtime,
}

impl WrapperScheduler {
    /// Creates a scheduler for the given options.
    ///
    /// Fails fast on platforms where the line-oriented pipe protocol is not
    /// supported, before any worker is spawned.
    pub fn new(opts: RunnerOpts) -> Result<Self, SchedulerBuildError> {
        if cfg!(windows) {
            return Err(SchedulerBuildError::UnsupportedPlatform { host: "Windows" });
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(SchedulerBuildError::RuntimeCreate)?;
        Ok(Self { opts, runtime })
    }

    /// Runs every item in `items` to completion and renders the configured
    /// reports.
    ///
    /// Blocks the calling thread until the run finishes. On success all
    /// workers have been stopped and reaped; on a fatal error, workers are
    /// killed as their handles drop.
    pub fn execute(&self, items: Vec<WorkItem>) -> Result<RunResults, RunError> {
        self.runtime.block_on(run_items(&self.opts, items))
    }
}

async fn run_items(opts: &RunnerOpts, items: Vec<WorkItem>) -> Result<RunResults, RunError> {
    let artifact_dir = camino_tempfile::tempdir().map_err(RunError::ArtifactDir)?;
    let items_run = items.len();
    let mut pending: VecDeque<WorkItem> = items.into();

    info!(
        processes = opts.process_count(),
        items = items_run,
        "starting run"
    );

    let mut pool = Pool::start(opts, &artifact_dir)?;

    // Every worker is free at startup and would otherwise sit silent until
    // its first output line; seed them all before the dispatch loop.
    pool.sweep_free_workers(&mut pending).await?;

    while !pending.is_empty() {
        match timeout(WAIT_TIMEOUT, pool.streams.next()).await {
            // Quiet tick. Re-sweep: a worker may have been freed by a line
            // processed in the same poll as another worker's.
            Err(_elapsed) => {}
            Ok(None) => {
                return Err(WaitError::StreamsClosed {
                    pending: pending.len(),
                }
                .into());
            }
            Ok(Some((slot, Some(line)))) => {
                let line = line.map_err(|error| WaitError::Read { slot, error })?;
                pool.workers[slot].note_line(&line);
            }
            // A worker's pipe closed without an exit handshake: the worker
            // crashed. Its in-flight item degrades to whatever artifact it
            // managed to write; the rest of the pool keeps going.
            Ok(Some((slot, None))) => {
                warn!(
                    worker = slot,
                    crash_report = %pool.workers[slot].crash_report(),
                    "worker output closed unexpectedly"
                );
                pool.workers[slot].note_eof();
            }
        }
        pool.sweep_free_workers(&mut pending).await?;
    }

    pool.drain().await?;

    let stopped_workers = pool
        .workers
        .iter()
        .filter(|w| w.state() == WorkerState::Stopped)
        .count();

    let summary = RunSummary::from_interpreter(&pool.interpreter);
    let verdict = summary.verdict();
    debug!(?verdict, "run complete");

    if let Some(path) = &opts.junit_log {
        write_junit_log(&pool.interpreter, path, "paramux")?;
    }
    if let (Some(coverage_opts), Some(merger)) = (&opts.coverage, &pool.coverage) {
        let reporter = merger.reporter();
        if let Some(target) = &coverage_opts.clover {
            reporter.clover(target)?;
        }
        if let Some(target) = &coverage_opts.crap4j {
            reporter.crap4j(target)?;
        }
        if let Some(target) = &coverage_opts.html {
            reporter.html(target)?;
        }
        if let Some(target) = &coverage_opts.text {
            reporter.text(target)?;
        }
        if let Some(target) = &coverage_opts.xml {
            reporter.xml(target)?;
        }
        if let Some(target) = &coverage_opts.raw {
            reporter.raw(target)?;
        }
    }

    Ok(RunResults {
        summary,
        verdict,
        items_run,
        stopped_workers,
    })
}

/// The worker pool plus the per-run accumulation state.
struct Pool<'a> {
    opts: &'a RunnerOpts,
    workers: Vec<WrapperWorker>,
    streams: StreamMap<usize, TaggedOutput>,
    interpreter: LogInterpreter,
    coverage: Option<CoverageMerger>,
    risky: RiskyMarkers,
}

impl<'a> Pool<'a> {
    fn start(opts: &'a RunnerOpts, artifact_dir: &Utf8TempDir) -> Result<Self, RunError> {
        let mut workers = Vec::with_capacity(opts.process_count());
        let mut streams = StreamMap::new();
        for slot in 0..opts.process_count() {
            let (worker, output) = WrapperWorker::start(slot, opts, artifact_dir.path())?;
            streams.insert(slot, tag_eof(output));
            workers.push(worker);
        }
        Ok(Self {
            opts,
            workers,
            streams,
            interpreter: LogInterpreter::new(),
            coverage: opts
                .coverage
                .as_ref()
                .map(|coverage| CoverageMerger::new(coverage.test_limit)),
            risky: RiskyMarkers::new(opts.risky_markers.iter().cloned()),
        })
    }

    /// Flushes completed assignments on every free worker and hands each one
    /// the next pending item.
    ///
    /// A failure here is isolated to the offending worker: it is told to
    /// stop with its crash report logged, then the error is re-raised as
    /// fatal for the run.
    async fn sweep_free_workers(
        &mut self,
        pending: &mut VecDeque<WorkItem>,
    ) -> Result<(), RunError> {
        for worker in &mut self.workers {
            if !worker.is_free() {
                continue;
            }
            flush_worker(
                worker,
                &mut self.interpreter,
                self.coverage.as_mut(),
                &self.risky,
            );
            let Some(item) = pending.pop_front() else {
                continue;
            };
            debug!(worker = worker.slot(), item = %item, "dispatching");
            if let Err(run_error) = worker.assign(item, self.opts).await {
                error!(
                    worker = worker.slot(),
                    crash_report = %worker.crash_report(),
                    "worker rejected assignment, stopping it"
                );
                worker.stop().await;
                return Err(run_error);
            }
        }
        Ok(())
    }

    /// Stops every worker, keeps collecting output until all streams end or
    /// every worker has acknowledged the exit, then flushes stragglers and
    /// reaps the children.
    async fn drain(&mut self) -> Result<(), RunError> {
        for worker in &mut self.workers {
            worker.stop().await;
        }

        loop {
            match timeout(WAIT_TIMEOUT, self.streams.next()).await {
                Err(_elapsed) => {
                    if self.workers.iter().all(|w| !w.is_running()) {
                        break;
                    }
                }
                Ok(None) => break,
                Ok(Some((slot, Some(line)))) => {
                    let line = line.map_err(|error| WaitError::Read { slot, error })?;
                    if self.workers[slot].note_line(&line) == WorkerEvent::Exited {
                        debug!(worker = slot, "worker exited");
                    }
                }
                Ok(Some((slot, None))) => self.workers[slot].note_eof(),
            }
        }

        for worker in &mut self.workers {
            worker.note_eof();
            flush_worker(
                worker,
                &mut self.interpreter,
                self.coverage.as_mut(),
                &self.risky,
            );
            match worker.reap().await {
                Ok(status) => debug!(worker = worker.slot(), %status, "worker reaped"),
                Err(error) => debug!(worker = worker.slot(), %error, "worker reap failed"),
            }
        }
        Ok(())
    }
}

/// Consumes a worker's completed assignment: parses the result artifact into
/// the interpreter, unions the coverage snapshot, then deletes both files.
fn flush_worker(
    worker: &mut WrapperWorker,
    interpreter: &mut LogInterpreter,
    coverage: Option<&mut CoverageMerger>,
    risky: &RiskyMarkers,
) {
    let Some(done) = worker.reset() else {
        return;
    };
    interpreter.add_reader(ArtifactReader::from_artifact(&done.result_artifact, risky));
    if let Err(error) = fs::remove_file(&done.result_artifact) {
        debug!(artifact = %done.result_artifact, %error, "result artifact not deleted");
    }
    if let Some(path) = &done.coverage_artifact {
        if let Some(merger) = coverage {
            merger.add_snapshot(path);
        }
        if let Err(error) = fs::remove_file(path) {
            debug!(artifact = %path, %error, "coverage artifact not deleted");
        }
    }
}
