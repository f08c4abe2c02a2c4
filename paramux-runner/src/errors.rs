// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by paramux.

use camino::Utf8PathBuf;
use std::io;
use thiserror::Error;

/// An error that occurred while spawning a worker process.
///
/// Spawn failures are always fatal: they abort the run before any work item
/// is dispatched.
#[derive(Debug, Error)]
#[error("error spawning worker process `{program}`")]
pub struct SpawnError {
    /// The engine program that could not be started.
    pub program: Utf8PathBuf,
    #[source]
    pub(crate) error: io::Error,
}

impl SpawnError {
    pub(crate) fn new(program: impl Into<Utf8PathBuf>, error: io::Error) -> Self {
        Self {
            program: program.into(),
            error,
        }
    }
}

/// An attempt was made to assign a work item to a worker that is not free.
///
/// This is a programming fault in the caller, not a recoverable runtime
/// condition; the scheduler treats it as fatal.
#[derive(Clone, Debug, Error)]
#[error("worker {slot} is {state} and cannot accept an assignment")]
pub struct AssignmentError {
    /// The worker's pool slot.
    pub slot: usize,
    /// A description of the state the worker was in.
    pub state: &'static str,
}

/// The multiplexed readiness wait over worker output streams failed.
///
/// Wait-primitive failures are fatal and are never retried.
#[derive(Debug, Error)]
pub enum WaitError {
    /// Reading from a worker's output stream returned an I/O error.
    #[error("error reading output stream of worker {slot}")]
    Read {
        /// The worker's pool slot.
        slot: usize,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// Every worker stream closed while work items were still pending.
    #[error("all worker streams closed with {pending} work items still pending")]
    StreamsClosed {
        /// The number of items left in the queue.
        pending: usize,
    },
}

/// A worker emitted a malformed or missing artifact.
///
/// Protocol errors degrade into zero/partial results: they are recorded and
/// the run continues, so one bad worker cannot erase totals already
/// collected from healthy ones.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A result artifact could not be parsed as a JUnit-style document.
    #[error("malformed result artifact at `{path}`")]
    MalformedArtifact {
        /// The artifact path.
        path: Utf8PathBuf,
        /// The underlying XML error.
        #[source]
        error: quick_xml::Error,
    },

    /// A coverage snapshot could not be read.
    #[error("error reading coverage snapshot at `{path}`")]
    SnapshotIo {
        /// The snapshot path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A coverage snapshot could not be deserialized.
    #[error("malformed coverage snapshot at `{path}`")]
    MalformedSnapshot {
        /// The snapshot path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },
}

/// An error that occurred while writing a report artifact.
#[derive(Debug, Error)]
pub enum ReportWriteError {
    /// An error occurred while operating on the file system.
    #[error("error operating on path `{path}`")]
    Io {
        /// The file being operated on.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// An error occurred while serializing XML.
    #[error("error writing XML report to `{path}`")]
    Xml {
        /// The file being written.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: quick_xml::Error,
    },

    /// An error occurred while serializing JSON.
    #[error("error writing JSON report to `{path}`")]
    Json {
        /// The file being written.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// An error occurred while serializing the merged JUnit log.
    #[error("error writing JUnit log to `{path}`")]
    Junit {
        /// The file being written.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: quick_junit::SerializeError,
    },
}

/// An error that occurred while building a [`WrapperScheduler`](crate::scheduler::WrapperScheduler).
#[derive(Debug, Error)]
pub enum SchedulerBuildError {
    /// The wrapper scheduling strategy is not supported on this platform.
    #[error("the wrapper scheduler is not supported on {host}")]
    UnsupportedPlatform {
        /// The host platform.
        host: &'static str,
    },

    /// The tokio runtime could not be created.
    #[error("error creating tokio runtime")]
    RuntimeCreate(#[source] io::Error),
}

/// A fatal error raised while executing a run.
///
/// Everything in here aborts the run; recoverable conditions are degraded to
/// zero/partial results before they ever reach this type.
#[derive(Debug, Error)]
pub enum RunError {
    /// A worker process could not be spawned.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// A work item was assigned to a non-free worker.
    #[error(transparent)]
    Assignment(#[from] AssignmentError),

    /// The readiness wait failed.
    #[error(transparent)]
    Wait(#[from] WaitError),

    /// Writing a command line to a worker's input pipe failed.
    ///
    /// The offending worker's captured stderr is attached for diagnostics.
    #[error("error writing to input pipe of worker {slot}\n{crash_report}")]
    WorkerPipe {
        /// The worker's pool slot.
        slot: usize,
        /// The worker's captured error-stream content.
        crash_report: String,
        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// The per-run artifact directory could not be created.
    #[error("error creating artifact directory")]
    ArtifactDir(#[source] io::Error),

    /// A final report could not be written.
    #[error(transparent)]
    ReportWrite(#[from] ReportWriteError),
}

impl RunError {
    /// Returns the captured diagnostic output of the worker that triggered
    /// this error, if there is one.
    pub fn crash_report(&self) -> Option<&str> {
        match self {
            RunError::WorkerPipe { crash_report, .. } => Some(crash_report),
            _ => None,
        }
    }
}
