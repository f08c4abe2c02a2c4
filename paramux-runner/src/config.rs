// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run options for the wrapper scheduler.

use camino::Utf8PathBuf;
use std::num::NonZeroUsize;

/// How to invoke the external test engine.
///
/// The engine is opaque to paramux: it is started once per worker in server
/// mode, reads one serialized command line per input line, and emits the
/// completion sentinel when a command finishes.
#[derive(Clone, Debug)]
pub struct EngineSpec {
    /// The engine program spawned for each worker.
    pub program: Utf8PathBuf,
    /// Arguments passed through unchanged on every invocation command line.
    pub args: Vec<String>,
}

impl EngineSpec {
    /// Creates a new engine spec for the given program.
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Adds passthrough arguments.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(|arg| arg.into()));
        self
    }
}

/// Coverage merge and report settings.
///
/// Coverage is enabled by constructing one of these; each target field that
/// is set causes the corresponding report to be rendered from the merged
/// model at run completion.
#[derive(Clone, Debug, Default)]
pub struct CoverageOpts {
    /// Per-line cap on retained covering-test identifiers. `None` means the
    /// merge is an exact union.
    pub test_limit: Option<usize>,
    /// Target path for the Clover XML report.
    pub clover: Option<Utf8PathBuf>,
    /// Target path for the defect-density (Crap4J-style) XML report.
    pub crap4j: Option<Utf8PathBuf>,
    /// Target directory for the HTML tree.
    pub html: Option<Utf8PathBuf>,
    /// Target path for the line-oriented text summary.
    pub text: Option<Utf8PathBuf>,
    /// Target path for the per-file structured XML report.
    pub xml: Option<Utf8PathBuf>,
    /// Target path for the raw re-serializable snapshot.
    pub raw: Option<Utf8PathBuf>,
}

/// Options for a [`WrapperScheduler`](crate::scheduler::WrapperScheduler) run.
#[derive(Clone, Debug)]
pub struct RunnerOpts {
    pub(crate) process_count: NonZeroUsize,
    pub(crate) engine: EngineSpec,
    pub(crate) functional: bool,
    pub(crate) groups: Vec<String>,
    pub(crate) excluded_groups: Vec<String>,
    pub(crate) junit_log: Option<Utf8PathBuf>,
    pub(crate) coverage: Option<CoverageOpts>,
    pub(crate) no_test_tokens: bool,
    pub(crate) risky_markers: Vec<String>,
}

impl RunnerOpts {
    /// Starts building options for the given engine.
    pub fn builder(engine: EngineSpec) -> RunnerOptsBuilder {
        RunnerOptsBuilder {
            opts: RunnerOpts {
                process_count: NonZeroUsize::MIN,
                engine,
                functional: false,
                groups: Vec::new(),
                excluded_groups: Vec::new(),
                junit_log: None,
                coverage: None,
                no_test_tokens: false,
                risky_markers: vec!["RiskyTestError".to_owned()],
            },
        }
    }

    /// The number of worker processes started for a run.
    pub fn process_count(&self) -> usize {
        self.process_count.get()
    }

    /// Whether coverage merging is enabled.
    pub fn has_coverage(&self) -> bool {
        self.coverage.is_some()
    }
}

/// Builder for [`RunnerOpts`].
#[derive(Debug)]
pub struct RunnerOptsBuilder {
    opts: RunnerOpts,
}

impl RunnerOptsBuilder {
    /// Sets the number of worker processes.
    pub fn set_process_count(&mut self, count: NonZeroUsize) -> &mut Self {
        self.opts.process_count = count;
        self
    }

    /// Enables fine-grained (per-method) mode. Work items carry their own
    /// filters; this flag only records the mode for diagnostics.
    pub fn set_functional(&mut self, functional: bool) -> &mut Self {
        self.opts.functional = functional;
        self
    }

    /// Restricts engine invocations to the given groups.
    pub fn set_groups(&mut self, groups: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.opts.groups = groups.into_iter().map(|g| g.into()).collect();
        self
    }

    /// Excludes the given groups from engine invocations.
    pub fn set_excluded_groups(
        &mut self,
        groups: impl IntoIterator<Item = impl Into<String>>,
    ) -> &mut Self {
        self.opts.excluded_groups = groups.into_iter().map(|g| g.into()).collect();
        self
    }

    /// Sets the target path for the merged JUnit log.
    pub fn set_junit_log(&mut self, path: impl Into<Utf8PathBuf>) -> &mut Self {
        self.opts.junit_log = Some(path.into());
        self
    }

    /// Enables coverage merging with the given settings.
    pub fn set_coverage(&mut self, coverage: CoverageOpts) -> &mut Self {
        self.opts.coverage = Some(coverage);
        self
    }

    /// Disables the `TEST_TOKEN`/`UNIQUE_TEST_TOKEN` environment variables
    /// normally exported to each worker.
    pub fn set_no_test_tokens(&mut self, no_test_tokens: bool) -> &mut Self {
        self.opts.no_test_tokens = no_test_tokens;
        self
    }

    /// Sets the defect type names treated as risky-test markers.
    pub fn set_risky_markers(
        &mut self,
        markers: impl IntoIterator<Item = impl Into<String>>,
    ) -> &mut Self {
        self.opts.risky_markers = markers.into_iter().map(|m| m.into()).collect();
        self
    }

    /// Finishes building.
    pub fn build(&self) -> RunnerOpts {
        self.opts.clone()
    }
}
