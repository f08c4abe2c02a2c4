// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The paramux command-line interface.

use camino::Utf8PathBuf;
use clap::{Args, Parser};
use color_eyre::eyre::{Report, Result, WrapErr, bail};
use paramux_runner::{
    config::{CoverageOpts, EngineSpec, RunnerOpts},
    scheduler::WrapperScheduler,
    work_list::{WorkItem, load_work_list},
};
use std::num::NonZeroUsize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    Layer, filter::Targets, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Exit code for fatal runner errors, kept distinct from the 0/1/2 verdict
/// codes so wrappers can tell "the tests failed" from "the run broke".
const FATAL_EXIT_CODE: i32 = 4;

/// Runs test suites in parallel across a pool of persistent engine
/// processes.
#[derive(Debug, Parser)]
#[command(name = "paramux", version)]
struct App {
    /// Number of worker processes [default: logical CPU count]
    #[arg(short = 'p', long, value_name = "N")]
    processes: Option<NonZeroUsize>,

    /// The test engine program started once per worker
    #[arg(long, value_name = "PATH")]
    engine: Utf8PathBuf,

    /// Extra argument passed through to the engine on every invocation
    #[arg(long = "engine-arg", value_name = "ARG")]
    engine_args: Vec<String>,

    /// Schedule individual test methods instead of whole suite files
    ///
    /// Requires a work list whose items carry method filters.
    #[arg(long)]
    functional: bool,

    /// Only run tests from this group (repeatable)
    #[arg(long = "group", value_name = "GROUP")]
    groups: Vec<String>,

    /// Exclude tests from this group (repeatable)
    #[arg(long = "exclude-group", value_name = "GROUP")]
    excluded_groups: Vec<String>,

    /// Write a consolidated JUnit log to this path
    #[arg(long = "log-junit", value_name = "PATH")]
    junit_log: Option<Utf8PathBuf>,

    /// Do not export TEST_TOKEN/UNIQUE_TEST_TOKEN to workers
    #[arg(long)]
    no_test_tokens: bool,

    /// Defect type name treated as a risky-test marker (repeatable)
    #[arg(long = "risky-marker", value_name = "TYPE")]
    risky_markers: Vec<String>,

    #[command(flatten)]
    coverage: CoverageArgs,

    /// JSON work list file: an array of {"suite_path", "filter"?} items
    #[arg(long = "work-list", value_name = "PATH", conflicts_with = "suites")]
    work_list: Option<Utf8PathBuf>,

    /// Test suite files to run
    #[arg(value_name = "SUITE")]
    suites: Vec<Utf8PathBuf>,
}

#[derive(Debug, Args)]
struct CoverageArgs {
    /// Cap on covering test identifiers retained per source line
    #[arg(long = "coverage-test-limit", value_name = "N", help_heading = "Coverage options")]
    test_limit: Option<usize>,

    /// Write a Clover XML coverage report
    #[arg(long = "coverage-clover", value_name = "PATH", help_heading = "Coverage options")]
    clover: Option<Utf8PathBuf>,

    /// Write a defect-density (Crap4J-style) coverage report
    #[arg(long = "coverage-crap4j", value_name = "PATH", help_heading = "Coverage options")]
    crap4j: Option<Utf8PathBuf>,

    /// Write an HTML coverage tree to this directory
    #[arg(long = "coverage-html", value_name = "DIR", help_heading = "Coverage options")]
    html: Option<Utf8PathBuf>,

    /// Write a line-oriented text coverage summary
    #[arg(long = "coverage-text", value_name = "PATH", help_heading = "Coverage options")]
    text: Option<Utf8PathBuf>,

    /// Write a per-file structured XML coverage report
    #[arg(long = "coverage-xml", value_name = "PATH", help_heading = "Coverage options")]
    xml: Option<Utf8PathBuf>,

    /// Write the raw merged coverage snapshot as JSON
    #[arg(long = "coverage-raw", value_name = "PATH", help_heading = "Coverage options")]
    raw: Option<Utf8PathBuf>,
}

impl CoverageArgs {
    /// Coverage is enabled if any report target is requested.
    fn to_opts(&self) -> Option<CoverageOpts> {
        let opts = CoverageOpts {
            test_limit: self.test_limit,
            clover: self.clover.clone(),
            crap4j: self.crap4j.clone(),
            html: self.html.clone(),
            text: self.text.clone(),
            xml: self.xml.clone(),
            raw: self.raw.clone(),
        };
        let enabled = opts.clover.is_some()
            || opts.crap4j.is_some()
            || opts.html.is_some()
            || opts.text.is_some()
            || opts.xml.is_some()
            || opts.raw.is_some();
        enabled.then_some(opts)
    }
}

impl App {
    fn exec(self) -> Result<i32> {
        let items = self.collect_items()?;
        let opts = self.into_runner_opts();
        let scheduler = WrapperScheduler::new(opts)?;

        match scheduler.execute(items) {
            Ok(results) => {
                println!("{}", results.summary);
                Ok(results.verdict.exit_code())
            }
            Err(error) => {
                if let Some(crash_report) = error.crash_report() {
                    if !crash_report.is_empty() {
                        eprintln!("{crash_report}");
                    }
                }
                eprintln!("paramux: fatal: {:#}", Report::new(error));
                Ok(FATAL_EXIT_CODE)
            }
        }
    }

    fn collect_items(&self) -> Result<Vec<WorkItem>> {
        if let Some(path) = &self.work_list {
            return load_work_list(path)
                .wrap_err_with(|| format!("error loading work list `{path}`"));
        }
        if self.suites.is_empty() {
            bail!("no test suites given: pass SUITE paths or --work-list");
        }
        if self.functional {
            bail!("--functional requires --work-list items carrying method filters");
        }
        Ok(self
            .suites
            .iter()
            .map(|suite| WorkItem::suite(suite.clone()))
            .collect())
    }

    fn into_runner_opts(self) -> RunnerOpts {
        let processes = self.processes.unwrap_or_else(|| {
            std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
        });
        let engine = EngineSpec::new(self.engine).with_args(self.engine_args);

        let mut builder = RunnerOpts::builder(engine);
        builder
            .set_process_count(processes)
            .set_functional(self.functional)
            .set_groups(self.groups)
            .set_excluded_groups(self.excluded_groups)
            .set_no_test_tokens(self.no_test_tokens);
        if let Some(path) = self.junit_log {
            builder.set_junit_log(path);
        }
        if !self.risky_markers.is_empty() {
            builder.set_risky_markers(self.risky_markers);
        }
        if let Some(coverage) = self.coverage.to_opts() {
            builder.set_coverage(coverage);
        }
        builder.build()
    }
}

fn init_logging() {
    let level_str = std::env::var("PARAMUX_LOG").unwrap_or_default();
    // An empty filter string falls back to the standard level.
    let targets = if level_str.is_empty() {
        Targets::new().with_default(LevelFilter::WARN)
    } else {
        level_str.parse().expect("unable to parse PARAMUX_LOG")
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(targets);
    tracing_subscriber::registry().with(layer).init();
}

fn main() -> Result<()> {
    color_eyre::install()?;
    init_logging();

    let app = App::parse();
    let code = app.exec()?;
    std::process::exit(code);
}
