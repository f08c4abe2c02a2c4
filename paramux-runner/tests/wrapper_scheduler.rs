// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end runs against a scripted stand-in engine.
//!
//! The stand-in speaks the real wire protocol: it reads one shell-quoted
//! command line per assignment, records which suite it was asked to run,
//! copies a pre-staged artifact to the requested target paths, and emits the
//! completion sentinel. Termination is the EXIT/EXITED handshake.

#![cfg(unix)]

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use indoc::{formatdoc, indoc};
use paramux_runner::{
    config::{CoverageOpts, EngineSpec, RunnerOpts, RunnerOptsBuilder},
    coverage::CoverageSnapshot,
    scheduler::{RunResults, WrapperScheduler},
    summary::RunVerdict,
    work_list::WorkItem,
};
use pretty_assertions::assert_eq;
use std::{num::NonZeroUsize, os::unix::fs::PermissionsExt};

struct Harness {
    dir: Utf8TempDir,
    engine: Utf8PathBuf,
    run_log: Utf8PathBuf,
    templates: Utf8PathBuf,
}

impl Harness {
    /// Generates the stand-in engine script inside a fresh tempdir.
    ///
    /// For each command the script shell-unquotes the line, appends the
    /// suite path to the run log,
    /// copies `<suite basename>.result` to the `--log-junit=` target and
    /// `<suite basename>.cov` to the `--coverage=` target (when those
    /// templates exist), then reports completion.
    fn new() -> Self {
        let dir = Utf8TempDir::new().expect("tempdir created");
        let run_log = dir.path().join("run.log");
        let templates = dir.path().join("templates");
        std::fs::create_dir(&templates).expect("template dir created");

        let engine = dir.path().join("engine.sh");
        let script = formatdoc! {r#"
            #!/bin/sh
            run_log="{run_log}"
            templates="{templates}"
            while IFS= read -r line; do
                if [ "$line" = "EXIT" ]; then echo "EXITED"; exit 0; fi
                junit=""
                cov=""
                suite=""
                # Command lines arrive shell-quoted; word-split with quote
                # removal, not plain $IFS expansion.
                eval "set -- $line"
                for arg in "$@"; do
                    case "$arg" in
                        --log-junit=*) junit="${{arg#--log-junit=}}" ;;
                        --coverage=*) cov="${{arg#--coverage=}}" ;;
                    esac
                    suite="$arg"
                done
                echo "$suite" >> "$run_log"
                base=$(basename "$suite")
                if [ -n "$junit" ] && [ -f "$templates/$base.result" ]; then
                    cp "$templates/$base.result" "$junit"
                fi
                if [ -n "$cov" ] && [ -f "$templates/$base.cov" ]; then
                    cp "$templates/$base.cov" "$cov"
                fi
                echo "FINISHED"
            done
        "#};
        std::fs::write(&engine, script).expect("engine script written");
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755))
            .expect("engine script chmod");

        Self {
            dir,
            engine,
            run_log,
            templates,
        }
    }

    fn opts_builder(&self) -> RunnerOptsBuilder {
        RunnerOpts::builder(EngineSpec::new(&self.engine))
    }

    /// Stages the result artifact the engine returns for `suite`.
    fn stage_result(&self, suite: &str, document: &str) {
        let base = Utf8Path::new(suite).file_name().expect("suite basename");
        std::fs::write(self.templates.join(format!("{base}.result")), document)
            .expect("result template written");
    }

    /// Stages the coverage snapshot the engine returns for `suite`.
    fn stage_coverage(&self, suite: &str, snapshot: &str) {
        let base = Utf8Path::new(suite).file_name().expect("suite basename");
        std::fs::write(self.templates.join(format!("{base}.cov")), snapshot)
            .expect("coverage template written");
    }

    /// The suites the engine was asked to run, in dispatch order.
    fn executed_suites(&self) -> Vec<String> {
        match std::fs::read_to_string(&self.run_log) {
            Ok(log) => log.lines().map(str::to_owned).collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn passing_suite(name: &str, file: &str, assertions: usize) -> String {
    formatdoc! {r#"
        <testsuites>
          <testsuite name="{name}" file="{file}" tests="1" assertions="{assertions}"
                     failures="0" errors="0" skipped="0" time="0.1">
            <testcase name="testOk" class="{name}" file="{file}" line="5"
                      assertions="{assertions}" time="0.1"/>
          </testsuite>
        </testsuites>
    "#}
}

fn run(opts: RunnerOpts, items: Vec<WorkItem>) -> RunResults {
    let scheduler = WrapperScheduler::new(opts).expect("scheduler built");
    scheduler.execute(items).expect("run completed")
}

#[test]
fn mixed_run_across_two_workers() {
    let harness = Harness::new();
    harness.stage_result("tests/OneTest.php", &passing_suite("OneTest", "tests/OneTest.php", 2));
    harness.stage_result("tests/TwoTest.php", &passing_suite("TwoTest", "tests/TwoTest.php", 1));
    harness.stage_result(
        "tests/ThreeTest.php",
        indoc! {r#"
            <testsuites>
              <testsuite name="ThreeTest" file="tests/ThreeTest.php" tests="1" assertions="1"
                         failures="1" errors="0" skipped="0" time="0.2">
                <testcase name="testNope" class="ThreeTest" file="tests/ThreeTest.php" line="9"
                          assertions="1" time="0.2">
                  <failure type="AssertionFailedError">expected true, got false</failure>
                </testcase>
              </testsuite>
            </testsuites>
        "#},
    );
    harness.stage_result("tests/FourTest.php", &passing_suite("FourTest", "tests/FourTest.php", 1));
    harness.stage_result(
        "tests/FiveTest.php",
        indoc! {r#"
            <testsuites>
              <testsuite name="FiveTest" file="tests/FiveTest.php" tests="1" assertions="1"
                         failures="0" errors="1" skipped="0" time="0.1">
                <testcase name="testRisky" class="FiveTest" file="tests/FiveTest.php" line="14"
                          assertions="1" time="0.1">
                  <error type="RiskyTestError">this test did not perform any assertions</error>
                </testcase>
              </testsuite>
            </testsuites>
        "#},
    );

    let junit_log = harness.dir.path().join("out/junit.xml");
    let mut builder = harness.opts_builder();
    builder
        .set_process_count(NonZeroUsize::new(2).expect("2 is nonzero"))
        .set_junit_log(&junit_log);
    let items: Vec<WorkItem> = [
        "tests/OneTest.php",
        "tests/TwoTest.php",
        "tests/ThreeTest.php",
        "tests/FourTest.php",
        "tests/FiveTest.php",
    ]
    .into_iter()
    .map(WorkItem::suite)
    .collect();

    let results = run(builder.build(), items);

    assert_eq!(results.items_run, 5);
    assert_eq!(results.summary.tests, 5);
    assert_eq!(results.summary.assertions, 6);
    assert_eq!(results.summary.failures, 1);
    // The risky test stays counted as an error in the totals.
    assert_eq!(results.summary.errors, 1);
    assert_eq!(results.verdict, RunVerdict::Errored);
    assert_eq!(results.verdict.exit_code(), 2);
    assert_eq!(results.stopped_workers, 2);

    // Every item was dispatched exactly once, across both workers.
    let mut executed = harness.executed_suites();
    executed.sort_unstable();
    assert_eq!(
        executed,
        vec![
            "tests/FiveTest.php",
            "tests/FourTest.php",
            "tests/OneTest.php",
            "tests/ThreeTest.php",
            "tests/TwoTest.php",
        ]
    );

    let doc = std::fs::read_to_string(&junit_log).expect("junit log readable");
    assert!(doc.contains("testNope"));
    assert!(doc.contains("RiskyTestError"));
}

#[test]
fn missing_artifact_degrades_to_zero_contribution() {
    let harness = Harness::new();
    harness.stage_result("tests/GoodTest.php", &passing_suite("GoodTest", "tests/GoodTest.php", 3));
    // tests/GhostTest.php has no template: the engine acknowledges the
    // command but writes nothing.

    let results = run(
        harness.opts_builder().build(),
        vec![
            WorkItem::suite("tests/GoodTest.php"),
            WorkItem::suite("tests/GhostTest.php"),
        ],
    );

    assert_eq!(results.summary.tests, 1);
    assert_eq!(results.summary.assertions, 3);
    assert_eq!(results.verdict, RunVerdict::Passed);
    assert_eq!(results.verdict.exit_code(), 0);
    assert_eq!(harness.executed_suites().len(), 2);
}

#[test]
fn empty_work_list_passes_and_stops_all_workers() {
    let harness = Harness::new();
    let mut builder = harness.opts_builder();
    builder.set_process_count(NonZeroUsize::new(3).expect("3 is nonzero"));

    let results = run(builder.build(), Vec::new());

    assert_eq!(results.items_run, 0);
    assert_eq!(results.summary.tests, 0);
    assert_eq!(results.verdict, RunVerdict::Passed);
    assert_eq!(results.stopped_workers, 3);
    assert!(harness.executed_suites().is_empty());
}

#[test]
fn coverage_snapshots_are_merged_and_rendered() {
    let harness = Harness::new();
    harness.stage_result("tests/ATest.php", &passing_suite("ATest", "tests/ATest.php", 1));
    harness.stage_result("tests/BTest.php", &passing_suite("BTest", "tests/BTest.php", 1));
    harness.stage_coverage(
        "tests/ATest.php",
        r#"{"files":{"src/lib.php":{"3":["ATest::testOk"],"4":["ATest::testOk"]}}}"#,
    );
    harness.stage_coverage(
        "tests/BTest.php",
        r#"{"files":{"src/lib.php":{"3":["BTest::testOk"]}}}"#,
    );

    let raw = harness.dir.path().join("out/coverage.json");
    let text = harness.dir.path().join("out/coverage.txt");
    let mut builder = harness.opts_builder();
    builder
        .set_process_count(NonZeroUsize::new(2).expect("2 is nonzero"))
        .set_coverage(CoverageOpts {
            raw: Some(raw.clone()),
            text: Some(text.clone()),
            ..CoverageOpts::default()
        });

    let results = run(
        builder.build(),
        vec![
            WorkItem::suite("tests/ATest.php"),
            WorkItem::suite("tests/BTest.php"),
        ],
    );
    assert_eq!(results.verdict, RunVerdict::Passed);

    let snapshot: CoverageSnapshot = serde_json::from_str(
        &std::fs::read_to_string(&raw).expect("raw coverage readable"),
    )
    .expect("raw coverage parses");
    let lines = &snapshot.files[Utf8Path::new("src/lib.php")];
    let mut on_line_3 = lines[&3].clone();
    on_line_3.sort_unstable();
    assert_eq!(on_line_3, vec!["ATest::testOk", "BTest::testOk"]);
    assert_eq!(lines[&4], vec!["ATest::testOk"]);

    let summary = std::fs::read_to_string(&text).expect("text coverage readable");
    assert!(summary.contains("src/lib.php"));
}

#[test]
fn quoted_arguments_reach_the_engine_unscathed() {
    let harness = Harness::new();
    // The space forces shell quoting of both the suite argument and the
    // `--log-junit=` target derived from it.
    harness.stage_result(
        "tests/Spaced Test.php",
        &passing_suite("SpacedTest", "tests/Spaced Test.php", 2),
    );

    let results = run(
        harness.opts_builder().build(),
        vec![WorkItem::suite("tests/Spaced Test.php")],
    );

    assert_eq!(results.summary.tests, 1);
    assert_eq!(results.summary.assertions, 2);
    assert_eq!(results.verdict, RunVerdict::Passed);
    assert_eq!(harness.executed_suites(), vec!["tests/Spaced Test.php"]);
}

#[test]
fn fine_grained_items_pass_their_filters_through() {
    let harness = Harness::new();
    harness.stage_result("tests/FineTest.php", &passing_suite("FineTest", "tests/FineTest.php", 1));

    // Both methods execute against the same suite file; the run log shows
    // one dispatch per item.
    let results = run(
        harness.opts_builder().build(),
        vec![
            WorkItem::method("tests/FineTest.php", "testAlpha"),
            WorkItem::method("tests/FineTest.php", "testBeta"),
        ],
    );

    assert_eq!(results.items_run, 2);
    assert_eq!(results.summary.tests, 2);
    assert_eq!(
        harness.executed_suites(),
        vec!["tests/FineTest.php", "tests/FineTest.php"]
    );
}
