// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reduction of many parsed artifacts into global totals and a
//! flattened-by-file suite collection.

use crate::results::{ArtifactReader, TestCase, TestSuite};
use camino::Utf8PathBuf;
use indexmap::IndexMap;

/// Aggregates a collection of [`ArtifactReader`]s into run-level results.
///
/// Readers arrive in whatever order workers finish; every reduction in here
/// is a commutative sum, so completion order never changes the outcome.
#[derive(Debug, Default)]
pub struct LogInterpreter {
    readers: Vec<ArtifactReader>,
}

impl LogInterpreter {
    /// Creates an empty interpreter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reader to the final results.
    pub fn add_reader(&mut self, reader: ArtifactReader) -> &mut Self {
        self.readers.push(reader);
        self
    }

    /// All readers collected so far.
    pub fn readers(&self) -> &[ArtifactReader] {
        &self.readers
    }

    /// True if the run produced no failures and no errors. Skipped and
    /// risky-only outcomes do not affect success.
    pub fn is_successful(&self) -> bool {
        self.total_failures() == 0 && self.total_errors() == 0
    }

    /// Total tests across all readers' root-level counters.
    pub fn total_tests(&self) -> usize {
        self.readers.iter().map(|r| r.total_tests()).sum()
    }

    /// Total assertions.
    pub fn total_assertions(&self) -> usize {
        self.readers.iter().map(|r| r.total_assertions()).sum()
    }

    /// Total failures.
    pub fn total_failures(&self) -> usize {
        self.readers.iter().map(|r| r.total_failures()).sum()
    }

    /// Total errors.
    pub fn total_errors(&self) -> usize {
        self.readers.iter().map(|r| r.total_errors()).sum()
    }

    /// Total skipped tests.
    pub fn total_skipped(&self) -> usize {
        self.readers.iter().map(|r| r.total_skipped()).sum()
    }

    /// Total elapsed time in seconds.
    pub fn total_time(&self) -> f64 {
        self.readers.iter().map(|r| r.total_time()).sum()
    }

    /// Collects every case transitively, backfilling empty class/file
    /// fields from the nearest ancestor suite that carries a source file.
    ///
    /// Grouping nodes produced by data-driven case expansion leave their
    /// cases without class/file metadata; this is a one-time best-effort
    /// repair, not a guarantee that upstream metadata is consistent.
    pub fn cases(&self) -> Vec<TestCase> {
        let mut cases = Vec::new();
        for reader in &self.readers {
            for suite in reader.suites() {
                collect_cases(suite, None, &mut cases);
            }
        }
        cases
    }

    /// Re-buckets all cases into one synthetic suite per distinct source
    /// file, recomputing every counter as a sum over the bucket's cases.
    ///
    /// This is the shape consumed by the JUnit log writer. Risky defects
    /// stay out of the recomputed error counter: they were reclassified at
    /// parse time and are reported in their own bucket.
    pub fn flatten_by_file(&self) -> Vec<TestSuite> {
        let mut buckets: IndexMap<Utf8PathBuf, TestSuite> = IndexMap::new();
        for case in self.cases() {
            let bucket = buckets.entry(case.file.clone()).or_insert_with(|| {
                let mut suite = TestSuite::empty(case.class.clone());
                suite.file = case.file.clone();
                suite
            });
            bucket.tests += 1;
            bucket.assertions += case.assertions;
            bucket.failures += case.failures.len();
            bucket.errors += case.errors.len();
            bucket.skipped += case.skipped.len();
            bucket.time += case.time;
            bucket.cases.push(case);
        }
        buckets.into_values().collect()
    }
}

fn collect_cases(suite: &TestSuite, ancestor: Option<&TestSuite>, out: &mut Vec<TestCase>) {
    // A suite with a file is a real source-level suite; grouping nodes
    // without one inherit the nearest such ancestor for backfill.
    let nearest = if suite.file.as_str().is_empty() {
        ancestor
    } else {
        Some(suite)
    };

    for case in &suite.cases {
        let mut case = case.clone();
        if let Some(nearest) = nearest {
            if case.class.is_empty() {
                case.class = nearest.name.clone();
            }
            if case.file.as_str().is_empty() {
                case.file = nearest.file.clone();
            }
        }
        out.push(case);
    }

    for child in &suite.suites {
        collect_cases(child, nearest, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{Defect, RiskyMarkers, reader::parse_document};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn reader_from(doc: &str) -> ArtifactReader {
        let dir = camino_tempfile::tempdir().expect("tempdir created");
        let path = dir.path().join("artifact.xml");
        std::fs::write(&path, doc).expect("write fixture");
        ArtifactReader::from_artifact(&path, &RiskyMarkers::default())
    }

    static PASSING: &str = indoc! {r#"
        <testsuites>
          <testsuite name="PassingTest" file="/tests/PassingTest.php"
                     tests="2" assertions="3" failures="0" errors="0" time="0.2">
            <testcase name="testOne" class="PassingTest" file="/tests/PassingTest.php"
                      line="5" assertions="2" time="0.1"/>
            <testcase name="testTwo" class="PassingTest" file="/tests/PassingTest.php"
                      line="9" assertions="1" time="0.1"/>
          </testsuite>
        </testsuites>
    "#};

    static FAILING: &str = indoc! {r#"
        <testsuites>
          <testsuite name="FailingTest" file="/tests/FailingTest.php"
                     tests="1" assertions="1" failures="1" errors="0" time="0.1">
            <testcase name="testNope" class="FailingTest" file="/tests/FailingTest.php"
                      line="5" assertions="1" time="0.1">
              <failure type="AssertionFailedError">nope</failure>
            </testcase>
          </testsuite>
        </testsuites>
    "#};

    static ERRORING: &str = indoc! {r#"
        <testsuites>
          <testsuite name="ErroringTest" file="/tests/ErroringTest.php"
                     tests="1" assertions="0" failures="0" errors="1" time="0.1">
            <testcase name="testBoom" class="ErroringTest" file="/tests/ErroringTest.php"
                      line="5" assertions="0" time="0.1">
              <error type="RuntimeException">boom</error>
            </testcase>
          </testsuite>
        </testsuites>
    "#};

    #[test]
    fn totals_are_sums_over_readers() {
        let mut interpreter = LogInterpreter::new();
        interpreter.add_reader(reader_from(PASSING));
        interpreter.add_reader(reader_from(FAILING));
        interpreter.add_reader(reader_from(ERRORING));

        assert_eq!(interpreter.total_tests(), 4);
        assert_eq!(interpreter.total_assertions(), 4);
        assert_eq!(interpreter.total_failures(), 1);
        assert_eq!(interpreter.total_errors(), 1);
        assert!(!interpreter.is_successful());
    }

    #[test]
    fn merge_is_commutative() {
        let docs = [PASSING, FAILING, ERRORING];
        let mut orderings = vec![
            vec![0usize, 1, 2],
            vec![2, 1, 0],
            vec![1, 2, 0],
            vec![2, 0, 1],
        ];
        let mut totals = Vec::new();
        for ordering in orderings.drain(..) {
            let mut interpreter = LogInterpreter::new();
            for idx in ordering {
                interpreter.add_reader(reader_from(docs[idx]));
            }
            totals.push((
                interpreter.total_tests(),
                interpreter.total_failures(),
                interpreter.total_errors(),
                interpreter.total_skipped(),
            ));
        }
        assert!(totals.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn success_truth_table() {
        let mut passing = LogInterpreter::new();
        passing.add_reader(reader_from(PASSING));
        assert!(passing.is_successful());

        let mut failing = LogInterpreter::new();
        failing.add_reader(reader_from(PASSING));
        failing.add_reader(reader_from(FAILING));
        assert!(!failing.is_successful());

        let mut erroring = LogInterpreter::new();
        erroring.add_reader(reader_from(PASSING));
        erroring.add_reader(reader_from(ERRORING));
        assert!(!erroring.is_successful());
    }

    #[test]
    fn backfills_class_and_file_from_nearest_ancestor() {
        let doc = indoc! {r#"
            <testsuites>
              <testsuite name="DataProviderTest" file="/tests/DataProviderTest.php"
                         tests="2" assertions="2" failures="0" errors="0" time="0.2">
                <testsuite name="DataProviderTest::testNumeric" tests="2" assertions="2"
                           failures="0" errors="0" time="0.2">
                  <testcase name="testNumeric with data set #0" assertions="1" time="0.1"/>
                  <testcase name="testNumeric with data set #1" assertions="1" time="0.1"/>
                </testsuite>
              </testsuite>
            </testsuites>
        "#};
        let mut interpreter = LogInterpreter::new();
        interpreter.add_reader(reader_from(doc));

        let cases = interpreter.cases();
        assert_eq!(cases.len(), 2);
        for case in &cases {
            assert_eq!(case.class, "DataProviderTest");
            assert_eq!(case.file.as_str(), "/tests/DataProviderTest.php");
        }
    }

    #[test]
    fn flatten_by_file_recomputes_counters() {
        // 3 cases in one file across nested suites: 1 failure, 1 error.
        let doc = indoc! {r#"
            <testsuites>
              <testsuite name="MixedTest" file="/tests/MixedTest.php"
                         tests="3" assertions="5" failures="1" errors="1" time="0.3">
                <testcase name="testOk" class="MixedTest" file="/tests/MixedTest.php"
                          line="5" assertions="2" time="0.1"/>
                <testsuite name="MixedTest::testMore" tests="2" assertions="3"
                           failures="1" errors="1" time="0.2">
                  <testcase name="testMore with data set #0" assertions="2" time="0.1">
                    <failure type="AssertionFailedError">bad</failure>
                  </testcase>
                  <testcase name="testMore with data set #1" assertions="1" time="0.1">
                    <error type="RuntimeException">boom</error>
                  </testcase>
                </testsuite>
              </testsuite>
            </testsuites>
        "#};
        let mut interpreter = LogInterpreter::new();
        interpreter.add_reader(reader_from(doc));

        let flattened = interpreter.flatten_by_file();
        assert_eq!(flattened.len(), 1);
        let bucket = &flattened[0];
        assert_eq!(bucket.file.as_str(), "/tests/MixedTest.php");
        assert_eq!(bucket.tests, 3);
        assert_eq!(bucket.assertions, 5);
        assert_eq!(bucket.failures, 1);
        assert_eq!(bucket.errors, 1);
        assert_eq!(bucket.cases.len(), 3);
    }

    #[test]
    fn flatten_excludes_risky_from_recomputed_errors() {
        let mut interpreter = LogInterpreter::new();
        let doc = indoc! {r#"
            <testsuites>
              <testsuite name="RiskyTest" file="/tests/RiskyTest.php"
                         tests="1" assertions="0" failures="0" errors="1" time="0.1">
                <testcase name="testUseless" class="RiskyTest" file="/tests/RiskyTest.php"
                          line="5" assertions="0" time="0.1">
                  <error type="RiskyTestError">no assertions</error>
                </testcase>
              </testsuite>
            </testsuites>
        "#};
        interpreter.add_reader(reader_from(doc));

        // The suite-level counter keeps counting the risky test as an
        // error, so the run still fails...
        assert_eq!(interpreter.total_errors(), 1);
        assert!(!interpreter.is_successful());

        // ...but the flattened report moves it out of the error bucket.
        let flattened = interpreter.flatten_by_file();
        assert_eq!(flattened[0].errors, 0);
        assert_eq!(flattened[0].cases[0].risky.len(), 1);
        assert_eq!(
            flattened[0].cases[0].risky[0],
            Defect {
                defect_type: "RiskyTestError".to_owned(),
                text: "no assertions".to_owned(),
            }
        );
    }

    #[test]
    fn empty_reader_contributes_zero() {
        let mut interpreter = LogInterpreter::new();
        interpreter.add_reader(reader_from(PASSING));
        interpreter.add_reader(reader_from(""));
        assert_eq!(interpreter.total_tests(), 2);
        assert!(interpreter.is_successful());
    }

    #[test]
    fn parse_document_direct() {
        // parse_document is also exercised directly to keep the reader's
        // degrade path separate from parsing proper.
        let suites = parse_document(PASSING, &RiskyMarkers::default()).expect("valid document");
        assert_eq!(suites[0].cases.len(), 2);
    }
}
