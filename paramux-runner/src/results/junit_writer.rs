// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Writes the merged JUnit log from the flattened suite collection.

use crate::{errors::ReportWriteError, results::LogInterpreter};
use camino::Utf8Path;
use chrono::Local;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use std::{fs::File, time::Duration};

/// Renders the interpreter's flattened-by-file suites as one JUnit document
/// at `path`.
pub fn write_junit_log(
    interpreter: &LogInterpreter,
    path: &Utf8Path,
    report_name: &str,
) -> Result<(), ReportWriteError> {
    let mut report = Report::new(report_name);
    report
        .set_timestamp(Local::now())
        .set_time(Duration::from_secs_f64(interpreter.total_time()));

    for suite in interpreter.flatten_by_file() {
        let mut test_suite = TestSuite::new(suite.name.clone());
        test_suite.set_timestamp(Local::now());
        if !suite.file.as_str().is_empty() {
            test_suite.add_property(("file", suite.file.as_str()));
        }

        for case in &suite.cases {
            let status = case_status(case);
            let mut test_case = TestCase::new(case.name.clone(), status);
            test_case
                .set_classname(case.class.clone())
                .set_assertions(case.assertions)
                .set_time(Duration::from_secs_f64(case.time));
            test_suite.add_test_case(test_case);
        }
        report.add_test_suite(test_suite);
    }

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|error| ReportWriteError::Io {
            path: dir.to_owned(),
            error,
        })?;
    }
    let file = File::create(path).map_err(|error| ReportWriteError::Io {
        path: path.to_owned(),
        error,
    })?;
    report.serialize(file).map_err(|error| ReportWriteError::Junit {
        path: path.to_owned(),
        error,
    })?;
    Ok(())
}

fn case_status(case: &crate::results::TestCase) -> TestCaseStatus {
    // Highest severity wins. Risky defects stay error-class but are tagged
    // with their own type so consumers can tell them apart.
    let (kind, defect) = if let Some(defect) = case.errors.first() {
        (NonSuccessKind::Error, defect)
    } else if let Some(defect) = case.failures.first() {
        (NonSuccessKind::Failure, defect)
    } else if let Some(defect) = case.risky.first() {
        (NonSuccessKind::Error, defect)
    } else if let Some(defect) = case.skipped.first() {
        let mut status = TestCaseStatus::skipped();
        if !defect.defect_type.is_empty() {
            status.set_type(defect.defect_type.clone());
        }
        if !defect.text.is_empty() {
            status.set_message(defect.text.clone());
        }
        return status;
    } else {
        return TestCaseStatus::success();
    };

    let mut status = TestCaseStatus::non_success(kind);
    status
        .set_type(defect.defect_type.clone())
        .set_description(defect.text.clone());
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{ArtifactReader, RiskyMarkers};
    use indoc::indoc;

    #[test]
    fn writes_a_junit_document() {
        let dir = camino_tempfile::tempdir().expect("tempdir created");
        let artifact = dir.path().join("artifact.xml");
        std::fs::write(
            &artifact,
            indoc! {r#"
                <testsuites>
                  <testsuite name="WriterTest" file="/tests/WriterTest.php"
                             tests="2" assertions="2" failures="1" errors="0" time="0.2">
                    <testcase name="testOk" class="WriterTest" file="/tests/WriterTest.php"
                              line="5" assertions="1" time="0.1"/>
                    <testcase name="testNope" class="WriterTest" file="/tests/WriterTest.php"
                              line="9" assertions="1" time="0.1">
                      <failure type="AssertionFailedError">nope</failure>
                    </testcase>
                  </testsuite>
                </testsuites>
            "#},
        )
        .expect("write fixture");

        let mut interpreter = LogInterpreter::new();
        interpreter.add_reader(ArtifactReader::from_artifact(
            &artifact,
            &RiskyMarkers::default(),
        ));

        let out = dir.path().join("logs/junit.xml");
        write_junit_log(&interpreter, &out, "paramux").expect("junit log written");

        let doc = std::fs::read_to_string(&out).expect("junit log readable");
        assert!(doc.contains("<testsuites name=\"paramux\""));
        assert!(doc.contains("testNope"));
        assert!(doc.contains("AssertionFailedError"));
    }
}
