// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The hierarchical suite/case/defect model parsed from worker result
//! artifacts, plus the reducer that merges many artifacts into global totals.

mod interpreter;
mod junit_writer;
mod reader;

pub use interpreter::LogInterpreter;
pub use junit_writer::write_junit_log;
pub use reader::ArtifactReader;

use camino::Utf8PathBuf;

/// One suite node of a parsed result artifact.
///
/// Counter fields mirror the artifact's suite-level attributes. They are
/// trusted for run totals (the engine accumulated them) but recomputed from
/// member cases when flattening by file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestSuite {
    /// The suite name.
    pub name: String,
    /// The source file the suite was loaded from. May be empty for
    /// synthetic grouping nodes (data-provider expansion).
    pub file: Utf8PathBuf,
    /// Number of tests.
    pub tests: usize,
    /// Number of assertions.
    pub assertions: usize,
    /// Number of failures.
    pub failures: usize,
    /// Number of errors. Engines count risky tests in here as well.
    pub errors: usize,
    /// Number of skipped tests.
    pub skipped: usize,
    /// Elapsed time in seconds.
    pub time: f64,
    /// Nested child suites, in document order.
    pub suites: Vec<TestSuite>,
    /// Cases directly owned by this suite, in document order.
    pub cases: Vec<TestCase>,
}

impl TestSuite {
    /// Creates an empty, zero-count suite.
    ///
    /// A crashed or content-free invocation parses to this state on
    /// purpose: downstream aggregation depends on the suite being present
    /// with zero-valued fields rather than being treated as an error.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One test case of a parsed result artifact.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TestCase {
    /// The case name.
    pub name: String,
    /// The owning class. May be empty on cases inherited from a grouping
    /// node; see [`LogInterpreter::cases`] for the backfill pass.
    pub class: String,
    /// The source file. May be empty, same as `class`.
    pub file: Utf8PathBuf,
    /// The source line.
    pub line: u64,
    /// Number of assertions executed by this case.
    pub assertions: usize,
    /// Elapsed time in seconds.
    pub time: f64,
    /// Failure defects.
    pub failures: Vec<Defect>,
    /// Error defects, after risky reclassification.
    pub errors: Vec<Defect>,
    /// Warning defects.
    pub warnings: Vec<Defect>,
    /// Skipped defects.
    pub skipped: Vec<Defect>,
    /// Risky defects: error defects whose type matched a risky marker,
    /// moved out of `errors` exactly once at parse time.
    pub risky: Vec<Defect>,
}

/// A single defect recorded against a test case.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Defect {
    /// The defect's declared type.
    pub defect_type: String,
    /// Free-form defect text, with any captured system output appended.
    pub text: String,
}

/// The set of defect type names denoting risky (non-deterministic/unsafe)
/// test behavior.
///
/// The original artifact producer decides risk via its own type hierarchy;
/// over a wire document only the type name is visible, so membership is a
/// name match against the full type or its final path segment.
#[derive(Clone, Debug)]
pub struct RiskyMarkers {
    markers: Vec<String>,
}

impl RiskyMarkers {
    /// Creates a marker set from the given type names.
    pub fn new(markers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            markers: markers.into_iter().map(|m| m.into()).collect(),
        }
    }

    /// Returns true if the given defect type denotes a risky test.
    pub fn matches(&self, defect_type: &str) -> bool {
        let last_segment = defect_type
            .rsplit(['\\', '.'])
            .next()
            .and_then(|seg| seg.rsplit("::").next())
            .unwrap_or(defect_type);
        self.markers
            .iter()
            .any(|m| m == defect_type || m == last_segment)
    }
}

impl Default for RiskyMarkers {
    fn default() -> Self {
        Self::new(["RiskyTestError"])
    }
}
