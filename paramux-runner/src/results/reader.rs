// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing of per-invocation result artifacts.

use crate::{
    errors::ProtocolError,
    results::{Defect, RiskyMarkers, TestCase, TestSuite},
};
use camino::{Utf8Path, Utf8PathBuf};
use quick_xml::{Reader, events::{BytesStart, Event}};
use std::fs;
use tracing::warn;

/// A parsed result artifact: the root suites of one worker invocation.
///
/// A crashed or content-free invocation yields a reader with no suites — a
/// valid empty state contributing zero to every total, never an error.
#[derive(Clone, Debug)]
pub struct ArtifactReader {
    source: Utf8PathBuf,
    suites: Vec<TestSuite>,
}

impl ArtifactReader {
    /// Reads and parses the artifact at `path`.
    ///
    /// Unreadable or malformed artifacts degrade to an empty reader after
    /// recording the protocol error; the run must continue with whatever
    /// the other workers produced.
    pub fn from_artifact(path: &Utf8Path, risky: &RiskyMarkers) -> Self {
        let doc = match fs::read_to_string(path) {
            Ok(doc) => doc,
            Err(error) => {
                warn!(artifact = %path, %error, "result artifact unreadable, treating as empty");
                return Self::empty(path);
            }
        };
        if doc.trim().is_empty() {
            return Self::empty(path);
        }
        match parse_document(&doc, risky) {
            Ok(suites) => Self {
                source: path.to_owned(),
                suites,
            },
            Err(error) => {
                let error = ProtocolError::MalformedArtifact {
                    path: path.to_owned(),
                    error,
                };
                warn!(%error, "treating artifact as empty");
                Self::empty(path)
            }
        }
    }

    fn empty(path: &Utf8Path) -> Self {
        Self {
            source: path.to_owned(),
            suites: Vec::new(),
        }
    }

    /// The artifact path this reader was parsed from.
    pub fn source(&self) -> &Utf8Path {
        &self.source
    }

    /// The root suites of the artifact.
    pub fn suites(&self) -> &[TestSuite] {
        &self.suites
    }

    /// Returns true if the artifact held no suites at all.
    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    /// Total tests, from the root suites' accumulated counters.
    pub fn total_tests(&self) -> usize {
        self.suites.iter().map(|s| s.tests).sum()
    }

    /// Total assertions.
    pub fn total_assertions(&self) -> usize {
        self.suites.iter().map(|s| s.assertions).sum()
    }

    /// Total failures.
    pub fn total_failures(&self) -> usize {
        self.suites.iter().map(|s| s.failures).sum()
    }

    /// Total errors. Risky tests remain counted in here: the engine
    /// accumulated them into the suite-level counter before paramux ever
    /// saw the document, and reclassification must not change run verdicts.
    pub fn total_errors(&self) -> usize {
        self.suites.iter().map(|s| s.errors).sum()
    }

    /// Total skipped tests.
    pub fn total_skipped(&self) -> usize {
        self.suites.iter().map(|s| s.skipped).sum()
    }

    /// Total elapsed time in seconds.
    pub fn total_time(&self) -> f64 {
        self.suites.iter().map(|s| s.time).sum()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DefectKind {
    Failure,
    Error,
    Warning,
    Skipped,
}

impl DefectKind {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"failure" => Some(Self::Failure),
            b"error" => Some(Self::Error),
            b"warning" => Some(Self::Warning),
            b"skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Parses a JUnit-style result document into its root suites.
///
/// The `<testsuites>` wrapper element, if present, is transparent: its
/// direct `<testsuite>` children become the root suites.
pub fn parse_document(
    doc: &str,
    risky: &RiskyMarkers,
) -> Result<Vec<TestSuite>, quick_xml::Error> {
    let mut reader = Reader::from_str(doc);
    let mut roots: Vec<TestSuite> = Vec::new();
    let mut stack: Vec<TestSuite> = Vec::new();
    let mut case: Option<TestCase> = None;
    let mut defect: Option<(DefectKind, Defect)> = None;
    let mut in_system_out = false;
    let mut system_out = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"testsuite" => stack.push(suite_from_attrs(&e)?),
                b"testcase" => case = Some(case_from_attrs(&e)?),
                b"system-out" if case.is_some() => in_system_out = true,
                tag => {
                    if case.is_some()
                        && let Some(kind) = DefectKind::from_tag(tag)
                    {
                        defect = Some((kind, defect_from_attrs(&e)?));
                    }
                }
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"testsuite" => attach_suite(suite_from_attrs(&e)?, &mut stack, &mut roots),
                b"testcase" => {
                    let finished = finish_case(case_from_attrs(&e)?, "", risky);
                    attach_case(finished, &mut stack, &mut roots);
                }
                tag => {
                    if let Some(current) = case.as_mut()
                        && let Some(kind) = DefectKind::from_tag(tag)
                    {
                        push_defect(current, kind, defect_from_attrs(&e)?);
                    }
                }
            },
            Event::End(e) => match e.name().as_ref() {
                b"testsuite" => {
                    if let Some(done) = stack.pop() {
                        attach_suite(done, &mut stack, &mut roots);
                    }
                }
                b"testcase" => {
                    if let Some(done) = case.take() {
                        let finished = finish_case(done, &system_out, risky);
                        attach_case(finished, &mut stack, &mut roots);
                    }
                    system_out.clear();
                }
                b"system-out" => in_system_out = false,
                tag => {
                    if DefectKind::from_tag(tag).is_some()
                        && let (Some(current), Some((kind, d))) = (case.as_mut(), defect.take())
                    {
                        push_defect(current, kind, d);
                    }
                }
            },
            Event::Text(t) => {
                let text = t.unescape().map_err(Into::<quick_xml::Error>::into)?;
                if let Some((_, d)) = defect.as_mut() {
                    d.text.push_str(&text);
                } else if in_system_out {
                    system_out.push_str(&text);
                }
            }
            Event::CData(t) => {
                let text = String::from_utf8_lossy(&t);
                if let Some((_, d)) = defect.as_mut() {
                    d.text.push_str(&text);
                } else if in_system_out {
                    system_out.push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(roots)
}

fn attach_suite(suite: TestSuite, stack: &mut [TestSuite], roots: &mut Vec<TestSuite>) {
    match stack.last_mut() {
        Some(parent) => parent.suites.push(suite),
        None => roots.push(suite),
    }
}

fn attach_case(case: TestCase, stack: &mut Vec<TestSuite>, roots: &mut Vec<TestSuite>) {
    match stack.last_mut() {
        Some(parent) => parent.cases.push(case),
        None => {
            // A bare testcase outside any suite is out-of-spec output; give
            // it a synthetic root so it still participates in aggregation.
            let mut root = TestSuite::empty("");
            root.cases.push(case);
            roots.push(root);
        }
    }
}

fn push_defect(case: &mut TestCase, kind: DefectKind, defect: Defect) {
    match kind {
        DefectKind::Failure => case.failures.push(defect),
        DefectKind::Error => case.errors.push(defect),
        DefectKind::Warning => case.warnings.push(defect),
        DefectKind::Skipped => case.skipped.push(defect),
    }
}

/// Appends captured system output to every defect, then moves risky-typed
/// error defects into the risky bucket. Both transformations run exactly
/// once per case, here.
fn finish_case(mut case: TestCase, system_out: &str, risky: &RiskyMarkers) -> TestCase {
    for defect in case
        .failures
        .iter_mut()
        .chain(case.errors.iter_mut())
        .chain(case.warnings.iter_mut())
        .chain(case.skipped.iter_mut())
    {
        let mut text = std::mem::take(&mut defect.text);
        text.push_str(system_out);
        defect.text = text.trim().to_owned();
    }

    let (risky_defects, errors): (Vec<_>, Vec<_>) = std::mem::take(&mut case.errors)
        .into_iter()
        .partition(|d| risky.matches(&d.defect_type));
    case.errors = errors;
    case.risky = risky_defects;
    case
}

fn suite_from_attrs(e: &BytesStart<'_>) -> Result<TestSuite, quick_xml::Error> {
    let mut suite = TestSuite::default();
    for attr in e.attributes() {
        let attr = attr.map_err(Into::<quick_xml::Error>::into)?;
        let value = attr
            .unescape_value()
            .map_err(Into::<quick_xml::Error>::into)?;
        match attr.key.as_ref() {
            b"name" => suite.name = value.into_owned(),
            b"file" => suite.file = value.into_owned().into(),
            b"tests" => suite.tests = value.parse().unwrap_or_default(),
            b"assertions" => suite.assertions = value.parse().unwrap_or_default(),
            b"failures" => suite.failures = value.parse().unwrap_or_default(),
            b"errors" => suite.errors = value.parse().unwrap_or_default(),
            b"skipped" => suite.skipped = value.parse().unwrap_or_default(),
            b"time" => suite.time = value.parse().unwrap_or_default(),
            _ => {}
        }
    }
    Ok(suite)
}

fn case_from_attrs(e: &BytesStart<'_>) -> Result<TestCase, quick_xml::Error> {
    let mut case = TestCase::default();
    for attr in e.attributes() {
        let attr = attr.map_err(Into::<quick_xml::Error>::into)?;
        let value = attr
            .unescape_value()
            .map_err(Into::<quick_xml::Error>::into)?;
        match attr.key.as_ref() {
            b"name" => case.name = value.into_owned(),
            b"class" => case.class = value.into_owned(),
            b"file" => case.file = value.into_owned().into(),
            b"line" => case.line = value.parse().unwrap_or_default(),
            b"assertions" => case.assertions = value.parse().unwrap_or_default(),
            b"time" => case.time = value.parse().unwrap_or_default(),
            _ => {}
        }
    }
    Ok(case)
}

fn defect_from_attrs(e: &BytesStart<'_>) -> Result<Defect, quick_xml::Error> {
    let mut defect = Defect::default();
    for attr in e.attributes() {
        let attr = attr.map_err(Into::<quick_xml::Error>::into)?;
        if attr.key.as_ref() == b"type" {
            defect.defect_type = attr
                .unescape_value()
                .map_err(Into::<quick_xml::Error>::into)?
                .into_owned();
        }
    }
    Ok(defect)
}
