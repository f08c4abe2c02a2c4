// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Report emitters over the merged coverage model.

use crate::{coverage::CoverageMerger, errors::ReportWriteError};
use camino::Utf8Path;
use chrono::Utc;
use itertools::Itertools;
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use std::{fs, io::Write as _};
use swrite::{SWrite, swrite};

/// A façade exposing one render method per output format.
///
/// Every method is a pure function of the merged model to an artifact at the
/// given target path; rendering never mutates the model, and any number of
/// formats may be rendered from one model in one run.
#[derive(Clone, Copy, Debug)]
pub struct CoverageReporter<'a> {
    merger: &'a CoverageMerger,
}

impl<'a> CoverageReporter<'a> {
    pub(super) fn new(merger: &'a CoverageMerger) -> Self {
        Self { merger }
    }

    /// Renders a line-oriented text summary.
    pub fn text(&self, target: &Utf8Path) -> Result<(), ReportWriteError> {
        let mut out = String::from("Coverage summary\n");
        let mut total_lines = 0usize;
        let mut all_tests = indexmap::IndexSet::new();
        for (file, lines) in self.merger.files() {
            let file_tests: indexmap::IndexSet<&String> =
                lines.values().flat_map(|tests| tests.iter()).collect();
            swrite!(
                out,
                "  {file}: {} covered lines, {} tests\n",
                lines.len(),
                file_tests.len()
            );
            total_lines += lines.len();
            all_tests.extend(file_tests);
        }
        swrite!(
            out,
            "Total: {} files, {} covered lines, {} distinct tests\n",
            self.merger.files().len(),
            total_lines,
            all_tests.len()
        );
        write_bytes(target, out.as_bytes())
    }

    /// Renders a Clover XML report.
    pub fn clover(&self, target: &Utf8Path) -> Result<(), ReportWriteError> {
        let generated = Utc::now().timestamp().to_string();
        let mut buf = Vec::new();
        let mut writer = Writer::new_with_indent(&mut buf, b' ', 2);

        write_xml(target, &mut writer, |writer| {
            let mut coverage = BytesStart::new("coverage");
            coverage.push_attribute(("generated", generated.as_str()));
            writer.write_event(Event::Start(coverage))?;

            let mut project = BytesStart::new("project");
            project.push_attribute(("timestamp", generated.as_str()));
            writer.write_event(Event::Start(project))?;

            let mut total_statements = 0usize;
            for (file, lines) in self.merger.files() {
                let mut file_tag = BytesStart::new("file");
                file_tag.push_attribute(("name", file.as_str()));
                writer.write_event(Event::Start(file_tag))?;
                for (line, tests) in lines {
                    let mut line_tag = BytesStart::new("line");
                    line_tag.push_attribute(("num", line.to_string().as_str()));
                    line_tag.push_attribute(("type", "stmt"));
                    line_tag.push_attribute(("count", tests.len().to_string().as_str()));
                    writer.write_event(Event::Empty(line_tag))?;
                }
                let mut metrics = BytesStart::new("metrics");
                metrics.push_attribute(("statements", lines.len().to_string().as_str()));
                metrics.push_attribute(("coveredstatements", lines.len().to_string().as_str()));
                writer.write_event(Event::Empty(metrics))?;
                writer.write_event(Event::End(BytesEnd::new("file")))?;
                total_statements += lines.len();
            }

            let mut metrics = BytesStart::new("metrics");
            metrics.push_attribute(("files", self.merger.files().len().to_string().as_str()));
            metrics.push_attribute(("statements", total_statements.to_string().as_str()));
            writer.write_event(Event::Empty(metrics))?;

            writer.write_event(Event::End(BytesEnd::new("project")))?;
            writer.write_event(Event::End(BytesEnd::new("coverage")))?;
            Ok(())
        })?;

        write_bytes(target, &buf)
    }

    /// Renders the per-file structured XML variant.
    pub fn xml(&self, target: &Utf8Path) -> Result<(), ReportWriteError> {
        let mut buf = Vec::new();
        let mut writer = Writer::new_with_indent(&mut buf, b' ', 2);

        write_xml(target, &mut writer, |writer| {
            writer.write_event(Event::Start(BytesStart::new("coverage")))?;
            for (file, lines) in self.merger.files() {
                let mut file_tag = BytesStart::new("file");
                file_tag.push_attribute(("path", file.as_str()));
                writer.write_event(Event::Start(file_tag))?;
                for (line, tests) in lines {
                    let mut line_tag = BytesStart::new("line");
                    line_tag.push_attribute(("number", line.to_string().as_str()));
                    line_tag.push_attribute(("tests", tests.iter().join(",").as_str()));
                    writer.write_event(Event::Empty(line_tag))?;
                }
                writer.write_event(Event::End(BytesEnd::new("file")))?;
            }
            writer.write_event(Event::End(BytesEnd::new("coverage")))?;
            Ok(())
        })?;

        write_bytes(target, &buf)
    }

    /// Renders the defect-density (Crap4J-style) XML variant.
    ///
    /// Density per file is the share of covered lines touched by exactly
    /// one test: lines with a single covering test are the ones most likely
    /// to lose coverage when that test changes.
    pub fn crap4j(&self, target: &Utf8Path) -> Result<(), ReportWriteError> {
        let mut buf = Vec::new();
        let mut writer = Writer::new_with_indent(&mut buf, b' ', 2);

        write_xml(target, &mut writer, |writer| {
            writer.write_event(Event::Start(BytesStart::new("crap_result")))?;
            writer.write_event(Event::Start(BytesStart::new("stats")))?;
            for (file, lines) in self.merger.files() {
                let weak = lines.values().filter(|tests| tests.len() == 1).count();
                let density = if lines.is_empty() {
                    0.0
                } else {
                    weak as f64 / lines.len() as f64
                };

                writer.write_event(Event::Start(BytesStart::new("file")))?;
                writer.write_event(Event::Start(BytesStart::new("name")))?;
                writer.write_event(Event::Text(BytesText::new(file.as_str())))?;
                writer.write_event(Event::End(BytesEnd::new("name")))?;
                writer.write_event(Event::Start(BytesStart::new("defectDensity")))?;
                writer.write_event(Event::Text(BytesText::new(&format!("{density:.3}"))))?;
                writer.write_event(Event::End(BytesEnd::new("defectDensity")))?;
                writer.write_event(Event::End(BytesEnd::new("file")))?;
            }
            writer.write_event(Event::End(BytesEnd::new("stats")))?;
            writer.write_event(Event::End(BytesEnd::new("crap_result")))?;
            Ok(())
        })?;

        write_bytes(target, &buf)
    }

    /// Renders an HTML tree of files, lines and covering tests into the
    /// target directory as `index.html`.
    pub fn html(&self, target_dir: &Utf8Path) -> Result<(), ReportWriteError> {
        fs::create_dir_all(target_dir).map_err(|error| ReportWriteError::Io {
            path: target_dir.to_owned(),
            error,
        })?;

        let mut out = String::from(
            "<!DOCTYPE html>\n<html><head><title>Coverage</title></head><body>\n\
             <h1>Coverage</h1>\n<ul>\n",
        );
        for (file, lines) in self.merger.files() {
            swrite!(
                out,
                "<li>{} ({} covered lines)<ul>\n",
                escape_html(file.as_str()),
                lines.len()
            );
            for (line, tests) in lines {
                swrite!(
                    out,
                    "<li>line {line}: {}</li>\n",
                    escape_html(&tests.iter().join(", "))
                );
            }
            out.push_str("</ul></li>\n");
        }
        out.push_str("</ul>\n</body></html>\n");

        write_bytes(&target_dir.join("index.html"), out.as_bytes())
    }

    /// Writes the raw re-serializable snapshot of the merged model.
    ///
    /// The output is accepted back by
    /// [`CoverageMerger::add_snapshot`](crate::coverage::CoverageMerger::add_snapshot).
    pub fn raw(&self, target: &Utf8Path) -> Result<(), ReportWriteError> {
        let json = serde_json::to_vec_pretty(&self.merger.to_snapshot()).map_err(|error| {
            ReportWriteError::Json {
                path: target.to_owned(),
                error,
            }
        })?;
        write_bytes(target, &json)
    }
}

fn escape_html(text: &str) -> String {
    quick_xml::escape::escape(text).into_owned()
}

fn write_xml<W: std::io::Write>(
    target: &Utf8Path,
    writer: &mut Writer<W>,
    body: impl FnOnce(&mut Writer<W>) -> Result<(), quick_xml::Error>,
) -> Result<(), ReportWriteError> {
    let render = |writer: &mut Writer<W>| -> Result<(), quick_xml::Error> {
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        body(writer)
    };
    render(writer).map_err(|error| ReportWriteError::Xml {
        path: target.to_owned(),
        error,
    })
}

fn write_bytes(target: &Utf8Path, bytes: &[u8]) -> Result<(), ReportWriteError> {
    if let Some(dir) = target.parent() {
        fs::create_dir_all(dir).map_err(|error| ReportWriteError::Io {
            path: dir.to_owned(),
            error,
        })?;
    }
    let mut file = fs::File::create(target).map_err(|error| ReportWriteError::Io {
        path: target.to_owned(),
        error,
    })?;
    file.write_all(bytes).map_err(|error| ReportWriteError::Io {
        path: target.to_owned(),
        error,
    })?;
    Ok(())
}
