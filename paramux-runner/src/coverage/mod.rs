// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The merged coverage model.
//!
//! Workers emit one coverage snapshot per invocation: a serialized map from
//! source file to line to the identifiers of the tests that covered it. The
//! merger unions snapshots as they are collected; completion order never
//! matters because set union is commutative. An optional per-line cap bounds
//! memory on very large runs by evicting the oldest-inserted identifiers
//! first — a deliberate, documented lossy approximation, disabled by
//! default.

mod reporter;

pub use reporter::CoverageReporter;

use crate::errors::ProtocolError;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs};
use tracing::warn;

/// The wire form of one per-invocation coverage snapshot.
///
/// Also produced by [`CoverageReporter::raw`], so a merged model can be
/// re-serialized and fed back into a later merge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    /// File path → line number → covering test identifiers, in coverage
    /// order.
    pub files: IndexMap<Utf8PathBuf, BTreeMap<u64, Vec<String>>>,
}

/// The running union of all collected snapshots.
#[derive(Debug, Default)]
pub struct CoverageMerger {
    files: IndexMap<Utf8PathBuf, BTreeMap<u64, IndexSet<String>>>,
    test_limit: Option<usize>,
}

impl CoverageMerger {
    /// Creates a merger. `test_limit` caps the number of distinct test
    /// identifiers retained per line; `None` keeps the merge an exact
    /// union.
    pub fn new(test_limit: Option<usize>) -> Self {
        Self {
            files: IndexMap::new(),
            test_limit,
        }
    }

    /// Reads the snapshot artifact at `path` and unions it into the model.
    ///
    /// Unreadable or malformed snapshots are recorded and skipped; coverage
    /// merge problems are never fatal to the run.
    pub fn add_snapshot(&mut self, path: &Utf8Path) {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(error) => {
                let error = ProtocolError::SnapshotIo {
                    path: path.to_owned(),
                    error,
                };
                warn!(%error, "skipping coverage snapshot");
                return;
            }
        };
        match serde_json::from_str::<CoverageSnapshot>(&data) {
            Ok(snapshot) => self.merge_snapshot(snapshot),
            Err(error) => {
                let error = ProtocolError::MalformedSnapshot {
                    path: path.to_owned(),
                    error,
                };
                warn!(%error, "skipping coverage snapshot");
            }
        }
    }

    /// Unions an already-deserialized snapshot into the model.
    pub fn merge_snapshot(&mut self, snapshot: CoverageSnapshot) {
        for (file, lines) in snapshot.files {
            let merged = self.files.entry(file.clone()).or_default();
            for (line, tests) in lines {
                if line == 0 {
                    // Line numbers are 1-based; a zero here means the
                    // producer disagrees about the shape. Merge proceeds
                    // best-effort without it.
                    warn!(file = %file, "coverage snapshot references line 0, skipping entry");
                    continue;
                }
                let set = merged.entry(line).or_default();
                for test in tests {
                    set.insert(test);
                }
                if let Some(limit) = self.test_limit {
                    while set.len() > limit {
                        set.shift_remove_index(0);
                    }
                }
            }
        }
    }

    /// True if no snapshot contributed any data.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The merged model: file → line → covering tests in insertion order.
    pub fn files(&self) -> &IndexMap<Utf8PathBuf, BTreeMap<u64, IndexSet<String>>> {
        &self.files
    }

    /// Re-serializes the merged model as a snapshot.
    pub fn to_snapshot(&self) -> CoverageSnapshot {
        CoverageSnapshot {
            files: self
                .files
                .iter()
                .map(|(file, lines)| {
                    let lines = lines
                        .iter()
                        .map(|(line, tests)| {
                            (*line, tests.iter().cloned().collect::<Vec<_>>())
                        })
                        .collect();
                    (file.clone(), lines)
                })
                .collect(),
        }
    }

    /// Returns the report façade over the merged model.
    pub fn reporter(&self) -> CoverageReporter<'_> {
        CoverageReporter::new(self)
    }
}
