// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Work items: the schedulable units handed to workers.
//!
//! Discovery of test sources is an external collaborator. This module only
//! defines the opaque item shape the scheduler queues, plus a loader for the
//! JSON work-list format the CLI accepts at that boundary.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, io};

/// One schedulable unit of test execution.
///
/// Either a whole suite file, or — in fine-grained mode — a single named
/// test method/chain within one. Immutable once created; the scheduler owns
/// it while pending, the assigned worker while executing.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    suite_path: Utf8PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
}

impl WorkItem {
    /// Creates a work item covering a whole suite file.
    pub fn suite(suite_path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            suite_path: suite_path.into(),
            filter: None,
        }
    }

    /// Creates a fine-grained work item for a single method/chain.
    pub fn method(suite_path: impl Into<Utf8PathBuf>, filter: impl Into<String>) -> Self {
        Self {
            suite_path: suite_path.into(),
            filter: Some(filter.into()),
        }
    }

    /// The suite source file this item executes.
    pub fn suite_path(&self) -> &Utf8Path {
        &self.suite_path
    }

    /// The fine-grained filter, if this item is a single method/chain.
    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// A stable identifier for this item: the suite path, plus the filter
    /// in fine-grained mode.
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "{}::{filter}", self.suite_path),
            None => write!(f, "{}", self.suite_path),
        }
    }
}

/// Reads a JSON work list (an array of [`WorkItem`]s) from a file.
pub fn load_work_list(path: &Utf8Path) -> io::Result<Vec<WorkItem>> {
    let data = fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(io::Error::other)
}
