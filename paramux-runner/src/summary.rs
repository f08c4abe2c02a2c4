// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The final run verdict and totals block.

use crate::results::LogInterpreter;
use std::fmt;

/// The overall outcome of a run. Highest severity wins: any error makes the
/// run errored, else any failure makes it failed, else it passed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum RunVerdict {
    /// No failures and no errors.
    Passed,
    /// At least one failure, no errors.
    Failed,
    /// At least one error, regardless of failures.
    Errored,
}

impl RunVerdict {
    /// The process exit code for this verdict: 0, 1 or 2. Fatal runner
    /// errors use a separate, distinct code at the CLI boundary.
    pub fn exit_code(self) -> i32 {
        match self {
            RunVerdict::Passed => 0,
            RunVerdict::Failed => 1,
            RunVerdict::Errored => 2,
        }
    }
}

/// Final totals of a completed run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunSummary {
    /// Total tests.
    pub tests: usize,
    /// Total assertions.
    pub assertions: usize,
    /// Total failures.
    pub failures: usize,
    /// Total errors (risky tests included, as accumulated by the engine).
    pub errors: usize,
    /// Total skipped tests.
    pub skipped: usize,
    /// Total elapsed test time in seconds.
    pub time: f64,
}

impl RunSummary {
    /// Snapshots the interpreter's totals.
    pub fn from_interpreter(interpreter: &LogInterpreter) -> Self {
        Self {
            tests: interpreter.total_tests(),
            assertions: interpreter.total_assertions(),
            failures: interpreter.total_failures(),
            errors: interpreter.total_errors(),
            skipped: interpreter.total_skipped(),
            time: interpreter.total_time(),
        }
    }

    /// The verdict these totals imply.
    pub fn verdict(&self) -> RunVerdict {
        if self.errors > 0 {
            RunVerdict::Errored
        } else if self.failures > 0 {
            RunVerdict::Failed
        } else {
            RunVerdict::Passed
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.verdict() {
            RunVerdict::Passed => {
                write!(f, "OK ({} tests, {} assertions)", self.tests, self.assertions)?;
            }
            RunVerdict::Failed | RunVerdict::Errored => {
                write!(
                    f,
                    "FAILURES!\nTests: {}, Assertions: {}, Failures: {}, Errors: {}",
                    self.tests, self.assertions, self.failures, self.errors
                )?;
            }
        }
        if self.skipped > 0 {
            write!(f, ", Skipped: {}", self.skipped)?;
        }
        Ok(())
    }
}
