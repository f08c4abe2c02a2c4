// Copyright (c) The paramux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [paramux](https://crates.io/crates/paramux), a
//! parallel wrapper-runner for external test engines.
//!
//! paramux drives a pool of persistent worker processes over a line-oriented
//! wire protocol, parses the JUnit-style result artifact each invocation
//! produces, and reduces everything into one consolidated report plus an
//! optional merged coverage model.

pub mod config;
pub mod coverage;
pub mod errors;
pub mod results;
pub mod scheduler;
pub mod summary;
pub mod work_list;
pub mod worker;
