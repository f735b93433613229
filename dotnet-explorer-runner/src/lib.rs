// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for dotnet-explorer: turning run requests into `dotnet test` invocations
//! across many project directories, parsing the TRX reports those invocations produce, and
//! reconciling the results against a namespace tree of known tests.
//!
//! The basic flow is:
//!
//! 1. A [`discovery`] pass fills the [`directories`] index with fully-qualified test names.
//! 2. [`tree::TestTree`] builds a namespace tree from those names.
//! 3. [`runner::RunCoordinator::run_test_command`] compiles a [`test_filter`] expression, builds
//!    and tests every matching directory through [`test_command`], and parses each
//!    [`report`].
//! 4. The merged results are published over [`events`] and applied to the tree.

pub mod config;
pub mod debug;
pub mod directories;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod problems;
pub mod report;
pub mod runner;
pub mod signal;
pub mod test_command;
pub mod test_filter;
pub mod test_name;
pub mod tree;
