// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A terminal front end for discovering and running .NET tests.
//!
//! Tests are discovered per project directory, shown as a namespace tree, and run through the
//! build tool with results read back from TRX reports. Configuration lives in
//! `.config/dotnet-explorer.toml` under the workspace root.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;
mod reporter;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::OutputWriter;
