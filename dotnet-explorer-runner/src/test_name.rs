// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splitting fully-qualified test names into namespace segments.
//!
//! Test names reported by the test host look like `Namespace.Class.Method`, optionally followed
//! by an argument list for parameterized cases: `Namespace.Class.Method(System.Int32)` or
//! `Namespace.Class("fixture arg").Method(x: 1.5)`. Dots inside an argument list never separate
//! segments.

use std::fmt;

/// A fully-qualified test name split into its segments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedTestName {
    full_name: String,
    segments: Vec<String>,
}

impl ParsedTestName {
    /// Parses a fully-qualified test name.
    ///
    /// A name with unbalanced parentheses is kept as a single segment.
    pub fn new(full_name: impl Into<String>) -> Self {
        let full_name = full_name.into();
        let segments = match split_segments(&full_name) {
            Some(segments) => segments.into_iter().map(str::to_owned).collect(),
            None => vec![full_name.clone()],
        };
        Self {
            full_name,
            segments,
        }
    }

    /// Returns the original name, argument lists included.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Returns the segments, each still carrying its argument list.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the display name of the last segment.
    pub fn display_name(&self) -> &str {
        self.segments
            .last()
            .map_or("", |segment| trim_arguments(segment))
    }
}

impl fmt::Display for ParsedTestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// Splits `name` on dots outside of parentheses.
///
/// Returns `None` if the parentheses are unbalanced.
fn split_segments(name: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (idx, ch) in name.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1)?,
            '.' if depth == 0 => {
                segments.push(&name[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return None;
    }
    segments.push(&name[start..]);
    Some(segments)
}

/// Removes the argument list from a single segment: `Method(int, string)` becomes `Method`.
pub fn trim_arguments(segment: &str) -> &str {
    match segment.find('(') {
        Some(idx) => &segment[..idx],
        None => segment,
    }
}

/// Returns the name the test host uses for filtering: every segment with its argument list
/// removed, and nested classes (`Outer+Inner`) written with dots.
///
/// `MyNamespace.Class("fixture").Test("with args")` becomes `MyNamespace.Class.Test`.
pub fn fully_qualified_name(name: &str) -> String {
    let stripped = match split_segments(name) {
        Some(segments) => segments
            .into_iter()
            .map(trim_arguments)
            .collect::<Vec<_>>()
            .join("."),
        None => trim_arguments(name).to_owned(),
    };
    stripped.replace('+', ".")
}

/// Removes every parenthesized run from `pattern`, leaving the bare class and method names.
pub fn strip_argument_lists(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut depth = 0usize;
    for ch in pattern.chars() {
        match ch {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}
