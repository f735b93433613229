// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping failing stack traces to source locations.

use crate::report::{ResultRecord, TestOutcome};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;

static STACK_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"in (.*):line (\d+)").expect("stack location regex is valid")
});

/// A failing test's location in source.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Problem {
    /// The source file.
    pub path: Utf8PathBuf,

    /// The 1-based line number.
    pub line: u32,

    /// The failure message.
    pub message: String,
}

/// Problems grouped by source file, in the order the files were first seen.
pub type ProblemsByPath = IndexMap<Utf8PathBuf, Vec<Problem>>;

/// Maps every failing record with a stack trace to a problem.
///
/// Only the last `in <path>:line <n>` frame of each trace is used; records without one are
/// skipped.
pub fn problems_from_results<'a>(
    records: impl IntoIterator<Item = &'a ResultRecord>,
) -> ProblemsByPath {
    let mut problems = ProblemsByPath::new();
    for record in records {
        if record.outcome != TestOutcome::Failed || record.stack_trace.is_empty() {
            continue;
        }
        if let Some(problem) = last_location(&record.stack_trace, &record.message) {
            problems
                .entry(problem.path.clone())
                .or_default()
                .push(problem);
        }
    }
    problems
}

fn last_location(stack_trace: &str, message: &str) -> Option<Problem> {
    STACK_LOCATION
        .captures_iter(stack_trace)
        .filter_map(|captures| {
            let line = captures[2].parse().ok()?;
            Some(Problem {
                path: Utf8PathBuf::from(captures[1].trim()),
                line,
                message: message.to_owned(),
            })
        })
        .last()
}
