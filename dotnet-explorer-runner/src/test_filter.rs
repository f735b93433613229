// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Compiling run requests into `--filter` expressions.
//!
//! The test host filters on `FullyQualifiedName`: `=` for an exact match, `~` for contains,
//! and `!=` / `!~` for their negations. Clauses are joined with `&`.
//!
//! The user's extra test arguments may already carry a filter of their own. It is recognized
//! with a narrow grammar: the `--filter` flag, whitespace, then either a double-quoted value or a
//! single bare token. The first such flag supplies an extra clause; every occurrence is removed
//! from the residual arguments so the flag is passed exactly once.

use crate::test_name::strip_argument_lists;
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

static EMBEDDED_FILTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"--filter\s+(?:"([^"]*)"|(\S+))"#).expect("embedded filter regex is valid")
});

const NO_BUILD: &str = "--no-build";

/// A request to run tests.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunRequest {
    /// The qualified-name pattern to run. Empty means every test.
    pub pattern: String,

    /// Whether `pattern` names one test (exact match) or a subtree (contains match).
    pub is_single_test: bool,

    /// Whether to run under the debugger attach handshake.
    pub debug: bool,

    /// Tests or subtrees to leave out of the run.
    pub exclusions: Vec<Exclusion>,
}

impl RunRequest {
    /// A request to run every test.
    pub fn all() -> Self {
        Self::default()
    }

    /// A request to run the tests matching `pattern`.
    pub fn new(pattern: impl Into<String>, is_single_test: bool) -> Self {
        Self {
            pattern: pattern.into(),
            is_single_test,
            ..Self::default()
        }
    }

    /// Sets whether this is a debug run.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the exclusions.
    pub fn with_exclusions(mut self, exclusions: impl IntoIterator<Item = Exclusion>) -> Self {
        self.exclusions = exclusions.into_iter().collect();
        self
    }

    /// Returns true if this request runs every test, in which case its results replace all
    /// earlier results.
    pub fn is_all_tests(&self) -> bool {
        self.pattern.is_empty()
    }
}

/// A test or subtree excluded from a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Exclusion {
    pattern: String,
    is_single_test: bool,
}

impl Exclusion {
    /// Excludes exactly one test.
    pub fn test(name: impl Into<String>) -> Self {
        Self {
            pattern: name.into(),
            is_single_test: true,
        }
    }

    /// Excludes every test whose name contains `pattern`.
    pub fn subtree(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            is_single_test: false,
        }
    }

    /// Returns the negated filter clause for this exclusion.
    pub fn clause(&self) -> String {
        let op = if self.is_single_test { "!=" } else { "!~" };
        format!(
            "FullyQualifiedName{op}{}",
            strip_argument_lists(&self.pattern)
        )
    }
}

/// Extra test arguments with any embedded `--filter` and `--no-build` flags taken out.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtraArguments {
    residual: Vec<String>,
    embedded_filter: Option<String>,
    no_build: bool,
}

impl ExtraArguments {
    /// Parses a free-form argument string.
    pub fn parse(extra: &str) -> Self {
        let mut matches = EMBEDDED_FILTER.captures_iter(extra);
        let embedded_filter = matches.next().map(|captures| {
            captures
                .get(1)
                .or_else(|| captures.get(2))
                .map_or_else(String::new, |value| value.as_str().to_owned())
        });
        let extra_count = matches.count();
        if extra_count > 0 {
            warn!(
                "extra arguments contain {} --filter flags, using only the first",
                extra_count + 1
            );
        }

        let without_filter = EMBEDDED_FILTER.replace_all(extra, "");
        let mut no_build = false;
        let residual = split_arguments(&without_filter)
            .into_iter()
            .filter(|arg| {
                let is_no_build = arg == NO_BUILD;
                no_build |= is_no_build;
                !is_no_build
            })
            .collect();

        Self {
            residual,
            embedded_filter: embedded_filter.filter(|filter| !filter.is_empty()),
            no_build,
        }
    }

    /// Returns the arguments to pass through, without `--filter` or `--no-build`.
    pub fn residual(&self) -> &[String] {
        &self.residual
    }

    /// Returns the value of the first embedded `--filter` flag.
    pub fn embedded_filter(&self) -> Option<&str> {
        self.embedded_filter.as_deref()
    }

    /// Returns true if the user passed `--no-build`, meaning the build step is skipped.
    pub fn no_build(&self) -> bool {
        self.no_build
    }
}

/// Splits an argument string the way a POSIX shell would.
///
/// Input with unbalanced quotes falls back to splitting on whitespace.
pub fn split_arguments(args: &str) -> Vec<String> {
    match shell_words::split(args) {
        Ok(words) => words,
        Err(error) => {
            warn!("could not parse arguments `{args}` ({error}), splitting on whitespace");
            args.split_whitespace().map(str::to_owned).collect()
        }
    }
}

/// A compiled filter expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestFilter {
    expression: Option<String>,
}

impl TestFilter {
    /// Compiles the filter for `request`, adding the clause embedded in `extra`, if any.
    ///
    /// The result depends only on the inputs, and clause order is fixed: the pattern, then the
    /// exclusions in order, then the embedded clause.
    pub fn compile(request: &RunRequest, extra: &ExtraArguments) -> Self {
        let mut clauses = Vec::new();

        if !request.pattern.is_empty() {
            let op = if request.is_single_test { "=" } else { "~" };
            clauses.push(format!(
                "FullyQualifiedName{op}{}",
                strip_argument_lists(&request.pattern)
            ));
        }
        clauses.extend(request.exclusions.iter().map(Exclusion::clause));
        if let Some(embedded) = extra.embedded_filter() {
            clauses.push(embedded.to_owned());
        }

        let expression = (!clauses.is_empty()).then(|| clauses.join("&"));
        Self { expression }
    }

    /// Returns the filter expression, or `None` to run everything.
    pub fn expression(&self) -> Option<&str> {
        self.expression.as_deref()
    }

    /// Returns the arguments that apply this filter: `--filter <expr>`, or nothing.
    pub fn to_args(&self) -> Vec<String> {
        match &self.expression {
            Some(expression) => vec!["--filter".to_owned(), expression.clone()],
            None => Vec::new(),
        }
    }
}
