// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing of TRX result reports.
//!
//! A TRX report has a `TestDefinitions` section mapping opaque test ids to class and method
//! names, and a `Results` section with one `UnitTestResult` per executed test keyed by that id:
//!
//! ```xml
//! <TestRun>
//!   <Results>
//!     <UnitTestResult testId="..." outcome="Failed" duration="00:00:00.0120000">
//!       <Output><ErrorInfo><Message>...</Message><StackTrace>...</StackTrace></ErrorInfo></Output>
//!     </UnitTestResult>
//!   </Results>
//!   <TestDefinitions>
//!     <UnitTest id="..." name="Method"><TestMethod className="Namespace.Class" /></UnitTest>
//!   </TestDefinitions>
//! </TestRun>
//! ```
//!
//! Results and definitions are collected into two independent maps and joined once at the end;
//! results whose id has no definition are dropped.

use crate::errors::{ReportParseError, TrxParseError};
use camino::Utf8Path;
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use std::{collections::HashMap, fmt, time::Duration};
use tracing::{debug, warn};

/// The outcome of a single test.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TestOutcome {
    /// The test passed.
    Passed,

    /// The test failed, errored out, timed out or was aborted.
    Failed,

    /// The test was skipped or could not be run.
    NotExecuted,
}

impl TestOutcome {
    /// Maps a TRX `outcome` attribute. Outcomes with no counterpart return `None`.
    fn from_trx(outcome: &str) -> Option<Self> {
        match outcome {
            "Passed" => Some(Self::Passed),
            "Failed" | "Error" | "Timeout" | "Aborted" => Some(Self::Failed),
            "NotExecuted" | "Inconclusive" | "NotRunnable" | "Pending" => Some(Self::NotExecuted),
            _ => None,
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "Passed"),
            Self::Failed => write!(f, "Failed"),
            Self::NotExecuted => write!(f, "NotExecuted"),
        }
    }
}

/// A test result whose id has been resolved to a qualified name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResultRecord {
    /// The opaque id that correlates the result with its definition.
    pub id: String,

    /// The qualified name: `ClassName.MethodName`.
    pub qualified_name: String,

    /// The outcome of the test.
    pub outcome: TestOutcome,

    /// How long the test took, if the report had a readable duration.
    pub duration: Option<Duration>,

    /// The failure message, or empty.
    pub message: String,

    /// The failure stack trace, or empty.
    pub stack_trace: String,

    /// Standard output captured by the test host, or empty.
    pub std_out: String,

    /// The original `UnitTestResult` element.
    pub raw_node: String,
}

impl ResultRecord {
    /// Creates a record for a test whose name is already known, with no other details.
    pub fn resolved(qualified_name: impl Into<String>, outcome: TestOutcome) -> Self {
        let qualified_name = qualified_name.into();
        Self {
            id: qualified_name.clone(),
            qualified_name,
            outcome,
            duration: None,
            message: String::new(),
            stack_trace: String::new(),
            std_out: String::new(),
            raw_node: String::new(),
        }
    }
}

/// A merged result set from one run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TestResults {
    /// Whether these results replace all earlier results (an "all tests" run) or accumulate
    /// with them.
    pub replace: bool,

    /// The records from every directory in the run.
    pub records: Vec<ResultRecord>,
}

impl TestResults {
    /// Counts the records by outcome.
    pub fn summary(&self) -> ResultSummary {
        let mut summary = ResultSummary::default();
        for record in &self.records {
            match record.outcome {
                TestOutcome::Passed => summary.passed += 1,
                TestOutcome::Failed => summary.failed += 1,
                TestOutcome::NotExecuted => summary.not_executed += 1,
            }
        }
        summary
    }
}

/// Counts of results by outcome.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResultSummary {
    /// The number of passed tests.
    pub passed: usize,

    /// The number of failed tests.
    pub failed: usize,

    /// The number of tests that were not executed.
    pub not_executed: usize,
}

impl ResultSummary {
    /// Returns the total number of results.
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.not_executed
    }
}

/// Parses a `hh:mm:ss.fraction` duration.
///
/// Returns `None` for anything that is not three colon-separated non-negative numbers.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let mut parts = value.split(':');
    let (Some(hours), Some(minutes), Some(seconds), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };

    let hours: u64 = hours.trim().parse().ok()?;
    let minutes: u64 = minutes.trim().parse().ok()?;
    let seconds: f64 = seconds.trim().parse().ok()?;

    let whole = hours.checked_mul(3600)?.checked_add(minutes.checked_mul(60)?)?;
    let fractional = Duration::try_from_secs_f64(seconds).ok()?;
    Duration::from_secs(whole).checked_add(fractional)
}

/// Reads, parses and then deletes a TRX report.
///
/// The file is removed once it has been read, whether or not it parsed; failing to remove it is
/// ignored.
pub fn parse_report_file(path: &Utf8Path) -> Result<Vec<ResultRecord>, ReportParseError> {
    let contents = std::fs::read_to_string(path).map_err(|error| ReportParseError::Read {
        path: path.to_owned(),
        error,
    })?;

    let parsed = parse_trx(&contents).map_err(|error| ReportParseError::Parse {
        path: path.to_owned(),
        error,
    });

    if let Err(error) = std::fs::remove_file(path) {
        debug!("failed to remove result report {path}: {error}");
    }

    let records = parsed?;
    debug!("parsed {} results from {path}", records.len());
    Ok(records)
}

#[derive(Debug, Default)]
struct UnresolvedResult {
    id: String,
    outcome: Option<TestOutcome>,
    outcome_str: String,
    duration: Option<Duration>,
    message: Option<String>,
    stack_trace: Option<String>,
    std_out: Option<String>,
    raw_node: String,
}

#[derive(Debug)]
struct TestDefinition {
    class_name: String,
    method_name: String,
}

impl TestDefinition {
    fn qualified_name(&self) -> String {
        // Some adapters already report the fully-qualified name as the method name.
        if self
            .method_name
            .strip_prefix(&self.class_name)
            .is_some_and(|rest| rest.starts_with('.'))
        {
            self.method_name.clone()
        } else {
            format!("{}.{}", self.class_name, self.method_name)
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TextField {
    Message,
    StackTrace,
    StdOut,
}

impl TextField {
    fn from_element(name: &[u8]) -> Option<Self> {
        match name {
            b"Message" => Some(Self::Message),
            b"StackTrace" => Some(Self::StackTrace),
            b"StdOut" => Some(Self::StdOut),
            _ => None,
        }
    }
}

/// State for a `UnitTestResult` element being read.
struct OpenResult {
    result: UnresolvedResult,
    start: usize,
    depth: usize,
    text: Option<TextField>,
}

/// State for a `UnitTest` element being read.
struct OpenDefinition {
    id: Option<String>,
    method_name: Option<String>,
    class_name: Option<String>,
    depth: usize,
}

/// Parses the contents of a TRX report.
pub fn parse_trx(xml: &str) -> Result<Vec<ResultRecord>, TrxParseError> {
    let mut reader = Reader::from_str(xml);

    let mut results: Vec<UnresolvedResult> = Vec::new();
    let mut definitions: HashMap<String, TestDefinition> = HashMap::new();

    let mut open_elements: Vec<String> = Vec::new();
    let mut seen_root = false;
    let mut open_result: Option<OpenResult> = None;
    let mut open_definition: Option<OpenDefinition> = None;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event()?;
        match event {
            Event::Start(ref element) | Event::Empty(ref element) => {
                seen_root = true;
                let is_empty = matches!(event, Event::Empty(_));
                let depth = open_elements.len();

                match element.local_name().as_ref() {
                    b"UnitTestResult" if open_result.is_none() => {
                        if let Some(result) = start_result(element)? {
                            if is_empty {
                                let end = reader.buffer_position() as usize;
                                results.push(UnresolvedResult {
                                    raw_node: xml[start..end].trim().to_owned(),
                                    ..result
                                });
                            } else {
                                open_result = Some(OpenResult {
                                    result,
                                    start,
                                    depth,
                                    text: None,
                                });
                            }
                        }
                    }
                    b"UnitTest" if open_definition.is_none() => {
                        let definition = OpenDefinition {
                            id: attribute(element, b"id")?,
                            method_name: attribute(element, b"name")?,
                            class_name: None,
                            depth,
                        };
                        if is_empty {
                            finish_definition(definition, &mut definitions);
                        } else {
                            open_definition = Some(definition);
                        }
                    }
                    b"TestMethod" => {
                        if let Some(definition) = &mut open_definition {
                            if definition.class_name.is_none() && depth == definition.depth + 1 {
                                definition.class_name = attribute(element, b"className")?;
                            }
                        }
                    }
                    name => {
                        if let (Some(open), Some(field), false) =
                            (&mut open_result, TextField::from_element(name), is_empty)
                        {
                            if open.text.is_none() && open.result.field(field).is_none() {
                                open.text = Some(field);
                                *open.result.field_mut(field) = Some(String::new());
                            }
                        }
                    }
                }

                if !is_empty {
                    let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
                    open_elements.push(name);
                }
            }
            Event::End(ref element) => {
                open_elements.pop();
                let depth = open_elements.len();

                if open_result.as_ref().is_some_and(|open| open.depth == depth) {
                    if let Some(mut open) = open_result.take() {
                        let end = reader.buffer_position() as usize;
                        open.result.raw_node = xml[open.start..end].trim().to_owned();
                        results.push(open.result);
                    }
                } else if let Some(open) = &mut open_result {
                    if open.text.is_some()
                        && TextField::from_element(element.local_name().as_ref()) == open.text
                    {
                        open.text = None;
                    }
                }

                if open_definition
                    .as_ref()
                    .is_some_and(|definition| definition.depth == depth)
                {
                    if let Some(definition) = open_definition.take() {
                        finish_definition(definition, &mut definitions);
                    }
                }
            }
            Event::Text(ref text) => {
                if let Some(OpenResult {
                    result,
                    text: Some(field),
                    ..
                }) = &mut open_result
                {
                    let text = text.unescape()?;
                    result.field_mut(*field).get_or_insert_default().push_str(&text);
                }
            }
            Event::CData(ref cdata) => {
                if let Some(OpenResult {
                    result,
                    text: Some(field),
                    ..
                }) = &mut open_result
                {
                    let text = String::from_utf8_lossy(cdata);
                    result.field_mut(*field).get_or_insert_default().push_str(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(TrxParseError::MissingRoot);
    }
    if let Some(name) = open_elements.pop() {
        return Err(TrxParseError::UnclosedElement { name });
    }

    Ok(resolve(results, &definitions))
}

fn start_result(element: &BytesStart<'_>) -> Result<Option<UnresolvedResult>, TrxParseError> {
    let Some(id) = attribute(element, b"testId")? else {
        return Ok(None);
    };
    let outcome_str = attribute(element, b"outcome")?.unwrap_or_default();
    let duration = attribute(element, b"duration")?
        .as_deref()
        .and_then(parse_duration);

    Ok(Some(UnresolvedResult {
        id,
        outcome: TestOutcome::from_trx(&outcome_str),
        outcome_str,
        duration,
        ..Default::default()
    }))
}

fn finish_definition(
    definition: OpenDefinition,
    definitions: &mut HashMap<String, TestDefinition>,
) {
    if let (Some(id), Some(class_name), Some(method_name)) =
        (definition.id, definition.class_name, definition.method_name)
    {
        definitions.insert(
            id,
            TestDefinition {
                class_name,
                method_name,
            },
        );
    }
}

fn resolve(
    results: Vec<UnresolvedResult>,
    definitions: &HashMap<String, TestDefinition>,
) -> Vec<ResultRecord> {
    results
        .into_iter()
        .filter_map(|result| {
            let Some(definition) = definitions.get(&result.id) else {
                debug!("dropping result {}: no matching test definition", result.id);
                return None;
            };
            let qualified_name = definition.qualified_name();
            let Some(outcome) = result.outcome else {
                warn!(
                    "unexpected outcome `{}` for {qualified_name}, ignoring result",
                    result.outcome_str
                );
                return None;
            };
            Some(ResultRecord {
                id: result.id,
                qualified_name,
                outcome,
                duration: result.duration,
                message: result.message.unwrap_or_default(),
                stack_trace: result.stack_trace.unwrap_or_default(),
                std_out: result.std_out.unwrap_or_default(),
                raw_node: result.raw_node,
            })
        })
        .collect()
}

impl UnresolvedResult {
    fn field(&self, field: TextField) -> Option<&String> {
        match field {
            TextField::Message => self.message.as_ref(),
            TextField::StackTrace => self.stack_trace.as_ref(),
            TextField::StdOut => self.std_out.as_ref(),
        }
    }

    fn field_mut(&mut self, field: TextField) -> &mut Option<String> {
        match field {
            TextField::Message => &mut self.message,
            TextField::StackTrace => &mut self.stack_trace,
            TextField::StdOut => &mut self.std_out,
        }
    }
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, TrxParseError> {
    for attr in element.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.local_name().as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
