// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Printing the test tree, run summaries and problems.

use crate::output::StdoutStyles;
use dotnet_explorer_runner::{
    problems::ProblemsByPath,
    report::ResultSummary,
    tree::{NodeStatus, TestTree, TreeNode},
};
use itertools::Itertools;
use owo_colors::OwoColorize;
use std::io::{self, Write};
use swrite::{SWrite, swrite};

const INDENT: &str = "  ";

pub(crate) struct TreeReporter<'a> {
    styles: &'a StdoutStyles,
    show_messages: bool,
}

impl<'a> TreeReporter<'a> {
    pub(crate) fn new(styles: &'a StdoutStyles, show_messages: bool) -> Self {
        Self {
            styles,
            show_messages,
        }
    }

    pub(crate) fn write_tree(&self, tree: &TestTree, writer: &mut dyn Write) -> io::Result<()> {
        let mut out = String::new();
        for child in tree.root().children() {
            self.write_node(tree, child, 0, &mut out);
        }
        writer.write_all(out.as_bytes())
    }

    fn write_node(&self, tree: &TestTree, node: &TreeNode, depth: usize, out: &mut String) {
        let indent = INDENT.repeat(depth);
        if node.is_folder() {
            swrite!(out, "{indent}{}", node.display_name().style(self.styles.folder));
            if node.status() != NodeStatus::Unknown {
                swrite!(out, " {}", self.status_label(node.status()));
            }
            out.push('\n');
        }
        if let Some(test_status) = node.test_status() {
            // A test that is also a folder is listed as its own first child.
            let leaf_indent = if node.is_folder() {
                INDENT.repeat(depth + 1)
            } else {
                indent
            };
            swrite!(
                out,
                "{leaf_indent}{} {}",
                self.status_label(test_status),
                node.display_name()
            );
            if let Some(duration) = tree
                .results()
                .iter()
                .find(|record| record.qualified_name == node.full_name())
                .and_then(|record| record.duration)
            {
                swrite!(
                    out,
                    " {}",
                    format!("[{:.3}s]", duration.as_secs_f64()).style(self.styles.dim)
                );
            }
            out.push('\n');

            if self.show_messages && test_status == NodeStatus::Failed {
                self.write_failure_message(tree, node, &leaf_indent, out);
            }
        }
        for child in node.children() {
            self.write_node(tree, child, depth + 1, out);
        }
    }

    fn write_failure_message(&self, tree: &TestTree, node: &TreeNode, indent: &str, out: &mut String) {
        let full_name = node.full_name();
        let Some(record) = tree
            .results()
            .iter()
            .find(|record| record.qualified_name == full_name)
        else {
            return;
        };
        for line in record.message.lines() {
            swrite!(out, "{indent}{INDENT}{INDENT}{}\n", line.style(self.styles.dim));
        }
    }

    fn status_label(&self, status: NodeStatus) -> String {
        let (label, style) = match status {
            NodeStatus::Passed => ("PASS", self.styles.pass),
            NodeStatus::Failed => ("FAIL", self.styles.fail),
            NodeStatus::NotExecuted => ("SKIP", self.styles.skip),
            NodeStatus::Running => ("RUN", self.styles.running),
            NodeStatus::NotRun | NodeStatus::Unknown => ("----", self.styles.dim),
        };
        format!("{:>4}", label).style(style).to_string()
    }

    pub(crate) fn write_summary(
        &self,
        summary: &ResultSummary,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        let mut out = String::new();
        let heading_style = if summary.failed > 0 {
            self.styles.fail
        } else {
            self.styles.pass
        };
        swrite!(
            out,
            "{} {} {} run: {} passed",
            "Summary".style(heading_style),
            summary.total().style(self.styles.folder),
            if summary.total() == 1 { "test" } else { "tests" },
            summary.passed.style(self.styles.pass),
        );
        if summary.failed > 0 {
            swrite!(out, ", {} failed", summary.failed.style(self.styles.fail));
        }
        if summary.not_executed > 0 {
            swrite!(
                out,
                ", {} not executed",
                summary.not_executed.style(self.styles.skip)
            );
        }
        out.push('\n');
        writer.write_all(out.as_bytes())
    }

    pub(crate) fn write_problems(
        &self,
        problems: &ProblemsByPath,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        let mut out = String::new();
        for (path, problems) in problems {
            for problem in problems.iter().sorted_by_key(|problem| problem.line) {
                let message = problem.message.lines().next().unwrap_or_default();
                swrite!(
                    out,
                    "{}:{}: {message}\n",
                    path.style(self.styles.path),
                    problem.line
                );
            }
        }
        writer.write_all(out.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dotnet_explorer_runner::{
        problems::problems_from_results,
        report::{ResultRecord, TestOutcome, TestResults},
        tree::TreeMode,
    };
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn sample_tree() -> (TestTree, TestResults) {
        let mut tree = TestTree::new(TreeMode::Full);
        tree.set_discovered(["N.Calc.Adds", "N.Calc.Divides", "N.Parser.Reads"]);
        let results = TestResults {
            replace: false,
            records: vec![
                ResultRecord {
                    duration: Some(Duration::from_millis(250)),
                    ..ResultRecord::resolved("N.Calc.Adds", TestOutcome::Passed)
                },
                ResultRecord {
                    message: "Expected: 2\nActual: 3".to_owned(),
                    stack_trace: "at N.Calc.Divides() in /src/CalcTests.cs:line 12".to_owned(),
                    ..ResultRecord::resolved("N.Calc.Divides", TestOutcome::Failed)
                },
            ],
        };
        tree.apply_results(&results);
        (tree, results)
    }

    #[test]
    fn tree_output() {
        let (tree, _) = sample_tree();
        let styles = StdoutStyles::default();
        let mut out = Vec::new();
        TreeReporter::new(&styles, true)
            .write_tree(&tree, &mut out)
            .expect("writing to a Vec succeeds");

        assert_eq!(
            String::from_utf8(out).expect("output is UTF-8"),
            indoc! {"
                N FAIL
                  Calc FAIL
                    PASS Adds [0.250s]
                    FAIL Divides
                        Expected: 2
                        Actual: 3
                  Parser
                    ---- Reads
            "}
        );
    }

    #[test]
    fn test_listed_under_its_own_folder() {
        let mut tree = TestTree::new(TreeMode::Full);
        tree.set_discovered(["N.C", "N.C.M"]);
        tree.apply_results(&TestResults {
            replace: false,
            records: vec![
                ResultRecord::resolved("N.C", TestOutcome::Passed),
                ResultRecord::resolved("N.C.M", TestOutcome::Failed),
            ],
        });
        let styles = StdoutStyles::default();
        let mut out = Vec::new();
        TreeReporter::new(&styles, false)
            .write_tree(&tree, &mut out)
            .expect("writing to a Vec succeeds");

        assert_eq!(
            String::from_utf8(out).expect("output is UTF-8"),
            indoc! {"
                N FAIL
                  C FAIL
                    PASS C
                    FAIL M
            "}
        );
    }

    #[test]
    fn summary_and_problems() {
        let (_, results) = sample_tree();
        let styles = StdoutStyles::default();
        let reporter = TreeReporter::new(&styles, false);

        let mut out = Vec::new();
        reporter
            .write_summary(&results.summary(), &mut out)
            .expect("writing to a Vec succeeds");
        reporter
            .write_problems(&problems_from_results(&results.records), &mut out)
            .expect("writing to a Vec succeeds");

        assert_eq!(
            String::from_utf8(out).expect("output is UTF-8"),
            indoc! {"
                Summary 2 tests run: 1 passed, 1 failed
                /src/CalcTests.cs:12: Expected: 2
            "}
        );
    }
}
