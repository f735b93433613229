// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Applying result sets to the tree and rolling statuses up to folders.

use super::{NodeStatus, TestTree, TreeNode};
use crate::{
    events::ExplorerEvent,
    report::{ResultRecord, TestOutcome, TestResults},
};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Returns true if `name` is `scope` itself or lies below it in the namespace hierarchy.
///
/// An empty scope contains every name. `N.C` contains `N.C.M` and `N.C(1).M`, but not `N.CD.M`.
pub fn is_in_scope(name: &str, scope: &str) -> bool {
    if scope.is_empty() {
        return true;
    }
    match name.strip_prefix(scope) {
        Some(rest) => rest.is_empty() || rest.starts_with(['.', '(', '+']),
        None => false,
    }
}

impl TestTree {
    /// Replaces the known names with a freshly discovered set.
    ///
    /// Results from earlier runs are kept and re-applied to the new tree.
    pub fn set_discovered<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        self.names = names.into_iter().collect();
        self.rebuild();
        self.recompute_statuses();
    }

    /// Applies a merged result set.
    ///
    /// With [`TestResults::replace`] set, the known names become exactly the reported names
    /// and all older results are dropped. Otherwise new records replace older records for the
    /// same name, and names not seen before are added. The tree is rebuilt only if the set of
    /// names changed.
    pub fn apply_results(&mut self, results: &TestResults) {
        let names_changed = if results.replace {
            let names: BTreeSet<&str> = results
                .records
                .iter()
                .map(|record| record.qualified_name.as_str())
                .collect();
            let changed = !names.iter().copied().eq(self.names.iter().map(String::as_str));
            self.names = names.into_iter().map(str::to_owned).collect();
            self.results = results.records.clone();
            changed
        } else {
            let known: BTreeSet<&str> = self.names.iter().map(String::as_str).collect();
            let new_names: BTreeSet<String> = results
                .records
                .iter()
                .filter(|record| !known.contains(record.qualified_name.as_str()))
                .map(|record| record.qualified_name.clone())
                .collect();
            let changed = !new_names.is_empty();
            if changed {
                self.names.extend(new_names);
                self.names.sort();
            }
            self.merge_records(&results.records);
            changed
        };

        if names_changed {
            debug!(
                "result set changed the known tests, rebuilding tree with {} names",
                self.names.len()
            );
            self.rebuild();
        }
        self.recompute_statuses();
    }

    fn merge_records(&mut self, records: &[ResultRecord]) {
        let mut index: HashMap<String, usize> = self
            .results
            .iter()
            .enumerate()
            .map(|(idx, record)| (record.qualified_name.clone(), idx))
            .collect();
        for record in records {
            match index.get(&record.qualified_name) {
                Some(&idx) => self.results[idx] = record.clone(),
                None => {
                    index.insert(record.qualified_name.clone(), self.results.len());
                    self.results.push(record.clone());
                }
            }
        }
    }

    /// Marks every test a run request covers as running.
    ///
    /// Returns the number of tests marked.
    pub fn mark_running(&mut self, pattern: &str, is_single_test: bool) -> usize {
        self.mark_matching(pattern, is_single_test, NodeStatus::Running)
    }

    /// Marks every test a run request covers as not run, after a build failure.
    ///
    /// Returns the number of tests marked.
    pub fn mark_not_run(&mut self, pattern: &str, is_single_test: bool) -> usize {
        self.mark_matching(pattern, is_single_test, NodeStatus::NotRun)
    }

    fn mark_matching(&mut self, pattern: &str, is_single_test: bool, status: NodeStatus) -> usize {
        let mut count = 0;
        self.root.for_each_mut(&mut |node| {
            if !node.is_test() {
                return;
            }
            let matches = if is_single_test {
                node.fqn() == pattern || node.full_name() == pattern
            } else {
                is_in_scope(&node.full_name(), pattern)
            };
            if matches {
                node.set_test_status(status);
                count += 1;
            }
        });
        count
    }

    /// Recomputes the status of every node from the current results.
    ///
    /// Tests take the outcome of the result with the same full name, or
    /// [`NodeStatus::NotRun`]. Folders take the most severe outcome of every result in their
    /// scope: failed, then not executed, then passed, then [`NodeStatus::Unknown`].
    pub fn recompute_statuses(&mut self) {
        let by_name: HashMap<&str, TestOutcome> = self
            .results
            .iter()
            .map(|record| (record.qualified_name.as_str(), record.outcome))
            .collect();
        let results = &self.results;

        self.root.for_each_mut(&mut |node| {
            if node.is_test() {
                node.test_status = by_name
                    .get(node.full_name().as_str())
                    .map_or(NodeStatus::NotRun, |outcome| {
                        NodeStatus::from_outcome(*outcome)
                    });
            }
            node.status = if node.is_folder() {
                folder_status(node, results)
            } else {
                node.test_status
            };
        });
    }

    /// Updates the tree for an event published by the runner.
    pub fn apply_event(&mut self, event: &ExplorerEvent) {
        match event {
            ExplorerEvent::DiscoveryStarted => {}
            ExplorerEvent::DiscoveryFinished(discovered) => {
                self.set_discovered(
                    discovered
                        .iter()
                        .flat_map(|tests| tests.names.iter().map(String::as_str)),
                );
            }
            ExplorerEvent::RunStarted {
                pattern,
                is_single_test,
            } => {
                let marked = self.mark_running(pattern, *is_single_test);
                debug!("marked {marked} tests as running");
            }
            ExplorerEvent::NewResults(results) => self.apply_results(results),
            ExplorerEvent::BuildFailed {
                pattern,
                is_single_test,
            } => {
                self.mark_not_run(pattern, *is_single_test);
            }
        }
    }
}

fn folder_status(node: &TreeNode, results: &[ResultRecord]) -> NodeStatus {
    let scope = node.full_name();
    let mut any_not_executed = false;
    let mut any_passed = false;

    for record in results
        .iter()
        .filter(|record| is_in_scope(&record.qualified_name, &scope))
    {
        match record.outcome {
            TestOutcome::Failed => return NodeStatus::Failed,
            TestOutcome::NotExecuted => any_not_executed = true,
            TestOutcome::Passed => any_passed = true,
        }
    }

    if any_not_executed {
        NodeStatus::NotExecuted
    } else if any_passed {
        NodeStatus::Passed
    } else {
        NodeStatus::Unknown
    }
}
