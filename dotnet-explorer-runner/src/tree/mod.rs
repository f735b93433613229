// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The namespace tree of known tests.
//!
//! A [`TestTree`] owns the sorted set of known qualified names, the latest result for each of
//! them, and the [`TreeNode`] hierarchy built from the names. The hierarchy is rebuilt wholesale
//! whenever the set of names changes; otherwise only node statuses are recomputed.

mod builder;
mod reconcile;

pub use builder::{build_flat, build_tree, merge_single_child_chains};
pub use reconcile::is_in_scope;

use crate::{
    errors::TreeModeParseError,
    report::{ResultRecord, TestOutcome},
    test_name::{ParsedTestName, fully_qualified_name, trim_arguments},
};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{fmt, str::FromStr};

/// How the namespace tree is shaped.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TreeMode {
    /// One folder per namespace segment.
    #[default]
    Full,

    /// Like `Full`, but chains of single-child folders are collapsed into one folder.
    Merged,

    /// Every test is a top-level leaf named by its qualified name.
    Flat,
}

impl TreeMode {
    /// Returns the string representations of all known values.
    pub fn variants() -> &'static [&'static str] {
        &["full", "merged", "flat"]
    }
}

impl FromStr for TreeMode {
    type Err = TreeModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "merged" => Ok(Self::Merged),
            "flat" => Ok(Self::Flat),
            other => Err(TreeModeParseError::new(other)),
        }
    }
}

impl fmt::Display for TreeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Merged => write!(f, "merged"),
            Self::Flat => write!(f, "flat"),
        }
    }
}

/// The status shown for a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NodeStatus {
    /// A folder with no results below it.
    Unknown,

    /// A leaf without a result, or whose run was prevented by a build failure.
    NotRun,

    /// The leaf is part of a run that has not finished yet.
    Running,

    /// The test (or every test with a result below this folder) passed.
    Passed,

    /// The test failed, or at least one test below this folder failed.
    Failed,

    /// The test was skipped, or a test below this folder was skipped and none failed.
    NotExecuted,
}

impl NodeStatus {
    pub(crate) fn from_outcome(outcome: TestOutcome) -> Self {
        match outcome {
            TestOutcome::Passed => Self::Passed,
            TestOutcome::Failed => Self::Failed,
            TestOutcome::NotExecuted => Self::NotExecuted,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::NotRun => "not run",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::NotExecuted => "not executed",
        };
        f.write_str(s)
    }
}

/// A namespace/class folder or a single test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TreeNode {
    name: String,
    parent_path: String,
    children: IndexMap<String, TreeNode>,
    is_test: bool,
    status: NodeStatus,
    test_status: NodeStatus,
}

impl TreeNode {
    /// Creates the synthetic root node.
    pub fn root() -> Self {
        Self::new(String::new(), String::new())
    }

    pub(crate) fn new(name: String, parent_path: String) -> Self {
        Self {
            name,
            parent_path,
            children: IndexMap::new(),
            is_test: false,
            status: NodeStatus::Unknown,
            test_status: NodeStatus::NotRun,
        }
    }

    /// Returns the last segment of this node's path, argument list included.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name with any argument list removed.
    pub fn display_name(&self) -> &str {
        trim_arguments(&self.name)
    }

    /// Returns the dot-joined path of this node's ancestors. Empty for top-level nodes.
    pub fn parent_path(&self) -> &str {
        &self.parent_path
    }

    /// Returns the full name: the parent path and name joined with a dot.
    pub fn full_name(&self) -> String {
        if self.parent_path.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.parent_path, self.name)
        }
    }

    /// Returns the name the test host filters on for this node.
    pub fn fqn(&self) -> String {
        fully_qualified_name(&self.full_name())
    }

    /// Returns the children of this node in insertion order.
    pub fn children(&self) -> impl ExactSizeIterator<Item = &TreeNode> {
        self.children.values()
    }

    /// Looks up a direct child by name.
    pub fn child(&self, name: &str) -> Option<&TreeNode> {
        self.children.get(name)
    }

    /// Returns true if this node is a folder: it has children, or it is the synthetic root.
    pub fn is_folder(&self) -> bool {
        self.is_root() || !self.children.is_empty()
    }

    /// Returns true if this is the synthetic root.
    pub fn is_root(&self) -> bool {
        self.parent_path.is_empty() && self.name.is_empty()
    }

    /// Returns true if a qualified name terminates at this node.
    ///
    /// A node can be both a test and a folder if one name is a prefix of another.
    pub fn is_test(&self) -> bool {
        self.is_test
    }

    /// Returns the status of this node: the rollup for folders, the test's own status for
    /// leaves.
    pub fn status(&self) -> NodeStatus {
        self.status
    }

    /// Returns the status of the test named by this node, or `None` if no name ends here.
    ///
    /// For a node that is both a test and a folder this differs from [`Self::status`], which is
    /// the folder rollup.
    pub fn test_status(&self) -> Option<NodeStatus> {
        self.is_test.then_some(self.test_status)
    }

    pub(crate) fn set_test_status(&mut self, status: NodeStatus) {
        self.test_status = status;
        if !self.is_folder() {
            self.status = status;
        }
    }

    /// Iterates over this node and every descendant, depth-first, parents before children.
    pub fn iter(&self) -> impl Iterator<Item = &TreeNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.values().rev());
            Some(node)
        })
    }

    /// Iterates over every node below (and including) this one that a test name ends at,
    /// including tests that are also folders.
    pub fn tests(&self) -> impl Iterator<Item = &TreeNode> {
        self.iter().filter(|node| node.is_test)
    }

    pub(crate) fn for_each_mut(&mut self, f: &mut impl FnMut(&mut TreeNode)) {
        f(self);
        for child in self.children.values_mut() {
            child.for_each_mut(f);
        }
    }
}

/// The known tests, their latest results, and the tree built from them.
#[derive(Clone, Debug)]
pub struct TestTree {
    mode: TreeMode,
    names: Vec<String>,
    results: Vec<ResultRecord>,
    root: TreeNode,
}

impl TestTree {
    /// Creates an empty tree.
    pub fn new(mode: TreeMode) -> Self {
        Self {
            mode,
            names: Vec::new(),
            results: Vec::new(),
            root: TreeNode::root(),
        }
    }

    /// Returns the tree mode.
    pub fn mode(&self) -> TreeMode {
        self.mode
    }

    /// Returns the synthetic root.
    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    /// Returns the known qualified names, sorted.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the latest result for every name that has one.
    pub fn results(&self) -> &[ResultRecord] {
        &self.results
    }

    /// Finds a node by its full name.
    pub fn find(&self, full_name: &str) -> Option<&TreeNode> {
        self.root
            .iter()
            .find(|node| !node.is_root() && node.full_name() == full_name)
    }

    fn rebuild(&mut self) {
        let parsed: Vec<_> = self
            .names
            .iter()
            .map(|name| ParsedTestName::new(name.as_str()))
            .collect();
        self.root = match self.mode {
            TreeMode::Flat => build_flat(&parsed),
            TreeMode::Full => build_tree(&parsed),
            TreeMode::Merged => merge_single_child_chains(build_tree(&parsed)),
        };
    }
}
