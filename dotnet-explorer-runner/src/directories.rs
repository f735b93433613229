// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Project directories and the directory ↔ test index.
//!
//! The index is cleared at the start of each discovery pass and filled in as directories report
//! their tests. Runs use it to decide which directories to build and test for a pattern.

use crate::test_name::fully_qualified_name;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use tracing::{debug, warn};

const PROJECT_EXTENSIONS: &[&str] = &["csproj", "fsproj", "vbproj", "sln", "slnx"];

/// The known project directories and the tests in each.
#[derive(Clone, Debug, Default)]
pub struct TestDirectories {
    directories: Vec<Utf8PathBuf>,
    tests: IndexMap<Utf8PathBuf, Vec<String>>,
}

impl TestDirectories {
    /// Creates an index over `directories`, taken as-is.
    pub fn new(directories: impl IntoIterator<Item = Utf8PathBuf>) -> Self {
        let mut this = Self::default();
        for directory in directories {
            this.push_directory(directory);
        }
        this
    }

    /// Resolves candidate paths into project directories.
    ///
    /// A file stands for its parent directory. Candidates that contain no project or solution
    /// file are skipped with a warning. Duplicates are removed, keeping the first occurrence.
    pub fn evaluate(candidates: impl IntoIterator<Item = Utf8PathBuf>) -> Self {
        let mut this = Self::default();
        for candidate in candidates {
            let directory = if candidate.is_file() {
                match candidate.parent() {
                    Some(parent) => parent.to_owned(),
                    None => continue,
                }
            } else {
                candidate
            };

            if contains_project(&directory) {
                debug!("found test project directory {directory}");
                this.push_directory(directory);
            } else {
                warn!(
                    "skipping path {directory}: it does not contain a project or solution file"
                );
            }
        }
        this
    }

    fn push_directory(&mut self, directory: Utf8PathBuf) {
        if !self.directories.contains(&directory) {
            self.directories.push(directory);
        }
    }

    /// Returns every known directory, in configuration order.
    pub fn directories(&self) -> &[Utf8PathBuf] {
        &self.directories
    }

    /// Forgets every discovered test.
    pub fn clear_tests(&mut self) {
        self.tests.clear();
    }

    /// Records the tests discovered in `directory`.
    pub fn add_tests(&mut self, directory: &Utf8Path, names: impl IntoIterator<Item = String>) {
        self.tests
            .entry(directory.to_owned())
            .or_default()
            .extend(names);
    }

    /// Returns the directories to run for `pattern`.
    ///
    /// An empty pattern selects every known directory. Otherwise a directory is selected if one
    /// of its tests starts with `pattern`, by raw or fully-qualified name.
    pub fn directories_for(&self, pattern: &str) -> Vec<Utf8PathBuf> {
        if pattern.is_empty() {
            return self.directories.clone();
        }
        self.tests
            .iter()
            .filter(|(_, names)| {
                names.iter().any(|name| {
                    name.starts_with(pattern) || fully_qualified_name(name).starts_with(pattern)
                })
            })
            .map(|(directory, _)| directory.clone())
            .collect()
    }
}

fn contains_project(directory: &Utf8Path) -> bool {
    let entries = match directory.read_dir_utf8() {
        Ok(entries) => entries,
        Err(error) => {
            debug!("could not read {directory}: {error}");
            return false;
        }
    };
    entries.filter_map(Result::ok).any(|entry| {
        entry
            .path()
            .extension()
            .is_some_and(|extension| PROJECT_EXTENSIONS.contains(&extension))
    })
}
