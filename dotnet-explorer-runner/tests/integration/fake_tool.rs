// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A scripted stand-in for the build tool.
//!
//! Each project directory can hold marker files that change the script's behavior:
//!
//! - `broken`: `build` fails.
//! - `slow-discovery`: `test --list-tests` sleeps for a long time, after touching `discovering`.
//! - `slow`: `test` sleeps for a long time, after touching `started`.
//! - `results.trx`: copied to the `LogFileName=` path by `test`.
//!
//! With `VSTEST_HOST_DEBUG=1`, `test` prints the attach marker and then waits for a `continued`
//! file to appear.

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Context, Result};
use std::{fs, os::unix::fs::PermissionsExt};

const SCRIPT: &str = r#"#!/bin/sh
case "$1" in
  build)
    if [ -f broken ]; then
      echo "Program.cs(3,1): error CS1002: ; expected" >&2
      exit 1
    fi
    echo "Build succeeded."
    ;;
  test)
    shift
    if [ "$1" = "--list-tests" ]; then
      if [ -f slow-discovery ]; then
        touch discovering
        sleep 30
      fi
      echo "The following Tests are available:"
      echo "    N.$(basename "$PWD").Works"
      exit 0
    fi
    printf '%s\n' "$@" > last-args.txt
    if [ "$VSTEST_HOST_DEBUG" = "1" ]; then
      echo "Host debugging is enabled. Please attach debugger to testhost process to continue."
      echo "Process Id: 4242, Name: testhost"
      i=0
      while [ ! -f continued ] && [ "$i" -lt 100 ]; do
        sleep 0.1
        i=$((i + 1))
      done
    fi
    if [ -f slow ]; then
      touch started
      sleep 30
    fi
    for arg in "$@"; do
      case "$arg" in
        "trx;LogFileName="*)
          if [ -f results.trx ]; then
            cp results.trx "${arg#trx;LogFileName=}"
          fi
          ;;
      esac
    done
    exit 1
    ;;
  *)
    echo "unknown command $1" >&2
    exit 2
    ;;
esac
"#;

pub(crate) struct FakeWorkspace {
    root: Utf8TempDir,
    tool: Utf8PathBuf,
}

impl FakeWorkspace {
    pub(crate) fn new() -> Result<Self> {
        let root = camino_tempfile::Builder::new()
            .prefix("dotnet-explorer-it-")
            .tempdir()
            .wrap_err("failed to create temporary directory")?;
        let tool = root.path().join("fake-dotnet");
        fs::write(&tool, SCRIPT)?;
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755))?;
        Ok(Self { root, tool })
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        self.root.path()
    }

    pub(crate) fn tool(&self) -> &str {
        self.tool.as_str()
    }

    /// Creates a project directory that reports `report` when tested.
    pub(crate) fn add_project(&self, name: &str, report: Option<&str>) -> Result<Utf8PathBuf> {
        let dir = self.root.path().join(name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(format!("{name}.csproj")), "<Project Sdk=\"Microsoft.NET.Sdk\" />")?;
        if let Some(report) = report {
            fs::write(dir.join("results.trx"), report)?;
        }
        Ok(dir)
    }

    pub(crate) fn mark(&self, project: &Utf8Path, marker: &str) -> Result<()> {
        fs::write(project.join(marker), "")?;
        Ok(())
    }
}

/// Builds a minimal TRX report with one result per `(class, method, outcome)`.
pub(crate) fn trx(results: &[(&str, &str, &str)]) -> String {
    let mut unit_results = String::new();
    let mut definitions = String::new();
    for (idx, (class, method, outcome)) in results.iter().enumerate() {
        unit_results.push_str(&format!(
            r#"<UnitTestResult testId="id-{idx}" testName="{method}" duration="00:00:00.0100000" outcome="{outcome}" />"#
        ));
        definitions.push_str(&format!(
            r#"<UnitTest id="id-{idx}" name="{method}"><TestMethod className="{class}" name="{method}" /></UnitTest>"#
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<TestRun xmlns="http://microsoft.com/schemas/VisualStudio/TeamTest/2010">
  <Results>{unit_results}</Results>
  <TestDefinitions>{definitions}</TestDefinitions>
</TestRun>
"#
    )
}
