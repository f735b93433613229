// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::StopError;
use std::process::Stdio;

// This is a no-op on Windows: the process tree is killed with taskkill instead.
pub(super) fn set_process_group(_cmd: &mut std::process::Command) {}

pub(super) async fn kill_process_tree(pid: u32) -> Result<(), StopError> {
    let status = tokio::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/T", "/F"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|error| StopError::new(pid, error))?;

    if status.success() {
        Ok(())
    } else {
        Err(StopError::new(
            pid,
            std::io::Error::other(format!("taskkill exited with {status}")),
        ))
    }
}
