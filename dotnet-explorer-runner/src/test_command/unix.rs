// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::StopError;
use std::os::unix::process::CommandExt;

/// Puts the child in its own process group, so that killing the group also kills the test
/// host and any other processes the build tool starts.
pub(super) fn set_process_group(cmd: &mut std::process::Command) {
    cmd.process_group(0);
}

pub(super) async fn kill_process_tree(pid: u32) -> Result<(), StopError> {
    let pgid = libc::pid_t::try_from(pid).map_err(|_| {
        StopError::new(
            pid,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"),
        )
    })?;

    // SAFETY: kill has no memory safety requirements. A negative pid addresses the process
    // group led by the child.
    let res = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if res == 0 {
        return Ok(());
    }

    let error = std::io::Error::last_os_error();
    if error.raw_os_error() == Some(libc::ESRCH) {
        // The group already exited.
        Ok(())
    } else {
        Err(StopError::new(pid, error))
    }
}
