// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

//! Launching and supervising the mount worker process.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// When set, the mount worker inherits stderr instead of logging
/// to its own sinks, which is valuable when debugging mount issues.
pub const PASSFS_FUSE_FOREGROUND_LOGGING_VAR: &str = "PASSFS_FUSE_FOREGROUND_LOGGING";

/// Find the `passfs-fuse` worker binary.
///
/// Prefers one installed alongside the current executable, falling
/// back to the environment's PATH.
pub fn which_fuse_worker() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(sibling) = exe.parent().map(|dir| dir.join("passfs-fuse")) {
            if is_executable(&sibling) {
                return Some(sibling);
            }
        }
    }
    let path = std::env::var("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join("passfs-fuse");
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable(location: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match location.metadata() {
        Ok(meta) => meta.is_file() && (meta.permissions().mode() & 0o111 != 0),
        Err(_) => false,
    }
}

/// Spawn a detached mount worker serving the given mountpoint.
///
/// The worker creates its FUSE session and then continues in the
/// background, reparented to pid 1, so the caller's terminal is
/// released as soon as the mount is established. Its diagnostics go
/// to its own log sinks and never interleave with the caller's stderr.
pub fn spawn_fuse_worker<P: AsRef<Path>>(
    mountpoint: P,
    extra_args: &[String],
) -> Result<tokio::process::Child> {
    let Some(exe) = which_fuse_worker() else {
        return Err(Error::MissingBinary("passfs-fuse"));
    };

    let mut cmd = tokio::process::Command::new(exe);
    cmd.args(extra_args);
    cmd.arg(mountpoint.as_ref());
    // fully detached from any controlling terminal; otherwise mounting
    // under output-capturing circumstances can hang the caller forever
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::null());
    if std::env::var(PASSFS_FUSE_FOREGROUND_LOGGING_VAR).is_err() {
        cmd.stderr(std::process::Stdio::null());
    }

    unsafe {
        // reparent to pid 1 so the worker survives the calling shell
        // and cannot be found by walking our process tree
        cmd.pre_exec(|| match nix::unistd::daemon(false, true) {
            Ok(_pid) => Ok(()),
            Err(err) => Err(std::io::Error::from_raw_os_error(err as i32)),
        });
    }

    cmd.spawn().map_err(|err| {
        passfs::Error::ProcessSpawnError {
            tool: "passfs-fuse".to_string(),
            source: err,
        }
        .into()
    })
}
