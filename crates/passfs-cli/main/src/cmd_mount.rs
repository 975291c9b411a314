// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use miette::{IntoDiagnostic, Result};
use passfs_vfs::Error;

/// Serve the live account tree over FUSE
///
/// By default the filesystem runs as a detached worker process and
/// this command returns as soon as the mount is established.
#[derive(Debug, Args)]
pub struct CmdMount {
    /// Run the filesystem attached to the current terminal
    #[clap(long, short)]
    foreground: bool,

    /// Mount options passed through to the filesystem worker
    #[clap(long, short, value_delimiter = ',')]
    options: Vec<String>,

    /// The location to mount, defaults to the configured tree root
    mountpoint: Option<std::path::PathBuf>,
}

impl CmdMount {
    pub async fn run(&mut self, config: &passfs::Config) -> Result<i32> {
        let mountpoint = self
            .mountpoint
            .clone()
            .unwrap_or_else(|| config.vfs.root.clone());
        let mut extra_args = Vec::new();
        for option in &self.options {
            extra_args.push("--options".to_string());
            extra_args.push(option.clone());
        }

        if self.foreground {
            let Some(exe) = passfs_vfs::which_fuse_worker() else {
                return Err(Error::MissingBinary("passfs-fuse").into());
            };
            let status = tokio::process::Command::new(exe)
                .arg("--foreground")
                .arg("--log-foreground")
                .args(extra_args)
                .arg(&mountpoint)
                .status()
                .await
                .into_diagnostic()?;
            return Ok(status.code().unwrap_or(1));
        }

        let child = passfs_vfs::spawn_fuse_worker(&mountpoint, &extra_args)?;
        tracing::info!(pid = child.id(), ?mountpoint, "filesystem worker launched");
        Ok(0)
    }
}
