// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use miette::Result;

/// Reconcile the account tree with the account database
#[derive(Debug, Args)]
pub struct CmdSync {
    /// Also repair user directories with missing entry files
    #[clap(long)]
    heal: bool,

    /// Keep running, reconciling on the given interval in seconds
    #[clap(long, name = "SECONDS")]
    watch: Option<u64>,
}

impl CmdSync {
    pub async fn run(&mut self, config: &passfs::Config) -> Result<i32> {
        let tree = crate::build_tree(config);
        loop {
            let created = tree.reconcile()?;
            if created > 0 {
                tracing::info!(created, "new user directories created");
            }
            if self.heal {
                tree.heal().await?;
            }
            let Some(seconds) = self.watch else {
                break;
            };
            tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
        }
        Ok(0)
    }
}
