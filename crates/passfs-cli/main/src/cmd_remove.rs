// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use miette::Result;

/// Delete a user account and its tree entry
#[derive(Debug, Args)]
pub struct CmdRemove {
    /// The name of the account to delete
    username: String,
}

impl CmdRemove {
    pub async fn run(&mut self, config: &passfs::Config) -> Result<i32> {
        let tree = crate::build_tree(config);
        tree.remove_user_dir(&self.username).await?;
        tracing::info!(username = %self.username, "account removed");
        Ok(0)
    }
}
