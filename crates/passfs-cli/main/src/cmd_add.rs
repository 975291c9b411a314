// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use miette::Result;

/// Create a new user account and its tree entry
#[derive(Debug, Args)]
pub struct CmdAdd {
    /// The name of the account to create
    username: String,
}

impl CmdAdd {
    pub async fn run(&mut self, config: &passfs::Config) -> Result<i32> {
        let tree = crate::build_tree(config);
        let record = tree.create_user_dir(&self.username).await?;
        tracing::info!(
            username = %record.username,
            uid = record.uid,
            home = %record.home,
            "account created"
        );
        Ok(0)
    }
}
