// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use miette::Result;

/// Create the account tree root and populate it
///
/// Does nothing new when run over an existing tree
#[derive(Debug, Args)]
pub struct CmdInit {}

impl CmdInit {
    pub async fn run(&mut self, config: &passfs::Config) -> Result<i32> {
        let tree = crate::build_tree(config);
        let created = tree.initialize()?;
        tracing::info!(created, root = ?tree.root(), "account tree initialized");
        Ok(0)
    }
}
