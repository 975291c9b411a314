// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use miette::Result;

/// List the user directories present in the account tree
#[derive(Debug, Args)]
pub struct CmdList {}

impl CmdList {
    pub async fn run(&mut self, config: &passfs::Config) -> Result<i32> {
        let tree = crate::build_tree(config);
        for username in tree.list_users()? {
            println!("{username}");
        }
        Ok(0)
    }
}
