// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use clap::Parser;
use passfs::{PasswdFile, ShadowTree, SystemProvisioner};
use passfs_cli_common as cli;

mod cmd_add;
mod cmd_init;
mod cmd_list;
mod cmd_mount;
mod cmd_remove;
mod cmd_sync;

cli::main!(Opt);

pub(crate) type Tree = ShadowTree<Arc<PasswdFile>, SystemProvisioner<Arc<PasswdFile>>>;

/// The shadow tree described by the loaded configuration.
pub(crate) fn build_tree(config: &passfs::Config) -> Tree {
    let directory = Arc::new(PasswdFile::new(config.identity.passwd_file.clone()));
    let bridge = SystemProvisioner::new(Arc::clone(&directory), config.provision.clone());
    ShadowTree::new(config.vfs.root.clone(), directory, bridge)
}

/// Work with a directory tree of the system's user accounts
#[derive(Debug, Parser)]
#[clap(name = "passfs")]
pub struct Opt {
    #[clap(flatten)]
    logging: cli::Logging,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    Init(cmd_init::CmdInit),
    Sync(cmd_sync::CmdSync),
    List(cmd_list::CmdList),
    Add(cmd_add::CmdAdd),
    Remove(cmd_remove::CmdRemove),
    Mount(cmd_mount::CmdMount),
}

impl Opt {
    async fn run(&mut self, config: &passfs::Config) -> miette::Result<i32> {
        match &mut self.command {
            Command::Init(cmd) => cmd.run(config).await,
            Command::Sync(cmd) => cmd.run(config).await,
            Command::List(cmd) => cmd.run(config).await,
            Command::Add(cmd) => cmd.run(config).await,
            Command::Remove(cmd) => cmd.run(config).await,
            Command::Mount(cmd) => cmd.run(config).await,
        }
    }
}
