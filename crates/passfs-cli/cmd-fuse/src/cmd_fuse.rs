// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use clap::Parser;
use fuser::MountOption;
use miette::{bail, miette, Context, IntoDiagnostic, Result};
use passfs::{PasswdFile, SystemProvisioner};
use passfs_cli_common as cli;
use passfs_vfs::{Config, Session};
use tokio::signal::unix::{signal, SignalKind};

fn main() {
    // because this function exits right away it does not
    // properly handle destruction of data, so we put the actual
    // logic into a separate function/scope
    std::process::exit(main2())
}
fn main2() -> i32 {
    let mut opt = CmdFuse::parse();
    opt.logging.log_file.get_or_insert("/tmp/passfs-fuse.log".into());
    opt.logging.syslog = true;
    opt.logging.configure();

    let config = match passfs::get_config() {
        Err(err) => {
            tracing::error!(err = ?err, "failed to load config");
            return 1;
        }
        Ok(config) => config,
    };
    let result = opt.run(&config);

    passfs_cli_common::handle_result!(result)
}

/// Serve the account tree over FUSE
#[derive(Debug, Parser)]
#[clap(name = "passfs-fuse")]
pub struct CmdFuse {
    #[clap(flatten)]
    logging: cli::Logging,

    /// Do not daemonize the filesystem, run it in the foreground instead
    #[clap(long, short)]
    foreground: bool,

    /// Do not disconnect the filesystem logs from stderr
    ///
    /// Although the filesystem will still daemonize, the logs will
    /// still appear in the stderr of the calling process/shell
    #[clap(long, short, env = "PASSFS_FUSE_LOG_FOREGROUND")]
    log_foreground: bool,

    /// Options for the mount in the form opt1,opt2=value
    ///
    /// In addition to all existing fuse mount options, the following custom
    /// options are also supported:
    ///
    ///  uid    - the user id that should own the tree root, defaults to
    ///           the effective user id of the caller. Only allowed when running
    ///           as root/sudo.
    ///  gid    - the group id that should own the tree root, defaults to
    ///           the effective group id of the caller. Only allowed when running
    ///           as root/sudo.
    #[clap(long, short, value_delimiter = ',')]
    options: Vec<String>,

    /// The location where to mount the account tree
    ///
    /// Defaults to the configured tree root.
    mountpoint: Option<std::path::PathBuf>,
}

impl CmdFuse {
    pub fn run(&mut self, config: &passfs::Config) -> Result<i32> {
        let calling_uid = nix::unistd::geteuid();
        let calling_gid = nix::unistd::getegid();

        // these will cause conflicts later on if their counterpart is also provided
        let required_opts = vec![
            MountOption::NoDev,
            MountOption::NoSuid,
            MountOption::FSName("passfs".into()),
        ];
        let mut opts = Config {
            uid: calling_uid,
            gid: calling_gid,
            mount_options: required_opts.into_iter().collect(),
        };

        let parsed_opts = parse_options_from_args(&self.options);
        for option in parsed_opts {
            match option {
                MountOption::CUSTOM(opt) => match opt.split_once('=') {
                    Some(("uid", num)) if calling_uid.is_root() => {
                        opts.uid =
                            num.parse::<u32>().map(nix::unistd::Uid::from_raw).map_err(
                                |err| {
                                    miette!("Invalid parameter value for uid={num}: {err}")
                                },
                            )?
                    }
                    Some(("gid", num)) if calling_uid.is_root() => {
                        opts.gid =
                            num.parse::<u32>().map(nix::unistd::Gid::from_raw).map_err(
                                |err| {
                                    miette!("Invalid parameter value for gid={num}: {err}")
                                },
                            )?
                    }
                    Some(("uid", _)) | Some(("gid", _)) => {
                        bail!("Must be root to launch with alternate uid/gid");
                    }
                    _ => bail!("Unsupported mount option, or missing value: {opt}"),
                },
                MountOption::RO => {
                    bail!("ro mode is not supported, mkdir/rmdir must reach the tree");
                }
                _ => {
                    opts.mount_options.insert(option);
                }
            }
        }

        tracing::debug!("FUSE Config: {opts:#?}");

        let mountpoint = self
            .mountpoint
            .clone()
            .unwrap_or_else(|| config.vfs.root.clone());
        passfs::shadow::ensure_dir_all(&mountpoint)
            .wrap_err("Failed to create mountpoint")?;
        let mountpoint = mountpoint
            .canonicalize()
            .into_diagnostic()
            .wrap_err("Invalid mount point")?;

        if !calling_uid.is_root() {
            // unprivileged callers must have write access to the directory
            // that they are trying to mount over
            nix::unistd::access(&mountpoint, nix::unistd::AccessFlags::W_OK)
                .into_diagnostic()
                .wrap_err("Must have write access to mountpoint")?;
        }

        let directory = Arc::new(PasswdFile::new(config.identity.passwd_file.clone()));
        let bridge = SystemProvisioner::new(Arc::clone(&directory), config.provision.clone());

        tracing::debug!("Establishing fuse session...");
        let mount_opts = opts.mount_options.iter().cloned().collect::<Vec<_>>();
        let mut session = fuser::Session::new(
            Session::new(directory, bridge, opts),
            &mountpoint,
            &mount_opts,
        )
        .into_diagnostic()
        .wrap_err("Failed to create a FUSE session")?;

        if !self.foreground {
            tracing::debug!("Moving into background...");
            // We cannot daemonize until the session is established above,
            // otherwise initial use of the filesystem may not show any mount
            // at all.
            nix::unistd::daemon(false, self.log_foreground).into_diagnostic()?;
        }

        // We also cannot go multi-thread until the daemonization process above
        // is complete, otherwise we can end up with deadlocks.
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .into_diagnostic()
            .wrap_err("Failed to establish runtime")?;

        let result = rt.block_on(async move {
            let mut interrupt = signal(SignalKind::interrupt())
                .into_diagnostic()
                .wrap_err("interrupt signal handler")?;
            let mut quit = signal(SignalKind::quit())
                .into_diagnostic()
                .wrap_err("quit signal handler")?;
            let mut terminate = signal(SignalKind::terminate())
                .into_diagnostic()
                .wrap_err("terminate signal handler")?;

            tracing::info!("Starting FUSE filesystem");
            // Although the filesystem could run in the current thread, we prefer to
            // create a blocking future that can move into tokio and be managed/scheduled
            // as desired, otherwise this thread will block and may affect the runtime
            // operation unpredictably
            let fut = tokio::task::spawn_blocking(move || session.run());
            tokio::select! {
                res = fut => {
                    tracing::info!("Filesystem shutting down");
                    res.into_diagnostic().wrap_err("FUSE session failed")
                }
                // we explicitly catch any signal related to interruption
                // and will act by shutting down the filesystem early
                _ = terminate.recv() => Err(miette!("Terminate signal received, filesystem shutting down")),
                _ = interrupt.recv() => Err(miette!("Interrupt signal received, filesystem shutting down")),
                _ = quit.recv() => Err(miette!("Quit signal received, filesystem shutting down")),
            }
        });

        // the session may have spawned long running tasks that are waiting
        // for events which will never come, don't block forever when the
        // runtime is dropped
        rt.shutdown_timeout(std::time::Duration::from_secs(2));
        result?.into_diagnostic()?;
        Ok(0)
    }
}

/// Copies from the private [`fuser::MountOption::from_str`]
fn parse_options_from_args(args: &[String]) -> Vec<MountOption> {
    args.iter()
        .map(|s| match s.as_str() {
            "auto_unmount" => MountOption::AutoUnmount,
            "allow_other" => MountOption::AllowOther,
            "allow_root" => MountOption::AllowRoot,
            "default_permissions" => MountOption::DefaultPermissions,
            "dev" => MountOption::Dev,
            "nodev" => MountOption::NoDev,
            "suid" => MountOption::Suid,
            "nosuid" => MountOption::NoSuid,
            "ro" => MountOption::RO,
            "rw" => MountOption::RW,
            "exec" => MountOption::Exec,
            "noexec" => MountOption::NoExec,
            "atime" => MountOption::Atime,
            "noatime" => MountOption::NoAtime,
            "dirsync" => MountOption::DirSync,
            "sync" => MountOption::Sync,
            "async" => MountOption::Async,
            x if x.starts_with("fsname=") => MountOption::FSName(x[7..].into()),
            x if x.starts_with("subtype=") => MountOption::Subtype(x[8..].into()),
            x => MountOption::CUSTOM(x.into()),
        })
        .collect()
}
