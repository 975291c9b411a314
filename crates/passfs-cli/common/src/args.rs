// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use tracing_subscriber::prelude::*;

const PASSFS_LOG: &str = "PASSFS_LOG";

/// Command line flags for configuring log output
#[derive(Debug, Clone, clap::Args)]
pub struct Logging {
    /// Make output more verbose, can be specified more than once
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Also write all logs to the provided file
    #[clap(long, global = true, env = "PASSFS_LOG_FILE")]
    pub log_file: Option<std::path::PathBuf>,

    /// Forward logs to the system syslog daemon
    ///
    /// Not an exposed flag, but enabled by commands which run
    /// detached from any terminal.
    #[clap(skip)]
    pub syslog: bool,
}

impl Logging {
    fn filter_config(&self) -> String {
        let mut config = match self.verbose {
            0 => {
                if let Ok(existing) = std::env::var(PASSFS_LOG) {
                    existing
                } else {
                    "passfs=info,warn".to_string()
                }
            }
            1 => "passfs=debug,info".to_string(),
            2 => "passfs=trace,info".to_string(),
            3 => "passfs=trace,debug".to_string(),
            _ => "trace".to_string(),
        };
        // child processes spawned by this command inherit the same level
        std::env::set_var(PASSFS_LOG, &config);
        if let Ok(overrides) = std::env::var("RUST_LOG") {
            config.push(',');
            config.push_str(&overrides);
        }
        config
    }

    /// Install the global tracing subscriber based on these flags.
    pub fn configure(&self) {
        let env_filter = tracing_subscriber::filter::EnvFilter::from(self.filter_config());
        let with_target = self.verbose > 2;

        let stderr_log = (!self.syslog).then(|| {
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_target(with_target)
                .with_writer(std::io::stderr)
        });
        let syslog_log = self.syslog.then(|| {
            let identity = std::ffi::CStr::from_bytes_with_nul(b"passfs\0")
                .expect("identity value is valid CStr");
            let (options, facility) = Default::default();
            tracing_subscriber::fmt::layer().without_time().with_writer(
                syslog_tracing::Syslog::new(identity, options, facility)
                    .expect("initialize Syslog"),
            )
        });
        let file_log = self.log_file.as_ref().map(|filename| {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)
                .expect("open log file for writing");
            tracing_subscriber::fmt::layer()
                .with_target(with_target)
                .with_writer(std::sync::Arc::new(file))
        });

        let sub = tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_log)
            .with(syslog_log)
            .with(file_log);
        tracing::subscriber::set_global_default(sub).expect("set tracing subscriber");
    }
}

#[macro_export]
macro_rules! main {
    ($cmd:ident) => {
        fn main() {
            // because this function exits right away it does not
            // properly handle destruction of data, so we put the actual
            // logic into a separate function/scope
            std::process::exit(main2())
        }
        fn main2() -> i32 {
            let mut opt = $cmd::parse();
            let config = $crate::configure!(opt);

            let rt = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Err(err) => {
                    tracing::error!("Failed to establish runtime: {err:?}");
                    return 1;
                }
                Ok(rt) => rt,
            };
            let result = rt.block_on(opt.run(&config));
            // long running tasks may be waiting for signals or events
            // which will never come, don't block forever when the
            // runtime is dropped
            rt.shutdown_timeout(std::time::Duration::from_millis(250));

            $crate::handle_result!(result)
        }
    };
}

#[macro_export(local_inner_macros)]
macro_rules! configure {
    ($opt:ident) => {{
        $opt.logging.configure();

        match passfs::get_config() {
            Err(err) => {
                tracing::error!(err = ?err, "failed to load config");
                return 1;
            }
            Ok(config) => config,
        }
    }};
}

#[macro_export(local_inner_macros)]
macro_rules! handle_result {
    ($result:ident) => {{
        match $result {
            Err(err) => {
                tracing::error!("{err}");
                1
            }
            Ok(code) => code,
        }
    }};
}
