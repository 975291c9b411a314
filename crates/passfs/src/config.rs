// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::Result;

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

static DEFAULT_VFS_ROOT: &str = "/opt/users";
static DEFAULT_PASSWD_FILE: &str = "/etc/passwd";

/// Where the user tree lives (or is mounted).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Vfs {
    pub root: PathBuf,
}

impl Default for Vfs {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_VFS_ROOT),
        }
    }
}

/// The account database consumed read-only by the tree.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub passwd_file: PathBuf,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            passwd_file: PathBuf::from(DEFAULT_PASSWD_FILE),
        }
    }
}

/// External tools used for account create/delete.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Provision {
    pub create_tool: String,
    pub delete_tool: String,
    /// Upper bound on any spawned account tool, in seconds.
    pub timeout_seconds: u64,
}

impl Default for Provision {
    fn default() -> Self {
        Self {
            create_tool: "adduser".to_string(),
            delete_tool: "userdel".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl Provision {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vfs: Vfs,
    pub identity: Identity,
    pub provision: Provision,
}

impl Config {
    /// Load the configuration from a toml string, used mostly for testing.
    pub fn load_string<S: AsRef<str>>(conf: S) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(
                conf.as_ref(),
                config::FileFormat::Toml,
            ))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

/// Load the current configuration from disk and the environment.
///
/// Sources, in increasing order of precedence: `/etc/passfs.toml`,
/// `$XDG_CONFIG_HOME/passfs/config.toml`, `PASSFS_*` environment variables.
pub fn get_config() -> Result<Config> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name("/etc/passfs").required(false));
    if let Some(user_config) = dirs::config_dir().map(|d| d.join("passfs/config")) {
        builder = builder.add_source(
            config::File::with_name(&user_config.to_string_lossy()).required(false),
        );
    }
    let config = builder
        .add_source(config::Environment::with_prefix("PASSFS").separator("__"))
        .build()?;
    Ok(config.try_deserialize()?)
}
