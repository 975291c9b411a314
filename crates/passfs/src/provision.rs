// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

//! Account create/delete through the platform account tools.
//!
//! This is the only component allowed to mutate the account database;
//! both tree renditions route every write-intent through it.

use std::process::Stdio;

use async_trait::async_trait;

use crate::config::Provision;
use crate::identity::{UserDirectory, UserRecord};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./provision_test.rs"]
mod provision_test;

/// Reject names that cannot be a single path segment.
///
/// Applied before any external tool is invoked.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.contains('/') {
        return Err(Error::InvalidUsername(username.to_string()));
    }
    Ok(())
}

/// Performs account create/delete against the identity source.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create the named account, returning its fresh record.
    ///
    /// A pre-existing account is reported as a conflict without
    /// invoking any external tool.
    async fn create_account(&self, username: &str) -> Result<UserRecord>;

    /// Delete the named account and its home directory.
    async fn delete_account(&self, username: &str) -> Result<()>;
}

#[async_trait]
impl<T: Provisioner + ?Sized> Provisioner for std::sync::Arc<T> {
    async fn create_account(&self, username: &str) -> Result<UserRecord> {
        (**self).create_account(username).await
    }

    async fn delete_account(&self, username: &str) -> Result<()> {
        (**self).delete_account(username).await
    }
}

/// Provisioner backed by the platform account-management tools.
///
/// Both calls block on the spawned child for up to the configured
/// timeout; there is no rollback on partial failure, the tools are
/// treated as best-effort.
pub struct SystemProvisioner<D> {
    directory: D,
    options: Provision,
}

impl<D: UserDirectory> SystemProvisioner<D> {
    pub fn new(directory: D, options: Provision) -> Self {
        Self { directory, options }
    }

    async fn run_tool(&self, tool: &str, args: &[&str]) -> Result<()> {
        let mut child = tokio::process::Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| Error::ProcessSpawnError {
                tool: tool.to_string(),
                source: err,
            })?;

        let status = match tokio::time::timeout(self.options.timeout(), child.wait()).await {
            Ok(waited) => waited.map_err(|err| Error::ProcessSpawnError {
                tool: tool.to_string(),
                source: err,
            })?,
            Err(_elapsed) => {
                if let Err(err) = child.start_kill() {
                    tracing::warn!(?err, tool, "failed to kill timed-out account tool");
                }
                return Err(Error::ProcessTimeout {
                    tool: tool.to_string(),
                    seconds: self.options.timeout_seconds,
                });
            }
        };

        // exit code zero is the only recognized success signal
        if status.success() {
            return Ok(());
        }
        Err(Error::ProcessFailed {
            tool: tool.to_string(),
            code: status.code().unwrap_or(-1),
        })
    }
}

#[async_trait]
impl<D: UserDirectory> Provisioner for SystemProvisioner<D> {
    async fn create_account(&self, username: &str) -> Result<UserRecord> {
        validate_username(username)?;
        if self.directory.lookup(username)?.is_some() {
            return Err(Error::AccountExists(username.to_string()));
        }

        let tool = self.options.create_tool.clone();
        tracing::debug!(username, %tool, "creating account");
        self.run_tool(&tool, &["--disabled-password", "--gecos", "", username])
            .await?;

        match self.directory.lookup(username)? {
            Some(record) => Ok(record),
            None => Err(Error::String(format!(
                "{tool} reported success but {username} is still absent"
            ))),
        }
    }

    async fn delete_account(&self, username: &str) -> Result<()> {
        validate_username(username)?;
        if self.directory.lookup(username)?.is_none() {
            return Err(Error::UserNotFound(username.to_string()));
        }

        let tool = self.options.delete_tool.clone();
        tracing::debug!(username, %tool, "deleting account");
        self.run_tool(&tool, &["--remove", username]).await
    }
}
