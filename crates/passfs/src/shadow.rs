// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

//! The passive shadow tree: a file-based mirror of the account database.
//!
//! Entries are materialized on disk under the tree root and reconciled
//! against the identity source on demand. Staleness between passes is
//! tolerated by design; entries are never deleted for accounts that
//! disappeared from the database.

use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::identity::{shell_allows_login, UserDirectory, UserRecord};
use crate::provision::{validate_username, Provisioner};
use crate::tree::{EntryFile, UserTree};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./shadow_test.rs"]
mod shadow_test;

const DIR_MODE: u32 = 0o755;

/// The record fabricated when healing an entry whose account no longer
/// resolves in the identity source.
fn fallback_record(username: &str) -> UserRecord {
    UserRecord {
        username: username.to_string(),
        uid: 1000,
        gid: 1000,
        home: format!("/home/{username}"),
        shell: "/bin/bash".to_string(),
    }
}

/// Create every missing segment of `path` with the fixed tree mode.
///
/// Walks from the first segment to the leaf so that partially created
/// hierarchies are completed rather than failed.
pub fn ensure_dir_all(path: &Path) -> Result<()> {
    let mut current = PathBuf::new();
    for component in path.components() {
        current.push(component);
        match std::fs::DirBuilder::new().mode(DIR_MODE).create(&current) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(Error::ShadowWriteError(current.clone(), err)),
        }
    }
    Ok(())
}

pub struct ShadowTree<D, P> {
    root: PathBuf,
    directory: D,
    bridge: P,
}

impl<D, P> ShadowTree<D, P>
where
    D: UserDirectory,
    P: Provisioner,
{
    pub fn new<R: Into<PathBuf>>(root: R, directory: D, bridge: P) -> Self {
        Self {
            root: root.into(),
            directory,
            bridge,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, username: &str) -> PathBuf {
        self.root.join(username)
    }

    fn write_entry_file(&self, dir: &Path, file: EntryFile, record: &UserRecord) -> Result<()> {
        let path = dir.join(file.name());
        std::fs::write(&path, file.value(record))
            .map_err(|err| Error::ShadowWriteError(path, err))
    }

    fn write_entry(&self, record: &UserRecord) -> Result<()> {
        let dir = self.user_dir(&record.username);
        ensure_dir_all(&dir)?;
        for file in EntryFile::ALL {
            self.write_entry_file(&dir, file, record)?;
        }
        Ok(())
    }

    /// Idempotently create the tree root, then run a first reconcile.
    pub fn initialize(&self) -> Result<usize> {
        ensure_dir_all(&self.root)?;
        self.reconcile()
    }

    /// Materialize an entry for every login account that has none.
    ///
    /// Returns the number of entries created. Per-entry failures are
    /// logged and do not abort the remainder of the pass. Entries whose
    /// accounts are gone from the database are left in place.
    pub fn reconcile(&self) -> Result<usize> {
        let mut created = 0;
        for record in self.directory.list_all()? {
            if !record.is_login_allowed() {
                continue;
            }
            if self.user_dir(&record.username).is_dir() {
                continue;
            }
            match self.write_entry(&record) {
                Ok(()) => created += 1,
                Err(err) => {
                    tracing::warn!(username = %record.username, ?err, "failed to materialize entry");
                }
            }
        }
        Ok(created)
    }

    /// Re-establish completeness of every existing entry.
    ///
    /// An entry is complete when all of `id`, `home` and `shell` exist.
    /// If the username still resolves, exactly the missing files are
    /// recreated from the current record. If it does not, all three are
    /// written from a fabricated default and account creation is
    /// attempted best-effort through the bridge.
    pub async fn heal(&self) -> Result<()> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|err| Error::ShadowReadError(self.root.clone(), err))?;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(?err, root = ?self.root, "unreadable tree entry");
                    continue;
                }
            };
            let name = entry.file_name();
            let Some(username) = name.to_str() else {
                continue;
            };
            if username.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            if let Err(err) = self.heal_entry(username).await {
                tracing::warn!(username, ?err, "failed to heal entry");
            }
        }
        Ok(())
    }

    async fn heal_entry(&self, username: &str) -> Result<()> {
        let dir = self.user_dir(username);
        let missing: Vec<EntryFile> = EntryFile::ALL
            .into_iter()
            .filter(|file| !dir.join(file.name()).exists())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        match self.directory.lookup(username)? {
            Some(record) => {
                // recreate only what is missing, leaving intact files
                // (and their timestamps) untouched
                for file in missing {
                    self.write_entry_file(&dir, file, &record)?;
                }
            }
            None => {
                let record = fallback_record(username);
                for file in EntryFile::ALL {
                    self.write_entry_file(&dir, file, &record)?;
                }
                if let Err(err) = self.bridge.create_account(username).await {
                    tracing::warn!(username, ?err, "best-effort account creation failed");
                }
            }
        }
        Ok(())
    }

    /// Provision a new account and materialize its entry.
    pub async fn create_user_dir(&self, username: &str) -> Result<UserRecord> {
        validate_username(username)?;
        let record = self.bridge.create_account(username).await?;
        self.write_entry(&record)?;
        Ok(record)
    }

    /// De-provision an account and remove its entry.
    ///
    /// On bridge failure the entry is left intact.
    pub async fn remove_user_dir(&self, username: &str) -> Result<()> {
        validate_username(username)?;
        let dir = self.user_dir(username);
        if !dir.is_dir() {
            return Err(Error::UserNotFound(username.to_string()));
        }
        self.bridge.delete_account(username).await?;
        std::fs::remove_dir_all(&dir).map_err(|err| Error::ShadowWriteError(dir, err))
    }

    /// Names of the entries currently on disk, sorted.
    ///
    /// Purely reflects on-disk state, which may lag the account
    /// database until the next reconcile or heal pass.
    pub fn list_users(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|err| Error::ShadowReadError(self.root.clone(), err))?;
        let mut users = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| Error::ShadowReadError(self.root.clone(), err))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    users.push(name.to_string());
                }
            }
        }
        users.sort();
        Ok(users)
    }

    /// Re-apply the login predicate to the persisted shell file.
    pub fn is_login_allowed(&self, username: &str) -> Result<bool> {
        let path = self.user_dir(username).join(EntryFile::Shell.name());
        let shell = match std::fs::read_to_string(&path) {
            Ok(shell) => shell,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::UserNotFound(username.to_string()));
            }
            Err(err) => return Err(Error::ShadowReadError(path, err)),
        };
        // tolerate entries written before newline handling was unified
        Ok(shell_allows_login(shell.trim_end()))
    }
}

#[async_trait]
impl<D, P> UserTree for ShadowTree<D, P>
where
    D: UserDirectory,
    P: Provisioner,
{
    fn list_users(&self) -> Result<Vec<String>> {
        ShadowTree::list_users(self)
    }

    fn lookup(&self, username: &str) -> Result<Option<UserRecord>> {
        self.directory.lookup(username)
    }

    async fn create_user_dir(&self, username: &str) -> Result<UserRecord> {
        ShadowTree::create_user_dir(self, username).await
    }

    async fn remove_user_dir(&self, username: &str) -> Result<()> {
        ShadowTree::remove_user_dir(self, username).await
    }
}
