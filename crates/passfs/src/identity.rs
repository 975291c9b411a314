// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

//! Read-only access to the system account database.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./identity_test.rs"]
mod identity_test;

/// A single account record, snapshotted at query time.
///
/// Records are never cached by this crate; every query re-reads
/// the identity source.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserRecord {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
}

impl UserRecord {
    /// True if this account is considered a login account.
    ///
    /// The check is a bare textual suffix test on the shell path, which
    /// matches `/bin/bash` and `/bin/sh` but also any csh-family shell.
    pub fn is_login_allowed(&self) -> bool {
        shell_allows_login(&self.shell)
    }
}

/// The visibility gate applied to accounts in both tree renditions.
pub fn shell_allows_login(shell: &str) -> bool {
    shell.ends_with("sh")
}

/// Read-only access to an enumerable account database.
///
/// Absence of a user is a normal `Ok(None)` result, never an error.
pub trait UserDirectory: Send + Sync {
    /// Find the record for an exact username match.
    fn lookup(&self, username: &str) -> Result<Option<UserRecord>>;

    /// Enumerate the full account database, in database order.
    ///
    /// No filtering is applied; callers decide which records are
    /// login accounts via [`UserRecord::is_login_allowed`].
    fn list_all(&self) -> Result<Vec<UserRecord>>;
}

impl<T: UserDirectory + ?Sized> UserDirectory for std::sync::Arc<T> {
    fn lookup(&self, username: &str) -> Result<Option<UserRecord>> {
        (**self).lookup(username)
    }

    fn list_all(&self) -> Result<Vec<UserRecord>> {
        (**self).list_all()
    }
}

/// An account database backed by a passwd-format file.
#[derive(Clone, Debug)]
pub struct PasswdFile {
    path: PathBuf,
}

impl PasswdFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .map_err(|err| Error::IdentityReadError(self.path.clone(), err))
    }
}

impl Default for PasswdFile {
    fn default() -> Self {
        Self::new("/etc/passwd")
    }
}

impl UserDirectory for PasswdFile {
    fn lookup(&self, username: &str) -> Result<Option<UserRecord>> {
        let content = self.read()?;
        for line in content.lines() {
            match parse_passwd_line(line) {
                Some(record) if record.username == username => return Ok(Some(record)),
                _ => continue,
            }
        }
        Ok(None)
    }

    fn list_all(&self) -> Result<Vec<UserRecord>> {
        let content = self.read()?;
        let mut records = Vec::new();
        for line in content.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_passwd_line(line) {
                Some(record) => records.push(record),
                None => {
                    tracing::warn!(?line, path = ?self.path, "skipping malformed passwd line");
                }
            }
        }
        Ok(records)
    }
}

fn parse_passwd_line(line: &str) -> Option<UserRecord> {
    // name:passwd:uid:gid:gecos:home:shell
    let mut fields = line.split(':');
    let username = fields.next()?;
    let _password = fields.next()?;
    let uid = fields.next()?.parse().ok()?;
    let gid = fields.next()?.parse().ok()?;
    let _gecos = fields.next()?;
    let home = fields.next()?;
    let shell = fields.next()?;
    if username.is_empty() {
        return None;
    }
    Some(UserRecord {
        username: username.to_string(),
        uid,
        gid,
        home: home.to_string(),
        shell: shell.to_string(),
    })
}

/// An in-memory account database, for tests and embedded use.
#[derive(Clone, Debug, Default)]
pub struct MemoryDirectory {
    records: BTreeMap<String, UserRecord>,
}

impl MemoryDirectory {
    pub fn new<I: IntoIterator<Item = UserRecord>>(records: I) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|r| (r.username.clone(), r))
                .collect(),
        }
    }

    pub fn insert(&mut self, record: UserRecord) {
        self.records.insert(record.username.clone(), record);
    }

    pub fn remove(&mut self, username: &str) -> Option<UserRecord> {
        self.records.remove(username)
    }
}

// Allows a directory shared with a test provisioner to observe
// accounts created after the tree was constructed.
impl UserDirectory for std::sync::RwLock<MemoryDirectory> {
    fn lookup(&self, username: &str) -> Result<Option<UserRecord>> {
        self.read()
            .map_err(|err| Error::String(err.to_string()))?
            .lookup(username)
    }

    fn list_all(&self) -> Result<Vec<UserRecord>> {
        self.read()
            .map_err(|err| Error::String(err.to_string()))?
            .list_all()
    }
}

impl UserDirectory for MemoryDirectory {
    fn lookup(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self.records.get(username).cloned())
    }

    fn list_all(&self) -> Result<Vec<UserRecord>> {
        Ok(self.records.values().cloned().collect())
    }
}
