// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::identity::UserRecord;
use crate::Result;

/// The three files presented inside every user directory.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EntryFile {
    Id,
    Home,
    Shell,
}

impl EntryFile {
    pub const ALL: [EntryFile; 3] = [EntryFile::Id, EntryFile::Home, EntryFile::Shell];

    pub fn name(&self) -> &'static str {
        match self {
            EntryFile::Id => "id",
            EntryFile::Home => "home",
            EntryFile::Shell => "shell",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "id" => Some(EntryFile::Id),
            "home" => Some(EntryFile::Home),
            "shell" => Some(EntryFile::Shell),
            _ => None,
        }
    }

    /// The textual value of this file for a given record.
    ///
    /// No trailing newline, in either tree rendition.
    pub fn value(&self, record: &UserRecord) -> String {
        match self {
            EntryFile::Id => record.uid.to_string(),
            EntryFile::Home => record.home.clone(),
            EntryFile::Shell => record.shell.clone(),
        }
    }
}

/// One interface over both persistence strategies.
///
/// The passive shadow tree and the live filesystem driver both present
/// user directories, and both route write-intents through the
/// provisioning bridge; consumers should not care which one they hold.
#[async_trait]
pub trait UserTree: Send + Sync {
    /// The usernames currently visible in the tree.
    fn list_users(&self) -> Result<Vec<String>>;

    /// The current record for a user, straight from the identity source.
    fn lookup(&self, username: &str) -> Result<Option<UserRecord>>;

    /// Provision a new account and present it in the tree.
    async fn create_user_dir(&self, username: &str) -> Result<UserRecord>;

    /// De-provision an account and drop it from the tree.
    async fn remove_user_dir(&self, username: &str) -> Result<()>;
}
