// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use fuser::FileType;
use passfs::identity::{MemoryDirectory, UserDirectory, UserRecord};
use passfs::{EntryFile, Provisioner};
use rstest::rstest;

use super::{Config, Filesystem, NodePath};
use crate::Error;

fn record(username: &str, uid: u32, shell: &str) -> UserRecord {
    UserRecord {
        username: username.to_string(),
        uid,
        gid: uid,
        home: format!("/home/{username}"),
        shell: shell.to_string(),
    }
}

/// Provisioning bridge scripted against a shared in-memory directory.
struct ScriptedBridge {
    directory: Arc<RwLock<MemoryDirectory>>,
    fail: bool,
    creates: AtomicUsize,
    deletes: AtomicUsize,
}

impl ScriptedBridge {
    fn new(directory: Arc<RwLock<MemoryDirectory>>) -> Self {
        Self {
            directory,
            fail: false,
            creates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    fn failing(directory: Arc<RwLock<MemoryDirectory>>) -> Self {
        Self {
            fail: true,
            ..Self::new(directory)
        }
    }
}

#[async_trait]
impl Provisioner for ScriptedBridge {
    async fn create_account(&self, username: &str) -> passfs::Result<UserRecord> {
        self.creates.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            return Err(passfs::Error::ProcessFailed {
                tool: "adduser".to_string(),
                code: 1,
            });
        }
        let record = record(username, 4242, "/bin/bash");
        self.directory.write().unwrap().insert(record.clone());
        Ok(record)
    }

    async fn delete_account(&self, username: &str) -> passfs::Result<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            return Err(passfs::Error::ProcessFailed {
                tool: "userdel".to_string(),
                code: 1,
            });
        }
        if self.directory.write().unwrap().remove(username).is_none() {
            return Err(passfs::Error::UserNotFound(username.to_string()));
        }
        Ok(())
    }
}

type TestFs = Filesystem<Arc<RwLock<MemoryDirectory>>, Arc<ScriptedBridge>>;

fn fixture(records: Vec<UserRecord>) -> (Arc<ScriptedBridge>, TestFs) {
    let directory = Arc::new(RwLock::new(MemoryDirectory::new(records)));
    let bridge = Arc::new(ScriptedBridge::new(Arc::clone(&directory)));
    let fs = Filesystem::new(directory, Arc::clone(&bridge), Config::default());
    (bridge, fs)
}

fn names(entries: &[(u64, FileType, String)]) -> Vec<&str> {
    entries.iter().map(|(_, _, name)| name.as_str()).collect()
}

#[rstest]
fn test_root_listing_filters_non_login_accounts() {
    let (_bridge, fs) = fixture(vec![
        record("alice", 1000, "/bin/bash"),
        record("daemon", 1, "/usr/sbin/nologin"),
        record("bob", 1001, "/bin/sh"),
    ]);
    let entries = fs.dir_entries(&NodePath::Root).unwrap();
    assert_eq!(names(&entries), vec![".", "..", "alice", "bob"]);
}

#[rstest]
fn test_user_listing_presents_entry_files() {
    let (_bridge, fs) = fixture(vec![record("alice", 1000, "/bin/bash")]);
    let entries = fs
        .dir_entries(&NodePath::User("alice".to_string()))
        .unwrap();
    assert_eq!(names(&entries), vec![".", "..", "id", "home", "shell"]);
    assert!(entries[2..]
        .iter()
        .all(|(_, kind, _)| *kind == FileType::RegularFile));
}

#[rstest]
fn test_listing_unknown_user_fails() {
    let (_bridge, fs) = fixture(vec![]);
    let err = fs
        .dir_entries(&NodePath::User("nobody".to_string()))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Passfs(passfs::Error::UserNotFound(_))
    ));
}

#[rstest]
fn test_hidden_accounts_not_reachable_by_lookup() {
    let (_bridge, fs) = fixture(vec![record("daemon", 1, "/usr/sbin/nologin")]);
    let err = fs
        .attr_for(&NodePath::User("daemon".to_string()))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Passfs(passfs::Error::UserNotFound(_))
    ));
}

#[rstest]
fn test_attributes_carry_record_ownership() {
    let (_bridge, fs) = fixture(vec![record("alice", 1000, "/bin/bash")]);

    let dir = fs.attr_for(&NodePath::User("alice".to_string())).unwrap();
    assert_eq!(dir.kind, FileType::Directory);
    assert_eq!(dir.perm, 0o755);
    assert_eq!((dir.uid, dir.gid), (1000, 1000));

    let file = fs
        .attr_for(&NodePath::Field("alice".to_string(), EntryFile::Id))
        .unwrap();
    assert_eq!(file.kind, FileType::RegularFile);
    assert_eq!(file.perm, 0o644);
    // the advertised size is fixed regardless of content length
    assert_eq!(file.size, 256);
}

#[rstest]
fn test_inode_numbers_are_stable() {
    let (_bridge, fs) = fixture(vec![record("alice", 1000, "/bin/bash")]);
    let path = NodePath::Field("alice".to_string(), EntryFile::Home);
    let first = fs.nodes.ino_for(&path);
    let second = fs.nodes.ino_for(&path);
    assert_eq!(first, second);
    assert_ne!(first, fuser::FUSE_ROOT_ID);
}

#[rstest]
#[case(EntryFile::Id, "1000")]
#[case(EntryFile::Home, "/home/alice")]
#[case(EntryFile::Shell, "/bin/bash")]
fn test_read_returns_natural_value(#[case] file: EntryFile, #[case] expected: &str) {
    let (_bridge, fs) = fixture(vec![record("alice", 1000, "/bin/bash")]);
    let path = NodePath::Field("alice".to_string(), file);
    let data = fs.read_span(&path, 0, 4096).unwrap();
    assert_eq!(data, expected.as_bytes());
}

#[rstest]
fn test_read_past_content_is_empty() {
    let (_bridge, fs) = fixture(vec![record("alice", 1000, "/bin/bash")]);
    let path = NodePath::Field("alice".to_string(), EntryFile::Id);
    // "1000" is four bytes; the advertised size is much larger
    assert!(fs.read_span(&path, 4, 4096).unwrap().is_empty());
    assert_eq!(fs.read_span(&path, 2, 1).unwrap(), b"0");
}

#[rstest]
#[tokio::test]
async fn test_mkdir_provisions_once_then_visible() {
    let (bridge, fs) = fixture(vec![]);

    let record = fs.make_user_dir(&NodePath::Root, "carol").await.unwrap();
    assert_eq!(record.uid, 4242);
    assert_eq!(bridge.creates.load(Ordering::Relaxed), 1);

    let entries = fs.dir_entries(&NodePath::Root).unwrap();
    assert!(names(&entries).contains(&"carol"));
}

#[rstest]
#[tokio::test]
async fn test_mkdir_conflict_never_reaches_bridge() {
    let (bridge, fs) = fixture(vec![record("alice", 1000, "/bin/bash")]);

    let err = fs.make_user_dir(&NodePath::Root, "alice").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Passfs(passfs::Error::AccountExists(_))
    ));
    assert_eq!(bridge.creates.load(Ordering::Relaxed), 0);
}

#[rstest]
#[tokio::test]
async fn test_mkdir_below_root_is_rejected() {
    let (bridge, fs) = fixture(vec![record("alice", 1000, "/bin/bash")]);

    let parent = NodePath::User("alice".to_string());
    let err = fs.make_user_dir(&parent, "sub").await.unwrap_err();
    assert!(matches!(err, Error::Passfs(passfs::Error::NestedPath(_))));
    assert_eq!(bridge.creates.load(Ordering::Relaxed), 0);
}

#[rstest]
#[tokio::test]
async fn test_rmdir_deprovisions_and_forgets_inodes() {
    let (bridge, fs) = fixture(vec![record("alice", 1000, "/bin/bash")]);
    let path = NodePath::User("alice".to_string());
    let old_ino = fs.nodes.ino_for(&path);

    fs.remove_user_dir(&NodePath::Root, "alice").await.unwrap();
    assert_eq!(bridge.deletes.load(Ordering::Relaxed), 1);
    assert!(fs.nodes.get(old_ino).is_none());

    let entries = fs.dir_entries(&NodePath::Root).unwrap();
    assert!(!names(&entries).contains(&"alice"));
}

#[rstest]
#[tokio::test]
async fn test_rmdir_below_root_is_rejected() {
    let (bridge, fs) = fixture(vec![record("alice", 1000, "/bin/bash")]);

    let parent = NodePath::User("alice".to_string());
    let err = fs.remove_user_dir(&parent, "shell").await.unwrap_err();
    assert!(matches!(err, Error::Passfs(passfs::Error::NestedPath(_))));
    assert_eq!(bridge.deletes.load(Ordering::Relaxed), 0);
}

#[rstest]
#[tokio::test]
async fn test_rmdir_bridge_failure_keeps_account_visible() {
    let directory = Arc::new(RwLock::new(MemoryDirectory::new(vec![record(
        "alice",
        1000,
        "/bin/bash",
    )])));
    let bridge = Arc::new(ScriptedBridge::failing(Arc::clone(&directory)));
    let fs = Filesystem::new(Arc::clone(&directory), bridge, Config::default());

    fs.remove_user_dir(&NodePath::Root, "alice").await.unwrap_err();
    assert!(directory.lookup("alice").unwrap().is_some());
    let entries = fs.dir_entries(&NodePath::Root).unwrap();
    assert!(names(&entries).contains(&"alice"));
}

#[rstest]
#[tokio::test]
async fn test_session_serves_the_tree_interface() {
    let directory = Arc::new(RwLock::new(MemoryDirectory::new(vec![
        record("alice", 1000, "/bin/bash"),
        record("daemon", 1, "/usr/sbin/nologin"),
    ])));
    let bridge = Arc::new(ScriptedBridge::new(Arc::clone(&directory)));
    let session = super::Session::new(Arc::clone(&directory), bridge, Config::default());
    let tree: &dyn passfs::UserTree = &session;

    assert_eq!(tree.list_users().unwrap(), vec!["alice"]);
    assert!(tree.lookup("daemon").unwrap().is_none());

    tree.create_user_dir("carol").await.unwrap();
    assert!(tree.lookup("carol").unwrap().is_some());
    tree.remove_user_dir("carol").await.unwrap();
    assert!(tree.lookup("carol").unwrap().is_none());
}

#[rstest]
fn test_child_resolution() {
    let (_bridge, fs) = fixture(vec![record("alice", 1000, "/bin/bash")]);

    let user = fs.child_of(&NodePath::Root, "alice").unwrap();
    assert_eq!(user, NodePath::User("alice".to_string()));

    let field = fs.child_of(&user, "shell").unwrap();
    assert_eq!(field, NodePath::Field("alice".to_string(), EntryFile::Shell));

    assert!(fs.child_of(&user, "passwd").is_err());
    assert!(matches!(
        fs.child_of(&field, "anything").unwrap_err(),
        Error::NotDirectory
    ));
}
