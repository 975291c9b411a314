// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use fuser::{
    FileAttr,
    FileType,
    MountOption,
    ReplyData,
    ReplyDirectory,
    ReplyEntry,
    ReplyOpen,
    Request,
};
use passfs::provision::validate_username;
use passfs::{EntryFile, OsError, Provisioner, UserDirectory, UserRecord, UserTree};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./fuse_test.rs"]
mod fuse_test;

/// Options to configure the FUSE filesystem and
/// its behavior at runtime
#[derive(Debug, Clone)]
pub struct Config {
    /// The user that owns the filesystem root
    pub uid: nix::unistd::Uid,
    /// The group that owns the filesystem root
    pub gid: nix::unistd::Gid,
    /// Mount options to be used when setting up
    pub mount_options: HashSet<MountOption>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uid: nix::unistd::geteuid(),
            gid: nix::unistd::getegid(),
            mount_options: HashSet::new(),
        }
    }
}

/// A location in the three-level path grammar of the tree:
/// the root, a user directory, or one entry file inside it.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
enum NodePath {
    Root,
    User(String),
    Field(String, EntryFile),
}

/// Maps kernel inode numbers onto the path grammar.
///
/// This is protocol bookkeeping only: inode numbers must stay stable
/// between calls, but no account data is ever stored here. Every
/// operation re-reads the identity source.
struct Nodes {
    next_ino: AtomicU64,
    by_ino: DashMap<u64, NodePath>,
    by_path: DashMap<NodePath, u64>,
}

impl Nodes {
    fn new() -> Self {
        let nodes = Self {
            // the root inode must be 1, which is pre-registered below
            next_ino: AtomicU64::new(2),
            by_ino: Default::default(),
            by_path: Default::default(),
        };
        nodes.by_ino.insert(fuser::FUSE_ROOT_ID, NodePath::Root);
        nodes.by_path.insert(NodePath::Root, fuser::FUSE_ROOT_ID);
        nodes
    }

    fn ino_for(&self, path: &NodePath) -> u64 {
        if let Some(existing) = self.by_path.get(path) {
            return *existing;
        }
        let allocated = self.next_ino.fetch_add(1, Ordering::Relaxed);
        match self.by_path.entry(path.clone()) {
            // a concurrent caller registered this path first; the
            // allocated number is simply abandoned
            dashmap::mapref::entry::Entry::Occupied(entry) => *entry.get(),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(allocated);
                self.by_ino.insert(allocated, path.clone());
                allocated
            }
        }
    }

    fn get(&self, ino: u64) -> Option<NodePath> {
        self.by_ino.get(&ino).map(|kv| kv.value().clone())
    }

    fn forget_user(&self, username: &str) {
        let mut paths = vec![NodePath::User(username.to_string())];
        paths.extend(
            EntryFile::ALL
                .into_iter()
                .map(|file| NodePath::Field(username.to_string(), file)),
        );
        for path in paths {
            if let Some((_, ino)) = self.by_path.remove(&path) {
                self.by_ino.remove(&ino);
            }
        }
    }
}

/// Answers every filesystem call directly from the identity source.
///
/// There is no cache and no state machine beyond "mounted": concurrent
/// callers always observe the current account database.
struct Filesystem<D, P> {
    directory: D,
    bridge: P,
    opts: Config,
    nodes: Nodes,
    ttl: Duration,
}

impl<D, P> Filesystem<D, P>
where
    D: UserDirectory,
    P: Provisioner,
{
    // reported for statfs and block accounting; the tree spans no real
    // disk so any realistic value will do for commands like du
    const BLOCK_SIZE: u32 = 512;

    /// Every entry file advertises this size, regardless of content
    /// length; reads return the natural string value.
    const ADVERTISED_FILE_SIZE: u64 = 256;

    fn new(directory: D, bridge: P, opts: Config) -> Self {
        Self {
            directory,
            bridge,
            opts,
            nodes: Nodes::new(),
            // zero so the kernel re-queries on every access and can
            // never observe a cached attribute after a provisioning
            // change
            ttl: Duration::ZERO,
        }
    }

    /// Resolve a record, treating non-login accounts as nonexistent.
    ///
    /// The same gate readdir applies, so an account hidden from the
    /// listing cannot be reached by direct path lookup either.
    fn lookup_existing(&self, username: &str) -> Result<UserRecord> {
        self.directory
            .lookup(username)?
            .filter(UserRecord::is_login_allowed)
            .ok_or_else(|| Error::Passfs(passfs::Error::UserNotFound(username.to_string())))
    }

    fn dir_attr(&self, ino: u64, uid: u32, gid: u32) -> FileAttr {
        let now = SystemTime::now();
        FileAttr {
            ino,
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: FileType::Directory,
            perm: 0o755,
            nlink: 2,
            uid,
            gid,
            rdev: 0,
            blksize: Self::BLOCK_SIZE,
            flags: 0,
        }
    }

    fn file_attr(&self, ino: u64, uid: u32, gid: u32) -> FileAttr {
        let now = SystemTime::now();
        FileAttr {
            ino,
            size: Self::ADVERTISED_FILE_SIZE,
            blocks: (Self::ADVERTISED_FILE_SIZE / Self::BLOCK_SIZE as u64) + 1,
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind: FileType::RegularFile,
            perm: 0o644,
            nlink: 1,
            uid,
            gid,
            rdev: 0,
            blksize: Self::BLOCK_SIZE,
            flags: 0,
        }
    }

    fn attr_for(&self, path: &NodePath) -> Result<FileAttr> {
        match path {
            NodePath::Root => Ok(self.dir_attr(
                self.nodes.ino_for(path),
                self.opts.uid.as_raw(),
                self.opts.gid.as_raw(),
            )),
            NodePath::User(username) => {
                let record = self.lookup_existing(username)?;
                Ok(self.dir_attr(self.nodes.ino_for(path), record.uid, record.gid))
            }
            NodePath::Field(username, _) => {
                let record = self.lookup_existing(username)?;
                Ok(self.file_attr(self.nodes.ino_for(path), record.uid, record.gid))
            }
        }
    }

    /// Resolve a child name under a parent node.
    fn child_of(&self, parent: &NodePath, name: &str) -> Result<NodePath> {
        match parent {
            NodePath::Root => {
                // existence is checked when attributes are resolved
                Ok(NodePath::User(name.to_string()))
            }
            NodePath::User(username) => match EntryFile::from_name(name) {
                Some(file) => Ok(NodePath::Field(username.clone(), file)),
                None => {
                    Err(passfs::Error::UserNotFound(format!("{username}/{name}")).into())
                }
            },
            NodePath::Field(..) => Err(Error::NotDirectory),
        }
    }

    fn dir_entries(&self, path: &NodePath) -> Result<Vec<(u64, FileType, String)>> {
        let ino = self.nodes.ino_for(path);
        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (fuser::FUSE_ROOT_ID, FileType::Directory, "..".to_string()),
        ];
        match path {
            NodePath::Root => {
                for record in self.directory.list_all()? {
                    if !record.is_login_allowed() {
                        continue;
                    }
                    let child = NodePath::User(record.username.clone());
                    entries.push((
                        self.nodes.ino_for(&child),
                        FileType::Directory,
                        record.username,
                    ));
                }
            }
            NodePath::User(username) => {
                self.lookup_existing(username)?;
                for file in EntryFile::ALL {
                    let child = NodePath::Field(username.clone(), file);
                    entries.push((
                        self.nodes.ino_for(&child),
                        FileType::RegularFile,
                        file.name().to_string(),
                    ));
                }
            }
            NodePath::Field(..) => return Err(Error::NotDirectory),
        }
        Ok(entries)
    }

    /// The byte range of an entry file's current value.
    ///
    /// Content length is the natural string length, not the advertised
    /// size; reads past the end return an empty buffer.
    fn read_span(&self, path: &NodePath, offset: i64, size: u32) -> Result<Vec<u8>> {
        let NodePath::Field(username, file) = path else {
            return Err(Error::IsDirectory);
        };
        let record = self.lookup_existing(username)?;
        let content = file.value(&record).into_bytes();
        let offset = offset.max(0) as usize;
        if offset >= content.len() {
            return Ok(Vec::new());
        }
        let end = content.len().min(offset + size as usize);
        Ok(content[offset..end].to_vec())
    }

    /// Provision an account for `mkdir` on the tree root.
    async fn make_user_dir(&self, parent: &NodePath, name: &str) -> Result<UserRecord> {
        if !matches!(parent, NodePath::Root) {
            return Err(passfs::Error::NestedPath(name.into()).into());
        }
        validate_username(name)?;
        if self.directory.lookup(name)?.is_some() {
            // conflict detected before the bridge spawns anything
            return Err(passfs::Error::AccountExists(name.to_string()).into());
        }
        Ok(self.bridge.create_account(name).await?)
    }

    /// De-provision an account for `rmdir` on the tree root.
    ///
    /// Only top-level user directories are removable.
    async fn remove_user_dir(&self, parent: &NodePath, name: &str) -> Result<()> {
        if !matches!(parent, NodePath::Root) {
            return Err(passfs::Error::NestedPath(name.into()).into());
        }
        validate_username(name)?;
        if self.directory.lookup(name)?.is_none() {
            return Err(passfs::Error::UserNotFound(name.to_string()).into());
        }
        self.bridge.delete_account(name).await?;
        self.nodes.forget_user(name);
        Ok(())
    }
}

/// Extract the ok value from a result, or reply with an error to FUSE
macro_rules! unwrap {
    ($reply:ident, $op:expr) => {{
        match $op {
            Ok(r) => r,
            Err(err) => err!($reply, err),
        }
    }};
}

/// Reply with an error to FUSE and return
macro_rules! err {
    ($reply:ident, $err:expr) => {{
        let err = $err;
        tracing::debug!("{err}");
        let errno = err.os_error().unwrap_or(libc::EIO);
        $reply.error(errno);
        return;
    }};
}

// these functions mirror the actual fuse ones and
// so we don't have much control over the shape
#[allow(clippy::too_many_arguments)]
impl<D, P> Filesystem<D, P>
where
    D: UserDirectory,
    P: Provisioner,
{
    async fn lookup(&self, parent: u64, name: OsString, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent) = self.nodes.get(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        tracing::trace!("lookup {name} in {parent:?}");
        let path = unwrap!(reply, self.child_of(&parent, name));
        let attr = unwrap!(reply, self.attr_for(&path));
        reply.entry(&self.ttl, &attr, 0);
    }

    async fn getattr(&self, ino: u64, reply: fuser::ReplyAttr) {
        let Some(path) = self.nodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let attr = unwrap!(reply, self.attr_for(&path));
        reply.attr(&self.ttl, &attr);
    }

    async fn readdir(&self, ino: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(path) = self.nodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = unwrap!(reply, self.dir_entries(&path));
        for (index, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            let buffer_full = reply.add(ino, (index + 1) as i64, kind, &name);
            if buffer_full {
                break;
            }
        }
        reply.ok();
    }

    async fn open(&self, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.nodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if !matches!(path, NodePath::Field(..)) {
            reply.error(libc::EISDIR);
            return;
        }
        if flags & (libc::O_WRONLY | libc::O_RDWR) != 0 {
            tracing::debug!("open {flags:#o} = EROFS");
            reply.error(libc::EROFS);
            return;
        }
        // no handle state is kept; reads resolve the path on their own
        reply.opened(0, 0);
    }

    async fn read(&self, ino: u64, offset: i64, size: u32, reply: ReplyData) {
        let Some(path) = self.nodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let data = unwrap!(reply, self.read_span(&path, offset, size));
        tracing::trace!("read {ino} = {}/{size}", data.len());
        reply.data(&data);
    }

    async fn mkdir(&self, parent: u64, name: OsString, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent) = self.nodes.get(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        tracing::debug!("mkdir {name}");
        let record = unwrap!(reply, self.make_user_dir(&parent, name).await);
        let path = NodePath::User(record.username.clone());
        let attr = self.dir_attr(self.nodes.ino_for(&path), record.uid, record.gid);
        reply.entry(&self.ttl, &attr, 0);
    }

    async fn rmdir(&self, parent: u64, name: OsString, reply: fuser::ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent) = self.nodes.get(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        tracing::debug!("rmdir {name}");
        unwrap!(reply, self.remove_user_dir(&parent, name).await);
        reply.ok();
    }

    async fn statfs(&self, _ino: u64, reply: fuser::ReplyStatfs) {
        let files = match self.directory.list_all() {
            Ok(records) => {
                records.iter().filter(|r| r.is_login_allowed()).count()
                    * (1 + EntryFile::ALL.len())
            }
            Err(err) => err!(reply, err),
        };
        reply.statfs(
            files as u64,
            0,
            0,
            files as u64,
            0,
            Self::BLOCK_SIZE,
            u32::MAX,
            Self::BLOCK_SIZE,
        )
    }
}

/// Represents a connected FUSE session.
///
/// This implements the [`fuser::Filesystem`] trait, receives
/// all requests and arranges for their async execution against
/// the identity source and provisioning bridge.
pub struct Session<D, P> {
    inner: Arc<Filesystem<D, P>>,
}

impl<D, P> Session<D, P>
where
    D: UserDirectory + 'static,
    P: Provisioner + 'static,
{
    /// Construct a new session serving the given identity source,
    /// with provisioning routed through the given bridge.
    pub fn new(directory: D, bridge: P, opts: Config) -> Self {
        Self {
            inner: Arc::new(Filesystem::new(directory, bridge, opts)),
        }
    }
}

// The live driver presents the same interface as the passive shadow
// tree, so embedding consumers are indifferent to which rendition
// they hold.
#[async_trait::async_trait]
impl<D, P> UserTree for Session<D, P>
where
    D: UserDirectory + 'static,
    P: Provisioner + 'static,
{
    fn list_users(&self) -> passfs::Result<Vec<String>> {
        Ok(self
            .inner
            .directory
            .list_all()?
            .into_iter()
            .filter(UserRecord::is_login_allowed)
            .map(|record| record.username)
            .collect())
    }

    fn lookup(&self, username: &str) -> passfs::Result<Option<UserRecord>> {
        Ok(self
            .inner
            .directory
            .lookup(username)?
            .filter(UserRecord::is_login_allowed))
    }

    async fn create_user_dir(&self, username: &str) -> passfs::Result<UserRecord> {
        self.inner
            .make_user_dir(&NodePath::Root, username)
            .await
            .map_err(Error::into_passfs)
    }

    async fn remove_user_dir(&self, username: &str) -> passfs::Result<()> {
        self.inner
            .remove_user_dir(&NodePath::Root, username)
            .await
            .map_err(Error::into_passfs)
    }
}

impl<D, P> fuser::Filesystem for Session<D, P>
where
    D: UserDirectory + 'static,
    P: Provisioner + 'static,
{
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        tracing::info!("Filesystem initialized");
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name.to_owned();
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.lookup(parent, name, reply).await });
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: fuser::ReplyAttr) {
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.getattr(ino, reply).await });
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.readdir(ino, offset, reply).await });
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.open(ino, flags, reply).await });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.read(ino, offset, size, reply).await });
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = name.to_owned();
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.mkdir(parent, name, reply).await });
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: fuser::ReplyEmpty) {
        let name = name.to_owned();
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.rmdir(parent, name, reply).await });
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: fuser::ReplyStatfs) {
        let fs = Arc::clone(&self.inner);
        tokio::task::spawn(async move { fs.statfs(ino, reply).await });
    }
}
