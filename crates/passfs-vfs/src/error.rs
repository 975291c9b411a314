// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use miette::Diagnostic;
use passfs::OsError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors specific to the live filesystem driver.
#[derive(Diagnostic, Debug, Error)]
pub enum Error {
    /// A directory operation was attempted on an entry file.
    #[error("Not a directory")]
    NotDirectory,

    /// A file operation was attempted on a directory.
    #[error("Is a directory")]
    IsDirectory,

    /// Entry files are world-readable but never writable.
    #[error("Filesystem is read-only")]
    ReadOnly,

    /// The named companion binary could not be located.
    #[error("Cannot find binary: {0}")]
    #[diagnostic(help("passfs-fuse is expected to be installed alongside passfs"))]
    MissingBinary(&'static str),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Passfs(#[from] passfs::Error),
}

impl Error {
    /// Flatten into the core error type for callers consuming the
    /// driver through the tree interface rather than the kernel.
    pub fn into_passfs(self) -> passfs::Error {
        match self {
            Error::Passfs(err) => err,
            other => passfs::Error::String(other.to_string()),
        }
    }
}

impl OsError for Error {
    fn os_error(&self) -> Option<i32> {
        match self {
            Error::NotDirectory => Some(libc::ENOTDIR),
            Error::IsDirectory => Some(libc::EISDIR),
            Error::ReadOnly => Some(libc::EROFS),
            Error::MissingBinary(_) => Some(libc::ENOENT),
            Error::Passfs(err) => err.os_error(),
        }
    }
}
