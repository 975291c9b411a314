// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Diagnostic, Debug, Error)]
pub enum Error {
    /// The named user (or one of its entry files) does not exist.
    #[error("No such user: {0}")]
    UserNotFound(String),

    /// An account with this name already exists.
    #[error("Account already exists: {0}")]
    AccountExists(String),

    /// The username is empty or contains a path separator.
    #[error("Invalid username: {0:?}")]
    InvalidUsername(String),

    /// Only top-level user directories may be created or removed.
    #[error("Not a top-level user directory: {0}")]
    NestedPath(PathBuf),

    #[error("Failed to spawn {tool}")]
    ProcessSpawnError {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} exited with status {code}")]
    ProcessFailed { tool: String, code: i32 },

    #[error("{tool} did not finish within {seconds}s")]
    #[diagnostic(help("the account tool may be waiting for input; check its configuration"))]
    ProcessTimeout { tool: String, seconds: u64 },

    #[error("Identity source read error: {0}")]
    IdentityReadError(PathBuf, #[source] io::Error),

    #[error("Shadow tree read error: {0}")]
    ShadowReadError(PathBuf, #[source] io::Error),

    #[error("Shadow tree write error: {0}")]
    ShadowWriteError(PathBuf, #[source] io::Error),

    #[error("Failed to load config")]
    Config(#[from] config::ConfigError),

    #[error("{0}")]
    String(String),
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::String(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::String(err.to_string())
    }
}

/// Map an error onto the OS error code that best represents it.
///
/// The live filesystem replies to the kernel with these codes.
pub trait OsError {
    fn os_error(&self) -> Option<i32>;
}

impl OsError for io::Error {
    fn os_error(&self) -> Option<i32> {
        self.raw_os_error()
    }
}

impl OsError for Error {
    fn os_error(&self) -> Option<i32> {
        match self {
            Error::UserNotFound(_) => Some(libc::ENOENT),
            Error::AccountExists(_) => Some(libc::EEXIST),
            Error::InvalidUsername(_) => Some(libc::EINVAL),
            Error::NestedPath(_) => Some(libc::EPERM),
            Error::ProcessSpawnError { .. }
            | Error::ProcessFailed { .. }
            | Error::ProcessTimeout { .. } => Some(libc::EIO),
            Error::IdentityReadError(_, err)
            | Error::ShadowReadError(_, err)
            | Error::ShadowWriteError(_, err) => err.os_error().or(Some(libc::EIO)),
            Error::Config(_) | Error::String(_) => None,
        }
    }
}
