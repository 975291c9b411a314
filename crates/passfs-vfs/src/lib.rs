// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

//! A live FUSE rendition of the account directory tree.
//!
//! Unlike the passive shadow tree in the `passfs` crate, this driver
//! keeps nothing on disk: every kernel call is answered from the
//! account database at the time of the call, and `mkdir`/`rmdir` at
//! the tree root are translated into provisioning requests.

mod error;
mod fuse;
mod mount;

pub use error::{Error, Result};
pub use fuse::{Config, Session};
pub use mount::{
    spawn_fuse_worker,
    which_fuse_worker,
    PASSFS_FUSE_FOREGROUND_LOGGING_VAR,
};
