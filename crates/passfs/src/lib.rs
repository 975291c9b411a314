// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

//! passfs exposes operating-system account records as a browsable,
//! partially mutable directory tree.
//!
//! The account database is the single source of truth. The passive
//! [`shadow::ShadowTree`] mirrors it on disk and is reconciled on
//! demand; the live FUSE driver (in the `passfs-vfs` crate) answers
//! kernel calls from the database directly with no persisted state.
//! Both route account create/delete through a [`provision::Provisioner`].

pub mod config;
mod error;
pub mod identity;
pub mod provision;
pub mod shadow;
pub mod tree;

pub use config::{get_config, Config};
pub use error::{Error, OsError, Result};
pub use identity::{MemoryDirectory, PasswdFile, UserDirectory, UserRecord};
pub use provision::{Provisioner, SystemProvisioner};
pub use shadow::ShadowTree;
pub use tree::{EntryFile, UserTree};
