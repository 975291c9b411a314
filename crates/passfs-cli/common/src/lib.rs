// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

//! Common macros and argument structures for the passfs command line

mod args;

pub use args::Logging;
