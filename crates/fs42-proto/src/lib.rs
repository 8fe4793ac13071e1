// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! fs42 protocol: records exchanged with remote peers
//!
//! This crate defines the platform-independent types that cross the
//! remote procedure boundary: open flags, file attributes, directory
//! entries, read requests and remote errors.

pub mod error;
pub mod messages;
pub mod open_flags;

pub use error::RemoteError;
pub use messages::{Dirent, FileAttr, LoginInfo, LookupKind, OpenResponseFlags, ReadRequest};
pub use open_flags::{to_agnostic, AgnosticOpenFlags};
