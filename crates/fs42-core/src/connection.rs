// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Interfaces consumed from the remote procedure service
//!
//! Paths passed to a [`UserConnection`] are relative to the peer's shared
//! directory: `""` is its root and children are written as `"/a/b"`.

use fs42_proto::{
    AgnosticOpenFlags, Dirent, FileAttr, LoginInfo, LookupKind, OpenResponseFlags, ReadRequest,
    RemoteError,
};
use std::sync::Arc;

/// Authenticated connection to one peer's shared directory
#[cfg_attr(test, mockall::automock)]
pub trait UserConnection: Send + Sync {
    fn access(&self, path: &str, mask: i32) -> Result<(), RemoteError>;

    fn stat(&self, path: &str) -> Result<FileAttr, RemoteError>;

    fn getxattr(&self, path: &str, name: &str) -> Result<Vec<u8>, RemoteError>;

    /// NUL-separated attribute names
    fn listxattr(&self, path: &str) -> Result<Vec<u8>, RemoteError>;

    /// Open `path`, returning the peer's response flags and its handle id
    fn open(
        &self,
        path: &str,
        dir: bool,
        flags: AgnosticOpenFlags,
    ) -> Result<(OpenResponseFlags, u64), RemoteError>;

    fn readlink(&self, path: &str) -> Result<Vec<u8>, RemoteError>;

    fn lookup_exists(&self, path: &str) -> Result<LookupKind, RemoteError>;

    fn read_dir(&self, handle: u64) -> Result<Vec<Dirent>, RemoteError>;

    fn read_from(&self, req: &ReadRequest) -> Result<Vec<u8>, RemoteError>;

    fn close(&self, handle: u64) -> Result<(), RemoteError>;
}

/// Directory of logins and the entry point for peer connections
#[cfg_attr(test, mockall::automock)]
pub trait Coordinator: Send + Sync {
    fn user_dir_info(&self, login: &str) -> Result<LoginInfo, RemoteError>;

    fn user_dir_stat(&self, login: &str) -> Result<FileAttr, RemoteError>;

    fn my_inode(&self) -> Result<u64, RemoteError>;

    fn connect(&self, info: &LoginInfo) -> Result<Arc<dyn UserConnection>, RemoteError>;
}
