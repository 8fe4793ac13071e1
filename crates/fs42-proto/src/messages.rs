// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Records exchanged with the coordinator and with peer connections

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Result of asking the coordinator about another user's directory
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginInfo {
    pub login: String,
    pub exists: bool,
    pub was_online: bool,
}

/// Classification returned by a typed existence check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupKind {
    NotFound,
    File,
    Directory,
}

/// Read request forwarded to a peer for an open remote handle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub fd: u64,
    pub dir: bool,
    pub offset: i64,
    pub size: u32,
    /// Native flags the handle was opened with, as reported by the kernel
    pub file_flags: i32,
}

/// Directory entry as listed by a peer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dirent {
    pub inode: u64,
    /// `DT_*` value from `<dirent.h>`
    pub kind: u32,
    pub name: String,
}

/// File attributes as reported by a peer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttr {
    pub inode: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub birth_time: SystemTime,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub block_size: u32,
    /// Unix mode including the `S_IFMT` type bits
    pub mode: u32,
}

/// FUSE open response flags relayed from the peer (`FOPEN_*`)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenResponseFlags(pub u32);

impl OpenResponseFlags {
    pub const DIRECT_IO: OpenResponseFlags = OpenResponseFlags(1 << 0);
    pub const KEEP_CACHE: OpenResponseFlags = OpenResponseFlags(1 << 1);
    pub const NONSEEKABLE: OpenResponseFlags = OpenResponseFlags(1 << 2);

    pub fn bits(self) -> u32 {
        self.0
    }
}
