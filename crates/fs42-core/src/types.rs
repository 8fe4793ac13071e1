// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions for fs42

use crate::error::{FsError, FsResult};
use std::ffi::OsString;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Node id of the filesystem root
pub const ROOT_INO: u64 = 1;
/// Node id of the synthetic README file
pub const README_INO: u64 = 2;
/// First node id handed to backend nodes; 3 to 5 are reserved
pub const FIRST_DYNAMIC_INO: u64 = 6;

/// File type of a node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileKind {
    NamedPipe,
    CharDevice,
    BlockDevice,
    Directory,
    RegularFile,
    Symlink,
    Socket,
}

/// File attributes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attributes {
    /// Inode number reported by the backend
    pub inode: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
    pub kind: FileKind,
    /// Permission bits including setuid, setgid and sticky
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
    /// BSD file flags (macOS only)
    pub flags: u32,
}

/// Directory entry information
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: u64,
    pub name: OsString,
    /// `None` when the entry type could not be determined
    pub kind: Option<FileKind>,
}

/// Timestamp requested by a setattr call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetTime {
    Now,
    At(SystemTime),
}

impl SetTime {
    pub fn resolve(self) -> SystemTime {
        match self {
            SetTime::Now => SystemTime::now(),
            SetTime::At(time) => time,
        }
    }
}

/// Attribute changes requested by a setattr call; `None` leaves a field untouched
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetAttrRequest {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SetTime>,
    pub mtime: Option<SetTime>,
    pub crtime: Option<SystemTime>,
    pub chgtime: Option<SystemTime>,
    pub bkuptime: Option<SystemTime>,
    pub flags: Option<u32>,
}

/// Reply to an extended attribute query
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XattrReply {
    /// Size-only answer (the caller passed a zero-length buffer)
    Size(u32),
    Data(Vec<u8>),
}

impl XattrReply {
    /// Shape a value for a caller that offered a buffer of `size` bytes
    pub fn for_buffer(value: Vec<u8>, size: u32) -> FsResult<Self> {
        if size == 0 {
            let len = u32::try_from(value.len())
                .map_err(|_| FsError::from_errno(libc::E2BIG))?;
            Ok(XattrReply::Size(len))
        } else if value.len() > size as usize {
            Err(FsError::from_errno(libc::ERANGE))
        } else {
            Ok(XattrReply::Data(value))
        }
    }
}

/// Hands out node ids shared by every backend of one filesystem instance
#[derive(Debug)]
pub struct NodeIdAllocator {
    next: AtomicU64,
}

impl NodeIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(FIRST_DYNAMIC_INO),
        }
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for NodeIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
