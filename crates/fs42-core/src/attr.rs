// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Translation between native file status and [`Attributes`]

use crate::types::{Attributes, FileKind};
use fs42_proto::FileAttr as RemoteFileAttr;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const S_IFMT: u32 = libc::S_IFMT as u32;
const S_IFIFO: u32 = libc::S_IFIFO as u32;
const S_IFCHR: u32 = libc::S_IFCHR as u32;
const S_IFDIR: u32 = libc::S_IFDIR as u32;
const S_IFREG: u32 = libc::S_IFREG as u32;
const S_IFLNK: u32 = libc::S_IFLNK as u32;
const S_IFSOCK: u32 = libc::S_IFSOCK as u32;

const DT_FIFO: u32 = libc::DT_FIFO as u32;
const DT_CHR: u32 = libc::DT_CHR as u32;
const DT_DIR: u32 = libc::DT_DIR as u32;
const DT_BLK: u32 = libc::DT_BLK as u32;
const DT_REG: u32 = libc::DT_REG as u32;
const DT_LNK: u32 = libc::DT_LNK as u32;
const DT_SOCK: u32 = libc::DT_SOCK as u32;

/// Permission bits and their native creation counterparts
const PERMISSION_BITS: [(u16, libc::mode_t); 12] = [
    (0o4000, libc::S_ISUID),
    (0o2000, libc::S_ISGID),
    (0o1000, libc::S_ISVTX),
    (0o0400, libc::S_IRUSR),
    (0o0200, libc::S_IWUSR),
    (0o0100, libc::S_IXUSR),
    (0o0040, libc::S_IRGRP),
    (0o0020, libc::S_IWGRP),
    (0o0010, libc::S_IXGRP),
    (0o0004, libc::S_IROTH),
    (0o0002, libc::S_IWOTH),
    (0o0001, libc::S_IXOTH),
];

impl FileKind {
    /// Kind encoded in the `S_IFMT` bits of a unix mode.
    ///
    /// Unrecognised type bits are reported as a block device.
    pub fn from_mode(mode: u32) -> FileKind {
        match mode & S_IFMT {
            S_IFIFO => FileKind::NamedPipe,
            S_IFCHR => FileKind::CharDevice,
            S_IFDIR => FileKind::Directory,
            S_IFREG => FileKind::RegularFile,
            S_IFLNK => FileKind::Symlink,
            S_IFSOCK => FileKind::Socket,
            _ => FileKind::BlockDevice,
        }
    }
}

/// Kind for a `DT_*` directory entry type; `None` for `DT_UNKNOWN` and anything unrecognised
pub fn dirent_kind(d_type: u32) -> Option<FileKind> {
    match d_type {
        DT_FIFO => Some(FileKind::NamedPipe),
        DT_CHR => Some(FileKind::CharDevice),
        DT_DIR => Some(FileKind::Directory),
        DT_BLK => Some(FileKind::BlockDevice),
        DT_REG => Some(FileKind::RegularFile),
        DT_LNK => Some(FileKind::Symlink),
        DT_SOCK => Some(FileKind::Socket),
        _ => None,
    }
}

/// Native creation bits for the given permission bits
pub fn create_mode(perm: u16) -> libc::mode_t {
    PERMISSION_BITS
        .iter()
        .filter(|(bit, _)| perm & bit != 0)
        .fold(0, |acc, (_, native)| acc | native)
}

pub(crate) fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nsecs.clamp(0, 999_999_999) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}

#[cfg(target_os = "macos")]
fn bsd_flags(metadata: &Metadata) -> u32 {
    use std::os::macos::fs::MetadataExt as _;
    metadata.st_flags()
}

#[cfg(not(target_os = "macos"))]
fn bsd_flags(_metadata: &Metadata) -> u32 {
    0
}

/// Attribute record for a native status result
pub fn attributes_from_metadata(metadata: &Metadata) -> Attributes {
    let mtime = system_time(metadata.mtime(), metadata.mtime_nsec());
    Attributes {
        inode: metadata.ino(),
        size: metadata.size(),
        blocks: metadata.blocks(),
        atime: system_time(metadata.atime(), metadata.atime_nsec()),
        mtime,
        ctime: system_time(metadata.ctime(), metadata.ctime_nsec()),
        // Not every filesystem records a birth time
        crtime: metadata.created().unwrap_or(mtime),
        kind: FileKind::from_mode(metadata.mode()),
        perm: (metadata.mode() & 0o7777) as u16,
        nlink: metadata.nlink() as u32,
        uid: metadata.uid(),
        gid: metadata.gid(),
        rdev: metadata.rdev() as u32,
        blksize: metadata.blksize() as u32,
        flags: bsd_flags(metadata),
    }
}

/// Attribute record for attributes reported by a peer
pub fn attributes_from_remote(attr: &RemoteFileAttr) -> Attributes {
    Attributes {
        inode: attr.inode,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.birth_time,
        kind: FileKind::from_mode(attr.mode),
        perm: (attr.mode & 0o7777) as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: attr.block_size,
        flags: 0,
    }
}
