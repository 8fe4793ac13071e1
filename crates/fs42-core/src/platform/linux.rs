// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Linux extended attributes (never following a trailing symlink)

use super::{c_name, c_path, cvt, read_sized};
use crate::error::{FsError, FsResult};
use std::ffi::OsStr;
use std::path::Path;

pub fn getxattr(path: &Path, name: &OsStr) -> FsResult<Vec<u8>> {
    let path = c_path(path)?;
    let name = c_name(name)?;
    read_sized(|buf, size| unsafe { libc::lgetxattr(path.as_ptr(), name.as_ptr(), buf, size) })
}

/// NUL-separated attribute names
pub fn listxattr(path: &Path) -> FsResult<Vec<u8>> {
    let path = c_path(path)?;
    read_sized(|buf, size| unsafe { libc::llistxattr(path.as_ptr(), buf.cast(), size) })
}

pub fn setxattr(
    path: &Path,
    name: &OsStr,
    value: &[u8],
    flags: i32,
    position: u32,
) -> FsResult<()> {
    if position != 0 {
        return Err(FsError::from_errno(libc::EINVAL));
    }
    let path = c_path(path)?;
    let name = c_name(name)?;
    cvt(unsafe {
        libc::lsetxattr(
            path.as_ptr(),
            name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            flags,
        )
    })?;
    Ok(())
}

pub fn removexattr(path: &Path, name: &OsStr) -> FsResult<()> {
    let path = c_path(path)?;
    let name = c_name(name)?;
    cvt(unsafe { libc::lremovexattr(path.as_ptr(), name.as_ptr()) })?;
    Ok(())
}
