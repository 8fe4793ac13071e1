// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Native capabilities selected at build time
//!
//! Extended attributes are backed by the `l*xattr` family on Linux and by the
//! `XATTR_NOFOLLOW` variants on macOS. Other targets, and builds without the
//! `xattr` feature, report `ENOTSUP` for every xattr call.

use crate::attr::attributes_from_metadata;
use crate::error::{FsError, FsResult};
use crate::types::Attributes;
use std::ffi::{CString, OsStr};
use std::fs::OpenOptions;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

#[cfg(all(feature = "xattr", target_os = "linux"))]
mod linux;
#[cfg(all(feature = "xattr", target_os = "linux"))]
pub use linux::{getxattr, listxattr, removexattr, setxattr};

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::set_platform_attributes;
#[cfg(all(feature = "xattr", target_os = "macos"))]
pub use macos::{getxattr, listxattr, removexattr, setxattr};

#[cfg(not(all(feature = "xattr", any(target_os = "linux", target_os = "macos"))))]
mod unsupported;
#[cfg(not(all(feature = "xattr", any(target_os = "linux", target_os = "macos"))))]
pub use unsupported::{getxattr, listxattr, removexattr, setxattr};

/// Status of `path` without following a trailing symlink
pub fn stat_path(path: &Path) -> FsResult<Attributes> {
    let metadata = std::fs::symlink_metadata(path)?;
    Ok(attributes_from_metadata(&metadata))
}

/// Flush `path` to stable storage through a fresh no-follow descriptor
pub fn fsync_path(path: &Path, datasync: bool) -> FsResult<()> {
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)?;
    if datasync {
        file.sync_data()?;
    } else {
        file.sync_all()?;
    }
    Ok(())
}

/// Apply the BSD-specific parts of a setattr request.
///
/// Only macOS can change file flags; everywhere else a request that names
/// flags or the backup/change/creation times is refused.
#[cfg(not(target_os = "macos"))]
pub fn set_platform_attributes(_path: &Path, req: &crate::types::SetAttrRequest) -> FsResult<()> {
    if req.flags.is_some()
        || req.crtime.is_some()
        || req.chgtime.is_some()
        || req.bkuptime.is_some()
    {
        return Err(FsError::NotSupported);
    }
    Ok(())
}

pub(crate) fn c_path(path: &Path) -> FsResult<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| FsError::InvalidPath)
}

pub(crate) fn c_name(name: &OsStr) -> FsResult<CString> {
    CString::new(name.as_bytes()).map_err(|_| FsError::from_errno(libc::EINVAL))
}

/// Map a negative libc return value to the thread's errno
pub(crate) fn cvt<T: Default + PartialOrd>(ret: T) -> FsResult<T> {
    if ret < T::default() {
        Err(FsError::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Call `fetch` with a null buffer to learn the size, then fill a buffer of
/// that size, retrying when the value grew in between.
#[cfg(all(feature = "xattr", any(target_os = "linux", target_os = "macos")))]
pub(crate) fn read_sized<F>(mut fetch: F) -> FsResult<Vec<u8>>
where
    F: FnMut(*mut libc::c_void, usize) -> libc::ssize_t,
{
    loop {
        let len = cvt(fetch(std::ptr::null_mut(), 0))? as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; len];
        match cvt(fetch(buf.as_mut_ptr().cast(), buf.len())) {
            Ok(n) => {
                buf.truncate(n as usize);
                return Ok(buf);
            }
            Err(err) if err.errno() == libc::ERANGE => continue,
            Err(err) => return Err(err),
        }
    }
}
