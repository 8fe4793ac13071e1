// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! macOS file flags and extended attributes

use super::{c_path, cvt};
use crate::error::{FsError, FsResult, FirstError};
use crate::types::SetAttrRequest;
use std::path::Path;

/// Apply BSD file flags; creation, change and backup times cannot be set here
pub fn set_platform_attributes(path: &Path, req: &SetAttrRequest) -> FsResult<()> {
    let mut result = FirstError::new();
    if let Some(flags) = req.flags {
        result.record(c_path(path).and_then(|path| {
            cvt(unsafe { libc::lchflags(path.as_ptr(), flags) })?;
            Ok(())
        }));
    }
    if req.crtime.is_some() || req.chgtime.is_some() || req.bkuptime.is_some() {
        result.record::<()>(Err(FsError::NotSupported));
    }
    result.into_result()
}

#[cfg(feature = "xattr")]
mod xattr {
    use super::super::{c_name, c_path, cvt, read_sized};
    use crate::error::FsResult;
    use std::ffi::OsStr;
    use std::path::Path;

    pub fn getxattr(path: &Path, name: &OsStr) -> FsResult<Vec<u8>> {
        let path = c_path(path)?;
        let name = c_name(name)?;
        read_sized(|buf, size| unsafe {
            libc::getxattr(
                path.as_ptr(),
                name.as_ptr(),
                buf,
                size,
                0,
                libc::XATTR_NOFOLLOW,
            )
        })
    }

    pub fn listxattr(path: &Path) -> FsResult<Vec<u8>> {
        let path = c_path(path)?;
        read_sized(|buf, size| unsafe {
            libc::listxattr(path.as_ptr(), buf.cast(), size, libc::XATTR_NOFOLLOW)
        })
    }

    pub fn setxattr(
        path: &Path,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        position: u32,
    ) -> FsResult<()> {
        let path = c_path(path)?;
        let name = c_name(name)?;
        cvt(unsafe {
            libc::setxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr().cast(),
                value.len(),
                position,
                flags | libc::XATTR_NOFOLLOW,
            )
        })?;
        Ok(())
    }

    pub fn removexattr(path: &Path, name: &OsStr) -> FsResult<()> {
        let path = c_path(path)?;
        let name = c_name(name)?;
        cvt(unsafe { libc::removexattr(path.as_ptr(), name.as_ptr(), libc::XATTR_NOFOLLOW) })?;
        Ok(())
    }
}

#[cfg(feature = "xattr")]
pub use xattr::{getxattr, listxattr, removexattr, setxattr};
