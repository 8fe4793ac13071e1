// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Extended attributes on targets without native support

use crate::error::{FsError, FsResult};
use std::ffi::OsStr;
use std::path::Path;

pub fn getxattr(_path: &Path, _name: &OsStr) -> FsResult<Vec<u8>> {
    Err(FsError::NotSupported)
}

pub fn listxattr(_path: &Path) -> FsResult<Vec<u8>> {
    Err(FsError::NotSupported)
}

pub fn setxattr(
    _path: &Path,
    _name: &OsStr,
    _value: &[u8],
    _flags: i32,
    _position: u32,
) -> FsResult<()> {
    Err(FsError::NotSupported)
}

pub fn removexattr(_path: &Path, _name: &OsStr) -> FsResult<()> {
    Err(FsError::NotSupported)
}
