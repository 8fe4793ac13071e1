// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Backend-relative path handling

use crate::error::{FsError, FsResult};
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

/// Join `name` onto the backend-relative path `parent`.
///
/// `.` components are dropped and `..` consumes the component before it, but
/// never one belonging to `parent`: the result always lies strictly below
/// `parent`. Empty names, absolute names, names with NUL bytes and names that
/// normalise back to `parent` itself fail with [`FsError::InvalidPath`].
pub fn resolve_join(parent: &Path, name: &OsStr) -> FsResult<PathBuf> {
    if name.is_empty() || name.as_bytes().contains(&0) {
        return Err(FsError::InvalidPath);
    }

    let mut joined = parent.to_path_buf();
    let floor = parent.components().count();
    let mut depth = floor;
    for component in Path::new(name).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == floor {
                    return Err(FsError::InvalidPath);
                }
                joined.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                joined.push(part);
                depth += 1;
            }
            Component::RootDir | Component::Prefix(_) => return Err(FsError::InvalidPath),
        }
    }
    if depth == floor {
        return Err(FsError::InvalidPath);
    }
    Ok(joined)
}
