// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for fs42 core

use fs42_proto::RemoteError;
use libc::c_int;
use std::io;

/// Core filesystem error type
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("operation not permitted")]
    PermissionDenied,
    #[error("access denied")]
    AccessDenied,
    #[error("unsupported")]
    NotSupported,
    #[error("node belongs to a different backend")]
    WrongBackend,
    #[error("path escapes the backend root")]
    InvalidPath,
    #[error("not implemented")]
    NotImplemented,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}

impl FsError {
    /// Errno reported to the kernel for this error
    pub fn errno(&self) -> c_int {
        match self {
            FsError::NotFound | FsError::InvalidPath => libc::ENOENT,
            FsError::PermissionDenied => libc::EPERM,
            FsError::AccessDenied => libc::EACCES,
            FsError::NotSupported => libc::ENOTSUP,
            FsError::WrongBackend => libc::EBADF,
            FsError::NotImplemented => libc::ENOSYS,
            FsError::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            FsError::Remote(err) => err.errno(),
        }
    }

    pub fn from_errno(errno: c_int) -> Self {
        FsError::Io(io::Error::from_raw_os_error(errno))
    }

    /// Error built from the calling thread's `errno`
    pub fn last_os_error() -> Self {
        FsError::Io(io::Error::last_os_error())
    }
}

pub type FsResult<T> = Result<T, FsError>;

/// Collects the outcome of independent sub-steps, keeping the first failure
#[derive(Debug, Default)]
pub struct FirstError(Option<FsError>);

impl FirstError {
    pub fn new() -> Self {
        Self(None)
    }

    pub fn record<T>(&mut self, result: FsResult<T>) {
        if let Err(err) = result {
            if self.0.is_none() {
                self.0 = Some(err);
            }
        }
    }

    pub fn into_result(self) -> FsResult<()> {
        match self.0 {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
