// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error reported by a remote peer or coordinator

use serde::{Deserialize, Serialize};

/// Remote failure carrying the errno the peer observed, or a message when
/// the failure did not originate from a syscall.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[error("{}", self.describe())]
pub struct RemoteError {
    #[serde(rename = "en")]
    pub errno: i32,
    #[serde(rename = "m")]
    pub message: String,
}

impl RemoteError {
    pub fn from_errno(errno: i32) -> Self {
        Self {
            errno,
            message: String::new(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            errno: 0,
            message: message.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::from_errno(libc::ENOENT)
    }

    /// Errno to hand back to the kernel; `EIO` when the peer sent none
    pub fn errno(&self) -> i32 {
        if self.errno != 0 {
            self.errno
        } else {
            libc::EIO
        }
    }

    fn describe(&self) -> String {
        if self.errno != 0 {
            std::io::Error::from_raw_os_error(self.errno).to_string()
        } else {
            self.message.clone()
        }
    }
}
