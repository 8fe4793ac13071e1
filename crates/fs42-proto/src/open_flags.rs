// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Platform-independent encoding of open(2) flags
//!
//! Native `O_*` values differ between operating systems, so flags are
//! re-encoded into fixed bit positions before they are sent to a peer.
//! The access mode keeps the native `O_ACCMODE` value in the low bits;
//! POSIX leaves those values platform-defined but every supported target
//! uses 0/1/2 for read-only/write-only/read-write.

use libc::c_int;
use serde::{Deserialize, Serialize};

/// Agnostic open flags as carried over the remote boundary
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgnosticOpenFlags(pub u32);

impl AgnosticOpenFlags {
    pub const APPEND: AgnosticOpenFlags = AgnosticOpenFlags(0x8);
    pub const CREATE: AgnosticOpenFlags = AgnosticOpenFlags(0x10);
    pub const DIRECTORY: AgnosticOpenFlags = AgnosticOpenFlags(0x20);
    pub const EXCLUSIVE: AgnosticOpenFlags = AgnosticOpenFlags(0x40);
    pub const NONBLOCK: AgnosticOpenFlags = AgnosticOpenFlags(0x80);
    pub const SYNC: AgnosticOpenFlags = AgnosticOpenFlags(0x100);
    pub const TRUNCATE: AgnosticOpenFlags = AgnosticOpenFlags(0x200);

    /// Mask covering the access-mode field in the low bits
    pub const ACCESS_MODE_MASK: u32 = libc::O_ACCMODE as u32;

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: AgnosticOpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Access mode (`O_RDONLY`, `O_WRONLY` or `O_RDWR`) in native form
    pub fn access_mode(self) -> c_int {
        (self.0 & Self::ACCESS_MODE_MASK) as c_int
    }

    /// Decode into the native flag encoding of the running platform.
    ///
    /// Bits outside the defined set are dropped.
    pub fn to_native(self) -> c_int {
        let mut native = self.access_mode();
        for (agnostic, sys) in FLAG_MAP {
            if self.contains(*agnostic) {
                native |= *sys;
            }
        }
        native
    }
}

impl std::ops::BitOr for AgnosticOpenFlags {
    type Output = AgnosticOpenFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        AgnosticOpenFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for AgnosticOpenFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

const FLAG_MAP: &[(AgnosticOpenFlags, c_int)] = &[
    (AgnosticOpenFlags::APPEND, libc::O_APPEND),
    (AgnosticOpenFlags::CREATE, libc::O_CREAT),
    (AgnosticOpenFlags::DIRECTORY, libc::O_DIRECTORY),
    (AgnosticOpenFlags::EXCLUSIVE, libc::O_EXCL),
    (AgnosticOpenFlags::NONBLOCK, libc::O_NONBLOCK),
    (AgnosticOpenFlags::SYNC, libc::O_SYNC),
    (AgnosticOpenFlags::TRUNCATE, libc::O_TRUNC),
];

/// Encode native open flags into the agnostic representation.
///
/// Multi-bit native flags (Linux `O_SYNC` includes the `O_DSYNC` bit) only
/// match when every bit is present. Bits outside the defined set are dropped.
pub fn to_agnostic(native: c_int) -> AgnosticOpenFlags {
    let mut flags = AgnosticOpenFlags((native & libc::O_ACCMODE) as u32);
    for (agnostic, sys) in FLAG_MAP {
        if native & *sys == *sys {
            flags |= *agnostic;
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_mode_lives_in_low_bits() {
        assert_eq!(to_agnostic(libc::O_RDONLY).bits(), 0);
        assert_eq!(to_agnostic(libc::O_WRONLY).access_mode(), libc::O_WRONLY);
        assert_eq!(to_agnostic(libc::O_RDWR).access_mode(), libc::O_RDWR);
    }

    #[test]
    fn create_truncate_encode_to_fixed_bits() {
        let flags = to_agnostic(libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC);
        assert_eq!(flags.bits(), 0x1 | 0x10 | 0x200);
    }
}
