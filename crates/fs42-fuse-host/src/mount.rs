// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mounting over a stale fs42 mount

use std::io;
use std::path::Path;
use std::process::Command;
use tracing::{info, warn};

/// Helpers tried in order to detach a mount
const UNMOUNT_HELPERS: [&str; 2] = ["fusermount3", "fusermount"];

/// A previous daemon died without unmounting, or the mount point is in use
pub fn is_stale_mount(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EBUSY) | Some(libc::ENOTCONN))
}

/// Run `attempt`, lazily unmounting `mountpoint` and trying again up to
/// `retries` times while it fails with a stale-mount error.
pub fn mount_with_retries<T, M, U>(
    mountpoint: &Path,
    retries: u32,
    mut attempt: M,
    mut unmount: U,
) -> io::Result<T>
where
    M: FnMut() -> io::Result<T>,
    U: FnMut(&Path) -> io::Result<()>,
{
    let mut tries = 0;
    loop {
        match attempt() {
            Ok(mounted) => return Ok(mounted),
            Err(err) if tries < retries && is_stale_mount(&err) => {
                tries += 1;
                warn!(
                    target: "fs42::mount",
                    mountpoint = %mountpoint.display(),
                    attempt = tries,
                    %err,
                    "mount point busy, unmounting"
                );
                if let Err(err) = unmount(mountpoint) {
                    warn!(target: "fs42::mount", %err, "lazy unmount failed");
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Detach `mountpoint` with `fusermount3 -uz`, falling back to `fusermount -uz`
pub fn lazy_unmount(mountpoint: &Path) -> io::Result<()> {
    let mut last = io::Error::from_raw_os_error(libc::ENOENT);
    for helper in UNMOUNT_HELPERS {
        match Command::new(helper).arg("-uz").arg(mountpoint).output() {
            Ok(output) if output.status.success() => {
                info!(
                    target: "fs42::mount",
                    helper,
                    mountpoint = %mountpoint.display(),
                    "unmounted"
                );
                return Ok(());
            }
            Ok(output) => {
                last = io::Error::other(format!(
                    "{helper} -uz {} failed: {}",
                    mountpoint.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ));
            }
            Err(err) => last = err,
        }
    }
    Err(last)
}
