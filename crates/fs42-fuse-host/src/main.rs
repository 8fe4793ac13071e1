// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! fs42 FUSE host
//!
//! Mounts the fs42 tree: a README, the caller's public directory and,
//! when peers are reachable, other users' shared directories.

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod adapter;
#[cfg_attr(not(all(feature = "fuse", target_os = "linux")), allow(dead_code))]
mod dispatcher;
mod logging;
#[cfg_attr(not(all(feature = "fuse", target_os = "linux")), allow(dead_code))]
mod mount;
#[cfg_attr(not(all(feature = "fuse", target_os = "linux")), allow(dead_code))]
mod tables;

#[cfg(all(feature = "fuse", target_os = "linux"))]
use adapter::Fs42Fuse;
use anyhow::{Context, Result};
use clap::Parser;
use fs42_core::FsConfig;
use logging::LoggingArgs;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[cfg_attr(not(all(feature = "fuse", target_os = "linux")), allow(dead_code))]
#[command(name = "fs42-fuse-host", about = "Mount the fs42 shared filesystem")]
struct Args {
    /// Mount point for the filesystem
    mount_point: PathBuf,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Login whose root entry maps to the local directory
    #[arg(long)]
    login: Option<String>,

    /// Local directory shared under the login
    #[arg(long)]
    root: Option<PathBuf>,

    /// Allow other users to access the filesystem
    #[arg(long)]
    allow_other: bool,

    /// Allow root to access the filesystem
    #[arg(long)]
    allow_root: bool,

    /// Auto unmount on process exit
    #[arg(long)]
    auto_unmount: bool,

    #[command(flatten)]
    logging: LoggingArgs,
}

fn load_config(config_path: Option<&Path>) -> Result<FsConfig> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: FsConfig = serde_json::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))?;
            Ok(config)
        }
        None => Ok(FsConfig::default()),
    }
}

/// Command-line values win over the config file
fn apply_overrides(config: &mut FsConfig, args: &Args) {
    if let Some(login) = &args.login {
        config.login = login.clone();
    }
    if let Some(root) = &args.root {
        config.local_root = root.clone();
    }
}

#[cfg(all(feature = "fuse", target_os = "linux"))]
fn mount_options(config: &FsConfig, args: &Args) -> Vec<fuser::MountOption> {
    let mut options = vec![
        fuser::MountOption::FSName(config.mount.fs_name.clone()),
        fuser::MountOption::Subtype(config.mount.subtype.clone()),
    ];
    if args.allow_other {
        options.push(fuser::MountOption::AllowOther);
    }
    if args.allow_root {
        options.push(fuser::MountOption::AllowRoot);
    }
    if args.auto_unmount {
        options.push(fuser::MountOption::AutoUnmount);
    }
    options
}

fn main() -> Result<()> {
    let args = Args::parse();
    args.logging.init()?;

    info!(
        target: "fs42::mount",
        mount_point = %args.mount_point.display(),
        "starting fs42 FUSE host"
    );

    let mut config = load_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);
    config.validate().context("invalid configuration")?;
    info!(target: "fs42::mount", ?config, "configuration loaded");

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    {
        let options = mount_options(&config, &args);
        let session = mount::mount_with_retries(
            &args.mount_point,
            config.mount.mount_retries,
            || {
                // Peer discovery is not wired into the daemon; only the
                // README and the local directory are served.
                let filesystem = Fs42Fuse::new(fs42_core::Fs42::new(&config, None), &config.cache);
                fuser::spawn_mount2(filesystem, &args.mount_point, &options)
            },
            mount::lazy_unmount,
        )
        .with_context(|| format!("mounting {}", args.mount_point.display()))?;
        info!(target: "fs42::mount", "fs42 mounted; blocking until unmount");
        session.join();
    }

    #[cfg(not(all(feature = "fuse", target_os = "linux")))]
    {
        warn!("FUSE support not compiled in. This binary is for testing only.");
        info!("To enable FUSE support, compile with: cargo build --features fuse");
    }

    Ok(())
}
