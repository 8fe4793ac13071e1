// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration for fs42

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name of the synthetic welcome file at the filesystem root
pub const README_NAME: &str = "README";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("login must not be empty")]
    EmptyLogin,
    #[error("login {0:?} is not a valid directory name")]
    InvalidLogin(String),
    #[error("local root {0} does not exist or is not a directory")]
    MissingRoot(PathBuf),
}

/// Kernel cache lifetimes handed out with entry and attribute replies
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub attr_ttl_ms: u32,
    pub entry_ttl_ms: u32,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            attr_ttl_ms: 1000,
            entry_ttl_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub fs_name: String,
    pub subtype: String,
    /// Lazy-unmount-and-retry attempts when the mount point is held by a stale mount
    pub mount_retries: u32,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fs_name: "42fs".to_string(),
            subtype: "fs42".to_string(),
            mount_retries: 3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Login of the mounting user; its root entry maps to `local_root`
    pub login: String,
    pub local_root: PathBuf,
    pub cache: CachePolicy,
    pub enable_xattrs: bool,
    pub mount: MountConfig,
}

impl Default for FsConfig {
    fn default() -> Self {
        let login = std::env::var("USER").unwrap_or_default();
        let local_root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("public");
        Self {
            login,
            local_root,
            cache: CachePolicy::default(),
            enable_xattrs: true,
            mount: MountConfig::default(),
        }
    }
}

impl FsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.login.is_empty() {
            return Err(ConfigError::EmptyLogin);
        }
        if self.login == README_NAME
            || self.login == "."
            || self.login == ".."
            || self.login.contains('/')
            || self.login.contains('\0')
        {
            return Err(ConfigError::InvalidLogin(self.login.clone()));
        }
        if !self.local_root.is_dir() {
            return Err(ConfigError::MissingRoot(self.local_root.clone()));
        }
        Ok(())
    }
}
