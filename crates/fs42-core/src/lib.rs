// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! fs42 core: nodes, handles and the local and remote backends behind them
//!
//! The tree exposed to the kernel has a synthetic root holding a `README`,
//! the mounting user's own directory (a passthrough of a local directory)
//! and, when a [`Coordinator`] is configured, other users' shared
//! directories reached over a [`UserConnection`].

pub mod attr;
pub mod config;
pub mod connection;
pub mod error;
pub mod local;
pub mod node;
pub mod path;
pub mod platform;
pub mod remote;
pub mod root;
pub mod types;

pub use config::{CachePolicy, ConfigError, FsConfig, MountConfig, README_NAME};
pub use connection::{Coordinator, UserConnection};
pub use error::{FirstError, FsError, FsResult};
pub use local::{LocalDir, LocalFile, LocalNode, MAX_READ_SIZE};
pub use node::{Handle, Node};
pub use remote::{RemoteFile, RemoteNode, UserDir};
pub use root::{Fs42, RootDir, README_TEXT};
pub use types::{
    Attributes, DirEntry, FileKind, NodeIdAllocator, SetAttrRequest, SetTime, XattrReply,
    FIRST_DYNAMIC_INO, README_INO, ROOT_INO,
};
