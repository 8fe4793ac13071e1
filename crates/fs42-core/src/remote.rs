// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Backend for another user's shared directory, reached over a [`UserConnection`]

use crate::attr::{attributes_from_remote, dirent_kind};
use crate::connection::UserConnection;
use crate::error::{FsError, FsResult};
use crate::path::resolve_join;
use crate::types::{Attributes, DirEntry, NodeIdAllocator, XattrReply};
use fs42_proto::{to_agnostic, LookupKind, OpenResponseFlags, ReadRequest};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Default)]
struct RemoteState {
    nodes: HashMap<String, Arc<RemoteNode>>,
    open_files: HashMap<u64, Arc<RemoteFile>>,
}

/// Shared directory of one remote login
pub struct UserDir {
    login: String,
    conn: Arc<dyn UserConnection>,
    ids: Arc<NodeIdAllocator>,
    state: Mutex<RemoteState>,
}

impl std::fmt::Debug for UserDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDir").field("login", &self.login).finish()
    }
}

impl UserDir {
    pub fn new(
        login: impl Into<String>,
        conn: Arc<dyn UserConnection>,
        ids: Arc<NodeIdAllocator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            login: login.into(),
            conn,
            ids,
            state: Mutex::new(RemoteState::default()),
        })
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn root_node(self: &Arc<Self>) -> Arc<RemoteNode> {
        self.node_for(String::new())
    }

    pub fn cached_nodes(&self) -> usize {
        self.state.lock().nodes.len()
    }

    pub fn open_files(&self) -> usize {
        self.state.lock().open_files.len()
    }

    /// Close every open remote handle and drop every cached node
    pub fn clear(&self) {
        let files = {
            let mut state = self.state.lock();
            state.nodes.clear();
            std::mem::take(&mut state.open_files)
        };
        for file in files.into_values() {
            if let Err(err) = file.release() {
                warn!(
                    target: "fs42::remote",
                    login = %self.login,
                    handle = file.handle,
                    ?err,
                    "close during shutdown failed"
                );
            }
        }
    }

    fn node_for(self: &Arc<Self>, path: String) -> Arc<RemoteNode> {
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.get(&path) {
            return Arc::clone(node);
        }
        let node = Arc::new(RemoteNode {
            id: self.ids.allocate(),
            backend: Arc::clone(self),
            path: path.clone(),
        });
        state.nodes.insert(path, Arc::clone(&node));
        node
    }

    fn register_file(&self, file: Arc<RemoteFile>) -> Arc<RemoteFile> {
        self.state
            .lock()
            .open_files
            .insert(file.handle, Arc::clone(&file));
        file
    }

    fn unregister_file(&self, file: &RemoteFile) {
        let mut state = self.state.lock();
        if let Some(current) = state.open_files.get(&file.handle) {
            if std::ptr::eq(Arc::as_ptr(current), file) {
                state.open_files.remove(&file.handle);
            }
        }
    }

    fn forget_node(&self, node: &Arc<RemoteNode>) -> bool {
        let mut state = self.state.lock();
        match state.nodes.get(&node.path) {
            Some(current) if Arc::ptr_eq(current, node) => {
                state.nodes.remove(&node.path);
                true
            }
            _ => false,
        }
    }
}

fn utf8(name: &OsStr) -> FsResult<&str> {
    name.to_str().ok_or(FsError::InvalidPath)
}

/// A path inside a [`UserDir`]
pub struct RemoteNode {
    id: u64,
    backend: Arc<UserDir>,
    path: String,
}

impl std::fmt::Debug for RemoteNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteNode")
            .field("id", &self.id)
            .field("login", &self.backend.login)
            .field("path", &self.path)
            .finish()
    }
}

impl RemoteNode {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn backend(&self) -> &Arc<UserDir> {
        &self.backend
    }

    /// Peer-side path: `""` for the root, `"/a/b"` below it
    pub fn path(&self) -> &str {
        &self.path
    }

    fn child_path(&self, name: &OsStr) -> FsResult<String> {
        let parent = Path::new(self.path.trim_start_matches('/'));
        let joined = resolve_join(parent, name)?;
        let joined = joined.to_str().ok_or(FsError::InvalidPath)?;
        Ok(format!("/{joined}"))
    }

    fn conn(&self) -> &dyn UserConnection {
        self.backend.conn.as_ref()
    }

    pub fn attr(&self) -> FsResult<Attributes> {
        Ok(attributes_from_remote(&self.conn().stat(&self.path)?))
    }

    pub fn lookup(&self, name: &OsStr) -> FsResult<Arc<RemoteNode>> {
        let path = self.child_path(name)?;
        match self.conn().lookup_exists(&path)? {
            LookupKind::NotFound => Err(FsError::NotFound),
            LookupKind::File | LookupKind::Directory => Ok(self.backend.node_for(path)),
        }
    }

    pub fn access(&self, mask: i32) -> FsResult<()> {
        self.conn().access(&self.path, mask)?;
        Ok(())
    }

    pub fn open(self: &Arc<Self>, flags: i32, dir: bool) -> FsResult<Arc<RemoteFile>> {
        let (response, handle) = self.conn().open(&self.path, dir, to_agnostic(flags))?;
        debug!(
            target: "fs42::remote",
            login = %self.backend.login,
            path = %self.path,
            handle,
            dir,
            "open"
        );
        Ok(self.backend.register_file(Arc::new(RemoteFile {
            node: Arc::clone(self),
            handle,
            dir,
            flags,
            response,
            released: AtomicBool::new(false),
        })))
    }

    pub fn readlink(&self) -> FsResult<Vec<u8>> {
        Ok(self.conn().readlink(&self.path)?)
    }

    pub fn getxattr(&self, name: &OsStr, size: u32) -> FsResult<XattrReply> {
        let value = self.conn().getxattr(&self.path, utf8(name)?)?;
        XattrReply::for_buffer(value, size)
    }

    pub fn listxattr(&self, size: u32) -> FsResult<XattrReply> {
        XattrReply::for_buffer(self.conn().listxattr(&self.path)?, size)
    }

    pub fn forget(self: &Arc<Self>) {
        if self.backend.forget_node(self) {
            debug!(
                target: "fs42::remote",
                login = %self.backend.login,
                path = %self.path,
                "forgotten"
            );
        }
    }
}

/// An open remote handle
pub struct RemoteFile {
    node: Arc<RemoteNode>,
    handle: u64,
    dir: bool,
    flags: i32,
    response: OpenResponseFlags,
    released: AtomicBool,
}

impl std::fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("handle", &self.handle)
            .field("node", &self.node)
            .finish()
    }
}

impl RemoteFile {
    pub fn node(&self) -> &Arc<RemoteNode> {
        &self.node
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    /// Open flags the peer answered with
    pub fn response_flags(&self) -> OpenResponseFlags {
        self.response
    }

    pub fn read(&self, offset: i64, size: u32) -> FsResult<Vec<u8>> {
        let req = ReadRequest {
            fd: self.handle,
            dir: self.dir,
            offset,
            size,
            file_flags: self.flags,
        };
        Ok(self.node.conn().read_from(&req)?)
    }

    pub fn read_dir_all(&self) -> FsResult<Vec<DirEntry>> {
        let entries = self.node.conn().read_dir(self.handle)?;
        Ok(entries
            .into_iter()
            .map(|entry| DirEntry {
                inode: entry.inode,
                name: OsString::from(entry.name),
                kind: dirent_kind(entry.kind),
            })
            .collect())
    }

    /// Close the remote handle once; later calls do nothing
    pub fn release(&self) -> FsResult<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.node.backend.unregister_file(self);
        self.node.conn().close(self.handle)?;
        Ok(())
    }
}
