// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Passthrough backend over a local directory tree
//!
//! A [`LocalDir`] owns the path-keyed node cache and the descriptor-keyed
//! open-file table for one backing root. Both live behind a single lock that
//! is only held to read or insert, never across native I/O.

use crate::attr::create_mode;
use crate::error::{FirstError, FsError, FsResult};
use crate::path::resolve_join;
use crate::platform::{self, c_path, cvt};
use crate::types::{
    Attributes, DirEntry, FileKind, NodeIdAllocator, SetAttrRequest, SetTime, XattrReply,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::ffi::{CStr, OsStr, OsString};
use std::fs::{File, FileTimes, OpenOptions, Permissions};
use std::os::fd::{FromRawFd, IntoRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest read served by a single request
pub const MAX_READ_SIZE: usize = 64 * 1024;

/// Initial readlink buffer; doubled until the target fits
const READLINK_INITIAL: usize = 64;

// The umask is process-global.
static UMASK_LOCK: Mutex<()> = parking_lot::const_mutex(());

struct UmaskGuard {
    previous: libc::mode_t,
}

impl Drop for UmaskGuard {
    fn drop(&mut self) {
        unsafe { libc::umask(self.previous) };
    }
}

/// Run `f` with the process umask temporarily set to `umask`
fn with_umask<R>(umask: u32, f: impl FnOnce() -> R) -> R {
    let _lock = UMASK_LOCK.lock();
    let _guard = UmaskGuard {
        previous: unsafe { libc::umask((umask & 0o777) as libc::mode_t) },
    };
    f()
}

fn ebadf() -> FsError {
    FsError::from_errno(libc::EBADF)
}

fn einval() -> FsError {
    FsError::from_errno(libc::EINVAL)
}

#[derive(Default)]
struct LocalState {
    nodes: HashMap<PathBuf, Arc<LocalNode>>,
    open_files: HashMap<RawFd, Arc<LocalFile>>,
}

/// One local backing root
pub struct LocalDir {
    root: PathBuf,
    ids: Arc<NodeIdAllocator>,
    enable_xattrs: bool,
    state: Mutex<LocalState>,
}

impl std::fmt::Debug for LocalDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDir").field("root", &self.root).finish()
    }
}

impl LocalDir {
    pub fn new(
        root: impl Into<PathBuf>,
        ids: Arc<NodeIdAllocator>,
        enable_xattrs: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            root: root.into(),
            ids,
            enable_xattrs,
            state: Mutex::new(LocalState::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn root_node(self: &Arc<Self>) -> Arc<LocalNode> {
        self.node_for(PathBuf::new())
    }

    /// Number of nodes currently cached
    pub fn cached_nodes(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Number of handles not yet released
    pub fn open_files(&self) -> usize {
        self.state.lock().open_files.len()
    }

    /// Release every open handle and drop every cached node.
    ///
    /// Nodes keep their backend alive, so this is what lets a backend be
    /// freed at unmount.
    pub fn clear(&self) {
        let (nodes, files) = {
            let mut state = self.state.lock();
            (
                std::mem::take(&mut state.nodes),
                std::mem::take(&mut state.open_files),
            )
        };
        for file in files.into_values() {
            if let Err(err) = file.release() {
                warn!(target: "fs42::local", fd = file.fd, ?err, "release during shutdown failed");
            }
        }
        debug!(
            target: "fs42::local",
            root = %self.root.display(),
            nodes = nodes.len(),
            "backend cleared"
        );
    }

    fn native_path(&self, rel: &Path) -> PathBuf {
        if rel.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    fn node_for(self: &Arc<Self>, rel: PathBuf) -> Arc<LocalNode> {
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.get(&rel) {
            return Arc::clone(node);
        }
        let node = Arc::new(LocalNode {
            id: self.ids.allocate(),
            backend: Arc::clone(self),
            rel_path: rel.clone(),
        });
        state.nodes.insert(rel, Arc::clone(&node));
        node
    }

    fn register_file(&self, node: &Arc<LocalNode>, fd: RawFd) -> Arc<LocalFile> {
        let file = Arc::new(LocalFile {
            node: Arc::clone(node),
            fd,
            file: RwLock::new(Some(unsafe { File::from_raw_fd(fd) })),
            dir: Mutex::new(None),
            dirty: AtomicBool::new(false),
            released: AtomicBool::new(false),
        });
        self.state.lock().open_files.insert(fd, Arc::clone(&file));
        file
    }

    fn unregister_file(&self, file: &LocalFile) {
        let mut state = self.state.lock();
        if let Some(current) = state.open_files.get(&file.fd) {
            if std::ptr::eq(Arc::as_ptr(current), file) {
                state.open_files.remove(&file.fd);
            }
        }
    }

    fn forget_node(&self, node: &Arc<LocalNode>) -> bool {
        let mut state = self.state.lock();
        match state.nodes.get(&node.rel_path) {
            Some(current) if Arc::ptr_eq(current, node) => {
                state.nodes.remove(&node.rel_path);
                true
            }
            _ => false,
        }
    }
}

/// A path below a [`LocalDir`]
pub struct LocalNode {
    id: u64,
    backend: Arc<LocalDir>,
    rel_path: PathBuf,
}

impl std::fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNode")
            .field("id", &self.id)
            .field("path", &self.rel_path)
            .finish()
    }
}

impl LocalNode {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn backend(&self) -> &Arc<LocalDir> {
        &self.backend
    }

    /// Path relative to the backend root; empty for the root itself
    pub fn rel_path(&self) -> &Path {
        &self.rel_path
    }

    /// Native path of this node
    pub fn path(&self) -> PathBuf {
        self.backend.native_path(&self.rel_path)
    }

    fn child_path(&self, name: &OsStr) -> FsResult<(PathBuf, PathBuf)> {
        let rel = resolve_join(&self.rel_path, name)?;
        let native = self.backend.native_path(&rel);
        Ok((rel, native))
    }

    fn same_backend(&self, other: &LocalNode) -> FsResult<()> {
        if Arc::ptr_eq(&self.backend, &other.backend) {
            Ok(())
        } else {
            Err(FsError::WrongBackend)
        }
    }

    pub fn attr(&self) -> FsResult<Attributes> {
        platform::stat_path(&self.path())
    }

    pub fn lookup(&self, name: &OsStr) -> FsResult<Arc<LocalNode>> {
        let (rel, native) = self.child_path(name)?;
        match std::fs::symlink_metadata(&native) {
            Ok(_) => Ok(self.backend.node_for(rel)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(FsError::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    pub fn access(&self, mask: i32) -> FsResult<()> {
        let path = c_path(&self.path())?;
        cvt(unsafe { libc::access(path.as_ptr(), mask) })?;
        Ok(())
    }

    /// Open this node; `O_NONBLOCK` is dropped and `O_CLOEXEC` always set
    pub fn open(self: &Arc<Self>, flags: i32) -> FsResult<Arc<LocalFile>> {
        let path = c_path(&self.path())?;
        let flags = (flags & !libc::O_NONBLOCK) | libc::O_CLOEXEC;
        let fd = cvt(unsafe { libc::open(path.as_ptr(), flags) })?;
        debug!(target: "fs42::local", path = %self.rel_path.display(), fd, flags, "open");
        Ok(self.backend.register_file(self, fd))
    }

    pub fn create(
        &self,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
    ) -> FsResult<(Arc<LocalNode>, Arc<LocalFile>)> {
        let (rel, native) = self.child_path(name)?;
        let path = c_path(&native)?;
        let flags = (flags & !libc::O_NONBLOCK) | libc::O_CREAT | libc::O_CLOEXEC;
        let perm = create_mode((mode & 0o7777) as u16);
        let fd = with_umask(umask, || {
            cvt(unsafe { libc::open(path.as_ptr(), flags, libc::c_uint::from(perm)) })
        })?;
        let node = self.backend.node_for(rel);
        debug!(target: "fs42::local", path = %node.rel_path.display(), fd, "create");
        let file = self.backend.register_file(&node, fd);
        Ok((node, file))
    }

    pub fn mkdir(&self, name: &OsStr, mode: u32, umask: u32) -> FsResult<Arc<LocalNode>> {
        let (rel, native) = self.child_path(name)?;
        let path = c_path(&native)?;
        let perm = create_mode((mode & 0o7777) as u16);
        with_umask(umask, || cvt(unsafe { libc::mkdir(path.as_ptr(), perm) }))?;
        Ok(self.backend.node_for(rel))
    }

    pub fn symlink(&self, name: &OsStr, target: &Path) -> FsResult<Arc<LocalNode>> {
        let (rel, native) = self.child_path(name)?;
        std::os::unix::fs::symlink(target, &native)?;
        Ok(self.backend.node_for(rel))
    }

    /// Hard-link this node as `name` inside `new_parent`
    pub fn link(&self, new_parent: &LocalNode, name: &OsStr) -> FsResult<Arc<LocalNode>> {
        self.same_backend(new_parent)?;
        let (rel, native) = new_parent.child_path(name)?;
        std::fs::hard_link(self.path(), &native)?;
        Ok(self.backend.node_for(rel))
    }

    pub fn remove(&self, name: &OsStr, dir: bool) -> FsResult<()> {
        let (_, native) = self.child_path(name)?;
        if dir {
            std::fs::remove_dir(&native)?;
        } else {
            std::fs::remove_file(&native)?;
        }
        debug!(target: "fs42::local", path = %native.display(), dir, "removed");
        Ok(())
    }

    /// Rename `name` to `new_name` inside `new_parent`; only plain renames are supported
    pub fn rename(
        &self,
        name: &OsStr,
        new_parent: &LocalNode,
        new_name: &OsStr,
        flags: u32,
    ) -> FsResult<()> {
        self.same_backend(new_parent)?;
        if flags != 0 {
            return Err(einval());
        }
        let (_, from) = self.child_path(name)?;
        let (_, to) = new_parent.child_path(new_name)?;
        std::fs::rename(&from, &to)?;
        Ok(())
    }

    pub fn readlink(&self) -> FsResult<Vec<u8>> {
        let path = c_path(&self.path())?;
        let mut capacity = READLINK_INITIAL;
        loop {
            let mut buf = vec![0u8; capacity];
            let n = cvt(unsafe {
                libc::readlink(path.as_ptr(), buf.as_mut_ptr().cast(), capacity)
            })? as usize;
            if n < capacity {
                buf.truncate(n);
                return Ok(buf);
            }
            capacity *= 2;
        }
    }

    /// Apply every requested change, returning the first failure or the
    /// resulting attributes.
    pub fn setattr(&self, req: &SetAttrRequest) -> FsResult<Attributes> {
        let path = self.path();
        let mut result = FirstError::new();

        if let Some(size) = req.size {
            result.record(truncate(&path, size));
        }
        if let Some(mode) = req.mode {
            result.record(
                std::fs::set_permissions(&path, Permissions::from_mode(mode & 0o7777))
                    .map_err(FsError::from),
            );
        }
        if req.uid.is_some() || req.gid.is_some() {
            result.record::<()>(Err(FsError::PermissionDenied));
        }
        result.record(platform::set_platform_attributes(&path, req));
        if req.atime.is_some() || req.mtime.is_some() {
            result.record(set_times(&path, req.atime, req.mtime));
        }

        if let Err(err) = result.into_result() {
            debug!(target: "fs42::local", path = %self.rel_path.display(), ?err, "setattr failed");
            return Err(err);
        }
        self.attr()
    }

    fn check_xattrs(&self) -> FsResult<()> {
        if self.backend.enable_xattrs {
            Ok(())
        } else {
            Err(FsError::NotSupported)
        }
    }

    pub fn getxattr(&self, name: &OsStr, size: u32) -> FsResult<XattrReply> {
        self.check_xattrs()?;
        XattrReply::for_buffer(platform::getxattr(&self.path(), name)?, size)
    }

    pub fn listxattr(&self, size: u32) -> FsResult<XattrReply> {
        self.check_xattrs()?;
        XattrReply::for_buffer(platform::listxattr(&self.path())?, size)
    }

    pub fn setxattr(&self, name: &OsStr, value: &[u8], flags: i32, position: u32) -> FsResult<()> {
        self.check_xattrs()?;
        platform::setxattr(&self.path(), name, value, flags, position)
    }

    pub fn removexattr(&self, name: &OsStr) -> FsResult<()> {
        self.check_xattrs()?;
        platform::removexattr(&self.path(), name)
    }

    pub fn fsync(&self, datasync: bool) -> FsResult<()> {
        platform::fsync_path(&self.path(), datasync)
    }

    /// Drop this instance from the node cache unless it was already replaced
    pub fn forget(self: &Arc<Self>) {
        if self.backend.forget_node(self) {
            debug!(
                target: "fs42::local",
                path = %self.rel_path.display(),
                id = self.id,
                "forgotten"
            );
        }
    }
}

fn truncate(path: &Path, size: u64) -> FsResult<()> {
    let path = c_path(path)?;
    let size = libc::off_t::try_from(size).map_err(|_| einval())?;
    cvt(unsafe { libc::truncate(path.as_ptr(), size) })?;
    Ok(())
}

fn set_times(path: &Path, atime: Option<SetTime>, mtime: Option<SetTime>) -> FsResult<()> {
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)?;
    let mut times = FileTimes::new();
    if let Some(atime) = atime {
        times = times.set_accessed(atime.resolve());
    }
    if let Some(mtime) = mtime {
        times = times.set_modified(mtime.resolve());
    }
    file.set_times(times)?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn clear_errno() {
    unsafe { *libc::__errno_location() = 0 };
}

#[cfg(target_os = "macos")]
fn clear_errno() {
    unsafe { *libc::__error() = 0 };
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn clear_errno() {}

/// Directory stream over a duplicate of a handle's descriptor
struct DirStream(NonNull<libc::DIR>);

// The stream is only touched under the owning handle's lock.
unsafe impl Send for DirStream {}

impl DirStream {
    fn open(fd: RawFd) -> FsResult<Self> {
        let dup = cvt(unsafe { libc::dup(fd) })?;
        match NonNull::new(unsafe { libc::fdopendir(dup) }) {
            Some(dir) => Ok(Self(dir)),
            None => {
                let err = FsError::last_os_error();
                unsafe { libc::close(dup) };
                Err(err)
            }
        }
    }

    /// Names and inode numbers from the start of the directory, without `.` and `..`
    fn entries(&mut self) -> FsResult<Vec<(OsString, u64)>> {
        unsafe { libc::rewinddir(self.0.as_ptr()) };
        let mut entries = Vec::new();
        loop {
            clear_errno();
            let entry = unsafe { libc::readdir(self.0.as_ptr()) };
            if entry.is_null() {
                let err = std::io::Error::last_os_error();
                return match err.raw_os_error() {
                    Some(0) | None => Ok(entries),
                    Some(_) => Err(err.into()),
                };
            }
            let entry = unsafe { &*entry };
            let name = unsafe { CStr::from_ptr(entry.d_name.as_ptr()) }.to_bytes();
            if name == b"." || name == b".." {
                continue;
            }
            entries.push((OsStr::from_bytes(name).to_os_string(), entry.d_ino as u64));
        }
    }

    fn close(self) -> FsResult<()> {
        let dir = self.0;
        std::mem::forget(self);
        cvt(unsafe { libc::closedir(dir.as_ptr()) })?;
        Ok(())
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        unsafe { libc::closedir(self.0.as_ptr()) };
    }
}

/// An open descriptor on a [`LocalNode`]
pub struct LocalFile {
    node: Arc<LocalNode>,
    fd: RawFd,
    file: RwLock<Option<File>>,
    dir: Mutex<Option<DirStream>>,
    dirty: AtomicBool,
    released: AtomicBool,
}

impl std::fmt::Debug for LocalFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFile")
            .field("fd", &self.fd)
            .field("node", &self.node)
            .finish()
    }
}

impl LocalFile {
    pub fn node(&self) -> &Arc<LocalNode> {
        &self.node
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Whether a write went through this handle
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Positioned read of at most [`MAX_READ_SIZE`] bytes
    pub fn read(&self, offset: i64, size: u32) -> FsResult<Vec<u8>> {
        let offset = u64::try_from(offset).map_err(|_| einval())?;
        let guard = self.file.read();
        let file = guard.as_ref().ok_or_else(ebadf)?;
        let mut buf = vec![0u8; (size as usize).min(MAX_READ_SIZE)];
        let n = file.read_at(&mut buf, offset)?;
        buf.truncate(n);
        Ok(buf)
    }

    pub fn write(&self, offset: i64, data: &[u8]) -> FsResult<u32> {
        let offset = u64::try_from(offset).map_err(|_| einval())?;
        let guard = self.file.read();
        let file = guard.as_ref().ok_or_else(ebadf)?;
        let n = file.write_at(data, offset)?;
        self.dirty.store(true, Ordering::Release);
        Ok(n as u32)
    }

    /// Every entry of the directory, classified by a no-follow status lookup
    pub fn read_dir_all(&self) -> FsResult<Vec<DirEntry>> {
        let guard = self.file.read();
        guard.as_ref().ok_or_else(ebadf)?;

        let raw = {
            let mut dir = self.dir.lock();
            if dir.is_none() {
                *dir = Some(DirStream::open(self.fd)?);
            }
            match dir.as_mut() {
                Some(stream) => stream.entries()?,
                None => return Err(ebadf()),
            }
        };

        let base = self.node.path();
        Ok(raw
            .into_iter()
            .map(|(name, inode)| {
                let kind = std::fs::symlink_metadata(base.join(&name))
                    .ok()
                    .map(|meta| FileKind::from_mode(meta.mode()));
                DirEntry { inode, name, kind }
            })
            .collect())
    }

    /// Close the descriptor and any directory stream; later calls do nothing
    pub fn release(&self) -> FsResult<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.node.backend.unregister_file(self);

        let mut result = FirstError::new();
        if let Some(dir) = self.dir.lock().take() {
            result.record(dir.close());
        }
        if let Some(file) = self.file.write().take() {
            let fd = file.into_raw_fd();
            result.record(cvt(unsafe { libc::close(fd) }));
        }
        debug!(target: "fs42::local", fd = self.fd, dirty = self.is_dirty(), "released");
        result.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn backend() -> (TempDir, Arc<LocalDir>) {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalDir::new(dir.path(), Arc::new(NodeIdAllocator::new()), true);
        (dir, local)
    }

    fn name(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    #[test]
    fn concurrent_lookups_share_one_node() {
        let (dir, local) = backend();
        std::fs::write(dir.path().join("shared"), b"x").unwrap();
        let root = local.root_node();

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let root = Arc::clone(&root);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    root.lookup(OsStr::new("shared")).unwrap()
                })
            })
            .collect();
        let nodes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for node in &nodes[1..] {
            assert!(Arc::ptr_eq(&nodes[0], node));
        }
        assert_eq!(local.cached_nodes(), 2);
        local.clear();
    }

    #[test]
    fn forget_leaves_newer_instance_cached() {
        let (dir, local) = backend();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let root = local.root_node();

        let first = root.lookup(name("f")).unwrap();
        first.forget();
        let second = root.lookup(name("f")).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_ne!(first.id(), second.id());

        // A stale forget must not evict the replacement
        first.forget();
        let third = root.lookup(name("f")).unwrap();
        assert!(Arc::ptr_eq(&second, &third));
        local.clear();
    }

    #[test]
    fn lookup_missing_is_not_found() {
        let (_dir, local) = backend();
        let err = local.root_node().lookup(name("absent")).unwrap_err();
        assert!(matches!(err, FsError::NotFound));
        local.clear();
    }

    #[test]
    fn escaping_names_never_touch_outside_root() {
        let outer = tempfile::tempdir().unwrap();
        let inner = outer.path().join("inner");
        std::fs::create_dir(&inner).unwrap();
        std::fs::write(outer.path().join("secret"), b"s").unwrap();
        let local = LocalDir::new(&inner, Arc::new(NodeIdAllocator::new()), true);
        let root = local.root_node();

        assert!(matches!(
            root.lookup(name("../secret")),
            Err(FsError::InvalidPath)
        ));
        assert!(matches!(
            root.lookup(name("../../etc/passwd")),
            Err(FsError::InvalidPath)
        ));
        assert!(matches!(
            root.create(name("../escaped"), 0o644, 0o022, libc::O_WRONLY),
            Err(FsError::InvalidPath)
        ));
        assert!(!outer.path().join("escaped").exists());
        assert!(matches!(
            root.remove(name("../secret"), false),
            Err(FsError::InvalidPath)
        ));
        assert!(outer.path().join("secret").exists());

        // Names that resolve to the root itself never reach the root directory
        std::fs::create_dir(inner.join("sub")).unwrap();
        for dot in [".", "sub/..", "./"] {
            assert!(matches!(
                root.remove(name(dot), true),
                Err(FsError::InvalidPath)
            ));
            assert!(matches!(
                root.mkdir(name(dot), 0o755, 0),
                Err(FsError::InvalidPath)
            ));
            assert!(matches!(
                root.rename(name(dot), &root, name("moved"), 0),
                Err(FsError::InvalidPath)
            ));
        }
        assert!(inner.is_dir());
        assert!(!inner.join("moved").exists());
        local.clear();
    }

    #[test]
    fn open_release_keeps_table_consistent() {
        let (dir, local) = backend();
        std::fs::write(dir.path().join("f"), b"hello").unwrap();
        let node = local.root_node().lookup(name("f")).unwrap();

        let file = node.open(libc::O_RDONLY | libc::O_NONBLOCK).unwrap();
        assert_eq!(local.open_files(), 1);
        assert_eq!(file.read(0, 16).unwrap(), b"hello");

        file.release().unwrap();
        assert_eq!(local.open_files(), 0);
        file.release().unwrap();
        assert_eq!(local.open_files(), 0);
        assert_eq!(file.read(0, 16).unwrap_err().errno(), libc::EBADF);
        local.clear();
    }

    #[test]
    fn reads_are_clamped() {
        let (dir, local) = backend();
        std::fs::write(dir.path().join("big"), vec![7u8; 100 * 1024]).unwrap();
        let file = local
            .root_node()
            .lookup(name("big"))
            .unwrap()
            .open(libc::O_RDONLY)
            .unwrap();

        assert_eq!(file.read(0, 128 * 1024).unwrap().len(), MAX_READ_SIZE);
        assert_eq!(file.read(96 * 1024, 64 * 1024).unwrap().len(), 4 * 1024);
        file.release().unwrap();
        local.clear();
    }

    #[test]
    fn create_then_write_marks_dirty() {
        let (dir, local) = backend();
        let root = local.root_node();
        let (node, file) = root
            .create(name("new"), 0o644, 0o022, libc::O_RDWR)
            .unwrap();
        assert!(!file.is_dirty());
        assert_eq!(file.write(0, b"data").unwrap(), 4);
        assert!(file.is_dirty());
        assert_eq!(file.read(0, 10).unwrap(), b"data");
        assert!(Arc::ptr_eq(&node, &root.lookup(name("new")).unwrap()));
        assert_eq!(std::fs::read(dir.path().join("new")).unwrap(), b"data");
        file.release().unwrap();
        local.clear();
    }

    #[test]
    fn creation_applies_requested_umask() {
        let (_dir, local) = backend();
        let root = local.root_node();

        let (node, file) = root
            .create(name("masked"), 0o666, 0o027, libc::O_WRONLY)
            .unwrap();
        file.release().unwrap();
        assert_eq!(node.attr().unwrap().perm, 0o640);

        let sub = root.mkdir(name("sub"), 0o777, 0o077).unwrap();
        assert_eq!(sub.attr().unwrap().perm, 0o700);
        assert_eq!(sub.attr().unwrap().kind, FileKind::Directory);
        local.clear();
    }

    #[test]
    fn directory_listing_classifies_entries() {
        let (dir, local) = backend();
        std::fs::write(dir.path().join("file"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        std::os::unix::fs::symlink("file", dir.path().join("link")).unwrap();

        let handle = local.root_node().open(libc::O_RDONLY | libc::O_DIRECTORY).unwrap();
        let mut entries = handle.read_dir_all().unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let kinds: Vec<_> = entries
            .iter()
            .map(|e| (e.name.to_str().unwrap(), e.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("file", Some(FileKind::RegularFile)),
                ("link", Some(FileKind::Symlink)),
                ("subdir", Some(FileKind::Directory)),
            ]
        );

        // Listing again rewinds the stream
        assert_eq!(handle.read_dir_all().unwrap().len(), 3);
        handle.release().unwrap();
        local.clear();
    }

    #[test]
    fn readlink_grows_buffer_for_long_targets() {
        let (dir, local) = backend();
        let target = "t".repeat(200);
        std::os::unix::fs::symlink(&target, dir.path().join("long")).unwrap();
        let node = local.root_node().lookup(name("long")).unwrap();
        assert_eq!(node.readlink().unwrap(), target.as_bytes());

        let short = local.root_node().symlink(name("short"), Path::new("x")).unwrap();
        assert_eq!(short.readlink().unwrap(), b"x");
        local.clear();
    }

    #[test]
    fn setattr_applies_valid_steps_and_reports_first_error() {
        let (dir, local) = backend();
        std::fs::write(dir.path().join("f"), b"0123456789").unwrap();
        let node = local.root_node().lookup(name("f")).unwrap();

        let req = SetAttrRequest {
            size: Some(3),
            uid: Some(0),
            mode: Some(0o600),
            ..SetAttrRequest::default()
        };
        assert!(matches!(node.setattr(&req), Err(FsError::PermissionDenied)));
        let attrs = node.attr().unwrap();
        assert_eq!(attrs.size, 3);
        assert_eq!(attrs.perm, 0o600);
        local.clear();
    }

    #[test]
    fn setattr_unsupported_time_and_uid_keep_first_error() {
        let (dir, local) = backend();
        std::fs::write(dir.path().join("f"), b"0123456789").unwrap();
        let node = local.root_node().lookup(name("f")).unwrap();

        let req = SetAttrRequest {
            mode: Some(0o640),
            uid: Some(12_345),
            crtime: Some(UNIX_EPOCH + Duration::from_secs(42)),
            mtime: Some(SetTime::At(UNIX_EPOCH + Duration::from_secs(3_000_000))),
            ..SetAttrRequest::default()
        };
        assert!(matches!(node.setattr(&req), Err(FsError::PermissionDenied)));
        let attrs = node.attr().unwrap();
        assert_eq!(attrs.perm, 0o640);
        assert_eq!(attrs.mtime, UNIX_EPOCH + Duration::from_secs(3_000_000));
        local.clear();
    }

    #[test]
    fn access_checks_the_backing_file() {
        let (dir, local) = backend();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let node = local.root_node().lookup(name("f")).unwrap();

        node.access(libc::F_OK).unwrap();
        node.access(libc::R_OK).unwrap();
        std::fs::remove_file(dir.path().join("f")).unwrap();
        assert_eq!(node.access(libc::F_OK).unwrap_err().errno(), libc::ENOENT);
        local.clear();
    }

    #[cfg(all(feature = "xattr", target_os = "linux"))]
    #[test]
    fn xattrs_round_trip_through_node() {
        let (dir, local) = backend();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let node = local.root_node().lookup(name("f")).unwrap();

        let key = name("user.fs42.colour");
        match node.setxattr(key, b"mauve", 0, 0) {
            Ok(()) => {}
            Err(err) if err.errno() == libc::ENOTSUP => {
                eprintln!("Skipping xattr test: user xattrs unsupported on this filesystem");
                local.clear();
                return;
            }
            Err(err) => panic!("setxattr failed: {err}"),
        }

        assert_eq!(node.getxattr(key, 0).unwrap(), XattrReply::Size(5));
        assert_eq!(
            node.getxattr(key, 5).unwrap(),
            XattrReply::Data(b"mauve".to_vec())
        );
        assert_eq!(node.getxattr(key, 2).unwrap_err().errno(), libc::ERANGE);
        assert_eq!(
            node.getxattr(name("user.fs42.missing"), 64)
                .unwrap_err()
                .errno(),
            libc::ENODATA
        );

        let XattrReply::Data(names) = node.listxattr(4096).unwrap() else {
            panic!("listxattr with a buffer should return data");
        };
        assert!(names
            .split(|b| *b == 0)
            .any(|entry| entry == b"user.fs42.colour"));
        assert!(matches!(
            node.setxattr(key, b"x", 0, 8),
            Err(FsError::Io(_))
        ));

        node.removexattr(key).unwrap();
        assert_eq!(node.getxattr(key, 64).unwrap_err().errno(), libc::ENODATA);
        local.clear();
    }

    #[test]
    fn setattr_sets_distinct_times() {
        let (dir, local) = backend();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let node = local.root_node().lookup(name("f")).unwrap();

        let atime = UNIX_EPOCH + Duration::from_secs(1_000_000);
        let mtime = UNIX_EPOCH + Duration::from_secs(2_000_000);
        let attrs = node
            .setattr(&SetAttrRequest {
                atime: Some(SetTime::At(atime)),
                mtime: Some(SetTime::At(mtime)),
                ..SetAttrRequest::default()
            })
            .unwrap();
        assert_eq!(attrs.atime, atime);
        assert_eq!(attrs.mtime, mtime);
        local.clear();
    }

    #[test]
    fn cross_backend_link_and_rename_fail() {
        let (dir_a, a) = backend();
        let (_dir_b, b) = backend();
        std::fs::write(dir_a.path().join("f"), b"x").unwrap();
        let file = a.root_node().lookup(name("f")).unwrap();

        assert!(matches!(
            file.link(&b.root_node(), name("g")),
            Err(FsError::WrongBackend)
        ));
        assert!(matches!(
            a.root_node().rename(name("f"), &b.root_node(), name("g"), 0),
            Err(FsError::WrongBackend)
        ));
        a.clear();
        b.clear();
    }

    #[test]
    fn link_rename_remove_within_backend() {
        let (dir, local) = backend();
        let root = local.root_node();
        std::fs::write(dir.path().join("a"), b"x").unwrap();
        let a = root.lookup(name("a")).unwrap();

        let b = a.link(&root, name("b")).unwrap();
        assert_eq!(b.attr().unwrap().nlink, 2);

        root.rename(name("b"), &root, name("c"), 0).unwrap();
        assert!(dir.path().join("c").exists());
        root.remove(name("c"), false).unwrap();
        assert!(!dir.path().join("c").exists());

        root.mkdir(name("d"), 0o755, 0).unwrap();
        root.remove(name("d"), true).unwrap();
        assert!(matches!(root.lookup(name("d")), Err(FsError::NotFound)));
        local.clear();
    }

    #[test]
    fn disabled_xattrs_report_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalDir::new(dir.path(), Arc::new(NodeIdAllocator::new()), false);
        let root = local.root_node();
        assert!(matches!(root.listxattr(0), Err(FsError::NotSupported)));
        assert!(matches!(
            root.setxattr(name("user.k"), b"v", 0, 0),
            Err(FsError::NotSupported)
        ));
        local.clear();
    }

    #[test]
    fn clear_releases_outstanding_handles() {
        let (dir, local) = backend();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let file = local
            .root_node()
            .lookup(name("f"))
            .unwrap()
            .open(libc::O_RDONLY)
            .unwrap();
        local.clear();
        assert_eq!(local.open_files(), 0);
        assert_eq!(local.cached_nodes(), 0);
        assert_eq!(file.read(0, 1).unwrap_err().errno(), libc::EBADF);
    }
}
