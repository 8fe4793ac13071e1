// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! fs42 FUSE adapter
//!
//! Resolves kernel inode and handle numbers through the host tables, then
//! hands each request to the worker pool, which calls into fs42 core and
//! sends the reply.

#[cfg(not(all(feature = "fuse", target_os = "linux")))]
compile_error!("This module requires the 'fuse' feature on Linux");

use crate::dispatcher::{worker_count, RequestDispatcher};
use crate::tables::{HandleTable, NodeTable};
use fs42_core::{
    Attributes, CachePolicy, FileKind, Fs42, FsError, FsResult, Node, SetAttrRequest, SetTime,
    XattrReply,
};
use fuser::{
    FileAttr, FileType, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use libc::{c_int, EBADF, ENOENT};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

fn file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::NamedPipe => FileType::NamedPipe,
        FileKind::CharDevice => FileType::CharDevice,
        FileKind::BlockDevice => FileType::BlockDevice,
        FileKind::Directory => FileType::Directory,
        FileKind::RegularFile => FileType::RegularFile,
        FileKind::Symlink => FileType::Symlink,
        FileKind::Socket => FileType::Socket,
    }
}

/// Kernel attributes for the node `ino`; the backend inode stays internal
fn fuse_attr(ino: u64, attr: &Attributes) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.crtime,
        kind: file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        blksize: attr.blksize,
        flags: attr.flags,
    }
}

fn set_time(time: TimeOrNow) -> SetTime {
    match time {
        TimeOrNow::Now => SetTime::Now,
        TimeOrNow::SpecificTime(at) => SetTime::At(at),
    }
}

/// Log a failed request and return the errno to reply with
fn errno(op: &'static str, ino: u64, err: FsError) -> c_int {
    let code = err.errno();
    debug!(target: "fs42::fuse", op, ino, errno = code, ?err, "request failed");
    code
}

/// Account a freshly looked-up node and build its entry attributes
fn remember(nodes: &NodeTable, node: FsResult<Node>) -> FsResult<FileAttr> {
    let node = node?;
    let attr = nodes.remember_entry(&node)?;
    Ok(fuse_attr(node.id(), &attr))
}

pub struct Fs42Fuse {
    fs: Arc<Fs42>,
    nodes: Arc<NodeTable>,
    handles: Arc<HandleTable>,
    dispatcher: RequestDispatcher,
    attr_ttl: Duration,
    entry_ttl: Duration,
}

impl Fs42Fuse {
    pub fn new(fs: Fs42, cache: &CachePolicy) -> Self {
        let nodes = Arc::new(NodeTable::new(&fs));
        Self {
            fs: Arc::new(fs),
            nodes,
            handles: Arc::new(HandleTable::new()),
            dispatcher: RequestDispatcher::new(worker_count()),
            attr_ttl: Duration::from_millis(cache.attr_ttl_ms.into()),
            entry_ttl: Duration::from_millis(cache.entry_ttl_ms.into()),
        }
    }

    fn node(&self, ino: u64) -> Option<Node> {
        let node = self.nodes.get(ino);
        if node.is_none() {
            debug!(target: "fs42::fuse", ino, "unknown inode");
        }
        node
    }

    /// Run a request that replies with a new directory entry
    fn reply_entry<F>(&self, op: &'static str, parent: u64, reply: ReplyEntry, make: F)
    where
        F: FnOnce() -> FsResult<Node> + Send + 'static,
    {
        let nodes = Arc::clone(&self.nodes);
        let ttl = self.entry_ttl;
        self.dispatcher.submit(move || match remember(&nodes, make()) {
            Ok(attr) => reply.entry(&ttl, &attr, 0),
            Err(err) => reply.error(errno(op, parent, err)),
        });
    }

    /// Run a request that replies with nothing but success or an errno
    fn reply_empty<F>(&self, op: &'static str, ino: u64, reply: ReplyEmpty, run: F)
    where
        F: FnOnce() -> FsResult<()> + Send + 'static,
    {
        self.dispatcher.submit(move || match run() {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(errno(op, ino, err)),
        });
    }

    fn open_node(&self, ino: u64, flags: i32, dir: bool, reply: ReplyOpen) {
        let Some(node) = self.node(ino) else {
            reply.error(ENOENT);
            return;
        };
        let handles = Arc::clone(&self.handles);
        let op = if dir { "opendir" } else { "open" };
        self.dispatcher.submit(move || match node.open(flags, dir) {
            Ok(handle) => {
                let response = handle.response_flags();
                let fh = handles.insert(handle);
                debug!(target: "fs42::fuse", op, ino, fh, "opened");
                reply.opened(fh, response);
            }
            Err(err) => reply.error(errno(op, ino, err)),
        });
    }

    fn release_handle(&self, ino: u64, fh: u64, reply: ReplyEmpty) {
        let Some(open) = self.handles.remove(fh) else {
            reply.error(EBADF);
            return;
        };
        self.reply_empty("release", ino, reply, move || open.handle().release());
    }
}

impl fuser::Filesystem for Fs42Fuse {
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(
            target: "fs42::fuse",
            login = self.fs.root_dir().login(),
            workers = self.dispatcher.worker_count(),
            attr_ttl_ms = self.attr_ttl.as_millis() as u64,
            entry_ttl_ms = self.entry_ttl.as_millis() as u64,
            "fs42 mounted"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        let open = self.handles.drain();
        if !open.is_empty() {
            warn!(target: "fs42::fuse", count = open.len(), "releasing handles left open");
        }
        for handle in open {
            if let Err(err) = handle.handle().release() {
                warn!(target: "fs42::fuse", ?err, "release during unmount failed");
            }
        }
        self.nodes.clear();
        self.fs.shutdown();
        info!(target: "fs42::fuse", "fs42 unmounted");
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(dir) = self.node(parent) else {
            reply.error(ENOENT);
            return;
        };
        let name = name.to_os_string();
        self.reply_entry("lookup", parent, reply, move || dir.lookup(&name));
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        self.nodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(node) = self.node(ino) else {
            reply.error(ENOENT);
            return;
        };
        let ttl = self.attr_ttl;
        self.dispatcher.submit(move || match node.attr() {
            Ok(attr) => reply.attr(&ttl, &fuse_attr(ino, &attr)),
            Err(err) => reply.error(errno("getattr", ino, err)),
        });
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        crtime: Option<SystemTime>,
        chgtime: Option<SystemTime>,
        bkuptime: Option<SystemTime>,
        flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(node) = self.node(ino) else {
            reply.error(ENOENT);
            return;
        };
        let request = SetAttrRequest {
            mode,
            uid,
            gid,
            size,
            atime: atime.map(set_time),
            mtime: mtime.map(set_time),
            crtime,
            chgtime,
            bkuptime,
            flags,
        };
        let ttl = self.attr_ttl;
        self.dispatcher.submit(move || match node.setattr(&request) {
            Ok(attr) => reply.attr(&ttl, &fuse_attr(ino, &attr)),
            Err(err) => reply.error(errno("setattr", ino, err)),
        });
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        let Some(node) = self.node(ino) else {
            reply.error(ENOENT);
            return;
        };
        self.dispatcher.submit(move || match node.readlink() {
            Ok(target) => reply.data(&target),
            Err(err) => reply.error(errno("readlink", ino, err)),
        });
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(dir) = self.node(parent) else {
            reply.error(ENOENT);
            return;
        };
        let name = name.to_os_string();
        self.reply_entry("mkdir", parent, reply, move || dir.mkdir(&name, mode, umask));
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(dir) = self.node(parent) else {
            reply.error(ENOENT);
            return;
        };
        let name = name.to_os_string();
        self.reply_empty("unlink", parent, reply, move || dir.remove(&name, false));
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(dir) = self.node(parent) else {
            reply.error(ENOENT);
            return;
        };
        let name = name.to_os_string();
        self.reply_empty("rmdir", parent, reply, move || dir.remove(&name, true));
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let Some(dir) = self.node(parent) else {
            reply.error(ENOENT);
            return;
        };
        let name = link_name.to_os_string();
        let target = target.to_path_buf();
        self.reply_entry("symlink", parent, reply, move || dir.symlink(&name, &target));
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(dir), Some(new_dir)) = (self.node(parent), self.node(newparent)) else {
            reply.error(ENOENT);
            return;
        };
        let name = name.to_os_string();
        let new_name = newname.to_os_string();
        self.reply_empty("rename", parent, reply, move || {
            dir.rename(&name, &new_dir, &new_name, flags)
        });
    }

    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let (Some(target), Some(dir)) = (self.node(ino), self.node(newparent)) else {
            reply.error(ENOENT);
            return;
        };
        let name = newname.to_os_string();
        self.reply_entry("link", newparent, reply, move || dir.link(&target, &name));
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        self.open_node(ino, flags, false, reply);
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(open) = self.handles.get(fh) else {
            reply.error(EBADF);
            return;
        };
        self.dispatcher.submit(move || match open.read_full(offset, size) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(errno("read", ino, err)),
        });
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(open) = self.handles.get(fh) else {
            reply.error(EBADF);
            return;
        };
        let data = data.to_vec();
        self.dispatcher.submit(move || match open.handle().write(offset, &data) {
            Ok(written) => reply.written(written),
            Err(err) => reply.error(errno("write", ino, err)),
        });
    }

    fn flush(&mut self, _req: &Request, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let Some(open) = self.handles.get(fh) else {
            reply.error(EBADF);
            return;
        };
        self.reply_empty("flush", ino, reply, move || open.handle().flush());
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.release_handle(ino, fh, reply);
    }

    fn fsync(&mut self, _req: &Request, ino: u64, _fh: u64, datasync: bool, reply: ReplyEmpty) {
        let Some(node) = self.node(ino) else {
            reply.error(ENOENT);
            return;
        };
        self.reply_empty("fsync", ino, reply, move || node.fsync(datasync));
    }

    fn opendir(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        self.open_node(ino, flags, true, reply);
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(open) = self.handles.get(fh) else {
            reply.error(EBADF);
            return;
        };
        self.dispatcher.submit(move || {
            let listing = match open.listing(offset) {
                Ok(listing) => listing,
                Err(err) => {
                    reply.error(errno("readdir", ino, err));
                    return;
                }
            };
            let dots = [
                (ino, FileType::Directory, OsString::from(".")),
                (ino, FileType::Directory, OsString::from("..")),
            ];
            let entries = dots.into_iter().chain(listing.iter().map(|entry| {
                let kind = entry.kind.map(file_type).unwrap_or(FileType::RegularFile);
                (entry.inode, kind, entry.name.clone())
            }));
            let start = usize::try_from(offset).unwrap_or(0);
            for (index, (inode, kind, name)) in entries.enumerate().skip(start) {
                if reply.add(inode, (index + 1) as i64, kind, &name) {
                    break;
                }
            }
            reply.ok();
        });
    }

    fn releasedir(&mut self, _req: &Request, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.release_handle(ino, fh, reply);
    }

    fn fsyncdir(&mut self, _req: &Request, ino: u64, _fh: u64, datasync: bool, reply: ReplyEmpty) {
        let Some(node) = self.node(ino) else {
            reply.error(ENOENT);
            return;
        };
        self.reply_empty("fsyncdir", ino, reply, move || node.fsync(datasync));
    }

    fn setxattr(
        &mut self,
        _req: &Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        position: u32,
        reply: ReplyEmpty,
    ) {
        let Some(node) = self.node(ino) else {
            reply.error(ENOENT);
            return;
        };
        let name = name.to_os_string();
        let value = value.to_vec();
        self.reply_empty("setxattr", ino, reply, move || {
            node.setxattr(&name, &value, flags, position)
        });
    }

    fn getxattr(&mut self, _req: &Request, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let Some(node) = self.node(ino) else {
            reply.error(ENOENT);
            return;
        };
        let name = name.to_os_string();
        self.dispatcher.submit(move || match node.getxattr(&name, size) {
            Ok(XattrReply::Size(len)) => reply.size(len),
            Ok(XattrReply::Data(value)) => reply.data(&value),
            Err(err) => reply.error(errno("getxattr", ino, err)),
        });
    }

    fn listxattr(&mut self, _req: &Request, ino: u64, size: u32, reply: ReplyXattr) {
        let Some(node) = self.node(ino) else {
            reply.error(ENOENT);
            return;
        };
        self.dispatcher.submit(move || match node.listxattr(size) {
            Ok(XattrReply::Size(len)) => reply.size(len),
            Ok(XattrReply::Data(names)) => reply.data(&names),
            Err(err) => reply.error(errno("listxattr", ino, err)),
        });
    }

    fn removexattr(&mut self, _req: &Request, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(node) = self.node(ino) else {
            reply.error(ENOENT);
            return;
        };
        let name = name.to_os_string();
        self.reply_empty("removexattr", ino, reply, move || node.removexattr(&name));
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        let Some(node) = self.node(ino) else {
            reply.error(ENOENT);
            return;
        };
        self.reply_empty("access", ino, reply, move || node.access(mask));
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(dir) = self.node(parent) else {
            reply.error(ENOENT);
            return;
        };
        let name = name.to_os_string();
        let nodes = Arc::clone(&self.nodes);
        let handles = Arc::clone(&self.handles);
        let ttl = self.entry_ttl;
        self.dispatcher.submit(move || {
            let (node, handle) = match dir.create(&name, mode, umask, flags) {
                Ok(created) => created,
                Err(err) => {
                    reply.error(errno("create", parent, err));
                    return;
                }
            };
            let attr = match nodes.remember_entry(&node) {
                Ok(attr) => attr,
                Err(err) => {
                    if let Err(close_err) = handle.release() {
                        warn!(
                            target: "fs42::fuse",
                            ino = node.id(),
                            ?close_err,
                            "close after failed create"
                        );
                    }
                    reply.error(errno("create", parent, err));
                    return;
                }
            };
            let response = handle.response_flags();
            let fh = handles.insert(handle);
            reply.created(&ttl, &fuse_attr(node.id(), &attr), 0, fh, response);
        });
    }
}
