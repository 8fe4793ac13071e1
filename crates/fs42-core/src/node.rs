// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Backend-independent node and handle values
//!
//! Every kernel request is addressed to a [`Node`]; the variant decides
//! whether the synthetic root, the local passthrough or a remote peer
//! serves it. Operations a backend cannot perform fail with the matching
//! [`FsError`] instead of being silently ignored.

use crate::error::{FsError, FsResult};
use crate::local::{LocalFile, LocalNode};
use crate::remote::{RemoteFile, RemoteNode};
use crate::root::{readme_slice, RootDir};
use crate::types::{Attributes, DirEntry, SetAttrRequest, XattrReply, README_INO, ROOT_INO};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

fn not_a_directory() -> FsError {
    FsError::from_errno(libc::ENOTDIR)
}

fn is_a_directory() -> FsError {
    FsError::from_errno(libc::EISDIR)
}

#[derive(Clone, Debug)]
pub enum Node {
    Root(Arc<RootDir>),
    Readme(Arc<RootDir>),
    Local(Arc<LocalNode>),
    Remote(Arc<RemoteNode>),
}

impl Node {
    /// Inode number handed to the kernel for this node
    pub fn id(&self) -> u64 {
        match self {
            Node::Root(_) => ROOT_INO,
            Node::Readme(_) => README_INO,
            Node::Local(node) => node.id(),
            Node::Remote(node) => node.id(),
        }
    }

    pub fn attr(&self) -> FsResult<Attributes> {
        match self {
            Node::Root(root) => Ok(root.attr()),
            Node::Readme(root) => Ok(root.readme_attr()),
            Node::Local(node) => node.attr(),
            Node::Remote(node) => node.attr(),
        }
    }

    pub fn lookup(&self, name: &OsStr) -> FsResult<Node> {
        match self {
            Node::Root(root) => root.lookup(name),
            Node::Readme(_) => Err(not_a_directory()),
            Node::Local(node) => Ok(Node::Local(node.lookup(name)?)),
            Node::Remote(node) => Ok(Node::Remote(node.lookup(name)?)),
        }
    }

    pub fn access(&self, mask: i32) -> FsResult<()> {
        match self {
            Node::Root(_) | Node::Readme(_) => {
                if mask & libc::W_OK != 0 {
                    Err(FsError::AccessDenied)
                } else {
                    Ok(())
                }
            }
            Node::Local(node) => node.access(mask),
            Node::Remote(node) => node.access(mask),
        }
    }

    /// Open this node with native `flags`; `dir` marks an opendir request
    pub fn open(&self, flags: i32, dir: bool) -> FsResult<Handle> {
        match self {
            Node::Root(root) => Ok(Handle::Root(Arc::clone(root))),
            Node::Readme(_) => {
                if flags & libc::O_ACCMODE != libc::O_RDONLY {
                    return Err(FsError::AccessDenied);
                }
                Ok(Handle::Readme)
            }
            Node::Local(node) => Ok(Handle::Local(node.open(flags)?)),
            Node::Remote(node) => Ok(Handle::Remote(node.open(flags, dir)?)),
        }
    }

    pub fn create(
        &self,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
    ) -> FsResult<(Node, Handle)> {
        match self {
            Node::Root(_) => Err(FsError::PermissionDenied),
            Node::Readme(_) => Err(not_a_directory()),
            Node::Local(node) => {
                let (child, file) = node.create(name, mode, umask, flags)?;
                Ok((Node::Local(child), Handle::Local(file)))
            }
            Node::Remote(_) => Err(FsError::NotImplemented),
        }
    }

    pub fn mkdir(&self, name: &OsStr, mode: u32, umask: u32) -> FsResult<Node> {
        match self {
            Node::Root(_) => Err(FsError::PermissionDenied),
            Node::Readme(_) => Err(not_a_directory()),
            Node::Local(node) => Ok(Node::Local(node.mkdir(name, mode, umask)?)),
            Node::Remote(_) => Err(FsError::NotImplemented),
        }
    }

    pub fn symlink(&self, name: &OsStr, target: &Path) -> FsResult<Node> {
        match self {
            Node::Root(_) => Err(FsError::PermissionDenied),
            Node::Readme(_) => Err(not_a_directory()),
            Node::Local(node) => Ok(Node::Local(node.symlink(name, target)?)),
            Node::Remote(_) => Err(FsError::NotImplemented),
        }
    }

    /// Hard-link `target` into this directory as `name`
    pub fn link(&self, target: &Node, name: &OsStr) -> FsResult<Node> {
        match self {
            Node::Root(_) => Err(FsError::PermissionDenied),
            Node::Readme(_) => Err(not_a_directory()),
            Node::Local(parent) => match target {
                Node::Local(source) => Ok(Node::Local(source.link(parent, name)?)),
                _ => Err(FsError::WrongBackend),
            },
            Node::Remote(_) => Err(FsError::NotImplemented),
        }
    }

    /// Remove `name` from this directory; `dir` selects rmdir semantics
    pub fn remove(&self, name: &OsStr, dir: bool) -> FsResult<()> {
        match self {
            Node::Root(_) => Err(FsError::PermissionDenied),
            Node::Readme(_) => Err(not_a_directory()),
            Node::Local(node) => node.remove(name, dir),
            Node::Remote(_) => Err(FsError::NotImplemented),
        }
    }

    pub fn rename(
        &self,
        name: &OsStr,
        new_parent: &Node,
        new_name: &OsStr,
        flags: u32,
    ) -> FsResult<()> {
        match self {
            Node::Root(_) => Err(FsError::PermissionDenied),
            Node::Readme(_) => Err(not_a_directory()),
            Node::Local(node) => match new_parent {
                Node::Local(dest) => node.rename(name, dest, new_name, flags),
                _ => Err(FsError::WrongBackend),
            },
            Node::Remote(_) => Err(FsError::NotImplemented),
        }
    }

    pub fn readlink(&self) -> FsResult<Vec<u8>> {
        match self {
            Node::Root(_) | Node::Readme(_) => Err(FsError::from_errno(libc::EINVAL)),
            Node::Local(node) => node.readlink(),
            Node::Remote(node) => node.readlink(),
        }
    }

    pub fn setattr(&self, req: &SetAttrRequest) -> FsResult<Attributes> {
        match self {
            Node::Root(_) | Node::Readme(_) => Err(FsError::PermissionDenied),
            Node::Local(node) => node.setattr(req),
            Node::Remote(_) => Err(FsError::NotImplemented),
        }
    }

    pub fn getxattr(&self, name: &OsStr, size: u32) -> FsResult<XattrReply> {
        match self {
            Node::Root(_) | Node::Readme(_) => Err(FsError::NotSupported),
            Node::Local(node) => node.getxattr(name, size),
            Node::Remote(node) => node.getxattr(name, size),
        }
    }

    pub fn listxattr(&self, size: u32) -> FsResult<XattrReply> {
        match self {
            Node::Root(_) | Node::Readme(_) => XattrReply::for_buffer(Vec::new(), size),
            Node::Local(node) => node.listxattr(size),
            Node::Remote(node) => node.listxattr(size),
        }
    }

    pub fn setxattr(&self, name: &OsStr, value: &[u8], flags: i32, position: u32) -> FsResult<()> {
        match self {
            Node::Root(_) | Node::Readme(_) => Err(FsError::PermissionDenied),
            Node::Local(node) => node.setxattr(name, value, flags, position),
            Node::Remote(_) => Err(FsError::NotImplemented),
        }
    }

    pub fn removexattr(&self, name: &OsStr) -> FsResult<()> {
        match self {
            Node::Root(_) | Node::Readme(_) => Err(FsError::PermissionDenied),
            Node::Local(node) => node.removexattr(name),
            Node::Remote(_) => Err(FsError::NotImplemented),
        }
    }

    pub fn fsync(&self, datasync: bool) -> FsResult<()> {
        match self {
            Node::Local(node) => node.fsync(datasync),
            // Nothing is ever written through these
            Node::Root(_) | Node::Readme(_) | Node::Remote(_) => Ok(()),
        }
    }

    /// Called once the kernel drops its last reference to this node
    pub fn forget(&self) {
        match self {
            Node::Local(node) => node.forget(),
            Node::Remote(node) => node.forget(),
            Node::Root(_) | Node::Readme(_) => {}
        }
    }
}

/// An open file or directory
#[derive(Clone, Debug)]
pub enum Handle {
    Root(Arc<RootDir>),
    Readme,
    Local(Arc<LocalFile>),
    Remote(Arc<RemoteFile>),
}

impl Handle {
    pub fn read(&self, offset: i64, size: u32) -> FsResult<Vec<u8>> {
        match self {
            Handle::Root(_) => Err(is_a_directory()),
            Handle::Readme => Ok(readme_slice(offset, size)),
            Handle::Local(file) => file.read(offset, size),
            Handle::Remote(file) => file.read(offset, size),
        }
    }

    pub fn write(&self, offset: i64, data: &[u8]) -> FsResult<u32> {
        match self {
            Handle::Root(_) => Err(is_a_directory()),
            Handle::Readme => Err(FsError::AccessDenied),
            Handle::Local(file) => file.write(offset, data),
            Handle::Remote(_) => Err(FsError::NotImplemented),
        }
    }

    pub fn read_dir_all(&self) -> FsResult<Vec<DirEntry>> {
        match self {
            Handle::Root(root) => Ok(root.entries()),
            Handle::Readme => Err(not_a_directory()),
            Handle::Local(file) => file.read_dir_all(),
            Handle::Remote(file) => file.read_dir_all(),
        }
    }

    /// Open response flags (`FOPEN_*`) to pass back to the kernel
    pub fn response_flags(&self) -> u32 {
        match self {
            Handle::Remote(file) => file.response_flags().bits(),
            _ => 0,
        }
    }

    /// Writes go straight to the backend, so there is nothing to flush
    pub fn flush(&self) -> FsResult<()> {
        Ok(())
    }

    pub fn release(&self) -> FsResult<()> {
        match self {
            Handle::Local(file) => file.release(),
            Handle::Remote(file) => file.release(),
            Handle::Root(_) | Handle::Readme => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsConfig;
    use crate::connection::MockUserConnection;
    use crate::local::LocalDir;
    use crate::remote::UserDir;
    use crate::root::Fs42;
    use crate::types::{FileKind, NodeIdAllocator};

    fn setup() -> (tempfile::TempDir, Fs42) {
        let dir = tempfile::tempdir().unwrap();
        let config = FsConfig {
            login: "arthur".to_string(),
            local_root: dir.path().to_path_buf(),
            ..FsConfig::default()
        };
        let fs = Fs42::new(&config, None);
        (dir, fs)
    }

    #[test]
    fn root_is_read_only() {
        let (_dir, fs) = setup();
        let root = fs.root();
        assert_eq!(root.id(), ROOT_INO);
        assert_eq!(root.attr().unwrap().perm, 0o555);
        assert!(matches!(
            root.mkdir(OsStr::new("x"), 0o755, 0),
            Err(FsError::PermissionDenied)
        ));
        assert!(matches!(
            root.create(OsStr::new("x"), 0o644, 0, libc::O_WRONLY),
            Err(FsError::PermissionDenied)
        ));
        assert!(matches!(
            root.remove(OsStr::new("README"), false),
            Err(FsError::PermissionDenied)
        ));
        assert!(matches!(
            root.setattr(&SetAttrRequest::default()),
            Err(FsError::PermissionDenied)
        ));
        fs.shutdown();
    }

    #[test]
    fn readme_rejects_writers() {
        let (_dir, fs) = setup();
        let readme = fs.root().lookup(OsStr::new("README")).unwrap();
        assert_eq!(readme.id(), README_INO);
        assert!(matches!(
            readme.open(libc::O_WRONLY, false),
            Err(FsError::AccessDenied)
        ));
        assert!(matches!(
            readme.open(libc::O_RDWR, false),
            Err(FsError::AccessDenied)
        ));
        let handle = readme.open(libc::O_RDONLY, false).unwrap();
        assert!(handle.read(0, 64).unwrap().starts_with(b"\nWelcome to fs42!"));
        assert_eq!(readme.attr().unwrap().kind, FileKind::RegularFile);
        fs.shutdown();
    }

    #[test]
    fn local_operations_flow_through_nodes() {
        let (dir, fs) = setup();
        let home = fs.root().lookup(OsStr::new("arthur")).unwrap();
        let (file, handle) = home
            .create(OsStr::new("towel"), 0o644, 0o022, libc::O_RDWR)
            .unwrap();
        assert_eq!(handle.write(0, b"dont panic").unwrap(), 10);
        handle.flush().unwrap();
        handle.release().unwrap();

        assert_eq!(file.attr().unwrap().size, 10);
        assert_eq!(std::fs::read(dir.path().join("towel")).unwrap(), b"dont panic");
        assert_eq!(home.lookup(OsStr::new("towel")).unwrap().id(), file.id());
        file.fsync(true).unwrap();
        fs.shutdown();
    }

    #[test]
    fn cross_backend_mutations_are_refused() {
        let (dir, fs) = setup();
        std::fs::write(dir.path().join("f"), b"x").unwrap();
        let home = fs.root().lookup(OsStr::new("arthur")).unwrap();
        let file = home.lookup(OsStr::new("f")).unwrap();

        let remote_dir = UserDir::new(
            "ford",
            Arc::new(MockUserConnection::new()),
            Arc::new(NodeIdAllocator::new()),
        );
        let remote = Node::Remote(remote_dir.root_node());

        assert!(matches!(
            home.link(&remote, OsStr::new("g")),
            Err(FsError::WrongBackend)
        ));
        assert!(matches!(
            home.rename(OsStr::new("f"), &remote, OsStr::new("g"), 0),
            Err(FsError::WrongBackend)
        ));
        assert!(matches!(
            home.rename(OsStr::new("f"), &fs.root(), OsStr::new("g"), 0),
            Err(FsError::WrongBackend)
        ));
        assert!(matches!(
            remote.link(&file, OsStr::new("g")),
            Err(FsError::NotImplemented)
        ));

        let other = LocalDir::new(dir.path(), Arc::new(NodeIdAllocator::new()), true);
        assert!(matches!(
            home.link(&Node::Local(other.root_node()), OsStr::new("g")),
            Err(FsError::WrongBackend)
        ));
        other.clear();
        remote_dir.clear();
        fs.shutdown();
    }

    #[test]
    fn remote_mutations_are_not_implemented() {
        let dir = UserDir::new(
            "ford",
            Arc::new(MockUserConnection::new()),
            Arc::new(NodeIdAllocator::new()),
        );
        let remote = Node::Remote(dir.root_node());
        let name = OsStr::new("x");
        assert!(matches!(remote.mkdir(name, 0o755, 0), Err(FsError::NotImplemented)));
        assert!(matches!(
            remote.create(name, 0o644, 0, libc::O_WRONLY),
            Err(FsError::NotImplemented)
        ));
        assert!(matches!(
            remote.symlink(name, Path::new("t")),
            Err(FsError::NotImplemented)
        ));
        assert!(matches!(remote.remove(name, false), Err(FsError::NotImplemented)));
        assert!(matches!(
            remote.setattr(&SetAttrRequest::default()),
            Err(FsError::NotImplemented)
        ));
        assert!(matches!(
            remote.setxattr(name, b"v", 0, 0),
            Err(FsError::NotImplemented)
        ));
        assert!(matches!(remote.removexattr(name), Err(FsError::NotImplemented)));
        assert_eq!(FsError::NotImplemented.errno(), libc::ENOSYS);
        dir.clear();
    }
}
