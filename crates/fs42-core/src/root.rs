// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem root: the README, the caller's own directory and other users' directories

use crate::config::{FsConfig, README_NAME};
use crate::connection::Coordinator;
use crate::error::{FsError, FsResult};
use crate::local::LocalDir;
use crate::node::Node;
use crate::remote::UserDir;
use crate::types::{Attributes, DirEntry, FileKind, NodeIdAllocator, README_INO, ROOT_INO};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

/// Content of the synthetic `README` file
pub const README_TEXT: &str = concat!(
    "\nWelcome to fs42!\n\n",
    "Here you can place files so they can be accessed by other 42 users.\n",
    "In order to browse someone's fs42 directory, you must both be logged in.\n\n",
);

/// One mounted fs42 tree
pub struct Fs42 {
    root: Arc<RootDir>,
}

impl Fs42 {
    /// Build the tree for `config`; without a coordinator only the README
    /// and the caller's own directory are reachable.
    pub fn new(config: &FsConfig, coordinator: Option<Arc<dyn Coordinator>>) -> Self {
        let ids = Arc::new(NodeIdAllocator::new());
        let local = LocalDir::new(&config.local_root, Arc::clone(&ids), config.enable_xattrs);
        info!(
            target: "fs42::root",
            login = %config.login,
            root = %config.local_root.display(),
            remote = coordinator.is_some(),
            "filesystem created"
        );
        Self {
            root: Arc::new(RootDir {
                login: config.login.clone(),
                local,
                coordinator,
                ids,
                users: Mutex::new(HashMap::new()),
                uid: unsafe { libc::geteuid() },
                gid: unsafe { libc::getegid() },
                created: SystemTime::now(),
            }),
        }
    }

    pub fn root(&self) -> Node {
        Node::Root(Arc::clone(&self.root))
    }

    pub fn root_dir(&self) -> &Arc<RootDir> {
        &self.root
    }

    /// Release every handle and drop every cached node in all backends
    pub fn shutdown(&self) {
        self.root.local.clear();
        let users: Vec<_> = self.root.users.lock().drain().map(|(_, dir)| dir).collect();
        for dir in users {
            dir.clear();
        }
        debug!(target: "fs42::root", "shutdown complete");
    }
}

/// The root directory
pub struct RootDir {
    login: String,
    local: Arc<LocalDir>,
    coordinator: Option<Arc<dyn Coordinator>>,
    ids: Arc<NodeIdAllocator>,
    users: Mutex<HashMap<String, Arc<UserDir>>>,
    uid: u32,
    gid: u32,
    created: SystemTime,
}

impl std::fmt::Debug for RootDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootDir")
            .field("login", &self.login)
            .field("local", &self.local)
            .finish()
    }
}

impl RootDir {
    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn local(&self) -> &Arc<LocalDir> {
        &self.local
    }

    fn synthetic_attr(&self, inode: u64, kind: FileKind, perm: u16, size: u64) -> Attributes {
        Attributes {
            inode,
            size,
            blocks: size.div_ceil(512),
            atime: self.created,
            mtime: self.created,
            ctime: self.created,
            crtime: self.created,
            kind,
            perm,
            nlink: if kind == FileKind::Directory { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    pub fn attr(&self) -> Attributes {
        self.synthetic_attr(ROOT_INO, FileKind::Directory, 0o555, 0)
    }

    pub fn readme_attr(&self) -> Attributes {
        self.synthetic_attr(
            README_INO,
            FileKind::RegularFile,
            0o444,
            README_TEXT.len() as u64,
        )
    }

    pub fn lookup(self: &Arc<Self>, name: &OsStr) -> FsResult<Node> {
        if name == README_NAME {
            return Ok(Node::Readme(Arc::clone(self)));
        }
        if name == self.login.as_str() {
            return Ok(Node::Local(self.local.root_node()));
        }
        let login = name.to_str().ok_or(FsError::NotFound)?;
        Ok(Node::Remote(self.user_dir(login)?.root_node()))
    }

    fn user_dir(&self, login: &str) -> FsResult<Arc<UserDir>> {
        let coordinator = self.coordinator.as_ref().ok_or(FsError::NotFound)?;
        if let Some(dir) = self.users.lock().get(login) {
            return Ok(Arc::clone(dir));
        }

        let info = coordinator.user_dir_info(login)?;
        if !info.exists {
            return Err(FsError::NotFound);
        }
        let conn = coordinator.connect(&info)?;
        debug!(
            target: "fs42::root",
            login,
            was_online = info.was_online,
            "connected to user directory"
        );

        // A concurrent lookup may have connected first; keep its directory
        let candidate = UserDir::new(login, conn, Arc::clone(&self.ids));
        let mut users = self.users.lock();
        Ok(Arc::clone(
            users.entry(login.to_string()).or_insert(candidate),
        ))
    }

    /// Entries shown when listing the root
    pub fn entries(&self) -> Vec<DirEntry> {
        let own_inode = self
            .local
            .root_node()
            .attr()
            .map(|attr| attr.inode)
            .unwrap_or(0);
        vec![
            DirEntry {
                inode: README_INO,
                name: OsString::from(README_NAME),
                kind: Some(FileKind::RegularFile),
            },
            DirEntry {
                inode: own_inode,
                name: OsString::from(&self.login),
                kind: Some(FileKind::Directory),
            },
        ]
    }
}

/// Slice of the README served for a read at `offset`
pub fn readme_slice(offset: i64, size: u32) -> Vec<u8> {
    let text = README_TEXT.as_bytes();
    let start = usize::try_from(offset).unwrap_or(0).min(text.len());
    let end = start.saturating_add(size as usize).min(text.len());
    text[start..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{MockCoordinator, MockUserConnection, UserConnection};
    use fs42_proto::{LoginInfo, LookupKind, RemoteError};

    fn config(dir: &std::path::Path) -> FsConfig {
        FsConfig {
            login: "arthur".to_string(),
            local_root: dir.to_path_buf(),
            ..FsConfig::default()
        }
    }

    #[test]
    fn readme_slices_clamp_to_text() {
        assert_eq!(readme_slice(0, 1), b"\n");
        assert_eq!(readme_slice(0, 4096), README_TEXT.as_bytes());
        assert!(readme_slice(10_000, 16).is_empty());
        assert!(readme_slice(-1, 16).starts_with(b"\nWelcome"));
    }

    #[test]
    fn own_login_routes_to_local_root() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Fs42::new(&config(dir.path()), None);
        let root = fs.root_dir();

        let Node::Local(first) = root.lookup(OsStr::new("arthur")).unwrap() else {
            panic!("own login should be local");
        };
        let Node::Local(second) = root.lookup(OsStr::new("arthur")).unwrap() else {
            panic!("own login should be local");
        };
        assert!(Arc::ptr_eq(&first, &second));
        assert!(matches!(
            root.lookup(OsStr::new("README")).unwrap(),
            Node::Readme(_)
        ));
        fs.shutdown();
    }

    #[test]
    fn other_logins_without_coordinator_are_missing() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Fs42::new(&config(dir.path()), None);
        assert!(matches!(
            fs.root_dir().lookup(OsStr::new("trillian")),
            Err(FsError::NotFound)
        ));
        fs.shutdown();
    }

    #[test]
    fn coordinator_connects_once_per_login() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = MockUserConnection::new();
        conn.expect_lookup_exists().returning(|_| Ok(LookupKind::File));
        let conn: Arc<dyn UserConnection> = Arc::new(conn);

        let mut coordinator = MockCoordinator::new();
        coordinator
            .expect_user_dir_info()
            .withf(|login| login == "trillian")
            .times(1)
            .returning(|login| {
                Ok(LoginInfo {
                    login: login.to_string(),
                    exists: true,
                    was_online: true,
                })
            });
        coordinator
            .expect_user_dir_info()
            .withf(|login| login == "nobody")
            .returning(|login| {
                Ok(LoginInfo {
                    login: login.to_string(),
                    exists: false,
                    was_online: false,
                })
            });
        coordinator
            .expect_user_dir_info()
            .withf(|login| login == "offline")
            .returning(|_| Err(RemoteError::from_errno(libc::EHOSTUNREACH)));
        coordinator
            .expect_connect()
            .times(1)
            .returning(move |_| Ok(Arc::clone(&conn)));

        let fs = Fs42::new(&config(dir.path()), Some(Arc::new(coordinator)));
        let root = fs.root_dir();

        let Node::Remote(first) = root.lookup(OsStr::new("trillian")).unwrap() else {
            panic!("other login should be remote");
        };
        let Node::Remote(second) = root.lookup(OsStr::new("trillian")).unwrap() else {
            panic!("other login should be remote");
        };
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.backend().login(), "trillian");

        assert!(matches!(
            root.lookup(OsStr::new("nobody")),
            Err(FsError::NotFound)
        ));
        assert_eq!(
            root.lookup(OsStr::new("offline")).unwrap_err().errno(),
            libc::EHOSTUNREACH
        );
        fs.shutdown();
    }

    #[test]
    fn listing_shows_readme_and_own_login() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Fs42::new(&config(dir.path()), None);
        let names: Vec<_> = fs
            .root_dir()
            .entries()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec![OsString::from("README"), OsString::from("arthur")]);
        fs.shutdown();
    }
}
