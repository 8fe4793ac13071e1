// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Kernel-facing bookkeeping: which inodes the kernel holds and which
//! file handles it has open.

use fs42_core::{Attributes, DirEntry, Fs42, FsResult, Handle, Node, README_INO, ROOT_INO};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

struct NodeEntry {
    node: Node,
    lookups: u64,
}

/// Inodes known to the kernel together with their lookup counts.
///
/// The root and the README are pinned: they are never forgotten.
pub struct NodeTable {
    entries: Mutex<HashMap<u64, NodeEntry>>,
}

fn is_pinned(ino: u64) -> bool {
    ino == ROOT_INO || ino == README_INO
}

impl NodeTable {
    pub fn new(fs: &Fs42) -> Self {
        let mut entries = HashMap::new();
        for node in [fs.root(), Node::Readme(Arc::clone(fs.root_dir()))] {
            entries.insert(node.id(), NodeEntry { node, lookups: 1 });
        }
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub fn get(&self, ino: u64) -> Option<Node> {
        self.entries.lock().get(&ino).map(|entry| entry.node.clone())
    }

    /// Count one more kernel reference to `node`
    pub fn remember(&self, node: &Node) {
        let ino = node.id();
        if is_pinned(ino) {
            return;
        }
        self.entries
            .lock()
            .entry(ino)
            .and_modify(|entry| entry.lookups += 1)
            .or_insert_with(|| NodeEntry {
                node: node.clone(),
                lookups: 1,
            });
    }

    /// Stat a freshly looked-up node and count the kernel reference to it.
    ///
    /// When the stat fails the kernel never learns the inode, so a node no
    /// one else holds leaves its backend cache again.
    pub fn remember_entry(&self, node: &Node) -> FsResult<Attributes> {
        match node.attr() {
            Ok(attr) => {
                self.remember(node);
                Ok(attr)
            }
            Err(err) => {
                if !self.entries.lock().contains_key(&node.id()) {
                    node.forget();
                }
                Err(err)
            }
        }
    }

    /// Drop `nlookup` kernel references; the node leaves its backend cache
    /// once none remain.
    pub fn forget(&self, ino: u64, nlookup: u64) {
        if is_pinned(ino) {
            return;
        }
        let evicted = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(&ino) else {
                return;
            };
            entry.lookups = entry.lookups.saturating_sub(nlookup);
            if entry.lookups > 0 {
                return;
            }
            entries.remove(&ino).map(|entry| entry.node)
        };
        if let Some(node) = evicted {
            trace!(target: "fs42::fuse", ino, "node forgotten");
            node.forget();
        }
    }

    pub fn lookups(&self, ino: u64) -> Option<u64> {
        self.entries.lock().get(&ino).map(|entry| entry.lookups)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every unpinned node
    pub fn clear(&self) {
        let evicted: Vec<Node> = {
            let mut entries = self.entries.lock();
            let inos: Vec<u64> = entries.keys().copied().filter(|ino| !is_pinned(*ino)).collect();
            inos.into_iter()
                .filter_map(|ino| entries.remove(&ino))
                .map(|entry| entry.node)
                .collect()
        };
        for node in evicted {
            node.forget();
        }
    }
}

/// A handle given to the kernel, plus the directory listing captured for it
pub struct OpenHandle {
    handle: Handle,
    listing: Mutex<Option<Arc<Vec<DirEntry>>>>,
}

impl OpenHandle {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            listing: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Read until `size` bytes are gathered or the backend reports end of file.
    ///
    /// Backends clamp single reads, and the kernel takes a short reply as EOF.
    pub fn read_full(&self, offset: i64, size: u32) -> FsResult<Vec<u8>> {
        let wanted = size as usize;
        let mut data = Vec::with_capacity(wanted);
        while data.len() < wanted {
            let at = offset.saturating_add(data.len() as i64);
            let chunk = self.handle.read(at, (wanted - data.len()) as u32)?;
            if chunk.is_empty() {
                break;
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    /// Listing served for a readdir at `offset`.
    ///
    /// It is read on the first call and again whenever the kernel restarts
    /// from offset zero; later offsets index into the captured snapshot.
    pub fn listing(&self, offset: i64) -> FsResult<Arc<Vec<DirEntry>>> {
        let mut listing = self.listing.lock();
        if offset == 0 || listing.is_none() {
            *listing = Some(Arc::new(self.handle.read_dir_all()?));
        }
        match listing.as_ref() {
            Some(entries) => Ok(Arc::clone(entries)),
            None => Ok(Arc::new(Vec::new())),
        }
    }
}

/// File handle numbers given to the kernel
pub struct HandleTable {
    next: AtomicU64,
    handles: Mutex<HashMap<u64, Arc<OpenHandle>>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, handle: Handle) -> u64 {
        let fh = self.next.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(fh, Arc::new(OpenHandle::new(handle)));
        fh
    }

    pub fn get(&self, fh: u64) -> Option<Arc<OpenHandle>> {
        self.handles.lock().get(&fh).cloned()
    }

    pub fn remove(&self, fh: u64) -> Option<Arc<OpenHandle>> {
        self.handles.lock().remove(&fh)
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn drain(&self) -> Vec<Arc<OpenHandle>> {
        self.handles.lock().drain().map(|(_, handle)| handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs42_core::FsConfig;
    use std::ffi::OsStr;

    fn setup() -> (tempfile::TempDir, Fs42) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let config = FsConfig {
            login: "ford".to_string(),
            local_root: dir.path().to_path_buf(),
            ..FsConfig::default()
        };
        let fs = Fs42::new(&config, None);
        (dir, fs)
    }

    #[test]
    fn root_and_readme_are_pinned() {
        let (_dir, fs) = setup();
        let table = NodeTable::new(&fs);
        assert_eq!(table.len(), 2);
        table.forget(ROOT_INO, 10);
        table.forget(README_INO, 10);
        assert!(table.get(ROOT_INO).is_some());
        assert!(table.get(README_INO).is_some());
        fs.shutdown();
    }

    #[test]
    fn forget_evicts_from_backend_cache_at_zero() {
        let (_dir, fs) = setup();
        let table = NodeTable::new(&fs);
        let home = fs.root().lookup(OsStr::new("ford")).unwrap();
        let file = home.lookup(OsStr::new("a.txt")).unwrap();
        table.remember(&file);
        table.remember(&file);
        let cached = fs.root_dir().local().cached_nodes();

        table.forget(file.id(), 1);
        assert_eq!(table.lookups(file.id()), Some(1));
        assert_eq!(fs.root_dir().local().cached_nodes(), cached);

        table.forget(file.id(), 1);
        assert!(table.get(file.id()).is_none());
        assert_eq!(fs.root_dir().local().cached_nodes(), cached - 1);

        // Unknown inodes are ignored
        table.forget(9999, 1);
        fs.shutdown();
    }

    #[test]
    fn failed_stat_does_not_leak_looked_up_node() {
        let (dir, fs) = setup();
        let table = NodeTable::new(&fs);
        let home = fs.root().lookup(OsStr::new("ford")).unwrap();
        let cached = fs.root_dir().local().cached_nodes();

        std::fs::write(dir.path().join("gone.txt"), b"x").unwrap();
        let gone = home.lookup(OsStr::new("gone.txt")).unwrap();
        assert_eq!(fs.root_dir().local().cached_nodes(), cached + 1);
        std::fs::remove_file(dir.path().join("gone.txt")).unwrap();

        let err = table.remember_entry(&gone).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
        assert!(table.get(gone.id()).is_none());
        assert_eq!(fs.root_dir().local().cached_nodes(), cached);

        let file = home.lookup(OsStr::new("a.txt")).unwrap();
        assert_eq!(table.remember_entry(&file).unwrap().size, 1);
        assert_eq!(table.lookups(file.id()), Some(1));
        fs.shutdown();
    }

    #[test]
    fn failed_stat_keeps_node_the_kernel_holds() {
        let (dir, fs) = setup();
        let table = NodeTable::new(&fs);
        let home = fs.root().lookup(OsStr::new("ford")).unwrap();
        let file = home.lookup(OsStr::new("a.txt")).unwrap();
        table.remember_entry(&file).unwrap();
        let cached = fs.root_dir().local().cached_nodes();

        std::fs::remove_file(dir.path().join("a.txt")).unwrap();
        assert!(table.remember_entry(&file).is_err());
        assert_eq!(table.lookups(file.id()), Some(1));
        assert_eq!(fs.root_dir().local().cached_nodes(), cached);
        fs.shutdown();
    }

    #[test]
    fn handles_get_distinct_numbers() {
        let (_dir, fs) = setup();
        let handles = HandleTable::new();
        let first = handles.insert(fs.root().open(libc::O_RDONLY, true).unwrap());
        let second = handles.insert(fs.root().open(libc::O_RDONLY, true).unwrap());
        assert_ne!(first, second);
        assert_eq!(handles.len(), 2);
        assert!(handles.remove(first).is_some());
        assert!(handles.get(first).is_none());
        assert!(handles.remove(first).is_none());
        assert_eq!(handles.drain().len(), 1);
        assert!(handles.is_empty());
        fs.shutdown();
    }

    #[test]
    fn read_full_spans_backend_clamp() {
        let (dir, fs) = setup();
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join("big.bin"), &content).unwrap();
        let big = fs
            .root()
            .lookup(OsStr::new("ford"))
            .unwrap()
            .lookup(OsStr::new("big.bin"))
            .unwrap();
        let open = OpenHandle::new(big.open(libc::O_RDONLY, false).unwrap());

        let data = open.read_full(1000, 131_072).unwrap();
        assert_eq!(data.len(), 131_072);
        assert_eq!(&data[..], &content[1000..1000 + 131_072]);
        assert_eq!(open.read_full(199_990, 4096).unwrap().len(), 10);
        assert!(open.read_full(300_000, 4096).unwrap().is_empty());

        open.handle().release().unwrap();
        fs.shutdown();
    }

    #[test]
    fn listing_is_captured_until_rewind() {
        let (dir, fs) = setup();
        let home = fs.root().lookup(OsStr::new("ford")).unwrap();
        let open = OpenHandle::new(home.open(libc::O_RDONLY, true).unwrap());

        let first = open.listing(0).unwrap();
        assert_eq!(first.len(), 1);
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        assert_eq!(open.listing(3).unwrap().len(), 1);
        assert_eq!(open.listing(0).unwrap().len(), 2);

        open.handle().release().unwrap();
        fs.shutdown();
    }
}
