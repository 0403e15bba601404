//! Inode registry collaborator interface.
//!
//! The engine does not own the inode/dentry tree; it resolves identities
//! through [`InodeResolver`] and only needs an inode's vtable and raw
//! attribute block. [`InodeMap`] is the in-memory implementation used by
//! embedders and tests.

use crate::backend::FsOps;
use crate::wire::Attr;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};

/// Reserved identity of the pinned root inode. Resolution of this value
/// never consults the registry.
pub const ROOT_INO: u64 = 1;

pub struct Inode {
    pub ino: u64,
    attr: Mutex<Attr>,
    ops: Arc<dyn FsOps>,
}

impl Inode {
    pub fn new(ino: u64, attr: Attr, ops: Arc<dyn FsOps>) -> Arc<Self> {
        Arc::new(Inode {
            ino,
            attr: Mutex::new(attr),
            ops,
        })
    }

    pub fn attr(&self) -> Attr {
        *self.attr.lock().unwrap()
    }

    pub fn set_attr(&self, attr: Attr) {
        *self.attr.lock().unwrap() = attr;
    }

    pub fn ops(&self) -> Arc<dyn FsOps> {
        Arc::clone(&self.ops)
    }
}

impl std::fmt::Debug for Inode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inode").field("ino", &self.ino).finish()
    }
}

pub trait InodeResolver: Send + Sync {
    fn resolve(&self, ino: u64) -> Option<Arc<Inode>>;
}

/// Concurrent identity → inode index.
#[derive(Debug, Default)]
pub struct InodeMap {
    entries: DashMap<u64, Arc<Inode>>,
}

impl InodeMap {
    pub fn new() -> Self {
        InodeMap::default()
    }

    pub fn insert(&self, inode: Arc<Inode>) {
        self.entries.insert(inode.ino, inode);
    }

    pub fn remove(&self, ino: u64) -> Option<Arc<Inode>> {
        self.entries.remove(&ino).map(|(_, inode)| inode)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl InodeResolver for InodeMap {
    fn resolve(&self, ino: u64) -> Option<Arc<Inode>> {
        self.entries.get(&ino).map(|e| Arc::clone(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullOps;

    fn inode(ino: u64) -> Arc<Inode> {
        let attr = Attr {
            ino,
            mode: 0o100644,
            nlink: 1,
            blksize: 4096,
            ..Attr::default()
        };
        Inode::new(ino, attr, Arc::new(NullOps))
    }

    #[test]
    fn test_resolve_missing_returns_none() {
        let map = InodeMap::new();
        assert!(map.resolve(2).is_none());
    }

    #[test]
    fn test_insert_then_resolve() {
        let map = InodeMap::new();
        map.insert(inode(2));

        let found = map.resolve(2).unwrap();
        assert_eq!(found.ino, 2);
        assert_eq!(found.attr().mode, 0o100644);
    }

    #[test]
    fn test_remove_makes_inode_unresolvable() {
        let map = InodeMap::new();
        map.insert(inode(3));
        assert!(map.remove(3).is_some());
        assert!(map.resolve(3).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_set_attr_updates_raw_block() {
        let node = inode(4);
        let mut attr = node.attr();
        attr.size = 8192;
        node.set_attr(attr);
        assert_eq!(node.attr().size, 8192);
    }

    #[test]
    fn test_ops_returns_owned_vtable() {
        let node = inode(5);
        let ops = node.ops();
        assert!(ops.backend_for(5).is_none());
    }
}
