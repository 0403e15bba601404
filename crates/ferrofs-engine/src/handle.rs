//! Open-file and open-directory handle lifecycle.
//!
//! The kernel references an opened file or directory by an opaque 64-bit
//! value it echoes back on every subsequent call. Handles live in a
//! generation-checked arena: the opaque value packs {slot index, generation},
//! and every use validates the generation so a value from before a
//! release/reuse cycle is rejected instead of aliasing a newer handle.
//!
//! Handles carry no internal lock. Issuing concurrent operations against the
//! same handle value requires external serialization.

use crate::backend::{DirEntry, FsOps};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Returns true when the entry is an internal/special one that directory
/// enumeration must skip. Reserved identity 0 marks such entries.
pub fn skip_internal(entry: &DirEntry) -> bool {
    entry.ino == 0
}

pub type EntryFilter = fn(&DirEntry) -> bool;

/// State attached to one open/release bracket of a file. The vtable is
/// captured from the target inode at open time (from the parent at create
/// time, where the target identity is assigned by the backend afterwards).
pub struct OpenFile {
    ino: AtomicU64,
    pub flags: i32,
    ops: Arc<dyn FsOps>,
    error: AtomicI32,
    lock_owner: AtomicU64,
}

impl OpenFile {
    pub fn new(ino: u64, flags: i32, ops: Arc<dyn FsOps>) -> Self {
        OpenFile {
            ino: AtomicU64::new(ino),
            flags,
            ops,
            error: AtomicI32::new(0),
            lock_owner: AtomicU64::new(0),
        }
    }

    pub fn ino(&self) -> u64 {
        self.ino.load(Ordering::SeqCst)
    }

    /// Binds the target identity once the backend's create assigns it.
    pub fn set_ino(&self, ino: u64) {
        self.ino.store(ino, Ordering::SeqCst);
    }

    pub fn ops(&self) -> &Arc<dyn FsOps> {
        &self.ops
    }

    pub fn set_error(&self, errno: i32) {
        self.error.store(errno, Ordering::SeqCst);
    }

    pub fn error(&self) -> i32 {
        self.error.load(Ordering::SeqCst)
    }

    pub fn set_lock_owner(&self, owner: u64) {
        self.lock_owner.store(owner, Ordering::SeqCst);
    }

    pub fn lock_owner(&self) -> u64 {
        self.lock_owner.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenFile")
            .field("ino", &self.ino)
            .field("flags", &self.flags)
            .finish()
    }
}

/// State attached to one opendir/releasedir bracket. The directory-operation
/// bindings are captured from the inode's vtable at opendir time and used for
/// every later readdir/readdirplus/fsyncdir/releasedir on this handle.
pub struct OpenDir {
    pub ino: u64,
    ops: Arc<dyn FsOps>,
    filter: EntryFilter,
    cursor: AtomicU64,
    error: AtomicI32,
}

impl OpenDir {
    pub fn new(ino: u64, ops: Arc<dyn FsOps>) -> Self {
        OpenDir {
            ino,
            ops,
            filter: skip_internal,
            cursor: AtomicU64::new(0),
            error: AtomicI32::new(0),
        }
    }

    pub fn with_filter(mut self, filter: EntryFilter) -> Self {
        self.filter = filter;
        self
    }

    /// The operation bindings captured at opendir time.
    pub fn ops(&self) -> &Arc<dyn FsOps> {
        &self.ops
    }

    /// True when the enumeration should include this entry.
    pub fn accepts(&self, entry: &DirEntry) -> bool {
        !(self.filter)(entry)
    }

    pub fn set_cursor(&self, offset: u64) {
        self.cursor.store(offset, Ordering::SeqCst);
    }

    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn set_error(&self, errno: i32) {
        self.error.store(errno, Ordering::SeqCst);
    }

    pub fn error(&self) -> i32 {
        self.error.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for OpenDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenDir")
            .field("ino", &self.ino)
            .field("cursor", &self.cursor)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum HandleEntry {
    File(Arc<OpenFile>),
    Dir(Arc<OpenDir>),
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<HandleEntry>,
}

#[derive(Debug, Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

/// Generation-checked handle arena. The opaque value handed to the kernel is
/// `generation << 32 | (index + 1)`, so zero is never a valid handle.
#[derive(Debug, Default)]
pub struct HandleArena {
    inner: Mutex<Slots>,
}

fn pack(index: u32, generation: u32) -> u64 {
    ((generation as u64) << 32) | (index as u64 + 1)
}

fn unpack(fh: u64) -> Option<(u32, u32)> {
    let low = (fh & 0xffff_ffff) as u32;
    if low == 0 {
        return None;
    }
    Some((low - 1, (fh >> 32) as u32))
}

impl HandleArena {
    pub fn new() -> Self {
        HandleArena::default()
    }

    fn insert(&self, entry: HandleEntry) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        if let Some(index) = inner.free.pop() {
            let slot = &mut inner.slots[index as usize];
            slot.entry = Some(entry);
            return pack(index, slot.generation);
        }
        let index = inner.slots.len() as u32;
        inner.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        pack(index, 0)
    }

    pub fn insert_file(&self, file: OpenFile) -> u64 {
        self.insert(HandleEntry::File(Arc::new(file)))
    }

    pub fn insert_dir(&self, dir: OpenDir) -> u64 {
        self.insert(HandleEntry::Dir(Arc::new(dir)))
    }

    fn lookup(&self, fh: u64) -> Option<HandleEntry> {
        let (index, generation) = unpack(fh)?;
        let inner = self.inner.lock().unwrap();
        let slot = inner.slots.get(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        slot.entry.clone()
    }

    pub fn file(&self, fh: u64) -> Option<Arc<OpenFile>> {
        match self.lookup(fh) {
            Some(HandleEntry::File(file)) => Some(file),
            _ => None,
        }
    }

    pub fn dir(&self, fh: u64) -> Option<Arc<OpenDir>> {
        match self.lookup(fh) {
            Some(HandleEntry::Dir(dir)) => Some(dir),
            _ => None,
        }
    }

    /// Frees the handle, bumping the slot generation so the old opaque value
    /// can never resolve again.
    pub fn remove(&self, fh: u64) -> Option<HandleEntry> {
        let (index, generation) = unpack(fh)?;
        let mut inner = self.inner.lock().unwrap();
        let slot = inner.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(index);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullOps;
    use std::ffi::OsString;

    fn dir_ops() -> Arc<dyn FsOps> {
        Arc::new(NullOps)
    }

    fn open_file(ino: u64, flags: i32) -> OpenFile {
        OpenFile::new(ino, flags, Arc::new(NullOps))
    }

    #[test]
    fn test_handle_value_never_zero() {
        let arena = HandleArena::new();
        let fh = arena.insert_file(open_file(2, 0));
        assert_ne!(fh, 0);
    }

    #[test]
    fn test_zero_is_never_a_valid_handle() {
        let arena = HandleArena::new();
        arena.insert_file(open_file(2, 0));
        assert!(arena.file(0).is_none());
        assert!(arena.remove(0).is_none());
    }

    #[test]
    fn test_insert_then_lookup_file() {
        let arena = HandleArena::new();
        let fh = arena.insert_file(open_file(42, libc::O_RDWR));

        let file = arena.file(fh).unwrap();
        assert_eq!(file.ino(), 42);
        assert_eq!(file.flags, libc::O_RDWR);
    }

    #[test]
    fn test_file_lookup_rejects_dir_handle() {
        let arena = HandleArena::new();
        let fh = arena.insert_dir(OpenDir::new(3, dir_ops()));
        assert!(arena.file(fh).is_none());
        assert!(arena.dir(fh).is_some());
    }

    #[test]
    fn test_remove_frees_exactly_once() {
        let arena = HandleArena::new();
        let fh = arena.insert_file(open_file(1, 0));

        assert!(arena.remove(fh).is_some());
        assert!(arena.remove(fh).is_none());
        assert!(arena.file(fh).is_none());
        assert!(arena.is_empty());
    }

    #[test]
    fn test_stale_handle_rejected_after_slot_reuse() {
        let arena = HandleArena::new();
        let stale = arena.insert_file(open_file(1, 0));
        arena.remove(stale);

        // Slot is reused with a bumped generation.
        let fresh = arena.insert_file(open_file(2, 0));
        assert_ne!(stale, fresh);
        assert!(arena.file(stale).is_none());
        assert_eq!(arena.file(fresh).unwrap().ino(), 2);
    }

    #[test]
    fn test_distinct_handles_for_distinct_opens() {
        let arena = HandleArena::new();
        let a = arena.insert_file(open_file(1, 0));
        let b = arena.insert_file(open_file(1, 0));
        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_create_time_identity_binding() {
        let file = open_file(0, 0);
        assert_eq!(file.ino(), 0);
        file.set_ino(42);
        assert_eq!(file.ino(), 42);
    }

    #[test]
    fn test_open_file_error_and_lock_owner_roundtrip() {
        let file = open_file(9, 0);
        assert_eq!(file.error(), 0);
        file.set_error(libc::EIO);
        assert_eq!(file.error(), libc::EIO);

        file.set_lock_owner(0xabcd);
        assert_eq!(file.lock_owner(), 0xabcd);
    }

    #[test]
    fn test_open_dir_default_filter_skips_reserved_ino() {
        let dir = OpenDir::new(5, dir_ops());
        let internal = DirEntry {
            ino: 0,
            offset: 1,
            typ: 0,
            name: OsString::from(".journal"),
        };
        let normal = DirEntry {
            ino: 7,
            offset: 2,
            typ: 0,
            name: OsString::from("file"),
        };
        assert!(!dir.accepts(&internal));
        assert!(dir.accepts(&normal));
    }

    #[test]
    fn test_open_dir_custom_filter_replaces_default() {
        fn hide_dotfiles(entry: &DirEntry) -> bool {
            entry.name.to_string_lossy().starts_with('.')
        }
        let dir = OpenDir::new(5, dir_ops()).with_filter(hide_dotfiles);
        let hidden = DirEntry {
            ino: 7,
            offset: 1,
            typ: 0,
            name: OsString::from(".profile"),
        };
        let reserved = DirEntry {
            ino: 0,
            offset: 2,
            typ: 0,
            name: OsString::from("journal"),
        };
        assert!(!dir.accepts(&hidden));
        // The default reserved-identity rule no longer applies.
        assert!(dir.accepts(&reserved));
    }

    #[test]
    fn test_open_dir_cursor_tracks_enumeration() {
        let dir = OpenDir::new(5, dir_ops());
        assert_eq!(dir.cursor(), 0);
        dir.set_cursor(17);
        assert_eq!(dir.cursor(), 17);
    }
}
