//! Pluggable filesystem vtable.
//!
//! Every inode owns one [`FsOps`] implementation. The router resolves the
//! target inode, then calls through this trait; every operation defaults to
//! `ENOSYS` so a backend only implements the capability set it actually has
//! (directory backends, plain-file backends, virtual entries, remote-backed
//! entries).

use crate::error::{Errno, OpResult};
use crate::handle::{OpenDir, OpenFile};
use crate::lock::{FlockRequest, PosixLock};
use crate::reply::DirBuf;
use crate::wire::{Attr, SetattrIn, SetattrValid, StatfsOut};
use std::ffi::{OsStr, OsString};
use std::sync::Arc;
use std::time::Duration;

/// One directory entry produced by a backend's readdir/readdirplus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    /// Cursor value of the *next* entry, echoed back by the kernel to resume
    /// enumeration.
    pub offset: u64,
    pub typ: u32,
    pub name: OsString,
}

/// Lookup/create result: a child identity plus its attribute block and the
/// cache validity windows the kernel may rely on.
#[derive(Debug, Clone, Copy)]
pub struct EntryReply {
    pub ino: u64,
    pub generation: u64,
    pub attr: Attr,
    pub entry_ttl: Duration,
    pub attr_ttl: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct AttrReply {
    pub attr: Attr,
    pub ttl: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenReply {
    /// FOPEN_* bits for the open response.
    pub open_flags: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct CreateReply {
    pub entry: EntryReply,
    pub open_flags: u32,
}

/// getxattr with size 0 is a size probe; with a buffer it returns data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XattrReply {
    Size(u32),
    Data(Vec<u8>),
}

/// Decoded setattr intent: only fields flagged valid by the kernel carry a
/// value.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetattrRequest {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<(i64, u32)>,
    pub mtime: Option<(i64, u32)>,
    pub ctime: Option<(i64, u32)>,
    pub fh: Option<u64>,
}

impl SetattrRequest {
    pub fn from_wire(s: &SetattrIn) -> Self {
        let pick = |bit: SetattrValid| s.valid.contains(bit);
        SetattrRequest {
            mode: pick(SetattrValid::MODE).then_some(s.mode),
            uid: pick(SetattrValid::UID).then_some(s.uid),
            gid: pick(SetattrValid::GID).then_some(s.gid),
            size: pick(SetattrValid::SIZE).then_some(s.size),
            atime: pick(SetattrValid::ATIME).then_some((s.atime, s.atimensec)),
            mtime: pick(SetattrValid::MTIME).then_some((s.mtime, s.mtimensec)),
            ctime: pick(SetattrValid::CTIME).then_some((s.ctime, s.ctimensec)),
            fh: pick(SetattrValid::FH).then_some(s.fh),
        }
    }
}

const NOSYS: Errno = Errno::NOSYS;

/// The filesystem operation capability set. Directory operations and
/// non-directory operations share the trait; unimplemented ones answer
/// `ENOSYS` through the default bodies.
#[allow(unused_variables)]
pub trait FsOps: Send + Sync {
    // --- directory operations ---

    fn lookup(&self, parent: u64, name: &OsStr) -> OpResult<EntryReply> {
        Err(NOSYS)
    }

    fn mkdir(&self, parent: u64, name: &OsStr, mode: u32) -> OpResult<EntryReply> {
        Err(NOSYS)
    }

    fn mknod(&self, parent: u64, name: &OsStr, mode: u32, rdev: u32) -> OpResult<EntryReply> {
        Err(NOSYS)
    }

    fn symlink(&self, parent: u64, name: &OsStr, target: &OsStr) -> OpResult<EntryReply> {
        Err(NOSYS)
    }

    fn link(&self, ino: u64, newparent: u64, newname: &OsStr) -> OpResult<EntryReply> {
        Err(NOSYS)
    }

    fn unlink(&self, parent: u64, name: &OsStr) -> OpResult<()> {
        Err(NOSYS)
    }

    fn rmdir(&self, parent: u64, name: &OsStr) -> OpResult<()> {
        Err(NOSYS)
    }

    fn rename(&self, parent: u64, name: &OsStr, newparent: u64, newname: &OsStr) -> OpResult<()> {
        Err(NOSYS)
    }

    fn opendir(&self, dir: &OpenDir) -> OpResult<OpenReply> {
        Err(NOSYS)
    }

    fn readdir(&self, dir: &OpenDir, offset: u64, buf: &mut DirBuf) -> OpResult<()> {
        Err(NOSYS)
    }

    fn readdirplus(&self, dir: &OpenDir, offset: u64, buf: &mut DirBuf) -> OpResult<()> {
        Err(NOSYS)
    }

    fn releasedir(&self, dir: &OpenDir) -> OpResult<()> {
        Ok(())
    }

    fn fsyncdir(&self, dir: &OpenDir, datasync: bool) -> OpResult<()> {
        Err(NOSYS)
    }

    /// Delegate backend for a child inode, consulted when directory-operation
    /// bindings are captured at opendir time.
    fn backend_for(&self, ino: u64) -> Option<Arc<dyn FsOps>> {
        None
    }

    // --- non-directory operations ---

    fn open(&self, file: &OpenFile) -> OpResult<OpenReply> {
        Err(NOSYS)
    }

    fn create(
        &self,
        parent: u64,
        name: &OsStr,
        mode: u32,
        flags: i32,
        file: &OpenFile,
    ) -> OpResult<CreateReply> {
        Err(NOSYS)
    }

    fn read(&self, file: &OpenFile, offset: u64, size: u32) -> OpResult<Vec<u8>> {
        Err(NOSYS)
    }

    fn write(&self, file: &OpenFile, offset: i64, data: &[u8]) -> OpResult<u32> {
        Err(NOSYS)
    }

    fn flush(&self, file: &OpenFile, lock_owner: u64) -> OpResult<()> {
        Err(NOSYS)
    }

    fn fsync(&self, file: &OpenFile, datasync: bool) -> OpResult<()> {
        Err(NOSYS)
    }

    fn release(&self, file: &OpenFile) -> OpResult<()> {
        Ok(())
    }

    fn getattr(&self, ino: u64) -> OpResult<AttrReply> {
        Err(NOSYS)
    }

    fn setattr(&self, ino: u64, changes: &SetattrRequest) -> OpResult<AttrReply> {
        Err(NOSYS)
    }

    fn readlink(&self, ino: u64) -> OpResult<Vec<u8>> {
        Err(NOSYS)
    }

    fn access(&self, ino: u64, mask: i32) -> OpResult<()> {
        Err(NOSYS)
    }

    fn getxattr(&self, ino: u64, name: &OsStr, size: u32) -> OpResult<XattrReply> {
        Err(NOSYS)
    }

    fn statfs(&self, ino: u64) -> OpResult<StatfsOut> {
        Err(NOSYS)
    }

    fn getlk(&self, file: &OpenFile, owner: u64, probe: &PosixLock) -> OpResult<Option<PosixLock>> {
        Err(NOSYS)
    }

    fn setlk(&self, file: &OpenFile, owner: u64, lock: &PosixLock, sleep: bool) -> OpResult<()> {
        Err(NOSYS)
    }

    fn flock(&self, file: &OpenFile, owner: u64, op: &FlockRequest) -> OpResult<()> {
        Err(NOSYS)
    }

    /// Reference-count drop for a forgotten inode. No reply exists for
    /// forget, so there is nothing to fail.
    fn forget(&self, ino: u64, nlookup: u64) {}
}

/// Backend with no capabilities at all; useful as a placeholder vtable.
#[derive(Debug, Default)]
pub struct NullOps;

impl FsOps for NullOps {}
