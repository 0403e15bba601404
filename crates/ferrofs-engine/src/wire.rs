//! Bit-exact kernel wire model.
//!
//! Incoming messages are a fixed 40-byte header followed by an opcode-specific
//! body; outgoing messages are a 16-byte header followed by an optional
//! payload. All fields are little-endian, matching the kernel's native layout
//! on the platforms this engine supports.

use crate::error::{EngineError, Result};
use bitflags::bitflags;
use bytes::{Buf, BufMut};
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

pub const KERNEL_MAJOR: u32 = 7;
pub const KERNEL_MINOR: u32 = 31;

pub const IN_HEADER_LEN: usize = 40;
pub const OUT_HEADER_LEN: usize = 16;
pub const INIT_IN_LEN: usize = 16;
pub const INIT_OUT_LEN: usize = 24;
pub const ATTR_LEN: usize = 88;
pub const ENTRY_OUT_LEN: usize = 40 + ATTR_LEN;

pub const PAGE_SIZE: usize = 4096;
/// Largest write payload advertised at INIT; keeps a full frame inside the
/// page-plus-headroom scratch buffer.
pub const MAX_WRITE: u32 = PAGE_SIZE as u32;

/// Lock end sentinel meaning "to end of file".
pub const OFFSET_MAX: u64 = i64::MAX as u64;

/// fuse_lk_in.lk_flags bit selecting BSD flock semantics.
pub const LK_FLOCK: u32 = 1 << 0;

pub mod opcode {
    pub const LOOKUP: u32 = 1;
    pub const FORGET: u32 = 2; // no reply
    pub const GETATTR: u32 = 3;
    pub const SETATTR: u32 = 4;
    pub const READLINK: u32 = 5;
    pub const SYMLINK: u32 = 6;
    pub const MKNOD: u32 = 8;
    pub const MKDIR: u32 = 9;
    pub const UNLINK: u32 = 10;
    pub const RMDIR: u32 = 11;
    pub const RENAME: u32 = 12;
    pub const LINK: u32 = 13;
    pub const OPEN: u32 = 14;
    pub const READ: u32 = 15;
    pub const WRITE: u32 = 16;
    pub const STATFS: u32 = 17;
    pub const RELEASE: u32 = 18;
    pub const FSYNC: u32 = 20;
    pub const SETXATTR: u32 = 21;
    pub const GETXATTR: u32 = 22;
    pub const LISTXATTR: u32 = 23;
    pub const REMOVEXATTR: u32 = 24;
    pub const FLUSH: u32 = 25;
    pub const INIT: u32 = 26;
    pub const OPENDIR: u32 = 27;
    pub const READDIR: u32 = 28;
    pub const RELEASEDIR: u32 = 29;
    pub const FSYNCDIR: u32 = 30;
    pub const GETLK: u32 = 31;
    pub const SETLK: u32 = 32;
    pub const SETLKW: u32 = 33;
    pub const ACCESS: u32 = 34;
    pub const CREATE: u32 = 35;
    pub const INTERRUPT: u32 = 36;
    pub const BMAP: u32 = 37;
    pub const DESTROY: u32 = 38;
    pub const IOCTL: u32 = 39;
    pub const POLL: u32 = 40;
    pub const NOTIFY_REPLY: u32 = 41;
    pub const BATCH_FORGET: u32 = 42; // no reply
    pub const FALLOCATE: u32 = 43;
    pub const READDIRPLUS: u32 = 44;
    pub const RENAME2: u32 = 45;
    pub const LSEEK: u32 = 46;
    pub const COPY_FILE_RANGE: u32 = 47;

    pub const MAX_OPCODE: u32 = COPY_FILE_RANGE;

    pub fn name(op: u32) -> &'static str {
        match op {
            LOOKUP => "lookup",
            FORGET => "forget",
            GETATTR => "getattr",
            SETATTR => "setattr",
            READLINK => "readlink",
            SYMLINK => "symlink",
            MKNOD => "mknod",
            MKDIR => "mkdir",
            UNLINK => "unlink",
            RMDIR => "rmdir",
            RENAME => "rename",
            LINK => "link",
            OPEN => "open",
            READ => "read",
            WRITE => "write",
            STATFS => "statfs",
            RELEASE => "release",
            FSYNC => "fsync",
            SETXATTR => "setxattr",
            GETXATTR => "getxattr",
            LISTXATTR => "listxattr",
            REMOVEXATTR => "removexattr",
            FLUSH => "flush",
            INIT => "init",
            OPENDIR => "opendir",
            READDIR => "readdir",
            RELEASEDIR => "releasedir",
            FSYNCDIR => "fsyncdir",
            GETLK => "getlk",
            SETLK => "setlk",
            SETLKW => "setlkw",
            ACCESS => "access",
            CREATE => "create",
            INTERRUPT => "interrupt",
            DESTROY => "destroy",
            BATCH_FORGET => "batch_forget",
            READDIRPLUS => "readdirplus",
            _ => "unknown",
        }
    }
}

bitflags! {
    /// INIT capability flags, one bit per negotiable protocol feature.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CapFlags: u32 {
        const ASYNC_READ = 1 << 0;
        const POSIX_LOCKS = 1 << 1;
        const ATOMIC_O_TRUNC = 1 << 3;
        const EXPORT_SUPPORT = 1 << 4;
        const BIG_WRITES = 1 << 5;
        const DONT_MASK = 1 << 6;
        const SPLICE_WRITE = 1 << 7;
        const SPLICE_MOVE = 1 << 8;
        const SPLICE_READ = 1 << 9;
        const FLOCK_LOCKS = 1 << 10;
        const HAS_IOCTL_DIR = 1 << 11;
        const AUTO_INVAL_DATA = 1 << 12;
        const DO_READDIRPLUS = 1 << 13;
        const READDIRPLUS_AUTO = 1 << 14;
        const ASYNC_DIO = 1 << 15;
        const WRITEBACK_CACHE = 1 << 16;
        const NO_OPEN_SUPPORT = 1 << 17;
        const PARALLEL_DIROPS = 1 << 18;
        const POSIX_ACL = 1 << 20;
        const FSNOTIFY = 1 << 21;
    }
}

bitflags! {
    /// fuse_setattr_in.valid bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetattrValid: u32 {
        const MODE = 1 << 0;
        const UID = 1 << 1;
        const GID = 1 << 2;
        const SIZE = 1 << 3;
        const ATIME = 1 << 4;
        const MTIME = 1 << 5;
        const FH = 1 << 6;
        const ATIME_NOW = 1 << 7;
        const MTIME_NOW = 1 << 8;
        const LOCKOWNER = 1 << 9;
        const CTIME = 1 << 10;
    }
}

fn ensure(p: &[u8], need: usize, what: &'static str) -> Result<()> {
    if p.len() < need {
        return Err(EngineError::Truncated {
            what,
            got: p.len(),
            need,
        });
    }
    Ok(())
}

/// Splits a NUL-terminated name off the front of the payload.
pub fn take_name<'a>(p: &mut &'a [u8], what: &'static str) -> Result<OsString> {
    let rest: &'a [u8] = *p;
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(EngineError::Truncated {
            what,
            got: rest.len(),
            need: rest.len() + 1,
        })?;
    let name = OsString::from_vec(rest[..nul].to_vec());
    *p = &rest[nul + 1..];
    Ok(name)
}

pub fn dirent_type_of(mode: u32) -> u32 {
    (mode & libc::S_IFMT) >> 12
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InHeader {
    pub len: u32,
    pub opcode: u32,
    pub unique: u64,
    pub nodeid: u64,
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

impl InHeader {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, IN_HEADER_LEN, "fuse_in_header")?;
        let hdr = InHeader {
            len: p.get_u32_le(),
            opcode: p.get_u32_le(),
            unique: p.get_u64_le(),
            nodeid: p.get_u64_le(),
            uid: p.get_u32_le(),
            gid: p.get_u32_le(),
            pid: p.get_u32_le(),
        };
        p.advance(4); // padding
        Ok(hdr)
    }

    #[cfg(test)]
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32_le(self.len);
        out.put_u32_le(self.opcode);
        out.put_u64_le(self.unique);
        out.put_u64_le(self.nodeid);
        out.put_u32_le(self.uid);
        out.put_u32_le(self.gid);
        out.put_u32_le(self.pid);
        out.put_u32_le(0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutHeader {
    pub len: u32,
    pub error: i32,
    pub unique: u64,
}

impl OutHeader {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32_le(self.len);
        out.put_i32_le(self.error);
        out.put_u64_le(self.unique);
    }

    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, OUT_HEADER_LEN, "fuse_out_header")?;
        Ok(OutHeader {
            len: p.get_u32_le(),
            error: p.get_i32_le(),
            unique: p.get_u64_le(),
        })
    }
}

/// Full stat-equivalent attribute block embedded in entry/attr replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attr {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub atimensec: u32,
    pub mtimensec: u32,
    pub ctimensec: u32,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

impl Attr {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_u64_le(self.ino);
        out.put_u64_le(self.size);
        out.put_u64_le(self.blocks);
        out.put_i64_le(self.atime);
        out.put_i64_le(self.mtime);
        out.put_i64_le(self.ctime);
        out.put_u32_le(self.atimensec);
        out.put_u32_le(self.mtimensec);
        out.put_u32_le(self.ctimensec);
        out.put_u32_le(self.mode);
        out.put_u32_le(self.nlink);
        out.put_u32_le(self.uid);
        out.put_u32_le(self.gid);
        out.put_u32_le(self.rdev);
        out.put_u32_le(self.blksize);
        out.put_u32_le(0); // padding
    }

    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, ATTR_LEN, "fuse_attr")?;
        let attr = Attr {
            ino: p.get_u64_le(),
            size: p.get_u64_le(),
            blocks: p.get_u64_le(),
            atime: p.get_i64_le(),
            mtime: p.get_i64_le(),
            ctime: p.get_i64_le(),
            atimensec: p.get_u32_le(),
            mtimensec: p.get_u32_le(),
            ctimensec: p.get_u32_le(),
            mode: p.get_u32_le(),
            nlink: p.get_u32_le(),
            uid: p.get_u32_le(),
            gid: p.get_u32_le(),
            rdev: p.get_u32_le(),
            blksize: p.get_u32_le(),
        };
        p.advance(4);
        Ok(attr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryOut {
    pub nodeid: u64,
    pub generation: u64,
    pub entry_valid: u64,
    pub attr_valid: u64,
    pub entry_valid_nsec: u32,
    pub attr_valid_nsec: u32,
    pub attr: Attr,
}

impl EntryOut {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_u64_le(self.nodeid);
        out.put_u64_le(self.generation);
        out.put_u64_le(self.entry_valid);
        out.put_u64_le(self.attr_valid);
        out.put_u32_le(self.entry_valid_nsec);
        out.put_u32_le(self.attr_valid_nsec);
        self.attr.encode(out);
    }

    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, ENTRY_OUT_LEN, "fuse_entry_out")?;
        Ok(EntryOut {
            nodeid: p.get_u64_le(),
            generation: p.get_u64_le(),
            entry_valid: p.get_u64_le(),
            attr_valid: p.get_u64_le(),
            entry_valid_nsec: p.get_u32_le(),
            attr_valid_nsec: p.get_u32_le(),
            attr: Attr::decode(p)?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AttrOut {
    pub attr_valid: u64,
    pub attr_valid_nsec: u32,
    pub attr: Attr,
}

impl AttrOut {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_u64_le(self.attr_valid);
        out.put_u32_le(self.attr_valid_nsec);
        out.put_u32_le(0); // dummy
        self.attr.encode(out);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitIn {
    pub major: u32,
    pub minor: u32,
    pub max_readahead: u32,
    pub flags: CapFlags,
}

impl InitIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, INIT_IN_LEN, "fuse_init_in")?;
        Ok(InitIn {
            major: p.get_u32_le(),
            minor: p.get_u32_le(),
            max_readahead: p.get_u32_le(),
            flags: CapFlags::from_bits_truncate(p.get_u32_le()),
        })
    }

    #[cfg(test)]
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32_le(self.major);
        out.put_u32_le(self.minor);
        out.put_u32_le(self.max_readahead);
        out.put_u32_le(self.flags.bits());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitOut {
    pub major: u32,
    pub minor: u32,
    pub max_readahead: u32,
    pub flags: CapFlags,
    pub max_background: u16,
    pub congestion_threshold: u16,
    pub max_write: u32,
}

impl InitOut {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32_le(self.major);
        out.put_u32_le(self.minor);
        out.put_u32_le(self.max_readahead);
        out.put_u32_le(self.flags.bits());
        out.put_u16_le(self.max_background);
        out.put_u16_le(self.congestion_threshold);
        out.put_u32_le(self.max_write);
    }

    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, INIT_OUT_LEN, "fuse_init_out")?;
        Ok(InitOut {
            major: p.get_u32_le(),
            minor: p.get_u32_le(),
            max_readahead: p.get_u32_le(),
            flags: CapFlags::from_bits_truncate(p.get_u32_le()),
            max_background: p.get_u16_le(),
            congestion_threshold: p.get_u16_le(),
            max_write: p.get_u32_le(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OpenIn {
    pub flags: i32,
}

impl OpenIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 8, "fuse_open_in")?;
        let flags = p.get_i32_le();
        p.advance(4);
        Ok(OpenIn { flags })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OpenOut {
    pub fh: u64,
    pub open_flags: u32,
}

impl OpenOut {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_u64_le(self.fh);
        out.put_u32_le(self.open_flags);
        out.put_u32_le(0); // padding
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CreateIn {
    pub flags: i32,
    pub mode: u32,
    pub umask: u32,
}

impl CreateIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 16, "fuse_create_in")?;
        let flags = p.get_i32_le();
        let mode = p.get_u32_le();
        let umask = p.get_u32_le();
        p.advance(4);
        Ok(CreateIn { flags, mode, umask })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReleaseIn {
    pub fh: u64,
    pub flags: i32,
    pub release_flags: u32,
    pub lock_owner: u64,
}

impl ReleaseIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 24, "fuse_release_in")?;
        Ok(ReleaseIn {
            fh: p.get_u64_le(),
            flags: p.get_i32_le(),
            release_flags: p.get_u32_le(),
            lock_owner: p.get_u64_le(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FlushIn {
    pub fh: u64,
    pub lock_owner: u64,
}

impl FlushIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 24, "fuse_flush_in")?;
        let fh = p.get_u64_le();
        p.advance(8); // unused + padding
        let lock_owner = p.get_u64_le();
        Ok(FlushIn { fh, lock_owner })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReadIn {
    pub fh: u64,
    pub offset: u64,
    pub size: u32,
    pub read_flags: u32,
    pub lock_owner: u64,
    pub flags: u32,
}

impl ReadIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 40, "fuse_read_in")?;
        let r = ReadIn {
            fh: p.get_u64_le(),
            offset: p.get_u64_le(),
            size: p.get_u32_le(),
            read_flags: p.get_u32_le(),
            lock_owner: p.get_u64_le(),
            flags: p.get_u32_le(),
        };
        p.advance(4);
        Ok(r)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WriteIn {
    pub fh: u64,
    pub offset: i64,
    pub size: u32,
    pub write_flags: u32,
    pub lock_owner: u64,
    pub flags: i32,
}

impl WriteIn {
    /// Decodes the fixed part; the write payload follows in the remainder.
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 40, "fuse_write_in")?;
        let w = WriteIn {
            fh: p.get_u64_le(),
            offset: p.get_i64_le(),
            size: p.get_u32_le(),
            write_flags: p.get_u32_le(),
            lock_owner: p.get_u64_le(),
            flags: p.get_i32_le(),
        };
        p.advance(4);
        Ok(w)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WriteOut {
    pub size: u32,
}

impl WriteOut {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_u32_le(self.size);
        out.put_u32_le(0);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FsyncIn {
    pub fh: u64,
    pub fsync_flags: u32,
}

impl FsyncIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 16, "fuse_fsync_in")?;
        let fh = p.get_u64_le();
        let fsync_flags = p.get_u32_le();
        p.advance(4);
        Ok(FsyncIn { fh, fsync_flags })
    }

    pub fn datasync(&self) -> bool {
        self.fsync_flags & 1 != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileLock {
    pub start: u64,
    pub end: u64,
    pub typ: i32,
    pub pid: u32,
}

impl FileLock {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 24, "fuse_file_lock")?;
        Ok(FileLock {
            start: p.get_u64_le(),
            end: p.get_u64_le(),
            typ: p.get_i32_le(),
            pid: p.get_u32_le(),
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_u64_le(self.start);
        out.put_u64_le(self.end);
        out.put_i32_le(self.typ);
        out.put_u32_le(self.pid);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LkIn {
    pub fh: u64,
    pub owner: u64,
    pub lk: FileLock,
    pub lk_flags: u32,
}

impl LkIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 48, "fuse_lk_in")?;
        let fh = p.get_u64_le();
        let owner = p.get_u64_le();
        let lk = FileLock::decode(p)?;
        let lk_flags = p.get_u32_le();
        p.advance(4);
        Ok(LkIn {
            fh,
            owner,
            lk,
            lk_flags,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MkdirIn {
    pub mode: u32,
    pub umask: u32,
}

impl MkdirIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 8, "fuse_mkdir_in")?;
        Ok(MkdirIn {
            mode: p.get_u32_le(),
            umask: p.get_u32_le(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MknodIn {
    pub mode: u32,
    pub rdev: u32,
    pub umask: u32,
}

impl MknodIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 16, "fuse_mknod_in")?;
        let mode = p.get_u32_le();
        let rdev = p.get_u32_le();
        let umask = p.get_u32_le();
        p.advance(4);
        Ok(MknodIn { mode, rdev, umask })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RenameIn {
    pub newdir: u64,
}

impl RenameIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 8, "fuse_rename_in")?;
        Ok(RenameIn {
            newdir: p.get_u64_le(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LinkIn {
    pub oldnodeid: u64,
}

impl LinkIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 8, "fuse_link_in")?;
        Ok(LinkIn {
            oldnodeid: p.get_u64_le(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccessIn {
    pub mask: i32,
}

impl AccessIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 8, "fuse_access_in")?;
        let mask = p.get_i32_le();
        p.advance(4);
        Ok(AccessIn { mask })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InterruptIn {
    pub unique: u64,
}

impl InterruptIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 8, "fuse_interrupt_in")?;
        Ok(InterruptIn {
            unique: p.get_u64_le(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForgetIn {
    pub nlookup: u64,
}

impl ForgetIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 8, "fuse_forget_in")?;
        Ok(ForgetIn {
            nlookup: p.get_u64_le(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForgetOne {
    pub nodeid: u64,
    pub nlookup: u64,
}

/// Decodes a batch-forget body into its (nodeid, nlookup) list.
pub fn decode_batch_forget(p: &mut &[u8]) -> Result<Vec<ForgetOne>> {
    ensure(*p, 8, "fuse_batch_forget_in")?;
    let count = p.get_u32_le() as usize;
    p.advance(4); // dummy
    ensure(*p, count * 16, "fuse_forget_one")?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(ForgetOne {
            nodeid: p.get_u64_le(),
            nlookup: p.get_u64_le(),
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy)]
pub struct GetattrIn {
    pub getattr_flags: u32,
    pub fh: u64,
}

impl GetattrIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 16, "fuse_getattr_in")?;
        let getattr_flags = p.get_u32_le();
        p.advance(4); // dummy
        let fh = p.get_u64_le();
        Ok(GetattrIn { getattr_flags, fh })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SetattrIn {
    pub valid: SetattrValid,
    pub fh: u64,
    pub size: u64,
    pub lock_owner: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub atimensec: u32,
    pub mtimensec: u32,
    pub ctimensec: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl SetattrIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 88, "fuse_setattr_in")?;
        let valid = SetattrValid::from_bits_truncate(p.get_u32_le());
        p.advance(4); // padding
        let fh = p.get_u64_le();
        let size = p.get_u64_le();
        let lock_owner = p.get_u64_le();
        let atime = p.get_i64_le();
        let mtime = p.get_i64_le();
        let ctime = p.get_i64_le();
        let atimensec = p.get_u32_le();
        let mtimensec = p.get_u32_le();
        let ctimensec = p.get_u32_le();
        let mode = p.get_u32_le();
        p.advance(4); // unused4
        let uid = p.get_u32_le();
        let gid = p.get_u32_le();
        p.advance(4); // unused5
        Ok(SetattrIn {
            valid,
            fh,
            size,
            lock_owner,
            atime,
            mtime,
            ctime,
            atimensec,
            mtimensec,
            ctimensec,
            mode,
            uid,
            gid,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GetxattrIn {
    pub size: u32,
}

impl GetxattrIn {
    pub fn decode(p: &mut &[u8]) -> Result<Self> {
        ensure(*p, 8, "fuse_getxattr_in")?;
        let size = p.get_u32_le();
        p.advance(4);
        Ok(GetxattrIn { size })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatfsOut {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

impl StatfsOut {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.put_u64_le(self.blocks);
        out.put_u64_le(self.bfree);
        out.put_u64_le(self.bavail);
        out.put_u64_le(self.files);
        out.put_u64_le(self.ffree);
        out.put_u32_le(self.bsize);
        out.put_u32_le(self.namelen);
        out.put_u32_le(self.frsize);
        out.put_u32_le(0); // padding
        for _ in 0..6 {
            out.put_u32_le(0); // spare
        }
    }
}

/// Builds one complete in-frame (header + body) for tests and tools.
pub fn build_frame(
    opcode: u32,
    unique: u64,
    nodeid: u64,
    uid: u32,
    gid: u32,
    pid: u32,
    body: &[u8],
) -> Vec<u8> {
    let len = (IN_HEADER_LEN + body.len()) as u32;
    let mut out = Vec::with_capacity(len as usize);
    out.put_u32_le(len);
    out.put_u32_le(opcode);
    out.put_u64_le(unique);
    out.put_u64_le(nodeid);
    out.put_u32_le(uid);
    out.put_u32_le(gid);
    out.put_u32_le(pid);
    out.put_u32_le(0);
    out.extend_from_slice(body);
    out
}

pub fn name_body(name: &OsStr) -> Vec<u8> {
    let mut body = name.as_bytes().to_vec();
    body.push(0);
    body
}
