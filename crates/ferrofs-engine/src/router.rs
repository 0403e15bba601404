//! Filesystem operation routing.
//!
//! Handlers here decode the opcode-specific body, resolve the target inode
//! or handle, call through the backend vtable and encode the reply. Target
//! resolution treats the reserved root identity as the pinned root inode;
//! every other identity goes through the inode registry and answers `ENOENT`
//! when absent. Handle-based operations resolve the kernel-supplied opaque
//! value directly and answer `EIO` when it is zero, stale or absent.

use crate::backend::{AttrReply, EntryReply, SetattrRequest, XattrReply};
use crate::error::{Errno, OpResult};
use crate::handle::{OpenDir, OpenFile};
use crate::inode::{Inode, ROOT_INO};
use crate::lock;
use crate::reply::{self, DirBuf, Replied};
use crate::request::{Request, SignalKind};
use crate::session::Connection;
use crate::wire::{
    self, AccessIn, AttrOut, CreateIn, EntryOut, FlushIn, ForgetIn, FsyncIn, GetattrIn,
    GetxattrIn, InterruptIn, LinkIn, LkIn, MkdirIn, MknodIn, OpenIn, OpenOut, ReadIn, ReleaseIn,
    RenameIn, SetattrIn, WriteIn, WriteOut,
};
use std::sync::Arc;
use std::time::Duration;

fn resolve(conn: &Connection, ino: u64) -> OpResult<Arc<Inode>> {
    conn.resolve(ino).ok_or(Errno::NOENT)
}

fn file_handle(conn: &Connection, fh: u64) -> OpResult<Arc<OpenFile>> {
    if fh == 0 {
        return Err(Errno::IO);
    }
    conn.handles().file(fh).ok_or(Errno::IO)
}

fn dir_handle(conn: &Connection, fh: u64) -> OpResult<Arc<OpenDir>> {
    if fh == 0 {
        return Err(Errno::IO);
    }
    conn.handles().dir(fh).ok_or(Errno::IO)
}

fn ttl_parts(ttl: Duration) -> (u64, u32) {
    (ttl.as_secs(), ttl.subsec_nanos())
}

fn entry_out(entry: &EntryReply) -> EntryOut {
    let (entry_valid, entry_valid_nsec) = ttl_parts(entry.entry_ttl);
    let (attr_valid, attr_valid_nsec) = ttl_parts(entry.attr_ttl);
    EntryOut {
        nodeid: entry.ino,
        generation: entry.generation,
        entry_valid,
        attr_valid,
        entry_valid_nsec,
        attr_valid_nsec,
        attr: entry.attr,
    }
}

fn attr_out(attr: &AttrReply) -> AttrOut {
    let (attr_valid, attr_valid_nsec) = ttl_parts(attr.ttl);
    AttrOut {
        attr_valid,
        attr_valid_nsec,
        attr: attr.attr,
    }
}

fn reply_entry(conn: &Connection, unique: u64, entry: &EntryReply) -> Replied {
    let out = entry_out(entry);
    reply::with_body(conn.sink(), unique, |b| out.encode(b))
}

fn reply_attr(conn: &Connection, unique: u64, attr: &AttrReply) -> Replied {
    let out = attr_out(attr);
    reply::with_body(conn.sink(), unique, |b| out.encode(b))
}

// --- tree operations ---

pub fn op_lookup(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let parent = resolve(conn, req.nodeid)?;
    let mut p = req.payload();
    let name = wire::take_name(&mut p, "lookup name").map_err(Errno::from)?;
    let entry = parent.ops().lookup(parent.ino, &name)?;
    Ok(reply_entry(conn, req.unique, &entry))
}

pub fn op_getattr(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let node = resolve(conn, req.nodeid)?;
    let mut p = req.payload();
    let _args = GetattrIn::decode(&mut p).map_err(Errno::from)?;
    let attr = node.ops().getattr(node.ino)?;
    Ok(reply_attr(conn, req.unique, &attr))
}

pub fn op_setattr(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let node = resolve(conn, req.nodeid)?;
    let mut p = req.payload();
    let args = SetattrIn::decode(&mut p).map_err(Errno::from)?;
    let changes = SetattrRequest::from_wire(&args);
    let attr = node.ops().setattr(node.ino, &changes)?;
    Ok(reply_attr(conn, req.unique, &attr))
}

pub fn op_readlink(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let node = resolve(conn, req.nodeid)?;
    let target = node.ops().readlink(node.ino)?;
    Ok(reply::data(conn.sink(), req.unique, &target))
}

pub fn op_symlink(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let parent = resolve(conn, req.nodeid)?;
    let mut p = req.payload();
    let name = wire::take_name(&mut p, "symlink name").map_err(Errno::from)?;
    let target = wire::take_name(&mut p, "symlink target").map_err(Errno::from)?;
    let entry = parent.ops().symlink(parent.ino, &name, &target)?;
    Ok(reply_entry(conn, req.unique, &entry))
}

pub fn op_mknod(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let parent = resolve(conn, req.nodeid)?;
    let mut p = req.payload();
    let args = MknodIn::decode(&mut p).map_err(Errno::from)?;
    let name = wire::take_name(&mut p, "mknod name").map_err(Errno::from)?;
    let mode = conn.effective_mode(args.mode, args.umask);
    let entry = parent.ops().mknod(parent.ino, &name, mode, args.rdev)?;
    Ok(reply_entry(conn, req.unique, &entry))
}

pub fn op_mkdir(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let parent = resolve(conn, req.nodeid)?;
    let mut p = req.payload();
    let args = MkdirIn::decode(&mut p).map_err(Errno::from)?;
    let name = wire::take_name(&mut p, "mkdir name").map_err(Errno::from)?;
    let mode = conn.effective_mode(args.mode, args.umask);
    let entry = parent.ops().mkdir(parent.ino, &name, mode)?;
    Ok(reply_entry(conn, req.unique, &entry))
}

pub fn op_unlink(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let parent = resolve(conn, req.nodeid)?;
    let mut p = req.payload();
    let name = wire::take_name(&mut p, "unlink name").map_err(Errno::from)?;
    parent.ops().unlink(parent.ino, &name)?;
    Ok(reply::empty(conn.sink(), req.unique))
}

pub fn op_rmdir(conn: &Connection, req: &Request) -> OpResult<Replied> {
    // Top-level entries hang off the pinned root and are not removable
    // through it.
    if req.nodeid == ROOT_INO {
        return Err(Errno::ACCES);
    }
    let parent = resolve(conn, req.nodeid)?;
    let mut p = req.payload();
    let name = wire::take_name(&mut p, "rmdir name").map_err(Errno::from)?;
    parent.ops().rmdir(parent.ino, &name)?;
    Ok(reply::empty(conn.sink(), req.unique))
}

pub fn op_rename(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    let args = RenameIn::decode(&mut p).map_err(Errno::from)?;
    // Source and destination parents resolve independently.
    let parent = resolve(conn, req.nodeid)?;
    let newparent = resolve(conn, args.newdir)?;
    let name = wire::take_name(&mut p, "rename name").map_err(Errno::from)?;
    let newname = wire::take_name(&mut p, "rename newname").map_err(Errno::from)?;
    parent
        .ops()
        .rename(parent.ino, &name, newparent.ino, &newname)?;
    Ok(reply::empty(conn.sink(), req.unique))
}

pub fn op_link(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    let args = LinkIn::decode(&mut p).map_err(Errno::from)?;
    let node = resolve(conn, args.oldnodeid)?;
    let newparent = resolve(conn, req.nodeid)?;
    let newname = wire::take_name(&mut p, "link name").map_err(Errno::from)?;
    let entry = node.ops().link(node.ino, newparent.ino, &newname)?;
    Ok(reply_entry(conn, req.unique, &entry))
}

pub fn op_access(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let node = resolve(conn, req.nodeid)?;
    let mut p = req.payload();
    let args = AccessIn::decode(&mut p).map_err(Errno::from)?;
    node.ops().access(node.ino, args.mask)?;
    Ok(reply::empty(conn.sink(), req.unique))
}

pub fn op_statfs(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let ino = if req.nodeid == 0 { ROOT_INO } else { req.nodeid };
    let node = resolve(conn, ino)?;
    let out = node.ops().statfs(node.ino)?;
    Ok(reply::with_body(conn.sink(), req.unique, |b| out.encode(b)))
}

pub fn op_getxattr(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let node = resolve(conn, req.nodeid)?;
    let mut p = req.payload();
    let args = GetxattrIn::decode(&mut p).map_err(Errno::from)?;
    let name = wire::take_name(&mut p, "xattr name").map_err(Errno::from)?;
    match node.ops().getxattr(node.ino, &name, args.size)? {
        XattrReply::Size(size) => Ok(reply::xattr_size(conn.sink(), req.unique, size)),
        XattrReply::Data(data) => {
            if data.len() as u32 > args.size {
                return Err(Errno(libc::ERANGE));
            }
            Ok(reply::data(conn.sink(), req.unique, &data))
        }
    }
}

// --- open-file lifecycle ---

pub fn op_open(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let node = resolve(conn, req.nodeid)?;
    let mut p = req.payload();
    let args = OpenIn::decode(&mut p).map_err(Errno::from)?;

    let fh = conn
        .handles()
        .insert_file(OpenFile::new(node.ino, args.flags, node.ops()));
    let file = conn.handles().file(fh).expect("freshly inserted handle");

    match file.ops().open(&file) {
        Ok(opened) => {
            let out = OpenOut {
                fh,
                open_flags: opened.open_flags,
            };
            Ok(reply::with_body(conn.sink(), req.unique, |b| out.encode(b)))
        }
        Err(errno) => {
            // Free the handle immediately; the single error reply is sent
            // by dispatch.
            conn.handles().remove(fh);
            Err(errno)
        }
    }
}

pub fn op_create(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let parent = resolve(conn, req.nodeid)?;
    let mut p = req.payload();
    let args = CreateIn::decode(&mut p).map_err(Errno::from)?;
    let name = wire::take_name(&mut p, "create name").map_err(Errno::from)?;
    let mode = conn.effective_mode(args.mode, args.umask);

    let fh = conn
        .handles()
        .insert_file(OpenFile::new(0, args.flags, parent.ops()));
    let file = conn.handles().file(fh).expect("freshly inserted handle");

    match file
        .ops()
        .create(parent.ino, &name, mode, args.flags, &file)
    {
        Ok(created) => {
            file.set_ino(created.entry.ino);
            let eout = entry_out(&created.entry);
            let oout = OpenOut {
                fh,
                open_flags: created.open_flags,
            };
            Ok(reply::with_body(conn.sink(), req.unique, |b| {
                eout.encode(b);
                oout.encode(b);
            }))
        }
        Err(errno) => {
            conn.handles().remove(fh);
            Err(errno)
        }
    }
}

pub fn op_read(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    let args = ReadIn::decode(&mut p).map_err(Errno::from)?;
    let file = file_handle(conn, args.fh)?;
    let size = args.size.min(conn.config().max_read);
    let data = file.ops().read(&file, args.offset, size)?;
    Ok(reply::data(conn.sink(), req.unique, &data))
}

pub fn op_write(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    let args = WriteIn::decode(&mut p).map_err(Errno::from)?;
    let file = file_handle(conn, args.fh)?;
    if p.len() < args.size as usize {
        return Err(Errno::IO);
    }
    let written = file.ops().write(&file, args.offset, &p[..args.size as usize])?;
    let out = WriteOut { size: written };
    Ok(reply::with_body(conn.sink(), req.unique, |b| out.encode(b)))
}

pub fn op_flush(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    let args = FlushIn::decode(&mut p).map_err(Errno::from)?;
    let file = file_handle(conn, args.fh)?;
    file.set_lock_owner(args.lock_owner);
    file.ops().flush(&file, args.lock_owner)?;
    Ok(reply::empty(conn.sink(), req.unique))
}

pub fn op_fsync(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    let args = FsyncIn::decode(&mut p).map_err(Errno::from)?;
    let file = file_handle(conn, args.fh)?;
    file.ops().fsync(&file, args.datasync())?;
    Ok(reply::empty(conn.sink(), req.unique))
}

pub fn op_release(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    let args = ReleaseIn::decode(&mut p).map_err(Errno::from)?;
    let file = file_handle(conn, args.fh)?;
    let result = file.ops().release(&file);
    // The handle dies at release no matter what the backend said.
    conn.handles().remove(args.fh);
    result?;
    Ok(reply::empty(conn.sink(), req.unique))
}

// --- open-directory lifecycle ---

pub fn op_opendir(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let node = resolve(conn, req.nodeid)?;
    let mut p = req.payload();
    let _args = OpenIn::decode(&mut p).map_err(Errno::from)?;

    // Capture the directory-operation bindings at opendir time; a delegating
    // backend may hand this inode's directory ops to a sub-backend.
    let base = node.ops();
    let dir_ops = base.backend_for(node.ino).unwrap_or(base);

    let fh = conn.handles().insert_dir(OpenDir::new(node.ino, dir_ops));
    let dir = conn.handles().dir(fh).expect("freshly inserted handle");

    match dir.ops().opendir(&dir) {
        Ok(opened) => {
            let out = OpenOut {
                fh,
                open_flags: opened.open_flags,
            };
            Ok(reply::with_body(conn.sink(), req.unique, |b| out.encode(b)))
        }
        Err(errno) => {
            conn.handles().remove(fh);
            Err(errno)
        }
    }
}

pub fn op_readdir(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    let args = ReadIn::decode(&mut p).map_err(Errno::from)?;
    let dir = dir_handle(conn, args.fh)?;
    let mut buf = DirBuf::new(args.size as usize);
    dir.ops().readdir(&dir, args.offset, &mut buf)?;
    dir.set_cursor(args.offset);
    Ok(reply::data(conn.sink(), req.unique, buf.bytes()))
}

pub fn op_readdirplus(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    let args = ReadIn::decode(&mut p).map_err(Errno::from)?;
    let dir = dir_handle(conn, args.fh)?;
    let mut buf = DirBuf::new(args.size as usize);
    dir.ops().readdirplus(&dir, args.offset, &mut buf)?;
    dir.set_cursor(args.offset);
    Ok(reply::data(conn.sink(), req.unique, buf.bytes()))
}

pub fn op_releasedir(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    let args = ReleaseIn::decode(&mut p).map_err(Errno::from)?;
    let dir = dir_handle(conn, args.fh)?;
    let result = dir.ops().releasedir(&dir);
    conn.handles().remove(args.fh);
    result?;
    Ok(reply::empty(conn.sink(), req.unique))
}

pub fn op_fsyncdir(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    let args = FsyncIn::decode(&mut p).map_err(Errno::from)?;
    let dir = dir_handle(conn, args.fh)?;
    dir.ops().fsyncdir(&dir, args.datasync())?;
    Ok(reply::empty(conn.sink(), req.unique))
}

// --- lock routing ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockProto {
    Posix,
    Flock,
}

fn setlk_common(
    conn: &Connection,
    req: &Request,
    sleep: bool,
    forced: Option<LockProto>,
) -> OpResult<Replied> {
    let mut p = req.payload();
    let args = LkIn::decode(&mut p).map_err(Errno::from)?;
    let file = file_handle(conn, args.fh)?;

    let proto = forced.unwrap_or(if args.lk_flags & wire::LK_FLOCK != 0 {
        LockProto::Flock
    } else {
        LockProto::Posix
    });

    file.set_lock_owner(args.owner);
    match proto {
        LockProto::Flock => {
            let op = lock::flock_from_wire(&args.lk, sleep)?;
            file.ops().flock(&file, args.owner, &op)?;
        }
        LockProto::Posix => {
            let lk = lock::posix_from_wire(&args.lk)?;
            file.ops().setlk(&file, args.owner, &lk, sleep)?;
        }
    }
    Ok(reply::empty(conn.sink(), req.unique))
}

pub fn op_setlk_generic(conn: &Connection, req: &Request) -> OpResult<Replied> {
    setlk_common(conn, req, false, None)
}

pub fn op_setlkw_generic(conn: &Connection, req: &Request) -> OpResult<Replied> {
    setlk_common(conn, req, true, None)
}

pub fn op_setlk_flock(conn: &Connection, req: &Request) -> OpResult<Replied> {
    setlk_common(conn, req, false, Some(LockProto::Flock))
}

pub fn op_setlkw_flock(conn: &Connection, req: &Request) -> OpResult<Replied> {
    setlk_common(conn, req, true, Some(LockProto::Flock))
}

pub fn op_setlk_posix(conn: &Connection, req: &Request) -> OpResult<Replied> {
    setlk_common(conn, req, false, Some(LockProto::Posix))
}

pub fn op_setlkw_posix(conn: &Connection, req: &Request) -> OpResult<Replied> {
    setlk_common(conn, req, true, Some(LockProto::Posix))
}

/// Getlk is always a POSIX-style query, whatever the negotiated variant.
pub fn op_getlk(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    let args = LkIn::decode(&mut p).map_err(Errno::from)?;
    let file = file_handle(conn, args.fh)?;
    let probe = lock::posix_from_wire(&args.lk)?;
    let found = file.ops().getlk(&file, args.owner, &probe)?;
    let out = match found {
        Some(conflict) => lock::posix_to_wire(&conflict),
        None => lock::unlocked_wire(),
    };
    Ok(reply::with_body(conn.sink(), req.unique, |b| out.encode(b)))
}

// --- library defaults ---

pub fn op_forget(conn: &Connection, req: &Request) -> OpResult<Replied> {
    // Forget never replies, not even on a malformed body.
    let mut p = req.payload();
    match ForgetIn::decode(&mut p) {
        Ok(args) => {
            if req.nodeid != ROOT_INO {
                if let Some(node) = conn.resolve(req.nodeid) {
                    node.ops().forget(node.ino, args.nlookup);
                }
            }
        }
        Err(e) => tracing::warn!("discarding malformed forget: {}", e),
    }
    Ok(Replied::none())
}

pub fn op_batch_forget(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    match wire::decode_batch_forget(&mut p) {
        Ok(list) => {
            for item in list {
                if item.nodeid != ROOT_INO {
                    if let Some(node) = conn.resolve(item.nodeid) {
                        node.ops().forget(node.ino, item.nlookup);
                    }
                }
            }
        }
        Err(e) => tracing::warn!("discarding malformed batch forget: {}", e),
    }
    Ok(Replied::none())
}

pub fn op_interrupt(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    match InterruptIn::decode(&mut p) {
        Ok(args) => {
            let hit = conn
                .pending()
                .signal(conn.hub(), args.unique, SignalKind::Interrupted, 0);
            tracing::debug!(target_unique = args.unique, hit, "interrupt delivered");
        }
        Err(e) => tracing::warn!("discarding malformed interrupt: {}", e),
    }
    Ok(Replied::none())
}

pub fn op_destroy(conn: &Connection, req: &Request) -> OpResult<Replied> {
    conn.mark_destroyed();
    Ok(reply::empty(conn.sink(), req.unique))
}
