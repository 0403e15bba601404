//! Opcode dispatch.
//!
//! A fixed-size table maps every possible opcode value to a handler. Slots
//! default to "unimplemented" (`ENOSYS`); registration is idempotent with
//! last-write-wins. After startup the table is never mutated in place: INIT
//! builds a fresh table for the negotiated lock variant and the connection
//! swaps it in with a single assignment.

use crate::error::{Errno, OpResult};
use crate::negotiate;
use crate::reply::{self, Replied};
use crate::request::Request;
use crate::router;
use crate::session::Connection;
use crate::wire::opcode;

pub type OpHandler = fn(&Connection, &Request) -> OpResult<Replied>;

pub const TABLE_SLOTS: usize = opcode::MAX_OPCODE as usize + 1;

/// Lock-opcode handler variant chosen by capability negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockVariant {
    /// Inspect the per-request flock flag.
    #[default]
    Generic,
    /// Negotiated flock-locks without posix-locks.
    FlockOnly,
    /// Negotiated posix-locks without flock-locks.
    PosixOnly,
}

fn unimplemented(_conn: &Connection, _req: &Request) -> OpResult<Replied> {
    Err(Errno::NOSYS)
}

pub struct DispatchTable {
    slots: [OpHandler; TABLE_SLOTS],
    lock_variant: LockVariant,
}

impl DispatchTable {
    /// Table with only the pre-negotiation defaults installed: INIT, DESTROY
    /// and the no-reply forget opcodes. Everything else answers `ENOSYS`.
    pub fn new() -> Self {
        let mut table = DispatchTable {
            slots: [unimplemented as OpHandler; TABLE_SLOTS],
            lock_variant: LockVariant::Generic,
        };
        table.register(opcode::INIT, negotiate::op_init);
        table.register(opcode::DESTROY, router::op_destroy);
        table.register(opcode::FORGET, router::op_forget);
        table.register(opcode::BATCH_FORGET, router::op_batch_forget);
        table.register(opcode::INTERRUPT, router::op_interrupt);
        table
    }

    /// Table with the full operation set routed, generic lock handlers bound.
    pub fn with_standard_ops() -> Self {
        Self::with_lock_variant(LockVariant::Generic)
    }

    /// Full table with the SETLK/SETLKW slots bound for the given variant.
    pub fn with_lock_variant(variant: LockVariant) -> Self {
        let mut table = Self::new();
        table.register(opcode::LOOKUP, router::op_lookup);
        table.register(opcode::GETATTR, router::op_getattr);
        table.register(opcode::SETATTR, router::op_setattr);
        table.register(opcode::READLINK, router::op_readlink);
        table.register(opcode::SYMLINK, router::op_symlink);
        table.register(opcode::MKNOD, router::op_mknod);
        table.register(opcode::MKDIR, router::op_mkdir);
        table.register(opcode::UNLINK, router::op_unlink);
        table.register(opcode::RMDIR, router::op_rmdir);
        table.register(opcode::RENAME, router::op_rename);
        table.register(opcode::LINK, router::op_link);
        table.register(opcode::OPEN, router::op_open);
        table.register(opcode::READ, router::op_read);
        table.register(opcode::WRITE, router::op_write);
        table.register(opcode::STATFS, router::op_statfs);
        table.register(opcode::RELEASE, router::op_release);
        table.register(opcode::FSYNC, router::op_fsync);
        table.register(opcode::GETXATTR, router::op_getxattr);
        table.register(opcode::FLUSH, router::op_flush);
        table.register(opcode::OPENDIR, router::op_opendir);
        table.register(opcode::READDIR, router::op_readdir);
        table.register(opcode::RELEASEDIR, router::op_releasedir);
        table.register(opcode::FSYNCDIR, router::op_fsyncdir);
        table.register(opcode::GETLK, router::op_getlk);
        table.register(opcode::ACCESS, router::op_access);
        table.register(opcode::CREATE, router::op_create);
        table.register(opcode::READDIRPLUS, router::op_readdirplus);

        let (setlk, setlkw): (OpHandler, OpHandler) = match variant {
            LockVariant::Generic => (router::op_setlk_generic, router::op_setlkw_generic),
            LockVariant::FlockOnly => (router::op_setlk_flock, router::op_setlkw_flock),
            LockVariant::PosixOnly => (router::op_setlk_posix, router::op_setlkw_posix),
        };
        table.register(opcode::SETLK, setlk);
        table.register(opcode::SETLKW, setlkw);
        table.lock_variant = variant;
        table
    }

    /// Installs a handler. Last write wins; out-of-range opcodes are logged
    /// and ignored.
    pub fn register(&mut self, op: u32, handler: OpHandler) {
        match self.slots.get_mut(op as usize) {
            Some(slot) => *slot = handler,
            None => tracing::warn!(opcode = op, "handler registration beyond table bounds"),
        }
    }

    pub fn handler(&self, op: u32) -> Option<OpHandler> {
        self.slots.get(op as usize).copied()
    }

    pub fn lock_variant(&self) -> LockVariant {
        self.lock_variant
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one request to completion: register in the pending registry, invoke
/// the handler, unregister, convert a handler error into the single error
/// reply. The request is destroyed on return; handlers may not retain it.
pub fn dispatch(conn: &Connection, req: Request) {
    let table = conn.table();
    let handler = match table.handler(req.opcode) {
        Some(handler) => handler,
        None => {
            tracing::warn!(
                opcode = req.opcode,
                unique = req.unique,
                "opcode beyond table bounds"
            );
            let _ = reply::nosys(conn.sink(), req.unique);
            return;
        }
    };

    conn.pending().register(&req);
    let result = handler(conn, &req);
    conn.pending().unregister(&req);

    if let Err(errno) = result {
        tracing::debug!(
            opcode = req.opcode,
            op = crate::wire::opcode::name(req.opcode),
            unique = req.unique,
            errno = errno.0,
            "request failed"
        );
        let _ = reply::error(conn.sink(), req.unique, errno.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(_conn: &Connection, _req: &Request) -> OpResult<Replied> {
        Err(Errno(libc::EREMOTE))
    }

    #[test]
    fn test_default_table_slots_are_unimplemented() {
        let table = DispatchTable::new();
        let handler = table.handler(opcode::LOOKUP).unwrap();
        assert!(std::ptr::fn_addr_eq(handler, unimplemented as OpHandler));
    }

    #[test]
    fn test_defaults_installed_before_negotiation() {
        let table = DispatchTable::new();
        for op in [
            opcode::INIT,
            opcode::DESTROY,
            opcode::FORGET,
            opcode::BATCH_FORGET,
            opcode::INTERRUPT,
        ] {
            let handler = table.handler(op).unwrap();
            assert!(
                !std::ptr::fn_addr_eq(handler, unimplemented as OpHandler),
                "opcode {} should have a library default",
                op
            );
        }
    }

    #[test]
    fn test_handler_out_of_bounds_is_none() {
        let table = DispatchTable::with_standard_ops();
        assert!(table.handler(opcode::MAX_OPCODE + 1).is_none());
        assert!(table.handler(u32::MAX).is_none());
    }

    #[test]
    fn test_register_is_idempotent_last_write_wins() {
        let mut table = DispatchTable::new();
        table.register(opcode::LOOKUP, probe);
        table.register(opcode::LOOKUP, probe);
        let handler = table.handler(opcode::LOOKUP).unwrap();
        assert!(std::ptr::fn_addr_eq(handler, probe as OpHandler));
    }

    #[test]
    fn test_register_out_of_bounds_is_ignored() {
        let mut table = DispatchTable::new();
        table.register(u32::MAX, probe);
        assert!(table.handler(u32::MAX).is_none());
    }

    #[test]
    fn test_lock_variant_rebinding_changes_setlk_slots() {
        let generic = DispatchTable::with_lock_variant(LockVariant::Generic);
        let flock = DispatchTable::with_lock_variant(LockVariant::FlockOnly);
        let posix = DispatchTable::with_lock_variant(LockVariant::PosixOnly);

        let g = generic.handler(opcode::SETLK).unwrap();
        let f = flock.handler(opcode::SETLK).unwrap();
        let p = posix.handler(opcode::SETLK).unwrap();

        assert!(!std::ptr::fn_addr_eq(g, f));
        assert!(!std::ptr::fn_addr_eq(g, p));
        assert!(!std::ptr::fn_addr_eq(f, p));

        // Non-lock slots stay identical across variants.
        assert!(std::ptr::fn_addr_eq(
            generic.handler(opcode::READ).unwrap(),
            flock.handler(opcode::READ).unwrap()
        ));
    }
}
