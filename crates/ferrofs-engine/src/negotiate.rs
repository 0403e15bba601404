//! INIT capability negotiation.
//!
//! A single-transition state machine: the first INIT reconciles the
//! kernel-advertised capability bits against the named configuration
//! switches, fixes the transfer limits, and rebinds the lock-opcode handlers
//! by swapping in a freshly built dispatch table.

use crate::config::{EngineConfig, CAPABILITY_SWITCHES};
use crate::dispatch::{DispatchTable, LockVariant};
use crate::error::{Errno, OpResult};
use crate::reply::{self, Replied};
use crate::request::Request;
use crate::session::{Connection, MaskPolicy};
use crate::wire::{CapFlags, InitIn, InitOut, KERNEL_MAJOR, KERNEL_MINOR, MAX_WRITE};
use std::sync::Arc;

pub const MAX_BACKGROUND: u16 = 12;
/// Fixed fraction of max-background, matching the kernel's expectation.
pub const CONGESTION_THRESHOLD: u16 = MAX_BACKGROUND / 4 * 3;

/// Enables each kernel-advertised capability only when the switch of the
/// same name opts in. A capability without a recognized switch is treated as
/// not compiled in and never advertised back.
pub fn reconcile(advertised: CapFlags, config: &EngineConfig) -> CapFlags {
    let mut negotiated = CapFlags::empty();
    for (bit, name, _) in CAPABILITY_SWITCHES {
        if advertised.contains(*bit) && config.flag(name) == Some(true) {
            negotiated |= *bit;
        }
    }
    negotiated
}

/// Lock-handler variant implied by a negotiated flag set.
pub fn lock_variant_for(negotiated: CapFlags) -> LockVariant {
    let flock = negotiated.contains(CapFlags::FLOCK_LOCKS);
    let posix = negotiated.contains(CapFlags::POSIX_LOCKS);
    match (flock, posix) {
        (true, false) => LockVariant::FlockOnly,
        (false, true) => LockVariant::PosixOnly,
        _ => LockVariant::Generic,
    }
}

pub fn op_init(conn: &Connection, req: &Request) -> OpResult<Replied> {
    let mut p = req.payload();
    let init = InitIn::decode(&mut p).map_err(Errno::from)?;

    tracing::info!(
        kernel_major = init.major,
        kernel_minor = init.minor,
        advertised = ?init.flags,
        "init received"
    );

    // Kernel older than we speak: the connection is unusable.
    if init.major < KERNEL_MAJOR {
        tracing::error!(kernel_major = init.major, "kernel protocol too old");
        return Err(Errno(libc::EPROTO));
    }

    // Kernel newer than we speak: answer with our version and no
    // capabilities; the kernel re-sends INIT at our major.
    if init.major > KERNEL_MAJOR {
        let out = InitOut {
            major: KERNEL_MAJOR,
            minor: KERNEL_MINOR,
            max_readahead: 0,
            flags: CapFlags::empty(),
            max_background: 0,
            congestion_threshold: 0,
            max_write: 0,
        };
        return Ok(reply::with_body(conn.sink(), req.unique, |b| out.encode(b)));
    }

    let negotiated = reconcile(init.flags, conn.config());
    conn.set_negotiated(negotiated);

    let out = InitOut {
        major: KERNEL_MAJOR,
        minor: KERNEL_MINOR,
        max_readahead: init.max_readahead,
        flags: negotiated,
        max_background: MAX_BACKGROUND,
        congestion_threshold: CONGESTION_THRESHOLD,
        max_write: MAX_WRITE,
    };
    let replied = reply::with_body(conn.sink(), req.unique, |b| out.encode(b));

    // Post-reply reconfiguration: lock-variant rebinding happens by building
    // a new table and swapping it in with one assignment, never by mutating
    // the live table.
    let variant = lock_variant_for(negotiated);
    conn.install_table(Arc::new(DispatchTable::with_lock_variant(variant)));

    if negotiated.contains(CapFlags::DONT_MASK) {
        conn.set_mask_policy(MaskPolicy::ApplyMask);
    } else {
        // The kernel already applied the umask.
        conn.set_mask_policy(MaskPolicy::IgnoreMask);
    }

    tracing::info!(negotiated = ?negotiated, variant = ?variant, "init negotiated");
    Ok(replied)
}
