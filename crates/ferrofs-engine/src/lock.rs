//! Advisory-lock request conversion.
//!
//! Lock opcodes arrive as one wire shape but carry two protocols: POSIX
//! record locks (byte ranges, per-owner) and BSD flock locks (whole file,
//! per-open). The two converters here translate the wire lock block into the
//! matching typed request; which converter a lock opcode uses is decided by
//! the per-request flock flag or by the handler variant bound at INIT.

use crate::error::Errno;
use crate::wire::{FileLock, OFFSET_MAX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
    Unlock,
}

impl LockKind {
    pub fn from_typ(typ: i32) -> Result<Self, Errno> {
        match typ {
            t if t == libc::F_RDLCK => Ok(LockKind::Shared),
            t if t == libc::F_WRLCK => Ok(LockKind::Exclusive),
            t if t == libc::F_UNLCK => Ok(LockKind::Unlock),
            _ => Err(Errno::INVAL),
        }
    }

    pub fn to_typ(self) -> i32 {
        match self {
            LockKind::Shared => libc::F_RDLCK,
            LockKind::Exclusive => libc::F_WRLCK,
            LockKind::Unlock => libc::F_UNLCK,
        }
    }
}

/// POSIX record lock: byte range with length 0 meaning "to end of file".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosixLock {
    pub kind: LockKind,
    pub start: u64,
    pub len: u64,
    pub pid: u32,
}

/// BSD-style whole-file lock operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlockRequest {
    pub kind: LockKind,
    pub nonblocking: bool,
}

/// Converts a wire lock block into POSIX record-lock semantics. The wire
/// range is inclusive [start, end]; `end == OFFSET_MAX` is the to-end-of-file
/// sentinel and maps to length 0.
pub fn posix_from_wire(lk: &FileLock) -> Result<PosixLock, Errno> {
    let kind = LockKind::from_typ(lk.typ)?;
    if lk.end < lk.start {
        return Err(Errno::INVAL);
    }
    let len = if lk.end == OFFSET_MAX {
        0
    } else {
        lk.end - lk.start + 1
    };
    Ok(PosixLock {
        kind,
        start: lk.start,
        len,
        pid: lk.pid,
    })
}

/// Converts a POSIX record lock back to the wire block for getlk replies.
pub fn posix_to_wire(lock: &PosixLock) -> FileLock {
    let end = if lock.len == 0 {
        OFFSET_MAX
    } else {
        lock.start + lock.len - 1
    };
    FileLock {
        start: lock.start,
        end,
        typ: lock.kind.to_typ(),
        pid: lock.pid,
    }
}

/// The wire block reported for an uncontended getlk probe.
pub fn unlocked_wire() -> FileLock {
    FileLock {
        start: 0,
        end: 0,
        typ: libc::F_UNLCK,
        pid: 0,
    }
}

/// Converts a wire lock block into BSD flock semantics. Only the lock type
/// matters; the range is ignored. `sleep` comes from the blocking opcode
/// variant.
pub fn flock_from_wire(lk: &FileLock, sleep: bool) -> Result<FlockRequest, Errno> {
    let kind = LockKind::from_typ(lk.typ)?;
    Ok(FlockRequest {
        kind,
        nonblocking: !sleep,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(start: u64, end: u64, typ: i32) -> FileLock {
        FileLock {
            start,
            end,
            typ,
            pid: 321,
        }
    }

    #[test]
    fn test_posix_from_wire_plain_range() {
        let lock = posix_from_wire(&wire(100, 199, libc::F_WRLCK)).unwrap();
        assert_eq!(lock.kind, LockKind::Exclusive);
        assert_eq!(lock.start, 100);
        assert_eq!(lock.len, 100);
        assert_eq!(lock.pid, 321);
    }

    #[test]
    fn test_posix_from_wire_offset_max_means_to_eof() {
        let lock = posix_from_wire(&wire(64, OFFSET_MAX, libc::F_RDLCK)).unwrap();
        assert_eq!(lock.len, 0);
        assert_eq!(lock.start, 64);
    }

    #[test]
    fn test_posix_from_wire_inverted_range_is_einval() {
        assert_eq!(
            posix_from_wire(&wire(100, 50, libc::F_RDLCK)).unwrap_err(),
            Errno::INVAL
        );
    }

    #[test]
    fn test_posix_from_wire_bad_type_is_einval() {
        assert_eq!(posix_from_wire(&wire(0, 0, 77)).unwrap_err(), Errno::INVAL);
    }

    #[test]
    fn test_posix_roundtrip_preserves_range() {
        let original = wire(10, 29, libc::F_RDLCK);
        let lock = posix_from_wire(&original).unwrap();
        assert_eq!(posix_to_wire(&lock), original);
    }

    #[test]
    fn test_posix_to_wire_len_zero_restores_sentinel() {
        let lock = PosixLock {
            kind: LockKind::Exclusive,
            start: 5,
            len: 0,
            pid: 1,
        };
        let encoded = posix_to_wire(&lock);
        assert_eq!(encoded.end, OFFSET_MAX);
    }

    #[test]
    fn test_flock_from_wire_ignores_range() {
        let op = flock_from_wire(&wire(123, 456, libc::F_WRLCK), true).unwrap();
        assert_eq!(op.kind, LockKind::Exclusive);
        assert!(!op.nonblocking);
    }

    #[test]
    fn test_flock_nonblocking_from_setlk_variant() {
        let op = flock_from_wire(&wire(0, 0, libc::F_RDLCK), false).unwrap();
        assert!(op.nonblocking);
    }

    #[test]
    fn test_unlocked_wire_is_f_unlck() {
        assert_eq!(unlocked_wire().typ, libc::F_UNLCK);
    }

    #[test]
    fn test_lock_kind_typ_roundtrip() {
        for kind in [LockKind::Shared, LockKind::Exclusive, LockKind::Unlock] {
            assert_eq!(LockKind::from_typ(kind.to_typ()).unwrap(), kind);
        }
    }
}
