//! Typed in-flight requests.

use crate::wire::InHeader;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

/// Signal kinds deliverable to an in-flight request from another thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Interrupted,
    Response,
    Error,
}

/// Mutable flag-set shared between a request's handler and the pending
/// registry. Flags are only ever set, never cleared, and mutation happens
/// under the connection's signal lock.
#[derive(Debug, Default)]
pub struct RequestState {
    interrupted: AtomicBool,
    responded: AtomicBool,
    failed: AtomicBool,
    errno: AtomicI32,
}

impl RequestState {
    pub fn new() -> Arc<Self> {
        Arc::new(RequestState::default())
    }

    pub fn raise(&self, kind: SignalKind, errno: i32) {
        match kind {
            SignalKind::Interrupted => self.interrupted.store(true, Ordering::SeqCst),
            SignalKind::Response => self.responded.store(true, Ordering::SeqCst),
            SignalKind::Error => {
                self.errno.store(errno, Ordering::SeqCst);
                self.failed.store(true, Ordering::SeqCst);
            }
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn has_response(&self) -> bool {
        self.responded.load(Ordering::SeqCst)
    }

    pub fn has_error(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn errno(&self) -> i32 {
        self.errno.load(Ordering::SeqCst)
    }

    /// True once any signal has been delivered.
    pub fn signaled(&self) -> bool {
        self.is_interrupted() || self.has_response() || self.has_error()
    }
}

/// One kernel message, decoded header plus raw payload. Owned exclusively by
/// the pipeline stage currently holding it; dropped after its handler
/// returns. `state` is shared with the pending registry so signals reach the
/// request from any thread.
#[derive(Debug)]
pub struct Request {
    pub unique: u64,
    pub opcode: u32,
    pub nodeid: u64,
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
    pub payload: Vec<u8>,
    pub state: Arc<RequestState>,
}

impl Request {
    pub fn from_frame(header: &InHeader, payload: Vec<u8>) -> Self {
        Request {
            unique: header.unique,
            opcode: header.opcode,
            nodeid: header.nodeid,
            uid: header.uid,
            gid: header.gid,
            pid: header.pid,
            payload,
            state: RequestState::new(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
