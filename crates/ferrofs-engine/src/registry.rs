//! Pending-request registry and cross-thread signaling.
//!
//! Every dispatched request is registered here for the duration of its
//! handler so that any thread holding its identity can deliver an interrupt,
//! a delayed response, or an error. Lookup happens under the map's shard lock
//! only; the flag mutation and wakeup use the connection's own signal hub so
//! unrelated connections never serialize on each other.

use crate::request::{Request, RequestState, SignalKind};
use dashmap::DashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

/// Connection-owned mutex/condvar pair used for all request signaling.
#[derive(Debug, Default)]
pub struct SignalHub {
    mutex: Mutex<()>,
    cv: Condvar,
}

impl SignalHub {
    pub fn new() -> Self {
        SignalHub::default()
    }
}

/// Outcome of a bounded wait for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    NoResponse,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    opcode: u32,
    state: Arc<RequestState>,
}

/// Per-connection sharded index of in-flight requests, keyed by identity.
/// Entries are inserted no earlier than dispatch start and removed no later
/// than request destruction, so a signal can never land on a stale or reused
/// identity.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: DashMap<u64, PendingEntry>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        PendingRegistry {
            entries: DashMap::new(),
        }
    }

    pub fn register(&self, request: &Request) {
        self.entries.insert(
            request.unique,
            PendingEntry {
                opcode: request.opcode,
                state: Arc::clone(&request.state),
            },
        );
    }

    pub fn unregister(&self, request: &Request) {
        self.entries.remove(&request.unique);
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    pub fn opcode_of(&self, unique: u64) -> Option<u32> {
        self.entries.get(&unique).map(|e| e.opcode)
    }

    /// Delivers a signal to the in-flight request with the given identity.
    /// Returns false when no such request is registered. The shard lock is
    /// held only for the lookup; the flag is raised and the hub broadcast
    /// under the connection's own lock.
    pub fn signal(&self, hub: &SignalHub, unique: u64, kind: SignalKind, errno: i32) -> bool {
        let state = match self.entries.get(&unique) {
            Some(entry) => Arc::clone(&entry.state),
            None => return false,
        };

        let _guard = hub.mutex.lock().unwrap();
        state.raise(kind, errno);
        hub.cv.notify_all();
        true
    }

    /// Blocks until a signal reaches `state` or the deadline elapses.
    /// Expiry raises the error flag with `ETIMEDOUT` and reports
    /// `NoResponse`; the timeout is surfaced to the caller, not treated as a
    /// failure of the wait itself.
    pub fn wait(&self, hub: &SignalHub, state: &RequestState, deadline: Instant) -> WaitOutcome {
        let mut guard = hub.mutex.lock().unwrap();
        loop {
            if state.signaled() {
                return WaitOutcome::Signaled;
            }
            let now = Instant::now();
            if now >= deadline {
                state.raise(SignalKind::Error, libc::ETIMEDOUT);
                return WaitOutcome::NoResponse;
            }
            let (g, _timeout) = hub.cv.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{opcode, InHeader};
    use std::thread;
    use std::time::Duration;

    fn request(unique: u64) -> Request {
        let header = InHeader {
            len: 40,
            opcode: opcode::READ,
            unique,
            nodeid: 2,
            uid: 0,
            gid: 0,
            pid: 0,
        };
        Request::from_frame(&header, Vec::new())
    }

    #[test]
    fn test_register_then_signal_interrupt() {
        let registry = PendingRegistry::new();
        let hub = SignalHub::new();
        let req = request(1);

        registry.register(&req);
        assert!(registry.signal(&hub, 1, SignalKind::Interrupted, 0));
        assert!(req.state.is_interrupted());
    }

    #[test]
    fn test_signal_unknown_identity_returns_false() {
        let registry = PendingRegistry::new();
        let hub = SignalHub::new();
        assert!(!registry.signal(&hub, 999, SignalKind::Interrupted, 0));
    }

    #[test]
    fn test_unregister_makes_identity_unreachable() {
        let registry = PendingRegistry::new();
        let hub = SignalHub::new();
        let req = request(5);

        registry.register(&req);
        registry.unregister(&req);
        assert!(!registry.signal(&hub, 5, SignalKind::Interrupted, 0));
        assert!(!req.state.is_interrupted());
    }

    #[test]
    fn test_interrupt_hits_exactly_one_of_many() {
        let registry = PendingRegistry::new();
        let hub = SignalHub::new();
        // Identities chosen to collide in any small power-of-two bucketing.
        let a = request(0x10);
        let b = request(0x110);
        let c = request(0x210);

        registry.register(&a);
        registry.register(&b);
        registry.register(&c);

        assert!(registry.signal(&hub, 0x110, SignalKind::Interrupted, 0));

        assert!(!a.state.is_interrupted());
        assert!(b.state.is_interrupted());
        assert!(!c.state.is_interrupted());
    }

    #[test]
    fn test_pending_count_and_opcode_lookup() {
        let registry = PendingRegistry::new();
        let req = request(7);

        registry.register(&req);
        assert_eq!(registry.pending_count(), 1);
        assert_eq!(registry.opcode_of(7), Some(opcode::READ));
        assert_eq!(registry.opcode_of(8), None);

        registry.unregister(&req);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_wait_times_out_with_etimedout() {
        let registry = PendingRegistry::new();
        let hub = SignalHub::new();
        let req = request(3);
        registry.register(&req);

        let start = Instant::now();
        let outcome = registry.wait(&hub, &req.state, Instant::now() + Duration::from_millis(100));
        let elapsed = start.elapsed();

        assert_eq!(outcome, WaitOutcome::NoResponse);
        assert!(req.state.has_error());
        assert_eq!(req.state.errno(), libc::ETIMEDOUT);
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(1000), "scheduling slack blown");
    }

    #[test]
    fn test_wait_wakes_on_response_signal() {
        let registry = Arc::new(PendingRegistry::new());
        let hub = Arc::new(SignalHub::new());
        let req = request(11);
        registry.register(&req);

        let signaler = {
            let registry = Arc::clone(&registry);
            let hub = Arc::clone(&hub);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                assert!(registry.signal(&hub, 11, SignalKind::Response, 0));
            })
        };

        let outcome = registry.wait(&hub, &req.state, Instant::now() + Duration::from_secs(5));
        signaler.join().unwrap();

        assert_eq!(outcome, WaitOutcome::Signaled);
        assert!(req.state.has_response());
        assert!(!req.state.has_error());
    }

    #[test]
    fn test_wait_returns_immediately_when_already_signaled() {
        let registry = PendingRegistry::new();
        let hub = SignalHub::new();
        let req = request(13);
        registry.register(&req);
        registry.signal(&hub, 13, SignalKind::Error, libc::EIO);

        let outcome = registry.wait(&hub, &req.state, Instant::now() + Duration::from_secs(5));
        assert_eq!(outcome, WaitOutcome::Signaled);
        assert_eq!(req.state.errno(), libc::EIO);
    }
}
