//! Connection lifecycle: frame reading, queue draining, teardown.
//!
//! One `Connection` exists per mounted filesystem instance. The external
//! event loop drives `on_readable` (never more than one concurrent read per
//! connection); dequeued requests are processed by worker-pool jobs, so
//! handlers for the same connection may run in parallel.

use crate::config::EngineConfig;
use crate::dispatch::{self, DispatchTable};
use crate::error::Result;
use crate::exec::{Interest, Reactor, ReactorToken, WorkerPool};
use crate::handle::HandleArena;
use crate::inode::{Inode, InodeResolver, ROOT_INO};
use crate::queue::RequestQueue;
use crate::registry::{PendingRegistry, SignalHub};
use crate::reply;
use crate::request::Request;
use crate::transport::{SharedTransport, Transport};
use crate::wire::{self, Attr, CapFlags, InHeader};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

/// Scratch read buffer: one page plus header headroom.
pub const SCRATCH_LEN: usize = wire::PAGE_SIZE + wire::PAGE_SIZE;

/// What kernel-supplied umask handling applies to create-family modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskPolicy {
    /// The engine masks the mode itself (dont-mask negotiated).
    ApplyMask,
    /// The kernel already applied the umask; pass the mode through.
    IgnoreMask,
}

/// Result of one frame-reader invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A request was queued and a drain job submitted.
    Enqueued,
    /// Nothing ready (would-block / interrupted); caller retries on the next
    /// readiness notification.
    Retry,
    /// A malformed frame was discarded; the connection stays up.
    BadFrame,
    /// Zero-length read: the peer is gone and the connection was torn down.
    Disconnected,
}

pub struct Connection {
    sink: SharedTransport,
    config: EngineConfig,
    resolver: Arc<dyn InodeResolver>,
    root: Arc<Inode>,
    queue: RequestQueue,
    pending: PendingRegistry,
    handles: HandleArena,
    hub: SignalHub,
    table: RwLock<Arc<DispatchTable>>,
    negotiated: RwLock<CapFlags>,
    mask_policy: RwLock<MaskPolicy>,
    scratch: Mutex<Vec<u8>>,
    destroyed: AtomicBool,
    weak_self: Weak<Connection>,
}

impl Connection {
    pub fn new(
        transport: Box<dyn Transport>,
        resolver: Arc<dyn InodeResolver>,
        root: Arc<Inode>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Connection {
            sink: SharedTransport::new(transport),
            config,
            resolver,
            root,
            queue: RequestQueue::new(),
            pending: PendingRegistry::new(),
            handles: HandleArena::new(),
            hub: SignalHub::new(),
            table: RwLock::new(Arc::new(DispatchTable::with_standard_ops())),
            negotiated: RwLock::new(CapFlags::empty()),
            mask_policy: RwLock::new(MaskPolicy::ApplyMask),
            scratch: Mutex::new(vec![0u8; SCRATCH_LEN]),
            destroyed: AtomicBool::new(false),
            weak_self: weak.clone(),
        })
    }

    /// Builds a connection with a fresh root inode owned by the given vtable.
    pub fn with_root_ops(
        transport: Box<dyn Transport>,
        resolver: Arc<dyn InodeResolver>,
        root_ops: Arc<dyn crate::backend::FsOps>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let attr = Attr {
            ino: ROOT_INO,
            mode: config.rootmode,
            nlink: 2,
            blksize: 4096,
            ..Attr::default()
        };
        let root = Inode::new(ROOT_INO, attr, root_ops);
        Self::new(transport, resolver, root, config)
    }

    pub fn sink(&self) -> &SharedTransport {
        &self.sink
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pending(&self) -> &PendingRegistry {
        &self.pending
    }

    pub fn handles(&self) -> &HandleArena {
        &self.handles
    }

    pub fn hub(&self) -> &SignalHub {
        &self.hub
    }

    pub fn root(&self) -> &Arc<Inode> {
        &self.root
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.config.entry_timeout_secs)
    }

    pub fn attr_ttl(&self) -> Duration {
        Duration::from_secs(self.config.attr_timeout_secs)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.config.negative_timeout_secs)
    }

    pub fn table(&self) -> Arc<DispatchTable> {
        Arc::clone(&self.table.read().unwrap())
    }

    /// Single-assignment table swap performed at INIT completion.
    pub fn install_table(&self, table: Arc<DispatchTable>) {
        *self.table.write().unwrap() = table;
    }

    pub fn negotiated(&self) -> CapFlags {
        *self.negotiated.read().unwrap()
    }

    pub fn set_negotiated(&self, flags: CapFlags) {
        *self.negotiated.write().unwrap() = flags;
    }

    pub fn mask_policy(&self) -> MaskPolicy {
        *self.mask_policy.read().unwrap()
    }

    pub fn set_mask_policy(&self, policy: MaskPolicy) {
        *self.mask_policy.write().unwrap() = policy;
    }

    /// Applies the kernel-supplied umask to a create-family mode according to
    /// the negotiated masking policy. Type bits always pass through.
    pub fn effective_mode(&self, mode: u32, umask: u32) -> u32 {
        match self.mask_policy() {
            MaskPolicy::IgnoreMask => mode,
            MaskPolicy::ApplyMask => {
                let type_bits = mode & libc::S_IFMT;
                let perm_bits = mode & 0o7777;
                type_bits | (perm_bits & !umask)
            }
        }
    }

    /// Resolves a request's target identity. The reserved root identity maps
    /// to the pinned root inode and never consults the registry.
    pub fn resolve(&self, ino: u64) -> Option<Arc<Inode>> {
        if ino == ROOT_INO {
            return Some(Arc::clone(&self.root));
        }
        self.resolver.resolve(ino)
    }

    /// One non-blocking read of a kernel frame. Contract per the transport
    /// taxonomy: would-block/interrupted retries softly, a zero-length read
    /// tears the connection down, a sub-header read discards the frame, a
    /// declared-length mismatch answers `EIO` at the header's identity.
    pub fn on_readable(&self, pool: &dyn WorkerPool) -> Result<ReadOutcome> {
        let frame = {
            let mut scratch = self.scratch.lock().unwrap();
            match self.sink.read_once(&mut scratch) {
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::Interrupted =>
                {
                    return Ok(ReadOutcome::Retry);
                }
                Err(e) => return Err(e.into()),
                Ok(0) => {
                    tracing::info!("peer disconnected, tearing down connection");
                    self.teardown();
                    return Ok(ReadOutcome::Disconnected);
                }
                Ok(n) => scratch[..n].to_vec(),
            }
        };

        if frame.len() < wire::IN_HEADER_LEN {
            tracing::warn!(len = frame.len(), "discarding sub-header frame");
            return Ok(ReadOutcome::BadFrame);
        }

        let mut p = frame.as_slice();
        let header = InHeader::decode(&mut p)?;
        if header.len as usize != frame.len() {
            tracing::warn!(
                declared = header.len,
                actual = frame.len(),
                unique = header.unique,
                "frame length mismatch"
            );
            let _ = reply::error(&self.sink, header.unique, libc::EIO);
            return Ok(ReadOutcome::BadFrame);
        }

        let request = Request::from_frame(&header, p.to_vec());
        self.queue.enqueue(request);

        if let Some(conn) = self.weak_self.upgrade() {
            pool.submit(Box::new(move || conn.drain_queue()));
        }
        Ok(ReadOutcome::Enqueued)
    }

    /// Worker-pool job body: drain until the queue is empty. Multiple drain
    /// jobs may run concurrently; each request is owned by exactly one.
    pub fn drain_queue(&self) {
        while let Some(request) = self.queue.dequeue() {
            dispatch::dispatch(self, request);
        }
    }

    /// Tears the connection down: queued-but-unprocessed requests are still
    /// answered (`EIO`) so the kernel never waits on a dead identity.
    pub fn teardown(&self) {
        self.mark_destroyed();
        for request in self.queue.drain() {
            let _ = reply::error(&self.sink, request.unique, libc::EIO);
        }
    }
}

/// An event-loop registration for a connection's device descriptor.
pub struct Endpoint {
    pub conn: Arc<Connection>,
    token: ReactorToken,
}

/// Registers the connection's descriptor for readiness callbacks.
pub fn attach(conn: Arc<Connection>, reactor: &dyn Reactor, fd: RawFd) -> Result<Endpoint> {
    let token = reactor.register(fd, Interest::READABLE)?;
    Ok(Endpoint { conn, token })
}

impl Endpoint {
    /// Deregisters from the event loop and tears the connection down.
    pub fn detach(self, reactor: &dyn Reactor) -> Result<()> {
        reactor.deregister(self.token)?;
        self.conn.teardown();
        Ok(())
    }
}
