//! Event-loop and worker-pool collaborator interfaces.
//!
//! Both are consumed, never implemented here: the event loop delivers
//! readiness callbacks, the worker pool runs queued-request drain jobs on
//! unspecified threads. The inline pool exists for tests and single-threaded
//! embedding.

use crate::error::Result;
use bitflags::bitflags;
use std::os::unix::io::RawFd;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interest: u8 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
    }
}

/// Opaque registration handle returned by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactorToken(pub u64);

pub trait Reactor: Send + Sync {
    fn register(&self, fd: RawFd, interest: Interest) -> Result<ReactorToken>;
    fn deregister(&self, token: ReactorToken) -> Result<()>;
}

/// Fire-and-forget job execution on an unspecified thread.
pub trait WorkerPool: Send + Sync {
    fn submit(&self, job: Box<dyn FnOnce() + Send + 'static>);
}

/// Runs every job immediately on the submitting thread.
#[derive(Debug, Default)]
pub struct InlinePool;

impl WorkerPool for InlinePool {
    fn submit(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        job();
    }
}
