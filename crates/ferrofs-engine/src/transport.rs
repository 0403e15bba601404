//! Transport integration.
//!
//! The engine never owns the device or socket; it consumes a narrow
//! [`Transport`] interface for one non-blocking read and for reply frames.
//! Write failures are transport-fatal per the error taxonomy: they are
//! logged and the frame is dropped, never surfaced as a request error.

use std::io;
use std::sync::Mutex;

pub trait Transport: Send {
    /// One non-blocking read of a whole frame into `buf`. Returns the byte
    /// count, `Ok(0)` on peer disconnect, or `WouldBlock`/`Interrupted` when
    /// nothing is ready.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes one complete reply frame.
    fn write(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// Mutex-wrapped transport shared between the reader and reply paths.
pub struct SharedTransport {
    inner: Mutex<Box<dyn Transport>>,
}

impl SharedTransport {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        SharedTransport {
            inner: Mutex::new(transport),
        }
    }

    pub fn read_once(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.lock().unwrap().try_read(buf)
    }

    /// Writes a reply frame. Errors here mean the device itself failed;
    /// they are logged and swallowed.
    pub fn send(&self, frame: &[u8]) {
        if let Err(e) = self.inner.lock().unwrap().write(frame) {
            tracing::error!("transport write failed, dropping reply frame: {}", e);
        }
    }
}
