//! Pending-request FIFO.

use crate::request::Request;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Mutex-guarded FIFO between the frame reader and worker jobs. `dequeue`
/// never blocks; workers drain until empty.
#[derive(Debug, Default)]
pub struct RequestQueue {
    inner: Mutex<VecDeque<Request>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        RequestQueue {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, request: Request) {
        self.inner.lock().unwrap().push_back(request);
    }

    /// Pops the oldest pending request, or `None` when nothing is pending.
    pub fn dequeue(&self) -> Option<Request> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Removes and returns everything still queued. Used at teardown; a
    /// disconnect may leave queued-but-unprocessed requests behind.
    pub fn drain(&self) -> Vec<Request> {
        self.inner.lock().unwrap().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{opcode, InHeader};

    fn request(unique: u64) -> Request {
        let header = InHeader {
            len: 40,
            opcode: opcode::GETATTR,
            unique,
            nodeid: 1,
            uid: 0,
            gid: 0,
            pid: 0,
        };
        Request::from_frame(&header, Vec::new())
    }

    #[test]
    fn test_dequeue_empty_returns_none() {
        let queue = RequestQueue::new();
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_fifo_order_preserved() {
        let queue = RequestQueue::new();
        queue.enqueue(request(1));
        queue.enqueue(request(2));
        queue.enqueue(request(3));

        assert_eq!(queue.dequeue().unwrap().unique, 1);
        assert_eq!(queue.dequeue().unwrap().unique, 2);
        assert_eq!(queue.dequeue().unwrap().unique, 3);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_len_tracks_enqueue_dequeue() {
        let queue = RequestQueue::new();
        assert!(queue.is_empty());

        queue.enqueue(request(1));
        queue.enqueue(request(2));
        assert_eq!(queue.len(), 2);

        queue.dequeue();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_empties_queue_in_order() {
        let queue = RequestQueue::new();
        queue.enqueue(request(5));
        queue.enqueue(request(6));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].unique, 5);
        assert_eq!(drained[1].unique, 6);
        assert!(queue.is_empty());
    }
}
