//! Unsolicited kernel notifications.
//!
//! Notify frames reuse the reply header with identity 0 and a positive
//! notification code in the error field. The engine exposes deletion and
//! change notification; backends call these when an inode or directory entry
//! changes underneath the kernel's cache.

use crate::transport::SharedTransport;
use crate::wire::{OutHeader, OUT_HEADER_LEN};
use bytes::BufMut;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

pub const NOTIFY_INVAL_INODE: i32 = 2;
pub const NOTIFY_INVAL_ENTRY: i32 = 3;
pub const NOTIFY_DELETE: i32 = 6;

fn send(sink: &SharedTransport, code: i32, body: &[u8]) {
    let mut frame = Vec::with_capacity(OUT_HEADER_LEN + body.len());
    OutHeader {
        len: (OUT_HEADER_LEN + body.len()) as u32,
        error: code,
        unique: 0,
    }
    .encode(&mut frame);
    frame.extend_from_slice(body);
    sink.send(&frame);
}

/// Tells the kernel an inode's data/attributes changed externally.
pub fn notify_fsnotify(sink: &SharedTransport, ino: u64) {
    let mut body = Vec::with_capacity(24);
    body.put_u64_le(ino);
    body.put_i64_le(0); // offset
    body.put_i64_le(0); // length: whole file
    send(sink, NOTIFY_INVAL_INODE, &body);
}

/// Tells the kernel a directory entry changed externally.
pub fn notify_fsnotify_child(sink: &SharedTransport, parent: u64, name: &OsStr) {
    let bytes = name.as_bytes();
    let mut body = Vec::with_capacity(16 + bytes.len() + 1);
    body.put_u64_le(parent);
    body.put_u32_le(bytes.len() as u32);
    body.put_u32_le(0); // padding
    body.extend_from_slice(bytes);
    body.push(0);
    send(sink, NOTIFY_INVAL_ENTRY, &body);
}

/// Tells the kernel an entry was deleted, identifying the deleted child.
pub fn notify_delete(sink: &SharedTransport, parent: u64, child: u64, name: &OsStr) {
    let bytes = name.as_bytes();
    let mut body = Vec::with_capacity(24 + bytes.len() + 1);
    body.put_u64_le(parent);
    body.put_u64_le(child);
    body.put_u32_le(bytes.len() as u32);
    body.put_u32_le(0); // padding
    body.extend_from_slice(bytes);
    body.push(0);
    send(sink, NOTIFY_DELETE, &body);
}
