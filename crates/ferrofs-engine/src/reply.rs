//! Reply encoding.
//!
//! Three reply shapes exist: data (header + payload, error 0), error (header
//! only, negative errno), and no-payload success. Every reply function
//! returns a [`Replied`] token; handlers must produce exactly one token per
//! request, which is how the one-reply-per-dispatch contract is kept visible
//! in the signatures.

use crate::backend::DirEntry;
use crate::error::{EngineError, Errno, Result};
use crate::transport::SharedTransport;
use crate::wire::{self, EntryOut, OutHeader};
use bytes::BufMut;
use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};

/// Proof that exactly one reply decision was made for a request.
#[derive(Debug)]
#[must_use = "a handler must account for its reply"]
pub struct Replied(());

impl Replied {
    fn token() -> Self {
        Replied(())
    }

    /// For opcodes that send no reply frame at all (forget, batch-forget,
    /// interrupt).
    pub fn none() -> Self {
        Replied(())
    }
}

fn send(sink: &SharedTransport, unique: u64, error: i32, payload: &[u8]) -> Replied {
    let mut frame = Vec::with_capacity(wire::OUT_HEADER_LEN + payload.len());
    OutHeader {
        len: (wire::OUT_HEADER_LEN + payload.len()) as u32,
        error,
        unique,
    }
    .encode(&mut frame);
    frame.extend_from_slice(payload);
    sink.send(&frame);
    Replied::token()
}

/// Success reply carrying a payload.
pub fn data(sink: &SharedTransport, unique: u64, payload: &[u8]) -> Replied {
    send(sink, unique, 0, payload)
}

/// Success reply whose payload is built in place.
pub fn with_body(
    sink: &SharedTransport,
    unique: u64,
    build: impl FnOnce(&mut Vec<u8>),
) -> Replied {
    let mut payload = Vec::new();
    build(&mut payload);
    send(sink, unique, 0, &payload)
}

/// Header-only success.
pub fn empty(sink: &SharedTransport, unique: u64) -> Replied {
    send(sink, unique, 0, &[])
}

/// Error reply; the header carries the negative errno.
pub fn error(sink: &SharedTransport, unique: u64, errno: i32) -> Replied {
    send(sink, unique, -errno.abs(), &[])
}

/// Unimplemented-opcode reply.
pub fn nosys(sink: &SharedTransport, unique: u64) -> Replied {
    error(sink, unique, libc::ENOSYS)
}

/// getxattr/listxattr size probe reply.
pub fn xattr_size(sink: &SharedTransport, unique: u64, size: u32) -> Replied {
    with_body(sink, unique, |b| {
        b.put_u32_le(size);
        b.put_u32_le(0);
    })
}

pub const DIRENT_HDR_LEN: usize = 24;

const ALIGN: usize = std::mem::align_of::<u64>();

fn aligned(len: usize) -> usize {
    (len + ALIGN - 1) & !(ALIGN - 1)
}

/// Padded on-wire size of one plain directory entry.
pub fn dirent_len(namelen: usize) -> usize {
    aligned(DIRENT_HDR_LEN + namelen)
}

/// Padded on-wire size of one entry-with-attributes.
pub fn direntplus_len(namelen: usize) -> usize {
    aligned(wire::ENTRY_OUT_LEN + DIRENT_HDR_LEN + namelen)
}

/// Caller-sized buffer for the two binary directory-entry layouts. A push
/// that would overflow consumes nothing and reports `ENOBUFS`; enumeration
/// stops there and ships what was already packed.
#[derive(Debug)]
pub struct DirBuf {
    data: Vec<u8>,
    capacity: usize,
}

impl DirBuf {
    pub fn new(capacity: usize) -> Self {
        DirBuf {
            data: Vec::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn push_raw(&mut self, entry: &DirEntry, prefix: Option<&EntryOut>) -> std::result::Result<usize, Errno> {
        let namelen = entry.name.as_bytes().len();
        let padded = match prefix {
            Some(_) => direntplus_len(namelen),
            None => dirent_len(namelen),
        };
        if padded > self.remaining() {
            return Err(Errno::NOBUFS);
        }

        if let Some(eout) = prefix {
            eout.encode(&mut self.data);
        }
        self.data.put_u64_le(entry.ino);
        self.data.put_u64_le(entry.offset);
        self.data.put_u32_le(namelen as u32);
        self.data.put_u32_le(entry.typ);
        self.data.extend_from_slice(entry.name.as_bytes());
        let pad = padded - prefix.map_or(0, |_| wire::ENTRY_OUT_LEN) - DIRENT_HDR_LEN - namelen;
        self.data.extend(std::iter::repeat(0u8).take(pad));
        Ok(padded)
    }

    /// Packs one plain entry, returning the padded size consumed.
    pub fn push(&mut self, entry: &DirEntry) -> std::result::Result<usize, Errno> {
        self.push_raw(entry, None)
    }

    /// Packs one entry-with-attributes: a full entry-out block (fresh cache
    /// validity window plus attribute block) followed by the dirent.
    pub fn push_plus(
        &mut self,
        entry: &DirEntry,
        eout: &EntryOut,
    ) -> std::result::Result<usize, Errno> {
        self.push_raw(entry, Some(eout))
    }
}

fn decode_one_dirent(p: &mut &[u8]) -> Result<DirEntry> {
    use bytes::Buf;
    if p.len() < DIRENT_HDR_LEN {
        return Err(EngineError::Truncated {
            what: "fuse_dirent",
            got: p.len(),
            need: DIRENT_HDR_LEN,
        });
    }
    let ino = p.get_u64_le();
    let offset = p.get_u64_le();
    let namelen = p.get_u32_le() as usize;
    let typ = p.get_u32_le();
    let padded_tail = aligned(DIRENT_HDR_LEN + namelen) - DIRENT_HDR_LEN;
    if p.len() < padded_tail {
        return Err(EngineError::Truncated {
            what: "fuse_dirent name",
            got: p.len(),
            need: padded_tail,
        });
    }
    let name = OsString::from_vec(p[..namelen].to_vec());
    p.advance(padded_tail);
    Ok(DirEntry {
        ino,
        offset,
        typ,
        name,
    })
}

/// Decodes a packed plain-entry buffer back into entries.
pub fn decode_dirents(mut buf: &[u8]) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    while !buf.is_empty() {
        entries.push(decode_one_dirent(&mut buf)?);
    }
    Ok(entries)
}

/// Decodes a packed entry-with-attributes buffer.
pub fn decode_dirents_plus(mut buf: &[u8]) -> Result<Vec<(EntryOut, DirEntry)>> {
    let mut entries = Vec::new();
    while !buf.is_empty() {
        let eout = EntryOut::decode(&mut buf)?;
        let entry = decode_one_dirent(&mut buf)?;
        entries.push((eout, entry));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mem::MemTransport;
    use crate::wire::Attr;
    use std::ffi::OsStr;

    fn sink_pair() -> (MemTransport, SharedTransport) {
        let mem = MemTransport::new();
        let sink = SharedTransport::new(Box::new(mem.clone()));
        (mem, sink)
    }

    fn entry(ino: u64, offset: u64, name: &str) -> DirEntry {
        DirEntry {
            ino,
            offset,
            typ: libc::DT_REG as u32,
            name: OsStr::new(name).to_os_string(),
        }
    }

    fn entry_out(ino: u64) -> EntryOut {
        EntryOut {
            nodeid: ino,
            generation: 1,
            entry_valid: 1,
            attr_valid: 1,
            entry_valid_nsec: 0,
            attr_valid_nsec: 0,
            attr: Attr {
                ino,
                mode: 0o100644,
                nlink: 1,
                blksize: 4096,
                ..Attr::default()
            },
        }
    }

    #[test]
    fn test_error_reply_is_header_only_negative() {
        let (mem, sink) = sink_pair();
        let _ = error(&sink, 42, libc::ENOENT);

        let frames = mem.written();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), wire::OUT_HEADER_LEN);

        let mut p = frames[0].as_slice();
        let hdr = OutHeader::decode(&mut p).unwrap();
        assert_eq!(hdr.error, -libc::ENOENT);
        assert_eq!(hdr.unique, 42);
    }

    #[test]
    fn test_data_reply_echoes_identity_and_payload() {
        let (mem, sink) = sink_pair();
        let _ = data(&sink, 7, b"abc");

        let frames = mem.written();
        let mut p = frames[0].as_slice();
        let hdr = OutHeader::decode(&mut p).unwrap();
        assert_eq!(hdr.error, 0);
        assert_eq!(hdr.unique, 7);
        assert_eq!(hdr.len as usize, wire::OUT_HEADER_LEN + 3);
        assert_eq!(p, b"abc");
    }

    #[test]
    fn test_empty_reply_has_zero_error_and_no_payload() {
        let (mem, sink) = sink_pair();
        let _ = empty(&sink, 9);

        let frames = mem.written();
        let mut p = frames[0].as_slice();
        let hdr = OutHeader::decode(&mut p).unwrap();
        assert_eq!(hdr.error, 0);
        assert_eq!(hdr.len as usize, wire::OUT_HEADER_LEN);
    }

    #[test]
    fn test_nosys_reply() {
        let (mem, sink) = sink_pair();
        let _ = nosys(&sink, 1);
        let frame = mem.written()[0].clone();
        let mut s = frame.as_slice();
        assert_eq!(OutHeader::decode(&mut s).unwrap().error, -libc::ENOSYS);
    }

    #[test]
    fn test_xattr_size_reply_body() {
        let (mem, sink) = sink_pair();
        let _ = xattr_size(&sink, 3, 128);

        let frames = mem.written();
        let body = &frames[0][wire::OUT_HEADER_LEN..];
        assert_eq!(body.len(), 8);
        assert_eq!(u32::from_le_bytes(body[..4].try_into().unwrap()), 128);
    }

    #[test]
    fn test_dirent_len_is_word_aligned() {
        for namelen in 1..64 {
            assert_eq!(dirent_len(namelen) % ALIGN, 0);
            assert!(dirent_len(namelen) >= DIRENT_HDR_LEN + namelen);
        }
    }

    #[test]
    fn test_push_returns_padded_size() {
        let mut buf = DirBuf::new(4096);
        let consumed = buf.push(&entry(2, 1, "a")).unwrap();
        assert_eq!(consumed, dirent_len(1));
        assert_eq!(buf.bytes().len(), consumed);
    }

    #[test]
    fn test_pack_roundtrip_preserves_entries() {
        let mut buf = DirBuf::new(4096);
        let entries = vec![
            entry(2, 1, "alpha"),
            entry(3, 2, "b"),
            entry(4, 3, "a-much-longer-file-name.txt"),
        ];
        for e in &entries {
            buf.push(e).unwrap();
        }

        let decoded = decode_dirents(buf.bytes()).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn test_enobufs_on_first_overflowing_entry_consumes_nothing() {
        // Room for exactly two single-char entries.
        let mut buf = DirBuf::new(2 * dirent_len(1));
        assert!(buf.push(&entry(2, 1, "a")).is_ok());
        assert!(buf.push(&entry(3, 2, "b")).is_ok());

        let before = buf.bytes().len();
        assert_eq!(buf.push(&entry(4, 3, "c")).unwrap_err(), Errno::NOBUFS);
        assert_eq!(buf.bytes().len(), before);

        // What was already packed still decodes.
        assert_eq!(decode_dirents(buf.bytes()).unwrap().len(), 2);
    }

    #[test]
    fn test_enobufs_boundary_is_exact() {
        // Capacity one byte short of the padded entry.
        let mut buf = DirBuf::new(dirent_len(5) - 1);
        assert_eq!(buf.push(&entry(2, 1, "hello")).unwrap_err(), Errno::NOBUFS);

        let mut exact = DirBuf::new(dirent_len(5));
        assert!(exact.push(&entry(2, 1, "hello")).is_ok());
        assert_eq!(exact.remaining(), 0);
    }

    #[test]
    fn test_push_plus_roundtrip_with_attributes() {
        let mut buf = DirBuf::new(4096);
        let e1 = entry(5, 1, "plus");
        let e2 = entry(6, 2, "more");
        buf.push_plus(&e1, &entry_out(5)).unwrap();
        buf.push_plus(&e2, &entry_out(6)).unwrap();

        let decoded = decode_dirents_plus(buf.bytes()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].0.nodeid, 5);
        assert_eq!(decoded[0].1, e1);
        assert_eq!(decoded[1].0.attr.ino, 6);
        assert_eq!(decoded[1].1, e2);
    }

    #[test]
    fn test_push_plus_enobufs_when_plain_would_fit() {
        let namelen = 4;
        let mut buf = DirBuf::new(dirent_len(namelen));
        let e = entry(5, 1, "plus");
        assert_eq!(buf.push_plus(&e, &entry_out(5)).unwrap_err(), Errno::NOBUFS);
        assert!(buf.is_empty());
        assert!(buf.push(&e).is_ok());
    }
}
