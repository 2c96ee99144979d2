//! loose object wire format
//!
//! an object file is the zlib stream of `"<kind> <size>\0"` followed by the
//! payload. the object id is the SHA-1 of the uncompressed bytes.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};
use crate::hash::{HashingWriter, Oid};
use crate::types::ObjectKind;

/// longest header token we accept ("commit" / a u64 in decimal)
const MAX_HEADER_TOKEN: usize = 32;

/// streaming encoder for one object
///
/// writes are hashed and compressed together. the declared size is a hard
/// limit: overflowing it truncates the payload and poisons the writer.
pub struct ObjectWriter<W: Write> {
    sink: HashingWriter<ZlibEncoder<W>>,
    declared: u64,
    remaining: u64,
    overflowed: bool,
    closed: bool,
}

impl<W: Write> ObjectWriter<W> {
    /// start an object of `kind` with `size` payload bytes, default compression
    pub fn new(inner: W, kind: ObjectKind, size: u64) -> Result<Self> {
        Self::with_compression(inner, kind, size, Compression::default())
    }

    pub fn with_compression(
        inner: W,
        kind: ObjectKind,
        size: u64,
        level: Compression,
    ) -> Result<Self> {
        let mut sink = HashingWriter::new(ZlibEncoder::new(inner, level));
        write!(sink, "{} {}\0", kind, size)?;

        Ok(Self {
            sink,
            declared: size,
            remaining: size,
            overflowed: false,
            closed: false,
        })
    }

    /// write payload bytes
    ///
    /// returns the number of bytes accepted, which is all of `buf` unless the
    /// declared size is exceeded.
    pub fn write_payload(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed || self.overflowed {
            return Err(Error::Closed);
        }

        if buf.len() as u64 > self.remaining {
            let n = self.remaining as usize;
            self.sink.write_all(&buf[..n])?;
            self.remaining = 0;
            self.overflowed = true;
            return Err(Error::SizeExceeded {
                declared: self.declared,
            });
        }

        self.sink.write_all(buf)?;
        self.remaining -= buf.len() as u64;
        Ok(buf.len())
    }

    /// payload bytes still expected
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// object id of everything written so far
    pub fn oid(&self) -> Oid {
        self.sink.oid()
    }

    /// flush the compressed stream; later writes fail with `Closed`
    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.sink.get_mut().try_finish()?;
            self.closed = true;
        }
        Ok(())
    }

    /// close and hand back the inner writer with the object id
    pub fn finish(mut self) -> Result<(W, Oid)> {
        self.close()?;
        let oid = self.oid();
        let inner = self.sink.into_inner().finish()?;
        Ok((inner, oid))
    }
}

impl<W: Write> Write for ObjectWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_payload(buf).map_err(|e| match e {
            Error::Stream(e) => e,
            other => io::Error::other(other),
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// encode a whole payload in memory, returning compressed bytes and the id
pub fn encode(kind: ObjectKind, payload: &[u8], level: Compression) -> Result<(Vec<u8>, Oid)> {
    let mut w = ObjectWriter::with_compression(
        Vec::with_capacity(payload.len() / 2 + 32),
        kind,
        payload.len() as u64,
        level,
    )?;
    w.write_payload(payload)?;
    w.finish()
}

/// decompressed payload of a decoded object
pub struct Payload<R> {
    reader: ZlibDecoder<R>,
    size: u64,
}

impl<R: Read> Payload<R> {
    /// size declared in the object header
    pub fn size(&self) -> u64 {
        self.size
    }

    /// read the rest of the payload into memory
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size.min(1 << 20) as usize);
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl<R: Read> Read for Payload<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

/// a decoded object, tagged by kind
pub enum Object<R> {
    Commit(Payload<R>),
    Tree(Payload<R>),
    Blob(Payload<R>),
}

impl<R: Read> Object<R> {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Commit(_) => ObjectKind::Commit,
            Object::Tree(_) => ObjectKind::Tree,
            Object::Blob(_) => ObjectKind::Blob,
        }
    }

    /// size declared in the object header
    pub fn size(&self) -> u64 {
        self.payload().size()
    }

    pub fn payload(&self) -> &Payload<R> {
        match self {
            Object::Commit(p) | Object::Tree(p) | Object::Blob(p) => p,
        }
    }

    pub fn into_payload(self) -> Payload<R> {
        match self {
            Object::Commit(p) | Object::Tree(p) | Object::Blob(p) => p,
        }
    }
}

/// decode an object stream: parse the header and expose the payload
pub fn decode<R: Read>(inner: R) -> Result<Object<R>> {
    let mut reader = ZlibDecoder::new(inner);

    let raw_kind = read_until(&mut reader, b' ')?;
    let kind_str = std::str::from_utf8(&raw_kind)
        .map_err(|_| Error::InvalidObjectKind(String::from_utf8_lossy(&raw_kind).into()))?;
    let kind: ObjectKind = kind_str.parse()?;

    let raw_size = read_until(&mut reader, 0)?;
    let size = std::str::from_utf8(&raw_size)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| {
            Error::MalformedHeader(format!(
                "invalid size {:?}",
                String::from_utf8_lossy(&raw_size)
            ))
        })?;

    let payload = Payload { reader, size };
    match kind {
        ObjectKind::Commit => Ok(Object::Commit(payload)),
        ObjectKind::Tree => Ok(Object::Tree(payload)),
        ObjectKind::Blob => Ok(Object::Blob(payload)),
        ObjectKind::Tag => Err(Error::MalformedHeader(
            "tag objects are not supported".to_string(),
        )),
    }
}

/// read bytes up to (not including) `delim`
fn read_until<R: Read>(r: &mut R, delim: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(16);
    let mut byte = [0u8; 1];
    loop {
        match r.read(&mut byte) {
            Ok(0) => {
                return Err(Error::MalformedHeader(
                    "unexpected end of object header".to_string(),
                ))
            }
            Ok(_) if byte[0] == delim => return Ok(out),
            Ok(_) => {
                if out.len() >= MAX_HEADER_TOKEN {
                    return Err(Error::MalformedHeader("header token too long".to_string()));
                }
                out.push(byte[0]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Stream(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CONTENT: &[u8] = b"This is a test\n";

    fn compress_raw(raw: &[u8]) -> Vec<u8> {
        let mut z = ZlibEncoder::new(Vec::new(), Compression::default());
        z.write_all(raw).unwrap();
        z.finish().unwrap()
    }

    fn check_decoded(bytes: &[u8]) {
        let obj = decode(bytes).unwrap();
        assert_eq!(obj.kind(), ObjectKind::Blob);
        assert_eq!(obj.size(), 15);
        assert_eq!(obj.into_payload().into_bytes().unwrap(), TEST_CONTENT);
    }

    #[test]
    fn test_write_known_blob() {
        let mut w = ObjectWriter::new(Vec::new(), ObjectKind::Blob, 15).unwrap();
        assert_eq!(w.write_payload(TEST_CONTENT).unwrap(), 15);
        assert_eq!(w.remaining(), 0);

        let (bytes, oid) = w.finish().unwrap();
        assert_eq!(oid.to_hex(), "0527e6bd2d76b45e2933183f1b506c7ac49f5872");
        check_decoded(&bytes);
    }

    #[test]
    fn test_read_original_fixture() {
        let input = hex::decode("78014bcac94f5230346508c9c82c5600a2448592d4e2122e0055ab0725").unwrap();
        check_decoded(&input);
    }

    #[test]
    fn test_chunked_writes_match() {
        let (_, whole) = encode(ObjectKind::Blob, TEST_CONTENT, Compression::default()).unwrap();

        let mut w = ObjectWriter::new(Vec::new(), ObjectKind::Blob, 15).unwrap();
        w.write_payload(b"This ").unwrap();
        w.write_payload(b"is a ").unwrap();
        w.write_payload(b"test\n").unwrap();
        let (_, chunked) = w.finish().unwrap();

        assert_eq!(whole, chunked);
    }

    #[test]
    fn test_identity_independent_of_compression() {
        let (fast, a) = encode(ObjectKind::Tree, &[7u8; 4096], Compression::fast()).unwrap();
        let (best, b) = encode(ObjectKind::Tree, &[7u8; 4096], Compression::best()).unwrap();
        assert_eq!(a, b);
        assert_eq!(decode(&fast[..]).unwrap().into_payload().into_bytes().unwrap(), vec![7u8; 4096]);
        assert_eq!(decode(&best[..]).unwrap().kind(), ObjectKind::Tree);
    }

    #[test]
    fn test_different_payloads_different_ids() {
        let (_, a) = encode(ObjectKind::Blob, b"one", Compression::default()).unwrap();
        let (_, b) = encode(ObjectKind::Blob, b"two", Compression::default()).unwrap();
        let (_, c) = encode(ObjectKind::Commit, b"one", Compression::default()).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_payload() {
        let (bytes, oid) = encode(ObjectKind::Blob, b"", Compression::default()).unwrap();
        // well-known empty blob id
        assert_eq!(oid.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
        let obj = decode(&bytes[..]).unwrap();
        assert_eq!(obj.size(), 0);
        assert!(obj.into_payload().into_bytes().unwrap().is_empty());
    }

    #[test]
    fn test_size_exceeded_truncates() {
        let mut w = ObjectWriter::new(Vec::new(), ObjectKind::Blob, 4).unwrap();
        let result = w.write_payload(b"toolong");
        assert!(matches!(result, Err(Error::SizeExceeded { declared: 4 })));

        // writer is poisoned after overflowing
        assert!(matches!(w.write_payload(b"x"), Err(Error::Closed)));

        let (bytes, oid) = w.finish().unwrap();
        let (_, expected) = encode(ObjectKind::Blob, b"tool", Compression::default()).unwrap();
        assert_eq!(oid, expected);
        assert_eq!(decode(&bytes[..]).unwrap().into_payload().into_bytes().unwrap(), b"tool");
    }

    #[test]
    fn test_write_after_close() {
        let mut w = ObjectWriter::new(Vec::new(), ObjectKind::Blob, 15).unwrap();
        w.write_payload(TEST_CONTENT).unwrap();
        w.close().unwrap();
        assert!(matches!(w.write_payload(b""), Err(Error::Closed)));
        // close is idempotent
        w.close().unwrap();
    }

    #[test]
    fn test_io_write_adapter() {
        let mut w = ObjectWriter::new(Vec::new(), ObjectKind::Blob, 15).unwrap();
        std::io::copy(&mut &TEST_CONTENT[..], &mut w).unwrap();
        assert_eq!(w.oid().to_hex(), "0527e6bd2d76b45e2933183f1b506c7ac49f5872");

        let err = w.write(b"more").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_decode_unknown_kind() {
        let bytes = compress_raw(b"blub 3\0abc");
        assert!(matches!(decode(&bytes[..]), Err(Error::InvalidObjectKind(_))));
    }

    #[test]
    fn test_decode_rejects_tag() {
        let bytes = compress_raw(b"tag 3\0abc");
        assert!(matches!(decode(&bytes[..]), Err(Error::MalformedHeader(_))));
    }

    #[test]
    fn test_decode_bad_size() {
        let bytes = compress_raw(b"blob 1x\0abc");
        assert!(matches!(decode(&bytes[..]), Err(Error::MalformedHeader(_))));
    }

    #[test]
    fn test_decode_truncated_header() {
        let bytes = compress_raw(b"blob 12");
        assert!(matches!(decode(&bytes[..]), Err(Error::MalformedHeader(_))));
    }

    #[test]
    fn test_decode_not_zlib() {
        let result = decode(&b"definitely not zlib"[..]);
        assert!(result.is_err());
    }
}
