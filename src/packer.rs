//! Byte-to-byte packers: the compression role of an `Encoder`.
//!
//! A packer's tag is what actually gets written as the first byte of a
//! stored record/batch value (see `batch.rs` and `collection.rs`); the
//! value-encoder role (serializing an application value, out of scope per
//! the crate's own value-serialization contract — see `value.rs`) never
//! appears in the on-disk layout, so only packers participate in the
//! shared numeric tag registry.

use crate::error::Error;
use std::io::{Read, Write};

/// A named, byte-to-byte codec used to compress (or pass through) a record
/// or batch's packed payload.
pub trait Packer: Send + Sync {
    fn name(&self) -> &str;
    fn pack(&self, bytes: &[u8]) -> Vec<u8>;
    fn unpack(&self, bytes: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Identity packer: used as the default when a collection specifies none.
pub struct PlainPacker;

impl Packer for PlainPacker {
    fn name(&self) -> &str {
        "plain"
    }
    fn pack(&self, bytes: &[u8]) -> Vec<u8> {
        bytes.to_vec()
    }
    fn unpack(&self, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(bytes.to_vec())
    }
}

/// Zlib-compressing packer, useful for batch rows holding many records.
pub struct ZlibPacker;

impl Packer for ZlibPacker {
    fn name(&self) -> &str {
        "zlib"
    }
    fn pack(&self, bytes: &[u8]) -> Vec<u8> {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(bytes).expect("writing to an in-memory encoder cannot fail");
        enc.finish().expect("finishing an in-memory encoder cannot fail")
    }
    fn unpack(&self, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        use flate2::read::ZlibDecoder;
        let mut dec = ZlibDecoder::new(bytes);
        let mut out = Vec::new();
        dec.read_to_end(&mut out)
            .map_err(|_| Error::CorruptKey { bytes: bytes.to_vec() })?;
        Ok(out)
    }
}
