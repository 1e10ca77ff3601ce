//! Value (de)serialization.
//!
//! Value serializers are out of scope for the core codec: a single
//! `bincode`-backed default is assumed and treated as an opaque byte codec.
//! `ValueCodec` exists so a collection can plug in a different one without
//! touching `Collection<V>` itself; unlike `Packer`, it is generic over the
//! stored value type and therefore does not participate in the shared
//! numeric encoder-tag registry (its tag is never written per-record — a
//! collection's value codec is fixed configuration, looked up by the
//! collection, not by a byte on disk).

use crate::error::Error;
use crate::key::KeyTuple;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;

pub trait ValueCodec<V>: Send + Sync {
    fn name(&self) -> &str;
    fn pack(&self, value: &V) -> Result<Vec<u8>, Error>;
    fn unpack(&self, bytes: &[u8]) -> Result<V, Error>;
}

/// Default value codec: `bincode` over any `Serialize + DeserializeOwned`.
pub struct BincodeCodec<V>(PhantomData<fn() -> V>);

impl<V> BincodeCodec<V> {
    pub fn new() -> Self {
        BincodeCodec(PhantomData)
    }
}

impl<V> Default for BincodeCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Serialize + DeserializeOwned + Send + Sync> ValueCodec<V> for BincodeCodec<V> {
    fn name(&self) -> &str {
        "bincode"
    }
    fn pack(&self, value: &V) -> Result<Vec<u8>, Error> {
        Ok(bincode::serialize(value)?)
    }
    fn unpack(&self, bytes: &[u8]) -> Result<V, Error> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// A value codec for collections whose value *is* a key tuple (used by the
/// store's own bookkeeping collections): packs/unpacks via the tuple codec
/// itself rather than bincode, mirroring the original implementation's
/// `KEY_ENCODER` used as a value encoder for internal collections.
pub struct KeyTupleCodec;

impl ValueCodec<KeyTuple> for KeyTupleCodec {
    fn name(&self) -> &str {
        "key"
    }
    fn pack(&self, value: &KeyTuple) -> Result<Vec<u8>, Error> {
        Ok(crate::key::encode_keys(&[], std::slice::from_ref(value)))
    }
    fn unpack(&self, bytes: &[u8]) -> Result<KeyTuple, Error> {
        crate::key::decode_first_key(&[], bytes).ok_or_else(|| Error::CorruptKey { bytes: bytes.to_vec() })
    }
}
