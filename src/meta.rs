//! Internal bookkeeping collections.
//!
//! The store keeps three small collections of its own — collection
//! metadata (idx 0), named counters (idx 1), and the encoder registry
//! (idx 2) — mirroring the original implementation's `_info_coll`,
//! `_counter_coll`, and `_encoder_coll`. Each one's "value" is itself a key
//! tuple, so rather than route them through the general `Collection<V>`
//! (which exists to serve arbitrary, indexed, batchable user data) they are
//! served by this minimal raw tuple-keyed table directly over the engine.
//! This sidesteps a bootstrapping cycle: the general collection path needs
//! a resolved packer tag from the encoder registry, which is itself one of
//! these bookkeeping tables.

use crate::engine::Txn;
use crate::error::Error;
use crate::key::{decode_first_key, encode_keys, KeyTuple};
use crate::varint::encode_uint;

pub struct MetaTable {
    prefix: Vec<u8>,
}

impl MetaTable {
    pub fn new(store_prefix: &[u8], coll_idx: u64) -> Self {
        let mut prefix = store_prefix.to_vec();
        encode_uint(coll_idx, &mut prefix);
        MetaTable { prefix }
    }

    fn physical_key(&self, key: &KeyTuple) -> Vec<u8> {
        encode_keys(&self.prefix, std::slice::from_ref(key))
    }

    pub fn get(&self, txn: &dyn Txn, key: &KeyTuple) -> Result<Option<KeyTuple>, Error> {
        let pk = self.physical_key(key);
        match txn.get(&pk)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(
                decode_first_key(&[], &bytes).ok_or_else(|| Error::CorruptKey { bytes })?,
            )),
        }
    }

    pub fn put(&self, txn: &dyn Txn, key: &KeyTuple, value: &KeyTuple) -> Result<(), Error> {
        let pk = self.physical_key(key);
        let pv = encode_keys(&[], std::slice::from_ref(value));
        txn.put(&pk, &pv)
    }

    pub fn delete(&self, txn: &dyn Txn, key: &KeyTuple) -> Result<(), Error> {
        let pk = self.physical_key(key);
        txn.delete(&pk)
    }

    /// Iterates every `(key, value)` pair in the table, in physical-key
    /// order.
    pub fn iter_all(&self, txn: &dyn Txn) -> Result<Vec<(KeyTuple, KeyTuple)>, Error> {
        use std::ops::Bound;
        let start = Bound::Included(self.prefix.clone());
        let end = match crate::key::next_greater(&self.prefix) {
            Some(ng) => Bound::Excluded(ng),
            None => Bound::Unbounded,
        };
        let mut out = Vec::new();
        for item in txn.range(start, end, false) {
            let (k, v) = item?;
            let Some(key) = decode_first_key(&self.prefix, &k) else {
                continue;
            };
            let Some(value) = decode_first_key(&[], &v) else {
                tracing::warn!(?k, "meta table row has corrupt value, skipping");
                continue;
            };
            out.push((key, value));
        }
        Ok(out)
    }
}
