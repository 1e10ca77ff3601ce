//! Secondary indices over a collection.
//!
//! An index row's physical key is `store_prefix ‖ varint(index_idx) ‖
//! encode_keys([index_key_tuple, record_key_tuple])` — the index key tuple
//! followed by the owning record's key tuple, SEP-joined, with an empty
//! value. Index rows are never batched (only a collection's own records
//! are, via `batch.rs`), so index iteration does not go through the
//! batch-explode machinery `iter.rs` provides for collections — it simply
//! treats the last decoded tuple as the record key and everything before
//! it as the index key.

use crate::engine::Txn;
use crate::error::Error;
use crate::key::{decode_keys, encode_keys, KeyTuple};
use crate::value::ValueCodec;
use std::ops::Bound;
use std::sync::Arc;

/// Derives zero or more index-key tuples from a record's key and value.
/// Zero tuples means the record is simply absent from this index (e.g. an
/// index over an optional field).
pub type IndexKeyFunc<V> = Arc<dyn Fn(&KeyTuple, &V) -> Vec<KeyTuple> + Send + Sync>;

pub struct IndexSpec<V> {
    pub name: String,
    pub idx: u64,
    pub key_func: IndexKeyFunc<V>,
}

/// One matched index row: the index key, the underlying record's key, and
/// its decoded value. Stale entries (record deleted without the index
/// being kept in sync) never reach this type — `Index::items` filters them.
pub struct IndexEntry<V> {
    pub index_key: KeyTuple,
    pub record_key: KeyTuple,
    pub value: V,
}

pub struct Index<'a, V> {
    pub spec: &'a IndexSpec<V>,
    pub store_prefix: Vec<u8>,
    pub value_codec: Arc<dyn ValueCodec<V>>,
}

impl<'a, V> Index<'a, V> {
    pub fn prefix(&self) -> Vec<u8> {
        let mut p = self.store_prefix.clone();
        crate::varint::encode_uint(self.spec.idx, &mut p);
        p
    }

    /// The physical row for one `(index_key, record_key)` entry.
    pub fn entry_key(&self, index_key: &KeyTuple, record_key: &KeyTuple) -> Vec<u8> {
        encode_keys(&self.prefix(), &[index_key.clone(), record_key.clone()])
    }

    pub fn put_entry(&self, txn: &dyn Txn, index_key: &KeyTuple, record_key: &KeyTuple) -> Result<(), Error> {
        txn.put(&self.entry_key(index_key, record_key), &[])
    }

    pub fn delete_entry(&self, txn: &dyn Txn, index_key: &KeyTuple, record_key: &KeyTuple) -> Result<(), Error> {
        txn.delete(&self.entry_key(index_key, record_key))
    }

    /// Range over `(index_key, record_key)` pairs, without fetching the
    /// underlying record's value (`pairs()` in the original implementation).
    pub fn pairs(
        &self,
        txn: &dyn Txn,
        lo: Bound<KeyTuple>,
        hi: Bound<KeyTuple>,
        reverse: bool,
        max: Option<usize>,
    ) -> Result<Vec<(KeyTuple, KeyTuple)>, Error> {
        let prefix = self.prefix();
        let start = match lo {
            Bound::Unbounded => Bound::Unbounded,
            Bound::Included(t) => Bound::Included(encode_keys(&prefix, std::slice::from_ref(&t))),
            Bound::Excluded(t) => Bound::Excluded(encode_keys(&prefix, std::slice::from_ref(&t))),
        };
        let end = match hi {
            Bound::Unbounded => Bound::Unbounded,
            Bound::Included(t) => Bound::Included(encode_keys(&prefix, std::slice::from_ref(&t))),
            Bound::Excluded(t) => Bound::Excluded(encode_keys(&prefix, std::slice::from_ref(&t))),
        };

        let mut out = Vec::new();
        for item in txn.range(start, end, reverse) {
            let (phys_key, _) = item?;
            let mut tuples = match decode_keys(&prefix, &phys_key) {
                Some(t) if t.len() >= 2 => t,
                Some(_) => {
                    tracing::warn!(?phys_key, "index row missing record-key tuple, skipping");
                    continue;
                }
                None => {
                    tracing::warn!(?phys_key, "index row outside its own prefix, skipping");
                    continue;
                }
            };
            let record_key = tuples.pop().unwrap();
            // Pre-`derived_keys` collections only ever contribute one index
            // tuple per entry; concatenating any extra leading tuples here
            // would support multi-tuple index keys, which this crate does
            // not expose a way to construct, so there is always exactly one.
            let index_key = tuples.pop().unwrap_or_default();
            out.push((index_key, record_key));
            if let Some(cap) = max {
                if out.len() >= cap {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Same as `pairs`, but also fetches and decodes each matched record
    /// (`tups()`/`items()` in the original implementation, unified since
    /// Rust does not need a separate "include record key" projection).
    ///
    /// A pair whose record no longer exists is a stale entry (the index
    /// wasn't kept in sync, or needs a rebuild) — it is skipped and logged
    /// rather than surfaced as an entry with no value.
    pub fn items(
        &self,
        txn: &dyn Txn,
        lo: Bound<KeyTuple>,
        hi: Bound<KeyTuple>,
        reverse: bool,
        max: Option<usize>,
        fetch: impl Fn(&dyn Txn, &KeyTuple) -> Result<Option<V>, Error>,
    ) -> Result<Vec<IndexEntry<V>>, Error> {
        let pairs = self.pairs(txn, lo, hi, reverse, max)?;
        let mut out = Vec::with_capacity(pairs.len());
        for (index_key, record_key) in pairs {
            match fetch(txn, &record_key)? {
                Some(value) => out.push(IndexEntry { index_key, record_key, value }),
                None => {
                    tracing::warn!(?index_key, ?record_key, "stale index entry, record no longer exists; index needs a rebuild");
                }
            }
        }
        Ok(out)
    }

    /// The first matching entry only.
    pub fn find(
        &self,
        txn: &dyn Txn,
        lo: Bound<KeyTuple>,
        hi: Bound<KeyTuple>,
        fetch: impl Fn(&dyn Txn, &KeyTuple) -> Result<Option<V>, Error>,
    ) -> Result<Option<IndexEntry<V>>, Error> {
        Ok(self.items(txn, lo, hi, false, Some(1), fetch)?.into_iter().next())
    }

    pub fn has(&self, txn: &dyn Txn, index_key: KeyTuple) -> Result<bool, Error> {
        Ok(!self
            .pairs(txn, Bound::Included(index_key.clone()), Bound::Included(index_key), false, Some(1))?
            .is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemEngine;
    use crate::key::Key;
    use crate::value::BincodeCodec;

    fn make_index(engine: &MemEngine) -> Index<'static, String> {
        let spec: &'static IndexSpec<String> = Box::leak(Box::new(IndexSpec {
            name: "by_len".to_string(),
            idx: 20,
            key_func: Arc::new(|_rk, v: &String| vec![vec![Key::Int(v.len() as i64)]]),
        }));
        let idx = Index {
            spec,
            store_prefix: b"\x00".to_vec(),
            value_codec: Arc::new(BincodeCodec::<String>::new()),
        };
        idx.put_entry(engine, &vec![Key::Int(3)], &vec![Key::Int(1)]).unwrap();
        idx.put_entry(engine, &vec![Key::Int(5)], &vec![Key::Int(2)]).unwrap();
        idx
    }

    #[test]
    fn pairs_round_trip_index_and_record_keys() {
        let engine = MemEngine::new();
        let idx = make_index(&engine);
        let pairs = idx.pairs(&engine, Bound::Unbounded, Bound::Unbounded, false, None).unwrap();
        assert_eq!(pairs, vec![(vec![Key::Int(3)], vec![Key::Int(1)]), (vec![Key::Int(5)], vec![Key::Int(2)])]);
    }

    #[test]
    fn delete_entry_removes_exactly_one_row() {
        let engine = MemEngine::new();
        let idx = make_index(&engine);
        idx.delete_entry(&engine, &vec![Key::Int(3)], &vec![Key::Int(1)]).unwrap();
        let pairs = idx.pairs(&engine, Bound::Unbounded, Bound::Unbounded, false, None).unwrap();
        assert_eq!(pairs, vec![(vec![Key::Int(5)], vec![Key::Int(2)])]);
    }
}
