//! The store: the top-level handle tying an engine to the registries and
//! metadata every collection is built from.

use crate::collection::{Collection, KeyMode};
use crate::counter::CounterService;
use crate::engine::{Engine, Txn};
use crate::error::Error;
use crate::index::IndexSpec;
use crate::key::Key;
use crate::meta::MetaTable;
use crate::registry::EncoderRegistry;
use crate::value::ValueCodec;
use std::sync::Arc;

const COLLECTION_META_IDX: u64 = 0;
const COUNTERS_IDX: u64 = 1;
const ENCODERS_IDX: u64 = 2;
const COLLECTION_IDX_COUNTER: &str = "\x00collection_idx";
const COLLECTION_IDX_INIT: u64 = 10;

/// Builds a `Collection<V>` before it is bound into the store.
pub struct CollectionBuilder<V> {
    pub name: String,
    pub key_mode: KeyMode<V>,
    pub value_codec: Arc<dyn ValueCodec<V>>,
    pub packer_name: String,
    pub indices: Vec<IndexSpec<V>>,
    pub virgin_keys: bool,
}

impl<V> CollectionBuilder<V> {
    pub fn new(name: impl Into<String>, value_codec: Arc<dyn ValueCodec<V>>) -> Self {
        CollectionBuilder {
            name: name.into(),
            key_mode: KeyMode::Explicit,
            value_codec,
            packer_name: "plain".to_string(),
            indices: Vec::new(),
            virgin_keys: false,
        }
    }

    pub fn key_mode(mut self, mode: KeyMode<V>) -> Self {
        self.key_mode = mode;
        self
    }

    pub fn packer(mut self, name: impl Into<String>) -> Self {
        self.packer_name = name.into();
        self
    }

    pub fn index(mut self, spec: IndexSpec<V>) -> Self {
        self.indices.push(spec);
        self
    }

    /// Marks every key this collection assigns as guaranteed-unused at
    /// `put` time, skipping the pre-write read that would otherwise clean
    /// up a stale record (and its index entries) already at that key.
    /// Matches `derived_keys`/`virgin_keys` in the configuration surface —
    /// set this for a collection whose keys are always fresh (e.g.
    /// purely auto-incrementing), never for one that reuses keys.
    pub fn virgin_keys(mut self, virgin: bool) -> Self {
        self.virgin_keys = virgin;
        self
    }
}

pub struct Store<E: Engine> {
    pub engine: E,
    prefix: Vec<u8>,
    coll_meta: MetaTable,
    registry: Arc<EncoderRegistry>,
    counters: Arc<CounterService>,
}

impl<E: Engine> Store<E> {
    /// Opens a store rooted at `prefix`, bootstrapping the internal
    /// bookkeeping tables (collection metadata, counters, encoder
    /// registry) if they do not already exist. Re-registers the four
    /// built-in packers every call, matching `EncoderRegistry::open`'s
    /// idempotent-by-name contract.
    pub fn open(engine: E, prefix: impl Into<Vec<u8>>) -> Result<Self, Error> {
        let prefix = prefix.into();
        let counters = Arc::new(CounterService::new(&prefix, COUNTERS_IDX));
        let registry = Arc::new(EncoderRegistry::open(&engine, &prefix, ENCODERS_IDX, &counters)?);
        let coll_meta = MetaTable::new(&prefix, COLLECTION_META_IDX);
        Ok(Store { engine, prefix, coll_meta, registry, counters })
    }

    pub fn registry(&self) -> &Arc<EncoderRegistry> {
        &self.registry
    }

    pub fn counters(&self) -> &Arc<CounterService> {
        &self.counters
    }

    /// Registers a custom packer for this session. Must be called again
    /// on every `open()` if the packer is not one of the four built-ins,
    /// since a packer's behavior cannot be reconstructed from its
    /// persisted name alone.
    pub fn register_packer(&self, packer: Arc<dyn crate::packer::Packer>) -> Result<u8, Error> {
        let txn = self.engine.begin()?;
        let tag = self.registry.register(txn.as_ref(), packer, &self.counters)?;
        txn.commit()?;
        Ok(tag)
    }

    fn collection_idx(&self, name: &str) -> Result<u64, Error> {
        let txn = self.engine.begin()?;
        let key = vec![Key::Text(name.to_string())];
        if let Some(existing) = self.coll_meta.get(txn.as_ref(), &key)? {
            let idx = match existing.first() {
                Some(Key::Int(v)) => *v as u64,
                _ => return Err(Error::CorruptKey { bytes: name.as_bytes().to_vec() }),
            };
            txn.commit()?;
            return Ok(idx);
        }
        let idx = self.counters.count(txn.as_ref(), COLLECTION_IDX_COUNTER, 1, COLLECTION_IDX_INIT)?;
        self.coll_meta.put(txn.as_ref(), &key, &vec![Key::Int(idx as i64)])?;
        txn.commit()?;
        Ok(idx)
    }

    /// Opens (creating if necessary) the named collection, binding it to
    /// this store's prefix, registry, and counters.
    pub fn collection<V>(&self, builder: CollectionBuilder<V>) -> Result<Collection<V>, Error> {
        let idx = self.collection_idx(&builder.name)?;
        let packer_tag = self.registry.tag_of(&builder.packer_name)?;
        let packer = self.registry.by_tag(packer_tag)?;
        Ok(Collection {
            name: builder.name,
            store_prefix: self.prefix.clone(),
            idx,
            key_mode: builder.key_mode,
            value_codec: builder.value_codec,
            packer,
            packer_tag,
            indices: builder.indices,
            registry: self.registry.clone(),
            counters: self.counters.clone(),
            virgin_keys: builder.virgin_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemEngine;
    use crate::value::BincodeCodec;
    use std::ops::Bound;

    #[test]
    fn opening_the_same_collection_name_twice_reuses_its_idx() {
        let engine = MemEngine::new();
        let store = Store::open(engine, b"\x00".to_vec()).unwrap();
        let a = store
            .collection::<String>(CollectionBuilder::new("widgets", Arc::new(BincodeCodec::new())))
            .unwrap();
        let b = store
            .collection::<String>(CollectionBuilder::new("widgets", Arc::new(BincodeCodec::new())))
            .unwrap();
        assert_eq!(a.idx, b.idx);
    }

    #[test]
    fn different_collections_get_different_idx_values() {
        let engine = MemEngine::new();
        let store = Store::open(engine, b"\x00".to_vec()).unwrap();
        let a = store
            .collection::<String>(CollectionBuilder::new("widgets", Arc::new(BincodeCodec::new())))
            .unwrap();
        let b = store
            .collection::<String>(CollectionBuilder::new("gadgets", Arc::new(BincodeCodec::new())))
            .unwrap();
        assert_ne!(a.idx, b.idx);
    }

    #[test]
    fn put_and_get_through_a_store_opened_collection() {
        let engine = MemEngine::new();
        let store = Store::open(engine, b"\x00".to_vec()).unwrap();
        let coll = store
            .collection::<String>(
                CollectionBuilder::new("widgets", Arc::new(BincodeCodec::new()))
                    .key_mode(KeyMode::Auto { counter_name: "widgets_auto".to_string(), counter_init: 1 }),
            )
            .unwrap();
        let key = coll.put(&store.engine, None, "hi".to_string()).unwrap();
        assert_eq!(coll.get(&store.engine, &key).unwrap(), Some("hi".to_string()));
        let _ = Bound::<crate::key::KeyTuple>::Unbounded;
    }
}
