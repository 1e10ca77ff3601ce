//! Collections: the primary unit of storage. A `Collection<V>` owns a
//! physical key prefix, a key-assignment mode, a value codec, a default
//! packer, and zero or more secondary indices.

use crate::batch::{batch_physical_key, encode_batch_value, explode_batch_row, split_batch};
use crate::counter::CounterService;
use crate::engine::Txn;
use crate::error::Error;
use crate::index::{Index, IndexSpec};
use crate::iter::{bound_to_bytes, range, tuple_in_bounds, RangeParams};
use crate::key::{decode_keys, encode_keys, Key, KeyTuple};
use crate::packer::Packer;
use crate::record::Record;
use crate::registry::EncoderRegistry;
use crate::value::ValueCodec;
use crate::varint::{decode_uint, encode_uint};
use std::ops::Bound;
use std::sync::Arc;

/// How a collection assigns a key to a newly-put value, mirroring the
/// three modes the original implementation's `Collection.__init__` exposes
/// through `key_func`/`txn_key_func`/plain auto-increment.
pub enum KeyMode<V> {
    /// The caller always supplies the key explicitly at `put` time.
    Explicit,
    /// The key is a pure function of the value (`key_func` in the
    /// original), computed without touching the store.
    Derived(Arc<dyn Fn(&V) -> KeyTuple + Send + Sync>),
    /// The key depends on a transactionally-assigned counter value in
    /// addition to the value itself (`txn_key_func`).
    Transactional {
        key_func: Arc<dyn Fn(&V, u64) -> KeyTuple + Send + Sync>,
        counter_name: String,
        counter_init: u64,
    },
    /// The key is simply the next value of a named counter, wrapped in a
    /// 1-tuple.
    Auto { counter_name: String, counter_init: u64 },
}

pub struct Collection<V> {
    pub name: String,
    pub(crate) store_prefix: Vec<u8>,
    pub(crate) idx: u64,
    pub(crate) key_mode: KeyMode<V>,
    pub(crate) value_codec: Arc<dyn ValueCodec<V>>,
    pub(crate) packer: Arc<dyn Packer>,
    pub(crate) packer_tag: u8,
    pub(crate) indices: Vec<IndexSpec<V>>,
    pub(crate) registry: Arc<EncoderRegistry>,
    pub(crate) counters: Arc<CounterService>,
    /// Skips the pre-write `get` of whatever record (if any) already
    /// occupies the target key. Set when the caller can guarantee the key
    /// is unused — a plain insert into an auto-keyed collection, say —
    /// trading the stale-record-and-index cleanup in step 4 of the put
    /// algorithm for one fewer read per write.
    pub(crate) virgin_keys: bool,
}

impl<V> Collection<V> {
    pub fn prefix(&self) -> Vec<u8> {
        let mut p = self.store_prefix.clone();
        encode_uint(self.idx, &mut p);
        p
    }

    fn resolve_packer(&self, tag: u8) -> Result<Arc<dyn Packer>, Error> {
        self.registry.by_tag(tag)
    }

    fn resolve_key(&self, txn: &dyn Txn, key: Option<KeyTuple>, value: &V) -> Result<KeyTuple, Error> {
        if let Some(k) = key {
            return Ok(k);
        }
        match &self.key_mode {
            KeyMode::Explicit => Err(Error::UnsupportedKeyElement),
            KeyMode::Derived(f) => Ok(f(value)),
            KeyMode::Transactional { key_func, counter_name, counter_init } => {
                let n = self.counters.count(txn, counter_name, 1, *counter_init)?;
                Ok(key_func(value, n))
            }
            KeyMode::Auto { counter_name, counter_init } => {
                let n = self.counters.count(txn, counter_name, 1, *counter_init)?;
                Ok(vec![Key::Int(n as i64)])
            }
        }
    }

    /// Locates the physical row covering `key`, which may be a standalone
    /// row or a batch row spanning several logical keys. If it is a batch
    /// row, splits it in place (per the batch-split algorithm) before
    /// returning, so callers always see a standalone row going forward.
    fn locate_and_unbatch(&self, txn: &dyn Txn, key: &KeyTuple) -> Result<Option<Vec<u8>>, Error> {
        let prefix = self.prefix();
        let standalone_key = encode_keys(&prefix, std::slice::from_ref(key));
        if let Some(v) = txn.get(&standalone_key)? {
            let (tag, n) = decode_uint(&v)?;
            let packer = self.resolve_packer(tag as u8)?;
            return Ok(Some(packer.unpack(&v[n..])?));
        }

        // Not a standalone row: scan forward for a batch row whose maximum
        // member is >= our key and that actually contains our key.
        let candidate = txn.range(Bound::Included(standalone_key), Bound::Unbounded, false).next();
        let (phys_key, phys_value) = match candidate {
            Some(item) => item?,
            None => return Ok(None),
        };
        let Some(tuples) = decode_keys(&prefix, &phys_key) else {
            return Ok(None);
        };
        if tuples.len() < 2 || !tuples.contains(key) {
            return Ok(None);
        }

        let resolve = |tag: u8| self.resolve_packer(tag);
        split_batch(txn, &prefix, &phys_key, &phys_value, Some(key), &resolve, self.resolve_tag_from_batch(&phys_value)?)
    }

    fn resolve_tag_from_batch(&self, phys_value: &[u8]) -> Result<u8, Error> {
        let (n, mut i) = decode_uint(phys_value)?;
        for _ in 0..n {
            let (_, consumed) = decode_uint(&phys_value[i..])?;
            i += consumed;
        }
        phys_value.get(i).copied().ok_or(Error::Truncated)
    }

    fn read_value(&self, txn: &dyn Txn, key: &KeyTuple) -> Result<Option<V>, Error> {
        match self.locate_and_unbatch(txn, key)? {
            Some(bytes) => Ok(Some(self.value_codec.unpack(&bytes)?)),
            None => Ok(None),
        }
    }

    fn update_indices(&self, txn: &dyn Txn, key: &KeyTuple, old: Option<&V>, new: Option<&V>) -> Result<(), Error> {
        for spec in &self.indices {
            let index = Index { spec, store_prefix: self.store_prefix.clone(), value_codec: self.value_codec.clone() };
            let old_tuples: Vec<KeyTuple> = old.map(|v| (spec.key_func)(key, v)).unwrap_or_default();
            let new_tuples: Vec<KeyTuple> = new.map(|v| (spec.key_func)(key, v)).unwrap_or_default();

            let old_encoded: Vec<Vec<u8>> = old_tuples.iter().map(|t| encode_keys(&[], std::slice::from_ref(t))).collect();
            let new_encoded: Vec<Vec<u8>> = new_tuples.iter().map(|t| encode_keys(&[], std::slice::from_ref(t))).collect();

            for (tuple, enc) in old_tuples.iter().zip(&old_encoded) {
                if !new_encoded.contains(enc) {
                    index.delete_entry(txn, tuple, key)?;
                }
            }
            for (tuple, enc) in new_tuples.iter().zip(&new_encoded) {
                if !old_encoded.contains(enc) {
                    index.put_entry(txn, tuple, key)?;
                }
            }
        }
        Ok(())
    }

    /// Whether this collection's keys are computed from the value rather
    /// than supplied by the caller (`KeyMode::Derived`) — the mode under
    /// which `put_record`/`delete_value` are meaningful.
    pub fn derived_keys(&self) -> bool {
        matches!(self.key_mode, KeyMode::Derived(_))
    }

    /// Writes `value` under `key` (resolved per the collection's key
    /// mode if `key` is `None`), maintaining every secondary index.
    /// Returns the key actually used.
    ///
    /// If the collection has indices and `virgin_keys` isn't set, this
    /// first reads whatever record already occupies the target key so its
    /// stale index entries get cleaned up rather than left to shadow the
    /// new ones — step 4 of the put algorithm. `put_virgin` skips that read
    /// outright for a caller that already knows the key is unused.
    pub fn put(&self, txn: &dyn Txn, key: Option<KeyTuple>, value: V) -> Result<KeyTuple, Error> {
        self.put_impl(txn, key, value, self.virgin_keys)
    }

    /// Like `put`, but never reads the target key's existing record first.
    /// Only correct when the caller can guarantee the key was unused.
    pub fn put_virgin(&self, txn: &dyn Txn, key: Option<KeyTuple>, value: V) -> Result<KeyTuple, Error> {
        self.put_impl(txn, key, value, true)
    }

    fn put_impl(&self, txn: &dyn Txn, key: Option<KeyTuple>, value: V, virgin: bool) -> Result<KeyTuple, Error> {
        let key = self.resolve_key(txn, key, &value)?;
        let old = if virgin { None } else { self.read_value(txn, &key)? };
        self.update_indices(txn, &key, old.as_ref(), Some(&value))?;

        let payload = self.value_codec.pack(&value)?;
        let standalone_key = encode_keys(&self.prefix(), std::slice::from_ref(&key));
        let mut phys_value = Vec::new();
        encode_uint(self.packer_tag as u64, &mut phys_value);
        phys_value.extend(self.packer.pack(&payload));
        txn.put(&standalone_key, &phys_value)?;
        Ok(key)
    }

    /// Fetches the record at `key`, stamped with that key so a later
    /// `put_record` call can detect whether a derived key moved.
    pub fn get_record(&self, txn: &dyn Txn, key: &KeyTuple) -> Result<Option<Record<V>>, Error> {
        Ok(self.read_value(txn, key)?.map(|value| Record::new(key.clone(), value)))
    }

    /// Re-puts a record previously obtained from this collection
    /// (`get_record`/a prior `put_record`), re-deriving its key from the
    /// (possibly mutated) value. If the newly-derived key differs from
    /// `rec.key`, the old physical row and its index entries are deleted
    /// first — step 3 of the put algorithm, only reachable when a prior
    /// key is actually known. Only meaningful when `derived_keys()`.
    pub fn put_record(&self, txn: &dyn Txn, rec: &Record<V>) -> Result<KeyTuple, Error>
    where
        V: Clone,
    {
        let new_key = self.resolve_key(txn, None, &rec.value)?;
        if new_key != rec.key {
            self.delete(txn, &rec.key)?;
        }
        self.put(txn, Some(new_key), rec.value.clone())
    }

    /// Deletes the record whose key is derived from `value` via the
    /// collection's key function (`delete_value` in the original
    /// implementation). Valid only when `derived_keys()`.
    pub fn delete_value(&self, txn: &dyn Txn, value: &V) -> Result<(), Error> {
        match &self.key_mode {
            KeyMode::Derived(f) => self.delete(txn, &f(value)),
            _ => Err(Error::UnsupportedKeyElement),
        }
    }

    pub fn puts(&self, txn: &dyn Txn, values: impl IntoIterator<Item = V>) -> Result<Vec<KeyTuple>, Error> {
        values.into_iter().map(|v| self.put(txn, None, v)).collect()
    }

    pub fn putitems(&self, txn: &dyn Txn, items: impl IntoIterator<Item = (KeyTuple, V)>) -> Result<(), Error> {
        for (k, v) in items {
            self.put(txn, Some(k), v)?;
        }
        Ok(())
    }

    pub fn get(&self, txn: &dyn Txn, key: &KeyTuple) -> Result<Option<V>, Error> {
        self.read_value(txn, key)
    }

    pub fn has(&self, txn: &dyn Txn, key: &KeyTuple) -> Result<bool, Error> {
        Ok(self.read_value(txn, key)?.is_some())
    }

    /// Deletes the record at `key`, removing every stale index entry. A
    /// no-op if the key does not exist.
    pub fn delete(&self, txn: &dyn Txn, key: &KeyTuple) -> Result<(), Error> {
        let old = self.read_value(txn, key)?;
        if old.is_none() {
            return Ok(());
        }
        self.update_indices(txn, key, old.as_ref(), None)?;
        let standalone_key = encode_keys(&self.prefix(), std::slice::from_ref(key));
        txn.delete(&standalone_key)
    }

    pub fn deletes(&self, txn: &dyn Txn, keys: impl IntoIterator<Item = KeyTuple>) -> Result<(), Error> {
        for k in keys {
            self.delete(txn, &k)?;
        }
        Ok(())
    }

    /// Deletes every record whose value equals `value` under the given
    /// key set (a thin convenience the original implementation also
    /// provides as `delete_values`).
    pub fn delete_values(&self, txn: &dyn Txn, keys: impl IntoIterator<Item = KeyTuple>, value: &V) -> Result<(), Error>
    where
        V: PartialEq,
    {
        for k in keys {
            if self.get(txn, &k)?.as_ref() == Some(value) {
                self.delete(txn, &k)?;
            }
        }
        Ok(())
    }

    fn logical_rows(&self, txn: &dyn Txn, lo: Bound<KeyTuple>, hi: Bound<KeyTuple>, reverse: bool, max: Option<usize>) -> Result<Vec<(KeyTuple, V)>, Error> {
        let prefix = self.prefix();
        let params = RangeParams { lo, hi, reverse, max, max_phys: None };
        let resolve = |tag: u8| self.resolve_packer(tag);
        range(txn, &prefix, &params, &resolve)
            .map(|r| r.and_then(|(k, payload)| Ok((k, self.value_codec.unpack(&payload)?))))
            .collect()
    }

    pub fn items(&self, txn: &dyn Txn, lo: Bound<KeyTuple>, hi: Bound<KeyTuple>, reverse: bool, max: Option<usize>) -> Result<Vec<(KeyTuple, V)>, Error> {
        self.logical_rows(txn, lo, hi, reverse, max)
    }

    pub fn keys(&self, txn: &dyn Txn, lo: Bound<KeyTuple>, hi: Bound<KeyTuple>, reverse: bool, max: Option<usize>) -> Result<Vec<KeyTuple>, Error> {
        Ok(self.logical_rows(txn, lo, hi, reverse, max)?.into_iter().map(|(k, _)| k).collect())
    }

    pub fn values(&self, txn: &dyn Txn, lo: Bound<KeyTuple>, hi: Bound<KeyTuple>, reverse: bool, max: Option<usize>) -> Result<Vec<V>, Error> {
        Ok(self.logical_rows(txn, lo, hi, reverse, max)?.into_iter().map(|(_, v)| v).collect())
    }

    pub fn find(&self, txn: &dyn Txn, lo: Bound<KeyTuple>, hi: Bound<KeyTuple>, reverse: bool) -> Result<Option<(KeyTuple, V)>, Error> {
        Ok(self.logical_rows(txn, lo, hi, reverse, Some(1))?.into_iter().next())
    }

    pub fn index(&self, name: &str) -> Option<Index<'_, V>> {
        self.indices.iter().find(|s| s.name == name).map(|spec| Index {
            spec,
            store_prefix: self.store_prefix.clone(),
            value_codec: self.value_codec.clone(),
        })
    }

    /// Writes `pending` (already in ascending key order) as one physical
    /// row: a batch row if it has 2+ members, or the lone member's
    /// standalone row re-written as-is if it has exactly 1 (its previous
    /// standalone row was already deleted by the caller before accumulating
    /// into `pending`). A no-op for an empty `pending`. Returns whether a
    /// group was actually flushed (false only for an empty `pending`),
    /// which is what `batch()`'s return value counts — one flushed group
    /// per grouper bucket, even a singleton one left standalone.
    fn flush_batch_group(&self, txn: &dyn Txn, prefix: &[u8], packer_tag: u8, packer: &dyn Packer, pending: &[(KeyTuple, Vec<u8>)]) -> Result<bool, Error> {
        match pending.len() {
            0 => Ok(false),
            1 => {
                let (key, payload) = &pending[0];
                let standalone_key = encode_keys(prefix, std::slice::from_ref(key));
                let mut phys_value = Vec::new();
                encode_uint(packer_tag as u64, &mut phys_value);
                phys_value.extend(packer.pack(payload));
                txn.put(&standalone_key, &phys_value)?;
                Ok(true)
            }
            _ => {
                let keys: Vec<KeyTuple> = pending.iter().map(|(k, _)| k.clone()).collect();
                let payloads: Vec<Vec<u8>> = pending.iter().map(|(_, p)| p.clone()).collect();
                let phys_key = batch_physical_key(prefix, &keys);
                let phys_value = encode_batch_value(packer_tag, packer, &payloads);
                txn.put(&phys_key, &phys_value)?;
                Ok(true)
            }
        }
    }

    /// Builds compressed batch rows over `[params.lo, params.hi]`, the
    /// collection-facing entry point to the batch layer. Scans the range,
    /// accumulating pending members and flushing a batch whenever:
    /// `params.max_recs` is reached; re-packing the pending run plus the
    /// next item would exceed `params.max_bytes` (the triggering item is
    /// held back to start the next group; an item that alone exceeds
    /// `max_bytes` when packed is skipped, logged, and left as its own
    /// standalone row); `params.grouper` returns a value different from the
    /// previous member's; or `params.preserve` is set and the next physical
    /// row is itself already a batch (flushed, then passed through
    /// untouched). When `params.preserve` is unset, pre-existing batch rows
    /// are exploded and their members feed the new grouping instead.
    ///
    /// Every flush deletes the constituent individual rows (already gone by
    /// the time of the flush — they're deleted as each member is pulled
    /// into `pending`) and writes the new batch row, all within `txn`.
    /// Returns the number of groups flushed — one per grouper bucket (or
    /// per `max_recs`/`max_bytes` threshold crossed); a bucket that ends up
    /// with exactly one member is left as a standalone row but still
    /// counts as a flushed group.
    pub fn batch(&self, txn: &dyn Txn, params: &BatchParams<V>) -> Result<usize, Error>
    where
        V: Clone,
    {
        let prefix = self.prefix();
        let (packer_tag, packer): (u8, Arc<dyn Packer>) = match &params.packer_name {
            Some(name) => {
                let tag = self.registry.tag_of(name)?;
                (tag, self.registry.by_tag(tag)?)
            }
            None => (self.packer_tag, self.packer.clone()),
        };

        let start = bound_to_bytes(&prefix, &params.lo);
        let end = bound_to_bytes(&prefix, &params.hi);

        // A batch build reads and rewrites the very range it scans, so
        // (unlike the shared read-only iterator in `iter.rs`) the physical
        // rows have to be snapshotted before any of them are touched.
        let phys_rows: Vec<(Vec<u8>, Vec<u8>)> = txn.range(start, end, false).collect::<Result<_, _>>()?;

        let mut batches_written = 0usize;
        let mut phys_steps = 0usize;
        let mut pending: Vec<(KeyTuple, Vec<u8>)> = Vec::new();
        let mut pending_group: Option<Vec<u8>> = None;

        let push_member = |txn: &dyn Txn,
                                pending: &mut Vec<(KeyTuple, Vec<u8>)>,
                                pending_group: &mut Option<Vec<u8>>,
                                batches_written: &mut usize,
                                key: KeyTuple,
                                payload: Vec<u8>|
         -> Result<(), Error> {
            if !tuple_in_bounds(&prefix, &key, &params.lo, &params.hi) {
                return Ok(());
            }

            if let Some(grouper) = &params.grouper {
                let value: V = self.value_codec.unpack(&payload)?;
                let group = grouper(&value);
                if pending_group.as_ref().is_some_and(|g| g != &group) {
                    if self.flush_batch_group(txn, &prefix, packer_tag, packer.as_ref(), pending)? {
                        *batches_written += 1;
                    }
                    pending.clear();
                }
                *pending_group = Some(group);
            }

            if let Some(max_bytes) = params.max_bytes {
                let mut candidate: Vec<Vec<u8>> = pending.iter().map(|(_, p)| p.clone()).collect();
                candidate.push(payload.clone());
                let concat: Vec<u8> = candidate.iter().flat_map(|p| p.iter().cloned()).collect();
                if packer.pack(&concat).len() > max_bytes {
                    if !pending.is_empty() {
                        if self.flush_batch_group(txn, &prefix, packer_tag, packer.as_ref(), pending)? {
                            *batches_written += 1;
                        }
                        pending.clear();
                        *pending_group = None;
                    }
                    // The physical row this member came from was already
                    // deleted by the caller before `push_member` ran, so an
                    // item that alone exceeds `max_bytes` still has to be
                    // written back somewhere — it is flushed on its own
                    // rather than silently dropped.
                    if packer.pack(&payload).len() > max_bytes {
                        tracing::warn!(?key, "record individually exceeds max_bytes when packed, leaving as its own standalone row");
                        if self.flush_batch_group(txn, &prefix, packer_tag, packer.as_ref(), &[(key, payload)])? {
                            *batches_written += 1;
                        }
                        return Ok(());
                    }
                }
            }

            pending.push((key, payload));
            if let Some(max_recs) = params.max_recs {
                if pending.len() >= max_recs {
                    if self.flush_batch_group(txn, &prefix, packer_tag, packer.as_ref(), pending)? {
                        *batches_written += 1;
                    }
                    pending.clear();
                    *pending_group = None;
                }
            }
            Ok(())
        };

        for (phys_key, phys_value) in phys_rows {
            if let Some(cap) = params.max_phys {
                if phys_steps >= cap {
                    break;
                }
            }
            phys_steps += 1;

            let tuples = match decode_keys(&prefix, &phys_key) {
                Some(t) => t,
                None => continue,
            };

            if tuples.len() > 1 {
                if params.preserve {
                    if self.flush_batch_group(txn, &prefix, packer_tag, packer.as_ref(), &pending)? {
                        batches_written += 1;
                    }
                    pending.clear();
                    pending_group = None;
                    continue;
                }
                let resolve = |tag: u8| self.resolve_packer(tag);
                let members = explode_batch_row(&prefix, &phys_key, &phys_value, &resolve)?;
                txn.delete(&phys_key)?;
                for (key, payload) in members {
                    push_member(txn, &mut pending, &mut pending_group, &mut batches_written, key, payload)?;
                }
            } else {
                let key = tuples.into_iter().next().unwrap();
                let (tag, n) = decode_uint(&phys_value)?;
                let src_packer = self.resolve_packer(tag as u8)?;
                let payload = src_packer.unpack(&phys_value[n..])?;
                txn.delete(&encode_keys(&prefix, std::slice::from_ref(&key)))?;
                push_member(txn, &mut pending, &mut pending_group, &mut batches_written, key, payload)?;
            }
        }

        if self.flush_batch_group(txn, &prefix, packer_tag, packer.as_ref(), &pending)? {
            batches_written += 1;
        }
        Ok(batches_written)
    }
}

/// Parameters for `Collection::batch`, mirroring `batch(lo, hi, max_recs,
/// max_bytes, preserve, packer, grouper, max_phys)` — a struct rather than
/// eight positional arguments since Rust has no named/optional parameters.
pub struct BatchParams<V> {
    pub lo: Bound<KeyTuple>,
    pub hi: Bound<KeyTuple>,
    /// Flush after this many pending members.
    pub max_recs: Option<usize>,
    /// Flush before a pending member would push the packed group past this
    /// many bytes.
    pub max_bytes: Option<usize>,
    /// When set, a pre-existing batch row encountered mid-scan is flushed
    /// past rather than exploded into the new grouping.
    pub preserve: bool,
    /// Overrides the collection's default packer by name (must already be
    /// registered) for the batch rows this call writes.
    pub packer_name: Option<String>,
    /// Buckets consecutive members; a change in bucket value forces a
    /// flush even if `max_recs`/`max_bytes` haven't been hit.
    pub grouper: Option<Arc<dyn Fn(&V) -> Vec<u8> + Send + Sync>>,
    /// Caps the number of physical rows stepped, independent of how many
    /// logical members that yields.
    pub max_phys: Option<usize>,
}

impl<V> Default for BatchParams<V> {
    fn default() -> Self {
        BatchParams {
            lo: Bound::Unbounded,
            hi: Bound::Unbounded,
            max_recs: None,
            max_bytes: None,
            preserve: false,
            packer_name: None,
            grouper: None,
            max_phys: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::CounterService;
    use crate::engine::MemEngine;
    use crate::registry::EncoderRegistry;
    use crate::value::BincodeCodec;

    fn make_collection(engine: &MemEngine) -> Collection<String> {
        let counters = Arc::new(CounterService::new(b"\x00", 1));
        let registry = Arc::new(EncoderRegistry::open(engine, b"\x00", 2, &counters).unwrap());
        let tag = registry.tag_of("plain").unwrap();
        Collection {
            name: "widgets".to_string(),
            store_prefix: b"\x00".to_vec(),
            idx: 10,
            key_mode: KeyMode::Auto { counter_name: "\x00widgets_idx".to_string(), counter_init: 1 },
            value_codec: Arc::new(BincodeCodec::<String>::new()),
            packer: Arc::new(crate::packer::PlainPacker),
            packer_tag: tag,
            indices: Vec::new(),
            registry,
            counters,
            virgin_keys: false,
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let engine = MemEngine::new();
        let coll = make_collection(&engine);
        let key = coll.put(&engine, None, "hello".to_string()).unwrap();
        assert_eq!(coll.get(&engine, &key).unwrap(), Some("hello".to_string()));
    }

    #[test]
    fn auto_keys_increment() {
        let engine = MemEngine::new();
        let coll = make_collection(&engine);
        let k1 = coll.put(&engine, None, "a".to_string()).unwrap();
        let k2 = coll.put(&engine, None, "b".to_string()).unwrap();
        assert_eq!(k1, vec![Key::Int(1)]);
        assert_eq!(k2, vec![Key::Int(2)]);
    }

    #[test]
    fn delete_removes_the_record() {
        let engine = MemEngine::new();
        let coll = make_collection(&engine);
        let key = coll.put(&engine, None, "gone".to_string()).unwrap();
        coll.delete(&engine, &key).unwrap();
        assert_eq!(coll.get(&engine, &key).unwrap(), None);
    }

    #[test]
    fn items_iterates_in_ascending_key_order() {
        let engine = MemEngine::new();
        let coll = make_collection(&engine);
        coll.put(&engine, None, "a".to_string()).unwrap();
        coll.put(&engine, None, "b".to_string()).unwrap();
        coll.put(&engine, None, "c".to_string()).unwrap();
        let rows = coll.items(&engine, Bound::Unbounded, Bound::Unbounded, false, None).unwrap();
        let values: Vec<String> = rows.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn batching_then_reading_back_one_member_splits_it_out() {
        let engine = MemEngine::new();
        let coll = make_collection(&engine);
        let k1 = coll.put(&engine, None, "a".to_string()).unwrap();
        let k2 = coll.put(&engine, None, "b".to_string()).unwrap();
        let k3 = coll.put(&engine, None, "c".to_string()).unwrap();

        let written = coll.batch(&engine, &BatchParams::default()).unwrap();
        assert_eq!(written, 1);

        // Reading the batch back transparently explodes it.
        let rows = coll.items(&engine, Bound::Unbounded, Bound::Unbounded, false, None).unwrap();
        assert_eq!(rows.len(), 3);

        // Putting a new value for the middle key must split the batch so
        // the other two members survive as standalone rows.
        coll.put(&engine, Some(k2.clone()), "B".to_string()).unwrap();
        assert_eq!(coll.get(&engine, &k1).unwrap(), Some("a".to_string()));
        assert_eq!(coll.get(&engine, &k2).unwrap(), Some("B".to_string()));
        assert_eq!(coll.get(&engine, &k3).unwrap(), Some("c".to_string()));
    }

    /// S5 — batch round-trip: four keyed records folded by `max_recs=4`
    /// produce exactly one physical row, keyed under its descending member
    /// order, with forward/reverse iteration and a direct `get` all intact.
    #[test]
    fn batch_max_recs_round_trips_exactly() {
        let engine = MemEngine::new();
        let coll = make_collection(&engine);
        let k1 = coll.put(&engine, None, "v1".to_string()).unwrap();
        let k2 = coll.put(&engine, None, "v2".to_string()).unwrap();
        let k3 = coll.put(&engine, None, "v3".to_string()).unwrap();
        let k4 = coll.put(&engine, None, "v4".to_string()).unwrap();

        let params = BatchParams { max_recs: Some(4), ..Default::default() };
        let written = coll.batch(&engine, &params).unwrap();
        assert_eq!(written, 1);

        let prefix = coll.prefix();
        let phys_rows: Vec<_> = engine
            .range(Bound::Unbounded, Bound::Unbounded, false)
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
            .into_iter()
            .filter(|(k, _)| decode_keys(&prefix, k).map(|t| t.len() > 1).unwrap_or(false))
            .collect();
        assert_eq!(phys_rows.len(), 1);
        let decoded = decode_keys(&prefix, &phys_rows[0].0).unwrap();
        assert_eq!(decoded, vec![k4.clone(), k3.clone(), k2.clone(), k1.clone()]);

        let fwd = coll.values(&engine, Bound::Unbounded, Bound::Unbounded, false, None).unwrap();
        assert_eq!(fwd, vec!["v1", "v2", "v3", "v4"].into_iter().map(String::from).collect::<Vec<_>>());
        let rev = coll.values(&engine, Bound::Unbounded, Bound::Unbounded, true, None).unwrap();
        assert_eq!(rev, vec!["v4", "v3", "v2", "v1"].into_iter().map(String::from).collect::<Vec<_>>());

        assert_eq!(coll.get(&engine, &k2).unwrap(), Some("v2".to_string()));
    }

    /// S6 — grouper flush: alternating categories A,A,B,A produce exactly
    /// three flushed groups, `[A,A]`, `[B]`, `[A]`.
    #[test]
    fn batch_grouper_flushes_on_category_change() {
        let engine = MemEngine::new();
        let coll = make_collection(&engine);
        coll.put(&engine, None, "A1".to_string()).unwrap();
        coll.put(&engine, None, "A2".to_string()).unwrap();
        coll.put(&engine, None, "B1".to_string()).unwrap();
        coll.put(&engine, None, "A3".to_string()).unwrap();

        let grouper: Arc<dyn Fn(&String) -> Vec<u8> + Send + Sync> = Arc::new(|v: &String| v.as_bytes()[0..1].to_vec());
        let params = BatchParams { grouper: Some(grouper), ..Default::default() };
        let written = coll.batch(&engine, &params).unwrap();
        assert_eq!(written, 3);

        let values = coll.values(&engine, Bound::Unbounded, Bound::Unbounded, false, None).unwrap();
        assert_eq!(
            values,
            vec!["A1", "A2", "B1", "A3"].into_iter().map(String::from).collect::<Vec<_>>()
        );
    }

    fn make_derived_collection(engine: &MemEngine) -> Collection<(String, i64)> {
        let counters = Arc::new(CounterService::new(b"\x00", 1));
        let registry = Arc::new(EncoderRegistry::open(engine, b"\x00", 2, &counters).unwrap());
        let tag = registry.tag_of("plain").unwrap();
        Collection {
            name: "derived".to_string(),
            store_prefix: b"\x00".to_vec(),
            idx: 11,
            key_mode: KeyMode::Derived(Arc::new(|v: &(String, i64)| vec![Key::Int(v.1)])),
            value_codec: Arc::new(BincodeCodec::<(String, i64)>::new()),
            packer: Arc::new(crate::packer::PlainPacker),
            packer_tag: tag,
            indices: Vec::new(),
            registry,
            counters,
            virgin_keys: false,
        }
    }

    #[test]
    fn put_record_moves_the_row_when_the_derived_key_changes() {
        let engine = MemEngine::new();
        let coll = make_derived_collection(&engine);
        let key = coll.put(&engine, None, ("widget".to_string(), 1)).unwrap();
        assert_eq!(key, vec![Key::Int(1)]);

        let mut rec = coll.get_record(&engine, &key).unwrap().unwrap();
        rec.value.1 = 2; // mutate the field the key is derived from

        let new_key = coll.put_record(&engine, &rec).unwrap();
        assert_eq!(new_key, vec![Key::Int(2)]);
        assert_eq!(coll.get(&engine, &key).unwrap(), None, "stale row at the old key must be gone");
        assert_eq!(coll.get(&engine, &new_key).unwrap(), Some(("widget".to_string(), 2)));
    }

    #[test]
    fn put_record_is_a_plain_update_when_the_derived_key_is_unchanged() {
        let engine = MemEngine::new();
        let coll = make_derived_collection(&engine);
        let key = coll.put(&engine, None, ("widget".to_string(), 1)).unwrap();

        let mut rec = coll.get_record(&engine, &key).unwrap().unwrap();
        rec.value.0 = "widget-renamed".to_string();
        let same_key = coll.put_record(&engine, &rec).unwrap();

        assert_eq!(same_key, key);
        assert_eq!(coll.get(&engine, &key).unwrap(), Some(("widget-renamed".to_string(), 1)));
    }

    #[test]
    fn delete_value_rederives_the_key_and_deletes() {
        let engine = MemEngine::new();
        let coll = make_derived_collection(&engine);
        let key = coll.put(&engine, None, ("widget".to_string(), 7)).unwrap();

        coll.delete_value(&engine, &("widget".to_string(), 7)).unwrap();
        assert_eq!(coll.get(&engine, &key).unwrap(), None);
    }

    #[test]
    fn delete_value_is_rejected_outside_derived_key_mode() {
        let engine = MemEngine::new();
        let coll = make_collection(&engine);
        let err = coll.delete_value(&engine, &"anything".to_string()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedKeyElement));
    }
}
