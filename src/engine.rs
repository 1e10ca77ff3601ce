//! The storage engine contract: an opaque ordered byte key/value store.
//!
//! Everything above this layer (keys, tuples, indices, batches) is engine
//! agnostic. `MemEngine` is the in-process reference implementation used by
//! the test suite; `SledEngine` (feature `sled`, default-on) is the
//! production-shaped one.

use crate::error::Error;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex};

pub type RangeIter<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>), Error>> + 'a>;

/// A read/write handle over the engine. `Engine` itself is a `Txn` — a
/// freshly opened engine and a transaction over it expose the same surface,
/// matching the concurrency model's "no-op transaction is itself" case for
/// engines with no native transaction support.
pub trait Txn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Error>;
    fn delete(&self, key: &[u8]) -> Result<(), Error>;
    /// Iterates keys in `(start, end)` order, ascending unless `reverse`.
    fn range(&self, start: Bound<Vec<u8>>, end: Bound<Vec<u8>>, reverse: bool) -> RangeIter<'_>;
    /// Commits this transaction. A no-op for engines that apply writes
    /// immediately (e.g. `MemEngine`, `SledEngine`).
    fn commit(self: Box<Self>) -> Result<(), Error>;
}

pub trait Engine: Txn + Send + Sync {
    /// Begins a transaction. Engines without native transactions (the
    /// common case here) simply hand back another handle over themselves.
    fn begin(&self) -> Result<Box<dyn Txn + '_>, Error>;
}

/// In-process engine over a `BTreeMap`, used by tests and as a reference
/// implementation.
#[derive(Clone, Default)]
pub struct MemEngine {
    map: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Txn for MemEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.map.lock().unwrap().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.map.lock().unwrap().remove(key);
        Ok(())
    }

    fn range(&self, start: Bound<Vec<u8>>, end: Bound<Vec<u8>>, reverse: bool) -> RangeIter<'_> {
        // The guard can't outlive this call, so the snapshot has to be taken
        // eagerly here regardless of how lazy downstream consumers are —
        // unlike `SledEngine`, holding the lock across the returned iterator
        // would deadlock the first `put`/`delete` a caller issues mid-scan.
        let guard = self.map.lock().unwrap();
        let mut items: Vec<(Vec<u8>, Vec<u8>)> = guard.range((start, end)).map(|(k, v)| (k.clone(), v.clone())).collect();
        if reverse {
            items.reverse();
        }
        Box::new(items.into_iter().map(Ok))
    }

    fn commit(self: Box<Self>) -> Result<(), Error> {
        Ok(())
    }
}

impl Engine for MemEngine {
    fn begin(&self) -> Result<Box<dyn Txn + '_>, Error> {
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip() {
        let e = MemEngine::new();
        e.put(b"a", b"1").unwrap();
        assert_eq!(e.get(b"a").unwrap(), Some(b"1".to_vec()));
        e.delete(b"a").unwrap();
        assert_eq!(e.get(b"a").unwrap(), None);
    }

    #[test]
    fn range_respects_bounds_and_direction() {
        let e = MemEngine::new();
        for k in [b"a", b"b", b"c", b"d"] {
            e.put(k, k).unwrap();
        }
        let fwd: Vec<_> = e
            .range(Bound::Included(b"b".to_vec()), Bound::Excluded(b"d".to_vec()), false)
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(fwd, vec![b"b".to_vec(), b"c".to_vec()]);

        let rev: Vec<_> = e.range(Bound::Unbounded, Bound::Unbounded, true).map(|r| r.unwrap().0).collect();
        assert_eq!(rev, vec![b"d".to_vec(), b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }
}
