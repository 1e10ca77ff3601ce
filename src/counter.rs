//! Named, transactionally-incremented counters.
//!
//! Backs auto-assigned collection ids, index ids, encoder tags, and
//! collections' own auto-increment key mode. Grounded on
//! `storage/sled/src/property.rs`'s `PropertyManager::get_property_id`
//! (lookup-or-allocate-and-persist over a dedicated tree).

use crate::engine::Txn;
use crate::error::Error;
use crate::key::Key;
use crate::meta::MetaTable;

pub struct CounterService {
    table: MetaTable,
}

impl CounterService {
    pub fn new(store_prefix: &[u8], coll_idx: u64) -> Self {
        CounterService {
            table: MetaTable::new(store_prefix, coll_idx),
        }
    }

    /// Reads the current value of counter `name` (creating it at `init` if
    /// absent), advances it by `n`, and returns the value *before* this
    /// increment.
    pub fn count(&self, txn: &dyn Txn, name: &str, n: u64, init: u64) -> Result<u64, Error> {
        let key = vec![Key::Text(name.to_string())];
        let current = match self.table.get(txn, &key)? {
            Some(tup) => match tup.as_slice() {
                [_, Key::Int(v)] => *v as u64,
                _ => return Err(Error::CorruptKey { bytes: name.as_bytes().to_vec() }),
            },
            None => init,
        };
        if n > 0 {
            let value = vec![Key::Text(name.to_string()), Key::Int((current + n) as i64)];
            self.table.put(txn, &key, &value)?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemEngine;

    #[test]
    fn first_call_returns_init_and_persists() {
        let engine = MemEngine::new();
        let counters = CounterService::new(b"\x00", 1);
        assert_eq!(counters.count(&engine, "idx", 1, 10).unwrap(), 10);
        assert_eq!(counters.count(&engine, "idx", 1, 10).unwrap(), 11);
        assert_eq!(counters.count(&engine, "idx", 1, 10).unwrap(), 12);
    }

    #[test]
    fn independent_counters_do_not_interfere() {
        let engine = MemEngine::new();
        let counters = CounterService::new(b"\x00", 1);
        assert_eq!(counters.count(&engine, "a", 1, 1).unwrap(), 1);
        assert_eq!(counters.count(&engine, "b", 1, 100).unwrap(), 100);
        assert_eq!(counters.count(&engine, "a", 1, 1).unwrap(), 2);
    }
}
