//! `sled`-backed engine implementation.
//!
//! Grounded on `storage/sled/src/sled.rs`'s `SledStorageEngine`: a thin
//! wrapper around a single `sled::Tree`, mapping `sled::Error` into
//! `Error::Engine`.

use crate::engine::{Engine, RangeIter, Txn};
use crate::error::Error;
use std::ops::Bound;

pub struct SledEngine {
    tree: sled::Tree,
}

impl SledEngine {
    pub fn open(db: &sled::Db, tree_name: &str) -> Result<Self, Error> {
        let tree = db.open_tree(tree_name).map_err(Error::engine)?;
        Ok(SledEngine { tree })
    }

    /// Opens (creating if necessary) a `sled::Db` under `~/<folder_name>`,
    /// the default data directory layout the teacher's own sled backend
    /// uses when the caller doesn't supply an explicit path.
    pub fn default_db_path(folder_name: &str) -> Result<std::path::PathBuf, Error> {
        let dir = dirs::home_dir()
            .ok_or_else(|| Error::engine(std::io::Error::new(std::io::ErrorKind::NotFound, "could not determine home directory")))?
            .join(folder_name);
        Ok(dir)
    }
}

impl Txn for SledEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.tree.get(key).map_err(Error::engine)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.tree.insert(key, value).map_err(Error::engine)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.tree.remove(key).map_err(Error::engine)?;
        Ok(())
    }

    fn range(&self, start: Bound<Vec<u8>>, end: Bound<Vec<u8>>, reverse: bool) -> RangeIter<'_> {
        // `sled::Tree::range` is itself a `DoubleEndedIterator`, so reverse
        // scans use `.rev()` directly — no need to drain into a `Vec` first.
        // I/O errors are mapped, not filtered out, so a mid-scan failure
        // reaches the caller instead of silently truncating the result set.
        let iter = self
            .tree
            .range((start, end))
            .map(|r| r.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(Error::engine));
        if reverse {
            Box::new(iter.rev())
        } else {
            Box::new(iter)
        }
    }

    fn commit(self: Box<Self>) -> Result<(), Error> {
        self.tree.flush().map_err(Error::engine)?;
        Ok(())
    }
}

impl Engine for SledEngine {
    fn begin(&self) -> Result<Box<dyn Txn + '_>, Error> {
        Ok(Box::new(SledEngine { tree: self.tree.clone() }))
    }
}
