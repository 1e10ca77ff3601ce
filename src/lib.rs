//! `tupledb`: a minimalist embedded object database core.
//!
//! A typed-tuple key codec, a pluggable ordered-byte-string storage engine,
//! collections with secondary indices, and compressed record batching — the
//! pieces needed to build something like a small document store or an
//! embedded index, without committing to one engine, wire format, or value
//! serializer.
//!
//! ```text
//! Store
//!  ├─ EncoderRegistry   (packer name <-> tag, persisted)
//!  ├─ CounterService    (named, transactional counters)
//!  └─ Collection<V>     (key assignment, put/delete, iteration, batching)
//!      └─ Index<V>       (secondary index over a collection)
//! ```

pub mod batch;
pub mod collection;
pub mod counter;
pub mod engine;
pub mod error;
pub mod escape;
pub mod index;
pub mod iter;
pub mod key;
pub mod meta;
pub mod packer;
pub mod record;
pub mod registry;
pub mod store;
pub mod value;
pub mod varint;

#[cfg(feature = "sled")]
pub mod sled_engine;

pub use collection::{BatchParams, Collection, KeyMode};
pub use engine::{Engine, MemEngine, RangeIter, Txn};
pub use error::Error;
pub use index::{Index, IndexEntry, IndexKeyFunc, IndexSpec};
pub use key::{decode_keys, encode_keys, invert, next_greater, Key, KeyTuple};
pub use packer::{Packer, PlainPacker, ZlibPacker};
pub use record::Record;
pub use registry::EncoderRegistry;
pub use store::{CollectionBuilder, Store};
pub use value::{BincodeCodec, KeyTupleCodec, ValueCodec};

#[cfg(feature = "sled")]
pub use sled_engine::SledEngine;
