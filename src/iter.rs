//! Shared range-iteration engine used by both `Collection` and `Index`.
//!
//! Walks the physical keyspace under a collection/index prefix, optionally
//! reversed, transparently exploding any batch row it encounters, honoring
//! an inclusive/exclusive logical bound on both ends plus independent caps
//! on physical rows stepped (`max_phys`) and logical rows yielded (`max`).

use crate::batch::explode_batch_row;
use crate::error::Error;
use crate::key::{decode_keys, encode_keys, KeyTuple};
use crate::packer::Packer;
use crate::varint::decode_uint;
use std::ops::Bound;
use std::sync::Arc;

/// One logical row surfaced by the iterator: its key tuple and the raw
/// (still encoded, pre-value-codec) payload bytes.
pub type LogicalRow = (KeyTuple, Vec<u8>);

pub(crate) fn bound_to_bytes(prefix: &[u8], bound: &Bound<KeyTuple>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Unbounded => Bound::Unbounded,
        Bound::Included(t) => Bound::Included(encode_keys(prefix, std::slice::from_ref(t))),
        Bound::Excluded(t) => Bound::Excluded(encode_keys(prefix, std::slice::from_ref(t))),
    }
}

pub(crate) fn tuple_in_bounds(prefix: &[u8], key: &KeyTuple, lo: &Bound<KeyTuple>, hi: &Bound<KeyTuple>) -> bool {
    let kb = encode_keys(prefix, std::slice::from_ref(key));
    let below = match lo {
        Bound::Unbounded => false,
        Bound::Included(t) => kb < encode_keys(prefix, std::slice::from_ref(t)),
        Bound::Excluded(t) => kb <= encode_keys(prefix, std::slice::from_ref(t)),
    };
    let above = match hi {
        Bound::Unbounded => false,
        Bound::Included(t) => kb > encode_keys(prefix, std::slice::from_ref(t)),
        Bound::Excluded(t) => kb >= encode_keys(prefix, std::slice::from_ref(t)),
    };
    !below && !above
}

pub struct RangeParams {
    pub lo: Bound<KeyTuple>,
    pub hi: Bound<KeyTuple>,
    pub reverse: bool,
    pub max: Option<usize>,
    pub max_phys: Option<usize>,
}

impl Default for RangeParams {
    fn default() -> Self {
        RangeParams {
            lo: Bound::Unbounded,
            hi: Bound::Unbounded,
            reverse: false,
            max: None,
            max_phys: None,
        }
    }
}

/// Runs one range iteration over `prefix`'s physical keyspace. Lazy: each
/// `next()` steps the underlying engine iterator only as far as it needs to
/// produce (or rule out) one more logical row, so a caller that stops early
/// (an index `find()`, a capped `max`) never reads keys it didn't ask for.
/// A physical batch row explodes into a small in-memory queue of its
/// members, which drains before the engine iterator advances again — the
/// queue never holds more than one physical row's worth of members at a
/// time.
pub fn range<'a>(
    txn: &'a dyn crate::engine::Txn,
    prefix: &'a [u8],
    params: &'a RangeParams,
    resolve_packer: &'a dyn Fn(u8) -> Result<Arc<dyn Packer>, Error>,
) -> impl Iterator<Item = Result<LogicalRow, Error>> + 'a {
    let start = bound_to_bytes(prefix, &params.lo);
    let end = bound_to_bytes(prefix, &params.hi);
    let mut phys_iter = txn.range(start, end, params.reverse);
    let mut phys_steps = 0usize;
    let mut yielded = 0usize;
    let mut pending: std::collections::VecDeque<LogicalRow> = std::collections::VecDeque::new();

    std::iter::from_fn(move || loop {
        if let Some(cap) = params.max {
            if yielded >= cap {
                return None;
            }
        }

        if let Some(row) = pending.pop_front() {
            yielded += 1;
            return Some(Ok(row));
        }

        if let Some(cap) = params.max_phys {
            if phys_steps >= cap {
                return None;
            }
        }

        let (phys_key, phys_value) = match phys_iter.next()? {
            Ok(kv) => kv,
            Err(err) => return Some(Err(err)),
        };
        phys_steps += 1;

        let tuples = match decode_keys(prefix, &phys_key) {
            Some(t) => t,
            None => {
                tracing::warn!(?phys_key, "physical row outside its own collection prefix, skipping");
                continue;
            }
        };

        if tuples.len() > 1 {
            let mut members = match explode_batch_row(prefix, &phys_key, &phys_value, resolve_packer) {
                Ok(m) => m,
                Err(err) => {
                    tracing::warn!(?phys_key, %err, "failed to explode batch row, skipping");
                    continue;
                }
            };
            if params.reverse {
                members.reverse();
            }
            for (key, payload) in members {
                if tuple_in_bounds(prefix, &key, &params.lo, &params.hi) {
                    pending.push_back((key, payload));
                }
            }
            continue;
        }

        let key = tuples.into_iter().next().unwrap();
        let (packer_tag, n) = match decode_uint(&phys_value) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(?phys_key, %err, "corrupt standalone row header, skipping");
                continue;
            }
        };
        let packer = match resolve_packer(packer_tag as u8) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(?phys_key, %err, "unknown packer tag, skipping");
                continue;
            }
        };
        let payload = match packer.unpack(&phys_value[n..]) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(?phys_key, %err, "failed to unpack standalone row, skipping");
                continue;
            }
        };
        if tuple_in_bounds(prefix, &key, &params.lo, &params.hi) {
            pending.push_back((key, payload));
        }
    })
}
