//! Batch physical-row layout: packing several adjacent logical records into
//! one physical row, and exploding/splitting them back apart on read or
//! mutation.
//!
//! Physical key: `prefix ‖ encode_keys(reverse(member_keys))` — a batch row
//! is keyed under its *maximum* member, with members written in descending
//! order. Physical value: `varint(n) ‖ varint(len_0) .. varint(len_{n-1}) ‖
//! packer_tag ‖ packer.pack(concat(payload_0 .. payload_{n-1}))`, where the
//! payload order matches the (descending) key order.

use crate::engine::Txn;
use crate::error::Error;
use crate::key::{decode_keys, encode_keys, KeyTuple};
use crate::packer::Packer;
use crate::varint::{decode_uint, encode_uint};
use std::sync::Arc;

/// Builds the physical key for a batch spanning `member_keys`, which must
/// already be in ascending order.
pub fn batch_physical_key(prefix: &[u8], member_keys: &[KeyTuple]) -> Vec<u8> {
    let reversed: Vec<KeyTuple> = member_keys.iter().rev().cloned().collect();
    encode_keys(prefix, &reversed)
}

/// Builds the physical value for a batch, given member payloads in the same
/// ascending order as `member_keys` passed to `batch_physical_key` (this
/// function reverses them itself to match the on-disk descending order).
pub fn encode_batch_value(packer_tag: u8, packer: &dyn Packer, payloads_ascending: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_uint(payloads_ascending.len() as u64, &mut out);
    for p in payloads_ascending.iter().rev() {
        encode_uint(p.len() as u64, &mut out);
    }
    out.push(packer_tag);
    let concat: Vec<u8> = payloads_ascending.iter().rev().flat_map(|p| p.iter().cloned()).collect();
    out.extend(packer.pack(&concat));
    out
}

/// Explodes one batch physical row into its member `(key, raw payload)`
/// pairs, in ascending key order.
pub fn explode_batch_row(
    prefix: &[u8],
    phys_key: &[u8],
    phys_value: &[u8],
    resolve_packer: &dyn Fn(u8) -> Result<Arc<dyn Packer>, Error>,
) -> Result<Vec<(KeyTuple, Vec<u8>)>, Error> {
    let member_keys_desc = decode_keys(prefix, phys_key).ok_or_else(|| Error::CorruptKey { bytes: phys_key.to_vec() })?;

    let (n, mut i) = decode_uint(phys_value)?;
    let mut lens = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let (len, consumed) = decode_uint(&phys_value[i..])?;
        lens.push(len as usize);
        i += consumed;
    }
    let packer_tag = *phys_value.get(i).ok_or(Error::Truncated)?;
    i += 1;
    let packer = resolve_packer(packer_tag)?;
    let concat = packer.unpack(&phys_value[i..])?;

    if member_keys_desc.len() != lens.len() {
        return Err(Error::CorruptKey { bytes: phys_value.to_vec() });
    }

    let mut members_desc = Vec::with_capacity(lens.len());
    let mut off = 0;
    for (key, len) in member_keys_desc.into_iter().zip(lens) {
        let payload = concat.get(off..off + len).ok_or(Error::Truncated)?.to_vec();
        members_desc.push((key, payload));
        off += len;
    }
    members_desc.reverse();
    Ok(members_desc)
}

/// Splits a batch row apart: every member other than `keep_key` is
/// re-written as its own standalone physical row, re-using the batch's
/// packer tag (valid since a packer's `pack`/`unpack` are total functions
/// over byte strings, so re-packing one member alone under the same packer
/// is always well-formed). The batch row itself is deleted. Returns the
/// kept member's raw payload, if it was part of this batch.
///
/// The original implementation leaves this path unreachable
/// (`assert False`); this crate implements it so a put/delete against one
/// member of a batch does not silently corrupt the rest.
pub fn split_batch(
    txn: &dyn Txn,
    prefix: &[u8],
    phys_key: &[u8],
    phys_value: &[u8],
    keep_key: Option<&KeyTuple>,
    resolve_packer: &dyn Fn(u8) -> Result<Arc<dyn Packer>, Error>,
    packer_tag: u8,
) -> Result<Option<Vec<u8>>, Error> {
    let members = explode_batch_row(prefix, phys_key, phys_value, resolve_packer)?;
    let packer = resolve_packer(packer_tag)?;
    let mut kept = None;
    for (key, payload) in members {
        if Some(&key) == keep_key {
            kept = Some(payload);
            continue;
        }
        let standalone_key = encode_keys(prefix, std::slice::from_ref(&key));
        let mut standalone_value = Vec::with_capacity(payload.len() + 1);
        standalone_value.push(packer_tag);
        standalone_value.extend(packer.pack(&payload));
        txn.put(&standalone_key, &standalone_value)?;
    }
    txn.delete(phys_key)?;
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;
    use crate::packer::PlainPacker;

    fn resolver(_tag: u8) -> Result<Arc<dyn Packer>, Error> {
        Ok(Arc::new(PlainPacker))
    }

    #[test]
    fn round_trips_a_three_member_batch() {
        let prefix = b"\x00\x0A".to_vec();
        let keys = vec![vec![Key::Int(1)], vec![Key::Int(2)], vec![Key::Int(3)]];
        let payloads = vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()];

        let phys_key = batch_physical_key(&prefix, &keys);
        let phys_value = encode_batch_value(3, &PlainPacker, &payloads);

        let exploded = explode_batch_row(&prefix, &phys_key, &phys_value, &resolver).unwrap();
        assert_eq!(exploded, keys.into_iter().zip(payloads).collect::<Vec<_>>());
    }

    #[test]
    fn split_rewrites_every_other_member_standalone_and_drops_the_batch_row() {
        let prefix = b"\x00\x0A".to_vec();
        let keys = vec![vec![Key::Int(1)], vec![Key::Int(2)], vec![Key::Int(3)]];
        let payloads = vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()];
        let phys_key = batch_physical_key(&prefix, &keys);
        let phys_value = encode_batch_value(3, &PlainPacker, &payloads);

        let engine = crate::engine::MemEngine::new();
        engine.put(&phys_key, &phys_value).unwrap();

        let kept = split_batch(&engine, &prefix, &phys_key, &phys_value, Some(&keys[1]), &resolver, 3).unwrap();
        assert_eq!(kept, Some(b"two".to_vec()));

        assert_eq!(engine.get(&phys_key).unwrap(), None);
        for (key, payload) in [(&keys[0], b"one".to_vec()), (&keys[2], b"three".to_vec())] {
            let sk = encode_keys(&prefix, std::slice::from_ref(key));
            let sv = engine.get(&sk).unwrap().unwrap();
            assert_eq!(sv[0], 3);
            assert_eq!(&sv[1..], payload.as_slice());
        }
    }
}
