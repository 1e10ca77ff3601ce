//! Typed tuple key codec.
//!
//! A [`KeyTuple`] is a `Vec<Key>` — a row of typed elements. A physical key
//! is one or more `KeyTuple`s concatenated with a separator byte, which is
//! how a batch row packs several logical keys into one physical row (see
//! `batch.rs`). Encoded order is byte-lexicographic and matches the cross-type
//! order `Null < NegInt < PosInt < Bool(false) < Bool(true) < Blob < Text <
//! Uuid < Tuple`.

use crate::error::Error;
use crate::escape::{escape, unescape};
use crate::varint::{decode_uint, encode_uint};
use uuid::Uuid;

pub const KIND_NULL: u8 = 0x0F;
pub const KIND_NEG_INT: u8 = 0x14;
pub const KIND_POS_INT: u8 = 0x15;
pub const KIND_BOOL: u8 = 0x1E;
pub const KIND_BLOB: u8 = 0x28;
pub const KIND_TEXT: u8 = 0x32;
pub const KIND_UUID: u8 = 0x5A;
pub const KIND_TUPLE: u8 = 0x5F;
pub const KIND_TUPLE_END: u8 = 0x00;
pub const SEP: u8 = 0x66;

/// One element of a key tuple.
///
/// Intentionally does not derive `Ord`: the derived variant order does not
/// match the cross-type sort order encoded keys carry (see module docs) —
/// compare encoded bytes instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Null,
    Int(i64),
    Bool(bool),
    Blob(Vec<u8>),
    Text(String),
    Uuid(Uuid),
    /// A nested tuple, sorting after every scalar kind. Not present in the
    /// original implementation (`KIND_KEY` was reserved but unused there);
    /// supplied here so a `KeyTuple` element can itself be a sub-tuple.
    Tuple(Vec<Key>),
}

/// A single logical key: a row of [`Key`] elements.
pub type KeyTuple = Vec<Key>;

impl From<Key> for KeyTuple {
    fn from(k: Key) -> Self {
        vec![k]
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<bool> for Key {
    fn from(v: bool) -> Self {
        Key::Bool(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Text(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::Text(v)
    }
}

impl From<Vec<u8>> for Key {
    fn from(v: Vec<u8>) -> Self {
        Key::Blob(v)
    }
}

impl From<Uuid> for Key {
    fn from(v: Uuid) -> Self {
        Key::Uuid(v)
    }
}

/// Encodes `prefix` followed by `tuples`, each tuple separated by [`SEP`].
pub fn encode_keys(prefix: &[u8], tuples: &[KeyTuple]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + tuples.len() * 9);
    out.extend_from_slice(prefix);
    for (i, tup) in tuples.iter().enumerate() {
        if i > 0 {
            out.push(SEP);
        }
        encode_tuple_elems(tup, &mut out);
    }
    out
}

fn encode_tuple_elems(tup: &[Key], out: &mut Vec<u8>) {
    for elem in tup {
        encode_elem(elem, out);
    }
}

fn encode_elem(elem: &Key, out: &mut Vec<u8>) {
    match elem {
        Key::Null => out.push(KIND_NULL),
        Key::Int(x) => {
            if *x < 0 {
                out.push(KIND_NEG_INT);
                encode_uint((*x as i128).unsigned_abs() as u64, out);
            } else {
                out.push(KIND_POS_INT);
                encode_uint(*x as u64, out);
            }
        }
        Key::Bool(b) => {
            out.push(KIND_BOOL);
            encode_uint(if *b { 1 } else { 0 }, out);
        }
        Key::Blob(b) => {
            out.push(KIND_BLOB);
            escape(b, out);
        }
        Key::Text(s) => {
            out.push(KIND_TEXT);
            escape(s.as_bytes(), out);
        }
        Key::Uuid(u) => {
            out.push(KIND_UUID);
            escape(u.as_bytes(), out);
            out.push(0x00);
        }
        Key::Tuple(nested) => {
            out.push(KIND_TUPLE);
            encode_tuple_elems(nested, out);
            out.push(KIND_TUPLE_END);
        }
    }
}

fn decode_elem(buf: &[u8]) -> Result<(Key, usize), Error> {
    let tag = *buf.first().ok_or(Error::Truncated)?;
    match tag {
        KIND_NULL => Ok((Key::Null, 1)),
        KIND_NEG_INT => {
            let (v, n) = decode_uint(&buf[1..])?;
            Ok((Key::Int(-(v as i128) as i64), 1 + n))
        }
        KIND_POS_INT => {
            let (v, n) = decode_uint(&buf[1..])?;
            Ok((Key::Int(v as i64), 1 + n))
        }
        KIND_BOOL => {
            let (v, n) = decode_uint(&buf[1..])?;
            Ok((Key::Bool(v != 0), 1 + n))
        }
        KIND_BLOB => {
            let (bytes, n) = unescape(&buf[1..])?;
            Ok((Key::Blob(bytes), 1 + n))
        }
        KIND_TEXT => {
            let (bytes, n) = unescape(&buf[1..])?;
            let s = String::from_utf8(bytes).map_err(|_| Error::CorruptKey { bytes: buf.to_vec() })?;
            Ok((Key::Text(s), 1 + n))
        }
        KIND_UUID => {
            let (bytes, n) = unescape(&buf[1..])?;
            let extra = *buf.get(1 + n).ok_or(Error::Truncated)?;
            if extra != 0x00 || bytes.len() != 16 {
                return Err(Error::CorruptKey { bytes: buf.to_vec() });
            }
            let mut arr = [0u8; 16];
            arr.copy_from_slice(&bytes);
            Ok((Key::Uuid(Uuid::from_bytes(arr)), 1 + n + 1))
        }
        KIND_TUPLE => {
            let mut i = 1;
            let mut elems = Vec::new();
            loop {
                let t = *buf.get(i).ok_or(Error::Truncated)?;
                if t == KIND_TUPLE_END {
                    i += 1;
                    break;
                }
                let (e, n) = decode_elem(&buf[i..])?;
                elems.push(e);
                i += n;
            }
            Ok((Key::Tuple(elems), i))
        }
        _ => Err(Error::CorruptKey { bytes: buf.to_vec() }),
    }
}

/// Decodes every tuple encoded after `prefix` in `s`. Returns `None` when
/// `s` does not start with `prefix` (e.g. iteration has run past the
/// collection's own keyspace) rather than erroring.
pub fn decode_keys(prefix: &[u8], s: &[u8]) -> Option<Vec<KeyTuple>> {
    if !s.starts_with(prefix) {
        return None;
    }
    let mut i = prefix.len();
    let mut tuples = Vec::new();
    let mut cur = Vec::new();
    while i < s.len() {
        if s[i] == SEP {
            tuples.push(std::mem::take(&mut cur));
            i += 1;
            continue;
        }
        let (elem, consumed) = decode_elem(&s[i..]).ok()?;
        cur.push(elem);
        i += consumed;
    }
    tuples.push(cur);
    Some(tuples)
}

/// Decodes only the first tuple encoded after `prefix` in `s`.
pub fn decode_first_key(prefix: &[u8], s: &[u8]) -> Option<KeyTuple> {
    if !s.starts_with(prefix) {
        return None;
    }
    let mut i = prefix.len();
    let mut cur = Vec::new();
    while i < s.len() {
        if s[i] == SEP {
            return Some(cur);
        }
        let (elem, consumed) = decode_elem(&s[i..]).ok()?;
        cur.push(elem);
        i += consumed;
    }
    Some(cur)
}

/// The lexicographically-smallest byte string greater than every extension
/// of `s` (i.e. greater than `s` and every string that has `s` as a
/// prefix). Returns `None` when `s` consists solely of `0xFF` bytes (no
/// such string exists, shorter than unbounded length).
pub fn next_greater(s: &[u8]) -> Option<Vec<u8>> {
    let mut v = s.to_vec();
    while v.last() == Some(&0xFF) {
        v.pop();
    }
    let last = v.last_mut()?;
    *last += 1;
    Some(v)
}

/// Bitwise complement of `s`, used to get a descending sort for a lone
/// element without reversing iteration direction.
pub fn invert(s: &[u8]) -> Vec<u8> {
    s.iter().map(|b| !b).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rt(tup: KeyTuple) {
        let encoded = encode_keys(b"", &[tup.clone()]);
        let decoded = decode_first_key(b"", &encoded).unwrap();
        assert_eq!(decoded, tup);
    }

    #[test]
    fn round_trips_every_scalar_kind() {
        rt(vec![Key::Null]);
        rt(vec![Key::Int(-9_223_372_036_854_775_808)]);
        rt(vec![Key::Int(-1)]);
        rt(vec![Key::Int(0)]);
        rt(vec![Key::Int(i64::MAX)]);
        rt(vec![Key::Bool(false)]);
        rt(vec![Key::Bool(true)]);
        rt(vec![Key::Blob(vec![0x00, 0x01, 0xFF])]);
        rt(vec![Key::Text("hello \u{1F980}".to_string())]);
        rt(vec![Key::Uuid(Uuid::from_u128(0x1234_5678))]);
        rt(vec![Key::Tuple(vec![Key::Int(1), Key::Text("a".into())])]);
    }

    #[test]
    fn cross_type_sort_order_matches_kind_tags() {
        let elems = vec![
            vec![Key::Null],
            vec![Key::Int(-5)],
            vec![Key::Int(5)],
            vec![Key::Bool(false)],
            vec![Key::Bool(true)],
            vec![Key::Blob(vec![1])],
            vec![Key::Text("a".into())],
            vec![Key::Uuid(Uuid::nil())],
            vec![Key::Tuple(vec![Key::Int(1)])],
        ];
        let mut encoded: Vec<Vec<u8>> = elems.iter().map(|t| encode_keys(b"", &[t.clone()])).collect();
        let sorted = {
            let mut e2 = encoded.clone();
            e2.sort();
            e2
        };
        assert_eq!(encoded, sorted, "encoding order must already match kind-tag order");
        encoded.clear();
    }

    #[test]
    fn negative_integers_sort_by_ascending_magnitude_not_numeric_value() {
        // Documented quirk: within the neg-int kind, -1 (magnitude 1) sorts
        // before -100 (magnitude 100), the reverse of numeric order.
        let neg1 = encode_keys(b"", &[vec![Key::Int(-1)]]);
        let neg100 = encode_keys(b"", &[vec![Key::Int(-100)]]);
        assert!(neg1 < neg100);
    }

    #[test]
    fn multi_tuple_encoding_uses_separator_between_not_after() {
        let encoded = encode_keys(b"", &[vec![Key::Int(1)], vec![Key::Int(2)]]);
        let decoded = decode_keys(b"", &encoded).unwrap();
        assert_eq!(decoded, vec![vec![Key::Int(1)], vec![Key::Int(2)]]);
    }

    #[test]
    fn decode_rejects_prefix_mismatch_without_panicking() {
        assert_eq!(decode_keys(b"abc", b"xyz"), None);
        assert_eq!(decode_first_key(b"abc", b"xyz"), None);
    }

    #[test]
    fn next_greater_strips_trailing_ff_and_increments() {
        assert_eq!(next_greater(&[1, 2, 3]), Some(vec![1, 2, 4]));
        assert_eq!(next_greater(&[1, 0xFF, 0xFF]), Some(vec![2]));
        assert_eq!(next_greater(&[0xFF, 0xFF]), None);
        assert_eq!(next_greater(&[]), None);
    }

    #[test]
    fn invert_is_involutive() {
        let s = vec![1, 2, 3, 0xFF];
        assert_eq!(invert(&invert(&s)), s);
    }
}
