//! Prefix-free, order-preserving byte-string escape codec.
//!
//! `0x00` and `0x01` bytes are escaped as two-byte sequences so that a
//! variable-length string can be embedded inside a larger tuple encoding
//! without ambiguity, terminated by a lone `0x00`.

use crate::error::Error;

const ESCAPE: u8 = 0x01;
const ESCAPED_NUL: u8 = 0x01;
const ESCAPED_ESCAPE: u8 = 0x02;
const TERMINATOR: u8 = 0x00;

/// Appends the escaped, terminated encoding of `bytes` to `out`.
pub fn escape(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        match b {
            0x00 => {
                out.push(ESCAPE);
                out.push(ESCAPED_NUL);
            }
            0x01 => {
                out.push(ESCAPE);
                out.push(ESCAPED_ESCAPE);
            }
            _ => out.push(b),
        }
    }
    out.push(TERMINATOR);
}

pub fn escape_vec(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 1);
    escape(bytes, &mut out);
    out
}

/// Reads an escaped, terminated string from the front of `buf`, returning
/// the unescaped bytes and the number of input bytes consumed (including
/// the terminator).
pub fn unescape(buf: &[u8]) -> Result<(Vec<u8>, usize), Error> {
    let mut result = Vec::new();
    let mut i = 0;
    loop {
        let b = *buf.get(i).ok_or(Error::Truncated)?;
        match b {
            TERMINATOR => {
                i += 1;
                break;
            }
            ESCAPE => {
                let b1 = *buf.get(i + 1).ok_or(Error::Truncated)?;
                match b1 {
                    ESCAPED_NUL => result.push(0x00),
                    ESCAPED_ESCAPE => result.push(0x01),
                    _ => {
                        return Err(Error::CorruptKey {
                            bytes: buf.to_vec(),
                        })
                    }
                }
                i += 2;
            }
            _ => {
                result.push(b);
                i += 1;
            }
        }
    }
    Ok((result, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let cases: &[&[u8]] = &[b"", b"hello", &[0x00], &[0x01], &[0x00, 0x01, 0x00, 0x01], &[0xFF, 0x00, 0xFE]];
        for &c in cases {
            let enc = escape_vec(c);
            let (dec, consumed) = unescape(&enc).unwrap();
            assert_eq!(dec, c);
            assert_eq!(consumed, enc.len());
        }
    }

    #[test]
    fn preserves_lexicographic_order_for_common_prefixes() {
        let a = escape_vec(b"abc");
        let b = escape_vec(b"abd");
        let c = escape_vec(b"ab");
        assert!(c < a);
        assert!(a < b);
    }

    #[test]
    fn corrupt_escape_sequence_errors() {
        assert!(matches!(unescape(&[0x01, 0x05, 0x00]), Err(Error::CorruptKey { .. })));
    }
}
