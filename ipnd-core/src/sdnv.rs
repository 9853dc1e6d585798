//! SDNV: self-delimiting numeric values (big-endian base-128, continuation bit on all but the last byte).
//! Also the length-prefixed array form used by the string and bytes primitives.

/// Encoding of an empty array. Not the canonical zero length: "length 1, single zero byte".
pub const EMPTY_ARRAY: [u8; 2] = [0x01, 0x00];

const CONTINUATION: u8 = 0x80;
const GROUP_MASK: u8 = 0x7f;

/// Number of bytes `encode(value)` produces.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Encode `value` into a fresh buffer using the minimal number of bytes.
pub fn encode(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(value));
    encode_into(&mut out, value);
    out
}

/// Append the SDNV encoding of `value` to `out`. Returns the number of bytes written.
pub fn encode_into(out: &mut Vec<u8>, value: u64) -> usize {
    let len = encoded_len(value);
    for i in (0..len).rev() {
        let mut byte = ((value >> (7 * i)) as u8) & GROUP_MASK;
        if i != 0 {
            byte |= CONTINUATION;
        }
        out.push(byte);
    }
    len
}

/// Decode one SDNV starting at `offset`. Returns the value and the number of bytes consumed.
pub fn decode(bytes: &[u8], offset: usize) -> Result<(u64, usize), SdnvError> {
    let input = bytes.get(offset..).ok_or(SdnvError::Truncated)?;
    let mut value: u64 = 0;
    for (i, &byte) in input.iter().enumerate() {
        if value > (u64::MAX >> 7) {
            return Err(SdnvError::Overflow);
        }
        value = (value << 7) | u64::from(byte & GROUP_MASK);
        if byte & CONTINUATION == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(SdnvError::Truncated)
}

/// Map a signed value onto the unsigned range so small magnitudes stay short (0, -1, 1, -2, ...).
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Append a length-prefixed array. An empty array is written as [`EMPTY_ARRAY`].
/// A lone zero byte would produce the same bytes and is refused.
pub fn encode_array(out: &mut Vec<u8>, data: &[u8]) -> Result<(), AmbiguousArray> {
    if data == [0x00] {
        return Err(AmbiguousArray);
    }
    if data.is_empty() {
        out.extend_from_slice(&EMPTY_ARRAY);
        return Ok(());
    }
    encode_into(out, data.len() as u64);
    out.extend_from_slice(data);
    Ok(())
}

/// Decode a length-prefixed array starting at `offset`. Returns the content and the bytes consumed.
/// The exact sequence `0x01 0x00` decodes to an empty slice.
pub fn decode_array(bytes: &[u8], offset: usize) -> Result<(&[u8], usize), SdnvError> {
    if bytes.get(offset..offset + EMPTY_ARRAY.len()) == Some(&EMPTY_ARRAY[..]) {
        return Ok((&[], EMPTY_ARRAY.len()));
    }
    let (len, n) = decode(bytes, offset)?;
    let start = offset + n;
    let len = usize::try_from(len).map_err(|_| SdnvError::Truncated)?;
    let end = start.checked_add(len).ok_or(SdnvError::Truncated)?;
    let data = bytes.get(start..end).ok_or(SdnvError::Truncated)?;
    Ok((data, n + len))
}

/// Error decoding an SDNV or a length-prefixed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SdnvError {
    #[error("truncated input")]
    Truncated,
    #[error("value does not fit in 64 bits")]
    Overflow,
}

/// A single `0x00` byte cannot be told apart from the empty array on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("array holding a single zero byte encodes like the empty array")]
pub struct AmbiguousArray;

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn known_encodings() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(1), vec![0x01]);
        assert_eq!(encode(127), vec![0x7f]);
        assert_eq!(encode(128), vec![0x81, 0x00]);
        assert_eq!(encode(0xabc), vec![0x95, 0x3c]);
        assert_eq!(encode(0x1234), vec![0xa4, 0x34]);
        assert_eq!(encode(0x4234), vec![0x81, 0x84, 0x34]);
        assert_eq!(encode(u64::MAX).len(), 10);
    }

    #[test]
    fn roundtrip_is_minimal() {
        let mut rng = rand::thread_rng();
        let mut values = vec![0u64, 1, 127, 128, 16383, 16384, u64::MAX];
        values.extend((0..200).map(|_| rng.gen::<u64>() >> rng.gen_range(0..64)));
        for v in values {
            let buf = encode(v);
            assert_eq!(buf.len(), encoded_len(v));
            assert_ne!(buf[0], CONTINUATION, "leading zero group for {v}");
            assert_eq!(decode(&buf, 0), Ok((v, buf.len())));
        }
    }

    #[test]
    fn decode_at_offset_stops_at_last_group() {
        let buf = [0xff, 0x81, 0x00, 0x05];
        assert_eq!(decode(&buf, 1), Ok((128, 2)));
        assert_eq!(decode(&buf, 3), Ok((5, 1)));
    }

    #[test]
    fn truncated_continuation() {
        assert_eq!(decode(&[0x81, 0x80], 0), Err(SdnvError::Truncated));
        assert_eq!(decode(&[], 0), Err(SdnvError::Truncated));
        assert_eq!(decode(&[0x01], 5), Err(SdnvError::Truncated));
    }

    #[test]
    fn overflow_is_rejected() {
        let mut buf = vec![0xff; 10];
        buf.push(0x7f);
        assert_eq!(decode(&buf, 0), Err(SdnvError::Overflow));
    }

    #[test]
    fn zigzag_small_magnitudes() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-10), 19);
        for v in [0i64, -1, 1, -10, i64::MIN, i64::MAX] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }

    #[test]
    fn empty_array_quirk() {
        let mut out = Vec::new();
        encode_array(&mut out, &[]).unwrap();
        assert_eq!(out, EMPTY_ARRAY);
        assert_eq!(decode_array(&out, 0), Ok((&[][..], 2)));
        // The canonical zero length is still accepted.
        assert_eq!(decode_array(&[0x00], 0), Ok((&[][..], 1)));
    }

    #[test]
    fn array_with_content() {
        let mut out = vec![0xee];
        encode_array(&mut out, b"rrr").unwrap();
        assert_eq!(out, [0xee, 0x03, b'r', b'r', b'r']);
        assert_eq!(decode_array(&out, 1), Ok((&b"rrr"[..], 4)));
    }

    #[test]
    fn lone_zero_byte_is_refused() {
        let mut out = vec![0xee];
        assert_eq!(encode_array(&mut out, &[0x00]), Err(AmbiguousArray));
        assert_eq!(out, [0xee]);
        encode_array(&mut out, &[0x00, 0x00]).unwrap();
        assert_eq!(out, [0xee, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn array_overrunning_buffer() {
        assert_eq!(decode_array(&[0x05, 1, 2], 0), Err(SdnvError::Truncated));
    }
}
