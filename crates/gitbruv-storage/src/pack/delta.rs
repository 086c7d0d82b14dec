use super::MAX_PREALLOC;
use crate::error::{Result, StoreError};

/// Git's own hard limit on delta chain length.
pub const MAX_DELTA_CHAIN_DEPTH: usize = 4095;

/// Applies a git delta to `base`.
///
/// Every copy and insert instruction is bounds-checked against the base,
/// the delta stream and the declared result size.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut pos = 0;

    let (base_size, consumed) = read_delta_size(&delta[pos..])?;
    pos += consumed;
    if base_size != base.len() {
        return Err(StoreError::InvalidDelta(format!(
            "base size mismatch: delta expects {}, base has {}",
            base_size,
            base.len()
        )));
    }

    let (result_size, consumed) = read_delta_size(&delta[pos..])?;
    pos += consumed;

    let mut result = Vec::with_capacity(result_size.min(MAX_PREALLOC));

    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if cmd & 0x80 != 0 {
            let mut offset: usize = 0;
            let mut size: usize = 0;

            for (bit, shift) in [(0x01, 0), (0x02, 8), (0x04, 16), (0x08, 24)] {
                if cmd & bit != 0 {
                    let byte = *delta.get(pos).ok_or_else(truncated)?;
                    offset |= (byte as usize) << shift;
                    pos += 1;
                }
            }
            for (bit, shift) in [(0x10, 0), (0x20, 8), (0x40, 16)] {
                if cmd & bit != 0 {
                    let byte = *delta.get(pos).ok_or_else(truncated)?;
                    size |= (byte as usize) << shift;
                    pos += 1;
                }
            }
            if size == 0 {
                size = 0x10000;
            }

            let end = offset
                .checked_add(size)
                .filter(|&end| end <= base.len())
                .ok_or_else(|| {
                    StoreError::InvalidDelta(format!(
                        "copy {}+{} out of bounds for base of {}",
                        offset,
                        size,
                        base.len()
                    ))
                })?;
            if result.len() + size > result_size {
                return Err(StoreError::InvalidDelta("copy overflows result".to_string()));
            }
            result.extend_from_slice(&base[offset..end]);
        } else if cmd != 0 {
            let size = cmd as usize;
            if pos + size > delta.len() {
                return Err(StoreError::InvalidDelta(
                    "insert runs past end of delta".to_string(),
                ));
            }
            if result.len() + size > result_size {
                return Err(StoreError::InvalidDelta("insert overflows result".to_string()));
            }
            result.extend_from_slice(&delta[pos..pos + size]);
            pos += size;
        } else {
            return Err(StoreError::InvalidDelta("reserved opcode 0".to_string()));
        }
    }

    if result.len() != result_size {
        return Err(StoreError::InvalidDelta(format!(
            "result size mismatch: expected {}, got {}",
            result_size,
            result.len()
        )));
    }

    Ok(result)
}

fn truncated() -> StoreError {
    StoreError::InvalidDelta("truncated copy instruction".to_string())
}

fn read_delta_size(data: &[u8]) -> Result<(usize, usize)> {
    let mut size: usize = 0;
    let mut shift = 0;
    let mut pos = 0;

    loop {
        let byte = *data
            .get(pos)
            .ok_or_else(|| StoreError::InvalidDelta("truncated size header".to_string()))?;
        pos += 1;
        if shift > 56 {
            return Err(StoreError::InvalidDelta("size header too long".to_string()));
        }
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            break;
        }
    }

    Ok((size, pos))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn encode_size(size: usize, out: &mut Vec<u8>) {
        let mut size = size;
        loop {
            let mut byte = (size & 0x7f) as u8;
            size >>= 7;
            if size > 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if size == 0 {
                break;
            }
        }
    }

    /// Delta that copies `base[..copy_len]` and appends `insert`.
    pub(crate) fn make_delta(base: &[u8], copy_len: usize, insert: &[u8]) -> Vec<u8> {
        let mut delta = Vec::new();
        encode_size(base.len(), &mut delta);
        encode_size(copy_len + insert.len(), &mut delta);
        if copy_len > 0 {
            delta.push(0x80 | 0x10 | 0x20);
            delta.push((copy_len & 0xff) as u8);
            delta.push(((copy_len >> 8) & 0xff) as u8);
        }
        for chunk in insert.chunks(0x7f) {
            delta.push(chunk.len() as u8);
            delta.extend_from_slice(chunk);
        }
        delta
    }

    #[test]
    fn test_copy_and_insert() {
        let base = b"hello world";
        let delta = make_delta(base, 6, b"rust");
        assert_eq!(apply_delta(base, &delta).unwrap(), b"hello rust");
    }

    #[test]
    fn test_copy_with_offset() {
        let base = b"0123456789";
        let mut delta = Vec::new();
        encode_size(base.len(), &mut delta);
        encode_size(3, &mut delta);
        delta.extend_from_slice(&[0x80 | 0x01 | 0x10, 4, 3]);
        assert_eq!(apply_delta(base, &delta).unwrap(), b"456");
    }

    #[test]
    fn test_copy_out_of_bounds() {
        let base = b"short";
        let mut delta = Vec::new();
        encode_size(base.len(), &mut delta);
        encode_size(10, &mut delta);
        delta.extend_from_slice(&[0x80 | 0x01 | 0x10, 2, 10]);
        assert!(matches!(
            apply_delta(base, &delta),
            Err(StoreError::InvalidDelta(_))
        ));
    }

    #[test]
    fn test_base_size_mismatch() {
        let delta = make_delta(b"abc", 3, b"");
        assert!(apply_delta(b"abcd", &delta).is_err());
    }

    #[test]
    fn test_truncated_insert() {
        let mut delta = Vec::new();
        encode_size(0, &mut delta);
        encode_size(5, &mut delta);
        delta.push(5);
        delta.extend_from_slice(b"ab");
        assert!(apply_delta(b"", &delta).is_err());
    }

    #[test]
    fn test_result_size_mismatch() {
        let mut delta = Vec::new();
        encode_size(0, &mut delta);
        encode_size(4, &mut delta);
        delta.push(2);
        delta.extend_from_slice(b"ab");
        assert!(apply_delta(b"", &delta).is_err());
    }

    #[test]
    fn test_huge_declared_result_rejected() {
        let mut delta = Vec::new();
        encode_size(0, &mut delta);
        encode_size((1usize << 53) - 1, &mut delta);
        delta.push(2);
        delta.extend_from_slice(b"ab");
        assert!(matches!(
            apply_delta(b"", &delta),
            Err(StoreError::InvalidDelta(_))
        ));
    }

    #[test]
    fn test_zero_opcode_rejected() {
        let mut delta = Vec::new();
        encode_size(0, &mut delta);
        encode_size(0, &mut delta);
        delta.push(0);
        assert!(apply_delta(b"", &delta).is_err());
    }

    #[test]
    fn test_truncated_copy_instruction() {
        let mut delta = Vec::new();
        encode_size(4, &mut delta);
        encode_size(4, &mut delta);
        delta.push(0x80 | 0x01 | 0x10);
        assert!(apply_delta(b"abcd", &delta).is_err());
    }
}
