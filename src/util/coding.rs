/// Encodes `n` into the first 4 bytes of `dst` in little-endian.
///
/// # Panics
///
/// Panics when `dst.len()` is less than 4.
pub fn encode_fixed_32(dst: &mut [u8], n: u32) {
    dst[..4].copy_from_slice(&n.to_le_bytes());
}

/// Encodes `n` into the first 8 bytes of `dst` in little-endian.
///
/// # Panics
///
/// Panics when `dst.len()` is less than 8.
pub fn encode_fixed_64(dst: &mut [u8], n: u64) {
    dst[..8].copy_from_slice(&n.to_le_bytes());
}

/// Appends `n` to `dst` as 4 little-endian bytes.
pub fn put_fixed_32(dst: &mut Vec<u8>, n: u32) {
    dst.extend_from_slice(&n.to_le_bytes());
}

/// Appends `n` to `dst` as 8 little-endian bytes.
pub fn put_fixed_64(dst: &mut Vec<u8>, n: u64) {
    dst.extend_from_slice(&n.to_le_bytes());
}

/// Decodes the first 4 bytes of `src` as a little-endian u32.
///
/// # Panics
///
/// Panics when `src.len()` is less than 4.
pub fn decode_fixed_32(src: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&src[..4]);
    u32::from_le_bytes(buf)
}

/// Decodes the first 8 bytes of `src` as a little-endian u64.
///
/// # Panics
///
/// Panics when `src.len()` is less than 8.
pub fn decode_fixed_64(src: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&src[..8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_32_round_trip() {
        let tests = vec![0u32, 1, 255, 256, 0xdead_beef, u32::max_value()];
        for n in tests {
            let mut buf = vec![];
            put_fixed_32(&mut buf, n);
            assert_eq!(buf.len(), 4);
            assert_eq!(n, decode_fixed_32(&buf));
        }
    }

    #[test]
    fn test_fixed_64_round_trip() {
        let tests = vec![0u64, 1, (1 << 32) - 1, 1 << 32, u64::max_value()];
        for n in tests {
            let mut buf = vec![];
            put_fixed_64(&mut buf, n);
            assert_eq!(buf.len(), 8);
            assert_eq!(n, decode_fixed_64(&buf));
        }
    }

    #[test]
    fn test_encode_into_prefix() {
        // The header codec encodes into the leading bytes of a larger buffer.
        let mut buf = [0u8; 7];
        encode_fixed_32(&mut buf, 0x0403_0201);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
        assert_eq!(&buf[4..], &[0, 0, 0]);
    }
}
