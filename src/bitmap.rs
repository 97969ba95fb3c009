//! Compressed series ID sets.
//!
//! Every set of series IDs in the index is a roaring bitmap: sorted, deduplicating, cheap to union
//! and to iterate. The encode/decode helpers wrap the portable roaring format with a CRC32 so a
//! torn or bit-flipped payload is detected instead of silently decoded.

use crate::error::IndexError;
use crc32fast::Hasher as Crc32;
use roaring::RoaringBitmap;

/// Sorted, compressed set of series IDs.
pub type SeriesIdBitmap = RoaringBitmap;

/// Unions every bitmap yielded by `bitmaps` into a fresh bitmap.
pub fn union_all<'a, I>(bitmaps: I) -> SeriesIdBitmap
where
    I: IntoIterator<Item = &'a SeriesIdBitmap>,
{
    let mut out = SeriesIdBitmap::new();
    for b in bitmaps {
        out |= b;
    }
    out
}

/// Encodes a bitmap as `len (u32 LE) | crc32 (u32 LE) | portable roaring bytes`.
pub fn encode_bitmap(bitmap: &SeriesIdBitmap) -> Result<Vec<u8>, IndexError> {
    let mut payload = Vec::with_capacity(bitmap.serialized_size());
    bitmap.serialize_into(&mut payload)?;
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| IndexError::Serialization("bitmap payload too large".to_string()))?;

    let mut h = Crc32::new();
    h.update(&payload);
    let crc = h.finalize();

    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decodes one bitmap written by [`encode_bitmap`] from the front of `buf`.
///
/// Returns the bitmap and the number of bytes consumed.
pub fn decode_bitmap(buf: &[u8]) -> Result<(SeriesIdBitmap, usize), IndexError> {
    if buf.len() < 8 {
        return Err(IndexError::Corruption {
            details: format!("bitmap header truncated ({} bytes)", buf.len()),
        });
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let expected_crc = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let end = 8usize
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| IndexError::Corruption {
            details: format!("bitmap payload truncated: need {} bytes, have {}", len, buf.len() - 8),
        })?;
    let payload = &buf[8..end];

    let mut h = Crc32::new();
    h.update(payload);
    if h.finalize() != expected_crc {
        return Err(IndexError::Corruption {
            details: "bitmap checksum mismatch".to_string(),
        });
    }

    let bitmap = SeriesIdBitmap::deserialize_from(payload)
        .map_err(|e| IndexError::Serialization(e.to_string()))?;
    Ok((bitmap, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(ids: &[u32]) -> SeriesIdBitmap {
        ids.iter().copied().collect()
    }

    #[test]
    fn union_all_merges_and_dedupes() {
        let a = bitmap(&[1, 2, 3]);
        let b = bitmap(&[3, 4]);
        let c = SeriesIdBitmap::new();
        let u = union_all([&a, &b, &c]);
        assert_eq!(u.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn union_all_of_nothing_is_empty() {
        let u = union_all(std::iter::empty::<&SeriesIdBitmap>());
        assert!(u.is_empty());
    }

    #[test]
    fn decode_reports_consumed_bytes() {
        let a = bitmap(&[10, 11, 70_000]);
        let mut buf = encode_bitmap(&a).unwrap();
        let first_len = buf.len();
        buf.extend_from_slice(&encode_bitmap(&bitmap(&[5])).unwrap());

        let (decoded, used) = decode_bitmap(&buf).unwrap();
        assert_eq!(decoded, a);
        assert_eq!(used, first_len);
        let (second, _) = decode_bitmap(&buf[used..]).unwrap();
        assert_eq!(second, bitmap(&[5]));
    }

    #[test]
    fn decode_detects_flipped_byte() {
        let mut buf = encode_bitmap(&bitmap(&[1, 2, 3, 1_000_000])).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert!(matches!(
            decode_bitmap(&buf),
            Err(IndexError::Corruption { .. })
        ));
    }

    #[test]
    fn decode_detects_truncation() {
        let buf = encode_bitmap(&bitmap(&[1, 2, 3])).unwrap();
        assert!(matches!(
            decode_bitmap(&buf[..buf.len() - 1]),
            Err(IndexError::Corruption { .. })
        ));
        assert!(matches!(
            decode_bitmap(&buf[..4]),
            Err(IndexError::Corruption { .. })
        ));
    }
}
