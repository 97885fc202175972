//! Binary wire formats.
//!
//! Two little blobs cross process boundaries verbatim and therefore have
//! hand-specified little-endian layouts: the slot-range array attached to
//! a shard-dispatched subplan, and the per-key doc-id meta array.

use crate::error::{QueryError, QueryResult};

/// Inclusive hash-slot range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

/// `u32 num_ranges` LE, then `num_ranges × (u16 start, u16 end)` LE,
/// both ends inclusive.
pub fn serialize_slot_ranges(ranges: &[SlotRange]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + ranges.len() * 4);
    out.extend_from_slice(&(ranges.len() as u32).to_le_bytes());
    for range in ranges {
        out.extend_from_slice(&range.start.to_le_bytes());
        out.extend_from_slice(&range.end.to_le_bytes());
    }
    out
}

/// Inverse of [`serialize_slot_ranges`]. Rejects any buffer whose size
/// does not equal `4 + 4·num_ranges` exactly.
pub fn deserialize_slot_ranges(buf: &[u8]) -> QueryResult<Vec<SlotRange>> {
    if buf.len() < 4 {
        return Err(QueryError::BadValue(
            "slot range buffer shorter than its header".to_string(),
        ));
    }
    let count = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let want = 4 + count * 4;
    if buf.len() != want {
        return Err(QueryError::BadValue(format!(
            "slot range buffer is {} bytes, expected {want}",
            buf.len()
        )));
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let base = 4 + i * 4;
        out.push(SlotRange {
            start: u16::from_le_bytes([buf[base], buf[base + 1]]),
            end: u16::from_le_bytes([buf[base + 2], buf[base + 3]]),
        });
    }
    Ok(out)
}

/// `u64 size` LE, then `size × u64 docId` LE. Id `0` is the invalid/empty
/// sentinel and is persisted as-is.
pub fn serialize_doc_ids(ids: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + ids.len() * 8);
    out.extend_from_slice(&(ids.len() as u64).to_le_bytes());
    for id in ids {
        out.extend_from_slice(&id.to_le_bytes());
    }
    out
}

/// Inverse of [`serialize_doc_ids`], with the same exact-size check.
pub fn deserialize_doc_ids(buf: &[u8]) -> QueryResult<Vec<u64>> {
    if buf.len() < 8 {
        return Err(QueryError::BadValue(
            "doc id buffer shorter than its header".to_string(),
        ));
    }
    let mut header = [0u8; 8];
    header.copy_from_slice(&buf[..8]);
    let count = u64::from_le_bytes(header) as usize;
    let want = 8 + count * 8;
    if buf.len() != want {
        return Err(QueryError::BadValue(format!(
            "doc id buffer is {} bytes, expected {want}",
            buf.len()
        )));
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let base = 8 + i * 8;
        let mut word = [0u8; 8];
        word.copy_from_slice(&buf[base..base + 8]);
        out.push(u64::from_le_bytes(word));
    }
    Ok(out)
}
