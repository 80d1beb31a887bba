//! Bigram list codec for versions 2 and 3.
//!
//! v2 entries: flags (0x80 has-next, 0x40 negative offset, 0x30 offset width,
//! 0x0F encoded probability) then an unsigned offset relative to the offset
//! field. The list ends at the first entry without has-next.
//!
//! v3 entries: flags (0x80 has-next, 0x40 deleted, 0x0F encoded probability)
//! then a 3-byte signed offset. Each chunk ends with a 3-byte forward link to
//! the next chunk, so new entries are appended without moving old ones.

use super::buffer::ExtendableBuffer;
use super::byte_utils::{self, SIGNED_OFFSET_SIZE};
use super::DictError;

const FLAG_HAS_NEXT: u8 = 0x80;
const FLAG_OFFSET_NEGATIVE: u8 = 0x40;
const MASK_OFFSET_WIDTH: u8 = 0x30;
const FLAG_DELETED: u8 = 0x40;
const MASK_PROBABILITY: u8 = 0x0F;

/// Chunks followed before the chain is treated as corrupt.
const MAX_CHUNK_COUNT: usize = 0x1_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawBigram {
    pub(crate) flags_pos: usize,
    /// Position as stored; may be a moved node.
    pub(crate) target_pos: usize,
    pub(crate) probability: u8,
    pub(crate) deleted: bool,
}

/// Size of the v2 list at `pos`.
pub(crate) fn static_list_size(buffer: &ExtendableBuffer, pos: usize) -> Result<usize, DictError> {
    let mut p = pos;
    loop {
        let flags = buffer.read_u8(&mut p)?;
        p += static_offset_width(flags, p)?;
        if flags & FLAG_HAS_NEXT == 0 {
            return Ok(p - pos);
        }
    }
}

fn static_offset_width(flags: u8, field_pos: usize) -> Result<usize, DictError> {
    match (flags & MASK_OFFSET_WIDTH) >> 4 {
        0 => Err(DictError::Malformed(format!(
            "bigram entry without offset at {field_pos}"
        ))),
        w => Ok(w as usize),
    }
}

pub(crate) fn read_static(buffer: &ExtendableBuffer, pos: usize) -> Result<Vec<RawBigram>, DictError> {
    let mut out = Vec::new();
    let mut p = pos;
    loop {
        let flags_pos = p;
        let flags = buffer.read_u8(&mut p)?;
        let width = static_offset_width(flags, p)?;
        let field_pos = p;
        let magnitude = buffer.read_uint(&mut p, width)? as usize;
        let target_pos = if flags & FLAG_OFFSET_NEGATIVE != 0 {
            field_pos.checked_sub(magnitude).ok_or_else(|| {
                DictError::Malformed(format!("bigram target before start at {field_pos}"))
            })?
        } else {
            field_pos + magnitude
        };
        out.push(RawBigram {
            flags_pos,
            target_pos,
            probability: flags & MASK_PROBABILITY,
            deleted: false,
        });
        if flags & FLAG_HAS_NEXT == 0 {
            return Ok(out);
        }
    }
}

/// Encode a v2 list to be placed at `list_pos`.
pub(crate) fn encode_static(list_pos: usize, entries: &[(usize, u8)]) -> Result<Vec<u8>, DictError> {
    let mut out = Vec::new();
    for (i, &(target, probability)) in entries.iter().enumerate() {
        let field_pos = list_pos + out.len() + 1;
        let (magnitude, negative) = if target >= field_pos {
            (target - field_pos, false)
        } else {
            (field_pos - target, true)
        };
        if magnitude > 0xFF_FFFF {
            return Err(DictError::CapacityExceeded("bigram offset"));
        }
        let width = byte_utils::unsigned_width(magnitude);
        let mut flags = (width as u8) << 4 | (probability & MASK_PROBABILITY);
        if negative {
            flags |= FLAG_OFFSET_NEGATIVE;
        }
        if i + 1 < entries.len() {
            flags |= FLAG_HAS_NEXT;
        }
        out.push(flags);
        byte_utils::push_uint(&mut out, magnitude as u32, width);
    }
    Ok(out)
}

/// Every entry of a v3 chain plus the link field that ends it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DynamicBigramList {
    pub(crate) entries: Vec<RawBigram>,
    pub(crate) tail_link_field: usize,
}

pub(crate) fn read_dynamic(buffer: &ExtendableBuffer, pos: usize) -> Result<DynamicBigramList, DictError> {
    let mut entries = Vec::new();
    let mut chunk = pos;
    for _ in 0..MAX_CHUNK_COUNT {
        let mut p = chunk;
        loop {
            let flags_pos = p;
            let flags = buffer.read_u8(&mut p)?;
            let target_pos = buffer.read_offset(&mut p)?.ok_or_else(|| {
                DictError::Malformed(format!("bigram entry without target at {flags_pos}"))
            })?;
            entries.push(RawBigram {
                flags_pos,
                target_pos,
                probability: flags & MASK_PROBABILITY,
                deleted: flags & FLAG_DELETED != 0,
            });
            if flags & FLAG_HAS_NEXT == 0 {
                break;
            }
        }
        let link_field = p;
        match buffer.read_offset(&mut p)? {
            Some(next) => chunk = next,
            None => {
                return Ok(DynamicBigramList {
                    entries,
                    tail_link_field: link_field,
                })
            }
        }
    }
    Err(DictError::Malformed(format!("bigram chunk cycle from {pos}")))
}

pub(crate) fn dynamic_flags(has_next: bool, deleted: bool, probability: u8) -> u8 {
    let mut flags = probability & MASK_PROBABILITY;
    if has_next {
        flags |= FLAG_HAS_NEXT;
    }
    if deleted {
        flags |= FLAG_DELETED;
    }
    flags
}

/// Flags byte of an existing entry with new deleted/probability bits.
pub(crate) fn rewrite_dynamic_flags(old: u8, deleted: bool, probability: u8) -> u8 {
    dynamic_flags(old & FLAG_HAS_NEXT != 0, deleted, probability)
}

/// Encode a v3 chunk to be placed at `chunk_pos`, terminated by a null link.
pub(crate) fn encode_dynamic_chunk(
    chunk_pos: usize,
    entries: &[(usize, u8)],
) -> Result<Vec<u8>, DictError> {
    if entries.is_empty() {
        return Err(DictError::Malformed("empty bigram chunk".into()));
    }
    let mut out = Vec::with_capacity(entries.len() * (1 + SIGNED_OFFSET_SIZE) + SIGNED_OFFSET_SIZE);
    for (i, &(target, probability)) in entries.iter().enumerate() {
        out.push(dynamic_flags(i + 1 < entries.len(), false, probability));
        let raw = byte_utils::encode_offset(chunk_pos + out.len(), Some(target))?;
        byte_utils::push_uint(&mut out, raw, SIGNED_OFFSET_SIZE);
    }
    byte_utils::push_uint(&mut out, 0, SIGNED_OFFSET_SIZE);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_list_round_trip_both_directions() {
        let mut bytes = vec![0u8; 300];
        let list = encode_static(200, &[(10, 3), (290, 15), (200, 0)]).unwrap();
        bytes[200..200 + list.len()].copy_from_slice(&list);
        let buf = ExtendableBuffer::owned(bytes, false);
        assert_eq!(static_list_size(&buf, 200).unwrap(), list.len());
        let read = read_static(&buf, 200).unwrap();
        let pairs: Vec<_> = read.iter().map(|b| (b.target_pos, b.probability)).collect();
        assert_eq!(pairs, vec![(10, 3), (290, 15), (200, 0)]);
    }

    #[test]
    fn dynamic_chunks_chain() {
        let mut buf = ExtendableBuffer::owned(vec![0u8; 16], true);
        let first = encode_dynamic_chunk(16, &[(2, 5), (4, 6)]).unwrap();
        buf.append(&first).unwrap();
        let list = read_dynamic(&buf, 16).unwrap();
        assert_eq!(list.entries.len(), 2);

        let second_pos = buf.tail_position();
        let second = encode_dynamic_chunk(second_pos, &[(8, 1)]).unwrap();
        buf.append(&second).unwrap();
        let mut link = list.tail_link_field;
        buf.write_offset(&mut link, Some(second_pos)).unwrap();

        let list = read_dynamic(&buf, 16).unwrap();
        let targets: Vec<_> = list.entries.iter().map(|b| b.target_pos).collect();
        assert_eq!(targets, vec![2, 4, 8]);
        assert_eq!(list.tail_link_field, second_pos + 4);
    }

    #[test]
    fn deleted_flag_survives_rewrite() {
        let flags = dynamic_flags(true, false, 9);
        let deleted = rewrite_dynamic_flags(flags, true, 9);
        assert_eq!(deleted & FLAG_HAS_NEXT, FLAG_HAS_NEXT);
        assert_eq!(deleted & FLAG_DELETED, FLAG_DELETED);
        assert_eq!(deleted & MASK_PROBABILITY, 9);
    }
}
