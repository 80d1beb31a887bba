//! Shortcut lists: words offered in place of (or next to) the typed word.
//!
//! Entry: flags (0x80 has-next, low nibble probability) followed by the target
//! code points terminated by 0x1F. Version 2 prefixes the list with its total
//! size (2 bytes, prefix included); version 3 lists carry no prefix and are
//! never modified after being written.

use serde::{Deserialize, Serialize};

use super::buffer::ExtendableBuffer;
use super::byte_utils;
use super::{DictError, MAX_WORD_LENGTH};

const FLAG_HAS_NEXT: u8 = 0x80;
const MASK_PROBABILITY: u8 = 0x0F;
const SIZE_PREFIX_SIZE: usize = 2;

/// Shortcut probability that marks a whitelist entry.
pub const WHITELIST_SHORTCUT_PROBABILITY: u8 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShortcutTarget {
    pub target: String,
    /// 0..=15; 15 marks a whitelist replacement.
    pub probability: u8,
}

impl ShortcutTarget {
    pub fn new(target: impl Into<String>, probability: u8) -> Self {
        Self {
            target: target.into(),
            probability: probability.min(WHITELIST_SHORTCUT_PROBABILITY),
        }
    }

    pub fn is_whitelist(&self) -> bool {
        self.probability == WHITELIST_SHORTCUT_PROBABILITY
    }
}

/// Size in bytes of the v2 list starting at `pos`, prefix included.
pub(crate) fn static_list_size(buffer: &ExtendableBuffer, pos: usize) -> Result<usize, DictError> {
    let mut p = pos;
    let size = buffer.read_uint(&mut p, SIZE_PREFIX_SIZE)? as usize;
    if size < SIZE_PREFIX_SIZE {
        return Err(DictError::Malformed(format!(
            "shortcut list at {pos} has size {size}"
        )));
    }
    Ok(size)
}

fn read_entries(buffer: &ExtendableBuffer, mut pos: usize) -> Result<Vec<ShortcutTarget>, DictError> {
    let mut out = Vec::new();
    loop {
        let flags = buffer.read_u8(&mut pos)?;
        let mut code_points = Vec::new();
        while let Some(c) = buffer.read_code_point(&mut pos)? {
            if code_points.len() >= MAX_WORD_LENGTH {
                return Err(DictError::Malformed("shortcut target too long".into()));
            }
            code_points.push(c);
        }
        out.push(ShortcutTarget {
            target: byte_utils::to_string(&code_points),
            probability: flags & MASK_PROBABILITY,
        });
        if flags & FLAG_HAS_NEXT == 0 {
            return Ok(out);
        }
    }
}

pub(crate) fn read_static(buffer: &ExtendableBuffer, pos: usize) -> Result<Vec<ShortcutTarget>, DictError> {
    static_list_size(buffer, pos)?;
    read_entries(buffer, pos + SIZE_PREFIX_SIZE)
}

pub(crate) fn read_dynamic(buffer: &ExtendableBuffer, pos: usize) -> Result<Vec<ShortcutTarget>, DictError> {
    read_entries(buffer, pos)
}

/// Encode a non-empty list, with the v2 size prefix when requested.
pub(crate) fn encode(targets: &[ShortcutTarget], with_size_prefix: bool) -> Result<Vec<u8>, DictError> {
    if targets.is_empty() {
        return Err(DictError::Malformed("empty shortcut list".into()));
    }
    let mut out = Vec::new();
    if with_size_prefix {
        out.extend_from_slice(&[0; SIZE_PREFIX_SIZE]);
    }
    for (i, t) in targets.iter().enumerate() {
        let code_points = byte_utils::to_code_points(&t.target);
        if code_points.is_empty() || code_points.len() > MAX_WORD_LENGTH {
            return Err(DictError::InvalidWord(t.target.clone()));
        }
        let mut flags = t.probability & MASK_PROBABILITY;
        if i + 1 < targets.len() {
            flags |= FLAG_HAS_NEXT;
        }
        out.push(flags);
        byte_utils::push_code_points(&mut out, &code_points, true);
    }
    if with_size_prefix {
        let size = out.len();
        if size > 0xFFFF {
            return Err(DictError::CapacityExceeded("shortcut list"));
        }
        let mut p = 0;
        byte_utils::write_uint(&mut out, &mut p, size as u32, SIZE_PREFIX_SIZE)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets() -> Vec<ShortcutTarget> {
        vec![
            ShortcutTarget::new("thank you", 10),
            ShortcutTarget::new("thanks", WHITELIST_SHORTCUT_PROBABILITY),
        ]
    }

    #[test]
    fn static_list_round_trip() {
        let bytes = encode(&targets(), true).unwrap();
        let buf = ExtendableBuffer::owned(bytes.clone(), false);
        assert_eq!(static_list_size(&buf, 0).unwrap(), bytes.len());
        assert_eq!(read_static(&buf, 0).unwrap(), targets());
    }

    #[test]
    fn dynamic_list_round_trip() {
        let bytes = encode(&targets(), false).unwrap();
        let buf = ExtendableBuffer::owned(bytes, false);
        let read = read_dynamic(&buf, 0).unwrap();
        assert!(read[1].is_whitelist());
        assert!(!read[0].is_whitelist());
    }

    #[test]
    fn probability_is_clamped_to_nibble() {
        assert_eq!(ShortcutTarget::new("x", 200).probability, 15);
    }

    #[test]
    fn empty_list_is_rejected() {
        assert!(encode(&[], false).is_err());
    }
}
