//! Big-endian field codec shared by the header, trie and list formats.

use super::DictError;

pub(crate) const CHARACTER_TERMINATOR: u8 = 0x1F;
const MIN_SINGLE_BYTE_CODE_POINT: u32 = 0x20;
const MAX_SINGLE_BYTE_CODE_POINT: u32 = 0x7E;
const MAX_CODE_POINT: u32 = 0x10_FFFF;

pub(crate) const SIGNED_OFFSET_SIZE: usize = 3;
const SIGNED_OFFSET_NEGATIVE_FLAG: u32 = 0x80_0000;
const MAX_OFFSET_MAGNITUDE: usize = 0x7F_FFFF;

pub(crate) fn read_u8(data: &[u8], pos: &mut usize) -> Result<u8, DictError> {
    let b = *data.get(*pos).ok_or(DictError::Truncated {
        pos: *pos,
        len: data.len(),
    })?;
    *pos += 1;
    Ok(b)
}

pub(crate) fn read_uint(data: &[u8], pos: &mut usize, width: usize) -> Result<u32, DictError> {
    debug_assert!((1..=4).contains(&width));
    let end = *pos + width;
    let bytes = data.get(*pos..end).ok_or(DictError::Truncated {
        pos: *pos,
        len: data.len(),
    })?;
    let value = bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
    *pos = end;
    Ok(value)
}

pub(crate) fn write_uint(
    data: &mut [u8],
    pos: &mut usize,
    value: u32,
    width: usize,
) -> Result<(), DictError> {
    let len = data.len();
    let end = *pos + width;
    let slot = data
        .get_mut(*pos..end)
        .ok_or(DictError::Truncated { pos: *pos, len })?;
    for (i, b) in slot.iter_mut().enumerate() {
        *b = (value >> (8 * (width - 1 - i))) as u8;
    }
    *pos = end;
    Ok(())
}

pub(crate) fn push_uint(out: &mut Vec<u8>, value: u32, width: usize) {
    for i in (0..width).rev() {
        out.push((value >> (8 * i)) as u8);
    }
}

/// Bytes needed to hold `value` as an unsigned offset (1..=3).
pub(crate) fn unsigned_width(value: usize) -> usize {
    match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        _ => 3,
    }
}

/// Encode `target` relative to `field_pos` as a sign-magnitude 24-bit value.
/// `None` encodes as 0.
pub(crate) fn encode_offset(field_pos: usize, target: Option<usize>) -> Result<u32, DictError> {
    let Some(target) = target else {
        return Ok(0);
    };
    let (magnitude, negative) = if target >= field_pos {
        (target - field_pos, false)
    } else {
        (field_pos - target, true)
    };
    if magnitude == 0 {
        return Err(DictError::Malformed(format!(
            "self-referencing offset at {field_pos}"
        )));
    }
    if magnitude > MAX_OFFSET_MAGNITUDE {
        return Err(DictError::CapacityExceeded("relative offset"));
    }
    let mut raw = magnitude as u32;
    if negative {
        raw |= SIGNED_OFFSET_NEGATIVE_FLAG;
    }
    Ok(raw)
}

/// Inverse of [`encode_offset`].
pub(crate) fn decode_offset(field_pos: usize, raw: u32) -> Result<Option<usize>, DictError> {
    let magnitude = (raw & !SIGNED_OFFSET_NEGATIVE_FLAG) as usize;
    if magnitude == 0 {
        return Ok(None);
    }
    if raw & SIGNED_OFFSET_NEGATIVE_FLAG != 0 {
        field_pos
            .checked_sub(magnitude)
            .map(Some)
            .ok_or_else(|| DictError::Malformed(format!("offset before start at {field_pos}")))
    } else {
        Ok(Some(field_pos + magnitude))
    }
}

pub(crate) fn code_point_size(code_point: u32) -> usize {
    if (MIN_SINGLE_BYTE_CODE_POINT..=MAX_SINGLE_BYTE_CODE_POINT).contains(&code_point) {
        1
    } else {
        3
    }
}

pub(crate) fn code_points_size(code_points: &[u32], terminated: bool) -> usize {
    let body: usize = code_points.iter().map(|&c| code_point_size(c)).sum();
    body + usize::from(terminated)
}

pub(crate) fn push_code_point(out: &mut Vec<u8>, code_point: u32) {
    if code_point_size(code_point) == 1 {
        out.push(code_point as u8);
    } else {
        push_uint(out, code_point, 3);
    }
}

pub(crate) fn push_code_points(out: &mut Vec<u8>, code_points: &[u32], terminate: bool) {
    for &c in code_points {
        push_code_point(out, c);
    }
    if terminate {
        out.push(CHARACTER_TERMINATOR);
    }
}

/// Read one code point; `None` when the terminator is found.
pub(crate) fn read_code_point(data: &[u8], pos: &mut usize) -> Result<Option<u32>, DictError> {
    let first = read_u8(data, pos)?;
    if first == CHARACTER_TERMINATOR {
        return Ok(None);
    }
    if (first as u32) >= MIN_SINGLE_BYTE_CODE_POINT {
        return Ok(Some(first as u32));
    }
    let rest = read_uint(data, pos, 2)?;
    let code_point = ((first as u32) << 16) | rest;
    if code_point > MAX_CODE_POINT {
        return Err(DictError::Malformed(format!(
            "invalid code point {code_point:#x}"
        )));
    }
    Ok(Some(code_point))
}

pub(crate) fn read_terminated_code_points(
    data: &[u8],
    pos: &mut usize,
    max_len: usize,
) -> Result<Vec<u32>, DictError> {
    let mut out = Vec::new();
    while let Some(c) = read_code_point(data, pos)? {
        if out.len() >= max_len {
            return Err(DictError::Malformed(format!(
                "code point sequence longer than {max_len}"
            )));
        }
        out.push(c);
    }
    Ok(out)
}

pub(crate) fn to_code_points(s: &str) -> Vec<u32> {
    s.chars().map(|c| c as u32).collect()
}

pub(crate) fn to_string(code_points: &[u32]) -> String {
    code_points
        .iter()
        .map(|&c| char::from_u32(c).unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_round_trip_all_widths() {
        let mut out = Vec::new();
        push_uint(&mut out, 0xAB, 1);
        push_uint(&mut out, 0xABCD, 2);
        push_uint(&mut out, 0xABCDEF, 3);
        let mut pos = 0;
        assert_eq!(read_uint(&out, &mut pos, 1).unwrap(), 0xAB);
        assert_eq!(read_uint(&out, &mut pos, 2).unwrap(), 0xABCD);
        assert_eq!(read_uint(&out, &mut pos, 3).unwrap(), 0xABCDEF);
        assert_eq!(pos, 6);
    }

    #[test]
    fn truncated_read_fails() {
        let mut pos = 1;
        let err = read_uint(&[0, 1], &mut pos, 3).unwrap_err();
        assert!(matches!(err, DictError::Truncated { pos: 1, len: 2 }));
    }

    #[test]
    fn offsets_are_relative_and_signed() {
        let fwd = encode_offset(100, Some(130)).unwrap();
        assert_eq!(decode_offset(100, fwd).unwrap(), Some(130));
        let back = encode_offset(100, Some(40)).unwrap();
        assert_eq!(back & 0x80_0000, 0x80_0000);
        assert_eq!(decode_offset(100, back).unwrap(), Some(40));
        assert_eq!(encode_offset(100, None).unwrap(), 0);
        assert_eq!(decode_offset(100, 0).unwrap(), None);
    }

    #[test]
    fn offset_overflow_is_capacity_error() {
        let err = encode_offset(0, Some(0x80_0000)).unwrap_err();
        assert!(matches!(err, DictError::CapacityExceeded(_)));
    }

    #[test]
    fn ascii_is_single_byte_others_escape() {
        let mut out = Vec::new();
        push_code_points(&mut out, &['a' as u32, 'é' as u32, 0x1F600, '\n' as u32], true);
        assert_eq!(out.len(), 1 + 3 + 3 + 3 + 1);
        let mut pos = 0;
        let cps = read_terminated_code_points(&out, &mut pos, 48).unwrap();
        assert_eq!(cps, vec!['a' as u32, 'é' as u32, 0x1F600, '\n' as u32]);
        assert_eq!(pos, out.len());
    }

    #[test]
    fn invalid_code_point_is_rejected() {
        let mut pos = 0;
        assert!(read_code_point(&[0x11, 0x00, 0x00], &mut pos).is_err());
    }
}
