//! Code-point case folding used by lookup and proximity matching.

use unicode_normalization::char::{decompose_canonical, is_combining_mark};

/// Lower-case one code point. Characters whose lower case expands to more
/// than one char are returned unchanged.
pub fn to_lower_code_point(code_point: u32) -> u32 {
    let Some(c) = char::from_u32(code_point) else {
        return code_point;
    };
    if c.is_ascii() {
        return c.to_ascii_lowercase() as u32;
    }
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l as u32,
        _ => code_point,
    }
}

/// Lower-case with diacritics stripped: the canonical decomposition's base
/// character, lower-cased ("É" and "e" compare equal).
pub fn to_base_lower_case(code_point: u32) -> u32 {
    let Some(c) = char::from_u32(code_point) else {
        return code_point;
    };
    let mut base = None;
    decompose_canonical(c, |d| {
        if base.is_none() && !is_combining_mark(d) {
            base = Some(d);
        }
    });
    to_lower_code_point(base.unwrap_or(c) as u32)
}

pub fn to_lower_code_points(code_points: &[u32]) -> Vec<u32> {
    code_points.iter().map(|&c| to_lower_code_point(c)).collect()
}

pub fn is_upper_case(code_point: u32) -> bool {
    char::from_u32(code_point).map_or(false, char::is_uppercase)
}
