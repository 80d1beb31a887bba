use std::collections::HashMap;

use crate::settings::settings;
use crate::unicode;

/// One key of a keyboard layout, in layout pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    pub code_point: u32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Key {
    pub fn new(code_point: u32, x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            code_point,
            x,
            y,
            width,
            height,
        }
    }

    fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Squared distance from a point to the nearest edge of the key (0 inside).
    fn squared_distance_to_edge(&self, px: i32, py: i32) -> i64 {
        let dx = (self.x - px).max(px - (self.x + self.width)).max(0) as i64;
        let dy = (self.y - py).max(py - (self.y + self.height)).max(0) as i64;
        dx * dx + dy * dy
    }
}

/// Keyboard geometry: which keys count as near misses for each other.
///
/// A key B is a neighbour of key A when the distance from A's centre to B's
/// nearest edge is below `threshold_ratio` times the most common key width.
/// Neighbour lists are ordered nearest first.
#[derive(Debug, Clone)]
pub struct ProximityInfo {
    keys: Vec<Key>,
    neighbours: HashMap<u32, Vec<u32>>,
    most_common_key_width: i32,
}

impl ProximityInfo {
    pub fn new(keys: Vec<Key>) -> Self {
        Self::with_threshold_ratio(keys, settings().suggest.proximity_threshold_ratio)
    }

    pub fn with_threshold_ratio(keys: Vec<Key>, threshold_ratio: f64) -> Self {
        let most_common_key_width = most_common_width(&keys);
        let threshold = (most_common_key_width as f64 * threshold_ratio) as i64;
        let threshold_sq = threshold * threshold;
        let mut neighbours = HashMap::new();
        for key in &keys {
            let (cx, cy) = key.center();
            let mut near: Vec<(i64, u32)> = keys
                .iter()
                .filter(|other| other.code_point != key.code_point)
                .map(|other| (other.squared_distance_to_edge(cx, cy), other.code_point))
                .filter(|&(d, _)| d < threshold_sq)
                .collect();
            near.sort_unstable();
            neighbours.insert(key.code_point, near.into_iter().map(|(_, c)| c).collect());
        }
        Self {
            keys,
            neighbours,
            most_common_key_width,
        }
    }

    /// A QWERTY letter layout with 100x150 keys, rows offset by half a key.
    pub fn qwerty() -> Self {
        const ROWS: [(&str, i32); 3] = [("qwertyuiop", 0), ("asdfghjkl", 50), ("zxcvbnm", 150)];
        let mut keys = Vec::new();
        for (row, (letters, offset)) in ROWS.iter().enumerate() {
            for (i, c) in letters.chars().enumerate() {
                keys.push(Key::new(c as u32, offset + i as i32 * 100, row as i32 * 150, 100, 150));
            }
        }
        Self::new(keys)
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn most_common_key_width(&self) -> i32 {
        self.most_common_key_width
    }

    pub fn has_key(&self, code_point: u32) -> bool {
        self.neighbours.contains_key(&unicode::to_base_lower_case(code_point))
    }

    /// Keys near the key for `code_point`, nearest first. Empty for code
    /// points that are not on the layout.
    pub fn neighbours(&self, code_point: u32) -> &[u32] {
        self.neighbours
            .get(&unicode::to_base_lower_case(code_point))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_neighbour(&self, a: u32, b: u32) -> bool {
        self.neighbours(a).contains(&unicode::to_base_lower_case(b))
    }

    /// The key under (or nearest to) a touch point.
    pub fn nearest_key(&self, x: i32, y: i32) -> Option<u32> {
        self.keys
            .iter()
            .min_by_key(|k| k.squared_distance_to_edge(x, y))
            .map(|k| k.code_point)
    }
}

fn most_common_width(keys: &[Key]) -> i32 {
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for key in keys {
        *counts.entry(key.width).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|&(width, count)| (count, width))
        .map_or(0, |(width, _)| width)
}
