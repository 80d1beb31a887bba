use std::collections::HashMap;

use tracing::{debug, warn};

use super::bloom::BloomFilter;
use crate::dict::{to_code_points, DictError, Dictionary, PtNodeParams};
use crate::probability;
use crate::settings::settings;

/// Bigram probabilities of one source word, keyed by target position.
struct BigramMap {
    filter: BloomFilter,
    probabilities: HashMap<usize, i32>,
}

impl BigramMap {
    fn load(dict: &Dictionary, source: &PtNodeParams, now: u32) -> Result<Self, DictError> {
        let mut map = Self {
            filter: BloomFilter::new(),
            probabilities: HashMap::new(),
        };
        for (target, p) in dict.scored_bigrams(source, now)? {
            map.filter.set_in_filter(target.head_pos);
            map.probabilities.insert(target.head_pos, p);
        }
        Ok(map)
    }

    fn get(&self, target_pos: usize) -> Option<i32> {
        if !self.filter.is_in_filter(target_pos) {
            return None;
        }
        self.probabilities.get(&target_pos).copied()
    }
}

/// Lazily built per-source bigram maps for scoring many candidates against
/// the same context words.
///
/// Positions are only meaningful for the dictionary state the map was filled
/// from; call [`clear`](MultiBigramMap::clear) after any mutation or GC.
/// Once `capacity` sources are cached, further sources are answered by
/// scanning their bigram lists directly.
pub struct MultiBigramMap {
    maps: HashMap<usize, BigramMap>,
    capacity: usize,
}

impl Default for MultiBigramMap {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiBigramMap {
    pub fn new() -> Self {
        Self::with_capacity(settings().suggest.max_cached_prev_words)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            maps: HashMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn clear(&mut self) {
        self.maps.clear();
    }

    /// Probability of `target_pos` after `source`, backing off to the
    /// target's unigram probability when there is no bigram.
    pub(crate) fn probability(
        &mut self,
        dict: &Dictionary,
        source: &PtNodeParams,
        target_pos: usize,
        unigram: i32,
        now: u32,
    ) -> Result<i32, DictError> {
        if let Some(map) = self.maps.get(&source.head_pos) {
            return Ok(map.get(target_pos).unwrap_or_else(|| probability::backoff(unigram)));
        }
        if self.maps.len() < self.capacity {
            let map = BigramMap::load(dict, source, now)?;
            let p = map.get(target_pos).unwrap_or_else(|| probability::backoff(unigram));
            self.maps.insert(source.head_pos, map);
            return Ok(p);
        }
        debug!(source = source.head_pos, "bigram cache full, scanning list");
        let found = dict
            .scored_bigrams(source, now)?
            .into_iter()
            .find(|(node, _)| node.head_pos == target_pos)
            .map(|(_, p)| p);
        Ok(found.unwrap_or_else(|| probability::backoff(unigram)))
    }

    /// Word-level form of the cached lookup. `None` when either word is
    /// missing or not a usable word.
    pub fn bigram_probability(&mut self, dict: &Dictionary, word0: &str, word1: &str) -> Option<i32> {
        let now = dict.now();
        let result = (|| -> Result<Option<i32>, DictError> {
            let source = dict.find_word_node(&to_code_points(word0))?;
            let target = dict.find_word_node(&to_code_points(word1))?;
            let (Some(source), Some(target)) = (source, target) else {
                return Ok(None);
            };
            let Some(unigram) = dict.usable_probability(&target, now)? else {
                return Ok(None);
            };
            self.probability(dict, &source, target.head_pos, unigram, now)
                .map(Some)
        })();
        result.unwrap_or_else(|e| {
            warn!(error = %e, "bigram cache lookup failed");
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::{FormatVersion, HeaderPolicy};

    fn sample() -> Dictionary {
        let mut dict = Dictionary::create_empty(HeaderPolicy::new(FormatVersion::DynamicV3)).unwrap();
        for (w, p) in [("the", 200), ("cat", 80), ("dog", 70), ("sat", 60), ("ran", 50)] {
            dict.add_unigram_word(w, p).unwrap();
        }
        dict.add_bigram_words("the", "cat", 220).unwrap();
        dict.add_bigram_words("cat", "sat", 200).unwrap();
        dict.add_bigram_words("dog", "ran", 200).unwrap();
        dict
    }

    #[test]
    fn cached_and_direct_answers_agree() {
        let dict = sample();
        let mut cached = MultiBigramMap::with_capacity(8);
        let mut direct = MultiBigramMap::with_capacity(0);
        for (a, b) in [("the", "cat"), ("the", "dog"), ("cat", "sat"), ("dog", "ran"), ("dog", "sat")] {
            assert_eq!(
                cached.bigram_probability(&dict, a, b),
                direct.bigram_probability(&dict, a, b),
                "{a} {b}"
            );
        }
        assert!(direct.is_empty());
        assert_eq!(cached.len(), 3);
    }

    #[test]
    fn missing_bigram_backs_off_to_unigram() {
        let dict = sample();
        let mut map = MultiBigramMap::with_capacity(2);
        assert_eq!(map.bigram_probability(&dict, "the", "dog"), Some(70));
        assert!(map.bigram_probability(&dict, "the", "cat").unwrap() > 80);
        assert_eq!(map.bigram_probability(&dict, "the", "bird"), None);
    }

    #[test]
    fn capacity_bounds_cached_sources() {
        let dict = sample();
        let mut map = MultiBigramMap::with_capacity(1);
        map.bigram_probability(&dict, "the", "cat");
        let p = map.bigram_probability(&dict, "cat", "sat").unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(Some(p), dict.get_bigram_probability("cat", "sat"));
    }
}
