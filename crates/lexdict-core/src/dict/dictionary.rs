use std::fs::{self, File};
use std::path::Path;

use memmap2::{Mmap, MmapOptions};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, debug_span, warn};

use super::buffer::{ExtendableBuffer, OriginalRegion};
use super::byte_utils;
use super::content::ContentStore;
use super::gc::{self, GcStats};
use super::header::{FormatVersion, HeaderPolicy};
use super::pt_node::PtNodeParams;
use super::reading::{StoredBigram, StoredUnigram, TrieStructure, ROOT_POS};
use super::updating::{NewUnigram, UnigramOutcome};
use super::{BigramProperty, DictError, UnigramProperty, WordProperty, MAX_WORD_LENGTH};
use crate::probability::{self, forgetting_curve, NOT_A_PROBABILITY};
use crate::settings::settings;
use crate::unicode;

/// Bytes of headroom below the buffer limit at which GC is requested.
const BUFFER_SIZE_MARGIN: usize = 0x1_0000;

/// Current wall-clock time in seconds since the epoch.
pub fn now_epoch() -> u32 {
    let secs = OffsetDateTime::now_utc().unix_timestamp();
    secs.clamp(0, u32::MAX as i64) as u32
}

/// Counts and region sizes of an open dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DictStats {
    pub version: u16,
    pub is_updatable: bool,
    pub uses_forgetting_curve: bool,
    pub unigram_count: usize,
    pub bigram_count: usize,
    pub original_size: usize,
    pub additional_size: usize,
    pub terminal_ids: usize,
}

/// One live word, as yielded by [`Dictionary::words`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordEntry {
    pub word: String,
    pub probability: i32,
    pub is_not_a_word: bool,
    pub is_blacklisted: bool,
}

/// One child node as returned by [`Dictionary::get_all_child_nodes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtNodeView {
    pub position: usize,
    pub code_points: Vec<u32>,
    pub is_terminal: bool,
    pub probability: Option<i32>,
    pub has_children: bool,
}

/// Where the regions of a loaded file start and end.
struct BodyLayout {
    original_len: usize,
    additional_start: usize,
    trie_end: usize,
}

impl BodyLayout {
    fn of(header: &HeaderPolicy, header_size: usize, total: usize) -> Result<Self, DictError> {
        let body = total.saturating_sub(header_size);
        let trie_len = if header.version().has_content_store() {
            header.trie_size
        } else {
            body
        };
        if trie_len == 0 || trie_len > body {
            return Err(DictError::Truncated {
                pos: header_size.saturating_add(trie_len),
                len: total,
            });
        }
        let extended = header.extended_region_size;
        if extended > trie_len || (extended > 0 && !header.version().is_dynamic()) {
            return Err(DictError::Malformed(format!(
                "extended region of {extended} bytes in a {trie_len}-byte trie"
            )));
        }
        Ok(Self {
            original_len: trie_len - extended,
            additional_start: header_size + trie_len - extended,
            trie_end: header_size + trie_len,
        })
    }
}

fn checked_code_points(word: &str) -> Result<Vec<u32>, DictError> {
    let code_points = byte_utils::to_code_points(word);
    if code_points.is_empty() || code_points.len() > MAX_WORD_LENGTH {
        return Err(DictError::InvalidWord(word.to_string()));
    }
    Ok(code_points)
}

/// Both ends of a bigram, matched exactly.
fn bigram_endpoints(
    trie: &TrieStructure,
    source: &[u32],
    target: &[u32],
) -> Result<(PtNodeParams, PtNodeParams), DictError> {
    let find = |cps: &[u32]| {
        trie.find_terminal(cps)?
            .ok_or_else(|| DictError::WordNotFound(byte_utils::to_string(cps)))
    };
    Ok((find(source)?, find(target)?))
}

/// A loaded dictionary: header policy plus one trie structure variant.
///
/// Read methods degrade to `None`/empty results on a damaged buffer (the
/// failure is logged); mutations return the error and leave the buffer as it
/// was.
pub struct Dictionary {
    header: HeaderPolicy,
    trie: TrieStructure,
    fixed_time: Option<u32>,
}

impl Dictionary {
    /// Memory-map a dictionary file. Updatable opens use a private
    /// copy-on-write mapping, so the file itself only changes on [`flush`].
    ///
    /// [`flush`]: Dictionary::flush
    pub fn open(path: &Path, updatable: bool) -> Result<Self, DictError> {
        let _span = debug_span!("open", path = %path.display(), updatable).entered();
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(DictError::InvalidHeader);
        }
        // SAFETY: The mapping is read-only and held for the lifetime of the
        // dictionary. Flush replaces the file by rename and never writes into
        // a mapped file.
        let map = unsafe { Mmap::map(&file)? };
        let (header, header_size) = HeaderPolicy::read(&map)?;
        let layout = BodyLayout::of(&header, header_size, map.len())?;
        let content = if header.version().has_content_store() {
            ContentStore::from_frame(&map[layout.trie_end..])?
        } else {
            ContentStore::default()
        };
        let additional = map[layout.additional_start..layout.trie_end].to_vec();
        let updatable = updatable && header.supports_dynamic_update();

        let original = if updatable {
            drop(map);
            // SAFETY: A private copy-on-write mapping; writes stay in this
            // process and never reach the file.
            let map = unsafe { MmapOptions::new().map_copy(&file)? };
            if map.len() < layout.trie_end {
                return Err(DictError::Truncated {
                    pos: layout.trie_end,
                    len: map.len(),
                });
            }
            OriginalRegion::CopyOnWrite {
                map,
                start: header_size,
                len: layout.original_len,
            }
        } else {
            OriginalRegion::Mapped {
                map,
                start: header_size,
                len: layout.original_len,
            }
        };
        debug!(
            version = header.version().number(),
            original = layout.original_len,
            additional = additional.len(),
            "dictionary mapped"
        );
        let buffer = ExtendableBuffer::new(original, additional, updatable);
        Ok(Self {
            trie: TrieStructure::new(header.version(), buffer, content),
            header,
            fixed_time: None,
        })
    }

    /// Load a dictionary from an in-memory file image.
    pub fn from_bytes(bytes: Vec<u8>, updatable: bool) -> Result<Self, DictError> {
        let (header, header_size) = HeaderPolicy::read(&bytes)?;
        let layout = BodyLayout::of(&header, header_size, bytes.len())?;
        let content = if header.version().has_content_store() {
            ContentStore::from_frame(&bytes[layout.trie_end..])?
        } else {
            ContentStore::default()
        };
        let additional = bytes[layout.additional_start..layout.trie_end].to_vec();
        let original = bytes[header_size..layout.additional_start].to_vec();
        let updatable = updatable && header.supports_dynamic_update();
        let buffer = ExtendableBuffer::new(OriginalRegion::Owned(original), additional, updatable);
        Ok(Self {
            trie: TrieStructure::new(header.version(), buffer, content),
            header,
            fixed_time: None,
        })
    }

    /// An empty dictionary with only a root array.
    pub fn create_empty(header: HeaderPolicy) -> Result<Self, DictError> {
        if header.uses_forgetting_curve() && !header.version().has_content_store() {
            return Err(DictError::Malformed(format!(
                "forgetting curve requires version 4, found {}",
                header.version().number()
            )));
        }
        let mut header = header;
        header.unigram_count = 0;
        header.bigram_count = 0;
        header.extended_region_size = 0;
        let trie = TrieStructure::empty(header.version(), header.supports_dynamic_update())?;
        Ok(Self {
            header,
            trie,
            fixed_time: None,
        })
    }

    pub fn header(&self) -> &HeaderPolicy {
        &self.header
    }

    pub(crate) fn set_header(&mut self, header: HeaderPolicy) {
        self.header = header;
    }

    pub fn version(&self) -> FormatVersion {
        self.header.version()
    }

    pub fn is_updatable(&self) -> bool {
        self.trie.buffer.is_updatable()
    }

    /// Pin the clock used for historical info and decay. `None` returns to
    /// wall-clock time.
    pub fn set_current_time(&mut self, now: Option<u32>) {
        self.fixed_time = now;
    }

    pub(crate) fn now(&self) -> u32 {
        self.fixed_time.unwrap_or_else(now_epoch)
    }

    pub(crate) fn trie(&self) -> &TrieStructure {
        &self.trie
    }

    fn degrade<T>(&self, what: &'static str, result: Result<Option<T>, DictError>) -> Option<T> {
        result.unwrap_or_else(|e| {
            warn!(what, error = %e, "dictionary read failed");
            None
        })
    }

    // --- lookup ---

    /// Exact-case lookup, then a retry with the word lower-cased.
    pub(crate) fn find_word_node(&self, code_points: &[u32]) -> Result<Option<PtNodeParams>, DictError> {
        if let Some(node) = self.trie.find_terminal(code_points)? {
            return Ok(Some(node));
        }
        let lower = unicode::to_lower_code_points(code_points);
        if lower == code_points {
            return Ok(None);
        }
        self.trie.find_terminal(&lower)
    }

    /// Position of the terminal node spelling `word`. With
    /// `force_lower_case` a failed exact match is retried lower-cased.
    pub fn get_terminal_position(&self, word: &str, force_lower_case: bool) -> Option<usize> {
        let code_points = byte_utils::to_code_points(word);
        let found = if force_lower_case {
            self.find_word_node(&code_points)
        } else {
            self.trie.find_terminal(&code_points)
        };
        self.degrade("terminal position", found).map(|n| n.head_pos)
    }

    /// Spelling and probability of the word ending at `position`.
    pub fn get_code_points_and_probability(&self, position: usize) -> Option<(String, i32)> {
        let result = (|| -> Result<Option<(String, i32)>, DictError> {
            let node = self.trie.live_node_at(position)?;
            let Some(unigram) = self.trie.unigram(&node)? else {
                return Ok(None);
            };
            let word = byte_utils::to_string(&self.trie.code_points_of(&node)?);
            Ok(Some((word, self.unigram_probability(&unigram, self.now()))))
        })();
        self.degrade("code points", result)
    }

    /// Children of the node at `parent`, or of the root for `None`.
    pub fn get_all_child_nodes(&self, parent: Option<usize>) -> Vec<PtNodeView> {
        let result = (|| -> Result<Option<Vec<PtNodeView>>, DictError> {
            let array = match parent {
                None => ROOT_POS,
                Some(pos) => match self.trie.live_node_at(pos)?.children_pos {
                    Some(children) => children,
                    None => return Ok(Some(Vec::new())),
                },
            };
            let now = self.now();
            let mut out = Vec::new();
            for node in self.trie.child_nodes(array)? {
                let probability = match self.trie.unigram(&node)? {
                    Some(u) => Some(self.unigram_probability(&u, now)),
                    None => None,
                };
                out.push(PtNodeView {
                    position: node.head_pos,
                    is_terminal: node.is_terminal(),
                    probability,
                    has_children: node.children_pos.is_some(),
                    code_points: node.code_points,
                });
            }
            Ok(Some(out))
        })();
        self.degrade("child nodes", result).unwrap_or_default()
    }

    pub(crate) fn unigram_probability(&self, unigram: &StoredUnigram, now: u32) -> i32 {
        match unigram.historical {
            Some(h) if self.header.uses_forgetting_curve() => {
                forgetting_curve::get_probability(&h, &self.header, now)
            }
            _ => unigram.probability as i32,
        }
    }

    /// Probability of a node as a suggestion: `None` unless it is a word that
    /// may be offered.
    pub(crate) fn usable_probability(&self, node: &PtNodeParams, now: u32) -> Result<Option<i32>, DictError> {
        if node.attrs.is_not_a_word || node.attrs.is_blacklisted {
            return Ok(None);
        }
        let Some(unigram) = self.trie.unigram(node)? else {
            return Ok(None);
        };
        let p = self.unigram_probability(&unigram, now);
        Ok((p != NOT_A_PROBABILITY).then_some(p))
    }

    pub(crate) fn decode_bigram(&self, bigram: &StoredBigram, target_unigram: i32, now: u32) -> i32 {
        match bigram.historical {
            Some(h) if self.header.uses_forgetting_curve() => {
                let p = forgetting_curve::get_probability(&h, &self.header, now);
                if p == NOT_A_PROBABILITY {
                    NOT_A_PROBABILITY
                } else {
                    probability::combine_decayed(target_unigram, p)
                }
            }
            _ => probability::compute_probability_for_bigram(target_unigram, bigram.probability as i32),
        }
    }

    /// Live bigrams of `source` whose targets may be offered, with their
    /// blended probabilities.
    pub(crate) fn scored_bigrams(
        &self,
        source: &PtNodeParams,
        now: u32,
    ) -> Result<Vec<(PtNodeParams, i32)>, DictError> {
        let mut out = Vec::new();
        for bigram in self.trie.bigrams(source)? {
            let target = self.trie.read_node(bigram.target_pos)?;
            let Some(unigram) = self.usable_probability(&target, now)? else {
                continue;
            };
            let p = self.decode_bigram(&bigram, unigram, now);
            if p != NOT_A_PROBABILITY {
                out.push((target, p));
            }
        }
        Ok(out)
    }

    /// Probability of `word`, or `None` when it is not a valid word.
    pub fn get_probability(&self, word: &str) -> Option<i32> {
        let code_points = byte_utils::to_code_points(word);
        let now = self.now();
        let result = (|| -> Result<Option<i32>, DictError> {
            match self.find_word_node(&code_points)? {
                Some(node) => self.usable_probability(&node, now),
                None => Ok(None),
            }
        })();
        self.degrade("probability", result)
    }

    pub fn is_valid_word(&self, word: &str) -> bool {
        self.get_probability(word).is_some()
    }

    /// Blended probability of `word1` following `word0`.
    pub fn get_bigram_probability(&self, word0: &str, word1: &str) -> Option<i32> {
        let source = byte_utils::to_code_points(word0);
        let target = byte_utils::to_code_points(word1);
        let now = self.now();
        let result = (|| -> Result<Option<i32>, DictError> {
            let (Some(source), Some(target)) =
                (self.find_word_node(&source)?, self.find_word_node(&target)?)
            else {
                return Ok(None);
            };
            Ok(self
                .scored_bigrams(&source, now)?
                .into_iter()
                .find(|(node, _)| node.head_pos == target.head_pos)
                .map(|(_, p)| p))
        })();
        self.degrade("bigram probability", result)
    }

    pub fn is_valid_bigram(&self, word0: &str, word1: &str) -> bool {
        self.get_bigram_probability(word0, word1).is_some()
    }

    /// Everything stored about `word` (exact case), including entries that
    /// are not offered as suggestions.
    pub fn get_word_property(&self, word: &str) -> Option<WordProperty> {
        let code_points = byte_utils::to_code_points(word);
        let now = self.now();
        let result = (|| -> Result<Option<WordProperty>, DictError> {
            let Some(node) = self.trie.find_terminal(&code_points)? else {
                return Ok(None);
            };
            let Some(unigram) = self.trie.unigram(&node)? else {
                return Ok(None);
            };
            let mut bigrams = Vec::new();
            for bigram in self.trie.bigrams(&node)? {
                let target = self.trie.read_node(bigram.target_pos)?;
                let target_unigram = match self.trie.unigram(&target)? {
                    Some(u) => self.unigram_probability(&u, now),
                    None => continue,
                };
                let raw_probability = match bigram.historical {
                    Some(h) if self.header.uses_forgetting_curve() => {
                        forgetting_curve::get_probability(&h, &self.header, now)
                    }
                    _ => bigram.probability as i32,
                };
                bigrams.push(BigramProperty {
                    target: byte_utils::to_string(&self.trie.code_points_of(&target)?),
                    raw_probability,
                    probability: self.decode_bigram(&bigram, target_unigram, now),
                    historical_info: bigram.historical,
                });
            }
            Ok(Some(WordProperty {
                word: word.to_string(),
                probability: self.unigram_probability(&unigram, now),
                is_not_a_word: node.attrs.is_not_a_word,
                is_blacklisted: node.attrs.is_blacklisted,
                historical_info: unigram.historical,
                shortcuts: self.trie.shortcuts(&node)?,
                bigrams,
            }))
        })();
        self.degrade("word property", result)
    }

    /// Every live word in trie order.
    pub fn words(&self) -> WordIter<'_> {
        let mut iter = WordIter {
            dict: self,
            stack: Vec::new(),
            pending_error: None,
            now: self.now(),
        };
        match self.trie.child_nodes(ROOT_POS) {
            Ok(roots) => iter.push_children(&[], roots),
            Err(e) => iter.pending_error = Some(e),
        }
        iter
    }

    pub fn stats(&self) -> DictStats {
        DictStats {
            version: self.header.version().number(),
            is_updatable: self.is_updatable(),
            uses_forgetting_curve: self.header.uses_forgetting_curve(),
            unigram_count: self.header.unigram_count(),
            bigram_count: self.header.bigram_count(),
            original_size: self.trie.buffer.original_size(),
            additional_size: self.trie.buffer.additional_size(),
            terminal_ids: self.trie.content.terminal_count(),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_buffer_limit(&mut self, max_size: usize) {
        self.trie.buffer.set_max_size(max_size);
    }

    // --- mutation ---

    fn check_updatable(&self) -> Result<(), DictError> {
        if self.trie.buffer.is_updatable() {
            Ok(())
        } else {
            Err(DictError::NotUpdatable)
        }
    }

    /// Run `op`, compacting once and retrying when the buffer is full.
    fn with_gc_retry<T>(
        &mut self,
        mut op: impl FnMut(&mut TrieStructure) -> Result<T, DictError>,
    ) -> Result<T, DictError> {
        match op(&mut self.trie) {
            Err(DictError::CapacityExceeded(what)) => {
                debug!(what, "out of room, compacting before retry");
                self.run_gc()?;
                op(&mut self.trie)
            }
            other => other,
        }
    }

    /// Make room for one more entry under `count`/`max`. Decaying
    /// dictionaries may run over the cap up to the hard limit, then compact.
    fn reserve(&mut self, unigram: bool) -> Result<(), DictError> {
        let (count, max) = if unigram {
            (self.header.unigram_count(), self.header.max_unigram_count())
        } else {
            (self.header.bigram_count(), self.header.max_bigram_count())
        };
        if !self.header.uses_forgetting_curve() {
            return if count < max {
                Ok(())
            } else {
                Err(DictError::CapacityExceeded(if unigram { "unigram count" } else { "bigram count" }))
            };
        }
        let limit = forgetting_curve::count_hard_limit(max);
        if count < limit {
            return Ok(());
        }
        self.run_gc()?;
        let count = if unigram {
            self.header.unigram_count()
        } else {
            self.header.bigram_count()
        };
        if count < limit {
            Ok(())
        } else {
            Err(DictError::CapacityExceeded(if unigram { "unigram count" } else { "bigram count" }))
        }
    }

    fn prepare_unigram(
        &self,
        existing: Option<&PtNodeParams>,
        property: &UnigramProperty,
    ) -> Result<NewUnigram, DictError> {
        let mut stored = StoredUnigram {
            probability: property.probability,
            historical: None,
        };
        if self.header.uses_forgetting_curve() {
            let previous = match existing {
                Some(node) => self.trie.unigram(node)?.and_then(|u| u.historical),
                None => None,
            };
            let timestamp = property.timestamp.unwrap_or_else(|| self.now());
            stored.historical = Some(forgetting_curve::create_updated_historical_info(
                previous.as_ref(),
                !property.is_not_a_word,
                timestamp,
                &self.header,
            ));
        }
        let shortcuts = if property.shortcuts.is_empty() {
            None
        } else {
            let mut merged = match existing {
                Some(node) => self.trie.shortcuts(node)?,
                None => Vec::new(),
            };
            for s in &property.shortcuts {
                match merged.iter_mut().find(|m| m.target == s.target) {
                    Some(m) => m.probability = s.probability,
                    None => merged.push(s.clone()),
                }
            }
            Some(merged)
        };
        Ok(NewUnigram {
            stored,
            is_not_a_word: property.is_not_a_word,
            is_blacklisted: property.is_blacklisted,
            shortcuts,
        })
    }

    pub fn add_unigram_word(&mut self, word: &str, probability: u8) -> Result<(), DictError> {
        self.add_unigram_word_with(word, &UnigramProperty::new(probability))
    }

    /// Insert `word` or update its attributes. Shortcut targets are merged
    /// into the existing list.
    pub fn add_unigram_word_with(&mut self, word: &str, property: &UnigramProperty) -> Result<(), DictError> {
        self.check_updatable()?;
        let code_points = checked_code_points(word)?;
        let _span = debug_span!("add_unigram_word", len = code_points.len()).entered();
        if self.trie.find_terminal(&code_points)?.is_none() {
            self.reserve(true)?;
        }
        let existing = self.trie.find_terminal(&code_points)?;
        let new = self.prepare_unigram(existing.as_ref(), property)?;
        let outcome = self.with_gc_retry(|trie| trie.add_unigram(&code_points, &new))?;
        if outcome == UnigramOutcome::Added {
            self.header.unigram_count += 1;
        }
        Ok(())
    }

    /// Returns false when `word` is not a word.
    pub fn remove_unigram_word(&mut self, word: &str) -> Result<bool, DictError> {
        self.check_updatable()?;
        let code_points = checked_code_points(word)?;
        let removed = self.trie.remove_unigram(&code_points)?;
        if removed {
            self.header.unigram_count = self.header.unigram_count.saturating_sub(1);
        }
        Ok(removed)
    }

    pub fn add_bigram_words(&mut self, word0: &str, word1: &str, probability: u8) -> Result<(), DictError> {
        self.add_bigram_words_at(word0, word1, probability, None)
    }

    /// Add or update `word0 -> word1`. Both words must already exist.
    /// `timestamp` feeds the historical info of decaying dictionaries
    /// (`None` means now).
    pub fn add_bigram_words_at(
        &mut self,
        word0: &str,
        word1: &str,
        probability: u8,
        timestamp: Option<u32>,
    ) -> Result<(), DictError> {
        self.check_updatable()?;
        let source = checked_code_points(word0)?;
        let target = checked_code_points(word1)?;
        let _span = debug_span!("add_bigram_words").entered();

        let (s, t) = bigram_endpoints(&self.trie, &source, &target)?;
        let existing = self
            .trie
            .bigrams(&s)?
            .into_iter()
            .find(|b| b.target_pos == t.head_pos);
        if existing.is_none() {
            self.reserve(false)?;
        }
        let (_, t) = bigram_endpoints(&self.trie, &source, &target)?;

        let (stored, historical) = if self.header.uses_forgetting_curve() {
            let timestamp = timestamp.unwrap_or_else(|| self.now());
            let previous = existing.and_then(|b| b.historical);
            let info = forgetting_curve::create_updated_historical_info(
                previous.as_ref(),
                true,
                timestamp,
                &self.header,
            );
            (0, Some(info))
        } else {
            let unigram = self.trie.unigram(&t)?.map_or(0, |u| u.probability as i32);
            let encoded = probability::encode_bigram_probability(unigram, probability as i32);
            (encoded as u8, None)
        };
        let added = self.with_gc_retry(|trie| {
            let (s, t) = bigram_endpoints(trie, &source, &target)?;
            trie.add_bigram(&s, &t, stored, historical)
        })?;
        if added {
            self.header.bigram_count += 1;
        }
        Ok(())
    }

    /// Returns false when either word or the bigram is missing.
    pub fn remove_bigram_words(&mut self, word0: &str, word1: &str) -> Result<bool, DictError> {
        self.check_updatable()?;
        let source = checked_code_points(word0)?;
        let target = checked_code_points(word1)?;
        let (s, t) = match bigram_endpoints(&self.trie, &source, &target) {
            Ok(ends) => ends,
            Err(DictError::WordNotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let removed = self.trie.remove_bigram(&s, &t)?;
        if removed {
            self.header.bigram_count = self.header.bigram_count.saturating_sub(1);
        }
        Ok(removed)
    }

    // --- GC and persistence ---

    /// Whether the caller should compact soon. With `minds_block_by_gc` only
    /// conditions that cannot wait are reported.
    pub fn needs_to_run_gc(&self, minds_block_by_gc: bool) -> bool {
        if !self.is_updatable() {
            return false;
        }
        if self.trie.buffer.remaining_capacity() < BUFFER_SIZE_MARGIN
            || self.trie.buffer.additional_size() >= settings().gc.max_extended_region_size
        {
            return true;
        }
        if self.header.unigram_count() >= self.header.max_unigram_count()
            || self.header.bigram_count() >= self.header.max_bigram_count()
        {
            return true;
        }
        self.header.uses_forgetting_curve()
            && forgetting_curve::needs_to_decay(
                minds_block_by_gc,
                self.header.unigram_count(),
                self.header.bigram_count(),
                &self.header,
                self.now(),
            )
    }

    /// Compact into a fresh buffer. On failure the dictionary is unchanged.
    pub fn run_gc(&mut self) -> Result<GcStats, DictError> {
        self.check_updatable()?;
        let now = self.now();
        let (trie, stats) = gc::run_gc(&self.trie, &self.header, now)?;
        self.trie = trie;
        self.header.unigram_count = stats.unigram_count;
        self.header.bigram_count = stats.bigram_count;
        self.header.extended_region_size = 0;
        if self.header.uses_forgetting_curve() {
            self.header.last_decayed_time = now;
        }
        Ok(stats)
    }

    /// The complete file image: header, trie regions and (v4) content frame.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DictError> {
        let buffer = &self.trie.buffer;
        let mut header = self.header.clone();
        header.extended_region_size = if self.version().is_dynamic() {
            buffer.additional_size()
        } else {
            0
        };
        header.trie_size = buffer.original_size() + buffer.additional_size();
        let mut out = header.to_bytes();
        out.extend_from_slice(buffer.original_bytes());
        out.extend_from_slice(buffer.additional_bytes());
        if self.version().has_content_store() {
            out.extend(self.trie.content.to_frame()?);
        }
        Ok(out)
    }

    /// Atomic write: write to .tmp then rename. The appended region is
    /// recorded so positions survive a reopen.
    pub fn flush(&self, path: &Path) -> Result<(), DictError> {
        let _span = debug_span!("flush", path = %path.display()).entered();
        let bytes = self.to_bytes()?;
        let tmp = path.with_extension("tmp");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, path)?;
        debug!(size = bytes.len(), "flushed");
        Ok(())
    }

    pub fn flush_with_gc(&mut self, path: &Path) -> Result<GcStats, DictError> {
        let stats = self.run_gc()?;
        self.flush(path)?;
        Ok(stats)
    }
}

/// Depth-first iterator over live words. Stops after the first read error.
pub struct WordIter<'a> {
    dict: &'a Dictionary,
    stack: Vec<(Vec<u32>, PtNodeParams)>,
    pending_error: Option<DictError>,
    now: u32,
}

impl WordIter<'_> {
    fn push_children(&mut self, prefix: &[u32], children: Vec<PtNodeParams>) {
        for child in children.into_iter().rev() {
            self.stack.push((prefix.to_vec(), child));
        }
    }
}

impl Iterator for WordIter<'_> {
    type Item = Result<WordEntry, DictError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            self.stack.clear();
            return Some(Err(e));
        }
        while let Some((mut word, node)) = self.stack.pop() {
            word.extend_from_slice(&node.code_points);
            if let Some(children) = node.children_pos {
                match self.dict.trie.child_nodes(children) {
                    Ok(nodes) => self.push_children(&word, nodes),
                    Err(e) => {
                        self.stack.clear();
                        return Some(Err(e));
                    }
                }
            }
            match self.dict.trie.unigram(&node) {
                Ok(Some(unigram)) => {
                    return Some(Ok(WordEntry {
                        word: byte_utils::to_string(&word),
                        probability: self.dict.unigram_probability(&unigram, self.now),
                        is_not_a_word: node.attrs.is_not_a_word,
                        is_blacklisted: node.attrs.is_blacklisted,
                    }))
                }
                Ok(None) => {}
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
