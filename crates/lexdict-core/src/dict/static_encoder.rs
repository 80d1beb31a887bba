//! In-memory word graph and the version-2 encoder.
//!
//! A [`FusionDictionary`] collects words, bigrams and shortcuts before any
//! layout exists. `to_static_bytes` lays the tree out depth-first (each array
//! followed by the arrays of its subtrees) with variable-width offsets, shrinking
//! widths until the layout stops moving. Dynamic formats are produced by
//! inserting into an empty dynamic dictionary and compacting it.

use std::collections::HashMap;

use tracing::{debug, debug_span};

use super::bigram_list;
use super::byte_utils;
use super::dictionary::Dictionary;
use super::header::{FormatVersion, HeaderPolicy};
use super::pt_node::{self, PtNodeAttributes};
use super::shortcut_list::{self, ShortcutTarget};
use super::{DictError, UnigramProperty, MAX_BUFFER_SIZE, MAX_WORD_LENGTH};
use crate::probability;

/// Layout passes before giving up on a fixed point.
const MAX_LAYOUT_PASSES: usize = 16;
const MAX_OFFSET_WIDTH: usize = 3;

#[derive(Debug, Clone)]
struct FusionWord {
    property: UnigramProperty,
    /// (target word, full-scale probability)
    bigrams: Vec<(Vec<u32>, u8)>,
}

#[derive(Debug, Clone)]
struct FusionNode {
    code_points: Vec<u32>,
    word: Option<FusionWord>,
    children: Vec<FusionNode>,
}

/// Word list with bigrams and shortcuts, independent of any file layout.
#[derive(Debug, Clone, Default)]
pub struct FusionDictionary {
    roots: Vec<FusionNode>,
    word_count: usize,
    bigram_count: usize,
}

fn common_prefix_len(a: &[u32], b: &[u32]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn insert_node<'a>(nodes: &'a mut Vec<FusionNode>, word: &[u32]) -> &'a mut FusionNode {
    let Some(i) = nodes.iter().position(|n| n.code_points[0] == word[0]) else {
        nodes.push(FusionNode {
            code_points: word.to_vec(),
            word: None,
            children: Vec::new(),
        });
        let last = nodes.len() - 1;
        return &mut nodes[last];
    };
    let node = &mut nodes[i];
    let common = common_prefix_len(&node.code_points, word);
    if common < node.code_points.len() {
        let rest = FusionNode {
            code_points: node.code_points.split_off(common),
            word: node.word.take(),
            children: std::mem::take(&mut node.children),
        };
        node.children.push(rest);
    }
    if common == word.len() {
        node
    } else {
        insert_node(&mut node.children, &word[common..])
    }
}

fn find_node<'a>(nodes: &'a [FusionNode], word: &[u32]) -> Option<&'a FusionNode> {
    let node = nodes.iter().find(|n| n.code_points[0] == word[0])?;
    if !word.starts_with(&node.code_points) {
        return None;
    }
    if word.len() == node.code_points.len() {
        Some(node)
    } else {
        find_node(&node.children, &word[node.code_points.len()..])
    }
}

fn find_node_mut<'a>(nodes: &'a mut [FusionNode], word: &[u32]) -> Option<&'a mut FusionNode> {
    let node = nodes.iter_mut().find(|n| n.code_points[0] == word[0])?;
    if !word.starts_with(&node.code_points) {
        return None;
    }
    let len = node.code_points.len();
    if word.len() == len {
        Some(node)
    } else {
        find_node_mut(&mut node.children, &word[len..])
    }
}

fn checked_code_points(word: &str) -> Result<Vec<u32>, DictError> {
    let code_points = byte_utils::to_code_points(word);
    if code_points.is_empty() || code_points.len() > MAX_WORD_LENGTH {
        return Err(DictError::InvalidWord(word.to_string()));
    }
    Ok(code_points)
}

fn collect_words<'a>(nodes: &'a [FusionNode], prefix: &mut Vec<u32>, out: &mut Vec<(Vec<u32>, &'a FusionWord)>) {
    for node in nodes {
        let len = prefix.len();
        prefix.extend_from_slice(&node.code_points);
        if let Some(word) = &node.word {
            out.push((prefix.clone(), word));
        }
        collect_words(&node.children, prefix, out);
        prefix.truncate(len);
    }
}

impl FusionDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }

    pub fn bigram_count(&self) -> usize {
        self.bigram_count
    }

    pub fn contains(&self, word: &str) -> bool {
        let code_points = byte_utils::to_code_points(word);
        !code_points.is_empty() && find_node(&self.roots, &code_points).map_or(false, |n| n.word.is_some())
    }

    /// Add `word`, replacing its attributes if it is already present. Bigrams
    /// already recorded for it are kept.
    pub fn add_word(&mut self, word: &str, property: UnigramProperty) -> Result<(), DictError> {
        let code_points = checked_code_points(word)?;
        let node = insert_node(&mut self.roots, &code_points);
        match node.word.as_mut() {
            Some(existing) => existing.property = property,
            None => {
                node.word = Some(FusionWord {
                    property,
                    bigrams: Vec::new(),
                });
                self.word_count += 1;
            }
        }
        Ok(())
    }

    /// Record `word0 -> word1` with a full-scale probability. `word0` must
    /// already be a word; a target that never becomes one is skipped when
    /// encoding.
    pub fn add_bigram(&mut self, word0: &str, word1: &str, probability: u8) -> Result<(), DictError> {
        let source = checked_code_points(word0)?;
        let target = checked_code_points(word1)?;
        let word = find_node_mut(&mut self.roots, &source)
            .and_then(|n| n.word.as_mut())
            .ok_or_else(|| DictError::WordNotFound(word0.to_string()))?;
        match word.bigrams.iter_mut().find(|(t, _)| *t == target) {
            Some(entry) => entry.1 = probability,
            None => {
                word.bigrams.push((target, probability));
                self.bigram_count += 1;
            }
        }
        Ok(())
    }

    /// Add a shortcut to an existing word.
    pub fn add_shortcut(&mut self, word: &str, shortcut: ShortcutTarget) -> Result<(), DictError> {
        let code_points = checked_code_points(word)?;
        let entry = find_node_mut(&mut self.roots, &code_points)
            .and_then(|n| n.word.as_mut())
            .ok_or_else(|| DictError::WordNotFound(word.to_string()))?;
        let shortcuts = &mut entry.property.shortcuts;
        match shortcuts.iter_mut().find(|s| s.target == shortcut.target) {
            Some(existing) => existing.probability = shortcut.probability,
            None => shortcuts.push(shortcut),
        }
        Ok(())
    }

    /// Encode as a version-2 dictionary file.
    pub fn to_static_bytes(&self, header: &HeaderPolicy) -> Result<Vec<u8>, DictError> {
        if header.version() != FormatVersion::StaticV2 {
            return Err(DictError::UnsupportedVersion(header.version().number()));
        }
        let _span = debug_span!("encode_static", words = self.word_count).entered();

        let mut flat = FlatTree::default();
        let mut prefix = Vec::new();
        flat.flatten(&self.roots, &mut prefix)?;
        let (nodes, bigram_count) = flat.resolve()?;

        let mut layout = Layout::initial(&flat, &nodes)?;
        let mut passes = 1;
        loop {
            let next = layout.next(&flat, &nodes)?;
            if next == layout {
                break;
            }
            layout = next;
            passes += 1;
            if passes > MAX_LAYOUT_PASSES {
                return Err(DictError::Malformed("static layout did not converge".into()));
            }
        }
        if layout.total > MAX_BUFFER_SIZE {
            return Err(DictError::CapacityExceeded("dictionary buffer"));
        }
        let body = emit(&flat, &nodes, &layout)?;
        debug!(passes, size = body.len(), "static layout");

        let mut header = header.clone();
        header.unigram_count = self.word_count;
        header.bigram_count = bigram_count;
        header.extended_region_size = 0;
        let mut out = header.to_bytes();
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Build a dictionary in the format `header` names. Static headers are
    /// encoded directly; dynamic ones are filled word by word and then
    /// compacted.
    pub fn build(&self, header: HeaderPolicy) -> Result<Dictionary, DictError> {
        if header.version() == FormatVersion::StaticV2 {
            return Dictionary::from_bytes(self.to_static_bytes(&header)?, false);
        }
        let _span = debug_span!("build_dynamic", words = self.word_count).entered();
        let updatable = header.supports_dynamic_update();
        let mut dict = Dictionary::create_empty(header.with_dynamic_update(true))?;
        let mut words = Vec::new();
        collect_words(&self.roots, &mut Vec::new(), &mut words);
        for (code_points, word) in &words {
            dict.add_unigram_word_with(&byte_utils::to_string(code_points), &word.property)?;
        }
        for (code_points, word) in &words {
            let source = byte_utils::to_string(code_points);
            for (target, probability) in &word.bigrams {
                let target = byte_utils::to_string(target);
                match dict.add_bigram_words_at(&source, &target, *probability, word.property.timestamp) {
                    Ok(()) => {}
                    Err(DictError::WordNotFound(w)) => debug!(word = %w, "bigram target missing"),
                    Err(e) => return Err(e),
                }
            }
        }
        dict.run_gc()?;
        let header = dict.header().clone().with_dynamic_update(updatable);
        dict.set_header(header);
        Dictionary::from_bytes(dict.to_bytes()?, updatable)
    }
}

/// One node of the tree in layout order.
struct FlatNode<'a> {
    code_points: &'a [u32],
    word: Option<&'a FusionWord>,
    children_array: Option<usize>,
    /// v2 shortcut list with its size prefix.
    shortcuts: Option<Vec<u8>>,
}

#[derive(Default)]
struct FlatTree<'a> {
    nodes: Vec<FlatNode<'a>>,
    arrays: Vec<Vec<usize>>,
    node_of_word: HashMap<Vec<u32>, usize>,
}

impl<'a> FlatTree<'a> {
    fn flatten(&mut self, nodes: &'a [FusionNode], prefix: &mut Vec<u32>) -> Result<usize, DictError> {
        if nodes.len() > pt_node::MAX_PT_NODE_ARRAY_SIZE {
            return Err(DictError::CapacityExceeded("node array"));
        }
        let array = self.arrays.len();
        self.arrays.push(Vec::new());
        let mut sorted: Vec<&FusionNode> = nodes.iter().collect();
        sorted.sort_by_key(|n| n.code_points[0]);

        let mut members = Vec::with_capacity(sorted.len());
        for node in &sorted {
            let index = self.nodes.len();
            let shortcuts = match &node.word {
                Some(w) if !w.property.shortcuts.is_empty() => {
                    Some(shortcut_list::encode(&w.property.shortcuts, true)?)
                }
                _ => None,
            };
            self.nodes.push(FlatNode {
                code_points: &node.code_points,
                word: node.word.as_ref(),
                children_array: None,
                shortcuts,
            });
            if node.word.is_some() {
                let mut word = prefix.clone();
                word.extend_from_slice(&node.code_points);
                self.node_of_word.insert(word, index);
            }
            members.push(index);
        }
        self.arrays[array] = members.clone();

        for (node, index) in sorted.into_iter().zip(members) {
            if node.children.is_empty() {
                continue;
            }
            let len = prefix.len();
            prefix.extend_from_slice(&node.code_points);
            let child = self.flatten(&node.children, prefix)?;
            prefix.truncate(len);
            self.nodes[index].children_array = Some(child);
        }
        Ok(array)
    }

    /// Resolve bigram targets to node indices; returns per-node bigram lists
    /// (target index, encoded probability) and their total.
    fn resolve(&self) -> Result<(Vec<Vec<(usize, u8)>>, usize), DictError> {
        let mut total = 0;
        let mut out = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let mut list = Vec::new();
            if let Some(word) = node.word {
                for (target, probability) in &word.bigrams {
                    let Some(&index) = self.node_of_word.get(target) else {
                        debug!(target = %byte_utils::to_string(target), "bigram target missing");
                        continue;
                    };
                    let unigram = self.nodes[index].word.map_or(0, |w| w.property.probability);
                    let encoded =
                        probability::encode_bigram_probability(unigram as i32, *probability as i32);
                    list.push((index, encoded as u8));
                }
            }
            total += list.len();
            out.push(list);
        }
        Ok((out, total))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Layout {
    node_pos: Vec<usize>,
    array_pos: Vec<usize>,
    total: usize,
}

impl Layout {
    /// Positions with every offset at its widest.
    fn initial(flat: &FlatTree<'_>, bigrams: &[Vec<(usize, u8)>]) -> Result<Self, DictError> {
        Self::compute(flat, bigrams, None)
    }

    fn next(&self, flat: &FlatTree<'_>, bigrams: &[Vec<(usize, u8)>]) -> Result<Self, DictError> {
        Self::compute(flat, bigrams, Some(self))
    }

    fn compute(
        flat: &FlatTree<'_>,
        bigrams: &[Vec<(usize, u8)>],
        prev: Option<&Layout>,
    ) -> Result<Self, DictError> {
        let mut layout = Layout {
            node_pos: vec![0; flat.nodes.len()],
            array_pos: vec![0; flat.arrays.len()],
            total: 0,
        };
        let mut pos = 0;
        for (a, members) in flat.arrays.iter().enumerate() {
            layout.array_pos[a] = pos;
            pos += pt_node::array_size_field_size(members.len());
            for &n in members {
                layout.node_pos[n] = pos;
                pos += node_size(flat, bigrams, n, pos, prev)?;
            }
        }
        layout.total = pos;
        Ok(layout)
    }
}

fn head_size(node: &FlatNode<'_>) -> usize {
    let multi = node.code_points.len() > 1;
    1 + byte_utils::code_points_size(node.code_points, multi) + usize::from(node.word.is_some())
}

fn children_width(node: &FlatNode<'_>, field: usize, prev: Option<&Layout>) -> usize {
    match (node.children_array, prev) {
        (None, _) => 0,
        (Some(_), None) => MAX_OFFSET_WIDTH,
        (Some(child), Some(layout)) => {
            byte_utils::unsigned_width(layout.array_pos[child].saturating_sub(field).max(1))
        }
    }
}

fn bigram_entries(list: &[(usize, u8)], layout: &Layout) -> Vec<(usize, u8)> {
    list.iter()
        .map(|&(target, probability)| (layout.node_pos[target], probability))
        .collect()
}

fn node_size(
    flat: &FlatTree<'_>,
    bigrams: &[Vec<(usize, u8)>],
    n: usize,
    pos: usize,
    prev: Option<&Layout>,
) -> Result<usize, DictError> {
    let node = &flat.nodes[n];
    let mut size = head_size(node);
    size += children_width(node, pos + size, prev);
    if let Some(shortcuts) = &node.shortcuts {
        size += shortcuts.len();
    }
    let list = &bigrams[n];
    if !list.is_empty() {
        size += match prev {
            None => list.len() * (1 + MAX_OFFSET_WIDTH),
            Some(layout) => bigram_list::encode_static(pos + size, &bigram_entries(list, layout))?.len(),
        };
    }
    Ok(size)
}

fn emit(flat: &FlatTree<'_>, bigrams: &[Vec<(usize, u8)>], layout: &Layout) -> Result<Vec<u8>, DictError> {
    let mut out = Vec::with_capacity(layout.total);
    for (a, members) in flat.arrays.iter().enumerate() {
        if out.len() != layout.array_pos[a] {
            return Err(DictError::Malformed(format!("array {a} drifted from its layout")));
        }
        pt_node::push_array_size(&mut out, members.len())?;
        for &n in members {
            let node = &flat.nodes[n];
            let head = out.len();
            if head != layout.node_pos[n] {
                return Err(DictError::Malformed(format!("node {n} drifted from its layout")));
            }
            let mut attrs = PtNodeAttributes::default();
            if let Some(word) = node.word {
                attrs.is_terminal = true;
                attrs.is_not_a_word = word.property.is_not_a_word;
                attrs.is_blacklisted = word.property.is_blacklisted;
            }
            attrs.has_shortcuts = node.shortcuts.is_some();
            attrs.has_bigrams = !bigrams[n].is_empty();
            let multi = node.code_points.len() > 1;
            let field = head + head_size(node);
            let width = children_width(node, field, Some(layout));

            out.push(pt_node::static_flags(attrs, multi, width));
            byte_utils::push_code_points(&mut out, node.code_points, multi);
            if let Some(word) = node.word {
                out.push(word.property.probability);
            }
            if let Some(child) = node.children_array {
                let offset = layout.array_pos[child].checked_sub(field).ok_or_else(|| {
                    DictError::Malformed(format!("children of node {n} precede it"))
                })?;
                byte_utils::push_uint(&mut out, offset as u32, width);
            }
            if let Some(shortcuts) = &node.shortcuts {
                out.extend_from_slice(shortcuts);
            }
            if attrs.has_bigrams {
                let list_pos = out.len();
                out.extend(bigram_list::encode_static(list_pos, &bigram_entries(&bigrams[n], layout))?);
            }
        }
    }
    Ok(out)
}
