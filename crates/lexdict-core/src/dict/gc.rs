//! Compaction of a dynamic trie into a fresh buffer.
//!
//! Passes: (1) walk the live trie post-order into a plan, decaying history and
//! dropping dead entries; (2) evict the weakest entries over the after-GC
//! caps; (3) write the plan pre-order with placeholder links, recording where
//! every node and array went; (4) rebuild the v4 content store under the new
//! terminal ids; (5) patch children links and write the v3 lists through the
//! relocation maps. The source trie is only read.

use std::collections::{HashMap, HashSet};

use tracing::{debug, debug_span};

use super::bigram_list;
use super::buffer::ExtendableBuffer;
use super::byte_utils::{self, SIGNED_OFFSET_SIZE};
use super::content::{BigramContentEntry, ContentStore, ProbabilityEntry};
use super::header::{FormatVersion, HeaderPolicy};
use super::pt_node::{self, NewPtNode, PtNodeAttributes, TerminalField};
use super::reading::{StoredUnigram, TrieStructure, ROOT_POS};
use super::shortcut_list::{self, ShortcutTarget};
use super::{DictError, MAX_BUFFER_SIZE};
use crate::probability::forgetting_curve::{self, HistoricalInfo};

/// Counts after a compaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub unigram_count: usize,
    pub bigram_count: usize,
    pub removed_unigrams: usize,
    pub removed_bigrams: usize,
}

#[derive(Debug, Clone)]
struct PlannedBigram {
    old_target: usize,
    probability: u8,
    historical: Option<HistoricalInfo>,
}

#[derive(Debug, Clone)]
struct PlannedTerminal {
    old_pos: usize,
    unigram: StoredUnigram,
    is_not_a_word: bool,
    is_blacklisted: bool,
    shortcuts: Vec<ShortcutTarget>,
    bigrams: Vec<PlannedBigram>,
}

#[derive(Debug, Clone)]
struct PlannedNode {
    code_points: Vec<u32>,
    terminal: Option<PlannedTerminal>,
    children: Vec<PlannedNode>,
    old_children_array: Option<usize>,
}

struct GcContext<'a> {
    trie: &'a TrieStructure,
    header: &'a HeaderPolicy,
    now: u32,
    removed_unigrams: usize,
    removed_bigrams: usize,
}

impl GcContext<'_> {
    fn decaying(&self) -> bool {
        self.header.uses_forgetting_curve()
    }

    fn plan_array(&mut self, array_pos: usize, depth: usize) -> Result<Vec<PlannedNode>, DictError> {
        if depth > super::MAX_WORD_LENGTH {
            return Err(DictError::Malformed("trie deeper than max word length".into()));
        }
        let mut out = Vec::new();
        for node in self.trie.child_nodes(array_pos)? {
            let children = match node.children_pos {
                Some(c) => self.plan_array(c, depth + 1)?,
                None => Vec::new(),
            };
            let terminal = if node.is_terminal() {
                self.plan_terminal(&node)?
            } else {
                None
            };
            out.push(PlannedNode {
                code_points: node.code_points.clone(),
                terminal,
                children,
                old_children_array: node.children_pos,
            });
        }
        Ok(out)
    }

    fn plan_terminal(&mut self, node: &pt_node::PtNodeParams) -> Result<Option<PlannedTerminal>, DictError> {
        let Some(mut unigram) = self.trie.unigram(node)? else {
            return Ok(None);
        };
        let mut bigrams = Vec::new();
        for b in self.trie.bigrams(node)? {
            let mut historical = b.historical;
            if let (true, Some(h)) = (self.decaying(), b.historical) {
                let saved = forgetting_curve::create_historical_info_to_save(&h, self.header, self.now);
                if !forgetting_curve::needs_to_keep(&saved, self.header, self.now) {
                    self.removed_bigrams += 1;
                    continue;
                }
                historical = Some(saved);
            }
            bigrams.push(PlannedBigram {
                old_target: b.target_pos,
                probability: b.probability,
                historical,
            });
        }
        if let (true, Some(h)) = (self.decaying(), unigram.historical) {
            let saved = forgetting_curve::create_historical_info_to_save(&h, self.header, self.now);
            if !forgetting_curve::needs_to_keep(&saved, self.header, self.now) {
                self.removed_unigrams += 1;
                self.removed_bigrams += bigrams.len();
                return Ok(None);
            }
            unigram.historical = Some(saved);
        }
        Ok(Some(PlannedTerminal {
            old_pos: node.head_pos,
            unigram,
            is_not_a_word: node.attrs.is_not_a_word,
            is_blacklisted: node.attrs.is_blacklisted,
            shortcuts: self.trie.shortcuts(node)?,
            bigrams,
        }))
    }

    fn unigram_score(&self, t: &PlannedTerminal) -> i32 {
        match t.unigram.historical {
            Some(h) => forgetting_curve::get_probability(&h, self.header, self.now),
            None => t.unigram.probability as i32,
        }
    }

    fn bigram_score(&self, b: &PlannedBigram) -> i32 {
        match b.historical {
            Some(h) => forgetting_curve::get_probability(&h, self.header, self.now),
            None => b.probability as i32,
        }
    }
}

/// Drop terminals in `evicted`, then remove empty branches and merge
/// non-terminal nodes that are left with a single child.
fn prune(nodes: Vec<PlannedNode>, evicted: &HashSet<usize>) -> Vec<PlannedNode> {
    let mut out = Vec::with_capacity(nodes.len());
    for mut node in nodes {
        node.children = prune(std::mem::take(&mut node.children), evicted);
        if node.terminal.as_ref().map_or(false, |t| evicted.contains(&t.old_pos)) {
            node.terminal = None;
        }
        if node.terminal.is_some() {
            out.push(node);
            continue;
        }
        match node.children.len() {
            0 => {}
            1 => {
                let mut child = node.children.remove(0);
                let mut merged = node.code_points;
                merged.extend_from_slice(&child.code_points);
                child.code_points = merged;
                out.push(child);
            }
            _ => out.push(node),
        }
    }
    out
}

fn for_each_terminal<'a>(nodes: &'a [PlannedNode], f: &mut impl FnMut(&'a PlannedTerminal)) {
    for node in nodes {
        if let Some(t) = &node.terminal {
            f(t);
        }
        for_each_terminal(&node.children, f);
    }
}

fn for_each_terminal_mut(nodes: &mut [PlannedNode], f: &mut impl FnMut(&mut PlannedTerminal)) {
    for node in nodes {
        if let Some(t) = node.terminal.as_mut() {
            f(t);
        }
        for_each_terminal_mut(&mut node.children, f);
    }
}

struct Writer<'a> {
    version: FormatVersion,
    out: Vec<u8>,
    node_relocation: HashMap<usize, usize>,
    array_relocation: HashMap<usize, usize>,
    children_patches: Vec<(usize, usize)>,
    /// (shortcut field, bigram field, terminal) per v3 terminal.
    list_patches: Vec<(Option<usize>, Option<usize>, &'a PlannedTerminal)>,
    /// v4 terminals in new id order.
    terminals: Vec<&'a PlannedTerminal>,
}

impl<'a> Writer<'a> {
    fn write_array(
        &mut self,
        nodes: &'a [PlannedNode],
        parent_pos: Option<usize>,
        old_array: Option<usize>,
    ) -> Result<usize, DictError> {
        let array_pos = self.out.len();
        if let Some(old) = old_array {
            self.array_relocation.insert(old, array_pos);
        }
        pt_node::push_array_size(&mut self.out, nodes.len())?;
        let mut heads = Vec::with_capacity(nodes.len());
        for node in nodes {
            let head = self.out.len();
            let mut attrs = PtNodeAttributes::default();
            let mut terminal = None;
            if let Some(t) = &node.terminal {
                attrs.is_terminal = true;
                attrs.is_not_a_word = t.is_not_a_word;
                attrs.is_blacklisted = t.is_blacklisted;
                if self.version == FormatVersion::DynamicV3 {
                    attrs.has_shortcuts = !t.shortcuts.is_empty();
                    attrs.has_bigrams = !t.bigrams.is_empty();
                    terminal = Some(TerminalField::Probability(t.unigram.probability));
                } else {
                    terminal = Some(TerminalField::TerminalId(self.terminals.len() as u32));
                    self.terminals.push(t);
                }
                self.node_relocation.insert(t.old_pos, head);
            }
            let encoded = NewPtNode {
                attrs,
                parent_pos,
                code_points: &node.code_points,
                terminal,
                children_pos: None,
                shortcut_pos: None,
                bigram_pos: None,
            };
            let (children_off, shortcut_off, bigram_off) = encoded.field_offsets(self.version);
            encoded.encode(self.version, head, &mut self.out)?;
            if let Some(t) = &node.terminal {
                if shortcut_off.is_some() || bigram_off.is_some() {
                    self.list_patches
                        .push((shortcut_off.map(|o| head + o), bigram_off.map(|o| head + o), t));
                }
            }
            heads.push((head, head + children_off));
        }
        byte_utils::push_uint(&mut self.out, 0, SIGNED_OFFSET_SIZE);
        if self.out.len() > MAX_BUFFER_SIZE {
            return Err(DictError::CapacityExceeded("dictionary buffer"));
        }

        for (node, (head, children_field)) in nodes.iter().zip(heads) {
            if node.children.is_empty() {
                continue;
            }
            let old = node.old_children_array.ok_or_else(|| {
                DictError::Malformed("planned children without a source array".into())
            })?;
            self.write_array(&node.children, Some(head), Some(old))?;
            self.children_patches.push((children_field, old));
        }
        Ok(array_pos)
    }

    fn patch_offset(&mut self, field: usize, target: usize) -> Result<(), DictError> {
        let raw = byte_utils::encode_offset(field, Some(target))?;
        let mut p = field;
        byte_utils::write_uint(&mut self.out, &mut p, raw, SIGNED_OFFSET_SIZE)
    }
}

/// Compact `trie` into a fresh structure. `header` supplies the caps and the
/// decay parameters; its counts are not modified here.
pub(crate) fn run_gc(
    trie: &TrieStructure,
    header: &HeaderPolicy,
    now: u32,
) -> Result<(TrieStructure, GcStats), DictError> {
    if !trie.version.is_dynamic() {
        return Err(DictError::NotUpdatable);
    }
    let _span = debug_span!("gc", version = trie.version.number()).entered();

    let mut ctx = GcContext {
        trie,
        header,
        now,
        removed_unigrams: 0,
        removed_bigrams: 0,
    };
    let raw_plan = ctx.plan_array(ROOT_POS, 0)?;
    let mut plan = prune(raw_plan, &HashSet::new());
    let mut planned_bigrams = 0;
    for_each_terminal(&plan, &mut |t| planned_bigrams += t.bigrams.len());

    if ctx.decaying() {
        let mut scored = Vec::new();
        for_each_terminal(&plan, &mut |t| scored.push((ctx.unigram_score(t), t.old_pos)));
        let cap = header.max_unigram_count_after_gc();
        if scored.len() > cap {
            scored.sort_unstable();
            let evicted: HashSet<usize> = scored[..scored.len() - cap].iter().map(|&(_, pos)| pos).collect();
            ctx.removed_unigrams += evicted.len();
            plan = prune(plan, &evicted);
        }
    }

    // Bigrams survive only when their target does.
    let mut survivors = HashSet::new();
    for_each_terminal(&plan, &mut |t| {
        survivors.insert(t.old_pos);
    });
    for_each_terminal_mut(&mut plan, &mut |t| {
        t.bigrams.retain(|b| survivors.contains(&b.old_target));
    });

    if ctx.decaying() {
        let mut scored = Vec::new();
        for_each_terminal(&plan, &mut |t| {
            for (i, b) in t.bigrams.iter().enumerate() {
                scored.push((ctx.bigram_score(b), t.old_pos, i));
            }
        });
        let cap = header.max_bigram_count_after_gc();
        if scored.len() > cap {
            scored.sort_unstable();
            let mut evicted: HashMap<usize, HashSet<usize>> = HashMap::new();
            for &(_, source, i) in &scored[..scored.len() - cap] {
                evicted.entry(source).or_default().insert(i);
            }
            for_each_terminal_mut(&mut plan, &mut |t| {
                if let Some(drop) = evicted.get(&t.old_pos) {
                    let mut i = 0;
                    t.bigrams.retain(|_| {
                        let keep = !drop.contains(&i);
                        i += 1;
                        keep
                    });
                }
            });
        }
    }

    let mut writer = Writer {
        version: trie.version,
        out: Vec::new(),
        node_relocation: HashMap::new(),
        array_relocation: HashMap::new(),
        children_patches: Vec::new(),
        list_patches: Vec::new(),
        terminals: Vec::new(),
    };
    writer.write_array(&plan, None, None)?;
    debug!(
        nodes = writer.node_relocation.len(),
        arrays = writer.array_relocation.len(),
        trie_size = writer.out.len(),
        "gc trie written"
    );

    let mut bigram_count = 0;
    let mut content = ContentStore::default();
    if trie.version.has_content_store() {
        let mut id_by_old_pos = HashMap::new();
        for (id, t) in writer.terminals.iter().enumerate() {
            id_by_old_pos.insert(t.old_pos, id as u32);
        }
        for t in &writer.terminals {
            let pos = *writer.node_relocation.get(&t.old_pos).ok_or_else(|| {
                DictError::Malformed(format!("terminal {} was not relocated", t.old_pos))
            })?;
            let id = content.push_terminal(
                pos,
                ProbabilityEntry {
                    probability: t.unigram.probability,
                    historical: t.unigram.historical,
                },
            )?;
            if !t.shortcuts.is_empty() {
                content.set_shortcuts(id, t.shortcuts.clone())?;
            }
            let list = content.bigrams_mut(id)?;
            for b in &t.bigrams {
                if let Some(&target) = id_by_old_pos.get(&b.old_target) {
                    list.push(BigramContentEntry {
                        target,
                        probability: b.probability,
                        historical: b.historical,
                        deleted: false,
                    });
                }
            }
            bigram_count += list.len();
        }
    }

    let children_patches = std::mem::take(&mut writer.children_patches);
    for (field, old_array) in children_patches {
        let new_array = *writer.array_relocation.get(&old_array).ok_or_else(|| {
            DictError::Malformed(format!("array {old_array} was not relocated"))
        })?;
        writer.patch_offset(field, new_array)?;
    }

    let list_patches = std::mem::take(&mut writer.list_patches);
    for (shortcut_field, bigram_field, t) in list_patches {
        if let Some(field) = shortcut_field {
            let list_pos = writer.out.len();
            writer.out.extend(shortcut_list::encode(&t.shortcuts, false)?);
            writer.patch_offset(field, list_pos)?;
        }
        if let Some(field) = bigram_field {
            let entries = t
                .bigrams
                .iter()
                .filter_map(|b| writer.node_relocation.get(&b.old_target).map(|&pos| (pos, b.probability)))
                .collect::<Vec<_>>();
            if entries.is_empty() {
                continue;
            }
            let chunk_pos = writer.out.len();
            writer.out.extend(bigram_list::encode_dynamic_chunk(chunk_pos, &entries)?);
            writer.patch_offset(field, chunk_pos)?;
            bigram_count += entries.len();
        }
    }
    if writer.out.len() > trie.buffer.max_size() {
        return Err(DictError::CapacityExceeded("dictionary buffer"));
    }

    let stats = GcStats {
        unigram_count: writer.node_relocation.len(),
        bigram_count,
        removed_unigrams: ctx.removed_unigrams,
        removed_bigrams: ctx.removed_bigrams + planned_bigrams.saturating_sub(bigram_count),
    };
    debug!(?stats, "gc done");

    let mut buffer = ExtendableBuffer::owned(writer.out, trie.buffer.is_updatable());
    buffer.set_max_size(trie.buffer.max_size());
    Ok((TrieStructure::new(trie.version, buffer, content), stats))
}
