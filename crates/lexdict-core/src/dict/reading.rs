//! Read side of the trie: node resolution, array iteration and lookup.

use tracing::debug;

use super::bigram_list;
use super::buffer::ExtendableBuffer;
use super::byte_utils;
use super::content::ContentStore;
use super::header::FormatVersion;
use super::pt_node::{self, PtNodeParams};
use super::shortcut_list::{self, ShortcutTarget};
use super::{DictError, MAX_WORD_LENGTH};
use crate::probability::forgetting_curve::HistoricalInfo;

pub(crate) const ROOT_POS: usize = 0;

/// Moved-node hops followed before the chain is treated as a cycle.
const MAX_MOVE_CHAIN: usize = 256;
/// Linked sibling arrays followed before the chain is treated as a cycle.
const MAX_ARRAY_CHAIN: usize = 0x1_0000;

/// Unigram payload of a terminal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoredUnigram {
    pub(crate) probability: u8,
    pub(crate) historical: Option<HistoricalInfo>,
}

/// A live bigram whose target is currently a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoredBigram {
    pub(crate) target_pos: usize,
    /// Encoded delta, or unused when `historical` is set.
    pub(crate) probability: u8,
    pub(crate) historical: Option<HistoricalInfo>,
}

/// A trie body in one of the format variants, plus the v4 content store
/// (empty for other versions).
pub(crate) struct TrieStructure {
    pub(crate) version: FormatVersion,
    pub(crate) buffer: ExtendableBuffer,
    pub(crate) content: ContentStore,
}

impl TrieStructure {
    pub(crate) fn new(version: FormatVersion, buffer: ExtendableBuffer, content: ContentStore) -> Self {
        Self {
            version,
            buffer,
            content,
        }
    }

    /// A trie holding only an empty root array.
    pub(crate) fn empty(version: FormatVersion, updatable: bool) -> Result<Self, DictError> {
        let mut bytes = Vec::new();
        pt_node::push_array_size(&mut bytes, 0)?;
        if version.is_dynamic() {
            byte_utils::push_uint(&mut bytes, 0, byte_utils::SIGNED_OFFSET_SIZE);
        }
        Ok(Self::new(
            version,
            ExtendableBuffer::owned(bytes, updatable),
            ContentStore::default(),
        ))
    }

    pub(crate) fn read_node(&self, pos: usize) -> Result<PtNodeParams, DictError> {
        pt_node::read_pt_node(&self.buffer, self.version, pos)
    }

    /// Follow `forward` links: the node that occupies a moved node's slot.
    pub(crate) fn resolve_forward(&self, mut node: PtNodeParams) -> Result<PtNodeParams, DictError> {
        for _ in 0..MAX_MOVE_CHAIN {
            if !node.is_moved() {
                return Ok(node);
            }
            let next = node.forward_pos().ok_or_else(|| {
                DictError::Malformed(format!("moved node at {} has no forward", node.head_pos))
            })?;
            node = self.read_node(next)?;
        }
        Err(DictError::Malformed("moved node chain too long".into()))
    }

    /// Follow `successor` links: the node that inherited a moved node's
    /// identity.
    pub(crate) fn resolve_successor(&self, mut node: PtNodeParams) -> Result<PtNodeParams, DictError> {
        for _ in 0..MAX_MOVE_CHAIN {
            if !node.is_moved() {
                return Ok(node);
            }
            let next = node.successor_pos().ok_or_else(|| {
                DictError::Malformed(format!("moved node at {} has no successor", node.head_pos))
            })?;
            node = self.read_node(next)?;
        }
        Err(DictError::Malformed("moved node chain too long".into()))
    }

    /// The current node for a position recorded earlier (parent link,
    /// bigram target, terminal table).
    pub(crate) fn live_node_at(&self, pos: usize) -> Result<PtNodeParams, DictError> {
        let node = self.read_node(pos)?;
        self.resolve_successor(node)
    }

    pub(crate) fn array(&self, array_pos: usize) -> PtNodeArrayReader<'_> {
        PtNodeArrayReader {
            trie: self,
            pending_array: Some(array_pos),
            next_pos: array_pos,
            remaining: 0,
            arrays_visited: 0,
            last_link_field: None,
            done: false,
        }
    }

    /// Every non-deleted node of the array chain at `array_pos`.
    pub(crate) fn child_nodes(&self, array_pos: usize) -> Result<Vec<PtNodeParams>, DictError> {
        let mut out = Vec::new();
        for node in self.array(array_pos) {
            let node = node?;
            if !node.is_deleted() {
                out.push(node);
            }
        }
        Ok(out)
    }

    /// Exact-case walk from the root. Returns the terminal node spelling
    /// `code_points`, if any.
    pub(crate) fn find_terminal(&self, code_points: &[u32]) -> Result<Option<PtNodeParams>, DictError> {
        if code_points.is_empty() || code_points.len() > MAX_WORD_LENGTH {
            return Ok(None);
        }
        let mut array_pos = ROOT_POS;
        let mut matched_len = 0;
        loop {
            let mut found = None;
            for node in self.array(array_pos) {
                let node = node?;
                if !node.is_deleted() && node.code_points[0] == code_points[matched_len] {
                    found = Some(node);
                    break;
                }
            }
            let Some(node) = found else {
                return Ok(None);
            };
            let rest = &code_points[matched_len..];
            if !rest.starts_with(&node.code_points) {
                return Ok(None);
            }
            matched_len += node.code_points.len();
            if matched_len == code_points.len() {
                return Ok(node.is_terminal().then_some(node));
            }
            match node.children_pos {
                Some(children) => array_pos = children,
                None => return Ok(None),
            }
        }
    }

    /// Full spelling of a live node.
    pub(crate) fn code_points_of(&self, node: &PtNodeParams) -> Result<Vec<u32>, DictError> {
        if !self.version.is_dynamic() {
            return self.static_code_points_at(node.head_pos);
        }
        let mut chunks = vec![node.code_points.clone()];
        let mut parent = node.parent_pos;
        while let Some(pos) = parent {
            if chunks.len() > MAX_WORD_LENGTH {
                return Err(DictError::Malformed(format!(
                    "parent chain of {} too deep",
                    node.head_pos
                )));
            }
            let parent_node = self.live_node_at(pos)?;
            parent = parent_node.parent_pos;
            chunks.push(parent_node.code_points);
        }
        Ok(chunks.into_iter().rev().flatten().collect())
    }

    /// Version 2 has no parent links: descend from the root into the node
    /// whose children array starts closest before `target`.
    fn static_code_points_at(&self, target: usize) -> Result<Vec<u32>, DictError> {
        let mut out = Vec::new();
        let mut array_pos = ROOT_POS;
        for _ in 0..=MAX_WORD_LENGTH {
            let mut best: Option<(usize, PtNodeParams)> = None;
            for node in self.array(array_pos) {
                let node = node?;
                if node.head_pos == target {
                    out.extend_from_slice(&node.code_points);
                    return Ok(out);
                }
                if let Some(children) = node.children_pos {
                    let closer = best.as_ref().map_or(true, |(c, _)| children > *c);
                    if children <= target && closer {
                        best = Some((children, node));
                    }
                }
            }
            let (children, node) = best.ok_or_else(|| {
                DictError::Malformed(format!("no node at position {target}"))
            })?;
            out.extend_from_slice(&node.code_points);
            array_pos = children;
        }
        Err(DictError::Malformed(format!("no node at position {target}")))
    }

    pub(crate) fn unigram(&self, node: &PtNodeParams) -> Result<Option<StoredUnigram>, DictError> {
        if !node.is_terminal() {
            return Ok(None);
        }
        match (node.probability, node.terminal_id) {
            (Some(probability), _) => Ok(Some(StoredUnigram {
                probability,
                historical: None,
            })),
            (None, Some(id)) => {
                let entry = self.content.probability(id)?;
                Ok(Some(StoredUnigram {
                    probability: entry.probability,
                    historical: entry.historical,
                }))
            }
            (None, None) => Err(DictError::Malformed(format!(
                "terminal at {} has no payload",
                node.head_pos
            ))),
        }
    }

    /// Bigrams of a live source node whose targets are currently words.
    pub(crate) fn bigrams(&self, node: &PtNodeParams) -> Result<Vec<StoredBigram>, DictError> {
        let mut out = Vec::new();
        match self.version {
            FormatVersion::StaticV2 => {
                let Some(list_pos) = node.bigram_pos else {
                    return Ok(out);
                };
                for raw in bigram_list::read_static(&self.buffer, list_pos)? {
                    let target = self.read_node(raw.target_pos)?;
                    if target.is_terminal() {
                        out.push(StoredBigram {
                            target_pos: target.head_pos,
                            probability: raw.probability,
                            historical: None,
                        });
                    }
                }
            }
            FormatVersion::DynamicV3 => {
                let Some(list_pos) = node.bigram_pos else {
                    return Ok(out);
                };
                for raw in bigram_list::read_dynamic(&self.buffer, list_pos)?.entries {
                    if raw.deleted {
                        continue;
                    }
                    let target = self.live_node_at(raw.target_pos)?;
                    if target.is_terminal() {
                        out.push(StoredBigram {
                            target_pos: target.head_pos,
                            probability: raw.probability,
                            historical: None,
                        });
                    }
                }
            }
            FormatVersion::DynamicV4 => {
                let Some(id) = node.terminal_id else {
                    return Ok(out);
                };
                for entry in self.content.bigrams(id)? {
                    if entry.deleted {
                        continue;
                    }
                    let Some(target) = self.terminal_node(entry.target)? else {
                        continue;
                    };
                    if target.is_terminal() {
                        out.push(StoredBigram {
                            target_pos: target.head_pos,
                            probability: entry.probability,
                            historical: entry.historical,
                        });
                    }
                }
            }
        }
        Ok(out)
    }

    /// Live node carrying terminal id `id` (v4). `None` once the id has been
    /// retired, e.g. a removed word whose node was later split.
    pub(crate) fn terminal_node(&self, id: u32) -> Result<Option<PtNodeParams>, DictError> {
        let node = self.live_node_at(self.content.terminal_position(id)?)?;
        if node.terminal_id != Some(id) {
            debug!(id, pos = node.head_pos, "terminal id retired");
            return Ok(None);
        }
        Ok(Some(node))
    }

    pub(crate) fn shortcuts(&self, node: &PtNodeParams) -> Result<Vec<ShortcutTarget>, DictError> {
        match self.version {
            FormatVersion::StaticV2 => match node.shortcut_pos {
                Some(pos) => shortcut_list::read_static(&self.buffer, pos),
                None => Ok(Vec::new()),
            },
            FormatVersion::DynamicV3 => match node.shortcut_pos {
                Some(pos) => shortcut_list::read_dynamic(&self.buffer, pos),
                None => Ok(Vec::new()),
            },
            FormatVersion::DynamicV4 => match node.terminal_id {
                Some(id) => Ok(self.content.shortcuts(id)?.to_vec()),
                None => Ok(Vec::new()),
            },
        }
    }
}

/// Iterates one PtNode array and, for dynamic formats, the sibling arrays
/// chained after it. Moved nodes are replaced by their forward target.
pub(crate) struct PtNodeArrayReader<'a> {
    trie: &'a TrieStructure,
    pending_array: Option<usize>,
    next_pos: usize,
    remaining: usize,
    arrays_visited: usize,
    last_link_field: Option<usize>,
    done: bool,
}

impl PtNodeArrayReader<'_> {
    /// Position of the forward-link field that ended the chain, once the
    /// iterator is exhausted (dynamic formats only).
    pub(crate) fn last_link_field(&self) -> Option<usize> {
        if self.done {
            self.last_link_field
        } else {
            None
        }
    }

    fn start_array(&mut self, pos: usize) -> Result<(), DictError> {
        self.arrays_visited += 1;
        if self.arrays_visited > MAX_ARRAY_CHAIN {
            return Err(DictError::Malformed(format!("array chain cycle at {pos}")));
        }
        let mut p = pos;
        self.remaining = pt_node::read_array_size(&self.trie.buffer, &mut p)?;
        self.next_pos = p;
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<PtNodeParams>, DictError> {
        if let Some(pos) = self.pending_array.take() {
            self.start_array(pos)?;
        }
        loop {
            if self.remaining > 0 {
                let slot = self.trie.read_node(self.next_pos)?;
                self.next_pos += slot.size;
                self.remaining -= 1;
                return self.trie.resolve_forward(slot).map(Some);
            }
            if !self.trie.version.is_dynamic() {
                self.done = true;
                return Ok(None);
            }
            let field = self.next_pos;
            let mut p = field;
            match self.trie.buffer.read_offset(&mut p)? {
                Some(next) => self.start_array(next)?,
                None => {
                    self.last_link_field = Some(field);
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }
}

impl Iterator for PtNodeArrayReader<'_> {
    type Item = Result<PtNodeParams, DictError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(node)) => Some(Ok(node)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                self.last_link_field = None;
                Some(Err(e))
            }
        }
    }
}
