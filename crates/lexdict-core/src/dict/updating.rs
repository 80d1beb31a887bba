//! Write side of the dynamic trie (versions 3 and 4).
//!
//! Every mutation appends whatever it needs at the tail of the buffer first
//! and then commits by overwriting fixed-size fields of existing records. When
//! a node changes meaning, its flags byte is the last byte written.

use tracing::{debug, debug_span};

use super::bigram_list;
use super::byte_utils::{self, SIGNED_OFFSET_SIZE};
use super::content::{BigramContentEntry, ProbabilityEntry};
use super::header::FormatVersion;
use super::pt_node::{self, NewPtNode, NodeState, PtNodeAttributes, PtNodeParams, TerminalField};
use super::reading::{StoredUnigram, TrieStructure, ROOT_POS};
use super::shortcut_list::{self, ShortcutTarget};
use super::{DictError, MAX_WORD_LENGTH};
use crate::probability::forgetting_curve::HistoricalInfo;

/// A word to be written, with its payload already computed by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NewUnigram {
    pub(crate) stored: StoredUnigram,
    pub(crate) is_not_a_word: bool,
    pub(crate) is_blacklisted: bool,
    /// Complete replacement list, or `None` to keep the current one.
    pub(crate) shortcuts: Option<Vec<ShortcutTarget>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnigramOutcome {
    /// The word was not a word before.
    Added,
    Updated,
}

/// Bytes to append in one go, starting at `base`.
struct PendingAppend {
    base: usize,
    bytes: Vec<u8>,
    /// v4 terminal created by this append: (id, node position, entry, shortcuts).
    new_terminal: Option<(u32, usize, ProbabilityEntry, Vec<ShortcutTarget>)>,
}

impl PendingAppend {
    fn pos(&self) -> usize {
        self.base + self.bytes.len()
    }
}

/// Terminal payload ready to be encoded into a node.
struct PreparedTerminal {
    attrs: PtNodeAttributes,
    field: TerminalField,
    shortcut_pos: Option<usize>,
}

fn common_prefix_len(a: &[u32], b: &[u32]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

impl TrieStructure {
    fn check_updatable(&self) -> Result<(), DictError> {
        if !self.version.is_dynamic() || !self.buffer.is_updatable() {
            return Err(DictError::NotUpdatable);
        }
        Ok(())
    }

    fn pending(&self) -> PendingAppend {
        PendingAppend {
            base: self.buffer.tail_position(),
            bytes: Vec::new(),
            new_terminal: None,
        }
    }

    fn commit_append(&mut self, pending: PendingAppend) -> Result<(), DictError> {
        if !pending.bytes.is_empty() {
            let pos = self.buffer.append(&pending.bytes)?;
            debug_assert_eq!(pos, pending.base);
        }
        if let Some((id, node_pos, entry, shortcuts)) = pending.new_terminal {
            let allocated = self.content.push_terminal(node_pos, entry)?;
            debug_assert_eq!(allocated, id);
            if !shortcuts.is_empty() {
                self.content.set_shortcuts(id, shortcuts)?;
            }
        }
        Ok(())
    }

    /// Append the shortcut list (v3) and reserve the terminal id (v4) for a
    /// new terminal. The node itself must be encoded at `node_pos` later and
    /// recorded through `bind_terminal`.
    fn prepare_terminal(
        &self,
        pending: &mut PendingAppend,
        word: &NewUnigram,
    ) -> Result<PreparedTerminal, DictError> {
        let mut attrs = PtNodeAttributes {
            is_terminal: true,
            is_not_a_word: word.is_not_a_word,
            is_blacklisted: word.is_blacklisted,
            ..Default::default()
        };
        let shortcuts = word.shortcuts.as_deref().unwrap_or_default();
        match self.version {
            FormatVersion::DynamicV3 => {
                let mut shortcut_pos = None;
                if !shortcuts.is_empty() {
                    shortcut_pos = Some(pending.pos());
                    pending.bytes.extend(shortcut_list::encode(shortcuts, false)?);
                    attrs.has_shortcuts = true;
                }
                Ok(PreparedTerminal {
                    attrs,
                    field: TerminalField::Probability(word.stored.probability),
                    shortcut_pos,
                })
            }
            FormatVersion::DynamicV4 => {
                let id = self.content.terminal_count() as u32;
                if id > pt_node::MAX_TERMINAL_ID {
                    return Err(DictError::CapacityExceeded("terminal ids"));
                }
                Ok(PreparedTerminal {
                    attrs,
                    field: TerminalField::TerminalId(id),
                    shortcut_pos: None,
                })
            }
            FormatVersion::StaticV2 => Err(DictError::NotUpdatable),
        }
    }

    fn bind_terminal(&self, pending: &mut PendingAppend, prepared: &PreparedTerminal, node_pos: usize, word: &NewUnigram) {
        if let TerminalField::TerminalId(id) = prepared.field {
            pending.new_terminal = Some((
                id,
                node_pos,
                ProbabilityEntry {
                    probability: word.stored.probability,
                    historical: word.stored.historical,
                },
                word.shortcuts.clone().unwrap_or_default(),
            ));
        }
    }

    fn existing_terminal_field(node: &PtNodeParams) -> Option<TerminalField> {
        match (node.probability, node.terminal_id) {
            (Some(p), _) => Some(TerminalField::Probability(p)),
            (None, Some(id)) => Some(TerminalField::TerminalId(id)),
            (None, None) => None,
        }
    }

    /// Insert or update `code_points` as a word.
    pub(crate) fn add_unigram(
        &mut self,
        code_points: &[u32],
        word: &NewUnigram,
    ) -> Result<UnigramOutcome, DictError> {
        self.check_updatable()?;
        if code_points.is_empty() || code_points.len() > MAX_WORD_LENGTH {
            return Err(DictError::InvalidWord(byte_utils::to_string(code_points)));
        }
        let _span = debug_span!("add_unigram", len = code_points.len()).entered();

        let mut parent_pos = None;
        let mut array_pos = ROOT_POS;
        let mut matched = 0;
        loop {
            let rest = &code_points[matched..];
            let (found, link_field) = {
                let mut reader = self.array(array_pos);
                let mut found = None;
                for node in reader.by_ref() {
                    let node = node?;
                    if !node.is_deleted() && node.code_points[0] == rest[0] {
                        found = Some(node);
                        break;
                    }
                }
                (found, reader.last_link_field())
            };
            let Some(node) = found else {
                let link_field = link_field.ok_or_else(|| {
                    DictError::Malformed(format!("array at {array_pos} has no forward link"))
                })?;
                self.append_sibling_array(link_field, parent_pos, rest, word)?;
                return Ok(UnigramOutcome::Added);
            };
            let common = common_prefix_len(&node.code_points, rest);
            if common < node.code_points.len() {
                self.split_node(&node, common, rest, word)?;
                return Ok(UnigramOutcome::Added);
            }
            matched += common;
            if matched == code_points.len() {
                return self.update_existing(&node, word);
            }
            match node.children_pos {
                Some(children) => {
                    parent_pos = Some(node.head_pos);
                    array_pos = children;
                }
                None => {
                    self.append_child_array(&node, &code_points[matched..], word)?;
                    return Ok(UnigramOutcome::Added);
                }
            }
        }
    }

    /// Encode a one-node array holding the rest of a new word.
    fn push_single_node_array(
        &self,
        pending: &mut PendingAppend,
        parent_pos: Option<usize>,
        rest: &[u32],
        word: &NewUnigram,
    ) -> Result<usize, DictError> {
        let prepared = self.prepare_terminal(pending, word)?;
        let array_pos = pending.pos();
        pt_node::push_array_size(&mut pending.bytes, 1)?;
        let node_pos = pending.pos();
        let node = NewPtNode {
            attrs: prepared.attrs,
            parent_pos,
            code_points: rest,
            terminal: Some(prepared.field),
            children_pos: None,
            shortcut_pos: prepared.shortcut_pos,
            bigram_pos: None,
        };
        node.encode(self.version, node_pos, &mut pending.bytes)?;
        byte_utils::push_uint(&mut pending.bytes, 0, SIGNED_OFFSET_SIZE);
        self.bind_terminal(pending, &prepared, node_pos, word);
        Ok(array_pos)
    }

    fn append_sibling_array(
        &mut self,
        link_field: usize,
        parent_pos: Option<usize>,
        rest: &[u32],
        word: &NewUnigram,
    ) -> Result<(), DictError> {
        let mut pending = self.pending();
        let array_pos = self.push_single_node_array(&mut pending, parent_pos, rest, word)?;
        self.commit_append(pending)?;
        let mut p = link_field;
        self.buffer.write_offset(&mut p, Some(array_pos))?;
        debug!(array_pos, "appended sibling array");
        Ok(())
    }

    fn append_child_array(
        &mut self,
        node: &PtNodeParams,
        rest: &[u32],
        word: &NewUnigram,
    ) -> Result<(), DictError> {
        let mut pending = self.pending();
        let array_pos = self.push_single_node_array(&mut pending, Some(node.head_pos), rest, word)?;
        self.commit_append(pending)?;
        let mut p = node.children_field_pos;
        self.buffer.write_offset(&mut p, Some(array_pos))?;
        debug!(array_pos, parent = node.head_pos, "appended child array");
        Ok(())
    }

    /// Split `node` after `common` code points. The prefix becomes a new node
    /// P; the remainder R inherits the node's identity; when the new word
    /// diverges, a sibling W of R holds it. P is the terminal when the word
    /// ends inside the node.
    fn split_node(
        &mut self,
        node: &PtNodeParams,
        common: usize,
        rest: &[u32],
        word: &NewUnigram,
    ) -> Result<(), DictError> {
        let word_ends_here = common == rest.len();
        let mut pending = self.pending();

        let p_terminal = if word_ends_here {
            Some(self.prepare_terminal(&mut pending, word)?)
        } else {
            None
        };
        let w_terminal = if word_ends_here {
            None
        } else {
            Some(self.prepare_terminal(&mut pending, word)?)
        };

        // A will-become-non-terminal node sheds its dead payload.
        let keeps_payload = node.state == NodeState::Active;
        let r_attrs = if keeps_payload {
            node.attrs
        } else {
            PtNodeAttributes {
                is_not_a_word: node.attrs.is_not_a_word,
                is_blacklisted: node.attrs.is_blacklisted,
                ..Default::default()
            }
        };
        let r_terminal = if keeps_payload && node.attrs.is_terminal {
            Self::existing_terminal_field(node)
        } else {
            None
        };

        let p_pos = pending.pos();
        let p_code_points = &node.code_points[..common];
        let mut p_node = NewPtNode {
            attrs: p_terminal
                .as_ref()
                .map(|t| t.attrs)
                .unwrap_or_default(),
            parent_pos: node.parent_pos,
            code_points: p_code_points,
            terminal: p_terminal.as_ref().map(|t| t.field),
            children_pos: None,
            shortcut_pos: p_terminal.as_ref().and_then(|t| t.shortcut_pos),
            bigram_pos: None,
        };
        let array_pos = p_pos + p_node.size(self.version);
        p_node.children_pos = Some(array_pos);
        p_node.encode(self.version, p_pos, &mut pending.bytes)?;

        let child_count = if word_ends_here { 1 } else { 2 };
        pt_node::push_array_size(&mut pending.bytes, child_count)?;
        let r_pos = pending.pos();
        let r_node = NewPtNode {
            attrs: r_attrs,
            parent_pos: Some(p_pos),
            code_points: &node.code_points[common..],
            terminal: r_terminal,
            children_pos: node.children_pos,
            shortcut_pos: if r_attrs.has_shortcuts { node.shortcut_pos } else { None },
            bigram_pos: if r_attrs.has_bigrams { node.bigram_pos } else { None },
        };
        r_node.encode(self.version, r_pos, &mut pending.bytes)?;
        if let Some(w) = &w_terminal {
            let w_pos = pending.pos();
            let w_node = NewPtNode {
                attrs: w.attrs,
                parent_pos: Some(p_pos),
                code_points: &rest[common..],
                terminal: Some(w.field),
                children_pos: None,
                shortcut_pos: w.shortcut_pos,
                bigram_pos: None,
            };
            w_node.encode(self.version, w_pos, &mut pending.bytes)?;
            self.bind_terminal(&mut pending, w, w_pos, word);
        }
        byte_utils::push_uint(&mut pending.bytes, 0, SIGNED_OFFSET_SIZE);
        if let Some(p) = &p_terminal {
            self.bind_terminal(&mut pending, p, p_pos, word);
        }

        self.commit_append(pending)?;
        self.mark_moved(node, p_pos, r_pos)?;
        if let Some(TerminalField::TerminalId(id)) = r_terminal {
            self.content.set_terminal_position(id, r_pos)?;
        }
        debug!(old = node.head_pos, p_pos, r_pos, "split node");
        Ok(())
    }

    /// Turn `node` into a forwarding stub and point its children at the
    /// successor.
    fn mark_moved(&mut self, node: &PtNodeParams, forward: usize, successor: usize) -> Result<(), DictError> {
        let mut p = node.parent_field_pos();
        self.buffer.write_offset(&mut p, Some(forward))?;
        let mut p = node.children_field_pos;
        self.buffer.write_offset(&mut p, Some(successor))?;
        let mut p = node.head_pos;
        self.buffer
            .write_uint(&mut p, node.flags_with_state(NodeState::Moved) as u32, 1)?;
        if let Some(children) = node.children_pos {
            self.reparent_children(children, successor)?;
        }
        Ok(())
    }

    fn reparent_children(&mut self, array_pos: usize, parent: usize) -> Result<(), DictError> {
        let heads = self
            .array(array_pos)
            .map(|n| n.map(|n| n.parent_field_pos()))
            .collect::<Result<Vec<_>, _>>()?;
        for field in heads {
            let mut p = field;
            self.buffer.write_offset(&mut p, Some(parent))?;
        }
        Ok(())
    }

    /// Append a copy of `node` with new attributes and list positions, then
    /// retire the original.
    fn relocate(
        &mut self,
        node: &PtNodeParams,
        mut pending: PendingAppend,
        attrs: PtNodeAttributes,
        terminal: Option<TerminalField>,
        shortcut_pos: Option<usize>,
        bigram_pos: Option<usize>,
    ) -> Result<usize, DictError> {
        let new_pos = pending.pos();
        let copy = NewPtNode {
            attrs,
            parent_pos: node.parent_pos,
            code_points: &node.code_points,
            terminal,
            children_pos: node.children_pos,
            shortcut_pos,
            bigram_pos,
        };
        copy.encode(self.version, new_pos, &mut pending.bytes)?;
        if let Some((_, node_pos, _, _)) = pending.new_terminal.as_mut() {
            *node_pos = new_pos;
        }
        self.commit_append(pending)?;
        self.mark_moved(node, new_pos, new_pos)?;
        if let Some(TerminalField::TerminalId(id)) = terminal {
            self.content.set_terminal_position(id, new_pos)?;
        }
        debug!(old = node.head_pos, new_pos, "relocated node");
        Ok(new_pos)
    }

    fn update_existing(&mut self, node: &PtNodeParams, word: &NewUnigram) -> Result<UnigramOutcome, DictError> {
        if !node.attrs.is_terminal {
            // Non-terminal layout: grow into a terminal by relocation.
            let mut pending = self.pending();
            let prepared = self.prepare_terminal(&mut pending, word)?;
            self.bind_terminal(&mut pending, &prepared, 0, word);
            let mut attrs = prepared.attrs;
            attrs.has_bigrams = false;
            self.relocate(node, pending, attrs, Some(prepared.field), prepared.shortcut_pos, None)?;
            return Ok(UnigramOutcome::Added);
        }

        let was_word = node.state == NodeState::Active;
        let mut attrs = node.attrs;
        attrs.is_not_a_word = word.is_not_a_word;
        attrs.is_blacklisted = word.is_blacklisted;

        match (node.probability_field_pos, node.terminal_id) {
            (Some(field), None) => {
                let mut p = field;
                self.buffer
                    .write_uint(&mut p, word.stored.probability as u32, 1)?;
            }
            (_, Some(id)) => {
                *self.content.probability_mut(id)? = ProbabilityEntry {
                    probability: word.stored.probability,
                    historical: word.stored.historical,
                };
            }
            _ => {
                return Err(DictError::Malformed(format!(
                    "terminal at {} without payload field",
                    node.head_pos
                )))
            }
        }

        // Re-read so a relocation copies the payload just written.
        let mut current = self.read_node(node.head_pos)?;
        if let Some(shortcuts) = &word.shortcuts {
            current = self.replace_shortcuts(&current, attrs, shortcuts)?;
            attrs.has_shortcuts = current.attrs.has_shortcuts;
        }

        current.attrs = attrs;
        let mut p = current.head_pos;
        self.buffer
            .write_uint(&mut p, current.flags_with_state(NodeState::Active) as u32, 1)?;
        Ok(if was_word {
            UnigramOutcome::Updated
        } else {
            UnigramOutcome::Added
        })
    }

    /// Install a new shortcut list on a terminal. Returns the node as it now
    /// stands (relocated when the list field had to be added).
    fn replace_shortcuts(
        &mut self,
        node: &PtNodeParams,
        attrs: PtNodeAttributes,
        shortcuts: &[ShortcutTarget],
    ) -> Result<PtNodeParams, DictError> {
        if let Some(id) = node.terminal_id {
            self.content.set_shortcuts(id, shortcuts.to_vec())?;
            return Ok(node.clone());
        }
        if let Some(field) = node.shortcut_field_pos {
            let target = if shortcuts.is_empty() {
                None
            } else {
                Some(self.buffer.append(&shortcut_list::encode(shortcuts, false)?)?)
            };
            let mut p = field;
            self.buffer.write_offset(&mut p, target)?;
            return self.read_node(node.head_pos);
        }
        if shortcuts.is_empty() {
            return Ok(node.clone());
        }
        let mut pending = self.pending();
        let list_pos = pending.pos();
        pending
            .bytes
            .extend(shortcut_list::encode(shortcuts, false)?);
        let mut new_attrs = attrs;
        new_attrs.has_shortcuts = true;
        // Keep the node's current state; the caller rewrites flags after.
        let new_pos = self.relocate(
            node,
            pending,
            new_attrs,
            Self::existing_terminal_field(node),
            Some(list_pos),
            node.bigram_pos,
        )?;
        self.read_node(new_pos)
    }

    /// Logically remove a word. Returns false when it is not a word.
    pub(crate) fn remove_unigram(&mut self, code_points: &[u32]) -> Result<bool, DictError> {
        self.check_updatable()?;
        let Some(node) = self.find_terminal(code_points)? else {
            return Ok(false);
        };
        let state = if node.children_pos.is_some() {
            NodeState::WillBecomeNonTerminal
        } else {
            NodeState::Deleted
        };
        let mut p = node.head_pos;
        self.buffer
            .write_uint(&mut p, node.flags_with_state(state) as u32, 1)?;
        debug!(pos = node.head_pos, ?state, "removed unigram");
        Ok(true)
    }

    /// Add or update the bigram `source -> target`. Both must be live
    /// terminals. Returns true when a new live entry was created.
    pub(crate) fn add_bigram(
        &mut self,
        source: &PtNodeParams,
        target: &PtNodeParams,
        probability: u8,
        historical: Option<HistoricalInfo>,
    ) -> Result<bool, DictError> {
        self.check_updatable()?;
        match self.version {
            FormatVersion::DynamicV4 => {
                let (Some(source_id), Some(target_id)) = (source.terminal_id, target.terminal_id) else {
                    return Err(DictError::Malformed("bigram endpoint without terminal id".into()));
                };
                let list = self.content.bigrams_mut(source_id)?;
                if let Some(entry) = list.iter_mut().find(|e| e.target == target_id) {
                    let was_deleted = entry.deleted;
                    entry.probability = probability;
                    entry.historical = historical;
                    entry.deleted = false;
                    return Ok(was_deleted);
                }
                list.push(BigramContentEntry {
                    target: target_id,
                    probability,
                    historical,
                    deleted: false,
                });
                Ok(true)
            }
            FormatVersion::DynamicV3 => self.add_listed_bigram(source, target, probability),
            FormatVersion::StaticV2 => Err(DictError::NotUpdatable),
        }
    }

    fn add_listed_bigram(
        &mut self,
        source: &PtNodeParams,
        target: &PtNodeParams,
        probability: u8,
    ) -> Result<bool, DictError> {
        let Some(list_pos) = source.bigram_pos else {
            // No list yet: write the first chunk and relocate the source to
            // gain the list field.
            let mut pending = self.pending();
            let chunk_pos = pending.pos();
            pending.bytes.extend(bigram_list::encode_dynamic_chunk(
                chunk_pos,
                &[(target.head_pos, probability)],
            )?);
            let mut attrs = source.attrs;
            attrs.has_bigrams = true;
            self.relocate(
                source,
                pending,
                attrs,
                Self::existing_terminal_field(source),
                source.shortcut_pos,
                Some(chunk_pos),
            )?;
            return Ok(true);
        };

        let list = bigram_list::read_dynamic(&self.buffer, list_pos)?;
        for entry in &list.entries {
            if self.live_node_at(entry.target_pos)?.head_pos != target.head_pos {
                continue;
            }
            let mut p = entry.flags_pos;
            let old = self.buffer.read_u8(&mut p)?;
            let mut p = entry.flags_pos;
            self.buffer.write_uint(
                &mut p,
                bigram_list::rewrite_dynamic_flags(old, false, probability) as u32,
                1,
            )?;
            return Ok(entry.deleted);
        }

        let chunk_pos = self.buffer.tail_position();
        let chunk = bigram_list::encode_dynamic_chunk(chunk_pos, &[(target.head_pos, probability)])?;
        self.buffer.append(&chunk)?;
        let mut p = list.tail_link_field;
        self.buffer.write_offset(&mut p, Some(chunk_pos))?;
        Ok(true)
    }

    /// Mark `source -> target` deleted. Returns false when no live entry
    /// exists.
    pub(crate) fn remove_bigram(&mut self, source: &PtNodeParams, target: &PtNodeParams) -> Result<bool, DictError> {
        self.check_updatable()?;
        match self.version {
            FormatVersion::DynamicV4 => {
                let (Some(source_id), Some(target_id)) = (source.terminal_id, target.terminal_id) else {
                    return Ok(false);
                };
                let list = self.content.bigrams_mut(source_id)?;
                match list.iter_mut().find(|e| e.target == target_id && !e.deleted) {
                    Some(entry) => {
                        entry.deleted = true;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            FormatVersion::DynamicV3 => {
                let Some(list_pos) = source.bigram_pos else {
                    return Ok(false);
                };
                let list = bigram_list::read_dynamic(&self.buffer, list_pos)?;
                for entry in &list.entries {
                    if entry.deleted || self.live_node_at(entry.target_pos)?.head_pos != target.head_pos {
                        continue;
                    }
                    let mut p = entry.flags_pos;
                    let old = self.buffer.read_u8(&mut p)?;
                    let mut p = entry.flags_pos;
                    self.buffer.write_uint(
                        &mut p,
                        bigram_list::rewrite_dynamic_flags(old, true, entry.probability) as u32,
                        1,
                    )?;
                    return Ok(true);
                }
                Ok(false)
            }
            FormatVersion::StaticV2 => Err(DictError::NotUpdatable),
        }
    }
}
