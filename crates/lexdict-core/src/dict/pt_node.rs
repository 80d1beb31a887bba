//! PtNode flags, decoded parameters and the per-version node codec.

use super::buffer::ExtendableBuffer;
use super::byte_utils::{self, SIGNED_OFFSET_SIZE};
use super::header::FormatVersion;
use super::{DictError, MAX_WORD_LENGTH};

const MASK_CHILDREN_POSITION_TYPE: u8 = 0xC0;
const FLAG_CHILDREN_POSITION_TYPE_NOPOSITION: u8 = 0x00;
const FLAG_CHILDREN_POSITION_TYPE_ONEBYTE: u8 = 0x40;
const FLAG_CHILDREN_POSITION_TYPE_TWOBYTES: u8 = 0x80;
const FLAG_CHILDREN_POSITION_TYPE_THREEBYTES: u8 = 0xC0;

const MASK_STATE: u8 = 0xC0;
const FLAG_IS_NOT_MOVED: u8 = 0xC0;
const FLAG_IS_MOVED: u8 = 0x40;
const FLAG_IS_DELETED: u8 = 0x80;
const FLAG_WILL_BECOME_NON_TERMINAL: u8 = 0x00;

pub(crate) const FLAG_HAS_MULTIPLE_CHARS: u8 = 0x20;
pub(crate) const FLAG_IS_TERMINAL: u8 = 0x10;
pub(crate) const FLAG_HAS_SHORTCUT_TARGETS: u8 = 0x08;
pub(crate) const FLAG_HAS_BIGRAMS: u8 = 0x04;
pub(crate) const FLAG_IS_NOT_A_WORD: u8 = 0x02;
pub(crate) const FLAG_IS_BLACKLISTED: u8 = 0x01;

const PROBABILITY_SIZE: usize = 1;
const TERMINAL_ID_SIZE: usize = 3;
pub(crate) const MAX_TERMINAL_ID: u32 = 0xFF_FFFF;

/// Node lifecycle for dynamic formats (bits 7-6 of the flags byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    Active,
    /// The parent field holds the replacement (`forward`) and the children
    /// field the identity successor.
    Moved,
    Deleted,
    /// Still laid out as terminal but no longer a word.
    WillBecomeNonTerminal,
}

impl NodeState {
    fn bits(self) -> u8 {
        match self {
            NodeState::Active => FLAG_IS_NOT_MOVED,
            NodeState::Moved => FLAG_IS_MOVED,
            NodeState::Deleted => FLAG_IS_DELETED,
            NodeState::WillBecomeNonTerminal => FLAG_WILL_BECOME_NON_TERMINAL,
        }
    }

    fn from_bits(flags: u8) -> Self {
        match flags & MASK_STATE {
            FLAG_IS_NOT_MOVED => NodeState::Active,
            FLAG_IS_MOVED => NodeState::Moved,
            FLAG_IS_DELETED => NodeState::Deleted,
            _ => NodeState::WillBecomeNonTerminal,
        }
    }
}

/// Attribute bits of a node, independent of format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct PtNodeAttributes {
    pub(crate) is_terminal: bool,
    pub(crate) has_shortcuts: bool,
    pub(crate) has_bigrams: bool,
    pub(crate) is_not_a_word: bool,
    pub(crate) is_blacklisted: bool,
}

impl PtNodeAttributes {
    fn bits(&self) -> u8 {
        let mut f = 0;
        if self.is_terminal {
            f |= FLAG_IS_TERMINAL;
        }
        if self.has_shortcuts {
            f |= FLAG_HAS_SHORTCUT_TARGETS;
        }
        if self.has_bigrams {
            f |= FLAG_HAS_BIGRAMS;
        }
        if self.is_not_a_word {
            f |= FLAG_IS_NOT_A_WORD;
        }
        if self.is_blacklisted {
            f |= FLAG_IS_BLACKLISTED;
        }
        f
    }

    fn from_bits(flags: u8) -> Self {
        Self {
            is_terminal: flags & FLAG_IS_TERMINAL != 0,
            has_shortcuts: flags & FLAG_HAS_SHORTCUT_TARGETS != 0,
            has_bigrams: flags & FLAG_HAS_BIGRAMS != 0,
            is_not_a_word: flags & FLAG_IS_NOT_A_WORD != 0,
            is_blacklisted: flags & FLAG_IS_BLACKLISTED != 0,
        }
    }
}

/// Decoded node as found at `head_pos`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PtNodeParams {
    pub(crate) head_pos: usize,
    pub(crate) size: usize,
    pub(crate) state: NodeState,
    pub(crate) attrs: PtNodeAttributes,
    /// Parent link; for moved nodes the forward position.
    pub(crate) parent_pos: Option<usize>,
    pub(crate) code_points: Vec<u32>,
    /// v2/v3 probability byte (terminal layout only).
    pub(crate) probability: Option<u8>,
    /// v4 terminal id (terminal layout only).
    pub(crate) terminal_id: Option<u32>,
    /// Children array; for moved nodes the identity successor.
    pub(crate) children_pos: Option<usize>,
    /// v2: inline list start. v3: list position.
    pub(crate) shortcut_pos: Option<usize>,
    /// v2: inline list start. v3: list position.
    pub(crate) bigram_pos: Option<usize>,
    pub(crate) probability_field_pos: Option<usize>,
    pub(crate) children_field_pos: usize,
    pub(crate) shortcut_field_pos: Option<usize>,
    pub(crate) bigram_field_pos: Option<usize>,
}

impl PtNodeParams {
    /// A node that represents a word right now.
    pub(crate) fn is_terminal(&self) -> bool {
        self.attrs.is_terminal && self.state == NodeState::Active
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.state == NodeState::Deleted
    }

    pub(crate) fn is_moved(&self) -> bool {
        self.state == NodeState::Moved
    }

    pub(crate) fn parent_field_pos(&self) -> usize {
        self.head_pos + 1
    }

    pub(crate) fn forward_pos(&self) -> Option<usize> {
        self.is_moved().then_some(self.parent_pos).flatten()
    }

    pub(crate) fn successor_pos(&self) -> Option<usize> {
        self.is_moved().then_some(self.children_pos).flatten()
    }

    /// Flags byte with a different state, attributes untouched.
    pub(crate) fn flags_with_state(&self, state: NodeState) -> u8 {
        state.bits() | self.multi_char_bit() | self.attrs.bits()
    }

    fn multi_char_bit(&self) -> u8 {
        if self.code_points.len() > 1 {
            FLAG_HAS_MULTIPLE_CHARS
        } else {
            0
        }
    }
}

/// Decode the node at `pos`.
pub(crate) fn read_pt_node(
    buffer: &ExtendableBuffer,
    version: FormatVersion,
    pos: usize,
) -> Result<PtNodeParams, DictError> {
    let mut p = pos;
    let flags = buffer.read_u8(&mut p)?;
    let attrs = PtNodeAttributes::from_bits(flags);
    let state = if version.is_dynamic() {
        NodeState::from_bits(flags)
    } else {
        NodeState::Active
    };

    let parent_pos = if version.is_dynamic() {
        buffer.read_offset(&mut p)?
    } else {
        None
    };

    let mut code_points = Vec::new();
    if flags & FLAG_HAS_MULTIPLE_CHARS != 0 {
        while let Some(c) = buffer.read_code_point(&mut p)? {
            if code_points.len() >= MAX_WORD_LENGTH {
                return Err(DictError::Malformed(format!(
                    "node at {pos} exceeds max word length"
                )));
            }
            code_points.push(c);
        }
        if code_points.len() < 2 {
            return Err(DictError::Malformed(format!(
                "multi-char node at {pos} has {} code points",
                code_points.len()
            )));
        }
    } else {
        match buffer.read_code_point(&mut p)? {
            Some(c) => code_points.push(c),
            None => {
                return Err(DictError::Malformed(format!(
                    "empty node at {pos}"
                )))
            }
        }
    }

    let mut probability = None;
    let mut terminal_id = None;
    let mut probability_field_pos = None;
    if attrs.is_terminal {
        probability_field_pos = Some(p);
        if version.has_content_store() {
            terminal_id = Some(buffer.read_uint(&mut p, TERMINAL_ID_SIZE)?);
        } else {
            probability = Some(buffer.read_u8(&mut p)?);
        }
    }

    let children_field_pos = p;
    let children_pos = if version.is_dynamic() {
        buffer.read_offset(&mut p)?
    } else {
        let width = match flags & MASK_CHILDREN_POSITION_TYPE {
            FLAG_CHILDREN_POSITION_TYPE_NOPOSITION => 0,
            FLAG_CHILDREN_POSITION_TYPE_ONEBYTE => 1,
            FLAG_CHILDREN_POSITION_TYPE_TWOBYTES => 2,
            _ => 3,
        };
        if width == 0 {
            None
        } else {
            let field = p;
            let offset = buffer.read_uint(&mut p, width)? as usize;
            if offset == 0 {
                return Err(DictError::Malformed(format!(
                    "zero children offset at {field}"
                )));
            }
            Some(field + offset)
        }
    };

    let mut shortcut_pos = None;
    let mut shortcut_field_pos = None;
    let mut bigram_pos = None;
    let mut bigram_field_pos = None;
    match version {
        FormatVersion::StaticV2 => {
            if attrs.has_shortcuts {
                shortcut_pos = Some(p);
                p += super::shortcut_list::static_list_size(buffer, p)?;
            }
            if attrs.has_bigrams {
                bigram_pos = Some(p);
                p += super::bigram_list::static_list_size(buffer, p)?;
            }
        }
        FormatVersion::DynamicV3 => {
            if attrs.has_shortcuts {
                shortcut_field_pos = Some(p);
                shortcut_pos = buffer.read_offset(&mut p)?;
            }
            if attrs.has_bigrams {
                bigram_field_pos = Some(p);
                bigram_pos = buffer.read_offset(&mut p)?;
            }
        }
        FormatVersion::DynamicV4 => {}
    }

    Ok(PtNodeParams {
        head_pos: pos,
        size: p - pos,
        state,
        attrs,
        parent_pos,
        code_points,
        probability,
        terminal_id,
        children_pos,
        shortcut_pos,
        bigram_pos,
        probability_field_pos,
        children_field_pos,
        shortcut_field_pos,
        bigram_field_pos,
    })
}

/// Payload of the terminal field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TerminalField {
    Probability(u8),
    TerminalId(u32),
}

/// A dynamic-format node ready to be encoded at a known position.
#[derive(Debug, Clone)]
pub(crate) struct NewPtNode<'a> {
    pub(crate) attrs: PtNodeAttributes,
    pub(crate) parent_pos: Option<usize>,
    pub(crate) code_points: &'a [u32],
    pub(crate) terminal: Option<TerminalField>,
    pub(crate) children_pos: Option<usize>,
    pub(crate) shortcut_pos: Option<usize>,
    pub(crate) bigram_pos: Option<usize>,
}

impl NewPtNode<'_> {
    pub(crate) fn size(&self, version: FormatVersion) -> usize {
        debug_assert!(version.is_dynamic());
        let multi = self.code_points.len() > 1;
        let mut size = 1 + SIGNED_OFFSET_SIZE + byte_utils::code_points_size(self.code_points, multi);
        if self.attrs.is_terminal {
            size += if version.has_content_store() {
                TERMINAL_ID_SIZE
            } else {
                PROBABILITY_SIZE
            };
        }
        size += SIGNED_OFFSET_SIZE;
        if version == FormatVersion::DynamicV3 {
            if self.attrs.has_shortcuts {
                size += SIGNED_OFFSET_SIZE;
            }
            if self.attrs.has_bigrams {
                size += SIGNED_OFFSET_SIZE;
            }
        }
        size
    }

    fn list_field_count(&self, version: FormatVersion) -> usize {
        if version == FormatVersion::DynamicV3 {
            usize::from(self.attrs.has_shortcuts) + usize::from(self.attrs.has_bigrams)
        } else {
            0
        }
    }

    /// Offsets from the node head of the children, shortcut-list and
    /// bigram-list fields.
    pub(crate) fn field_offsets(&self, version: FormatVersion) -> (usize, Option<usize>, Option<usize>) {
        let size = self.size(version);
        let children = size - SIGNED_OFFSET_SIZE * (1 + self.list_field_count(version));
        let lists = version == FormatVersion::DynamicV3;
        let shortcut = (lists && self.attrs.has_shortcuts).then_some(children + SIGNED_OFFSET_SIZE);
        let bigram = (lists && self.attrs.has_bigrams).then_some(size - SIGNED_OFFSET_SIZE);
        (children, shortcut, bigram)
    }

    /// Encode for placement at `head_pos`. Offsets are relative to each
    /// field, so the position must be final.
    pub(crate) fn encode(
        &self,
        version: FormatVersion,
        head_pos: usize,
        out: &mut Vec<u8>,
    ) -> Result<(), DictError> {
        debug_assert!(version.is_dynamic());
        if self.code_points.is_empty() {
            return Err(DictError::InvalidWord("empty node".into()));
        }
        let start = out.len();
        let pos_of = |out: &Vec<u8>| head_pos + (out.len() - start);

        let multi = self.code_points.len() > 1;
        let mut flags = FLAG_IS_NOT_MOVED | self.attrs.bits();
        if multi {
            flags |= FLAG_HAS_MULTIPLE_CHARS;
        }
        out.push(flags);
        let raw = byte_utils::encode_offset(pos_of(out), self.parent_pos)?;
        byte_utils::push_uint(out, raw, SIGNED_OFFSET_SIZE);
        byte_utils::push_code_points(out, self.code_points, multi);
        if self.attrs.is_terminal {
            match (self.terminal, version.has_content_store()) {
                (Some(TerminalField::Probability(p)), false) => out.push(p),
                (Some(TerminalField::TerminalId(id)), true) => {
                    byte_utils::push_uint(out, id, TERMINAL_ID_SIZE)
                }
                _ => {
                    return Err(DictError::Malformed(
                        "terminal field does not match format version".into(),
                    ))
                }
            }
        }
        let raw = byte_utils::encode_offset(pos_of(out), self.children_pos)?;
        byte_utils::push_uint(out, raw, SIGNED_OFFSET_SIZE);
        if version == FormatVersion::DynamicV3 {
            if self.attrs.has_shortcuts {
                let raw = byte_utils::encode_offset(pos_of(out), self.shortcut_pos)?;
                byte_utils::push_uint(out, raw, SIGNED_OFFSET_SIZE);
            }
            if self.attrs.has_bigrams {
                let raw = byte_utils::encode_offset(pos_of(out), self.bigram_pos)?;
                byte_utils::push_uint(out, raw, SIGNED_OFFSET_SIZE);
            }
        }
        debug_assert_eq!(out.len() - start, self.size(version));
        Ok(())
    }
}

/// Flags byte for a static (v2) node.
pub(crate) fn static_flags(attrs: PtNodeAttributes, multi_char: bool, children_width: usize) -> u8 {
    let position_type = match children_width {
        0 => FLAG_CHILDREN_POSITION_TYPE_NOPOSITION,
        1 => FLAG_CHILDREN_POSITION_TYPE_ONEBYTE,
        2 => FLAG_CHILDREN_POSITION_TYPE_TWOBYTES,
        _ => FLAG_CHILDREN_POSITION_TYPE_THREEBYTES,
    };
    let mut flags = position_type | attrs.bits();
    if multi_char {
        flags |= FLAG_HAS_MULTIPLE_CHARS;
    }
    flags
}

/// PtNode array size field: 1 byte below 0x80, else 2 bytes tagged 0x8000.
pub(crate) const MAX_PT_NODE_ARRAY_SIZE: usize = 0x7FFF;

pub(crate) fn array_size_field_size(count: usize) -> usize {
    if count < 0x80 {
        1
    } else {
        2
    }
}

pub(crate) fn push_array_size(out: &mut Vec<u8>, count: usize) -> Result<(), DictError> {
    if count > MAX_PT_NODE_ARRAY_SIZE {
        return Err(DictError::CapacityExceeded("pt node array size"));
    }
    if count < 0x80 {
        out.push(count as u8);
    } else {
        byte_utils::push_uint(out, 0x8000 | count as u32, 2);
    }
    Ok(())
}

pub(crate) fn read_array_size(buffer: &ExtendableBuffer, pos: &mut usize) -> Result<usize, DictError> {
    let first = buffer.read_u8(pos)?;
    if first & 0x80 == 0 {
        Ok(first as usize)
    } else {
        let second = buffer.read_u8(pos)?;
        Ok((((first & 0x7F) as usize) << 8) | second as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node<'a>(cps: &'a [u32], terminal: Option<TerminalField>) -> NewPtNode<'a> {
        NewPtNode {
            attrs: PtNodeAttributes {
                is_terminal: terminal.is_some(),
                ..Default::default()
            },
            parent_pos: Some(0),
            code_points: cps,
            terminal,
            children_pos: None,
            shortcut_pos: None,
            bigram_pos: None,
        }
    }

    #[test]
    fn dynamic_node_round_trip() {
        let cps: Vec<u32> = "hello".chars().map(|c| c as u32).collect();
        let n = node(&cps, Some(TerminalField::Probability(200)));
        let mut out = vec![0u8; 10];
        n.encode(FormatVersion::DynamicV3, 10, &mut out).unwrap();
        let buf = ExtendableBuffer::owned(out, false);
        let read = read_pt_node(&buf, FormatVersion::DynamicV3, 10).unwrap();
        assert_eq!(read.code_points, cps);
        assert_eq!(read.probability, Some(200));
        assert_eq!(read.parent_pos, Some(0));
        assert_eq!(read.children_pos, None);
        assert_eq!(read.state, NodeState::Active);
        assert!(read.is_terminal());
        assert_eq!(read.size, n.size(FormatVersion::DynamicV3));
    }

    #[test]
    fn field_offsets_match_decoder() {
        let cps: Vec<u32> = "xy".chars().map(|c| c as u32).collect();
        let mut n = node(&cps, Some(TerminalField::Probability(9)));
        n.attrs.has_shortcuts = true;
        n.attrs.has_bigrams = true;
        n.shortcut_pos = Some(100);
        n.bigram_pos = Some(200);
        let mut out = vec![0u8; 2];
        n.encode(FormatVersion::DynamicV3, 2, &mut out).unwrap();
        out.resize(300, 0);
        let buf = ExtendableBuffer::owned(out, false);
        let read = read_pt_node(&buf, FormatVersion::DynamicV3, 2).unwrap();
        let (children, shortcut, bigram) = n.field_offsets(FormatVersion::DynamicV3);
        assert_eq!(read.children_field_pos, 2 + children);
        assert_eq!(read.shortcut_field_pos, shortcut.map(|o| 2 + o));
        assert_eq!(read.bigram_field_pos, bigram.map(|o| 2 + o));
        assert_eq!(read.shortcut_pos, Some(100));
        assert_eq!(read.bigram_pos, Some(200));
    }

    #[test]
    fn v4_node_stores_terminal_id() {
        let cps = ['x' as u32];
        let n = node(&cps, Some(TerminalField::TerminalId(0x01_0203)));
        let mut out = vec![0u8; 4];
        n.encode(FormatVersion::DynamicV4, 4, &mut out).unwrap();
        let buf = ExtendableBuffer::owned(out, false);
        let read = read_pt_node(&buf, FormatVersion::DynamicV4, 4).unwrap();
        assert_eq!(read.terminal_id, Some(0x01_0203));
        assert_eq!(read.probability, None);
    }

    #[test]
    fn mismatched_terminal_field_is_rejected() {
        let cps = ['x' as u32];
        let n = node(&cps, Some(TerminalField::Probability(1)));
        let mut out = vec![0u8; 4];
        assert!(n.encode(FormatVersion::DynamicV4, 4, &mut out).is_err());
    }

    #[test]
    fn array_size_encoding() {
        let mut out = Vec::new();
        push_array_size(&mut out, 5).unwrap();
        push_array_size(&mut out, 300).unwrap();
        assert_eq!(out.len(), 3);
        let buf = ExtendableBuffer::owned(out, false);
        let mut p = 0;
        assert_eq!(read_array_size(&buf, &mut p).unwrap(), 5);
        assert_eq!(read_array_size(&buf, &mut p).unwrap(), 300);
        assert!(push_array_size(&mut Vec::new(), 0x8000).is_err());
    }

    #[test]
    fn state_bits_round_trip() {
        for state in [
            NodeState::Active,
            NodeState::Moved,
            NodeState::Deleted,
            NodeState::WillBecomeNonTerminal,
        ] {
            assert_eq!(NodeState::from_bits(state.bits() | 0x12), state);
        }
    }
}
