//! Binary dictionary storage.
//!
//! `Dictionary` is the entry point: it owns the header policy and the trie
//! structure (one of the `FormatVersion` variants, chosen when the file is
//! opened). Positions handed out by lookups are byte offsets into the trie
//! body and become stale after any mutation or GC.

mod buffer;
pub(crate) mod byte_utils;
mod bigram_list;
mod content;
mod dictionary;
mod gc;
mod header;
mod pt_node;
mod reading;
mod shortcut_list;
pub mod static_encoder;
#[cfg(test)]
mod tests;
mod updating;

pub use dictionary::{now_epoch, DictStats, Dictionary, PtNodeView, WordEntry, WordIter};
pub use gc::GcStats;
pub use header::{FormatVersion, HeaderPolicy};
pub use shortcut_list::ShortcutTarget;
pub use static_encoder::FusionDictionary;

pub(crate) use byte_utils::{to_code_points, to_string};
pub(crate) use pt_node::PtNodeParams;
pub(crate) use reading::ROOT_POS;

use std::io;

use crate::probability::forgetting_curve::HistoricalInfo;

/// Longest word (in code points) the engine stores or matches.
pub const MAX_WORD_LENGTH: usize = 48;

/// Upper bound on the trie body. Relative offsets are 23-bit magnitudes.
pub const MAX_BUFFER_SIZE: usize = 0x7F_FFFF;

/// Errors raised while loading, mutating or saving a dictionary.
#[derive(Debug, thiserror::Error)]
pub enum DictError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid header (too short)")]
    InvalidHeader,

    #[error("invalid magic number")]
    InvalidMagic,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u16),

    #[error("truncated buffer: read at {pos} past length {len}")]
    Truncated { pos: usize, len: usize },

    #[error("malformed dictionary: {0}")]
    Malformed(String),

    #[error("dictionary is not updatable")]
    NotUpdatable,

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(&'static str),

    #[error("word not found: {0}")]
    WordNotFound(String),

    #[error("invalid word: {0}")]
    InvalidWord(String),

    #[error("content serialization error: {0}")]
    ContentSerialize(bincode::Error),

    #[error("content deserialization error: {0}")]
    ContentDeserialize(bincode::Error),

    #[error("content checksum mismatch")]
    ChecksumMismatch,
}

impl DictError {
    /// True for errors that mean the bytes themselves are unusable.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            DictError::InvalidHeader
                | DictError::InvalidMagic
                | DictError::UnsupportedVersion(_)
                | DictError::Truncated { .. }
                | DictError::Malformed(_)
                | DictError::ContentDeserialize(_)
                | DictError::ChecksumMismatch
        )
    }
}

/// Attributes to store with a unigram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnigramProperty {
    pub probability: u8,
    pub is_not_a_word: bool,
    pub is_blacklisted: bool,
    pub shortcuts: Vec<ShortcutTarget>,
    /// Seconds since the epoch; `None` means "now".
    pub timestamp: Option<u32>,
}

impl UnigramProperty {
    pub fn new(probability: u8) -> Self {
        Self {
            probability,
            is_not_a_word: false,
            is_blacklisted: false,
            shortcuts: Vec::new(),
            timestamp: None,
        }
    }
}

/// A bigram as reported by [`Dictionary::get_word_property`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigramProperty {
    pub target: String,
    /// Stored value: the 4-bit encoded delta, or the decayed probability for
    /// forgetting-curve dictionaries.
    pub raw_probability: i32,
    /// Probability after blending with the target unigram.
    pub probability: i32,
    pub historical_info: Option<HistoricalInfo>,
}

/// Everything the dictionary stores about one word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordProperty {
    pub word: String,
    pub probability: i32,
    pub is_not_a_word: bool,
    pub is_blacklisted: bool,
    pub historical_info: Option<HistoricalInfo>,
    pub shortcuts: Vec<ShortcutTarget>,
    pub bigrams: Vec<BigramProperty>,
}
