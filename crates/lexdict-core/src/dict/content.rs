//! Version-4 content store, keyed by terminal id.
//!
//! The trie only holds a 3-byte terminal id per word; probabilities,
//! historical info, bigrams and shortcuts live here and are written after the
//! trie as one frame: `[len u32][crc32 u32][bincode payload]`.

use serde::{Deserialize, Serialize};

use super::byte_utils;
use super::pt_node::MAX_TERMINAL_ID;
use super::shortcut_list::ShortcutTarget;
use super::DictError;
use crate::probability::forgetting_curve::HistoricalInfo;

const FRAME_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ProbabilityEntry {
    pub(crate) probability: u8,
    pub(crate) historical: Option<HistoricalInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BigramContentEntry {
    pub(crate) target: u32,
    /// Encoded 4-bit delta; unused when `historical` is set.
    pub(crate) probability: u8,
    pub(crate) historical: Option<HistoricalInfo>,
    pub(crate) deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ContentStore {
    /// Node position of each terminal id as last written.
    pub(crate) terminal_positions: Vec<u32>,
    pub(crate) probabilities: Vec<ProbabilityEntry>,
    pub(crate) bigrams: Vec<Vec<BigramContentEntry>>,
    pub(crate) shortcuts: Vec<Vec<ShortcutTarget>>,
}

impl ContentStore {
    pub(crate) fn terminal_count(&self) -> usize {
        self.terminal_positions.len()
    }

    /// Allocate the next terminal id.
    pub(crate) fn push_terminal(&mut self, pos: usize, entry: ProbabilityEntry) -> Result<u32, DictError> {
        let id = self.terminal_positions.len() as u32;
        if id > MAX_TERMINAL_ID {
            return Err(DictError::CapacityExceeded("terminal ids"));
        }
        self.terminal_positions.push(pos as u32);
        self.probabilities.push(entry);
        self.bigrams.push(Vec::new());
        self.shortcuts.push(Vec::new());
        Ok(id)
    }

    fn check(&self, id: u32) -> Result<usize, DictError> {
        let i = id as usize;
        if i < self.terminal_positions.len() {
            Ok(i)
        } else {
            Err(DictError::Malformed(format!("unknown terminal id {id}")))
        }
    }

    pub(crate) fn terminal_position(&self, id: u32) -> Result<usize, DictError> {
        Ok(self.terminal_positions[self.check(id)?] as usize)
    }

    pub(crate) fn set_terminal_position(&mut self, id: u32, pos: usize) -> Result<(), DictError> {
        let i = self.check(id)?;
        self.terminal_positions[i] = pos as u32;
        Ok(())
    }

    pub(crate) fn probability(&self, id: u32) -> Result<&ProbabilityEntry, DictError> {
        Ok(&self.probabilities[self.check(id)?])
    }

    pub(crate) fn probability_mut(&mut self, id: u32) -> Result<&mut ProbabilityEntry, DictError> {
        let i = self.check(id)?;
        Ok(&mut self.probabilities[i])
    }

    pub(crate) fn bigrams(&self, id: u32) -> Result<&[BigramContentEntry], DictError> {
        Ok(&self.bigrams[self.check(id)?])
    }

    pub(crate) fn bigrams_mut(&mut self, id: u32) -> Result<&mut Vec<BigramContentEntry>, DictError> {
        let i = self.check(id)?;
        Ok(&mut self.bigrams[i])
    }

    pub(crate) fn shortcuts(&self, id: u32) -> Result<&[ShortcutTarget], DictError> {
        Ok(&self.shortcuts[self.check(id)?])
    }

    pub(crate) fn set_shortcuts(&mut self, id: u32, targets: Vec<ShortcutTarget>) -> Result<(), DictError> {
        let i = self.check(id)?;
        self.shortcuts[i] = targets;
        Ok(())
    }

    pub(crate) fn to_frame(&self) -> Result<Vec<u8>, DictError> {
        let payload = bincode::serialize(self).map_err(DictError::ContentSerialize)?;
        let len = u32::try_from(payload.len()).map_err(|_| DictError::CapacityExceeded("content store"))?;
        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        byte_utils::push_uint(&mut out, len, 4);
        byte_utils::push_uint(&mut out, crc32fast::hash(&payload), 4);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    pub(crate) fn from_frame(data: &[u8]) -> Result<Self, DictError> {
        let mut pos = 0;
        let len = byte_utils::read_uint(data, &mut pos, 4)? as usize;
        let crc = byte_utils::read_uint(data, &mut pos, 4)?;
        let payload = data.get(pos..pos + len).ok_or(DictError::Truncated {
            pos,
            len: data.len(),
        })?;
        if crc32fast::hash(payload) != crc {
            return Err(DictError::ChecksumMismatch);
        }
        let store: ContentStore = bincode::deserialize(payload).map_err(DictError::ContentDeserialize)?;
        let n = store.terminal_positions.len();
        if store.probabilities.len() != n || store.bigrams.len() != n || store.shortcuts.len() != n {
            return Err(DictError::Malformed("content tables disagree in length".into()));
        }
        Ok(store)
    }
}
