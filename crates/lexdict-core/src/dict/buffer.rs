//! Two-segment byte buffer backing a trie.
//!
//! The original region comes from the file (mapped read-only, or mapped
//! copy-on-write when the dictionary is opened for update) and the additional
//! region is an in-memory tail that only ever grows. Positions address the
//! concatenation of both.

use memmap2::{Mmap, MmapMut};

use super::byte_utils;
use super::{DictError, MAX_BUFFER_SIZE};

pub(crate) enum OriginalRegion {
    /// Read-only mapping of `map[start..start + len]`.
    Mapped { map: Mmap, start: usize, len: usize },
    /// Private writable mapping; writes never reach the file.
    CopyOnWrite {
        map: MmapMut,
        start: usize,
        len: usize,
    },
    Owned(Vec<u8>),
}

impl OriginalRegion {
    fn bytes(&self) -> &[u8] {
        match self {
            OriginalRegion::Mapped { map, start, len } => &map[*start..*start + *len],
            OriginalRegion::CopyOnWrite { map, start, len } => &map[*start..*start + *len],
            OriginalRegion::Owned(v) => v,
        }
    }

    fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        match self {
            OriginalRegion::Mapped { .. } => None,
            OriginalRegion::CopyOnWrite { map, start, len } => Some(&mut map[*start..*start + *len]),
            OriginalRegion::Owned(v) => Some(v),
        }
    }
}

pub(crate) struct ExtendableBuffer {
    original: OriginalRegion,
    additional: Vec<u8>,
    updatable: bool,
    max_size: usize,
}

impl ExtendableBuffer {
    pub(crate) fn new(original: OriginalRegion, additional: Vec<u8>, updatable: bool) -> Self {
        let updatable = updatable && !matches!(original, OriginalRegion::Mapped { .. });
        Self {
            original,
            additional,
            updatable,
            max_size: MAX_BUFFER_SIZE,
        }
    }

    /// Lower the size the buffer may grow to. Carried across compaction.
    pub(crate) fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size.min(MAX_BUFFER_SIZE);
    }

    pub(crate) fn max_size(&self) -> usize {
        self.max_size
    }

    pub(crate) fn owned(bytes: Vec<u8>, updatable: bool) -> Self {
        Self::new(OriginalRegion::Owned(bytes), Vec::new(), updatable)
    }

    pub(crate) fn is_updatable(&self) -> bool {
        self.updatable
    }

    pub(crate) fn original_size(&self) -> usize {
        self.original.bytes().len()
    }

    pub(crate) fn additional_size(&self) -> usize {
        self.additional.len()
    }

    /// Position the next appended byte will occupy.
    pub(crate) fn tail_position(&self) -> usize {
        self.original_size() + self.additional.len()
    }

    pub(crate) fn remaining_capacity(&self) -> usize {
        self.max_size.saturating_sub(self.tail_position())
    }

    pub(crate) fn original_bytes(&self) -> &[u8] {
        self.original.bytes()
    }

    pub(crate) fn additional_bytes(&self) -> &[u8] {
        &self.additional
    }

    /// Region containing `pos` and the absolute position of its first byte.
    fn region(&self, pos: usize) -> (&[u8], usize) {
        let original_size = self.original_size();
        if pos < original_size {
            (self.original.bytes(), 0)
        } else {
            (&self.additional, original_size)
        }
    }

    fn region_mut(&mut self, pos: usize) -> Result<(&mut [u8], usize), DictError> {
        if !self.updatable {
            return Err(DictError::NotUpdatable);
        }
        let original_size = self.original_size();
        if pos < original_size {
            let bytes = self.original.bytes_mut().ok_or(DictError::NotUpdatable)?;
            Ok((bytes, 0))
        } else {
            Ok((&mut self.additional, original_size))
        }
    }

    fn read_with<T>(
        &self,
        pos: &mut usize,
        f: impl FnOnce(&[u8], &mut usize) -> Result<T, DictError>,
    ) -> Result<T, DictError> {
        let (data, base) = self.region(*pos);
        let mut local = *pos - base;
        let value = f(data, &mut local)?;
        *pos = base + local;
        Ok(value)
    }

    pub(crate) fn read_u8(&self, pos: &mut usize) -> Result<u8, DictError> {
        self.read_with(pos, byte_utils::read_u8)
    }

    pub(crate) fn read_uint(&self, pos: &mut usize, width: usize) -> Result<u32, DictError> {
        self.read_with(pos, |data, p| byte_utils::read_uint(data, p, width))
    }

    pub(crate) fn read_code_point(&self, pos: &mut usize) -> Result<Option<u32>, DictError> {
        self.read_with(pos, byte_utils::read_code_point)
    }

    /// Read a 3-byte signed offset stored relative to its own field.
    pub(crate) fn read_offset(&self, pos: &mut usize) -> Result<Option<usize>, DictError> {
        let field_pos = *pos;
        let raw = self.read_uint(pos, byte_utils::SIGNED_OFFSET_SIZE)?;
        byte_utils::decode_offset(field_pos, raw)
    }

    /// Overwrite existing bytes in place. Never grows the buffer.
    pub(crate) fn write_uint(
        &mut self,
        pos: &mut usize,
        value: u32,
        width: usize,
    ) -> Result<(), DictError> {
        let (data, base) = self.region_mut(*pos)?;
        let mut local = *pos - base;
        byte_utils::write_uint(data, &mut local, value, width)?;
        *pos = base + local;
        Ok(())
    }

    pub(crate) fn write_offset(
        &mut self,
        pos: &mut usize,
        target: Option<usize>,
    ) -> Result<(), DictError> {
        let raw = byte_utils::encode_offset(*pos, target)?;
        self.write_uint(pos, raw, byte_utils::SIGNED_OFFSET_SIZE)
    }

    pub(crate) fn ensure_can_append(&self, len: usize) -> Result<(), DictError> {
        if !self.updatable {
            return Err(DictError::NotUpdatable);
        }
        if len > self.remaining_capacity() {
            return Err(DictError::CapacityExceeded("dictionary buffer"));
        }
        Ok(())
    }

    /// Append a fully encoded record, returning its position.
    pub(crate) fn append(&mut self, bytes: &[u8]) -> Result<usize, DictError> {
        self.ensure_can_append(bytes.len())?;
        let pos = self.tail_position();
        self.additional.extend_from_slice(bytes);
        Ok(pos)
    }
}
