//! Dictionary header: fixed preamble plus key/value attributes.

use std::collections::BTreeMap;
use std::str::FromStr;

use super::byte_utils;
use super::DictError;
use crate::settings::settings;

pub const MAGIC: u32 = 0x9BC1_3AFE;
const SUPPORTS_DYNAMIC_UPDATE_FLAG: u16 = 0x0008;
/// magic + version + format flags + header size
const FIXED_HEADER_SIZE: usize = 4 + 2 + 2 + 4;
const MAX_ATTRIBUTE_LENGTH: usize = 1024;

const USES_FORGETTING_CURVE_KEY: &str = "USES_FORGETTING_CURVE";
const UNIGRAM_COUNT_KEY: &str = "UNIGRAM_COUNT";
const BIGRAM_COUNT_KEY: &str = "BIGRAM_COUNT";
const MAX_UNIGRAM_COUNT_KEY: &str = "MAX_UNIGRAM_COUNT";
const MAX_BIGRAM_COUNT_KEY: &str = "MAX_BIGRAM_COUNT";
const MAX_UNIGRAM_COUNT_AFTER_GC_KEY: &str = "MAX_UNIGRAM_COUNT_AFTER_GC";
const MAX_BIGRAM_COUNT_AFTER_GC_KEY: &str = "MAX_BIGRAM_COUNT_AFTER_GC";
const EXTENDED_REGION_SIZE_KEY: &str = "EXTENDED_REGION_SIZE";
const LAST_DECAYED_TIME_KEY: &str = "LAST_DECAYED_TIME";
const OCCURRENCES_TO_LEVEL_UP_KEY: &str = "FORGETTING_CURVE_OCCURRENCES_TO_LEVEL_UP";
const DURATION_TO_LEVEL_DOWN_KEY: &str = "FORGETTING_CURVE_DURATION_TO_LEVEL_DOWN_IN_SECONDS";
const PROBABILITY_TABLE_ID_KEY: &str = "FORGETTING_CURVE_PROBABILITY_VALUES_TABLE_ID";
const TRIE_SIZE_KEY: &str = "TRIE_SIZE";
const LOCALE_KEY: &str = "locale";
const DICTIONARY_KEY: &str = "dictionary";

/// On-disk layout variant, fixed when the dictionary is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatVersion {
    /// Read-only, variable-width offsets, inline attribute lists.
    StaticV2,
    /// Fixed-width offsets, parent links, forward-linked arrays, out-of-line
    /// bigram/shortcut lists.
    DynamicV3,
    /// v3 trie with terminal ids; probabilities, bigrams and shortcuts live in
    /// a separate content store keyed by terminal id.
    DynamicV4,
}

impl FormatVersion {
    pub fn number(self) -> u16 {
        match self {
            FormatVersion::StaticV2 => 2,
            FormatVersion::DynamicV3 => 3,
            FormatVersion::DynamicV4 => 4,
        }
    }

    pub fn from_number(n: u16) -> Result<Self, DictError> {
        match n {
            2 => Ok(FormatVersion::StaticV2),
            3 => Ok(FormatVersion::DynamicV3),
            4 => Ok(FormatVersion::DynamicV4),
            other => Err(DictError::UnsupportedVersion(other)),
        }
    }

    /// Whether the node layout carries parent links, node states and
    /// forward links.
    pub fn is_dynamic(self) -> bool {
        !matches!(self, FormatVersion::StaticV2)
    }

    pub(crate) fn has_content_store(self) -> bool {
        matches!(self, FormatVersion::DynamicV4)
    }
}

/// Header options and attributes of one dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPolicy {
    version: FormatVersion,
    supports_dynamic_update: bool,
    uses_forgetting_curve: bool,
    pub(crate) unigram_count: usize,
    pub(crate) bigram_count: usize,
    max_unigram_count: usize,
    max_bigram_count: usize,
    max_unigram_count_after_gc: usize,
    max_bigram_count_after_gc: usize,
    pub(crate) extended_region_size: usize,
    pub(crate) last_decayed_time: u32,
    occurrences_to_level_up: u32,
    duration_to_level_down_secs: u32,
    probability_table_id: usize,
    pub(crate) trie_size: usize,
    /// Attributes without a typed field, preserved verbatim.
    attributes: BTreeMap<String, String>,
}

impl HeaderPolicy {
    /// A fresh header with defaults from [`settings()`].
    pub fn new(version: FormatVersion) -> Self {
        let s = settings();
        Self {
            version,
            supports_dynamic_update: version.is_dynamic(),
            uses_forgetting_curve: false,
            unigram_count: 0,
            bigram_count: 0,
            max_unigram_count: s.gc.max_unigram_count,
            max_bigram_count: s.gc.max_bigram_count,
            max_unigram_count_after_gc: s.gc.max_unigram_count_after_gc,
            max_bigram_count_after_gc: s.gc.max_bigram_count_after_gc,
            extended_region_size: 0,
            last_decayed_time: 0,
            occurrences_to_level_up: s.forgetting_curve.occurrences_to_level_up,
            duration_to_level_down_secs: s.forgetting_curve.duration_to_level_down_secs,
            probability_table_id: s.forgetting_curve.probability_table_id,
            trie_size: 0,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_forgetting_curve(mut self, enabled: bool) -> Self {
        self.uses_forgetting_curve = enabled;
        self
    }

    pub fn with_dynamic_update(mut self, enabled: bool) -> Self {
        self.supports_dynamic_update = enabled && self.version.is_dynamic();
        self
    }

    pub fn with_max_counts(
        mut self,
        max_unigrams: usize,
        max_bigrams: usize,
        max_unigrams_after_gc: usize,
        max_bigrams_after_gc: usize,
    ) -> Self {
        self.max_unigram_count = max_unigrams;
        self.max_bigram_count = max_bigrams;
        self.max_unigram_count_after_gc = max_unigrams_after_gc.min(max_unigrams);
        self.max_bigram_count_after_gc = max_bigrams_after_gc.min(max_bigrams);
        self
    }

    pub fn with_forgetting_curve_params(
        mut self,
        occurrences_to_level_up: u32,
        duration_to_level_down_secs: u32,
        probability_table_id: usize,
    ) -> Self {
        self.occurrences_to_level_up = occurrences_to_level_up.max(1);
        self.duration_to_level_down_secs = duration_to_level_down_secs.max(1);
        self.probability_table_id = probability_table_id;
        self
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_locale(self, locale: &str) -> Self {
        self.with_attribute(LOCALE_KEY, locale)
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn supports_dynamic_update(&self) -> bool {
        self.supports_dynamic_update
    }

    /// Decaying dictionaries store historical info instead of probabilities.
    pub fn uses_forgetting_curve(&self) -> bool {
        self.uses_forgetting_curve
    }

    pub fn unigram_count(&self) -> usize {
        self.unigram_count
    }

    pub fn bigram_count(&self) -> usize {
        self.bigram_count
    }

    pub fn max_unigram_count(&self) -> usize {
        self.max_unigram_count
    }

    pub fn max_bigram_count(&self) -> usize {
        self.max_bigram_count
    }

    pub fn max_unigram_count_after_gc(&self) -> usize {
        self.max_unigram_count_after_gc
    }

    pub fn max_bigram_count_after_gc(&self) -> usize {
        self.max_bigram_count_after_gc
    }

    pub fn extended_region_size(&self) -> usize {
        self.extended_region_size
    }

    pub fn last_decayed_time(&self) -> u32 {
        self.last_decayed_time
    }

    pub fn occurrences_to_level_up(&self) -> u32 {
        self.occurrences_to_level_up
    }

    pub fn duration_to_level_down_secs(&self) -> u32 {
        self.duration_to_level_down_secs
    }

    pub fn probability_table_id(&self) -> usize {
        self.probability_table_id
    }

    pub fn locale(&self) -> Option<&str> {
        self.attribute(LOCALE_KEY)
    }

    pub fn dictionary_name(&self) -> Option<&str> {
        self.attribute(DICTIONARY_KEY)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    /// Every attribute as it will be written, typed fields included.
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut attrs = self.attributes.clone();
        let mut put = |k: &str, v: String| {
            attrs.insert(k.to_string(), v);
        };
        put(
            USES_FORGETTING_CURVE_KEY,
            u8::from(self.uses_forgetting_curve).to_string(),
        );
        put(UNIGRAM_COUNT_KEY, self.unigram_count.to_string());
        put(BIGRAM_COUNT_KEY, self.bigram_count.to_string());
        put(MAX_UNIGRAM_COUNT_KEY, self.max_unigram_count.to_string());
        put(MAX_BIGRAM_COUNT_KEY, self.max_bigram_count.to_string());
        put(
            MAX_UNIGRAM_COUNT_AFTER_GC_KEY,
            self.max_unigram_count_after_gc.to_string(),
        );
        put(
            MAX_BIGRAM_COUNT_AFTER_GC_KEY,
            self.max_bigram_count_after_gc.to_string(),
        );
        put(
            EXTENDED_REGION_SIZE_KEY,
            self.extended_region_size.to_string(),
        );
        if self.uses_forgetting_curve {
            put(LAST_DECAYED_TIME_KEY, self.last_decayed_time.to_string());
            put(
                OCCURRENCES_TO_LEVEL_UP_KEY,
                self.occurrences_to_level_up.to_string(),
            );
            put(
                DURATION_TO_LEVEL_DOWN_KEY,
                self.duration_to_level_down_secs.to_string(),
            );
            put(
                PROBABILITY_TABLE_ID_KEY,
                self.probability_table_id.to_string(),
            );
        }
        if self.version.has_content_store() {
            put(TRIE_SIZE_KEY, self.trie_size.to_string());
        }
        attrs
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for (key, value) in self.attributes() {
            byte_utils::push_code_points(&mut body, &byte_utils::to_code_points(&key), true);
            byte_utils::push_code_points(&mut body, &byte_utils::to_code_points(&value), true);
        }
        let mut flags = 0u16;
        if self.supports_dynamic_update {
            flags |= SUPPORTS_DYNAMIC_UPDATE_FLAG;
        }
        let mut out = Vec::with_capacity(FIXED_HEADER_SIZE + body.len());
        byte_utils::push_uint(&mut out, MAGIC, 4);
        byte_utils::push_uint(&mut out, self.version.number() as u32, 2);
        byte_utils::push_uint(&mut out, flags as u32, 2);
        byte_utils::push_uint(&mut out, (FIXED_HEADER_SIZE + body.len()) as u32, 4);
        out.extend_from_slice(&body);
        out
    }

    /// Parse a header, returning it with the body start offset.
    pub(crate) fn read(data: &[u8]) -> Result<(Self, usize), DictError> {
        if data.len() < FIXED_HEADER_SIZE {
            return Err(DictError::InvalidHeader);
        }
        let mut pos = 0;
        if byte_utils::read_uint(data, &mut pos, 4)? != MAGIC {
            return Err(DictError::InvalidMagic);
        }
        let version = FormatVersion::from_number(byte_utils::read_uint(data, &mut pos, 2)? as u16)?;
        let flags = byte_utils::read_uint(data, &mut pos, 2)? as u16;
        let header_size = byte_utils::read_uint(data, &mut pos, 4)? as usize;
        if header_size < FIXED_HEADER_SIZE || header_size > data.len() {
            return Err(DictError::InvalidHeader);
        }

        let attr_data = &data[..header_size];
        let mut attributes = BTreeMap::new();
        while pos < header_size {
            let key = byte_utils::read_terminated_code_points(attr_data, &mut pos, MAX_ATTRIBUTE_LENGTH)?;
            let value =
                byte_utils::read_terminated_code_points(attr_data, &mut pos, MAX_ATTRIBUTE_LENGTH)?;
            attributes.insert(byte_utils::to_string(&key), byte_utils::to_string(&value));
        }

        let mut policy = HeaderPolicy::new(version);
        policy.supports_dynamic_update =
            version.is_dynamic() && flags & SUPPORTS_DYNAMIC_UPDATE_FLAG != 0;
        policy.uses_forgetting_curve =
            take_attr(&mut attributes, USES_FORGETTING_CURVE_KEY, 0u8)? != 0;
        policy.unigram_count = take_attr(&mut attributes, UNIGRAM_COUNT_KEY, 0)?;
        policy.bigram_count = take_attr(&mut attributes, BIGRAM_COUNT_KEY, 0)?;
        policy.max_unigram_count =
            take_attr(&mut attributes, MAX_UNIGRAM_COUNT_KEY, policy.max_unigram_count)?;
        policy.max_bigram_count =
            take_attr(&mut attributes, MAX_BIGRAM_COUNT_KEY, policy.max_bigram_count)?;
        policy.max_unigram_count_after_gc = take_attr(
            &mut attributes,
            MAX_UNIGRAM_COUNT_AFTER_GC_KEY,
            policy.max_unigram_count_after_gc,
        )?;
        policy.max_bigram_count_after_gc = take_attr(
            &mut attributes,
            MAX_BIGRAM_COUNT_AFTER_GC_KEY,
            policy.max_bigram_count_after_gc,
        )?;
        policy.extended_region_size = take_attr(&mut attributes, EXTENDED_REGION_SIZE_KEY, 0)?;
        policy.last_decayed_time = take_attr(&mut attributes, LAST_DECAYED_TIME_KEY, 0)?;
        policy.occurrences_to_level_up = take_attr(
            &mut attributes,
            OCCURRENCES_TO_LEVEL_UP_KEY,
            policy.occurrences_to_level_up,
        )?
        .max(1);
        policy.duration_to_level_down_secs = take_attr(
            &mut attributes,
            DURATION_TO_LEVEL_DOWN_KEY,
            policy.duration_to_level_down_secs,
        )?
        .max(1);
        policy.probability_table_id = take_attr(
            &mut attributes,
            PROBABILITY_TABLE_ID_KEY,
            policy.probability_table_id,
        )?;
        policy.trie_size = take_attr(&mut attributes, TRIE_SIZE_KEY, 0)?;
        policy.attributes = attributes;

        if policy.uses_forgetting_curve && !version.has_content_store() {
            return Err(DictError::Malformed(format!(
                "forgetting curve requires version 4, found {}",
                version.number()
            )));
        }
        Ok((policy, header_size))
    }
}

fn take_attr<T: FromStr>(
    attributes: &mut BTreeMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, DictError> {
    match attributes.remove(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DictError::Malformed(format!("attribute {key} = {raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip_keeps_unknown_attributes() {
        let header = HeaderPolicy::new(FormatVersion::DynamicV4)
            .with_forgetting_curve(true)
            .with_locale("en_US")
            .with_attribute("date", "1700000000")
            .with_max_counts(100, 200, 80, 160);
        let bytes = header.to_bytes();
        let (parsed, size) = HeaderPolicy::read(&bytes).unwrap();
        assert_eq!(size, bytes.len());
        assert_eq!(parsed, header);
        assert_eq!(parsed.locale(), Some("en_US"));
        assert_eq!(parsed.attribute("date"), Some("1700000000"));
        assert_eq!(parsed.max_bigram_count_after_gc(), 160);
    }

    #[test]
    fn static_header_never_supports_update() {
        let header = HeaderPolicy::new(FormatVersion::StaticV2).with_dynamic_update(true);
        assert!(!header.supports_dynamic_update());
    }

    #[test]
    fn bad_magic_and_version() {
        let mut bytes = HeaderPolicy::new(FormatVersion::DynamicV3).to_bytes();
        bytes[0] = 0;
        assert!(matches!(
            HeaderPolicy::read(&bytes),
            Err(DictError::InvalidMagic)
        ));

        let mut bytes = HeaderPolicy::new(FormatVersion::DynamicV3).to_bytes();
        bytes[5] = 9;
        assert!(matches!(
            HeaderPolicy::read(&bytes),
            Err(DictError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn truncated_header() {
        let bytes = HeaderPolicy::new(FormatVersion::DynamicV3).to_bytes();
        assert!(matches!(
            HeaderPolicy::read(&bytes[..8]),
            Err(DictError::InvalidHeader)
        ));
        assert!(HeaderPolicy::read(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn forgetting_curve_needs_v4() {
        let bytes = HeaderPolicy::new(FormatVersion::DynamicV3)
            .with_forgetting_curve(true)
            .to_bytes();
        assert!(matches!(
            HeaderPolicy::read(&bytes),
            Err(DictError::Malformed(_))
        ));
    }

    #[test]
    fn malformed_numeric_attribute() {
        let bytes = HeaderPolicy::new(FormatVersion::DynamicV3)
            .with_attribute(UNIGRAM_COUNT_KEY, "many")
            .to_bytes();
        // typed field overrides the raw attribute on write
        assert!(HeaderPolicy::read(&bytes).is_ok());

        let mut raw = Vec::new();
        byte_utils::push_uint(&mut raw, MAGIC, 4);
        byte_utils::push_uint(&mut raw, 3, 2);
        byte_utils::push_uint(&mut raw, 0, 2);
        let mut attrs = Vec::new();
        byte_utils::push_code_points(&mut attrs, &byte_utils::to_code_points("UNIGRAM_COUNT"), true);
        byte_utils::push_code_points(&mut attrs, &byte_utils::to_code_points("many"), true);
        byte_utils::push_uint(&mut raw, (12 + attrs.len()) as u32, 4);
        raw.extend_from_slice(&attrs);
        assert!(matches!(
            HeaderPolicy::read(&raw),
            Err(DictError::Malformed(_))
        ));
    }
}
