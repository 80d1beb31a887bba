use std::fmt;
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DictionaryKind {
    Main,
    User,
    Contacts,
    History,
}

/// Identity of a loaded dictionary: locale, role and an options string
/// (layout, feature switches) chosen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DictionaryKey {
    pub locale: String,
    pub kind: DictionaryKind,
    pub options: String,
}

impl DictionaryKey {
    pub fn new(locale: &str, kind: DictionaryKind) -> Self {
        Self {
            locale: locale.to_string(),
            kind,
            options: String::new(),
        }
    }

    pub fn with_options(mut self, options: &str) -> Self {
        self.options = options.to_string();
        self
    }
}

impl fmt::Display for DictionaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.locale, self.kind)?;
        if !self.options.is_empty() {
            write!(f, "/{}", self.options)?;
        }
        Ok(())
    }
}

/// Capacity-bounded LRU map from [`DictionaryKey`] to `V`.
///
/// Eviction order depends only on the sequence of calls: the entry touched
/// least recently goes first. Evicted and invalidated values are handed back
/// so the caller can flush or close them.
pub struct DictionaryCache<V> {
    entries: LruCache<DictionaryKey, V>,
}

impl<V: Clone> DictionaryCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn contains(&self, key: &DictionaryKey) -> bool {
        self.entries.contains(key)
    }

    /// Look up `key`, marking it most recently used.
    pub fn get(&mut self, key: &DictionaryKey) -> Option<V> {
        self.entries.get(key).cloned()
    }

    /// Insert or replace `key`. Returns the entries evicted to make room.
    pub fn insert(&mut self, key: DictionaryKey, value: V) -> Vec<(DictionaryKey, V)> {
        let mut evicted = Vec::new();
        if let Some((old_key, old_value)) = self.entries.push(key.clone(), value) {
            if old_key != key {
                debug!(key = %old_key, "evicting cached dictionary");
                evicted.push((old_key, old_value));
            }
        }
        evicted
    }

    /// Shrink to `capacity`, returning the least recently used entries.
    pub fn resize(&mut self, capacity: usize) -> Vec<(DictionaryKey, V)> {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let mut evicted = Vec::new();
        while self.entries.len() > capacity.get() {
            match self.entries.pop_lru() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        self.entries.resize(capacity);
        evicted
    }

    /// Cached value for `key`, creating it with `create` on a miss.
    pub fn get_or_try_insert_with<E>(
        &mut self,
        key: &DictionaryKey,
        create: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = create()?;
        self.insert(key.clone(), value.clone());
        Ok(value)
    }

    pub fn invalidate(&mut self, key: &DictionaryKey) -> Option<V> {
        self.entries.pop(key)
    }

    /// Drop every entry for `locale`, whatever its kind or options.
    pub fn invalidate_locale(&mut self, locale: &str) -> Vec<(DictionaryKey, V)> {
        let keys: Vec<DictionaryKey> = self
            .entries
            .iter()
            .map(|(k, _)| k)
            .filter(|k| k.locale == locale)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|k| self.entries.pop_entry(&k))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
