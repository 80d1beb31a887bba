//! Predictive-text dictionary engine.
//!
//! A memory-mapped Patricia trie with bit-packed nodes and relative
//! addressing, supporting prefix lookup, bigram scoring, proximity-aware
//! suggestion and (for dynamic formats) in-place mutation with garbage
//! collection and forgetting-curve decay.

pub mod bigram;
pub mod dict;
pub mod pool;
pub mod probability;
pub mod settings;
pub mod suggest;
pub mod unicode;

pub use dict::{
    DictError, DictStats, Dictionary, FormatVersion, HeaderPolicy, UnigramProperty, WordProperty,
};
