//! In-place edits of dynamic dictionary files. Each command opens the file
//! updatable, applies one change and writes the result back atomically.

use std::io::Write;
use std::path::Path;

use lexdict_core::dict::ShortcutTarget;
use lexdict_core::{Dictionary, UnigramProperty};
use tracing::info;

use crate::CliError;

#[derive(Debug, Clone, Default)]
pub struct WordOptions {
    pub not_a_word: bool,
    pub blacklisted: bool,
    pub shortcuts: Vec<ShortcutTarget>,
}

fn edit<T>(path: &Path, op: impl FnOnce(&mut Dictionary) -> Result<T, CliError>) -> Result<T, CliError> {
    let mut dict = Dictionary::open(path, true)?;
    let result = op(&mut dict)?;
    if dict.needs_to_run_gc(true) {
        let stats = dict.flush_with_gc(path)?;
        info!(unigrams = stats.unigram_count, bigrams = stats.bigram_count, "compacted on save");
    } else {
        dict.flush(path)?;
    }
    Ok(result)
}

pub fn add_word(
    path: &Path,
    word: &str,
    probability: u8,
    opts: &WordOptions,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let property = UnigramProperty {
        is_not_a_word: opts.not_a_word,
        is_blacklisted: opts.blacklisted,
        shortcuts: opts.shortcuts.clone(),
        ..UnigramProperty::new(probability)
    };
    edit(path, |dict| Ok(dict.add_unigram_word_with(word, &property)?))?;
    writeln!(out, "Added {word} ({probability})")?;
    Ok(())
}

pub fn remove_word(path: &Path, word: &str, out: &mut impl Write) -> Result<(), CliError> {
    if edit(path, |dict| Ok(dict.remove_unigram_word(word)?))? {
        writeln!(out, "Removed {word}")?;
        Ok(())
    } else {
        Err(CliError::NotFound(word.to_string()))
    }
}

pub fn add_bigram(path: &Path, word0: &str, word1: &str, probability: u8, out: &mut impl Write) -> Result<(), CliError> {
    edit(path, |dict| Ok(dict.add_bigram_words(word0, word1, probability)?))?;
    writeln!(out, "Added {word0} -> {word1} ({probability})")?;
    Ok(())
}

pub fn remove_bigram(path: &Path, word0: &str, word1: &str, out: &mut impl Write) -> Result<(), CliError> {
    if edit(path, |dict| Ok(dict.remove_bigram_words(word0, word1)?))? {
        writeln!(out, "Removed {word0} -> {word1}")?;
        Ok(())
    } else {
        Err(CliError::NotFound(format!("{word0} -> {word1}")))
    }
}

pub fn gc(path: &Path, out: &mut impl Write) -> Result<(), CliError> {
    let mut dict = Dictionary::open(path, true)?;
    let before = dict.stats();
    let stats = dict.flush_with_gc(path)?;
    writeln!(
        out,
        "Unigrams: {} (-{}), bigrams: {} (-{}), extended region {} -> 0 bytes",
        stats.unigram_count,
        stats.removed_unigrams,
        stats.bigram_count,
        stats.removed_bigrams,
        before.additional_size
    )?;
    Ok(())
}
