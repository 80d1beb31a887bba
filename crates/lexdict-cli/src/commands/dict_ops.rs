use std::fs;
use std::io::Write;
use std::path::Path;

use lexdict_core::dict::{FormatVersion, HeaderPolicy, ShortcutTarget};
use lexdict_core::Dictionary;
use serde::Serialize;
use tracing::info;

use crate::combined;
use crate::CliError;

/// Options for [`create`] beyond the word list itself.
#[derive(Debug, Clone, Copy)]
pub struct CreateOptions {
    pub version: FormatVersion,
    pub forgetting_curve: bool,
}

pub fn create(input: &Path, output: &Path, opts: &CreateOptions, out: &mut impl Write) -> Result<(), CliError> {
    let text = fs::read_to_string(input)?;
    let list = combined::parse(&text)?;

    let mut header = HeaderPolicy::new(opts.version).with_forgetting_curve(opts.forgetting_curve);
    for (key, value) in &list.attributes {
        header = header.with_attribute(key, value);
    }
    let dict = list.dict.build(header)?;
    dict.flush(output)?;

    let size = fs::metadata(output).map(|m| m.len()).unwrap_or(0);
    info!(path = %output.display(), size, "dictionary written");
    writeln!(
        out,
        "Wrote {} (v{}, {} words, {} bigrams, {} bytes)",
        output.display(),
        opts.version.number(),
        dict.stats().unigram_count,
        dict.stats().bigram_count,
        size
    )?;
    Ok(())
}

pub fn info(path: &Path, out: &mut impl Write) -> Result<(), CliError> {
    let dict = Dictionary::open(path, false)?;
    let stats = dict.stats();
    writeln!(out, "Format version:   {}", stats.version)?;
    writeln!(out, "Dynamic update:   {}", dict.header().supports_dynamic_update())?;
    writeln!(out, "Forgetting curve: {}", stats.uses_forgetting_curve)?;
    writeln!(out, "Unigrams:         {}", stats.unigram_count)?;
    writeln!(out, "Bigrams:          {}", stats.bigram_count)?;
    writeln!(out, "Trie size:        {} (+{} extended)", stats.original_size, stats.additional_size)?;
    if dict.version() == FormatVersion::DynamicV4 {
        writeln!(out, "Terminal ids:     {}", stats.terminal_ids)?;
    }
    writeln!(out, "Attributes:")?;
    for (key, value) in dict.header().attributes() {
        writeln!(out, "  {key}={value}")?;
    }
    Ok(())
}

pub fn lookup(path: &Path, word: &str, out: &mut impl Write) -> Result<(), CliError> {
    let dict = Dictionary::open(path, false)?;
    let property = dict
        .get_word_property(word)
        .ok_or_else(|| CliError::NotFound(word.to_string()))?;
    writeln!(out, "{}\tprobability={}", property.word, property.probability)?;
    if property.is_not_a_word {
        writeln!(out, "  (not a word)")?;
    }
    if property.is_blacklisted {
        writeln!(out, "  (blacklisted)")?;
    }
    if let Some(h) = property.historical_info {
        writeln!(out, "  level={} count={} timestamp={}", h.level, h.count, h.timestamp)?;
    }
    for bigram in &property.bigrams {
        writeln!(out, "  -> {}\t{}", bigram.target, bigram.probability)?;
    }
    for shortcut in &property.shortcuts {
        let kind = if shortcut.is_whitelist() { "whitelist" } else { "shortcut" };
        writeln!(out, "  {kind}: {} ({})", shortcut.target, shortcut.probability)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct DumpBigram<'a> {
    target: &'a str,
    probability: i32,
}

#[derive(Serialize)]
struct DumpWord<'a> {
    word: &'a str,
    probability: i32,
    not_a_word: bool,
    blacklisted: bool,
    bigrams: Vec<DumpBigram<'a>>,
    shortcuts: &'a [ShortcutTarget],
}

/// Every live word, as combined text or as a JSON array.
pub fn dump(path: &Path, json: bool, out: &mut impl Write) -> Result<(), CliError> {
    let dict = Dictionary::open(path, false)?;
    let mut properties = Vec::new();
    for entry in dict.words() {
        let entry = entry?;
        if let Some(property) = dict.get_word_property(&entry.word) {
            properties.push(property);
        }
    }

    if json {
        let words: Vec<DumpWord<'_>> = properties
            .iter()
            .map(|p| DumpWord {
                word: &p.word,
                probability: p.probability,
                not_a_word: p.is_not_a_word,
                blacklisted: p.is_blacklisted,
                bigrams: p
                    .bigrams
                    .iter()
                    .map(|b| DumpBigram {
                        target: &b.target,
                        probability: b.probability,
                    })
                    .collect(),
                shortcuts: &p.shortcuts,
            })
            .collect();
        serde_json::to_writer_pretty(&mut *out, &words)?;
        writeln!(out)?;
        return Ok(());
    }

    let mut attributes = dict.header().attributes();
    attributes.retain(|key, _| !key.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
    combined::write_header(out, &attributes)?;
    for property in &properties {
        combined::write_word(out, property)?;
    }
    Ok(())
}
