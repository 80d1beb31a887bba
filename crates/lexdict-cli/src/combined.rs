//! Combined word-list text format.
//!
//! ```text
//! dictionary=main:en,locale=en,description=English
//!  word=the,f=222
//!   bigram=weather,f=120
//!  word=ill,f=90,not_a_word=true
//!   shortcut=I'll,f=whitelist
//! ```
//!
//! An optional first line holds header attributes. Each `word=` line starts an
//! entry; `bigram=` and `shortcut=` lines attach to the entry above them.
//! Indentation is cosmetic. Blank lines and lines starting with `#` are
//! skipped.

use std::collections::BTreeMap;
use std::io::Write;

use lexdict_core::dict::{FusionDictionary, ShortcutTarget, WordProperty};
use lexdict_core::UnigramProperty;
use tracing::debug;

use crate::CliError;

const WHITELIST_VALUE: &str = "whitelist";
const WHITELIST_PROBABILITY: u8 = 15;

/// A parsed word list: header attributes plus the words themselves.
#[derive(Debug, Default)]
pub struct WordList {
    pub attributes: BTreeMap<String, String>,
    pub dict: FusionDictionary,
}

fn parse_fields(line: &str, line_no: usize) -> Result<Vec<(&str, &str)>, CliError> {
    line.split(',')
        .map(|field| {
            field.split_once('=').ok_or_else(|| CliError::Parse {
                line: line_no,
                reason: format!("expected key=value, got '{field}'"),
            })
        })
        .collect()
}

fn parse_number<T: std::str::FromStr>(value: &str, key: &str, line_no: usize) -> Result<T, CliError> {
    value.parse().map_err(|_| CliError::Parse {
        line: line_no,
        reason: format!("{key}: '{value}' is out of range"),
    })
}

fn parse_flag(value: &str, key: &str, line_no: usize) -> Result<bool, CliError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(CliError::Parse {
            line: line_no,
            reason: format!("{key}: expected true or false, got '{other}'"),
        }),
    }
}

pub fn parse(text: &str) -> Result<WordList, CliError> {
    let mut list = WordList::default();
    let mut current: Option<String> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields = parse_fields(line, line_no)?;
        let (kind, value) = fields[0];
        match kind {
            "word" => {
                let mut property = UnigramProperty::new(0);
                for &(key, v) in &fields[1..] {
                    match key {
                        "f" => property.probability = parse_number(v, key, line_no)?,
                        "not_a_word" => property.is_not_a_word = parse_flag(v, key, line_no)?,
                        "blacklisted" | "possibly_offensive" => {
                            property.is_blacklisted = parse_flag(v, key, line_no)?
                        }
                        other => debug!(line = line_no, key = other, "ignoring word attribute"),
                    }
                }
                list.dict.add_word(value, property)?;
                current = Some(value.to_string());
            }
            "bigram" | "shortcut" => {
                let Some(word) = current.as_deref() else {
                    return Err(CliError::Parse {
                        line: line_no,
                        reason: format!("{kind} before any word"),
                    });
                };
                let f = fields
                    .iter()
                    .find(|(key, _)| *key == "f")
                    .map(|&(_, v)| v)
                    .ok_or_else(|| CliError::Parse {
                        line: line_no,
                        reason: format!("{kind} without f="),
                    })?;
                if kind == "bigram" {
                    list.dict.add_bigram(word, value, parse_number(f, "f", line_no)?)?;
                } else {
                    let probability = if f == WHITELIST_VALUE {
                        WHITELIST_PROBABILITY
                    } else {
                        parse_number(f, "f", line_no)?
                    };
                    list.dict
                        .add_shortcut(word, ShortcutTarget::new(value, probability))?;
                }
            }
            _ if current.is_none() && list.attributes.is_empty() => {
                for (key, v) in fields {
                    list.attributes.insert(key.to_string(), v.to_string());
                }
            }
            other => {
                return Err(CliError::Parse {
                    line: line_no,
                    reason: format!("unknown entry '{other}'"),
                })
            }
        }
    }
    Ok(list)
}

pub fn write_header(out: &mut impl Write, attributes: &BTreeMap<String, String>) -> Result<(), CliError> {
    let line: Vec<String> = attributes.iter().map(|(k, v)| format!("{k}={v}")).collect();
    if !line.is_empty() {
        writeln!(out, "{}", line.join(","))?;
    }
    Ok(())
}

/// Write one entry in the form [`parse`] reads back.
pub fn write_word(out: &mut impl Write, property: &WordProperty) -> Result<(), CliError> {
    write!(out, " word={},f={}", property.word, property.probability.max(0))?;
    if property.is_not_a_word {
        write!(out, ",not_a_word=true")?;
    }
    if property.is_blacklisted {
        write!(out, ",blacklisted=true")?;
    }
    writeln!(out)?;
    for bigram in &property.bigrams {
        writeln!(out, "  bigram={},f={}", bigram.target, bigram.probability.max(0))?;
    }
    for shortcut in &property.shortcuts {
        if shortcut.is_whitelist() {
            writeln!(out, "  shortcut={},f={WHITELIST_VALUE}", shortcut.target)?;
        } else {
            writeln!(out, "  shortcut={},f={}", shortcut.target, shortcut.probability)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
dictionary=main:en,locale=en
 word=the,f=222
  bigram=weather,f=120
 word=weather,f=100
# comment
 word=ill,f=90,not_a_word=true,originalFreq=90
  shortcut=I'll,f=whitelist
  shortcut=illness,f=3
";

    #[test]
    fn parses_header_words_and_children() {
        let list = parse(SAMPLE).unwrap();
        assert_eq!(list.attributes.get("locale").map(String::as_str), Some("en"));
        assert_eq!(list.dict.word_count(), 3);
        assert_eq!(list.dict.bigram_count(), 1);
        assert!(list.dict.contains("ill"));
    }

    #[test]
    fn child_lines_need_a_word() {
        let err = parse("  bigram=the,f=10\n").unwrap_err();
        assert!(matches!(err, CliError::Parse { line: 1, .. }));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            parse(" word=the,f=300\n"),
            Err(CliError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            parse(" word=the,f=3\n word=a,not_a_word=maybe\n"),
            Err(CliError::Parse { line: 2, .. })
        ));
        assert!(matches!(parse(" word=the\n  bigram=a\n"), Err(CliError::Parse { line: 2, .. })));
        assert!(matches!(parse(" word=the\nnonsense\n"), Err(CliError::Parse { line: 2, .. })));
    }
}
