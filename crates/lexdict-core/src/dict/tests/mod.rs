mod dynamic;
mod formats;
mod gc;

use super::{Dictionary, FormatVersion, HeaderPolicy};

const DYNAMIC_VERSIONS: [FormatVersion; 2] = [FormatVersion::DynamicV3, FormatVersion::DynamicV4];

fn empty(version: FormatVersion) -> Dictionary {
    Dictionary::create_empty(HeaderPolicy::new(version)).unwrap()
}

fn with_words(version: FormatVersion, words: &[(&str, u8)]) -> Dictionary {
    let mut dict = empty(version);
    for &(word, p) in words {
        dict.add_unigram_word(word, p).unwrap();
    }
    dict
}

fn live_words(dict: &Dictionary) -> Vec<(String, i32)> {
    let mut words: Vec<_> = dict
        .words()
        .map(|w| w.unwrap())
        .map(|w| (w.word, w.probability))
        .collect();
    words.sort();
    words
}
