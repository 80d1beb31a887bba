use std::collections::BTreeSet;

use proptest::prelude::*;

use super::{empty, live_words, with_words, DYNAMIC_VERSIONS};
use crate::dict::{DictError, FormatVersion, FusionDictionary, HeaderPolicy, UnigramProperty};
use crate::Dictionary;

const DAY: u32 = 24 * 60 * 60;

#[derive(Debug, Clone)]
enum Op {
    Add(String, u8),
    Remove(String),
    Bigram(String, String, u8),
    Unlink(String, String),
}

fn op() -> impl Strategy<Value = Op> {
    let word = "[a-c]{1,4}";
    prop_oneof![
        4 => (word, 1u8..=255).prop_map(|(w, p)| Op::Add(w, p)),
        1 => word.prop_map(Op::Remove),
        3 => (word, word, 1u8..=255).prop_map(|(a, b, p)| Op::Bigram(a, b, p)),
        1 => (word, word).prop_map(|(a, b)| Op::Unlink(a, b)),
    ]
}

fn apply(dict: &mut Dictionary, op: &Op) {
    match op {
        Op::Add(w, p) => dict.add_unigram_word(w, *p).unwrap(),
        Op::Remove(w) => {
            dict.remove_unigram_word(w).unwrap();
        }
        Op::Bigram(a, b, p) => match dict.add_bigram_words(a, b, *p) {
            Ok(()) | Err(DictError::WordNotFound(_)) => {}
            Err(e) => panic!("bigram {a} -> {b}: {e}"),
        },
        Op::Unlink(a, b) => {
            dict.remove_bigram_words(a, b).unwrap();
        }
    }
}

fn live_bigrams(dict: &Dictionary) -> BTreeSet<(String, String, i32)> {
    let mut out = BTreeSet::new();
    for (word, _) in live_words(dict) {
        for b in dict.get_word_property(&word).unwrap().bigrams {
            out.insert((word.clone(), b.target, b.probability));
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn gc_preserves_live_content(ops in prop::collection::vec(op(), 1..80)) {
        for version in DYNAMIC_VERSIONS {
            let mut dict = empty(version);
            for op in &ops {
                apply(&mut dict, op);
            }
            let words = live_words(&dict);
            let bigrams = live_bigrams(&dict);

            let stats = dict.run_gc().unwrap();
            prop_assert_eq!(&live_words(&dict), &words, "{:?}", version);
            prop_assert_eq!(&live_bigrams(&dict), &bigrams);
            prop_assert_eq!(stats.unigram_count, words.len());
            prop_assert_eq!(stats.bigram_count, bigrams.len());
            prop_assert_eq!(dict.stats().unigram_count, words.len());
            prop_assert_eq!(dict.stats().additional_size, 0);

            // The compacted image reads back the same.
            let reopened = Dictionary::from_bytes(dict.to_bytes().unwrap(), true).unwrap();
            prop_assert_eq!(live_words(&reopened), words);
            prop_assert_eq!(live_bigrams(&reopened), bigrams);
        }
    }
}

#[test]
fn gc_keeps_dictionary_updatable() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_words(version, &[("one", 10), ("only", 20), ("two", 30)]);
        dict.add_bigram_words("one", "two", 100).unwrap();
        dict.remove_unigram_word("only").unwrap();
        let stats = dict.run_gc().unwrap();
        assert_eq!(stats.unigram_count, 2, "{version:?}");

        dict.add_unigram_word("three", 40).unwrap();
        dict.add_bigram_words("two", "three", 100).unwrap();
        assert!(dict.is_valid_bigram("one", "two"));
        assert!(dict.is_valid_bigram("two", "three"));
        assert_eq!(dict.stats().unigram_count, 3);
    }
}

#[test]
fn gc_drops_bigrams_to_removed_words() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_words(version, &[("from", 10), ("here", 20), ("there", 30)]);
        dict.add_bigram_words("from", "here", 100).unwrap();
        dict.add_bigram_words("from", "there", 100).unwrap();
        dict.remove_unigram_word("there").unwrap();
        assert_eq!(dict.stats().bigram_count, 2);

        let stats = dict.run_gc().unwrap();
        assert_eq!(stats.bigram_count, 1, "{version:?}");
        assert_eq!(dict.get_word_property("from").unwrap().bigrams.len(), 1);
    }
}

#[test]
fn gc_after_split_of_removed_word() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_words(version, &[("the", 100), ("ab", 50), ("abc", 60)]);
        dict.add_bigram_words("the", "abc", 200).unwrap();
        dict.add_bigram_words("the", "ab", 150).unwrap();
        dict.remove_unigram_word("ab").unwrap();
        dict.add_unigram_word("ax", 40).unwrap();

        let stats = dict.run_gc().unwrap();
        assert_eq!(stats.unigram_count, 3, "{version:?}");
        assert_eq!(stats.bigram_count, 1);
        assert!(dict.is_valid_bigram("the", "abc"));
        assert_eq!(
            live_words(&dict),
            vec![("abc".to_string(), 60), ("ax".to_string(), 40), ("the".to_string(), 100)]
        );
        dict.run_gc().unwrap();
        assert!(dict.is_valid_bigram("the", "abc"));
    }
}

#[test]
fn static_dictionary_cannot_gc() {
    let mut fusion = FusionDictionary::new();
    fusion.add_word("word", UnigramProperty::new(1)).unwrap();
    let mut dict = fusion.build(HeaderPolicy::new(FormatVersion::StaticV2)).unwrap();
    assert!(matches!(dict.run_gc(), Err(DictError::NotUpdatable)));
    assert!(!dict.needs_to_run_gc(false));
}

fn decaying(max_unigrams: usize, after_gc: usize) -> Dictionary {
    let header = HeaderPolicy::new(FormatVersion::DynamicV4)
        .with_forgetting_curve(true)
        .with_forgetting_curve_params(2, 16 * DAY, 1)
        .with_max_counts(max_unigrams, 100, after_gc, 100);
    Dictionary::create_empty(header).unwrap()
}

#[test]
fn stale_entries_decay_away() {
    let mut dict = decaying(100, 80);

    let mut typed = UnigramProperty::new(0);
    typed.is_not_a_word = true;
    typed.timestamp = Some(0);
    dict.add_unigram_word_with("stale", &typed).unwrap();

    let mut fresh = UnigramProperty::new(0);
    fresh.timestamp = Some(20 * DAY);
    dict.add_unigram_word_with("fresh", &fresh).unwrap();

    dict.set_current_time(Some(20 * DAY));
    assert!(dict.needs_to_run_gc(false));
    let stats = dict.run_gc().unwrap();
    assert_eq!(stats.removed_unigrams, 1);
    assert_eq!(stats.unigram_count, 1);
    assert!(dict.get_word_property("stale").is_none());
    assert!(dict.is_valid_word("fresh"));
    assert_eq!(dict.header().last_decayed_time(), 20 * DAY);
}

#[test]
fn level_zero_words_are_not_suggested() {
    let mut dict = decaying(100, 80);
    dict.set_current_time(Some(DAY));
    let mut typed = UnigramProperty::new(0);
    typed.is_not_a_word = true;
    dict.add_unigram_word_with("maybe", &typed).unwrap();
    assert_eq!(dict.get_probability("maybe"), None);

    // Committing the word promotes it.
    dict.add_unigram_word("maybe", 0).unwrap();
    assert!(dict.get_probability("maybe").unwrap() > 0);
}

#[test]
fn eviction_keeps_the_strongest_words() {
    let mut dict = decaying(10, 3);
    dict.set_current_time(Some(DAY));
    for (word, uses) in [("a", 1), ("b", 1), ("c", 3), ("d", 5), ("e", 5)] {
        for _ in 0..uses {
            dict.add_unigram_word(word, 0).unwrap();
        }
    }
    dict.add_bigram_words("d", "a", 0).unwrap();
    dict.add_bigram_words("d", "e", 0).unwrap();

    let stats = dict.run_gc().unwrap();
    assert_eq!(stats.removed_unigrams, 2);
    let words: Vec<String> = live_words(&dict).into_iter().map(|(w, _)| w).collect();
    assert_eq!(words, vec!["c", "d", "e"]);
    assert!(dict.is_valid_bigram("d", "e"));
    assert!(!dict.is_valid_bigram("d", "a"));
    assert_eq!(dict.stats().bigram_count, 1);
}

#[test]
fn decaying_dictionary_compacts_at_the_hard_limit() {
    let mut dict = decaying(5, 3);
    dict.set_current_time(Some(DAY));
    // The hard limit is 6; the seventh word forces a compaction down to 3.
    for word in ["aa", "bb", "cc", "dd", "ee", "ff", "gg"] {
        dict.add_unigram_word(word, 0).unwrap();
    }
    assert_eq!(dict.stats().unigram_count, 4);
    assert!(dict.is_valid_word("gg"));
}
