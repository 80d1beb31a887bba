use super::{empty, live_words, with_words, DYNAMIC_VERSIONS};
use crate::dict::{DictError, FormatVersion, HeaderPolicy, ShortcutTarget, UnigramProperty};
use crate::Dictionary;

#[test]
fn insert_is_idempotent() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = empty(version);
        dict.add_unigram_word("word", 10).unwrap();
        dict.add_unigram_word("word", 20).unwrap();
        assert_eq!(dict.get_probability("word"), Some(20), "{version:?}");
        assert_eq!(live_words(&dict), vec![("word".to_string(), 20)]);
        assert_eq!(dict.stats().unigram_count, 1);
    }
}

#[test]
fn prefix_split_keeps_both_words() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_words(version, &[("abcde", 10)]);
        dict.add_unigram_word("abcxy", 20).unwrap();
        assert_eq!(dict.get_probability("abcde"), Some(10), "{version:?}");
        assert_eq!(dict.get_probability("abcxy"), Some(20));
        assert_eq!(dict.get_probability("abc"), None);
        assert!(!dict.is_valid_word("abcd"));
    }
}

#[test]
fn insert_split_and_delete_sequence() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_words(version, &[("abcd", 10)]);

        dict.add_unigram_word("abcde", 10).unwrap();
        assert_eq!(dict.get_probability("abcde"), Some(10), "{version:?}");

        dict.add_unigram_word("abcdefghijklmn", 10).unwrap();
        let pos = dict.get_terminal_position("abcdefghijklmn", false).unwrap();
        assert_eq!(
            dict.get_code_points_and_probability(pos),
            Some(("abcdefghijklmn".to_string(), 10))
        );

        dict.add_unigram_word("ab", 20).unwrap();
        assert_eq!(dict.get_probability("ab"), Some(20));
        assert_eq!(dict.get_probability("abcd"), Some(10));

        assert!(dict.remove_unigram_word("abcd").unwrap());
        assert_eq!(dict.get_probability("abcd"), None);
        assert_eq!(dict.get_probability("abcde"), Some(10));
        assert_eq!(dict.get_probability("abcdefghijklmn"), Some(10));
        assert!(!dict.remove_unigram_word("abcd").unwrap());
        assert_eq!(dict.stats().unigram_count, 3);
    }
}

#[test]
fn removed_word_can_come_back() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_words(version, &[("tea", 30), ("team", 40)]);
        assert!(dict.remove_unigram_word("team").unwrap());
        assert!(dict.remove_unigram_word("tea").unwrap());
        assert!(live_words(&dict).is_empty(), "{version:?}");

        dict.add_unigram_word("tea", 50).unwrap();
        dict.add_unigram_word("team", 60).unwrap();
        assert_eq!(
            live_words(&dict),
            vec![("tea".to_string(), 50), ("team".to_string(), 60)]
        );
        assert_eq!(dict.stats().unigram_count, 2);
    }
}

#[test]
fn many_siblings_chain_arrays() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = empty(version);
        let words: Vec<String> = ('a'..='z').map(|c| format!("{c}x")).collect();
        for (i, w) in words.iter().enumerate() {
            dict.add_unigram_word(w, i as u8 + 1).unwrap();
        }
        for (i, w) in words.iter().enumerate() {
            assert_eq!(dict.get_probability(w), Some(i as i32 + 1), "{version:?} {w}");
        }
        assert_eq!(dict.get_all_child_nodes(None).len(), 26);
    }
}

#[test]
fn bigrams_are_directed() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_words(version, &[("good", 100), ("morning", 80), ("night", 60)]);
        dict.add_bigram_words("good", "morning", 200).unwrap();
        assert!(dict.is_valid_bigram("good", "morning"), "{version:?}");
        assert!(!dict.is_valid_bigram("morning", "good"));
        assert!(!dict.is_valid_bigram("good", "night"));

        let p = dict.get_bigram_probability("good", "morning").unwrap();
        assert!(p > 80 && p <= 255, "blended {p}");
    }
}

#[test]
fn duplicate_bigram_updates_in_place() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_words(version, &[("a", 10), ("b", 10)]);
        dict.add_bigram_words("a", "b", 50).unwrap();
        let low = dict.get_bigram_probability("a", "b").unwrap();
        dict.add_bigram_words("a", "b", 250).unwrap();
        let high = dict.get_bigram_probability("a", "b").unwrap();
        assert!(high > low, "{version:?}: {low} -> {high}");
        assert_eq!(dict.stats().bigram_count, 1);
        assert_eq!(dict.get_word_property("a").unwrap().bigrams.len(), 1);
    }
}

#[test]
fn removing_a_bigram_leaves_others() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_words(version, &[("i", 100), ("am", 90), ("was", 80)]);
        dict.add_bigram_words("i", "am", 150).unwrap();
        dict.add_bigram_words("i", "was", 150).unwrap();
        dict.add_bigram_words("am", "i", 150).unwrap();

        assert!(dict.remove_bigram_words("i", "am").unwrap());
        assert!(!dict.is_valid_bigram("i", "am"), "{version:?}");
        assert!(dict.is_valid_bigram("i", "was"));
        assert!(dict.is_valid_bigram("am", "i"));
        assert!(!dict.remove_bigram_words("i", "am").unwrap());
        assert_eq!(dict.stats().bigram_count, 2);

        dict.add_bigram_words("i", "am", 150).unwrap();
        assert!(dict.is_valid_bigram("i", "am"));
    }
}

#[test]
fn bigram_needs_both_words() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_words(version, &[("alpha", 10)]);
        assert!(matches!(
            dict.add_bigram_words("alpha", "beta", 10),
            Err(DictError::WordNotFound(_))
        ));
        assert!(!dict.remove_bigram_words("beta", "alpha").unwrap());
        assert_eq!(dict.stats().bigram_count, 0);
    }
}

#[test]
fn bigram_survives_target_relocation() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_words(version, &[("hello", 100), ("world", 100)]);
        dict.add_bigram_words("hello", "world", 200).unwrap();
        // Splitting "world" moves its node.
        dict.add_unigram_word("wor", 10).unwrap();
        dict.add_unigram_word("worm", 10).unwrap();
        assert!(dict.is_valid_bigram("hello", "world"), "{version:?}");
        let property = dict.get_word_property("hello").unwrap();
        assert_eq!(property.bigrams[0].target, "world");
    }
}

#[test]
fn removed_target_hides_bigram() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_words(version, &[("see", 100), ("you", 100)]);
        dict.add_bigram_words("see", "you", 200).unwrap();
        dict.remove_unigram_word("you").unwrap();
        assert!(!dict.is_valid_bigram("see", "you"), "{version:?}");
    }
}

#[test]
fn split_of_removed_word_keeps_sibling_bigrams() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_words(version, &[("the", 100), ("ab", 50), ("abc", 60)]);
        dict.add_bigram_words("the", "abc", 200).unwrap();
        dict.add_bigram_words("the", "ab", 150).unwrap();
        dict.remove_unigram_word("ab").unwrap();
        // Splits the node "ab" was stored in.
        dict.add_unigram_word("ax", 40).unwrap();

        assert!(dict.is_valid_bigram("the", "abc"), "{version:?}");
        assert!(!dict.is_valid_bigram("the", "ab"));
        let property = dict.get_word_property("the").unwrap();
        let targets: Vec<_> = property.bigrams.iter().map(|b| b.target.as_str()).collect();
        assert_eq!(targets, vec!["abc"]);

        dict.add_unigram_word("ab", 70).unwrap();
        dict.add_bigram_words("the", "ab", 120).unwrap();
        assert!(dict.is_valid_bigram("the", "ab"));
        assert!(dict.is_valid_bigram("the", "abc"));
    }
}

#[test]
fn flags_and_shortcuts() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = empty(version);
        let mut property = UnigramProperty::new(90);
        property.shortcuts = vec![ShortcutTarget::new("thanks", 12)];
        dict.add_unigram_word_with("thx", &property).unwrap();

        let mut hidden = UnigramProperty::new(50);
        hidden.is_blacklisted = true;
        dict.add_unigram_word_with("darn", &hidden).unwrap();

        assert_eq!(dict.get_probability("darn"), None, "{version:?}");
        let darn = dict.get_word_property("darn").unwrap();
        assert!(darn.is_blacklisted);
        assert_eq!(darn.probability, 50);

        let mut more = UnigramProperty::new(95);
        more.shortcuts = vec![
            ShortcutTarget::new("thank you", 14),
            ShortcutTarget::new("thanks", 3),
        ];
        dict.add_unigram_word_with("thx", &more).unwrap();
        let thx = dict.get_word_property("thx").unwrap();
        assert_eq!(thx.probability, 95);
        assert_eq!(
            thx.shortcuts,
            vec![
                ShortcutTarget::new("thanks", 3),
                ShortcutTarget::new("thank you", 14),
            ]
        );
    }
}

#[test]
fn case_insensitive_retry() {
    for version in DYNAMIC_VERSIONS {
        let dict = with_words(version, &[("paris", 40), ("Bob", 30)]);
        assert_eq!(dict.get_probability("Paris"), Some(40), "{version:?}");
        assert_eq!(dict.get_probability("PARIS"), Some(40));
        // Only the query is folded, never the stored word.
        assert_eq!(dict.get_probability("bob"), None);
        assert_eq!(dict.get_probability("Bob"), Some(30));
        assert!(dict.get_terminal_position("PARIS", true).is_some());
        assert!(dict.get_terminal_position("PARIS", false).is_none());
    }
}

#[test]
fn static_dictionary_rejects_mutation() {
    let mut fusion = crate::dict::FusionDictionary::new();
    fusion.add_word("fixed", UnigramProperty::new(10)).unwrap();
    let mut dict = fusion.build(HeaderPolicy::new(FormatVersion::StaticV2)).unwrap();
    assert!(!dict.is_updatable());
    assert!(matches!(
        dict.add_unigram_word("other", 10),
        Err(DictError::NotUpdatable)
    ));
    assert!(matches!(
        dict.remove_unigram_word("fixed"),
        Err(DictError::NotUpdatable)
    ));
    assert_eq!(dict.get_probability("fixed"), Some(10));
    assert_eq!(dict.get_probability("other"), None);
}

#[test]
fn invalid_words_are_rejected() {
    let mut dict = empty(FormatVersion::DynamicV3);
    assert!(matches!(dict.add_unigram_word("", 1), Err(DictError::InvalidWord(_))));
    let long = "x".repeat(crate::dict::MAX_WORD_LENGTH + 1);
    assert!(matches!(dict.add_unigram_word(&long, 1), Err(DictError::InvalidWord(_))));
    let max = "y".repeat(crate::dict::MAX_WORD_LENGTH);
    dict.add_unigram_word(&max, 1).unwrap();
    assert_eq!(dict.get_probability(&max), Some(1));
}

fn trie_size(dict: &Dictionary) -> usize {
    let stats = dict.stats();
    stats.original_size + stats.additional_size
}

/// Words whose long tails are rewritten by a prefix split, leaving the old
/// nodes behind as garbage.
fn with_split_garbage(version: FormatVersion) -> Dictionary {
    let mut dict = empty(version);
    for c in 'a'..='t' {
        dict.add_unigram_word(&format!("{c}{}", "q".repeat(24)), 10).unwrap();
        dict.add_unigram_word(&format!("{c}qq"), 20).unwrap();
    }
    dict
}

fn compacted_size(dict: &Dictionary) -> usize {
    let mut copy = Dictionary::from_bytes(dict.to_bytes().unwrap(), true).unwrap();
    copy.run_gc().unwrap();
    trie_size(&copy)
}

#[test]
fn full_buffer_compacts_and_retries() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_split_garbage(version);
        let used = trie_size(&dict);
        let compacted = compacted_size(&dict);
        assert!(compacted + 64 < used, "{version:?}: {compacted} vs {used}");

        dict.set_buffer_limit(used);
        dict.add_unigram_word("zebra", 30).unwrap();
        assert_eq!(dict.get_probability("zebra"), Some(30), "{version:?}");
        assert_eq!(dict.stats().unigram_count, 41);
        assert!(trie_size(&dict) <= used);
        assert_eq!(dict.get_probability(&format!("a{}", "q".repeat(24))), Some(10));
    }
}

#[test]
fn failed_append_leaves_dictionary_unchanged() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = with_split_garbage(version);
        dict.add_bigram_words("aqq", "bqq", 100).unwrap();
        let limit = trie_size(&dict).min(compacted_size(&dict)) - 1;
        let words_before = live_words(&dict);
        let stats_before = dict.stats();

        dict.set_buffer_limit(limit);
        let err = dict.add_unigram_word("zebra", 30).unwrap_err();
        assert!(matches!(err, DictError::CapacityExceeded(_)), "{version:?}: {err:?}");
        assert_eq!(live_words(&dict), words_before);
        assert_eq!(dict.stats(), stats_before);
        assert!(dict.is_valid_bigram("aqq", "bqq"));
        assert_eq!(dict.get_probability("zebra"), None);
    }
}

#[test]
fn unigram_cap_is_enforced() {
    let header = HeaderPolicy::new(FormatVersion::DynamicV3).with_max_counts(2, 10, 2, 10);
    let mut dict = Dictionary::create_empty(header).unwrap();
    dict.add_unigram_word("one", 1).unwrap();
    dict.add_unigram_word("two", 2).unwrap();
    assert!(matches!(
        dict.add_unigram_word("three", 3),
        Err(DictError::CapacityExceeded(_))
    ));
    // Updating an existing word is not a new entry.
    dict.add_unigram_word("two", 5).unwrap();
    assert_eq!(dict.get_probability("three"), None);
    assert!(dict.needs_to_run_gc(true));
}

#[test]
fn non_ascii_words() {
    for version in DYNAMIC_VERSIONS {
        let mut dict = empty(version);
        for (w, p) in [("café", 40), ("cafe", 50), ("日本", 60), ("日本語", 70)] {
            dict.add_unigram_word(w, p).unwrap();
        }
        assert_eq!(dict.get_probability("café"), Some(40), "{version:?}");
        assert_eq!(dict.get_probability("cafe"), Some(50));
        assert_eq!(dict.get_probability("日本語"), Some(70));
        assert_eq!(dict.get_probability("日"), None);
    }
}
