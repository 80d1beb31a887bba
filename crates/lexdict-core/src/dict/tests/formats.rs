use std::collections::BTreeMap;

use proptest::prelude::*;

use crate::dict::{DictError, FormatVersion, FusionDictionary, HeaderPolicy, UnigramProperty};
use crate::Dictionary;

fn headers() -> Vec<HeaderPolicy> {
    vec![
        HeaderPolicy::new(FormatVersion::StaticV2),
        HeaderPolicy::new(FormatVersion::DynamicV3).with_dynamic_update(false),
        HeaderPolicy::new(FormatVersion::DynamicV3),
        HeaderPolicy::new(FormatVersion::DynamicV4),
    ]
}

fn fusion_of(words: &BTreeMap<String, u8>) -> FusionDictionary {
    let mut fusion = FusionDictionary::new();
    for (word, &p) in words {
        fusion.add_word(word, UnigramProperty::new(p)).unwrap();
    }
    fusion
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn encoded_words_read_back(words in prop::collection::btree_map("[a-e]{1,7}", 1u8..=255, 1..40)) {
        let fusion = fusion_of(&words);
        for header in headers() {
            let version = header.version();
            let dict = fusion.build(header).unwrap();
            for (word, &p) in &words {
                prop_assert_eq!(dict.get_probability(word), Some(p as i32), "{:?} {}", version, word);
            }
            let listed: Vec<String> = dict.words().map(|w| w.unwrap().word).collect();
            prop_assert_eq!(listed.len(), words.len());
            prop_assert_eq!(dict.get_probability("zzz"), None);
        }
    }
}

#[test]
fn dynamic_flag_follows_header() {
    let fusion = fusion_of(&BTreeMap::from([("word".to_string(), 5)]));
    let frozen = fusion
        .build(HeaderPolicy::new(FormatVersion::DynamicV3).with_dynamic_update(false))
        .unwrap();
    assert!(!frozen.is_updatable());
    assert!(!frozen.header().supports_dynamic_update());

    let live = fusion.build(HeaderPolicy::new(FormatVersion::DynamicV4)).unwrap();
    assert!(live.is_updatable());
}

#[test]
fn bigrams_and_shortcuts_survive_every_format() {
    let mut fusion = FusionDictionary::new();
    for (w, p) in [("new", 120), ("york", 90), ("yes", 100), ("ny", 40)] {
        fusion.add_word(w, UnigramProperty::new(p)).unwrap();
    }
    fusion.add_bigram("new", "york", 230).unwrap();
    fusion.add_bigram("new", "missing", 230).unwrap();
    fusion
        .add_shortcut("ny", crate::dict::ShortcutTarget::new("New York", 14))
        .unwrap();

    for header in headers() {
        let version = header.version();
        let dict = fusion.build(header).unwrap();
        assert!(dict.is_valid_bigram("new", "york"), "{version:?}");
        assert!(!dict.is_valid_bigram("york", "new"));
        let p = dict.get_bigram_probability("new", "york").unwrap();
        assert!(p > 200, "{version:?}: {p}");
        let ny = dict.get_word_property("ny").unwrap();
        assert_eq!(ny.shortcuts[0].target, "New York");
        assert_eq!(dict.get_word_property("new").unwrap().bigrams.len(), 1);
    }
}

#[test]
fn reverse_lookup_in_static_layout() {
    let words = BTreeMap::from([
        ("car".to_string(), 10),
        ("cart".to_string(), 20),
        ("care".to_string(), 30),
        ("dog".to_string(), 40),
    ]);
    let dict = fusion_of(&words).build(HeaderPolicy::new(FormatVersion::StaticV2)).unwrap();
    for (word, &p) in &words {
        let pos = dict.get_terminal_position(word, false).unwrap();
        assert_eq!(
            dict.get_code_points_and_probability(pos),
            Some((word.clone(), p as i32))
        );
    }
}

#[test]
fn child_nodes_expose_structure() {
    let words = BTreeMap::from([("tab".to_string(), 10), ("table".to_string(), 20)]);
    for header in headers() {
        let dict = fusion_of(&words).build(header).unwrap();
        let roots = dict.get_all_child_nodes(None);
        assert_eq!(roots.len(), 1);
        let tab = &roots[0];
        assert_eq!(tab.code_points, vec!['t' as u32, 'a' as u32, 'b' as u32]);
        assert!(tab.is_terminal);
        assert_eq!(tab.probability, Some(10));
        let children = dict.get_all_child_nodes(Some(tab.position));
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].probability, Some(20));
        assert!(!children[0].has_children);
    }
}

#[test]
fn damaged_images_fail_to_load() {
    let bytes = fusion_of(&BTreeMap::from([("word".to_string(), 5)]))
        .to_static_bytes(&HeaderPolicy::new(FormatVersion::StaticV2))
        .unwrap();

    let mut bad_magic = bytes.clone();
    bad_magic[0] ^= 0xFF;
    assert!(matches!(
        Dictionary::from_bytes(bad_magic, false),
        Err(DictError::InvalidMagic)
    ));

    let mut bad_version = bytes.clone();
    bad_version[5] = 9;
    assert!(matches!(
        Dictionary::from_bytes(bad_version, false),
        Err(DictError::UnsupportedVersion(9))
    ));

    assert!(matches!(
        Dictionary::from_bytes(bytes[..6].to_vec(), false),
        Err(DictError::InvalidHeader)
    ));

    let header_only = HeaderPolicy::new(FormatVersion::StaticV2).to_bytes();
    let err = Dictionary::from_bytes(header_only, false).err().unwrap();
    assert!(err.is_format_error());

    let mut huge_trie = HeaderPolicy::new(FormatVersion::DynamicV4);
    huge_trie.trie_size = usize::MAX;
    let mut image = huge_trie.to_bytes();
    image.extend_from_slice(&[0; 16]);
    let err = Dictionary::from_bytes(image, false).err().unwrap();
    assert!(err.is_format_error(), "{err:?}");
}

#[test]
fn truncated_body_degrades_to_no_result() {
    let words = BTreeMap::from([("alpha".to_string(), 5), ("beta".to_string(), 6)]);
    let bytes = fusion_of(&words)
        .to_static_bytes(&HeaderPolicy::new(FormatVersion::StaticV2))
        .unwrap();
    let cut = bytes[..bytes.len() - 3].to_vec();
    let dict = Dictionary::from_bytes(cut, false).unwrap();
    assert_eq!(dict.get_probability("beta"), None);
}
