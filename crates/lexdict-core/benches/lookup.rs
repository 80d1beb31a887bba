use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use lexdict_core::dict::{FormatVersion, FusionDictionary, HeaderPolicy};
use lexdict_core::suggest::{ProximityInfo, Suggest, SuggestRequest, WordComposer};
use lexdict_core::{Dictionary, UnigramProperty};

static WORDS: &[(&str, u8)] = &[
    ("the", 240),
    ("they", 180),
    ("there", 170),
    ("their", 165),
    ("then", 160),
    ("this", 200),
    ("that", 210),
    ("to", 230),
    ("today", 120),
    ("tomorrow", 110),
    ("together", 90),
    ("good", 150),
    ("great", 140),
    ("morning", 100),
    ("night", 95),
    ("weather", 80),
    ("is", 220),
    ("it", 215),
    ("in", 225),
    ("interesting", 70),
    ("internet", 75),
    ("international", 60),
];

static BIGRAMS: &[(&str, &str, u8)] = &[
    ("good", "morning", 220),
    ("good", "night", 200),
    ("the", "weather", 150),
    ("the", "internet", 140),
    ("is", "great", 160),
    ("is", "interesting", 150),
    ("it", "is", 230),
];

fn bench_dict(version: FormatVersion) -> Dictionary {
    let mut fusion = FusionDictionary::new();
    for &(word, p) in WORDS {
        fusion.add_word(word, UnigramProperty::new(p)).unwrap();
    }
    for &(w0, w1, p) in BIGRAMS {
        fusion.add_bigram(w0, w1, p).unwrap();
    }
    fusion.build(HeaderPolicy::new(version)).unwrap()
}

static VERSIONS: &[(&str, FormatVersion)] = &[
    ("v2", FormatVersion::StaticV2),
    ("v3", FormatVersion::DynamicV3),
    ("v4", FormatVersion::DynamicV4),
];

fn bench_probability(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup/probability");
    for &(label, version) in VERSIONS {
        let dict = bench_dict(version);
        group.bench_with_input(BenchmarkId::from_parameter(label), &dict, |b, dict| {
            b.iter(|| {
                for &(word, _) in WORDS {
                    dict.get_probability(word);
                }
            });
        });
    }
    group.finish();
}

fn bench_predictions(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup/predictions");
    for &(label, version) in VERSIONS {
        let dict = bench_dict(version);
        group.bench_with_input(BenchmarkId::from_parameter(label), &dict, |b, dict| {
            b.iter(|| dict.get_predictions("the", "in"));
        });
    }
    group.finish();
}

static TYPED: &[(&str, &str)] = &[("short", "th"), ("exact", "good"), ("typo", "intrrnet")];

fn bench_suggestions(c: &mut Criterion) {
    let dict = bench_dict(FormatVersion::DynamicV4);
    let proximity = ProximityInfo::qwerty();
    let mut suggest = Suggest::default();
    let mut group = c.benchmark_group("lookup/suggestions");
    for &(label, typed) in TYPED {
        let composer = WordComposer::from_typed(typed);
        group.bench_with_input(BenchmarkId::new(label, typed.len()), &composer, |b, composer| {
            let mut request = SuggestRequest::new(composer);
            request.prev_word = Some("is");
            request.proximity = Some(&proximity);
            b.iter(|| suggest.get_suggestions(&dict, &request));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_probability, bench_predictions, bench_suggestions);
criterion_main!(benches);
