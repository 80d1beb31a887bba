//! Suggestions for the word being typed.
//!
//! [`Suggest`] picks a decoder per request: taps go to the built-in
//! [`TypingDecoder`], gesture trails to whatever decoder the
//! [`DecoderFactory`] supplies, and an empty composer yields next-word
//! predictions.

mod composer;
mod proximity;
mod typing;

pub use composer::{InputPoint, WordComposer};
pub use proximity::{Key, ProximityInfo};
pub use typing::TypingDecoder;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, debug_span};

use crate::bigram;
use crate::dict::Dictionary;
use crate::settings::settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    /// The typed letters spell the word.
    Typed,
    /// Reached through near-miss keys.
    Correction,
    /// Extends past the typed letters.
    Completion,
    /// Next-word prediction from the previous word.
    Prediction,
    Shortcut,
    /// Replaces the typed word outright.
    Whitelist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub word: String,
    pub score: i32,
    pub kind: SuggestionKind,
}

/// Everything a decoder gets to see for one request.
#[derive(Clone, Copy)]
pub struct SuggestRequest<'a> {
    pub composer: &'a WordComposer,
    pub prev_word: Option<&'a str>,
    pub proximity: Option<&'a ProximityInfo>,
    pub max_results: usize,
}

impl<'a> SuggestRequest<'a> {
    pub fn new(composer: &'a WordComposer) -> Self {
        Self {
            composer,
            prev_word: None,
            proximity: None,
            max_results: settings().suggest.max_results,
        }
    }
}

pub trait SuggestionDecoder: Send {
    fn get_suggestions(&mut self, dict: &Dictionary, request: &SuggestRequest<'_>) -> Vec<Suggestion>;
}

/// Supplies decoders to a [`Suggest`] session.
pub trait DecoderFactory: Send + Sync {
    fn create_typing_decoder(&self) -> Box<dyn SuggestionDecoder> {
        Box::new(TypingDecoder::new())
    }

    /// `None` when no gesture decoder is available.
    fn create_gesture_decoder(&self) -> Option<Box<dyn SuggestionDecoder>>;
}

/// Factory without gesture support.
pub struct TypingOnlyFactory;

impl DecoderFactory for TypingOnlyFactory {
    fn create_gesture_decoder(&self) -> Option<Box<dyn SuggestionDecoder>> {
        None
    }
}

pub struct Suggest {
    factory: Arc<dyn DecoderFactory>,
    typing: Box<dyn SuggestionDecoder>,
    gesture: Option<Box<dyn SuggestionDecoder>>,
}

impl Default for Suggest {
    fn default() -> Self {
        Self::new(Arc::new(TypingOnlyFactory))
    }
}

impl Suggest {
    pub fn new(factory: Arc<dyn DecoderFactory>) -> Self {
        Self {
            typing: factory.create_typing_decoder(),
            gesture: None,
            factory,
        }
    }

    pub fn get_suggestions(&mut self, dict: &Dictionary, request: &SuggestRequest<'_>) -> Vec<Suggestion> {
        let _span = debug_span!("get_suggestions", gesture = request.composer.is_gesture()).entered();
        if request.composer.is_empty() {
            return self.predictions(dict, request);
        }
        if request.composer.is_gesture() {
            if self.gesture.is_none() {
                self.gesture = self.factory.create_gesture_decoder();
            }
            match self.gesture.as_mut() {
                Some(decoder) => return decoder.get_suggestions(dict, request),
                None => debug!("no gesture decoder, decoding as taps"),
            }
        }
        self.typing.get_suggestions(dict, request)
    }

    fn predictions(&self, dict: &Dictionary, request: &SuggestRequest<'_>) -> Vec<Suggestion> {
        let Some(prev) = request.prev_word else {
            return Vec::new();
        };
        let mut out: Vec<Suggestion> = bigram::get_predictions(dict, prev, "", request.proximity)
            .into_iter()
            .map(|p| Suggestion {
                word: p.word,
                score: p.probability * 100,
                kind: SuggestionKind::Prediction,
            })
            .collect();
        out.truncate(request.max_results);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::{FormatVersion, HeaderPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample() -> Dictionary {
        let mut dict = Dictionary::create_empty(HeaderPolicy::new(FormatVersion::DynamicV4)).unwrap();
        for (w, p) in [("good", 150), ("morning", 100), ("night", 90), ("go", 160)] {
            dict.add_unigram_word(w, p).unwrap();
        }
        dict.add_bigram_words("good", "morning", 220).unwrap();
        dict.add_bigram_words("good", "night", 200).unwrap();
        dict
    }

    struct EchoGesture {
        calls: Arc<AtomicUsize>,
    }

    impl SuggestionDecoder for EchoGesture {
        fn get_suggestions(&mut self, _dict: &Dictionary, request: &SuggestRequest<'_>) -> Vec<Suggestion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            vec![Suggestion {
                word: request.composer.typed_word(),
                score: 1,
                kind: SuggestionKind::Typed,
            }]
        }
    }

    struct GestureFactory {
        calls: Arc<AtomicUsize>,
        created: AtomicUsize,
    }

    impl DecoderFactory for GestureFactory {
        fn create_gesture_decoder(&self) -> Option<Box<dyn SuggestionDecoder>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Some(Box::new(EchoGesture {
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    #[test]
    fn empty_input_predicts_from_context() {
        let dict = sample();
        let composer = WordComposer::new();
        let mut request = SuggestRequest::new(&composer);
        request.prev_word = Some("good");
        let out = Suggest::default().get_suggestions(&dict, &request);
        let words: Vec<&str> = out.iter().map(|s| s.word.as_str()).collect();
        assert_eq!(words, vec!["morning", "night"]);
        assert!(out.iter().all(|s| s.kind == SuggestionKind::Prediction));

        request.prev_word = None;
        assert!(Suggest::default().get_suggestions(&dict, &request).is_empty());
    }

    #[test]
    fn taps_use_the_typing_decoder() {
        let dict = sample();
        let composer = WordComposer::from_typed("go");
        let out = Suggest::default().get_suggestions(&dict, &SuggestRequest::new(&composer));
        assert_eq!(out[0].word, "go");
        assert_eq!(out[1].word, "good");
    }

    #[test]
    fn gestures_go_to_the_factory_decoder() {
        let dict = sample();
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(GestureFactory {
            calls: Arc::clone(&calls),
            created: AtomicUsize::new(0),
        });
        let mut suggest = Suggest::new(factory.clone());

        let mut composer = WordComposer::from_typed("gd");
        composer.set_gesture(true);
        let request = SuggestRequest::new(&composer);
        suggest.get_suggestions(&dict, &request);
        let out = suggest.get_suggestions(&dict, &request);
        assert_eq!(out[0].word, "gd");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn gestures_fall_back_to_taps() {
        let dict = sample();
        let mut composer = WordComposer::from_typed("goo");
        composer.set_gesture(true);
        let out = Suggest::default().get_suggestions(&dict, &SuggestRequest::new(&composer));
        assert_eq!(out[0].word, "good");
    }
}
