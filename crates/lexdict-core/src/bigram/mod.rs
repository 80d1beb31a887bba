//! Next-word prediction from bigram lists.

mod bloom;
mod multi_bigram_map;

pub use multi_bigram_map::MultiBigramMap;

use serde::Serialize;
use tracing::{debug, debug_span, warn};

use crate::dict::{to_code_points, to_string, DictError, Dictionary};
use crate::suggest::ProximityInfo;
use crate::unicode;

/// Capacity of a prediction result list.
pub const MAX_RESULTS: usize = 18;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prediction {
    pub word: String,
    pub probability: i32,
}

/// Bounded list kept sorted on insert: higher probability first, then the
/// shorter word.
struct PredictionBuffer {
    entries: Vec<(Prediction, usize)>,
    capacity: usize,
}

impl PredictionBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity + 1),
            capacity,
        }
    }

    fn insert(&mut self, prediction: Prediction) {
        let len = prediction.word.chars().count();
        let at = self
            .entries
            .iter()
            .position(|(p, l)| {
                prediction.probability > p.probability
                    || (prediction.probability == p.probability && len < *l)
            })
            .unwrap_or(self.entries.len());
        if at >= self.capacity {
            return;
        }
        self.entries.insert(at, (prediction, len));
        self.entries.truncate(self.capacity);
    }

    fn into_vec(self) -> Vec<Prediction> {
        self.entries.into_iter().map(|(p, _)| p).collect()
    }
}

/// Code points accepted as the first letter of a prediction for a prefix
/// starting with `first`.
fn first_letter_window(first: u32, proximity: Option<&ProximityInfo>) -> Vec<u32> {
    let base = unicode::to_base_lower_case(first);
    let mut window = vec![base];
    if let Some(info) = proximity {
        for &n in info.neighbours(base) {
            if !window.contains(&n) {
                window.push(n);
            }
        }
    }
    window
}

/// Words following `prev_word`, best first. With a non-empty `typed_prefix`
/// only targets whose first letter is the typed one or a key near it are
/// kept.
pub fn get_predictions(
    dict: &Dictionary,
    prev_word: &str,
    typed_prefix: &str,
    proximity: Option<&ProximityInfo>,
) -> Vec<Prediction> {
    let _span = debug_span!("get_predictions", prefix_len = typed_prefix.len()).entered();
    let now = dict.now();
    let window = typed_prefix
        .chars()
        .next()
        .map(|c| first_letter_window(c as u32, proximity));

    let result = (|| -> Result<Vec<Prediction>, DictError> {
        let Some(source) = dict.find_word_node(&to_code_points(prev_word))? else {
            return Ok(Vec::new());
        };
        let mut buffer = PredictionBuffer::new(MAX_RESULTS);
        for (target, probability) in dict.scored_bigrams(&source, now)? {
            let code_points = dict.trie().code_points_of(&target)?;
            if let Some(window) = &window {
                let first = code_points.first().map(|&c| unicode::to_base_lower_case(c));
                if !first.map_or(false, |c| window.contains(&c)) {
                    continue;
                }
            }
            buffer.insert(Prediction {
                word: to_string(&code_points),
                probability,
            });
        }
        Ok(buffer.into_vec())
    })();
    match result {
        Ok(predictions) => {
            debug!(count = predictions.len(), "predictions");
            predictions
        }
        Err(e) => {
            warn!(error = %e, "prediction failed");
            Vec::new()
        }
    }
}

impl Dictionary {
    /// [`get_predictions`] without keyboard proximity.
    pub fn get_predictions(&self, prev_word: &str, typed_prefix: &str) -> Vec<Prediction> {
        get_predictions(self, prev_word, typed_prefix, None)
    }
}
