use std::collections::HashMap;

use tracing::{debug, debug_span, warn};

use super::{SuggestRequest, Suggestion, SuggestionDecoder, SuggestionKind};
use crate::bigram::MultiBigramMap;
use crate::dict::{to_code_points, to_string, DictError, Dictionary, PtNodeParams, ROOT_POS};
use crate::settings::settings;
use crate::unicode;

/// Probabilities are scaled up so percentage penalties keep resolution.
const SCORE_SCALE: i32 = 100;
/// Longest completion explored past the typed input.
const MAX_COMPLETION_LENGTH: usize = 16;

/// Accepted code points for one input position: the typed key first, then
/// its near misses.
struct InputPosition {
    typed: u32,
    near: Vec<u32>,
}

impl InputPosition {
    /// `Some(false)` for the typed key, `Some(true)` for a near miss.
    fn matches(&self, code_point: u32) -> Option<bool> {
        let c = unicode::to_base_lower_case(code_point);
        if c == self.typed {
            Some(false)
        } else if self.near.contains(&c) {
            Some(true)
        } else {
            None
        }
    }
}

struct Candidate {
    code_points: Vec<u32>,
    node: PtNodeParams,
    corrections: usize,
    completed: usize,
}

struct Walk<'a> {
    dict: &'a Dictionary,
    input: &'a [InputPosition],
    max_corrections: usize,
    candidates: Vec<Candidate>,
}

impl Walk<'_> {
    fn visit(
        &mut self,
        array_pos: usize,
        consumed: usize,
        prefix: &mut Vec<u32>,
        corrections: usize,
        completed: usize,
    ) -> Result<(), DictError> {
        for node in self.dict.trie().child_nodes(array_pos)? {
            let mut consumed = consumed;
            let mut corrections = corrections;
            let mut completed = completed;
            let mut matched = true;
            for &cp in &node.code_points {
                match self.input.get(consumed) {
                    Some(position) => match position.matches(cp) {
                        Some(false) => {}
                        Some(true) if corrections < self.max_corrections => corrections += 1,
                        _ => {
                            matched = false;
                            break;
                        }
                    },
                    None if completed < MAX_COMPLETION_LENGTH => completed += 1,
                    None => {
                        matched = false;
                        break;
                    }
                }
                consumed += 1;
            }
            if !matched {
                continue;
            }

            let len = prefix.len();
            prefix.extend_from_slice(&node.code_points);
            if let Some(children) = node.children_pos {
                self.visit(children, consumed, prefix, corrections, completed)?;
            }
            if consumed >= self.input.len() && node.is_terminal() {
                self.candidates.push(Candidate {
                    code_points: prefix.clone(),
                    node,
                    corrections,
                    completed,
                });
            }
            prefix.truncate(len);
        }
        Ok(())
    }
}

fn apply_penalty(score: i32, percent: u32, times: usize) -> i32 {
    let keep = 100 - percent.min(100) as i64;
    let mut s = score as i64;
    for _ in 0..times {
        s = s * keep / 100;
    }
    s as i32
}

fn match_case(word: &str, all_upper: bool, first_upper: bool) -> String {
    if all_upper {
        return word.to_uppercase();
    }
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if first_upper && first.is_lowercase() => first.to_uppercase().chain(chars).collect(),
        _ => word.to_string(),
    }
}

/// Tap decoder: walks the trie along the typed keys, allowing near-miss
/// substitutions and completions past the typed input, and scores candidates
/// with the previous word as bigram context.
pub struct TypingDecoder {
    bigrams: MultiBigramMap,
    max_corrections: usize,
    max_alternatives: usize,
    substitution_penalty_percent: u32,
    completion_penalty_percent: u32,
}

impl Default for TypingDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TypingDecoder {
    pub fn new() -> Self {
        let s = &settings().suggest;
        Self {
            bigrams: MultiBigramMap::new(),
            max_corrections: s.max_corrections,
            max_alternatives: s.max_alternatives,
            substitution_penalty_percent: s.substitution_penalty_percent,
            completion_penalty_percent: s.completion_penalty_percent,
        }
    }

    pub fn with_max_corrections(mut self, max_corrections: usize) -> Self {
        self.max_corrections = max_corrections;
        self
    }

    fn input_positions(&self, request: &SuggestRequest<'_>) -> Vec<InputPosition> {
        request
            .composer
            .points()
            .iter()
            .map(|point| {
                let typed = unicode::to_base_lower_case(point.code_point);
                let mut near = Vec::new();
                if let Some(info) = request.proximity {
                    if let (Some(x), Some(y)) = (point.x, point.y) {
                        if let Some(key) = info.nearest_key(x, y) {
                            if key != typed {
                                near.push(key);
                            }
                        }
                    }
                    for &n in info.neighbours(typed) {
                        if near.len() >= self.max_alternatives {
                            break;
                        }
                        if !near.contains(&n) {
                            near.push(n);
                        }
                    }
                }
                InputPosition { typed, near }
            })
            .collect()
    }

    fn score(&self, probability: i32, candidate: &Candidate) -> i32 {
        let mut score = probability.max(0) * SCORE_SCALE;
        score = apply_penalty(score, self.substitution_penalty_percent, candidate.corrections);
        if candidate.completed > 0 {
            score = apply_penalty(score, self.completion_penalty_percent, 1);
            score -= candidate.completed as i32;
        }
        score
    }

    fn decode(&mut self, dict: &Dictionary, request: &SuggestRequest<'_>) -> Result<Vec<Suggestion>, DictError> {
        let input = self.input_positions(request);
        let mut walk = Walk {
            dict,
            input: &input,
            max_corrections: self.max_corrections,
            candidates: Vec::new(),
        };
        walk.visit(ROOT_POS, 0, &mut Vec::new(), 0, 0)?;
        let candidates = walk.candidates;
        debug!(candidates = candidates.len(), "trie walk done");

        let now = dict.now();
        let context = match request.prev_word {
            Some(prev) => dict.find_word_node(&to_code_points(prev))?,
            None => None,
        };
        let all_upper = request.composer.is_all_upper_case();
        let first_upper = request.composer.is_first_char_capitalized();

        let mut best: HashMap<String, Suggestion> = HashMap::new();
        let mut offer = |s: Suggestion| {
            let keep = best.get(&s.word).map_or(true, |old| s.score > old.score);
            if keep {
                best.insert(s.word.clone(), s);
            }
        };

        for candidate in &candidates {
            let node = &candidate.node;
            if node.attrs.is_blacklisted {
                continue;
            }
            let word = to_string(&candidate.code_points);
            if let Some(unigram) = dict.usable_probability(node, now)? {
                let p = match &context {
                    Some(source) => self.bigrams.probability(dict, source, node.head_pos, unigram, now)?,
                    None => unigram,
                };
                let kind = if candidate.corrections > 0 {
                    SuggestionKind::Correction
                } else if candidate.completed > 0 {
                    SuggestionKind::Completion
                } else {
                    SuggestionKind::Typed
                };
                offer(Suggestion {
                    word: match_case(&word, all_upper, first_upper),
                    score: self.score(p, candidate),
                    kind,
                });
            }

            if candidate.corrections > 0 || candidate.completed > 0 {
                continue;
            }
            let Some(unigram) = dict.trie().unigram(node)? else {
                continue;
            };
            let base = dict.unigram_probability(&unigram, now).max(0) * SCORE_SCALE;
            for shortcut in dict.trie().shortcuts(node)? {
                let (score, kind) = if shortcut.is_whitelist() {
                    (base + 1, SuggestionKind::Whitelist)
                } else {
                    (
                        base * (shortcut.probability as i32 + 1) / 16 - 1,
                        SuggestionKind::Shortcut,
                    )
                };
                offer(Suggestion {
                    word: shortcut.target,
                    score,
                    kind,
                });
            }
        }

        let mut out: Vec<Suggestion> = best.into_values().collect();
        out.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.word.chars().count().cmp(&b.word.chars().count()))
                .then_with(|| a.word.cmp(&b.word))
        });
        out.truncate(request.max_results);
        Ok(out)
    }
}

impl SuggestionDecoder for TypingDecoder {
    fn get_suggestions(&mut self, dict: &Dictionary, request: &SuggestRequest<'_>) -> Vec<Suggestion> {
        let _span = debug_span!("typing_decode", len = request.composer.len()).entered();
        if request.composer.is_empty() {
            return Vec::new();
        }
        // Cached positions do not survive mutations between calls.
        self.bigrams.clear();
        match self.decode(dict, request) {
            Ok(suggestions) => suggestions,
            Err(e) => {
                warn!(error = %e, "typing decode failed");
                Vec::new()
            }
        }
    }
}
