//! Probability arithmetic shared by the readers, the bigram engine and GC.

pub mod forgetting_curve;

pub const MAX_PROBABILITY: i32 = 255;
pub const NOT_A_PROBABILITY: i32 = -1;
pub const MAX_BIGRAM_ENCODED_PROBABILITY: i32 = 15;

const MAX_BIGRAM_STEPS: f32 = 1.5 + MAX_BIGRAM_ENCODED_PROBABILITY as f32;

/// Decode a 4-bit bigram delta against the target's unigram probability.
/// The result always lies in `unigram..=MAX_PROBABILITY`.
pub fn compute_probability_for_bigram(unigram_probability: i32, bigram_encoded: i32) -> i32 {
    if unigram_probability == NOT_A_PROBABILITY {
        return NOT_A_PROBABILITY;
    }
    let u = unigram_probability.clamp(0, MAX_PROBABILITY);
    let b = bigram_encoded.clamp(0, MAX_BIGRAM_ENCODED_PROBABILITY);
    let step = (MAX_PROBABILITY - u) as f32 / MAX_BIGRAM_STEPS;
    (u + ((b + 1) as f32 * step) as i32).min(MAX_PROBABILITY)
}

/// Inverse of [`compute_probability_for_bigram`]: the largest encoded delta
/// whose decoded value does not exceed `bigram_probability`.
pub fn encode_bigram_probability(unigram_probability: i32, bigram_probability: i32) -> i32 {
    let u = unigram_probability.clamp(0, MAX_PROBABILITY);
    if bigram_probability <= u {
        return 0;
    }
    let step = (MAX_PROBABILITY - u) as f32 / MAX_BIGRAM_STEPS;
    if step <= 0.0 {
        return 0;
    }
    let first_step_start = 1.0 + u as f32 + step / 2.0;
    let encoded = ((bigram_probability as f32 - first_step_start) / step) as i32;
    encoded.clamp(0, MAX_BIGRAM_ENCODED_PROBABILITY)
}

/// Unigram probability used when no bigram context applies.
pub fn backoff(unigram_probability: i32) -> i32 {
    unigram_probability
}

/// Blend a decoded unigram and bigram probability for a decaying dictionary,
/// where both are already on the full scale.
pub fn combine_decayed(unigram_probability: i32, bigram_probability: i32) -> i32 {
    if bigram_probability == NOT_A_PROBABILITY {
        return backoff(unigram_probability);
    }
    unigram_probability.max(bigram_probability).min(MAX_PROBABILITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn bigram_decode_reference_points() {
        assert_eq!(compute_probability_for_bigram(0, 0), 15);
        assert_eq!(compute_probability_for_bigram(0, 15), 247);
        assert_eq!(compute_probability_for_bigram(255, 7), 255);
        assert_eq!(compute_probability_for_bigram(NOT_A_PROBABILITY, 3), NOT_A_PROBABILITY);
    }

    #[test]
    fn encode_never_overshoots() {
        assert_eq!(encode_bigram_probability(100, 50), 0);
        assert_eq!(encode_bigram_probability(255, 255), 0);
        let e = encode_bigram_probability(100, 200);
        assert!(compute_probability_for_bigram(100, e) <= 200 + 10);
    }

    #[test]
    fn decayed_combination_takes_max() {
        assert_eq!(combine_decayed(40, 90), 90);
        assert_eq!(combine_decayed(120, 90), 120);
        assert_eq!(combine_decayed(120, NOT_A_PROBABILITY), 120);
    }

    proptest! {
        #[test]
        fn decoded_bigram_is_at_least_unigram(u in 0i32..=255, b in 0i32..=15) {
            let p = compute_probability_for_bigram(u, b);
            prop_assert!(p >= u);
            prop_assert!(p <= MAX_PROBABILITY);
        }

        #[test]
        fn decoding_is_monotonic_in_delta(u in 0i32..=255, b in 0i32..15) {
            prop_assert!(compute_probability_for_bigram(u, b) <= compute_probability_for_bigram(u, b + 1));
        }

        #[test]
        fn encode_round_trips_encoded_values(u in 0i32..=200, b in 0i32..=15) {
            let p = compute_probability_for_bigram(u, b);
            let e = encode_bigram_probability(u, p);
            prop_assert!((e - b).abs() <= 1);
        }
    }
}
