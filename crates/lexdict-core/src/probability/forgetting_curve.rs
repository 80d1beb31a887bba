//! Forgetting curve: usage history decays into a probability.
//!
//! An entry stores a level (0..=MAX_LEVEL), a count of uses at that level and
//! the timestamp of the last change. Elapsed time is quantized into steps of
//! `duration_to_level_down / 16`; the probability is read from a table indexed
//! by (table id, level, elapsed steps). Every 16 steps without use costs one
//! level when the entry is saved.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use super::{MAX_PROBABILITY, NOT_A_PROBABILITY};
use crate::dict::HeaderPolicy;
use crate::settings::settings;

pub const MAX_LEVEL: u8 = 3;
pub const MAX_ELAPSED_TIME_STEP_COUNT: u32 = 15;
pub const DISCARD_LEVEL_ZERO_ENTRY_TIME_STEP_COUNT_THRESHOLD: u32 = 14;
pub const TABLE_COUNT: usize = 4;

const TIME_STEPS_PER_LEVEL: u32 = MAX_ELAPSED_TIME_STEP_COUNT + 1;
/// Counts at this multiple of the configured maximum force a decay.
const COUNT_HARD_LIMIT_WEIGHT: f32 = 1.2;
/// Level-3 probability of the weak, modest, strong and aggressive tables.
const TABLE_MAX_PROBABILITIES: [i32; TABLE_COUNT] = [127, 160, 200, 240];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoricalInfo {
    /// Seconds since the Unix epoch.
    pub timestamp: u32,
    pub level: u8,
    pub count: u8,
}

impl HistoricalInfo {
    pub fn new(timestamp: u32, level: u8, count: u8) -> Self {
        Self {
            timestamp,
            level,
            count,
        }
    }
}

type Table = [[i32; TIME_STEPS_PER_LEVEL as usize]; MAX_LEVEL as usize + 1];

fn probability_tables() -> &'static [Table; TABLE_COUNT] {
    static TABLES: OnceLock<[Table; TABLE_COUNT]> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut tables = [[[0; TIME_STEPS_PER_LEVEL as usize]; MAX_LEVEL as usize + 1]; TABLE_COUNT];
        for (table_id, table) in tables.iter_mut().enumerate() {
            for (level, row) in table.iter_mut().enumerate() {
                if level == 0 {
                    row.fill(NOT_A_PROBABILITY);
                    continue;
                }
                let initial = base_probability(table_id, level);
                let end = base_probability(table_id, level - 1);
                for (step, slot) in row.iter_mut().enumerate() {
                    let ratio = step as f32 / TIME_STEPS_PER_LEVEL as f32;
                    let p = initial * (end / initial).powf(ratio);
                    *slot = (p as i32).clamp(1, MAX_PROBABILITY);
                }
            }
        }
        tables
    })
}

fn base_probability(table_id: usize, level: usize) -> f32 {
    let max = TABLE_MAX_PROBABILITIES[table_id] as f32;
    if level == 0 {
        max / 12.0
    } else {
        max * level as f32 / MAX_LEVEL as f32
    }
}

fn time_step_duration(policy: &HeaderPolicy) -> u32 {
    (policy.duration_to_level_down_secs() / TIME_STEPS_PER_LEVEL).max(1)
}

/// Unsaturated number of time steps since `timestamp`.
pub fn elapsed_time_step_count(timestamp: u32, policy: &HeaderPolicy, now: u32) -> u32 {
    now.saturating_sub(timestamp) / time_step_duration(policy)
}

/// Decoded probability of an entry at time `now`.
pub fn get_probability(info: &HistoricalInfo, policy: &HeaderPolicy, now: u32) -> i32 {
    let steps = elapsed_time_step_count(info.timestamp, policy, now).min(MAX_ELAPSED_TIME_STEP_COUNT);
    let table_id = policy.probability_table_id().min(TABLE_COUNT - 1);
    let level = info.level.min(MAX_LEVEL) as usize;
    probability_tables()[table_id][level][steps as usize]
}

/// Record one more use of an entry.
///
/// `has_probability` is true when the caller supplies a real probability (the
/// word was committed as valid); a level-0 entry is then promoted straight to
/// level 1. Otherwise the use only counts towards the next level.
pub fn create_updated_historical_info(
    original: Option<&HistoricalInfo>,
    has_probability: bool,
    timestamp: u32,
    policy: &HeaderPolicy,
) -> HistoricalInfo {
    let original = match original {
        Some(o) if !(has_probability && o.level == 0) => *o,
        _ if has_probability => return HistoricalInfo::new(timestamp, 1, 0),
        _ => HistoricalInfo::new(timestamp, 0, 0),
    };
    let count = u32::from(original.count) + 1;
    if count >= policy.occurrences_to_level_up() {
        if original.level >= MAX_LEVEL {
            HistoricalInfo::new(timestamp, MAX_LEVEL, original.count)
        } else {
            HistoricalInfo::new(timestamp, original.level + 1, 0)
        }
    } else {
        HistoricalInfo::new(timestamp, original.level, count.min(u8::MAX as u32) as u8)
    }
}

/// Apply pending level-downs before the entry is written by GC.
pub fn create_historical_info_to_save(
    info: &HistoricalInfo,
    policy: &HeaderPolicy,
    now: u32,
) -> HistoricalInfo {
    let steps = elapsed_time_step_count(info.timestamp, policy, now);
    if steps <= MAX_ELAPSED_TIME_STEP_COUNT {
        return *info;
    }
    let level_down = (steps / TIME_STEPS_PER_LEVEL).min(u32::from(info.level));
    let timestamp = info
        .timestamp
        .saturating_add(level_down.saturating_mul(policy.duration_to_level_down_secs()));
    HistoricalInfo::new(timestamp, info.level - level_down as u8, 0)
}

/// Whether GC should keep the entry at all.
pub fn needs_to_keep(info: &HistoricalInfo, policy: &HeaderPolicy, now: u32) -> bool {
    info.level > 0
        || elapsed_time_step_count(info.timestamp, policy, now)
            < DISCARD_LEVEL_ZERO_ENTRY_TIME_STEP_COUNT_THRESHOLD
}

pub fn count_hard_limit(max_count: usize) -> usize {
    (max_count as f32 * COUNT_HARD_LIMIT_WEIGHT) as usize
}

/// Whether a decaying dictionary is due for decay. Count overflow always
/// qualifies; the periodic interval only when the caller is not blocking.
pub fn needs_to_decay(
    minds_block_by_decay: bool,
    unigram_count: usize,
    bigram_count: usize,
    policy: &HeaderPolicy,
    now: u32,
) -> bool {
    if unigram_count >= count_hard_limit(policy.max_unigram_count()) {
        return true;
    }
    if bigram_count >= count_hard_limit(policy.max_bigram_count()) {
        return true;
    }
    if minds_block_by_decay {
        return false;
    }
    policy
        .last_decayed_time()
        .saturating_add(settings().gc.decay_interval_secs)
        < now
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::FormatVersion;
    use proptest::prelude::*;

    const DAY: u32 = 24 * 60 * 60;

    fn policy(table_id: usize) -> HeaderPolicy {
        HeaderPolicy::new(FormatVersion::DynamicV4)
            .with_forgetting_curve(true)
            .with_forgetting_curve_params(2, 16 * DAY, table_id)
    }

    #[test]
    fn level_zero_is_not_a_probability() {
        let p = policy(1);
        let info = HistoricalInfo::new(1000, 0, 1);
        assert_eq!(get_probability(&info, &p, 1000), NOT_A_PROBABILITY);
    }

    #[test]
    fn higher_level_scores_higher() {
        let p = policy(1);
        let l1 = get_probability(&HistoricalInfo::new(0, 1, 0), &p, 0);
        let l3 = get_probability(&HistoricalInfo::new(0, 3, 0), &p, 0);
        assert!(l3 > l1);
        assert_eq!(l3, 160);
    }

    #[test]
    fn new_valid_word_starts_at_level_one() {
        let p = policy(1);
        let info = create_updated_historical_info(None, true, 500, &p);
        assert_eq!(info, HistoricalInfo::new(500, 1, 0));
        let info = create_updated_historical_info(None, false, 500, &p);
        assert_eq!(info, HistoricalInfo::new(500, 0, 1));
    }

    #[test]
    fn repeated_use_levels_up_and_caps() {
        let p = policy(1);
        let mut info = create_updated_historical_info(None, true, 0, &p);
        for t in 1..20 {
            info = create_updated_historical_info(Some(&info), true, t, &p);
        }
        assert_eq!(info.level, MAX_LEVEL);
        assert_eq!(info.timestamp, 19);
    }

    #[test]
    fn level_zero_promoted_by_valid_use() {
        let p = policy(1);
        let info = HistoricalInfo::new(10, 0, 1);
        let updated = create_updated_historical_info(Some(&info), true, 20, &p);
        assert_eq!(updated, HistoricalInfo::new(20, 1, 0));
    }

    #[test]
    fn save_applies_level_down() {
        let p = policy(1);
        let info = HistoricalInfo::new(0, 3, 1);
        // 40 days at 1 day per step: two full levels
        let saved = create_historical_info_to_save(&info, &p, 40 * DAY);
        assert_eq!(saved.level, 1);
        assert_eq!(saved.count, 0);
        assert_eq!(saved.timestamp, 32 * DAY);

        let fresh = create_historical_info_to_save(&info, &p, 3 * DAY);
        assert_eq!(fresh, info);
    }

    #[test]
    fn stale_level_zero_is_discarded() {
        let p = policy(1);
        let info = HistoricalInfo::new(0, 0, 1);
        assert!(needs_to_keep(&info, &p, 13 * DAY));
        assert!(!needs_to_keep(&info, &p, 14 * DAY));
        assert!(needs_to_keep(&HistoricalInfo::new(0, 1, 0), &p, 100 * DAY));
    }

    #[test]
    fn decay_on_hard_limit_or_interval() {
        let p = policy(1).with_max_counts(100, 100, 80, 80);
        assert!(needs_to_decay(true, 120, 0, &p, 0));
        assert!(!needs_to_decay(true, 119, 0, &p, 0));
        let interval = settings().gc.decay_interval_secs;
        assert!(!needs_to_decay(false, 0, 0, &p, interval));
        assert!(needs_to_decay(false, 0, 0, &p, interval + 1));
        assert!(!needs_to_decay(true, 0, 0, &p, interval + 1));
    }

    proptest! {
        #[test]
        fn probability_never_increases_with_time(
            table_id in 0usize..TABLE_COUNT,
            level in 0u8..=MAX_LEVEL,
            count in 0u8..4,
            t0 in 0u32..(40 * DAY),
            dt in 0u32..(40 * DAY),
        ) {
            let p = policy(table_id);
            let info = HistoricalInfo::new(0, level, count);
            let earlier = get_probability(&info, &p, t0);
            let later = get_probability(&info, &p, t0 + dt);
            prop_assert!(later <= earlier);
        }

        #[test]
        fn table_values_are_in_range(table_id in 0usize..TABLE_COUNT, level in 1u8..=MAX_LEVEL, t in 0u32..(20 * DAY)) {
            let p = policy(table_id);
            let v = get_probability(&HistoricalInfo::new(0, level, 0), &p, t);
            prop_assert!((1..=MAX_PROBABILITY).contains(&v));
        }
    }
}
