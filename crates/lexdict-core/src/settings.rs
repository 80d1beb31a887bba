//! Engine-wide tunables loaded from TOML.
//!
//! - `init_custom(toml_content)` sets a custom TOML before first `settings()` call
//! - `settings()` returns `&'static Settings` (lazy-init singleton)
//! - Default values are embedded via `include_str!("default_settings.toml")`
//!
//! Dictionaries carry their own caps and decay parameters in the header; the
//! values here are only used when creating a dictionary or when a header
//! omits an attribute.

use std::sync::OnceLock;

use serde::Deserialize;

pub const DEFAULT_SETTINGS_TOML: &str = include_str!("default_settings.toml");

static CUSTOM_TOML: OnceLock<String> = OnceLock::new();

/// Set custom TOML before first `settings()` call.
pub fn init_custom(toml_content: String) -> Result<(), SettingsError> {
    parse_settings_toml(&toml_content)?;
    CUSTOM_TOML
        .set(toml_content)
        .map_err(|_| SettingsError::AlreadyInitialized)
}

/// Get or initialize the global settings singleton.
pub fn settings() -> &'static Settings {
    static INSTANCE: OnceLock<Settings> = OnceLock::new();
    INSTANCE.get_or_init(|| {
        let toml_str = CUSTOM_TOML
            .get()
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_SETTINGS_TOML);
        parse_settings_toml(toml_str).expect("settings TOML must be valid")
    })
}

/// Returns the embedded default settings TOML content.
pub fn default_toml() -> &'static str {
    DEFAULT_SETTINGS_TOML
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("settings already initialized")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub suggest: SuggestSettings,
    pub gc: GcSettings,
    pub forgetting_curve: ForgettingCurveSettings,
    pub pool: PoolSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuggestSettings {
    /// Capacity of the prediction and suggestion result buffers.
    pub max_results: usize,
    /// Proximity alternatives considered per typed position.
    pub max_alternatives: usize,
    /// Keys closer than `ratio * key width` count as neighbours.
    pub proximity_threshold_ratio: f64,
    pub max_corrections: usize,
    /// Percent of the score lost per substituted character.
    pub substitution_penalty_percent: u32,
    /// Percent of the score lost when the word extends past the input.
    pub completion_penalty_percent: u32,
    /// Source words kept in the multi-bigram cache.
    pub max_cached_prev_words: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcSettings {
    pub max_unigram_count: usize,
    pub max_bigram_count: usize,
    pub max_unigram_count_after_gc: usize,
    pub max_bigram_count_after_gc: usize,
    pub decay_interval_secs: u32,
    /// Additional-region size that makes `needs_to_run_gc` report true.
    pub max_extended_region_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForgettingCurveSettings {
    pub occurrences_to_level_up: u32,
    pub duration_to_level_down_secs: u32,
    /// 0 weak, 1 modest, 2 strong, 3 aggressive.
    pub probability_table_id: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolSettings {
    pub max_open: usize,
}

pub fn parse_settings_toml(toml_str: &str) -> Result<Settings, SettingsError> {
    let s: Settings = toml::from_str(toml_str).map_err(|e| SettingsError::Parse(e.to_string()))?;
    validate(&s)?;
    Ok(s)
}

fn validate(s: &Settings) -> Result<(), SettingsError> {
    macro_rules! check_positive {
        ($section:ident . $field:ident) => {
            if s.$section.$field == 0 {
                return Err(SettingsError::InvalidValue {
                    field: concat!(stringify!($section), ".", stringify!($field)).to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        };
    }
    macro_rules! check_percent {
        ($section:ident . $field:ident) => {
            if s.$section.$field > 100 {
                return Err(SettingsError::InvalidValue {
                    field: concat!(stringify!($section), ".", stringify!($field)).to_string(),
                    reason: "must be at most 100".to_string(),
                });
            }
        };
    }
    macro_rules! check_not_above {
        ($section:ident . $field:ident, $limit:ident) => {
            if s.$section.$field > s.$section.$limit {
                return Err(SettingsError::InvalidValue {
                    field: concat!(stringify!($section), ".", stringify!($field)).to_string(),
                    reason: concat!("must not exceed ", stringify!($limit)).to_string(),
                });
            }
        };
    }

    check_positive!(suggest.max_results);
    check_positive!(suggest.max_alternatives);
    check_positive!(suggest.max_cached_prev_words);
    check_percent!(suggest.substitution_penalty_percent);
    check_percent!(suggest.completion_penalty_percent);
    if !(s.suggest.proximity_threshold_ratio > 0.0) {
        return Err(SettingsError::InvalidValue {
            field: "suggest.proximity_threshold_ratio".to_string(),
            reason: "must be positive".to_string(),
        });
    }

    check_positive!(gc.max_unigram_count);
    check_positive!(gc.max_bigram_count);
    check_positive!(gc.decay_interval_secs);
    check_positive!(gc.max_extended_region_size);
    check_not_above!(gc.max_unigram_count_after_gc, max_unigram_count);
    check_not_above!(gc.max_bigram_count_after_gc, max_bigram_count);

    check_positive!(forgetting_curve.occurrences_to_level_up);
    check_positive!(forgetting_curve.duration_to_level_down_secs);
    if s.forgetting_curve.probability_table_id >= crate::probability::forgetting_curve::TABLE_COUNT {
        return Err(SettingsError::InvalidValue {
            field: "forgetting_curve.probability_table_id".to_string(),
            reason: format!(
                "must be below {}",
                crate::probability::forgetting_curve::TABLE_COUNT
            ),
        });
    }

    check_positive!(pool.max_open);

    Ok(())
}
