//! Reconstruction configuration.
//!
//! All options can be overridden via environment variables:
//! - `LINEAGE_MAX_PREFIX_LENGTH` - Optional. Normalized prefix bound. Defaults to `192`.
//! - `LINEAGE_MATCH_THRESHOLD` - Optional. Score cutoff in [0,1]. Defaults to `0.7`.
//! - `LINEAGE_INFERENCE_MODE` - Optional. `matching-enabled` or `metadata-only`.
//! - `LINEAGE_INDEX_SCOPE` - Optional. `per-workspace` or `shared-tagged`.
//! - `LINEAGE_WEIGHT_INCLUSION` - Optional. Defaults to `0.4`.
//! - `LINEAGE_WEIGHT_COMMON_WORDS` - Optional. Defaults to `0.3`.
//! - `LINEAGE_WEIGHT_LEXICAL` - Optional. Defaults to `0.2`.
//! - `LINEAGE_WEIGHT_EDIT_DISTANCE` - Optional. Defaults to `0.1`.

use thiserror::Error;

use crate::index::DEFAULT_MAX_PREFIX_LEN;
use crate::matcher::DEFAULT_MATCH_THRESHOLD;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Weights of the four scoring signals. Applied as given; they should sum
/// to roughly 1 so composite scores stay comparable to the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub inclusion: f64,
    pub common_words: f64,
    pub lexical: f64,
    pub edit_distance: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            inclusion: 0.4,
            common_words: 0.3,
            lexical: 0.2,
            edit_distance: 0.1,
        }
    }
}

impl ScoreWeights {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("LINEAGE_WEIGHT_INCLUSION", self.inclusion),
            ("LINEAGE_WEIGHT_COMMON_WORDS", self.common_words),
            ("LINEAGE_WEIGHT_LEXICAL", self.lexical),
            ("LINEAGE_WEIGHT_EDIT_DISTANCE", self.edit_distance),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue(
                    name.to_string(),
                    format!("{} is outside [0, 1]", value),
                ));
            }
        }
        let sum = self.inclusion + self.common_words + self.lexical + self.edit_distance;
        if sum <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "LINEAGE_WEIGHT_*".to_string(),
                "weights sum to zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where parent ids are allowed to come from.
///
/// The source material carried both policies; they are modeled as explicit
/// modes rather than resolved by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InferenceMode {
    /// Trust persisted metadata only; never infer a parent by matching.
    MetadataOnly,
    /// Validate persisted metadata, then infer missing parents by
    /// matching. The reason this engine exists.
    #[default]
    MatchingEnabled,
}

/// How instruction indexes relate to workspaces within one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexScope {
    /// One index per workspace; candidates never cross the boundary.
    #[default]
    PerWorkspace,
    /// One shared index; cross-workspace candidates surface and are then
    /// rejected by the validator.
    SharedTagged,
}

/// Configuration for one reconstruction pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructionConfig {
    /// Bound on normalized instruction prefixes, in bytes.
    pub max_prefix_length: usize,

    /// Minimum composite score for an inferred parent.
    pub match_threshold: f64,

    /// Scoring signal weights.
    pub weights: ScoreWeights,

    /// Metadata-only vs matching-enabled reconstruction.
    pub mode: InferenceMode,

    /// Per-workspace vs shared-tagged indexing.
    pub index_scope: IndexScope,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            max_prefix_length: DEFAULT_MAX_PREFIX_LEN,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            weights: ScoreWeights::default(),
            mode: InferenceMode::default(),
            index_scope: IndexScope::default(),
        }
    }
}

impl ReconstructionConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary key lookup. `from_env` is this
    /// over the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("LINEAGE_MAX_PREFIX_LENGTH") {
            config.max_prefix_length = raw.parse().map_err(|e| {
                ConfigError::InvalidValue("LINEAGE_MAX_PREFIX_LENGTH".to_string(), format!("{}", e))
            })?;
        }

        if let Some(raw) = lookup("LINEAGE_MATCH_THRESHOLD") {
            config.match_threshold = raw.parse().map_err(|e| {
                ConfigError::InvalidValue("LINEAGE_MATCH_THRESHOLD".to_string(), format!("{}", e))
            })?;
        }

        if let Some(raw) = lookup("LINEAGE_INFERENCE_MODE") {
            config.mode = match raw.trim().to_lowercase().as_str() {
                "metadata-only" | "metadata_only" => InferenceMode::MetadataOnly,
                "matching-enabled" | "matching_enabled" => InferenceMode::MatchingEnabled,
                other => {
                    return Err(ConfigError::InvalidValue(
                        "LINEAGE_INFERENCE_MODE".to_string(),
                        other.to_string(),
                    ))
                }
            };
        }

        if let Some(raw) = lookup("LINEAGE_INDEX_SCOPE") {
            config.index_scope = match raw.trim().to_lowercase().as_str() {
                "per-workspace" | "per_workspace" => IndexScope::PerWorkspace,
                "shared-tagged" | "shared_tagged" => IndexScope::SharedTagged,
                other => {
                    return Err(ConfigError::InvalidValue(
                        "LINEAGE_INDEX_SCOPE".to_string(),
                        other.to_string(),
                    ))
                }
            };
        }

        config.weights.inclusion =
            weight_from(&lookup, "LINEAGE_WEIGHT_INCLUSION", config.weights.inclusion)?;
        config.weights.common_words = weight_from(
            &lookup,
            "LINEAGE_WEIGHT_COMMON_WORDS",
            config.weights.common_words,
        )?;
        config.weights.lexical =
            weight_from(&lookup, "LINEAGE_WEIGHT_LEXICAL", config.weights.lexical)?;
        config.weights.edit_distance = weight_from(
            &lookup,
            "LINEAGE_WEIGHT_EDIT_DISTANCE",
            config.weights.edit_distance,
        )?;

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges. `Default` always validates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_prefix_length == 0 {
            return Err(ConfigError::InvalidValue(
                "LINEAGE_MAX_PREFIX_LENGTH".to_string(),
                "must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(ConfigError::InvalidValue(
                "LINEAGE_MATCH_THRESHOLD".to_string(),
                format!("{} is outside [0, 1]", self.match_threshold),
            ));
        }
        self.weights.validate()
    }
}

fn weight_from<F>(lookup: &F, name: &str, default: f64) -> Result<f64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ReconstructionConfig::default();
        assert_eq!(config.max_prefix_length, 192);
        assert!((config.match_threshold - 0.7).abs() < 1e-9);
        assert_eq!(config.mode, InferenceMode::MatchingEnabled);
        assert_eq!(config.index_scope, IndexScope::PerWorkspace);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_weights_sum_to_one() {
        let w = ScoreWeights::default();
        let sum = w.inclusion + w.common_words + w.lexical + w.edit_distance;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let config = ReconstructionConfig {
            match_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_prefix_length_rejected() {
        let config = ReconstructionConfig {
            max_prefix_length: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    fn lookup_of(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn numeric_overrides_apply() {
        let config = ReconstructionConfig::from_lookup(lookup_of(&[
            ("LINEAGE_MAX_PREFIX_LENGTH", "64"),
            ("LINEAGE_MATCH_THRESHOLD", "0.5"),
            ("LINEAGE_WEIGHT_INCLUSION", "0.7"),
        ]))
        .unwrap();
        assert_eq!(config.max_prefix_length, 64);
        assert!((config.match_threshold - 0.5).abs() < 1e-9);
        assert!((config.weights.inclusion - 0.7).abs() < 1e-9);
        // Untouched weights keep their defaults.
        assert!((config.weights.lexical - 0.2).abs() < 1e-9);
    }

    #[test]
    fn mode_and_scope_accept_both_spellings() {
        let config = ReconstructionConfig::from_lookup(lookup_of(&[
            ("LINEAGE_INFERENCE_MODE", "metadata-only"),
            ("LINEAGE_INDEX_SCOPE", "shared_tagged"),
        ]))
        .unwrap();
        assert_eq!(config.mode, InferenceMode::MetadataOnly);
        assert_eq!(config.index_scope, IndexScope::SharedTagged);

        let config = ReconstructionConfig::from_lookup(lookup_of(&[
            ("LINEAGE_INFERENCE_MODE", "MATCHING_ENABLED"),
            ("LINEAGE_INDEX_SCOPE", "per-workspace"),
        ]))
        .unwrap();
        assert_eq!(config.mode, InferenceMode::MatchingEnabled);
        assert_eq!(config.index_scope, IndexScope::PerWorkspace);
    }

    #[test]
    fn unparsable_override_is_an_error() {
        let result = ReconstructionConfig::from_lookup(lookup_of(&[(
            "LINEAGE_MATCH_THRESHOLD",
            "not-a-number",
        )]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(name, _))
            if name == "LINEAGE_MATCH_THRESHOLD"));
    }

    #[test]
    fn unknown_mode_string_is_an_error() {
        let result = ReconstructionConfig::from_lookup(lookup_of(&[(
            "LINEAGE_INFERENCE_MODE",
            "oracle",
        )]));
        assert!(result.is_err());
    }

    #[test]
    fn out_of_range_override_fails_validation() {
        let result =
            ReconstructionConfig::from_lookup(lookup_of(&[("LINEAGE_MATCH_THRESHOLD", "3.0")]));
        assert!(result.is_err());
    }

    #[test]
    fn empty_lookup_yields_defaults() {
        let config = ReconstructionConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ReconstructionConfig::default());
    }

    #[test]
    fn zero_weights_rejected() {
        let config = ReconstructionConfig {
            weights: ScoreWeights {
                inclusion: 0.0,
                common_words: 0.0,
                lexical: 0.0,
                edit_distance: 0.0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
