// crates/risk-engine/src/config/file.rs
// File-based configuration from ~/.config/risk-engine/config.toml

use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Top-level config structure.
#[derive(Debug, Deserialize, Default)]
pub struct RiskEngineConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub weights: RiskWeights,
}

/// LLM configuration section — the engine only ever needs a single
/// configured provider behind the `LlmClient` trait (see §6).
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Provider identifier (e.g. "deepseek", "gemini"); `None` disables LLM
    /// features and routes callers to `IsEnabled() == false` fast paths.
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Per-call timeout for Extractor/Ownership/Coupling/Temporal calls (§5).
    #[serde(default = "LlmConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    /// Minimum interval between coupling-rationale calls (§4.9 step 3).
    #[serde(default = "LlmConfig::default_coupling_rationale_interval_secs")]
    pub coupling_rationale_interval_secs: u64,
    /// Max retries on transient HTTP failure (429/5xx) before bubbling up.
    #[serde(default = "LlmConfig::default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            timeout_secs: Self::default_timeout_secs(),
            coupling_rationale_interval_secs: Self::default_coupling_rationale_interval_secs(),
            max_retries: Self::default_max_retries(),
        }
    }
}

impl LlmConfig {
    fn default_timeout_secs() -> u64 {
        60
    }
    fn default_coupling_rationale_interval_secs() -> u64 {
        2
    }
    fn default_max_retries() -> u32 {
        3
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }
}

/// Tunable weights for the composite risk score (§4.9 step 5) and the
/// Phase-5 synthesis aggregation (§4.12). The specification leaves these
/// as an Open Question; defaults here are the values the spec itself
/// quotes, pinned so property tests are deterministic (see DESIGN.md).
#[derive(Debug, Deserialize, Clone)]
pub struct RiskWeights {
    /// Composite coupling-calculator score (§4.9 step 5): temporal/ownership/coupling.
    #[serde(default = "RiskWeights::default_composite_temporal")]
    pub composite_temporal: f64,
    #[serde(default = "RiskWeights::default_composite_ownership")]
    pub composite_ownership: f64,
    #[serde(default = "RiskWeights::default_composite_coupling")]
    pub composite_coupling: f64,

    /// Recency multipliers for the temporal term (§4.9 step 5).
    #[serde(default = "RiskWeights::default_recency_recent_days")]
    pub recency_recent_days: i64,
    #[serde(default = "RiskWeights::default_recency_recent_multiplier")]
    pub recency_recent_multiplier: f64,
    #[serde(default = "RiskWeights::default_recency_stale_days")]
    pub recency_stale_days: i64,
    #[serde(default = "RiskWeights::default_recency_stale_multiplier")]
    pub recency_stale_multiplier: f64,
    #[serde(default = "RiskWeights::default_recency_old_multiplier")]
    pub recency_old_multiplier: f64,

    /// Co-change rate floor below which a pair is not persisted (I3).
    #[serde(default = "RiskWeights::default_coupling_rate_threshold")]
    pub coupling_rate_threshold: f64,

    /// Phase-5 synthesis aggregation weights (§4.12 Aggregation).
    #[serde(default = "RiskWeights::default_synthesis_blast_radius")]
    pub synthesis_blast_radius: f64,
    #[serde(default = "RiskWeights::default_synthesis_test_coverage")]
    pub synthesis_test_coverage: f64,
    #[serde(default = "RiskWeights::default_synthesis_ownership")]
    pub synthesis_ownership: f64,
    #[serde(default = "RiskWeights::default_synthesis_temporal")]
    pub synthesis_temporal: f64,
    #[serde(default = "RiskWeights::default_synthesis_centrality")]
    pub synthesis_centrality: f64,
    #[serde(default = "RiskWeights::default_synthesis_incident")]
    pub synthesis_incident: f64,

    /// Risk-level bands (§4.12 Aggregation).
    #[serde(default = "RiskWeights::default_band_critical")]
    pub band_critical: f64,
    #[serde(default = "RiskWeights::default_band_high")]
    pub band_high: f64,
    #[serde(default = "RiskWeights::default_band_medium")]
    pub band_medium: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            composite_temporal: Self::default_composite_temporal(),
            composite_ownership: Self::default_composite_ownership(),
            composite_coupling: Self::default_composite_coupling(),
            recency_recent_days: Self::default_recency_recent_days(),
            recency_recent_multiplier: Self::default_recency_recent_multiplier(),
            recency_stale_days: Self::default_recency_stale_days(),
            recency_stale_multiplier: Self::default_recency_stale_multiplier(),
            recency_old_multiplier: Self::default_recency_old_multiplier(),
            coupling_rate_threshold: Self::default_coupling_rate_threshold(),
            synthesis_blast_radius: Self::default_synthesis_blast_radius(),
            synthesis_test_coverage: Self::default_synthesis_test_coverage(),
            synthesis_ownership: Self::default_synthesis_ownership(),
            synthesis_temporal: Self::default_synthesis_temporal(),
            synthesis_centrality: Self::default_synthesis_centrality(),
            synthesis_incident: Self::default_synthesis_incident(),
            band_critical: Self::default_band_critical(),
            band_high: Self::default_band_high(),
            band_medium: Self::default_band_medium(),
        }
    }
}

impl RiskWeights {
    fn default_composite_temporal() -> f64 {
        0.4
    }
    fn default_composite_ownership() -> f64 {
        0.3
    }
    fn default_composite_coupling() -> f64 {
        0.3
    }
    fn default_recency_recent_days() -> i64 {
        90
    }
    fn default_recency_recent_multiplier() -> f64 {
        2.0
    }
    fn default_recency_stale_days() -> i64 {
        180
    }
    fn default_recency_stale_multiplier() -> f64 {
        1.0
    }
    fn default_recency_old_multiplier() -> f64 {
        0.5
    }
    fn default_coupling_rate_threshold() -> f64 {
        0.5
    }
    fn default_synthesis_blast_radius() -> f64 {
        0.30
    }
    fn default_synthesis_test_coverage() -> f64 {
        0.20
    }
    fn default_synthesis_ownership() -> f64 {
        0.15
    }
    fn default_synthesis_temporal() -> f64 {
        0.15
    }
    fn default_synthesis_centrality() -> f64 {
        0.10
    }
    fn default_synthesis_incident() -> f64 {
        0.10
    }
    fn default_band_critical() -> f64 {
        0.90
    }
    fn default_band_high() -> f64 {
        0.75
    }
    fn default_band_medium() -> f64 {
        0.50
    }
}

impl RiskEngineConfig {
    /// Load config from `~/.config/risk-engine/config.toml`, falling back to
    /// defaults on any read or parse failure.
    pub fn load() -> Self {
        let path = Self::config_path();

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config from file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
        }
    }

    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| {
                warn!("HOME directory not set — using current directory for risk-engine config.");
                PathBuf::from(".")
            })
            .join(".config")
            .join("risk-engine")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let config: RiskEngineConfig = toml::from_str("").unwrap();
        assert!(!config.llm.is_enabled());
        assert_eq!(config.weights.coupling_rate_threshold, 0.5);
    }

    #[test]
    fn test_parse_llm_section() {
        let toml = r#"
[llm]
provider = "deepseek"
model = "deepseek-reasoner"
"#;
        let config: RiskEngineConfig = toml::from_str(toml).unwrap();
        assert!(config.llm.is_enabled());
        assert_eq!(config.llm.provider.as_deref(), Some("deepseek"));
        assert_eq!(config.llm.timeout_secs, 60);
    }

    #[test]
    fn test_corrupt_toml_falls_back_to_default() {
        let bad_toml = "[llm\nprovider = broken";
        let result: Result<RiskEngineConfig, _> = toml::from_str(bad_toml);
        assert!(result.is_err());
        let config = result.unwrap_or_default();
        assert!(!config.llm.is_enabled());
    }

    #[test]
    fn test_weights_defaults_match_spec() {
        let weights = RiskWeights::default();
        assert_eq!(
            weights.composite_temporal + weights.composite_ownership + weights.composite_coupling,
            1.0
        );
        assert_eq!(
            weights.synthesis_blast_radius
                + weights.synthesis_test_coverage
                + weights.synthesis_ownership
                + weights.synthesis_temporal
                + weights.synthesis_centrality
                + weights.synthesis_incident,
            1.0
        );
        assert_eq!(weights.band_critical, 0.90);
        assert_eq!(weights.band_high, 0.75);
        assert_eq!(weights.band_medium, 0.50);
    }

    #[test]
    fn test_partial_weights_use_defaults() {
        let toml = r#"
[weights]
coupling_rate_threshold = 0.6
"#;
        let config: RiskEngineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.weights.coupling_rate_threshold, 0.6);
        assert_eq!(config.weights.composite_temporal, 0.4);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let toml = r#"
[llm]
provider = "deepseek"
unknown_key = "ignored"
"#;
        let config: RiskEngineConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.llm.provider.as_deref(), Some("deepseek"));
    }
}
