use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ErrorCode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub matching: MatchConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

/// Fusion weights and sub-call limits for hybrid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_half")]
    pub lexical_weight: f32,
    #[serde(default = "default_half")]
    pub vector_weight: f32,
    /// Rerank depth M is `k * rerank_depth_factor` when a cross scorer is set.
    #[serde(default = "default_rerank_depth_factor")]
    pub rerank_depth_factor: usize,
    #[serde(default = "default_subcall_timeout_ms")]
    pub subcall_timeout_ms: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            lexical_weight: default_half(),
            vector_weight: default_half(),
            rerank_depth_factor: default_rerank_depth_factor(),
            subcall_timeout_ms: default_subcall_timeout_ms(),
            max_results: default_max_results(),
        }
    }
}

/// Title similarity measure used by the confidence matcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleMetric {
    /// Ratcliff/Obershelp matching-blocks ratio over characters.
    #[default]
    Gestalt,
    /// Jaccard overlap of lowercase word sets.
    TokenJaccard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    #[serde(default = "default_title_weight")]
    pub title_weight: f32,
    #[serde(default = "default_year_weight")]
    pub year_weight: f32,
    /// Year bonus awarded when the years differ by exactly one.
    #[serde(default = "default_half")]
    pub near_year_credit: f32,
    #[serde(default = "default_accept_threshold")]
    pub accept_threshold: f32,
    #[serde(default = "default_confirm_threshold")]
    pub confirm_threshold: f32,
    #[serde(default = "default_confirm_top_n")]
    pub confirm_top_n: usize,
    /// Number of stored records searched when no reference pool is supplied.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default)]
    pub title_metric: TitleMetric,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            title_weight: default_title_weight(),
            year_weight: default_year_weight(),
            near_year_credit: default_half(),
            accept_threshold: default_accept_threshold(),
            confirm_threshold: default_confirm_threshold(),
            confirm_top_n: default_confirm_top_n(),
            pool_size: default_pool_size(),
            title_metric: TitleMetric::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Embedding dimension fixed for the corpus (MiniLM-L6-v2 by default).
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Maximum number of cached fused rankings. `0` disables the cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    #[serde(default = "default_write_lock_stripes")]
    pub write_lock_stripes: usize,
    /// Read-only connections serving lookups and lexical search on a
    /// file-backed corpus. `0` sends reads through the write connection.
    #[serde(default = "default_read_connections")]
    pub read_connections: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            cache_capacity: default_cache_capacity(),
            write_lock_stripes: default_write_lock_stripes(),
            read_connections: default_read_connections(),
        }
    }
}

impl EngineConfig {
    /// Reject weights and thresholds that would make ranking or matching
    /// meaningless.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let code = ErrorCode::InvalidConfig;
        let s = &self.search;
        if !(s.lexical_weight >= 0.0 && s.vector_weight >= 0.0) {
            bail!("{code}: search weights must be non-negative");
        }
        if s.lexical_weight + s.vector_weight <= 0.0 {
            bail!("{code}: at least one search weight must be positive");
        }
        if s.rerank_depth_factor == 0 {
            bail!("{code}: search.rerank_depth_factor must be at least 1");
        }
        if s.max_results == 0 {
            bail!("{code}: search.max_results must be at least 1");
        }

        let m = &self.matching;
        for (name, value) in [
            ("matching.title_weight", m.title_weight),
            ("matching.year_weight", m.year_weight),
            ("matching.near_year_credit", m.near_year_credit),
            ("matching.accept_threshold", m.accept_threshold),
            ("matching.confirm_threshold", m.confirm_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{code}: {name} must lie in [0, 1], got {value}");
            }
        }
        if m.confirm_threshold > m.accept_threshold {
            bail!("{code}: matching.confirm_threshold must not exceed accept_threshold");
        }

        if self.index.dimension == 0 {
            bail!("{code}: index.dimension must be at least 1");
        }
        if self.index.write_lock_stripes == 0 {
            bail!("{code}: index.write_lock_stripes must be at least 1");
        }
        Ok(())
    }
}

/// Load engine configuration from a TOML file.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read, fails to parse, or holds
/// out-of-range values.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<EngineConfig>(&content).with_context(|| {
        format!(
            "{}: Failed to parse {}",
            ErrorCode::ConfigParseError,
            path.display()
        )
    })?;
    config.validate()?;
    Ok(config)
}

const fn default_half() -> f32 {
    0.5
}

const fn default_rerank_depth_factor() -> usize {
    4
}

const fn default_subcall_timeout_ms() -> u64 {
    2_000
}

const fn default_max_results() -> usize {
    1_000
}

const fn default_title_weight() -> f32 {
    0.85
}

const fn default_year_weight() -> f32 {
    0.15
}

const fn default_accept_threshold() -> f32 {
    0.85
}

const fn default_confirm_threshold() -> f32 {
    0.60
}

const fn default_confirm_top_n() -> usize {
    3
}

const fn default_pool_size() -> usize {
    10
}

const fn default_dimension() -> usize {
    384
}

const fn default_cache_capacity() -> u64 {
    1_024
}

const fn default_write_lock_stripes() -> usize {
    64
}

const fn default_read_connections() -> usize {
    4
}
