// src/config.rs
//! Pipeline configuration: TOML file with env-var path override and
//! hardened defaults, so a missing or partial config never stops a run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    #[serde(default)]
    pub decay: DecayConfig,
}

/// Quality gate thresholds and keyword policy.
#[derive(Debug, Clone, Deserialize)]
pub struct QualityConfig {
    pub min_upvotes: f64,
    pub min_upvote_ratio: f64,
    pub min_title_chars: usize,
    pub signal_keywords: Vec<String>,
    pub high_signal_sources: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_upvotes: 50.0,
            min_upvote_ratio: 0.70,
            min_title_chars: 12,
            signal_keywords: [
                "delay",
                "inventory",
                "backorder",
                "shortage",
                "supply chain",
                "recall",
                "guidance",
                "capacity",
                "export controls",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            high_signal_sources: vec!["polymarket".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub provider_timeout_secs: u64,
    pub provider_call_budget: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            batch_size: 30,
            max_concurrency: 8,
            provider_timeout_secs: 10,
            provider_call_budget: 40,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisConfig {
    pub similarity_threshold: f64,
    pub evidence_quotes: usize,
    pub neutral_band: f64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.30,
            evidence_quotes: 3,
            neutral_band: 0.15,
        }
    }
}

/// Confidence blend weights and tier boundaries.
///
/// `diversity[i]` is the base term for `i + 1` distinct agreeing sources;
/// counts beyond the table reuse the last entry. The table must be
/// non-decreasing or confidence would lose monotonicity in source count.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfidenceConfig {
    pub diversity: Vec<f64>,
    pub engagement_weight: f64,
    pub evidence_weight: f64,
    pub high_engagement: f64,
    pub tier_confirmed: f64,
    pub tier_corroborated: f64,
    pub noise_floor: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            diversity: vec![0.37, 0.58, 0.64, 0.68],
            engagement_weight: 0.28,
            evidence_weight: 0.12,
            high_engagement: 600.0,
            tier_confirmed: 0.9,
            tier_corroborated: 0.7,
            noise_floor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecayConfig {
    pub ttl_immediate_hours: i64,
    pub ttl_developing_hours: i64,
    pub ttl_background_hours: i64,
    pub immediate_recency_secs: i64,
    pub acceleration_factor: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            ttl_immediate_hours: 24,
            ttl_developing_hours: 168,
            ttl_background_hours: 720,
            immediate_recency_secs: 7200,
            acceleration_factor: 1.5,
        }
    }
}

impl PipelineConfig {
    /// Load from an explicit TOML path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config at {}", path.display()))?;
        let mut cfg: PipelineConfig = toml::from_str(&content)
            .with_context(|| format!("parsing pipeline config at {}", path.display()))?;
        cfg.harden();
        Ok(cfg)
    }

    /// Load using `$PIPELINE_CONFIG_PATH`, then `config/pipeline.toml`,
    /// then built-in defaults. A broken file is an error; a missing one
    /// is not.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PIPELINE_CONFIG_PATH) {
            return Self::load_from(&PathBuf::from(p));
        }
        let shipped = PathBuf::from(DEFAULT_PIPELINE_CONFIG_PATH);
        if shipped.exists() {
            return Self::load_from(&shipped);
        }
        Ok(Self::default())
    }

    /// Clamp odd values into usable ranges instead of failing the run.
    fn harden(&mut self) {
        let q = &mut self.quality;
        q.min_upvote_ratio = q.min_upvote_ratio.clamp(0.0, 1.0);
        if q.min_upvotes < 0.0 {
            q.min_upvotes = 0.0;
        }

        let e = &mut self.extraction;
        e.batch_size = e.batch_size.max(1);
        e.max_concurrency = e.max_concurrency.clamp(1, 64);
        e.provider_timeout_secs = e.provider_timeout_secs.max(1);

        let s = &mut self.synthesis;
        s.similarity_threshold = s.similarity_threshold.clamp(0.0, 1.0);
        s.evidence_quotes = s.evidence_quotes.max(1);
        s.neutral_band = s.neutral_band.clamp(0.0, 1.0);

        let c = &mut self.confidence;
        if c.diversity.is_empty() {
            c.diversity = ConfidenceConfig::default().diversity;
        }
        // Force the diversity table non-decreasing; monotonicity in source
        // count is a published property, not a tunable.
        for i in 1..c.diversity.len() {
            if c.diversity[i] < c.diversity[i - 1] {
                c.diversity[i] = c.diversity[i - 1];
            }
        }
        c.high_engagement = c.high_engagement.max(1.0);

        let d = &mut self.decay;
        d.ttl_immediate_hours = d.ttl_immediate_hours.max(1);
        d.ttl_developing_hours = d.ttl_developing_hours.max(d.ttl_immediate_hours + 1);
        d.ttl_background_hours = d.ttl_background_hours.max(d.ttl_developing_hours + 1);
        if d.acceleration_factor < 1.0 {
            d.acceleration_factor = 1.0;
        }
    }
}
