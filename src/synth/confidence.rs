// src/synth/confidence.rs
//! Confidence scoring for candidate themes.
//!
//! Deterministic additive blend of source diversity, trust-weighted
//! engagement, and evidence volume. Scores round DOWN (two decimals) and
//! tier boundaries are strict: a theme sitting exactly on a boundary lands
//! in the lower tier. False negatives over false positives.

use serde::Serialize;

use crate::config::ConfidenceConfig;

/// Inputs for scoring one candidate theme.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThemeStats {
    /// Distinct sources contributing corroborating signals.
    pub distinct_sources: usize,
    /// Trust-weighted combined engagement, normalized into [0, 1] against
    /// the configured high-engagement mark.
    pub engagement_norm: f64,
    /// Number of supporting signals.
    pub evidence_count: usize,
}

/// Classification bands over the confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    /// Multi-source agreement with high engagement.
    Confirmed,
    /// Single strong source, or multi-source with modest engagement.
    Corroborated,
    /// Emerging pattern worth monitoring.
    Emerging,
    /// Below the floor: audit-only, never surfaced.
    Noise,
}

/// Score a theme in [0, 1].
///
/// Monotonic in every input: a corroborating signal from a new distinct
/// source can only move the score up (the diversity table is forced
/// non-decreasing at config load).
pub fn score(cfg: &ConfidenceConfig, stats: &ThemeStats) -> f64 {
    if stats.distinct_sources == 0 || stats.evidence_count == 0 {
        return 0.0;
    }

    let div_idx = stats.distinct_sources.min(cfg.diversity.len()) - 1;
    let diversity = cfg.diversity[div_idx];

    let engagement = cfg.engagement_weight * stats.engagement_norm.clamp(0.0, 1.0);

    let evidence = cfg.evidence_weight * (stats.evidence_count.min(4) as f64 / 4.0);

    floor2((diversity + engagement + evidence).clamp(0.0, 1.0))
}

/// Map a score to its tier. Strict bounds: exactly-at-boundary goes down.
pub fn tier(cfg: &ConfidenceConfig, score: f64) -> ConfidenceTier {
    if score > cfg.tier_confirmed {
        ConfidenceTier::Confirmed
    } else if score > cfg.tier_corroborated {
        ConfidenceTier::Corroborated
    } else if score > cfg.noise_floor {
        ConfidenceTier::Emerging
    } else {
        ConfidenceTier::Noise
    }
}

/// Round down to two decimals. The cheap way (`(x*100).floor()`) is exact
/// enough here because scores come from sums of small config constants.
fn floor2(x: f64) -> f64 {
    (x * 100.0 + 1e-9).floor() / 100.0
}
