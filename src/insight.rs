// src/insight.rs
//! Insight types: synthesized themes with confidence, sentiment, urgency,
//! and supporting evidence.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::signal::{SignalId, Source};

/// Aggregated direction of a theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

/// How fast a theme is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Immediate,
    Developing,
    Background,
}

/// One representative quote backing an insight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceQuote {
    pub source: Source,
    pub quote: String,
    pub signal_id: SignalId,
}

/// Supporting material for an insight: a small set of representative quotes
/// plus the complete list of contributing signal ids. Signal ids are a weak
/// back-reference for lookup only; insights never own signals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub quotes: Vec<EvidenceQuote>,
    pub signal_ids: Vec<SignalId>,
}

/// A synthesized cross-source theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// Stable identity across overlapping synthesis windows; re-synthesis
    /// refreshes the row with this key instead of inserting a new one.
    pub theme_key: String,
    pub theme: String,
    /// In [0, 1]; see synth::confidence for the derivation.
    pub confidence_score: f64,
    pub sources_agreeing: BTreeSet<Source>,
    pub related_assets: BTreeSet<String>,
    pub sentiment: Sentiment,
    pub urgency: Urgency,
    pub evidence: Evidence,
    pub created_at: DateTime<Utc>,
    /// Bumped whenever a later window refreshes this insight.
    pub refreshed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set by the decay sweep once `expires_at` passes. Expired insights
    /// stay stored for audit and drop out of "current" views only.
    #[serde(default)]
    pub expired: bool,
}

impl Insight {
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        !self.expired && self.expires_at > now
    }
}

/// Theme identity: sha256 over the sorted asset basis, falling back to the
/// sorted keyword basis for asset-less themes. Stable regardless of which
/// window the contributing signals arrived in.
pub fn theme_key(assets: &BTreeSet<String>, keywords: &BTreeSet<String>) -> String {
    let mut hasher = Sha256::new();
    let basis: Vec<String> = if assets.is_empty() {
        keywords.iter().map(|k| k.to_ascii_lowercase()).collect()
    } else {
        assets.iter().map(|a| a.to_ascii_uppercase()).collect()
    };
    for part in &basis {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// A theme that fell below the confidence floor. Kept for audit, never
/// surfaced as an insight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseRecord {
    pub theme: String,
    pub confidence_score: f64,
    pub signal_ids: Vec<SignalId>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// A theme where distinct sources disagree in sentiment. Flagged instead of
/// being merged into one insight with a misleading averaged direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    pub theme: String,
    pub related_assets: BTreeSet<String>,
    /// Mean sentiment per source, the disagreement itself.
    pub source_sentiment: Vec<(Source, f64)>,
    pub signal_ids: Vec<SignalId>,
    pub detected_at: DateTime<Utc>,
}
