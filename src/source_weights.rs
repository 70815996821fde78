//! # Source Weights
//!
//! Configurable mapping from post origins (platforms, subreddits, market
//! venues) to normalized trust weights in `[0.0, 1.0]`. Trust scales the
//! engagement contribution in confidence scoring: a thousand upvotes on a
//! meme board counts for less than a hundred on a specialist board.
//!
//! - Loads from JSON config (weights + aliases).
//! - Case-insensitive lookup with punctuation/dash normalization.
//! - Fallback order: aliases → exact match → substring match → default.
//! - Includes a built-in `default_seed()` with the shipped sources.

use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};

pub const DEFAULT_SOURCE_WEIGHTS_PATH: &str = "config/source_weights.json";
pub const ENV_SOURCE_WEIGHTS_PATH: &str = "SOURCE_WEIGHTS_PATH";

/// Configuration for source trust weights, loaded from JSON or defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceWeightsConfig {
    /// Default weight if no match is found.
    #[serde(default = "default_default_weight")]
    pub default_weight: f64,
    /// Explicit weights for canonical source names.
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    /// Aliases mapping non-canonical names → canonical names.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_default_weight() -> f64 {
    0.60
}

impl SourceWeightsConfig {
    /// Load configuration from a JSON file.
    /// Falls back to `default_seed()` on error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|_| Self::default_seed()),
            Err(_) => Self::default_seed(),
        }
    }

    /// Load using `$SOURCE_WEIGHTS_PATH`, then the shipped file, then the
    /// built-in seed.
    pub fn load_default() -> Self {
        if let Ok(p) = std::env::var(ENV_SOURCE_WEIGHTS_PATH) {
            return Self::load_from_file(p);
        }
        Self::load_from_file(DEFAULT_SOURCE_WEIGHTS_PATH)
    }

    /// Get the weight for a given source name.
    ///
    /// Steps:
    /// 1. Alias lookup (normalized) → canonical → weight.
    /// 2. Exact weight match.
    /// 3. Substring fallback (e.g. "r/wallstreetbets" → "wallstreetbets").
    /// 4. Default weight.
    pub fn weight_for(&self, source: &str) -> f64 {
        let s = normalize(source);

        if let Some(canon) = self.aliases.get(&s) {
            let c = normalize(canon);
            if let Some(&w) = self.weights.get(&c) {
                return clamp01(w);
            }
        }

        if let Some(&w) = self.weights.get(&s) {
            return clamp01(w);
        }

        for (k, &w) in &self.weights {
            if s.contains(k) {
                return clamp01(w);
            }
        }

        clamp01(self.default_weight)
    }

    /// Built-in seed covering the shipped platforms and the boards the
    /// original feed watches. Used as fallback if no config is found.
    pub fn default_seed() -> Self {
        let mut weights = HashMap::new();
        let mut aliases = HashMap::new();

        for (k, v) in [
            ("reddit", 0.70),
            ("polymarket", 0.85),
            ("twitter", 0.65),
            ("wallstreetbets", 0.65),
            ("stocks", 0.75),
            ("investing", 0.75),
            ("semiconductors", 0.85),
            ("hardware", 0.80),
            ("economics", 0.75),
        ] {
            weights.insert(k.to_string(), v);
        }

        for (a, c) in [
            ("wsb", "wallstreetbets"),
            ("r/wallstreetbets", "wallstreetbets"),
            ("r/stocks", "stocks"),
            ("r/investing", "investing"),
            ("r/semiconductors", "semiconductors"),
            ("r/hardware", "hardware"),
            ("r/economics", "economics"),
            ("x", "twitter"),
            ("x.com", "twitter"),
            ("poly", "polymarket"),
        ] {
            aliases.insert(a.to_string(), c.to_string());
        }

        Self {
            default_weight: 0.60,
            weights,
            aliases,
        }
    }
}

/// Normalize input string: lowercase, replace punctuation/dashes with spaces,
/// collapse multiple spaces into one. Slashes are kept so subreddit-style
/// names ("r/stocks") survive as aliases.
fn normalize(s: &str) -> String {
    let mut out = s.trim().to_ascii_lowercase();

    for ch in ['—', '–', '-', '_', '\\'] {
        out = out.replace(ch, " ");
    }
    out = out.replace(['\n', '\r', '\t', ',', '\''], " ");

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clamp to [0.0, 1.0].
fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}
