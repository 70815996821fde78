// src/signal.rs
//! Core data model: sources, engagement metrics, extracted entities, signals.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Origin platform of a post. Extensible: unknown platforms parse into
/// `Other` instead of failing ingestion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Source {
    Reddit,
    Polymarket,
    Twitter,
    Other(String),
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Source::Reddit => "reddit",
            Source::Polymarket => "polymarket",
            Source::Twitter => "twitter",
            Source::Other(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "reddit" => Source::Reddit,
            "polymarket" => Source::Polymarket,
            "twitter" | "x" => Source::Twitter,
            other => Source::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Source {
    fn from(s: String) -> Self {
        Source::parse(&s)
    }
}

impl From<Source> for String {
    fn from(s: Source) -> Self {
        s.as_str().to_string()
    }
}

/// Stable signal identifier: `"{source}/{source_id}"`.
///
/// The natural dedup key doubles as the reference key insights carry, so no
/// separate surrogate id is needed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(String);

impl SignalId {
    pub fn new(source: &Source, source_id: &str) -> Self {
        Self(format!("{}/{}", source.as_str(), source_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Platform-specific numeric engagement map (upvotes, comment counts,
/// ratios, velocity, ...). Ordered so serialization is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngagementMetrics(BTreeMap<String, f64>);

impl EngagementMetrics {
    pub const UPVOTES: &'static str = "upvotes";
    pub const UPVOTE_RATIO: &'static str = "upvote_ratio";
    pub const NUM_COMMENTS: &'static str = "num_comments";
    pub const VELOCITY: &'static str = "velocity";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn set(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    pub fn upvotes(&self) -> f64 {
        self.get(Self::UPVOTES).unwrap_or(0.0)
    }

    pub fn upvote_ratio(&self) -> f64 {
        self.get(Self::UPVOTE_RATIO).unwrap_or(0.0)
    }

    pub fn num_comments(&self) -> f64 {
        self.get(Self::NUM_COMMENTS).unwrap_or(0.0)
    }

    pub fn velocity(&self) -> f64 {
        self.get(Self::VELOCITY).unwrap_or(0.0)
    }

    /// Single engagement number used for evidence ranking and confidence:
    /// upvotes plus double-weighted comments (a comment costs more than a vote).
    pub fn combined(&self) -> f64 {
        self.upvotes() + 2.0 * self.num_comments()
    }
}

/// Entities found in a signal. Empty until extraction runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    pub tickers: BTreeSet<String>,
    pub companies: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
}

impl ExtractedEntities {
    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty() && self.companies.is_empty() && self.keywords.is_empty()
    }

    /// Lowercased union of all entity strings, used for theme clustering.
    pub fn basis(&self) -> BTreeSet<String> {
        self.tickers
            .iter()
            .chain(self.companies.iter())
            .chain(self.keywords.iter())
            .map(|s| s.to_ascii_lowercase())
            .collect()
    }
}

/// One ingested post.
///
/// Lifecycle: created at ingestion with the quality flag already decided;
/// entities and scores land in a later batch pass which flips `processed`
/// exactly once. The pipeline never deletes signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub source: Source,
    pub source_id: String,
    pub title: String,
    pub content: String,
    pub author_id: String,
    pub source_created_at: DateTime<Utc>,
    pub engagement_metrics: EngagementMetrics,
    #[serde(default)]
    pub extracted_entities: ExtractedEntities,
    /// Sentiment in [-1, 1]; absent until processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment_score: Option<f64>,
    /// Urgency in [0, 1]; absent until processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency_score: Option<f64>,
    pub is_quality_signal: bool,
    pub processed: bool,
}

impl Signal {
    /// Title and body joined for text analysis.
    pub fn full_text(&self) -> String {
        if self.content.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.content)
        }
    }
}

/// Extraction results applied to a signal when it is marked processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub entities: ExtractedEntities,
    pub sentiment_score: f64,
    pub urgency_score: f64,
    /// Names of layers that degraded for this signal (for audit logs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_layers: Vec<String>,
    /// Set when the input was malformed and only defaults were stored.
    #[serde(default)]
    pub malformed: bool,
}
