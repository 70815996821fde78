// src/ingest/quality.rs
//! Quality gate: a pure, deterministic function over a post's engagement
//! metrics and content. Evaluated exactly once at ingestion; the stored
//! flag is never recomputed, so historical analysis is immune to later
//! threshold changes.

use crate::config::QualityConfig;
use crate::ingest::types::RawPost;

/// Outcome of the gate, with `"rule:detail"` reason strings for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityVerdict {
    pub accepted: bool,
    pub reasons: Vec<String>,
}

pub struct QualityFilter {
    cfg: QualityConfig,
    // Lowercased once; matching is case-insensitive by construction.
    keywords: Vec<String>,
    high_signal_sources: Vec<String>,
}

impl QualityFilter {
    pub fn new(cfg: &QualityConfig) -> Self {
        Self {
            keywords: cfg
                .signal_keywords
                .iter()
                .map(|k| k.trim().to_ascii_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            high_signal_sources: cfg
                .high_signal_sources
                .iter()
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            cfg: cfg.clone(),
        }
    }

    /// Assess a post. Pure: no clock, no I/O, no interior state, so the
    /// same input always yields the same verdict regardless of call order.
    pub fn assess(&self, post: &RawPost) -> QualityVerdict {
        let mut reasons = Vec::new();

        // Hard rejections first: engagement thresholds and placement.
        let upvotes = post.engagement_metrics.upvotes();
        if upvotes < self.cfg.min_upvotes {
            reasons.push(format!(
                "threshold:upvotes:{:.0}<{:.0}",
                upvotes, self.cfg.min_upvotes
            ));
        }
        let ratio = post.engagement_metrics.upvote_ratio();
        if ratio < self.cfg.min_upvote_ratio {
            reasons.push(format!(
                "threshold:upvote_ratio:{:.2}<{:.2}",
                ratio, self.cfg.min_upvote_ratio
            ));
        }
        if post.pinned {
            reasons.push("placement:pinned".to_string());
        }
        if post.title.chars().count() < self.cfg.min_title_chars {
            reasons.push(format!(
                "threshold:title_chars:<{}",
                self.cfg.min_title_chars
            ));
        }
        if !reasons.is_empty() {
            return QualityVerdict {
                accepted: false,
                reasons,
            };
        }

        // Acceptance gate: a signal keyword OR a high-signal source.
        let text = format!("{} {}", post.title, post.content).to_ascii_lowercase();
        if let Some(kw) = self.keywords.iter().find(|kw| text.contains(kw.as_str())) {
            reasons.push(format!("keyword:{kw}"));
            return QualityVerdict {
                accepted: true,
                reasons,
            };
        }

        let source = post.source.as_str().to_ascii_lowercase();
        if self.high_signal_sources.iter().any(|s| *s == source) {
            reasons.push(format!("source:high_signal:{source}"));
            return QualityVerdict {
                accepted: true,
                reasons,
            };
        }

        reasons.push("no_signal_keyword_or_high_signal_source".to_string());
        QualityVerdict {
            accepted: false,
            reasons,
        }
    }
}
