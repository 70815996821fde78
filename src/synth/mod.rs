// src/synth/mod.rs
//! Insight synthesis: clusters a window of processed signals into themes,
//! scores cross-source agreement, assembles evidence, and assigns
//! sentiment, urgency, and expiry. Sub-floor themes go to the noise audit
//! list; cross-source sentiment disagreements are flagged as divergences
//! instead of being averaged away.

pub mod confidence;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use strsim::normalized_levenshtein;

use crate::config::{ConfidenceConfig, DecayConfig, SynthesisConfig};
use crate::insight::{
    theme_key, Divergence, Evidence, EvidenceQuote, Insight, NoiseRecord, Sentiment, Urgency,
};
use crate::signal::{Signal, Source};
use crate::source_weights::SourceWeightsConfig;
use crate::store::{SignalStore, UpsertOutcome};
use crate::synth::confidence::{ConfidenceTier, ThemeStats};

/// Quotes closer than this (normalized Levenshtein) are near-duplicates
/// and only the highest-engagement one is kept.
const QUOTE_SIMILARITY_CAP: f64 = 0.90;

/// Quote length cap for evidence entries.
const QUOTE_CHAR_CAP: usize = 160;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("synth_themes_total", "Candidate themes clustered.");
        describe_counter!("synth_insights_created_total", "New insights stored.");
        describe_counter!(
            "synth_insights_refreshed_total",
            "Existing insights refreshed by theme key."
        );
        describe_counter!("synth_noise_total", "Themes routed to the noise audit list.");
        describe_counter!(
            "synth_divergences_total",
            "Themes flagged for cross-source sentiment disagreement."
        );
        describe_gauge!(
            "synth_last_run_ts",
            "Unix ts when the synthesis stage last ran."
        );
    });
}

/// Pure output of one synthesis pass, before persistence.
#[derive(Debug, Clone, Default)]
pub struct SynthesisOutcome {
    pub insights: Vec<Insight>,
    pub noise: Vec<NoiseRecord>,
    pub divergences: Vec<Divergence>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynthReport {
    pub themes: usize,
    pub created: usize,
    pub refreshed: usize,
    pub noise: usize,
    pub divergences: usize,
}

pub struct InsightSynthesizer {
    cfg: SynthesisConfig,
    confidence: ConfidenceConfig,
    decay: DecayConfig,
    weights: SourceWeightsConfig,
}

/// One candidate theme: signals plus their accumulated entity basis.
struct Cluster {
    signals: Vec<Signal>,
    basis: BTreeSet<String>,
    tickers: BTreeSet<String>,
}

impl InsightSynthesizer {
    pub fn new(
        cfg: SynthesisConfig,
        confidence: ConfidenceConfig,
        decay: DecayConfig,
        weights: SourceWeightsConfig,
    ) -> Self {
        Self {
            cfg,
            confidence,
            decay,
            weights,
        }
    }

    /// Synthesize and persist. Insights are upserted by theme key, so an
    /// overlapping window refreshes live themes instead of duplicating them.
    pub async fn run_once(
        &self,
        store: Arc<dyn SignalStore>,
        signals: &[Signal],
        now: DateTime<Utc>,
    ) -> Result<SynthReport> {
        ensure_metrics_described();

        let outcome = self.synthesize(signals, now);
        let mut report = SynthReport {
            themes: outcome.insights.len() + outcome.noise.len() + outcome.divergences.len(),
            noise: outcome.noise.len(),
            divergences: outcome.divergences.len(),
            ..Default::default()
        };

        for insight in outcome.insights {
            match store.upsert_insight(insight, now).await? {
                UpsertOutcome::Created => report.created += 1,
                UpsertOutcome::Refreshed => report.refreshed += 1,
            }
        }
        for record in outcome.noise {
            store.record_noise(record).await?;
        }
        for divergence in outcome.divergences {
            store.record_divergence(divergence).await?;
        }

        counter!("synth_themes_total").increment(report.themes as u64);
        counter!("synth_insights_created_total").increment(report.created as u64);
        counter!("synth_insights_refreshed_total").increment(report.refreshed as u64);
        counter!("synth_noise_total").increment(report.noise as u64);
        counter!("synth_divergences_total").increment(report.divergences as u64);
        gauge!("synth_last_run_ts").set(now.timestamp().max(0) as f64);

        tracing::info!(
            target: "synth",
            themes = report.themes,
            created = report.created,
            refreshed = report.refreshed,
            noise = report.noise,
            divergences = report.divergences,
            "synthesis run complete"
        );

        Ok(report)
    }

    /// Pure synthesis pass over one window. Deterministic for a given
    /// input and `now`.
    pub fn synthesize(&self, signals: &[Signal], now: DateTime<Utc>) -> SynthesisOutcome {
        let mut outcome = SynthesisOutcome::default();

        for cluster in self.cluster(signals) {
            let theme = theme_label(&cluster);
            let related_assets = cluster.tickers.clone();
            let signal_ids = cluster.signals.iter().map(|s| s.id.clone()).collect::<Vec<_>>();

            let stats = self.theme_stats(&cluster);
            let score = confidence::score(&self.confidence, &stats);
            let tier = confidence::tier(&self.confidence, score);

            if tier == ConfidenceTier::Noise {
                outcome.noise.push(NoiseRecord {
                    theme,
                    confidence_score: score,
                    signal_ids,
                    reason: format!(
                        "below_confidence_floor:{score:.2}<={:.2}",
                        self.confidence.noise_floor
                    ),
                    recorded_at: now,
                });
                continue;
            }

            // An insight above the floor must name assets; a theme that is
            // keywords-only stays in the audit trail.
            if related_assets.is_empty() {
                outcome.noise.push(NoiseRecord {
                    theme,
                    confidence_score: score,
                    signal_ids,
                    reason: "no_related_assets".to_string(),
                    recorded_at: now,
                });
                continue;
            }

            let per_source = per_source_sentiment(&cluster);
            if let Some(divergence) =
                self.detect_divergence(&theme, &related_assets, &per_source, &signal_ids, now)
            {
                outcome.divergences.push(divergence);
                continue;
            }

            let sentiment = self.aggregate_sentiment(&cluster);
            let urgency = self.classify_urgency(&cluster, now);
            let keywords: BTreeSet<String> = cluster
                .signals
                .iter()
                .flat_map(|s| s.extracted_entities.keywords.iter().cloned())
                .collect();

            outcome.insights.push(Insight {
                theme_key: theme_key(&related_assets, &keywords),
                theme,
                confidence_score: score,
                sources_agreeing: cluster
                    .signals
                    .iter()
                    .map(|s| s.source.clone())
                    .collect(),
                related_assets,
                sentiment,
                urgency,
                evidence: self.assemble_evidence(&cluster),
                created_at: now,
                refreshed_at: now,
                expires_at: now + self.ttl(urgency),
                expired: false,
            });
        }

        outcome
    }

    /// Greedy agglomerative clustering over entity overlap. Signals are
    /// visited in `(source_created_at, id)` order so the result does not
    /// depend on feed arrival order.
    fn cluster(&self, signals: &[Signal]) -> Vec<Cluster> {
        let mut ordered: Vec<&Signal> = signals
            .iter()
            .filter(|s| s.processed && !s.extracted_entities.basis().is_empty())
            .collect();
        ordered.sort_by(|a, b| {
            a.source_created_at
                .cmp(&b.source_created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut clusters: Vec<Cluster> = Vec::new();
        for signal in ordered {
            let basis = signal.extracted_entities.basis();
            let tickers = &signal.extracted_entities.tickers;

            let joined = clusters.iter_mut().find(|c| {
                jaccard(&c.basis, &basis) >= self.cfg.similarity_threshold
                    || ticker_overlap(&c.tickers, tickers)
            });
            match joined {
                Some(c) => {
                    c.basis.extend(basis);
                    c.tickers.extend(tickers.iter().cloned());
                    c.signals.push(signal.clone());
                }
                None => clusters.push(Cluster {
                    basis,
                    tickers: tickers.clone(),
                    signals: vec![signal.clone()],
                }),
            }
        }
        clusters
    }

    fn theme_stats(&self, cluster: &Cluster) -> ThemeStats {
        let sources: BTreeSet<&Source> = cluster.signals.iter().map(|s| &s.source).collect();
        let weighted_engagement: f64 = cluster
            .signals
            .iter()
            .map(|s| {
                s.engagement_metrics.combined() * self.weights.weight_for(s.source.as_str())
            })
            .sum();
        ThemeStats {
            distinct_sources: sources.len(),
            engagement_norm: (weighted_engagement / self.confidence.high_engagement).min(1.0),
            evidence_count: cluster.signals.len(),
        }
    }

    /// Engagement-weighted sentiment direction with a neutral band.
    fn aggregate_sentiment(&self, cluster: &Cluster) -> Sentiment {
        let mean = weighted_mean_sentiment(cluster.signals.iter());
        if mean > self.cfg.neutral_band {
            Sentiment::Bullish
        } else if mean < -self.cfg.neutral_band {
            Sentiment::Bearish
        } else {
            Sentiment::Neutral
        }
    }

    /// Urgency from mention-rate acceleration plus recency.
    ///
    /// The window is split at its midpoint; a second half that out-paces
    /// the first by the configured factor, with a fresh newest signal,
    /// reads as immediate. Flat mention rates read as developing, and
    /// declining or stale ones as background. A strongly urgent signal set
    /// (semantic layer) lifts background to developing.
    fn classify_urgency(&self, cluster: &Cluster, now: DateTime<Utc>) -> Urgency {
        let first_ts = cluster
            .signals
            .iter()
            .map(|s| s.source_created_at)
            .min()
            .unwrap_or(now);
        let newest_ts = cluster
            .signals
            .iter()
            .map(|s| s.source_created_at)
            .max()
            .unwrap_or(now);

        let midpoint = first_ts + (now - first_ts) / 2;
        let first_half = cluster
            .signals
            .iter()
            .filter(|s| s.source_created_at <= midpoint)
            .count() as f64;
        let second_half = cluster.signals.len() as f64 - first_half;

        let fresh = (now - newest_ts).num_seconds() <= self.decay.immediate_recency_secs;
        let accelerating = second_half >= first_half * self.decay.acceleration_factor
            && second_half > 0.0;

        let mean_urgency = {
            let scores: Vec<f64> = cluster
                .signals
                .iter()
                .filter_map(|s| s.urgency_score)
                .collect();
            if scores.is_empty() {
                0.0
            } else {
                scores.iter().sum::<f64>() / scores.len() as f64
            }
        };

        if accelerating && fresh {
            Urgency::Immediate
        } else if second_half >= first_half && second_half > 0.0 {
            Urgency::Developing
        } else if mean_urgency >= 0.8 {
            Urgency::Developing
        } else {
            Urgency::Background
        }
    }

    fn ttl(&self, urgency: Urgency) -> Duration {
        match urgency {
            Urgency::Immediate => Duration::hours(self.decay.ttl_immediate_hours),
            Urgency::Developing => Duration::hours(self.decay.ttl_developing_hours),
            Urgency::Background => Duration::hours(self.decay.ttl_background_hours),
        }
    }

    /// A divergence exists when distinct sources sit on opposite sides of
    /// the neutral band for the same theme.
    fn detect_divergence(
        &self,
        theme: &str,
        related_assets: &BTreeSet<String>,
        per_source: &BTreeMap<Source, f64>,
        signal_ids: &[crate::signal::SignalId],
        now: DateTime<Utc>,
    ) -> Option<Divergence> {
        let band = self.cfg.neutral_band;
        let any_bullish = per_source.values().any(|&m| m > band);
        let any_bearish = per_source.values().any(|&m| m < -band);
        if !(any_bullish && any_bearish) {
            return None;
        }
        Some(Divergence {
            theme: theme.to_string(),
            related_assets: related_assets.clone(),
            source_sentiment: per_source.iter().map(|(s, m)| (s.clone(), *m)).collect(),
            signal_ids: signal_ids.to_vec(),
            detected_at: now,
        })
    }

    /// Representative quotes: highest engagement first, near-duplicates
    /// suppressed, plus the complete contributing id list.
    fn assemble_evidence(&self, cluster: &Cluster) -> Evidence {
        let mut ranked: Vec<&Signal> = cluster.signals.iter().collect();
        ranked.sort_by(|a, b| {
            b.engagement_metrics
                .combined()
                .partial_cmp(&a.engagement_metrics.combined())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut quotes: Vec<EvidenceQuote> = Vec::new();
        for signal in ranked {
            if quotes.len() >= self.cfg.evidence_quotes {
                break;
            }
            let text = quote_text(signal);
            if text.is_empty() {
                continue;
            }
            let duplicate = quotes.iter().any(|q| {
                normalized_levenshtein(&q.quote.to_lowercase(), &text.to_lowercase())
                    >= QUOTE_SIMILARITY_CAP
            });
            if duplicate {
                continue;
            }
            quotes.push(EvidenceQuote {
                source: signal.source.clone(),
                quote: text,
                signal_id: signal.id.clone(),
            });
        }

        Evidence {
            quotes,
            signal_ids: cluster.signals.iter().map(|s| s.id.clone()).collect(),
        }
    }
}

/// Jaccard similarity over entity bases.
fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Tickers are the strongest clustering cue: any shared ticker joins a
/// theme even when surrounding keywords differ.
fn ticker_overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    !a.is_empty() && a.intersection(b).next().is_some()
}

fn weighted_mean_sentiment<'a>(signals: impl Iterator<Item = &'a Signal>) -> f64 {
    let mut num = 0.0;
    let mut denom = 0.0;
    for s in signals {
        let w = s.engagement_metrics.combined().max(1.0);
        num += w * s.sentiment_score.unwrap_or(0.0);
        denom += w;
    }
    if denom > 0.0 {
        num / denom
    } else {
        0.0
    }
}

fn per_source_sentiment(cluster: &Cluster) -> BTreeMap<Source, f64> {
    let sources: BTreeSet<Source> = cluster.signals.iter().map(|s| s.source.clone()).collect();
    sources
        .into_iter()
        .map(|src| {
            let mean = weighted_mean_sentiment(
                cluster.signals.iter().filter(|s| s.source == src),
            );
            (src, mean)
        })
        .collect()
}

/// Short human label: dominant assets plus the most common keyword.
fn theme_label(cluster: &Cluster) -> String {
    let mut asset_counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut keyword_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for s in &cluster.signals {
        for t in &s.extracted_entities.tickers {
            *asset_counts.entry(t.as_str()).or_insert(0) += 1;
        }
        for k in &s.extracted_entities.keywords {
            *keyword_counts.entry(k.as_str()).or_insert(0) += 1;
        }
    }

    let mut assets: Vec<(&str, usize)> = asset_counts.into_iter().collect();
    assets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let asset_part: Vec<&str> = assets.iter().take(3).map(|(a, _)| *a).collect();

    let keyword = keyword_counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(k, _)| k);

    match (asset_part.is_empty(), keyword) {
        (false, Some(k)) => format!("{}: {}", asset_part.join(", "), k),
        (false, None) => format!("{} activity", asset_part.join(", ")),
        (true, Some(k)) => format!("{k} chatter"),
        (true, None) => "unlabeled theme".to_string(),
    }
}

fn quote_text(signal: &Signal) -> String {
    let raw = if signal.title.trim().is_empty() {
        signal.content.trim()
    } else {
        signal.title.trim()
    };
    raw.chars().take(QUOTE_CHAR_CAP).collect()
}
