// src/extract/mod.rs
//! Layered entity & sentiment extraction.
//!
//! Layer order, cheapest first: lexical dictionary pass (always runs),
//! batch sentiment provider (best-effort, neutral fallback), semantic
//! refinement provider (optional, per-signal). Each signal settles through
//! a compare-and-set `mark_processed` exactly once, whatever the layers did.

pub mod dictionary;
pub mod providers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::task::JoinSet;

use crate::config::ExtractionConfig;
use crate::extract::dictionary::EntityDictionary;
use crate::extract::providers::{
    BatchText, CallBudget, DynSemanticProvider, DynSentimentProvider,
};
use crate::signal::{ExtractionResult, Signal, SignalId};
use crate::store::SignalStore;

/// Velocity (upvotes/hour) at which the fallback urgency prior saturates.
const URGENCY_VELOCITY_SCALE: f64 = 120.0;

/// Content cap per item sent to the sentiment provider.
const PROVIDER_TEXT_CAP: usize = 1000;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("extract_claimed_total", "Signals claimed for extraction.");
        describe_counter!("extract_processed_total", "Signals marked processed.");
        describe_counter!(
            "extract_malformed_total",
            "Signals skipped as malformed (still marked processed)."
        );
        describe_counter!(
            "extract_sentiment_degraded_total",
            "Signals that fell back to neutral sentiment."
        );
        describe_counter!(
            "extract_semantic_degraded_total",
            "Signals that completed without semantic refinement."
        );
        describe_gauge!(
            "extract_last_run_ts",
            "Unix ts when the extraction stage last ran."
        );
    });
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub claimed: usize,
    pub processed: usize,
    /// Claims that lost the CAS race (already settled elsewhere).
    pub already_settled: usize,
    pub malformed: usize,
    pub sentiment_degraded: usize,
    pub semantic_degraded: usize,
    /// Ids this run settled, in completion order. The synthesis stage
    /// reads its window from here.
    pub settled_ids: Vec<SignalId>,
}

pub struct Extractor {
    cfg: ExtractionConfig,
    dictionary: Arc<EntityDictionary>,
    sentiment: DynSentimentProvider,
    semantic: DynSemanticProvider,
}

struct TaskOutcome {
    id: SignalId,
    processed: bool,
    malformed: bool,
    sentiment_degraded: bool,
    semantic_degraded: bool,
}

impl Extractor {
    pub fn new(
        cfg: ExtractionConfig,
        sentiment: DynSentimentProvider,
        semantic: DynSemanticProvider,
    ) -> Self {
        Self {
            cfg,
            dictionary: Arc::new(EntityDictionary::embedded().clone()),
            sentiment,
            semantic,
        }
    }

    pub fn with_dictionary(mut self, dictionary: EntityDictionary) -> Self {
        self.dictionary = Arc::new(dictionary);
        self
    }

    /// Claim one batch and settle every signal in it.
    ///
    /// Provider trouble degrades individual signals; only store errors
    /// propagate (the caller releases the batch claim on that path).
    pub async fn run_once(
        &self,
        store: Arc<dyn SignalStore>,
        batch_token: &str,
        now: DateTime<Utc>,
    ) -> Result<ExtractReport> {
        ensure_metrics_described();

        let batch = store
            .claim_unprocessed(batch_token, self.cfg.batch_size)
            .await?;
        let mut report = ExtractReport {
            claimed: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let budget = Arc::new(CallBudget::new(self.cfg.provider_call_budget));
        let timeout = Duration::from_secs(self.cfg.provider_timeout_secs);

        // Layer 2 first: the provider contract is batch-shaped, so one
        // call covers the window before per-signal work fans out.
        let sentiment_by_id = self
            .score_sentiment(&batch, budget.as_ref(), timeout)
            .await;

        let mut join_set: JoinSet<Result<TaskOutcome>> = JoinSet::new();
        let mut pending = batch.into_iter();

        loop {
            while join_set.len() < self.cfg.max_concurrency {
                let Some(signal) = pending.next() else { break };
                let sentiment = sentiment_by_id
                    .get(&signal.id)
                    .copied()
                    .flatten();
                let store = Arc::clone(&store);
                let semantic = Arc::clone(&self.semantic);
                let dictionary = Arc::clone(&self.dictionary);
                let budget = Arc::clone(&budget);
                join_set.spawn(async move {
                    settle_signal(signal, sentiment, dictionary, semantic, store, budget, timeout)
                        .await
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let outcome = joined.map_err(|e| anyhow::anyhow!("extraction task panicked: {e}"))??;
            if outcome.processed {
                report.processed += 1;
                report.settled_ids.push(outcome.id);
            } else {
                report.already_settled += 1;
            }
            if outcome.malformed {
                report.malformed += 1;
            }
            if outcome.sentiment_degraded {
                report.sentiment_degraded += 1;
            }
            if outcome.semantic_degraded {
                report.semantic_degraded += 1;
            }
        }

        counter!("extract_claimed_total").increment(report.claimed as u64);
        counter!("extract_processed_total").increment(report.processed as u64);
        counter!("extract_malformed_total").increment(report.malformed as u64);
        counter!("extract_sentiment_degraded_total")
            .increment(report.sentiment_degraded as u64);
        counter!("extract_semantic_degraded_total")
            .increment(report.semantic_degraded as u64);
        gauge!("extract_last_run_ts").set(now.timestamp().max(0) as f64);

        tracing::info!(
            target: "extract",
            claimed = report.claimed,
            processed = report.processed,
            malformed = report.malformed,
            sentiment_degraded = report.sentiment_degraded,
            semantic_degraded = report.semantic_degraded,
            "extraction run complete"
        );

        Ok(report)
    }

    /// One batched sentiment call for the window, under deadline + budget.
    async fn score_sentiment(
        &self,
        batch: &[Signal],
        budget: &CallBudget,
        timeout: Duration,
    ) -> HashMap<SignalId, Option<f64>> {
        let items: Vec<BatchText> = batch
            .iter()
            .filter(|s| !s.full_text().trim().is_empty())
            .map(|s| BatchText {
                id: s.id.clone(),
                text: s.full_text().chars().take(PROVIDER_TEXT_CAP).collect(),
            })
            .collect();

        let mut by_id: HashMap<SignalId, Option<f64>> =
            batch.iter().map(|s| (s.id.clone(), None)).collect();
        if items.is_empty() {
            return by_id;
        }

        if !budget.try_acquire() {
            tracing::warn!(target: "extract", provider = self.sentiment.name(), "sentiment call budget exhausted");
            return by_id;
        }

        match tokio::time::timeout(timeout, self.sentiment.score_batch(&items)).await {
            Ok(scores) => {
                for (item, score) in items.iter().zip(scores) {
                    by_id.insert(item.id.clone(), score);
                }
            }
            Err(_) => {
                tracing::warn!(
                    target: "extract",
                    provider = self.sentiment.name(),
                    "sentiment provider timed out; batch falls back to neutral"
                );
            }
        }
        by_id
    }
}

/// Run layers 1 and 3 for one signal and settle it via CAS.
async fn settle_signal(
    signal: Signal,
    sentiment: Option<f64>,
    dictionary: Arc<EntityDictionary>,
    semantic: DynSemanticProvider,
    store: Arc<dyn SignalStore>,
    budget: Arc<CallBudget>,
    timeout: Duration,
) -> Result<TaskOutcome> {
    let text = signal.full_text();

    // Malformed input: nothing to analyze. Settle with defaults so the
    // signal can never be reclaimed and re-fail forever.
    if text.trim().is_empty() {
        tracing::warn!(target: "extract", id = %signal.id, "malformed signal; storing defaults");
        let processed = store
            .mark_processed(
                &signal.id,
                ExtractionResult {
                    malformed: true,
                    ..Default::default()
                },
            )
            .await?;
        return Ok(TaskOutcome {
            id: signal.id,
            processed,
            malformed: true,
            sentiment_degraded: false,
            semantic_degraded: false,
        });
    }

    // Layer 1: lexical, deterministic, always runs.
    let mut entities = dictionary.extract(&text);
    let mut degraded = Vec::new();

    let sentiment_degraded = sentiment.is_none();
    if sentiment_degraded {
        degraded.push("sentiment".to_string());
    }
    let sentiment_score = sentiment.unwrap_or(0.0);

    // Fallback urgency prior from engagement velocity; the semantic layer
    // may overwrite it.
    let prior =
        (signal.engagement_metrics.velocity() / URGENCY_VELOCITY_SCALE).clamp(0.0, 1.0);

    // Layer 3: semantic refinement, optional.
    let refinement = if budget.try_acquire() {
        match tokio::time::timeout(timeout, semantic.refine(&text, &entities)).await {
            Ok(r) => r,
            Err(_) => {
                tracing::debug!(target: "extract", id = %signal.id, "semantic provider timed out");
                None
            }
        }
    } else {
        None
    };

    let semantic_degraded = refinement.is_none();
    let mut urgency_score = prior;
    match refinement {
        Some(r) => {
            if let Some(confirmed) = r.confirmed_tickers {
                let keep: std::collections::BTreeSet<String> = confirmed
                    .into_iter()
                    .map(|t| t.to_ascii_uppercase())
                    .collect();
                entities.tickers.retain(|t| keep.contains(t));
            }
            if let Some(u) = r.urgency_score {
                urgency_score = u.clamp(0.0, 1.0);
            }
        }
        None => degraded.push("semantic".to_string()),
    }

    let processed = store
        .mark_processed(
            &signal.id,
            ExtractionResult {
                entities,
                sentiment_score,
                urgency_score,
                degraded_layers: degraded,
                malformed: false,
            },
        )
        .await?;

    Ok(TaskOutcome {
        id: signal.id,
        processed,
        malformed: false,
        sentiment_degraded,
        semantic_degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionConfig;
    use crate::extract::providers::{
        DisabledSemantic, DisabledSentiment, MockSemanticProvider, MockSentimentProvider,
        SemanticProvider, SemanticRefinement,
    };
    use crate::signal::{EngagementMetrics, ExtractedEntities, Source};
    use crate::store::MemoryStore;
    use std::future::Future;
    use std::pin::Pin;

    fn mk_signal(source_id: &str, title: &str, content: &str, velocity: f64) -> Signal {
        let source = Source::Reddit;
        let mut m = EngagementMetrics::new();
        m.set(EngagementMetrics::VELOCITY, velocity);
        m.set(EngagementMetrics::UPVOTES, 500.0);
        Signal {
            id: SignalId::new(&source, source_id),
            source,
            source_id: source_id.into(),
            title: title.into(),
            content: content.into(),
            author_id: "u".into(),
            source_created_at: Utc::now(),
            engagement_metrics: m,
            extracted_entities: Default::default(),
            sentiment_score: None,
            urgency_score: None,
            is_quality_signal: true,
            processed: false,
        }
    }

    fn extractor(
        sentiment: DynSentimentProvider,
        semantic: DynSemanticProvider,
    ) -> Extractor {
        Extractor::new(ExtractionConfig::default(), sentiment, semantic)
    }

    #[tokio::test]
    async fn full_run_annotates_and_settles() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_if_absent(mk_signal(
                "xyz999",
                "RAM shortage hitting memory chip makers",
                "Micron and $WDC lead times exploding",
                30.0,
            ))
            .await
            .unwrap();

        let ex = extractor(
            Arc::new(MockSentimentProvider { fixed: 0.5 }),
            Arc::new(MockSemanticProvider::confirm_all()),
        );
        let report = ex
            .run_once(store.clone(), "run-1", Utc::now())
            .await
            .unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.processed, 1);

        let id = SignalId::new(&Source::Reddit, "xyz999");
        let s = store.signal(&id).unwrap();
        assert!(s.processed);
        assert_eq!(s.sentiment_score, Some(0.5));
        assert!(s.extracted_entities.keywords.contains("RAM shortage"));
        assert!(s.extracted_entities.tickers.contains("WDC"));
        assert!(s.extracted_entities.tickers.contains("MU"));
    }

    #[tokio::test]
    async fn signals_are_never_extracted_twice() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_if_absent(mk_signal("a1", "Chip shortage everywhere", "", 5.0))
            .await
            .unwrap();

        let ex = extractor(
            Arc::new(MockSentimentProvider { fixed: 0.2 }),
            Arc::new(MockSemanticProvider::confirm_all()),
        );
        let first = ex
            .run_once(store.clone(), "run-1", Utc::now())
            .await
            .unwrap();
        assert_eq!(first.processed, 1);

        // Nothing left to claim on the next run.
        let second = ex
            .run_once(store.clone(), "run-2", Utc::now())
            .await
            .unwrap();
        assert_eq!(second.claimed, 0);
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_neutral() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_if_absent(mk_signal("b1", "Backorder wave in GPUs", "$NVDA", 10.0))
            .await
            .unwrap();

        let ex = extractor(Arc::new(DisabledSentiment), Arc::new(DisabledSemantic));
        let report = ex
            .run_once(store.clone(), "run-1", Utc::now())
            .await
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.sentiment_degraded, 1);
        assert_eq!(report.semantic_degraded, 1);

        let s = store.signal(&SignalId::new(&Source::Reddit, "b1")).unwrap();
        assert!(s.processed, "degraded signals still settle");
        assert_eq!(s.sentiment_score, Some(0.0));
        // Lexical results survive the degraded layers.
        assert!(s.extracted_entities.tickers.contains("NVDA"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_semantic_provider_is_abandoned() {
        struct SlowSemantic;
        impl SemanticProvider for SlowSemantic {
            fn refine<'a>(
                &'a self,
                _text: &'a str,
                _entities: &'a ExtractedEntities,
            ) -> Pin<Box<dyn Future<Output = Option<SemanticRefinement>> + Send + 'a>>
            {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Some(SemanticRefinement::default())
                })
            }
            fn name(&self) -> &'static str {
                "slow"
            }
        }

        let store = Arc::new(MemoryStore::new());
        store
            .insert_if_absent(mk_signal("c1", "Factory shutdown rumors", "", 2.0))
            .await
            .unwrap();

        let ex = extractor(
            Arc::new(MockSentimentProvider { fixed: -0.3 }),
            Arc::new(SlowSemantic),
        );
        let report = ex
            .run_once(store.clone(), "run-1", Utc::now())
            .await
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.semantic_degraded, 1);

        let s = store.signal(&SignalId::new(&Source::Reddit, "c1")).unwrap();
        assert_eq!(s.sentiment_score, Some(-0.3), "earlier layers still count");
    }

    #[tokio::test]
    async fn malformed_signal_settles_with_defaults() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_if_absent(mk_signal("m1", "", "", 0.0))
            .await
            .unwrap();

        let ex = extractor(
            Arc::new(MockSentimentProvider { fixed: 0.9 }),
            Arc::new(MockSemanticProvider::confirm_all()),
        );
        let report = ex
            .run_once(store.clone(), "run-1", Utc::now())
            .await
            .unwrap();
        assert_eq!(report.malformed, 1);

        let s = store.signal(&SignalId::new(&Source::Reddit, "m1")).unwrap();
        assert!(s.processed, "malformed signals are never reclaimed");
        assert_eq!(s.sentiment_score, Some(0.0));
        assert!(s.extracted_entities.is_empty());
    }

    #[tokio::test]
    async fn one_bad_signal_never_aborts_the_batch() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_if_absent(mk_signal("ok1", "Supply chain update for storage", "$WDC", 9.0))
            .await
            .unwrap();
        store
            .insert_if_absent(mk_signal("bad", "", "", 0.0))
            .await
            .unwrap();

        let ex = extractor(
            Arc::new(MockSentimentProvider { fixed: 0.4 }),
            Arc::new(MockSemanticProvider::confirm_all()),
        );
        let report = ex
            .run_once(store.clone(), "run-1", Utc::now())
            .await
            .unwrap();
        assert_eq!(report.claimed, 2);
        assert_eq!(report.processed, 2);
        assert_eq!(report.malformed, 1);
    }
}
