// src/store.rs
//! Durable-store contract and the in-memory implementation.
//!
//! The pipeline only ever talks to [`SignalStore`]; a production deployment
//! plugs a database-backed implementation in behind the same trait.
//! [`MemoryStore`] honors every invariant the pipeline relies on:
//! uniqueness on `(source, source_id)`, claim-tokened batches, and
//! compare-and-set `processed` transitions.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::insight::{Divergence, Insight, NoiseRecord};
use crate::signal::{ExtractionResult, Signal, SignalId};

/// Result of a dedup-guarded insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// `(source, source_id)` was already present; the write was a no-op.
    Duplicate,
}

/// Result of an insight upsert keyed by theme identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// A live insight with the same theme key was refreshed in place.
    Refreshed,
}

/// Counts for run summaries and diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreStats {
    pub total_signals: usize,
    pub quality_signals: usize,
    pub unprocessed_quality: usize,
    pub insights_total: usize,
    pub insights_current: usize,
}

#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Insert unless `(source, source_id)` exists. A concurrent double
    /// insert resolves to `Duplicate`, never an error.
    async fn insert_if_absent(&self, signal: Signal) -> Result<InsertOutcome>;

    /// Claim up to `limit` unprocessed quality signals for `batch_token`,
    /// ordered by engagement velocity descending. Signals claimed by a
    /// different token are skipped, so overlapping runs never share work.
    async fn claim_unprocessed(&self, batch_token: &str, limit: usize) -> Result<Vec<Signal>>;

    /// Release claims held by `batch_token` (cleanup after an aborted run).
    async fn release_claims(&self, batch_token: &str) -> Result<()>;

    /// Apply extraction results and flip `processed` false→true.
    /// Returns `false` when the signal was already processed; the losing
    /// writer treats that as a no-op.
    async fn mark_processed(&self, id: &SignalId, results: ExtractionResult) -> Result<bool>;

    /// Fetch signals by id (unknown ids are skipped, not errors).
    async fn signals_by_ids(&self, ids: &[SignalId]) -> Result<Vec<Signal>>;

    /// Insert a new insight, or refresh the live insight with the same
    /// `theme_key` (confidence, evidence, expiry, `refreshed_at`;
    /// `created_at` is preserved).
    async fn upsert_insight(&self, insight: Insight, now: DateTime<Utc>)
        -> Result<UpsertOutcome>;

    /// Record a sub-floor theme for audit.
    async fn record_noise(&self, record: NoiseRecord) -> Result<()>;

    /// Record a cross-source sentiment disagreement for audit.
    async fn record_divergence(&self, divergence: Divergence) -> Result<()>;

    /// Insights that are still live at `now` (never includes expired rows).
    async fn current_insights(&self, now: DateTime<Utc>) -> Result<Vec<Insight>>;

    /// Mark every insight whose `expires_at` has passed and return the
    /// newly expired ones. Expired insights stay stored for audit.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<Insight>>;

    /// Most recent noise-audit records, newest last.
    async fn noise_audit(&self, limit: usize) -> Result<Vec<NoiseRecord>>;

    async fn stats(&self) -> Result<StoreStats>;
}

// ------------------------------------------------------------
// In-memory implementation
// ------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredSignal {
    signal: Signal,
    claim: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    signals: BTreeMap<SignalId, StoredSignal>,
    insights: Vec<Insight>,
    noise: Vec<NoiseRecord>,
    divergences: Vec<Divergence>,
}

/// Mutex-guarded in-memory store. Good enough for the batch harness and
/// for tests; production storage lives behind the same trait elsewhere.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    noise_cap: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            noise_cap: 10_000,
        }
    }

    /// All divergence records, oldest first.
    pub fn divergences(&self) -> Vec<Divergence> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.divergences.clone()
    }

    /// Snapshot of a single signal (test and diagnostics helper).
    pub fn signal(&self, id: &SignalId) -> Option<Signal> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.signals.get(id).map(|s| s.signal.clone())
    }

    /// All stored insights including expired ones, oldest first.
    pub fn all_insights(&self) -> Vec<Insight> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.insights.clone()
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn insert_if_absent(&self, signal: Signal) -> Result<InsertOutcome> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if inner.signals.contains_key(&signal.id) {
            return Ok(InsertOutcome::Duplicate);
        }
        inner.signals.insert(
            signal.id.clone(),
            StoredSignal {
                signal,
                claim: None,
            },
        );
        Ok(InsertOutcome::Inserted)
    }

    async fn claim_unprocessed(&self, batch_token: &str, limit: usize) -> Result<Vec<Signal>> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");

        let mut candidates: Vec<SignalId> = inner
            .signals
            .values()
            .filter(|s| {
                s.signal.is_quality_signal && !s.signal.processed && s.claim.is_none()
            })
            .map(|s| s.signal.id.clone())
            .collect();

        // Velocity descending, id as the deterministic tie-breaker.
        candidates.sort_by(|a, b| {
            let va = inner.signals[a].signal.engagement_metrics.velocity();
            let vb = inner.signals[b].signal.engagement_metrics.velocity();
            vb.partial_cmp(&va)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
        candidates.truncate(limit);

        let mut out = Vec::with_capacity(candidates.len());
        for id in candidates {
            if let Some(stored) = inner.signals.get_mut(&id) {
                stored.claim = Some(batch_token.to_string());
                out.push(stored.signal.clone());
            }
        }
        Ok(out)
    }

    async fn release_claims(&self, batch_token: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        for stored in inner.signals.values_mut() {
            if stored.claim.as_deref() == Some(batch_token) {
                stored.claim = None;
            }
        }
        Ok(())
    }

    async fn mark_processed(&self, id: &SignalId, results: ExtractionResult) -> Result<bool> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let Some(stored) = inner.signals.get_mut(id) else {
            return Ok(false);
        };
        if stored.signal.processed {
            // Losing claim or retry: already settled, no-op.
            return Ok(false);
        }
        stored.signal.extracted_entities = results.entities;
        stored.signal.sentiment_score = Some(results.sentiment_score.clamp(-1.0, 1.0));
        stored.signal.urgency_score = Some(results.urgency_score.clamp(0.0, 1.0));
        stored.signal.processed = true;
        stored.claim = None;
        Ok(true)
    }

    async fn signals_by_ids(&self, ids: &[SignalId]) -> Result<Vec<Signal>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| inner.signals.get(id).map(|s| s.signal.clone()))
            .collect())
    }

    async fn upsert_insight(
        &self,
        mut insight: Insight,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");

        if let Some(existing) = inner
            .insights
            .iter_mut()
            .rev()
            .find(|i| i.theme_key == insight.theme_key && i.is_current(now))
        {
            // Refresh in place; creation time is history and stays.
            insight.created_at = existing.created_at;
            insight.refreshed_at = now;
            *existing = insight;
            return Ok(UpsertOutcome::Refreshed);
        }

        insight.refreshed_at = insight.created_at;
        inner.insights.push(insight);
        Ok(UpsertOutcome::Created)
    }

    async fn record_noise(&self, record: NoiseRecord) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.noise.push(record);
        if inner.noise.len() > self.noise_cap {
            let excess = inner.noise.len() - self.noise_cap;
            inner.noise.drain(0..excess);
        }
        Ok(())
    }

    async fn record_divergence(&self, divergence: Divergence) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.divergences.push(divergence);
        Ok(())
    }

    async fn current_insights(&self, now: DateTime<Utc>) -> Result<Vec<Insight>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .insights
            .iter()
            .filter(|i| i.is_current(now))
            .cloned()
            .collect())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<Insight>> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let mut swept = Vec::new();
        for insight in inner.insights.iter_mut() {
            if !insight.expired && insight.expires_at <= now {
                insight.expired = true;
                swept.push(insight.clone());
            }
        }
        Ok(swept)
    }

    async fn noise_audit(&self, limit: usize) -> Result<Vec<NoiseRecord>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let len = inner.noise.len();
        let start = len.saturating_sub(limit);
        Ok(inner.noise[start..].to_vec())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let now = Utc::now();
        Ok(StoreStats {
            total_signals: inner.signals.len(),
            quality_signals: inner
                .signals
                .values()
                .filter(|s| s.signal.is_quality_signal)
                .count(),
            unprocessed_quality: inner
                .signals
                .values()
                .filter(|s| s.signal.is_quality_signal && !s.signal.processed)
                .count(),
            insights_total: inner.insights.len(),
            insights_current: inner.insights.iter().filter(|i| i.is_current(now)).count(),
        })
    }
}
