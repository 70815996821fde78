// src/pipeline.rs
//! Full batch run orchestration: ingest → extract → synthesize → decay,
//! strictly in that order within a run, plus the interval scheduler that
//! triggers runs.
//!
//! Stages hand off through the durable store only. Synthesis reads exactly
//! the signals the extraction stage settled, so it never observes a
//! partially-extracted window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::config::PipelineConfig;
use crate::decay::DecayManager;
use crate::extract::{ExtractReport, Extractor};
use crate::ingest::quality::QualityFilter;
use crate::ingest::types::PostFeed;
use crate::ingest::{self, IngestReport};
use crate::store::{SignalStore, StoreStats};
use crate::synth::{InsightSynthesizer, SynthReport};

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Everything one batch run did, for logs and the binary's summary output.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub batch_token: String,
    pub ingest: IngestReport,
    pub extract: ExtractReport,
    pub synth: SynthReport,
    pub swept: usize,
    pub stats: StoreStats,
}

pub struct Pipeline {
    filter: QualityFilter,
    extractor: Extractor,
    synthesizer: InsightSynthesizer,
    store: Arc<dyn SignalStore>,
    feeds: Vec<Box<dyn PostFeed>>,
    /// Dry runs settle signals but persist no insights (mirrors the
    /// operator flow of testing synthesis against a live backlog).
    dry_run: bool,
}

impl Pipeline {
    pub fn new(
        cfg: &PipelineConfig,
        extractor: Extractor,
        synthesizer: InsightSynthesizer,
        store: Arc<dyn SignalStore>,
        feeds: Vec<Box<dyn PostFeed>>,
    ) -> Self {
        Self {
            filter: QualityFilter::new(&cfg.quality),
            extractor,
            synthesizer,
            store,
            feeds,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Execute one full batch run at `now`.
    ///
    /// Only storage failure aborts; in that case the batch claim is
    /// released so the next scheduled run retries the same signals.
    pub async fn run_batch(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let batch_token = format!(
            "batch-{}-{}",
            now.timestamp(),
            RUN_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        tracing::info!(target: "pipeline", token = %batch_token, "batch run starting");

        // 1) Ingestion settles fully before extraction begins.
        let ingest_report = ingest::run_once(&self.feeds, &self.filter, self.store.as_ref(), now)
            .await
            .context("ingest stage failed")?;

        // 2) Extraction over the claimed window.
        let extract_report = match self
            .extractor
            .run_once(Arc::clone(&self.store), &batch_token, now)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                // Leave signals in their pre-run state for the next run.
                if let Err(release_err) = self.store.release_claims(&batch_token).await {
                    tracing::error!(
                        target: "pipeline",
                        error = ?release_err,
                        token = %batch_token,
                        "failed to release claims after aborted extraction"
                    );
                }
                return Err(e.context("extraction stage failed"));
            }
        };

        // 3) Synthesis only over the settled window.
        let settled = self
            .store
            .signals_by_ids(&extract_report.settled_ids)
            .await
            .context("loading settled signals for synthesis")?;
        let synth_report = if self.dry_run {
            let outcome = self.synthesizer.synthesize(&settled, now);
            tracing::info!(
                target: "pipeline",
                insights = outcome.insights.len(),
                noise = outcome.noise.len(),
                divergences = outcome.divergences.len(),
                "dry run: skipping insight persistence"
            );
            SynthReport::default()
        } else {
            self.synthesizer
                .run_once(Arc::clone(&self.store), &settled, now)
                .await
                .context("synthesis stage failed")?
        };

        // 4) Retire anything past its window.
        let swept = DecayManager::sweep(Arc::clone(&self.store), now)
            .await
            .context("decay sweep failed")?;

        let stats = self.store.stats().await?;
        let summary = RunSummary {
            batch_token,
            ingest: ingest_report,
            extract: extract_report,
            synth: synth_report,
            swept: swept.len(),
            stats,
        };

        tracing::info!(
            target: "pipeline",
            token = %summary.batch_token,
            ingested = summary.ingest.inserted,
            processed = summary.extract.processed,
            insights_created = summary.synth.created,
            insights_refreshed = summary.synth.refreshed,
            noise = summary.synth.noise,
            swept = summary.swept,
            total_signals = summary.stats.total_signals,
            "batch run complete"
        );

        Ok(summary)
    }
}

/// Spawn the periodic trigger. Failed runs are logged and the schedule
/// keeps ticking; there is no cross-run state to corrupt.
pub fn spawn_scheduler(pipeline: Arc<Pipeline>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let now = Utc::now();
            if let Err(e) = pipeline.run_batch(now).await {
                tracing::error!(target: "pipeline", error = ?e, "batch run failed; will retry next tick");
            }
        }
    })
}
