//! Signal Intelligence Pipeline — Binary Entrypoint
//! Periodic batch runner: ingest → extract → synthesize → decay against the
//! in-memory store and the embedded fixture feeds. Production deployments
//! embed the library with their own store and feeds instead.
//!
//! Environment:
//!   PIPELINE_CONFIG_PATH     override config/pipeline.toml
//!   SOURCE_WEIGHTS_PATH      override config/source_weights.json
//!   PIPELINE_INTERVAL_SECS   keep running on an interval (default: one run)
//!   PIPELINE_DRY_RUN=1       settle signals but persist no insights
//!   EXTRACT_TEST_MODE=mock   deterministic providers, no network

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pulse_intel::config::PipelineConfig;
use pulse_intel::extract::providers::build_providers;
use pulse_intel::extract::Extractor;
use pulse_intel::ingest::fixture::FixtureFeed;
use pulse_intel::pipeline::{spawn_scheduler, Pipeline};
use pulse_intel::source_weights::SourceWeightsConfig;
use pulse_intel::store::MemoryStore;
use pulse_intel::synth::InsightSynthesizer;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            EnvFilter::new("pulse_intel=info,pipeline=info,ingest=info,extract=info,synth=info,decay=info,warn")
        });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op elsewhere.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load_default()?;
    let weights = SourceWeightsConfig::load_default();
    let (sentiment, semantic) = build_providers();

    tracing::info!(
        sentiment_provider = sentiment.name(),
        semantic_provider = semantic.name(),
        batch_size = cfg.extraction.batch_size,
        "pipeline configured"
    );

    let extractor = Extractor::new(cfg.extraction.clone(), sentiment, semantic);
    let synthesizer = InsightSynthesizer::new(
        cfg.synthesis.clone(),
        cfg.confidence.clone(),
        cfg.decay.clone(),
        weights,
    );
    let store = Arc::new(MemoryStore::new());

    let dry_run = std::env::var("PIPELINE_DRY_RUN").ok().as_deref() == Some("1");
    let pipeline = Pipeline::new(
        &cfg,
        extractor,
        synthesizer,
        store,
        FixtureFeed::embedded(),
    )
    .dry_run(dry_run);

    let interval_secs: u64 = std::env::var("PIPELINE_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if interval_secs > 0 {
        tracing::info!(interval_secs, "starting interval scheduler");
        let handle = spawn_scheduler(Arc::new(pipeline), interval_secs);
        handle.await?;
        return Ok(());
    }

    let summary = pipeline.run_batch(chrono::Utc::now()).await?;
    tracing::info!(
        ingested = summary.ingest.inserted,
        quality = summary.ingest.quality,
        processed = summary.extract.processed,
        insights_created = summary.synth.created,
        insights_refreshed = summary.synth.refreshed,
        noise = summary.synth.noise,
        divergences = summary.synth.divergences,
        swept = summary.swept,
        "single batch run finished"
    );
    Ok(())
}
