// tests/ingest_dedup.rs
//
// Idempotence of ingestion: the same (source, source_id) stored exactly
// once no matter how many times feeds replay it, and quality flags frozen
// at first sight.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};

use pulse_intel::config::QualityConfig;
use pulse_intel::ingest::quality::QualityFilter;
use pulse_intel::ingest::types::{PostFeed, RawPost};
use pulse_intel::ingest::{self};
use pulse_intel::signal::{EngagementMetrics, SignalId, Source};
use pulse_intel::store::{MemoryStore, SignalStore};

struct ReplayFeed(Vec<RawPost>);

#[async_trait::async_trait]
impl PostFeed for ReplayFeed {
    async fn fetch_latest(&self) -> Result<Vec<RawPost>> {
        Ok(self.0.clone())
    }
    fn name(&self) -> &'static str {
        "replay"
    }
}

fn post(source: Source, source_id: &str, upvotes: f64, ratio: f64, title: &str) -> RawPost {
    let mut m = EngagementMetrics::new();
    m.set(EngagementMetrics::UPVOTES, upvotes);
    m.set(EngagementMetrics::UPVOTE_RATIO, ratio);
    RawPost {
        source,
        source_id: source_id.into(),
        title: title.into(),
        content: "shortage talk".into(),
        author_id: "author".into(),
        source_created_at: Utc::now() - Duration::hours(2),
        engagement_metrics: m,
        pinned: false,
    }
}

#[tokio::test]
async fn reingesting_same_source_id_yields_one_signal() {
    let store = Arc::new(MemoryStore::new());
    let filter = QualityFilter::new(&QualityConfig::default());
    let feeds: Vec<Box<dyn PostFeed>> = vec![Box::new(ReplayFeed(vec![post(
        Source::Reddit,
        "abc123",
        500.0,
        0.9,
        "Chip shortage continues into Q4",
    )]))];

    for _ in 0..3 {
        ingest::run_once(&feeds, &filter, store.as_ref(), Utc::now())
            .await
            .unwrap();
    }

    assert_eq!(store.stats().await.unwrap().total_signals, 1);
}

#[tokio::test]
async fn same_source_id_across_sources_is_not_a_duplicate() {
    let store = Arc::new(MemoryStore::new());
    let filter = QualityFilter::new(&QualityConfig::default());
    let feeds: Vec<Box<dyn PostFeed>> = vec![Box::new(ReplayFeed(vec![
        post(Source::Reddit, "same-id", 500.0, 0.9, "Backorder wave hits OEMs"),
        post(
            Source::Polymarket,
            "same-id",
            500.0,
            0.9,
            "Backorder wave market odds",
        ),
    ]))];

    let report = ingest::run_once(&feeds, &filter, store.as_ref(), Utc::now())
        .await
        .unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.duplicates, 0);
}

#[tokio::test]
async fn duplicate_keeps_first_quality_verdict() {
    // The same post replayed with pumped-up engagement must not update the
    // stored signal: filtering happens once, at first ingestion.
    let store = Arc::new(MemoryStore::new());
    let filter = QualityFilter::new(&QualityConfig::default());

    let weak = post(Source::Reddit, "abc123", 10.0, 0.5, "Some ordinary post title");
    let strong = post(
        Source::Reddit,
        "abc123",
        5000.0,
        0.99,
        "Chip shortage continues into Q4",
    );

    let first: Vec<Box<dyn PostFeed>> = vec![Box::new(ReplayFeed(vec![weak]))];
    ingest::run_once(&first, &filter, store.as_ref(), Utc::now())
        .await
        .unwrap();
    let second: Vec<Box<dyn PostFeed>> = vec![Box::new(ReplayFeed(vec![strong]))];
    let report = ingest::run_once(&second, &filter, store.as_ref(), Utc::now())
        .await
        .unwrap();
    assert_eq!(report.duplicates, 1);

    let stored = store
        .signal(&SignalId::new(&Source::Reddit, "abc123"))
        .unwrap();
    assert!(!stored.is_quality_signal, "first verdict is immutable");
    assert_eq!(stored.engagement_metrics.upvotes(), 10.0);
}
