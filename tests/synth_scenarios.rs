// tests/synth_scenarios.rs
//
// Synthesizer acceptance scenarios: cross-source agreement, noise routing,
// divergence flagging, and idempotent refresh over overlapping windows.

use std::sync::Arc;

use chrono::{Duration, Utc};

use pulse_intel::config::{ConfidenceConfig, DecayConfig, SynthesisConfig};
use pulse_intel::signal::{EngagementMetrics, ExtractedEntities, Signal, SignalId, Source};
use pulse_intel::source_weights::SourceWeightsConfig;
use pulse_intel::store::{MemoryStore, SignalStore};
use pulse_intel::synth::InsightSynthesizer;
use pulse_intel::{Sentiment, Urgency};

fn synthesizer() -> InsightSynthesizer {
    InsightSynthesizer::new(
        SynthesisConfig::default(),
        ConfidenceConfig::default(),
        DecayConfig::default(),
        SourceWeightsConfig::default_seed(),
    )
}

#[allow(clippy::too_many_arguments)]
fn processed_signal(
    source: Source,
    source_id: &str,
    tickers: &[&str],
    keywords: &[&str],
    sentiment: f64,
    upvotes: f64,
    age_hours: i64,
) -> Signal {
    let now = Utc::now();
    let mut entities = ExtractedEntities::default();
    for t in tickers {
        entities.tickers.insert(t.to_string());
    }
    for k in keywords {
        entities.keywords.insert(k.to_string());
    }
    let mut m = EngagementMetrics::new();
    m.set(EngagementMetrics::UPVOTES, upvotes);
    Signal {
        id: SignalId::new(&source, source_id),
        source,
        source_id: source_id.into(),
        title: format!("post {source_id}"),
        content: String::new(),
        author_id: "author".into(),
        source_created_at: now - Duration::hours(age_hours),
        engagement_metrics: m,
        extracted_entities: entities,
        sentiment_score: Some(sentiment),
        urgency_score: Some(0.3),
        is_quality_signal: true,
        processed: true,
    }
}

#[tokio::test]
async fn scenario_wdc_cross_source_agreement() {
    // reddit + polymarket, both positive on $WDC, high engagement:
    // one insight, both sources agreeing, confidence >= 0.9.
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    let window = vec![
        processed_signal(Source::Reddit, "r1", &["WDC"], &["RAM shortage"], 0.6, 900.0, 3),
        processed_signal(Source::Polymarket, "p1", &["WDC"], &[], 0.5, 700.0, 1),
    ];

    let report = synthesizer()
        .run_once(store.clone(), &window, now)
        .await
        .unwrap();
    assert_eq!(report.created, 1);

    let insights = store.current_insights(now).await.unwrap();
    assert_eq!(insights.len(), 1);
    let insight = &insights[0];
    assert!(insight.confidence_score >= 0.9, "got {}", insight.confidence_score);
    assert_eq!(insight.sources_agreeing.len(), 2);
    assert!(insight.sources_agreeing.contains(&Source::Reddit));
    assert!(insight.sources_agreeing.contains(&Source::Polymarket));
    assert_eq!(insight.sentiment, Sentiment::Bullish);
    assert!(insight.related_assets.contains("WDC"));
    assert_eq!(insight.evidence.signal_ids.len(), 2);
}

#[tokio::test]
async fn scenario_obscure_singleton_goes_to_noise_audit() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    let window = vec![processed_signal(
        Source::Reddit,
        "r1",
        &["ZZQ"],
        &[],
        0.3,
        12.0,
        6,
    )];

    let report = synthesizer()
        .run_once(store.clone(), &window, now)
        .await
        .unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.noise, 1);

    assert!(store.current_insights(now).await.unwrap().is_empty());
    let audit = store.noise_audit(10).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert!(audit[0].confidence_score <= 0.5);
}

#[tokio::test]
async fn divergent_sources_are_flagged_not_averaged() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    let window = vec![
        processed_signal(Source::Reddit, "r1", &["TSLA"], &[], 0.8, 800.0, 2),
        processed_signal(Source::Polymarket, "p1", &["TSLA"], &[], -0.7, 800.0, 1),
    ];

    let report = synthesizer()
        .run_once(store.clone(), &window, now)
        .await
        .unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.divergences, 1);

    let divergences = store.divergences();
    assert_eq!(divergences.len(), 1);
    let d = &divergences[0];
    assert!(d.related_assets.contains("TSLA"));
    let bullish = d.source_sentiment.iter().any(|(_, m)| *m > 0.15);
    let bearish = d.source_sentiment.iter().any(|(_, m)| *m < -0.15);
    assert!(bullish && bearish, "both sides recorded: {:?}", d.source_sentiment);
}

#[tokio::test]
async fn overlapping_window_refreshes_instead_of_duplicating() {
    let store = Arc::new(MemoryStore::new());
    let synth = synthesizer();
    let now = Utc::now();

    let first_window = vec![
        processed_signal(Source::Reddit, "r1", &["WDC"], &["RAM shortage"], 0.6, 900.0, 3),
        processed_signal(Source::Polymarket, "p1", &["WDC"], &[], 0.5, 700.0, 1),
    ];
    synth.run_once(store.clone(), &first_window, now).await.unwrap();
    let before = store.current_insights(now).await.unwrap();
    assert_eq!(before.len(), 1);
    let created_at = before[0].created_at;

    // Later window, same theme plus a fresh corroborating post.
    let later = now + Duration::hours(2);
    let mut second_window = first_window.clone();
    second_window.push(processed_signal(
        Source::Reddit,
        "r2",
        &["WDC"],
        &["RAM shortage"],
        0.7,
        400.0,
        0,
    ));
    let report = synth
        .run_once(store.clone(), &second_window, later)
        .await
        .unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.refreshed, 1);

    let after = store.current_insights(later).await.unwrap();
    assert_eq!(after.len(), 1, "no duplicate row for a live theme");
    assert_eq!(after[0].created_at, created_at, "history preserved");
    assert_eq!(after[0].evidence.signal_ids.len(), 3);
    assert!(after[0].refreshed_at > created_at);
}

#[tokio::test]
async fn urgency_tiers_order_expiry() {
    // An accelerating fresh theme must expire strictly earlier than a
    // slow-moving one of the same shape.
    let store = Arc::new(MemoryStore::new());
    let synth = synthesizer();
    let now = Utc::now();

    let hot = vec![
        processed_signal(Source::Reddit, "h1", &["NVDA"], &[], 0.5, 600.0, 30),
        processed_signal(Source::Reddit, "h2", &["NVDA"], &[], 0.5, 700.0, 1),
        processed_signal(Source::Reddit, "h3", &["NVDA"], &[], 0.6, 800.0, 1),
        processed_signal(Source::Polymarket, "h4", &["NVDA"], &[], 0.4, 600.0, 0),
    ];
    // All mentions old and decelerating.
    let cold = vec![
        processed_signal(Source::Reddit, "c1", &["XOM"], &[], 0.4, 600.0, 60),
        processed_signal(Source::Reddit, "c2", &["XOM"], &[], 0.4, 700.0, 55),
        processed_signal(Source::Polymarket, "c3", &["XOM"], &[], 0.4, 600.0, 50),
    ];

    synth.run_once(store.clone(), &hot, now).await.unwrap();
    synth.run_once(store.clone(), &cold, now).await.unwrap();

    let insights = store.current_insights(now).await.unwrap();
    let hot_insight = insights
        .iter()
        .find(|i| i.related_assets.contains("NVDA"))
        .expect("hot theme surfaced");
    let cold_insight = insights
        .iter()
        .find(|i| i.related_assets.contains("XOM"))
        .expect("cold theme surfaced");

    assert_eq!(hot_insight.urgency, Urgency::Immediate);
    assert_ne!(cold_insight.urgency, Urgency::Immediate);
    assert!(
        hot_insight.expires_at < cold_insight.expires_at,
        "immediate themes fall off faster"
    );
}
