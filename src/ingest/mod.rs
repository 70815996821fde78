// src/ingest/mod.rs
pub mod fixture;
pub mod quality;
pub mod types;

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;

use crate::ingest::quality::QualityFilter;
use crate::ingest::types::{PostFeed, RawPost};
use crate::signal::{EngagementMetrics, Signal, SignalId};
use crate::store::{InsertOutcome, SignalStore};

/// One-time metrics registration (so series show up on whatever exporter
/// the embedder installs).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_posts_total", "Raw posts fetched from feeds.");
        describe_counter!("ingest_inserted_total", "New signals stored.");
        describe_counter!(
            "ingest_duplicates_total",
            "Posts rejected by (source, source_id) dedup."
        );
        describe_counter!(
            "ingest_quality_total",
            "Stored signals that passed the quality gate."
        );
        describe_counter!(
            "ingest_rejected_total",
            "Stored signals that failed the quality gate."
        );
        describe_counter!("ingest_feed_errors_total", "Feed fetch/parse errors.");
        describe_gauge!(
            "ingest_last_run_ts",
            "Unix ts when the ingest stage last ran."
        );
    });
}

/// Normalize post text: decode HTML entities, strip tags, normalize smart
/// quotes, collapse whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize typographic quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Length cap: 4000 chars (posts run longer than headlines)
    if out.chars().count() > 4000 {
        out = out.chars().take(4000).collect();
    }

    out
}

/// Short anonymized id for logging post content without logging the post.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Upvotes per hour since the platform timestamp. Very young posts are
/// floored to 0.1h so they don't divide into absurd velocities.
fn velocity(upvotes: f64, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - created_at).num_seconds().max(0) as f64 / 3600.0;
    upvotes / age_hours.max(0.1)
}

/// Per-run ingest statistics, reported in logs and run summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub quality: usize,
    pub rejected: usize,
    pub feed_errors: usize,
}

/// Turn one raw post into a stored signal candidate: normalize text,
/// stamp velocity, run the quality gate once.
fn build_signal(mut post: RawPost, filter: &QualityFilter, now: DateTime<Utc>) -> Signal {
    post.title = normalize_text(&post.title);
    post.content = normalize_text(&post.content);

    let v = velocity(post.engagement_metrics.upvotes(), post.source_created_at, now);
    post.engagement_metrics
        .set(EngagementMetrics::VELOCITY, (v * 100.0).round() / 100.0);

    let verdict = filter.assess(&post);
    if !verdict.accepted {
        tracing::debug!(
            target: "ingest",
            id = %anon_hash(&post.title),
            source = %post.source,
            reasons = ?verdict.reasons,
            "post failed quality gate"
        );
    }

    Signal {
        id: SignalId::new(&post.source, &post.source_id),
        source: post.source,
        source_id: post.source_id,
        title: post.title,
        content: post.content,
        author_id: post.author_id,
        source_created_at: post.source_created_at,
        engagement_metrics: post.engagement_metrics,
        extracted_entities: Default::default(),
        sentiment_score: None,
        urgency_score: None,
        is_quality_signal: verdict.accepted,
        processed: false,
    }
}

/// Run ingest once: fetch from every feed, gate, dedupe, store.
///
/// Feed failures degrade (that feed contributes nothing this run); store
/// failures abort the run — with no durable write there is nothing to
/// continue with.
pub async fn run_once(
    feeds: &[Box<dyn PostFeed>],
    filter: &QualityFilter,
    store: &dyn SignalStore,
    now: DateTime<Utc>,
) -> Result<IngestReport> {
    ensure_metrics_described();

    let mut report = IngestReport::default();

    let mut raw = Vec::new();
    for feed in feeds {
        match feed.fetch_latest().await {
            Ok(mut posts) => raw.append(&mut posts),
            Err(e) => {
                tracing::warn!(target: "ingest", error = ?e, feed = feed.name(), "feed error");
                counter!("ingest_feed_errors_total").increment(1);
                report.feed_errors += 1;
            }
        }
    }
    report.fetched = raw.len();

    for post in raw {
        let signal = build_signal(post, filter, now);
        let is_quality = signal.is_quality_signal;
        match store.insert_if_absent(signal).await? {
            InsertOutcome::Inserted => {
                report.inserted += 1;
                if is_quality {
                    report.quality += 1;
                } else {
                    report.rejected += 1;
                }
            }
            InsertOutcome::Duplicate => report.duplicates += 1,
        }
    }

    counter!("ingest_posts_total").increment(report.fetched as u64);
    counter!("ingest_inserted_total").increment(report.inserted as u64);
    counter!("ingest_duplicates_total").increment(report.duplicates as u64);
    counter!("ingest_quality_total").increment(report.quality as u64);
    counter!("ingest_rejected_total").increment(report.rejected as u64);
    gauge!("ingest_last_run_ts").set(now.timestamp().max(0) as f64);

    tracing::info!(
        target: "ingest",
        fetched = report.fetched,
        inserted = report.inserted,
        duplicates = report.duplicates,
        quality = report.quality,
        rejected = report.rejected,
        feed_errors = report.feed_errors,
        "ingest run complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityConfig;
    use crate::signal::Source;
    use crate::store::MemoryStore;
    use chrono::Duration;

    struct StaticFeed(Vec<RawPost>);

    #[async_trait::async_trait]
    impl PostFeed for StaticFeed {
        async fn fetch_latest(&self) -> Result<Vec<RawPost>> {
            Ok(self.0.clone())
        }
        fn name(&self) -> &'static str {
            "static"
        }
    }

    fn post(source_id: &str, upvotes: f64, age_hours: i64, now: DateTime<Utc>) -> RawPost {
        let mut m = EngagementMetrics::new();
        m.set(EngagementMetrics::UPVOTES, upvotes);
        m.set(EngagementMetrics::UPVOTE_RATIO, 0.9);
        RawPost {
            source: Source::Reddit,
            source_id: source_id.into(),
            title: "Chip shortage hits suppliers".into(),
            content: "backorder everywhere".into(),
            author_id: "u1".into(),
            source_created_at: now - Duration::hours(age_hours),
            engagement_metrics: m,
            pinned: false,
        }
    }

    #[test]
    fn normalize_text_collapses_ws_and_decodes_entities() {
        let s = "  Hello,&nbsp;&nbsp; <b>world</b>  ";
        assert_eq!(normalize_text(s), "Hello, world");
    }

    #[test]
    fn velocity_floors_age() {
        let now = Utc::now();
        // Brand-new post: 0.1h floor, not a division blow-up.
        let v = velocity(100.0, now, now);
        assert!((v - 1000.0).abs() < 1e-6);
        let v2 = velocity(100.0, now - Duration::hours(10), now);
        assert!((v2 - 10.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn reingesting_same_post_is_one_signal() {
        let now = Utc::now();
        let store = MemoryStore::new();
        let filter = QualityFilter::new(&QualityConfig::default());
        let feeds: Vec<Box<dyn PostFeed>> =
            vec![Box::new(StaticFeed(vec![post("abc123", 500.0, 2, now)]))];

        let first = run_once(&feeds, &filter, &store, now).await.unwrap();
        assert_eq!(first.inserted, 1);
        let second = run_once(&feeds, &filter, &store, now).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(store.stats().await.unwrap().total_signals, 1);
    }

    #[tokio::test]
    async fn rejected_posts_are_stored_but_flagged() {
        let now = Utc::now();
        let store = MemoryStore::new();
        let filter = QualityFilter::new(&QualityConfig::default());
        let feeds: Vec<Box<dyn PostFeed>> =
            vec![Box::new(StaticFeed(vec![post("lowvotes", 10.0, 2, now)]))];

        let report = run_once(&feeds, &filter, &store, now).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.rejected, 1);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_signals, 1);
        assert_eq!(stats.quality_signals, 0);
    }

    #[tokio::test]
    async fn feed_error_degrades_not_fails() {
        struct BrokenFeed;
        #[async_trait::async_trait]
        impl PostFeed for BrokenFeed {
            async fn fetch_latest(&self) -> Result<Vec<RawPost>> {
                anyhow::bail!("upstream 500")
            }
            fn name(&self) -> &'static str {
                "broken"
            }
        }

        let now = Utc::now();
        let store = MemoryStore::new();
        let filter = QualityFilter::new(&QualityConfig::default());
        let feeds: Vec<Box<dyn PostFeed>> = vec![
            Box::new(BrokenFeed),
            Box::new(StaticFeed(vec![post("ok1", 500.0, 2, now)])),
        ];

        let report = run_once(&feeds, &filter, &store, now).await.unwrap();
        assert_eq!(report.feed_errors, 1);
        assert_eq!(report.inserted, 1);
    }
}
