// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::signal::{EngagementMetrics, Source};

/// One raw post as delivered by a feed, before any filtering.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct RawPost {
    pub source: Source,
    pub source_id: String,
    pub title: String,
    pub content: String,
    pub author_id: String,
    pub source_created_at: DateTime<Utc>,
    #[serde(default)]
    pub engagement_metrics: EngagementMetrics,
    /// Pinned/stickied posts are moderator placements, not organic signal.
    #[serde(default)]
    pub pinned: bool,
}

/// Contract for anything that yields posts. Fetching mechanics (HTTP,
/// fixtures, replay files) are the implementor's business.
#[async_trait::async_trait]
pub trait PostFeed: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<RawPost>>;
    fn name(&self) -> &'static str;
}
