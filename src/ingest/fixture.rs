// src/ingest/fixture.rs
//! Fixture feed: replays posts from embedded JSON. Used by the batch
//! harness and the integration tests; real platform feeds live behind the
//! same [`PostFeed`] trait in their own crates.

use anyhow::{Context, Result};

use crate::ingest::types::{PostFeed, RawPost};

pub struct FixtureFeed {
    name: &'static str,
    raw: String,
}

impl FixtureFeed {
    pub fn from_json_str(name: &'static str, json: &str) -> Self {
        Self {
            name,
            raw: json.to_string(),
        }
    }

    /// The shipped sample posts (one reddit batch, one polymarket batch).
    pub fn embedded() -> Vec<Box<dyn PostFeed>> {
        vec![
            Box::new(Self::from_json_str(
                "reddit-fixture",
                include_str!("../../tests/fixtures/reddit_posts.json"),
            )),
            Box::new(Self::from_json_str(
                "polymarket-fixture",
                include_str!("../../tests/fixtures/polymarket_posts.json"),
            )),
        ]
    }
}

#[async_trait::async_trait]
impl PostFeed for FixtureFeed {
    async fn fetch_latest(&self) -> Result<Vec<RawPost>> {
        serde_json::from_str(&self.raw)
            .with_context(|| format!("parsing fixture posts for feed `{}`", self.name))
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
