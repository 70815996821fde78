// src/decay.rs
//! # Decay Manager
//! Time-triggered sweep that retires insights whose validity window has
//! passed. Retirement is presentational, not destructive: expired insights
//! stay in the store as the audit paper trail and only drop out of
//! "current" views.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;

use crate::insight::Insight;
use crate::store::SignalStore;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("decay_swept_total", "Insights retired by the decay sweep.");
        describe_gauge!("decay_last_run_ts", "Unix ts when the decay sweep last ran.");
    });
}

pub struct DecayManager;

impl DecayManager {
    /// Run one sweep. Returns the insights retired this pass.
    pub async fn sweep(store: Arc<dyn SignalStore>, now: DateTime<Utc>) -> Result<Vec<Insight>> {
        ensure_metrics_described();

        let swept = store.sweep_expired(now).await?;

        counter!("decay_swept_total").increment(swept.len() as u64);
        gauge!("decay_last_run_ts").set(now.timestamp().max(0) as f64);

        for insight in &swept {
            tracing::info!(
                target: "decay",
                theme = %insight.theme,
                urgency = ?insight.urgency,
                expired_at = %insight.expires_at,
                "insight retired"
            );
        }
        if !swept.is_empty() {
            tracing::info!(target: "decay", swept = swept.len(), "decay sweep complete");
        }

        Ok(swept)
    }
}
