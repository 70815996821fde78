// src/extract/providers.rs
//! Enrichment provider abstraction: one interface per capability, concrete
//! variants per backing service, and a declared degradation order. The
//! extractor depends only on the traits — never on a provider's identity.
//!
//! Every provider call is best-effort: errors, quotas, and malformed
//! responses collapse to `None`/per-item `None`, and the extractor fills
//! in neutral defaults. Nothing here can fail a batch.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::signal::{ExtractedEntities, SignalId};

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// One item of a sentiment batch request.
#[derive(Debug, Clone, Serialize)]
pub struct BatchText {
    pub id: SignalId,
    pub text: String,
}

/// Batch sentiment scoring. Per-item `None` marks that item as failed;
/// the caller substitutes the neutral default.
pub trait SentimentProvider: Send + Sync {
    fn score_batch<'a>(
        &'a self,
        items: &'a [BatchText],
    ) -> Pin<Box<dyn Future<Output = Vec<Option<f64>>> + Send + 'a>>;
    fn name(&self) -> &'static str;
}

/// Output of the semantic refinement layer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SemanticRefinement {
    /// Tickers the provider confirmed as real assets (used to prune
    /// cashtag false positives). `None` leaves the lexical set untouched.
    #[serde(default)]
    pub confirmed_tickers: Option<Vec<String>>,
    /// Urgency in [0, 1] when the provider can judge it.
    #[serde(default)]
    pub urgency_score: Option<f64>,
}

/// Per-signal semantic refinement: entity disambiguation and urgency.
/// `None` means the layer degraded for this signal.
pub trait SemanticProvider: Send + Sync {
    fn refine<'a>(
        &'a self,
        text: &'a str,
        entities: &'a ExtractedEntities,
    ) -> Pin<Box<dyn Future<Output = Option<SemanticRefinement>> + Send + 'a>>;
    fn name(&self) -> &'static str;
}

pub type DynSentimentProvider = Arc<dyn SentimentProvider>;
pub type DynSemanticProvider = Arc<dyn SemanticProvider>;

/// Cap on provider calls per batch run, shared across both layers.
#[derive(Debug)]
pub struct CallBudget {
    remaining: AtomicU32,
}

impl CallBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            remaining: AtomicU32::new(limit),
        }
    }

    /// Take one call slot. Returns `false` when the budget is spent.
    pub fn try_acquire(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Factory: build providers from the environment.
///
/// * `EXTRACT_TEST_MODE=mock` → deterministic mocks (tests, local runs).
/// * Missing API keys → disabled variants (lexical-only pipeline).
pub fn build_providers() -> (DynSentimentProvider, DynSemanticProvider) {
    if std::env::var("EXTRACT_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return (
            Arc::new(MockSentimentProvider { fixed: 0.0 }),
            Arc::new(MockSemanticProvider::confirm_all()),
        );
    }

    let sentiment: DynSentimentProvider = match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Arc::new(HttpSentimentProvider::new(key, None)),
        _ => Arc::new(DisabledSentiment),
    };
    let semantic: DynSemanticProvider = match std::env::var("ANTHROPIC_API_KEY") {
        Ok(key) if !key.is_empty() => Arc::new(HttpSemanticProvider::new(key, None)),
        _ => Arc::new(DisabledSemantic),
    };
    (sentiment, semantic)
}

// ------------------------------------------------------------
// Disabled variants
// ------------------------------------------------------------

/// Fails every item; the pipeline runs lexical-only.
pub struct DisabledSentiment;

impl SentimentProvider for DisabledSentiment {
    fn score_batch<'a>(
        &'a self,
        items: &'a [BatchText],
    ) -> Pin<Box<dyn Future<Output = Vec<Option<f64>>> + Send + 'a>> {
        let n = items.len();
        Box::pin(async move { vec![None; n] })
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

pub struct DisabledSemantic;

impl SemanticProvider for DisabledSemantic {
    fn refine<'a>(
        &'a self,
        _text: &'a str,
        _entities: &'a ExtractedEntities,
    ) -> Pin<Box<dyn Future<Output = Option<SemanticRefinement>> + Send + 'a>> {
        Box::pin(async { None })
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

// ------------------------------------------------------------
// Mock variants (tests/local runs)
// ------------------------------------------------------------

/// Returns a fixed score for every item.
#[derive(Clone)]
pub struct MockSentimentProvider {
    pub fixed: f64,
}

impl SentimentProvider for MockSentimentProvider {
    fn score_batch<'a>(
        &'a self,
        items: &'a [BatchText],
    ) -> Pin<Box<dyn Future<Output = Vec<Option<f64>>> + Send + 'a>> {
        let out = vec![Some(self.fixed); items.len()];
        Box::pin(async move { out })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Confirms every lexical ticker and reports a fixed urgency.
#[derive(Clone)]
pub struct MockSemanticProvider {
    pub urgency: Option<f64>,
}

impl MockSemanticProvider {
    pub fn confirm_all() -> Self {
        Self { urgency: None }
    }
}

impl SemanticProvider for MockSemanticProvider {
    fn refine<'a>(
        &'a self,
        _text: &'a str,
        entities: &'a ExtractedEntities,
    ) -> Pin<Box<dyn Future<Output = Option<SemanticRefinement>> + Send + 'a>> {
        let refinement = SemanticRefinement {
            confirmed_tickers: Some(entities.tickers.iter().cloned().collect()),
            urgency_score: self.urgency,
        };
        Box::pin(async move { Some(refinement) })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// HTTP providers
// ------------------------------------------------------------

/// Chat-completions sentiment scorer. Sends the whole batch in one prompt
/// and expects a JSON object mapping signal ids to scores in [-1, 1].
pub struct HttpSentimentProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl HttpSentimentProvider {
    pub fn new(api_key: String, model_override: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("pulse-intel/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(20))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model: model_override.unwrap_or("gpt-4o-mini").to_string(),
        }
    }

    async fn fetch_scores(&self, items: &[BatchText]) -> Option<Vec<Option<f64>>> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let payload = serde_json::to_string(items).ok()?;
        let user = format!(
            "Score the market sentiment of each post from -1.0 (very bearish) \
             to 1.0 (very bullish). Respond with ONLY a JSON object mapping \
             each id to its score.\n\n{payload}"
        );
        let sys = "You are a financial sentiment scorer. Return only valid JSON.";
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: sys,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.2,
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let body: Resp = resp.json().await.ok()?;
        let content = body.choices.first().map(|c| c.message.content.as_str())?;
        let scores: std::collections::HashMap<String, f64> =
            serde_json::from_str(strip_code_fences(content)).ok()?;

        Some(
            items
                .iter()
                .map(|it| {
                    scores
                        .get(it.id.as_str())
                        .map(|s| s.clamp(-1.0, 1.0))
                })
                .collect(),
        )
    }
}

impl SentimentProvider for HttpSentimentProvider {
    fn score_batch<'a>(
        &'a self,
        items: &'a [BatchText],
    ) -> Pin<Box<dyn Future<Output = Vec<Option<f64>>> + Send + 'a>> {
        Box::pin(async move {
            if self.api_key.is_empty() || items.is_empty() {
                return vec![None; items.len()];
            }
            match self.fetch_scores(items).await {
                Some(scores) => scores,
                None => vec![None; items.len()],
            }
        })
    }
    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Messages-API semantic refiner: confirms which candidate tickers are
/// real tradable assets in context and judges urgency.
pub struct HttpSemanticProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl HttpSemanticProvider {
    pub fn new(api_key: String, model_override: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("pulse-intel/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(20))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model: model_override.unwrap_or("claude-3-5-haiku-latest").to_string(),
        }
    }

    async fn fetch_refinement(
        &self,
        text: &str,
        entities: &ExtractedEntities,
    ) -> Option<SemanticRefinement> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            max_tokens: u32,
            messages: Vec<Msg<'a>>,
        }
        #[derive(Deserialize)]
        struct Resp {
            content: Vec<Block>,
        }
        #[derive(Deserialize)]
        struct Block {
            text: String,
        }

        let candidates: Vec<&String> = entities.tickers.iter().collect();
        let user = format!(
            "Post: {text}\n\nCandidate tickers: {candidates:?}\n\n\
             Which candidates are real tradable tickers in this context, and \
             how urgent is the event (0.0 slow-moving to 1.0 breaking)? \
             Respond with ONLY JSON: \
             {{\"confirmed_tickers\": [..], \"urgency_score\": 0.0}}"
        );
        let req = Req {
            model: &self.model,
            max_tokens: 300,
            messages: vec![Msg {
                role: "user",
                content: &user,
            }],
        };

        let resp = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&req)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let body: Resp = resp.json().await.ok()?;
        let content = body.content.first().map(|b| b.text.as_str())?;
        let mut refinement: SemanticRefinement =
            serde_json::from_str(strip_code_fences(content)).ok()?;
        if let Some(u) = refinement.urgency_score {
            refinement.urgency_score = Some(u.clamp(0.0, 1.0));
        }
        Some(refinement)
    }
}

impl SemanticProvider for HttpSemanticProvider {
    fn refine<'a>(
        &'a self,
        text: &'a str,
        entities: &'a ExtractedEntities,
    ) -> Pin<Box<dyn Future<Output = Option<SemanticRefinement>> + Send + 'a>> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return None;
            }
            self.fetch_refinement(text, entities).await
        })
    }
    fn name(&self) -> &'static str {
        "anthropic"
    }
}

/// Models love fencing JSON in markdown; strip that before parsing.
fn strip_code_fences(s: &str) -> &str {
    let t = s.trim();
    let t = t
        .strip_prefix("```json")
        .or_else(|| t.strip_prefix("```"))
        .unwrap_or(t);
    t.strip_suffix("```").unwrap_or(t).trim()
}
