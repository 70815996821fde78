// src/extract/dictionary.rs
//! Entity dictionary: static mapping of company names to tickers plus a
//! curated keyword list. Backs the lexical extraction layer; deterministic
//! and dependency-free.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::signal::ExtractedEntities;

static EMBEDDED: Lazy<EntityDictionary> = Lazy::new(|| {
    let raw = include_str!("../../entity_dictionary.json");
    EntityDictionary::from_json_str(raw).expect("valid embedded entity dictionary")
});

static CASHTAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(?P<sym>[A-Z]{1,5})\b").expect("cashtag regex"));

#[derive(Debug, Deserialize)]
struct DictionaryFile {
    companies: HashMap<String, String>,
    keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EntityDictionary {
    /// Lowercased company name → ticker.
    companies: HashMap<String, String>,
    /// `(lowercased, canonical)` keyword pairs; canonical casing is what
    /// lands in the extracted entities.
    keywords: Vec<(String, String)>,
}

impl EntityDictionary {
    /// The dictionary compiled into the binary.
    pub fn embedded() -> &'static EntityDictionary {
        &EMBEDDED
    }

    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let file: DictionaryFile = serde_json::from_str(raw)?;
        Ok(Self {
            companies: file
                .companies
                .into_iter()
                .map(|(name, ticker)| (name.to_ascii_lowercase(), ticker.to_ascii_uppercase()))
                .collect(),
            keywords: file
                .keywords
                .into_iter()
                .filter(|k| !k.trim().is_empty())
                .map(|k| (k.to_ascii_lowercase(), k))
                .collect(),
        })
    }

    /// Lexical pass: cashtags, company-name lookups, keyword hits.
    ///
    /// Cashtags are taken at face value here; disambiguating tickers from
    /// common words is the semantic layer's job.
    pub fn extract(&self, text: &str) -> ExtractedEntities {
        let mut out = ExtractedEntities::default();
        let lower = text.to_ascii_lowercase();

        for caps in CASHTAG_RE.captures_iter(text) {
            if let Some(m) = caps.name("sym") {
                out.tickers.insert(m.as_str().to_string());
            }
        }

        for (name, ticker) in &self.companies {
            if contains_word(&lower, name) {
                out.tickers.insert(ticker.clone());
                out.companies.insert(titlecase(name));
            }
        }

        for (needle, canonical) in &self.keywords {
            if lower.contains(needle.as_str()) {
                out.keywords.insert(canonical.clone());
            }
        }

        out
    }
}

/// Substring match bounded by non-alphanumeric characters, so "intel"
/// does not fire inside "intelligence".
fn contains_word(haystack: &str, needle: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let abs = start + pos;
        let end = abs + needle.len();
        let left_ok = abs == 0
            || !haystack[..abs]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let right_ok = end == haystack.len()
            || !haystack[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        if left_ok && right_ok {
            return true;
        }
        start = abs + 1;
    }
    false
}

fn titlecase(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut c = w.chars();
            match c.next() {
                Some(first) => first.to_uppercase().collect::<String>() + c.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
