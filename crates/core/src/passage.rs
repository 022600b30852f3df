//! Retrieval value objects: passages, query sets, and retrieval results.

use serde::{Deserialize, Serialize};

/// A retrieved unit of text plus where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// The passage text.
    pub content: String,

    /// Source identifier (path, title, or URL).
    pub source: String,

    /// Human-readable title, when the index provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Relevance score reported by the index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,

    /// Position of the query (in the query set) that produced this passage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_index: Option<usize>,
}

impl Passage {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            title: None,
            score: None,
            query_index: None,
        }
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Suffixes used to derive distinct fallback queries from the utterance.
const PADDING_SUFFIXES: &[&str] = &["detalles", "ejemplos", "preguntas frecuentes"];

/// An ordered set of exactly N distinct, non-empty search strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySet {
    queries: Vec<String>,
}

impl QuerySet {
    /// Build a query set of exactly `n` queries from model candidates.
    ///
    /// Candidates are trimmed, empty and duplicate entries (case and
    /// whitespace insensitive) are dropped, and the list is truncated to `n`.
    /// Missing slots are filled with the utterance itself, then with
    /// deterministic variants of it. Returns the set and how many slots
    /// were padded.
    pub fn build<I>(candidates: I, utterance: &str, n: usize) -> (Self, usize)
    where
        I: IntoIterator<Item = String>,
    {
        let n = n.max(1);
        let mut queries: Vec<String> = Vec::with_capacity(n);
        let mut seen: Vec<String> = Vec::with_capacity(n);

        let mut push = |candidate: String, queries: &mut Vec<String>| {
            let trimmed = candidate.trim();
            if trimmed.is_empty() || queries.len() >= n {
                return;
            }
            let key = normalize(trimmed);
            if seen.contains(&key) {
                return;
            }
            seen.push(key);
            queries.push(trimmed.to_string());
        };

        for candidate in candidates {
            push(candidate, &mut queries);
        }
        let generated = queries.len();

        let base = utterance.trim();
        let base = if base.is_empty() { "consulta" } else { base };
        push(base.to_string(), &mut queries);
        for suffix in PADDING_SUFFIXES {
            push(format!("{base} {suffix}"), &mut queries);
        }
        let mut i = 2;
        while queries.len() < n {
            push(format!("{base} ({i})"), &mut queries);
            i += 1;
        }

        (Self { queries }, n - generated)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.queries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.queries.iter()
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The passages produced by one query of the fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryGroup {
    pub query: String,
    pub passages: Vec<Passage>,
    /// Why the query produced nothing, when its search call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryGroup {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// The aggregated output of the multi-query retriever.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalSet {
    /// One group per query, in query-set order.
    pub groups: Vec<QueryGroup>,
}

impl RetrievalSet {
    pub fn new(groups: Vec<QueryGroup>) -> Self {
        Self { groups }
    }

    /// All passages, flattened in query order.
    pub fn passages(&self) -> impl Iterator<Item = &Passage> {
        self.groups.iter().flat_map(|g| g.passages.iter())
    }

    pub fn passage_count(&self) -> usize {
        self.groups.iter().map(|g| g.passages.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.passage_count() == 0
    }

    pub fn failed_queries(&self) -> usize {
        self.groups.iter().filter(|g| g.failed()).count()
    }

    pub fn all_failed(&self) -> bool {
        !self.groups.is_empty() && self.failed_queries() == self.groups.len()
    }

    /// Passages grouped by the query that produced them.
    pub fn by_query(&self) -> std::collections::BTreeMap<&str, &[Passage]> {
        self.groups
            .iter()
            .map(|g| (g.query.as_str(), g.passages.as_slice()))
            .collect()
    }

    /// Distinct passage sources, in first-seen order.
    pub fn distinct_sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for p in self.passages() {
            if !sources.iter().any(|s| s == &p.source) {
                sources.push(p.source.clone());
            }
        }
        sources
    }
}
