//! Query generation: N distinct search strings for a SPECIFIC utterance.

use agrag_core::error::{PipelineError, Stage};
use agrag_core::message::Message;
use agrag_core::passage::QuerySet;
use tracing::debug;

use crate::prompts;
use crate::stage::{Reply, StageModel};
use crate::triage::strip_fences;

pub struct QueryGenerator {
    model: StageModel,
    count: usize,
}

/// Generated queries plus how many slots had to be padded.
pub struct GeneratedQueries {
    pub queries: QuerySet,
    pub padded: usize,
    pub reply: Reply,
}

impl QueryGenerator {
    pub fn new(model: StageModel, count: usize) -> Self {
        Self {
            model,
            count: count.max(1),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Always yields exactly N queries once the model answered: missing or
    /// duplicate candidates are padded from the utterance. Only a failed
    /// call is an error.
    pub async fn generate(&self, utterance: &str) -> Result<GeneratedQueries, PipelineError> {
        let messages = vec![
            Message::system(prompts::query_generation_system(self.count)),
            Message::user(utterance),
        ];
        let reply = self.model.complete(Stage::QueryGeneration, messages).await?;
        let candidates = parse_candidates(&reply.text);
        let (queries, padded) = QuerySet::build(candidates, utterance, self.count);
        if padded > 0 {
            debug!(padded, count = self.count, "Padded generated queries");
        }
        Ok(GeneratedQueries {
            queries,
            padded,
            reply,
        })
    }
}

/// Read candidate queries from a JSON array, falling back to one query per
/// line (bullets and numbering stripped).
pub fn parse_candidates(text: &str) -> Vec<String> {
    let text = strip_fences(text);

    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']'))
        && start < end
        && let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(&text[start..=end])
    {
        return items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                serde_json::Value::Object(map) => map
                    .get("query")
                    .and_then(|q| q.as_str())
                    .map(String::from),
                _ => None,
            })
            .collect();
    }

    text.lines()
        .map(clean_line)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn clean_line(line: &str) -> &str {
    let line = line.trim();
    let line = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .unwrap_or(line);
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    let line = if digits > 0 {
        let rest = &line[digits..];
        rest.strip_prefix(". ")
            .or_else(|| rest.strip_prefix(") "))
            .unwrap_or(line)
    } else {
        line
    };
    line.trim()
        .trim_end_matches(',')
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, stage_model};
    use std::sync::Arc;

    #[test]
    fn parses_json_array() {
        let text = "```json\n[\"pagos protegidos\", \"depósito en garantía\", \"liberación de fondos\"]\n```";
        assert_eq!(
            parse_candidates(text),
            vec!["pagos protegidos", "depósito en garantía", "liberación de fondos"]
        );
    }

    #[test]
    fn parses_array_with_preamble() {
        let text = "Aquí están:\n[\"a\", {\"query\": \"b\"}, 3]";
        assert_eq!(parse_candidates(text), vec!["a", "b"]);
    }

    #[test]
    fn falls_back_to_lines() {
        let text = "1. comisiones de Workana\n2) métodos de pago\n- \"retiro de fondos\",\n\n";
        assert_eq!(
            parse_candidates(text),
            vec!["comisiones de Workana", "métodos de pago", "retiro de fondos"]
        );
    }

    #[tokio::test]
    async fn yields_exactly_n_distinct_queries() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            r#"["escrow en Workana", "Escrow  en workana", ""]"#,
        ]));
        let generator = QueryGenerator::new(stage_model(provider), 3);
        let generated = generator
            .generate("¿cómo funciona el depósito en garantía?")
            .await
            .unwrap();

        let queries = generated.queries.as_slice();
        assert_eq!(queries.len(), 3);
        assert_eq!(generated.padded, 2);
        assert_eq!(queries[0], "escrow en Workana");
        assert_eq!(queries[1], "¿cómo funciona el depósito en garantía?");
        assert!(queries.iter().all(|q| !q.trim().is_empty()));
        let mut unique = queries.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn garbage_output_is_padded_not_failed() {
        let provider = Arc::new(ScriptedProvider::new(vec!["   "]));
        let generator = QueryGenerator::new(stage_model(provider), 3);
        let generated = generator.generate("comisiones").await.unwrap();
        assert_eq!(generated.queries.len(), 3);
        assert_eq!(generated.padded, 3);
    }

    #[tokio::test]
    async fn extra_candidates_are_truncated() {
        let provider = Arc::new(ScriptedProvider::new(vec![r#"["a", "b", "c", "d"]"#]));
        let generator = QueryGenerator::new(stage_model(provider), 2);
        let generated = generator.generate("x").await.unwrap();
        assert_eq!(generated.queries.as_slice(), &["a".to_string(), "b".to_string()]);
        assert_eq!(generated.padded, 0);
    }

    #[tokio::test]
    async fn failed_call_is_attributed_to_query_generation() {
        let provider = Arc::new(ScriptedProvider::with_results(vec![Err(
            agrag_core::error::ProviderError::ApiError {
                status_code: 503,
                message: "unavailable".into(),
            },
        )]));
        let generator = QueryGenerator::new(stage_model(provider), 3);
        let err = generator.generate("x").await.err().unwrap();
        assert_eq!(err.stage(), Some(Stage::QueryGeneration));
    }
}
