//! Triage: GENERAL (answer directly) or SPECIFIC (needs retrieval).

use agrag_core::error::{PipelineError, Stage};
use agrag_core::message::Message;
use agrag_core::session::{TriageLabel, TriageVerdict};
use serde::Deserialize;
use tracing::debug;

use crate::prompts;
use crate::stage::{Reply, StageModel, conversation};

/// Reply to an empty utterance. No model call is made.
pub const CLARIFYING_REPLY: &str =
    "¡Hola! No recibí ninguna pregunta. ¿En qué puedo ayudarte?";

pub struct TriageClassifier {
    model: StageModel,
    persona: String,
}

impl TriageClassifier {
    pub fn new(model: StageModel, persona: impl Into<String>) -> Self {
        Self {
            model,
            persona: persona.into(),
        }
    }

    /// Classify `utterance`. Output the model does not follow the
    /// `GENERAL: …` / `SPECIFIC` contract is a (retryable) failure; no label
    /// is ever guessed.
    pub async fn classify(
        &self,
        utterance: &str,
        history: &[Message],
    ) -> Result<(TriageVerdict, Reply), PipelineError> {
        if utterance.trim().is_empty() {
            return Ok((TriageVerdict::general(CLARIFYING_REPLY), Reply::default()));
        }

        let messages = conversation(prompts::triage_system(&self.persona), history, utterance);
        let reply = self.model.complete(Stage::Triage, messages).await?;
        let verdict = parse_verdict(&reply.text).ok_or_else(|| {
            PipelineError::malformed(
                Stage::Triage,
                format!("expected GENERAL or SPECIFIC, got {:?}", truncate(&reply.text, 80)),
            )
        })?;
        debug!(label = %verdict.label, "Triage verdict");
        Ok((verdict, reply))
    }
}

#[derive(Deserialize)]
struct JsonVerdict {
    label: String,
    #[serde(default)]
    reply: Option<String>,
}

/// Parse `GENERAL: <reply>`, `SPECIFIC`, or `{"label": …, "reply": …}`.
///
/// A GENERAL verdict without a reply is rejected.
pub fn parse_verdict(text: &str) -> Option<TriageVerdict> {
    let text = strip_fences(text);

    if text.starts_with('{') {
        let parsed: JsonVerdict = serde_json::from_str(text).ok()?;
        return verdict(label_of(&parsed.label)?, parsed.reply.as_deref().unwrap_or(""));
    }

    let (head, rest) = match text.find([':', '\n']) {
        Some(i) => (&text[..i], &text[i + 1..]),
        None => (text, ""),
    };
    verdict(label_of(head)?, rest)
}

fn verdict(label: TriageLabel, reply: &str) -> Option<TriageVerdict> {
    match label {
        TriageLabel::Specific => Some(TriageVerdict::specific()),
        TriageLabel::General => {
            let reply = reply.trim();
            (!reply.is_empty()).then(|| TriageVerdict::general(reply))
        }
    }
}

fn label_of(raw: &str) -> Option<TriageLabel> {
    let label = raw
        .trim()
        .trim_matches(|c: char| matches!(c, '*' | '"' | '\'' | '.' | '`' | '#' | ' '))
        .to_uppercase();
    match label.as_str() {
        "GENERAL" => Some(TriageLabel::General),
        "SPECIFIC" | "ESPECÍFICA" | "ESPECIFICA" | "ESPECÍFICO" | "ESPECIFICO" => {
            Some(TriageLabel::Specific)
        }
        _ => None,
    }
}

/// Drop a surrounding Markdown code fence, if any.
pub(crate) fn strip_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    // Skip the info string ("json").
    match inner.find('\n') {
        Some(i) => inner[i + 1..].trim(),
        None => inner.trim(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
