//! Synthesis: a cited answer built only from retrieved passages.
//!
//! The model writes the body. The citation section is always rebuilt from
//! the passages that were actually handed to the model, so a cited source
//! is never something the index did not return. The insufficient
//! information marker appears exactly when there was nothing to cite.

use agrag_core::error::{PipelineError, Stage};
use agrag_core::message::Message;
use agrag_core::passage::{Passage, RetrievalSet};
use agrag_core::provider::Usage;
use tracing::debug;

use crate::prompts::{self, INSUFFICIENT_MARKER, SOURCES_HEADING};
use crate::stage::StageModel;

/// Body used when the model's text was nothing but disclaimers.
const EMPTY_BODY: &str =
    "Los fragmentos recuperados no responden directamente a tu pregunta. Revisa las fuentes listadas.";

pub struct Synthesizer {
    model: StageModel,
    persona: String,
}

#[derive(Debug, Clone)]
pub struct Synthesis {
    pub answer: String,
    /// Cited sources, in first-seen order.
    pub sources: Vec<String>,
    pub insufficient: bool,
    pub usage: Option<Usage>,
}

impl Synthesizer {
    pub fn new(model: StageModel, persona: impl Into<String>) -> Self {
        Self {
            model,
            persona: persona.into(),
        }
    }

    pub async fn synthesize(
        &self,
        utterance: &str,
        retrieval: &RetrievalSet,
    ) -> Result<Synthesis, PipelineError> {
        let passages = dedup_passages(retrieval);
        if passages.is_empty() {
            debug!(failed = retrieval.failed_queries(), "No passages; insufficient information");
            return Ok(Synthesis {
                answer: insufficient_answer(),
                sources: Vec::new(),
                insufficient: true,
                usage: None,
            });
        }

        let messages = vec![
            Message::system(prompts::synthesis_system(&self.persona)),
            Message::user(prompts::synthesis_user(utterance, &passages)),
        ];
        let reply = self.model.collect_stream(Stage::Synthesis, messages).await?;

        let sources = distinct_sources(&passages);
        let partial = (retrieval.failed_queries() > 0)
            .then(|| (retrieval.failed_queries(), retrieval.groups.len()));
        let answer = compose_answer(&reply.text, &sources, partial);
        Ok(Synthesis {
            answer,
            sources,
            insufficient: false,
            usage: reply.usage,
        })
    }
}

pub fn insufficient_answer() -> String {
    format!(
        "{INSUFFICIENT_MARKER} en la base de conocimiento disponible. \
         ¿Puedes reformular la pregunta o darme más detalles?"
    )
}

/// Passages in query order with duplicates (same whitespace- and
/// case-normalized content) removed.
pub fn dedup_passages(retrieval: &RetrievalSet) -> Vec<&Passage> {
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for passage in retrieval.passages() {
        let key = normalize(&passage.content);
        if key.is_empty() || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(passage);
    }
    out
}

fn distinct_sources(passages: &[&Passage]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for passage in passages {
        if !sources.contains(&passage.source) {
            sources.push(passage.source.clone());
        }
    }
    sources
}

/// Final answer: the model body without any citation section or marker
/// phrase of its own, an optional partial-evidence note, then the rebuilt
/// `Fuentes:` list.
///
/// `partial` is `(failed_queries, total_queries)`.
pub fn compose_answer(body: &str, sources: &[String], partial: Option<(usize, usize)>) -> String {
    let body = scrub_marker(strip_sources_section(body));
    let body = if body.trim().is_empty() {
        EMPTY_BODY.to_string()
    } else {
        body.trim().to_string()
    };

    let mut answer = body;
    if let Some((failed, total)) = partial {
        answer.push_str(&format!(
            "\n\n_Nota: {failed} de {total} búsquedas fallaron; la respuesta puede estar incompleta._"
        ));
    }
    answer.push_str("\n\n");
    answer.push_str(SOURCES_HEADING);
    for source in sources {
        answer.push_str("\n- ");
        answer.push_str(source);
    }
    answer
}

/// Cut the text at the first line that opens a sources section.
///
/// A bare `Fuentes:` / `Sources:` heading always opens one. An inline
/// `Fuentes: a.md, b.md` line only does when nothing but list items follows
/// it, so prose such as "Fuentes de ingreso: ..." is kept.
fn strip_sources_section(body: &str) -> &str {
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        let rest = &body[offset + line.len()..];
        match sources_label(line) {
            Some(inline) if inline.is_empty() || only_list_items(rest) => {
                return &body[..offset];
            }
            _ => {}
        }
        offset += line.len();
    }
    body
}

/// What follows a leading `Fuentes:` / `Sources:` label, or `None` when the
/// line does not start with one.
fn sources_label(line: &str) -> Option<String> {
    let text = line.trim().trim_matches(['#', '*', '_', ' ']).to_lowercase();
    let rest = text
        .strip_prefix("fuentes")
        .or_else(|| text.strip_prefix("sources"))?;
    let rest = rest.trim_start_matches(['*', '_']);
    if rest.is_empty() {
        return Some(String::new());
    }
    let inline = rest.strip_prefix(':')?;
    Some(inline.trim_matches(['*', '_', ' ']).to_string())
}

fn only_list_items(text: &str) -> bool {
    text.lines().map(str::trim).all(|line| {
        line.is_empty()
            || line.starts_with(['-', '*', '•'])
            || line
                .split_once(['.', ')'])
                .is_some_and(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    })
}

/// Remove every sentence that contains the marker phrase.
fn scrub_marker(body: &str) -> String {
    let marker = INSUFFICIENT_MARKER.to_lowercase();
    body.split_inclusive('\n')
        .map(|line| {
            line.split_inclusive(['.', '!', '?'])
                .filter(|sentence| !sentence.to_lowercase().contains(&marker))
                .collect::<String>()
        })
        .collect()
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
