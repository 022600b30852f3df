//! In-memory keyword index.
//!
//! Ranks documents by how many distinct query terms they contain, scaled by
//! document length. Used for local development and tests.

use agrag_config::DocumentConfig;
use agrag_core::error::RetrievalError;
use agrag_core::passage::Passage;
use agrag_core::search::SearchIndex;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Terms shorter than this are ignored ("de", "la", "el").
const MIN_TERM_LEN: usize = 3;

pub struct MemoryIndex {
    documents: RwLock<Vec<Passage>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
        }
    }

    pub fn from_documents(documents: &[DocumentConfig]) -> Self {
        let passages = documents
            .iter()
            .map(|d| {
                let mut passage = Passage::new(&d.content, &d.source);
                passage.title = d.title.clone();
                passage
            })
            .collect();
        Self {
            documents: RwLock::new(passages),
        }
    }

    pub async fn insert(&self, passage: Passage) {
        self.documents.write().await.push(passage);
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, RetrievalError> {
        let mut query_terms = terms(query);
        query_terms.sort_unstable();
        query_terms.dedup();
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let documents = self.documents.read().await;
        let mut scored: Vec<(f32, &Passage)> = documents
            .iter()
            .filter_map(|doc| {
                let doc_terms = terms(&doc.content);
                let hits = query_terms.iter().filter(|t| doc_terms.contains(t)).count();
                if hits == 0 {
                    return None;
                }
                let coverage = hits as f32 / query_terms.len() as f32;
                let length_penalty = (doc.content.len() as f32 / 1000.0).max(1.0);
                Some((coverage / length_penalty.sqrt(), doc))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, doc)| doc.clone().with_score(score))
            .collect())
    }
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TERM_LEN)
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<DocumentConfig> {
        vec![
            DocumentConfig {
                source: "pagos.md".into(),
                title: Some("Pagos".into()),
                content: "El pago protegido retiene los fondos en garantía hasta aprobar la entrega."
                    .into(),
            },
            DocumentConfig {
                source: "perfil.md".into(),
                title: None,
                content: "Completa tu perfil para recibir más propuestas.".into(),
            },
            DocumentConfig {
                source: "disputas.md".into(),
                title: None,
                content: "Si hay una disputa, los fondos en garantía quedan congelados.".into(),
            },
        ]
    }

    #[tokio::test]
    async fn ranks_by_term_overlap() {
        let index = MemoryIndex::from_documents(&docs());
        let results = index.search("¿Cómo funciona el pago en garantía?", 5).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source, "pagos.md");
        assert_eq!(results[0].title.as_deref(), Some("Pagos"));
        assert_eq!(results[1].source, "disputas.md");
        assert!(results[0].score.unwrap() > results[1].score.unwrap());
    }

    #[tokio::test]
    async fn repeated_query_terms_count_once() {
        let index = MemoryIndex::from_documents(&docs());
        let results = index.search("garantía garantía GARANTÍA", 5).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|p| p.score == Some(1.0)));
    }

    #[tokio::test]
    async fn respects_top_k() {
        let index = MemoryIndex::from_documents(&docs());
        let results = index.search("fondos garantía", 1).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn no_matches_is_empty() {
        let index = MemoryIndex::from_documents(&docs());
        assert!(index.search("receta de pizza", 5).await.unwrap().is_empty());
        assert!(index.search("   ", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_makes_document_searchable() {
        let index = MemoryIndex::new();
        index
            .insert(Passage::new("Tokio es un runtime asíncrono", "tokio.md"))
            .await;
        assert_eq!(index.len().await, 1);
        let results = index.search("runtime", 3).await.unwrap();
        assert_eq!(results[0].source, "tokio.md");
    }
}
