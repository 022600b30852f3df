//! Search-index capabilities for agrag.
//!
//! Every retrieval source implements [`SearchIndex`]; [`build_index`] turns
//! an agent's [`SourceConfig`] into one.

pub mod memory;
pub mod pinecone;
pub mod tavily;

pub use memory::MemoryIndex;
pub use pinecone::PineconeIndex;
pub use tavily::TavilyIndex;

use std::sync::Arc;

use agrag_config::{AppConfig, SourceConfig};
use agrag_core::error::RetrievalError;
use agrag_core::search::SearchIndex;
use agrag_providers::ProviderRouter;
use tracing::warn;

/// Build the search index described by `source`.
///
/// Missing API keys are not an error here: the index is built and each
/// search fails with [`RetrievalError::NotConfigured`], so one unconfigured
/// agent does not keep the rest from serving.
pub fn build_index(
    source: &SourceConfig,
    config: &AppConfig,
    providers: &ProviderRouter,
) -> Result<Arc<dyn SearchIndex>, RetrievalError> {
    match source {
        SourceConfig::Pinecone {
            index,
            index_host,
            namespace,
            filter,
            api_key,
        } => {
            let (embedder, embedding_model) =
                providers.resolve(&config.embedding.model).ok_or_else(|| {
                    RetrievalError::NotConfigured(format!(
                        "no provider for embedding model '{}'",
                        config.embedding.model
                    ))
                })?;
            let api_key = api_key
                .clone()
                .or_else(|| config.search.pinecone_api_key.clone());
            if api_key.is_none() {
                warn!(index = ?index, "No Pinecone API key configured");
            }

            let pinecone = match (index_host, index) {
                (Some(host), _) => PineconeIndex::with_host(host, embedder, embedding_model),
                (None, Some(name)) => PineconeIndex::new(name, embedder, embedding_model),
                (None, None) => {
                    return Err(RetrievalError::NotConfigured(
                        "pinecone source needs `index` or `index_host`".into(),
                    ));
                }
            };
            Ok(Arc::new(
                pinecone
                    .namespace(namespace.clone())
                    .filter(filter.clone())
                    .api_key(api_key)
                    .dimensions(config.embedding.dimensions),
            ))
        }
        SourceConfig::Tavily {
            search_depth,
            api_key,
        } => {
            let api_key = api_key
                .clone()
                .or_else(|| config.search.tavily_api_key.clone());
            if api_key.is_none() {
                warn!("No Tavily API key configured");
            }
            Ok(Arc::new(
                TavilyIndex::new(api_key).search_depth(search_depth.clone()),
            ))
        }
        SourceConfig::Memory { documents } => Ok(Arc::new(MemoryIndex::from_documents(documents))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrag_config::DocumentConfig;
    use agrag_providers::build_from_config;

    #[test]
    fn builds_every_source_kind() {
        let config = AppConfig::default();
        let router = build_from_config(&config);

        let pinecone = SourceConfig::Pinecone {
            index: Some("iax-documentation".into()),
            index_host: None,
            namespace: Some("iax-documentation-namespace".into()),
            filter: None,
            api_key: None,
        };
        assert_eq!(
            build_index(&pinecone, &config, &router).unwrap().name(),
            "pinecone:iax-documentation"
        );

        let tavily = SourceConfig::Tavily {
            search_depth: "basic".into(),
            api_key: None,
        };
        assert_eq!(build_index(&tavily, &config, &router).unwrap().name(), "tavily");

        let memory = SourceConfig::Memory {
            documents: vec![DocumentConfig {
                source: "a.md".into(),
                title: None,
                content: "texto".into(),
            }],
        };
        assert_eq!(build_index(&memory, &config, &router).unwrap().name(), "memory");
    }

    #[test]
    fn pinecone_without_index_is_rejected() {
        let config = AppConfig::default();
        let router = build_from_config(&config);
        let source = SourceConfig::Pinecone {
            index: None,
            index_host: None,
            namespace: None,
            filter: None,
            api_key: None,
        };
        assert!(matches!(
            build_index(&source, &config, &router),
            Err(RetrievalError::NotConfigured(_))
        ));
    }

    #[test]
    fn pinecone_without_embedding_provider_is_rejected() {
        let config = AppConfig::default();
        let router = ProviderRouter::new("openai");
        let source = SourceConfig::Pinecone {
            index: Some("idx".into()),
            index_host: None,
            namespace: None,
            filter: None,
            api_key: Some("pc".into()),
        };
        assert!(build_index(&source, &config, &router).is_err());
    }
}
