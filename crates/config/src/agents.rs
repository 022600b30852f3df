//! Agent definitions: what each HTTP endpoint runs.
//!
//! ```toml
//! [[agents]]
//! name = "iax_rag"
//! description = "Documentación de iattraxia y la plataforma IAX"
//! keywords = ["iax", "iattraxia"]
//!
//! [agents.pipeline]
//! type = "rag"
//! query_count = 3
//!
//! [agents.pipeline.source]
//! type = "pinecone"
//! index = "iax-documentation"
//! namespace = "iax-documentation-namespace"
//! ```

use serde::{Deserialize, Serialize};

/// One configured agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent name.
    pub name: String,

    /// One-line description (listings, routing).
    #[serde(default)]
    pub description: String,

    /// Endpoint path; defaults to the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Routing keywords for the coordinator.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Values every new thread of this agent starts with.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub initial_state: serde_json::Map<String, serde_json::Value>,

    pub pipeline: PipelineConfig,
}

impl AgentConfig {
    pub fn endpoint_path(&self) -> String {
        self.path
            .as_deref()
            .unwrap_or(&self.name)
            .trim_matches('/')
            .to_string()
    }
}

/// What kind of agent this is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineConfig {
    /// Triage, query generation, multi-query retrieval, synthesis.
    Rag(RagConfig),
    /// One persona prompt, one model call.
    Direct(DirectConfig),
    /// Ordered prompt steps writing named state keys.
    Chain(ChainConfig),
    /// Keyword router over other agents.
    Coordinator(CoordinatorConfig),
}

impl PipelineConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rag(_) => "rag",
            Self::Direct(_) => "direct",
            Self::Chain(_) => "chain",
            Self::Coordinator(_) => "coordinator",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Model for every stage unless overridden in `models`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default)]
    pub models: StageModels,

    /// When false every turn is treated as SPECIFIC.
    #[serde(default = "default_true")]
    pub triage: bool,

    /// Number of generated queries (N).
    #[serde(default = "default_query_count")]
    pub query_count: usize,

    /// Passages requested per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Domain context given to triage and synthesis.
    #[serde(default)]
    pub persona: String,

    #[serde(default)]
    pub timeouts: StageTimeouts,

    pub source: SourceConfig,
}

fn default_true() -> bool {
    true
}
fn default_query_count() -> usize {
    3
}
fn default_top_k() -> usize {
    5
}

/// Per-stage model overrides (`provider/model`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageModels {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_generation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<String>,
}

/// Independent timeout per external call, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimeouts {
    #[serde(default = "default_triage_ms")]
    pub triage_ms: u64,
    #[serde(default = "default_query_generation_ms")]
    pub query_generation_ms: u64,
    /// Applies to each search call of the fan-out.
    #[serde(default = "default_retrieval_ms")]
    pub retrieval_ms: u64,
    #[serde(default = "default_synthesis_ms")]
    pub synthesis_ms: u64,
}

fn default_triage_ms() -> u64 {
    30_000
}
fn default_query_generation_ms() -> u64 {
    30_000
}
fn default_retrieval_ms() -> u64 {
    15_000
}
fn default_synthesis_ms() -> u64 {
    90_000
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            triage_ms: default_triage_ms(),
            query_generation_ms: default_query_generation_ms(),
            retrieval_ms: default_retrieval_ms(),
            synthesis_ms: default_synthesis_ms(),
        }
    }
}

impl StageTimeouts {
    fn all(&self) -> [u64; 4] {
        [
            self.triage_ms,
            self.query_generation_ms,
            self.retrieval_ms,
            self.synthesis_ms,
        ]
    }

    pub(crate) fn any_zero(&self) -> bool {
        self.all().contains(&0)
    }
}

/// Where a RAG agent retrieves passages from.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Pinecone vector index; queries are embedded first.
    Pinecone {
        /// Index name, resolved to a host through the control plane.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<String>,
        /// Data-plane host; skips the lookup when set.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index_host: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
        /// Pinecone metadata filter.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },
    /// Tavily web search.
    Tavily {
        #[serde(default = "default_search_depth")]
        search_depth: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },
    /// Inline documents ranked by term overlap.
    Memory {
        #[serde(default)]
        documents: Vec<DocumentConfig>,
    },
}

impl SourceConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pinecone { .. } => "pinecone",
            Self::Tavily { .. } => "tavily",
            Self::Memory { .. } => "memory",
        }
    }
}

fn default_search_depth() -> String {
    "advanced".into()
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pinecone {
                index,
                index_host,
                namespace,
                filter,
                api_key,
            } => f
                .debug_struct("Pinecone")
                .field("index", index)
                .field("index_host", index_host)
                .field("namespace", namespace)
                .field("filter", filter)
                .field("api_key", &crate::redact(api_key))
                .finish(),
            Self::Tavily {
                search_depth,
                api_key,
            } => f
                .debug_struct("Tavily")
                .field("search_depth", search_depth)
                .field("api_key", &crate::redact(api_key))
                .finish(),
            Self::Memory { documents } => f
                .debug_struct("Memory")
                .field("documents", &documents.len())
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// System prompt.
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default = "default_generation_ms")]
    pub timeout_ms: u64,
}

fn default_generation_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub steps: Vec<ChainStepConfig>,
    /// Per step.
    #[serde(default = "default_generation_ms")]
    pub timeout_ms: u64,
}

/// One step of a prompt chain. `{input}` is the utterance; `{key}` reads
/// an earlier step's output or any session value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStepConfig {
    pub name: String,
    pub prompt: String,
    /// Session key the output is written to.
    pub output_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Agents to route between; empty means every non-coordinator agent.
    #[serde(default)]
    pub members: Vec<String>,
    /// Fallback when no member matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_agent: Option<String>,
    /// Keyword hits needed for a member to be chosen.
    #[serde(default = "default_min_keyword_hits")]
    pub min_keyword_hits: usize,
}

fn default_min_keyword_hits() -> usize {
    1
}

/// The agents a fresh install ships with.
pub fn default_agents() -> Vec<AgentConfig> {
    vec![
        AgentConfig {
            name: "iax_rag".into(),
            description: "Responde preguntas sobre iattraxia y la plataforma IAX usando su documentación".into(),
            path: Some("agrag_multi_query".into()),
            keywords: vec![
                "iax".into(),
                "iattraxia".into(),
                "plataforma".into(),
                "agentes".into(),
                "automatizaciones".into(),
            ],
            initial_state: serde_json::Map::new(),
            pipeline: PipelineConfig::Rag(RagConfig {
                model: Some("openai/gpt-4.1-mini".into()),
                models: StageModels::default(),
                triage: true,
                query_count: 3,
                top_k: 5,
                temperature: None,
                persona: "Eres el asistente de iattraxia y la plataforma IAX: desarrollo de software con IA, agentes y automatizaciones.".into(),
                timeouts: StageTimeouts::default(),
                source: SourceConfig::Pinecone {
                    index: Some("iax-documentation".into()),
                    index_host: None,
                    namespace: Some("iax-documentation-namespace".into()),
                    filter: None,
                    api_key: None,
                },
            }),
        },
        AgentConfig {
            name: "workana_rag".into(),
            description: "Asistente del Help Desk de Workana para clientes y profesionales".into(),
            path: Some("workana".into()),
            keywords: vec![
                "workana".into(),
                "freelancer".into(),
                "proyecto".into(),
                "depósito".into(),
                "garantía".into(),
                "comisiones".into(),
                "pagos".into(),
            ],
            initial_state: serde_json::Map::new(),
            pipeline: PipelineConfig::Rag(RagConfig {
                model: Some("gemini/gemini-2.0-flash".into()),
                models: StageModels::default(),
                triage: true,
                query_count: 3,
                top_k: 5,
                temperature: None,
                persona: "Eres asistente de Workana, una plataforma de freelancing con pago por horas y por trabajo terminado. Workana no tiene app móvil.".into(),
                timeouts: StageTimeouts::default(),
                source: SourceConfig::Pinecone {
                    index: Some("iax-workana-discord-doc-files".into()),
                    index_host: None,
                    namespace: None,
                    filter: None,
                    api_key: None,
                },
            }),
        },
        AgentConfig {
            name: "web_search".into(),
            description: "Responde preguntas buscando en internet".into(),
            path: None,
            keywords: vec![
                "internet".into(),
                "web".into(),
                "noticias".into(),
                "hoy".into(),
                "actual".into(),
            ],
            initial_state: serde_json::Map::new(),
            pipeline: PipelineConfig::Rag(RagConfig {
                model: Some("gemini/gemini-2.0-flash".into()),
                models: StageModels::default(),
                triage: false,
                query_count: 1,
                top_k: 5,
                temperature: None,
                persona: "Respondes preguntas con resultados de búsqueda en internet.".into(),
                timeouts: StageTimeouts::default(),
                source: SourceConfig::Tavily {
                    search_depth: default_search_depth(),
                    api_key: None,
                },
            }),
        },
        AgentConfig {
            name: "hello".into(),
            description: "Has friendly chats with a user.".into(),
            path: Some("hello_agent".into()),
            keywords: vec!["hola".into(), "hello".into()],
            initial_state: serde_json::Map::new(),
            pipeline: PipelineConfig::Direct(DirectConfig {
                model: Some("openai/gpt-4o".into()),
                prompt: "You are a helpful assistant, chatting with a user. Be polite and friendly, introducing yourself and asking who the user is. If the user provides their name, greet them by name.".into(),
                temperature: None,
                timeout_ms: default_generation_ms(),
            }),
        },
        AgentConfig {
            name: "coder".into(),
            description: "Escribe código Python cuando se le solicita".into(),
            path: None,
            keywords: vec![
                "código".into(),
                "python".into(),
                "programa".into(),
                "script".into(),
                "función".into(),
            ],
            initial_state: serde_json::Map::new(),
            pipeline: PipelineConfig::Direct(DirectConfig {
                model: Some("openai/gpt-4o".into()),
                prompt: "Eres especialista en programación en Python. Tu única función es escribir código cuando te lo soliciten. Responde únicamente con el código solicitado, sin explicaciones adicionales. Tu salida es siempre código Python en un formato estándar.".into(),
                temperature: Some(0.2),
                timeout_ms: default_generation_ms(),
            }),
        },
        AgentConfig {
            name: "pizzeria".into(),
            description: "Cajero de Pizzería Loca: crea pizzas y calcula la entrega".into(),
            path: Some("pizza".into()),
            keywords: vec!["pizza".into(), "pizzería".into()],
            initial_state: pizzeria_initial_state(),
            pipeline: PipelineConfig::Chain(ChainConfig {
                model: Some("gemini/gemini-2.0-flash".into()),
                steps: vec![
                    ChainStepConfig {
                        name: "chef".into(),
                        prompt: "Eres un chef italiano creativo que inventa pizzas LOCAS.\nEl cliente pidió: {input}\nCrea una pizza única con un nombre italiano divertido, 4 a 6 ingredientes creativos y un tiempo de preparación entre 8 y 15 minutos.\nResponde SOLO con:\n[NOMBRE EN ITALIANO]\nIngredientes: [lista separada por comas]\nPreparación: [X] minutos".into(),
                        output_key: "pizza_created".into(),
                        model: None,
                    },
                    ChainStepConfig {
                        name: "delivery".into(),
                        prompt: "Eres un repartidor que siempre tiene excusas locas para los tiempos de entrega.\nLa pizza que acabamos de preparar es:\n{pizza_created}\nCalcula un tiempo de entrega entre 15 y 45 minutos e inventa una excusa creativa y graciosa.\nResponde SOLO con:\nEntrega en [X] minutos\nMotivo: [excusa]".into(),
                        output_key: "delivery_info".into(),
                        model: None,
                    },
                    ChainStepConfig {
                        name: "cashier".into(),
                        prompt: "Eres el cajero de \"Pizzería Loca\", cálido, divertido y conversacional.\nEl cliente dijo: {input}\nPizza preparada por la cocina:\n{pizza_created}\nEntrega:\n{delivery_info}\nPresenta el pedido de forma divertida y organizada en markdown (nombre, ingredientes, preparación, entrega y motivo) y pregunta si quiere algo más.".into(),
                        output_key: "order_summary".into(),
                        model: None,
                    },
                ],
                timeout_ms: default_generation_ms(),
            }),
        },
        AgentConfig {
            name: "coordinator".into(),
            description: "Coordinador del laboratorio: delega cada consulta al agente adecuado".into(),
            path: None,
            keywords: Vec::new(),
            initial_state: serde_json::Map::new(),
            pipeline: PipelineConfig::Coordinator(CoordinatorConfig {
                members: vec![
                    "iax_rag".into(),
                    "workana_rag".into(),
                    "web_search".into(),
                    "coder".into(),
                ],
                default_agent: Some("hello".into()),
                min_keyword_hits: default_min_keyword_hits(),
            }),
        },
    ]
}

fn pizzeria_initial_state() -> serde_json::Map<String, serde_json::Value> {
    let mut state = serde_json::Map::new();
    state.insert("pizza_created".into(), serde_json::Value::Bool(false));
    state.insert("delivery_info".into(), serde_json::Value::String(String::new()));
    state.insert("order_history".into(), serde_json::Value::Array(Vec::new()));
    state
}
