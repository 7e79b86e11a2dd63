//! KGLM Model - Structured scoring of annotated token sequences
//!
//! Given encoder output and the label arrays of a batch, computes the
//! mention-type, new-entity and knowledge-graph entity losses. Candidate
//! parents come from a per-slot cache of recently mentioned entities and
//! relations from the knowledge graph lookup.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kglm_core::{KglmConfig, KnowledgeGraph};
//! use kglm_data::{build_vocabularies, AliasDatabase, AnnotationEncoder, ChunkedBatcher};
//! use kglm_graph::InMemoryKnowledgeGraph;
//! use kglm_model::KglmModel;
//!
//! # fn main() -> kglm_core::Result<()> {
//! let config = KglmConfig::from_file("kglm.toml")?;
//! let aliases = Arc::new(AliasDatabase::load("aliases.json")?);
//! let graph = InMemoryKnowledgeGraph::load("kg.jsonl")?;
//!
//! let encoder = AnnotationEncoder::from_config(&config.data, aliases)?;
//! let documents = kglm_data::read_documents("train.jsonl")?;
//! let instances: Vec<_> = documents.iter().map(|d| encoder.encode(d)).collect();
//! let mut vocabs = build_vocabularies(&instances);
//! graph.extend_vocabularies(&mut vocabs);
//! let vocabs = Arc::new(vocabs);
//!
//! let graph: Arc<dyn KnowledgeGraph> = Arc::new(graph);
//! let mut model = KglmModel::from_config(&config.model, Arc::clone(&vocabs), graph)?;
//! let mut session = model.session();
//! let batcher = ChunkedBatcher::new(config.data.batch_size, config.data.chunk_length);
//! for batch in batcher.batches(instances, &vocabs) {
//!     model.forward(&mut session, &batch?)?;
//! }
//! println!("{:?}", model.metrics(true));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod encoder;
pub mod metrics;
pub mod model;
pub mod nn;
pub mod params;
pub mod scorer;
pub mod session;

pub use cache::RecentEntitiesCache;
pub use encoder::{ElmanEncoder, RecurrentState, SequenceEncoder};
pub use metrics::ScorerMetrics;
pub use model::KglmModel;
pub use params::{EmbeddingTable, Linear};
pub use scorer::{ScorerOutput, StructuredScorer};
pub use session::{Phase, SessionState};
