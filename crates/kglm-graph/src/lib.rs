//! KGLM Graph - Knowledge graph access
//!
//! Provides an in-memory knowledge graph (petgraph) implementing the
//! [`KnowledgeGraph`](kglm_core::KnowledgeGraph) trait, and the batched
//! edge lookup the scorer uses to explain derived mentions.

pub mod lookup;
pub mod store;

pub use lookup::{EdgeGroup, KnowledgeGraphLookup, ParentEdges};
pub use store::{InMemoryKnowledgeGraph, Triple};
