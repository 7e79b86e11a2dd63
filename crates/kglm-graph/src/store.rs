//! In-memory knowledge graph
//!
//! Stores directed `(head, relation, tail)` edges in a petgraph `DiGraph`
//! with one node per entity id.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use kglm_core::{KglmError, KnowledgeGraph, Result, Vocabularies};

/// One knowledge graph fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triple {
    pub head: String,
    pub relation: String,
    pub tail: String,
}

impl Triple {
    pub fn new(
        head: impl Into<String>,
        relation: impl Into<String>,
        tail: impl Into<String>,
    ) -> Self {
        Self {
            head: head.into(),
            relation: relation.into(),
            tail: tail.into(),
        }
    }
}

/// Knowledge graph held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledgeGraph {
    graph: DiGraph<String, String>,
    nodes: HashMap<String, NodeIndex>,
}

impl InMemoryKnowledgeGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from triples
    pub fn from_triples(triples: impl IntoIterator<Item = Triple>) -> Self {
        let mut graph = Self::new();
        for triple in triples {
            graph.add_triple(&triple.head, &triple.relation, &triple.tail);
        }
        graph
    }

    /// Load from a JSON lines file of `{"head", "relation", "tail"}` objects
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut graph = Self::new();

        for (line_number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let triple: Triple = serde_json::from_str(&line).map_err(|e| {
                KglmError::Data(format!(
                    "{} line {}: {e}",
                    path.display(),
                    line_number + 1
                ))
            })?;
            graph.add_triple(&triple.head, &triple.relation, &triple.tail);
        }

        tracing::info!(
            "Loaded knowledge graph {} ({} entities, {} edges)",
            path.display(),
            graph.num_entities(),
            graph.num_edges()
        );
        Ok(graph)
    }

    fn node(&mut self, entity_id: &str) -> NodeIndex {
        if let Some(&index) = self.nodes.get(entity_id) {
            return index;
        }
        let index = self.graph.add_node(entity_id.to_string());
        self.nodes.insert(entity_id.to_string(), index);
        index
    }

    /// Add an edge; entities are created on first use
    pub fn add_triple(&mut self, head: &str, relation: &str, tail: &str) {
        let head = self.node(head);
        let tail = self.node(tail);
        self.graph.add_edge(head, tail, relation.to_string());
    }

    pub fn num_entities(&self) -> usize {
        self.graph.node_count()
    }

    /// All edges in insertion order
    pub fn triples(&self) -> impl Iterator<Item = Triple> + '_ {
        self.graph.edge_references().map(|edge| Triple {
            head: self.graph[edge.source()].clone(),
            relation: edge.weight().clone(),
            tail: self.graph[edge.target()].clone(),
        })
    }

    /// Index every head, relation and tail so edge lookups resolve in-vocabulary
    pub fn extend_vocabularies(&self, vocabs: &mut Vocabularies) {
        for triple in self.triples() {
            vocabs.entities.add_token(&triple.head);
            vocabs.relations.add_token(&triple.relation);
            vocabs.raw_entities.add_token(&triple.tail);
        }
    }
}

impl KnowledgeGraph for InMemoryKnowledgeGraph {
    fn edges_from(&self, entity_id: &str) -> Vec<(String, String)> {
        let Some(&node) = self.nodes.get(entity_id) else {
            return Vec::new();
        };
        // petgraph yields outgoing edges newest first.
        let mut edges: Vec<(String, String)> = self
            .graph
            .edges(node)
            .map(|edge| (edge.weight().clone(), self.graph[edge.target()].clone()))
            .collect();
        edges.reverse();
        edges
    }

    fn num_edges(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> InMemoryKnowledgeGraph {
        InMemoryKnowledgeGraph::from_triples([
            Triple::new("Q1223", "P150", "Q695782"),
            Triple::new("Q1223", "P36", "Q44"),
            Triple::new("Q695782", "R:P131", "Q1223"),
        ])
    }

    #[test]
    fn test_edges_from_in_insertion_order() {
        let graph = sample_graph();
        assert_eq!(
            graph.edges_from("Q1223"),
            vec![
                ("P150".to_string(), "Q695782".to_string()),
                ("P36".to_string(), "Q44".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_and_leaf_entities_have_no_edges() {
        let graph = sample_graph();
        assert!(graph.edges_from("Q999").is_empty());
        assert!(graph.edges_from("Q44").is_empty());
    }

    #[test]
    fn test_counts() {
        let graph = sample_graph();
        assert_eq!(graph.num_entities(), 3);
        assert_eq!(graph.num_edges(), 3);
        assert_eq!(graph.triples().count(), 3);
    }

    #[test]
    fn test_extend_vocabularies() {
        let mut vocabs = Vocabularies::new();
        sample_graph().extend_vocabularies(&mut vocabs);
        assert!(vocabs.entities.contains("Q1223"));
        assert!(vocabs.relations.contains("R:P131"));
        assert!(vocabs.raw_entities.contains("Q44"));
    }

    #[test]
    fn test_load_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kg.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"head": "Q1", "relation": "P31", "tail": "Q5"}"#,
                "\n\n",
                r#"{"head": "Q1", "relation": "P569", "tail": "T1952"}"#,
                "\n",
            ),
        )
        .unwrap();

        let graph = InMemoryKnowledgeGraph::load(&path).unwrap();
        assert_eq!(graph.num_edges(), 2);
        assert_eq!(graph.edges_from("Q1")[1].1, "T1952");
    }

    #[test]
    fn test_load_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kg.jsonl");
        std::fs::write(&path, "{\"head\": \"Q1\"}\n").unwrap();
        assert!(matches!(
            InMemoryKnowledgeGraph::load(&path),
            Err(KglmError::Data(_))
        ));
    }
}
