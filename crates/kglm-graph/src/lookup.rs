//! Batched knowledge graph lookup
//!
//! Groups the `(batch, time, parent)` positions of a parent-id array by
//! distinct parent and attaches each parent's outgoing edges, indexed in the
//! relation and raw-entity vocabularies. Edge counts vary per parent, so the
//! result is a list of groups rather than a padded array; the scorer scatters
//! per-group results back into its own fixed-shape output.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ndarray::ArrayView3;

use kglm_core::vocab::PADDING_INDEX;
use kglm_core::{KnowledgeGraph, Vocabularies};

/// Outgoing edges of one parent, as aligned index arrays
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentEdges {
    /// Relation vocabulary indices
    pub relations: Vec<usize>,
    /// Raw-entity vocabulary indices
    pub tails: Vec<usize>,
}

impl ParentEdges {
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

/// Every position referencing one parent, with that parent's edges
#[derive(Debug, Clone)]
pub struct EdgeGroup {
    /// Entity vocabulary index of the parent
    pub parent_id: usize,
    /// `[b, t, p]` positions holding `parent_id`
    pub positions: Vec<[usize; 3]>,
    pub edges: Arc<ParentEdges>,
}

/// Resolves parent ids to knowledge graph edges, memoizing per parent
pub struct KnowledgeGraphLookup {
    graph: Arc<dyn KnowledgeGraph>,
    vocabs: Arc<Vocabularies>,
    cache: HashMap<usize, Arc<ParentEdges>>,
}

impl KnowledgeGraphLookup {
    pub fn new(graph: Arc<dyn KnowledgeGraph>, vocabs: Arc<Vocabularies>) -> Self {
        Self {
            graph,
            vocabs,
            cache: HashMap::new(),
        }
    }

    /// Number of parents resolved so far
    pub fn cached_parents(&self) -> usize {
        self.cache.len()
    }

    /// Edges of one parent index, resolved through the graph on first use
    pub fn edges(&mut self, parent_id: usize) -> Arc<ParentEdges> {
        if let Some(edges) = self.cache.get(&parent_id) {
            return Arc::clone(edges);
        }

        let edges = match self.vocabs.entities.token(parent_id) {
            Some(entity_id) => {
                let (relations, tails) = self
                    .graph
                    .edges_from(entity_id)
                    .iter()
                    .map(|(relation, tail)| {
                        (
                            self.vocabs.relations.index_of(relation),
                            self.vocabs.raw_entities.index_of(tail),
                        )
                    })
                    .unzip();
                ParentEdges { relations, tails }
            }
            None => {
                tracing::debug!("Parent index {} is outside the entity vocabulary", parent_id);
                ParentEdges::default()
            }
        };

        let edges = Arc::new(edges);
        self.cache.insert(parent_id, Arc::clone(&edges));
        edges
    }

    /// Group `parent_ids` (batch, time, parents) by distinct non-padding parent
    pub fn lookup(&mut self, parent_ids: ArrayView3<usize>) -> Vec<EdgeGroup> {
        let mut positions: BTreeMap<usize, Vec<[usize; 3]>> = BTreeMap::new();
        for ((b, t, p), &parent_id) in parent_ids.indexed_iter() {
            if parent_id != PADDING_INDEX {
                positions.entry(parent_id).or_default().push([b, t, p]);
            }
        }

        let groups: Vec<EdgeGroup> = positions
            .into_iter()
            .map(|(parent_id, positions)| EdgeGroup {
                parent_id,
                positions,
                edges: self.edges(parent_id),
            })
            .collect();

        tracing::debug!(
            "Knowledge graph lookup: {} parents, {} edges",
            groups.len(),
            groups.iter().map(|g| g.edges.len()).sum::<usize>()
        );
        groups
    }
}
