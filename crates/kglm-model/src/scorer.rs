//! Structured scorer
//!
//! Splits each encoded vector into token, head and relation sub-vectors and
//! computes three losses from the batch labels:
//!
//! - mention type: will the next token start or continue a mention, and of
//!   which kind
//! - new entity: which entity a new mention introduces
//! - knowledge graph entity: which recent parent and which relation explain
//!   a derived mention
//!
//! Running metrics are kept across calls and read with
//! [`StructuredScorer::metrics`].

use ndarray::{s, Array3, ArrayView1, ArrayView2, ArrayView3};
use rand::Rng;
use serde::{Deserialize, Serialize};

use kglm_core::vocab::{OOV_INDEX, PADDING_INDEX};
use kglm_core::{KglmError, MentionType, ModelConfig, NewEntityMode, Result, Vocabularies};
use kglm_data::LabelBatch;
use kglm_graph::KnowledgeGraphLookup;

use crate::cache::RecentEntitiesCache;
use crate::metrics::{Average, CategoricalAccuracy, F1Measure, Perplexity, ScorerMetrics};
use crate::nn::{argmax, log_softmax, logsumexp, masked_log_softmax, MIN_LOG_PROB};
use crate::params::{EmbeddingTable, Linear};

const NUM_MENTION_TYPES: usize = 3;
const EPSILON: f32 = 1e-13;

/// Losses of one scored batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScorerOutput {
    pub mention_type_loss: f32,
    pub new_entity_loss: f32,
    pub kg_entity_loss: f32,
    /// Sum of the three plus any activation regularization
    pub loss: f32,
}

enum NewEntityHead {
    /// Inner product with the embeddings of the document shortlist
    Shortlist,
    /// Linear projection onto the whole entity vocabulary
    FullVocab(Linear),
}

/// Label-aware scorer over encoder output
pub struct StructuredScorer {
    token_dim: usize,
    entity_dim: usize,
    alpha: f32,
    beta: f32,

    mention_type_head: Linear,
    new_entity_head: NewEntityHead,
    entity_embedding: EmbeddingTable,
    relation_embedding: EmbeddingTable,

    avg_mention_type_loss: Average,
    avg_new_entity_loss: Average,
    avg_kg_entity_loss: Average,
    new_mention_f1: F1Measure,
    kg_mention_f1: F1Measure,
    new_entity_accuracy: CategoricalAccuracy,
    new_entity_accuracy_20: CategoricalAccuracy,
    parent_ppl: Perplexity,
    relation_ppl: Perplexity,
}

impl StructuredScorer {
    pub fn new<R: Rng>(config: &ModelConfig, vocabs: &Vocabularies, rng: &mut R) -> Self {
        let new_entity_head = match config.new_entity_mode {
            NewEntityMode::Shortlist => NewEntityHead::Shortlist,
            NewEntityMode::FullVocab => NewEntityHead::FullVocab(Linear::new(
                config.entity_dim,
                vocabs.entities.len(),
                rng,
            )),
        };

        Self {
            token_dim: config.token_dim,
            entity_dim: config.entity_dim,
            alpha: config.alpha,
            beta: config.beta,
            mention_type_head: Linear::new(config.token_dim, NUM_MENTION_TYPES, rng),
            new_entity_head,
            entity_embedding: EmbeddingTable::new(vocabs.entities.len(), config.entity_dim, rng),
            relation_embedding: EmbeddingTable::new(vocabs.relations.len(), config.entity_dim, rng),
            avg_mention_type_loss: Average::default(),
            avg_new_entity_loss: Average::default(),
            avg_kg_entity_loss: Average::default(),
            new_mention_f1: F1Measure::new(MentionType::New.index()),
            kg_mention_f1: F1Measure::new(MentionType::Derived.index()),
            new_entity_accuracy: CategoricalAccuracy::new(1),
            new_entity_accuracy_20: CategoricalAccuracy::new(20),
            parent_ppl: Perplexity::default(),
            relation_ppl: Perplexity::default(),
        }
    }

    /// Width of the encoded vectors this scorer consumes
    pub fn input_dim(&self) -> usize {
        self.token_dim + 2 * self.entity_dim
    }

    pub fn new_entity_mode(&self) -> NewEntityMode {
        match self.new_entity_head {
            NewEntityHead::Shortlist => NewEntityMode::Shortlist,
            NewEntityHead::FullVocab(_) => NewEntityMode::FullVocab,
        }
    }

    /// Score `encoded` (batch, time, input_dim) against `labels`.
    ///
    /// `mask` marks real positions. The cache is extended with this call's
    /// entities, so calls for one slot must arrive in document order.
    pub fn score(
        &mut self,
        encoded: ArrayView3<'_, f32>,
        mask: ArrayView2<'_, bool>,
        labels: &LabelBatch,
        cache: &mut RecentEntitiesCache,
        kg_lookup: &mut KnowledgeGraphLookup,
    ) -> Result<ScorerOutput> {
        self.check_shapes(encoded, mask, labels)?;
        let num_targets = mask.iter().filter(|&&m| m).count() as f32;

        let token_dim = self.token_dim;
        let head_end = token_dim + self.entity_dim;
        let encoded_token = encoded.slice(s![.., .., ..token_dim]);
        let encoded_head = encoded.slice(s![.., .., token_dim..head_end]);
        let encoded_relation = encoded.slice(s![.., .., head_end..]);

        let mention_type_loss = self.mention_type_loss(encoded_token, mask, labels, num_targets)?;
        self.avg_mention_type_loss.update(mention_type_loss);

        let query = &encoded_head + &encoded_relation;
        let new_entity_loss = self.new_entity_loss(query.view(), labels, num_targets)?;
        self.avg_new_entity_loss.update(new_entity_loss);

        let kg_entity_loss = self.kg_entity_loss(
            encoded_head,
            encoded_relation,
            labels,
            cache,
            kg_lookup,
            num_targets,
        )?;
        self.avg_kg_entity_loss.update(kg_entity_loss);

        let mut loss = mention_type_loss + new_entity_loss + kg_entity_loss;
        if self.alpha != 0.0 {
            loss += self.alpha * activation_loss(encoded);
        }
        if self.beta != 0.0 {
            loss += self.beta * temporal_activation_loss(encoded);
        }

        tracing::debug!(
            "Scored batch {:?}: type={:.4} new={:.4} kg={:.4}",
            mask.dim(),
            mention_type_loss,
            new_entity_loss,
            kg_entity_loss
        );

        Ok(ScorerOutput {
            mention_type_loss,
            new_entity_loss,
            kg_entity_loss,
            loss,
        })
    }

    /// Current metric values; `reset` clears the accumulators afterwards
    pub fn metrics(&mut self, reset: bool) -> ScorerMetrics {
        let metrics = ScorerMetrics {
            mention_type: self.avg_mention_type_loss.value(),
            new_entity: self.avg_new_entity_loss.value(),
            kg_entity: self.avg_kg_entity_loss.value(),
            new_p: self.new_mention_f1.precision(),
            new_r: self.new_mention_f1.recall(),
            new_f1: self.new_mention_f1.f1_score(),
            kg_p: self.kg_mention_f1.precision(),
            kg_r: self.kg_mention_f1.recall(),
            kg_f1: self.kg_mention_f1.f1_score(),
            new_ent_acc: self.new_entity_accuracy.value(),
            new_ent_acc_20: self.new_entity_accuracy_20.value(),
            parent_ppl: self.parent_ppl.value(),
            relation_ppl: self.relation_ppl.value(),
        };
        if reset {
            self.avg_mention_type_loss.reset();
            self.avg_new_entity_loss.reset();
            self.avg_kg_entity_loss.reset();
            self.new_mention_f1.reset();
            self.kg_mention_f1.reset();
            self.new_entity_accuracy.reset();
            self.new_entity_accuracy_20.reset();
            self.parent_ppl.reset();
            self.relation_ppl.reset();
        }
        metrics
    }

    fn check_shapes(
        &self,
        encoded: ArrayView3<'_, f32>,
        mask: ArrayView2<'_, bool>,
        labels: &LabelBatch,
    ) -> Result<()> {
        let (batch_size, sequence_length, width) = encoded.dim();
        if width != self.input_dim() {
            return Err(KglmError::Shape(format!(
                "encoded width {width}, expected {} ({} + 2 x {})",
                self.input_dim(),
                self.token_dim,
                self.entity_dim
            )));
        }

        let expected = (batch_size, sequence_length);
        let fields = [
            ("mask", mask.dim()),
            ("mention_type", labels.mention_type.dim()),
            ("raw_entity_ids", labels.raw_entity_ids.dim()),
            ("entity_ids", labels.entity_ids.dim()),
            ("shortlist_inds", labels.shortlist_inds.dim()),
        ];
        for (name, dim) in fields {
            if dim != expected {
                return Err(KglmError::Shape(format!(
                    "{name} has shape {dim:?}, expected {expected:?}"
                )));
            }
        }

        let (b, t, p) = labels.parent_ids.dim();
        if (b, t) != expected || labels.relations.dim() != (b, t, p) {
            return Err(KglmError::Shape(format!(
                "parent_ids {:?} and relations {:?} do not match {expected:?}",
                labels.parent_ids.dim(),
                labels.relations.dim()
            )));
        }
        if labels.shortlist.nrows() != batch_size {
            return Err(KglmError::Shape(format!(
                "shortlist has {} rows for {batch_size} slots",
                labels.shortlist.nrows()
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Mention type
    // ========================================================================

    fn mention_type_loss(
        &mut self,
        encoded_token: ArrayView3<'_, f32>,
        mask: ArrayView2<'_, bool>,
        labels: &LabelBatch,
        num_targets: f32,
    ) -> Result<f32> {
        let mut nll = 0.0;
        for ((b, t), &real) in mask.indexed_iter() {
            if !real {
                continue;
            }
            let gold = labels.mention_type[[b, t]];
            if gold >= NUM_MENTION_TYPES {
                return Err(KglmError::Shape(format!(
                    "mention type {gold} at ({b}, {t}) is not a class"
                )));
            }

            let logits = self
                .mention_type_head
                .forward(encoded_token.slice(s![b, t, ..]))?
                .to_vec();
            let log_probs = log_softmax(&logits);
            nll -= log_probs[gold];

            let predicted = argmax(&logits);
            self.new_mention_f1.update(predicted, gold);
            self.kg_mention_f1.update(predicted, gold);
        }
        Ok(nll / (num_targets + EPSILON))
    }

    // ========================================================================
    // New entity
    // ========================================================================

    fn new_entity_loss(
        &mut self,
        query: ArrayView3<'_, f32>,
        labels: &LabelBatch,
        num_targets: f32,
    ) -> Result<f32> {
        let Self {
            new_entity_head,
            entity_embedding,
            new_entity_accuracy,
            new_entity_accuracy_20,
            ..
        } = self;
        let mut accuracies = [new_entity_accuracy, new_entity_accuracy_20];

        let total = match new_entity_head {
            NewEntityHead::Shortlist => {
                shortlist_log_likelihood(entity_embedding, query, labels, &mut accuracies)?
            }
            NewEntityHead::FullVocab(head) => {
                full_vocab_log_likelihood(head, query, labels, &mut accuracies)?
            }
        };
        Ok(-total / (num_targets + EPSILON))
    }

    // ========================================================================
    // Knowledge graph entity
    // ========================================================================

    fn kg_entity_loss(
        &mut self,
        encoded_head: ArrayView3<'_, f32>,
        encoded_relation: ArrayView3<'_, f32>,
        labels: &LabelBatch,
        cache: &mut RecentEntitiesCache,
        kg_lookup: &mut KnowledgeGraphLookup,
        num_targets: f32,
    ) -> Result<f32> {
        let parent_log_probs = self.parent_log_probs(encoded_head, labels, cache)?;
        let relation_log_probs = self.relation_log_probs(encoded_relation, labels, kg_lookup)?;

        let (batch_size, sequence_length, _) = labels.parent_ids.dim();
        let mut total = 0.0;
        let mut parent_nll = 0.0;
        let mut relation_nll = 0.0;
        let mut num_derived = 0;
        for b in 0..batch_size {
            for t in 0..sequence_length {
                let has_parent = labels
                    .parent_ids
                    .slice(s![b, t, ..])
                    .iter()
                    .any(|&p| p != PADDING_INDEX);
                if !has_parent {
                    continue;
                }
                let parent = parent_log_probs.slice(s![b, t, ..]).to_vec();
                let relation = relation_log_probs.slice(s![b, t, ..]).to_vec();
                let combined: Vec<f32> = parent.iter().zip(&relation).map(|(p, r)| p + r).collect();

                total += logsumexp(&combined);
                parent_nll -= logsumexp(&parent);
                relation_nll -= logsumexp(&relation);
                num_derived += 1;
            }
        }

        self.parent_ppl.update(parent_nll, num_derived);
        self.relation_ppl.update(relation_nll, num_derived);
        Ok(-total / (num_targets + EPSILON))
    }

    /// (batch, time, parents) log-probability of selecting each gold parent
    /// among the recent entities; the floor where the parent is not a candidate
    fn parent_log_probs(
        &self,
        encoded_head: ArrayView3<'_, f32>,
        labels: &LabelBatch,
        cache: &mut RecentEntitiesCache,
    ) -> Result<Array3<f32>> {
        let (candidate_ids, candidate_mask) = cache.lookup(labels.entity_ids.view())?;
        let (batch_size, sequence_length, num_parents) = labels.parent_ids.dim();
        let mut log_probs =
            Array3::from_elem((batch_size, sequence_length, num_parents), MIN_LOG_PROB);

        for b in 0..batch_size {
            let candidates = candidate_ids.row(b);
            let embeddings = candidates
                .iter()
                .map(|&id| self.entity_embedding.get(id))
                .collect::<Result<Vec<_>>>()?;

            for t in 0..sequence_length {
                let parents = labels.parent_ids.slice(s![b, t, ..]);
                if parents.iter().all(|&p| p == PADDING_INDEX) {
                    continue;
                }
                let head = encoded_head.slice(s![b, t, ..]);
                let logits: Vec<f32> = embeddings.iter().map(|e| head.dot(e)).collect();
                let position_mask = candidate_mask.slice(s![b, t, ..]).to_vec();
                let selection = masked_log_softmax(&logits, &position_mask);

                for (p, &parent) in parents.iter().enumerate() {
                    let matched = candidates
                        .iter()
                        .position(|&c| c != PADDING_INDEX && c == parent);
                    log_probs[[b, t, p]] = match matched {
                        Some(c) => selection[c],
                        None => selection[0] + MIN_LOG_PROB,
                    };
                }
            }
        }
        Ok(log_probs)
    }

    /// (batch, time, parents) log-probability that a relation out of each gold
    /// parent leads to the gold raw entity; the floor when none does
    fn relation_log_probs(
        &self,
        encoded_relation: ArrayView3<'_, f32>,
        labels: &LabelBatch,
        kg_lookup: &mut KnowledgeGraphLookup,
    ) -> Result<Array3<f32>> {
        let mut log_probs = Array3::from_elem(labels.parent_ids.dim(), MIN_LOG_PROB);

        for group in kg_lookup.lookup(labels.parent_ids.view()) {
            if group.edges.is_empty() {
                continue;
            }
            let embeddings = group
                .edges
                .relations
                .iter()
                .map(|&r| self.relation_embedding.get(r))
                .collect::<Result<Vec<ArrayView1<'_, f32>>>>()?;

            for &[b, t, p] in &group.positions {
                let target = labels.raw_entity_ids[[b, t]];
                if target <= OOV_INDEX {
                    continue;
                }
                let encoded = encoded_relation.slice(s![b, t, ..]);
                let logits: Vec<f32> = embeddings.iter().map(|e| e.dot(&encoded)).collect();
                let edge_log_probs = log_softmax(&logits);

                let matching: Vec<f32> = group
                    .edges
                    .tails
                    .iter()
                    .zip(&edge_log_probs)
                    .filter(|&(&tail, _)| tail == target)
                    .map(|(_, &lp)| lp)
                    .collect();
                if !matching.is_empty() {
                    log_probs[[b, t, p]] = logsumexp(&matching);
                }
            }
        }
        Ok(log_probs)
    }
}

fn shortlist_log_likelihood(
    entity_embedding: &EmbeddingTable,
    query: ArrayView3<'_, f32>,
    labels: &LabelBatch,
    accuracies: &mut [&mut CategoricalAccuracy],
) -> Result<f32> {
    let (batch_size, sequence_length, _) = query.dim();
    let mut total = 0.0;
    for b in 0..batch_size {
        let shortlist = labels.shortlist.row(b);
        let shortlist_mask: Vec<bool> = shortlist.iter().map(|&id| id != PADDING_INDEX).collect();
        let embeddings = shortlist
            .iter()
            .map(|&id| entity_embedding.get(id))
            .collect::<Result<Vec<_>>>()?;

        for t in 0..sequence_length {
            let gold = labels.shortlist_inds[[b, t]];
            if gold == 0 {
                continue;
            }
            if gold >= shortlist.len() {
                return Err(KglmError::Shape(format!(
                    "shortlist index {gold} at ({b}, {t}) outside shortlist of {}",
                    shortlist.len()
                )));
            }
            let q = query.slice(s![b, t, ..]);
            let logits: Vec<f32> = embeddings.iter().map(|e| q.dot(e)).collect();
            let log_probs = masked_log_softmax(&logits, &shortlist_mask);

            total += log_probs[gold];
            for accuracy in accuracies.iter_mut() {
                accuracy.update(&log_probs, gold);
            }
        }
    }
    Ok(total)
}

fn full_vocab_log_likelihood(
    head: &Linear,
    query: ArrayView3<'_, f32>,
    labels: &LabelBatch,
    accuracies: &mut [&mut CategoricalAccuracy],
) -> Result<f32> {
    let mut total = 0.0;
    for ((b, t), &gold) in labels.entity_ids.indexed_iter() {
        if labels.mention_type[[b, t]] != MentionType::New.index() || gold == PADDING_INDEX {
            continue;
        }
        if gold >= head.out_features() {
            return Err(KglmError::Shape(format!(
                "entity {gold} at ({b}, {t}) outside vocabulary of {}",
                head.out_features()
            )));
        }
        let logits = head.forward(query.slice(s![b, t, ..]))?.to_vec();
        let log_probs = log_softmax(&logits);

        total += log_probs[gold];
        for accuracy in accuracies.iter_mut() {
            accuracy.update(&log_probs, gold);
        }
    }
    Ok(total)
}

/// Mean squared activation
fn activation_loss(encoded: ArrayView3<'_, f32>) -> f32 {
    encoded.mapv(|v| v * v).mean().unwrap_or(0.0)
}

/// Mean squared difference between consecutive positions
fn temporal_activation_loss(encoded: ArrayView3<'_, f32>) -> f32 {
    if encoded.dim().1 < 2 {
        return 0.0;
    }
    let diff = &encoded.slice(s![.., 1.., ..]) - &encoded.slice(s![.., ..-1, ..]);
    diff.mapv(|v| v * v).mean().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kglm_core::KnowledgeGraph;
    use kglm_graph::{InMemoryKnowledgeGraph, Triple};
    use ndarray::{Array1, Array2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    const TOKEN_DIM: usize = 4;
    const ENTITY_DIM: usize = 3;
    const WIDTH: usize = TOKEN_DIM + 2 * ENTITY_DIM;

    fn vocabs() -> Vocabularies {
        let mut vocabs = Vocabularies::new();
        for entity in ["Q1", "Q2", "Q9"] {
            vocabs.entities.add_token(entity);
            vocabs.raw_entities.add_token(entity);
        }
        vocabs.raw_entities.add_token("Q3");
        vocabs.relations.add_token("P1");
        vocabs.relations.add_token("P2");
        vocabs
    }

    fn config(mode: NewEntityMode) -> ModelConfig {
        ModelConfig {
            new_entity_mode: mode,
            token_dim: TOKEN_DIM,
            entity_dim: ENTITY_DIM,
            ..ModelConfig::default()
        }
    }

    fn scorer(mode: NewEntityMode, vocabs: &Vocabularies) -> StructuredScorer {
        let mut scorer =
            StructuredScorer::new(&config(mode), vocabs, &mut StdRng::seed_from_u64(5));
        // Zero bias so all-zero encodings give uniform mention types.
        scorer.mention_type_head =
            Linear::from_parts(Array2::zeros((3, TOKEN_DIM)), Array1::zeros(3)).unwrap();
        scorer
    }

    fn kg_lookup(vocabs: &Vocabularies) -> KnowledgeGraphLookup {
        let graph: Arc<dyn KnowledgeGraph> = Arc::new(InMemoryKnowledgeGraph::from_triples([
            Triple::new("Q1", "P1", "Q2"),
            Triple::new("Q1", "P2", "Q3"),
        ]));
        KnowledgeGraphLookup::new(graph, Arc::new(vocabs.clone()))
    }

    fn empty_labels(batch_size: usize, sequence_length: usize) -> LabelBatch {
        LabelBatch {
            mention_type: Array2::zeros((batch_size, sequence_length)),
            raw_entity_ids: Array2::zeros((batch_size, sequence_length)),
            entity_ids: Array2::zeros((batch_size, sequence_length)),
            parent_ids: Array3::zeros((batch_size, sequence_length, 1)),
            relations: Array3::zeros((batch_size, sequence_length, 1)),
            shortlist: Array2::zeros((batch_size, 1)),
            shortlist_inds: Array2::zeros((batch_size, sequence_length)),
            mention_lengths: Array2::ones((batch_size, sequence_length)),
            alias_copy_inds: None,
        }
    }

    /// "Q1 ... Q2" where Q2 is derived from Q1 via P1
    fn derived_labels(vocabs: &Vocabularies) -> LabelBatch {
        let q1 = vocabs.entities.index_of("Q1");
        let q2 = vocabs.entities.index_of("Q2");
        let mut labels = empty_labels(1, 3);
        labels.mention_type[[0, 0]] = MentionType::New.index();
        labels.entity_ids[[0, 0]] = q1;
        labels.raw_entity_ids[[0, 0]] = vocabs.raw_entities.index_of("Q1");
        labels.shortlist = ndarray::array![[PADDING_INDEX, q1]];
        labels.shortlist_inds[[0, 0]] = 1;
        labels.mention_type[[0, 2]] = MentionType::Derived.index();
        labels.entity_ids[[0, 2]] = q2;
        labels.raw_entity_ids[[0, 2]] = vocabs.raw_entities.index_of("Q2");
        labels.parent_ids[[0, 2, 0]] = q1;
        labels.relations[[0, 2, 0]] = vocabs.relations.index_of("P1");
        labels
    }

    fn fresh_cache(batch_size: usize) -> RecentEntitiesCache {
        let mut cache = RecentEntitiesCache::new(30);
        cache.reset(&vec![true; batch_size]);
        cache
    }

    #[test]
    fn test_zero_encoding_losses() {
        let vocabs = vocabs();
        let mut scorer = scorer(NewEntityMode::Shortlist, &vocabs);
        let labels = derived_labels(&vocabs);
        let encoded = Array3::zeros((1, 3, WIDTH));
        let mask = Array2::from_elem((1, 3), true);

        let output = scorer
            .score(
                encoded.view(),
                mask.view(),
                &labels,
                &mut fresh_cache(1),
                &mut kg_lookup(&vocabs),
            )
            .unwrap();

        // Uniform over 3 mention types at each of 3 positions.
        assert!((output.mention_type_loss - 3f32.ln()).abs() < 1e-5);
        // Single unmasked shortlist entry: probability 1.
        assert!(output.new_entity_loss.abs() < 1e-5);
        // Parent certain, relation P1 one of two equally scored edges.
        assert!((output.kg_entity_loss - 2f32.ln() / 3.0).abs() < 1e-5);
        let sum = output.mention_type_loss + output.new_entity_loss + output.kg_entity_loss;
        assert!((output.loss - sum).abs() < 1e-6);

        let metrics = scorer.metrics(false);
        assert!((metrics.parent_ppl - 1.0).abs() < 1e-4);
        assert!((metrics.relation_ppl - 2.0).abs() < 1e-4);
        assert!((metrics.new_ent_acc - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_edge_parent_hits_floor() {
        let vocabs = vocabs();
        let scorer = scorer(NewEntityMode::Shortlist, &vocabs);
        let mut labels = derived_labels(&vocabs);
        // Q2 has no outgoing edges.
        labels.parent_ids[[0, 2, 0]] = vocabs.entities.index_of("Q2");

        let encoded = Array3::zeros((1, 3, ENTITY_DIM));
        let log_probs = scorer
            .relation_log_probs(encoded.view(), &labels, &mut kg_lookup(&vocabs))
            .unwrap();
        assert!(log_probs.iter().all(|&v| v == MIN_LOG_PROB));
    }

    #[test]
    fn test_unmatched_tail_hits_floor() {
        let vocabs = vocabs();
        let scorer = scorer(NewEntityMode::Shortlist, &vocabs);
        let mut labels = derived_labels(&vocabs);
        labels.raw_entity_ids[[0, 2]] = vocabs.raw_entities.index_of("Q9");

        let encoded = Array3::zeros((1, 3, ENTITY_DIM));
        let log_probs = scorer
            .relation_log_probs(encoded.view(), &labels, &mut kg_lookup(&vocabs))
            .unwrap();
        assert_eq!(log_probs[[0, 2, 0]], MIN_LOG_PROB);
    }

    #[test]
    fn test_parent_not_in_cache_is_floored() {
        let vocabs = vocabs();
        let scorer = scorer(NewEntityMode::Shortlist, &vocabs);
        let mut labels = derived_labels(&vocabs);
        // The parent was never mentioned in this slot.
        labels.entity_ids[[0, 0]] = PADDING_INDEX;

        let encoded = Array3::zeros((1, 3, ENTITY_DIM));
        let log_probs = scorer
            .parent_log_probs(encoded.view(), &labels, &mut fresh_cache(1))
            .unwrap();
        assert!(log_probs[[0, 2, 0]] <= MIN_LOG_PROB);
        assert!(log_probs[[0, 2, 0]].is_finite());
    }

    #[test]
    fn test_kg_loss_zero_without_derived_mentions() {
        let vocabs = vocabs();
        let mut scorer = scorer(NewEntityMode::FullVocab, &vocabs);
        let labels = empty_labels(2, 4);
        let encoded = Array3::from_elem((2, 4, WIDTH), 0.25);
        let mask = Array2::from_elem((2, 4), true);

        let output = scorer
            .score(
                encoded.view(),
                mask.view(),
                &labels,
                &mut fresh_cache(2),
                &mut kg_lookup(&vocabs),
            )
            .unwrap();
        assert_eq!(output.kg_entity_loss, 0.0);
        assert_eq!(output.new_entity_loss, 0.0);
    }

    #[test]
    fn test_full_vocab_scores_new_mentions() {
        let vocabs = vocabs();
        let mut scorer = scorer(NewEntityMode::FullVocab, &vocabs);
        assert_eq!(scorer.new_entity_mode(), NewEntityMode::FullVocab);
        let labels = derived_labels(&vocabs);
        let encoded = Array3::from_elem((1, 3, WIDTH), 0.1);
        let mask = Array2::from_elem((1, 3), true);

        let output = scorer
            .score(
                encoded.view(),
                mask.view(),
                &labels,
                &mut fresh_cache(1),
                &mut kg_lookup(&vocabs),
            )
            .unwrap();
        assert!(output.new_entity_loss > 0.0);
        assert!(output.loss.is_finite());
    }

    #[test]
    fn test_full_vocab_ignores_derived_mentions() {
        let vocabs = vocabs();
        let mut scorer = scorer(NewEntityMode::FullVocab, &vocabs);
        let mut labels = derived_labels(&vocabs);
        // Keep only the derived mention at t = 2.
        labels.mention_type[[0, 0]] = MentionType::None.index();
        labels.entity_ids[[0, 0]] = PADDING_INDEX;
        labels.raw_entity_ids[[0, 0]] = PADDING_INDEX;
        labels.shortlist_inds[[0, 0]] = 0;
        let encoded = Array3::from_elem((1, 3, WIDTH), 0.1);
        let mask = Array2::from_elem((1, 3), true);

        let output = scorer
            .score(
                encoded.view(),
                mask.view(),
                &labels,
                &mut fresh_cache(1),
                &mut kg_lookup(&vocabs),
            )
            .unwrap();
        assert_eq!(output.new_entity_loss, 0.0);
        // Nothing was counted, so both accuracies stay at their empty value.
        let metrics = scorer.metrics(false);
        assert_eq!(metrics.new_ent_acc, 0.0);
        assert_eq!(metrics.new_ent_acc_20, 0.0);
    }

    #[test]
    fn test_regularization_terms() {
        let vocabs = vocabs();
        let mut config = config(NewEntityMode::Shortlist);
        config.alpha = 2.0;
        config.beta = 1.0;
        let mut scorer = StructuredScorer::new(&config, &vocabs, &mut StdRng::seed_from_u64(5));
        let labels = empty_labels(1, 2);
        let mut encoded = Array3::zeros((1, 2, WIDTH));
        encoded.slice_mut(s![0, 1, ..]).fill(1.0);
        let mask = Array2::from_elem((1, 2), true);

        let output = scorer
            .score(
                encoded.view(),
                mask.view(),
                &labels,
                &mut fresh_cache(1),
                &mut kg_lookup(&vocabs),
            )
            .unwrap();
        let base = output.mention_type_loss + output.new_entity_loss + output.kg_entity_loss;
        // mean(x^2) = 0.5, mean(diff^2) = 1.
        assert!((output.loss - (base + 2.0 * 0.5 + 1.0)).abs() < 1e-5);
    }

    #[test]
    fn test_wrong_width_is_shape_error() {
        let vocabs = vocabs();
        let mut scorer = scorer(NewEntityMode::Shortlist, &vocabs);
        let labels = empty_labels(1, 2);
        let encoded = Array3::zeros((1, 2, WIDTH + 1));
        let mask = Array2::from_elem((1, 2), true);

        let result = scorer.score(
            encoded.view(),
            mask.view(),
            &labels,
            &mut fresh_cache(1),
            &mut kg_lookup(&vocabs),
        );
        assert!(matches!(result, Err(KglmError::Shape(_))));
    }

    #[test]
    fn test_metrics_reset() {
        let vocabs = vocabs();
        let mut scorer = scorer(NewEntityMode::Shortlist, &vocabs);
        let labels = derived_labels(&vocabs);
        let encoded = Array3::zeros((1, 3, WIDTH));
        let mask = Array2::from_elem((1, 3), true);
        scorer
            .score(
                encoded.view(),
                mask.view(),
                &labels,
                &mut fresh_cache(1),
                &mut kg_lookup(&vocabs),
            )
            .unwrap();

        assert!(scorer.metrics(true).mention_type > 0.0);
        assert_eq!(scorer.metrics(false), ScorerMetrics::default());
    }

    #[test]
    fn test_mention_type_f1_tracks_predictions() {
        let vocabs = vocabs();
        let labels = derived_labels(&vocabs);
        let encoded = Array3::zeros((1, 3, WIDTH));
        let mask = Array2::from_elem((1, 3), true);

        // Gold types are [new, none, derived]; the bias makes every prediction `kind`.
        for kind in [MentionType::New, MentionType::Derived] {
            let mut scorer = scorer(NewEntityMode::Shortlist, &vocabs);
            let mut bias = Array1::zeros(3);
            bias[kind.index()] = 5.0;
            scorer.mention_type_head =
                Linear::from_parts(Array2::zeros((3, TOKEN_DIM)), bias).unwrap();
            scorer
                .score(
                    encoded.view(),
                    mask.view(),
                    &labels,
                    &mut fresh_cache(1),
                    &mut kg_lookup(&vocabs),
                )
                .unwrap();

            let metrics = scorer.metrics(true);
            let (hit, missed) = match kind {
                MentionType::New => (
                    (metrics.new_p, metrics.new_r, metrics.new_f1),
                    (metrics.kg_p, metrics.kg_r, metrics.kg_f1),
                ),
                _ => (
                    (metrics.kg_p, metrics.kg_r, metrics.kg_f1),
                    (metrics.new_p, metrics.new_r, metrics.new_f1),
                ),
            };
            // One of three predictions is right and the single gold is found.
            assert!((hit.0 - 1.0 / 3.0).abs() < 1e-6);
            assert_eq!(hit.1, 1.0);
            assert!((hit.2 - 0.5).abs() < 1e-6);
            assert_eq!(missed, (0.0, 0.0, 0.0));
        }
    }
}
