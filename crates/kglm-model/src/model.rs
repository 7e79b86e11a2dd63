//! KGLM model
//!
//! Wires the sequence encoder, the structured scorer and the knowledge graph
//! lookup together. Cross-call state lives in the caller's [`SessionState`].

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use kglm_core::{KglmError, KnowledgeGraph, ModelConfig, Result, Vocabularies};
use kglm_data::Batch;
use kglm_graph::KnowledgeGraphLookup;

use crate::encoder::{ElmanEncoder, SequenceEncoder};
use crate::metrics::ScorerMetrics;
use crate::scorer::{ScorerOutput, StructuredScorer};
use crate::session::SessionState;

/// Encoder + scorer over one set of vocabularies and one knowledge graph
pub struct KglmModel<E: SequenceEncoder = ElmanEncoder> {
    encoder: E,
    scorer: StructuredScorer,
    kg_lookup: KnowledgeGraphLookup,
    cutoff: usize,
}

impl KglmModel<ElmanEncoder> {
    /// Deterministically initialised model from `config.seed`
    pub fn from_config(
        config: &ModelConfig,
        vocabs: Arc<Vocabularies>,
        graph: Arc<dyn KnowledgeGraph>,
    ) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let output_dim = config.token_dim + 2 * config.entity_dim;
        let encoder =
            ElmanEncoder::new(vocabs.tokens.len(), config.token_dim, output_dim, &mut rng);
        let scorer = StructuredScorer::new(config, &vocabs, &mut rng);
        let kg_lookup = KnowledgeGraphLookup::new(graph, vocabs);

        tracing::info!(
            "Initialised model: token_dim={}, entity_dim={}, new entities by {:?}",
            config.token_dim,
            config.entity_dim,
            config.new_entity_mode
        );
        Self::new(encoder, scorer, kg_lookup, config.cutoff)
    }
}

impl<E: SequenceEncoder> KglmModel<E> {
    pub fn new(
        encoder: E,
        scorer: StructuredScorer,
        kg_lookup: KnowledgeGraphLookup,
        cutoff: usize,
    ) -> Result<Self> {
        if encoder.output_dim() != scorer.input_dim() {
            return Err(KglmError::Shape(format!(
                "encoder produces {} features, scorer expects {}",
                encoder.output_dim(),
                scorer.input_dim()
            )));
        }
        Ok(Self {
            encoder,
            scorer,
            kg_lookup,
            cutoff,
        })
    }

    /// Fresh session state sized for this model
    pub fn session(&self) -> SessionState {
        SessionState::new(self.cutoff)
    }

    /// Encode `batch` from the session's carried state and score it.
    ///
    /// Returns `None` for batches without labels; the session state still
    /// advances.
    pub fn forward(
        &mut self,
        session: &mut SessionState,
        batch: &Batch,
    ) -> Result<Option<ScorerOutput>> {
        if batch.reset.len() != batch.batch_size() {
            return Err(KglmError::Shape(format!(
                "{} reset flags for {} slots",
                batch.reset.len(),
                batch.batch_size()
            )));
        }
        session.apply_resets(&batch.reset);

        let (encoded, state) = self
            .encoder
            .encode(batch.source.view(), session.encoder_state.as_ref())?;
        session.encoder_state = Some(state);

        let Some(labels) = batch.labels.as_ref() else {
            tracing::debug!("Batch has no labels; encoding only");
            return Ok(None);
        };

        self.scorer
            .score(
                encoded.view(),
                batch.mask.view(),
                labels,
                &mut session.recent_entities,
                &mut self.kg_lookup,
            )
            .map(Some)
    }

    pub fn metrics(&mut self, reset: bool) -> ScorerMetrics {
        self.scorer.metrics(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Phase;
    use kglm_core::{Annotation, Document, EncodingMode, NewEntityMode};
    use kglm_data::{
        build_vocabularies, AliasDatabase, AnnotationEncoder, ChunkedBatcher, KglmInstance,
    };
    use kglm_graph::{InMemoryKnowledgeGraph, Triple};

    fn words(text: &str) -> Vec<String> {
        text.split_whitespace().map(String::from).collect()
    }

    fn setup(
        mode: EncodingMode,
    ) -> (Vec<KglmInstance>, Arc<Vocabularies>, Arc<dyn KnowledgeGraph>) {
        let graph = InMemoryKnowledgeGraph::from_triples([Triple::new("Q84", "P17", "Q145")]);
        let encoder = AnnotationEncoder::builder()
            .mode(mode)
            .alias_database(Arc::new(AliasDatabase::new()))
            .build()
            .unwrap();
        let documents = [
            Document::new(vec![words("London is in the United Kingdom .")]).with_annotations(vec![
                Annotation::new_mention("Q84", 0, 1),
                Annotation::derived_mention("Q145", [("Q84", "P17")], 4, 6),
            ]),
            Document::new(vec![words("Nothing here")]).with_annotations(vec![]),
        ];
        let instances: Vec<KglmInstance> = documents.iter().map(|d| encoder.encode(d)).collect();
        let mut vocabs = build_vocabularies(&instances);
        graph.extend_vocabularies(&mut vocabs);
        let graph: Arc<dyn KnowledgeGraph> = Arc::new(graph);
        (instances, Arc::new(vocabs), graph)
    }

    fn config() -> ModelConfig {
        ModelConfig {
            token_dim: 6,
            entity_dim: 4,
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_forward_over_chunked_batches() {
        let (instances, vocabs, graph) = setup(EncodingMode::Generative);
        let mut model = KglmModel::from_config(&config(), Arc::clone(&vocabs), graph).unwrap();
        let mut session = model.session();

        let batches = ChunkedBatcher::new(2, 3).batches(instances, &vocabs);
        let mut scored = 0;
        for batch in batches {
            let output = model.forward(&mut session, &batch.unwrap()).unwrap().unwrap();
            assert!(output.loss.is_finite());
            assert!(output.kg_entity_loss >= 0.0);
            scored += 1;
        }
        assert!(scored >= 3);

        let metrics = model.metrics(true);
        assert!(metrics.mention_type > 0.0);
        assert!(metrics.parent_ppl > 0.0);
    }

    #[test]
    fn test_same_seed_same_losses() {
        let (instances, vocabs, graph) = setup(EncodingMode::Discriminative);
        let config = ModelConfig {
            new_entity_mode: NewEntityMode::FullVocab,
            ..config()
        };

        let mut losses = Vec::new();
        for _ in 0..2 {
            let mut model =
                KglmModel::from_config(&config, Arc::clone(&vocabs), Arc::clone(&graph)).unwrap();
            let mut session = model.session();
            let batch = ChunkedBatcher::new(2, 20)
                .batches(instances.clone(), &vocabs)
                .next()
                .unwrap()
                .unwrap();
            losses.push(model.forward(&mut session, &batch).unwrap().unwrap());
        }
        assert_eq!(losses[0], losses[1]);
    }

    #[test]
    fn test_unlabelled_batch_advances_state_only() {
        let (_, vocabs, graph) = setup(EncodingMode::Generative);
        let mut model = KglmModel::from_config(&config(), Arc::clone(&vocabs), graph).unwrap();
        let mut session = model.session();

        let encoder = AnnotationEncoder::builder()
            .alias_database(Arc::new(AliasDatabase::new()))
            .build()
            .unwrap();
        let instance = encoder.encode(&Document::new(vec![words("London is")]));
        let batch = Batch::collate(&[instance], &vocabs, vec![true]).unwrap();

        assert!(model.forward(&mut session, &batch).unwrap().is_none());
        assert_eq!(session.encoder_state.as_ref().map(|s| s.batch_size()), Some(1));
    }

    #[test]
    fn test_phase_switch_then_new_batch_size() {
        let (instances, vocabs, graph) = setup(EncodingMode::Generative);
        let mut model = KglmModel::from_config(&config(), Arc::clone(&vocabs), graph).unwrap();
        let mut session = model.session();

        let batch = ChunkedBatcher::new(2, 4)
            .batches(instances.clone(), &vocabs)
            .next()
            .unwrap()
            .unwrap();
        model.forward(&mut session, &batch).unwrap();

        session.enter_phase(Phase::Evaluation);
        assert!(session.encoder_state.is_none());

        let batch = ChunkedBatcher::new(1, 4).batches(instances, &vocabs).next().unwrap().unwrap();
        assert!(model.forward(&mut session, &batch).unwrap().is_some());
    }

    #[test]
    fn test_mismatched_encoder_rejected() {
        let (_, vocabs, graph) = setup(EncodingMode::Generative);
        let config = config();
        let mut rng = StdRng::seed_from_u64(1);
        let encoder = ElmanEncoder::new(vocabs.tokens.len(), 6, 5, &mut rng);
        let scorer = StructuredScorer::new(&config, &vocabs, &mut rng);
        let lookup = KnowledgeGraphLookup::new(graph, Arc::clone(&vocabs));
        assert!(KglmModel::new(encoder, scorer, lookup, 30).is_err());
    }
}
