//! Batch collation
//!
//! Indexes encoded instances with the field vocabularies and pads them into
//! fixed-shape arrays. Batch row `b` is batch slot `b`.

use ndarray::{Array2, Array3};

use kglm_core::{EncodingMode, KglmError, Result, Vocabularies, Vocabulary};

use crate::encoder::{KglmInstance, LabelArrays};

/// Indexed label arrays for a batch
#[derive(Debug, Clone)]
pub struct LabelBatch {
    /// (batch, time) mention type class indices
    pub mention_type: Array2<usize>,
    /// (batch, time) raw entity indices
    pub raw_entity_ids: Array2<usize>,
    /// (batch, time) normalized entity indices
    pub entity_ids: Array2<usize>,
    /// (batch, time, parents) normalized parent indices
    pub parent_ids: Array3<usize>,
    /// (batch, time, parents) relation indices
    pub relations: Array3<usize>,
    /// (batch, shortlist) shortlisted entity indices
    pub shortlist: Array2<usize>,
    /// (batch, time) positions in the shortlist
    pub shortlist_inds: Array2<usize>,
    /// (batch, time) remaining mention lengths
    pub mention_lengths: Array2<usize>,
    /// (batch, time) alias ranks of the next token; generative mode only
    pub alias_copy_inds: Option<Array2<usize>>,
}

/// A padded batch of instances (or chunks of instances)
#[derive(Debug, Clone)]
pub struct Batch {
    pub mode: EncodingMode,
    /// (batch, time) source token indices
    pub source: Array2<usize>,
    /// (batch, time) target token indices; generative mode only
    pub target: Option<Array2<usize>>,
    /// (batch, time) true for real (non-padding) positions
    pub mask: Array2<bool>,
    /// Per-slot flag: true when this batch starts a new document in the slot
    pub reset: Vec<bool>,
    pub labels: Option<LabelBatch>,
}

impl Batch {
    /// Collate instances into a batch; `reset[b]` belongs to `instances[b]`
    pub fn collate(
        instances: &[KglmInstance],
        vocabs: &Vocabularies,
        reset: Vec<bool>,
    ) -> Result<Self> {
        let Some(first) = instances.first() else {
            return Err(KglmError::Data("cannot collate an empty batch".to_string()));
        };
        if reset.len() != instances.len() {
            return Err(KglmError::Shape(format!(
                "{} reset flags for {} instances",
                reset.len(),
                instances.len()
            )));
        }
        let mode = first.mode;
        if instances.iter().any(|i| i.mode != mode) {
            return Err(KglmError::Data(
                "instances encoded with different modes cannot share a batch".to_string(),
            ));
        }
        let labelled = first.labels.is_some();
        if instances.iter().any(|i| i.labels.is_some() != labelled) {
            return Err(KglmError::Data(
                "batch mixes labelled and unlabelled instances".to_string(),
            ));
        }

        let batch_size = instances.len();
        let max_len = instances.iter().map(KglmInstance::len).max().unwrap_or(0);

        let mut source = Array2::zeros((batch_size, max_len));
        let mut mask = Array2::from_elem((batch_size, max_len), false);
        let mut target = match mode {
            EncodingMode::Generative => Some(Array2::zeros((batch_size, max_len))),
            EncodingMode::Discriminative => None,
        };

        for (b, instance) in instances.iter().enumerate() {
            for (t, token) in instance.source().iter().enumerate() {
                source[[b, t]] = vocabs.tokens.index_of(token);
                mask[[b, t]] = true;
            }
            if let (Some(target), Some(tokens)) = (target.as_mut(), instance.target()) {
                for (t, token) in tokens.iter().enumerate() {
                    target[[b, t]] = vocabs.tokens.index_of(token);
                }
            }
        }

        let labels = if labelled {
            let arrays: Vec<&LabelArrays> =
                instances.iter().filter_map(|i| i.labels.as_ref()).collect();
            Some(collate_labels(&arrays, vocabs, max_len)?)
        } else {
            None
        };

        tracing::debug!(
            "Collated batch: {} slots x {} positions ({})",
            batch_size,
            max_len,
            mode
        );

        Ok(Self {
            mode,
            source,
            target,
            mask,
            reset,
            labels,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.source.nrows()
    }

    pub fn sequence_length(&self) -> usize {
        self.source.ncols()
    }

    /// Number of real positions
    pub fn num_tokens(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

fn collate_labels(
    arrays: &[&LabelArrays],
    vocabs: &Vocabularies,
    max_len: usize,
) -> Result<LabelBatch> {
    let batch_size = arrays.len();
    let max_parents = arrays
        .iter()
        .flat_map(|a| a.parent_ids.iter().chain(a.relations.iter()))
        .map(Vec::len)
        .max()
        .unwrap_or(1)
        .max(1);
    let max_shortlist = arrays.iter().map(|a| a.shortlist.len()).max().unwrap_or(1);
    let generative = arrays.iter().all(|a| a.alias_copy_inds.is_some());

    let mut batch = LabelBatch {
        mention_type: Array2::zeros((batch_size, max_len)),
        raw_entity_ids: Array2::zeros((batch_size, max_len)),
        entity_ids: Array2::zeros((batch_size, max_len)),
        parent_ids: Array3::zeros((batch_size, max_len, max_parents)),
        relations: Array3::zeros((batch_size, max_len, max_parents)),
        shortlist: Array2::zeros((batch_size, max_shortlist)),
        shortlist_inds: Array2::zeros((batch_size, max_len)),
        mention_lengths: Array2::zeros((batch_size, max_len)),
        alias_copy_inds: generative.then(|| Array2::zeros((batch_size, max_len))),
    };

    for (b, labels) in arrays.iter().enumerate() {
        if labels.len() > max_len {
            return Err(KglmError::Shape(format!(
                "slot {b} has {} labels for at most {max_len} positions",
                labels.len()
            )));
        }
        for t in 0..labels.len() {
            batch.mention_type[[b, t]] = labels.mention_type[t].index();
            batch.raw_entity_ids[[b, t]] = vocabs.raw_entities.index_of(&labels.raw_entity_ids[t]);
            batch.entity_ids[[b, t]] = vocabs.entities.index_of(&labels.entity_ids[t]);
            batch.shortlist_inds[[b, t]] = labels.shortlist_inds[t];
            batch.mention_lengths[[b, t]] = labels.mention_lengths[t];
            for (p, parent) in labels.parent_ids[t].iter().enumerate() {
                batch.parent_ids[[b, t, p]] = vocabs.entities.index_of(parent);
            }
            for (p, relation) in labels.relations[t].iter().enumerate() {
                batch.relations[[b, t, p]] = vocabs.relations.index_of(relation);
            }
        }
        for (s, entity) in labels.shortlist.iter().enumerate() {
            batch.shortlist[[b, s]] = vocabs.entities.index_of(entity);
        }
        if let (Some(out), Some(alias_copy_inds)) =
            (batch.alias_copy_inds.as_mut(), labels.alias_copy_inds.as_ref())
        {
            for (t, &index) in alias_copy_inds.iter().enumerate() {
                out[[b, t]] = index;
            }
        }
    }

    Ok(batch)
}

/// Add every token, entity, raw entity and relation of `instance` to `vocabs`
pub fn extend_vocabularies(vocabs: &mut Vocabularies, instance: &KglmInstance) {
    add_all(&mut vocabs.tokens, instance.tokens.iter());
    if let Some(labels) = &instance.labels {
        add_all(&mut vocabs.raw_entities, labels.raw_entity_ids.iter());
        add_all(&mut vocabs.entities, labels.entity_ids.iter());
        add_all(&mut vocabs.entities, labels.shortlist.iter());
        add_all(&mut vocabs.entities, labels.parent_ids.iter().flatten());
        add_all(&mut vocabs.relations, labels.relations.iter().flatten());
    }
}

/// Build vocabularies covering every field of `instances`
pub fn build_vocabularies<'a>(
    instances: impl IntoIterator<Item = &'a KglmInstance>,
) -> Vocabularies {
    let mut vocabs = Vocabularies::new();
    for instance in instances {
        extend_vocabularies(&mut vocabs, instance);
    }
    vocabs
}

fn add_all<'a>(vocab: &mut Vocabulary, tokens: impl Iterator<Item = &'a String>) {
    for token in tokens {
        vocab.add_token(token);
    }
}
