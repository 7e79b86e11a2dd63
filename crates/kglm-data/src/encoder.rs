//! Annotation encoder
//!
//! Converts one document's token stream plus its mention-span annotations
//! into dense, token-aligned label arrays:
//!
//! - mention type (none / new / derived)
//! - normalized and raw entity ids
//! - parent ids and relations (derived mentions, capped at `max_parents`)
//! - shortlist indices (new mentions)
//! - alias-copy indices (generative mode)
//! - remaining-mention-length counters
//!
//! Arrays have one entry per target position, i.e. `len(tokens) - 1` after
//! the start/end sentinels are added.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use kglm_core::{
    AliasLookup, Annotation, ConfigError, DataConfig, Document, EncodingMode, KglmError,
    MentionType, Result, DEFAULT_MAX_PARENTS, END_TOKEN, PADDING_TOKEN, START_TOKEN,
};

use crate::normalize::normalize_entity_id;

// ============================================================================
// Encoded instances
// ============================================================================

/// Per-position supervision arrays for one document (or one chunk of it)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelArrays {
    pub mention_type: Vec<MentionType>,
    pub raw_entity_ids: Vec<String>,
    pub entity_ids: Vec<String>,
    pub parent_ids: Vec<Vec<String>>,
    pub relations: Vec<Vec<String>>,
    pub shortlist: Vec<String>,
    pub shortlist_inds: Vec<usize>,
    pub mention_lengths: Vec<usize>,
    /// Present in generative mode only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias_copy_inds: Option<Vec<usize>>,
}

impl LabelArrays {
    fn empty(len: usize, mode: EncodingMode) -> Self {
        Self {
            mention_type: vec![MentionType::None; len],
            raw_entity_ids: vec![PADDING_TOKEN.to_string(); len],
            entity_ids: vec![PADDING_TOKEN.to_string(); len],
            parent_ids: vec![padding_list(); len],
            relations: vec![padding_list(); len],
            shortlist: vec![PADDING_TOKEN.to_string()],
            shortlist_inds: vec![0; len],
            mention_lengths: vec![1; len],
            alias_copy_inds: match mode {
                EncodingMode::Generative => Some(vec![0; len]),
                EncodingMode::Discriminative => None,
            },
        }
    }

    /// Number of target positions
    pub fn len(&self) -> usize {
        self.mention_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mention_type.is_empty()
    }

    /// Labels for positions `[start, start + len)`; the shortlist is kept whole
    fn slice(&self, start: usize, len: usize) -> Self {
        let range = start..start + len;
        Self {
            mention_type: self.mention_type[range.clone()].to_vec(),
            raw_entity_ids: self.raw_entity_ids[range.clone()].to_vec(),
            entity_ids: self.entity_ids[range.clone()].to_vec(),
            parent_ids: self.parent_ids[range.clone()].to_vec(),
            relations: self.relations[range.clone()].to_vec(),
            shortlist: self.shortlist.clone(),
            shortlist_inds: self.shortlist_inds[range.clone()].to_vec(),
            mention_lengths: self.mention_lengths[range.clone()].to_vec(),
            alias_copy_inds: self.alias_copy_inds.as_ref().map(|a| a[range].to_vec()),
        }
    }
}

fn padding_list() -> Vec<String> {
    vec![PADDING_TOKEN.to_string()]
}

/// A mention span recovered from label arrays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedMention {
    pub kind: MentionType,
    pub entity_id: String,
    pub raw_entity_id: String,
    pub parent_ids: Vec<String>,
    pub relations: Vec<String>,
    /// `[start, end)` over the flattened tokens (start sentinel excluded)
    pub span: [usize; 2],
}

/// One encoded document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KglmInstance {
    /// Alignment the labels were written with
    pub mode: EncodingMode,

    /// Tokens including the start and end sentinels
    pub tokens: Vec<String>,

    /// Label arrays; absent for unannotated documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelArrays>,
}

impl KglmInstance {
    /// Number of (source, target) positions
    pub fn len(&self) -> usize {
        self.tokens.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tokens fed to the sequence encoder
    pub fn source(&self) -> &[String] {
        &self.tokens[..self.len()]
    }

    /// Next-token targets; generative mode only
    pub fn target(&self) -> Option<&[String]> {
        match self.mode {
            EncodingMode::Generative => self.tokens.get(1..),
            EncodingMode::Discriminative => None,
        }
    }

    /// Positions `[start, start + len)` as a standalone instance
    ///
    /// Both bounds are clamped to the instance length, so `chunk(self.len(), 0)`
    /// is a valid empty chunk.
    pub fn chunk(&self, start: usize, len: usize) -> Self {
        let start = start.min(self.len());
        let len = len.min(self.len() - start);
        Self {
            mode: self.mode,
            tokens: self.tokens[start..=start + len].to_vec(),
            labels: self.labels.as_ref().map(|l| l.slice(start, len)),
        }
    }

    /// Reconstruct mention spans from the label arrays
    ///
    /// Consecutive positions belong to one mention while they share a raw id
    /// and mention type and the remaining-length counter keeps counting down,
    /// so adjacent mentions of the same entity stay separate.
    pub fn mentions(&self) -> Vec<DecodedMention> {
        let Some(labels) = &self.labels else {
            return Vec::new();
        };
        let offset = self.mode.offset();
        let mut mentions: Vec<DecodedMention> = Vec::new();
        let mut previous: Option<usize> = None;

        for position in 0..labels.len() {
            let kind = labels.mention_type[position];
            if !kind.is_mention() {
                previous = None;
                continue;
            }

            let continues = previous.is_some_and(|p| {
                labels.mention_type[p] == kind
                    && labels.raw_entity_ids[p] == labels.raw_entity_ids[position]
                    && labels.mention_lengths[p] > 1
                    && labels.mention_lengths[p] == labels.mention_lengths[position] + 1
            });

            if continues {
                if let Some(last) = mentions.last_mut() {
                    last.span[1] += 1;
                }
            } else {
                let start = position.saturating_sub(offset);
                let (parent_ids, relations) = match kind {
                    MentionType::Derived => (
                        labels.parent_ids[position].clone(),
                        labels.relations[position].clone(),
                    ),
                    _ => (Vec::new(), Vec::new()),
                };
                mentions.push(DecodedMention {
                    kind,
                    entity_id: labels.entity_ids[position].clone(),
                    raw_entity_id: labels.raw_entity_ids[position].clone(),
                    parent_ids,
                    relations,
                    span: [start, start + 1],
                });
            }
            previous = Some(position);
        }

        mentions
    }
}

// ============================================================================
// Shortlist
// ============================================================================

/// Append-only, order-of-first-appearance list of entity ids
#[derive(Debug)]
struct Shortlist {
    entries: Vec<String>,
    reverse: HashMap<String, usize>,
}

impl Shortlist {
    fn new() -> Self {
        let mut reverse = HashMap::new();
        reverse.insert(PADDING_TOKEN.to_string(), 0);
        Self {
            entries: vec![PADDING_TOKEN.to_string()],
            reverse,
        }
    }

    fn index_or_insert(&mut self, entity_id: &str) -> usize {
        if let Some(&index) = self.reverse.get(entity_id) {
            return index;
        }
        let index = self.entries.len();
        self.entries.push(entity_id.to_string());
        self.reverse.insert(entity_id.to_string(), index);
        index
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// Builder for [`AnnotationEncoder`]
#[derive(Default)]
pub struct AnnotationEncoderBuilder {
    mode: EncodingMode,
    max_parents: Option<usize>,
    alias_database: Option<Arc<dyn AliasLookup>>,
}

impl AnnotationEncoderBuilder {
    pub fn mode(mut self, mode: EncodingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the mode from its configuration string
    pub fn mode_str(mut self, mode: &str) -> Result<Self> {
        self.mode = mode.parse()?;
        Ok(self)
    }

    pub fn max_parents(mut self, max_parents: usize) -> Self {
        self.max_parents = Some(max_parents);
        self
    }

    pub fn alias_database(mut self, alias_database: Arc<dyn AliasLookup>) -> Self {
        self.alias_database = Some(alias_database);
        self
    }

    pub fn build(self) -> Result<AnnotationEncoder> {
        let alias_database = self
            .alias_database
            .ok_or_else(|| ConfigError::MissingRequired("alias database".to_string()))?;
        let max_parents = self.max_parents.unwrap_or(DEFAULT_MAX_PARENTS);
        if max_parents == 0 {
            return Err(KglmError::Config("max_parents must be at least 1".to_string()));
        }

        Ok(AnnotationEncoder {
            mode: self.mode,
            max_parents,
            alias_database,
        })
    }
}

/// Encodes annotated documents into [`KglmInstance`]s
pub struct AnnotationEncoder {
    mode: EncodingMode,
    max_parents: usize,
    alias_database: Arc<dyn AliasLookup>,
}

impl std::fmt::Debug for AnnotationEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotationEncoder")
            .field("mode", &self.mode)
            .field("max_parents", &self.max_parents)
            .finish_non_exhaustive()
    }
}

impl AnnotationEncoder {
    pub fn builder() -> AnnotationEncoderBuilder {
        AnnotationEncoderBuilder::default()
    }

    /// Create from the data section of the configuration
    pub fn from_config(config: &DataConfig, alias_database: Arc<dyn AliasLookup>) -> Result<Self> {
        Self::builder()
            .mode(config.mode)
            .max_parents(config.max_parents)
            .alias_database(alias_database)
            .build()
    }

    pub fn mode(&self) -> EncodingMode {
        self.mode
    }

    pub fn max_parents(&self) -> usize {
        self.max_parents
    }

    /// Encode one document
    pub fn encode(&self, document: &Document) -> KglmInstance {
        let mut tokens = Vec::with_capacity(document.num_tokens() + 2);
        tokens.push(START_TOKEN.to_string());
        tokens.extend(document.tokens.iter().flatten().cloned());
        tokens.push(END_TOKEN.to_string());

        let labels = document
            .annotations
            .as_deref()
            .map(|annotations| self.encode_annotations(&tokens, annotations));

        KglmInstance {
            mode: self.mode,
            tokens,
            labels,
        }
    }

    fn encode_annotations(&self, tokens: &[String], annotations: &[Annotation]) -> LabelArrays {
        let num_targets = tokens.len() - 1;
        let offset = self.mode.offset();
        let mut labels = LabelArrays::empty(num_targets, self.mode);
        let mut shortlist = Shortlist::new();
        let mut skipped = 0usize;

        for annotation in annotations {
            let Some(entity_id) = normalize_entity_id(&annotation.id) else {
                tracing::debug!("Skipping untrackable entity id {:?}", annotation.id);
                skipped += 1;
                continue;
            };
            let shortlist_ind = shortlist.index_or_insert(&entity_id);

            let kind = if annotation.is_new() {
                MentionType::New
            } else {
                MentionType::Derived
            };
            let (parent_ids, relations) = match kind {
                MentionType::Derived => self.derived_parents(annotation),
                _ => (padding_list(), padding_list()),
            };

            let span_length = annotation.len();
            for (k, i) in (annotation.start()..annotation.end()).enumerate() {
                let position = i + offset;
                if position >= num_targets {
                    tracing::debug!(
                        "Span {:?} of {} runs past {} targets; truncating",
                        annotation.span,
                        annotation.id,
                        num_targets
                    );
                    break;
                }

                // Later annotations overwrite earlier ones at shared positions.
                labels.mention_type[position] = kind;
                labels.raw_entity_ids[position] = annotation.id.clone();
                labels.entity_ids[position] = entity_id.clone();
                labels.parent_ids[position] = parent_ids.clone();
                labels.relations[position] = relations.clone();
                labels.shortlist_inds[position] = match kind {
                    MentionType::New => shortlist_ind,
                    _ => 0,
                };
                labels.mention_lengths[position] = span_length - k;
                if let Some(alias_copy_inds) = labels.alias_copy_inds.as_mut() {
                    alias_copy_inds[position] = self
                        .alias_database
                        .token_to_alias_index(&annotation.id, &tokens[i + 1]);
                }
            }
        }

        if skipped > 0 {
            tracing::debug!("Skipped {} of {} annotations", skipped, annotations.len());
        }

        labels.shortlist = shortlist.entries;
        labels
    }

    /// Normalized parents and relations, each capped at `max_parents`
    ///
    /// Untrackable parents become padding in place so both lists stay aligned.
    fn derived_parents(&self, annotation: &Annotation) -> (Vec<String>, Vec<String>) {
        let parent_ids: Vec<String> = annotation
            .parent_id
            .iter()
            .take(self.max_parents)
            .map(|p| normalize_entity_id(p).unwrap_or_else(|| PADDING_TOKEN.to_string()))
            .collect();
        let relations: Vec<String> = annotation
            .relation
            .iter()
            .take(self.max_parents)
            .cloned()
            .collect();

        let parent_ids = if parent_ids.is_empty() {
            padding_list()
        } else {
            parent_ids
        };
        let relations = if relations.is_empty() {
            padding_list()
        } else {
            relations
        };
        (parent_ids, relations)
    }
}

// ============================================================================
// Tests
// ============================================================================
