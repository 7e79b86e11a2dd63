//! KGLM Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout the KGLM workspace:
//! - Annotated documents (tokens + mention-span annotations)
//! - Mention types and encoding modes
//! - Common error types
//! - Namespaced vocabularies
//! - Traits for the alias database and knowledge graph the model consumes
//! - Configuration management

pub mod config;
pub mod vocab;

pub use config::{
    ConfigError, DataConfig, KglmConfig, LoggingConfig, ModelConfig, NewEntityMode,
};
pub use vocab::{Vocabularies, Vocabulary};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Sentinels and constants
// ============================================================================

/// Padding sentinel; always index 0 in every vocabulary and shortlist
pub const PADDING_TOKEN: &str = "@@PADDING@@";

/// Out-of-vocabulary sentinel; always index 1 in every vocabulary
pub const OOV_TOKEN: &str = "@@UNKNOWN@@";

/// Start-of-document sentinel
pub const START_TOKEN: &str = "@@START@@";

/// End-of-document sentinel
pub const END_TOKEN: &str = "@@END@@";

/// Relation marker for mentions that introduce a new entity
pub const NEW_RELATION: &str = "@@NEW@@";

/// Normalized id shared by all date literals
pub const DATE_ENTITY: &str = "@@DATE@@";

/// Normalized id shared by all quantity literals
pub const QUANTITY_ENTITY: &str = "@@QUANTITY@@";

/// Default cap on the number of parents kept per derived mention
pub const DEFAULT_MAX_PARENTS: usize = 10;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for KGLM operations
#[derive(Error, Debug)]
pub enum KglmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ConfigError> for KglmError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KglmError>;

// ============================================================================
// Documents and Annotations
// ============================================================================

/// One persisted document: nested token groups plus optional mention annotations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    /// Token groups (usually sentences), flattened before encoding
    pub tokens: Vec<Vec<String>>,

    /// Mention-span annotations; absent for unannotated text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<Annotation>>,
}

impl Document {
    /// Create an unannotated document from token groups
    pub fn new(tokens: Vec<Vec<String>>) -> Self {
        Self {
            tokens,
            annotations: None,
        }
    }

    /// Attach annotations
    pub fn with_annotations(mut self, annotations: Vec<Annotation>) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Number of tokens after flattening (sentinels excluded)
    pub fn num_tokens(&self) -> usize {
        self.tokens.iter().map(Vec::len).sum()
    }
}

/// A mention span referring to one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Raw entity identifier (e.g. "Q42", "T1952-03-11", "V+12")
    pub id: String,

    /// Parent entities the mention is derived from, in priority order
    #[serde(default)]
    pub parent_id: Vec<String>,

    /// Relations aligned 1:1 with `parent_id`, or `["@@NEW@@"]` for new mentions
    #[serde(default)]
    pub relation: Vec<String>,

    /// Token range `[start, end)` over the flattened tokens (start sentinel excluded)
    pub span: [usize; 2],
}

impl Annotation {
    /// Create an annotation for a newly introduced entity
    pub fn new_mention(id: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            id: id.into(),
            parent_id: Vec::new(),
            relation: vec![NEW_RELATION.to_string()],
            span: [start, end],
        }
    }

    /// Create an annotation for a mention derived from parents via relations
    pub fn derived_mention<S: Into<String>>(
        id: impl Into<String>,
        parents: impl IntoIterator<Item = (S, S)>,
        start: usize,
        end: usize,
    ) -> Self {
        let (parent_id, relation) = parents
            .into_iter()
            .map(|(p, r)| (p.into(), r.into()))
            .unzip();
        Self {
            id: id.into(),
            parent_id,
            relation,
            span: [start, end],
        }
    }

    /// True when the mention introduces a new entity
    pub fn is_new(&self) -> bool {
        self.relation.len() == 1 && self.relation[0] == NEW_RELATION
    }

    pub fn start(&self) -> usize {
        self.span[0]
    }

    pub fn end(&self) -> usize {
        self.span[1]
    }

    /// Span length; zero for empty or inverted spans
    pub fn len(&self) -> usize {
        self.span[1].saturating_sub(self.span[0])
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Mention types and encoding modes
// ============================================================================

/// Per-token mention label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MentionType {
    /// Not part of a mention
    #[default]
    None,
    /// Part of a mention introducing a new entity
    New,
    /// Part of a mention derived from a parent via a knowledge-graph relation
    Derived,
}

impl MentionType {
    /// Class index used by the mention-type classifier
    pub fn index(self) -> usize {
        match self {
            Self::None => 0,
            Self::New => 1,
            Self::Derived => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::None),
            1 => Some(Self::New),
            2 => Some(Self::Derived),
            _ => None,
        }
    }

    pub fn is_mention(self) -> bool {
        self != Self::None
    }
}

impl From<MentionType> for u8 {
    fn from(value: MentionType) -> Self {
        value.index() as u8
    }
}

impl TryFrom<u8> for MentionType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::from_index(value as usize).ok_or_else(|| format!("invalid mention type {value}"))
    }
}

impl std::fmt::Display for MentionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::New => write!(f, "new"),
            Self::Derived => write!(f, "derived"),
        }
    }
}

/// How label arrays are aligned with the token stream
///
/// - `Generative`: position `i` holds the attributes of the *next* token
///   (offset 0), alias-copy targets are produced.
/// - `Discriminative`: position `i` holds the attributes of the *current*
///   token (offset +1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    #[default]
    Generative,
    Discriminative,
}

impl EncodingMode {
    /// Offset added to span indices when writing labels
    pub fn offset(self) -> usize {
        match self {
            Self::Generative => 0,
            Self::Discriminative => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generative => "generative",
            Self::Discriminative => "discriminative",
        }
    }
}

impl std::fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EncodingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "generative" => Ok(Self::Generative),
            "discriminative" => Ok(Self::Discriminative),
            _ => Err(ConfigError::InvalidValue {
                key: "mode".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Read access to an alias database
pub trait AliasLookup: Send + Sync {
    /// 1-based rank of `token` among the alias tokens of `entity_id`, or 0
    fn token_to_alias_index(&self, entity_id: &str, token: &str) -> usize;
}

/// Read access to a static knowledge graph
pub trait KnowledgeGraph: Send + Sync {
    /// Outgoing `(relation, tail)` edges of `entity_id`; empty for unknown ids
    fn edges_from(&self, entity_id: &str) -> Vec<(String, String)>;

    /// Number of stored edges
    fn num_edges(&self) -> usize;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_deserialize_without_annotations() {
        let doc: Document = serde_json::from_str(r#"{"tokens": [["A", "B"], ["C"]]}"#).unwrap();
        assert_eq!(doc.num_tokens(), 3);
        assert!(doc.annotations.is_none());
    }

    #[test]
    fn test_annotation_deserialize() {
        let json = concat!(
            r#"{"id": "Q1", "parent_id": ["Q2"], "relation": ["P31"], "#,
            r#""span": [3, 5], "source": "WIKI"}"#
        );
        let annotation: Annotation = serde_json::from_str(json).unwrap();
        assert_eq!(annotation.start(), 3);
        assert_eq!(annotation.len(), 2);
        assert!(!annotation.is_new());
    }

    #[test]
    fn test_new_mention_builder() {
        let annotation = Annotation::new_mention("Q1", 0, 2);
        assert!(annotation.is_new());
        assert!(annotation.parent_id.is_empty());
    }

    #[test]
    fn test_inverted_span_is_empty() {
        let annotation = Annotation::new_mention("Q1", 4, 2);
        assert!(annotation.is_empty());
    }

    #[test]
    fn test_mention_type_serializes_as_integer() {
        let json = serde_json::to_string(&vec![MentionType::None, MentionType::Derived]).unwrap();
        assert_eq!(json, "[0,2]");
        let parsed: MentionType = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, MentionType::New);
        assert!(serde_json::from_str::<MentionType>("7").is_err());
    }

    #[test]
    fn test_encoding_mode_parse() {
        assert_eq!(
            "generative".parse::<EncodingMode>().unwrap(),
            EncodingMode::Generative
        );
        assert_eq!(
            "Discriminative".parse::<EncodingMode>().unwrap(),
            EncodingMode::Discriminative
        );
        assert!("causal".parse::<EncodingMode>().is_err());
        assert_eq!(EncodingMode::Discriminative.offset(), 1);
    }
}
