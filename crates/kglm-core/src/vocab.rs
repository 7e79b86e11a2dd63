//! Vocabulary management
//!
//! Each field the model indexes (tokens, normalized entities, raw entities,
//! relations) gets its own [`Vocabulary`]. Index 0 is always the padding
//! sentinel and index 1 the out-of-vocabulary sentinel.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{KglmError, Result, OOV_TOKEN, PADDING_TOKEN};

/// Index of the padding sentinel in every vocabulary
pub const PADDING_INDEX: usize = 0;

/// Index of the out-of-vocabulary sentinel in every vocabulary
pub const OOV_INDEX: usize = 1;

/// Bidirectional string <-> index mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    index_to_token: Vec<String>,
    token_to_index: HashMap<String, usize>,
}

impl Vocabulary {
    /// Create a vocabulary holding only the padding and OOV sentinels
    pub fn new() -> Self {
        let mut vocab = Self {
            index_to_token: Vec::new(),
            token_to_index: HashMap::new(),
        };
        vocab.push(PADDING_TOKEN);
        vocab.push(OOV_TOKEN);
        vocab
    }

    /// Build a vocabulary from tokens in order of first appearance
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocab = Self::new();
        for token in tokens {
            vocab.add_token(token.as_ref());
        }
        vocab
    }

    fn push(&mut self, token: &str) -> usize {
        let index = self.index_to_token.len();
        self.index_to_token.push(token.to_string());
        self.token_to_index.insert(token.to_string(), index);
        index
    }

    /// Add a token if missing; returns its index
    pub fn add_token(&mut self, token: &str) -> usize {
        match self.token_to_index.get(token) {
            Some(&index) => index,
            None => self.push(token),
        }
    }

    /// Index of `token`, falling back to the OOV index
    pub fn index_of(&self, token: &str) -> usize {
        self.token_to_index.get(token).copied().unwrap_or(OOV_INDEX)
    }

    /// Token stored at `index`
    pub fn token(&self, index: usize) -> Option<&str> {
        self.index_to_token.get(index).map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.token_to_index.contains_key(token)
    }

    /// Number of entries, sentinels included
    pub fn len(&self) -> usize {
        self.index_to_token.len()
    }

    /// True when only the sentinels are present
    pub fn is_empty(&self) -> bool {
        self.index_to_token.len() <= 2
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<String>> for Vocabulary {
    fn from(tokens: Vec<String>) -> Self {
        Self::from_tokens(tokens)
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.index_to_token
    }
}

/// The vocabularies of every indexed field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabularies {
    /// Surface tokens (source and target)
    pub tokens: Vocabulary,
    /// Normalized entity ids (entity ids, parent ids, shortlists)
    pub entities: Vocabulary,
    /// Raw entity ids (gold targets and knowledge-graph tails)
    pub raw_entities: Vocabulary,
    /// Knowledge-graph relations
    pub relations: Vocabulary,
}

impl Vocabularies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            KglmError::Data(format!("invalid vocabulary file {}: {e}", path.display()))
        })
    }

    /// Save as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_reserved() {
        let vocab = Vocabulary::new();
        assert_eq!(vocab.index_of(PADDING_TOKEN), PADDING_INDEX);
        assert_eq!(vocab.index_of(OOV_TOKEN), OOV_INDEX);
        assert!(vocab.is_empty());
    }

    #[test]
    fn test_add_token_is_idempotent() {
        let mut vocab = Vocabulary::new();
        let first = vocab.add_token("Q1");
        let second = vocab.add_token("Q1");
        assert_eq!(first, 2);
        assert_eq!(first, second);
        assert_eq!(vocab.len(), 3);
    }

    #[test]
    fn test_unknown_maps_to_oov() {
        let vocab = Vocabulary::from_tokens(["a", "b"]);
        assert_eq!(vocab.index_of("zzz"), OOV_INDEX);
        assert_eq!(vocab.token(3), Some("b"));
    }

    #[test]
    fn test_serde_roundtrip_keeps_indices() {
        let vocab = Vocabulary::from_tokens(["x", "y", "z"]);
        let json = serde_json::to_string(&vocab).unwrap();
        let restored: Vocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.index_of("z"), vocab.index_of("z"));
        assert_eq!(restored.len(), vocab.len());
    }

    #[test]
    fn test_vocabularies_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");

        let mut vocabs = Vocabularies::new();
        vocabs.entities.add_token("Q42");
        vocabs.relations.add_token("P31");
        vocabs.save(&path).unwrap();

        let loaded = Vocabularies::load(&path).unwrap();
        assert_eq!(loaded, vocabs);
    }
}
