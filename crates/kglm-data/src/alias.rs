//! Alias database
//!
//! Maps each entity to the tokens of its known surface forms. Tokens are
//! ranked per entity in order of first appearance across the entity's
//! aliases, starting at 1; rank 0 means "not an alias token".

use std::collections::HashMap;
use std::path::Path;

use kglm_core::{AliasLookup, KglmError, Result};

/// In-memory alias database
#[derive(Debug, Clone, Default)]
pub struct AliasDatabase {
    /// Entity id -> (token -> 1-based rank)
    token_ranks: HashMap<String, HashMap<String, usize>>,
}

impl AliasDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entity id -> aliases
    pub fn from_aliases(aliases: HashMap<String, Vec<Vec<String>>>) -> Self {
        let mut db = Self::new();
        // Sort for deterministic construction order.
        let mut entries: Vec<_> = aliases.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (entity_id, entity_aliases) in entries {
            for alias in entity_aliases {
                db.add_alias(&entity_id, alias);
            }
        }
        db
    }

    /// Load from a JSON object of `{ "<entity id>": [["tok", ...], ...] }`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let aliases: HashMap<String, Vec<Vec<String>>> =
            serde_json::from_str(&content).map_err(|e| {
                KglmError::Data(format!("invalid alias database {}: {e}", path.display()))
            })?;

        let db = Self::from_aliases(aliases);
        tracing::info!(
            "Loaded alias database {} ({} entities)",
            path.display(),
            db.num_entities()
        );
        Ok(db)
    }

    /// Register one alias (a token sequence) for an entity
    pub fn add_alias<S: Into<String>>(
        &mut self,
        entity_id: &str,
        tokens: impl IntoIterator<Item = S>,
    ) {
        let ranks = self.token_ranks.entry(entity_id.to_string()).or_default();
        for token in tokens {
            let next_rank = ranks.len() + 1;
            ranks.entry(token.into()).or_insert(next_rank);
        }
    }

    pub fn num_entities(&self) -> usize {
        self.token_ranks.len()
    }
}

impl AliasLookup for AliasDatabase {
    fn token_to_alias_index(&self, entity_id: &str, token: &str) -> usize {
        self.token_ranks
            .get(entity_id)
            .and_then(|ranks| ranks.get(token))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_db() -> AliasDatabase {
        let mut db = AliasDatabase::new();
        db.add_alias("Q272074", ["Elmer", "Huntley", "Bridge"]);
        db.add_alias("Q272074", ["Huntley", "Bridge", "crossing"]);
        db
    }

    #[test]
    fn test_ranks_follow_first_appearance() {
        let db = sample_db();
        assert_eq!(db.token_to_alias_index("Q272074", "Elmer"), 1);
        assert_eq!(db.token_to_alias_index("Q272074", "Huntley"), 2);
        assert_eq!(db.token_to_alias_index("Q272074", "Bridge"), 3);
        assert_eq!(db.token_to_alias_index("Q272074", "crossing"), 4);
    }

    #[test]
    fn test_unknown_token_or_entity_is_zero() {
        let db = sample_db();
        assert_eq!(db.token_to_alias_index("Q272074", "river"), 0);
        assert_eq!(db.token_to_alias_index("Q1", "Elmer"), 0);
    }

    #[test]
    fn test_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        std::fs::write(&path, r#"{"Q1": [["A", "B"]], "Q2": [["C"], ["C", "D"]]}"#).unwrap();

        let db = AliasDatabase::load(&path).unwrap();
        assert_eq!(db.num_entities(), 2);
        assert_eq!(db.token_to_alias_index("Q1", "B"), 2);
        assert_eq!(db.token_to_alias_index("Q2", "D"), 2);
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(matches!(
            AliasDatabase::load(&path),
            Err(KglmError::Data(_))
        ));
    }
}
