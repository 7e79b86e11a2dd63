//! Entity id normalization
//!
//! Raw ids carry their kind in the first character: `Q`/`P` for knowledge
//! base items and properties, `T` for dates and `V` for quantities. Dates and
//! quantities collapse into shared placeholder ids.

use kglm_core::{DATE_ENTITY, QUANTITY_ENTITY};

/// Normalize a raw entity id; `None` means the id cannot be tracked
pub fn normalize_entity_id(raw_entity_id: &str) -> Option<String> {
    match raw_entity_id.chars().next()? {
        'T' => Some(DATE_ENTITY.to_string()),
        'V' => Some(QUANTITY_ENTITY.to_string()),
        'P' | 'Q' => Some(raw_entity_id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knowledge_base_ids_pass_through() {
        assert_eq!(normalize_entity_id("Q42").as_deref(), Some("Q42"));
        assert_eq!(normalize_entity_id("P31").as_deref(), Some("P31"));
    }

    #[test]
    fn test_literals_collapse_to_placeholders() {
        assert_eq!(
            normalize_entity_id("T1952-03-11").as_deref(),
            Some(DATE_ENTITY)
        );
        assert_eq!(normalize_entity_id("V+12").as_deref(), Some(QUANTITY_ENTITY));
    }

    #[test]
    fn test_untrackable_ids() {
        assert_eq!(normalize_entity_id(""), None);
        assert_eq!(normalize_entity_id("@@NEW@@"), None);
        assert_eq!(normalize_entity_id("q42"), None);
    }
}
