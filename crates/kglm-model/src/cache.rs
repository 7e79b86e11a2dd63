//! Recent entities cache
//!
//! Per batch slot, the bounded set of entities mentioned so far in the
//! current document. These are the candidate parents for derived mentions.
//! The set at position `t` never includes the entity introduced at `t`.

use ndarray::{Array2, Array3, ArrayView2};

use kglm_core::vocab::PADDING_INDEX;
use kglm_core::{KglmError, Result};

/// Default number of distinct entities kept per slot
pub const DEFAULT_CUTOFF: usize = 30;

/// Recency sets keyed by batch slot
#[derive(Debug, Clone)]
pub struct RecentEntitiesCache {
    cutoff: usize,
    /// Entity ids per slot, least recent first
    slots: Vec<Vec<usize>>,
}

impl Default for RecentEntitiesCache {
    fn default() -> Self {
        Self::new(DEFAULT_CUTOFF)
    }
}

impl RecentEntitiesCache {
    /// Create an empty cache; it is sized by the first `reset`
    pub fn new(cutoff: usize) -> Self {
        Self {
            cutoff: cutoff.max(1),
            slots: Vec::new(),
        }
    }

    pub fn cutoff(&self) -> usize {
        self.cutoff
    }

    pub fn batch_size(&self) -> usize {
        self.slots.len()
    }

    /// Entities currently tracked for `slot`, least recent first
    pub fn entities(&self, slot: usize) -> &[usize] {
        self.slots.get(slot).map_or(&[], Vec::as_slice)
    }

    /// Clear every flagged slot.
    ///
    /// A flag count different from the tracked slot count re-creates the
    /// cache for the new batch size.
    pub fn reset(&mut self, flags: &[bool]) {
        if flags.len() != self.slots.len() {
            if !self.slots.is_empty() {
                tracing::warn!(
                    "Reset with {} flags for {} cached slots; clearing recent entities",
                    flags.len(),
                    self.slots.len()
                );
            }
            self.slots = vec![Vec::new(); flags.len()];
            return;
        }
        for (slot, &flag) in self.slots.iter_mut().zip(flags) {
            if flag {
                slot.clear();
            }
        }
    }

    /// Drop every slot
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    fn insert(&mut self, slot: usize, entity_id: usize) {
        let entities = &mut self.slots[slot];
        if let Some(position) = entities.iter().position(|&e| e == entity_id) {
            entities.remove(position);
        }
        entities.push(entity_id);
        if entities.len() > self.cutoff {
            entities.remove(0);
        }
    }

    /// Candidates for `entity_ids` (batch, time), extending the cache causally.
    ///
    /// Returns `(candidate_ids, candidate_mask)`: candidate ids (batch, C)
    /// padded with 0, and a (batch, time, C) mask that is true where the
    /// candidate was tracked before the entity at that position was added.
    pub fn lookup(
        &mut self,
        entity_ids: ArrayView2<'_, usize>,
    ) -> Result<(Array2<usize>, Array3<bool>)> {
        let (batch_size, sequence_length) = entity_ids.dim();
        if batch_size != self.slots.len() {
            return Err(KglmError::Shape(format!(
                "cache tracks {} slots, lookup has {}",
                self.slots.len(),
                batch_size
            )));
        }

        // Tracked set at each position, before that position's entity.
        let mut snapshots: Vec<Vec<Vec<usize>>> = Vec::with_capacity(batch_size);
        let mut candidates: Vec<Vec<usize>> = Vec::with_capacity(batch_size);
        for b in 0..batch_size {
            let mut slot_snapshots = Vec::with_capacity(sequence_length);
            let mut slot_candidates: Vec<usize> = Vec::new();
            for t in 0..sequence_length {
                for &entity in &self.slots[b] {
                    if !slot_candidates.contains(&entity) {
                        slot_candidates.push(entity);
                    }
                }
                slot_snapshots.push(self.slots[b].clone());

                let entity = entity_ids[[b, t]];
                if entity != PADDING_INDEX {
                    self.insert(b, entity);
                }
            }
            snapshots.push(slot_snapshots);
            candidates.push(slot_candidates);
        }

        let width = candidates.iter().map(Vec::len).max().unwrap_or(0).max(1);
        let mut candidate_ids = Array2::zeros((batch_size, width));
        let mut candidate_mask = Array3::from_elem((batch_size, sequence_length, width), false);
        for b in 0..batch_size {
            for (c, &entity) in candidates[b].iter().enumerate() {
                candidate_ids[[b, c]] = entity;
                for t in 0..sequence_length {
                    candidate_mask[[b, t, c]] = snapshots[b][t].contains(&entity);
                }
            }
        }

        tracing::debug!("Recent entity candidates: {:?}", candidate_ids.dim());
        Ok((candidate_ids, candidate_mask))
    }
}
