//! Cross-call session state
//!
//! Contiguous chunks of one document share the recurrent state and the
//! recent-entities cache of their batch slot. Both are carried here, owned
//! by the caller and passed to every forward call.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::RecentEntitiesCache;
use crate::encoder::RecurrentState;

/// Whether the session is training or evaluating
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Training,
    Evaluation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Training => write!(f, "training"),
            Phase::Evaluation => write!(f, "evaluation"),
        }
    }
}

/// State carried between forward calls
#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: Phase,
    pub encoder_state: Option<RecurrentState>,
    pub recent_entities: RecentEntitiesCache,
}

impl SessionState {
    pub fn new(cutoff: usize) -> Self {
        Self {
            phase: Phase::default(),
            encoder_state: None,
            recent_entities: RecentEntitiesCache::new(cutoff),
        }
    }

    /// Switch phase; all carried state is dropped when the phase changes
    pub fn enter_phase(&mut self, phase: Phase) {
        if phase != self.phase {
            tracing::info!("Entering {} phase; clearing session state", phase);
            self.phase = phase;
            self.clear();
        }
    }

    /// Drop the recurrent state and every cached entity
    pub fn clear(&mut self) {
        self.encoder_state = None;
        self.recent_entities.clear();
    }

    /// Apply per-slot reset flags before a forward call.
    ///
    /// A flag count different from the carried batch size forces a full
    /// reset of the recurrent state.
    pub fn apply_resets(&mut self, flags: &[bool]) {
        if let Some(state) = self.encoder_state.as_mut() {
            if state.batch_size() == flags.len() {
                state.reset_slots(flags);
            } else {
                tracing::warn!(
                    "Reset with {} flags for {} carried slots; dropping recurrent state",
                    flags.len(),
                    state.batch_size()
                );
                self.encoder_state = None;
            }
        }
        self.recent_entities.reset(flags);
    }
}
