//! Sequence encoder
//!
//! The scorer only needs token vectors in and token vectors out, with a
//! recurrent state carried across contiguous chunks of each batch slot.
//! [`ElmanEncoder`] is a single-layer tanh recurrence satisfying that
//! contract.

use ndarray::{Array2, Array3, ArrayView2, Axis};
use rand::Rng;

use kglm_core::vocab::PADDING_INDEX;
use kglm_core::{KglmError, Result};

use crate::params::{EmbeddingTable, Linear};

/// Per-slot recurrent state
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentState {
    /// (batch, hidden)
    pub hidden: Array2<f32>,
}

impl RecurrentState {
    pub fn zeros(batch_size: usize, hidden_dim: usize) -> Self {
        Self {
            hidden: Array2::zeros((batch_size, hidden_dim)),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.hidden.nrows()
    }

    /// Zero the state of every flagged slot
    pub fn reset_slots(&mut self, flags: &[bool]) {
        for (mut row, &flag) in self.hidden.axis_iter_mut(Axis(0)).zip(flags) {
            if flag {
                row.fill(0.0);
            }
        }
    }
}

/// Token ids in, one vector per position out
pub trait SequenceEncoder {
    /// Width of each output vector
    fn output_dim(&self) -> usize;

    /// Encode `tokens` (batch, time) from `prior` (or a zero state)
    fn encode(
        &self,
        tokens: ArrayView2<'_, usize>,
        prior: Option<&RecurrentState>,
    ) -> Result<(Array3<f32>, RecurrentState)>;
}

/// Elman recurrence `h_t = tanh(W x_t + U h_{t-1} + b)`
#[derive(Debug, Clone)]
pub struct ElmanEncoder {
    embedding: EmbeddingTable,
    input: Linear,
    recurrent: Linear,
}

impl ElmanEncoder {
    pub fn new<R: Rng>(
        vocab_size: usize,
        token_dim: usize,
        output_dim: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            embedding: EmbeddingTable::new(vocab_size, token_dim, rng),
            input: Linear::new(token_dim, output_dim, rng),
            recurrent: Linear::new(output_dim, output_dim, rng),
        }
    }
}

impl SequenceEncoder for ElmanEncoder {
    fn output_dim(&self) -> usize {
        self.input.out_features()
    }

    fn encode(
        &self,
        tokens: ArrayView2<'_, usize>,
        prior: Option<&RecurrentState>,
    ) -> Result<(Array3<f32>, RecurrentState)> {
        let (batch_size, sequence_length) = tokens.dim();
        let dim = self.output_dim();

        let mut state = match prior {
            Some(prior) if prior.batch_size() != batch_size => {
                return Err(KglmError::Shape(format!(
                    "prior state holds {} slots for a batch of {}",
                    prior.batch_size(),
                    batch_size
                )));
            }
            Some(prior) => prior.clone(),
            None => RecurrentState::zeros(batch_size, dim),
        };

        let mut output = Array3::zeros((batch_size, sequence_length, dim));
        for b in 0..batch_size {
            for t in 0..sequence_length {
                let token = tokens[[b, t]];
                // Padding carries the state through unchanged.
                if token != PADDING_INDEX {
                    let x = self.input.forward(self.embedding.get(token)?)?;
                    let h = self.recurrent.forward(state.hidden.row(b))?;
                    let next = (x + h).mapv(f32::tanh);
                    state.hidden.row_mut(b).assign(&next);
                }
                output
                    .index_axis_mut(Axis(0), b)
                    .row_mut(t)
                    .assign(&state.hidden.row(b));
            }
        }

        Ok((output, state))
    }
}
