//! Dense parameter holders
//!
//! Weights are initialised uniformly in `[-1/sqrt(fan_in), 1/sqrt(fan_in)]`
//! from a caller-supplied RNG so a fixed seed gives a reproducible model.

use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;

use kglm_core::{KglmError, Result};

fn uniform<R: Rng>(rng: &mut R, shape: (usize, usize), fan_in: usize) -> Array2<f32> {
    let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
    Array2::from_shape_fn(shape, |_| rng.gen_range(-bound..=bound))
}

/// Lookup table of one vector per vocabulary index
#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    weight: Array2<f32>,
}

impl EmbeddingTable {
    /// Random table; row 0 (padding) is zeroed
    pub fn new<R: Rng>(num_embeddings: usize, dim: usize, rng: &mut R) -> Self {
        let mut weight = uniform(rng, (num_embeddings.max(1), dim), dim);
        weight.row_mut(0).fill(0.0);
        Self { weight }
    }

    /// Vector for `index`
    pub fn get(&self, index: usize) -> Result<ArrayView1<'_, f32>> {
        if index >= self.weight.nrows() {
            return Err(KglmError::Shape(format!(
                "index {index} outside embedding table of {} rows",
                self.weight.nrows()
            )));
        }
        Ok(self.weight.row(index))
    }
}

/// Affine map `y = W x + b`
#[derive(Debug, Clone)]
pub struct Linear {
    /// (out, in)
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    pub fn new<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let weight = uniform(rng, (out_features, in_features), in_features);
        let bias = uniform(rng, (1, out_features), in_features).row(0).to_owned();
        Self { weight, bias }
    }

    pub fn from_parts(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weight.nrows() != bias.len() {
            return Err(KglmError::Shape(format!(
                "weight has {} rows but bias has {} entries",
                weight.nrows(),
                bias.len()
            )));
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, input: ArrayView1<'_, f32>) -> Result<Array1<f32>> {
        if input.len() != self.in_features() {
            return Err(KglmError::Shape(format!(
                "linear layer expects {} inputs, got {}",
                self.in_features(),
                input.len()
            )));
        }
        Ok(self.weight.dot(&input) + &self.bias)
    }
}
