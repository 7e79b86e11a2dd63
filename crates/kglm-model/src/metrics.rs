//! Running metrics
//!
//! Accumulators updated on every scored batch and read (optionally
//! resetting) through [`ScorerMetrics`].

use serde::{Deserialize, Serialize};

// ============================================================================
// Accumulators
// ============================================================================

/// Running mean
#[derive(Debug, Clone, Default)]
pub struct Average {
    total: f64,
    count: usize,
}

impl Average {
    pub fn update(&mut self, value: f32) {
        self.total += f64::from(value);
        self.count += 1;
    }

    pub fn value(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.total / self.count as f64) as f32
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Precision, recall and F1 of one positive class
#[derive(Debug, Clone, Default)]
pub struct F1Measure {
    positive_label: usize,
    true_positives: usize,
    false_positives: usize,
    false_negatives: usize,
}

impl F1Measure {
    pub fn new(positive_label: usize) -> Self {
        Self {
            positive_label,
            ..Self::default()
        }
    }

    pub fn update(&mut self, predicted: usize, gold: usize) {
        let predicted = predicted == self.positive_label;
        let gold = gold == self.positive_label;
        match (predicted, gold) {
            (true, true) => self.true_positives += 1,
            (true, false) => self.false_positives += 1,
            (false, true) => self.false_negatives += 1,
            (false, false) => {}
        }
    }

    /// TP / (TP + FP)
    pub fn precision(&self) -> f32 {
        if self.true_positives + self.false_positives == 0 {
            0.0
        } else {
            self.true_positives as f32 / (self.true_positives + self.false_positives) as f32
        }
    }

    /// TP / (TP + FN)
    pub fn recall(&self) -> f32 {
        if self.true_positives + self.false_negatives == 0 {
            0.0
        } else {
            self.true_positives as f32 / (self.true_positives + self.false_negatives) as f32
        }
    }

    pub fn f1_score(&self) -> f32 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.positive_label);
    }
}

/// Top-k accuracy over scored categories
#[derive(Debug, Clone, Default)]
pub struct CategoricalAccuracy {
    top_k: usize,
    correct: usize,
    total: usize,
}

impl CategoricalAccuracy {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k: top_k.max(1),
            ..Self::default()
        }
    }

    /// Gold counts as correct when fewer than `top_k` categories outscore it
    pub fn update(&mut self, scores: &[f32], gold: usize) {
        let Some(&gold_score) = scores.get(gold) else {
            self.total += 1;
            return;
        };
        let rank = scores.iter().filter(|&&s| s > gold_score).count();
        if rank < self.top_k {
            self.correct += 1;
        }
        self.total += 1;
    }

    pub fn value(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f32 / self.total as f32
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.top_k);
    }
}

/// Perplexity from summed negative log-likelihoods
#[derive(Debug, Clone, Default)]
pub struct Perplexity {
    total: f64,
    count: f64,
}

impl Perplexity {
    pub fn update(&mut self, negative_log_likelihood: f32, count: usize) {
        self.total += f64::from(negative_log_likelihood);
        self.count += count as f64;
    }

    pub fn value(&self) -> f32 {
        if self.count == 0.0 {
            0.0
        } else {
            (self.total / self.count).exp() as f32
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Snapshot of every scorer metric
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScorerMetrics {
    /// Average mention-type loss
    #[serde(rename = "type")]
    pub mention_type: f32,
    /// Average new-entity loss
    #[serde(rename = "new")]
    pub new_entity: f32,
    /// Average knowledge-graph entity loss
    #[serde(rename = "kg")]
    pub kg_entity: f32,
    pub new_p: f32,
    pub new_r: f32,
    pub new_f1: f32,
    pub kg_p: f32,
    pub kg_r: f32,
    pub kg_f1: f32,
    pub new_ent_acc: f32,
    pub new_ent_acc_20: f32,
    pub parent_ppl: f32,
    pub relation_ppl: f32,
}
