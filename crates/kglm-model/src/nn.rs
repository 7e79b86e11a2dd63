//! Numeric helpers over log-probabilities

/// Log-probability floor, `ln(1e-45)` in single precision
pub const MIN_LOG_PROB: f32 = -103.278_93;

/// Log of the sum of exponentials; negative infinity for an empty slice
pub fn logsumexp(values: &[f32]) -> f32 {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f32 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Log-softmax over a slice
pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let normalizer = logsumexp(logits);
    logits.iter().map(|&x| x - normalizer).collect()
}

/// Log-softmax with masked entries pushed to the floor.
///
/// Every logit is shifted by `ln(mask + 1e-45)` before normalizing, so a
/// fully masked row still yields finite values.
pub fn masked_log_softmax(logits: &[f32], mask: &[bool]) -> Vec<f32> {
    let shifted: Vec<f32> = logits
        .iter()
        .zip(mask)
        .map(|(&x, &keep)| if keep { x } else { x + MIN_LOG_PROB })
        .collect();
    log_softmax(&shifted)
}

/// Index of the largest value (first on ties)
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
            if v > max {
                (i, v)
            } else {
                (best, max)
            }
        })
        .0
}
