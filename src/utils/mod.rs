//! Numeric helpers shared across the core.

use rand::Rng;


/// `ln(sum(exp(values)))` without overflow: shift by the maximum before
/// exponentiating. Empty input and all `-inf` input both give `-inf`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Draw an index proportional to `weights`.
///
/// Weights must be finite, non-negative and not all zero; callers
/// validate before sampling. Round-off at the top of the cumulative scan
/// falls back to the last positive-weight index.
pub(crate) fn draw_categorical<R: Rng>(weights: &[f64], rng: &mut R) -> usize {
    let total: f64 = weights.iter().sum();
    debug_assert!(total > 0.0, "draw_categorical needs positive total weight");
    let mut u = rng.gen::<f64>() * total;
    let mut last = 0;
    for (i, &w) in weights.iter().enumerate() {
        if w <= 0.0 {
            continue;
        }
        if u < w {
            return i;
        }
        u -= w;
        last = i;
    }
    last
}
