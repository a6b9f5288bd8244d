//! Numerical stability helpers.

use crate::types::PROB_FLOOR;

/// Clamps a probability away from 0 and 1 so its logarithm stays finite.
#[inline]
pub fn floor_prob(p: f64) -> f64 {
    if p.is_nan() {
        return PROB_FLOOR;
    }
    p.clamp(PROB_FLOOR, 1.0 - PROB_FLOOR)
}

/// log(sum(exp(x))) with the max-subtraction trick.
#[inline]
pub fn logsumexp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max.is_infinite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Shannon entropy in nats of a normalized distribution.
#[inline]
pub fn entropy(probs: &[f64]) -> f64 {
    let mut h = 0.0;
    for &p in probs {
        if p > 0.0 {
            h -= p * p.ln();
        }
    }
    h
}

/// Normalizes in place; falls back to uniform when the mass is not positive.
pub fn normalize(probs: &mut [f64]) {
    let sum: f64 = probs.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        for p in probs.iter_mut() {
            *p /= sum;
        }
    } else if !probs.is_empty() {
        let uniform = 1.0 / probs.len() as f64;
        for p in probs.iter_mut() {
            *p = uniform;
        }
    }
}

pub fn has_invalid_values(values: &[f64]) -> bool {
    values.iter().any(|v| v.is_nan() || v.is_infinite())
}
