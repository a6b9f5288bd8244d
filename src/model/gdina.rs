use serde::{Deserialize, Serialize};

use crate::error::CdmError;
use crate::numeric::floor_prob;

/// Link function for the G-DINA decomposition. Affects how delta
/// coefficients are interpreted, not the probability range, which is
/// validated into [0, 1] regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkFunction {
    Identity,
    Logit,
    Log,
}

impl LinkFunction {
    /// g(p). Probabilities are floored away from 0 and 1 first so the
    /// logit and log links stay finite.
    pub fn apply(&self, p: f64) -> f64 {
        match self {
            Self::Identity => p,
            Self::Logit => {
                let p = floor_prob(p);
                (p / (1.0 - p)).ln()
            }
            Self::Log => floor_prob(p).ln(),
        }
    }

    /// g^-1(x).
    pub fn inverse(&self, x: f64) -> f64 {
        match self {
            Self::Identity => x,
            Self::Logit => {
                if x >= 0.0 {
                    1.0 / (1.0 + (-x).exp())
                } else {
                    let e = x.exp();
                    e / (1.0 + e)
                }
            }
            Self::Log => x.exp(),
        }
    }
}

/// G-DINA parameters for one item: a correct-response probability for every
/// reduced pattern of its required attributes, indexed by the compacted bit
/// pattern (`LatentClassSpace::reduce`).
///
/// The saturated model is stored in probability space, which is where the
/// M-step optimum is closed-form; the link only changes the delta
/// decomposition reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GdinaItem {
    pub link: LinkFunction,
    probs: Vec<f64>,
}

impl GdinaItem {
    /// Validates one probability per reduced pattern: the table length must
    /// be 2^k for the item's k required attributes, every entry in [0, 1].
    pub fn new(link: LinkFunction, probs: Vec<f64>) -> Result<Self, CdmError> {
        if probs.len() < 2 || !probs.len().is_power_of_two() {
            return Err(CdmError::InvalidItemParameters(format!(
                "reduced pattern table has {} entries, expected a power of two >= 2",
                probs.len()
            )));
        }
        for (pattern, &p) in probs.iter().enumerate() {
            if !(0.0..=1.0).contains(&p) || p.is_nan() {
                return Err(CdmError::InvalidItemParameters(format!(
                    "probability {} for reduced pattern {} outside [0, 1]",
                    p, pattern
                )));
            }
        }
        Ok(Self { link, probs })
    }

    /// The all-or-nothing restriction: `1 - slip` for the full pattern,
    /// `guess` for every other. Equivalent to DINA with the same slip/guess.
    pub fn all_or_nothing(
        link: LinkFunction,
        n_required: usize,
        slip: f64,
        guess: f64,
    ) -> Result<Self, CdmError> {
        let n_patterns = 1usize << n_required;
        let mut probs = vec![guess; n_patterns];
        probs[n_patterns - 1] = 1.0 - slip;
        Self::new(link, probs)
    }

    /// Builds the probability table from delta coefficients:
    /// P(r) = g^-1(sum of delta(s) over s subset of r). Fails if any
    /// combined probability lands outside [0, 1].
    pub fn from_deltas(link: LinkFunction, deltas: Vec<f64>) -> Result<Self, CdmError> {
        if deltas.len() < 2 || !deltas.len().is_power_of_two() {
            return Err(CdmError::InvalidItemParameters(format!(
                "delta table has {} entries, expected a power of two >= 2",
                deltas.len()
            )));
        }
        let mut probs = Vec::with_capacity(deltas.len());
        for pattern in 0..deltas.len() {
            let combined: f64 = subsets_of(pattern).map(|s| deltas[s]).sum();
            let p = link.inverse(combined);
            if !(-1e-9..=1.0 + 1e-9).contains(&p) || p.is_nan() {
                return Err(CdmError::InvalidItemParameters(format!(
                    "deltas combine to probability {} for reduced pattern {}",
                    p, pattern
                )));
            }
            probs.push(p.clamp(0.0, 1.0));
        }
        Self::new(link, probs)
    }

    /// Delta decomposition of the fitted probabilities under this item's
    /// link: the inclusion-exclusion inverse of `from_deltas`.
    pub fn delta_coefficients(&self) -> Vec<f64> {
        let mut deltas = Vec::with_capacity(self.probs.len());
        for pattern in 0..self.probs.len() {
            let mut delta = 0.0;
            for s in subsets_of(pattern) {
                let sign = if (pattern.count_ones() - s.count_ones()) % 2 == 0 {
                    1.0
                } else {
                    -1.0
                };
                delta += sign * self.link.apply(self.probs[s]);
            }
            deltas.push(delta);
        }
        deltas
    }

    #[inline]
    pub fn prob_correct(&self, reduced_pattern: usize) -> f64 {
        self.probs[reduced_pattern]
    }

    pub fn n_parameters(&self) -> usize {
        self.probs.len()
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }
}

/// All subsets of a bit pattern, the full pattern and empty set included.
fn subsets_of(pattern: usize) -> impl Iterator<Item = usize> {
    let mut current = pattern;
    let mut done = false;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        let out = current;
        if current == 0 {
            done = true;
        } else {
            current = (current - 1) & pattern;
        }
        Some(out)
    })
}
