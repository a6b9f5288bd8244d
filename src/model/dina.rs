use serde::{Deserialize, Serialize};

use crate::error::CdmError;

/// DINA parameters for one item: slip and guess.
///
/// Response probability is two-valued: `1 - slip` when the learner masters
/// every required attribute, `guess` otherwise. No partial credit for
/// partial mastery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DinaItem {
    pub slip: f64,
    pub guess: f64,
}

impl DinaItem {
    /// Validates slip/guess ranges and the monotonicity constraint
    /// `guess < 1 - slip`.
    pub fn new(slip: f64, guess: f64) -> Result<Self, CdmError> {
        if !(0.0..1.0).contains(&slip) || slip.is_nan() {
            return Err(CdmError::InvalidItemParameters(format!(
                "slip {} outside [0, 1)",
                slip
            )));
        }
        if !(0.0..1.0).contains(&guess) || guess.is_nan() {
            return Err(CdmError::InvalidItemParameters(format!(
                "guess {} outside [0, 1)",
                guess
            )));
        }
        if guess >= 1.0 - slip {
            return Err(CdmError::InvalidItemParameters(format!(
                "guess {} must stay below 1 - slip = {}",
                guess,
                1.0 - slip
            )));
        }
        Ok(Self { slip, guess })
    }

    #[inline]
    pub fn prob_correct(&self, satisfies: bool) -> f64 {
        if satisfies {
            1.0 - self.slip
        } else {
            self.guess
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_valued_probability() {
        let item = DinaItem::new(0.1, 0.2).unwrap();
        assert!((item.prob_correct(true) - 0.9).abs() < 1e-12);
        assert!((item.prob_correct(false) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_monotonicity_enforced() {
        assert!(DinaItem::new(0.6, 0.5).is_err());
        assert!(DinaItem::new(0.5, 0.5).is_err());
        assert!(DinaItem::new(0.4, 0.5).is_ok());
    }

    #[test]
    fn test_range_enforced() {
        assert!(DinaItem::new(1.0, 0.0).is_err());
        assert!(DinaItem::new(-0.1, 0.0).is_err());
        assert!(DinaItem::new(0.0, 1.0).is_err());
        assert!(DinaItem::new(f64::NAN, 0.1).is_err());
    }
}
