//! Model and item fit diagnostics.
//!
//! Read-only summaries of how well calibrated parameters reproduce
//! observed data. Never mutates parameters.

use serde::{Deserialize, Serialize};

use crate::em::{expected_counts, CalibrationRun};
use crate::error::CdmError;
use crate::numeric::floor_prob;
use crate::types::{ItemId, ResponseMatrix};

/// Fit summary for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFit {
    pub item: ItemId,
    /// Posterior-weighted observed correct rate per latent class. Classes
    /// with no expected mass fall back to the predicted rate.
    pub observed_rates: Vec<f64>,
    /// Model correct-response probability per latent class.
    pub predicted_rates: Vec<f64>,
    /// Chi-square-style discrepancy between observed and predicted rates,
    /// weighted by expected class mass.
    pub chi_square: f64,
    /// Predicted probability gap between the all-mastered and
    /// none-mastered classes.
    pub discrimination: f64,
}

/// Whole-model fit summary supporting DINA vs G-DINA comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFit {
    pub log_likelihood: f64,
    pub n_parameters: usize,
    pub aic: f64,
    pub bic: f64,
    pub item_fits: Vec<ItemFit>,
}

/// Evaluates a calibration against a response matrix (usually the one it
/// was calibrated on).
pub fn evaluate(run: &CalibrationRun, responses: &ResponseMatrix) -> Result<ModelFit, CdmError> {
    if responses.n_items() != run.n_items() {
        return Err(CdmError::InvalidResponseMatrix(format!(
            "response matrix has {} items, calibration has {}",
            responses.n_items(),
            run.n_items()
        )));
    }
    if responses.n_learners() == 0 {
        return Err(CdmError::InvalidResponseMatrix(
            "response matrix has no learners".into(),
        ));
    }

    let space = run.space();
    let (counts, log_likelihood) = expected_counts(
        &run.q_matrix,
        &space,
        &run.parameters,
        &run.class_weights,
        responses,
    );

    let n_classes = space.n_classes();
    let mut item_fits = Vec::with_capacity(run.n_items());
    for item in 0..run.n_items() {
        let mut observed = Vec::with_capacity(n_classes);
        let mut predicted = Vec::with_capacity(n_classes);
        let mut chi_square = 0.0;
        for class in space.classes() {
            let p = run
                .parameters
                .prob_correct(item, class, &run.q_matrix, &space);
            predicted.push(p);

            let total = counts.total_at(item, class);
            if total > 0.0 {
                let rate = counts.correct_at(item, class) / total;
                observed.push(rate);
                let p = floor_prob(p);
                chi_square += total * (rate - p).powi(2) / (p * (1.0 - p));
            } else {
                observed.push(p);
            }
        }

        let discrimination = run
            .parameters
            .prob_correct(item, n_classes - 1, &run.q_matrix, &space)
            - run.parameters.prob_correct(item, 0, &run.q_matrix, &space);

        item_fits.push(ItemFit {
            item,
            observed_rates: observed,
            predicted_rates: predicted,
            chi_square,
            discrimination,
        });
    }

    let mut n_parameters = run.parameters.n_free_parameters();
    if run.class_weights_estimated {
        n_parameters += n_classes - 1;
    }
    let penalty = |weight: f64| -2.0 * log_likelihood + weight * n_parameters as f64;
    let aic = penalty(2.0);
    let bic = penalty((responses.n_learners() as f64).ln());

    Ok(ModelFit {
        log_likelihood,
        n_parameters,
        aic,
        bic,
        item_fits,
    })
}
