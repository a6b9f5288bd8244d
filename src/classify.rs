//! Posterior computation and mastery classification.
//!
//! Shares the E-step's per-class likelihood kernel: a learner's posterior
//! is prior times the likelihood of each scored response, normalized.
//! Supports both batch computation from a full response vector and
//! incremental update from a single new response.

use serde::{Deserialize, Serialize};

use crate::em::CalibrationRun;
use crate::error::CdmError;
use crate::latent::LatentClassSpace;
use crate::numeric::{entropy, floor_prob, logsumexp, normalize};
use crate::types::{ClassId, ItemId, Response};

/// Probability distribution over the 2^K latent classes for one learner.
/// Always normalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatentClassPosterior {
    probs: Vec<f64>,
}

impl LatentClassPosterior {
    pub fn uniform(n_classes: usize) -> Self {
        Self {
            probs: vec![1.0 / n_classes as f64; n_classes],
        }
    }

    /// Normalized copy of the given weights; uniform if the mass is not
    /// positive.
    pub fn from_weights(weights: &[f64]) -> Self {
        let mut probs = weights.to_vec();
        normalize(&mut probs);
        Self { probs }
    }

    pub fn n_classes(&self) -> usize {
        self.probs.len()
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    pub fn prob(&self, class: ClassId) -> f64 {
        self.probs[class]
    }

    /// Shannon entropy in nats.
    pub fn entropy(&self) -> f64 {
        entropy(&self.probs)
    }

    /// The maximum-probability class; ties break to the lowest id.
    pub fn map_class(&self) -> (ClassId, f64) {
        let mut best = 0;
        let mut best_p = f64::NEG_INFINITY;
        for (class, &p) in self.probs.iter().enumerate() {
            if p > best_p {
                best_p = p;
                best = class;
            }
        }
        (best, best_p)
    }
}

/// The derived mastery decision for one learner: the MAP class plus
/// EAP-style per-attribute marginals. MAP is the decision policy; the
/// marginals support probability reporting without a second pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryProfile {
    pub map_class: ClassId,
    pub map_probability: f64,
    /// MAP class as a 0/1 mastery vector.
    pub mastery: Vec<u8>,
    /// Posterior probability of mastery per attribute.
    pub attribute_marginals: Vec<f64>,
    pub posterior_entropy: f64,
    /// False when no scored response informed the posterior.
    pub determined: bool,
}

impl MasteryProfile {
    pub fn from_posterior(
        posterior: &LatentClassPosterior,
        space: &LatentClassSpace,
        determined: bool,
    ) -> Self {
        let (map_class, map_probability) = posterior.map_class();
        let mut marginals = vec![0.0; space.n_attributes()];
        for class in space.classes() {
            let p = posterior.prob(class);
            for (attribute, marginal) in marginals.iter_mut().enumerate() {
                if space.mastered(class, attribute) {
                    *marginal += p;
                }
            }
        }
        Self {
            map_class,
            map_probability,
            mastery: space.profile(map_class),
            attribute_marginals: marginals,
            posterior_entropy: posterior.entropy(),
            determined,
        }
    }
}

/// Posterior over latent classes from a learner's full response vector,
/// indexed by item. Missing cells contribute nothing; a vector with no
/// scored cells returns the calibration prior unchanged.
pub fn posterior(
    run: &CalibrationRun,
    responses: &[Response],
) -> Result<LatentClassPosterior, CdmError> {
    if responses.len() != run.n_items() {
        return Err(CdmError::InvalidResponseMatrix(format!(
            "response vector has {} items, calibration has {}",
            responses.len(),
            run.n_items()
        )));
    }
    let space = run.space();
    let mut log_post: Vec<f64> = run
        .class_weights
        .iter()
        .map(|&w| floor_prob(w).ln())
        .collect();
    for (item, response) in responses.iter().enumerate() {
        let Some(correct) = response.as_correct() else {
            continue;
        };
        for class in space.classes() {
            let p = floor_prob(
                run.parameters
                    .prob_correct(item, class, &run.q_matrix, &space),
            );
            log_post[class] += if correct { p.ln() } else { (1.0 - p).ln() };
        }
    }
    let marginal = logsumexp(&log_post);
    let probs: Vec<f64> = log_post.iter().map(|&v| (v - marginal).exp()).collect();
    Ok(LatentClassPosterior { probs })
}

/// Folds one new (item, response) observation into an existing posterior:
/// multiply by the item's per-class likelihood, renormalize.
pub fn update_posterior(
    posterior: &LatentClassPosterior,
    item: ItemId,
    correct: bool,
    run: &CalibrationRun,
) -> Result<LatentClassPosterior, CdmError> {
    if item >= run.n_items() {
        return Err(CdmError::InvalidResponseMatrix(format!(
            "item {} outside calibrated pool of {}",
            item,
            run.n_items()
        )));
    }
    let space = run.space();
    if posterior.n_classes() != space.n_classes() {
        return Err(CdmError::InvalidResponseMatrix(format!(
            "posterior has {} classes, calibration has {}",
            posterior.n_classes(),
            space.n_classes()
        )));
    }
    let mut probs: Vec<f64> = space
        .classes()
        .map(|class| {
            let p = floor_prob(
                run.parameters
                    .prob_correct(item, class, &run.q_matrix, &space),
            );
            posterior.prob(class) * if correct { p } else { 1.0 - p }
        })
        .collect();
    normalize(&mut probs);
    Ok(LatentClassPosterior { probs })
}

/// Full classification: posterior plus the derived mastery profile.
/// A learner with no scored responses gets an undetermined profile over
/// the maximal-entropy (prior) posterior rather than an error.
pub fn classify(
    run: &CalibrationRun,
    responses: &[Response],
) -> Result<MasteryProfile, CdmError> {
    let post = posterior(run, responses)?;
    let determined = responses.iter().any(|r| !r.is_missing());
    Ok(MasteryProfile::from_posterior(
        &post,
        &run.space(),
        determined,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmConfig;
    use crate::model::{DinaItem, ItemParameters, ModelKind};
    use crate::qmatrix::QMatrix;
    use crate::types::POSTERIOR_TOLERANCE;
    use chrono::Utc;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Hand-built run: K=3, two items both requiring only attribute 0.
    fn attribute_zero_run() -> CalibrationRun {
        let (q, _) =
            QMatrix::from_raw(2, 3, &[vec![1, 0, 0], vec![1, 0, 0]]).unwrap();
        let n_classes = 8;
        CalibrationRun {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            model: ModelKind::Dina,
            q_matrix: q,
            parameters: ItemParameters::Dina(vec![
                DinaItem::new(0.1, 0.2).unwrap(),
                DinaItem::new(0.1, 0.2).unwrap(),
            ]),
            class_weights: vec![1.0 / n_classes as f64; n_classes],
            class_weights_estimated: false,
            iterations: 1,
            log_likelihood: 0.0,
            log_likelihood_history: vec![0.0],
            converged: true,
        }
    }

    #[test]
    fn test_posterior_sums_to_one() {
        let run = attribute_zero_run();
        let post = posterior(&run, &[Response::Correct, Response::Incorrect]).unwrap();
        let sum: f64 = post.probs().iter().sum();
        assert!((sum - 1.0).abs() < POSTERIOR_TOLERANCE);
    }

    #[test]
    fn test_two_correct_answers_imply_attribute_zero() {
        // Both items require attribute 0 with slip=0.1, guess=0.2; a learner
        // answering both correctly must get a MAP class with bit 0 set and
        // more than half the posterior mass on attribute-0 classes.
        let run = attribute_zero_run();
        let profile = classify(&run, &[Response::Correct, Response::Correct]).unwrap();
        assert!(profile.determined);
        assert_eq!(profile.map_class & 1, 1);
        assert!(profile.attribute_marginals[0] > 0.5);
        assert_eq!(profile.mastery[0], 1);
    }

    #[test]
    fn test_incremental_update_matches_batch() {
        let run = attribute_zero_run();
        let batch = posterior(&run, &[Response::Correct, Response::Incorrect]).unwrap();

        let prior = LatentClassPosterior::from_weights(&run.class_weights);
        let step1 = update_posterior(&prior, 0, true, &run).unwrap();
        let step2 = update_posterior(&step1, 1, false, &run).unwrap();

        for class in 0..8 {
            assert!((batch.prob(class) - step2.prob(class)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_vector_is_undetermined_prior() {
        let run = attribute_zero_run();
        let profile = classify(&run, &[Response::Missing, Response::Missing]).unwrap();
        assert!(!profile.determined);
        // maximal-entropy posterior over 8 classes
        assert!((profile.posterior_entropy - 8.0f64.ln()).abs() < 1e-6);
        // uniform tie breaks to the lowest class id
        assert_eq!(profile.map_class, 0);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let run = attribute_zero_run();
        assert!(classify(&run, &[Response::Correct]).is_err());
        let prior = LatentClassPosterior::uniform(8);
        assert!(update_posterior(&prior, 2, true, &run).is_err());
    }

    #[test]
    fn test_marginals_consistent_with_posterior() {
        let run = attribute_zero_run();
        let profile = classify(&run, &[Response::Correct, Response::Missing]).unwrap();
        for &m in &profile.attribute_marginals {
            assert!((0.0..=1.0).contains(&m));
        }
        // attributes 1 and 2 are untested: marginals stay at the prior 0.5
        assert!((profile.attribute_marginals[1] - 0.5).abs() < 1e-9);
        assert!((profile.attribute_marginals[2] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_posterior_from_calibrated_run() {
        let (q, _) = QMatrix::from_raw(3, 2, &[vec![1, 0], vec![0, 1], vec![1, 1]]).unwrap();
        let space = crate::latent::LatentClassSpace::new(2).unwrap();
        let truth = ItemParameters::Dina(vec![
            DinaItem::new(0.1, 0.2).unwrap(),
            DinaItem::new(0.1, 0.2).unwrap(),
            DinaItem::new(0.1, 0.2).unwrap(),
        ]);
        let profiles = crate::sim::simulate_profiles(&space, 400, 17);
        let responses =
            crate::sim::simulate_responses(&q, &truth, &space, &profiles, 0.0, 18);
        let run =
            crate::em::calibrate(&q, &responses, ModelKind::Dina, &EmConfig::default()).unwrap();

        let profile = classify(&run, responses.row(0)).unwrap();
        let sum: f64 = profile.attribute_marginals.iter().sum::<f64>();
        assert!(sum.is_finite());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_posterior_always_normalized(
            cells in proptest::collection::vec(0u8..3, 2),
            slip in 0.01f64..0.4,
            guess in 0.01f64..0.4,
        ) {
            let (q, _) =
                QMatrix::from_raw(2, 3, &[vec![1, 0, 0], vec![1, 0, 0]]).unwrap();
            let run = CalibrationRun {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                model: ModelKind::Dina,
                q_matrix: q,
                parameters: ItemParameters::Dina(vec![
                    DinaItem::new(slip, guess).unwrap(),
                    DinaItem::new(slip, guess).unwrap(),
                ]),
                class_weights: vec![0.125; 8],
                class_weights_estimated: false,
                iterations: 1,
                log_likelihood: 0.0,
                log_likelihood_history: vec![0.0],
                converged: true,
            };
            let responses: Vec<Response> = cells
                .iter()
                .map(|&c| match c {
                    0 => Response::Incorrect,
                    1 => Response::Correct,
                    _ => Response::Missing,
                })
                .collect();
            let post = posterior(&run, &responses).unwrap();
            let sum: f64 = post.probs().iter().sum();
            prop_assert!((sum - 1.0).abs() < POSTERIOR_TOLERANCE);
        }
    }
}
