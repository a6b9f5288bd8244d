//! EM-MMLE calibration of item parameters from a response matrix.
//!
//! E-step: per-learner posteriors over latent classes under current
//! parameters, aggregated into expected per-(item, class) counts.
//! M-step: closed-form per-item parameter updates from those counts.
//! Iterates until the log-likelihood improvement drops below tolerance or
//! the iteration cap is reached; hitting the cap flags the run instead of
//! failing it.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EmConfig;
use crate::error::CdmError;
use crate::latent::LatentClassSpace;
use crate::model::{DinaItem, GdinaItem, ItemParameters, ModelKind};
use crate::numeric::{floor_prob, logsumexp};
use crate::qmatrix::QMatrix;
use crate::types::{ItemId, Response, ResponseMatrix, PROB_FLOOR};

/// A finalized calibration job: parameters plus convergence metadata.
/// Immutable once produced; re-calibration supersedes rather than mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationRun {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub model: ModelKind,
    pub q_matrix: QMatrix,
    pub parameters: ItemParameters,
    /// Latent-class mixing weights: the supplied/uniform prior, or the
    /// estimated weights when `EmConfig::estimate_class_weights` is set.
    pub class_weights: Vec<f64>,
    /// Whether the mixing weights were estimated rather than held fixed;
    /// estimated weights count as free parameters in information criteria.
    pub class_weights_estimated: bool,
    pub iterations: usize,
    pub log_likelihood: f64,
    pub log_likelihood_history: Vec<f64>,
    pub converged: bool,
}

impl CalibrationRun {
    pub fn n_items(&self) -> usize {
        self.q_matrix.n_items()
    }

    pub fn space(&self) -> LatentClassSpace {
        LatentClassSpace::unchecked(self.q_matrix.n_attributes())
    }
}

/// Expected counts aggregated across learners in one E-step.
#[derive(Debug, Clone)]
pub(crate) struct ExpectedCounts {
    n_classes: usize,
    /// Expected number of correct responses per (item, class).
    correct: Vec<f64>,
    /// Expected number of scored responses per (item, class).
    total: Vec<f64>,
    /// Expected class membership mass across all learners.
    pub(crate) class_mass: Vec<f64>,
}

impl ExpectedCounts {
    fn new(n_items: usize, n_classes: usize) -> Self {
        Self {
            n_classes,
            correct: vec![0.0; n_items * n_classes],
            total: vec![0.0; n_items * n_classes],
            class_mass: vec![0.0; n_classes],
        }
    }

    #[inline]
    pub(crate) fn correct_at(&self, item: ItemId, class: usize) -> f64 {
        self.correct[item * self.n_classes + class]
    }

    #[inline]
    pub(crate) fn total_at(&self, item: ItemId, class: usize) -> f64 {
        self.total[item * self.n_classes + class]
    }
}

/// Fits item parameters to a response matrix.
pub fn calibrate(
    q: &QMatrix,
    responses: &ResponseMatrix,
    model: ModelKind,
    config: &EmConfig,
) -> Result<CalibrationRun, CdmError> {
    if responses.n_items() != q.n_items() {
        return Err(CdmError::InvalidResponseMatrix(format!(
            "response matrix has {} items, q-matrix has {}",
            responses.n_items(),
            q.n_items()
        )));
    }
    if responses.n_learners() == 0 {
        return Err(CdmError::InvalidResponseMatrix(
            "response matrix has no learners".into(),
        ));
    }

    let space = LatentClassSpace::unchecked(q.n_attributes());
    let mut weights = resolve_prior(config, &space)?;
    let mut parameters = initial_parameters(model, q, config)?;

    let mut history = Vec::new();
    let mut prev_ll = f64::NEG_INFINITY;
    let mut converged = false;
    let mut iterations = 0;

    for iter in 1..=config.max_iterations {
        iterations = iter;
        let (counts, ll) = expected_counts(q, &space, &parameters, &weights, responses);
        history.push(ll);
        tracing::debug!(iteration = iter, log_likelihood = ll, "em iteration");

        if iter > 1 && (ll - prev_ll).abs() < config.convergence_tolerance {
            converged = true;
            break;
        }
        prev_ll = ll;

        if iter < config.max_iterations {
            parameters = match &parameters {
                ItemParameters::Dina(items) => ItemParameters::Dina(m_step_dina(
                    q,
                    &space,
                    &counts,
                    items,
                    config.parameter_floor,
                )?),
                ItemParameters::Gdina(items) => ItemParameters::Gdina(m_step_gdina(
                    q,
                    &space,
                    &counts,
                    items,
                    config.parameter_floor,
                )?),
            };
            if config.estimate_class_weights {
                weights = updated_weights(&counts, responses.n_learners());
            }
        }
    }

    let log_likelihood = history.last().copied().unwrap_or(f64::NEG_INFINITY);
    if converged {
        tracing::info!(
            model = model.as_str(),
            iterations,
            log_likelihood,
            "calibration converged"
        );
    } else {
        tracing::warn!(
            model = model.as_str(),
            iterations,
            log_likelihood,
            "calibration hit iteration cap without converging"
        );
    }

    Ok(CalibrationRun {
        id: Uuid::new_v4(),
        created_at: Utc::now(),
        model,
        q_matrix: q.clone(),
        parameters,
        class_weights: weights,
        class_weights_estimated: config.estimate_class_weights,
        iterations,
        log_likelihood,
        log_likelihood_history: history,
        converged,
    })
}

/// One E-step: posterior-weighted response counts and the marginal
/// log-likelihood under the given parameters. Learner posteriors are
/// independent, so they are computed in parallel; aggregation is a single
/// sequential reduction.
pub(crate) fn expected_counts(
    q: &QMatrix,
    space: &LatentClassSpace,
    parameters: &ItemParameters,
    weights: &[f64],
    responses: &ResponseMatrix,
) -> (ExpectedCounts, f64) {
    let n_classes = space.n_classes();
    let n_items = q.n_items();

    let log_prior: Vec<f64> = weights.iter().map(|&w| floor_prob(w).ln()).collect();
    let (log_p, log_q) = log_prob_tables(q, space, parameters);

    let per_learner: Vec<(Vec<f64>, f64)> = (0..responses.n_learners())
        .into_par_iter()
        .map(|learner| {
            row_posterior(
                responses.row(learner),
                n_classes,
                &log_prior,
                &log_p,
                &log_q,
            )
        })
        .collect();

    let mut counts = ExpectedCounts::new(n_items, n_classes);
    let mut total_ll = 0.0;
    for (learner, (posterior, ll)) in per_learner.iter().enumerate() {
        total_ll += ll;
        for class in 0..n_classes {
            counts.class_mass[class] += posterior[class];
        }
        for (item, response) in responses.row(learner).iter().enumerate() {
            let Some(correct) = response.as_correct() else {
                continue;
            };
            let base = item * n_classes;
            for class in 0..n_classes {
                counts.total[base + class] += posterior[class];
                if correct {
                    counts.correct[base + class] += posterior[class];
                }
            }
        }
    }

    (counts, total_ll)
}

/// Floored per-(item, class) log probability tables for correct and
/// incorrect responses.
fn log_prob_tables(
    q: &QMatrix,
    space: &LatentClassSpace,
    parameters: &ItemParameters,
) -> (Vec<f64>, Vec<f64>) {
    let n_classes = space.n_classes();
    let mut log_p = vec![0.0; q.n_items() * n_classes];
    let mut log_q = vec![0.0; q.n_items() * n_classes];
    for item in 0..q.n_items() {
        for class in space.classes() {
            let p = floor_prob(parameters.prob_correct(item, class, q, space));
            log_p[item * n_classes + class] = p.ln();
            log_q[item * n_classes + class] = (1.0 - p).ln();
        }
    }
    (log_p, log_q)
}

/// Normalized posterior over classes for one response row, plus the row's
/// marginal log-likelihood. Missing cells contribute no term; a row with
/// no scored cells yields the prior itself.
fn row_posterior(
    row: &[Response],
    n_classes: usize,
    log_prior: &[f64],
    log_p: &[f64],
    log_q: &[f64],
) -> (Vec<f64>, f64) {
    let mut log_post = log_prior.to_vec();
    for (item, response) in row.iter().enumerate() {
        let Some(correct) = response.as_correct() else {
            continue;
        };
        let table = if correct { log_p } else { log_q };
        let base = item * n_classes;
        for class in 0..n_classes {
            log_post[class] += table[base + class];
        }
    }
    let marginal = logsumexp(&log_post);
    let posterior: Vec<f64> = log_post.iter().map(|&v| (v - marginal).exp()).collect();
    (posterior, marginal)
}

/// Closed-form DINA update: slip from the satisfying classes, guess from
/// the rest. Items with no expected mass on one side keep their previous
/// value.
fn m_step_dina(
    q: &QMatrix,
    space: &LatentClassSpace,
    counts: &ExpectedCounts,
    previous: &[DinaItem],
    floor: f64,
) -> Result<Vec<DinaItem>, CdmError> {
    (0..q.n_items())
        .into_par_iter()
        .map(|item| {
            let mask = q.mask(item);
            let mut sat_total = 0.0;
            let mut sat_correct = 0.0;
            let mut unsat_total = 0.0;
            let mut unsat_correct = 0.0;
            for class in space.classes() {
                let total = counts.total_at(item, class);
                let correct = counts.correct_at(item, class);
                if space.satisfies(class, mask) {
                    sat_total += total;
                    sat_correct += correct;
                } else {
                    unsat_total += total;
                    unsat_correct += correct;
                }
            }

            let mut slip = if sat_total > 0.0 {
                (sat_total - sat_correct) / sat_total
            } else {
                previous[item].slip
            };
            let mut guess = if unsat_total > 0.0 {
                unsat_correct / unsat_total
            } else {
                previous[item].guess
            };

            slip = slip.clamp(floor, 1.0 - floor);
            guess = guess.clamp(floor, 1.0 - floor);
            if guess + slip >= 1.0 - floor {
                let scale = (1.0 - floor) / (guess + slip);
                guess *= scale;
                slip *= scale;
            }
            DinaItem::new(slip, guess)
        })
        .collect()
}

/// Closed-form saturated G-DINA update: each reduced pattern's probability
/// is its expected correct rate within the classes projecting to it.
fn m_step_gdina(
    q: &QMatrix,
    space: &LatentClassSpace,
    counts: &ExpectedCounts,
    previous: &[GdinaItem],
    floor: f64,
) -> Result<Vec<GdinaItem>, CdmError> {
    (0..q.n_items())
        .into_par_iter()
        .map(|item| {
            let mask = q.mask(item);
            let n_patterns = 1usize << q.required_count(item);
            let mut total = vec![0.0; n_patterns];
            let mut correct = vec![0.0; n_patterns];
            for class in space.classes() {
                let pattern = space.reduce(class, mask);
                total[pattern] += counts.total_at(item, class);
                correct[pattern] += counts.correct_at(item, class);
            }

            let probs: Vec<f64> = (0..n_patterns)
                .map(|pattern| {
                    let p = if total[pattern] > 0.0 {
                        correct[pattern] / total[pattern]
                    } else {
                        previous[item].prob_correct(pattern)
                    };
                    p.clamp(floor, 1.0 - floor)
                })
                .collect();
            GdinaItem::new(previous[item].link, probs)
        })
        .collect()
}

fn updated_weights(counts: &ExpectedCounts, n_learners: usize) -> Vec<f64> {
    let mut weights: Vec<f64> = counts
        .class_mass
        .iter()
        .map(|&m| (m / n_learners as f64).max(PROB_FLOOR))
        .collect();
    crate::numeric::normalize(&mut weights);
    weights
}

fn resolve_prior(config: &EmConfig, space: &LatentClassSpace) -> Result<Vec<f64>, CdmError> {
    match &config.class_prior {
        None => Ok(vec![1.0 / space.n_classes() as f64; space.n_classes()]),
        Some(prior) => {
            if prior.len() != space.n_classes() {
                return Err(CdmError::InvalidConfig(format!(
                    "class prior has {} entries, expected {}",
                    prior.len(),
                    space.n_classes()
                )));
            }
            if prior.iter().any(|&p| p < 0.0 || !p.is_finite()) {
                return Err(CdmError::InvalidConfig(
                    "class prior entries must be finite and non-negative".into(),
                ));
            }
            let sum: f64 = prior.iter().sum();
            if sum <= 0.0 {
                return Err(CdmError::InvalidConfig(
                    "class prior must have positive mass".into(),
                ));
            }
            Ok(prior.iter().map(|&p| p / sum).collect())
        }
    }
}

fn initial_parameters(
    model: ModelKind,
    q: &QMatrix,
    config: &EmConfig,
) -> Result<ItemParameters, CdmError> {
    match model {
        ModelKind::Dina => {
            let items = (0..q.n_items())
                .map(|_| DinaItem::new(0.2, 0.2))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ItemParameters::Dina(items))
        }
        ModelKind::Gdina => {
            let items = (0..q.n_items())
                .map(|item| {
                    let k = q.required_count(item);
                    let n_patterns = 1usize << k;
                    // ramp from guessing toward mastery with each extra
                    // mastered requirement
                    let probs: Vec<f64> = (0..n_patterns)
                        .map(|pattern| {
                            0.2 + 0.6 * (pattern as u32).count_ones() as f64 / k as f64
                        })
                        .collect();
                    GdinaItem::new(config.gdina_link, probs)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ItemParameters::Gdina(items))
        }
    }
}
