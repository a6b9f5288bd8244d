use serde::{Deserialize, Serialize};

use crate::model::LinkFunction;

/// EM calibration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmConfig {
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
    /// Lower bound kept between every estimated probability and 0 or 1.
    pub parameter_floor: f64,
    /// Re-estimate latent-class mixing weights each iteration instead of
    /// holding the prior fixed.
    pub estimate_class_weights: bool,
    /// Prior over latent classes; uniform when absent. Must have 2^K entries.
    pub class_prior: Option<Vec<f64>>,
    /// Link used for G-DINA delta reporting.
    pub gdina_link: LinkFunction,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            convergence_tolerance: 1e-5,
            parameter_floor: 1e-4,
            estimate_class_weights: false,
            class_prior: None,
            gdina_link: LinkFunction::Identity,
        }
    }
}

/// Adaptive testing session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatConfig {
    /// Stop once posterior entropy (nats) drops below this, after min_items.
    pub entropy_threshold: f64,
    pub max_items: usize,
    pub min_items: usize,
}

impl Default for CatConfig {
    fn default() -> Self {
        Self {
            entropy_threshold: 0.35,
            max_items: 20,
            min_items: 3,
        }
    }
}
