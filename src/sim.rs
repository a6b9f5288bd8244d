//! Seeded response simulation.
//!
//! Generates synthetic response matrices from known profiles and item
//! parameters. Used by tests and benchmarks; also handy for piloting a
//! q-matrix design before real response data exists.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::latent::LatentClassSpace;
use crate::model::ItemParameters;
use crate::qmatrix::QMatrix;
use crate::types::{ClassId, Response, ResponseMatrix};

/// Draws n latent classes uniformly at random.
pub fn simulate_profiles(space: &LatentClassSpace, n: usize, seed: u64) -> Vec<ClassId> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(0..space.n_classes())).collect()
}

/// Samples a response matrix for the given true profiles. Each cell is
/// correct with the model probability; `missing_rate` of cells are dropped
/// to Missing. Deterministic for a fixed seed.
pub fn simulate_responses(
    q: &QMatrix,
    parameters: &ItemParameters,
    space: &LatentClassSpace,
    profiles: &[ClassId],
    missing_rate: f64,
    seed: u64,
) -> ResponseMatrix {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let missing_rate = missing_rate.clamp(0.0, 1.0);
    let mut matrix = ResponseMatrix::new(profiles.len(), q.n_items());
    for (learner, &class) in profiles.iter().enumerate() {
        for item in 0..q.n_items() {
            if missing_rate > 0.0 && rng.gen::<f64>() < missing_rate {
                continue;
            }
            let p = parameters.prob_correct(item, class, q, space);
            let correct = rng.gen::<f64>() < p;
            matrix.set(learner, item, Response::from(correct));
        }
    }
    matrix
}
