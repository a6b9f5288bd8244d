//! Common types and constants shared across the engine.

use serde::{Deserialize, Serialize};

use crate::error::CdmError;

/// Index of an item in the calibrated pool.
pub type ItemId = usize;

/// Canonical id of a latent class: the bit pattern of its mastery profile.
pub type ClassId = usize;

/// Largest supported attribute count; 2^K classes are enumerated per space.
pub const MAX_ATTRIBUTES: usize = 20;

/// Floor applied to probabilities before logarithms.
pub const PROB_FLOOR: f64 = 1e-10;

/// Tolerance for posterior normalization checks.
pub const POSTERIOR_TOLERANCE: f64 = 1e-9;

/// One observed cell of the response matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    Correct,
    Incorrect,
    Missing,
}

impl Response {
    pub fn from_score(score: Option<u8>) -> Self {
        match score {
            Some(1) => Self::Correct,
            Some(_) => Self::Incorrect,
            None => Self::Missing,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// `Some(true)` for correct, `Some(false)` for incorrect, `None` if missing.
    pub fn as_correct(&self) -> Option<bool> {
        match self {
            Self::Correct => Some(true),
            Self::Incorrect => Some(false),
            Self::Missing => None,
        }
    }
}

impl From<bool> for Response {
    fn from(correct: bool) -> Self {
        if correct {
            Self::Correct
        } else {
            Self::Incorrect
        }
    }
}

/// Learners x items response matrix. Missing cells are skipped in
/// likelihood computation, never imputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMatrix {
    n_learners: usize,
    n_items: usize,
    cells: Vec<Response>,
}

impl ResponseMatrix {
    /// All-missing matrix of the given shape.
    pub fn new(n_learners: usize, n_items: usize) -> Self {
        Self {
            n_learners,
            n_items,
            cells: vec![Response::Missing; n_learners * n_items],
        }
    }

    /// Builds from per-learner rows; every row must have the same length.
    pub fn from_rows(rows: Vec<Vec<Response>>) -> Result<Self, CdmError> {
        let n_learners = rows.len();
        let n_items = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut cells = Vec::with_capacity(n_learners * n_items);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n_items {
                return Err(CdmError::InvalidResponseMatrix(format!(
                    "row {} has {} cells, expected {}",
                    i,
                    row.len(),
                    n_items
                )));
            }
            cells.extend(row);
        }
        Ok(Self {
            n_learners,
            n_items,
            cells,
        })
    }

    pub fn n_learners(&self) -> usize {
        self.n_learners
    }

    pub fn n_items(&self) -> usize {
        self.n_items
    }

    pub fn get(&self, learner: usize, item: ItemId) -> Response {
        self.cells[learner * self.n_items + item]
    }

    pub fn set(&mut self, learner: usize, item: ItemId, response: Response) {
        self.cells[learner * self.n_items + item] = response;
    }

    /// One learner's full response vector.
    pub fn row(&self, learner: usize) -> &[Response] {
        let start = learner * self.n_items;
        &self.cells[start..start + self.n_items]
    }

    /// Count of non-missing cells.
    pub fn n_observed(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_missing()).count()
    }
}
