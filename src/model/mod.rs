//! Item response models: DINA and G-DINA.
//!
//! Both map (item, latent class, parameters) to a correct-response
//! probability. DINA is the all-or-nothing special case; G-DINA keys the
//! probability on exactly which required attributes are mastered.

mod dina;
mod gdina;

pub use dina::DinaItem;
pub use gdina::{GdinaItem, LinkFunction};

use serde::{Deserialize, Serialize};

use crate::latent::LatentClassSpace;
use crate::qmatrix::QMatrix;
use crate::types::{ClassId, ItemId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Dina,
    Gdina,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dina => "dina",
            Self::Gdina => "gdina",
        }
    }
}

/// Calibrated parameters for a full item pool. Produced by calibration,
/// immutable afterwards; re-calibration yields a new set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "model", content = "items")]
pub enum ItemParameters {
    Dina(Vec<DinaItem>),
    Gdina(Vec<GdinaItem>),
}

impl ItemParameters {
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Dina(_) => ModelKind::Dina,
            Self::Gdina(_) => ModelKind::Gdina,
        }
    }

    pub fn n_items(&self) -> usize {
        match self {
            Self::Dina(items) => items.len(),
            Self::Gdina(items) => items.len(),
        }
    }

    /// Free parameter count, for information criteria.
    pub fn n_free_parameters(&self) -> usize {
        match self {
            Self::Dina(items) => 2 * items.len(),
            Self::Gdina(items) => items.iter().map(|i| i.n_parameters()).sum(),
        }
    }

    /// P(correct | item, latent class). The shared kernel behind the
    /// E-step, classification, fit statistics, and item selection.
    pub fn prob_correct(
        &self,
        item: ItemId,
        class: ClassId,
        q: &QMatrix,
        space: &LatentClassSpace,
    ) -> f64 {
        match self {
            Self::Dina(items) => items[item].prob_correct(space.satisfies(class, q.mask(item))),
            Self::Gdina(items) => items[item].prob_correct(space.reduce(class, q.mask(item))),
        }
    }
}
