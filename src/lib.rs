//! # tiku-cdm - Cognitive diagnosis and adaptive testing core
//!
//! Pure Rust implementation of the psychometric engine behind the exam
//! preparation platform:
//!
//! - **DINA / G-DINA** - latent-class cognitive diagnosis models
//! - **EM-MMLE** - marginal maximum likelihood calibration of item
//!   parameters from binary response data
//! - **Classification** - MAP/EAP mastery profiles from per-learner
//!   posteriors over attribute patterns
//! - **CAT** - expected-entropy-reduction item selection with stopping
//!   rules, as a per-session state machine
//!
//! The crate owns no I/O: response data arrives as in-memory matrices and
//! calibrated parameters leave as serializable values. Persistence,
//! transport, and authentication belong to the hosting backend.
//!
//! ## Modules
//!
//! - [`qmatrix`] - item-by-attribute incidence matrix validation
//! - [`latent`] - the 2^K latent class space
//! - [`model`] - DINA and G-DINA response models
//! - [`em`] - EM calibration producing immutable [`em::CalibrationRun`]s
//! - [`classify`] - posteriors, incremental updates, mastery profiles
//! - [`fit`] - item/model fit statistics and information criteria
//! - [`cat`] - adaptive item selection sessions
//! - [`sim`] - seeded response simulation for tests and benchmarks
//! - [`engine`] - facade bundling the above for the hosting service

pub mod cat;
pub mod classify;
pub mod config;
pub mod em;
pub mod engine;
pub mod error;
pub mod fit;
pub mod latent;
pub mod model;
pub mod numeric;
pub mod qmatrix;
pub mod sim;
pub mod types;

pub use cat::{select_next_item, CatSession, SessionState, StopReason};
pub use classify::{classify, update_posterior, LatentClassPosterior, MasteryProfile};
pub use config::{CatConfig, EmConfig};
pub use em::{calibrate, CalibrationRun};
pub use engine::CdmEngine;
pub use error::CdmError;
pub use fit::{ItemFit, ModelFit};
pub use latent::LatentClassSpace;
pub use model::{DinaItem, GdinaItem, ItemParameters, LinkFunction, ModelKind};
pub use qmatrix::{QMatrix, QMatrixDiagnostics};
pub use types::{ItemId, Response, ResponseMatrix};
