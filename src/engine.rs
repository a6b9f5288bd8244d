//! Engine facade for the hosting service.
//!
//! One `CdmEngine` per deployment (fixed attribute count). Construction
//! builds the latent class space once; everything else is stateless
//! delegation, so a single engine can serve concurrent calibrations and
//! sessions without interior mutability.

use std::sync::Arc;

use crate::cat::{select_next_item, CatSession};
use crate::classify::{self, LatentClassPosterior, MasteryProfile};
use crate::config::{CatConfig, EmConfig};
use crate::em::{self, CalibrationRun};
use crate::error::CdmError;
use crate::latent::LatentClassSpace;
use crate::model::ModelKind;
use crate::qmatrix::{QMatrix, QMatrixDiagnostics};
use crate::types::{ItemId, Response, ResponseMatrix};

#[derive(Debug, Clone)]
pub struct CdmEngine {
    space: LatentClassSpace,
}

impl CdmEngine {
    pub fn new(n_attributes: usize) -> Result<Self, CdmError> {
        Ok(Self {
            space: LatentClassSpace::new(n_attributes)?,
        })
    }

    pub fn n_attributes(&self) -> usize {
        self.space.n_attributes()
    }

    pub fn space(&self) -> &LatentClassSpace {
        &self.space
    }

    /// Validates a raw 0/1 incidence matrix against this deployment's
    /// attribute count.
    pub fn validate_q_matrix(
        &self,
        raw: &[Vec<u8>],
    ) -> Result<(QMatrix, QMatrixDiagnostics), CdmError> {
        QMatrix::from_raw(raw.len(), self.space.n_attributes(), raw)
    }

    pub fn calibrate(
        &self,
        q: &QMatrix,
        responses: &ResponseMatrix,
        model: ModelKind,
        config: &EmConfig,
    ) -> Result<CalibrationRun, CdmError> {
        if q.n_attributes() != self.space.n_attributes() {
            return Err(CdmError::InvalidQMatrix(format!(
                "q-matrix has {} attributes, engine expects {}",
                q.n_attributes(),
                self.space.n_attributes()
            )));
        }
        em::calibrate(q, responses, model, config)
    }

    pub fn classify(
        &self,
        run: &CalibrationRun,
        responses: &[Response],
    ) -> Result<MasteryProfile, CdmError> {
        classify::classify(run, responses)
    }

    pub fn update_posterior(
        &self,
        posterior: &LatentClassPosterior,
        item: ItemId,
        correct: bool,
        run: &CalibrationRun,
    ) -> Result<LatentClassPosterior, CdmError> {
        classify::update_posterior(posterior, item, correct, run)
    }

    pub fn select_next_item(
        &self,
        posterior: &LatentClassPosterior,
        run: &CalibrationRun,
        pool: &[ItemId],
        administered: &[ItemId],
    ) -> Option<ItemId> {
        select_next_item(posterior, run, pool, administered)
    }

    pub fn start_session(&self, run: Arc<CalibrationRun>, config: CatConfig) -> CatSession {
        CatSession::new(run, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cat::SessionState;
    use crate::model::{DinaItem, ItemParameters};
    use crate::sim::{simulate_profiles, simulate_responses};

    #[test]
    fn test_full_pipeline() {
        // validate -> calibrate -> classify -> adaptive session
        let engine = CdmEngine::new(3).unwrap();
        let raw = vec![
            vec![1, 0, 0],
            vec![0, 1, 0],
            vec![0, 0, 1],
            vec![1, 1, 0],
            vec![0, 1, 1],
            vec![1, 0, 1],
        ];
        let (q, diag) = engine.validate_q_matrix(&raw).unwrap();
        assert!(diag.complete);

        let truth = ItemParameters::Dina(vec![
            DinaItem::new(0.1, 0.2).unwrap(),
            DinaItem::new(0.1, 0.2).unwrap(),
            DinaItem::new(0.1, 0.2).unwrap(),
            DinaItem::new(0.15, 0.25).unwrap(),
            DinaItem::new(0.15, 0.25).unwrap(),
            DinaItem::new(0.15, 0.25).unwrap(),
        ]);
        let profiles = simulate_profiles(engine.space(), 600, 21);
        let responses = simulate_responses(&q, &truth, engine.space(), &profiles, 0.0, 22);

        let run = engine
            .calibrate(&q, &responses, ModelKind::Dina, &EmConfig::default())
            .unwrap();
        assert!(run.converged);

        let profile = engine.classify(&run, responses.row(0)).unwrap();
        assert_eq!(profile.attribute_marginals.len(), 3);

        let mut session = engine.start_session(Arc::new(run), CatConfig::default());
        let first = session.next_item().unwrap();
        session.submit_response(true);
        assert!(!session.administered().is_empty());
        assert_ne!(session.state(), SessionState::Terminated);
        assert!(first < 6);
    }

    #[test]
    fn test_attribute_count_mismatch_rejected() {
        let engine = CdmEngine::new(4).unwrap();
        let (q, _) = QMatrix::from_raw(1, 2, &[vec![1, 0]]).unwrap();
        let responses = ResponseMatrix::new(1, 1);
        let err = engine
            .calibrate(&q, &responses, ModelKind::Dina, &EmConfig::default())
            .unwrap_err();
        assert!(matches!(err, CdmError::InvalidQMatrix(_)));
    }

    #[test]
    fn test_all_zero_rows_rejected_before_calibration() {
        // an all-zero q-matrix row never reaches the EM loop
        let engine = CdmEngine::new(2).unwrap();
        let err = engine
            .validate_q_matrix(&[vec![0, 0], vec![1, 0]])
            .unwrap_err();
        assert!(matches!(err, CdmError::InvalidQMatrix(_)));
    }

    #[test]
    fn test_engine_rejects_oversized_space() {
        assert!(matches!(
            CdmEngine::new(25).unwrap_err(),
            CdmError::AttributeSpaceTooLarge { .. }
        ));
    }
}
