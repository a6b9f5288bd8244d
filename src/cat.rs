//! Computerized adaptive testing: entropy-driven item selection and the
//! per-session state machine.
//!
//! Each administered response updates the session posterior; the next item
//! is the one minimizing expected posterior entropy over the two possible
//! outcomes. A session is a single-owner value, so its operations are
//! naturally serialized.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::classify::{update_posterior, LatentClassPosterior, MasteryProfile};
use crate::config::CatConfig;
use crate::em::CalibrationRun;
use crate::numeric::{entropy, floor_prob, normalize};
use crate::types::{ItemId, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingItem,
    AwaitingResponse,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EntropyThreshold,
    MaxItems,
    PoolExhausted,
}

/// Picks the pool item with the lowest expected posterior entropy,
/// weighting each outcome by its predicted probability. Administered items
/// are excluded; ties break to the lowest item id. Returns `None` when no
/// candidate remains.
pub fn select_next_item(
    posterior: &LatentClassPosterior,
    run: &CalibrationRun,
    pool: &[ItemId],
    administered: &[ItemId],
) -> Option<ItemId> {
    let space = run.space();
    let mut candidates: Vec<ItemId> = pool
        .iter()
        .copied()
        .filter(|&item| item < run.n_items() && !administered.contains(&item))
        .collect();
    candidates.sort_unstable();
    candidates.dedup();

    let mut best: Option<(ItemId, f64)> = None;
    for item in candidates {
        let mut post_correct = Vec::with_capacity(posterior.n_classes());
        let mut post_incorrect = Vec::with_capacity(posterior.n_classes());
        let mut p_correct = 0.0;
        for class in space.classes() {
            let p = floor_prob(
                run.parameters
                    .prob_correct(item, class, &run.q_matrix, &space),
            );
            let mass = posterior.prob(class);
            p_correct += mass * p;
            post_correct.push(mass * p);
            post_incorrect.push(mass * (1.0 - p));
        }
        normalize(&mut post_correct);
        normalize(&mut post_incorrect);
        let expected =
            p_correct * entropy(&post_correct) + (1.0 - p_correct) * entropy(&post_incorrect);

        // ascending candidate order makes a strict comparison break ties
        // toward the lowest item id
        if best.map_or(true, |(_, score)| expected < score) {
            best = Some((item, expected));
        }
    }
    best.map(|(item, _)| item)
}

/// One adaptive test session over a calibrated item pool.
#[derive(Debug, Clone)]
pub struct CatSession {
    run: Arc<CalibrationRun>,
    config: CatConfig,
    posterior: LatentClassPosterior,
    administered: Vec<ItemId>,
    responses: Vec<Response>,
    pending: Option<ItemId>,
    state: SessionState,
    stop_reason: Option<StopReason>,
    outcome: Option<MasteryProfile>,
}

impl CatSession {
    /// Starts a session at the calibration prior.
    pub fn new(run: Arc<CalibrationRun>, config: CatConfig) -> Self {
        let posterior = LatentClassPosterior::from_weights(&run.class_weights);
        Self {
            run,
            config,
            posterior,
            administered: Vec::new(),
            responses: Vec::new(),
            pending: None,
            state: SessionState::AwaitingItem,
            stop_reason: None,
            outcome: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn posterior(&self) -> &LatentClassPosterior {
        &self.posterior
    }

    pub fn administered(&self) -> &[ItemId] {
        &self.administered
    }

    /// Responses in administration order, parallel to `administered`.
    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Final mastery profile, available once terminated.
    pub fn outcome(&self) -> Option<&MasteryProfile> {
        self.outcome.as_ref()
    }

    /// Selects the next item to administer. Idempotent while a response is
    /// pending; terminates the session when the pool is exhausted.
    pub fn next_item(&mut self) -> Option<ItemId> {
        match self.state {
            SessionState::Terminated => None,
            SessionState::AwaitingResponse => self.pending,
            SessionState::AwaitingItem => {
                let pool: Vec<ItemId> = (0..self.run.n_items()).collect();
                match select_next_item(&self.posterior, &self.run, &pool, &self.administered) {
                    Some(item) => {
                        self.pending = Some(item);
                        self.state = SessionState::AwaitingResponse;
                        Some(item)
                    }
                    None => {
                        self.terminate(StopReason::PoolExhausted);
                        None
                    }
                }
            }
        }
    }

    /// Records the response to the pending item, updates the posterior,
    /// and fires stopping rules. Ignored unless a response is pending.
    pub fn submit_response(&mut self, correct: bool) -> SessionState {
        if self.state != SessionState::AwaitingResponse {
            tracing::warn!(state = ?self.state, "response submitted with no pending item");
            return self.state;
        }
        let Some(item) = self.pending.take() else {
            return self.state;
        };

        match update_posterior(&self.posterior, item, correct, &self.run) {
            Ok(updated) => self.posterior = updated,
            Err(err) => {
                tracing::warn!(error = %err, item, "posterior update failed");
                self.pending = Some(item);
                return self.state;
            }
        }
        self.administered.push(item);
        self.responses.push(Response::from(correct));

        if self.administered.len() >= self.config.max_items {
            self.terminate(StopReason::MaxItems);
        } else if self.administered.len() >= self.config.min_items
            && self.posterior.entropy() < self.config.entropy_threshold
        {
            self.terminate(StopReason::EntropyThreshold);
        } else if self.administered.len() >= self.run.n_items() {
            self.terminate(StopReason::PoolExhausted);
        } else {
            self.state = SessionState::AwaitingItem;
        }
        self.state
    }

    fn terminate(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
        self.outcome = Some(MasteryProfile::from_posterior(
            &self.posterior,
            &self.run.space(),
            !self.administered.is_empty(),
        ));
        self.state = SessionState::Terminated;
        tracing::info!(
            reason = ?reason,
            items = self.administered.len(),
            entropy = self.posterior.entropy(),
            "cat session terminated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DinaItem, ItemParameters, ModelKind};
    use crate::qmatrix::QMatrix;
    use chrono::Utc;
    use uuid::Uuid;

    fn run_with(items: Vec<DinaItem>, q_rows: &[Vec<u8>], k: usize) -> Arc<CalibrationRun> {
        let (q, _) = QMatrix::from_raw(q_rows.len(), k, q_rows).unwrap();
        let n_classes = 1 << k;
        Arc::new(CalibrationRun {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            model: ModelKind::Dina,
            q_matrix: q,
            parameters: ItemParameters::Dina(items),
            class_weights: vec![1.0 / n_classes as f64; n_classes],
            class_weights_estimated: false,
            iterations: 1,
            log_likelihood: 0.0,
            log_likelihood_history: vec![0.0],
            converged: true,
        })
    }

    fn sharp(n: usize) -> Vec<DinaItem> {
        (0..n).map(|_| DinaItem::new(0.05, 0.05).unwrap()).collect()
    }

    #[test]
    fn test_informative_item_preferred() {
        // item 0 is sharp, item 1 is nearly noise; from a uniform posterior
        // the sharp item must win
        let run = run_with(
            vec![
                DinaItem::new(0.05, 0.05).unwrap(),
                DinaItem::new(0.45, 0.45).unwrap(),
            ],
            &[vec![1, 0], vec![1, 0]],
            2,
        );
        let posterior = LatentClassPosterior::from_weights(&run.class_weights);
        let pick = select_next_item(&posterior, &run, &[0, 1], &[]);
        assert_eq!(pick, Some(0));
    }

    #[test]
    fn test_tie_breaks_to_lowest_item_id() {
        let run = run_with(sharp(2), &[vec![1, 0], vec![1, 0]], 2);
        let posterior = LatentClassPosterior::from_weights(&run.class_weights);
        assert_eq!(select_next_item(&posterior, &run, &[1, 0], &[]), Some(0));
    }

    #[test]
    fn test_administered_items_excluded() {
        let run = run_with(sharp(2), &[vec![1, 0], vec![1, 0]], 2);
        let posterior = LatentClassPosterior::from_weights(&run.class_weights);
        assert_eq!(select_next_item(&posterior, &run, &[0, 1], &[0]), Some(1));
        assert_eq!(select_next_item(&posterior, &run, &[0, 1], &[0, 1]), None);
    }

    #[test]
    fn test_single_item_pool_returns_once_then_none() {
        let run = run_with(sharp(1), &[vec![1, 0]], 2);
        let posterior = LatentClassPosterior::from_weights(&run.class_weights);
        let first = select_next_item(&posterior, &run, &[0], &[]);
        assert_eq!(first, Some(0));
        let second = select_next_item(&posterior, &run, &[0], &[0]);
        assert_eq!(second, None);
    }

    #[test]
    fn test_session_never_repeats_items() {
        let run = run_with(
            sharp(4),
            &[vec![1, 0], vec![0, 1], vec![1, 1], vec![1, 0]],
            2,
        );
        let mut session = CatSession::new(run, CatConfig {
            entropy_threshold: 0.0,
            max_items: 10,
            min_items: 1,
        });
        let mut seen = Vec::new();
        while let Some(item) = session.next_item() {
            assert!(!seen.contains(&item), "item {} repeated", item);
            seen.push(item);
            session.submit_response(true);
        }
        assert_eq!(session.state(), SessionState::Terminated);
        assert_eq!(seen.len(), 4);
        assert_eq!(session.stop_reason(), Some(StopReason::PoolExhausted));
    }

    #[test]
    fn test_entropy_stopping_rule() {
        let run = run_with(
            sharp(6),
            &[
                vec![1, 0],
                vec![0, 1],
                vec![1, 1],
                vec![1, 0],
                vec![0, 1],
                vec![1, 1],
            ],
            2,
        );
        let mut session = CatSession::new(run, CatConfig {
            entropy_threshold: 0.4,
            max_items: 6,
            min_items: 2,
        });
        let mut administered = 0;
        while session.next_item().is_some() {
            session.submit_response(true);
            administered += 1;
        }
        assert_eq!(session.state(), SessionState::Terminated);
        // consistent correct answers collapse the posterior quickly
        assert!(administered < 6);
        assert_eq!(session.stop_reason(), Some(StopReason::EntropyThreshold));
        let outcome = session.outcome().unwrap();
        assert!(outcome.determined);
        assert_eq!(outcome.map_class, 0b11);
    }

    #[test]
    fn test_max_items_stopping_rule() {
        let run = run_with(
            vec![DinaItem::new(0.3, 0.3).unwrap(); 5],
            &[vec![1, 0], vec![0, 1], vec![1, 1], vec![1, 0], vec![0, 1]],
            2,
        );
        let mut session = CatSession::new(run, CatConfig {
            entropy_threshold: 0.01,
            max_items: 3,
            min_items: 1,
        });
        let mut administered = 0;
        while session.next_item().is_some() {
            session.submit_response(administered % 2 == 0);
            administered += 1;
        }
        assert_eq!(administered, 3);
        assert_eq!(session.stop_reason(), Some(StopReason::MaxItems));
    }

    #[test]
    fn test_next_item_idempotent_while_pending() {
        let run = run_with(sharp(2), &[vec![1, 0], vec![0, 1]], 2);
        let mut session = CatSession::new(run, CatConfig::default());
        let first = session.next_item();
        assert_eq!(session.state(), SessionState::AwaitingResponse);
        assert_eq!(session.next_item(), first);
        assert_eq!(session.administered().len(), 0);
    }

    #[test]
    fn test_response_without_pending_item_ignored() {
        let run = run_with(sharp(2), &[vec![1, 0], vec![0, 1]], 2);
        let mut session = CatSession::new(run, CatConfig::default());
        let state = session.submit_response(true);
        assert_eq!(state, SessionState::AwaitingItem);
        assert!(session.administered().is_empty());
    }
}
