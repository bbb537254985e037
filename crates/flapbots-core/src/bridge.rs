//! Evaluation bridges: turn a candidate into an [`EvalResult`].

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::controller::Mode;
use crate::decision::{Decision, Observation};
use crate::scoring::{ReplayTally, is_solved, replay_score};
use crate::task::{Task, TaskSender};
use crate::trace::Trace;
use crate::{Candidate, CandidateId, EvalResult};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("evaluation of candidate {0} was cancelled")]
    Cancelled(CandidateId),
    #[error("simulation controller stopped before scoring candidate {0}")]
    ControllerClosed(CandidateId),
    #[error("simulation controller finished before scoring candidate {0}")]
    ControllerFinished(CandidateId),
    #[error("no training data to replay")]
    NoTrainingData,
}

/// Scores one candidate. Implementations are shared across concurrent workers.
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        candidate: Candidate,
    ) -> impl Future<Output = Result<EvalResult, EvaluationError>> + Send;

    /// Generation sizes must be a multiple of this, when set.
    fn batch_size(&self) -> Option<usize> {
        None
    }
}

/// Hands candidates to a running [`SimulationController`](crate::SimulationController)
/// and waits for the score.
#[derive(Debug, Clone)]
pub struct SimulationEvaluator {
    sender: TaskSender,
    cancel: CancelToken,
    solution_fitness: f64,
}

impl SimulationEvaluator {
    #[must_use]
    pub fn new(sender: TaskSender, cancel: CancelToken, solution_fitness: f64) -> Self {
        Self {
            sender,
            cancel,
            solution_fitness,
        }
    }
}

impl Evaluator for SimulationEvaluator {
    async fn evaluate(&self, candidate: Candidate) -> Result<EvalResult, EvaluationError> {
        let id = candidate.id;
        let (task, result) = Task::new(candidate);

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(EvaluationError::Cancelled(id)),
            sent = self.sender.send(task) => {
                if sent.is_err() {
                    return Err(self.closed(id));
                }
            }
        }

        let score = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(EvaluationError::Cancelled(id)),
            received = result => received.map_err(|_| self.closed(id))?,
        };

        let solved = is_solved(&score, self.solution_fitness);
        debug!(candidate = %id, fitness = score.fitness, solved, "candidate evaluated");
        Ok(EvalResult {
            id,
            fitness: score.fitness,
            solved,
        })
    }

    /// The controller only starts a generation once every slot is bound.
    fn batch_size(&self) -> Option<usize> {
        Some(self.sender.capacity())
    }
}

impl SimulationEvaluator {
    /// Classify a vanished controller: cancelled, terminal, or gone early.
    fn closed(&self, id: CandidateId) -> EvaluationError {
        if self.cancel.is_cancelled() {
            EvaluationError::Cancelled(id)
        } else if self.sender.controller_mode() == Mode::Terminal {
            EvaluationError::ControllerFinished(id)
        } else {
            EvaluationError::ControllerClosed(id)
        }
    }
}

/// Scores candidates by agreement with recorded traces.
#[derive(Debug, Clone)]
pub struct ReplayEvaluator {
    traces: Arc<Vec<Trace>>,
}

impl ReplayEvaluator {
    #[must_use]
    pub fn new(traces: Vec<Trace>) -> Self {
        Self {
            traces: Arc::new(traces),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

/// Replay each recorded observation through `decision`; failures count as
/// "do not jump".
pub fn replay(decision: &mut dyn Decision, traces: &[Trace]) -> ReplayTally {
    let correct = traces
        .iter()
        .filter(|trace| {
            let observation = Observation::new(trace.input.clone());
            decision.decide(&observation).unwrap_or(false) == trace.output
        })
        .count();
    ReplayTally {
        correct,
        total: traces.len(),
    }
}

impl Evaluator for ReplayEvaluator {
    async fn evaluate(&self, candidate: Candidate) -> Result<EvalResult, EvaluationError> {
        if self.traces.is_empty() {
            return Err(EvaluationError::NoTrainingData);
        }
        let Candidate { id, mut decision } = candidate;
        let tally = replay(decision.as_mut(), &self.traces);
        let (fitness, solved) = replay_score(&tally);
        debug!(
            candidate = %id,
            correct = tally.correct,
            total = tally.total,
            solved,
            "candidate replayed"
        );
        Ok(EvalResult { id, fitness, solved })
    }
}
