//! Search coordinator: one concurrent worker per candidate.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::bridge::{EvaluationError, Evaluator};
use crate::{Candidate, CandidateId, EvalResult};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error("evaluation worker failed: {0}")]
    Worker(String),
    #[error("expected {expected} results, received {received}")]
    Incomplete { expected: usize, received: usize },
    #[error("candidate {0} submitted more than once")]
    DuplicateCandidate(CandidateId),
    #[error("generation of {got} candidates is not a multiple of the batch size {batch}")]
    BatchSize { batch: usize, got: usize },
}

/// Evaluates whole generations against a shared evaluator.
#[derive(Debug)]
pub struct Searcher<E> {
    evaluator: Arc<E>,
}

impl<E> Clone for Searcher<E> {
    fn clone(&self) -> Self {
        Self {
            evaluator: Arc::clone(&self.evaluator),
        }
    }
}

impl<E: Evaluator + 'static> Searcher<E> {
    #[must_use]
    pub fn new(evaluator: E) -> Self {
        Self {
            evaluator: Arc::new(evaluator),
        }
    }

    #[must_use]
    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Evaluate every candidate concurrently and wait for all of them.
    ///
    /// Results are unordered. When any worker fails, the first observed error
    /// is returned after every worker has finished.
    pub async fn search(&self, candidates: Vec<Candidate>) -> Result<Vec<EvalResult>, SearchError> {
        let mut seen = HashSet::with_capacity(candidates.len());
        if let Some(duplicate) = candidates.iter().find(|candidate| !seen.insert(candidate.id)) {
            return Err(SearchError::DuplicateCandidate(duplicate.id));
        }
        if let Some(batch) = self.evaluator.batch_size()
            && !candidates.len().is_multiple_of(batch)
        {
            return Err(SearchError::BatchSize {
                batch,
                got: candidates.len(),
            });
        }

        let expected = candidates.len();
        let mut workers = JoinSet::new();
        for candidate in candidates {
            let evaluator = Arc::clone(&self.evaluator);
            workers.spawn(async move { evaluator.evaluate(candidate).await });
        }

        let mut results = Vec::with_capacity(expected);
        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(err)) => {
                    debug!(error = %err, "evaluation failed");
                    first_error.get_or_insert(SearchError::Evaluation(err));
                }
                Err(err) => {
                    warn!(error = %err, "evaluation worker aborted");
                    first_error.get_or_insert(SearchError::Worker(err.to_string()));
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if results.len() != expected {
            return Err(SearchError::Incomplete {
                expected,
                received: results.len(),
            });
        }
        Ok(results)
    }
}
