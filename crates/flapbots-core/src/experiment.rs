//! Generation loop connecting an evolutionary driver to a [`Searcher`].

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

use crate::bridge::{EvaluationError, Evaluator};
use crate::cancel::Canceller;
use crate::search::{SearchError, Searcher};
use crate::{Candidate, CandidateId, EvalResult};

/// Supplies candidates each generation and consumes their results.
pub trait PopulationSource: Send {
    /// Candidates for `generation`; IDs must be unique within the batch.
    fn population(&mut self, generation: u64) -> Vec<Candidate>;

    /// Feed back the results of `generation`.
    fn record(&mut self, generation: u64, results: &[EvalResult]);

    /// Serialised form of a candidate from the latest batch, if known.
    fn encode(&self, id: CandidateId) -> Option<String>;
}

/// Receives one report per completed generation. Implementations log their
/// own failures; evaluation never stops because a sink failed.
pub trait GenerationPersistence: Send {
    fn on_generation(&mut self, report: &GenerationReport);

    /// Push buffered reports out. Called once when a run ends.
    fn flush(&mut self) {}
}

/// No-op persistence sink.
#[derive(Debug, Default)]
pub struct NullPersistence;

impl GenerationPersistence for NullPersistence {
    fn on_generation(&mut self, _report: &GenerationReport) {}
}

/// Summary of one evaluated generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub generation: u64,
    pub evaluated: usize,
    pub best: EvalResult,
    pub mean_fitness: f64,
    pub solved: usize,
    pub encoded_best: Option<String>,
}

impl GenerationReport {
    /// Rank results by solved flag, then fitness. `None` for an empty batch.
    #[must_use]
    pub fn from_results(generation: u64, results: &[EvalResult]) -> Option<Self> {
        let best = *results
            .iter()
            .max_by_key(|result| (result.solved, OrderedFloat(result.fitness)))?;
        let total: f64 = results.iter().map(|result| result.fitness).sum();
        Some(Self {
            generation,
            evaluated: results.len(),
            best,
            mean_fitness: total / results.len() as f64,
            solved: results.iter().filter(|result| result.solved).count(),
            encoded_best: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentSettings {
    /// Generations to run before giving up.
    pub iterations: u64,
    /// Stop as soon as a generation contains a solved candidate.
    pub stop_on_solution: bool,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            iterations: 100,
            stop_on_solution: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    IterationsExhausted,
    Solved,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub generations: u64,
    pub stop: StopReason,
    pub best: Option<EvalResult>,
}

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("generation {generation} failed: {source}")]
    Generation {
        generation: u64,
        #[source]
        source: SearchError,
    },
    #[error("generation {0} produced no candidates")]
    EmptyGeneration(u64),
}

pub struct Experiment<E, P> {
    searcher: Searcher<E>,
    source: P,
    persistence: Box<dyn GenerationPersistence>,
    settings: ExperimentSettings,
    canceller: Canceller,
}

impl<E, P> fmt::Debug for Experiment<E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("settings", &self.settings)
            .field("cancelled", &self.canceller.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<E: Evaluator + 'static, P: PopulationSource> Experiment<E, P> {
    /// `canceller` is shared with the controller and bridges; the experiment
    /// trips it when it stops on its own.
    #[must_use]
    pub fn new(
        searcher: Searcher<E>,
        source: P,
        settings: ExperimentSettings,
        canceller: Canceller,
    ) -> Self {
        Self {
            searcher,
            source,
            persistence: Box::new(NullPersistence),
            settings,
            canceller,
        }
    }

    #[must_use]
    pub fn with_persistence(mut self, persistence: Box<dyn GenerationPersistence>) -> Self {
        self.persistence = persistence;
        self
    }

    #[must_use]
    pub fn source(&self) -> &P {
        &self.source
    }

    #[must_use]
    pub fn into_source(self) -> P {
        self.source
    }

    pub async fn run(&mut self) -> Result<ExperimentSummary, ExperimentError> {
        let token = self.canceller.token();
        let mut best: Option<EvalResult> = None;
        let mut generations = 0;
        let mut stop = StopReason::IterationsExhausted;

        for generation in 0..self.settings.iterations {
            if token.is_cancelled() {
                stop = StopReason::Cancelled;
                break;
            }
            let candidates = self.source.population(generation);
            let results = match self.searcher.search(candidates).await {
                Ok(results) => results,
                Err(SearchError::Evaluation(EvaluationError::Cancelled(_))) => {
                    stop = StopReason::Cancelled;
                    break;
                }
                Err(SearchError::Evaluation(EvaluationError::ControllerFinished(_))) => {
                    info!(generation, "simulation reached its solution threshold");
                    stop = StopReason::Solved;
                    break;
                }
                Err(_) if token.is_cancelled() => {
                    stop = StopReason::Cancelled;
                    break;
                }
                Err(source) => {
                    warn!(generation, error = %source, "generation failed");
                    self.persistence.flush();
                    return Err(ExperimentError::Generation { generation, source });
                }
            };

            let mut report = GenerationReport::from_results(generation, &results)
                .ok_or(ExperimentError::EmptyGeneration(generation))?;
            report.encoded_best = self.source.encode(report.best.id);
            info!(
                generation,
                id = %report.best.id,
                fitness = report.best.fitness,
                mean_fitness = report.mean_fitness,
                solved = report.best.solved,
                "best candidate"
            );

            self.persistence.on_generation(&report);
            self.source.record(generation, &results);
            generations = generation + 1;
            if best.is_none_or(|current| {
                (report.best.solved, OrderedFloat(report.best.fitness))
                    > (current.solved, OrderedFloat(current.fitness))
            }) {
                best = Some(report.best);
            }

            if self.settings.stop_on_solution && report.solved > 0 {
                stop = StopReason::Solved;
                break;
            }
        }

        self.persistence.flush();
        if stop != StopReason::Cancelled {
            self.canceller.cancel();
        }
        info!(generations, ?stop, "experiment finished");
        Ok(ExperimentSummary {
            generations,
            stop,
            best,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Constant, ReplayEvaluator, Trace};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Alternates constant decisions so half the batch agrees with a trace.
    #[derive(Default)]
    struct Alternating {
        recorded: Vec<(u64, usize)>,
        batch: usize,
    }

    impl PopulationSource for Alternating {
        fn population(&mut self, generation: u64) -> Vec<Candidate> {
            (0..self.batch as u64)
                .map(|offset| {
                    Candidate::new(CandidateId(generation * 100 + offset), Constant(offset % 2 == 0))
                })
                .collect()
        }

        fn record(&mut self, generation: u64, results: &[EvalResult]) {
            self.recorded.push((generation, results.len()));
        }

        fn encode(&self, id: CandidateId) -> Option<String> {
            Some(format!("candidate-{id}"))
        }
    }

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<GenerationReport>>>, Arc<AtomicUsize>);

    impl GenerationPersistence for Collect {
        fn on_generation(&mut self, report: &GenerationReport) {
            self.0.lock().expect("lock").push(report.clone());
        }

        fn flush(&mut self) {
            self.1.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn jump_traces() -> Vec<Trace> {
        vec![Trace {
            input: vec![0.0],
            output: true,
        }]
    }

    #[test]
    fn report_prefers_solved_then_fitness() {
        let results = [
            EvalResult {
                id: CandidateId(1),
                fitness: 50.0,
                solved: false,
            },
            EvalResult {
                id: CandidateId(2),
                fitness: 3.0,
                solved: true,
            },
            EvalResult {
                id: CandidateId(3),
                fitness: 1.0,
                solved: false,
            },
        ];
        let report = GenerationReport::from_results(4, &results).expect("report");
        assert_eq!(report.best.id, CandidateId(2));
        assert_eq!(report.solved, 1);
        assert!((report.mean_fitness - 18.0).abs() < 1e-12);
        assert!(GenerationReport::from_results(0, &[]).is_none());
    }

    #[tokio::test]
    async fn stops_on_solution_and_trips_canceller() {
        let canceller = Canceller::new();
        let sink = Collect::default();
        let mut experiment = Experiment::new(
            Searcher::new(ReplayEvaluator::new(jump_traces())),
            Alternating {
                batch: 4,
                ..Alternating::default()
            },
            ExperimentSettings::default(),
            canceller.clone(),
        )
        .with_persistence(Box::new(sink.clone()));
        let summary = experiment.run().await.expect("run");
        assert_eq!(summary.stop, StopReason::Solved);
        assert_eq!(summary.generations, 1);
        assert!(summary.best.expect("best").solved);
        assert!(canceller.is_cancelled());
        assert_eq!(sink.1.load(Ordering::SeqCst), 1);

        let reports = sink.0.lock().expect("lock");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].solved, 2);
        assert!(reports[0].encoded_best.as_deref().is_some_and(|text| text.starts_with("candidate-")));
        assert_eq!(experiment.source().recorded, vec![(0, 4)]);
    }

    #[tokio::test]
    async fn exhausts_iterations_without_stop_on_solution() {
        let canceller = Canceller::new();
        let mut experiment = Experiment::new(
            Searcher::new(ReplayEvaluator::new(jump_traces())),
            Alternating {
                batch: 2,
                ..Alternating::default()
            },
            ExperimentSettings {
                iterations: 3,
                stop_on_solution: false,
            },
            canceller.clone(),
        );
        let summary = experiment.run().await.expect("run");
        assert_eq!(summary.stop, StopReason::IterationsExhausted);
        assert_eq!(summary.generations, 3);
        assert_eq!(experiment.source().recorded.len(), 3);
    }

    #[tokio::test]
    async fn external_cancel_stops_before_next_generation() {
        let canceller = Canceller::new();
        canceller.cancel();
        let mut experiment = Experiment::new(
            Searcher::new(ReplayEvaluator::new(jump_traces())),
            Alternating {
                batch: 2,
                ..Alternating::default()
            },
            ExperimentSettings::default(),
            canceller,
        );
        let summary = experiment.run().await.expect("run");
        assert_eq!(summary.stop, StopReason::Cancelled);
        assert_eq!(summary.generations, 0);
        assert!(summary.best.is_none());
    }

    #[tokio::test]
    async fn failed_generation_is_an_error() {
        let mut experiment = Experiment::new(
            Searcher::new(ReplayEvaluator::new(Vec::new())),
            Alternating {
                batch: 2,
                ..Alternating::default()
            },
            ExperimentSettings::default(),
            Canceller::new(),
        );
        let err = experiment.run().await.expect_err("no traces");
        assert!(matches!(
            err,
            ExperimentError::Generation {
                generation: 0,
                source: SearchError::Evaluation(EvaluationError::NoTrainingData)
            }
        ));
    }
}
