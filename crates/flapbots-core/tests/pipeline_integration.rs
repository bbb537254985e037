use flapbots_core::{
    Candidate, CandidateId, Canceller, Constant, ControllerError, Decision, DecisionError,
    EvalResult, EvaluationError, Evaluator, Experiment, ExperimentSettings, FlapbotsConfig,
    LevelConfig, LoggingDecision, Observation, PopulationSource, ReplayEvaluator, SearchError,
    Searcher, SimulationController, SimulationEvaluator, StopReason, SubmitError, Task,
    trace::read_traces,
};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Jumps whenever the agent sinks below 250px.
#[derive(Clone, Copy)]
struct Hover {
    height_index: usize,
}

impl Decision for Hover {
    fn kind(&self) -> &'static str {
        "hover"
    }

    fn decide(&mut self, observation: &Observation) -> Result<bool, DecisionError> {
        Ok(observation.values()[self.height_index] > 550.0 / 600.0)
    }
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn unthrottled_config(population: usize) -> FlapbotsConfig {
    FlapbotsConfig {
        population_size: population,
        ticks_per_second: 0,
        rng_seed: Some(42),
        ..FlapbotsConfig::default()
    }
}

fn wide_levels() -> Vec<LevelConfig> {
    let wide = LevelConfig {
        gap_tiles: 12,
        min_top_tile: 1,
        top_spread: 1,
        exit_score: 1,
    };
    vec![wide, wide]
}

fn never_jumpers(ids: impl IntoIterator<Item = u64>) -> Vec<Candidate> {
    ids.into_iter()
        .map(|id| Candidate::new(CandidateId(id), Constant(false)))
        .collect()
}

/// Fresh never-jumping batch every generation.
struct Grounded {
    batch: u64,
}

impl PopulationSource for Grounded {
    fn population(&mut self, generation: u64) -> Vec<Candidate> {
        never_jumpers((0..self.batch).map(|offset| generation * 100 + offset))
    }

    fn record(&mut self, _generation: u64, _results: &[EvalResult]) {}

    fn encode(&self, _id: CandidateId) -> Option<String> {
        None
    }
}

#[tokio::test]
async fn full_generation_returns_every_candidate_once() {
    let config = unthrottled_config(5);
    let canceller = Canceller::new();
    let controller = SimulationController::new(config.clone()).expect("controller");
    let searcher = Searcher::new(SimulationEvaluator::new(
        controller.submitter(),
        canceller.token(),
        config.solution_fitness,
    ));
    let driver = tokio::spawn(controller.run(canceller.token()));

    for generation in 0..2_u64 {
        let ids: Vec<u64> = (0..5).map(|offset| generation * 10 + offset).collect();
        let results = searcher
            .search(never_jumpers(ids.iter().copied()))
            .await
            .expect("generation evaluates");
        let mut returned: Vec<u64> = results.iter().map(|result| result.id.0).collect();
        returned.sort_unstable();
        assert_eq!(returned, ids);
    }

    canceller.cancel();
    let outcome = driver.await.expect("controller joins");
    assert!(matches!(outcome, Err(ControllerError::Cancelled)));
}

#[tokio::test]
async fn identical_never_jumpers_score_equally() {
    let config = unthrottled_config(4);
    let canceller = Canceller::new();
    let controller = SimulationController::new(config.clone()).expect("controller");
    let searcher = Searcher::new(SimulationEvaluator::new(
        controller.submitter(),
        canceller.token(),
        config.solution_fitness,
    ));
    let driver = tokio::spawn(controller.run(canceller.token()));

    let results = searcher.search(never_jumpers(1..=4)).await.expect("search");
    assert_eq!(results.len(), 4);
    let first = results[0].fitness;
    assert!(results.iter().all(|result| result.fitness == first));
    assert!(first < config.solution_fitness);
    assert!(results.iter().all(|result| !result.solved));

    canceller.cancel();
    let _ = driver.await.expect("controller joins");
}

#[tokio::test]
async fn cleared_candidate_is_solved_but_controller_keeps_running() {
    let config = FlapbotsConfig {
        levels: wide_levels(),
        ..unthrottled_config(2)
    };
    let height_index = config.vision;
    let canceller = Canceller::new();
    let controller = SimulationController::new(config.clone()).expect("controller");
    let mut snapshots = controller.subscribe();
    let searcher = Searcher::new(SimulationEvaluator::new(
        controller.submitter(),
        canceller.token(),
        config.solution_fitness,
    ));
    let driver = tokio::spawn(controller.run(canceller.token()));

    let candidates = vec![
        Candidate::new(CandidateId(1), Hover { height_index }),
        Candidate::new(CandidateId(2), Constant(false)),
    ];
    let results = searcher.search(candidates).await.expect("search");
    let hover = results
        .iter()
        .find(|result| result.id == CandidateId(1))
        .expect("hover result");
    assert!(hover.solved);
    assert!(hover.fitness < config.solution_fitness);

    // The controller accepts a second generation, so it did not go terminal.
    let again = searcher.search(never_jumpers([3, 4])).await.expect("second generation");
    assert_eq!(again.len(), 2);
    assert!(!driver.is_finished());
    snapshots.changed().await.expect("snapshot feed alive");
    assert!(snapshots.borrow().generation >= 2);

    canceller.cancel();
    let _ = driver.await.expect("controller joins");
}

#[tokio::test]
async fn cancelling_unblocks_waiting_workers_and_controller() {
    // Population 4 with only 2 submissions: the controller never leaves Setup.
    let config = FlapbotsConfig {
        population_size: 4,
        ticks_per_second: 60,
        ..FlapbotsConfig::default()
    };
    let canceller = Canceller::new();
    let controller = SimulationController::new(config.clone()).expect("controller");
    let evaluator =
        SimulationEvaluator::new(controller.submitter(), canceller.token(), config.solution_fitness);
    let driver = tokio::spawn(controller.run(canceller.token()));
    let workers: Vec<_> = [1, 2]
        .into_iter()
        .map(|id| {
            let evaluator = evaluator.clone();
            tokio::spawn(async move {
                evaluator
                    .evaluate(Candidate::new(CandidateId(id), Constant(false)))
                    .await
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    canceller.cancel();

    let tick = config.tick_interval().expect("throttled");
    for worker in workers {
        let err = tokio::time::timeout(tick * 4, worker)
            .await
            .expect("workers unblock promptly")
            .expect("worker joins")
            .expect_err("cancelled");
        assert!(matches!(err, EvaluationError::Cancelled(_)));
    }
    let outcome = tokio::time::timeout(tick * 4, driver)
        .await
        .expect("controller stops promptly")
        .expect("controller joins");
    assert!(matches!(outcome, Err(ControllerError::Cancelled)));
}

#[tokio::test]
async fn cancelling_unblocks_workers_waiting_for_inbox_room() {
    // Nothing drains the inbox, so the second worker waits in `send`.
    let config = FlapbotsConfig {
        population_size: 1,
        ..FlapbotsConfig::default()
    };
    let canceller = Canceller::new();
    let controller = SimulationController::new(config.clone()).expect("controller");
    let evaluator =
        SimulationEvaluator::new(controller.submitter(), canceller.token(), config.solution_fitness);
    let workers: Vec<_> = [1, 2]
        .into_iter()
        .map(|id| {
            let evaluator = evaluator.clone();
            tokio::spawn(async move {
                evaluator
                    .evaluate(Candidate::new(CandidateId(id), Constant(false)))
                    .await
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let (extra, _rx) = Task::new(Candidate::new(CandidateId(3), Constant(false)));
    assert_eq!(controller.submit(extra), Err(SubmitError::Full { capacity: 1 }));
    assert!(workers.iter().all(|worker| !worker.is_finished()));

    canceller.cancel();
    for worker in workers {
        let err = tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("workers unblock promptly")
            .expect("worker joins")
            .expect_err("cancelled");
        assert!(matches!(err, EvaluationError::Cancelled(_)));
    }
    assert_eq!(controller.iteration(), 0);
}

#[tokio::test]
async fn partial_generation_fails_fast() {
    let config = unthrottled_config(2);
    let canceller = Canceller::new();
    let controller = SimulationController::new(config.clone()).expect("controller");
    let searcher = Searcher::new(SimulationEvaluator::new(
        controller.submitter(),
        canceller.token(),
        config.solution_fitness,
    ));
    let driver = tokio::spawn(controller.run(canceller.token()));

    let err = tokio::time::timeout(Duration::from_secs(1), searcher.search(never_jumpers([1, 2, 3])))
        .await
        .expect("rejected without waiting")
        .expect_err("three candidates for two slots");
    assert!(matches!(err, SearchError::BatchSize { batch: 2, got: 3 }));

    let results = searcher.search(never_jumpers([4, 5])).await.expect("whole batch");
    assert_eq!(results.len(), 2);

    canceller.cancel();
    let _ = driver.await.expect("controller joins");
}

#[tokio::test]
async fn terminal_controller_ends_experiment_as_solved() {
    let config = FlapbotsConfig {
        solution_fitness: 1.0,
        ..unthrottled_config(2)
    };
    let canceller = Canceller::new();
    let controller = SimulationController::new(config.clone()).expect("controller");
    let evaluator =
        SimulationEvaluator::new(controller.submitter(), canceller.token(), config.solution_fitness);
    let driver = tokio::spawn(controller.run(canceller.token()));

    let mut experiment = Experiment::new(
        Searcher::new(evaluator),
        Grounded { batch: 2 },
        ExperimentSettings {
            iterations: 3,
            stop_on_solution: false,
        },
        canceller.clone(),
    );
    let summary = tokio::time::timeout(Duration::from_secs(10), experiment.run())
        .await
        .expect("experiment finishes")
        .expect("terminal controller is a clean stop");
    assert_eq!(summary.stop, StopReason::Solved);
    assert_eq!(summary.generations, 1);
    assert!(summary.best.expect("best").solved);

    let outcome = driver.await.expect("controller joins").expect("terminal run");
    assert_eq!(outcome.generations, 1);
}

#[tokio::test]
async fn recorded_run_replays_perfectly_and_idempotently() {
    let config = FlapbotsConfig {
        levels: wide_levels(),
        ..unthrottled_config(1)
    };
    let height_index = config.vision;
    let canceller = Canceller::new();
    let controller = SimulationController::new(config.clone()).expect("controller");
    let evaluator =
        SimulationEvaluator::new(controller.submitter(), canceller.token(), config.solution_fitness);
    let driver = tokio::spawn(controller.run(canceller.token()));

    let buffer = SharedBuffer::default();
    let recorder = LoggingDecision::new(Hover { height_index }, buffer.clone());
    evaluator
        .evaluate(Candidate::new(CandidateId(1), recorder))
        .await
        .expect("recorded run");
    canceller.cancel();
    let _ = driver.await.expect("controller joins");

    let traces = read_traces(buffer.0.lock().expect("buffer lock").as_slice());
    assert!(!traces.is_empty());
    assert!(traces.iter().all(|trace| trace.input.len() == config.observation_len()));

    let replay = ReplayEvaluator::new(traces);
    let first = replay
        .evaluate(Candidate::new(CandidateId(7), Hover { height_index }))
        .await
        .expect("replay");
    let second = replay
        .evaluate(Candidate::new(CandidateId(7), Hover { height_index }))
        .await
        .expect("replay");
    assert_eq!(first, second);
    assert!((first.fitness - 1.0).abs() < f64::EPSILON);
    assert!(first.solved);
}
