//! Session flows behind each subcommand.

use anyhow::{Context, Result, bail};
use flapbots_brain::{MlpPopulation, PopulationSettings};
use flapbots_core::{
    Candidate, CandidateId, Canceller, ControllerError, EvaluationError, Evaluator,
    ExperimentSettings, ExperimentSummary, FlapbotsConfig, InteractiveDecision, LoggingDecision,
    Experiment, ReplayEvaluator, Searcher, SimulationController, SimulationEvaluator,
    trace::load_traces,
};
use flapbots_storage::{CandidateRecord, Storage, StoragePipeline};
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::terminal::{TerminalInput, watch_status};

/// Knobs shared by the `evolve` and `train` flows.
#[derive(Debug, Clone)]
pub struct EvolveOptions {
    pub iterations: u64,
    pub stop_on_solution: bool,
    pub hidden: usize,
    pub database: Option<PathBuf>,
    pub show_status: bool,
}

fn population_for(config: &FlapbotsConfig, inputs: usize, hidden: usize) -> MlpPopulation {
    let settings = PopulationSettings {
        size: config.population_size,
        inputs,
        hidden,
        ..PopulationSettings::default()
    };
    MlpPopulation::new(settings, config.rng_seed.unwrap_or(0))
}

fn open_pipeline(database: Option<&Path>) -> Result<Option<StoragePipeline>> {
    database
        .map(|path| {
            let path_str = path.to_str().context("database path must be valid UTF-8")?;
            StoragePipeline::new(path_str)
                .with_context(|| format!("failed to open database {}", path.display()))
        })
        .transpose()
}

async fn settle_controller(driver: JoinHandle<Result<flapbots_core::RunSummary, ControllerError>>) {
    match driver.await {
        Ok(Ok(summary)) => info!(
            generations = summary.generations,
            best_fitness = summary.best_fitness,
            "controller reached its solution threshold"
        ),
        Ok(Err(ControllerError::Cancelled)) => {}
        Ok(Err(err)) => warn!(error = %err, "controller stopped with an error"),
        Err(err) => warn!(error = %err, "controller task failed"),
    }
}

/// Evolve model-driven candidates against the live simulation.
pub async fn evolve(
    config: FlapbotsConfig,
    options: EvolveOptions,
    canceller: Canceller,
) -> Result<ExperimentSummary> {
    let controller = SimulationController::new(config.clone())?;
    let evaluator = SimulationEvaluator::new(
        controller.submitter(),
        canceller.token(),
        config.solution_fitness,
    );
    let status = options
        .show_status
        .then(|| tokio::spawn(watch_status(controller.subscribe())));
    let driver = tokio::spawn(controller.run(canceller.token()));

    let population = population_for(&config, config.observation_len(), options.hidden);
    let mut experiment = Experiment::new(
        Searcher::new(evaluator),
        population,
        ExperimentSettings {
            iterations: options.iterations,
            stop_on_solution: options.stop_on_solution,
        },
        canceller.clone(),
    );
    if let Some(pipeline) = open_pipeline(options.database.as_deref())? {
        experiment = experiment.with_persistence(Box::new(pipeline));
    }

    let outcome = experiment.run().await;
    canceller.cancel();
    settle_controller(driver).await;
    if let Some(status) = status {
        let _ = status.await;
    }
    drop(experiment);
    Ok(outcome?)
}

/// Let a human play, appending every decision to `trace_path`.
pub async fn record(
    config: FlapbotsConfig,
    trace_path: &Path,
    attempts: u32,
    canceller: Canceller,
) -> Result<Vec<f64>> {
    let config = FlapbotsConfig {
        population_size: 1,
        ..config
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(trace_path)
        .with_context(|| format!("failed to open trace file {}", trace_path.display()))?;

    let controller = SimulationController::new(config.clone())?;
    let evaluator = SimulationEvaluator::new(
        controller.submitter(),
        canceller.token(),
        config.solution_fitness,
    );
    let controller_levels = controller.level_control();
    let status = tokio::spawn(watch_status(controller.subscribe()));
    let driver = tokio::spawn(controller.run(canceller.token()));
    let input = TerminalInput::spawn(canceller.clone(), Some(controller_levels))?;

    let mut scores = Vec::new();
    for attempt in 0..attempts {
        let sink = BufWriter::new(file.try_clone().context("failed to share trace file")?);
        let decision = LoggingDecision::new(InteractiveDecision::new(input.button()), sink);
        let candidate = Candidate::new(CandidateId(u64::from(attempt)), decision);
        match evaluator.evaluate(candidate).await {
            Ok(result) => {
                info!(attempt, fitness = result.fitness, solved = result.solved, "attempt finished");
                scores.push(result.fitness);
            }
            Err(EvaluationError::Cancelled(_)) => break,
            Err(EvaluationError::ControllerFinished(_)) => {
                info!("solution threshold reached; no further attempts");
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }

    drop(input);
    canceller.cancel();
    settle_controller(driver).await;
    let _ = status.await;
    Ok(scores)
}

/// Evolve candidates that imitate a recorded trace.
pub async fn train(
    config: FlapbotsConfig,
    trace_path: &Path,
    options: EvolveOptions,
    canceller: Canceller,
) -> Result<ExperimentSummary> {
    let traces = load_traces(trace_path)
        .with_context(|| format!("failed to read traces from {}", trace_path.display()))?;
    let Some(first) = traces.first() else {
        bail!("no training data in {}", trace_path.display());
    };
    let inputs = first.input.len();
    info!(samples = traces.len(), inputs, "loaded training data");

    let population = population_for(&config, inputs, options.hidden);
    let mut experiment = Experiment::new(
        Searcher::new(ReplayEvaluator::new(traces)),
        population,
        ExperimentSettings {
            iterations: options.iterations,
            stop_on_solution: options.stop_on_solution,
        },
        canceller,
    );
    if let Some(pipeline) = open_pipeline(options.database.as_deref())? {
        experiment = experiment.with_persistence(Box::new(pipeline));
    }
    Ok(experiment.run().await?)
}

/// Best stored candidates, solved first.
pub fn best(database: &Path, limit: usize) -> Result<Vec<CandidateRecord>> {
    let path_str = database.to_str().context("database path must be valid UTF-8")?;
    let mut storage = Storage::open(path_str)
        .with_context(|| format!("failed to open database {}", database.display()))?;
    Ok(storage.top_candidates(limit)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flapbots_core::{StopReason, Trace, TraceWriter};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(prefix: &str, extension: &str) -> PathBuf {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "{prefix}_{}_{}.{extension}",
            std::process::id(),
            timestamp
        ))
    }

    fn sample_options(database: Option<PathBuf>) -> EvolveOptions {
        EvolveOptions {
            iterations: 2,
            stop_on_solution: false,
            hidden: 3,
            database,
            show_status: false,
        }
    }

    #[tokio::test]
    async fn evolve_runs_requested_generations() {
        let config = FlapbotsConfig {
            population_size: 4,
            ticks_per_second: 0,
            rng_seed: Some(5),
            ..FlapbotsConfig::default()
        };
        let summary = evolve(config, sample_options(None), Canceller::new())
            .await
            .expect("evolve");
        assert_eq!(summary.generations, 2);
        assert_eq!(summary.stop, StopReason::IterationsExhausted);
    }

    #[tokio::test]
    async fn keep_going_evolve_stops_cleanly_at_threshold() {
        let config = FlapbotsConfig {
            population_size: 2,
            ticks_per_second: 0,
            // Every score is positive, so the first generation goes terminal.
            solution_fitness: 0.0,
            rng_seed: Some(3),
            ..FlapbotsConfig::default()
        };
        let options = EvolveOptions {
            iterations: 3,
            ..sample_options(None)
        };
        let summary = evolve(config, options, Canceller::new())
            .await
            .expect("terminal controller is not an error");
        assert_eq!(summary.stop, StopReason::Solved);
        assert_eq!(summary.generations, 1);
    }

    #[tokio::test]
    async fn train_persists_and_best_reads_back() {
        let traces = temp_path("flapbots_train_traces", "jsonl");
        let database = temp_path("flapbots_train_db", "duckdb");
        {
            let file = std::fs::File::create(&traces).expect("trace file");
            let mut writer = TraceWriter::new(file);
            for step in 0..8 {
                writer
                    .append(&Trace {
                        input: vec![f64::from(step) / 8.0, 1.0],
                        output: step % 3 == 0,
                    })
                    .expect("append");
            }
        }

        let config = FlapbotsConfig {
            population_size: 6,
            rng_seed: Some(1),
            ..FlapbotsConfig::default()
        };
        let summary = train(
            config,
            &traces,
            sample_options(Some(database.clone())),
            Canceller::new(),
        )
        .await
        .expect("train");
        assert!(summary.generations >= 1);

        let stored = best(&database, 5).expect("best");
        assert!(!stored.is_empty());
        assert!(stored.iter().all(|record| record.encoded.is_some()));

        let _ = std::fs::remove_file(&traces);
        let _ = std::fs::remove_file(&database);
    }

    #[tokio::test]
    async fn train_without_samples_fails() {
        let traces = temp_path("flapbots_empty_traces", "jsonl");
        std::fs::write(&traces, "").expect("empty file");
        let err = train(
            FlapbotsConfig::default(),
            &traces,
            sample_options(None),
            Canceller::new(),
        )
        .await
        .expect_err("empty traces");
        assert!(err.to_string().contains("no training data"));
        let _ = std::fs::remove_file(&traces);
    }
}
