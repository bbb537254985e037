//! Configuration layering: command-line flags over environment over file.

use anyhow::{Context, Result};
use clap::Args;
use flapbots_core::FlapbotsConfig;
use std::path::PathBuf;

/// Options shared by every subcommand that drives a simulation.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// JSON configuration file; absent keys keep their defaults.
    #[arg(long, env = "FLAPBOTS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Candidates per generation.
    #[arg(long, env = "FLAPBOTS_POPULATION")]
    pub population: Option<usize>,

    /// Simulation rate; 0 runs as fast as possible.
    #[arg(long, env = "FLAPBOTS_TICKS_PER_SECOND")]
    pub ticks_per_second: Option<u32>,

    /// Seed for reproducible obstacle courses and populations.
    #[arg(long, env = "FLAPBOTS_SEED")]
    pub seed: Option<u64>,

    /// Fitness above which a generation ends the experiment.
    #[arg(long, env = "FLAPBOTS_SOLUTION_FITNESS")]
    pub solution_fitness: Option<f64>,
}

impl ConfigArgs {
    /// Load the base configuration and apply overrides.
    pub fn resolve(&self) -> Result<FlapbotsConfig> {
        let mut config = match &self.config {
            Some(path) => FlapbotsConfig::from_json_file(path)
                .with_context(|| format!("failed to load configuration {}", path.display()))?,
            None => FlapbotsConfig::default(),
        };
        if let Some(population) = self.population {
            config.population_size = population;
        }
        if let Some(rate) = self.ticks_per_second {
            config.ticks_per_second = rate;
        }
        if let Some(seed) = self.seed {
            config.rng_seed = Some(seed);
        }
        if let Some(threshold) = self.solution_fitness {
            config.solution_fitness = threshold;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}
