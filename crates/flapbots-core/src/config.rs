//! Static configuration for a Flapbots experiment.

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::world::LevelConfig;

/// Number of observation values appended after the vision window
/// (normalised height, normalised vertical velocity, bias).
pub const STATE_INPUTS: usize = 3;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Indicates a value that cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Fixed-point physics constants, in 1/16 pixel units per tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Downward acceleration added to the vertical velocity every tick.
    pub gravity: i32,
    /// Vertical velocity assigned on a jump (negative is up).
    pub jump_velocity: i32,
    /// Terminal fall speed.
    pub max_fall_speed: i32,
    /// Horizontal advance of every agent per tick.
    pub horizontal_speed: i32,
    /// Horizontal advance of the shared scroll position per tick, in pixels.
    pub scroll_speed: i32,
    /// Scroll position at the start of each generation, in pixels.
    pub scroll_start: i32,
    /// Vertical spawn position.
    pub start_y: i32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: 4,
            jump_velocity: -96,
            max_fall_speed: 96,
            horizontal_speed: 32,
            scroll_speed: 2,
            scroll_start: -240,
            start_y: 100 * 16,
        }
    }
}

/// Experiment-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlapbotsConfig {
    /// Number of slots, equal to the number of candidates per generation.
    pub population_size: usize,
    /// Tile columns visible to each agent.
    pub vision: usize,
    /// Pipes generated per layout (the course wraps after this many).
    pub pipe_count: usize,
    /// Difficulty schedule; the controller starts at level 0.
    pub levels: Vec<LevelConfig>,
    /// Absolute fitness above which a candidate counts as solved and a
    /// generation ends the experiment.
    pub solution_fitness: f64,
    /// Redraw the course between generations even when the level is unchanged.
    pub reshuffle_each_generation: bool,
    /// Simulation rate; 0 runs unthrottled.
    pub ticks_per_second: u32,
    /// Optional RNG seed for reproducible courses.
    pub rng_seed: Option<u64>,
    pub physics: PhysicsConfig,
}

impl Default for FlapbotsConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            vision: 14,
            pipe_count: 256,
            levels: vec![
                LevelConfig {
                    gap_tiles: 5,
                    min_top_tile: 2,
                    top_spread: 6,
                    exit_score: 25,
                },
                LevelConfig {
                    gap_tiles: 4,
                    min_top_tile: 2,
                    top_spread: 7,
                    exit_score: 50,
                },
                LevelConfig {
                    gap_tiles: 4,
                    min_top_tile: 1,
                    top_spread: 9,
                    exit_score: 100,
                },
            ],
            solution_fitness: 10_000.0,
            reshuffle_each_generation: true,
            ticks_per_second: 60,
            rng_seed: None,
            physics: PhysicsConfig::default(),
        }
    }
}

impl FlapbotsConfig {
    /// Load a JSON configuration file; absent keys keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Ensure every value can drive a simulation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population_size == 0 {
            return Err(ConfigError::Invalid("population_size must be non-zero"));
        }
        if self.vision == 0 {
            return Err(ConfigError::Invalid("vision must be non-zero"));
        }
        if self.pipe_count == 0 {
            return Err(ConfigError::Invalid("pipe_count must be non-zero"));
        }
        if self.levels.is_empty() {
            return Err(ConfigError::Invalid("at least one level is required"));
        }
        for level in &self.levels {
            level.validate()?;
        }
        if !self.solution_fitness.is_finite() {
            return Err(ConfigError::Invalid("solution_fitness must be finite"));
        }
        let physics = &self.physics;
        if physics.gravity <= 0 || physics.max_fall_speed <= 0 || physics.jump_velocity >= 0 {
            return Err(ConfigError::Invalid(
                "gravity and max_fall_speed must be positive, jump_velocity negative",
            ));
        }
        if physics.horizontal_speed <= 0 {
            return Err(ConfigError::Invalid("horizontal_speed must be positive"));
        }
        Ok(())
    }

    /// Length of the observation vector handed to decisions.
    #[must_use]
    pub const fn observation_len(&self) -> usize {
        self.vision + STATE_INPUTS
    }

    /// Period between ticks, or `None` when unthrottled.
    #[must_use]
    pub fn tick_interval(&self) -> Option<Duration> {
        (self.ticks_per_second > 0)
            .then(|| Duration::from_secs_f64(1.0 / f64::from(self.ticks_per_second)))
    }

    /// Returns the configured RNG, generating a seed from entropy if absent.
    pub(crate) fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = FlapbotsConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.observation_len(), 17);
        assert!(config.tick_interval().is_some());
    }

    #[test]
    fn unthrottled_rate_has_no_interval() {
        let config = FlapbotsConfig {
            ticks_per_second: 0,
            ..FlapbotsConfig::default()
        };
        assert!(config.tick_interval().is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: FlapbotsConfig =
            serde_json::from_str(r#"{"population_size": 8, "physics": {"gravity": 5}}"#)
                .expect("parse");
        assert_eq!(config.population_size, 8);
        assert_eq!(config.physics.gravity, 5);
        assert_eq!(config.physics.jump_velocity, -96);
        assert_eq!(config.levels.len(), 3);
    }

    #[test]
    fn validation_rejects_empty_population() {
        let config = FlapbotsConfig {
            population_size: 0,
            ..FlapbotsConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validation_rejects_upward_gravity() {
        let mut config = FlapbotsConfig::default();
        config.physics.gravity = -1;
        assert!(config.validate().is_err());
    }
}
