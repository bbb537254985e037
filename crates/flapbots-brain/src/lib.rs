//! Traits and baseline implementations for Flapbots brains.

use flapbots_core::{ActivationError, Phenome};
use rand::RngCore;

pub mod mlp;
pub mod population;

pub use mlp::MlpBrain;
pub use population::{MlpPopulation, PopulationSettings};

/// Shared interface implemented by all agent brains.
pub trait Brain: Send {
    /// Immutable brain identifier (useful for analytics).
    fn kind(&self) -> &'static str;

    /// Number of inputs the brain expects per evaluation.
    fn input_len(&self) -> usize;

    /// Evaluate brain outputs given one observation row.
    fn tick(&mut self, inputs: &[f64]) -> Vec<f64>;

    /// Mutate the brain's parameters given mutation rates.
    fn mutate(&mut self, rng: &mut dyn RngCore, rate: f64, scale: f64);
}

/// Adapter exposing any [`Brain`] through the core activation boundary.
#[derive(Debug, Clone)]
pub struct BrainPhenome<B>(pub B);

impl<B: Brain> Phenome for BrainPhenome<B> {
    fn activate(&mut self, inputs: &[f64]) -> Result<Vec<f64>, ActivationError> {
        let expected = self.0.input_len();
        if inputs.len() != expected {
            return Err(ActivationError(format!(
                "{} brain expects {expected} inputs, got {}",
                self.0.kind(),
                inputs.len()
            )));
        }
        Ok(self.0.tick(inputs))
    }

    fn input_len(&self) -> Option<usize> {
        Some(self.0.input_len())
    }
}
