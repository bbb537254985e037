//! Small feed-forward perceptron: one hidden layer, logistic activations.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::Brain;

/// Default width of the hidden layer.
pub const DEFAULT_HIDDEN: usize = 8;

/// Dense layer with one bias per neuron.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Layer {
    inputs: usize,
    weights: Vec<f64>,
    biases: Vec<f64>,
}

impl Layer {
    fn random(rng: &mut dyn RngCore, inputs: usize, outputs: usize) -> Self {
        let spread = 1.0 / (inputs.max(1) as f64).sqrt();
        Self {
            inputs,
            weights: (0..inputs * outputs)
                .map(|_| rng.random_range(-spread..spread))
                .collect(),
            biases: (0..outputs).map(|_| rng.random_range(-1.0..1.0)).collect(),
        }
    }

    fn forward(&self, inputs: &[f64]) -> Vec<f64> {
        self.biases
            .iter()
            .enumerate()
            .map(|(neuron, bias)| {
                let row = &self.weights[neuron * self.inputs..(neuron + 1) * self.inputs];
                let acc: f64 = row.iter().zip(inputs).map(|(w, x)| w * x).sum();
                logistic(acc + bias)
            })
            .collect()
    }

    fn parameters_mut(&mut self) -> impl Iterator<Item = &mut f64> {
        self.weights.iter_mut().chain(self.biases.iter_mut())
    }
}

fn logistic(value: f64) -> f64 {
    1.0 / (1.0 + (-value).exp())
}

fn gaussian(rng: &mut dyn RngCore) -> f64 {
    let u1 = rng.random::<f64>().clamp(f64::MIN_POSITIVE, 1.0);
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Baseline perceptron brain with a single jump output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MlpBrain {
    hidden: Layer,
    output: Layer,
}

impl MlpBrain {
    pub const KIND: &'static str = "mlp.feedforward";

    /// Construct a randomly initialised brain.
    #[must_use]
    pub fn random(rng: &mut dyn RngCore, inputs: usize, hidden: usize) -> Self {
        let hidden = hidden.max(1);
        Self {
            hidden: Layer::random(rng, inputs, hidden),
            output: Layer::random(rng, hidden, 1),
        }
    }

    /// Serialise the parameters as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl Brain for MlpBrain {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn input_len(&self) -> usize {
        self.hidden.inputs
    }

    fn tick(&mut self, inputs: &[f64]) -> Vec<f64> {
        let hidden = self.hidden.forward(inputs);
        self.output.forward(&hidden)
    }

    fn mutate(&mut self, rng: &mut dyn RngCore, rate: f64, scale: f64) {
        let sigma = scale.max(1e-5);
        for param in self.hidden.parameters_mut().chain(self.output.parameters_mut()) {
            if rng.random::<f64>() < rate {
                *param += gaussian(rng) * sigma;
            }
        }
    }
}
