//! Decision capabilities: everything that can answer "jump now?".

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::warn;

use crate::trace::{Trace, TraceWriter};

/// Output above which a model-driven decision jumps.
pub const JUMP_THRESHOLD: f64 = 0.5;

/// Errors raised while producing a decision.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("observation has {actual} values, expected {expected}")]
    MalformedObservation { expected: usize, actual: usize },
    #[error(transparent)]
    Activation(#[from] ActivationError),
}

/// Failure reported by a model's activation function.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("activation failed: {0}")]
pub struct ActivationError(pub String);

/// Windowed view of upcoming obstacles plus agent state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Observation {
    values: Vec<f64>,
}

impl Observation {
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fail unless the observation carries exactly `expected` values.
    pub fn expect_len(&self, expected: usize) -> Result<&[f64], DecisionError> {
        if self.values.len() == expected {
            Ok(&self.values)
        } else {
            Err(DecisionError::MalformedObservation {
                expected,
                actual: self.values.len(),
            })
        }
    }
}

/// Shared interface implemented by every way of steering an agent.
pub trait Decision: Send {
    /// Static identifier used in logs.
    fn kind(&self) -> &'static str;

    /// Decide whether to jump given the latest observation.
    fn decide(&mut self, observation: &Observation) -> Result<bool, DecisionError>;
}

impl Decision for Box<dyn Decision> {
    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn decide(&mut self, observation: &Observation) -> Result<bool, DecisionError> {
        (**self).decide(observation)
    }
}

/// Fixed answer regardless of the observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constant(pub bool);

impl Decision for Constant {
    fn kind(&self) -> &'static str {
        "constant"
    }

    fn decide(&mut self, _observation: &Observation) -> Result<bool, DecisionError> {
        Ok(self.0)
    }
}

/// Live input device sampled at decision time.
pub trait InputSource: Send {
    /// Whether a jump was requested since the last sample.
    fn jump_pressed(&mut self) -> Result<bool, DecisionError>;
}

/// Press-once button shared between an input producer and a decision.
#[derive(Debug, Clone, Default)]
pub struct LatchedButton {
    pressed: Arc<AtomicBool>,
}

impl LatchedButton {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch a press; it is consumed by the next sample.
    pub fn press(&self) {
        self.pressed.store(true, Ordering::Release);
    }
}

impl InputSource for LatchedButton {
    fn jump_pressed(&mut self) -> Result<bool, DecisionError> {
        Ok(self.pressed.swap(false, Ordering::AcqRel))
    }
}

/// Human-driven decision; holds no state beyond its input source.
#[derive(Debug, Clone)]
pub struct InteractiveDecision<S> {
    source: S,
}

impl<S: InputSource> InteractiveDecision<S> {
    #[must_use]
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: InputSource> Decision for InteractiveDecision<S> {
    fn kind(&self) -> &'static str {
        "interactive"
    }

    fn decide(&mut self, _observation: &Observation) -> Result<bool, DecisionError> {
        self.source.jump_pressed()
    }
}

/// Activation function supplied by the evolutionary driver.
pub trait Phenome: Send {
    /// Feed one input row through the network, returning its outputs.
    fn activate(&mut self, inputs: &[f64]) -> Result<Vec<f64>, ActivationError>;

    /// Fixed input width, when the model has one.
    fn input_len(&self) -> Option<usize> {
        None
    }
}

/// Decision driven by a model's first output.
#[derive(Debug, Clone)]
pub struct ModelDecision<P> {
    phenome: P,
}

impl<P: Phenome> ModelDecision<P> {
    #[must_use]
    pub fn new(phenome: P) -> Self {
        Self { phenome }
    }

    #[must_use]
    pub fn into_inner(self) -> P {
        self.phenome
    }
}

impl<P: Phenome> Decision for ModelDecision<P> {
    fn kind(&self) -> &'static str {
        "model"
    }

    fn decide(&mut self, observation: &Observation) -> Result<bool, DecisionError> {
        let inputs = match self.phenome.input_len() {
            Some(expected) => observation.expect_len(expected)?,
            None => observation.values(),
        };
        let outputs = self.phenome.activate(inputs)?;
        let first = outputs
            .first()
            .copied()
            .ok_or_else(|| ActivationError("model produced no outputs".into()))?;
        Ok(first > JUMP_THRESHOLD)
    }
}

/// Wraps another decision and appends each observation/decision pair to a
/// trace sink. Sink failures are logged and never change the decision.
pub struct LoggingDecision<D, W: Write> {
    inner: D,
    sink: TraceWriter<W>,
    failed_writes: u64,
}

impl<D: Decision, W: Write + Send> LoggingDecision<D, W> {
    #[must_use]
    pub fn new(inner: D, sink: W) -> Self {
        Self {
            inner,
            sink: TraceWriter::new(sink),
            failed_writes: 0,
        }
    }

    /// Number of records that could not be written.
    #[must_use]
    pub const fn failed_writes(&self) -> u64 {
        self.failed_writes
    }

    #[must_use]
    pub fn into_parts(self) -> (D, W) {
        (self.inner, self.sink.into_inner())
    }
}

impl<D: Decision, W: Write + Send> Decision for LoggingDecision<D, W> {
    fn kind(&self) -> &'static str {
        "logging"
    }

    fn decide(&mut self, observation: &Observation) -> Result<bool, DecisionError> {
        let decision = self.inner.decide(observation)?;
        let record = Trace {
            input: observation.values().to_vec(),
            output: decision,
        };
        if let Err(err) = self.sink.append(&record) {
            self.failed_writes += 1;
            warn!(error = %err, failed = self.failed_writes, "failed to record trace");
        }
        Ok(decision)
    }
}
