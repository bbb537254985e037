//! Core types shared across the Flapbots workspace.
//!
//! The crate hosts the population evaluation pipeline: a single-threaded,
//! fixed-tick [`SimulationController`] that multiplexes every live candidate
//! into one world, the [`SimulationEvaluator`] bridge that turns an
//! asynchronous task handoff into a plain `evaluate` call, and the
//! [`Searcher`] that fans a generation out across concurrent workers.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod bridge;
pub mod cancel;
pub mod config;
pub mod controller;
pub mod decision;
pub mod experiment;
pub mod scoring;
pub mod search;
pub mod slot;
pub mod task;
pub mod trace;
pub mod world;

pub use bridge::{EvaluationError, Evaluator, ReplayEvaluator, SimulationEvaluator};
pub use cancel::{CancelToken, Canceller};
pub use config::{ConfigError, FlapbotsConfig, PhysicsConfig};
pub use controller::{
    ControllerError, Delivery, GenerationSummary, LevelControl, Mode, RunSummary,
    SimulationController, SlotBinding, SlotView, TickEvents, WorldSnapshot,
};
pub use decision::{
    ActivationError, Constant, Decision, DecisionError, InputSource, InteractiveDecision,
    LatchedButton, LoggingDecision, ModelDecision, Observation, Phenome,
};
pub use experiment::{
    Experiment, ExperimentError, ExperimentSettings, ExperimentSummary, GenerationPersistence,
    GenerationReport, NullPersistence, PopulationSource, StopReason,
};
pub use scoring::{ReplayTally, Score, SlotOutcome};
pub use search::{SearchError, Searcher};
pub use slot::Slot;
pub use task::{SubmitError, Task, TaskSender};
pub use trace::{Trace, TraceError, TraceWriter};
pub use world::{LevelConfig, ObstacleLayout};

/// Opaque candidate identity assigned by the evolutionary driver.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct CandidateId(pub u64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

/// Simulation clock (ticks processed since the controller was built).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// One controller under evaluation: an identity plus the capability that
/// decides when to jump.
pub struct Candidate {
    pub id: CandidateId,
    pub decision: Box<dyn Decision>,
}

impl Candidate {
    /// Pair an identity with a decision capability.
    #[must_use]
    pub fn new(id: CandidateId, decision: impl Decision + 'static) -> Self {
        Self {
            id,
            decision: Box::new(decision),
        }
    }

    /// Pair an identity with an already boxed decision capability.
    #[must_use]
    pub fn boxed(id: CandidateId, decision: Box<dyn Decision>) -> Self {
        Self { id, decision }
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("id", &self.id)
            .field("decision", &self.decision.kind())
            .finish()
    }
}

/// Fitness reported back to the evolutionary driver for one candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EvalResult {
    pub id: CandidateId,
    pub fitness: f64,
    pub solved: bool,
}
