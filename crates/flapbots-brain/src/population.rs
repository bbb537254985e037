//! Stand-in evolutionary driver: elitist truncation plus gaussian mutation.

use flapbots_core::{Candidate, CandidateId, EvalResult, ModelDecision, PopulationSource};
use ordered_float::OrderedFloat;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::mlp::{DEFAULT_HIDDEN, MlpBrain};
use crate::{Brain, BrainPhenome};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationSettings {
    /// Candidates per generation.
    pub size: usize,
    /// Observation width fed to every brain.
    pub inputs: usize,
    pub hidden: usize,
    /// Share of each generation carried over unchanged.
    pub elite_fraction: f64,
    pub mutation_rate: f64,
    pub mutation_scale: f64,
}

impl Default for PopulationSettings {
    fn default() -> Self {
        Self {
            size: 50,
            inputs: 17,
            hidden: DEFAULT_HIDDEN,
            elite_fraction: 0.2,
            mutation_rate: 0.2,
            mutation_scale: 0.4,
        }
    }
}

/// Population of [`MlpBrain`]s with sequential candidate IDs.
#[derive(Debug)]
pub struct MlpPopulation {
    settings: PopulationSettings,
    members: Vec<(CandidateId, MlpBrain)>,
    next_id: u64,
    rng: SmallRng,
}

impl MlpPopulation {
    #[must_use]
    pub fn new(settings: PopulationSettings, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let size = settings.size.max(1);
        let members = (0..size as u64)
            .map(|id| {
                (
                    CandidateId(id),
                    MlpBrain::random(&mut rng, settings.inputs, settings.hidden),
                )
            })
            .collect();
        Self {
            settings,
            members,
            next_id: size as u64,
            rng,
        }
    }

    #[must_use]
    pub fn members(&self) -> &[(CandidateId, MlpBrain)] {
        &self.members
    }

    #[must_use]
    pub fn brain(&self, id: CandidateId) -> Option<&MlpBrain> {
        self.members
            .iter()
            .find(|(member, _)| *member == id)
            .map(|(_, brain)| brain)
    }

    fn fresh_id(&mut self) -> CandidateId {
        let id = CandidateId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl PopulationSource for MlpPopulation {
    fn population(&mut self, _generation: u64) -> Vec<Candidate> {
        self.members
            .iter()
            .map(|(id, brain)| Candidate::new(*id, ModelDecision::new(BrainPhenome(brain.clone()))))
            .collect()
    }

    fn record(&mut self, generation: u64, results: &[EvalResult]) {
        let fitness: HashMap<CandidateId, (bool, OrderedFloat<f64>)> = results
            .iter()
            .map(|result| (result.id, (result.solved, OrderedFloat(result.fitness))))
            .collect();
        if fitness.len() != self.members.len() {
            warn!(
                generation,
                expected = self.members.len(),
                received = fitness.len(),
                "result count does not match population"
            );
        }

        let mut ranked = std::mem::take(&mut self.members);
        ranked.sort_by_key(|(id, _)| {
            std::cmp::Reverse(
                fitness
                    .get(id)
                    .copied()
                    .unwrap_or((false, OrderedFloat(f64::NEG_INFINITY))),
            )
        });

        let size = self.settings.size.max(1);
        let elites = ((size as f64 * self.settings.elite_fraction).ceil() as usize).clamp(1, size);
        ranked.truncate(elites);

        let mut next = ranked.clone();
        while next.len() < size {
            let parent = self.rng.random_range(0..ranked.len());
            let mut child = ranked[parent].1.clone();
            child.mutate(
                &mut self.rng,
                self.settings.mutation_rate,
                self.settings.mutation_scale,
            );
            let id = self.fresh_id();
            next.push((id, child));
        }
        debug!(generation, elites, size, "population advanced");
        self.members = next;
    }

    fn encode(&self, id: CandidateId) -> Option<String> {
        let brain = self.brain(id)?;
        match brain.to_json() {
            Ok(encoded) => Some(encoded),
            Err(err) => {
                warn!(%id, error = %err, "failed to encode brain");
                None
            }
        }
    }
}
