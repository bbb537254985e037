//! Fitness functions for simulation runs and trace replay.

use serde::{Deserialize, Serialize};

/// Fixed-point distance that scores one unit of `distance`.
pub const DISTANCE_UNIT_X16: f64 = 1600.0;

/// Final state of a slot when its run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotOutcome {
    pub distance_x16: i32,
    pub jumps: u32,
    pub passes: u32,
    /// The slot reached the level's exit score.
    pub cleared: bool,
}

/// Scalar delivered on a task's result handle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub fitness: f64,
    pub cleared: bool,
}

/// Distance squared plus cubed jump efficiency, halved.
#[must_use]
pub fn simulation_fitness(outcome: &SlotOutcome) -> f64 {
    let distance = f64::from(outcome.distance_x16) / DISTANCE_UNIT_X16;
    let extra = f64::from(2 + outcome.passes) / f64::from(outcome.jumps + 1);
    (distance * distance + extra.powi(3)) / 2.0
}

#[must_use]
pub fn score_outcome(outcome: &SlotOutcome) -> Score {
    Score {
        fitness: simulation_fitness(outcome),
        cleared: outcome.cleared,
    }
}

/// A simulated candidate is solved when it cleared its level or its
/// fitness exceeds the solution threshold.
#[must_use]
pub fn is_solved(score: &Score, solution_fitness: f64) -> bool {
    score.cleared || score.fitness > solution_fitness
}

/// Matches between a candidate's replayed decisions and a recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayTally {
    pub correct: usize,
    pub total: usize,
}

impl ReplayTally {
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }

    #[must_use]
    pub fn solved(&self) -> bool {
        self.total > 0 && self.correct * 10_000 > self.total * 9_999
    }
}

/// Squared agreement fraction plus the solved flag.
#[must_use]
pub fn replay_score(tally: &ReplayTally) -> (f64, bool) {
    let fraction = tally.fraction();
    (fraction * fraction, tally.solved())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(distance_x16: i32, jumps: u32, passes: u32) -> SlotOutcome {
        SlotOutcome {
            distance_x16,
            jumps,
            passes,
            cleared: false,
        }
    }

    #[test]
    fn fitness_matches_formula() {
        let fitness = simulation_fitness(&outcome(3200, 1, 2));
        // distance 2, extra 4 / 2 = 2
        assert!((fitness - (4.0 + 8.0) / 2.0).abs() < 1e-12);
        assert!((simulation_fitness(&outcome(0, 0, 0)) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn fitness_grows_with_distance_at_equal_jumps() {
        let mut previous = simulation_fitness(&outcome(0, 3, 0));
        for distance in (1_600..40_000).step_by(1_600) {
            let next = simulation_fitness(&outcome(distance, 3, 0));
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn cleared_or_threshold_solves() {
        let score = Score {
            fitness: 10.0,
            cleared: true,
        };
        assert!(is_solved(&score, 1_000.0));
        let score = Score {
            fitness: 1_001.0,
            cleared: false,
        };
        assert!(is_solved(&score, 1_000.0));
        assert!(!is_solved(&score, 2_000.0));
    }

    #[test]
    fn replay_scoring() {
        let perfect = ReplayTally {
            correct: 10,
            total: 10,
        };
        assert_eq!(replay_score(&perfect), (1.0, true));
        let half = ReplayTally {
            correct: 5,
            total: 10,
        };
        assert_eq!(replay_score(&half), (0.25, false));
        let nearly = ReplayTally {
            correct: 9_999,
            total: 10_000,
        };
        assert!(!nearly.solved());
        assert_eq!(replay_score(&ReplayTally::default()), (0.0, false));
    }
}
