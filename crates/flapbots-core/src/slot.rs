//! Per-candidate agent state inside the shared world.

use tracing::debug;

use crate::config::PhysicsConfig;
use crate::decision::Observation;
use crate::scoring::SlotOutcome;
use crate::task::{ResultHandle, Task};
use crate::world::{Hitbox, LevelConfig, ObstacleLayout};
use crate::{CandidateId, Decision};

/// Gap rows are centred around this tile before scaling.
const GAP_CENTER_TILE: f64 = 4.0;
const GAP_SCALE: f64 = 8.0;
const HEIGHT_OFFSET_PX: f64 = 300.0;
const HEIGHT_SCALE_PX: f64 = 600.0;

/// One agent: fixed-point kinematics plus the task that owns it.
#[derive(Debug)]
pub struct Slot {
    index: usize,
    x16: i32,
    y16: i32,
    vy16: i32,
    jumps: u32,
    passes: u32,
    alive: bool,
    decision_failures: u32,
    task: Option<Task>,
}

impl Slot {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self {
            index,
            x16: 0,
            y16: 0,
            vy16: 0,
            jumps: 0,
            passes: 0,
            alive: false,
            decision_failures: 0,
            task: None,
        }
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.alive
    }

    /// No task is bound: the previous occupant, if any, already received its score.
    #[must_use]
    pub const fn is_vacant(&self) -> bool {
        self.task.is_none()
    }

    #[must_use]
    pub fn candidate(&self) -> Option<CandidateId> {
        self.task.as_ref().map(|task| task.id)
    }

    #[must_use]
    pub const fn position_x16(&self) -> (i32, i32) {
        (self.x16, self.y16)
    }

    #[must_use]
    pub const fn velocity_y16(&self) -> i32 {
        self.vy16
    }

    #[must_use]
    pub const fn jumps(&self) -> u32 {
        self.jumps
    }

    #[must_use]
    pub const fn passes(&self) -> u32 {
        self.passes
    }

    #[must_use]
    pub const fn decision_failures(&self) -> u32 {
        self.decision_failures
    }

    /// Reset kinematics and take ownership of `task`. An occupied slot hands the
    /// task back untouched.
    pub fn bind(&mut self, task: Task, physics: &PhysicsConfig) -> Result<(), Task> {
        if !self.is_vacant() {
            return Err(task);
        }
        self.x16 = 0;
        self.y16 = physics.start_y;
        self.vy16 = 0;
        self.jumps = 0;
        self.passes = 0;
        self.decision_failures = 0;
        self.alive = true;
        self.task = Some(task);
        Ok(())
    }

    #[must_use]
    pub const fn hitbox(&self) -> Hitbox {
        Hitbox::from_fixed(self.x16, self.y16)
    }

    /// Vision window of normalised gap tops followed by normalised height,
    /// normalised vertical velocity and a bias of 1.
    #[must_use]
    pub fn observe(&self, layout: &ObstacleLayout, vision: usize, physics: &PhysicsConfig) -> Observation {
        let window = layout
            .scan(self.hitbox(), vision)
            .unwrap_or_else(|| vec![0; vision]);
        let mut values: Vec<f64> = window
            .into_iter()
            .map(|top| (f64::from(top) - GAP_CENTER_TILE) / GAP_SCALE)
            .collect();
        let fall = f64::from(physics.max_fall_speed);
        values.push((f64::from(self.y16) / 16.0 + HEIGHT_OFFSET_PX) / HEIGHT_SCALE_PX);
        values.push((f64::from(self.vy16) + fall) / (2.0 * fall));
        values.push(1.0);
        Observation::new(values)
    }

    /// Ask the bound decision whether to jump. Failures degrade to "no jump".
    pub fn decide(&mut self, observation: &Observation) -> bool {
        let Some(task) = self.task.as_mut() else {
            return false;
        };
        match task.decision.decide(observation) {
            Ok(jump) => jump,
            Err(err) => {
                self.decision_failures += 1;
                debug!(slot = self.index, candidate = %task.id, error = %err, "decision failed; not jumping");
                false
            }
        }
    }

    /// Advance one tick. Returns the outcome when the run ended this tick.
    pub fn step(
        &mut self,
        jump: bool,
        layout: &ObstacleLayout,
        level: &LevelConfig,
        physics: &PhysicsConfig,
    ) -> Option<SlotOutcome> {
        if !self.alive {
            return None;
        }
        self.x16 += physics.horizontal_speed;
        if jump {
            self.vy16 = physics.jump_velocity;
            self.jumps += 1;
        }
        self.y16 += self.vy16 + physics.gravity / 2;
        self.vy16 = (self.vy16 + physics.gravity).min(physics.max_fall_speed);

        let hitbox = self.hitbox();
        self.passes = self.passes.max(layout.pipes_passed(hitbox.x0));
        let cleared = self.passes >= level.exit_score;
        if cleared || layout.collides(hitbox) {
            self.alive = false;
            return Some(self.outcome(cleared));
        }
        None
    }

    #[must_use]
    pub const fn outcome(&self, cleared: bool) -> SlotOutcome {
        SlotOutcome {
            distance_x16: self.x16,
            jumps: self.jumps,
            passes: self.passes,
            cleared,
        }
    }

    /// Detach the bound task once its run ended, leaving the slot vacant.
    pub(crate) fn release(&mut self) -> Option<(CandidateId, ResultHandle)> {
        if self.alive {
            return None;
        }
        self.task.take().map(|task| {
            let (id, _decision, result) = task.into_parts();
            (id, result)
        })
    }
}
