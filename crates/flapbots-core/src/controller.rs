//! Fixed-tick simulation that multiplexes concurrent evaluations into slots.
//!
//! The controller is the only writer of slots, mode and obstacle layout. Work
//! arrives through a bounded inbox ([`TaskSender`]); scores leave through each
//! task's one-shot handle; observers receive [`WorldSnapshot`]s on a
//! latest-value channel.

use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::{ConfigError, FlapbotsConfig};
use crate::scoring::{Score, score_outcome};
use crate::slot::Slot;
use crate::task::{SubmitError, Task, TaskInbox, TaskSender, task_inbox};
use crate::world::{LevelConfig, ObstacleLayout};
use crate::{CandidateId, Tick};

/// Idle sleep while unthrottled and waiting for work.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Binding submitted tasks to vacant slots.
    #[default]
    Setup,
    /// Every slot is bound; the world advances.
    Active,
    /// A generation exceeded the solution threshold; ticks are no-ops.
    Terminal,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("controller cancelled")]
    Cancelled,
}

/// A task was bound to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotBinding {
    pub slot: usize,
    pub candidate: CandidateId,
    /// Sequence number of the binding across the controller's lifetime.
    pub iteration: u64,
}

/// A slot's run ended and its score was sent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub slot: usize,
    pub candidate: CandidateId,
    pub score: Score,
    /// `false` when the waiting side had already gone away.
    pub received: bool,
}

/// Aggregate emitted when every slot of a generation has finished.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub generation: u64,
    pub level: usize,
    pub evaluated: usize,
    pub best_fitness: f64,
    pub cleared: usize,
    pub decision_failures: u64,
    /// Level the next generation will run, `None` once terminal.
    pub next_level: Option<usize>,
}

/// Events emitted after processing one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickEvents {
    pub tick: Tick,
    /// Mode after the tick.
    pub mode: Mode,
    pub bound: Vec<SlotBinding>,
    pub delivered: Vec<Delivery>,
    pub generation_completed: Option<GenerationSummary>,
}

/// Render-facing view of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    pub index: usize,
    pub candidate: Option<CandidateId>,
    pub x: i32,
    pub y: i32,
    pub alive: bool,
    pub jumps: u32,
    pub passes: u32,
}

/// Best-effort copy of the world published after every tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: Tick,
    pub generation: u64,
    pub mode: Mode,
    pub level: usize,
    pub scroll_x: i32,
    pub slots: Vec<SlotView>,
}

/// Returned by [`SimulationController::run`] once the controller is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub ticks: Tick,
    pub generations: u64,
    pub level: usize,
    pub best_fitness: f64,
}

/// Cloneable handle for changing difficulty while the controller runs.
///
/// Requests follow [`SimulationController::set_level`] rules and are picked
/// up at the start of the next tick; the latest request wins.
#[derive(Debug, Clone)]
pub struct LevelControl {
    tx: Arc<watch::Sender<Option<usize>>>,
    levels: usize,
}

impl LevelControl {
    pub fn request(&self, level: usize) -> Result<(), ConfigError> {
        if level >= self.levels {
            return Err(ConfigError::Invalid("level index out of range"));
        }
        self.tx.send_replace(Some(level));
        Ok(())
    }

    /// Number of configured levels.
    #[must_use]
    pub const fn levels(&self) -> usize {
        self.levels
    }
}

/// Per-generation accumulators, reset at every boundary.
#[derive(Debug, Clone, Copy)]
struct GenerationStats {
    evaluated: usize,
    best_fitness: f64,
    cleared: usize,
    decision_failures: u64,
}

impl Default for GenerationStats {
    fn default() -> Self {
        Self {
            evaluated: 0,
            best_fitness: f64::NEG_INFINITY,
            cleared: 0,
            decision_failures: 0,
        }
    }
}

pub struct SimulationController {
    config: FlapbotsConfig,
    mode: Mode,
    tick: Tick,
    slots: Vec<Slot>,
    inbox: TaskInbox,
    sender: TaskSender,
    layout: ObstacleLayout,
    level: usize,
    pending_level: Option<usize>,
    iteration: u64,
    generation: u64,
    scroll_x: i32,
    stats: GenerationStats,
    best_fitness: f64,
    rng: SmallRng,
    snapshots: watch::Sender<WorldSnapshot>,
    level_control: LevelControl,
    level_requests: watch::Receiver<Option<usize>>,
}

impl std::fmt::Debug for SimulationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationController")
            .field("mode", &self.mode)
            .field("tick", &self.tick)
            .field("generation", &self.generation)
            .field("level", &self.level)
            .field("iteration", &self.iteration)
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl SimulationController {
    /// Validate the configuration and build an idle controller in `Setup`.
    pub fn new(config: FlapbotsConfig) -> Result<Self, ControllerError> {
        config.validate()?;
        let mut rng = config.seeded_rng();
        let layout = ObstacleLayout::generate(&config.levels[0], config.pipe_count, &mut rng);
        let (sender, inbox) = task_inbox(config.population_size);
        let slots = (0..config.population_size).map(Slot::new).collect();
        let (snapshots, _) = watch::channel(WorldSnapshot::default());
        let scroll_x = config.physics.scroll_start;
        let (level_tx, level_requests) = watch::channel(None);
        let level_control = LevelControl {
            tx: Arc::new(level_tx),
            levels: config.levels.len(),
        };
        Ok(Self {
            config,
            mode: Mode::Setup,
            tick: Tick::zero(),
            slots,
            inbox,
            sender,
            layout,
            level: 0,
            pending_level: None,
            iteration: 0,
            generation: 0,
            scroll_x,
            stats: GenerationStats::default(),
            best_fitness: f64::NEG_INFINITY,
            rng,
            snapshots,
            level_control,
            level_requests,
        })
    }

    /// Enqueue a task without waiting. A full inbox is a caller error and
    /// leaves controller state untouched.
    pub fn submit(&self, task: Task) -> Result<(), SubmitError> {
        self.sender.submit(task)
    }

    /// Cloneable handle for evaluation bridges.
    #[must_use]
    pub fn submitter(&self) -> TaskSender {
        self.sender.clone()
    }

    /// Latest-value feed of world snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WorldSnapshot> {
        self.snapshots.subscribe()
    }

    /// Handle for requesting levels once [`run`](Self::run) owns the controller.
    #[must_use]
    pub fn level_control(&self) -> LevelControl {
        self.level_control.clone()
    }

    /// Request a difficulty level. Applied now when no slot is bound during
    /// `Setup`, otherwise at the next generation boundary.
    pub fn set_level(&mut self, level: usize) -> Result<(), ConfigError> {
        if level >= self.config.levels.len() {
            return Err(ConfigError::Invalid("level index out of range"));
        }
        if self.mode == Mode::Setup && self.slots.iter().all(Slot::is_vacant) {
            self.pending_level = None;
            self.apply_level(level, true);
        } else {
            debug!(level, mode = ?self.mode, "deferring level change to generation boundary");
            self.pending_level = Some(level);
        }
        Ok(())
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub const fn tick_count(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn level(&self) -> usize {
        self.level
    }

    #[must_use]
    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    #[must_use]
    pub fn layout(&self) -> &ObstacleLayout {
        &self.layout
    }

    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    #[must_use]
    pub fn config(&self) -> &FlapbotsConfig {
        &self.config
    }

    /// Execute one fixed step.
    pub fn tick(&mut self) -> TickEvents {
        let next_tick = self.tick.next();
        let mut events = TickEvents {
            tick: next_tick,
            ..TickEvents::default()
        };
        self.take_level_request();

        match self.mode {
            Mode::Setup => self.stage_binding(&mut events),
            Mode::Active => {
                self.stage_slots(&mut events);
                self.stage_generation_end(&mut events);
            }
            Mode::Terminal => {}
        }

        self.tick = next_tick;
        events.mode = self.mode;
        self.inbox.publish_mode(self.mode);
        self.publish_snapshot();
        events
    }

    /// Drive ticks until `Terminal` or cancellation.
    pub async fn run(mut self, cancel: CancelToken) -> Result<RunSummary, ControllerError> {
        info!(
            population = self.config.population_size,
            ticks_per_second = self.config.ticks_per_second,
            "simulation controller started"
        );
        match self.config.tick_interval() {
            Some(period) => {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
                loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(self.cancelled()),
                        _ = interval.tick() => {}
                    }
                    self.tick();
                    if self.mode == Mode::Terminal {
                        return Ok(self.finish());
                    }
                }
            }
            None => loop {
                if cancel.is_cancelled() {
                    return Err(self.cancelled());
                }
                let idle = self.mode == Mode::Setup && self.inbox.is_empty();
                self.tick();
                if self.mode == Mode::Terminal {
                    return Ok(self.finish());
                }
                if idle {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(self.cancelled()),
                        () = tokio::time::sleep(IDLE_BACKOFF) => {}
                    }
                } else {
                    tokio::task::yield_now().await;
                }
            },
        }
    }

    fn take_level_request(&mut self) {
        if !self.level_requests.has_changed().unwrap_or(false) {
            return;
        }
        let requested = *self.level_requests.borrow_and_update();
        if let Some(level) = requested
            && let Err(err) = self.set_level(level)
        {
            warn!(level, error = %err, "ignoring level request");
        }
    }

    fn current_level(&self) -> LevelConfig {
        self.config.levels[self.level]
    }

    fn stage_binding(&mut self, events: &mut TickEvents) {
        let population = self.slots.len();
        loop {
            let index = (self.iteration % population as u64) as usize;
            if !self.slots[index].is_vacant() {
                break;
            }
            let Some(task) = self.inbox.try_next() else {
                break;
            };
            let candidate = task.id;
            if let Err(task) = self.slots[index].bind(task, &self.config.physics) {
                // Unreachable while the vacancy check above holds; drop the
                // task so its bridge observes a closed handle.
                warn!(slot = index, candidate = %task.id, "slot occupied; dropping task");
                break;
            }
            events.bound.push(SlotBinding {
                slot: index,
                candidate,
                iteration: self.iteration,
            });
            self.iteration += 1;
            if self.iteration.is_multiple_of(population as u64) {
                self.mode = Mode::Active;
                debug!(generation = self.generation, level = self.level, "generation active");
                break;
            }
        }
    }

    fn stage_slots(&mut self, events: &mut TickEvents) {
        let level = self.current_level();
        let physics = self.config.physics;
        let vision = self.config.vision;
        for slot in &mut self.slots {
            if !slot.is_alive() {
                continue;
            }
            let observation = slot.observe(&self.layout, vision, &physics);
            let jump = slot.decide(&observation);
            let Some(outcome) = slot.step(jump, &self.layout, &level, &physics) else {
                continue;
            };
            let score = score_outcome(&outcome);
            let failures = slot.decision_failures();
            let Some((candidate, handle)) = slot.release() else {
                continue;
            };
            if failures > 0 {
                warn!(slot = slot.index(), %candidate, failures, "decision failures during run");
            }
            let received = handle.deliver(score);
            if !received {
                warn!(slot = slot.index(), %candidate, "evaluation abandoned before score delivery");
            }
            self.stats.evaluated += 1;
            self.stats.best_fitness = self.stats.best_fitness.max(score.fitness);
            self.stats.cleared += usize::from(outcome.cleared);
            self.stats.decision_failures += u64::from(failures);
            events.delivered.push(Delivery {
                slot: slot.index(),
                candidate,
                score,
                received,
            });
        }
        self.scroll_x += self.config.physics.scroll_speed;
    }

    fn stage_generation_end(&mut self, events: &mut TickEvents) {
        if !self.slots.iter().all(|slot| !slot.is_alive() && slot.is_vacant()) {
            return;
        }
        let stats = std::mem::take(&mut self.stats);
        self.best_fitness = self.best_fitness.max(stats.best_fitness);
        let finished_level = self.level;

        let next_level = if stats.best_fitness > self.config.solution_fitness {
            self.mode = Mode::Terminal;
            info!(
                generation = self.generation,
                best_fitness = stats.best_fitness,
                "solution threshold exceeded; controller terminal"
            );
            None
        } else {
            let advanced = if stats.cleared > 0 {
                (self.level + 1).min(self.config.levels.len() - 1)
            } else {
                self.level
            };
            let next = self.pending_level.take().unwrap_or(advanced);
            self.apply_level(next, self.config.reshuffle_each_generation);
            self.mode = Mode::Setup;
            Some(next)
        };

        let summary = GenerationSummary {
            generation: self.generation,
            level: finished_level,
            evaluated: stats.evaluated,
            best_fitness: stats.best_fitness,
            cleared: stats.cleared,
            decision_failures: stats.decision_failures,
            next_level,
        };
        debug!(?summary, "generation complete");
        events.generation_completed = Some(summary);
        self.generation += 1;
    }

    /// Switch to `level`, redrawing the course when it changed or when
    /// `reshuffle` is set, and rewind the scroll position.
    fn apply_level(&mut self, level: usize, reshuffle: bool) {
        let changed = level != self.level;
        self.level = level;
        if changed || reshuffle {
            self.layout = ObstacleLayout::generate(
                &self.config.levels[level],
                self.config.pipe_count,
                &mut self.rng,
            );
        }
        if changed {
            info!(level, "difficulty level changed");
        }
        self.scroll_x = self.config.physics.scroll_start;
    }

    fn publish_snapshot(&self) {
        if self.snapshots.receiver_count() == 0 {
            return;
        }
        let slots = self
            .slots
            .iter()
            .map(|slot| {
                let hitbox = slot.hitbox();
                SlotView {
                    index: slot.index(),
                    candidate: slot.candidate(),
                    x: hitbox.x0,
                    y: hitbox.y0,
                    alive: slot.is_alive(),
                    jumps: slot.jumps(),
                    passes: slot.passes(),
                }
            })
            .collect();
        self.snapshots.send_replace(WorldSnapshot {
            tick: self.tick,
            generation: self.generation,
            mode: self.mode,
            level: self.level,
            scroll_x: self.scroll_x,
            slots,
        });
    }

    fn cancelled(&self) -> ControllerError {
        info!(tick = self.tick.0, generation = self.generation, "simulation controller cancelled");
        ControllerError::Cancelled
    }

    fn finish(&self) -> RunSummary {
        RunSummary {
            ticks: self.tick,
            generations: self.generation,
            level: self.level,
            best_fitness: self.best_fitness,
        }
    }
}
