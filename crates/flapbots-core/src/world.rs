//! Obstacle layout and world geometry.
//!
//! Positions are kept in whole pixels here; slots store 1/16 pixel fixed-point
//! values and convert through [`Hitbox::from_fixed`].

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Height of the playfield in pixels.
pub const SCREEN_HEIGHT: i32 = 480;
/// Edge length of one tile in pixels.
pub const TILE_SIZE: i32 = 32;
/// Pipes are two tiles wide.
pub const PIPE_WIDTH: i32 = TILE_SIZE * 2;
/// Tile column of the (never drawn) zeroth pipe.
pub const PIPE_START_OFFSET_X: i32 = 8;
/// Tile columns between consecutive pipes.
pub const PIPE_INTERVAL_X: i32 = 8;
/// Agent hitbox width in pixels.
pub const AGENT_WIDTH: i32 = 30;
/// Agent hitbox height in pixels.
pub const AGENT_HEIGHT: i32 = 60;
/// Anything above this line counts as leaving the world through the top.
pub const CEILING_Y: i32 = -TILE_SIZE * 4;
/// Top edge of the ground tile row.
pub const GROUND_Y: i32 = SCREEN_HEIGHT - TILE_SIZE;
/// Number of tile rows above the ground.
pub const GROUND_TILE: i32 = GROUND_Y / TILE_SIZE;

/// Division rounding towards negative infinity.
#[must_use]
pub const fn floor_div(x: i32, y: i32) -> i32 {
    let d = x / y;
    if d * y == x || x >= 0 { d } else { d - 1 }
}

/// Remainder matching [`floor_div`].
#[must_use]
pub const fn floor_mod(x: i32, y: i32) -> i32 {
    x - floor_div(x, y) * y
}

/// One difficulty setting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelConfig {
    /// Vertical size of each pipe gap, in tiles.
    pub gap_tiles: i32,
    /// Smallest tile row a gap may start at.
    pub min_top_tile: i32,
    /// Gap tops are drawn uniformly from `min_top_tile..min_top_tile + top_spread`.
    pub top_spread: i32,
    /// Pipes an agent must pass to leave the level.
    pub exit_score: u32,
}

impl LevelConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.gap_tiles <= 0 {
            return Err(ConfigError::Invalid("level gap_tiles must be positive"));
        }
        if self.min_top_tile < 0 || self.top_spread <= 0 {
            return Err(ConfigError::Invalid(
                "level min_top_tile must be non-negative and top_spread positive",
            ));
        }
        if self.min_top_tile + self.top_spread - 1 + self.gap_tiles > GROUND_TILE {
            return Err(ConfigError::Invalid(
                "level gaps must end above the ground row",
            ));
        }
        if self.exit_score == 0 {
            return Err(ConfigError::Invalid("level exit_score must be positive"));
        }
        Ok(())
    }
}

/// Axis-aligned agent box in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hitbox {
    pub x0: i32,
    pub y0: i32,
}

impl Hitbox {
    /// Convert 1/16 pixel fixed-point coordinates into a hitbox.
    #[must_use]
    pub const fn from_fixed(x16: i32, y16: i32) -> Self {
        Self {
            x0: floor_div(x16, 16),
            y0: floor_div(y16, 16),
        }
    }

    #[must_use]
    pub const fn x1(&self) -> i32 {
        self.x0 + AGENT_WIDTH
    }

    #[must_use]
    pub const fn y1(&self) -> i32 {
        self.y0 + AGENT_HEIGHT
    }

    /// Whether the box left the vertical bounds of the world.
    #[must_use]
    pub const fn out_of_bounds(&self) -> bool {
        self.y0 < CEILING_Y || self.y1() >= GROUND_Y
    }
}

/// Gap heights for every pipe in the course, shared read-only by all slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObstacleLayout {
    gap_tops: Vec<i32>,
    gap_tiles: i32,
}

impl ObstacleLayout {
    /// Draw `count` gap heights for the provided level.
    pub fn generate<R: Rng>(level: &LevelConfig, count: usize, rng: &mut R) -> Self {
        let gap_tops = (0..count.max(1))
            .map(|_| level.min_top_tile + rng.random_range(0..level.top_spread))
            .collect();
        Self {
            gap_tops,
            gap_tiles: level.gap_tiles,
        }
    }

    /// Build a layout from explicit gap tops (tile rows).
    #[must_use]
    pub fn from_gap_tops(gap_tops: Vec<i32>, gap_tiles: i32) -> Self {
        let gap_tops = if gap_tops.is_empty() {
            vec![GROUND_TILE - gap_tiles]
        } else {
            gap_tops
        };
        Self {
            gap_tops,
            gap_tiles,
        }
    }

    #[must_use]
    pub fn gap_tops(&self) -> &[i32] {
        &self.gap_tops
    }

    #[must_use]
    pub const fn gap_tiles(&self) -> i32 {
        self.gap_tiles
    }

    /// Gap top (tile row) of the pipe standing in `tile_x`, if any.
    #[must_use]
    pub fn pipe_at(&self, tile_x: i32) -> Option<i32> {
        let rel = tile_x - PIPE_START_OFFSET_X;
        if rel <= 0 || floor_mod(rel, PIPE_INTERVAL_X) != 0 {
            return None;
        }
        let idx = floor_div(rel, PIPE_INTERVAL_X) as usize;
        Some(self.gap_tops[idx % self.gap_tops.len()])
    }

    /// Number of pipes whose right edge lies at or behind `left_px`.
    #[must_use]
    pub fn pipes_passed(&self, left_px: i32) -> u32 {
        let behind = left_px - PIPE_WIDTH - PIPE_START_OFFSET_X * TILE_SIZE;
        floor_div(behind, PIPE_INTERVAL_X * TILE_SIZE).max(0) as u32
    }

    /// Whether the box touches a pipe, the ground, or the ceiling.
    #[must_use]
    pub fn collides(&self, hitbox: Hitbox) -> bool {
        if hitbox.out_of_bounds() {
            return true;
        }
        let x_min = floor_div(hitbox.x0 - PIPE_WIDTH, TILE_SIZE);
        let x_max = floor_div(hitbox.x0 + AGENT_WIDTH, TILE_SIZE);
        for tile_x in x_min..=x_max {
            let Some(top) = self.pipe_at(tile_x) else {
                continue;
            };
            if hitbox.x0 >= tile_x * TILE_SIZE + PIPE_WIDTH || hitbox.x1() < tile_x * TILE_SIZE {
                continue;
            }
            if hitbox.y0 < top * TILE_SIZE || hitbox.y1() >= (top + self.gap_tiles) * TILE_SIZE {
                return true;
            }
        }
        false
    }

    /// Gap tops for the `vision` tile columns starting just behind the box.
    /// Columns without a pipe read as 0. Returns `None` when the box is out of
    /// bounds.
    #[must_use]
    pub fn scan(&self, hitbox: Hitbox, vision: usize) -> Option<Vec<i32>> {
        if hitbox.out_of_bounds() {
            return None;
        }
        let x_min = floor_div(hitbox.x0 - PIPE_WIDTH, TILE_SIZE);
        Some(
            (0..vision as i32)
                .map(|offset| self.pipe_at(x_min + offset).unwrap_or(0))
                .collect(),
        )
    }
}
