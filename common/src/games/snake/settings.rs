use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Validate;
use super::types::{DeadSnakeBehavior, FieldSize, WallCollisionMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomSettings {
    pub field_width: usize,
    pub field_height: usize,
    pub capacity: usize,
    pub min_players: usize,
    pub tick_interval_ms: u64,
    pub game_duration_secs: u64,
    pub initial_snake_length: usize,
    pub wall_collision_mode: WallCollisionMode,
    pub dead_snake_behavior: DeadSnakeBehavior,
    /// Fixed food seed, mostly useful for reproducing a game.
    pub seed: Option<u64>,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            field_width: 30,
            field_height: 30,
            capacity: 2,
            min_players: 2,
            tick_interval_ms: 150,
            game_duration_secs: 180,
            initial_snake_length: 1,
            wall_collision_mode: WallCollisionMode::Death,
            dead_snake_behavior: DeadSnakeBehavior::StayOnField,
            seed: None,
        }
    }
}

impl RoomSettings {
    pub fn field_size(&self) -> FieldSize {
        FieldSize {
            width: self.field_width,
            height: self.field_height,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn game_duration(&self) -> Duration {
        Duration::from_secs(self.game_duration_secs)
    }

    pub fn lane_count(&self) -> usize {
        self.capacity.div_ceil(2)
    }
}

impl Validate for RoomSettings {
    fn validate(&self) -> Result<(), String> {
        if !(10..=100).contains(&self.field_width) {
            return Err("Field width must be between 10 and 100".to_string());
        }
        if !(10..=100).contains(&self.field_height) {
            return Err("Field height must be between 10 and 100".to_string());
        }
        if !(1..=10).contains(&self.capacity) {
            return Err("Room capacity must be between 1 and 10".to_string());
        }
        if self.min_players < 1 || self.min_players > self.capacity {
            return Err("Minimum players must be between 1 and the room capacity".to_string());
        }
        if self.lane_count() >= self.field_height {
            return Err("Field is too short for the room capacity".to_string());
        }
        if !(50..=5000).contains(&self.tick_interval_ms) {
            return Err("Tick interval must be between 50ms and 5000ms".to_string());
        }
        if !(10..=3600).contains(&self.game_duration_secs) {
            return Err("Game duration must be between 10s and 3600s".to_string());
        }
        if !(1..=5).contains(&self.initial_snake_length) {
            return Err("Initial snake length must be between 1 and 5".to_string());
        }
        if self.initial_snake_length > self.field_width / 6 + 1 {
            return Err("Initial snake length does not fit behind the start position".to_string());
        }
        Ok(())
    }
}
