use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::RoomError;
use crate::games::SessionRng;
use crate::{log, log_debug, RoomCode, SnakeId};
use super::settings::RoomSettings;
use super::snake::Snake;
use super::types::{DeadSnakeBehavior, DeathReason, Direction, FieldSize, Point};

/// Wire marker used in place of a winner name when the top score is shared.
pub const TIE_MARKER: &str = "Tie";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    Waiting,
    Running,
    Finished,
}

impl fmt::Display for RoomPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoomPhase::Waiting => "waiting",
            RoomPhase::Running => "running",
            RoomPhase::Finished => "finished",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    TimeExpired,
    Elimination,
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Winner {
    Snake(SnakeId),
    /// Every snake sharing the top score. Empty when the room had no snakes.
    Tie(Vec<SnakeId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameOutcome {
    pub room: RoomCode,
    pub winner: Winner,
    pub reason: FinishReason,
    pub points: BTreeMap<SnakeId, u32>,
    pub names: BTreeMap<SnakeId, String>,
    /// Board as it stood when the game ended.
    pub snakes: BTreeMap<SnakeId, Vec<Point>>,
    pub food: Option<Point>,
}

impl GameOutcome {
    pub fn winner_label(&self) -> String {
        match &self.winner {
            Winner::Snake(id) => self
                .names
                .get(id)
                .cloned()
                .unwrap_or_else(|| id.to_string()),
            Winner::Tie(_) => TIE_MARKER.to_string(),
        }
    }

    pub fn tied_names(&self) -> Vec<String> {
        match &self.winner {
            Winner::Snake(_) => Vec::new(),
            Winner::Tie(ids) => ids
                .iter()
                .filter_map(|id| self.names.get(id).cloned())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Continue,
    Finished(GameOutcome),
}

/// Immutable view of a room, taken after a tick and handed to the broadcaster.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub room: RoomCode,
    pub phase: RoomPhase,
    pub tick: u64,
    pub time_left: Duration,
    pub points: BTreeMap<SnakeId, u32>,
    pub names: BTreeMap<SnakeId, String>,
    pub food: Option<Point>,
    pub snakes: BTreeMap<SnakeId, Vec<Point>>,
    pub alive: BTreeMap<SnakeId, bool>,
}

#[derive(Debug)]
pub struct RoomState {
    code: RoomCode,
    settings: RoomSettings,
    field_size: FieldSize,
    phase: RoomPhase,
    snakes: BTreeMap<SnakeId, Snake>,
    next_snake_id: SnakeId,
    food: Option<Point>,
    time_left: Duration,
    tick: u64,
    outcome: Option<GameOutcome>,
    rng: SessionRng,
}

impl RoomState {
    pub fn new(code: RoomCode, settings: RoomSettings) -> Self {
        let rng = SessionRng::from_optional_seed(settings.seed);
        Self::with_rng(code, settings, rng)
    }

    pub fn with_rng(code: RoomCode, settings: RoomSettings, rng: SessionRng) -> Self {
        Self {
            code,
            field_size: settings.field_size(),
            time_left: settings.game_duration(),
            settings,
            phase: RoomPhase::Waiting,
            snakes: BTreeMap::new(),
            next_snake_id: SnakeId::FIRST,
            food: None,
            tick: 0,
            outcome: None,
            rng,
        }
    }

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    pub fn snake(&self, id: SnakeId) -> Option<&Snake> {
        self.snakes.get(&id)
    }

    pub fn snake_count(&self) -> usize {
        self.snakes.len()
    }

    pub fn alive_count(&self) -> usize {
        self.snakes.values().filter(|s| s.is_alive()).count()
    }

    pub fn food(&self) -> Option<Point> {
        self.food
    }

    pub fn time_left(&self) -> Duration {
        self.time_left
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn outcome(&self) -> Option<&GameOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_ready_to_start(&self) -> bool {
        self.phase == RoomPhase::Waiting && self.snakes.len() >= self.settings.min_players
    }

    pub fn add_snake(&mut self, name: String) -> Result<SnakeId, RoomError> {
        if self.phase != RoomPhase::Waiting {
            return Err(RoomError::RoomNotJoinable { phase: self.phase });
        }
        if self.snakes.len() >= self.settings.capacity {
            return Err(RoomError::RoomFull {
                capacity: self.settings.capacity,
            });
        }

        let slot = self.free_slot();
        let (start_pos, direction) = self.start_position(slot);
        let id = self.next_snake_id;
        self.next_snake_id = id.next();

        let snake = Snake::new(
            id,
            name,
            slot,
            start_pos,
            direction,
            self.settings.initial_snake_length,
            &self.field_size,
        );
        log!(
            "[room:{}] {} joined as snake {} at {} heading {}",
            self.code, snake.name, id, start_pos, direction
        );
        self.snakes.insert(id, snake);
        Ok(id)
    }

    pub fn remove_snake(&mut self, id: SnakeId) -> Result<(), RoomError> {
        if !self.snakes.contains_key(&id) {
            return Err(RoomError::UnknownSnake(id));
        }

        match self.phase {
            RoomPhase::Waiting => {
                self.snakes.remove(&id);
                log!("[room:{}] snake {} left before start", self.code, id);
            }
            RoomPhase::Running => {
                if let Some(snake) = self.snakes.get_mut(&id)
                    && snake.kill(DeathReason::PlayerDisconnected)
                {
                    log!("[room:{}] snake {} disconnected mid-game", self.code, id);
                }
            }
            RoomPhase::Finished => {}
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), RoomError> {
        self.expect_phase(RoomPhase::Waiting)?;
        self.phase = RoomPhase::Running;
        self.time_left = self.settings.game_duration();
        self.spawn_food();
        log!(
            "[room:{}] game started with {} snakes, {}s on the clock",
            self.code,
            self.snakes.len(),
            self.time_left.as_secs()
        );
        Ok(())
    }

    /// Buffers a heading change for the next tick. Returns `false` when the
    /// intent is ignored: room not running, snake unknown or dead, or an
    /// instant reversal of the current heading.
    pub fn set_direction(&mut self, id: SnakeId, direction: Direction) -> bool {
        if self.phase != RoomPhase::Running {
            return false;
        }
        let Some(snake) = self.snakes.get_mut(&id) else {
            return false;
        };
        if !snake.is_alive() || direction.is_opposite(&snake.direction) {
            return false;
        }
        snake.pending_direction = Some(direction);
        true
    }

    pub fn tick(&mut self, dt: Duration) -> Result<TickOutcome, RoomError> {
        self.expect_phase(RoomPhase::Running)?;
        self.tick += 1;

        for snake in self.snakes.values_mut().filter(|s| s.is_alive()) {
            if let Some(direction) = snake.pending_direction.take() {
                snake.direction = direction;
            }
        }

        let mut moves: BTreeMap<SnakeId, Point> = BTreeMap::new();
        let mut deaths: Vec<(SnakeId, DeathReason)> = Vec::new();
        for snake in self.snakes.values().filter(|s| s.is_alive()) {
            match self
                .field_size
                .step(snake.head(), snake.direction, self.settings.wall_collision_mode)
            {
                Some(next) => {
                    moves.insert(snake.id, next);
                }
                None => deaths.push((snake.id, DeathReason::WallCollision)),
            }
        }

        let growing: HashSet<SnakeId> = moves
            .iter()
            .filter(|(_, next)| Some(**next) == self.food)
            .map(|(id, _)| *id)
            .collect();

        // A snake that collides stays put, so its tail no longer frees up.
        // That can doom another mover; repeat until nothing changes.
        loop {
            let collided: Vec<(SnakeId, DeathReason)> = moves
                .iter()
                .filter_map(|(id, next)| {
                    self.collision_at(*id, *next, &moves, &growing)
                        .map(|reason| (*id, reason))
                })
                .collect();
            if collided.is_empty() {
                break;
            }
            for (id, reason) in collided {
                moves.remove(&id);
                deaths.push((id, reason));
            }
        }

        for (id, reason) in deaths {
            if let Some(snake) = self.snakes.get_mut(&id)
                && snake.kill(reason)
            {
                log!(
                    "[room:{}] snake {} died at tick {}: {:?}",
                    self.code, id, self.tick, reason
                );
            }
        }

        let mut food_eaten = false;
        for (id, next) in moves {
            let grow = growing.contains(&id);
            if let Some(snake) = self.snakes.get_mut(&id) {
                snake.advance(next, grow);
                if grow {
                    snake.score += 1;
                    food_eaten = true;
                    log_debug!(
                        "[room:{}] snake {} ate food at {}, score {}",
                        self.code, id, next, snake.score
                    );
                }
            }
        }
        if food_eaten || self.food.is_none() {
            self.food = None;
            self.spawn_food();
        }

        self.time_left = self.time_left.saturating_sub(dt);

        match self.end_condition() {
            Some(reason) => match self.finish(reason) {
                Some(outcome) => Ok(TickOutcome::Finished(outcome)),
                None => Ok(TickOutcome::Continue),
            },
            None => Ok(TickOutcome::Continue),
        }
    }

    /// Moves the room to `Finished` and settles the winner. Only the first
    /// call returns the outcome; later calls are no-ops.
    pub fn finish(&mut self, reason: FinishReason) -> Option<GameOutcome> {
        if self.phase == RoomPhase::Finished {
            return None;
        }
        self.phase = RoomPhase::Finished;

        let board = self.snapshot();
        let outcome = GameOutcome {
            room: self.code.clone(),
            winner: self.decide_winner(),
            reason,
            points: board.points,
            names: board.names,
            snakes: board.snakes,
            food: board.food,
        };
        log!(
            "[room:{}] game over ({:?}), winner: {}",
            self.code,
            reason,
            outcome.winner_label()
        );
        self.outcome = Some(outcome.clone());
        Some(outcome)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let visible = |snake: &&Snake| {
            snake.is_alive() || self.settings.dead_snake_behavior == DeadSnakeBehavior::StayOnField
        };

        RoomSnapshot {
            room: self.code.clone(),
            phase: self.phase,
            tick: self.tick,
            time_left: self.time_left,
            points: self.points(),
            names: self.names(),
            food: self.food,
            snakes: self
                .snakes
                .values()
                .filter(visible)
                .map(|s| (s.id, s.segments()))
                .collect(),
            alive: self.snakes.values().map(|s| (s.id, s.is_alive())).collect(),
        }
    }

    fn expect_phase(&self, expected: RoomPhase) -> Result<(), RoomError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(RoomError::InvalidPhase {
                expected,
                actual: self.phase,
            })
        }
    }

    fn points(&self) -> BTreeMap<SnakeId, u32> {
        self.snakes.values().map(|s| (s.id, s.score)).collect()
    }

    fn names(&self) -> BTreeMap<SnakeId, String> {
        self.snakes.values().map(|s| (s.id, s.name.clone())).collect()
    }

    fn free_slot(&self) -> usize {
        let used: HashSet<usize> = self.snakes.values().map(|s| s.slot).collect();
        (0..self.settings.capacity)
            .find(|slot| !used.contains(slot))
            .unwrap_or(self.snakes.len())
    }

    fn start_position(&self, slot: usize) -> (Point, Direction) {
        let width = self.field_size.width;
        let height = self.field_size.height;
        let lane = slot / 2;
        let lane_step = height / (self.settings.lane_count() + 1);
        let y = (lane_step * (lane + 1)).min(height - 1);

        if slot % 2 == 0 {
            (Point::new(width / 6, y), Direction::Right)
        } else {
            (Point::new(width - 1 - width / 6, y), Direction::Left)
        }
    }

    fn is_obstacle(&self, snake: &Snake) -> bool {
        snake.is_alive() || self.settings.dead_snake_behavior == DeadSnakeBehavior::StayOnField
    }

    fn vacates_tail(snake: &Snake, moves: &BTreeMap<SnakeId, Point>, growing: &HashSet<SnakeId>) -> bool {
        moves.contains_key(&snake.id) && !growing.contains(&snake.id)
    }

    fn collision_at(
        &self,
        id: SnakeId,
        next: Point,
        moves: &BTreeMap<SnakeId, Point>,
        growing: &HashSet<SnakeId>,
    ) -> Option<DeathReason> {
        let snake = self.snakes.get(&id)?;
        let blocks = |other: &Snake, cell: Point| {
            other.occupies(&cell) && !(cell == other.tail() && Self::vacates_tail(other, moves, growing))
        };

        if blocks(snake, next) {
            return Some(DeathReason::SelfCollision);
        }

        for other in self.snakes.values() {
            if other.id == id || !self.is_obstacle(other) {
                continue;
            }
            let other_next = moves.get(&other.id);
            let head_on = other_next == Some(&next);
            let swapped = other_next == Some(&snake.head()) && other.head() == next;
            if head_on || swapped || blocks(other, next) {
                log_debug!(
                    "[room:{}] snake {} collided with snake {} at {}",
                    self.code, id, other.id, next
                );
                return Some(DeathReason::OtherSnakeCollision);
            }
        }
        None
    }

    fn spawn_food(&mut self) {
        let occupied: HashSet<Point> = self
            .snakes
            .values()
            .filter(|s| self.is_obstacle(s))
            .flat_map(|s| s.body.iter().copied())
            .collect();

        let free: Vec<Point> = (0..self.field_size.height)
            .flat_map(|y| (0..self.field_size.width).map(move |x| Point::new(x, y)))
            .filter(|p| !occupied.contains(p))
            .collect();

        self.food = self.rng.pick(&free).copied();
        match self.food {
            Some(food) => log_debug!("[room:{}] food spawned at {}", self.code, food),
            None => log_debug!("[room:{}] no free cell for food", self.code),
        }
    }

    fn end_condition(&self) -> Option<FinishReason> {
        if self.time_left.is_zero() {
            return Some(FinishReason::TimeExpired);
        }
        let alive = self.alive_count();
        if alive == 0 || (self.snakes.len() >= 2 && alive <= 1) {
            return Some(FinishReason::Elimination);
        }
        None
    }

    fn decide_winner(&self) -> Winner {
        let Some(top) = self.snakes.values().map(|s| s.score).max() else {
            return Winner::Tie(Vec::new());
        };
        let leaders: Vec<SnakeId> = self
            .snakes
            .values()
            .filter(|s| s.score == top)
            .map(|s| s.id)
            .collect();

        match leaders.as_slice() {
            [single] => Winner::Snake(*single),
            _ => Winner::Tie(leaders),
        }
    }
}
