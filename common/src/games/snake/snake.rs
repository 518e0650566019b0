use std::collections::{HashSet, VecDeque};

use crate::SnakeId;
use super::types::{DeathReason, Direction, FieldSize, Point, WallCollisionMode};

#[derive(Clone, Debug)]
pub struct Snake {
    pub id: SnakeId,
    pub name: String,
    pub body: VecDeque<Point>,
    pub body_set: HashSet<Point>,
    pub direction: Direction,
    pub pending_direction: Option<Direction>,
    pub death_reason: Option<DeathReason>,
    pub score: u32,
    pub slot: usize,
}

impl Snake {
    /// Builds a snake whose head is `start_pos`, with up to `length - 1`
    /// segments trailing behind it. Trailing segments that would leave the
    /// board are dropped.
    pub fn new(
        id: SnakeId,
        name: String,
        slot: usize,
        start_pos: Point,
        direction: Direction,
        length: usize,
        field_size: &FieldSize,
    ) -> Self {
        let mut body = VecDeque::with_capacity(length.max(1));
        let mut body_set = HashSet::with_capacity(length.max(1));
        body.push_back(start_pos);
        body_set.insert(start_pos);

        let behind = direction.opposite();
        let mut last = start_pos;
        for _ in 1..length {
            match field_size.step(last, behind, WallCollisionMode::Death) {
                Some(segment) if !body_set.contains(&segment) => {
                    body.push_back(segment);
                    body_set.insert(segment);
                    last = segment;
                }
                _ => break,
            }
        }

        Self {
            id,
            name,
            body,
            body_set,
            direction,
            pending_direction: None,
            death_reason: None,
            score: 0,
            slot,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.death_reason.is_none()
    }

    pub fn head(&self) -> Point {
        // The body is never empty: it starts with the head and only ever
        // loses the tail after gaining a new head.
        self.body[0]
    }

    pub fn tail(&self) -> Point {
        self.body[self.body.len() - 1]
    }

    pub fn occupies(&self, point: &Point) -> bool {
        self.body_set.contains(point)
    }

    pub fn kill(&mut self, reason: DeathReason) -> bool {
        if self.is_alive() {
            self.death_reason = Some(reason);
            self.pending_direction = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn advance(&mut self, next_head: Point, grow: bool) {
        self.body.push_front(next_head);
        self.body_set.insert(next_head);
        if !grow && let Some(tail) = self.body.pop_back() {
            // Chasing its own tail, the new head lands on the cell the tail
            // just left; that cell is still part of the body.
            if !self.body.contains(&tail) {
                self.body_set.remove(&tail);
            }
        }
    }

    pub fn segments(&self) -> Vec<Point> {
        self.body.iter().copied().collect()
    }
}
