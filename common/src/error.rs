use thiserror::Error;

use crate::games::snake::RoomPhase;
use crate::{RoomCode, SnakeId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Room {0} not found")]
    RoomNotFound(RoomCode),

    #[error("Room is full ({capacity} players)")]
    RoomFull { capacity: usize },

    #[error("Room can no longer be joined (phase: {phase})")]
    RoomNotJoinable { phase: RoomPhase },

    #[error("Snake {0} is not part of this room")]
    UnknownSnake(SnakeId),

    #[error("Operation requires phase {expected}, room is {actual}")]
    InvalidPhase { expected: RoomPhase, actual: RoomPhase },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown direction '{0}', expected one of UP, DOWN, LEFT, RIGHT")]
pub struct DirectionParseError(pub String);
