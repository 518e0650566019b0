mod room_state;
mod settings;
mod snake;
mod types;

pub use room_state::{
    FinishReason, GameOutcome, RoomPhase, RoomSnapshot, RoomState, TickOutcome, Winner, TIE_MARKER,
};
pub use settings::RoomSettings;
pub use snake::Snake;
pub use types::{DeadSnakeBehavior, DeathReason, Direction, FieldSize, Point, WallCollisionMode};
