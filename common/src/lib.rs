pub mod config;
pub mod error;
pub mod games;
pub mod identifiers;
pub mod logger;
pub mod protocol;

pub use error::{DirectionParseError, RoomError};
pub use identifiers::*;
pub use protocol::{ClientMessage, ErrorCode, GameOver, GameUpdate, ServerMessage};
