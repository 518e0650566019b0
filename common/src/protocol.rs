//! JSON messages exchanged over the game WebSocket.
//!
//! Every frame is `{"event": "<name>", "data": {...}}`, mirroring the event
//! names the browser client listens for.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::games::snake::{FinishReason, GameOutcome, Point, RoomSnapshot};
use crate::{RoomCode, SnakeId};

pub const DEFAULT_PLAYER_NAME: &str = "Player";
pub const MAX_NAME_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateRoom {
        #[serde(default)]
        name: Option<String>,
    },
    JoinRoom {
        room: String,
        #[serde(default)]
        name: Option<String>,
    },
    ChangeDirection {
        room: String,
        direction: String,
    },
    StartGame {
        room: String,
    },
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    RoomNotFound,
    RoomFull,
    RoomNotJoinable,
    NotInRoom,
    AlreadyInRoom,
    MalformedIntent,
    NotAllowed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    RoomCreated {
        room: RoomCode,
        snake_id: SnakeId,
        name: String,
    },
    RoomJoined {
        room: RoomCode,
        snake_id: SnakeId,
        name: String,
    },
    StartGame,
    GameUpdate(GameUpdate),
    GameOver(GameOver),
    Error {
        code: ErrorCode,
        message: String,
    },
    Pong,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameUpdate {
    pub room: RoomCode,
    /// Seconds, fractional.
    pub time_left: f64,
    pub points: BTreeMap<SnakeId, u32>,
    pub names: BTreeMap<SnakeId, String>,
    pub food: Option<Point>,
    pub snakes: BTreeMap<SnakeId, Vec<Point>>,
    pub alive: BTreeMap<SnakeId, bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameOver {
    pub room: RoomCode,
    /// Winner display name, or the tie marker.
    pub winner: String,
    pub tied: Vec<String>,
    pub points: BTreeMap<SnakeId, u32>,
    pub names: BTreeMap<SnakeId, String>,
    pub reason: FinishReason,
    /// Always zero; the clock is over.
    pub time_left: f64,
    pub snakes: BTreeMap<SnakeId, Vec<Point>>,
    pub food: Option<Point>,
}

impl From<&RoomSnapshot> for GameUpdate {
    fn from(snapshot: &RoomSnapshot) -> Self {
        Self {
            room: snapshot.room.clone(),
            time_left: snapshot.time_left.as_secs_f64(),
            points: snapshot.points.clone(),
            names: snapshot.names.clone(),
            food: snapshot.food,
            snakes: snapshot.snakes.clone(),
            alive: snapshot.alive.clone(),
        }
    }
}

impl From<&GameOutcome> for GameOver {
    fn from(outcome: &GameOutcome) -> Self {
        Self {
            room: outcome.room.clone(),
            winner: outcome.winner_label(),
            tied: outcome.tied_names(),
            points: outcome.points.clone(),
            names: outcome.names.clone(),
            reason: outcome.reason,
            time_left: 0.0,
            snakes: outcome.snakes.clone(),
            food: outcome.food,
        }
    }
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Trims a display name, falls back to the default and caps its length.
pub fn sanitize_name(name: Option<&str>) -> String {
    let trimmed = name.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return DEFAULT_PLAYER_NAME.to_string();
    }
    trimmed.chars().take(MAX_NAME_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::games::snake::{RoomPhase, Winner};

    #[test]
    fn test_deserialize_create_room() {
        let msg = ClientMessage::from_json(r#"{"event":"create_room","data":{"name":"Ada"}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::CreateRoom {
                name: Some("Ada".to_string())
            }
        );
    }

    #[test]
    fn test_deserialize_change_direction() {
        let msg = ClientMessage::from_json(
            r#"{"event":"change_direction","data":{"room":"AB12CD","direction":"UP"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::ChangeDirection { room, direction } => {
                assert_eq!(room, "AB12CD");
                assert_eq!(direction, "UP");
            }
            other => panic!("Expected ChangeDirection, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_ping_without_data() {
        let msg = ClientMessage::from_json(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(ClientMessage::from_json(r#"{"event":"teleport","data":{}}"#).is_err());
    }

    #[test]
    fn test_game_update_wire_shape() {
        let a = SnakeId::new(1);
        let b = SnakeId::new(2);
        let snapshot = RoomSnapshot {
            room: RoomCode::from("AB12CD"),
            phase: RoomPhase::Running,
            tick: 3,
            time_left: Duration::from_millis(1500),
            points: BTreeMap::from([(a, 2), (b, 0)]),
            names: BTreeMap::from([(a, "Ada".to_string()), (b, "Bob".to_string())]),
            food: Some(Point::new(3, 4)),
            snakes: BTreeMap::from([
                (a, vec![Point::new(5, 5), Point::new(4, 5)]),
                (b, vec![Point::new(20, 5)]),
            ]),
            alive: BTreeMap::from([(a, true), (b, true)]),
        };

        let value = serde_json::to_value(ServerMessage::GameUpdate(GameUpdate::from(&snapshot))).unwrap();

        assert_eq!(value["event"], "game_update");
        assert_eq!(value["data"]["time_left"], json!(1.5));
        assert_eq!(value["data"]["food"], json!([3, 4]));
        assert_eq!(value["data"]["snakes"]["1"], json!([[5, 5], [4, 5]]));
        assert_eq!(value["data"]["points"]["1"], json!(2));
        assert_eq!(value["data"]["names"]["2"], json!("Bob"));
    }

    #[test]
    fn test_game_over_tie_wire_shape() {
        let a = SnakeId::new(1);
        let b = SnakeId::new(2);
        let outcome = GameOutcome {
            room: RoomCode::from("AB12CD"),
            winner: Winner::Tie(vec![a, b]),
            reason: FinishReason::TimeExpired,
            points: BTreeMap::from([(a, 3), (b, 3)]),
            names: BTreeMap::from([(a, "Ada".to_string()), (b, "Bob".to_string())]),
            snakes: BTreeMap::from([(a, vec![Point::new(2, 2)]), (b, vec![Point::new(7, 7)])]),
            food: None,
        };

        let value = serde_json::to_value(ServerMessage::GameOver(GameOver::from(&outcome))).unwrap();

        assert_eq!(value["event"], "game_over");
        assert_eq!(value["data"]["winner"], "Tie");
        assert_eq!(value["data"]["tied"], json!(["Ada", "Bob"]));
        assert_eq!(value["data"]["reason"], "time_expired");
        assert_eq!(value["data"]["time_left"], json!(0.0));
        assert_eq!(value["data"]["snakes"]["2"], json!([[7, 7]]));
        assert_eq!(value["data"]["food"], json!(null));
    }

    #[test]
    fn test_unit_events_serialize_without_data() {
        let value = serde_json::to_value(ServerMessage::StartGame).unwrap();
        assert_eq!(value, json!({"event": "start_game"}));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name(None), "Player");
        assert_eq!(sanitize_name(Some("   ")), "Player");
        assert_eq!(sanitize_name(Some("  Ada ")), "Ada");
        assert_eq!(sanitize_name(Some(&"x".repeat(50))).chars().count(), MAX_NAME_CHARS);
    }
}
