use common::games::snake::{Direction, RoomPhase};
use common::protocol::sanitize_name;
use common::{
    log, log_debug, log_warn, ClientId, ClientMessage, ErrorCode, RoomCode, RoomError,
    ServerMessage, SnakeId,
};

use crate::broadcaster::{Broadcaster, ClientSender};
use crate::room_registry::{RoomRegistry, Seat};
use crate::tick_scheduler::TickScheduler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub room: RoomCode,
    pub snake_id: SnakeId,
}

/// One WebSocket peer: its outbound channel and the seat it holds, if any.
#[derive(Debug)]
pub struct Connection {
    pub client_id: ClientId,
    pub sender: ClientSender,
    pub membership: Option<Membership>,
}

impl Connection {
    pub fn new(client_id: ClientId, sender: ClientSender) -> Self {
        Self {
            client_id,
            sender,
            membership: None,
        }
    }
}

/// Turns client intents into room operations and answers the sender.
#[derive(Clone, Debug)]
pub struct SessionGateway {
    registry: RoomRegistry,
    broadcaster: Broadcaster,
    scheduler: TickScheduler<Broadcaster>,
}

impl SessionGateway {
    pub fn new(
        registry: RoomRegistry,
        broadcaster: Broadcaster,
        scheduler: TickScheduler<Broadcaster>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            scheduler,
        }
    }

    pub async fn handle_text(&self, conn: &mut Connection, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle_message(conn, message).await,
            Err(e) => {
                log_warn!("Client {} sent a malformed message: {}", conn.client_id, e);
                reply(conn, ServerMessage::error(ErrorCode::MalformedIntent, e.to_string())).await;
            }
        }
    }

    pub async fn handle_message(&self, conn: &mut Connection, message: ClientMessage) {
        match message {
            ClientMessage::CreateRoom { name } => self.handle_create_room(conn, name.as_deref()).await,
            ClientMessage::JoinRoom { room, name } => {
                self.handle_join_room(conn, &room, name.as_deref()).await
            }
            ClientMessage::ChangeDirection { room, direction } => {
                self.handle_change_direction(conn, &room, &direction).await
            }
            ClientMessage::StartGame { room } => self.handle_start_game(conn, &room).await,
            ClientMessage::Ping => reply(conn, ServerMessage::Pong).await,
        }
    }

    /// Releases the connection's seat. Safe to call more than once.
    pub async fn handle_disconnect(&self, conn: &mut Connection) {
        let Some(membership) = conn.membership.take() else {
            return;
        };
        log!(
            "[room:{}] client {} (snake {}) disconnected",
            membership.room, conn.client_id, membership.snake_id
        );
        self.leave(&conn.client_id, &membership).await;
    }

    async fn handle_create_room(&self, conn: &mut Connection, name: Option<&str>) {
        if !self.ensure_not_seated(conn).await {
            return;
        }
        let name = sanitize_name(name);

        match self.registry.create_room(name.clone(), conn.client_id.clone()).await {
            Ok(seat) => {
                self.take_seat(conn, &seat).await;
                reply(
                    conn,
                    ServerMessage::RoomCreated {
                        room: seat.code.clone(),
                        snake_id: seat.snake_id,
                        name,
                    },
                )
                .await;
                self.start_if_ready(&seat).await;
            }
            Err(e) => reply_room_error(conn, &e).await,
        }
    }

    async fn handle_join_room(&self, conn: &mut Connection, room: &str, name: Option<&str>) {
        if !self.ensure_not_seated(conn).await {
            return;
        }
        let code = RoomCode::normalized(room);
        let name = sanitize_name(name);

        match self
            .registry
            .join_room(&code, name.clone(), conn.client_id.clone())
            .await
        {
            Ok(seat) => {
                log!("[room:{}] client {} joined as snake {}", code, conn.client_id, seat.snake_id);
                self.take_seat(conn, &seat).await;
                reply(
                    conn,
                    ServerMessage::RoomJoined {
                        room: seat.code.clone(),
                        snake_id: seat.snake_id,
                        name,
                    },
                )
                .await;
                self.start_if_ready(&seat).await;
            }
            Err(e) => {
                log_debug!("[room:{}] client {} could not join: {}", code, conn.client_id, e);
                reply_room_error(conn, &e).await;
            }
        }
    }

    async fn handle_change_direction(&self, conn: &mut Connection, room: &str, direction: &str) {
        let Some(membership) = seated_in(conn, room) else {
            reply(conn, ServerMessage::error(ErrorCode::NotInRoom, "Not a member of that room")).await;
            return;
        };
        let direction: Direction = match direction.parse() {
            Ok(direction) => direction,
            Err(e) => {
                reply(conn, ServerMessage::error(ErrorCode::MalformedIntent, format!("{}", e))).await;
                return;
            }
        };
        let Some(handle) = self.registry.get_room(&membership.room).await else {
            reply_room_error(conn, &RoomError::RoomNotFound(membership.room)).await;
            return;
        };

        if !handle.lock().await.set_direction(membership.snake_id, direction) {
            log_debug!(
                "[room:{}] ignored {} from snake {}",
                membership.room, direction, membership.snake_id
            );
        }
    }

    async fn handle_start_game(&self, conn: &mut Connection, room: &str) {
        let Some(membership) = seated_in(conn, room) else {
            reply(conn, ServerMessage::error(ErrorCode::NotInRoom, "Not a member of that room")).await;
            return;
        };
        if membership.snake_id != SnakeId::FIRST {
            reply(
                conn,
                ServerMessage::error(ErrorCode::NotAllowed, "Only the room creator can start the game"),
            )
            .await;
            return;
        }
        if let Err(e) = self.scheduler.start_room(&membership.room).await {
            reply_room_error(conn, &e).await;
        }
    }

    /// A client may hold one seat at a time. A seat in a finished or vanished
    /// room is released so the client can play again.
    async fn ensure_not_seated(&self, conn: &mut Connection) -> bool {
        let Some(membership) = conn.membership.clone() else {
            return true;
        };
        match self.registry.phase_of(&membership.room).await {
            None | Some(RoomPhase::Finished) => {
                conn.membership = None;
                self.leave(&conn.client_id, &membership).await;
                true
            }
            Some(_) => {
                reply(
                    conn,
                    ServerMessage::error(
                        ErrorCode::AlreadyInRoom,
                        format!("Already in room {}", membership.room),
                    ),
                )
                .await;
                false
            }
        }
    }

    async fn take_seat(&self, conn: &mut Connection, seat: &Seat) {
        self.broadcaster
            .register(seat.code.clone(), conn.client_id.clone(), conn.sender.clone())
            .await;
        conn.membership = Some(Membership {
            room: seat.code.clone(),
            snake_id: seat.snake_id,
        });
    }

    async fn start_if_ready(&self, seat: &Seat) {
        if !seat.room.lock().await.is_ready_to_start() {
            return;
        }
        if let Err(e) = self.scheduler.start_room(&seat.code).await {
            log_debug!("[room:{}] auto start skipped: {}", seat.code, e);
        }
    }

    async fn leave(&self, client_id: &ClientId, membership: &Membership) {
        self.broadcaster.unregister(&membership.room, client_id).await;
        if let Err(e) = self
            .registry
            .remove_connection(&membership.room, membership.snake_id)
            .await
        {
            log_debug!("[room:{}] release of snake {} skipped: {}", membership.room, membership.snake_id, e);
        }
    }
}

fn seated_in(conn: &Connection, room: &str) -> Option<Membership> {
    let code = RoomCode::normalized(room);
    conn.membership
        .as_ref()
        .filter(|membership| membership.room == code)
        .cloned()
}

pub fn error_code(error: &RoomError) -> ErrorCode {
    match error {
        RoomError::RoomNotFound(_) => ErrorCode::RoomNotFound,
        RoomError::RoomFull { .. } => ErrorCode::RoomFull,
        RoomError::RoomNotJoinable { .. } => ErrorCode::RoomNotJoinable,
        RoomError::UnknownSnake(_) => ErrorCode::NotInRoom,
        RoomError::InvalidPhase { .. } => ErrorCode::NotAllowed,
    }
}

async fn reply_room_error(conn: &Connection, error: &RoomError) {
    reply(conn, ServerMessage::error(error_code(error), error.to_string())).await;
}

async fn reply(conn: &Connection, message: ServerMessage) {
    if let Err(e) = conn.sender.send(message).await {
        log_debug!("Failed to reply to client {}: {}", conn.client_id, e);
    }
}
