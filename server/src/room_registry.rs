use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use common::games::snake::{RoomPhase, RoomSettings, RoomState};
use common::{log, log_warn, ClientId, RoomCode, RoomError, SnakeId};

use crate::room_code::generate_unique_room_code;
use crate::tick_scheduler::RoomTask;

pub type RoomHandle = Arc<Mutex<RoomState>>;

struct RoomEntry {
    room: RoomHandle,
    connections: BTreeMap<SnakeId, ClientId>,
    empty_since: Option<Instant>,
    finished_at: Option<Instant>,
    task: Option<RoomTask>,
}

impl RoomEntry {
    fn new(room: RoomState) -> Self {
        Self {
            room: Arc::new(Mutex::new(room)),
            connections: BTreeMap::new(),
            empty_since: None,
            finished_at: None,
            task: None,
        }
    }

    fn is_expired(&self, now: Instant, empty_grace: Duration, finished_grace: Duration) -> bool {
        let past = |since: Option<Instant>, grace: Duration| {
            since.is_some_and(|since| now.saturating_duration_since(since) >= grace)
        };
        past(self.empty_since, empty_grace) || past(self.finished_at, finished_grace)
    }
}

pub struct Seat {
    pub room: RoomHandle,
    pub code: RoomCode,
    pub snake_id: SnakeId,
}

/// Live rooms keyed by code. The map lock only guards lookups and entry
/// bookkeeping and is never held while waiting on a room's own mutex.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<Mutex<HashMap<RoomCode, RoomEntry>>>,
    settings: RoomSettings,
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("settings", &self.settings)
            .finish()
    }
}

impl RoomRegistry {
    pub fn new(settings: RoomSettings) -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
            settings,
        }
    }

    /// Opens a fresh room under an unused code and seats its creator as
    /// snake 1.
    pub async fn create_room(&self, creator_name: String, client_id: ClientId) -> Result<Seat, RoomError> {
        let mut rooms = self.rooms.lock().await;

        let code = generate_unique_room_code(|code| rooms.contains_key(code));
        let mut state = RoomState::new(code.clone(), self.settings.clone());
        let snake_id = state.add_snake(creator_name)?;

        let mut entry = RoomEntry::new(state);
        entry.connections.insert(snake_id, client_id.clone());
        let room = entry.room.clone();
        rooms.insert(code.clone(), entry);

        log!("[room:{}] created by client {}, {} rooms live", code, client_id, rooms.len());
        Ok(Seat { room, code, snake_id })
    }

    /// Seats a new snake in a waiting room. The room's own lock is taken
    /// after the map lock is released.
    pub async fn join_room(
        &self,
        code: &RoomCode,
        name: String,
        client_id: ClientId,
    ) -> Result<Seat, RoomError> {
        let room = self
            .get_room(code)
            .await
            .ok_or_else(|| RoomError::RoomNotFound(code.clone()))?;

        let snake_id = room.lock().await.add_snake(name)?;

        let mut rooms = self.rooms.lock().await;
        let Some(entry) = rooms.get_mut(code) else {
            drop(rooms);
            log_warn!("[room:{}] removed while snake {} was joining", code, snake_id);
            if let Err(e) = room.lock().await.remove_snake(snake_id) {
                log_warn!("[room:{}] could not release snake {}: {}", code, snake_id, e);
            }
            return Err(RoomError::RoomNotFound(code.clone()));
        };
        entry.connections.insert(snake_id, client_id);
        entry.empty_since = None;

        Ok(Seat {
            room,
            code: code.clone(),
            snake_id,
        })
    }

    pub async fn get_room(&self, code: &RoomCode) -> Option<RoomHandle> {
        self.rooms.lock().await.get(code).map(|entry| entry.room.clone())
    }

    #[cfg(test)]
    pub async fn connection_for(&self, code: &RoomCode, snake_id: SnakeId) -> Option<ClientId> {
        let rooms = self.rooms.lock().await;
        rooms.get(code)?.connections.get(&snake_id).cloned()
    }

    /// Detaches a snake's connection. Before the game starts the snake leaves
    /// the room; mid-game it dies. A room left without connections starts its
    /// empty grace period.
    pub async fn remove_connection(&self, code: &RoomCode, snake_id: SnakeId) -> Result<(), RoomError> {
        let room = {
            let mut rooms = self.rooms.lock().await;
            let entry = rooms
                .get_mut(code)
                .ok_or_else(|| RoomError::RoomNotFound(code.clone()))?;

            if entry.connections.remove(&snake_id).is_none() {
                return Err(RoomError::UnknownSnake(snake_id));
            }
            if entry.connections.is_empty() && entry.empty_since.is_none() {
                log!("[room:{}] last connection left", code);
                entry.empty_since = Some(Instant::now());
            }
            entry.room.clone()
        };

        room.lock().await.remove_snake(snake_id)
    }

    /// Stores the tick task for a room. If the room is already gone the task
    /// is aborted instead.
    pub async fn set_task(&self, code: &RoomCode, task: RoomTask) {
        let mut rooms = self.rooms.lock().await;
        match rooms.get_mut(code) {
            Some(entry) => {
                if let Some(previous) = entry.task.replace(task) {
                    log_warn!("[room:{}] replacing a running tick task", code);
                    previous.abort();
                }
            }
            None => task.abort(),
        }
    }

    pub async fn take_task(&self, code: &RoomCode) -> Option<RoomTask> {
        self.rooms.lock().await.get_mut(code)?.task.take()
    }

    pub async fn mark_finished(&self, code: &RoomCode) {
        if let Some(entry) = self.rooms.lock().await.get_mut(code)
            && entry.finished_at.is_none()
        {
            entry.finished_at = Some(Instant::now());
        }
    }

    /// Drops a room, aborting its tick task if one is still attached.
    pub async fn remove_room(&self, code: &RoomCode) -> bool {
        let mut rooms = self.rooms.lock().await;
        let Some(entry) = rooms.remove(code) else {
            return false;
        };
        if let Some(task) = entry.task {
            task.abort();
        }
        log!("[room:{}] removed, {} rooms live", code, rooms.len());
        true
    }

    /// Codes of rooms that stayed empty or finished longer than their grace
    /// period.
    pub async fn expired_rooms(
        &self,
        now: Instant,
        empty_grace: Duration,
        finished_grace: Duration,
    ) -> Vec<RoomCode> {
        let rooms = self.rooms.lock().await;
        let mut expired: Vec<RoomCode> = rooms
            .iter()
            .filter(|(_, entry)| entry.is_expired(now, empty_grace, finished_grace))
            .map(|(code, _)| code.clone())
            .collect();
        expired.sort();
        expired
    }

    pub async fn room_codes(&self) -> Vec<RoomCode> {
        let mut codes: Vec<RoomCode> = self.rooms.lock().await.keys().cloned().collect();
        codes.sort();
        codes
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    pub async fn phase_of(&self, code: &RoomCode) -> Option<RoomPhase> {
        let room = self.get_room(code).await?;
        let phase = room.lock().await.phase();
        Some(phase)
    }
}
