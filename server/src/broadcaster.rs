use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;

use common::{log_debug, log_warn, ClientId, RoomCode, ServerMessage};

pub type ClientSender = mpsc::Sender<ServerMessage>;

/// Fan-out seam used by the tick loop, so tests can record what a room saw.
pub trait RoomBroadcaster: Send + Sync + Clone + 'static {
    fn broadcast_to_room(
        &self,
        room: &RoomCode,
        message: ServerMessage,
    ) -> impl Future<Output = ()> + Send;
}

/// Per-room outbound channels. Delivery never waits on a slow client: when a
/// client's buffer is full the message is dropped for that client only.
#[derive(Clone)]
pub struct Broadcaster {
    rooms: Arc<Mutex<HashMap<RoomCode, HashMap<ClientId, ClientSender>>>>,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster").finish()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn register(&self, room: RoomCode, client_id: ClientId, sender: ClientSender) {
        let mut rooms = self.rooms.lock().await;
        rooms.entry(room).or_default().insert(client_id, sender);
    }

    pub async fn unregister(&self, room: &RoomCode, client_id: &ClientId) {
        let mut rooms = self.rooms.lock().await;
        if let Some(clients) = rooms.get_mut(room) {
            clients.remove(client_id);
            if clients.is_empty() {
                rooms.remove(room);
            }
        }
    }

    pub async fn remove_room(&self, room: &RoomCode) {
        self.rooms.lock().await.remove(room);
    }

    pub async fn recipient_count(&self, room: &RoomCode) -> usize {
        self.rooms
            .lock()
            .await
            .get(room)
            .map_or(0, |clients| clients.len())
    }
}

fn deliver(room: &RoomCode, client_id: &ClientId, sender: &ClientSender, message: ServerMessage) {
    match sender.try_send(message) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            log_warn!("[room:{}] Outbound buffer full for client {}, dropping message", room, client_id);
        }
        Err(TrySendError::Closed(_)) => {
            log_debug!("[room:{}] Client {} channel closed", room, client_id);
        }
    }
}

impl RoomBroadcaster for Broadcaster {
    async fn broadcast_to_room(&self, room: &RoomCode, message: ServerMessage) {
        let rooms = self.rooms.lock().await;
        if let Some(clients) = rooms.get(room) {
            for (client_id, sender) in clients {
                deliver(room, client_id, sender, message.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_only_room_members() {
        let broadcaster = Broadcaster::new();
        let room_a = RoomCode::from("AAAAAA");
        let room_b = RoomCode::from("BBBBBB");
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);

        broadcaster.register(room_a.clone(), ClientId::from("a"), tx_a).await;
        broadcaster.register(room_b.clone(), ClientId::from("b"), tx_b).await;

        broadcaster.broadcast_to_room(&room_a, ServerMessage::StartGame).await;

        assert_eq!(rx_a.try_recv().unwrap(), ServerMessage::StartGame);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_buffer_drops_without_blocking() {
        let broadcaster = Broadcaster::new();
        let room = RoomCode::from("AAAAAA");
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);

        broadcaster.register(room.clone(), ClientId::from("slow"), slow_tx).await;
        broadcaster.register(room.clone(), ClientId::from("fast"), fast_tx).await;

        broadcaster.broadcast_to_room(&room, ServerMessage::StartGame).await;
        broadcaster.broadcast_to_room(&room, ServerMessage::Pong).await;

        assert_eq!(slow_rx.try_recv().unwrap(), ServerMessage::StartGame);
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(fast_rx.try_recv().unwrap(), ServerMessage::StartGame);
        assert_eq!(fast_rx.try_recv().unwrap(), ServerMessage::Pong);
    }

    #[tokio::test]
    async fn test_unregister_last_client_drops_room() {
        let broadcaster = Broadcaster::new();
        let room = RoomCode::from("AAAAAA");
        let client = ClientId::from("a");
        let (tx, _rx) = mpsc::channel(1);

        broadcaster.register(room.clone(), client.clone(), tx).await;
        assert_eq!(broadcaster.recipient_count(&room).await, 1);

        broadcaster.unregister(&room, &client).await;
        assert_eq!(broadcaster.recipient_count(&room).await, 0);
    }
}
