use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use common::games::snake::{FinishReason, TickOutcome};
use common::protocol::{GameOver, GameUpdate};
use common::{log, log_error, log_warn, RoomCode, RoomError, ServerMessage};

use crate::broadcaster::RoomBroadcaster;
use crate::room_registry::{RoomHandle, RoomRegistry};

/// A room's spawned tick loop plus the signal that asks it to exit.
pub struct RoomTask {
    handle: JoinHandle<()>,
    stop: Arc<Notify>,
}

impl RoomTask {
    pub fn new(handle: JoinHandle<()>, stop: Arc<Notify>) -> Self {
        Self { handle, stop }
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Signals the loop and waits for it to exit. A tick already in progress
    /// runs to completion, including its broadcasts.
    pub async fn stop(self) {
        self.stop.notify_one();
        if let Err(e) = self.handle.await
            && !e.is_cancelled()
        {
            log_warn!("Tick task ended abnormally: {}", e);
        }
    }
}

/// Drives one tick task per running room.
#[derive(Clone)]
pub struct TickScheduler<B: RoomBroadcaster> {
    registry: RoomRegistry,
    broadcaster: B,
    tick_interval: Duration,
}

impl<B: RoomBroadcaster> std::fmt::Debug for TickScheduler<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickScheduler")
            .field("tick_interval", &self.tick_interval)
            .finish()
    }
}

impl<B: RoomBroadcaster> TickScheduler<B> {
    pub fn new(registry: RoomRegistry, broadcaster: B, tick_interval: Duration) -> Self {
        Self {
            registry,
            broadcaster,
            tick_interval,
        }
    }

    /// Moves a waiting room to running, announces the start and spawns its
    /// tick loop.
    pub async fn start_room(&self, code: &RoomCode) -> Result<(), RoomError> {
        let room = self
            .registry
            .get_room(code)
            .await
            .ok_or_else(|| RoomError::RoomNotFound(code.clone()))?;

        let snapshot = {
            let mut state = room.lock().await;
            state.start()?;
            state.snapshot()
        };

        self.broadcaster
            .broadcast_to_room(code, ServerMessage::StartGame)
            .await;
        self.broadcaster
            .broadcast_to_room(code, ServerMessage::GameUpdate(GameUpdate::from(&snapshot)))
            .await;

        let stop = Arc::new(Notify::new());
        let handle = tokio::spawn(run_room_loop(
            code.clone(),
            room,
            self.registry.clone(),
            self.broadcaster.clone(),
            self.tick_interval,
            stop.clone(),
        ));
        self.registry.set_task(code, RoomTask::new(handle, stop)).await;
        Ok(())
    }

    /// Stops a room's tick loop and finishes the game as abandoned. Returns
    /// `true` if this call produced the game-over notice; `false` when the
    /// game had already ended, in which case the loop sent it.
    pub async fn stop_room(&self, code: &RoomCode) -> bool {
        if let Some(task) = self.registry.take_task(code).await {
            task.stop().await;
        }
        let Some(room) = self.registry.get_room(code).await else {
            return false;
        };

        let outcome = room.lock().await.finish(FinishReason::Abandoned);
        match outcome {
            Some(outcome) => {
                self.broadcaster
                    .broadcast_to_room(code, ServerMessage::GameOver(GameOver::from(&outcome)))
                    .await;
                self.registry.mark_finished(code).await;
                true
            }
            None => false,
        }
    }
}

async fn run_room_loop<B: RoomBroadcaster>(
    code: RoomCode,
    room: RoomHandle,
    registry: RoomRegistry,
    broadcaster: B,
    tick_interval: Duration,
    stop: Arc<Notify>,
) {
    let mut ticker = interval_at(Instant::now() + tick_interval, tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();

    log!("[room:{}] tick loop started, interval {:?}", code, tick_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.notified() => break,
        }
        let now = Instant::now();
        let dt = now.duration_since(last_tick);
        last_tick = now;

        let (result, snapshot) = {
            let mut state = room.lock().await;
            let result = state.tick(dt);
            (result, state.snapshot())
        };

        match result {
            Ok(TickOutcome::Continue) => {
                broadcaster
                    .broadcast_to_room(&code, ServerMessage::GameUpdate(GameUpdate::from(&snapshot)))
                    .await;
            }
            Ok(TickOutcome::Finished(outcome)) => {
                broadcaster
                    .broadcast_to_room(&code, ServerMessage::GameUpdate(GameUpdate::from(&snapshot)))
                    .await;
                broadcaster
                    .broadcast_to_room(&code, ServerMessage::GameOver(GameOver::from(&outcome)))
                    .await;
                registry.mark_finished(&code).await;
                break;
            }
            Err(e) => {
                log_error!("[room:{}] tick failed, stopping room: {}", code, e);
                registry.mark_finished(&code).await;
                break;
            }
        }
    }

    log!("[room:{}] tick loop stopped", code);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use common::games::snake::{RoomPhase, RoomSettings, WallCollisionMode};
    use common::ClientId;

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingBroadcaster {
        sent: Arc<Mutex<Vec<(RoomCode, ServerMessage)>>>,
        delay: Duration,
    }

    impl RecordingBroadcaster {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn messages_for(&self, room: &RoomCode) -> Vec<ServerMessage> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(code, _)| code == room)
                .map(|(_, m)| m.clone())
                .collect()
        }

        fn messages(&self) -> Vec<ServerMessage> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, m)| m.clone())
                .collect()
        }

        fn count(&self, predicate: impl Fn(&ServerMessage) -> bool) -> usize {
            self.messages().iter().filter(|m| predicate(m)).count()
        }
    }

    impl RoomBroadcaster for RecordingBroadcaster {
        async fn broadcast_to_room(&self, room: &RoomCode, message: ServerMessage) {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.sent.lock().unwrap().push((room.clone(), message));
        }
    }

    fn fast_settings() -> RoomSettings {
        RoomSettings {
            capacity: 2,
            min_players: 2,
            tick_interval_ms: 50,
            game_duration_secs: 10,
            wall_collision_mode: WallCollisionMode::Death,
            seed: Some(5),
            ..RoomSettings::default()
        }
    }

    async fn seat_two(registry: &RoomRegistry) -> RoomCode {
        let seat = registry
            .create_room("Ada".to_string(), ClientId::from("a"))
            .await
            .unwrap();
        registry
            .join_room(&seat.code, "Bob".to_string(), ClientId::from("b"))
            .await
            .unwrap();
        seat.code
    }

    async fn two_player_room(
        settings: RoomSettings,
    ) -> (RoomRegistry, RecordingBroadcaster, TickScheduler<RecordingBroadcaster>, RoomCode) {
        with_broadcaster(settings, RecordingBroadcaster::default()).await
    }

    async fn with_broadcaster(
        settings: RoomSettings,
        broadcaster: RecordingBroadcaster,
    ) -> (RoomRegistry, RecordingBroadcaster, TickScheduler<RecordingBroadcaster>, RoomCode) {
        let registry = RoomRegistry::new(settings.clone());
        let scheduler = TickScheduler::new(registry.clone(), broadcaster.clone(), settings.tick_interval());

        let seat = registry
            .create_room("Ada".to_string(), ClientId::from("a"))
            .await
            .unwrap();
        registry
            .join_room(&seat.code, "Bob".to_string(), ClientId::from("b"))
            .await
            .unwrap();
        (registry, broadcaster, scheduler, seat.code)
    }

    #[tokio::test]
    async fn test_start_room_announces_and_ticks() {
        let (registry, broadcaster, scheduler, code) = two_player_room(fast_settings()).await;

        scheduler.start_room(&code).await.unwrap();
        tokio::time::sleep(Duration::from_millis(180)).await;

        let messages = broadcaster.messages();
        assert_eq!(messages.first(), Some(&ServerMessage::StartGame));
        assert!(broadcaster.count(|m| matches!(m, ServerMessage::GameUpdate(_))) >= 3);

        let room = registry.get_room(&code).await.unwrap();
        assert!(room.lock().await.tick_count() >= 2);

        scheduler.stop_room(&code).await;
    }

    #[tokio::test]
    async fn test_start_room_twice_is_rejected() {
        let (_registry, _broadcaster, scheduler, code) = two_player_room(fast_settings()).await;

        scheduler.start_room(&code).await.unwrap();
        let second = scheduler.start_room(&code).await;

        assert!(matches!(second, Err(RoomError::InvalidPhase { .. })));
        scheduler.stop_room(&code).await;
    }

    #[tokio::test]
    async fn test_start_unknown_room() {
        let registry = RoomRegistry::new(fast_settings());
        let scheduler = TickScheduler::new(registry, RecordingBroadcaster::default(), Duration::from_millis(50));

        let result = scheduler.start_room(&RoomCode::from("ZZZZZZ")).await;
        assert!(matches!(result, Err(RoomError::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn test_stop_room_emits_game_over_once() {
        let (registry, broadcaster, scheduler, code) = two_player_room(fast_settings()).await;
        scheduler.start_room(&code).await.unwrap();

        assert!(scheduler.stop_room(&code).await);
        assert!(!scheduler.stop_room(&code).await);

        let ticks_after_stop = registry.get_room(&code).await.unwrap().lock().await.tick_count();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let room = registry.get_room(&code).await.unwrap();
        let state = room.lock().await;

        assert_eq!(state.phase(), RoomPhase::Finished);
        assert_eq!(state.tick_count(), ticks_after_stop);
        assert_eq!(broadcaster.count(|m| matches!(m, ServerMessage::GameOver(_))), 1);
    }

    #[tokio::test]
    async fn test_wall_deaths_finish_room_and_stop_ticking() {
        // Both snakes start facing a wall a few cells away on a tiny board.
        let settings = RoomSettings {
            field_width: 10,
            field_height: 10,
            ..fast_settings()
        };
        let (registry, broadcaster, scheduler, code) = two_player_room(settings).await;

        scheduler.start_room(&code).await.unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;

        let room = registry.get_room(&code).await.unwrap();
        let ticks = room.lock().await.tick_count();
        assert_eq!(room.lock().await.phase(), RoomPhase::Finished);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(room.lock().await.tick_count(), ticks);

        let messages = broadcaster.messages();
        assert_eq!(broadcaster.count(|m| matches!(m, ServerMessage::GameOver(_))), 1);
        assert!(matches!(messages.last(), Some(ServerMessage::GameOver(over)) if over.reason == FinishReason::Elimination));
        assert!(!scheduler.stop_room(&code).await);
    }

    #[tokio::test]
    async fn test_stop_during_final_broadcast_keeps_game_over() {
        let settings = RoomSettings {
            game_duration_secs: 0,
            ..fast_settings()
        };
        let broadcaster = RecordingBroadcaster::slow(Duration::from_millis(60));
        let (registry, broadcaster, scheduler, code) = with_broadcaster(settings, broadcaster).await;

        scheduler.start_room(&code).await.unwrap();
        // First tick lands 50ms in and spends 120ms broadcasting its result.
        tokio::time::sleep(Duration::from_millis(80)).await;
        let produced = scheduler.stop_room(&code).await;

        assert!(!produced);
        assert_eq!(registry.phase_of(&code).await, Some(RoomPhase::Finished));
        assert_eq!(broadcaster.count(|m| matches!(m, ServerMessage::GameOver(_))), 1);
        let messages = broadcaster.messages();
        assert!(matches!(messages.last(), Some(ServerMessage::GameOver(over)) if over.reason == FinishReason::TimeExpired));
    }

    #[tokio::test]
    async fn test_rooms_tick_independently() {
        let settings = fast_settings();
        let registry = RoomRegistry::new(settings.clone());
        let broadcaster = RecordingBroadcaster::default();
        let scheduler = TickScheduler::new(registry.clone(), broadcaster.clone(), settings.tick_interval());
        let first = seat_two(&registry).await;
        let second = seat_two(&registry).await;

        scheduler.start_room(&first).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        let second_before = broadcaster.messages_for(&second);
        assert!(second_before.is_empty());

        scheduler.start_room(&second).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(scheduler.stop_room(&first).await);

        let first_room = registry.get_room(&first).await.unwrap();
        let second_room = registry.get_room(&second).await.unwrap();
        let first_ticks = first_room.lock().await.tick_count();
        let second_ticks = second_room.lock().await.tick_count();
        let first_sent = broadcaster.messages_for(&first).len();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(first_room.lock().await.phase(), RoomPhase::Finished);
        assert_eq!(first_room.lock().await.tick_count(), first_ticks);
        assert_eq!(broadcaster.messages_for(&first).len(), first_sent);

        assert_eq!(second_room.lock().await.phase(), RoomPhase::Running);
        assert!(second_room.lock().await.tick_count() > second_ticks);
        let second_messages = broadcaster.messages_for(&second);
        assert_eq!(second_messages.first(), Some(&ServerMessage::StartGame));
        assert!(!second_messages.iter().any(|m| matches!(m, ServerMessage::GameOver(_))));
        assert!(second_messages.iter().all(|m| match m {
            ServerMessage::GameUpdate(update) => update.room == second,
            _ => true,
        }));

        scheduler.stop_room(&second).await;
    }
}
