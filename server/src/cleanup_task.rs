use std::time::Instant;

use common::log;

use crate::broadcaster::Broadcaster;
use crate::room_registry::RoomRegistry;
use crate::server_config::CleanupSettings;
use crate::tick_scheduler::TickScheduler;

/// Periodically tears down rooms that stayed empty or finished past their
/// grace period.
pub struct CleanupTask {
    registry: RoomRegistry,
    broadcaster: Broadcaster,
    scheduler: TickScheduler<Broadcaster>,
    settings: CleanupSettings,
}

impl CleanupTask {
    pub fn new(
        registry: RoomRegistry,
        broadcaster: Broadcaster,
        scheduler: TickScheduler<Broadcaster>,
        settings: CleanupSettings,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            scheduler,
            settings,
        }
    }

    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.settings.check_interval());

        loop {
            interval.tick().await;
            self.cleanup_expired(Instant::now()).await;
        }
    }

    pub async fn cleanup_expired(&self, now: Instant) -> usize {
        let expired = self
            .registry
            .expired_rooms(
                now,
                self.settings.empty_room_grace(),
                self.settings.finished_room_grace(),
            )
            .await;

        for code in &expired {
            let listeners = self.broadcaster.recipient_count(code).await;
            log!("Cleaning up expired room: {} ({} listeners)", code, listeners);
            self.scheduler.stop_room(code).await;
            self.registry.remove_room(code).await;
            self.broadcaster.remove_room(code).await;
        }
        expired.len()
    }
}
