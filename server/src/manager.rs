use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use regex::Regex;
use tokio::time::interval;
use uuid::Uuid;

use shared::types::Difficulty;
use shared::xp::XpPolicy;

use crate::config::AppConfig;
use crate::db::PersistenceBackend;
use crate::error::{AppError, AppResult};
use crate::room::GameRoom;

/// Rooms are 1-50 chars, letters/digits/space/hyphen only (`spec.md` §3).
fn room_name_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9 \-]{1,50}$").unwrap())
}

/// Summary row for `GET /rooms` (`spec.md` §6.1) — only Waiting rooms
/// are listed.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub player_count: usize,
    pub difficulty: Difficulty,
}

/// Owns the process-wide room registry, passed by reference to the hub
/// at startup rather than reached via global/static state (`spec.md`
/// §9). Grounded on the teacher's `DashMap<String, Room>` registry,
/// generalized with a reaper task and explicit `Create`/`Get`/`List`/
/// `Delete` operations (`spec.md` §4.5).
pub struct RoomManager {
    rooms: DashMap<String, Arc<GameRoom>>,
    config: Arc<AppConfig>,
    persistence: Arc<PersistenceBackend>,
    xp_policy: Arc<dyn XpPolicy + Send + Sync>,
}

impl RoomManager {
    pub fn new(
        config: Arc<AppConfig>,
        persistence: Arc<PersistenceBackend>,
        xp_policy: Arc<dyn XpPolicy + Send + Sync>,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            config,
            persistence,
            xp_policy,
        }
    }

    pub fn create(
        &self,
        host_user_id: String,
        name: String,
        difficulty: Difficulty,
        word_count: u32,
    ) -> AppResult<Arc<GameRoom>> {
        if name.is_empty() || name.len() > self.config.max_room_name_len || !room_name_regex().is_match(&name) {
            return Err(AppError::InvalidRoomName {
                reason: format!(
                    "name must be 1-{} chars of letters, digits, spaces, or hyphens",
                    self.config.max_room_name_len
                ),
            });
        }
        if word_count == 0 || word_count > self.config.max_word_count {
            return Err(AppError::InvalidRoomName {
                reason: format!("word_count must be in [1, {}]", self.config.max_word_count),
            });
        }
        if self.rooms.len() >= self.config.max_rooms {
            return Err(AppError::CapacityExceeded);
        }

        let id = Uuid::new_v4().to_string();
        let room = Arc::new(GameRoom::new(
            id.clone(),
            name,
            host_user_id,
            difficulty,
            word_count,
            self.config.clone(),
            self.persistence.clone(),
            self.xp_policy.clone(),
        ));
        self.rooms.insert(id, room.clone());
        Ok(room)
    }

    pub fn get(&self, id: &str) -> AppResult<Arc<GameRoom>> {
        self.rooms
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::RoomNotFound {
                room_id: id.to_string(),
            })
    }

    pub async fn list_waiting(&self) -> Vec<RoomSummary> {
        let mut summaries = Vec::new();
        for entry in self.rooms.iter() {
            let room = entry.value();
            if room.state().await == shared::fsm::RoomState::Waiting {
                summaries.push(RoomSummary {
                    id: room.id.clone(),
                    name: room.name.clone(),
                    player_count: room.player_count().await,
                    difficulty: room.difficulty,
                });
            }
        }
        summaries
    }

    pub fn delete(&self, id: &str) -> AppResult<()> {
        self.rooms
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AppError::RoomNotFound {
                room_id: id.to_string(),
            })
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// One reaper pass, factored out of the spawned loop so tests can
    /// drive it without waiting on the tick interval.
    async fn reap_once(&self) {
        let mut stale = Vec::new();
        for entry in self.rooms.iter() {
            let room = entry.value();
            let state = room.state().await;
            match state {
                shared::fsm::RoomState::Finished => {
                    if let Some(finished_at) = room.finished_at().await {
                        let age = Utc::now().signed_duration_since(finished_at);
                        if age.to_std().unwrap_or_default() > self.config.finished_room_ttl {
                            stale.push(room.id.clone());
                        }
                    }
                }
                shared::fsm::RoomState::Waiting if room.player_count().await == 0 => {
                    let age = Utc::now().signed_duration_since(room.created_at);
                    if age.to_std().unwrap_or_default() > self.config.empty_waiting_room_ttl {
                        stale.push(room.id.clone());
                    }
                }
                _ => {}
            }
        }
        for id in stale {
            self.rooms.remove(&id);
            tracing::info!(room_id = %id, "reaped stale room");
        }
    }
}

/// Spawns the 1-minute reaper tick (`spec.md` §4.5). The manager is
/// expected to live for the process lifetime, so this task is never
/// explicitly joined — it is drained on process shutdown.
pub fn spawn_reaper(manager: Arc<RoomManager>) {
    let tick_interval = manager.config.reaper_tick_interval;
    tokio::spawn(async move {
        let mut ticker = interval(tick_interval);
        loop {
            ticker.tick().await;
            manager.reap_once().await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::xp::DefaultXpPolicy;

    fn test_manager() -> RoomManager {
        RoomManager::new(
            Arc::new(AppConfig::default()),
            Arc::new(PersistenceBackend::in_memory()),
            Arc::new(DefaultXpPolicy),
        )
    }

    #[tokio::test]
    async fn create_rejects_invalid_name() {
        let manager = test_manager();
        let err = manager
            .create("host".to_string(), "bad/name!".to_string(), Difficulty::Easy, 20)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRoomName { .. }));
    }

    #[tokio::test]
    async fn create_rejects_word_count_out_of_range() {
        let manager = test_manager();
        let err = manager
            .create("host".to_string(), "Good Room".to_string(), Difficulty::Easy, 0)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRoomName { .. }));
    }

    #[tokio::test]
    async fn get_and_delete_round_trip() {
        let manager = test_manager();
        let room = manager
            .create("host".to_string(), "Good Room".to_string(), Difficulty::Easy, 20)
            .unwrap();
        assert!(manager.get(&room.id).is_ok());
        manager.delete(&room.id).unwrap();
        assert!(matches!(manager.get(&room.id).unwrap_err(), AppError::RoomNotFound { .. }));
    }

    #[tokio::test]
    async fn list_waiting_excludes_rooms_past_waiting() {
        let manager = test_manager();
        let room = manager
            .create("host".to_string(), "Good Room".to_string(), Difficulty::Easy, 20)
            .unwrap();
        room.add_player("u1".to_string(), "alice".to_string()).await.unwrap();
        let listed = manager.list_waiting().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, room.id);
    }

    #[tokio::test]
    async fn reap_once_removes_old_empty_waiting_room() {
        let mut config = AppConfig::default();
        config.empty_waiting_room_ttl = std::time::Duration::from_secs(0);
        let manager = RoomManager::new(
            Arc::new(config),
            Arc::new(PersistenceBackend::in_memory()),
            Arc::new(DefaultXpPolicy),
        );
        let room = manager
            .create("host".to_string(), "Stale Room".to_string(), Difficulty::Easy, 20)
            .unwrap();
        manager.reap_once().await;
        assert!(manager.get(&room.id).is_err());
    }
}
