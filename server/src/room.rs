use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_fsm::StateMachineImpl;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use shared::fsm::{RoomEvent, RoomState};
use shared::protocol::{RaceResultEntry, RaceStartPlayer, ServerMessage};
use shared::types::{car_emoji_for, Difficulty};
use shared::xp::{self, XpPolicy};

use crate::config::AppConfig;
use crate::db::{PersistedParticipant, PersistedRace, PersistenceBackend};
use crate::error::{AppError, AppResult};
use crate::player::PlayerConnection;
use crate::ranking::{self, PlayerSnapshot};

/// The heart of the system: one room's player set, state machine, and
/// timers, sized for at most four members (`spec.md` §4.4). Lock order
/// within a room is state → players → a given player's own fields,
/// matching the registry→state→players→fields hierarchy from §5 so
/// rooms never deadlock against each other or against the manager.
/// `broadcast_lock` is orthogonal to that chain — it is only ever held
/// on its own, across a single `broadcast` call, to serialize fan-out
/// (`spec.md` §5's broadcast-ordering guarantee).
///
/// Operations that may need to arm a background timer borrow `self` by
/// `Arc<Self>` instead of `&self` — the only stable way for a method to
/// hand a `'static` clone of itself to `tokio::spawn`. Callers (the hub,
/// the manager) always hold rooms as `Arc<GameRoom>`, so this costs
/// nothing beyond an extra `.clone()` at call sites.
pub struct GameRoom {
    pub id: String,
    pub name: String,
    pub host_user_id: String,
    pub difficulty: Difficulty,
    pub word_count: u32,
    pub max_players: usize,
    pub min_players: usize,
    pub created_at: DateTime<Utc>,

    state: RwLock<RoomState>,
    players: RwLock<HashMap<String, Arc<PlayerConnection>>>,
    join_order: RwLock<Vec<String>>,

    race_text: RwLock<Option<String>>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    finished_at: RwLock<Option<DateTime<Utc>>>,

    countdown_cancel: RwLock<Option<CancellationToken>>,
    race_timeout_cancel: RwLock<Option<CancellationToken>>,
    persisted: AtomicBool,
    broadcast_lock: Mutex<()>,

    config: Arc<AppConfig>,
    persistence: Arc<PersistenceBackend>,
    xp_policy: Arc<dyn XpPolicy + Send + Sync>,
}

impl GameRoom {
    pub fn new(
        id: String,
        name: String,
        host_user_id: String,
        difficulty: Difficulty,
        word_count: u32,
        config: Arc<AppConfig>,
        persistence: Arc<PersistenceBackend>,
        xp_policy: Arc<dyn XpPolicy + Send + Sync>,
    ) -> Self {
        Self {
            id,
            name,
            host_user_id,
            difficulty,
            word_count,
            max_players: config.max_players,
            min_players: config.min_players,
            created_at: Utc::now(),
            state: RwLock::new(RoomState::Waiting),
            players: RwLock::new(HashMap::new()),
            join_order: RwLock::new(Vec::new()),
            race_text: RwLock::new(None),
            started_at: RwLock::new(None),
            finished_at: RwLock::new(None),
            countdown_cancel: RwLock::new(None),
            race_timeout_cancel: RwLock::new(None),
            persisted: AtomicBool::new(false),
            broadcast_lock: Mutex::new(()),
            config,
            persistence,
            xp_policy,
        }
    }

    pub async fn state(&self) -> RoomState {
        *self.state.read().await
    }

    pub async fn player_count(&self) -> usize {
        self.players.read().await.len()
    }

    pub async fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.read().await
    }

    /// Sends one message to every current member. Holds `broadcast_lock`
    /// across the whole enqueue loop so two concurrent broadcasts (e.g.
    /// `update_progress` calls from two different reader tasks) can
    /// never interleave their per-recipient sends — every member's
    /// queue sees messages in the same order (`spec.md` §5).
    async fn broadcast(&self, msg: ServerMessage) {
        let _guard = self.broadcast_lock.lock().await;
        let msg = Arc::new(msg);
        let players = self.players.read().await;
        for player in players.values() {
            player.enqueue(msg.clone());
        }
    }

    /// `AddPlayer` (`spec.md` §4.4). Returns the new player's receiver
    /// so the hub can spawn its writer task.
    pub async fn add_player(
        &self,
        user_id: String,
        username: String,
    ) -> AppResult<(Arc<PlayerConnection>, mpsc::Receiver<Arc<ServerMessage>>)> {
        let state = *self.state.read().await;
        if state != RoomState::Waiting {
            return Err(AppError::InvalidState {
                room_id: self.id.clone(),
            });
        }

        let mut players = self.players.write().await;
        if players.len() >= self.max_players {
            return Err(AppError::RoomFull {
                room_id: self.id.clone(),
            });
        }
        if players.contains_key(&user_id) {
            return Err(AppError::AlreadyJoined {
                room_id: self.id.clone(),
                user_id,
            });
        }

        let placement = players.len() + 1;
        let car_emoji = car_emoji_for(placement).to_string();
        let (player, rx) =
            PlayerConnection::new(user_id.clone(), username.clone(), car_emoji.clone(), placement);
        let player = Arc::new(player);
        players.insert(user_id.clone(), player.clone());
        self.join_order.write().await.push(user_id.clone());
        let total_players = players.len();
        drop(players);

        self.broadcast(ServerMessage::PlayerJoined {
            user_id,
            username,
            car_emoji,
            placement,
            total_players,
        })
        .await;

        Ok((player, rx))
    }

    /// `SetReady` (`spec.md` §4.4). Only meaningful in Waiting. Takes an
    /// owned `Arc<Self>` since reaching the ready threshold spawns the
    /// countdown task.
    pub async fn set_ready(self: Arc<Self>, user_id: &str, is_ready: bool) -> AppResult<()> {
        let state = *self.state.read().await;
        if state != RoomState::Waiting {
            return Err(AppError::InvalidState {
                room_id: self.id.clone(),
            });
        }

        let (username, ready_count, total_players) = {
            let players = self.players.read().await;
            let player = players.get(user_id).ok_or_else(|| AppError::NotInRoom {
                room_id: self.id.clone(),
                user_id: user_id.to_string(),
            })?;
            player.set_ready(is_ready).await;

            let mut ready_count = 0;
            for p in players.values() {
                if p.is_ready().await {
                    ready_count += 1;
                }
            }
            (player.username.clone(), ready_count, players.len())
        };

        self.broadcast(ServerMessage::PlayerReady {
            user_id: user_id.to_string(),
            username,
            is_ready,
            ready_count,
            total_players,
        })
        .await;

        if ready_count == total_players && total_players >= self.min_players {
            self.start_countdown().await;
        }

        Ok(())
    }

    /// Countdown procedure (`spec.md` §4.4). Spawns a cancellable task
    /// emitting `Countdown{3,2,1}` at evenly spaced ticks over
    /// `config.countdown_duration` before calling `StartRace` — a plain
    /// sleep loop cannot be cancelled by a mid-countdown leave.
    async fn start_countdown(self: Arc<Self>) {
        {
            let mut state = self.state.write().await;
            let next = match RoomState::transition(&state, &RoomEvent::Ready) {
                Some(next) => next,
                None => return,
            };
            *state = next;
        }

        let race_text = self.persistence.get_random_passage(self.word_count).await;
        *self.race_text.write().await = Some(race_text);

        let cancel = CancellationToken::new();
        *self.countdown_cancel.write().await = Some(cancel.clone());

        let tick = self.config.countdown_duration / 3;
        let room = self;
        tokio::spawn(async move {
            for remaining in (1..=3u8).rev() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(tick) => {
                        room.broadcast(ServerMessage::Countdown { number: remaining }).await;
                    }
                }
            }
            room.countdown_elapsed().await;
        });
    }

    async fn countdown_elapsed(self: Arc<Self>) {
        {
            let mut state = self.state.write().await;
            let next = match RoomState::transition(&state, &RoomEvent::CountdownElapsed) {
                Some(next) => next,
                None => return,
            };
            *state = next;
        }
        *self.countdown_cancel.write().await = None;
        self.start_race().await;
    }

    /// `StartRace` (`spec.md` §4.4).
    async fn start_race(self: Arc<Self>) {
        *self.started_at.write().await = Some(Utc::now());

        let race_text = self.race_text.read().await.clone().unwrap_or_default();
        let players = self.players.read().await;
        let mut race_players = Vec::with_capacity(players.len());
        for player in players.values() {
            player.reset_progress().await;
            race_players.push(RaceStartPlayer {
                user_id: player.user_id.clone(),
                username: player.username.clone(),
                car_emoji: player.car_emoji.clone(),
                placement: player.placement(),
            });
        }
        drop(players);
        race_players.sort_by_key(|p| p.placement);

        self.broadcast(ServerMessage::RaceStart {
            race_text,
            start_time: Utc::now(),
            players: race_players,
        })
        .await;

        let cancel = CancellationToken::new();
        *self.race_timeout_cancel.write().await = Some(cancel.clone());
        let timeout = self.config.race_timeout;
        let room = self;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    room.finish_race().await;
                }
            }
        });
    }

    /// `UpdateProgress` (`spec.md` §4.4).
    pub async fn update_progress(
        &self,
        user_id: &str,
        position: u32,
        wpm: u32,
        accuracy: f64,
    ) -> AppResult<()> {
        if *self.state.read().await != RoomState::Racing {
            return Err(AppError::InvalidState {
                room_id: self.id.clone(),
            });
        }

        let players = self.players.read().await;
        let player = players.get(user_id).ok_or_else(|| AppError::NotInRoom {
            room_id: self.id.clone(),
            user_id: user_id.to_string(),
        })?;

        player
            .update_progress(position, wpm, accuracy)
            .await
            .map_err(|e| AppError::InvalidProgress {
                reason: e.message().to_string(),
            })?;

        let username = player.username.clone();
        drop(players);

        self.recompute_placements().await;

        let players = self.players.read().await;
        let player = match players.get(user_id) {
            Some(p) => p,
            None => return Ok(()),
        };
        let placement = player.placement();
        drop(players);

        self.broadcast(ServerMessage::PlayerUpdate {
            user_id: user_id.to_string(),
            username,
            position,
            wpm,
            accuracy,
            placement,
        })
        .await;

        Ok(())
    }

    /// `MarkFinished` (`spec.md` §4.4). Takes an owned `Arc<Self>` since
    /// the last finisher triggers `FinishRace`.
    pub async fn mark_finished(
        self: Arc<Self>,
        user_id: &str,
        wpm: f64,
        accuracy: f64,
        race_time: f64,
    ) -> AppResult<()> {
        if *self.state.read().await != RoomState::Racing {
            return Err(AppError::InvalidState {
                room_id: self.id.clone(),
            });
        }

        let (username, placement, finished_at, all_finished) = {
            let players = self.players.read().await;
            let player = players.get(user_id).ok_or_else(|| AppError::NotInRoom {
                room_id: self.id.clone(),
                user_id: user_id.to_string(),
            })?;
            player.set_finished(wpm, accuracy, race_time).await;
            drop(players);

            self.recompute_placements().await;

            let players = self.players.read().await;
            let player = players.get(user_id).unwrap();
            let placement = player.placement();
            let finished_at = player.finished_at().await;

            let mut all_finished = true;
            for p in players.values() {
                if !p.has_finished().await {
                    all_finished = false;
                    break;
                }
            }
            (player.username.clone(), placement, finished_at, all_finished)
        };

        self.broadcast(ServerMessage::PlayerFinished {
            user_id: user_id.to_string(),
            username,
            wpm,
            accuracy,
            race_time,
            placement,
            finished_at: finished_at.unwrap_or_else(Utc::now),
        })
        .await;

        if all_finished {
            self.finish_race().await;
        }

        Ok(())
    }

    async fn recompute_placements(&self) {
        let players = self.players.read().await;
        let mut snapshots = Vec::with_capacity(players.len());
        for player in players.values() {
            snapshots.push(PlayerSnapshot {
                user_id: player.user_id.clone(),
                has_finished: player.has_finished().await,
                finished_at: player.finished_at().await,
                current_position: player.current_position().await,
            });
        }
        let ranked = ranking::rank(snapshots);
        for (user_id, placement) in ranked {
            if let Some(player) = players.get(&user_id) {
                player.set_placement(placement);
            }
        }
    }

    /// `FinishRace` (`spec.md` §4.4). Copies results out under a
    /// players-map read lock, releases it, persists, then broadcasts —
    /// never holding a room lock during the write (`spec.md` §9).
    /// Idempotent: the race-timeout task and the last `MarkFinished`
    /// can both reach here concurrently, so only the first wins.
    pub async fn finish_race(self: Arc<Self>) {
        {
            let mut state = self.state.write().await;
            let next = match RoomState::transition(&state, &RoomEvent::AllFinished)
                .or_else(|| RoomState::transition(&state, &RoomEvent::TimedOut))
            {
                Some(next) => next,
                None => return,
            };
            *state = next;
        }
        if self.persisted.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.finished_at.write().await = Some(Utc::now());

        if let Some(cancel) = self.countdown_cancel.write().await.take() {
            cancel.cancel();
        }
        if let Some(cancel) = self.race_timeout_cancel.write().await.take() {
            cancel.cancel();
        }

        self.recompute_placements().await;

        let (participants, result_entries) = {
            let players = self.players.read().await;
            let mut participants = Vec::with_capacity(players.len());
            let mut entries = Vec::with_capacity(players.len());
            for player in players.values() {
                let placement = player.placement();
                let (wpm, accuracy, race_time) = player.final_stats().await.unwrap_or((
                    player.current_wpm().await as f64,
                    player.current_accuracy().await,
                    0.0,
                ));
                let xp_earned = if player.has_finished().await {
                    self.xp_policy.xp_for(placement, wpm, accuracy, self.difficulty)
                } else {
                    xp::xp_for_unfinished()
                };
                participants.push(PersistedParticipant {
                    user_id: player.user_id.clone(),
                    username: player.username.clone(),
                    placement,
                    wpm,
                    accuracy,
                    race_time,
                    finished_at: player.finished_at().await,
                    xp_earned,
                });
                entries.push(RaceResultEntry {
                    user_id: player.user_id.clone(),
                    username: player.username.clone(),
                    placement,
                    wpm,
                    accuracy,
                    race_time,
                    xp_earned,
                    car_emoji: player.car_emoji.clone(),
                });
            }
            (participants, entries)
        };

        let race_text = self.race_text.read().await.clone().unwrap_or_default();
        let record = PersistedRace {
            room_id: self.id.clone(),
            name: self.name.clone(),
            host_user_id: self.host_user_id.clone(),
            race_text,
            word_count: self.word_count,
            difficulty: self.difficulty,
            max_players: self.max_players,
            min_players: self.min_players,
            created_at: self.created_at,
            started_at: *self.started_at.read().await,
            finished_at: self.finished_at().await.unwrap_or_else(Utc::now),
            participants,
        };

        if let Err(e) = self.persistence.persist_finished_race(record).await {
            tracing::error!(room_id = %self.id, error = %e, "failed to persist finished race");
        }

        let mut results = result_entries;
        results.sort_by_key(|r| r.placement);
        self.broadcast(ServerMessage::RaceComplete { results }).await;
    }

    /// `RemovePlayer` (`spec.md` §4.4). Takes an owned `Arc<Self>` since
    /// an abandonment during Racing may trigger `FinishRace`.
    pub async fn remove_player(self: Arc<Self>, user_id: &str) -> AppResult<()> {
        let (username, total_players, now_state) = {
            let mut players = self.players.write().await;
            let player = players.remove(user_id).ok_or_else(|| AppError::NotInRoom {
                room_id: self.id.clone(),
                user_id: user_id.to_string(),
            })?;
            self.join_order.write().await.retain(|id| id != user_id);
            let total_players = players.len();
            let state = *self.state.read().await;
            (player.username.clone(), total_players, state)
        };

        self.broadcast(ServerMessage::PlayerLeft {
            user_id: user_id.to_string(),
            username,
            total_players,
        })
        .await;

        match now_state {
            // An emptied Waiting room stays Waiting; it is reclaimed by
            // the reaper's empty-waiting TTL (`spec.md` §4.5), not
            // abandoned immediately.
            RoomState::Waiting => {}
            RoomState::Countdown if total_players == 0 => {
                self.abandon_room().await;
            }
            RoomState::Countdown if total_players < self.min_players => {
                self.revert_to_waiting().await;
            }
            RoomState::Racing if total_players == 0 => {
                self.abandon_room().await;
            }
            RoomState::Racing => {
                let players = self.players.read().await;
                let mut all_finished = true;
                for p in players.values() {
                    if !p.has_finished().await {
                        all_finished = false;
                        break;
                    }
                }
                drop(players);
                if all_finished {
                    self.finish_race().await;
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// An empty room mid-Countdown or mid-Racing has no remaining
    /// audience to broadcast to and no complete race to persist; it
    /// simply moves straight to Finished for the reaper to collect.
    async fn abandon_room(&self) {
        {
            let mut state = self.state.write().await;
            let next = match RoomState::transition(&state, &RoomEvent::Abandoned) {
                Some(next) => next,
                None => return,
            };
            *state = next;
        }
        if self.persisted.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.finished_at.write().await = Some(Utc::now());
        if let Some(cancel) = self.countdown_cancel.write().await.take() {
            cancel.cancel();
        }
        if let Some(cancel) = self.race_timeout_cancel.write().await.take() {
            cancel.cancel();
        }
    }

    /// Cancels the countdown task, resets every remaining player's
    /// ready flag, and reverts to Waiting.
    async fn revert_to_waiting(&self) {
        if let Some(cancel) = self.countdown_cancel.write().await.take() {
            cancel.cancel();
        }
        {
            let mut state = self.state.write().await;
            if let Some(next) = RoomState::transition(&state, &RoomEvent::RevertToWaiting) {
                *state = next;
            } else {
                return;
            }
        }
        *self.race_text.write().await = None;
        let players = self.players.read().await;
        for player in players.values() {
            player.reset_progress().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::xp::DefaultXpPolicy;

    fn test_room() -> Arc<GameRoom> {
        Arc::new(GameRoom::new(
            "room-1".to_string(),
            "Test Room".to_string(),
            "host".to_string(),
            Difficulty::Medium,
            20,
            Arc::new(AppConfig::default()),
            Arc::new(PersistenceBackend::in_memory()),
            Arc::new(DefaultXpPolicy),
        ))
    }

    #[tokio::test]
    async fn add_player_assigns_incrementing_placement_and_emoji() {
        let room = test_room();
        let (p1, _rx1) = room.add_player("u1".into(), "alice".into()).await.unwrap();
        let (p2, _rx2) = room.add_player("u2".into(), "bob".into()).await.unwrap();
        assert_eq!(p1.placement(), 1);
        assert_eq!(p2.placement(), 2);
    }

    #[tokio::test]
    async fn add_player_rejects_duplicate_and_full_room() {
        let room = test_room();
        room.add_player("u1".into(), "alice".into()).await.unwrap();
        let err = room.add_player("u1".into(), "alice".into()).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyJoined { .. }));

        room.add_player("u2".into(), "bob".into()).await.unwrap();
        room.add_player("u3".into(), "carol".into()).await.unwrap();
        room.add_player("u4".into(), "dave".into()).await.unwrap();
        let err = room.add_player("u5".into(), "eve".into()).await.unwrap_err();
        assert!(matches!(err, AppError::RoomFull { .. }));
    }

    #[tokio::test]
    async fn set_ready_with_all_ready_starts_countdown() {
        let room = test_room();
        room.add_player("u1".into(), "alice".into()).await.unwrap();
        room.add_player("u2".into(), "bob".into()).await.unwrap();

        room.clone().set_ready("u1", true).await.unwrap();
        assert_eq!(room.state().await, RoomState::Waiting);
        room.clone().set_ready("u2", true).await.unwrap();
        assert_eq!(room.state().await, RoomState::Countdown);
    }

    #[tokio::test]
    async fn update_progress_rejected_outside_racing() {
        let room = test_room();
        room.add_player("u1".into(), "alice".into()).await.unwrap();
        let err = room.update_progress("u1", 5, 60, 100.0).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn remove_player_reverts_countdown_when_below_min() {
        let room = test_room();
        room.add_player("u1".into(), "alice".into()).await.unwrap();
        room.add_player("u2".into(), "bob".into()).await.unwrap();
        room.clone().set_ready("u1", true).await.unwrap();
        room.clone().set_ready("u2", true).await.unwrap();
        assert_eq!(room.state().await, RoomState::Countdown);

        room.clone().remove_player("u2").await.unwrap();
        assert_eq!(room.state().await, RoomState::Waiting);
        assert!(!room.players.read().await.get("u1").unwrap().is_ready().await);
    }
}
