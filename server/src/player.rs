use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::validator::{self, ValidationError};
use tokio::sync::mpsc;
use tokio::sync::RwLock;

use shared::protocol::ServerMessage;

/// Bounded outbound queue capacity (`spec.md` §4.3).
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default)]
struct ProgressState {
    current_position: u32,
    current_wpm: u32,
    current_accuracy: f64,
    last_progress_time: Option<DateTime<Utc>>,
    is_ready: bool,
    has_finished: bool,
    final_wpm: Option<f64>,
    final_accuracy: Option<f64>,
    race_time: Option<f64>,
    finished_at: Option<DateTime<Utc>>,
}

/// A single connection's player state. Identity and the outbound queue
/// are immutable for the connection's lifetime; everything mutable
/// lives behind one `RwLock` so the reader task can only change it
/// through these methods, never via raw field access (`spec.md` §9).
pub struct PlayerConnection {
    pub user_id: String,
    pub username: String,
    pub car_emoji: String,
    placement: std::sync::atomic::AtomicUsize,
    state: RwLock<ProgressState>,
    outbound_tx: mpsc::Sender<Arc<ServerMessage>>,
}

impl PlayerConnection {
    /// Builds a fresh player and its outbound channel. The receiver end
    /// is handed to the connection's writer task.
    pub fn new(
        user_id: String,
        username: String,
        car_emoji: String,
        placement: usize,
    ) -> (Self, mpsc::Receiver<Arc<ServerMessage>>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let player = Self {
            user_id,
            username,
            car_emoji,
            placement: std::sync::atomic::AtomicUsize::new(placement),
            state: RwLock::new(ProgressState::default()),
            outbound_tx: tx,
        };
        (player, rx)
    }

    pub fn placement(&self) -> usize {
        self.placement.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn set_placement(&self, placement: usize) {
        self.placement.store(placement, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn current_position(&self) -> u32 {
        self.state.read().await.current_position
    }

    pub async fn current_wpm(&self) -> u32 {
        self.state.read().await.current_wpm
    }

    pub async fn current_accuracy(&self) -> f64 {
        self.state.read().await.current_accuracy
    }

    pub async fn is_ready(&self) -> bool {
        self.state.read().await.is_ready
    }

    pub async fn has_finished(&self) -> bool {
        self.state.read().await.has_finished
    }

    pub async fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.finished_at
    }

    pub async fn final_stats(&self) -> Option<(f64, f64, f64)> {
        let state = self.state.read().await;
        match (state.final_wpm, state.final_accuracy, state.race_time) {
            (Some(w), Some(a), Some(t)) => Some((w, a, t)),
            _ => None,
        }
    }

    /// Applies a client-reported progress update after validation
    /// (`spec.md` §4.2/§4.3). On rejection the stored progress is
    /// unchanged.
    pub async fn update_progress(
        &self,
        position: u32,
        wpm: u32,
        accuracy: f64,
    ) -> Result<(), ValidationError> {
        let mut state = self.state.write().await;
        validator::validate_progress(state.current_position, position, wpm, accuracy)?;
        state.current_position = position;
        state.current_wpm = wpm;
        state.current_accuracy = accuracy;
        state.last_progress_time = Some(Utc::now());
        Ok(())
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.is_ready = ready;
    }

    /// Latches the finished flag and records final stats. A no-op if
    /// the player already finished (`has_finished` only ever goes
    /// false→true).
    pub async fn set_finished(&self, wpm: f64, accuracy: f64, race_time: f64) {
        let mut state = self.state.write().await;
        if state.has_finished {
            return;
        }
        state.has_finished = true;
        state.final_wpm = Some(wpm);
        state.final_accuracy = Some(accuracy);
        state.race_time = Some(race_time);
        state.finished_at = Some(Utc::now());
    }

    /// Zeroes progress fields and ready/finished flags. Called on
    /// Countdown entry and again (idempotently) at `StartRace`
    /// (`spec.md` §3, §4.4).
    pub async fn reset_progress(&self) {
        let mut state = self.state.write().await;
        *state = ProgressState::default();
    }

    /// Non-blocking enqueue. Drops the message and logs on a full
    /// queue instead of ever blocking the broadcaster (`spec.md` §4.4
    /// broadcast discipline).
    pub fn enqueue(&self, msg: Arc<ServerMessage>) {
        if let Err(err) = self.outbound_tx.try_send(msg) {
            tracing::warn!(
                user_id = %self.user_id,
                error = %err,
                "dropping outbound message: queue full or closed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_progress_rejects_and_preserves_state() {
        let (player, _rx) = PlayerConnection::new("u1".into(), "alice".into(), "🚗".into(), 1);
        player.update_progress(10, 60, 100.0).await.unwrap();
        assert_eq!(player.current_position().await, 10);

        let err = player.update_progress(100, 60, 100.0).await.unwrap_err();
        assert_eq!(err, ValidationError::PositionJumpTooLarge);
        assert_eq!(player.current_position().await, 10);
    }

    #[tokio::test]
    async fn finished_flag_latches_and_does_not_reset_mid_race() {
        let (player, _rx) = PlayerConnection::new("u1".into(), "alice".into(), "🚗".into(), 1);
        player.set_finished(70.0, 98.0, 12.0).await;
        assert!(player.has_finished().await);
        player.set_finished(1.0, 1.0, 1.0).await;
        let (wpm, accuracy, race_time) = player.final_stats().await.unwrap();
        assert_eq!((wpm, accuracy, race_time), (70.0, 98.0, 12.0));
    }

    #[tokio::test]
    async fn reset_progress_zeroes_everything() {
        let (player, _rx) = PlayerConnection::new("u1".into(), "alice".into(), "🚗".into(), 1);
        player.update_progress(10, 60, 100.0).await.unwrap();
        player.set_ready(true).await;
        player.set_finished(70.0, 98.0, 12.0).await;

        player.reset_progress().await;

        assert_eq!(player.current_position().await, 0);
        assert!(!player.is_ready().await);
        assert!(!player.has_finished().await);
    }

    #[tokio::test]
    async fn enqueue_drops_silently_when_queue_full() {
        let (player, _rx) = PlayerConnection::new("u1".into(), "alice".into(), "🚗".into(), 1);
        for _ in 0..OUTBOUND_QUEUE_CAPACITY {
            player.enqueue(Arc::new(ServerMessage::Pong {}));
        }
        // One more should be dropped, not block or panic.
        player.enqueue(Arc::new(ServerMessage::Pong {}));
    }
}
