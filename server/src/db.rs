use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use shared::types::Difficulty;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct PersistedParticipant {
    pub user_id: String,
    pub username: String,
    pub placement: usize,
    pub wpm: f64,
    pub accuracy: f64,
    pub race_time: f64,
    pub finished_at: Option<DateTime<Utc>>,
    pub xp_earned: u32,
}

/// One logical write at the `FinishRace` transition: a `race_rooms` row
/// and one `race_participants` row per player present at finish
/// (`spec.md` §6.3).
#[derive(Debug, Clone)]
pub struct PersistedRace {
    pub room_id: String,
    pub name: String,
    pub host_user_id: String,
    pub race_text: String,
    pub word_count: u32,
    pub difficulty: Difficulty,
    pub max_players: usize,
    pub min_players: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub participants: Vec<PersistedParticipant>,
}

/// One race as it appears in a single player's `GET /history` (`spec.md`
/// §6.1) — the race's own identity plus that player's result in it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UserRaceHistoryEntry {
    pub room_id: String,
    pub name: String,
    pub difficulty: Difficulty,
    pub finished_at: DateTime<Utc>,
    pub placement: usize,
    pub wpm: f64,
    pub accuracy: f64,
    pub race_time: f64,
    pub xp_earned: u32,
}

/// Aggregate career stats for `GET /stats` (`spec.md` §6.1).
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct UserStats {
    pub races: u32,
    pub wins: u32,
    pub podiums: u32,
    pub total_xp: u32,
    pub avg_wpm: f64,
    pub avg_accuracy: f64,
}

/// Race-result persistence. `Postgres` is the production backend;
/// `InMemory` exists purely so tests can assert durability (testable
/// property 7 in `spec.md` §8) without a live database, mirroring the
/// pack's `DatabaseConfig::InMemory` pattern.
pub enum PersistenceBackend {
    Postgres(PgPool),
    InMemory(Mutex<Vec<PersistedRace>>),
}

impl PersistenceBackend {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        ensure_schema(&pool).await?;
        Ok(PersistenceBackend::Postgres(pool))
    }

    pub fn in_memory() -> Self {
        PersistenceBackend::InMemory(Mutex::new(Vec::new()))
    }

    /// Persists one finished race. Must never be called while holding a
    /// room lock (`spec.md` §9: "must not hold any room lock during the
    /// write").
    pub async fn persist_finished_race(&self, race: PersistedRace) -> Result<(), AppError> {
        match self {
            PersistenceBackend::Postgres(pool) => persist_to_postgres(pool, &race).await,
            PersistenceBackend::InMemory(store) => {
                store.lock().unwrap().push(race);
                Ok(())
            }
        }
    }

    /// Test-only accessor for asserting on what was persisted.
    pub fn snapshot(&self) -> Vec<PersistedRace> {
        match self {
            PersistenceBackend::Postgres(_) => Vec::new(),
            PersistenceBackend::InMemory(store) => store.lock().unwrap().clone(),
        }
    }

    /// Race text lookup, falling back to the static list on any
    /// failure or absence of a database — grounded on the teacher's
    /// `db::get_random_passage` fallback chain.
    pub async fn get_random_passage(&self, word_count: u32) -> String {
        if let PersistenceBackend::Postgres(pool) = self {
            match sqlx::query_scalar::<_, String>("SELECT text FROM passages ORDER BY random() LIMIT 1")
                .fetch_one(pool)
                .await
            {
                Ok(text) => {
                    tracing::info!("passage_source = db");
                    return text;
                }
                Err(e) => {
                    tracing::warn!("db_passage_fetch_failed = {:?}", e);
                }
            }
        }
        tracing::info!("passage_source = fallback_static");
        shared::passages::get_passage_near_length(word_count).to_string()
    }

    pub async fn history_for_user(&self, user_id: &str) -> Result<Vec<UserRaceHistoryEntry>, AppError> {
        match self {
            PersistenceBackend::Postgres(pool) => history_from_postgres(pool, user_id).await,
            PersistenceBackend::InMemory(store) => {
                let mut entries: Vec<UserRaceHistoryEntry> = store
                    .lock()
                    .unwrap()
                    .iter()
                    .filter_map(|race| {
                        race.participants
                            .iter()
                            .find(|p| p.user_id == user_id)
                            .map(|p| UserRaceHistoryEntry {
                                room_id: race.room_id.clone(),
                                name: race.name.clone(),
                                difficulty: race.difficulty,
                                finished_at: race.finished_at,
                                placement: p.placement,
                                wpm: p.wpm,
                                accuracy: p.accuracy,
                                race_time: p.race_time,
                                xp_earned: p.xp_earned,
                            })
                    })
                    .collect();
                entries.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
                Ok(entries)
            }
        }
    }

    pub async fn stats_for_user(&self, user_id: &str) -> Result<UserStats, AppError> {
        let history = self.history_for_user(user_id).await?;
        if history.is_empty() {
            return Ok(UserStats {
                races: 0,
                wins: 0,
                podiums: 0,
                total_xp: 0,
                avg_wpm: 0.0,
                avg_accuracy: 0.0,
            });
        }
        let races = history.len() as u32;
        let wins = history.iter().filter(|h| h.placement == 1).count() as u32;
        let podiums = history.iter().filter(|h| h.placement <= 3).count() as u32;
        let total_xp = history.iter().map(|h| h.xp_earned).sum();
        let avg_wpm = history.iter().map(|h| h.wpm).sum::<f64>() / races as f64;
        let avg_accuracy = history.iter().map(|h| h.accuracy).sum::<f64>() / races as f64;
        Ok(UserStats {
            races,
            wins,
            podiums,
            total_xp,
            avg_wpm,
            avg_accuracy,
        })
    }
}

async fn history_from_postgres(pool: &PgPool, user_id: &str) -> Result<Vec<UserRaceHistoryEntry>, AppError> {
    #[derive(sqlx::FromRow)]
    struct Row {
        room_id: String,
        name: String,
        difficulty: String,
        finished_at: Option<DateTime<Utc>>,
        placement: i32,
        wpm: f64,
        accuracy: f64,
        race_time: f64,
        xp_earned: i32,
    }

    let rows: Vec<Row> = sqlx::query_as(
        r#"
        SELECT r.id AS room_id, r.name, r.difficulty, r.finished_at,
               p.placement, p.wpm, p.accuracy, p.race_time, p.xp_earned
        FROM race_participants p
        JOIN race_rooms r ON r.id = p.race_id
        WHERE p.user_id = $1
        ORDER BY r.finished_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::Internal {
        reason: format!("query race history: {e}"),
    })?;

    Ok(rows
        .into_iter()
        .map(|row| UserRaceHistoryEntry {
            room_id: row.room_id,
            name: row.name,
            difficulty: match row.difficulty.as_str() {
                "easy" => Difficulty::Easy,
                "hard" => Difficulty::Hard,
                _ => Difficulty::Medium,
            },
            finished_at: row.finished_at.unwrap_or_else(Utc::now),
            placement: row.placement as usize,
            wpm: row.wpm,
            accuracy: row.accuracy,
            race_time: row.race_time,
            xp_earned: row.xp_earned as u32,
        })
        .collect())
}

async fn ensure_schema(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS passages (
            id SERIAL PRIMARY KEY,
            text TEXT UNIQUE NOT NULL,
            source_url TEXT,
            created_at TIMESTAMPTZ DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS race_rooms (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            host_user_id TEXT NOT NULL,
            race_text TEXT NOT NULL,
            word_count INTEGER NOT NULL,
            difficulty TEXT NOT NULL,
            max_players INTEGER NOT NULL,
            min_players INTEGER NOT NULL,
            state TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            finished_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS race_participants (
            race_id TEXT NOT NULL REFERENCES race_rooms(id),
            user_id TEXT NOT NULL,
            username TEXT NOT NULL,
            placement INTEGER NOT NULL,
            wpm DOUBLE PRECISION NOT NULL,
            accuracy DOUBLE PRECISION NOT NULL,
            race_time DOUBLE PRECISION NOT NULL,
            finished_at TIMESTAMPTZ,
            xp_earned INTEGER NOT NULL,
            PRIMARY KEY (race_id, user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn persist_to_postgres(pool: &PgPool, race: &PersistedRace) -> Result<(), AppError> {
    let mut tx = pool.transaction().await.map_err(|e| AppError::Internal {
        reason: format!("begin transaction: {e}"),
    })?;

    let difficulty = match race.difficulty {
        Difficulty::Easy => "easy",
        Difficulty::Medium => "medium",
        Difficulty::Hard => "hard",
    };

    sqlx::query(
        r#"
        INSERT INTO race_rooms
            (id, name, host_user_id, race_text, word_count, difficulty,
             max_players, min_players, state, created_at, started_at, finished_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'finished', $9, $10, $11)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(&race.room_id)
    .bind(&race.name)
    .bind(&race.host_user_id)
    .bind(&race.race_text)
    .bind(race.word_count as i32)
    .bind(difficulty)
    .bind(race.max_players as i32)
    .bind(race.min_players as i32)
    .bind(race.created_at)
    .bind(race.started_at)
    .bind(race.finished_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::Internal {
        reason: format!("insert race_rooms: {e}"),
    })?;

    for participant in &race.participants {
        sqlx::query(
            r#"
            INSERT INTO race_participants
                (race_id, user_id, username, placement, wpm, accuracy, race_time, finished_at, xp_earned)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (race_id, user_id) DO NOTHING
            "#,
        )
        .bind(&race.room_id)
        .bind(&participant.user_id)
        .bind(&participant.username)
        .bind(participant.placement as i32)
        .bind(participant.wpm)
        .bind(participant.accuracy)
        .bind(participant.race_time)
        .bind(participant.finished_at)
        .bind(participant.xp_earned as i32)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Internal {
            reason: format!("insert race_participants: {e}"),
        })?;
    }

    tx.commit().await.map_err(|e| AppError::Internal {
        reason: format!("commit transaction: {e}"),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_race() -> PersistedRace {
        PersistedRace {
            room_id: "room-1".to_string(),
            name: "Test Room".to_string(),
            host_user_id: "u1".to_string(),
            race_text: "the quick brown fox".to_string(),
            word_count: 4,
            difficulty: Difficulty::Medium,
            max_players: 4,
            min_players: 2,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: Utc::now(),
            participants: vec![PersistedParticipant {
                user_id: "u1".to_string(),
                username: "alice".to_string(),
                placement: 1,
                wpm: 70.0,
                accuracy: 98.0,
                race_time: 12.0,
                finished_at: Some(Utc::now()),
                xp_earned: 100,
            }],
        }
    }

    #[tokio::test]
    async fn in_memory_backend_persists_exactly_once() {
        let backend = PersistenceBackend::in_memory();
        backend.persist_finished_race(sample_race()).await.unwrap();
        let snapshot = backend.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].participants.len(), 1);
    }

    #[tokio::test]
    async fn in_memory_passage_fallback_when_no_db() {
        let backend = PersistenceBackend::in_memory();
        let passage = backend.get_random_passage(20).await;
        assert!(!passage.is_empty());
    }

    #[tokio::test]
    async fn history_and_stats_reflect_persisted_races() {
        let backend = PersistenceBackend::in_memory();
        backend.persist_finished_race(sample_race()).await.unwrap();

        let history = backend.history_for_user("u1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].placement, 1);

        let stats = backend.stats_for_user("u1").await.unwrap();
        assert_eq!(stats.races, 1);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.podiums, 1);
        assert_eq!(stats.total_xp, 100);
    }

    #[tokio::test]
    async fn stats_for_unseen_user_are_zero() {
        let backend = PersistenceBackend::in_memory();
        let stats = backend.stats_for_user("ghost").await.unwrap();
        assert_eq!(stats.races, 0);
        assert_eq!(stats.avg_wpm, 0.0);
    }
}
