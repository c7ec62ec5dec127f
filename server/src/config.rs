use std::time::Duration;

/// Boot-time configuration, loaded from the environment (`dotenvy`
/// first, then `std::env`). Scaled down from the pack's fuller
/// `config/*` modules (`Ambiguous-Interactive-signal-fish-server`) to
/// just what the room/hub/manager layer needs.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,

    pub max_players: usize,
    pub min_players: usize,
    pub max_rooms: usize,
    pub max_room_name_len: usize,
    pub max_word_count: u32,

    pub countdown_duration: Duration,
    pub race_timeout: Duration,
    pub reaper_tick_interval: Duration,
    pub finished_room_ttl: Duration,
    pub empty_waiting_room_ttl: Duration,

    pub read_deadline: Duration,
    pub ping_interval: Duration,
    pub write_deadline: Duration,
    pub max_frame_size: usize,

    pub rate_limit_capacity: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            database_url: None,

            max_players: 4,
            min_players: 2,
            max_rooms: 1000,
            max_room_name_len: 50,
            max_word_count: 500,

            countdown_duration: Duration::from_secs(3),
            race_timeout: Duration::from_secs(5 * 60),
            reaper_tick_interval: Duration::from_secs(60),
            finished_room_ttl: Duration::from_secs(5 * 60),
            empty_waiting_room_ttl: Duration::from_secs(30 * 60),

            read_deadline: Duration::from_secs(60),
            ping_interval: Duration::from_secs(54),
            write_deadline: Duration::from_secs(10),
            max_frame_size: 512 * 1024,

            rate_limit_capacity: 20,
        }
    }
}

impl AppConfig {
    /// Loads overrides from the process environment on top of
    /// `Default`. Unset or unparsable vars silently keep the default,
    /// matching the teacher's tolerant `DATABASE_URL` read in `main.rs`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            config.bind_addr = addr;
        }
        config.database_url = std::env::var("DATABASE_URL").ok();

        if let Ok(v) = std::env::var("MAX_ROOMS") {
            if let Ok(n) = v.parse() {
                config.max_rooms = n;
            }
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_CAPACITY") {
            if let Ok(n) = v.parse() {
                config.rate_limit_capacity = n;
            }
        }

        config
    }
}
