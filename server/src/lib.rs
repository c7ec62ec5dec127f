//! Race server core: room lifecycle, the lobby HTTP surface, and the
//! per-connection race channel. `main.rs` is a thin binary wrapper so
//! integration tests can build the router directly.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod hub;
pub mod lobby;
pub mod manager;
pub mod player;
pub mod ranking;
pub mod room;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use auth::SessionAuthority;
use config::AppConfig;
use db::PersistenceBackend;
use hub::HubState;
use lobby::LobbyState;
use manager::RoomManager;
use shared::xp::DefaultXpPolicy;

/// Everything boot needs to hand off to `axum::serve`, kept around so
/// callers (the binary, tests) can reach the manager and persistence
/// directly instead of only through HTTP.
pub struct AppHandle {
    pub router: Router,
    pub manager: Arc<RoomManager>,
    pub persistence: Arc<PersistenceBackend>,
    pub auth: Arc<dyn SessionAuthority>,
    pub config: Arc<AppConfig>,
}

/// Assembles the full application: room registry + reaper, session
/// authority, and the merged lobby/race router (`spec.md` §6). Takes
/// the session authority as a parameter so callers (tests, in
/// particular) can pre-register sessions before serving.
pub fn build_app(
    config: Arc<AppConfig>,
    persistence: Arc<PersistenceBackend>,
    auth: Arc<dyn SessionAuthority>,
) -> AppHandle {
    let xp_policy = Arc::new(DefaultXpPolicy);
    let manager = Arc::new(RoomManager::new(config.clone(), persistence.clone(), xp_policy));
    manager::spawn_reaper(manager.clone());

    let lobby_router = Router::new()
        .route("/rooms", post(lobby::create_room).get(lobby::list_rooms))
        .route("/rooms/:id", delete(lobby::delete_room))
        .route("/history", get(lobby::history))
        .route("/stats", get(lobby::stats))
        .with_state(LobbyState {
            manager: manager.clone(),
            auth: auth.clone(),
            persistence: persistence.clone(),
        });

    let race_router = Router::new()
        .route("/race/:room_id", get(hub::race_ws_handler))
        .with_state(HubState {
            manager: manager.clone(),
            auth: auth.clone(),
            config: config.clone(),
        });

    let router = lobby_router.merge(race_router).layer(CorsLayer::permissive());

    AppHandle {
        router,
        manager,
        persistence,
        auth,
        config,
    }
}
