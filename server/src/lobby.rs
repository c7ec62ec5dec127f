use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use shared::types::Difficulty;

use crate::auth::SessionAuthority;
use crate::db::PersistenceBackend;
use crate::error::{AppError, AppResult};
use crate::manager::RoomManager;

/// Shared state for the five `spec.md` §6.1 lobby endpoints.
#[derive(Clone)]
pub struct LobbyState {
    pub manager: Arc<RoomManager>,
    pub auth: Arc<dyn SessionAuthority>,
    pub persistence: Arc<PersistenceBackend>,
}

/// Every lobby request carries a bearer credential honored by the
/// session authority (`spec.md` §6.1).
async fn authenticate(state: &LobbyState, headers: &HeaderMap) -> AppResult<(String, String)> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::AuthFailed)?;
    state.auth.authenticate(token).await
}

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    pub difficulty: Difficulty,
    pub word_count: u32,
}

pub async fn create_room(
    State(state): State<LobbyState>,
    headers: HeaderMap,
    Json(body): Json<CreateRoomRequest>,
) -> impl IntoResponse {
    let (user_id, _username) = match authenticate(&state, &headers).await {
        Ok(v) => v,
        Err(e) => return e.into_response(),
    };

    match state
        .manager
        .create(user_id, body.name, body.difficulty, body.word_count)
    {
        Ok(room) => (StatusCode::CREATED, Json(serde_json::json!({ "id": room.id }))).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn list_rooms(State(state): State<LobbyState>) -> impl IntoResponse {
    Json(state.manager.list_waiting().await)
}

pub async fn delete_room(
    State(state): State<LobbyState>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> impl IntoResponse {
    let (user_id, _username) = match authenticate(&state, &headers).await {
        Ok(v) => v,
        Err(e) => return e.into_response(),
    };

    let room = match state.manager.get(&room_id) {
        Ok(room) => room,
        Err(e) => return e.into_response(),
    };
    if room.host_user_id != user_id {
        return AppError::AuthFailed.into_response();
    }

    match state.manager.delete(&room_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn history(State(state): State<LobbyState>, headers: HeaderMap) -> impl IntoResponse {
    let (user_id, _username) = match authenticate(&state, &headers).await {
        Ok(v) => v,
        Err(e) => return e.into_response(),
    };

    match state.persistence.history_for_user(&user_id).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn stats(State(state): State<LobbyState>, headers: HeaderMap) -> impl IntoResponse {
    let (user_id, _username) = match authenticate(&state, &headers).await {
        Ok(v) => v,
        Err(e) => return e.into_response(),
    };

    match state.persistence.stats_for_user(&user_id).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticSessionAuthority;
    use crate::config::AppConfig;
    use shared::xp::DefaultXpPolicy;

    fn test_state() -> LobbyState {
        let auth = StaticSessionAuthority::new();
        auth.register("sess-1", "u1", "alice");
        auth.register("sess-2", "u2", "bob");
        LobbyState {
            manager: Arc::new(RoomManager::new(
                Arc::new(AppConfig::default()),
                Arc::new(PersistenceBackend::in_memory()),
                Arc::new(DefaultXpPolicy),
            )),
            auth: Arc::new(auth),
            persistence: Arc::new(PersistenceBackend::in_memory()),
        }
    }

    fn auth_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn create_room_requires_valid_credential() {
        let state = test_state();
        let response = create_room(
            State(state),
            HeaderMap::new(),
            Json(CreateRoomRequest {
                name: "Room".to_string(),
                difficulty: Difficulty::Easy,
                word_count: 20,
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn delete_room_rejects_non_host() {
        let state = test_state();
        let room = state
            .manager
            .create("u1".to_string(), "Room".to_string(), Difficulty::Easy, 20)
            .unwrap();

        let response = delete_room(State(state), auth_headers("sess-2"), Path(room.id.clone()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
