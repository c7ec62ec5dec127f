use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use shared::protocol::{self, ClientMessage, ServerMessage};
use shared::rate_limit::RateLimiter;

use crate::auth::SessionAuthority;
use crate::config::AppConfig;
use crate::manager::RoomManager;
use crate::player::PlayerConnection;

#[derive(Clone)]
pub struct HubState {
    pub manager: Arc<RoomManager>,
    pub auth: Arc<dyn SessionAuthority>,
    pub config: Arc<AppConfig>,
}

#[derive(serde::Deserialize)]
pub struct RaceQuery {
    session_id: String,
}

/// `GET /race/{room_id}?session_id=…` (`spec.md` §6.2). Upgrades to a
/// text-frame channel; everything past the upgrade is `handle_socket`.
pub async fn race_ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(query): Query<RaceQuery>,
    State(state): State<HubState>,
) -> impl IntoResponse {
    let max_frame_size = state.config.max_frame_size;
    ws.max_message_size(max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, room_id, query.session_id, state))
}

async fn handle_socket(socket: WebSocket, room_id: String, session_id: String, state: HubState) {
    let (user_id, username) = match state.auth.authenticate(&session_id).await {
        Ok(identity) => identity,
        Err(_) => {
            tracing::warn!(%room_id, "race socket rejected: auth failed");
            return;
        }
    };

    let room = match state.manager.get(&room_id) {
        Ok(room) => room,
        Err(_) => {
            tracing::warn!(%room_id, %user_id, "race socket rejected: unknown room");
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    let config = state.config.clone();

    // A connection occupies no seat until its first `join` frame
    // arrives (`spec.md` §4.6 step 2); everything before that is a
    // handshake against the raw socket, not yet a room member.
    let (player, outbound_rx) =
        match handshake_join(&mut stream, &mut sink, &room, &user_id, &username, config.read_deadline).await {
            Some(v) => v,
            None => {
                let _ = sink.close().await;
                return;
            }
        };

    let cancel = CancellationToken::new();
    let writer = tokio::spawn(run_writer(
        sink,
        outbound_rx,
        cancel.clone(),
        config.write_deadline,
        config.ping_interval,
    ));

    run_reader(stream, &room, &player, &user_id, &config, cancel.clone()).await;

    cancel.cancel();
    let _ = writer.await;
    let _ = room.clone().remove_player(&user_id).await;
}

type Sink = SplitSink<WebSocket, Message>;
type Stream = SplitStream<WebSocket>;

/// Reads frames until a `join` succeeds, an unrecoverable error occurs,
/// or the read deadline expires. Anything malformed is dropped
/// silently (`spec.md` §4.6) and the handshake keeps waiting.
async fn handshake_join(
    stream: &mut Stream,
    sink: &mut Sink,
    room: &Arc<crate::room::GameRoom>,
    user_id: &str,
    username: &str,
    read_deadline: Duration,
) -> Option<(Arc<PlayerConnection>, mpsc::Receiver<Arc<ServerMessage>>)> {
    loop {
        let msg = match tokio::time::timeout(read_deadline, stream.next()).await {
            Ok(Some(Ok(msg))) => msg,
            _ => return None,
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => return None,
            _ => continue,
        };

        let Some(envelope) = protocol::parse_envelope(&text) else {
            continue;
        };
        let Some(ClientMessage::Join { .. }) = protocol::decode_payload(&envelope) else {
            continue;
        };

        // Identity comes from the session authority, not the join
        // payload's user_id/username fields — a client cannot claim
        // someone else's seat by lying in the frame.
        return match room.add_player(user_id.to_string(), username.to_string()).await {
            Ok((player, rx)) => Some((player, rx)),
            Err(err) => {
                let frame = serde_json::to_string(&err.to_error_frame()).unwrap_or_default();
                let _ = sink.send(Message::Text(frame.into())).await;
                None
            }
        };
    }
}

/// Dispatch loop for an already-joined connection. Owns the socket's
/// read half for the rest of the connection's life.
async fn run_reader(
    mut stream: Stream,
    room: &Arc<crate::room::GameRoom>,
    player: &Arc<PlayerConnection>,
    user_id: &str,
    config: &AppConfig,
    cancel: CancellationToken,
) {
    let rate_limiter = RateLimiter::new(config.rate_limit_capacity);

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = tokio::time::timeout(config.read_deadline, stream.next()) => next,
        };

        let msg = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(err))) => {
                tracing::debug!(%user_id, error = %err, "race socket read error");
                return;
            }
            Ok(None) => return,
            Err(_) => {
                tracing::info!(%user_id, "race socket read deadline exceeded");
                return;
            }
        };

        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => return,
            Message::Pong(_) => continue,
            _ => continue,
        };

        if !rate_limiter.allow() {
            continue;
        }

        let Some(envelope) = protocol::parse_envelope(&text) else {
            continue;
        };
        let Some(client_msg) = protocol::decode_payload(&envelope) else {
            continue;
        };

        match client_msg {
            ClientMessage::Join { .. } => {} // already joined; ignore
            ClientMessage::Ready { is_ready } => {
                if let Err(err) = room.clone().set_ready(user_id, is_ready).await {
                    player.enqueue(Arc::new(err.to_error_frame()));
                }
            }
            ClientMessage::Progress {
                position,
                wpm,
                accuracy,
                ..
            } => {
                if let Err(err) = room.update_progress(user_id, position, wpm, accuracy).await {
                    player.enqueue(Arc::new(err.to_error_frame()));
                }
            }
            ClientMessage::Finish {
                wpm,
                accuracy,
                race_time,
                ..
            } => {
                if let Err(err) = room.clone().mark_finished(user_id, wpm, accuracy, race_time).await {
                    player.enqueue(Arc::new(err.to_error_frame()));
                }
            }
            ClientMessage::Leave => return,
            ClientMessage::Ping => {
                player.enqueue(Arc::new(ServerMessage::Pong {}));
            }
        }
    }
}

/// Drains the player's outbound queue onto the socket, interleaved
/// with a periodic control ping (`spec.md` §4.6/§5). Any write failure
/// or missed write deadline tears the connection down by cancelling,
/// which in turn makes the reader's next deadline check return.
async fn run_writer(
    mut sink: Sink,
    mut outbound_rx: mpsc::Receiver<Arc<ServerMessage>>,
    cancel: CancellationToken,
    write_deadline: Duration,
    ping_interval: Duration,
) {
    let mut ticker = interval(ping_interval);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if send_with_deadline(&mut sink, Message::Ping(Vec::new().into()), write_deadline).await.is_err() {
                    break;
                }
            }
            received = outbound_rx.recv() => {
                match received {
                    Some(msg) => {
                        let text = match serde_json::to_string(msg.as_ref()) {
                            Ok(text) => text,
                            Err(_) => continue,
                        };
                        if send_with_deadline(&mut sink, Message::Text(text.into()), write_deadline).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    cancel.cancel();
    let _ = sink.close().await;
}

async fn send_with_deadline(sink: &mut Sink, msg: Message, deadline: Duration) -> Result<(), ()> {
    match tokio::time::timeout(deadline, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}
