use serde::{Deserialize, Serialize};

/// The `{ type, room_id?, payload }` wrapper every client→server race
/// channel frame arrives in (`spec.md` §6.2).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A decoded client→server message, keyed off `ClientEnvelope::msg_type`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Join {
        room_id: String,
        user_id: String,
        username: String,
    },
    Ready {
        is_ready: bool,
    },
    Progress {
        position: u32,
        wpm: u32,
        accuracy: f64,
        timestamp: i64,
    },
    Finish {
        wpm: f64,
        accuracy: f64,
        race_time: f64,
        timestamp: i64,
    },
    Leave,
    Ping,
}

#[derive(Debug, Deserialize)]
struct JoinPayload {
    room_id: String,
    user_id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct ReadyPayload {
    is_ready: bool,
}

#[derive(Debug, Deserialize)]
struct ProgressPayload {
    position: u32,
    wpm: u32,
    accuracy: f64,
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct FinishPayload {
    wpm: f64,
    accuracy: f64,
    race_time: f64,
    timestamp: i64,
}

/// Parse a raw text frame into an envelope. Malformed JSON is the
/// caller's responsibility to drop silently (`spec.md` §4.6).
pub fn parse_envelope(text: &str) -> Option<ClientEnvelope> {
    serde_json::from_str(text).ok()
}

/// Decode an envelope's payload given its `msg_type`. Returns `None` for
/// malformed payloads or unknown types — both are dropped silently by
/// the caller, never surfaced as an error frame.
pub fn decode_payload(envelope: &ClientEnvelope) -> Option<ClientMessage> {
    match envelope.msg_type.as_str() {
        "join" => {
            let p: JoinPayload = serde_json::from_value(envelope.payload.clone()).ok()?;
            Some(ClientMessage::Join {
                room_id: p.room_id,
                user_id: p.user_id,
                username: p.username,
            })
        }
        "ready" => {
            let p: ReadyPayload = serde_json::from_value(envelope.payload.clone()).ok()?;
            Some(ClientMessage::Ready { is_ready: p.is_ready })
        }
        "progress" => {
            let p: ProgressPayload = serde_json::from_value(envelope.payload.clone()).ok()?;
            Some(ClientMessage::Progress {
                position: p.position,
                wpm: p.wpm,
                accuracy: p.accuracy,
                timestamp: p.timestamp,
            })
        }
        "finish" => {
            let p: FinishPayload = serde_json::from_value(envelope.payload.clone()).ok()?;
            Some(ClientMessage::Finish {
                wpm: p.wpm,
                accuracy: p.accuracy,
                race_time: p.race_time,
                timestamp: p.timestamp,
            })
        }
        "leave" => Some(ClientMessage::Leave),
        "ping" => Some(ClientMessage::Ping),
        _ => None,
    }
}

/// A player entry as broadcast inside `race_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceStartPlayer {
    pub user_id: String,
    pub username: String,
    pub car_emoji: String,
    pub placement: usize,
}

/// A single player's final standing, as broadcast inside `race_complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceResultEntry {
    pub user_id: String,
    pub username: String,
    pub placement: usize,
    pub wpm: f64,
    pub accuracy: f64,
    pub race_time: f64,
    pub xp_earned: u32,
    pub car_emoji: String,
}

/// Server→client messages, one flat tagged enum per `spec.md` §6.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    PlayerJoined {
        user_id: String,
        username: String,
        car_emoji: String,
        placement: usize,
        total_players: usize,
    },
    PlayerLeft {
        user_id: String,
        username: String,
        total_players: usize,
    },
    PlayerReady {
        user_id: String,
        username: String,
        is_ready: bool,
        ready_count: usize,
        total_players: usize,
    },
    Countdown {
        number: u8,
    },
    RaceStart {
        race_text: String,
        start_time: chrono::DateTime<chrono::Utc>,
        players: Vec<RaceStartPlayer>,
    },
    PlayerUpdate {
        user_id: String,
        username: String,
        position: u32,
        wpm: u32,
        accuracy: f64,
        placement: usize,
    },
    PlayerFinished {
        user_id: String,
        username: String,
        wpm: f64,
        accuracy: f64,
        race_time: f64,
        placement: usize,
        finished_at: chrono::DateTime<chrono::Utc>,
    },
    RaceComplete {
        results: Vec<RaceResultEntry>,
    },
    Error {
        code: String,
        message: String,
    },
    Pong {},
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join_envelope() {
        let text = r#"{"type":"join","room_id":"r1","payload":{"room_id":"r1","user_id":"u1","username":"alice"}}"#;
        let envelope = parse_envelope(text).unwrap();
        assert_eq!(envelope.msg_type, "join");
        let msg = decode_payload(&envelope).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                room_id: "r1".to_string(),
                user_id: "u1".to_string(),
                username: "alice".to_string(),
            }
        );
    }

    #[test]
    fn unknown_type_decodes_to_none() {
        let text = r#"{"type":"teleport","payload":{}}"#;
        let envelope = parse_envelope(text).unwrap();
        assert!(decode_payload(&envelope).is_none());
    }

    #[test]
    fn malformed_json_fails_to_parse() {
        assert!(parse_envelope("not json").is_none());
    }

    #[test]
    fn server_message_serializes_with_tag() {
        let msg = ServerMessage::Pong {};
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }

    #[test]
    fn ping_and_leave_have_no_payload_fields() {
        let text = r#"{"type":"leave","room_id":"r1","payload":{}}"#;
        let envelope = parse_envelope(text).unwrap();
        assert_eq!(decode_payload(&envelope), Some(ClientMessage::Leave));
    }
}
