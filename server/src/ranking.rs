use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// A read-only snapshot of one player's race progress, taken once all
/// player locks have been read so the comparator itself can stay
/// synchronous and lock-free (`spec.md` §4.4).
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub user_id: String,
    pub has_finished: bool,
    pub finished_at: Option<DateTime<Utc>>,
    pub current_position: u32,
}

/// Total order over race standings: finished beats unfinished; among
/// finished players, earlier `finished_at` wins; among unfinished
/// players, higher `current_position` wins; `user_id` breaks any
/// remaining tie deterministically (`spec.md` §4.4).
fn compare(a: &PlayerSnapshot, b: &PlayerSnapshot) -> Ordering {
    match (a.has_finished, b.has_finished) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    if a.has_finished {
        match (a.finished_at, b.finished_at) {
            (Some(ta), Some(tb)) => {
                let by_time = ta.cmp(&tb);
                if by_time != Ordering::Equal {
                    return by_time;
                }
            }
            _ => {}
        }
    } else {
        let by_position = b.current_position.cmp(&a.current_position);
        if by_position != Ordering::Equal {
            return by_position;
        }
    }

    a.user_id.cmp(&b.user_id)
}

/// Ranks every snapshot and returns `(user_id, placement)` pairs,
/// placement 1-indexed, in winner-first order.
pub fn rank(mut snapshots: Vec<PlayerSnapshot>) -> Vec<(String, usize)> {
    snapshots.sort_by(compare);
    snapshots
        .into_iter()
        .enumerate()
        .map(|(i, s)| (s.user_id, i + 1))
        .collect()
}
