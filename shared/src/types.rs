use serde::{Deserialize, Serialize};

/// Race difficulty. Tunes nothing in this crate beyond the XP formula —
/// the actual word-selection/difficulty curve is a product decision
/// (`spec.md` Non-goals: "XP formula domain tuning").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn xp_multiplier(self) -> f64 {
        match self {
            Difficulty::Easy => 1.0,
            Difficulty::Medium => 1.25,
            Difficulty::Hard => 1.5,
        }
    }
}

/// Visual palette players are assigned from, round-robin by placement.
pub const CAR_EMOJIS: [&str; 4] = ["🚗", "🚙", "🏎️", "🚕"];

pub fn car_emoji_for(placement: usize) -> &'static str {
    CAR_EMOJIS[(placement.saturating_sub(1)) % CAR_EMOJIS.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn car_emoji_cycles_through_palette() {
        assert_eq!(car_emoji_for(1), CAR_EMOJIS[0]);
        assert_eq!(car_emoji_for(4), CAR_EMOJIS[3]);
        assert_eq!(car_emoji_for(5), CAR_EMOJIS[0]);
    }
}
