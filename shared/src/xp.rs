use crate::types::Difficulty;

/// Awards XP for a finished race placement. `spec.md` §4.4 treats the
/// exact table as a product policy choice and only requires the
/// function be total, deterministic, and non-negative — this is the
/// default policy, expressed as a trait so a product can swap it in
/// without touching the room logic.
pub trait XpPolicy: Send + Sync {
    fn xp_for(
        &self,
        placement: usize,
        final_wpm: f64,
        final_accuracy: f64,
        difficulty: Difficulty,
    ) -> u32;
}

/// The stub formula fixed in `SPEC_FULL.md` §4.4.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultXpPolicy;

impl XpPolicy for DefaultXpPolicy {
    fn xp_for(
        &self,
        placement: usize,
        final_wpm: f64,
        final_accuracy: f64,
        difficulty: Difficulty,
    ) -> u32 {
        const BASE: f64 = 50.0;
        let placement_bonus = (5_i64.saturating_sub(placement as i64) * 20).max(0) as f64;
        let wpm_bonus = (final_wpm.max(0.0).floor() * 2.0).min(200.0);
        let accuracy_bonus = (final_accuracy.max(0.0) / 10.0).floor() * 5.0;
        let raw = (BASE + placement_bonus + wpm_bonus + accuracy_bonus) * difficulty.xp_multiplier();
        raw.floor().max(0.0) as u32
    }
}

/// XP for a player who never finished (race-timeout path). Resolved by
/// `spec.md`'s Open Question as zero.
pub fn xp_for_unfinished() -> u32 {
    0
}
