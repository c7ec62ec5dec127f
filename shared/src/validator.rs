/// Stateless plausibility checks for a single progress report, run
/// against the player's own last known report (`spec.md` §4.2). Pure and
/// side-effect free so it is testable without a `Player`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    PositionWentBackwards,
    PositionJumpTooLarge,
    WpmOutOfRange,
    AccuracyOutOfRange,
}

impl ValidationError {
    pub fn message(self) -> &'static str {
        match self {
            ValidationError::PositionWentBackwards => "position went backwards",
            ValidationError::PositionJumpTooLarge => "position jumped by more than 5 characters",
            ValidationError::WpmOutOfRange => "wpm outside [0, 250]",
            ValidationError::AccuracyOutOfRange => "accuracy outside [0, 100]",
        }
    }
}

const MAX_POSITION_JUMP: u32 = 5;
const MAX_WPM: u32 = 250;

/// Validate a progress report against the player's last accepted
/// position. `wpm` and `accuracy` bounds apply regardless of position.
pub fn validate_progress(
    last_position: u32,
    new_position: u32,
    wpm: u32,
    accuracy: f64,
) -> Result<(), ValidationError> {
    if new_position < last_position {
        return Err(ValidationError::PositionWentBackwards);
    }
    if new_position - last_position > MAX_POSITION_JUMP {
        return Err(ValidationError::PositionJumpTooLarge);
    }
    if wpm > MAX_WPM {
        return Err(ValidationError::WpmOutOfRange);
    }
    if !(0.0..=100.0).contains(&accuracy) {
        return Err(ValidationError::AccuracyOutOfRange);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_non_decreasing_small_jump() {
        assert!(validate_progress(10, 15, 60, 100.0).is_ok());
    }

    #[test]
    fn rejects_backwards_position() {
        assert_eq!(
            validate_progress(10, 9, 60, 100.0),
            Err(ValidationError::PositionWentBackwards)
        );
    }

    #[test]
    fn rejects_too_large_a_jump() {
        assert_eq!(
            validate_progress(0, 6, 60, 100.0),
            Err(ValidationError::PositionJumpTooLarge)
        );
    }

    #[test]
    fn accepts_boundary_jump_of_exactly_five() {
        assert!(validate_progress(0, 5, 60, 100.0).is_ok());
    }

    #[test]
    fn rejects_wpm_above_250() {
        assert_eq!(
            validate_progress(0, 0, 251, 100.0),
            Err(ValidationError::WpmOutOfRange)
        );
    }

    #[test]
    fn accepts_wpm_of_exactly_250() {
        assert!(validate_progress(0, 0, 250, 100.0).is_ok());
    }

    #[test]
    fn rejects_accuracy_out_of_range() {
        assert_eq!(
            validate_progress(0, 0, 10, -0.1),
            Err(ValidationError::AccuracyOutOfRange)
        );
        assert_eq!(
            validate_progress(0, 0, 10, 100.1),
            Err(ValidationError::AccuracyOutOfRange)
        );
    }

    #[test]
    fn accepts_accuracy_boundaries() {
        assert!(validate_progress(0, 0, 10, 0.0).is_ok());
        assert!(validate_progress(0, 0, 10, 100.0).is_ok());
    }
}
