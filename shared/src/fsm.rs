use rust_fsm::*;

/// Lifecycle of a single race room, per the room state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Waiting,
    Countdown,
    Racing,
    Finished,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RoomEvent {
    /// All players ready and count >= min_players.
    Ready,
    /// A leave during Countdown dropped the player count below min_players.
    RevertToWaiting,
    /// The 3-second countdown elapsed.
    CountdownElapsed,
    /// Every present player finished the race.
    AllFinished,
    /// The 5-minute race timeout fired.
    TimedOut,
    /// The room became empty, or was otherwise abandoned.
    Abandoned,
}

impl StateMachineImpl for RoomState {
    type Input = RoomEvent;
    type State = RoomState;

    fn transition(state: &Self::State, input: &Self::Input) -> Option<Self::State> {
        use RoomEvent::*;
        use RoomState::*;
        match (state, input) {
            (Waiting, Ready) => Some(Countdown),
            (Countdown, CountdownElapsed) => Some(Racing),
            (Countdown, RevertToWaiting) => Some(Waiting),
            (Racing, AllFinished) | (Racing, TimedOut) => Some(Finished),
            (Waiting, Abandoned) | (Countdown, Abandoned) | (Racing, Abandoned) => Some(Finished),
            _ => None,
        }
    }
}

impl Default for RoomState {
    fn default() -> Self {
        RoomState::Waiting
    }
}
