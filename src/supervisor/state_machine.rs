use thiserror::Error;

/// Phases of one activation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Activating,
    NotRegistered,
    Spawning,
    Polling,
    Connected,
    TimedOut,
    ProcessDied,
    Failed,
    Cancelled,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            State::Connected | State::TimedOut | State::ProcessDied | State::Failed | State::Cancelled
        )
    }
}

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} -> {1:?}")]
    InvalidTransition(State, State),
}

pub struct StateMachine {
    pub state: State,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self { state: State::Idle }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_transition(&self, to: &State) -> bool {
        matches!(
            (&self.state, to),
            (State::Idle, State::Activating)
                | (State::Activating, State::Connected)
                | (State::Activating, State::NotRegistered)
                | (State::Activating, State::Failed)
                | (State::NotRegistered, State::Spawning)
                | (State::NotRegistered, State::Failed)
                | (State::Spawning, State::Polling)
                | (State::Spawning, State::Failed)
                | (State::Polling, State::Connected)
                | (State::Polling, State::TimedOut)
                | (State::Polling, State::ProcessDied)
                | (State::Polling, State::Failed)
                | (State::Polling, State::Cancelled)
        )
    }

    pub fn transition(&mut self, to: State) -> Result<(), TransitionError> {
        if self.can_transition(&to) {
            tracing::debug!("Activation state: {:?} -> {:?}", self.state, to);
            self.state = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.state, to))
        }
    }
}
