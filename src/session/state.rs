//! Session lifecycle states.

use std::fmt;

/// Where a session is in its lifecycle.
///
/// ```text
/// Idle -> Connecting -> Live -> Closing -> Closed
///            \           |        ^
///             +------> Errored ---+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Live,
    Closing,
    Closed,
    Errored,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Live => "live",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        }
    }

    /// Holding devices or a connection.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::Live
                | SessionState::Closing
                | SessionState::Errored
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Live)
                | (Connecting, Errored)
                | (Live, Errored)
                | (Connecting, Closing)
                | (Live, Closing)
                | (Errored, Closing)
                | (Closing, Closed)
                // stop() before any start()
                | (Idle, Closed)
                // reset() for a fresh session
                | (Closed, Idle)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn initial_state_is_idle() {
        assert_eq!(SessionState::default(), Idle);
    }

    #[test]
    fn happy_path_transitions() {
        let path = [Idle, Connecting, Live, Closing, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn errored_side_path() {
        assert!(Live.can_transition_to(Errored));
        assert!(Connecting.can_transition_to(Errored));
        assert!(Errored.can_transition_to(Closing));
        assert!(!Errored.can_transition_to(Live));
    }

    #[test]
    fn closed_only_returns_through_reset() {
        assert!(Closed.can_transition_to(Idle));
        assert!(!Closed.can_transition_to(Connecting));
        assert!(!Closed.can_transition_to(Live));
    }

    #[test]
    fn start_only_from_idle() {
        for state in [Connecting, Live, Closing, Closed, Errored] {
            assert!(!state.can_transition_to(Connecting), "{}", state);
        }
    }

    #[test]
    fn active_states() {
        assert!(!Idle.is_active());
        assert!(!Closed.is_active());
        assert!(Live.is_active());
        assert!(Errored.is_active());
    }
}
