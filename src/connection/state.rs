//! Connection lifecycle state machine

use crate::{Error, Result};

/// Lifecycle state of a [`ManagedConnection`](super::ManagedConnection)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, no connect attempt made yet (deferred)
    NotStarted,

    /// Connect attempt in flight
    Connecting,

    /// Usable connection
    Connected,

    /// The attempt definitively failed
    Failed,

    /// Drop hook has run; terminal
    Closed,
}

impl ConnectionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (NotStarted, Connecting)
                | (NotStarted, Connected)
                | (NotStarted, Failed)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (NotStarted | Connecting | Connected | Failed, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {:?}", self),
                actual: format!("{:?}", next),
            });
        }
        *self = next;
        Ok(())
    }

    /// No transition leaves this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Stable lowercase name, used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let mut state = ConnectionState::NotStarted;
        assert!(state.transition(ConnectionState::Connecting).is_ok());
        assert!(state.transition(ConnectionState::Connected).is_ok());
        assert!(state.transition(ConnectionState::Closed).is_ok());
    }

    #[test]
    fn test_deferred_connect_skips_connecting() {
        // Lazy connections go straight from not started to connected
        let mut state = ConnectionState::NotStarted;
        assert!(state.transition(ConnectionState::Connected).is_ok());
    }

    #[test]
    fn test_invalid_transition() {
        let mut state = ConnectionState::Connected;
        assert!(state.transition(ConnectionState::Connecting).is_err());
        assert_eq!(state, ConnectionState::Connected);
    }

    #[test]
    fn test_failed_is_not_retried() {
        let mut state = ConnectionState::Failed;
        assert!(state.transition(ConnectionState::Connected).is_err());
        assert!(state.transition(ConnectionState::Connecting).is_err());
    }

    #[test]
    fn test_close_from_any_live_state() {
        for from in [
            ConnectionState::NotStarted,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Failed,
        ] {
            let mut state = from;
            assert!(state.transition(ConnectionState::Closed).is_ok());
            assert!(state.is_terminal());
        }
    }

    #[test]
    fn test_nothing_leaves_closed() {
        let mut state = ConnectionState::Closed;
        for next in [
            ConnectionState::NotStarted,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Failed,
            ConnectionState::Closed,
        ] {
            let err = state.transition(next).unwrap_err();
            assert!(err.is_programming_error());
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::NotStarted.to_string(), "not_started");
        assert_eq!(ConnectionState::Closed.to_string(), "closed");
    }
}
