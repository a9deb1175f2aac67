//! Wire connection lifecycle
//!
//! ```text
//! Initial -> Handshaking -> [Authenticating] -> Ready
//!     any state -> Closed
//! ```

use crate::{Error, Result};
use std::fmt;

/// Where a [`Connection`](super::Connection) is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, nothing sent
    Initial,
    /// `isMaster` sent, awaiting the server description
    Handshaking,
    /// SASL or X.509 conversation in progress
    Authenticating,
    /// Ready for commands
    Ready,
    /// Terminal
    Closed,
}

impl ConnectionState {
    /// States reachable in one step, apart from `Closed`
    fn successors(self) -> &'static [ConnectionState] {
        use ConnectionState::*;

        match self {
            Initial => &[Handshaking],
            Handshaking => &[Authenticating, Ready],
            Authenticating => &[Ready],
            Ready | Closed => &[],
        }
    }

    /// Whether `next` may follow this state
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        next == ConnectionState::Closed || self.successors().contains(&next)
    }

    /// Move to `next`, or fail with [`Error::InvalidState`] leaving `self` as is
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("a successor of {}", self),
                actual: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }

    /// Whether commands may be sent
    pub fn is_ready(&self) -> bool {
        *self == ConnectionState::Ready
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Initial => "initial",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    fn walk(path: &[ConnectionState]) -> Result<ConnectionState> {
        let mut state = Initial;
        for next in path {
            state.transition(*next)?;
        }
        Ok(state)
    }

    #[test]
    fn test_authenticated_path() {
        let state = walk(&[Handshaking, Authenticating, Ready]).unwrap();
        assert!(state.is_ready());
    }

    #[test]
    fn test_unauthenticated_path() {
        assert_eq!(walk(&[Handshaking, Ready]).unwrap(), Ready);
    }

    #[test]
    fn test_skipping_handshake_rejected() {
        let mut state = Initial;
        let err = state.transition(Ready).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid state: expected a successor of initial, got ready"
        );
        assert_eq!(state, Initial);
    }

    #[test]
    fn test_closed_reachable_and_terminal() {
        for start in [Initial, Handshaking, Authenticating, Ready, Closed] {
            assert!(start.can_transition_to(Closed), "{start} -> closed");
        }
        for next in [Initial, Handshaking, Authenticating, Ready] {
            assert!(!Closed.can_transition_to(next));
        }
        assert!(walk(&[Handshaking, Ready, Handshaking]).is_err());
    }
}
