use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Error, Result};

/// The four transaction state machines of RFC 3261 §17
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    InviteClient,
    NonInviteClient,
    InviteServer,
    NonInviteServer,
}

impl TransactionKind {
    pub fn is_server(&self) -> bool {
        matches!(self, TransactionKind::InviteServer | TransactionKind::NonInviteServer)
    }

    pub fn is_invite(&self) -> bool {
        matches!(self, TransactionKind::InviteClient | TransactionKind::InviteServer)
    }

    /// State the transaction enters once its first message is on the wire
    pub fn first_state(&self) -> TransactionState {
        match self {
            TransactionKind::InviteClient => TransactionState::Calling,
            TransactionKind::InviteServer => TransactionState::Proceeding,
            TransactionKind::NonInviteClient | TransactionKind::NonInviteServer => TransactionState::Trying,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TransactionKind::InviteClient => "INVITE client",
            TransactionKind::NonInviteClient => "non-INVITE client",
            TransactionKind::InviteServer => "INVITE server",
            TransactionKind::NonInviteServer => "non-INVITE server",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Union of the states of all four machines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransactionState {
    /// Created, nothing sent or processed yet
    Initial = 0,
    Calling = 1,
    Trying = 2,
    Proceeding = 3,
    Completed = 4,
    /// Server INVITE only: ACK received
    Confirmed = 5,
    Terminated = 6,
}

impl TransactionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TransactionState::Initial,
            1 => TransactionState::Calling,
            2 => TransactionState::Trying,
            3 => TransactionState::Proceeding,
            4 => TransactionState::Completed,
            5 => TransactionState::Confirmed,
            _ => TransactionState::Terminated,
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Transaction state readable from any task without locking
#[derive(Debug)]
pub struct AtomicTransactionState(AtomicU8);

impl AtomicTransactionState {
    pub fn new(state: TransactionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> TransactionState {
        TransactionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Stores `state` and returns the previous one
    pub fn set(&self, state: TransactionState) -> TransactionState {
        TransactionState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }

    /// Checks a transition against the machine of `kind`.
    ///
    /// Moving to `Terminated` is always allowed; transport errors and
    /// explicit termination can happen in any state.
    pub fn validate_transition(kind: TransactionKind, from: TransactionState, to: TransactionState) -> Result<()> {
        use TransactionState::*;

        if to == Terminated {
            return Ok(());
        }
        let allowed = match kind {
            TransactionKind::InviteClient => matches!(
                (from, to),
                (Initial, Calling) | (Calling, Proceeding) | (Calling, Completed) | (Proceeding, Completed)
            ),
            TransactionKind::NonInviteClient | TransactionKind::NonInviteServer => matches!(
                (from, to),
                (Initial, Trying) | (Trying, Proceeding) | (Trying, Completed) | (Proceeding, Completed)
            ),
            TransactionKind::InviteServer => matches!(
                (from, to),
                (Initial, Proceeding) | (Proceeding, Completed) | (Completed, Confirmed)
            ),
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::InvalidStateTransition {
                kind: kind.name(),
                from,
                to,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_client_transitions() {
        let kind = TransactionKind::InviteClient;
        assert!(AtomicTransactionState::validate_transition(kind, TransactionState::Calling, TransactionState::Proceeding).is_ok());
        assert!(AtomicTransactionState::validate_transition(kind, TransactionState::Proceeding, TransactionState::Calling).is_err());
        assert!(AtomicTransactionState::validate_transition(kind, TransactionState::Completed, TransactionState::Terminated).is_ok());
        assert!(AtomicTransactionState::validate_transition(kind, TransactionState::Calling, TransactionState::Trying).is_err());
    }

    #[test]
    fn test_server_invite_confirmed_only_from_completed() {
        let kind = TransactionKind::InviteServer;
        assert!(AtomicTransactionState::validate_transition(kind, TransactionState::Completed, TransactionState::Confirmed).is_ok());
        assert!(AtomicTransactionState::validate_transition(kind, TransactionState::Proceeding, TransactionState::Confirmed).is_err());
        assert!(AtomicTransactionState::validate_transition(
            TransactionKind::NonInviteServer,
            TransactionState::Completed,
            TransactionState::Confirmed
        )
        .is_err());
    }

    #[test]
    fn test_atomic_state_swap() {
        let state = AtomicTransactionState::new(TransactionState::Initial);
        assert_eq!(state.set(TransactionState::Trying), TransactionState::Initial);
        assert_eq!(state.get(), TransactionState::Trying);
    }
}
