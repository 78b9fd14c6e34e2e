use async_trait::async_trait;
use sipline_sip_core::prelude::{Message, Response};

use crate::error::{Error, Result};
use crate::timer::{TimerSet, TimerType};
use crate::transaction::{TransactionData, TransactionEvent, TransactionKind, TransactionState};

/// Behaviour of one of the four RFC 3261 state machines.
///
/// The runner owns the logic value and calls it from the transaction's
/// event loop only, so implementations keep their per-transaction state
/// (retransmission intervals, cached ACK, last response) in `self` without
/// locking. Every method returns the state to move to next, if any.
#[async_trait]
pub trait TransactionLogic: Send + 'static {
    fn kind(&self) -> TransactionKind;

    /// Called right after the state changed; arms and cancels timers and
    /// performs entry actions such as the first transmission
    async fn on_enter_state(
        &mut self,
        data: &TransactionData,
        new_state: TransactionState,
        previous_state: TransactionState,
        timers: &mut TimerSet,
    ) -> Result<Option<TransactionState>>;

    /// A message from the network matched this transaction
    async fn process_message(
        &mut self,
        data: &TransactionData,
        message: Message,
        current_state: TransactionState,
        timers: &mut TimerSet,
    ) -> Result<Option<TransactionState>>;

    /// The TU sends a response through this transaction
    async fn send_response(
        &mut self,
        data: &TransactionData,
        _response: Response,
        current_state: TransactionState,
        _timers: &mut TimerSet,
    ) -> Result<Option<TransactionState>> {
        Err(Error::InvalidState {
            key: data.key.clone(),
            state: current_state,
            message: "client transactions do not send responses".to_string(),
        })
    }

    /// A current (non-stale) timer fired
    async fn handle_timer(
        &mut self,
        data: &TransactionData,
        timer: TimerType,
        current_state: TransactionState,
        timers: &mut TimerSet,
    ) -> Result<Option<TransactionState>>;
}

/// Classifies a response into the matching TU event
pub(crate) fn response_event(data: &TransactionData, response: Response) -> TransactionEvent {
    let transaction_id = data.key.clone();
    if response.status.is_provisional() {
        TransactionEvent::ProvisionalResponse { transaction_id, response }
    } else if response.status.is_success() {
        TransactionEvent::SuccessResponse { transaction_id, response }
    } else {
        TransactionEvent::FailureResponse { transaction_id, response }
    }
}

/// Arms `timer` with its initial duration. Returns `false` when the duration
/// is zero and nothing was armed.
pub(crate) fn arm(data: &TransactionData, timers: &mut TimerSet, timer: TimerType) -> bool {
    let after = data.timers.duration(timer, data.reliable);
    if after.is_zero() {
        return false;
    }
    timers.start(timer, after, data.cmd_tx.clone());
    true
}
