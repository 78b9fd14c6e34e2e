use async_trait::async_trait;
use sipline_sip_core::prelude::{Message, Response};
use tracing::trace;

use crate::error::{Error, Result};
use crate::timer::{TimerSet, TimerType};
use crate::transaction::logic::{arm, TransactionLogic};
use crate::transaction::{TransactionData, TransactionKind, TransactionState};

/// Non-INVITE server transaction (RFC 3261 §17.2.2, Figure 8)
#[derive(Debug, Default)]
pub struct ServerNonInviteLogic {
    last_response: Option<Response>,
}

impl ServerNonInviteLogic {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionLogic for ServerNonInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteServer
    }

    async fn on_enter_state(
        &mut self,
        data: &TransactionData,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timers: &mut TimerSet,
    ) -> Result<Option<TransactionState>> {
        if new_state == TransactionState::Completed && !arm(data, timers, TimerType::J) {
            return Ok(Some(TransactionState::Terminated));
        }
        Ok(None)
    }

    async fn process_message(
        &mut self,
        data: &TransactionData,
        message: Message,
        current_state: TransactionState,
        _timers: &mut TimerSet,
    ) -> Result<Option<TransactionState>> {
        if !message.is_request() {
            return Ok(None);
        }
        match (current_state, &self.last_response) {
            (TransactionState::Proceeding | TransactionState::Completed, Some(response)) => {
                trace!(id = %data.key, ?current_state, "Request retransmission, resending last response");
                data.send(Message::Response(response.clone())).await?;
            }
            _ => trace!(id = %data.key, "Absorbing request retransmission"),
        }
        Ok(None)
    }

    async fn send_response(
        &mut self,
        data: &TransactionData,
        response: Response,
        current_state: TransactionState,
        _timers: &mut TimerSet,
    ) -> Result<Option<TransactionState>> {
        if !matches!(current_state, TransactionState::Trying | TransactionState::Proceeding) {
            return Err(Error::InvalidState {
                key: data.key.clone(),
                state: current_state,
                message: "a final response was already sent".to_string(),
            });
        }

        let provisional = response.status.is_provisional();
        data.send(Message::Response(response.clone())).await?;
        self.last_response = Some(response);

        if !provisional {
            Ok(Some(TransactionState::Completed))
        } else if current_state == TransactionState::Trying {
            Ok(Some(TransactionState::Proceeding))
        } else {
            Ok(None)
        }
    }

    async fn handle_timer(
        &mut self,
        _data: &TransactionData,
        timer: TimerType,
        current_state: TransactionState,
        _timers: &mut TimerSet,
    ) -> Result<Option<TransactionState>> {
        if timer == TimerType::J && current_state == TransactionState::Completed {
            return Ok(Some(TransactionState::Terminated));
        }
        Ok(None)
    }
}
