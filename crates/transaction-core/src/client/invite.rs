use std::time::Duration;

use async_trait::async_trait;
use sipline_sip_core::prelude::{Message, Request};
use tracing::{debug, trace};

use crate::builders::build_ack_for_non_2xx;
use crate::error::Result;
use crate::timer::{TimerSet, TimerType};
use crate::transaction::logic::{arm, response_event, TransactionLogic};
use crate::transaction::{TransactionData, TransactionEvent, TransactionKind, TransactionState};

/// INVITE client transaction (RFC 3261 §17.1.1, Figure 5).
///
/// A 2xx ends the transaction at once; the ACK for it belongs to the dialog.
/// For 300-699 the transaction sends the ACK itself and resends it for every
/// retransmission of the final response until Timer D fires.
#[derive(Debug, Default)]
pub struct ClientInviteLogic {
    timer_a_interval: Duration,
    ack: Option<Request>,
}

impl ClientInviteLogic {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionLogic for ClientInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteClient
    }

    async fn on_enter_state(
        &mut self,
        data: &TransactionData,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timers: &mut TimerSet,
    ) -> Result<Option<TransactionState>> {
        match new_state {
            TransactionState::Calling => {
                data.send_request().await?;
                self.timer_a_interval = data.timers.t1;
                arm(data, timers, TimerType::A);
                arm(data, timers, TimerType::B);
                Ok(None)
            }
            TransactionState::Proceeding => {
                timers.cancel(TimerType::A);
                timers.cancel(TimerType::B);
                Ok(None)
            }
            TransactionState::Completed => {
                timers.cancel(TimerType::A);
                timers.cancel(TimerType::B);
                if arm(data, timers, TimerType::D) {
                    Ok(None)
                } else {
                    Ok(Some(TransactionState::Terminated))
                }
            }
            _ => Ok(None),
        }
    }

    async fn process_message(
        &mut self,
        data: &TransactionData,
        message: Message,
        current_state: TransactionState,
        _timers: &mut TimerSet,
    ) -> Result<Option<TransactionState>> {
        let Message::Response(response) = message else {
            trace!(id = %data.key, "Ignoring request routed to INVITE client transaction");
            return Ok(None);
        };
        let status = response.status;

        match current_state {
            TransactionState::Calling | TransactionState::Proceeding => {
                if status.is_provisional() {
                    data.emit(response_event(data, response)).await;
                    return Ok((current_state == TransactionState::Calling).then_some(TransactionState::Proceeding));
                }
                if status.is_success() {
                    data.emit(response_event(data, response)).await;
                    return Ok(Some(TransactionState::Terminated));
                }
                let ack = build_ack_for_non_2xx(&data.request, &response)?;
                data.send(Message::Request(ack.clone())).await?;
                self.ack = Some(ack);
                data.emit(response_event(data, response)).await;
                Ok(Some(TransactionState::Completed))
            }
            TransactionState::Completed if status.is_final() && !status.is_success() => {
                if let Some(ack) = &self.ack {
                    debug!(id = %data.key, status = status.as_u16(), "Final response retransmitted, resending ACK");
                    data.send(Message::Request(ack.clone())).await?;
                }
                Ok(None)
            }
            _ => {
                trace!(id = %data.key, status = status.as_u16(), ?current_state, "Absorbing response");
                Ok(None)
            }
        }
    }

    async fn handle_timer(
        &mut self,
        data: &TransactionData,
        timer: TimerType,
        current_state: TransactionState,
        timers: &mut TimerSet,
    ) -> Result<Option<TransactionState>> {
        match (timer, current_state) {
            (TimerType::A, TransactionState::Calling) => {
                debug!(id = %data.key, interval = ?self.timer_a_interval, "Timer A fired, retransmitting INVITE");
                data.send_request().await?;
                self.timer_a_interval = data.timers.next_interval(self.timer_a_interval, false);
                timers.start(TimerType::A, self.timer_a_interval, data.cmd_tx.clone());
                Ok(None)
            }
            (TimerType::B, TransactionState::Calling) => {
                data.emit(TransactionEvent::TransactionTimeout {
                    transaction_id: data.key.clone(),
                    timer,
                })
                .await;
                Ok(Some(TransactionState::Terminated))
            }
            (TimerType::D, TransactionState::Completed) => Ok(Some(TransactionState::Terminated)),
            _ => Ok(None),
        }
    }
}
