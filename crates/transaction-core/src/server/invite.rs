use std::time::Duration;

use async_trait::async_trait;
use sipline_sip_core::prelude::{Message, Method, Response, ResponseBuilder, StatusCode};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::timer::{TimerSet, TimerType};
use crate::transaction::logic::{arm, TransactionLogic};
use crate::transaction::{TransactionData, TransactionEvent, TransactionKind, TransactionState};

/// INVITE server transaction (RFC 3261 §17.2.1, Figure 7).
///
/// Sending a 2xx terminates the transaction; retransmitting it until the ACK
/// arrives is the dialog's job. If the TU stays silent for Timer 100 the
/// transaction answers `100 Trying` itself.
#[derive(Debug, Default)]
pub struct ServerInviteLogic {
    timer_g_interval: Duration,
    last_response: Option<Response>,
}

impl ServerInviteLogic {
    pub fn new() -> Self {
        Self::default()
    }

    async fn resend_last(&self, data: &TransactionData) -> Result<()> {
        if let Some(response) = &self.last_response {
            data.send(Message::Response(response.clone())).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionLogic for ServerInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteServer
    }

    async fn on_enter_state(
        &mut self,
        data: &TransactionData,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timers: &mut TimerSet,
    ) -> Result<Option<TransactionState>> {
        match new_state {
            TransactionState::Proceeding => {
                if data.send_trying && self.last_response.is_none() {
                    arm(data, timers, TimerType::Trying100);
                }
                Ok(None)
            }
            TransactionState::Completed => {
                self.timer_g_interval = data.timers.t1;
                arm(data, timers, TimerType::G);
                arm(data, timers, TimerType::H);
                Ok(None)
            }
            TransactionState::Confirmed => {
                timers.cancel(TimerType::G);
                timers.cancel(TimerType::H);
                if arm(data, timers, TimerType::I) {
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
        let Message::Request(request) = message else {
            trace!(id = %data.key, "Ignoring response routed to INVITE server transaction");
            return Ok(None);
        };

        match (&request.method, current_state) {
            (Method::Invite, TransactionState::Proceeding | TransactionState::Completed) => {
                debug!(id = %data.key, ?current_state, "INVITE retransmission, resending last response");
                self.resend_last(data).await?;
                Ok(None)
            }
            (Method::Ack, TransactionState::Completed) => {
                data.emit(TransactionEvent::AckReceived {
                    transaction_id: data.key.clone(),
                    request,
                })
                .await;
                Ok(Some(TransactionState::Confirmed))
            }
            _ => {
                trace!(id = %data.key, method = %request.method, ?current_state, "Absorbing request");
                Ok(None)
            }
        }
    }

    async fn send_response(
        &mut self,
        data: &TransactionData,
        response: Response,
        current_state: TransactionState,
        timers: &mut TimerSet,
    ) -> Result<Option<TransactionState>> {
        if current_state != TransactionState::Proceeding {
            return Err(Error::InvalidState {
                key: data.key.clone(),
                state: current_state,
                message: "a final response was already sent".to_string(),
            });
        }
        timers.cancel(TimerType::Trying100);

        let status = response.status;
        data.send(Message::Response(response.clone())).await?;
        self.last_response = Some(response);

        if status.is_provisional() {
            Ok(None)
        } else if status.is_success() {
            Ok(Some(TransactionState::Terminated))
        } else {
            Ok(Some(TransactionState::Completed))
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
            (TimerType::Trying100, TransactionState::Proceeding) if self.last_response.is_none() => {
                debug!(id = %data.key, "TU silent, sending 100 Trying");
                let trying = ResponseBuilder::from_request(&data.request, StatusCode::TRYING).build();
                data.send(Message::Response(trying.clone())).await?;
                self.last_response = Some(trying);
                Ok(None)
            }
            (TimerType::G, TransactionState::Completed) => {
                debug!(id = %data.key, interval = ?self.timer_g_interval, "Timer G fired, retransmitting final response");
                self.resend_last(data).await?;
                self.timer_g_interval = data.timers.next_interval(self.timer_g_interval, true);
                timers.start(TimerType::G, self.timer_g_interval, data.cmd_tx.clone());
                Ok(None)
            }
            (TimerType::H, TransactionState::Completed) => {
                data.emit(TransactionEvent::TransactionTimeout {
                    transaction_id: data.key.clone(),
                    timer,
                })
                .await;
                Ok(Some(TransactionState::Terminated))
            }
            (TimerType::I, TransactionState::Confirmed) => Ok(Some(TransactionState::Terminated)),
            _ => Ok(None),
        }
    }
}
