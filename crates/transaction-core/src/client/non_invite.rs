use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use sipline_sip_core::prelude::{Message, SipMessage};
use tracing::{debug, trace};

use crate::error::Result;
use crate::timer::{TimerSet, TimerType};
use crate::transaction::logic::{arm, response_event, TransactionLogic};
use crate::transaction::{TransactionData, TransactionEvent, TransactionKind, TransactionState};

/// Non-INVITE client transaction (RFC 3261 §17.1.2, Figure 6).
///
/// In Completed, a final response carrying a To tag not seen before comes
/// from another fork and is passed up instead of being absorbed.
#[derive(Debug, Default)]
pub struct ClientNonInviteLogic {
    timer_e_interval: Duration,
    seen_tags: HashSet<String>,
}

impl ClientNonInviteLogic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the To tag of a final response; `true` when it is new
    fn remember_tag(&mut self, tag: Option<&str>) -> bool {
        match tag {
            Some(tag) => self.seen_tags.insert(tag.to_string()),
            None => false,
        }
    }
}

#[async_trait]
impl TransactionLogic for ClientNonInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteClient
    }

    async fn on_enter_state(
        &mut self,
        data: &TransactionData,
        new_state: TransactionState,
        _previous_state: TransactionState,
        timers: &mut TimerSet,
    ) -> Result<Option<TransactionState>> {
        match new_state {
            TransactionState::Trying => {
                data.send_request().await?;
                self.timer_e_interval = data.timers.t1;
                arm(data, timers, TimerType::E);
                arm(data, timers, TimerType::F);
                Ok(None)
            }
            // Timer E keeps running and switches to T2 on its next fire
            TransactionState::Proceeding => Ok(None),
            TransactionState::Completed => {
                timers.cancel(TimerType::E);
                timers.cancel(TimerType::F);
                if arm(data, timers, TimerType::K) {
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
            trace!(id = %data.key, "Ignoring request routed to non-INVITE client transaction");
            return Ok(None);
        };
        let status = response.status;

        match current_state {
            TransactionState::Trying | TransactionState::Proceeding => {
                if status.is_provisional() {
                    data.emit(response_event(data, response)).await;
                    return Ok((current_state == TransactionState::Trying).then_some(TransactionState::Proceeding));
                }
                self.remember_tag(response.to_tag());
                data.emit(response_event(data, response)).await;
                Ok(Some(TransactionState::Completed))
            }
            TransactionState::Completed if status.is_final() => {
                if self.remember_tag(response.to_tag()) {
                    debug!(id = %data.key, status = status.as_u16(), "Final response from another fork");
                    data.emit(response_event(data, response)).await;
                } else {
                    trace!(id = %data.key, "Absorbing final response retransmission");
                }
                Ok(None)
            }
            _ => Ok(None),
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
            (TimerType::E, TransactionState::Trying | TransactionState::Proceeding) => {
                debug!(id = %data.key, interval = ?self.timer_e_interval, "Timer E fired, retransmitting request");
                data.send_request().await?;
                self.timer_e_interval = if current_state == TransactionState::Proceeding {
                    data.timers.t2
                } else {
                    data.timers.next_interval(self.timer_e_interval, true)
                };
                timers.start(TimerType::E, self.timer_e_interval, data.cmd_tx.clone());
                Ok(None)
            }
            (TimerType::F, TransactionState::Trying | TransactionState::Proceeding) => {
                data.emit(TransactionEvent::TransactionTimeout {
                    transaction_id: data.key.clone(),
                    timer,
                })
                .await;
                Ok(Some(TransactionState::Terminated))
            }
            (TimerType::K, TransactionState::Completed) => Ok(Some(TransactionState::Terminated)),
            _ => Ok(None),
        }
    }
}
