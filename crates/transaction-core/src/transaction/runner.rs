//! # Transaction Runner
//!
//! The event loop shared by all four transaction types. Each transaction
//! runs one loop in its own task; messages from the network, responses from
//! the TU and timer fires all arrive as [`InternalTransactionCommand`]s on a
//! single channel, so the state machine never sees two events at once.
//!
//! Type-specific behaviour lives behind [`TransactionLogic`]; the runner
//! validates and applies transitions, turns transport failures into a
//! terminated transaction plus a [`TransactionEvent::TransportError`], and
//! reports everything else to the TU.

use std::sync::Arc;

use sipline_sip_core::prelude::{Message, Method};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::timer::TimerSet;
use crate::transaction::logic::TransactionLogic;
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, TransactionData, TransactionEvent, TransactionState,
};

/// Runs a transaction until it reaches `Terminated`, then reports
/// [`TransactionEvent::TransactionTerminated`].
pub async fn run_transaction_loop<L: TransactionLogic>(
    data: Arc<TransactionData>,
    logic: L,
    mut cmd_rx: mpsc::Receiver<InternalTransactionCommand>,
) {
    let mut runner = Runner {
        data,
        logic,
        timers: TimerSet::new(),
    };
    let id = runner.data.key.clone();
    debug!(id = %id, kind = %runner.logic.kind(), state = ?runner.data.state(), "Transaction loop starting");

    while let Some(command) = cmd_rx.recv().await {
        let current_state = runner.data.state();
        trace!(id = %id, ?command, ?current_state, "Transaction received command");

        match command {
            InternalTransactionCommand::TransitionTo(new_state) => {
                runner.transition(new_state).await;
            }
            InternalTransactionCommand::ProcessMessage(message) => {
                let outcome = runner
                    .logic
                    .process_message(&runner.data, message, current_state, &mut runner.timers)
                    .await;
                runner.apply(outcome).await;
            }
            InternalTransactionCommand::SendResponse { response, reply } => {
                let outcome = runner
                    .logic
                    .send_response(&runner.data, response, current_state, &mut runner.timers)
                    .await;
                match outcome {
                    Ok(next) => {
                        let _ = reply.send(Ok(()));
                        if let Some(next) = next {
                            runner.transition(next).await;
                        }
                    }
                    Err(e) if e.is_transport_error() => {
                        let message = e.to_string();
                        let _ = reply.send(Err(e));
                        runner.abort_on_transport_error(message).await;
                    }
                    // the TU learns about its own mistake through the reply
                    Err(e) => {
                        debug!(id = %id, error = %e, "Response rejected by transaction");
                        let _ = reply.send(Err(e));
                    }
                }
            }
            InternalTransactionCommand::Timer { timer, generation } => {
                if !runner.timers.fired(timer, generation) {
                    trace!(id = %id, %timer, generation, "Ignoring stale timer");
                    continue;
                }
                debug!(id = %id, %timer, state = ?current_state, "Timer fired");
                let outcome = runner
                    .logic
                    .handle_timer(&runner.data, timer, current_state, &mut runner.timers)
                    .await;
                runner.apply(outcome).await;
            }
            InternalTransactionCommand::TransportError(message) => {
                runner.abort_on_transport_error(message).await;
            }
            InternalTransactionCommand::Terminate => {
                debug!(id = %id, "Received Terminate command, shutting down transaction");
                runner.transition(TransactionState::Terminated).await;
            }
        }

        if runner.data.state() == TransactionState::Terminated {
            debug!(id = %id, "Transaction reached Terminated state, stopping event loop");
            break;
        }
    }

    // Messages queued behind the one that ended the transaction: a 2xx from
    // another fork or an ACK for a 2xx still has to reach the dialog layer
    cmd_rx.close();
    while let Ok(command) = cmd_rx.try_recv() {
        if let InternalTransactionCommand::ProcessMessage(message) = command {
            runner.forward_stray(message).await;
        }
    }

    runner.timers.cancel_all();
    let final_state = runner.data.state();
    debug!(id = %id, ?final_state, "Transaction loop ended");
    runner
        .data
        .emit(TransactionEvent::TransactionTerminated { transaction_id: id })
        .await;
}

struct Runner<L> {
    data: Arc<TransactionData>,
    logic: L,
    timers: TimerSet,
}

impl<L: TransactionLogic> Runner<L> {
    async fn forward_stray(&self, message: Message) {
        let source = self.data.remote_addr;
        match message {
            Message::Response(response) if response.status.is_success() => {
                self.data.emit(TransactionEvent::StrayResponse { response, source }).await;
            }
            Message::Request(request) if request.method == Method::Ack => {
                self.data.emit(TransactionEvent::StrayRequest { request, source }).await;
            }
            _ => trace!(id = %self.data.key, "Absorbed by terminated transaction"),
        }
    }

    async fn apply(&mut self, outcome: Result<Option<TransactionState>>) {
        match outcome {
            Ok(Some(next)) => self.transition(next).await,
            Ok(None) => {}
            Err(e) => self.fail(e).await,
        }
    }

    /// Applies `next` and every state the entry actions chain into
    async fn transition(&mut self, mut next: TransactionState) {
        loop {
            let current = self.data.state();
            if current == next {
                trace!(id = %self.data.key, state = ?current, "Already in requested state");
                return;
            }
            if let Err(e) = AtomicTransactionState::validate_transition(self.logic.kind(), current, next) {
                error!(id = %self.data.key, error = %e, "Invalid state transition");
                self.report_error(e).await;
                return;
            }

            let previous = self.data.state.set(next);
            debug!(id = %self.data.key, "State transition: {:?} -> {:?}", previous, next);
            self.data
                .emit(TransactionEvent::StateChanged {
                    transaction_id: self.data.key.clone(),
                    previous_state: previous,
                    new_state: next,
                })
                .await;

            if next == TransactionState::Terminated {
                self.timers.cancel_all();
                return;
            }

            match self
                .logic
                .on_enter_state(&self.data, next, previous, &mut self.timers)
                .await
            {
                Ok(Some(follow)) => next = follow,
                Ok(None) => return,
                Err(e) => {
                    self.fail(e).await;
                    return;
                }
            }
        }
    }

    async fn fail(&mut self, e: Error) {
        if e.is_transport_error() {
            self.abort_on_transport_error(e.to_string()).await;
        } else {
            error!(id = %self.data.key, error = %e, "Error in transaction");
            self.report_error(e).await;
        }
    }

    async fn report_error(&self, e: Error) {
        self.data
            .emit(TransactionEvent::Error {
                transaction_id: self.data.key.clone(),
                error: e.to_string(),
            })
            .await;
    }

    /// A send failed: the transaction ends now, without waiting for any
    /// timer, and the TU is told it was the transport
    async fn abort_on_transport_error(&mut self, message: String) {
        warn!(id = %self.data.key, error = %message, "Transport error, terminating transaction");
        self.timers.cancel_all();
        self.data
            .emit(TransactionEvent::TransportError {
                transaction_id: self.data.key.clone(),
                error: message,
            })
            .await;
        let previous = self.data.state.set(TransactionState::Terminated);
        if previous != TransactionState::Terminated {
            self.data
                .emit(TransactionEvent::StateChanged {
                    transaction_id: self.data.key.clone(),
                    previous_state: previous,
                    new_state: TransactionState::Terminated,
                })
                .await;
        }
    }
}
