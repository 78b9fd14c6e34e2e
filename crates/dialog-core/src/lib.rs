//! # sipline-dialog-core
//!
//! The dialog layer of the sipline SIP stack (RFC 3261 §12) and the surface
//! applications program against.
//!
//! A [`DialogManager`] owns a transaction manager, keeps the dialog table
//! and reports everything to one [`SipListener`]:
//!
//! - dialogs are created from 1xx/2xx with a to-tag, one per tag, and from
//!   a NOTIFY answering a pending SUBSCRIBE
//! - requests within a dialog are built from its route set, CSeq and remote
//!   target, and received ones are checked against the remote CSeq
//! - the ACK for a 2xx is sent and cached by the dialog, and a 2xx to
//!   INVITE is retransmitted until its ACK arrives
//! - CANCEL and requests for unknown dialogs are answered automatically
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use sipline_dialog_core::prelude::*;
//! use sipline_sip_core::prelude::*;
//!
//! struct Answer(DialogManager);
//!
//! #[async_trait]
//! impl SipListener for Answer {
//!     async fn process_request(&self, event: RequestEvent) {
//!         if let Some(key) = event.transaction_id {
//!             let ok = ResponseBuilder::from_request(&event.request, StatusCode::OK).build();
//!             let _ = self.0.send_response(&key, ok).await;
//!         }
//!     }
//!
//!     async fn process_response(&self, _event: ResponseEvent) {}
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DialogManagerConfig::new("127.0.0.1:5060".parse()?);
//! let manager = DialogManager::bind_udp(config).await?;
//! manager.start(Arc::new(Answer(manager.clone())))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dialog;
pub mod errors;
pub mod listener;
pub mod manager;

pub use config::DialogManagerConfig;
pub use dialog::{Dialog, DialogId, DialogState};
pub use errors::{DialogError, DialogResult};
pub use listener::{
    DialogTerminatedEvent, IoExceptionEvent, ProtocolErrorEvent, RequestEvent, ResponseEvent, SipListener,
    TerminationReason, Timeout, TimeoutEvent, TransactionTerminatedEvent,
};
pub use manager::DialogManager;

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        Dialog, DialogError, DialogId, DialogManager, DialogManagerConfig, DialogResult, DialogState,
        DialogTerminatedEvent, IoExceptionEvent, ProtocolErrorEvent, RequestEvent, ResponseEvent, SipListener,
        TerminationReason, Timeout, TimeoutEvent, TransactionTerminatedEvent,
    };
    pub use sipline_transaction_core::TransactionKey;
}
