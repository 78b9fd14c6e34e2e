//! # sipline-transaction-core
//!
//! The SIP transaction layer of RFC 3261 §17.
//!
//! A transaction is one request together with every response to it. This
//! crate runs the four transaction state machines (INVITE/non-INVITE,
//! client/server), each in its own task fed by a command channel, with the
//! retransmission and timeout timers of the RFC:
//!
//! | Timer | Purpose | Default |
//! |-------|---------|---------|
//! | A | INVITE retransmission (unreliable only) | T1, doubling |
//! | B | INVITE client timeout | 64*T1 |
//! | D | wait for response retransmissions | 32 s / 0 |
//! | E | non-INVITE retransmission (unreliable only) | T1, doubling up to T2 |
//! | F | non-INVITE client timeout | 64*T1 |
//! | G | INVITE final response retransmission | T1, doubling up to T2 |
//! | H | wait for ACK | 64*T1 |
//! | I | wait for ACK retransmissions | T4 / 0 |
//! | J | wait for request retransmissions | 64*T1 / 0 |
//! | K | wait for response retransmissions | T4 / 0 |
//!
//! The [`TransactionManager`] matches incoming messages to transactions and
//! reports to its user through a channel of [`TransactionEvent`]s.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sipline_sip_core::prelude::*;
//! use sipline_sip_transport::bind_udp;
//! use sipline_transaction_core::{TransactionConfig, TransactionEvent, TransactionManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (transport, transport_rx) = bind_udp("127.0.0.1:5060".parse()?).await?;
//! let (manager, mut events) =
//!     TransactionManager::new(Arc::new(transport), transport_rx, TransactionConfig::default());
//!
//! let options = RequestBuilder::new(Method::Options, Uri::sip("192.0.2.10"))
//!     .from(Address::new(Uri::sip("127.0.0.1").with_user("alice")).with_tag(generate_tag()))
//!     .to(Address::new(Uri::sip("192.0.2.10")))
//!     .call_id(generate_call_id(None))
//!     .cseq(1)
//!     .build();
//! let key = manager.send_request(options, "192.0.2.10:5060".parse()?).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let TransactionEvent::SuccessResponse { transaction_id, response } = event {
//!         assert_eq!(transaction_id, key);
//!         println!("{} {}", response.status.as_u16(), response.reason);
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod builders;
pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod server;
pub mod timer;
pub mod transaction;

pub use config::TransactionConfig;
pub use error::{Error, Result};
pub use manager::TransactionManager;
pub use timer::{TimerSettings, TimerType};
pub use transaction::{TransactionEvent, TransactionKey, TransactionKind, TransactionState};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        Error, Result, TimerSettings, TimerType, TransactionConfig, TransactionEvent, TransactionKey,
        TransactionKind, TransactionManager, TransactionState,
    };
}
