//! Configuration of the dialog manager and, through it, of the whole stack
//!
//! ```rust
//! use sipline_dialog_core::DialogManagerConfig;
//!
//! let config = DialogManagerConfig::from_toml_str(r#"
//!     local_address = "127.0.0.1:5060"
//!     reentrant_listener = true
//!     max_2xx_retransmissions = 4
//!
//!     [transaction.timers]
//!     t1_ms = 250
//! "#).unwrap();
//!
//! assert!(config.reentrant_listener);
//! assert_eq!(config.transaction.timers.t1.as_millis(), 250);
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sipline_sip_core::ParserConfig;
use sipline_transaction_core::config::duration_ms;
use sipline_transaction_core::TransactionConfig;

use crate::errors::{DialogError, DialogResult};

/// Configuration for a [`crate::DialogManager`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogManagerConfig {
    /// Address the transport binds to; also used for Contact headers
    pub local_address: SocketAddr,

    /// Added as User-Agent to requests that lack one
    pub user_agent: Option<String>,

    /// Larger messages are refused by the parser
    pub max_message_size: usize,

    /// Answer 2xx retransmissions with the cached ACK without reporting
    /// them to the listener
    pub retransmission_filter: bool,

    /// Keep TCP connections open for reuse after a message was sent
    pub cache_connections: bool,

    /// Deliver listener callbacks concurrently instead of one at a time
    pub reentrant_listener: bool,

    /// Send the ACK for a 2xx to INVITE without waiting for the application
    pub auto_ack_2xx: bool,

    /// Retransmissions of a 2xx to INVITE while waiting for its ACK
    pub max_2xx_retransmissions: u32,

    /// Default for [`crate::Dialog::terminate_on_bye`] of new dialogs
    pub terminate_on_bye: bool,

    /// How long a terminated dialog stays in the table
    #[serde(with = "duration_ms", rename = "dialog_linger_ms")]
    pub dialog_linger: Duration,

    pub transaction: TransactionConfig,
}

impl Default for DialogManagerConfig {
    fn default() -> Self {
        Self {
            local_address: SocketAddr::from(([0, 0, 0, 0], 5060)),
            user_agent: Some(format!("sipline/{}", env!("CARGO_PKG_VERSION"))),
            max_message_size: ParserConfig::default().max_message_size,
            retransmission_filter: true,
            cache_connections: true,
            reentrant_listener: false,
            auto_ack_2xx: true,
            max_2xx_retransmissions: 10,
            terminate_on_bye: true,
            dialog_linger: Duration::from_secs(32),
            transaction: TransactionConfig::default(),
        }
    }
}

impl DialogManagerConfig {
    pub fn new(local_address: SocketAddr) -> Self {
        Self {
            local_address,
            ..Default::default()
        }
    }

    /// Parses and validates a TOML document; missing keys keep their
    /// defaults
    pub fn from_toml_str(source: &str) -> DialogResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| DialogError::configuration(e.to_string()))?;
        config.validate().map_err(DialogError::Configuration)?;
        Ok(config)
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn without_user_agent(mut self) -> Self {
        self.user_agent = None;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_retransmission_filter(mut self, enabled: bool) -> Self {
        self.retransmission_filter = enabled;
        self
    }

    pub fn with_cache_connections(mut self, enabled: bool) -> Self {
        self.cache_connections = enabled;
        self
    }

    pub fn with_reentrant_listener(mut self, enabled: bool) -> Self {
        self.reentrant_listener = enabled;
        self
    }

    pub fn with_auto_ack_2xx(mut self, enabled: bool) -> Self {
        self.auto_ack_2xx = enabled;
        self
    }

    pub fn with_max_2xx_retransmissions(mut self, count: u32) -> Self {
        self.max_2xx_retransmissions = count;
        self
    }

    pub fn with_terminate_on_bye(mut self, enabled: bool) -> Self {
        self.terminate_on_bye = enabled;
        self
    }

    pub fn with_dialog_linger(mut self, linger: Duration) -> Self {
        self.dialog_linger = linger;
        self
    }

    pub fn with_transaction_config(mut self, transaction: TransactionConfig) -> Self {
        self.transaction = transaction;
        self
    }

    /// Parser settings for transports carrying this stack's traffic
    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig::default().with_max_message_size(self.max_message_size)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_message_size < 512 {
            return Err(format!(
                "max_message_size {} is below the 512 bytes any SIP message may need",
                self.max_message_size
            ));
        }
        if let Some(user_agent) = &self.user_agent {
            if user_agent.trim().is_empty() {
                return Err("user_agent must not be blank".to_string());
            }
        }
        self.transaction.validate()
    }
}
