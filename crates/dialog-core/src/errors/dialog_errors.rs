use sipline_sip_core::StatusCode;
use thiserror::Error;

use crate::dialog::{DialogId, DialogState};

/// Result type for dialog operations
pub type DialogResult<T> = Result<T, DialogError>;

/// Errors raised by the dialog layer.
///
/// Timeouts are not errors; they reach the application through
/// [`crate::SipListener::process_timeout`].
#[derive(Error, Debug)]
pub enum DialogError {
    #[error("Dialog not found: {0}")]
    DialogNotFound(DialogId),

    /// An in-dialog request whose CSeq does not exceed the last one seen
    /// from the peer (RFC 3261 §12.2.2)
    #[error("CSeq out of order: received {received}, last seen {last}")]
    CSeqOutOfOrder { received: u32, last: u32 },

    /// The next local CSeq would reach 2^31
    #[error("Dialog {0} has used up its CSeq space")]
    CSeqExhausted(DialogId),

    #[error("Dialog {id} is {state}: {message}")]
    InvalidState {
        id: DialogId,
        state: DialogState,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No route to {0}")]
    Unroutable(String),

    #[error("Transaction error: {0}")]
    Transaction(#[from] sipline_transaction_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] sipline_sip_transport::Error),

    #[error("SIP error: {0}")]
    Sip(#[from] sipline_sip_core::Error),

    #[error("Dialog manager is not running")]
    NotRunning,
}

impl DialogError {
    pub fn protocol_error(message: impl Into<String>) -> Self {
        DialogError::Protocol(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        DialogError::Configuration(message.into())
    }

    /// Status of the response that rejects a request failing with this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            DialogError::DialogNotFound(_) => StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST,
            DialogError::Protocol(_) => StatusCode::BAD_REQUEST,
            // RFC 3261 §12.2.2 answers an out-of-order CSeq with 500
            _ => StatusCode::SERVER_INTERNAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let id = DialogId::new("call", "a", "b");
        assert_eq!(
            DialogError::CSeqOutOfOrder { received: 3, last: 4 }.status_code(),
            StatusCode::SERVER_INTERNAL_ERROR
        );
        assert_eq!(
            DialogError::DialogNotFound(id).status_code(),
            StatusCode::CALL_TRANSACTION_DOES_NOT_EXIST
        );
        assert_eq!(DialogError::protocol_error("bad").status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_transaction_errors_convert() {
        let err: DialogError = sipline_transaction_core::Error::ShutDown.into();
        assert!(matches!(err, DialogError::Transaction(_)));
        assert!(err.to_string().contains("shut down"));
    }
}
