//! RFC 3261 §12 dialogs
//!
//! A [`Dialog`] is the peer-to-peer relationship set up by a dialog-creating
//! request (INVITE, SUBSCRIBE, REFER). It is identified by the Call-ID and
//! the two tags, and holds what is needed to build further requests within
//! it: CSeq counters, the route set and the remote target.

pub mod dialog_id;
pub mod dialog_impl;
pub mod dialog_state;
pub mod dialog_utils;

pub use dialog_id::DialogId;
pub use dialog_impl::Dialog;
pub use dialog_state::DialogState;
