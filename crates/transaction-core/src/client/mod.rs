//! Client transactions (RFC 3261 §17.1)

mod invite;
mod non_invite;

pub use invite::ClientInviteLogic;
pub use non_invite::ClientNonInviteLogic;
