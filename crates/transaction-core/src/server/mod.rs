//! Server transactions (RFC 3261 §17.2)

mod invite;
mod non_invite;

pub use invite::ServerInviteLogic;
pub use non_invite::ServerNonInviteLogic;
