//! Fluent construction of requests and responses, plus the random
//! identifiers (branches, tags, Call-IDs) every outgoing message needs.

mod request;
mod response;

pub use request::RequestBuilder;
pub use response::ResponseBuilder;

use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::types::via::BRANCH_MAGIC_COOKIE;

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// RFC 3261 branch: magic cookie plus a random suffix
pub fn generate_branch() -> String {
    format!("{BRANCH_MAGIC_COOKIE}{}", random_token(16))
}

/// Random From/To tag
pub fn generate_tag() -> String {
    random_token(10)
}

/// Globally unique Call-ID, optionally qualified with a host
pub fn generate_call_id(host: Option<&str>) -> String {
    let id = Uuid::new_v4().simple().to_string();
    match host {
        Some(host) => format!("{id}@{host}"),
        None => id,
    }
}
