mod collection;
mod header;
mod header_name;

pub use collection::Headers;
pub use header::{ExtensionHeader, Header, HeaderValue};
pub use header_name::HeaderName;
