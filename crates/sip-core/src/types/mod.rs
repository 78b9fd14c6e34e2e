//! SIP message object model

pub mod address;
pub mod cseq;
pub mod headers;
pub mod media_type;
pub mod method;
pub mod multipart;
pub mod param;
pub mod sip_message;
pub mod sip_request;
pub mod sip_response;
pub mod status;
pub mod uri;
pub mod via;

pub use address::Address;
pub use cseq::CSeq;
pub use headers::{ExtensionHeader, Header, HeaderName, HeaderValue, Headers};
pub use media_type::MediaType;
pub use method::Method;
pub use multipart::{MimePart, MultipartBody};
pub use param::Param;
pub use sip_message::{Message, SipMessage};
pub use sip_request::Request;
pub use sip_response::Response;
pub use status::StatusCode;
pub use uri::{Scheme, Uri};
pub use via::{Via, BRANCH_MAGIC_COOKIE};
