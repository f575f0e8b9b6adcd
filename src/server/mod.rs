//! Process HTTP connections on the server.
//!
//! `decode` turns inbound bytes into requests, `encode` and `response` turn
//! responses back into bytes.

mod decode;
mod encode;
mod response;

pub use decode::RequestParser;
pub use response::{BodyWriter, OutputMode, Response};
