//! WebSocket framing for upgraded conversations.
//!
//! The decoder accepts arbitrary reads and yields whole messages; the encoder
//! writes unmasked server frames. `Session` ties both to a [`MessageHandler`].

mod decoder;
mod encoder;
mod frame;
pub(crate) mod handshake;
mod session;

pub use decoder::FrameDecoder;
pub use encoder::FrameEncoder;
pub use frame::{Frame, Message, Opcode, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR, CLOSE_TOO_LARGE};
pub use handshake::{accept_key, WEBSOCKET_GUID};
pub use session::{MessageHandler, Outbox, Session};
