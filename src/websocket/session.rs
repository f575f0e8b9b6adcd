use std::fmt;
use std::sync::Arc;

use log::{debug, trace};

use super::decoder::{FrameDecoder, PAYLOAD_TOO_LARGE};
use super::encoder::FrameEncoder;
use super::frame::{Frame, Message, Opcode, CLOSE_PROTOCOL_ERROR, CLOSE_TOO_LARGE};
use crate::{Error, ServerOptions};

/// Application callbacks for an upgraded conversation.
pub trait MessageHandler: Send + Sync + 'static {
    /// A complete data message arrived.
    fn on_message(&self, message: Message, outbox: &mut Outbox);

    /// The peer started the close handshake.
    fn on_close(&self, _code: Option<u16>) {}
}

impl<F> MessageHandler for F
where
    F: Fn(Message, &mut Outbox) + Send + Sync + 'static,
{
    fn on_message(&self, message: Message, outbox: &mut Outbox) {
        (self)(message, outbox)
    }
}

/// Frames queued by a handler, serialized in the order they were sent.
#[derive(Debug, Default)]
pub struct Outbox {
    encoder: FrameEncoder,
    bytes: Vec<u8>,
}

impl Outbox {
    pub(crate) fn new(encoder: FrameEncoder) -> Self {
        Self {
            encoder,
            bytes: Vec::new(),
        }
    }

    /// Queue a text message.
    pub fn send_text(&mut self, text: &str) {
        self.send(&Frame::new(Opcode::Text, text))
    }

    /// Queue a binary message.
    pub fn send_binary(&mut self, payload: &[u8]) {
        self.send(&Frame::new(Opcode::Binary, payload))
    }

    /// Queue any frame, e.g. one fragment of a larger message.
    pub fn send(&mut self, frame: &Frame) {
        self.bytes.extend(self.encoder.encode(frame));
    }

    /// Whether nothing has been queued.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }
}

/// WebSocket state of one upgraded conversation.
pub struct Session {
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    protocol: Option<String>,
    close_requested: bool,
    handler: Arc<dyn MessageHandler>,
    trace: bool,
}

impl Session {
    pub(crate) fn new(
        handler: Arc<dyn MessageHandler>,
        protocol: Option<String>,
        options: &ServerOptions,
    ) -> Self {
        let mut decoder = FrameDecoder::new(options.max_frame_payload);
        decoder.set_trace(options.trace.websocket);
        Self {
            decoder,
            encoder: FrameEncoder::new(),
            protocol,
            close_requested: false,
            handler,
            trace: options.trace.websocket,
        }
    }

    /// The negotiated sub-protocol.
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Whether a close frame has been sent back to the peer.
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Encode a frame for this session's peer.
    pub fn encode(&self, frame: &Frame) -> Vec<u8> {
        self.encoder.encode(frame)
    }

    /// Consume bytes read from the peer and return the bytes to write back.
    ///
    /// Pings are answered with pongs, close frames are echoed, and data
    /// messages go to the handler. A framing error answers with a close frame
    /// carrying 1002 or 1009. Once a close was sent, later input is ignored.
    pub fn on_bytes(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        if self.close_requested {
            return out;
        }

        let fed = self.decoder.feed(bytes);
        while let Some(message) = self.decoder.pop_message() {
            if self.close_requested {
                break;
            }
            self.dispatch(message, &mut out);
        }

        if let Err(err) = fed {
            if !self.close_requested {
                debug!("closing websocket session: {}", err);
                let code = match err {
                    Error::WebSocket(reason) if reason == PAYLOAD_TOO_LARGE => CLOSE_TOO_LARGE,
                    _ => CLOSE_PROTOCOL_ERROR,
                };
                out.extend(self.encoder.close(&code.to_be_bytes()));
                self.close_requested = true;
            }
        }
        out
    }

    fn dispatch(&mut self, message: Message, out: &mut Vec<u8>) {
        match message.opcode() {
            Opcode::Close => {
                let payload = message.payload();
                out.extend(self.encoder.close(&payload));
                self.close_requested = true;
                if self.trace {
                    trace!("echoed close {:?}", message.close_code());
                }
                self.handler.on_close(message.close_code());
            }
            Opcode::Ping => {
                out.extend(self.encoder.encode_parts(true, Opcode::Pong, &message.payload()));
            }
            Opcode::Pong => {
                if self.trace {
                    trace!("pong received");
                }
            }
            _ => {
                let mut outbox = Outbox::new(self.encoder);
                self.handler.on_message(message, &mut outbox);
                out.extend(outbox.take());
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("protocol", &self.protocol)
            .field("close_requested", &self.close_requested)
            .field("decoder", &self.decoder)
            .finish()
    }
}
