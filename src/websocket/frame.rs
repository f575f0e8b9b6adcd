/// Frame opcodes defined by RFC 6455.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text.
    Text,
    /// Arbitrary bytes.
    Binary,
    /// Close handshake.
    Close,
    /// Keep-alive probe.
    Ping,
    /// Answer to a ping.
    Pong,
}

impl Opcode {
    /// Decode the low nibble of the first header byte.
    pub fn from_u8(value: u8) -> Option<Opcode> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    /// The wire value.
    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    /// Close, ping and pong.
    pub fn is_control(self) -> bool {
        self.as_u8() & 0x8 != 0
    }
}

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// The peer broke the framing rules.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// A frame exceeded the payload limit.
pub const CLOSE_TOO_LARGE: u16 = 1009;

/// One wire-level unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Whether this frame ends its message.
    pub fin: bool,
    /// Frame type.
    pub opcode: Opcode,
    /// Unmasked payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// A single final frame.
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode,
            payload: payload.into(),
        }
    }
}

/// One or more frames sharing a FIN-terminated payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    frames: Vec<Frame>,
}

impl Message {
    pub(crate) fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The opcode of the first frame.
    pub fn opcode(&self) -> Opcode {
        self.frames
            .first()
            .map_or(Opcode::Continuation, |f| f.opcode)
    }

    /// The frames making up this message, in arrival order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Take ownership of the frames.
    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    /// The concatenated payload.
    pub fn payload(&self) -> Vec<u8> {
        let len = self.frames.iter().map(|f| f.payload.len()).sum();
        let mut payload = Vec::with_capacity(len);
        for frame in &self.frames {
            payload.extend_from_slice(&frame.payload);
        }
        payload
    }

    /// The payload as text, for text messages.
    pub fn text(&self) -> Option<String> {
        match self.opcode() {
            Opcode::Text => String::from_utf8(self.payload()).ok(),
            _ => None,
        }
    }

    /// Whether this is a close message.
    pub fn is_close(&self) -> bool {
        self.opcode() == Opcode::Close
    }

    /// The status code carried by a close message.
    pub fn close_code(&self) -> Option<u16> {
        let first = self.frames.first()?;
        match (first.opcode, first.payload.as_slice()) {
            (Opcode::Close, [hi, lo, ..]) => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }
}
