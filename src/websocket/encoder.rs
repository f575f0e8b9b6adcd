use super::frame::{Frame, Opcode};

/// Serializes frames into wire bytes.
///
/// Frames sent by a server are never masked; a mask is only set for peers
/// acting as the client side.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEncoder {
    mask: Option<[u8; 4]>,
}

impl FrameEncoder {
    /// An encoder producing unmasked frames.
    pub fn new() -> Self {
        Self { mask: None }
    }

    /// An encoder masking every payload with `mask`.
    pub fn masked(mask: [u8; 4]) -> Self {
        Self { mask: Some(mask) }
    }

    /// Encode `frame` as one contiguous buffer.
    pub fn encode(&self, frame: &Frame) -> Vec<u8> {
        self.encode_parts(frame.fin, frame.opcode, &frame.payload)
    }

    /// Encode a frame from its parts.
    pub fn encode_parts(&self, fin: bool, opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        let len = payload.len();
        let header_len = match len {
            0..=125 => 2,
            126..=0xffff => 4,
            _ => 10,
        } + if self.mask.is_some() { 4 } else { 0 };

        let mut out = Vec::with_capacity(header_len + len);
        out.push(if fin { 0x80 } else { 0 } | opcode.as_u8());
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        if len < 126 {
            out.push(mask_bit | len as u8);
        } else if len < 65536 {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }

        match self.mask {
            Some(mask) => {
                out.extend_from_slice(&mask);
                out.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
            }
            None => out.extend_from_slice(payload),
        }
        out
    }

    /// A close frame echoing `payload`.
    pub fn close(&self, payload: &[u8]) -> Vec<u8> {
        self.encode_parts(true, Opcode::Close, payload)
    }
}
