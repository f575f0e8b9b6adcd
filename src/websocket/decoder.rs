use std::collections::VecDeque;

use log::trace;

use super::frame::{Frame, Message, Opcode};
use crate::buffer::ByteAccumulator;
use crate::{Error, Result};

const MAX_HEADER: usize = 14;

pub(crate) const PAYLOAD_TOO_LARGE: &str = "payload exceeds configured maximum";

/// Decodes WebSocket frames from an arbitrary sequence of reads.
///
/// Payload bytes are unmasked as they arrive and collected per frame, so memory
/// use is bounded by one frame rather than one message. Completed messages are
/// queued in arrival order.
#[derive(Debug)]
pub struct FrameDecoder {
    header: [u8; MAX_HEADER],
    header_fill: usize,
    header_need: usize,
    need_known: bool,
    in_payload: bool,
    fin: bool,
    opcode: Opcode,
    mask: Option<[u8; 4]>,
    payload_length: u64,
    payload_fill: u64,
    payload: ByteAccumulator,
    message: Message,
    message_len: u64,
    completed: VecDeque<Message>,
    max_payload: u64,
    trace: bool,
}

impl FrameDecoder {
    /// Create a decoder rejecting payloads larger than `max_payload`.
    pub fn new(max_payload: u64) -> Self {
        Self {
            header: [0; MAX_HEADER],
            header_fill: 0,
            header_need: 2,
            need_known: false,
            in_payload: false,
            fin: false,
            opcode: Opcode::Continuation,
            mask: None,
            payload_length: 0,
            payload_fill: 0,
            payload: ByteAccumulator::new(),
            message: Message::default(),
            message_len: 0,
            completed: VecDeque::new(),
            max_payload,
            trace: false,
        }
    }

    pub(crate) fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    /// Consume `bytes`, completing as many frames as they contain.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<()> {
        let mut pos = 0;
        while pos < bytes.len() {
            if !self.in_payload {
                let take = (self.header_need - self.header_fill).min(bytes.len() - pos);
                self.header[self.header_fill..self.header_fill + take]
                    .copy_from_slice(&bytes[pos..pos + take]);
                self.header_fill += take;
                pos += take;

                if self.header_fill == 2 && !self.need_known {
                    let extended = match self.header[1] & 0x7f {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };
                    let mask = if self.header[1] & 0x80 != 0 { 4 } else { 0 };
                    self.header_need = 2 + extended + mask;
                    self.need_known = true;
                }
                if self.need_known && self.header_fill == self.header_need {
                    self.start_payload()?;
                }
                continue;
            }

            let remaining = self.payload_length - self.payload_fill;
            let take = remaining.min((bytes.len() - pos) as u64) as usize;
            let chunk = &bytes[pos..pos + take];
            match self.mask {
                Some(mask) => {
                    let offset = self.payload_fill as usize;
                    for (i, byte) in chunk.iter().enumerate() {
                        self.payload.push(byte ^ mask[(offset + i) % 4]);
                    }
                }
                None => self.payload.append(chunk),
            }
            self.payload_fill += take as u64;
            pos += take;

            if self.payload_fill == self.payload_length {
                self.finish_frame()?;
            }
        }
        Ok(())
    }

    /// Take the oldest completed message.
    pub fn pop_message(&mut self) -> Option<Message> {
        self.completed.pop_front()
    }

    /// Whether a frame is partially decoded.
    pub fn is_mid_frame(&self) -> bool {
        self.header_fill > 0
    }

    fn start_payload(&mut self) -> Result<()> {
        let b0 = self.header[0];
        let b1 = self.header[1];
        if b0 & 0x70 != 0 {
            return Err(Error::WebSocket("reserved bits set without a negotiated extension"));
        }
        self.fin = b0 & 0x80 != 0;
        self.opcode = Opcode::from_u8(b0 & 0x0f).ok_or(Error::WebSocket("unknown opcode"))?;

        let (length, mut at) = match b1 & 0x7f {
            126 => (u16::from_be_bytes([self.header[2], self.header[3]]) as u64, 4),
            127 => {
                let mut ext = [0u8; 8];
                ext.copy_from_slice(&self.header[2..10]);
                (u64::from_be_bytes(ext), 10)
            }
            len => (len as u64, 2),
        };
        if length >> 63 != 0 {
            return Err(Error::WebSocket("payload length has its high bit set"));
        }
        if self.opcode.is_control() && (!self.fin || length > 125) {
            return Err(Error::WebSocket("fragmented or oversized control frame"));
        }
        if length > self.max_payload || self.message_len + length > self.max_payload {
            return Err(Error::WebSocket(PAYLOAD_TOO_LARGE));
        }

        self.mask = if b1 & 0x80 != 0 {
            let mut mask = [0u8; 4];
            mask.copy_from_slice(&self.header[at..at + 4]);
            at += 4;
            Some(mask)
        } else {
            None
        };
        debug_assert_eq!(at, self.header_need);

        if self.trace {
            trace!(
                "websocket frame {:?} fin={} len={} masked={}",
                self.opcode,
                self.fin,
                length,
                self.mask.is_some()
            );
        }

        self.payload_length = length;
        self.payload_fill = 0;
        self.in_payload = true;
        if length == 0 {
            self.finish_frame()?;
        }
        Ok(())
    }

    fn finish_frame(&mut self) -> Result<()> {
        let frame = Frame {
            fin: self.fin,
            opcode: self.opcode,
            payload: self.payload.take(),
        };
        self.reset_frame();

        if frame.opcode.is_control() {
            let mut message = Message::default();
            message.push(frame);
            self.completed.push_back(message);
            return Ok(());
        }

        match (frame.opcode, self.message.is_empty()) {
            (Opcode::Continuation, true) => {
                return Err(Error::WebSocket("continuation frame without a message"))
            }
            (Opcode::Text, false) | (Opcode::Binary, false) => {
                return Err(Error::WebSocket("new message before the previous one finished"))
            }
            _ => {}
        }

        let fin = frame.fin;
        self.message_len += frame.payload.len() as u64;
        self.message.push(frame);
        if fin {
            self.message_len = 0;
            self.completed.push_back(std::mem::take(&mut self.message));
        }
        Ok(())
    }

    fn reset_frame(&mut self) {
        self.header_fill = 0;
        self.header_need = 2;
        self.need_known = false;
        self.in_payload = false;
        self.mask = None;
        self.payload_length = 0;
        self.payload_fill = 0;
    }
}
