use std::fmt;

use http_types::StatusCode;
use log::debug;
use serde::Serialize;

use crate::chunked::{ChunkSink, ChunkedWriter, Transliterator};
use crate::conversation::ConversationId;
use crate::server::encode::{encode_head, Framing};
use crate::{Error, Headers, Result, ServerOptions};

/// The chunked body writer handed out by [`Response::chunked`].
pub type BodyWriter<'a> = ChunkedWriter<Box<dyn ChunkSink + 'a>>;

/// How a response produces its body. Chosen at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One buffer sent with `content-length`.
    Raw,
    /// A chunked byte stream.
    Chunked,
    /// A JSON document streamed through the chunked encoder.
    Document,
}

/// An HTTP response being produced for one request.
///
/// Every response must be finished exactly once. Dropping an unfinished
/// response finishes it.
pub struct Response<'a> {
    status: StatusCode,
    reason: Option<String>,
    headers: Headers,
    mode: Option<OutputMode>,
    head_sent: bool,
    finished: bool,
    keep_alive: bool,
    conversation: ConversationId,
    writer: BodyWriter<'a>,
}

impl<'a> Response<'a> {
    pub(crate) fn new(
        conversation: ConversationId,
        sink: Box<dyn ChunkSink + 'a>,
        options: &ServerOptions,
        keep_alive: bool,
    ) -> Self {
        let mut writer = ChunkedWriter::new(sink, options.chunk_capacity);
        writer.set_trace(options.trace.chunked);
        Self {
            status: StatusCode::Ok,
            reason: None,
            headers: Headers::new(),
            mode: None,
            head_sent: false,
            finished: false,
            keep_alive,
            conversation,
            writer,
        }
    }

    /// The status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Set the status code, resetting any custom reason phrase.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
        self.reason = None;
    }

    /// Replace the canonical reason phrase.
    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = Some(reason.into());
    }

    /// Header fields to send.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to the header fields; changes after the head was sent are ignored.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Replace header `name`.
    pub fn insert_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Append header `name`, keeping earlier values.
    pub fn append_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.append(name, value);
    }

    /// The conversation this response belongs to.
    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    /// Whether the connection stays open after this response.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Close the connection after this response.
    pub fn set_close(&mut self) {
        self.keep_alive = false;
    }

    /// The chosen output mode.
    pub fn mode(&self) -> Option<OutputMode> {
        self.mode
    }

    /// Transform the body, e.g. to re-encode text. Applies to every output
    /// mode; a raw body is transformed before its length is taken.
    pub fn set_transliterator(&mut self, transliterator: Transliterator) {
        self.writer.set_transliterator(transliterator);
    }

    /// Send `body` in one piece with a `content-length`.
    pub fn send_bytes(&mut self, body: &[u8]) -> Result<()> {
        self.choose(OutputMode::Raw)?;
        let body = self.writer.transliterated(body);
        self.send_head(Framing::Length(body.len() as u64));
        if !body.is_empty() {
            self.writer.emit_raw(body);
        }
        Ok(())
    }

    /// Send `text` as `text/plain`.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        if !self.headers.contains("content-type") {
            self.headers.insert("content-type", "text/plain; charset=utf-8");
        }
        self.send_bytes(text.as_bytes())
    }

    /// Stream the body with chunked transfer encoding.
    pub fn chunked(&mut self) -> Result<&mut BodyWriter<'a>> {
        self.choose(OutputMode::Chunked)?;
        self.send_head(Framing::Chunked);
        Ok(&mut self.writer)
    }

    /// Print `value` as a JSON document.
    pub fn send_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.choose(OutputMode::Document)?;
        if !self.headers.contains("content-type") {
            self.headers.insert("content-type", "application/json");
        }
        self.send_head(Framing::Chunked);
        serde_json::to_writer(&mut self.writer, value)
            .map_err(|err| Error::Handler(err.to_string()))
    }

    /// Whether the status line has been written.
    pub fn head_sent(&self) -> bool {
        self.head_sent
    }

    /// Whether [`finish`](Self::finish) ran.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the transport failed while writing this response.
    pub fn transport_failed(&self) -> bool {
        self.writer.is_failed()
    }

    /// Complete the response and release its buffers.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::ResponseFinished);
        }
        match self.mode {
            None => {
                self.mode = Some(OutputMode::Raw);
                self.send_head(Framing::Length(0));
            }
            Some(OutputMode::Chunked) | Some(OutputMode::Document) => self.writer.finish(),
            Some(OutputMode::Raw) => {}
        }
        self.finished = true;
        self.writer.mark_finished();
        self.headers = Headers::new();
        Ok(())
    }

    /// Answer with `status` if nothing was sent yet, then finish.
    pub(crate) fn fail(&mut self, status: StatusCode) {
        if self.finished {
            return;
        }
        if !self.head_sent && self.mode.is_none() {
            self.set_status(status);
            let _ = self.send_text(status.canonical_reason());
        } else {
            debug!("{} raised after the head was sent; closing", status);
            self.keep_alive = false;
        }
        let _ = self.finish();
    }

    /// Send a `101 Switching Protocols` head with no body.
    pub(crate) fn switch_protocols(&mut self) -> Result<()> {
        self.choose(OutputMode::Raw)?;
        self.status = StatusCode::SwitchingProtocols;
        self.send_head(Framing::None);
        Ok(())
    }

    fn choose(&mut self, mode: OutputMode) -> Result<()> {
        if self.finished {
            return Err(Error::ResponseFinished);
        }
        if self.mode.is_some() {
            return Err(Error::OutputModeChosen);
        }
        self.mode = Some(mode);
        Ok(())
    }

    fn send_head(&mut self, framing: Framing) {
        let head = encode_head(
            self.status,
            self.reason.as_deref(),
            &self.headers,
            framing,
            self.keep_alive,
        );
        self.head_sent = true;
        self.writer.emit_raw(head);
    }
}

impl Drop for Response<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.finish();
        }
    }
}

impl fmt::Debug for Response<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("mode", &self.mode)
            .field("finished", &self.finished)
            .field("conversation", &self.conversation)
            .finish()
    }
}
