//! Chunked transfer encoding for outgoing bodies.
//!
//! See https://tools.ietf.org/html/rfc7230#section-4.1

mod encoder;

pub use encoder::{ChunkSink, ChunkedWriter, Transliterator};
