//! Embeddable HTTP/1.1 and WebSocket conversation engine.
//!
//! The engine runs inside a host's single-threaded event loop. It owns no
//! sockets and spawns nothing by itself: the host hands it transports and
//! readiness, and runs the work items it enqueues.
//!
//! - `server` decodes HTTP requests, and encodes HTTP responses.
//! - `websocket` decodes and encodes frames on upgraded conversations.
//! - `auth` and `router` decide who may call which service.
//! - `engine` ties them together per conversation, including the close
//!   protocol shared with worker subtasks.
//!
//! ```txt
//!            decode              route + auth
//!   bytes  ---------> request  ---------------> service
//!                                                  |
//!   bytes  <--------- response <-------------------+
//!            encode    (chunked, or Emit work from a subtask)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::net::TcpListener;
//! use std::sync::Arc;
//!
//! use reactor_h1::auth::AuthPipeline;
//! use reactor_h1::reactor::ChannelScheduler;
//! use reactor_h1::router::{HttpServiceRoute, ServiceRouter};
//! use reactor_h1::{Engine, Request, Response, ServerOptions};
//!
//! let options = ServerOptions::default();
//! let mut router = ServiceRouter::new();
//! router.register(HttpServiceRoute::new(
//!     "hello",
//!     "/hello/*",
//!     |req: &Request, res: &mut Response<'_>| res.send_text(&format!("hello {}", req.segments()[1])),
//! ));
//! let scheduler = ChannelScheduler::new(options.poll_timeout);
//! let auth = AuthPipeline::new(&options);
//! let mut engine = Engine::new(options, router, auth, Arc::new(scheduler.clone()));
//!
//! let listener = TcpListener::bind("127.0.0.1:8080")?;
//! let (stream, _) = listener.accept()?;
//! let id = engine.accept(stream);
//! while engine.is_open(id) {
//!     engine.on_readable(id);
//!     while let Some(work) = scheduler.try_work() {
//!         engine.dispatch(work);
//!     }
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_debug_implementations, nonstandard_style, rust_2018_idioms)]
#![warn(missing_docs, unreachable_pub)]

/// The maximum amount of headers parsed on the server.
pub const MAX_HEADERS: usize = 128;

/// The maximum length of the request line or of one header value.
pub const MAX_HEAD_LENGTH: usize = 8 * 1024;

pub use buffer::ByteAccumulator;
pub use engine::Engine;
pub use error::{Error, ParseError, ParseErrorKind, Result};
pub use headers::Headers;
pub use options::{ServerOptions, SessionPolicy, TraceOptions};
pub use request::Request;
pub use server::{BodyWriter, OutputMode, RequestParser, Response};

mod buffer;
mod engine;
mod error;
mod headers;
mod options;
mod request;

pub mod auth;
pub mod chunked;
pub mod conversation;
pub mod reactor;
pub mod router;
pub mod server;
pub mod websocket;
