//! The conversation engine.
//!
//! [`Engine`] owns every conversation and is driven from the reactor thread:
//! the host calls [`Engine::on_readable`] when a transport has data and
//! [`Engine::dispatch`] for every [`Work`] item its scheduler delivers. After
//! each unit of work the close protocol is evaluated, so a conversation that
//! should close is released exactly once, after its last running subtask.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use http_types::StatusCode;
use log::{debug, error, trace};

use crate::auth::AuthPipeline;
use crate::conversation::{Conversation, ConversationId, ConversationState};
use crate::error::ParseError;
use crate::reactor::{write_all, DeferredSink, Scheduler, Transport, TransportSink, Work};
use crate::router::{Impersonator, RouteHandler, Service, ServiceRouter};
use crate::websocket::handshake::{self, HandshakeError};
use crate::websocket::{Frame, MessageHandler, Session};
use crate::{Error, Request, Response, Result, ServerOptions};

/// Drives HTTP and WebSocket conversations for one server.
pub struct Engine {
    options: Arc<ServerOptions>,
    router: Arc<ServiceRouter>,
    auth: Arc<AuthPipeline>,
    impersonator: Option<Arc<dyn Impersonator>>,
    scheduler: Arc<dyn Scheduler>,
    conversations: HashMap<ConversationId, Conversation>,
    next_id: u64,
    read_buf: Vec<u8>,
}

impl Engine {
    /// Create an engine routing with `router` and authenticating with `auth`.
    pub fn new(
        options: ServerOptions,
        router: ServiceRouter,
        auth: AuthPipeline,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            options: Arc::new(options),
            router: Arc::new(router),
            auth: Arc::new(auth),
            impersonator: None,
            scheduler,
            conversations: HashMap::new(),
            next_id: 0,
            read_buf: Vec::new(),
        }
    }

    /// Run impersonating routes through `impersonator`.
    pub fn with_impersonator(mut self, impersonator: Arc<dyn Impersonator>) -> Self {
        self.impersonator = Some(impersonator);
        self
    }

    /// The engine's configuration.
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Start a conversation on an accepted transport.
    pub fn accept(&mut self, transport: impl Transport + 'static) -> ConversationId {
        self.next_id += 1;
        let id = ConversationId::new(self.next_id);
        let conversation = Conversation::new(id, Box::new(transport), &self.options);
        self.conversations.insert(id, conversation);
        debug!("accepted conversation {}", id);
        id
    }

    /// Whether conversation `id` has not been closed yet.
    pub fn is_open(&self, id: ConversationId) -> bool {
        self.conversations.contains_key(&id)
    }

    /// The close-lifecycle state of conversation `id`.
    pub fn state(&self, id: ConversationId) -> Option<ConversationState> {
        self.conversations.get(&id).map(|conv| conv.state.load())
    }

    /// The negotiated WebSocket sub-protocol, once upgraded.
    pub fn websocket_protocol(&self, id: ConversationId) -> Option<&str> {
        self.conversations
            .get(&id)
            .and_then(|conv| conv.session.as_ref())
            .and_then(Session::protocol)
    }

    /// Number of open conversations.
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether no conversation is open.
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Read once from the transport of `id` and process what arrived.
    ///
    /// End of stream and read errors mark the conversation for closing.
    pub fn on_readable(&mut self, id: ConversationId) {
        let mut buf = std::mem::take(&mut self.read_buf);
        buf.resize(self.options.read_buffer_size.max(1), 0);

        let read = match self.conversations.get_mut(&id) {
            Some(conv) => conv.transport.read(&mut buf),
            None => return,
        };
        match read {
            Ok(0) => {
                debug!("conversation {} reached end of stream", id);
                self.mark_should_close(id);
            }
            Ok(n) => self.on_bytes(id, &buf[..n]),
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                error!("read on conversation {} failed: {}", id, err);
                self.mark_should_close(id);
            }
        }

        self.read_buf = buf;
        self.evaluate(id);
    }

    /// Process bytes the host read for `id` itself.
    pub fn on_bytes(&mut self, id: ConversationId, bytes: &[u8]) {
        let conv = match self.conversations.get_mut(&id) {
            Some(conv) => conv,
            None => return,
        };
        if conv.broken {
            return;
        }

        if conv.session.is_some() {
            self.feed_session(id, bytes);
        } else if conv.parser.is_upgraded() {
            conv.pending.extend_from_slice(bytes);
        } else {
            match conv.parser.process_fragment(bytes) {
                Ok(consumed) => {
                    if consumed < bytes.len() {
                        conv.pending.extend_from_slice(&bytes[consumed..]);
                    }
                }
                Err(err) => debug!("conversation {} sent a malformed request: {}", id, err),
            }
            self.drain(id);
        }
        self.evaluate(id);
    }

    /// Run one work item from the scheduler.
    pub fn dispatch(&mut self, work: Work) {
        if self.options.trace.conversation {
            trace!("dispatching {:?}", WorkName(&work));
        }
        match work {
            Work::Emit {
                conversation,
                bytes,
            } => {
                self.write(conversation, &bytes);
                self.evaluate(conversation);
            }
            Work::SubtaskFinished { conversation } => {
                if let Some(conv) = self.conversations.get_mut(&conversation) {
                    conv.in_flight = false;
                }
                self.drain(conversation);
                self.evaluate(conversation);
            }
            Work::ConsiderClose(id) => {
                if let Some(conv) = self.conversations.get(&id) {
                    if conv.state.mark_close_enqueued() {
                        self.scheduler.enqueue(Work::Close(id));
                    }
                }
            }
            Work::Close(id) => {
                if let Some(mut conv) = self.conversations.remove(&id) {
                    debug!(
                        "closing conversation {} after {} requests",
                        id, conv.request_count
                    );
                    conv.transport.close();
                }
            }
        }
    }

    /// Send a frame to the peer of an upgraded conversation.
    pub fn send_frame(&mut self, id: ConversationId, frame: &Frame) -> Result<()> {
        let conv = self
            .conversations
            .get_mut(&id)
            .ok_or(Error::WebSocket("no such conversation"))?;
        let bytes = conv
            .session
            .as_ref()
            .ok_or(Error::WebSocket("conversation is not upgraded"))?
            .encode(frame);
        write_all(&mut *conv.transport, &bytes).map_err(|err| {
            conv.broken = true;
            conv.state.mark_should_close();
            Error::from(err)
        })
    }

    /// Close `id` once nothing is running on it, e.g. after an idle timeout.
    pub fn request_close(&mut self, id: ConversationId) {
        self.mark_should_close(id);
        self.evaluate(id);
    }

    fn mark_should_close(&self, id: ConversationId) {
        if let Some(conv) = self.conversations.get(&id) {
            conv.state.mark_should_close();
        }
    }

    fn evaluate(&self, id: ConversationId) {
        let conv = match self.conversations.get(&id) {
            Some(conv) => conv,
            None => return,
        };
        if conv.state.evaluate(false) {
            if self.options.trace.conversation {
                trace!("conversation {} may close", id);
            }
            self.scheduler.enqueue(Work::ConsiderClose(id));
        }
    }

    fn write(&mut self, id: ConversationId, bytes: &[u8]) {
        let conv = match self.conversations.get_mut(&id) {
            Some(conv) if !conv.broken => conv,
            _ => return,
        };
        if let Err(err) = write_all(&mut *conv.transport, bytes) {
            error!("write on conversation {} failed: {}", id, err);
            conv.broken = true;
            conv.state.mark_should_close();
        }
    }

    fn feed_session(&mut self, id: ConversationId, bytes: &[u8]) {
        let conv = match self.conversations.get_mut(&id) {
            Some(conv) => conv,
            None => return,
        };
        let (out, closing) = match conv.session.as_mut() {
            Some(session) => (session.on_bytes(bytes), session.close_requested()),
            None => return,
        };
        if !out.is_empty() {
            self.write(id, &out);
        }
        if closing {
            self.mark_should_close(id);
        }
    }

    /// Serve queued requests in order until one is handed to a subtask.
    fn drain(&mut self, id: ConversationId) {
        loop {
            let conv = match self.conversations.get_mut(&id) {
                Some(conv) => conv,
                None => return,
            };
            if !conv.accepts_requests() {
                return;
            }
            match conv.parser.pop_request() {
                Some(req) => {
                    conv.request_count += 1;
                    conv.keep_alive = req.keep_alive();
                    if self.options.trace.conversation {
                        trace!(
                            "conversation {} request {}: {} {}",
                            id,
                            conv.request_count,
                            req.method(),
                            req.uri()
                        );
                    }
                    self.handle(id, req);
                }
                None => {
                    if let Some(err) = conv.parser.error() {
                        if !conv.error_answered {
                            conv.error_answered = true;
                            self.answer_parse_error(id, err);
                        }
                    }
                    return;
                }
            }
        }
    }

    fn answer_parse_error(&mut self, id: ConversationId, err: ParseError) {
        self.respond_inline(id, false, |res| res.fail(err.status()));
        self.mark_should_close(id);
    }

    fn handle(&mut self, id: ConversationId, mut req: Request) {
        // The parser stops after an upgrade request, so nothing can follow it.
        let keep_alive = req.keep_alive() && !req.is_websocket_upgrade();

        let route = match self.router.find(&req) {
            Some(route) => route,
            None => {
                debug!("conversation {}: no route for {}", id, req.path());
                self.respond_inline(id, keep_alive, |res| res.fail(StatusCode::NotFound));
                return;
            }
        };

        let auth = match self.auth.authenticate(route.auth_mode(), &req) {
            Ok(auth) => auth,
            Err(failure) => {
                debug!("conversation {}: {} refused: {}", id, route.name(), failure);
                let status = failure.status();
                let challenge = format!("Basic realm=\"{}\"", self.options.realm);
                self.respond_inline(id, keep_alive, |res| {
                    if status == StatusCode::Unauthorized {
                        res.insert_header("www-authenticate", challenge);
                    }
                    res.fail(status);
                });
                return;
            }
        };
        req.username = auth.username;
        req.auth_token = auth.token;
        let cookies = auth.set_cookies;

        let service = match route.handler() {
            RouteHandler::WebSocket { handler, protocols } => {
                self.upgrade(id, req, handler.clone(), protocols, cookies);
                return;
            }
            RouteHandler::Http(service) => service.clone(),
        };

        let impersonator = if route.impersonates() {
            match &self.impersonator {
                Some(impersonator) => Some(impersonator.clone()),
                None => {
                    error!("route {} impersonates but no impersonator is set", route.name());
                    self.respond_inline(id, keep_alive, |res| {
                        res.fail(StatusCode::InternalServerError)
                    });
                    return;
                }
            }
        } else {
            None
        };

        if route.runs_on_subtask() {
            self.serve_on_subtask(id, req, service, impersonator, cookies, keep_alive);
        } else {
            self.respond_inline(id, keep_alive, move |res| {
                for cookie in cookies {
                    res.append_header("set-cookie", cookie);
                }
                let served = panic::catch_unwind(AssertUnwindSafe(|| {
                    serve(&*service, impersonator.as_deref(), &req, &mut *res)
                }));
                if served.is_err() {
                    error!("service for {} panicked", req.path());
                    res.set_close();
                    res.fail(StatusCode::InternalServerError);
                }
            });
        }
    }

    fn serve_on_subtask(
        &mut self,
        id: ConversationId,
        req: Request,
        service: Arc<dyn Service>,
        impersonator: Option<Arc<dyn Impersonator>>,
        cookies: Vec<String>,
        keep_alive: bool,
    ) {
        let state = match self.conversations.get_mut(&id) {
            Some(conv) => {
                conv.in_flight = true;
                conv.state.subtask_started();
                conv.state.clone()
            }
            None => return,
        };
        let scheduler = self.scheduler.clone();
        let options = self.options.clone();

        self.scheduler.run_subtask(Box::new(move || {
            let sink = DeferredSink::new(id, scheduler.clone());
            let mut res = Response::new(id, Box::new(sink), &options, keep_alive);
            for cookie in cookies {
                res.append_header("set-cookie", cookie);
            }

            let served = panic::catch_unwind(AssertUnwindSafe(|| {
                serve(&*service, impersonator.as_deref(), &req, &mut res)
            }));
            if served.is_err() {
                error!("subtask serving {} on {} panicked", req.path(), id);
                res.set_close();
                res.fail(StatusCode::InternalServerError);
            }
            if !res.is_finished() {
                let _ = res.finish();
            }
            let keep = res.keep_alive();
            drop(res);

            if !keep {
                state.mark_should_close();
            }
            scheduler.enqueue(Work::SubtaskFinished { conversation: id });
            if state.evaluate(true) {
                scheduler.enqueue(Work::ConsiderClose(id));
            }
        }));
    }

    fn upgrade(
        &mut self,
        id: ConversationId,
        req: Request,
        handler: Arc<dyn MessageHandler>,
        protocols: &[String],
        cookies: Vec<String>,
    ) {
        let handshake = match handshake::negotiate(&req, protocols) {
            Ok(handshake) => handshake,
            Err(HandshakeError::NotUpgrade) => {
                let keep_alive = req.keep_alive() && !req.is_websocket_upgrade();
                self.respond_inline(id, keep_alive, |res| {
                    res.insert_header("upgrade", "websocket");
                    res.fail(StatusCode::UpgradeRequired);
                });
                return;
            }
            Err(err) => {
                debug!("conversation {} refused websocket handshake: {:?}", id, err);
                self.respond_inline(id, false, |res| {
                    if err == HandshakeError::Version {
                        res.insert_header("sec-websocket-version", "13");
                    }
                    res.fail(StatusCode::BadRequest);
                });
                return;
            }
        };

        let options = &self.options;
        let conv = match self.conversations.get_mut(&id) {
            Some(conv) => conv,
            None => return,
        };
        let mut res = Response::new(
            id,
            Box::new(TransportSink::new(&mut *conv.transport)),
            options,
            true,
        );
        res.insert_header("upgrade", "websocket");
        res.insert_header("connection", "Upgrade");
        res.insert_header("sec-websocket-accept", handshake.accept);
        if let Some(protocol) = &handshake.protocol {
            res.insert_header("sec-websocket-protocol", protocol.clone());
        }
        for cookie in cookies {
            res.append_header("set-cookie", cookie);
        }
        let switched = res.switch_protocols().and_then(|_| res.finish()).is_ok()
            && !res.transport_failed();
        drop(res);

        if !switched {
            conv.broken = true;
            conv.state.mark_should_close();
            return;
        }
        debug!(
            "conversation {} upgraded to websocket (protocol {:?})",
            id, handshake.protocol
        );
        conv.session = Some(Session::new(handler, handshake.protocol, options));
        let pending = std::mem::take(&mut conv.pending);
        if !pending.is_empty() {
            self.feed_session(id, &pending);
        }
    }

    /// Produce one response on the reactor thread, writing straight to the
    /// transport. The response is always finished.
    fn respond_inline<F>(&mut self, id: ConversationId, keep_alive: bool, produce: F)
    where
        F: FnOnce(&mut Response<'_>),
    {
        let options = &self.options;
        let conv = match self.conversations.get_mut(&id) {
            Some(conv) => conv,
            None => return,
        };
        if conv.broken {
            return;
        }
        let mut res = Response::new(
            id,
            Box::new(TransportSink::new(&mut *conv.transport)),
            options,
            keep_alive,
        );
        produce(&mut res);
        if !res.is_finished() {
            let _ = res.finish();
        }
        let failed = res.transport_failed();
        let keep = res.keep_alive() && !failed;
        drop(res);

        if failed {
            conv.broken = true;
        }
        if !keep {
            conv.state.mark_should_close();
        }
    }
}

/// Run `service`, impersonating the request's user if asked to.
fn serve(
    service: &dyn Service,
    impersonator: Option<&dyn Impersonator>,
    req: &Request,
    res: &mut Response<'_>,
) {
    let impersonated = match impersonator {
        Some(impersonator) => match req.username() {
            Some(username) => match impersonator.begin(username) {
                Ok(()) => Some((impersonator, username)),
                Err(err) => {
                    error!("impersonating {} failed: {}", username, err);
                    res.fail(StatusCode::InternalServerError);
                    return;
                }
            },
            None => {
                error!("cannot impersonate an anonymous request to {}", req.path());
                res.fail(StatusCode::InternalServerError);
                return;
            }
        },
        None => None,
    };

    let outcome = service.serve(req, res);
    if let Some((impersonator, username)) = impersonated {
        impersonator.end(username);
    }
    if let Err(err) = outcome {
        error!("service for {} failed: {}", req.path(), err);
        res.fail(StatusCode::InternalServerError);
    }
}

struct WorkName<'a>(&'a Work);

impl fmt::Debug for WorkName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Work::Emit {
                conversation,
                bytes,
            } => write!(f, "Emit({}, {} bytes)", conversation, bytes.len()),
            other => write!(f, "{:?}", other),
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.options)
            .field("router", &self.router)
            .field("auth", &self.auth)
            .field("conversations", &self.conversations.len())
            .finish()
    }
}
