use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    os::fd::RawFd,
    rc::{Rc, Weak},
    time::Duration,
};

use mio::{Events, Poll, Registry, Token};
use tracing::warn;

use crate::{
    buffer::Buffer,
    error::TransportError,
    locator::ServiceLocator,
    options::TransportOptions,
    tcp::{
        acceptor,
        client::{ClientSession, ClientSessionHandle},
        server::{ServerRpc, ServerSocket, SocketHandle},
    },
};

/// Sentinel token for the listen socket; real fds never reach `usize::MAX`.
const LISTENER_TOKEN: Token = Token(usize::MAX);

struct TransportInner<B: Buffer> {
    poll: Poll,
    events: Events,
    listener: Option<mio::net::TcpListener>,
    sockets: Vec<Option<ServerSocket<B>>>,
    generations: Vec<u32>,
    completed: VecDeque<ServerRpc<B>>,
    client_sessions: HashMap<RawFd, Weak<RefCell<ClientSession<B>>>>,
    options: TransportOptions,
    locator_string: String,
}

impl<B: Buffer> TransportInner<B> {
    fn poll_once(&mut self) -> Result<(), TransportError> {
        self.poll.poll(&mut self.events, Some(Duration::ZERO)).map_err(TransportError::Io)?;

        // Collect first: dispatch needs &mut self, which would otherwise
        // conflict with the borrow of self.events the iterator holds.
        let ready: Vec<(Token, bool, bool)> =
            self.events.iter().map(|e| (e.token(), e.is_readable(), e.is_writable())).collect();

        for (token, readable, writable) in ready {
            self.dispatch(token, readable, writable);
        }
        Ok(())
    }

    fn dispatch(&mut self, token: Token, readable: bool, writable: bool) {
        if token == LISTENER_TOKEN {
            if let Some(listener) = &self.listener {
                acceptor::accept_connections(
                    listener,
                    self.poll.registry(),
                    &mut self.sockets,
                    &mut self.generations,
                );
            }
            return;
        }

        let idx = token.0;
        if idx < self.sockets.len() && self.sockets[idx].is_some() {
            self.dispatch_server_socket(idx, readable, writable);
            return;
        }

        let fd = idx as RawFd;
        let Some(weak) = self.client_sessions.get(&fd).cloned() else { return };
        match weak.upgrade() {
            Some(session) => dispatch_client_session(&session, self.poll.registry(), readable, writable),
            None => {
                self.client_sessions.remove(&fd);
            }
        }
    }

    fn dispatch_server_socket(&mut self, idx: usize, readable: bool, writable: bool) {
        if readable {
            loop {
                let step = match self.sockets[idx].as_mut() {
                    Some(sock) => sock.on_readable(self.options.max_rpc_len),
                    None => return,
                };
                match step {
                    Ok(Some(rpc)) => {
                        self.completed.push_back(rpc);
                        continue;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        if let TransportError::ProtocolViolation { got, max } = err {
                            warn!(got, max, "server: closing connection after protocol violation");
                        }
                        close_server_socket(&mut self.sockets, idx, self.poll.registry());
                        return;
                    }
                }
            }
        }

        if writable {
            let result = match self.sockets[idx].as_mut() {
                Some(sock) => sock.on_writable(self.poll.registry()),
                None => return,
            };
            if result.is_err() {
                close_server_socket(&mut self.sockets, idx, self.poll.registry());
            }
        }
    }

    fn register_client_session(&mut self, fd: RawFd, session: Weak<RefCell<ClientSession<B>>>) {
        self.client_sessions.insert(fd, session);
    }

    fn send_reply(&mut self, rpc: ServerRpc<B>) -> Result<(), TransportError> {
        let SocketHandle { fd, generation } = rpc.socket;
        let idx = fd as usize;
        match self.sockets.get_mut(idx) {
            Some(Some(sock)) if sock.generation() == generation => {
                sock.send_reply(self.poll.registry(), rpc)
            }
            // Connection is gone (closed, or the slot was recycled by a new
            // accept): the reply has nowhere to go, so it is simply dropped.
            _ => Ok(()),
        }
    }
}

fn close_server_socket<B: Buffer>(
    sockets: &mut [Option<ServerSocket<B>>],
    idx: usize,
    registry: &Registry,
) {
    if let Some(mut sock) = sockets[idx].take() {
        sock.close(registry);
    }
}

fn dispatch_client_session<B: Buffer>(
    session: &Rc<RefCell<ClientSession<B>>>,
    registry: &Registry,
    readable: bool,
    writable: bool,
) {
    let mut session = session.borrow_mut();
    if writable {
        if let Err(err) = session.try_send_front(registry) {
            session.fail_all(err.to_rpc_failure());
            session.close_stream(registry);
            return;
        }
    }
    if readable {
        if let Err(err) = session.on_readable() {
            session.fail_all(err.to_rpc_failure());
            session.close_stream(registry);
        }
    }
}

/// Per-process, per-instance transport facade. Opens the listen socket (if
/// any), owns the fd-indexed `ServerSocket` table, and hands out
/// `ClientSessionHandle`s that share its `mio::Poll` via a cloned `Registry`.
///
/// Cheap to clone: all state lives behind one `Rc<RefCell<_>>`, matching how
/// callers are expected to hold onto a single `Transport` for the lifetime
/// of the process and drive it from one thread via [`poll_once`](Self::poll_once).
pub struct Transport<B: Buffer> {
    inner: Rc<RefCell<TransportInner<B>>>,
}

impl<B: Buffer> Clone for Transport<B> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<B: Buffer> Transport<B> {
    /// Binds and listens on the locator's `host`/`port`. The returned
    /// transport's service locator reflects the bound port, so a locator
    /// requesting an ephemeral port (`port=0`) comes back resolved to the
    /// one the kernel actually assigned.
    pub fn bind(locator: &str, options: TransportOptions) -> Result<Self, TransportError> {
        let parsed = ServiceLocator::parse(locator)?;
        let addr = parsed.socket_addr()?;

        let poll = Poll::new().map_err(TransportError::Io)?;
        let mut listener = mio::net::TcpListener::bind(addr).map_err(TransportError::Io)?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, mio::Interest::READABLE)
            .map_err(TransportError::Io)?;

        let bound_addr = listener.local_addr().map_err(TransportError::Io)?;
        let locator_string = ServiceLocator {
            protocol: parsed.protocol,
            host: Some(bound_addr.ip().to_string()),
            port: Some(bound_addr.port()),
        }
        .to_string();

        Ok(Self {
            inner: Rc::new(RefCell::new(TransportInner {
                events: Events::with_capacity(options.event_capacity),
                poll,
                listener: Some(listener),
                sockets: Vec::new(),
                generations: Vec::new(),
                completed: VecDeque::new(),
                client_sessions: HashMap::new(),
                options,
                locator_string,
            })),
        })
    }

    /// Opens a client-only transport: no listen socket, ready to hand out
    /// sessions via [`get_session`](Self::get_session).
    pub fn client_only(options: TransportOptions) -> Result<Self, TransportError> {
        let poll = Poll::new().map_err(TransportError::Io)?;
        Ok(Self {
            inner: Rc::new(RefCell::new(TransportInner {
                events: Events::with_capacity(options.event_capacity),
                poll,
                listener: None,
                sockets: Vec::new(),
                generations: Vec::new(),
                completed: VecDeque::new(),
                client_sessions: HashMap::new(),
                options,
                locator_string: String::new(),
            })),
        })
    }

    pub fn get_service_locator(&self) -> String {
        self.inner.borrow().locator_string.clone()
    }

    /// Returns a handle to a `ClientSession` for `locator`. The underlying
    /// socket is not opened here; it is opened lazily by the session's first
    /// `client_send`.
    pub fn get_session(&self, locator: &str) -> Result<ClientSessionHandle<B>, TransportError> {
        let parsed = ServiceLocator::parse(locator)?;
        let addr = parsed.socket_addr()?;

        let (registry, queue_depth, max_rpc_len, socket_buf_size) = {
            let inner = self.inner.borrow();
            (
                inner.poll.registry().try_clone().map_err(TransportError::Io)?,
                inner.options.outbound_queue_depth,
                inner.options.max_rpc_len,
                inner.options.socket_buf_size,
            )
        };

        let session =
            Rc::new(RefCell::new(ClientSession::new(addr, queue_depth, max_rpc_len, socket_buf_size)));

        let weak_transport = Rc::downgrade(&self.inner);
        let on_connect = Rc::new(move |fd: RawFd, session: Weak<RefCell<ClientSession<B>>>| {
            if let Some(inner) = weak_transport.upgrade() {
                inner.borrow_mut().register_client_session(fd, session);
            }
        });

        Ok(ClientSessionHandle { session, registry, on_connect })
    }

    /// Polls the shared `mio::Poll` once (non-blocking) and dispatches every
    /// ready event to the acceptor, a `ServerSocket`, or a `ClientSession`.
    /// This is the single entry point the caller drives from its own event
    /// loop.
    pub fn poll_once(&self) -> Result<(), TransportError> {
        self.inner.borrow_mut().poll_once()
    }

    /// Returns the next completed server-side request, if one is ready.
    /// Fails with `UnrecoverableTransport` if this transport has no listen
    /// socket.
    pub fn server_recv(&self) -> Result<Option<ServerRpc<B>>, TransportError> {
        let mut inner = self.inner.borrow_mut();
        if inner.listener.is_none() {
            return Err(TransportError::UnrecoverableTransport);
        }
        Ok(inner.completed.pop_front())
    }

    /// Queues (or immediately sends) the reply to a request previously
    /// returned by `server_recv`. A no-op if the owning connection has since
    /// closed.
    pub fn send_reply(&self, rpc: ServerRpc<B>) -> Result<(), TransportError> {
        self.inner.borrow_mut().send_reply(rpc)
    }

    /// No-op for this transport: kernel TCP has no concept of pre-registered
    /// memory regions (unlike e.g. an RDMA transport). Present so callers
    /// written against a memory-registering transport still link unchanged.
    pub fn register_memory(&self, _base: usize, _bytes: usize) {}
}
