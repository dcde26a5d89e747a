use std::{
    cell::RefCell,
    collections::VecDeque,
    net::SocketAddr,
    os::fd::{AsRawFd, RawFd},
    rc::{Rc, Weak},
};

use mio::{Interest, Registry, Token};
use tracing::debug;

use crate::{
    buffer::Buffer,
    error::{RpcFailure, TransportError},
    tcp::{
        sockopt::set_socket_buf_size,
        wire::{self, BodyStep, HeaderStep, IncomingMessage, WireHeader, HEADER_SIZE},
    },
};

/// Outcome slot shared between a `ClientRpc` and the `RpcHandle` returned to
/// the caller. `None` means still in flight.
type Outcome<B> = Rc<RefCell<Option<Result<B, RpcFailure>>>>;

/// Caller-facing handle to one in-flight (or completed) RPC. Poll with
/// [`take`](Self::take) from the same thread that drives the transport's
/// event loop; there is no blocking wait, matching the single-threaded
/// cooperative scheduling model.
pub struct RpcHandle<B: Buffer> {
    outcome: Outcome<B>,
}

impl<B: Buffer> RpcHandle<B> {
    pub fn is_ready(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Takes the result if the RPC has completed or failed. Returns `None`
    /// while still in flight; once `Some` has been returned, later calls
    /// return `None` (the result is consumed exactly once).
    pub fn take(&self) -> Option<Result<B, RpcFailure>> {
        self.outcome.borrow_mut().take()
    }
}

pub(crate) struct ClientRpc<B: Buffer> {
    nonce: u64,
    request: B,
    reply: B,
    sent: bool,
    bytes_left_to_send: Option<u32>,
    outcome: Outcome<B>,
}

/// Per-server-connection client state: the outbound queue, the in-flight
/// (awaiting-response) set, and the response reader. Correlation is by
/// nonce; responses may complete in any order.
pub struct ClientSession<B: Buffer> {
    addr: SocketAddr,
    token: Option<Token>,
    stream: Option<mio::net::TcpStream>,
    serial: u64,
    waiting_to_send: VecDeque<ClientRpc<B>>,
    waiting_for_response: VecDeque<ClientRpc<B>>,
    current: Option<ClientRpc<B>>,
    message: IncomingMessage,
    error_info: Option<String>,
    writable_armed: bool,
    queue_depth: usize,
    max_rpc_len: u32,
    socket_buf_size: Option<usize>,
}

impl<B: Buffer> ClientSession<B> {
    pub(crate) fn new(
        addr: SocketAddr,
        queue_depth: usize,
        max_rpc_len: u32,
        socket_buf_size: Option<usize>,
    ) -> Self {
        Self {
            addr,
            token: None,
            stream: None,
            serial: 1,
            waiting_to_send: VecDeque::new(),
            waiting_for_response: VecDeque::new(),
            current: None,
            message: IncomingMessage::new(),
            error_info: None,
            writable_armed: false,
            queue_depth,
            max_rpc_len,
            socket_buf_size,
        }
    }

    /// Connects the underlying socket if this is the first request on the
    /// session. Returns the newly allocated fd when a connection was just
    /// made, so the caller (the `Transport` that owns the shared `Poll`) can
    /// route future readiness events for it back to this session.
    fn ensure_connected(&mut self, registry: &Registry) -> Result<Option<RawFd>, TransportError> {
        if self.stream.is_some() {
            return Ok(None);
        }
        let mut stream = mio::net::TcpStream::connect(self.addr)
            .map_err(|source| TransportError::Connect { addr: self.addr, source })?;
        stream.set_nodelay(true)?;
        if let Some(size) = self.socket_buf_size {
            set_socket_buf_size(&stream, size);
        }
        let fd = stream.as_raw_fd();
        let token = Token(fd as usize);
        registry.register(&mut stream, token, Interest::READABLE)?;
        self.token = Some(token);
        self.stream = Some(stream);
        Ok(Some(fd))
    }

    /// Submits `request` and returns a handle that will resolve to the
    /// reply, plus the fd of a freshly-opened connection (if this call was
    /// the one that connected the socket) so the caller can route future
    /// readiness events to this session. Fails synchronously if the session
    /// is already unusable, the outbound queue is full, or the connection
    /// cannot be established.
    pub(crate) fn client_send(
        &mut self,
        registry: &Registry,
        request: B,
    ) -> Result<(RpcHandle<B>, Option<RawFd>), RpcFailure> {
        if let Some(err) = &self.error_info {
            return Err(RpcFailure::Io(err.clone()));
        }
        if self.waiting_to_send.len() >= self.queue_depth {
            return Err(RpcFailure::Io("outbound queue full".to_string()));
        }
        let new_fd = match self.ensure_connected(registry) {
            Ok(fd) => fd,
            Err(err) => {
                self.error_info = Some(err.to_string());
                return Err(err.to_rpc_failure());
            }
        };

        let nonce = self.serial;
        self.serial += 1;
        flux_utils::safe_assert!(
            !self.waiting_for_response.iter().any(|r| r.nonce == nonce),
            "nonce {nonce} already in flight on this session"
        );

        let outcome: Outcome<B> = Rc::new(RefCell::new(None));
        let rpc = ClientRpc {
            nonce,
            request,
            reply: B::default(),
            sent: false,
            bytes_left_to_send: None,
            outcome: Rc::clone(&outcome),
        };
        self.waiting_to_send.push_back(rpc);

        if let Err(err) = self.try_send_front(registry) {
            self.error_info = Some(err.to_string());
            return Err(err.to_rpc_failure());
        }

        Ok((RpcHandle { outcome }, new_fd))
    }

    /// Checks `SO_ERROR` on the underlying socket. A non-blocking `connect`
    /// that fails (e.g. `ECONNREFUSED`) only surfaces here, on the first
    /// writable readiness event after the attempt, rather than as a `connect`
    /// return value.
    fn check_connect_error(&mut self) -> Result<(), TransportError> {
        if let Some(err) = self.take_connect_error() {
            return Err(TransportError::Connect { addr: self.addr, source: err });
        }
        Ok(())
    }

    /// Drains `waiting_to_send` in order, moving each RPC to
    /// `waiting_for_response` once its final byte is written.
    pub(crate) fn try_send_front(&mut self, registry: &Registry) -> Result<(), TransportError> {
        self.check_connect_error()?;
        let Some(stream) = self.stream.as_mut() else { return Ok(()) };
        while let Some(front) = self.waiting_to_send.front_mut() {
            let header = WireHeader { nonce: front.nonce, len: front.request.size() as u32 };
            let total = HEADER_SIZE as u32 + front.request.size() as u32;
            let bytes_remaining = front.bytes_left_to_send.unwrap_or(total);
            let remaining = wire::send_message(stream, &header, &front.request, bytes_remaining)?;
            if remaining == 0 {
                let mut done = self.waiting_to_send.pop_front().expect("front present");
                done.sent = true;
                self.waiting_for_response.push_back(done);
            } else {
                front.bytes_left_to_send = Some(remaining);
                break;
            }
        }
        if self.waiting_to_send.is_empty() {
            self.disarm_writable(registry)?;
        } else {
            self.arm_writable(registry)?;
        }
        Ok(())
    }

    /// Drives the response reader, correlating each completed frame to its
    /// waiting RPC by nonce. A response whose nonce has no match is drained
    /// and discarded; the session stays usable.
    pub(crate) fn on_readable(&mut self) -> Result<(), TransportError> {
        loop {
            if !self.message.header_complete() {
                let step = {
                    let Some(stream) = self.stream.as_mut() else { return Ok(()) };
                    self.message.read_header(stream)?
                };
                match step {
                    HeaderStep::Incomplete => return Ok(()),
                    HeaderStep::Ready(header) => {
                        let found = self.find_rpc(header.nonce);
                        let discard = found.is_none();
                        if discard {
                            debug!(nonce = header.nonce, "client: unsolicited response nonce, discarding body");
                        }
                        self.current = found;
                        let violated = self.message.begin_body(header.len, self.max_rpc_len, discard);
                        if violated {
                            tracing::warn!(
                                nonce = header.nonce,
                                declared_len = header.len,
                                max_rpc_len = self.max_rpc_len,
                                "client: oversized response, draining then closing"
                            );
                        }
                    }
                }
            }

            let body = {
                let message = &mut self.message;
                let current = &mut self.current;
                let Some(stream) = self.stream.as_mut() else { return Ok(()) };
                let sink = current.as_mut().map(|rpc| &mut rpc.reply);
                message.read_body(stream, sink)?
            };

            match body {
                BodyStep::Incomplete => return Ok(()),
                BodyStep::Complete => {
                    let violated = self.message.is_violation();
                    let declared = self.message.declared_len();
                    self.message.reset();

                    if let Some(rpc) = self.current.take() {
                        let ClientRpc { reply, outcome, .. } = rpc;
                        if violated {
                            *outcome.borrow_mut() =
                                Some(Err(RpcFailure::Protocol { got: declared, max: self.max_rpc_len }));
                        } else {
                            *outcome.borrow_mut() = Some(Ok(reply));
                        }
                    }

                    if violated {
                        return Err(TransportError::ProtocolViolation { got: declared, max: self.max_rpc_len });
                    }
                    // loop again: another pipelined response may already be buffered
                }
            }
        }
    }

    fn find_rpc(&mut self, nonce: u64) -> Option<ClientRpc<B>> {
        let pos = self.waiting_for_response.iter().position(|r| r.nonce == nonce)?;
        self.waiting_for_response.remove(pos)
    }

    /// Detaches the RPC behind `handle` from whichever queue holds it. If it
    /// was mid-transmission (the front of `waiting_to_send`, partially
    /// written), the wire is desynchronized and the whole session must be
    /// torn down instead.
    pub(crate) fn cancel(&mut self, registry: &Registry, handle: &RpcHandle<B>) {
        if let Some(front) = self.waiting_to_send.front() {
            if Rc::ptr_eq(&front.outcome, &handle.outcome) {
                if front.bytes_left_to_send.is_some() {
                    self.fail_all(RpcFailure::Cancelled);
                    self.close_stream(registry);
                    return;
                }
                self.waiting_to_send.pop_front();
                return;
            }
        }
        if let Some(pos) = self
            .waiting_to_send
            .iter()
            .position(|r| Rc::ptr_eq(&r.outcome, &handle.outcome))
        {
            self.waiting_to_send.remove(pos);
            return;
        }
        if let Some(pos) = self
            .waiting_for_response
            .iter()
            .position(|r| Rc::ptr_eq(&r.outcome, &handle.outcome))
        {
            self.waiting_for_response.remove(pos);
        }
    }

    /// Fails every RPC on this session (both queues, plus the one currently
    /// being read, if any) and marks the session permanently unusable.
    pub(crate) fn fail_all(&mut self, failure: RpcFailure) {
        self.error_info.get_or_insert_with(|| failure.to_string());
        for rpc in self
            .waiting_to_send
            .drain(..)
            .chain(self.waiting_for_response.drain(..))
            .chain(self.current.take())
        {
            *rpc.outcome.borrow_mut() = Some(Err(failure.clone()));
        }
    }

    pub(crate) fn close_stream(&mut self, registry: &Registry) {
        if let Some(mut stream) = self.stream.take() {
            let _ = registry.deregister(&mut stream);
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn arm_writable(&mut self, registry: &Registry) -> Result<(), TransportError> {
        if !self.writable_armed {
            if let (Some(stream), Some(token)) = (self.stream.as_mut(), self.token) {
                registry.reregister(stream, token, Interest::READABLE | Interest::WRITABLE)?;
            }
            self.writable_armed = true;
        }
        Ok(())
    }

    fn disarm_writable(&mut self, registry: &Registry) -> Result<(), TransportError> {
        if self.writable_armed {
            if let (Some(stream), Some(token)) = (self.stream.as_mut(), self.token) {
                registry.reregister(stream, token, Interest::READABLE)?;
            }
            self.writable_armed = false;
        }
        Ok(())
    }

    fn take_connect_error(&self) -> Option<std::io::Error> {
        self.stream.as_ref().and_then(|s| s.take_error().ok().flatten())
    }
}

impl<B: Buffer> Drop for ClientSession<B> {
    fn drop(&mut self) {
        if self.stream.is_some() {
            self.fail_all(RpcFailure::Io("session dropped".to_string()));
        }
    }
}

/// Invoked the first time a session connects, so the `Transport` that owns
/// the shared `Poll` can learn which fd to route future readiness events
/// for this session to. The transport itself only ever sees a `Weak`
/// reference: a `ClientSession` is owned by the caller's handle, not by the
/// transport.
pub(crate) type OnConnect<B> = Rc<dyn Fn(RawFd, Weak<RefCell<ClientSession<B>>>)>;

/// Caller-owned, reference-counted handle to a `ClientSession`. Cloning
/// shares the same underlying session (and its connection); the last clone's
/// drop releases the connection (`ClientSession`'s `Drop` fails any RPCs
/// still queued).
pub struct ClientSessionHandle<B: Buffer> {
    pub(crate) session: Rc<RefCell<ClientSession<B>>>,
    pub(crate) registry: Registry,
    pub(crate) on_connect: OnConnect<B>,
}

impl<B: Buffer> ClientSessionHandle<B> {
    pub fn client_send(&self, request: B) -> Result<RpcHandle<B>, RpcFailure> {
        let (handle, new_fd) = self.session.borrow_mut().client_send(&self.registry, request)?;
        if let Some(fd) = new_fd {
            (self.on_connect)(fd, Rc::downgrade(&self.session));
        }
        Ok(handle)
    }

    pub fn cancel(&self, handle: &RpcHandle<B>) {
        self.session.borrow_mut().cancel(&self.registry, handle);
    }

    pub fn is_usable(&self) -> bool {
        self.session.borrow().error_info.is_none()
    }
}

impl<B: Buffer> Clone for ClientSessionHandle<B> {
    fn clone(&self) -> Self {
        Self {
            session: Rc::clone(&self.session),
            registry: self.registry.try_clone().expect("mio registry clone"),
            on_connect: Rc::clone(&self.on_connect),
        }
    }
}
