use std::{collections::VecDeque, os::fd::RawFd};

use mio::{Interest, Registry, Token};
use tracing::{debug, warn};

use crate::{
    buffer::Buffer,
    error::TransportError,
    tcp::wire::{self, BodyStep, HeaderStep, IncomingMessage, WireHeader, HEADER_SIZE},
};

/// Non-owning, generation-checked reference to a `ServerSocket` slot in the
/// transport's fd-indexed table. A `ServerRpc` carries one of these instead
/// of a raw back-pointer to its owning socket, which would otherwise form an
/// ownership cycle. `Transport::send_reply` resolves it against the live
/// table and is a no-op if the slot has since been recycled by a new
/// connection reusing the same fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketHandle {
    pub(crate) fd: RawFd,
    pub(crate) generation: u32,
}

/// A request handed to the upper layer by `Transport::server_recv`, and later
/// handed back via `Transport::send_reply`.
pub struct ServerRpc<B: Buffer> {
    pub(crate) socket: SocketHandle,
    pub(crate) nonce: u64,
    pub(crate) bytes_left_to_send: Option<u32>,
    request: B,
    reply: B,
}

impl<B: Buffer> ServerRpc<B> {
    pub fn request(&self) -> &B {
        &self.request
    }

    pub fn reply_mut(&mut self) -> &mut B {
        &mut self.reply
    }

    pub fn into_reply(self) -> B {
        self.reply
    }
}

struct PendingRequest<B: Buffer> {
    message: IncomingMessage,
    nonce: u64,
    payload: B,
}

impl<B: Buffer> PendingRequest<B> {
    fn new() -> Self {
        Self { message: IncomingMessage::new(), nonce: 0, payload: B::default() }
    }
}

/// Per-accepted-connection state: the request currently being received and
/// the queue of replies waiting to go out.
pub struct ServerSocket<B: Buffer> {
    stream: mio::net::TcpStream,
    fd: RawFd,
    token: Token,
    generation: u32,
    current_request: Option<PendingRequest<B>>,
    waiting_to_reply: VecDeque<ServerRpc<B>>,
    writable_armed: bool,
}

impl<B: Buffer> ServerSocket<B> {
    pub(crate) fn new(stream: mio::net::TcpStream, fd: RawFd, token: Token, generation: u32) -> Self {
        Self {
            stream,
            fd,
            token,
            generation,
            current_request: None,
            waiting_to_reply: VecDeque::new(),
            writable_armed: false,
        }
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }

    fn handle(&self) -> SocketHandle {
        SocketHandle { fd: self.fd, generation: self.generation }
    }

    /// Drives one step of receiving the in-progress request. Returns
    /// `Some(rpc)` once a full request has been framed, `None` if the socket
    /// has no more bytes ready right now. An oversized `len` is drained (to
    /// keep the wire synchronized) and then surfaced as an error — the
    /// caller must close the connection.
    pub(crate) fn on_readable(&mut self, max_rpc_len: u32) -> Result<Option<ServerRpc<B>>, TransportError> {
        if self.current_request.is_none() {
            self.current_request = Some(PendingRequest::new());
        }
        let stream = &mut self.stream;
        let pending = self.current_request.as_mut().expect("just inserted");

        if !pending.message.header_complete() {
            match pending.message.read_header(stream)? {
                HeaderStep::Incomplete => return Ok(None),
                HeaderStep::Ready(header) => {
                    pending.nonce = header.nonce;
                    let violated = pending.message.begin_body(header.len, max_rpc_len, false);
                    if violated {
                        warn!(
                            nonce = header.nonce,
                            declared_len = header.len,
                            max_rpc_len,
                            "server: rpc exceeds max length, draining then closing"
                        );
                    }
                }
            }
        }

        match pending.message.read_body(stream, Some(&mut pending.payload))? {
            BodyStep::Incomplete => Ok(None),
            BodyStep::Complete => {
                let finished = self.current_request.take().expect("present");
                if finished.message.is_violation() {
                    Err(TransportError::ProtocolViolation {
                        got: finished.message.declared_len(),
                        max: max_rpc_len,
                    })
                } else {
                    Ok(Some(ServerRpc {
                        socket: self.handle(),
                        nonce: finished.nonce,
                        bytes_left_to_send: None,
                        request: finished.payload,
                        reply: B::default(),
                    }))
                }
            }
        }
    }

    /// Queues (or immediately sends) the reply for `rpc`. Replies are
    /// emitted in the order `send_reply` is called on this connection.
    pub(crate) fn send_reply(&mut self, registry: &Registry, mut rpc: ServerRpc<B>) -> Result<(), TransportError> {
        if self.waiting_to_reply.is_empty() {
            let header = WireHeader { nonce: rpc.nonce, len: rpc.reply.size() as u32 };
            let total = HEADER_SIZE as u32 + rpc.reply.size() as u32;
            let remaining = wire::send_message(&mut self.stream, &header, &rpc.reply, total)?;
            if remaining == 0 {
                return Ok(());
            }
            rpc.bytes_left_to_send = Some(remaining);
            self.waiting_to_reply.push_back(rpc);
        } else {
            rpc.bytes_left_to_send = None;
            self.waiting_to_reply.push_back(rpc);
        }
        self.arm_writable(registry)
    }

    /// Drains `waiting_to_reply` until the socket would block or the queue
    /// empties.
    pub(crate) fn on_writable(&mut self, registry: &Registry) -> Result<(), TransportError> {
        while let Some(front) = self.waiting_to_reply.front_mut() {
            let header = WireHeader { nonce: front.nonce, len: front.reply.size() as u32 };
            let total = HEADER_SIZE as u32 + front.reply.size() as u32;
            let bytes_remaining = front.bytes_left_to_send.unwrap_or(total);
            let remaining = wire::send_message(&mut self.stream, &header, &front.reply, bytes_remaining)?;
            if remaining == 0 {
                self.waiting_to_reply.pop_front();
            } else {
                front.bytes_left_to_send = Some(remaining);
                break;
            }
        }
        if self.waiting_to_reply.is_empty() {
            self.disarm_writable(registry)?;
        }
        Ok(())
    }

    fn arm_writable(&mut self, registry: &Registry) -> Result<(), TransportError> {
        if !self.writable_armed {
            registry.reregister(&mut self.stream, self.token, Interest::READABLE | Interest::WRITABLE)?;
            self.writable_armed = true;
        }
        Ok(())
    }

    fn disarm_writable(&mut self, registry: &Registry) -> Result<(), TransportError> {
        if self.writable_armed {
            registry.reregister(&mut self.stream, self.token, Interest::READABLE)?;
            self.writable_armed = false;
        }
        Ok(())
    }

    pub(crate) fn close(&mut self, registry: &Registry) {
        debug!(fd = self.fd, "server: closing connection");
        let _ = registry.deregister(&mut self.stream);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
