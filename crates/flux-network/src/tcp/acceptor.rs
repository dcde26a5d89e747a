use std::{io, os::fd::AsRawFd};

use mio::{Interest, Registry, Token};
use tracing::{debug, warn};

use crate::{buffer::Buffer, tcp::server::ServerSocket};

/// Accepts every connection currently queued on `listener`, admitting each
/// into `sockets` at the index matching its fd, until `accept` would block.
/// A single bad accept never takes the listener down with it.
pub(crate) fn accept_connections<B: Buffer>(
    listener: &mio::net::TcpListener,
    registry: &Registry,
    sockets: &mut Vec<Option<ServerSocket<B>>>,
    generations: &mut Vec<u32>,
) {
    loop {
        let (mut stream, peer_addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!(error = %e, "acceptor: accept failed, continuing");
                continue;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            warn!(?err, "acceptor: failed to set TCP_NODELAY, continuing");
        }

        let fd = stream.as_raw_fd();
        let idx = fd as usize;
        if idx >= sockets.len() {
            sockets.resize_with(idx + 1, || None);
            generations.resize(idx + 1, 0);
        }

        let token = Token(idx);
        if let Err(err) = registry.register(&mut stream, token, Interest::READABLE) {
            warn!(?err, fd, "acceptor: failed to register accepted connection");
            continue;
        }

        generations[idx] += 1;
        let generation = generations[idx];
        debug!(?peer_addr, fd, generation, "server: accepted connection");
        sockets[idx] = Some(ServerSocket::new(stream, fd, token, generation));
    }
}
