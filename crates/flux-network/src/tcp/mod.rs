//! mio-driven TCP transport: wire framing, per-connection queues, and the
//! fd-indexed dispatcher that ties them to one shared `mio::Poll`.

mod acceptor;
mod client;
mod server;
mod sockopt;
mod transport;
mod wire;

pub use client::{ClientSessionHandle, RpcHandle};
pub use server::{ServerRpc, SocketHandle};
pub use transport::Transport;
pub use wire::{WireHeader, DEFAULT_MAX_RPC_LEN, HEADER_SIZE};
