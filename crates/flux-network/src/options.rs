/// Caller-supplied, explicitly-constructed configuration for a [`crate::tcp::Transport`].
///
/// No global config parsing and no CLI: the caller builds one of these and
/// threads it through `Transport::bind`/`Transport::client_only`, in the
/// manner of `kudu-rs`'s `ConnectionOptions`. `Serialize`/`Deserialize` are
/// derived so an embedder's own config layer can still fold these fields
/// into a larger on-disk config if it wants to; this crate never reads one
/// itself.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct TransportOptions {
    /// Upper bound on a single RPC payload. A peer declaring a larger `len`
    /// in its header triggers a protocol violation and connection close.
    pub max_rpc_len: u32,

    /// Maximum number of requests a `ClientSession` will hold in
    /// `waiting_to_send` before `client_send` fails synchronously rather
    /// than growing the queue without bound. Mirrors `kudu-rs`'s
    /// `rpc_queue_len`.
    pub outbound_queue_depth: usize,

    /// `SO_SNDBUF`/`SO_RCVBUF` applied to every accepted and outbound
    /// socket. `None` leaves the kernel default in place.
    pub socket_buf_size: Option<usize>,

    /// Capacity of the `mio::Events` buffer drained per `poll_once` call.
    pub event_capacity: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_rpc_len: crate::tcp::DEFAULT_MAX_RPC_LEN,
            outbound_queue_depth: 256,
            socket_buf_size: None,
            event_capacity: 128,
        }
    }
}
