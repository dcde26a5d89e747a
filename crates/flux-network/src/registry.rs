use std::marker::PhantomData;

use crate::{buffer::Buffer, error::TransportError, options::TransportOptions, tcp::Transport};

/// Explicit, non-global stand-in for a process-wide factory registry. A
/// `TransportRegistry` is constructed once by the program entry point and
/// handed a [`TransportOptions`]; it is the only coupling point between the
/// upper-layer factory and the TCP transport itself, which otherwise has no
/// knowledge of how it was selected.
pub struct TransportRegistry<B: Buffer = crate::buffer::OwnedBuffer> {
    options: TransportOptions,
    _payload: PhantomData<B>,
}

impl<B: Buffer> TransportRegistry<B> {
    pub fn new(options: TransportOptions) -> Self {
        Self { options, _payload: PhantomData }
    }

    /// Opens a server transport, binding and listening on the locator's
    /// `host`/`port`.
    pub fn open_server(&self, locator: &str) -> Result<Transport<B>, TransportError> {
        Transport::bind(locator, self.options)
    }

    /// Opens a client-only transport: no listen socket, ready to hand out
    /// sessions via `Transport::get_session`.
    pub fn open_client(&self) -> Result<Transport<B>, TransportError> {
        Transport::client_only(self.options)
    }
}
