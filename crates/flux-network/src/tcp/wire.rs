use std::io::{self, IoSlice, Read, Write};

use crate::{buffer::Buffer, error::TransportError};

/// Frame header size on the wire: `nonce(u64, LE) | len(u32, LE)`.
pub const HEADER_SIZE: usize = 12;

/// Default cap on a single RPC payload.
pub const DEFAULT_MAX_RPC_LEN: u32 = 1024 * 1024;

const STAGING_CHUNK: usize = 8 * 1024;

/// Fixed 12-byte frame prefix. `nonce` is chosen by the client and echoed
/// unchanged by the server; `len` is the byte length of the payload that
/// immediately follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub nonce: u64,
    pub len: u32,
}

impl WireHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..8].copy_from_slice(&self.nonce.to_le_bytes());
        buf[8..12].copy_from_slice(&self.len.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Self {
        let nonce = u64::from_le_bytes(buf[..8].try_into().expect("8 bytes"));
        let len = u32::from_le_bytes(buf[8..12].try_into().expect("4 bytes"));
        Self { nonce, len }
    }
}

pub enum HeaderStep {
    Incomplete,
    Ready(WireHeader),
}

pub enum BodyStep {
    Incomplete,
    Complete,
}

/// Incremental reader that reconstructs one frame from a non-blocking fd
/// across however many readiness events it takes.
///
/// Driving it is split into two phases because the sink for the body can
/// only be resolved once the header (and in particular the nonce) is known:
/// call [`read_header`](Self::read_header) until it returns `Ready`, resolve
/// where the payload goes, call [`begin_body`](Self::begin_body) once, then
/// call [`read_body`](Self::read_body) until it returns `Complete`. Progress
/// is checkpointed in `header_have`/`body_have` so a caller can return to the
/// dispatcher between any two calls and resume exactly where it left off.
pub struct IncomingMessage {
    header_buf: [u8; HEADER_SIZE],
    header_have: usize,
    declared_len: u32,
    message_length: u32,
    body_have: u32,
    discard: bool,
    violated: bool,
}

impl Default for IncomingMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl IncomingMessage {
    pub fn new() -> Self {
        Self {
            header_buf: [0; HEADER_SIZE],
            header_have: 0,
            declared_len: 0,
            message_length: 0,
            body_have: 0,
            discard: false,
            violated: false,
        }
    }

    pub fn header_complete(&self) -> bool {
        self.header_have == HEADER_SIZE
    }

    pub fn declared_len(&self) -> u32 {
        self.declared_len
    }

    pub fn is_violation(&self) -> bool {
        self.violated
    }

    /// Resets all counters so this reader can be reused for the next frame
    /// on the same connection.
    pub fn reset(&mut self) {
        self.header_have = 0;
        self.declared_len = 0;
        self.message_length = 0;
        self.body_have = 0;
        self.discard = false;
        self.violated = false;
    }

    /// Drives header reads until the 12-byte header is fully parsed or the
    /// socket has no more bytes ready right now.
    pub fn read_header<S: Read>(&mut self, stream: &mut S) -> Result<HeaderStep, TransportError> {
        while self.header_have < HEADER_SIZE {
            match stream.read(&mut self.header_buf[self.header_have..]) {
                Ok(0) => {
                    return if self.header_have == 0 {
                        Err(TransportError::PeerClosed)
                    } else {
                        Err(TransportError::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "peer closed mid-header",
                        )))
                    };
                }
                Ok(n) => self.header_have += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(HeaderStep::Incomplete);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        Ok(HeaderStep::Ready(WireHeader::from_bytes(&self.header_buf)))
    }

    /// Must be called exactly once, immediately after `read_header` returns
    /// `Ready`. `len` is the header's declared length; `discard` forces
    /// discard mode even when `len` is within bounds (e.g. an unsolicited
    /// response nonce). Returns whether `len` exceeds `max_rpc_len` — when it
    /// does, the body is still drained (capped at `max_rpc_len`) so the
    /// framing stays synchronized, but the connection must be closed once
    /// drained.
    pub fn begin_body(&mut self, len: u32, max_rpc_len: u32, discard: bool) -> bool {
        self.declared_len = len;
        self.violated = len > max_rpc_len;
        self.discard = discard || self.violated;
        self.message_length = len.min(max_rpc_len);
        self.body_have = 0;
        self.violated
    }

    /// Drives body reads, appending to `sink` unless discarding, until the
    /// full payload has been consumed or the socket would block.
    pub fn read_body<S: Read, B: Buffer>(
        &mut self,
        stream: &mut S,
        mut sink: Option<&mut B>,
    ) -> Result<BodyStep, TransportError> {
        let mut staging = [0u8; STAGING_CHUNK];
        while self.body_have < self.message_length {
            let want = (self.message_length - self.body_have).min(STAGING_CHUNK as u32) as usize;
            match stream.read(&mut staging[..want]) {
                Ok(0) => {
                    return Err(TransportError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed mid-body",
                    )));
                }
                Ok(n) => {
                    if !self.discard {
                        if let Some(buf) = sink.as_deref_mut() {
                            buf.append(&staging[..n]);
                        }
                    }
                    self.body_have += n as u32;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(BodyStep::Incomplete);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        Ok(BodyStep::Complete)
    }
}

/// Writes one RPC frame (header + payload), resuming from `bytes_remaining`.
///
/// On the first call for a frame, `bytes_remaining` must equal
/// `HEADER_SIZE + payload.size()`; on later calls it is whatever this
/// function last returned. A single vectored write amortizes syscall cost
/// across header and payload fragments; the returned count is 0 once the
/// whole frame has been written.
pub fn send_message<S: Write, B: Buffer>(
    stream: &mut S,
    header: &WireHeader,
    payload: &B,
    bytes_remaining: u32,
) -> Result<u32, TransportError> {
    let total = HEADER_SIZE as u32 + payload.size() as u32;
    let sent = (total - bytes_remaining) as usize;
    let header_bytes = header.to_bytes();

    let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(4);
    let mut skip_payload = 0usize;
    if sent < HEADER_SIZE {
        slices.push(IoSlice::new(&header_bytes[sent..]));
    } else {
        skip_payload = sent - HEADER_SIZE;
    }
    for chunk in payload.chunks() {
        if skip_payload >= chunk.len() {
            skip_payload -= chunk.len();
            continue;
        }
        slices.push(IoSlice::new(&chunk[skip_payload..]));
        skip_payload = 0;
    }

    if slices.is_empty() {
        return Ok(0);
    }

    match stream.write_vectored(&slices) {
        Ok(0) => Ok(bytes_remaining),
        Ok(n) => Ok(bytes_remaining.saturating_sub(n as u32)),
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(bytes_remaining),
        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(bytes_remaining),
        Err(e) => Err(TransportError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OwnedBuffer;

    #[test]
    fn header_round_trips() {
        let header = WireHeader { nonce: 0xdead_beef_0011_2233, len: 42 };
        let bytes = header.to_bytes();
        assert_eq!(WireHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn send_message_skips_already_sent_prefix() {
        // Simulate having already sent the full header plus 2 payload bytes.
        let header = WireHeader { nonce: 7, len: 5 };
        let payload = OwnedBuffer::from_vec(vec![1, 2, 3, 4, 5]);
        let total = HEADER_SIZE as u32 + 5;
        let mut sink = Vec::new();
        let remaining = send_message(&mut sink, &header, &payload, total - (HEADER_SIZE as u32 + 2))
            .unwrap();
        assert_eq!(remaining, 0);
        assert_eq!(sink, vec![3, 4, 5]);
    }
}
