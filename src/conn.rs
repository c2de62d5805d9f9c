use crate::handlers::handle_request;
use crate::http::{parse_request, Parsed, Response, Status};
use crate::messages::Outbound;
use crate::NodeState;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Fixed-capacity receive buffer. Bytes `[0, end)` are received but not yet
/// consumed; nothing is ever written past the capacity.
#[derive(Debug)]
pub struct ConnectionBuffer {
    data: Box<[u8]>,
    end: usize,
}

impl ConnectionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    pub fn is_full(&self) -> bool {
        self.end == self.data.len()
    }

    pub fn filled(&self) -> &[u8] {
        &self.data[..self.end]
    }

    /// Free space to receive into.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    /// Marks `n` bytes of the spare space as received.
    pub fn commit(&mut self, n: usize) {
        self.end = (self.end + n).min(self.data.len());
    }

    /// Drops the first `consumed` bytes, moves the rest to the front and
    /// zeroes the freed tail.
    pub fn discard(&mut self, consumed: usize) {
        let consumed = consumed.min(self.end);
        self.data.copy_within(consumed..self.end, 0);
        let keep = self.end - consumed;
        self.data[keep..self.end].fill(0);
        self.end = keep;
    }
}

/// What happened while draining the buffer.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Batch {
    /// Number of requests answered.
    pub handled: usize,
    /// Ring messages the answered requests want sent.
    pub outbound: Vec<Outbound>,
    pub keep_open: bool,
}

/// A client connection and the bytes it sent that have not been handled yet.
pub struct Connection<S> {
    stream: S,
    buffer: ConnectionBuffer,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, capacity: usize) -> Self {
        Self {
            stream,
            buffer: ConnectionBuffer::new(capacity),
        }
    }

    pub fn buffer(&self) -> &ConnectionBuffer {
        &self.buffer
    }

    /// Receives whatever is available into the buffer. `Ok(0)` means the peer
    /// closed its side. Cancel safe.
    pub async fn fill(&mut self) -> io::Result<usize> {
        let n = self.stream.read(self.buffer.spare_mut()).await?;
        self.buffer.commit(n);
        Ok(n)
    }

    /// Answers every complete request in the buffer, in order, then compacts
    /// the leftover bytes to the front.
    pub async fn drain(&mut self, state: &mut NodeState) -> Batch {
        let mut batch = Batch {
            keep_open: true,
            ..Batch::default()
        };
        let mut consumed = 0;

        let malformed = loop {
            let window = &self.buffer.filled()[consumed..];
            match parse_request(window) {
                Ok(Parsed::Complete { request, len }) => {
                    let routed = handle_request(state, &request);
                    let wants_close = request.wants_close();
                    consumed += len;
                    batch.handled += 1;
                    batch.outbound.extend(routed.lookup);

                    if let Err(e) = self.stream.write_all(&routed.response.to_bytes()).await {
                        warn!("Sending response failed: {}", e);
                        batch.keep_open = false;
                        return batch;
                    }
                    if wants_close {
                        debug!("Client asked to close the connection");
                        batch.keep_open = false;
                        return batch;
                    }
                }
                Ok(Parsed::Incomplete) => break None,
                Err(e) => break Some(e),
            }
        };

        if let Some(e) = malformed {
            warn!("Received malformed request, terminating connection: {}", e);
            self.reject().await;
            batch.keep_open = false;
            return batch;
        }

        self.buffer.discard(consumed);
        if !self.buffer.is_empty() {
            debug!("Keeping {} bytes of an unfinished request", self.buffer.len());
        }

        if self.buffer.is_full() {
            warn!(
                "Request exceeds the {} byte buffer, terminating connection",
                self.buffer.capacity()
            );
            self.reject().await;
            batch.keep_open = false;
        }
        batch
    }

    async fn reject(&mut self) {
        let bad_request = Response::new(Status::BadRequest).to_bytes();
        if let Err(e) = self.stream.write_all(&bad_request).await {
            warn!("Sending 400 failed: {}", e);
        }
    }
}
