/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Push/pull and request/reply sockets over TCP or Unix domain sockets.

use std::net::{IpAddr, Ipv4Addr};
#[cfg(unix)]
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::address::Endpoint;
use super::frame::{read_frame_of, write_frame, FRAME_PUSH, FRAME_REQUEST, FRAME_RESPONSE};
use crate::codec;
use crate::envelope::CommandPacket;
use crate::error::TransportError;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One established stream, split into read and write halves.
struct Connection {
    reader: BoxedReader,
    writer: BoxedWriter,
    local_ip: IpAddr,
}

impl Connection {
    async fn connect(endpoint: &Endpoint) -> Result<Self, TransportError> {
        match endpoint {
            Endpoint::Tcp(target) => {
                let stream = TcpStream::connect(target.as_str()).await.map_err(|e| {
                    TransportError::Io(format!("Failed to connect to {endpoint}: {e}"))
                })?;
                Ok(Self::from_tcp(stream))
            }
            #[cfg(unix)]
            Endpoint::Ipc(path) => {
                let stream = UnixStream::connect(path).await.map_err(|e| {
                    TransportError::Io(format!("Failed to connect to {endpoint}: {e}"))
                })?;
                Ok(Self::from_unix(stream))
            }
        }
    }

    fn from_tcp(stream: TcpStream) -> Self {
        let local_ip = stream
            .local_addr()
            .map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |addr| addr.ip());
        let (reader, writer) = stream.into_split();
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            local_ip,
        }
    }

    #[cfg(unix)]
    fn from_unix(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

/// A bound listening socket.
enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, PathBuf),
}

impl Listener {
    /// Binds `endpoint`, returning the listener and the endpoint it actually
    /// bound (a `tcp://host:0` request resolves to the assigned port).
    async fn bind(endpoint: &Endpoint) -> Result<(Self, Endpoint), TransportError> {
        match endpoint {
            Endpoint::Tcp(target) => {
                let listener = TcpListener::bind(target.as_str()).await.map_err(|e| {
                    TransportError::Io(format!("Failed to bind {endpoint}: {e}"))
                })?;
                let bound = listener
                    .local_addr()
                    .map(|addr| Endpoint::Tcp(addr.to_string()))
                    .unwrap_or_else(|_| endpoint.clone());
                Ok((Self::Tcp(listener), bound))
            }
            #[cfg(unix)]
            Endpoint::Ipc(path) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        TransportError::Io(format!(
                            "Failed to create socket directory {}: {e}",
                            parent.display()
                        ))
                    })?;
                }

                if path.exists() {
                    if UnixStream::connect(path).await.is_ok() {
                        return Err(TransportError::Io(format!(
                            "Another listener is already bound at {endpoint}"
                        )));
                    }
                    warn!("Removing stale socket: {}", path.display());
                    tokio::fs::remove_file(path).await.map_err(|e| {
                        TransportError::Io(format!(
                            "Failed to remove stale socket {}: {e}",
                            path.display()
                        ))
                    })?;
                }

                let listener = UnixListener::bind(path).map_err(|e| {
                    TransportError::Io(format!("Failed to bind {endpoint}: {e}"))
                })?;
                Ok((Self::Unix(listener, path.clone()), endpoint.clone()))
            }
        }
    }

    async fn accept(&self) -> std::io::Result<Connection> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Connection::from_tcp(stream))
            }
            #[cfg(unix)]
            Self::Unix(listener, _) => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Connection::from_unix(stream))
            }
        }
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        if let Self::Unix(_, path) = self {
            if let Err(e) = std::fs::remove_file(&*path) {
                debug!("Failed to remove socket file {}: {}", path.display(), e);
            }
        }
    }
}

/// Counters kept by a [`PullSocket`].
#[derive(Debug, Default)]
pub struct PullStats {
    /// Producer connections accepted.
    pub connections_accepted: AtomicUsize,
    /// Producer connections currently open.
    pub connections_active: AtomicUsize,
    /// Frames read and queued.
    pub frames_received: AtomicUsize,
    /// Connections dropped because of a framing error.
    pub protocol_errors: AtomicUsize,
}

impl PullStats {
    /// Get the number of producer connections accepted.
    #[must_use]
    pub fn connections_accepted(&self) -> usize {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    /// Get the number of producer connections currently open.
    #[must_use]
    pub fn connections_active(&self) -> usize {
        self.connections_active.load(Ordering::Relaxed)
    }

    /// Get the number of frames received.
    #[must_use]
    pub fn frames_received(&self) -> usize {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Get the number of connections dropped for framing errors.
    #[must_use]
    pub fn protocol_errors(&self) -> usize {
        self.protocol_errors.load(Ordering::Relaxed)
    }
}

/// The receiving end of the push/pull queue.
///
/// Binds an endpoint and accepts any number of producer connections. Every
/// push frame read from any of them is queued for [`recv`](Self::recv).
/// Delivery is at-most-once and unacknowledged: nothing is ever written back.
pub struct PullSocket {
    endpoint: Endpoint,
    frames: mpsc::Receiver<Vec<u8>>,
    stats: Arc<PullStats>,
    cancel_token: CancellationToken,
}

impl PullSocket {
    /// Binds the pull endpoint.
    ///
    /// `queue_capacity` bounds the number of frames read ahead of
    /// [`recv`](Self::recv); once it is full, producers are no longer read
    /// from and back-pressure reaches them through the socket.
    pub async fn bind(
        endpoint: &Endpoint,
        max_frame_size: usize,
        queue_capacity: usize,
    ) -> Result<Self, TransportError> {
        let (listener, bound) = Listener::bind(endpoint).await?;
        let (tx, frames) = mpsc::channel(queue_capacity.max(1));
        let stats = Arc::new(PullStats::default());
        let cancel_token = CancellationToken::new();

        info!("Pull endpoint bound at {}", bound);

        tokio::spawn(accept_loop(
            listener,
            tx,
            max_frame_size,
            Arc::clone(&stats),
            cancel_token.clone(),
        ));

        Ok(Self {
            endpoint: bound,
            frames,
            stats,
            cancel_token,
        })
    }

    /// The endpoint this socket is bound to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Transport counters.
    #[must_use]
    pub fn stats(&self) -> Arc<PullStats> {
        Arc::clone(&self.stats)
    }

    /// Waits for the next pushed frame.
    ///
    /// Returns `None` once the socket has been closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.frames.recv().await
    }

    /// Stops accepting producers and closes open producer connections.
    pub fn close(&mut self) {
        self.cancel_token.cancel();
        self.frames.close();
    }
}

impl Drop for PullSocket {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl std::fmt::Debug for PullSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullSocket")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

async fn accept_loop(
    listener: Listener,
    tx: mpsc::Sender<Vec<u8>>,
    max_frame_size: usize,
    stats: Arc<PullStats>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel_token.cancelled() => {
                debug!("Pull endpoint received shutdown signal");
                break;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok(connection) => {
                        stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                        stats.connections_active.fetch_add(1, Ordering::Relaxed);
                        let conn_id = stats.connections_accepted();
                        trace!("Accepted producer #{}", conn_id);

                        tokio::spawn(read_pushes(
                            connection,
                            conn_id,
                            tx.clone(),
                            max_frame_size,
                            Arc::clone(&stats),
                            cancel_token.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Failed to accept producer connection: {}", e);
                    }
                }
            }
        }
    }
}

async fn read_pushes(
    mut connection: Connection,
    conn_id: usize,
    tx: mpsc::Sender<Vec<u8>>,
    max_frame_size: usize,
    stats: Arc<PullStats>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel_token.cancelled() => break,

            frame = read_frame_of(&mut connection.reader, FRAME_PUSH, max_frame_size) => {
                match frame {
                    Ok(payload) => {
                        stats.frames_received.fetch_add(1, Ordering::Relaxed);
                        if tx.send(payload).await.is_err() {
                            debug!("Producer #{}: receive queue closed", conn_id);
                            break;
                        }
                    }
                    Err(TransportError::ConnectionClosed) => {
                        debug!("Producer #{} disconnected", conn_id);
                        break;
                    }
                    Err(e) => {
                        stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                        error!("Producer #{} dropped: {}", conn_id, e);
                        break;
                    }
                }
            }
        }
    }

    stats.connections_active.fetch_sub(1, Ordering::Relaxed);
}

/// The sending end of the push/pull queue.
pub struct PushSocket {
    connection: Connection,
}

impl PushSocket {
    /// Connects to a pull endpoint.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, TransportError> {
        Ok(Self {
            connection: Connection::connect(endpoint).await?,
        })
    }

    /// Encodes and pushes a command packet.
    pub async fn send(&mut self, packet: &CommandPacket) -> Result<(), TransportError> {
        let payload = codec::encode(packet)
            .map_err(|e| TransportError::Protocol(format!("Failed to encode packet: {e}")))?;
        self.send_raw(&payload).await
    }

    /// Pushes an already-encoded payload.
    pub async fn send_raw(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        write_frame(&mut self.connection.writer, FRAME_PUSH, payload).await
    }
}

/// The calling end of a request/reply exchange.
///
/// Exactly one request and one response per connection:
/// [`exchange`](Self::exchange) consumes the socket.
pub struct RequestSocket {
    connection: Connection,
    max_frame_size: usize,
}

impl RequestSocket {
    /// Opens a fresh connection to a reply endpoint.
    pub async fn connect(endpoint: &Endpoint, max_frame_size: usize) -> Result<Self, TransportError> {
        Ok(Self {
            connection: Connection::connect(endpoint).await?,
            max_frame_size,
        })
    }

    /// Local address of this connection as seen by the network.
    ///
    /// Unix domain sockets report the loopback address.
    #[must_use]
    pub const fn local_ip(&self) -> IpAddr {
        self.connection.local_ip
    }

    /// Sends one request and waits for its response. The connection is closed
    /// when this returns, whatever the outcome.
    pub async fn exchange(mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        write_frame(&mut self.connection.writer, FRAME_REQUEST, request).await?;
        read_frame_of(&mut self.connection.reader, FRAME_RESPONSE, self.max_frame_size).await
    }
}

/// The answering end of request/reply exchanges.
pub struct ReplySocket {
    listener: Listener,
    endpoint: Endpoint,
    max_frame_size: usize,
}

impl ReplySocket {
    /// Binds a reply endpoint.
    pub async fn bind(endpoint: &Endpoint, max_frame_size: usize) -> Result<Self, TransportError> {
        let (listener, bound) = Listener::bind(endpoint).await?;
        info!("Reply endpoint bound at {}", bound);
        Ok(Self {
            listener,
            endpoint: bound,
            max_frame_size,
        })
    }

    /// The endpoint this socket is bound to.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Waits for the next caller.
    pub async fn accept(&self) -> Result<ReplyExchange, TransportError> {
        let connection = self.listener.accept().await?;
        Ok(ReplyExchange {
            connection,
            max_frame_size: self.max_frame_size,
        })
    }
}

/// One accepted request/reply exchange.
pub struct ReplyExchange {
    connection: Connection,
    max_frame_size: usize,
}

impl ReplyExchange {
    /// Reads the request frame.
    pub async fn request(&mut self) -> Result<Vec<u8>, TransportError> {
        read_frame_of(&mut self.connection.reader, FRAME_REQUEST, self.max_frame_size).await
    }

    /// Writes the response frame and closes the connection.
    pub async fn reply(mut self, response: &[u8]) -> Result<(), TransportError> {
        write_frame(&mut self.connection.writer, FRAME_RESPONSE, response).await
    }
}
