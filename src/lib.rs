mod config;
mod conn;
mod db;
mod handlers;
mod http;
mod mailbox;
mod messages;
mod net;

pub use config::{Config, NodeSettings, TransportErrorPolicy};
pub use messages::{RingMessage, MESSAGE_SIZE};

use anyhow::{anyhow, Context, Result};
use conn::Connection;
use db::Store;
use handlers::handle_ring_message;
use mailbox::ReplyMailbox;
use sha2::{Digest, Sha256};
use std::{
    fmt, io,
    net::{SocketAddr, SocketAddrV4},
};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, error, info, warn};

// generous upper bound for one datagram; ring messages are MESSAGE_SIZE bytes
const DATAGRAM_CAPACITY: usize = 1500;

/// Identity of a ring member: its position on the ring and where to reach it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct NodeInfo {
    pub id: u16,
    pub addr: SocketAddrV4,
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}@{}", self.id, self.addr)
    }
}

/// True if `hash` lies in the circular interval `(pred_id, self_id]`.
pub fn owns(hash: u16, self_id: u16, pred_id: u16) -> bool {
    if pred_id < self_id {
        hash > pred_id && hash <= self_id
    } else {
        // wraps past 0xffff
        hash > pred_id || hash <= self_id
    }
}

/// Position of a key on the ring: the first two bytes of its SHA-256 digest.
pub fn pseudo_hash(key: &[u8]) -> u16 {
    let digest = Sha256::digest(key);
    u16::from_be_bytes([digest[0], digest[1]])
}

/// This node's view of the ring. Fixed for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ring {
    pub me: NodeInfo,
    pub pred_id: u16,
    pub successor: NodeInfo,
}

impl Ring {
    pub fn owns(&self, hash: u16) -> bool {
        owns(hash, self.me.id, self.pred_id)
    }

    pub fn successor_owns(&self, hash: u16) -> bool {
        owns(hash, self.successor.id, self.me.id)
    }
}

/// Everything request routing and ring handling read or mutate.
#[derive(Debug)]
pub struct NodeState {
    pub ring: Ring,
    pub store: Store<String, Vec<u8>>,
    pub mailbox: ReplyMailbox,
}

impl NodeState {
    pub fn new(ring: Ring) -> Self {
        Self {
            ring,
            store: Store::with_static_resources(),
            mailbox: ReplyMailbox::new(),
        }
    }
}

/// A ring node serving one HTTP client at a time.
///
/// The listener is only polled while no client is connected; the UDP socket
/// is polled all the time.
pub struct Node {
    listener: TcpListener,
    udp: UdpSocket,
    client: Option<Connection<TcpStream>>,
    state: NodeState,
    buffer_size: usize,
    transport_errors: TransportErrorPolicy,
}

impl Node {
    pub async fn bind(settings: NodeSettings) -> Result<Self> {
        let (listener, udp) = net::bind(settings.bind).await?;

        let SocketAddr::V4(bound) = listener.local_addr()? else {
            return Err(anyhow!("listener is not bound to an IPv4 address"));
        };
        let me = NodeInfo {
            id: settings.self_id,
            addr: bound,
        };
        let successor = settings.successor.unwrap_or(me);
        let ring = Ring {
            me,
            pred_id: settings.pred_id,
            successor,
        };

        info!("Node starting with:");
        info!("Self {}", ring.me);
        info!("Pred ID {:#06x}", ring.pred_id);
        info!("Succ {}", ring.successor);

        Ok(Self {
            listener,
            udp,
            client: None,
            state: NodeState::new(ring),
            buffer_size: settings.buffer_size,
            transport_errors: settings.transport_errors,
        })
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        self.state.ring.me.addr
    }

    pub fn ring(&self) -> &Ring {
        &self.state.ring
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut datagram = [0u8; DATAGRAM_CAPACITY];
        loop {
            // accept, read and recv_from are all cancel safe
            tokio::select! {
                accepted = self.listener.accept(), if self.client.is_none() => {
                    self.on_accept(accepted)?;
                }
                read = fill_client(&mut self.client), if self.client.is_some() => {
                    self.on_client_data(read).await?;
                }
                received = self.udp.recv_from(&mut datagram) => {
                    match received {
                        Ok((len, from)) => self.on_datagram(&datagram[..len], from).await,
                        Err(e) => warn!("UDP receive failed: {}", e),
                    }
                }
            }
        }
    }

    fn on_accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) -> Result<()> {
        match accepted {
            Ok((stream, peer)) => {
                info!("Accepted connection from {}", peer);
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Cannot disable Nagle for {}: {}", peer, e);
                }
                self.client = Some(Connection::new(stream, self.buffer_size));
                Ok(())
            }
            Err(e) => match self.transport_errors {
                TransportErrorPolicy::FailFast => Err(e).context("accept failed"),
                TransportErrorPolicy::CloseConnection => {
                    warn!("Accept failed: {}", e);
                    Ok(())
                }
            },
        }
    }

    async fn on_client_data(&mut self, read: io::Result<usize>) -> Result<()> {
        let Some(conn) = self.client.as_mut() else {
            return Ok(());
        };

        match read {
            Ok(0) => {
                debug!("Client closed the connection");
                self.close_client();
            }
            Ok(n) => {
                debug!(
                    "Received {} bytes from client, {} buffered",
                    n,
                    conn.buffer().len()
                );
                let batch = conn.drain(&mut self.state).await;
                debug!("Answered {} requests", batch.handled);
                for outbound in &batch.outbound {
                    net::send_ring_message(&self.udp, outbound).await;
                }
                if !batch.keep_open {
                    self.close_client();
                }
            }
            Err(e) => match self.transport_errors {
                TransportErrorPolicy::FailFast => {
                    error!("Receive from client failed: {}", e);
                    return Err(e).context("receive from client failed");
                }
                TransportErrorPolicy::CloseConnection => {
                    warn!("Receive from client failed, closing: {}", e);
                    self.close_client();
                }
            },
        }
        Ok(())
    }

    async fn on_datagram(&mut self, datagram: &[u8], from: SocketAddr) {
        let msg = match RingMessage::decode(datagram) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Dropping datagram from {}: {}", from, e);
                return;
            }
        };

        if let Some(outbound) = handle_ring_message(&mut self.state, msg, from) {
            net::send_ring_message(&self.udp, &outbound).await;
        }
    }

    fn close_client(&mut self) {
        if self.client.take().is_some() {
            info!("Connection closed, accepting again");
        }
    }
}

async fn fill_client(client: &mut Option<Connection<TcpStream>>) -> io::Result<usize> {
    match client {
        Some(conn) => conn.fill().await,
        None => std::future::pending().await,
    }
}
