use crate::NodeInfo;
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::net::{SocketAddr, SocketAddrV4, ToSocketAddrs};
use tracing::warn;

/// A node of a ring-structured key-value store
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Host this node binds to and advertises to the ring
    pub host: String,

    /// Port for both HTTP (TCP) and ring messages (UDP)
    pub port: u16,

    /// Id of this node on the ring
    #[arg(default_value = "0")]
    pub id: u16,

    /// Id of the predecessor, defaults to our own id. Anything else needs a
    /// successor address
    #[arg(long, env = "PRED_ID")]
    pub pred_id: Option<u16>,

    /// Id of the successor, defaults to our own id
    #[arg(long, env = "SUCC_ID")]
    pub succ_id: Option<u16>,

    /// Host of the successor
    #[arg(long, env = "SUCC_IP")]
    pub succ_ip: Option<String>,

    /// Port of the successor
    #[arg(long, env = "SUCC_PORT")]
    pub succ_port: Option<u16>,

    /// Capacity of the per-connection receive buffer in bytes
    #[arg(long, default_value = "8192")]
    pub buffer_size: usize,

    /// Close the affected connection on receive/accept errors instead of exiting
    #[arg(long)]
    pub tolerate_transport_errors: bool,
}

/// What to do when receiving from the client or accepting fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorPolicy {
    // stop the node
    FailFast,
    CloseConnection,
}

/// Resolved startup parameters of a node.
#[derive(Clone, Debug)]
pub struct NodeSettings {
    pub bind: SocketAddrV4,
    pub self_id: u16,
    pub pred_id: u16,
    /// `None` makes the node its own successor.
    pub successor: Option<NodeInfo>,
    pub buffer_size: usize,
    pub transport_errors: TransportErrorPolicy,
}

impl NodeSettings {
    /// Settings for a node alone on the ring.
    pub fn standalone(bind: SocketAddrV4, id: u16) -> Self {
        Self {
            bind,
            self_id: id,
            pred_id: id,
            successor: None,
            buffer_size: 8192,
            transport_errors: TransportErrorPolicy::FailFast,
        }
    }
}

fn resolve_v4(host: &str, port: u16) -> Result<SocketAddrV4> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {host}:{port}"))?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| anyhow!("{host}:{port} has no IPv4 address"))
}

impl Config {
    pub fn settings(&self) -> Result<NodeSettings> {
        if self.buffer_size == 0 {
            return Err(anyhow!("buffer size must be positive"));
        }

        let bind = resolve_v4(&self.host, self.port)?;

        let successor = match (&self.succ_ip, self.succ_port) {
            (Some(ip), Some(port)) => Some(NodeInfo {
                id: self.succ_id.unwrap_or(self.id),
                addr: resolve_v4(ip, port)?,
            }),
            (None, None) => {
                // a ring of one: any other neighbor id would redirect to ourselves
                for (name, id) in [("SUCC_ID", self.succ_id), ("PRED_ID", self.pred_id)] {
                    if let Some(id) = id.filter(|&id| id != self.id) {
                        return Err(anyhow!(
                            "{name} {id:#06x} needs SUCC_IP and SUCC_PORT, otherwise this node is its own successor"
                        ));
                    }
                }
                warn!("No successor address configured, this node is its own successor");
                None
            }
            _ => return Err(anyhow!("SUCC_IP and SUCC_PORT must be set together")),
        };

        Ok(NodeSettings {
            bind,
            self_id: self.id,
            pred_id: self.pred_id.unwrap_or(self.id),
            successor,
            buffer_size: self.buffer_size,
            transport_errors: if self.tolerate_transport_errors {
                TransportErrorPolicy::CloseConnection
            } else {
                TransportErrorPolicy::FailFast
            },
        })
    }
}
