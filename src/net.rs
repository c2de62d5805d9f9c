use crate::messages::Outbound;
use anyhow::{Context, Result};
use std::net::{SocketAddr, SocketAddrV4};
use tokio::net::{TcpListener, TcpSocket, UdpSocket};
use tracing::{debug, info, warn};

// one pending client at a time
const LISTEN_BACKLOG: u32 = 1;

/// Binds the HTTP listener and the ring socket to the same address and port.
/// With port 0 the UDP socket takes whatever port the listener got.
pub(crate) async fn bind(addr: SocketAddrV4) -> Result<(TcpListener, UdpSocket)> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket
        .bind(SocketAddr::V4(addr))
        .with_context(|| format!("cannot bind TCP {addr}"))?;
    let listener = socket.listen(LISTEN_BACKLOG)?;
    let tcp_addr = listener.local_addr()?;
    info!("Listening for HTTP on {}", tcp_addr);

    let udp = UdpSocket::bind(tcp_addr)
        .await
        .with_context(|| format!("cannot bind UDP {tcp_addr}"))?;
    info!("Listening for ring messages on {}", udp.local_addr()?);

    Ok((listener, udp))
}

/// Best-effort send: failures are logged, never retried.
pub(crate) async fn send_ring_message(udp: &UdpSocket, outbound: &Outbound) {
    let bytes = outbound.message.encode();
    match udp.send_to(&bytes, outbound.to).await {
        Ok(_) => debug!("Sent {} to {}", outbound.message, outbound.to),
        Err(e) => warn!(
            "Sending {} to {} failed: {}",
            outbound.message, outbound.to, e
        ),
    }
}
