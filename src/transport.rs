//! Datagram transport.
//!
//! The election loop never touches sockets. It consumes a stream of inbound
//! [`Packet`]s and produces outbound ones; the pumps in this module bridge
//! those channels to UDP sockets:
//!
//! - [`spawn_inbox`]: socket -> `mpsc::Receiver<Packet>`
//! - [`spawn_outbox`]: `mpsc::Sender<Packet>` -> socket
//!
//! Both pumps stop when the shutdown token is cancelled and drop their socket,
//! which closes it. Cancelling a token twice is harmless, so closing stays
//! idempotent no matter how many owners trigger it.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::error::Result;

/// An opaque datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Source address for inbound packets. For outbound packets, an explicit
    /// destination; `None` means the socket's connected (broadcast) target.
    pub remote_addr: Option<SocketAddr>,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            remote_addr: None,
            payload,
        }
    }

    pub fn to(remote_addr: SocketAddr, payload: Vec<u8>) -> Self {
        Self {
            remote_addr: Some(remote_addr),
            payload,
        }
    }
}

/// Binds the listening socket and the outbound socket connected to the
/// broadcast target.
pub async fn bind_sockets(config: &NodeConfig) -> Result<(UdpSocket, UdpSocket)> {
    let inbound = UdpSocket::bind(config.listen_addr).await?;
    inbound.set_broadcast(true)?;

    let unspecified: SocketAddr = if config.broadcast_addr.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let outbound = UdpSocket::bind(unspecified).await?;
    outbound.set_broadcast(true)?;
    outbound.connect(config.broadcast_addr).await?;

    tracing::debug!(
        listen_addr = %config.listen_addr,
        broadcast_addr = %config.broadcast_addr,
        "UDP sockets bound"
    );

    Ok((inbound, outbound))
}

/// Forwards every datagram read from `socket` to the returned receiver.
///
/// Receive errors are checked against the shutdown token: after shutdown
/// they mean the socket is going away, otherwise they are logged and the
/// pump keeps reading.
pub fn spawn_inbox(
    socket: UdpSocket,
    max_packet_size: usize,
    capacity: usize,
    shutdown: CancellationToken,
) -> (mpsc::Receiver<Packet>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity);

    let handle = tokio::spawn(async move {
        tracing::debug!(local_addr = ?socket.local_addr().ok(), "UDP inbox started");
        let mut buf = vec![0u8; max_packet_size];

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((size, remote_addr)) => {
                    let packet = Packet::to(remote_addr, buf[..size].to_vec());
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        sent = tx.send(packet) => {
                            if sent.is_err() {
                                tracing::debug!("Inbound receiver dropped, stopping UDP inbox");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    tracing::warn!(error = %e, "UDP receive failed");
                }
            }
        }

        tracing::debug!("UDP inbox shutdown");
    });

    (rx, handle)
}

/// Writes every packet sent on the returned sender to `socket`.
pub fn spawn_outbox(
    socket: UdpSocket,
    capacity: usize,
    shutdown: CancellationToken,
) -> (mpsc::Sender<Packet>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Packet>(capacity);

    let handle = tokio::spawn(async move {
        tracing::debug!(local_addr = ?socket.local_addr().ok(), "UDP outbox started");

        loop {
            let packet = tokio::select! {
                _ = shutdown.cancelled() => break,
                packet = rx.recv() => match packet {
                    Some(packet) => packet,
                    None => break,
                },
            };

            let sent = match packet.remote_addr {
                Some(addr) => socket.send_to(&packet.payload, addr).await,
                None => socket.send(&packet.payload).await,
            };
            if let Err(e) = sent {
                tracing::warn!(
                    error = %e,
                    remote_addr = ?packet.remote_addr,
                    "UDP send failed"
                );
            }
        }

        tracing::debug!("UDP outbox shutdown");
    });

    (tx, handle)
}
